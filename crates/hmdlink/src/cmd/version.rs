use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("hmdlink {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: hmdlink");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("HMDLINK_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!(
        "features: schema={}, cli=true",
        cfg!(feature = "schema")
    );
    println!(
        "protocol: {} message types, header {} bytes",
        hmdlink::frame::MessageType::ALL.len(),
        hmdlink::frame::HEADER_SIZE
    );

    Ok(SUCCESS)
}
