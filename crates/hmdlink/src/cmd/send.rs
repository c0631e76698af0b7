use std::fs;

use hmdlink::frame::MessageType;
use hmdlink::link::{StreamTransport, TransportConfig};

use crate::cmd::SendArgs;
use crate::exit::{io_error, link_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::OutputFormat;

pub fn run(args: SendArgs, _format: OutputFormat) -> CliResult<i32> {
    let payload = resolve_payload(&args)?;
    let settings = args.peer.registry()?;
    let config = TransportConfig::from_settings(&settings)
        .map_err(|err| link_error("invalid transport settings", err))?;

    let (transport, _inbound) =
        StreamTransport::connect(config, None).map_err(|err| link_error("connect failed", err))?;
    let sent = transport.send_packet(args.message_type, &payload);
    transport.shutdown();
    sent.map_err(|err| link_error("send failed", err))?;

    tracing::info!(
        packet_type = %args.message_type,
        bytes = payload.len(),
        peer = %transport.peer(),
        "packet sent"
    );
    Ok(SUCCESS)
}

fn resolve_payload(args: &SendArgs) -> CliResult<Vec<u8>> {
    if let Some(json) = &args.json {
        serde_json::from_str::<serde_json::Value>(json)
            .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")))?;
        return Ok(json.as_bytes().to_vec());
    }
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(path) = &args.file {
        return fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err));
    }
    if is_json_type(args.message_type) {
        return Err(CliError::new(
            USAGE,
            format!("{} needs a payload (--json, --data or --file)", args.message_type),
        ));
    }
    Ok(Vec::new())
}

fn is_json_type(message_type: MessageType) -> bool {
    matches!(
        message_type,
        MessageType::Control
            | MessageType::Config
            | MessageType::Log
            | MessageType::SceneMarkers
            | MessageType::GazeCalibration
    )
}
