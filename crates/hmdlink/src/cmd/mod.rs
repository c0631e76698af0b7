use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use hmdlink::frame::MessageType;
use hmdlink::settings::{Setting, SettingsRegistry};

use crate::exit::{settings_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod listen;
pub mod run;
pub mod send;
pub mod settings;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Connect to the perception unit and track until Ctrl-C.
    Run(RunArgs),
    /// Send a single packet.
    Send(SendArgs),
    /// Stand in for the perception unit and print received packets.
    Listen(ListenArgs),
    /// List every setting with its current value.
    Settings(SettingsArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Run(args) => run::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Listen(args) => listen::run(args, format),
        Command::Settings(args) => settings::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Settings overrides shared by the commands that talk to a peer.
#[derive(Args, Debug, Default)]
pub struct SettingsOverrides {
    /// Override a setting (repeatable), e.g. --set imu.beta_still=0.2
    #[arg(long = "set", value_name = "KEY=VALUE")]
    pub assignments: Vec<String>,
}

impl SettingsOverrides {
    pub fn registry(&self) -> CliResult<SettingsRegistry> {
        SettingsRegistry::from_assignments(&self.assignments)
            .map_err(|err| settings_error("invalid --set", err))
    }
}

/// Peer selection shared by `run` and `send`.
#[derive(Args, Debug, Default)]
pub struct PeerArgs {
    /// Perception unit host (overrides transport.peer_host).
    #[arg(long, env = "HMDLINK_HOST")]
    pub host: Option<String>,
    /// Perception unit port (overrides transport.peer_port).
    #[arg(long, env = "HMDLINK_PORT")]
    pub port: Option<u16>,
    #[command(flatten)]
    pub overrides: SettingsOverrides,
}

impl PeerArgs {
    pub fn registry(&self) -> CliResult<SettingsRegistry> {
        let registry = self.overrides.registry()?;
        if let Some(host) = &self.host {
            registry
                .set(Setting::PeerHost, host.as_str())
                .map_err(|err| settings_error("invalid --host", err))?;
        }
        if let Some(port) = self.port {
            registry
                .set(Setting::PeerPort, f64::from(port))
                .map_err(|err| settings_error("invalid --port", err))?;
        }
        Ok(registry)
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub peer: PeerArgs,
    /// Operating mode (overrides router.mode).
    #[arg(long, value_parser = ["companion", "standalone"])]
    pub mode: Option<String>,
    /// Status print interval (e.g. 1s, 250ms).
    #[arg(long, default_value = "1s")]
    pub interval: String,
    /// Stop after this long instead of waiting for Ctrl-C.
    #[arg(long)]
    pub duration: Option<String>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    #[command(flatten)]
    pub peer: PeerArgs,
    /// Message type name, e.g. control, config, scene_markers.
    #[arg(long = "type", short = 't', value_parser = parse_message_type)]
    pub message_type: MessageType,
    /// JSON payload.
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub json: Option<String>,
    /// Raw string payload.
    #[arg(long, conflicts_with_all = ["json", "file"])]
    pub data: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with_all = ["json", "data"])]
    pub file: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Address to bind.
    #[arg(long, default_value = "127.0.0.1")]
    pub bind: String,
    /// Port to bind (0 picks a free port).
    #[arg(long, default_value_t = 5005)]
    pub port: u16,
    /// Only print these message types (comma-separated names).
    #[arg(long, value_delimiter = ',', value_parser = parse_message_type)]
    pub types: Option<Vec<MessageType>>,
    /// Exit after printing N packets.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug, Default)]
pub struct SettingsArgs {
    #[command(flatten)]
    pub overrides: SettingsOverrides,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

fn parse_message_type(name: &str) -> Result<MessageType, String> {
    MessageType::from_name(name).ok_or_else(|| {
        let known: Vec<_> = MessageType::ALL
            .iter()
            .map(|ty| ty.name().to_ascii_lowercase())
            .collect();
        format!("unknown message type {name:?} (expected one of {})", known.join(", "))
    })
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

#[cfg(test)]
mod tests {
    use hmdlink::settings::SettingsProvider;

    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
    }

    #[test]
    fn message_type_names_are_case_insensitive() {
        assert_eq!(parse_message_type("scene-markers"), Ok(MessageType::SceneMarkers));
        assert_eq!(parse_message_type("CONTROL"), Ok(MessageType::Control));
        assert!(parse_message_type("video").unwrap_err().contains("gaze_distance"));
    }

    #[test]
    fn peer_flags_override_assignments() {
        let args = PeerArgs {
            host: Some("10.0.0.7".into()),
            port: Some(6000),
            overrides: SettingsOverrides {
                assignments: vec!["transport.peer_port=7000".into()],
            },
        };
        let registry = args.registry().unwrap();
        assert_eq!(registry.text(Setting::PeerHost).unwrap(), "10.0.0.7");
        assert_eq!(registry.number(Setting::PeerPort).unwrap(), 6000.0);
    }

    #[test]
    fn bad_assignment_is_config_invalid() {
        let overrides = SettingsOverrides {
            assignments: vec!["imu.beta_still=7".into()],
        };
        let err = overrides.registry().err().unwrap();
        assert_eq!(err.code, crate::exit::CONFIG_INVALID);
    }
}
