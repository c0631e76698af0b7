use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hmdlink::frame::{FrameConfig, FrameError, FrameReader};
use hmdlink::transport::TcpLink;

use crate::cmd::run::install_ctrlc_handler;
use crate::cmd::ListenArgs;
use crate::exit::{frame_error, io_error, transport_error, CliResult, SUCCESS};
use crate::output::{print_packet, OutputFormat};

/// Read timeout so Ctrl-C is noticed while a peer is idle.
const IDLE_TIMEOUT: Duration = Duration::from_millis(200);

pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let listener = TcpListener::bind((args.bind.as_str(), args.port))
        .map_err(|err| io_error("bind failed", err))?;
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "listening");
    }

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(Arc::clone(&running))?;

    let config = FrameConfig {
        read_timeout: Some(IDLE_TIMEOUT),
        ..FrameConfig::default()
    };
    let mut printed = 0usize;

    while running.load(Ordering::SeqCst) {
        let (stream, addr) = listener
            .accept()
            .map_err(|err| io_error("accept failed", err))?;
        let peer = addr.to_string();
        tracing::info!(%peer, "peer connected");

        let link = TcpLink::from_stream(stream).map_err(|err| transport_error("accept failed", err))?;
        let mut reader = FrameReader::with_config_tcp(link, config.clone())
            .map_err(|err| frame_error("accept failed", err))?;

        while running.load(Ordering::SeqCst) {
            let packet = match reader.read_packet() {
                Ok(packet) => packet,
                Err(FrameError::Io(err)) if hmdlink::transport::is_idle_timeout(&err) => continue,
                Err(FrameError::ConnectionClosed) => {
                    tracing::info!(%peer, "peer disconnected");
                    break;
                }
                Err(err) => return Err(frame_error("receive failed", err)),
            };

            if let Some(types) = &args.types {
                if !types.contains(&packet.message_type) {
                    continue;
                }
            }

            print_packet(&packet, &peer, format);
            printed = printed.saturating_add(1);

            if args.count.is_some_and(|count| printed >= count) {
                return Ok(SUCCESS);
            }
        }
    }

    Ok(SUCCESS)
}
