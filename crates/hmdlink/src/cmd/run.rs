use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use glam::EulerRot;
use hmdlink::settings::Setting;
use hmdlink::HeadsetController;

use crate::cmd::{parse_duration, RunArgs};
use crate::exit::{controller_error, settings_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_status, OutputFormat, StatusOutput};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

pub fn run(args: RunArgs, format: OutputFormat) -> CliResult<i32> {
    let interval = parse_duration(&args.interval)?;
    let duration = args.duration.as_deref().map(parse_duration).transpose()?;

    let settings = args.peer.registry()?;
    if let Some(mode) = &args.mode {
        settings
            .set(Setting::RouterMode, mode.as_str())
            .map_err(|err| settings_error("invalid --mode", err))?;
    }

    let mut controller = HeadsetController::new(Arc::new(settings))
        .map_err(|err| controller_error("startup failed", err))?;
    controller
        .connect()
        .map_err(|err| controller_error("connect failed", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(Arc::clone(&running))?;

    let started = Instant::now();
    let mut next_print = started;
    while running.load(Ordering::SeqCst) {
        if duration.is_some_and(|limit| started.elapsed() >= limit) {
            break;
        }
        if Instant::now() >= next_print {
            print_status(&status(&controller), format);
            next_print += interval;
        }
        thread::sleep(POLL_INTERVAL);
    }

    controller.shutdown();
    Ok(SUCCESS)
}

fn status(controller: &HeadsetController) -> StatusOutput {
    let (yaw, pitch, roll) = controller.orientation().to_euler(EulerRot::YXZ);
    StatusOutput {
        connected: controller.is_connected(),
        yaw: yaw.to_degrees(),
        pitch: pitch.to_degrees(),
        roll: roll.to_degrees(),
        gaze_distance: controller.gaze_distance(),
        packets_received: controller
            .transport_stats()
            .map_or(0, |stats| stats.packets_received),
        dropped: controller.router_stats().dropped(),
    }
}

pub fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
