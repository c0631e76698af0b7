use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use glam::Quat;
use hmdlink_frame::{decode_eye_images, MessageType};
use hmdlink_link::{
    join_bounded, ControlCommand, Endpoint, EventBus, HeadsetEvent, Link, LinkError, LinkStatus,
    Message, MessageRouter, OperatingMode, RemoteLevel, RouteTable, RouterStats, StatusObserver,
    StreamTransport, TransportConfig, TransportStats, WorkQueue, Worker,
};
use hmdlink_settings::{Setting, SettingValue, SettingsProvider, SettingsRegistry};
use hmdlink_tracking::{
    AtomicF32, CalibratedGazeModel, DistanceThrottle, EyeVectorSample, FilterConfig, FilterStats,
    GazeConfig, GazeDistanceEstimator, ImuSample, ImuValidator, OrientationFilter,
    PublishedOrientation, SceneRaycaster, ThrottleConfig,
};
use image::DynamicImage;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, error, info, trace, warn};

use crate::error::{ControllerError, Result};

/// Target used when re-emitting log records from the perception unit.
pub const REMOTE_LOG_TARGET: &str = "hmdlink::remote";

/// Everything the controller reads from settings at construction.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub mode: OperatingMode,
    pub filter: FilterConfig,
    pub gaze: GazeConfig,
    pub throttle: ThrottleConfig,
    pub queue_capacity: usize,
    pub join_timeout: Duration,
}

impl ControllerConfig {
    pub fn from_settings(settings: &dyn SettingsProvider) -> Result<Self> {
        Ok(Self {
            mode: OperatingMode::from_settings(settings)?,
            filter: FilterConfig::from_settings(settings)?,
            gaze: GazeConfig::from_settings(settings)?,
            throttle: ThrottleConfig::from_settings(settings)?,
            queue_capacity: settings.number(Setting::WorkerQueueCapacity)? as usize,
            join_timeout: Duration::from_millis(settings.number(Setting::JoinTimeoutMs)? as u64),
        })
    }
}

/// Tracking state shared by the workers and the frame thread.
struct Tracking {
    filter: Mutex<OrientationFilter>,
    orientation: PublishedOrientation,
    gaze: GazeDistanceEstimator,
    throttle: Mutex<DistanceThrottle>,
    /// NaN until the first estimate.
    distance: AtomicF32,
    epoch: Instant,
}

impl Tracking {
    fn new(config: &ControllerConfig, raycaster: Option<Arc<dyn SceneRaycaster>>) -> Result<Self> {
        let mut gaze = GazeDistanceEstimator::new(config.gaze)?;
        if let Some(raycaster) = raycaster {
            gaze = gaze.with_raycaster(raycaster);
        }
        Ok(Self {
            filter: Mutex::new(OrientationFilter::new(config.filter)?),
            orientation: PublishedOrientation::default(),
            gaze,
            throttle: Mutex::new(DistanceThrottle::new(config.throttle)),
            distance: AtomicF32::new(f32::NAN),
            epoch: Instant::now(),
        })
    }

    /// Push a changed setting into the live components.
    fn apply_setting(&self, setting: Setting, value: &SettingValue) -> Result<()> {
        use SettingValue::{Flag, Number};

        match (setting, value) {
            (Setting::BetaMoving, Number(v)) => self.filter.lock().set_beta_moving(*v as f32)?,
            (Setting::BetaStill, Number(v)) => self.filter.lock().set_beta_still(*v as f32)?,
            (Setting::MovingThreshold, Number(v)) => {
                self.filter.lock().set_moving_threshold(*v as f32)?
            }
            (Setting::MinGyroThreshold, Number(v)) => {
                self.filter.lock().set_min_gyro_threshold(*v as f32)?
            }
            (Setting::SamplePeriod, Number(v)) => {
                self.filter.lock().set_sample_period(*v as f32)?
            }
            (Setting::UseMagnetometer, Flag(v)) => self.filter.lock().set_use_magnetometer(*v),
            (Setting::NearFieldThreshold, Number(v)) => {
                let mut config = self.gaze.config();
                config.near_field_threshold = *v as f32;
                self.gaze.set_config(config)?;
            }
            (Setting::VergenceEpsilonDeg, Number(v)) => {
                let mut config = self.gaze.config();
                config.vergence_epsilon_deg = *v as f32;
                self.gaze.set_config(config)?;
            }
            (Setting::AngularTracking, Flag(v)) => {
                let mut config = self.gaze.config();
                config.angular_tracking = *v;
                self.gaze.set_config(config)?;
            }
            (Setting::MinSendIntervalMs, Number(v)) => {
                let mut throttle = self.throttle.lock();
                let mut config = throttle.config();
                config.min_interval = Duration::from_millis(*v as u64);
                throttle.set_config(config)?;
            }
            (Setting::ChangeRatio, Number(v)) => {
                let mut throttle = self.throttle.lock();
                let mut config = throttle.config();
                config.change_ratio = *v as f32;
                throttle.set_config(config)?;
            }
            (other, _) => debug!(setting = %other, "takes effect on next connect"),
        }
        Ok(())
    }
}

struct Queues {
    imu: Arc<WorkQueue<Bytes>>,
    eye: Arc<WorkQueue<Bytes>>,
    calibration: Arc<WorkQueue<Value>>,
    config: Arc<WorkQueue<Value>>,
}

impl Queues {
    fn new(capacity: usize) -> Self {
        Self {
            imu: WorkQueue::new("imu", capacity),
            eye: WorkQueue::new("eye", capacity),
            calibration: WorkQueue::new("calibration", capacity),
            config: WorkQueue::new("config", capacity),
        }
    }

    fn close(&self) {
        self.imu.close();
        self.eye.close();
        self.calibration.close();
        self.config.close();
    }
}

struct StreamSession {
    transport: Arc<StreamTransport>,
    pump: Option<JoinHandle<()>>,
}

/// Wires the perception link to head tracking and gaze estimation.
///
/// Inbound packets are routed on a dedicated thread and handed to per-kind
/// work queues; the workers update the filter and the gaze estimator and
/// publish results that [`HeadsetController::orientation`] and
/// [`HeadsetController::gaze_distance`] read without locking.
pub struct HeadsetController {
    settings: Arc<SettingsRegistry>,
    config: ControllerConfig,
    router: Arc<MessageRouter>,
    events: Arc<EventBus>,
    tracking: Arc<Tracking>,
    queues: Queues,
    workers: Vec<Worker>,
    stream: Option<StreamSession>,
    shut_down: bool,
}

impl HeadsetController {
    /// Build the pipeline from `settings` without connecting.
    pub fn new(settings: Arc<SettingsRegistry>) -> Result<Self> {
        Self::build(settings, None)
    }

    /// As [`HeadsetController::new`], with a scene raycast for far gaze.
    pub fn with_raycaster(
        settings: Arc<SettingsRegistry>,
        raycaster: Arc<dyn SceneRaycaster>,
    ) -> Result<Self> {
        Self::build(settings, Some(raycaster))
    }

    fn build(
        settings: Arc<SettingsRegistry>,
        raycaster: Option<Arc<dyn SceneRaycaster>>,
    ) -> Result<Self> {
        let config = ControllerConfig::from_settings(settings.as_ref())?;
        let tracking = Arc::new(Tracking::new(&config, raycaster)?);
        let events = Arc::new(EventBus::new());
        let router = Arc::new(build_router(config.mode)?);
        let queues = Queues::new(config.queue_capacity);

        register_handlers(&router, &queues, &events);
        subscribe_settings(&settings, Arc::downgrade(&tracking), Arc::clone(&events));

        let workers = spawn_workers(&queues, &tracking, &router, &events, &settings)?;

        info!(mode = %config.mode.as_str(), "headset controller ready");
        Ok(Self {
            settings,
            config,
            router,
            events,
            tracking,
            queues,
            workers,
            stream: None,
            shut_down: false,
        })
    }

    /// Connect to the configured peer and start routing its packets.
    ///
    /// A single attempt; the caller decides whether to retry.
    pub fn connect(&mut self) -> Result<()> {
        if let Some(session) = &self.stream {
            if session.transport.is_connected() {
                return Err(ControllerError::AlreadyConnected(
                    session.transport.peer().to_string(),
                ));
            }
            self.disconnect();
        }

        let transport_config = TransportConfig::from_settings(self.settings.as_ref())?;
        let observer = status_observer(&self.events, transport_config.peer.to_string());
        let (transport, inbound) = StreamTransport::connect(transport_config, Some(observer))?;
        let transport = Arc::new(transport);
        self.router
            .attach_link(Endpoint::Stream, Arc::clone(&transport) as Arc<dyn Link>);

        let router = Arc::clone(&self.router);
        // Ends once the receive loop exits and drops its sender.
        let pump = thread::Builder::new()
            .name("hmdlink-router".into())
            .spawn(move || {
                for packet in inbound.iter() {
                    // Failures are counted and logged by the router.
                    let _ = router.route_packet(Endpoint::Stream, packet);
                }
                debug!("router pump finished");
            })
            .map_err(|source| LinkError::Spawn {
                name: "router".into(),
                source,
            })?;

        self.stream = Some(StreamSession {
            transport,
            pump: Some(pump),
        });
        Ok(())
    }

    /// Stop the stream, then let the router drain what was already received.
    pub fn disconnect(&mut self) {
        let Some(mut session) = self.stream.take() else {
            return;
        };
        session.transport.shutdown();
        self.router.detach_link(Endpoint::Stream);
        if let Some(pump) = session.pump.take() {
            join_bounded(pump, self.config.join_timeout, "router");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream
            .as_ref()
            .is_some_and(|session| session.transport.is_connected())
    }

    pub fn mode(&self) -> OperatingMode {
        self.config.mode
    }

    /// Deliver a payload that arrived outside the stream, e.g. from a
    /// locally attached IMU in standalone mode.
    pub fn ingest(
        &self,
        origin: Endpoint,
        message_type: MessageType,
        payload: impl Into<Bytes>,
    ) -> Result<()> {
        self.router
            .route_inbound(origin, message_type, payload.into())?;
        Ok(())
    }

    pub fn send_control(&self, command: &ControlCommand) -> Result<()> {
        self.router
            .route_outbound(MessageType::Control, &command.to_message()?)?;
        Ok(())
    }

    pub fn send_scene_markers(&self, markers: Value) -> Result<()> {
        self.router
            .route_outbound(MessageType::SceneMarkers, &Message::Json(markers))?;
        Ok(())
    }

    pub fn send_scene_capture(&self, frame: DynamicImage) -> Result<()> {
        self.router
            .route_outbound(MessageType::SceneCapture, &Message::Image(frame))?;
        Ok(())
    }

    /// Snap the local head orientation back to identity.
    pub fn reset_orientation(&self) {
        let mut filter = self.tracking.filter.lock();
        filter.reset();
        self.tracking.orientation.store(filter.quaternion());
        info!("orientation reset");
    }

    /// Install a calibration produced locally instead of by the peer.
    pub fn install_calibration(&self, model: CalibratedGazeModel) -> Result<()> {
        self.tracking.gaze.install_calibration(model)?;
        self.tracking.throttle.lock().reset();
        self.events.publish(HeadsetEvent::CalibrationInstalled);
        Ok(())
    }

    /// Latest head orientation. Never blocks.
    pub fn orientation(&self) -> Quat {
        self.tracking.orientation.load()
    }

    /// Latest gaze distance in meters, once one has been estimated.
    pub fn gaze_distance(&self) -> Option<f32> {
        let distance = self.tracking.distance.load(Ordering::Acquire);
        (!distance.is_nan()).then_some(distance)
    }

    pub fn has_calibration(&self) -> bool {
        self.tracking.gaze.has_calibration()
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn settings(&self) -> &Arc<SettingsRegistry> {
        &self.settings
    }

    pub fn router_stats(&self) -> RouterStats {
        self.router.stats()
    }

    pub fn transport_stats(&self) -> Option<TransportStats> {
        self.stream
            .as_ref()
            .map(|session| session.transport.stats())
    }

    pub fn filter_stats(&self) -> FilterStats {
        self.tracking.filter.lock().stats()
    }

    /// Stop the stream, close every queue and join the workers.
    ///
    /// Idempotent. Join timeouts are logged, never escalated.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        self.disconnect();
        self.queues.close();
        for worker in self.workers.drain(..) {
            worker.join(self.config.join_timeout);
        }
        info!("headset controller stopped");
    }
}

impl Drop for HeadsetController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn build_router(mode: OperatingMode) -> Result<MessageRouter> {
    let router = MessageRouter::new(RouteTable::for_mode(mode));
    #[cfg(feature = "schema")]
    let router = router.with_schemas(hmdlink_link::PayloadSchemas::builtin()?);
    Ok(router)
}

fn status_observer(events: &Arc<EventBus>, peer: String) -> StatusObserver {
    let events = Arc::clone(events);
    Arc::new(move |status: LinkStatus| match status {
        LinkStatus::Connected => events.publish(HeadsetEvent::LinkUp { peer: peer.clone() }),
        LinkStatus::Disconnected => events.publish(HeadsetEvent::LinkDown),
    })
}

/// Local handlers only enqueue or publish; they run on the router thread.
fn register_handlers(router: &MessageRouter, queues: &Queues, events: &Arc<EventBus>) {
    let raw_to = |queue: &Arc<WorkQueue<Bytes>>| {
        let queue = Arc::clone(queue);
        Arc::new(move |message: &Message| {
            if let Some(raw) = message.as_raw() {
                queue.push(raw.clone());
            }
        })
    };
    let json_to = |queue: &Arc<WorkQueue<Value>>| {
        let queue = Arc::clone(queue);
        Arc::new(move |message: &Message| {
            if let Some(document) = message.as_json() {
                queue.push(document.clone());
            }
        })
    };

    router.register_handler(MessageType::Imu, raw_to(&queues.imu));
    router.register_handler(MessageType::EyeVectors, raw_to(&queues.eye));
    router.register_handler(MessageType::GazeCalibration, json_to(&queues.calibration));
    router.register_handler(MessageType::Config, json_to(&queues.config));

    let bus = Arc::clone(events);
    router.register_handler(
        MessageType::Log,
        Arc::new(move |message: &Message| match message {
            Message::Json(record) => emit_remote_log(&bus, record),
            Message::Raw(raw) => emit_remote_log(
                &bus,
                &serde_json::json!({ "level": "info", "message": String::from_utf8_lossy(raw) }),
            ),
            Message::Image(_) => {}
        }),
    );

    let bus = Arc::clone(events);
    router.register_handler(
        MessageType::TrackerPreview,
        Arc::new(move |message: &Message| {
            if let Some(frame) = message.as_image() {
                bus.publish(HeadsetEvent::TrackerPreview(Arc::new(frame.clone())));
            }
        }),
    );

    let bus = Arc::clone(events);
    router.register_handler(
        MessageType::EyePreview,
        Arc::new(move |message: &Message| {
            if let Some(raw) = message.as_raw() {
                let images = decode_eye_images(raw.clone());
                if !images.is_empty() {
                    bus.publish(HeadsetEvent::EyePreview(Arc::new(images)));
                }
            }
        }),
    );
}

/// Re-emit a perception-unit log record locally and on the bus.
fn emit_remote_log(events: &EventBus, record: &Value) {
    let field = |name: &str| record.get(name).and_then(Value::as_str);
    let level = RemoteLevel::parse(field("level").unwrap_or("info"));
    let message = field("message").unwrap_or_default().to_string();
    let source = field("source").map(str::to_string);
    let origin = source.as_deref().unwrap_or("perception");

    match level {
        RemoteLevel::Error => error!(target: REMOTE_LOG_TARGET, source = origin, "{message}"),
        RemoteLevel::Warn => warn!(target: REMOTE_LOG_TARGET, source = origin, "{message}"),
        RemoteLevel::Info => info!(target: REMOTE_LOG_TARGET, source = origin, "{message}"),
        RemoteLevel::Debug => debug!(target: REMOTE_LOG_TARGET, source = origin, "{message}"),
        RemoteLevel::Trace => trace!(target: REMOTE_LOG_TARGET, source = origin, "{message}"),
    }

    events.publish(HeadsetEvent::RemoteLog {
        level,
        message,
        source,
    });
}

fn subscribe_settings(settings: &SettingsRegistry, tracking: Weak<Tracking>, events: Arc<EventBus>) {
    settings.subscribe(Arc::new(move |setting: Setting, value: &SettingValue| {
        let Some(tracking) = tracking.upgrade() else {
            return;
        };
        match tracking.apply_setting(setting, value) {
            Ok(()) => debug!(setting = %setting, %value, "setting applied"),
            Err(err) => warn!(setting = %setting, error = %err, "setting not applied"),
        }
        events.publish(HeadsetEvent::SettingChanged {
            setting,
            value: value.clone(),
        });
    }));
}

fn spawn_workers(
    queues: &Queues,
    tracking: &Arc<Tracking>,
    router: &Arc<MessageRouter>,
    events: &Arc<EventBus>,
    settings: &Arc<SettingsRegistry>,
) -> Result<Vec<Worker>> {
    let mut workers = Vec::with_capacity(4);

    let state = Arc::clone(tracking);
    let mut validator = ImuValidator::new();
    let mut last_stamp = f64::NEG_INFINITY;
    workers.push(Worker::spawn(&queues.imu, move |payload: Bytes| {
        // Samples without their own timestamp are stamped on arrival.
        let stamp = state.epoch.elapsed().as_secs_f64().max(last_stamp + 1e-9);
        last_stamp = stamp;
        let sample = match ImuSample::parse(&payload, stamp) {
            Ok(sample) => sample,
            Err(err) => {
                warn!(error = %err, "dropping IMU payload");
                return;
            }
        };
        if !validator.accept(&sample) {
            return;
        }
        // Publish before unlocking so a concurrent reset is never overwritten.
        let mut filter = state.filter.lock();
        filter.update(&sample);
        state.orientation.store(filter.quaternion());
    })?);

    let state = Arc::clone(tracking);
    let router = Arc::clone(router);
    let bus = Arc::clone(events);
    workers.push(Worker::spawn(&queues.eye, move |payload: Bytes| {
        let sample = match EyeVectorSample::parse(&payload) {
            Ok(sample) => sample,
            Err(err) => {
                warn!(error = %err, "dropping eye vector payload");
                return;
            }
        };
        let Some(estimate) = state.gaze.estimate(&sample) else {
            trace!("no gaze calibration; eye sample ignored");
            return;
        };
        state.distance.store(estimate.distance, Ordering::Release);

        if state.throttle.lock().should_send(estimate.distance, Instant::now()) {
            let payload = Bytes::copy_from_slice(&estimate.distance.to_le_bytes());
            if let Err(err) = router.route_outbound(MessageType::GazeDistance, &Message::Raw(payload)) {
                debug!(error = %err, "gaze distance not sent");
            }
            bus.publish(HeadsetEvent::GazeDistance(estimate.distance));
        }
    })?);

    let state = Arc::clone(tracking);
    let bus = Arc::clone(events);
    workers.push(Worker::spawn(&queues.calibration, move |document: Value| {
        let installed = CalibratedGazeModel::from_value(&document)
            .and_then(|model| state.gaze.install_calibration(model));
        match installed {
            Ok(()) => {
                state.throttle.lock().reset();
                bus.publish(HeadsetEvent::CalibrationInstalled);
            }
            Err(err) => warn!(error = %err, "rejected gaze calibration"),
        }
    })?);

    let registry = Arc::clone(settings);
    workers.push(Worker::spawn(&queues.config, move |document: Value| {
        match registry.apply_json(&document) {
            Ok(report) => info!(
                applied = report.applied.len(),
                rejected = report.rejected.len(),
                "settings pushed by peer"
            ),
            Err(err) => warn!(error = %err, "rejected settings document"),
        }
    })?);

    Ok(workers)
}
