use std::sync::Arc;

use hmdlink_frame::EyeImage;
use hmdlink_settings::{Setting, SettingValue};
use image::DynamicImage;
use parking_lot::RwLock;

/// Severity of a log record forwarded by the perception unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl RemoteLevel {
    /// Parse common level spellings; unknown levels map to `Info`.
    pub fn parse(level: &str) -> Self {
        match level.trim().to_ascii_lowercase().as_str() {
            "error" | "fatal" | "critical" => Self::Error,
            "warn" | "warning" => Self::Warn,
            "debug" => Self::Debug,
            "trace" | "verbose" => Self::Trace,
            _ => Self::Info,
        }
    }
}

/// Cross-module notification.
#[derive(Debug, Clone)]
pub enum HeadsetEvent {
    LinkUp { peer: String },
    LinkDown,
    CalibrationInstalled,
    TrackerPreview(Arc<DynamicImage>),
    EyePreview(Arc<Vec<EyeImage>>),
    RemoteLog {
        level: RemoteLevel,
        message: String,
        source: Option<String>,
    },
    GazeDistance(f32),
    SettingChanged {
        setting: Setting,
        value: SettingValue,
    },
}

/// Event topics observers can filter on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventTopic {
    Link,
    Calibration,
    Preview,
    RemoteLog,
    GazeDistance,
    Settings,
}

impl HeadsetEvent {
    pub fn topic(&self) -> EventTopic {
        match self {
            Self::LinkUp { .. } | Self::LinkDown => EventTopic::Link,
            Self::CalibrationInstalled => EventTopic::Calibration,
            Self::TrackerPreview(_) | Self::EyePreview(_) => EventTopic::Preview,
            Self::RemoteLog { .. } => EventTopic::RemoteLog,
            Self::GazeDistance(_) => EventTopic::GazeDistance,
            Self::SettingChanged { .. } => EventTopic::Settings,
        }
    }
}

pub type EventObserver = Arc<dyn Fn(&HeadsetEvent) + Send + Sync>;

/// Synchronous typed publish/subscribe.
///
/// Observers run on the publishing thread and must not block.
#[derive(Default)]
pub struct EventBus {
    observers: RwLock<Vec<(Option<EventTopic>, EventObserver)>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe one topic.
    pub fn subscribe(&self, topic: EventTopic, observer: EventObserver) {
        self.observers.write().push((Some(topic), observer));
    }

    /// Observe every event.
    pub fn subscribe_all(&self, observer: EventObserver) {
        self.observers.write().push((None, observer));
    }

    pub fn publish(&self, event: HeadsetEvent) {
        let topic = event.topic();
        let observers = self.observers.read().clone();
        for (filter, observer) in observers {
            if filter.is_none_or(|wanted| wanted == topic) {
                observer(&event);
            }
        }
    }

    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("observers", &self.observer_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn topic_filtering() {
        let bus = EventBus::new();
        let link = Arc::new(AtomicUsize::new(0));
        let all = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&link);
        bus.subscribe(
            EventTopic::Link,
            Arc::new(move |_: &HeadsetEvent| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let counter = Arc::clone(&all);
        bus.subscribe_all(Arc::new(move |_: &HeadsetEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        bus.publish(HeadsetEvent::LinkUp {
            peer: "127.0.0.1:5005".into(),
        });
        bus.publish(HeadsetEvent::GazeDistance(1.25));
        bus.publish(HeadsetEvent::LinkDown);

        assert_eq!(link.load(Ordering::SeqCst), 2);
        assert_eq!(all.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn remote_levels() {
        assert_eq!(RemoteLevel::parse("WARNING"), RemoteLevel::Warn);
        assert_eq!(RemoteLevel::parse("fatal"), RemoteLevel::Error);
        assert_eq!(RemoteLevel::parse("chatty"), RemoteLevel::Info);
    }
}
