use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::{LinkError, Result};

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Bounded queue with a closeable producer side.
///
/// Producers never block: a full queue drops the item and counts it. After
/// [`WorkQueue::close`] every push is refused and consumers drain what is left.
pub struct WorkQueue<T> {
    name: String,
    sender: RwLock<Option<Sender<T>>>,
    receiver: Receiver<T>,
    dropped: AtomicU64,
}

impl<T: Send + 'static> WorkQueue<T> {
    pub fn new(name: impl Into<String>, capacity: usize) -> Arc<Self> {
        let (sender, receiver) = bounded(capacity.max(1));
        Arc::new(Self {
            name: name.into(),
            sender: RwLock::new(Some(sender)),
            receiver,
            dropped: AtomicU64::new(0),
        })
    }

    /// Enqueue without blocking. Returns false if the item was not queued.
    pub fn push(&self, item: T) -> bool {
        let guard = self.sender.read();
        let Some(sender) = guard.as_ref() else {
            debug!(queue = %self.name, "push after close ignored");
            return false;
        };
        match sender.try_send(item) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(queue = %self.name, dropped, "queue full; dropping item");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Signal that no more items will be produced.
    pub fn close(&self) {
        if self.sender.write().take().is_some() {
            debug!(queue = %self.name, remaining = self.receiver.len(), "queue closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.read().is_none()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Consumer handle. Iteration ends once the queue is closed and drained.
    pub fn receiver(&self) -> Receiver<T> {
        self.receiver.clone()
    }
}

/// A named thread draining one [`WorkQueue`].
pub struct Worker {
    name: String,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawn a thread that calls `handler` for every queued item until the
    /// queue is closed and empty.
    pub fn spawn<T, F>(queue: &Arc<WorkQueue<T>>, mut handler: F) -> Result<Self>
    where
        T: Send + 'static,
        F: FnMut(T) + Send + 'static,
    {
        let name = queue.name().to_string();
        let receiver = queue.receiver();
        // The worker holds no sender, so `recv` ends once the queue closes.
        let handle = thread::Builder::new()
            .name(format!("hmdlink-{name}"))
            .spawn(move || {
                for item in receiver.iter() {
                    handler(item);
                }
            })
            .map_err(|source| LinkError::Spawn {
                name: name.clone(),
                source,
            })?;

        Ok(Self {
            name,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait up to `timeout` for the thread to finish.
    ///
    /// Returns false and logs a warning on timeout; the thread is detached.
    pub fn join(mut self, timeout: Duration) -> bool {
        match self.handle.take() {
            Some(handle) => join_bounded(handle, timeout, &self.name),
            None => true,
        }
    }
}

/// Join `handle`, waiting at most `timeout`.
pub fn join_bounded(handle: JoinHandle<()>, timeout: Duration, name: &str) -> bool {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            warn!(thread = %name, ?timeout, "thread did not stop in time; detaching");
            return false;
        }
        thread::sleep(JOIN_POLL_INTERVAL);
    }
    if handle.join().is_err() {
        warn!(thread = %name, "thread panicked");
    }
    true
}
