//! Lock-free state read by the render thread.
//!
//! The tracking workers publish here; a frame loop reads once per frame and
//! never blocks on a worker.

use std::hint;
use std::sync::atomic::{fence, AtomicU32, AtomicU64, Ordering};

use glam::Quat;
use parking_lot::Mutex;

/// `f32` stored as its bit pattern in an `AtomicU32`.
#[derive(Debug)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn new(val: f32) -> Self {
        Self(AtomicU32::new(val.to_bits()))
    }

    pub fn load(&self, order: Ordering) -> f32 {
        f32::from_bits(self.0.load(order))
    }

    pub fn store(&self, val: f32, order: Ordering) {
        self.0.store(val.to_bits(), order);
    }
}

impl Default for AtomicF32 {
    fn default() -> Self {
        Self::new(0.0)
    }
}

/// Latest head orientation behind a sequence lock.
///
/// `version` is odd while a write is in progress. Readers retry until they
/// see the same even version before and after copying the components, so a
/// quaternion is never observed half-written.
#[derive(Debug)]
pub struct PublishedOrientation {
    version: AtomicU64,
    components: [AtomicU32; 4],
    writer: Mutex<()>,
}

impl Default for PublishedOrientation {
    fn default() -> Self {
        Self::new(Quat::IDENTITY)
    }
}

impl PublishedOrientation {
    pub fn new(initial: Quat) -> Self {
        let [x, y, z, w] = initial.to_array();
        Self {
            version: AtomicU64::new(0),
            components: [x, y, z, w].map(|c| AtomicU32::new(c.to_bits())),
            writer: Mutex::new(()),
        }
    }

    pub fn store(&self, q: Quat) {
        // Writers are serialized; readers never take this lock.
        let _guard = self.writer.lock();
        let start = self.version.load(Ordering::Relaxed);
        self.version.store(start.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);
        for (slot, c) in self.components.iter().zip(q.to_array()) {
            slot.store(c.to_bits(), Ordering::Relaxed);
        }
        self.version.store(start.wrapping_add(2), Ordering::Release);
    }

    pub fn load(&self) -> Quat {
        loop {
            let before = self.version.load(Ordering::Acquire);
            if before % 2 == 1 {
                hint::spin_loop();
                continue;
            }
            let values = self
                .components
                .each_ref()
                .map(|c| f32::from_bits(c.load(Ordering::Relaxed)));
            fence(Ordering::Acquire);
            if self.version.load(Ordering::Relaxed) == before {
                return Quat::from_array(values);
            }
            hint::spin_loop();
        }
    }

    /// Number of completed writes.
    pub fn updates(&self) -> u64 {
        self.version.load(Ordering::Acquire) / 2
    }
}
