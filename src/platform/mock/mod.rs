//! In-memory platform doubles
//!
//! Every double is `Clone` and shares its state between clones, so a test can
//! hand one copy to the code under test and keep another to inspect or steer
//! it. The host simulator binary runs on the same doubles.

mod clock;
mod network;
mod portal;
mod store;
mod system;
mod transport;
mod updater;

pub use clock::SimClock;
pub use network::MockNetwork;
pub use portal::MockPortal;
pub use store::MemoryStore;
pub use system::{RecordingSink, RecordingSystem};
pub use transport::MockTransport;
pub use updater::MockUpdater;

use std::sync::{Mutex, MutexGuard};

// A panicking test thread must not cascade into every later assertion
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
