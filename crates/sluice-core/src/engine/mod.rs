//! Playback and capture engines
//!
//! Both engines sit between a [`DeviceContext`](crate::device::DeviceContext)
//! and a platform stream queue, with a [`RingBuffer`](crate::ring::RingBuffer)
//! in the middle:
//!
//! - **PlaybackEngine**: a render thread fills the ring from the device's
//!   renderer and hands each chunk to the queue; completions free ring space
//!   and wake the thread.
//! - **CaptureEngine**: the queue fills ring chunks and completions publish
//!   them; the application pulls frames and the engine re-enqueues every
//!   chunk it finished reading.

mod capture;
mod playback;
mod semaphore;
mod state;

use std::time::Duration;

pub use capture::CaptureEngine;
pub use playback::PlaybackEngine;
pub use semaphore::Semaphore;
pub use state::EngineState;

use crate::audio::DEFAULT_DRAIN_TIMEOUT_MS;

/// Engine tuning shared by both directions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Longest `stop` waits for the device queue to empty
    pub drain_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_millis(DEFAULT_DRAIN_TIMEOUT_MS),
        }
    }
}

/// Poll `cond` until it holds or two seconds pass
#[cfg(test)]
pub(crate) fn wait_until<F>(mut cond: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while std::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    cond()
}
