//! Device context shared between the application and a backend
//!
//! The context carries the requested (and, after configuration, the
//! negotiated) stream format, the render callback used by playback, the
//! device clock and the connectivity flag. Backends read it; the only
//! state they write is the negotiated format and the connectivity flag.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::types::DeviceFormat;

/// Lock a mutex, recovering the data if a holder panicked
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Producer of playback audio
///
/// Called only from a playback engine's render thread.
pub trait Renderer: Send {
    /// Write `frames` interleaved frames into `dest`
    ///
    /// `dest` holds exactly `frames * channel_stride * sample bytes` bytes
    /// in the format the device was configured with.
    fn render(&mut self, dest: &mut [u8], frames: usize, channel_stride: usize, format: &DeviceFormat);
}

/// Renderer that outputs digital silence
#[derive(Debug, Default)]
pub struct SilenceRenderer;

impl Renderer for SilenceRenderer {
    fn render(&mut self, dest: &mut [u8], _frames: usize, _stride: usize, format: &DeviceFormat) {
        dest.fill(format.sample_type.silence());
    }
}

/// Device clock time paired with the audio still queued ahead of it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClockLatency {
    pub clock_time: Duration,
    pub latency: Duration,
}

/// Shared device state consumed by backends
pub struct DeviceContext {
    format: Mutex<DeviceFormat>,
    renderer: Mutex<Box<dyn Renderer>>,
    connected: AtomicBool,
    disconnect_reason: Mutex<Option<String>>,
    /// Frames rendered since the clock base was last set
    frames_done: AtomicU64,
    clock_base_ns: AtomicU64,
}

impl DeviceContext {
    /// Create a context requesting `format`, rendering silence
    pub fn new(format: DeviceFormat) -> Self {
        Self::with_renderer(format, Box::new(SilenceRenderer))
    }

    pub fn with_renderer(format: DeviceFormat, renderer: Box<dyn Renderer>) -> Self {
        Self {
            format: Mutex::new(format),
            renderer: Mutex::new(renderer),
            connected: AtomicBool::new(true),
            disconnect_reason: Mutex::new(None),
            frames_done: AtomicU64::new(0),
            clock_base_ns: AtomicU64::new(0),
        }
    }

    /// Current format (requested, or negotiated once configured)
    pub fn format(&self) -> DeviceFormat {
        *lock(&self.format)
    }

    /// Store a negotiated format
    pub fn set_format(&self, format: DeviceFormat) {
        *lock(&self.format) = format;
    }

    pub fn channel_count(&self) -> usize {
        self.format().channel_count()
    }

    pub fn frame_size(&self) -> usize {
        self.format().frame_size()
    }

    pub fn sample_bytes(&self) -> usize {
        self.format().sample_bytes()
    }

    pub fn frequency(&self) -> u32 {
        self.format().frequency
    }

    pub fn update_size(&self) -> u32 {
        self.format().update_size
    }

    pub fn buffer_size(&self) -> u32 {
        self.format().buffer_size
    }

    /// Replace the render callback
    pub fn set_renderer(&self, renderer: Box<dyn Renderer>) {
        *lock(&self.renderer) = renderer;
    }

    /// Pull `frames` frames of rendered audio into `dest`
    ///
    /// Advances the device clock by the rendered frame count.
    pub fn render_samples(&self, dest: &mut [u8], frames: usize, channel_stride: usize) {
        let format = self.format();
        {
            let mut renderer = lock(&self.renderer);
            renderer.render(dest, frames, channel_stride, &format);
        }
        self.frames_done.fetch_add(frames as u64, Ordering::AcqRel);
    }

    /// Device clock: clock base plus rendered frames at the device rate
    pub fn clock_time(&self) -> Duration {
        let base = Duration::from_nanos(self.clock_base_ns.load(Ordering::Acquire));
        let frequency = self.frequency().max(1) as u64;
        let frames = self.frames_done.load(Ordering::Acquire);
        let secs = frames / frequency;
        let rem = frames % frequency;
        base + Duration::from_secs(secs) + Duration::from_nanos(rem * 1_000_000_000 / frequency)
    }

    /// Fold the rendered frames into the clock base
    ///
    /// Called before the frequency changes so the clock stays monotonic.
    pub fn rebase_clock(&self) {
        let now = self.clock_time();
        self.clock_base_ns
            .store(now.as_nanos() as u64, Ordering::Release);
        self.frames_done.store(0, Ordering::Release);
    }

    /// Whether the device is still usable
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Mark the device as lost
    ///
    /// Only the first call after a (re)connect logs and records its reason.
    pub fn handle_disconnect(&self, reason: impl Into<String>) {
        if !self.connected.swap(false, Ordering::AcqRel) {
            return;
        }
        let reason = reason.into();
        log::error!("Device disconnected: {}", reason);
        *lock(&self.disconnect_reason) = Some(reason);
    }

    /// Reason recorded by the last disconnect, if any
    pub fn disconnect_reason(&self) -> Option<String> {
        lock(&self.disconnect_reason).clone()
    }

    /// Re-arm the connectivity flag after an explicit open or reset
    pub fn reconnect(&self) {
        if !self.connected.swap(true, Ordering::AcqRel) {
            log::info!("Device reconnected");
        }
        *lock(&self.disconnect_reason) = None;
    }
}

impl std::fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceContext")
            .field("format", &self.format())
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SampleType;

    struct Ramp(u8);

    impl Renderer for Ramp {
        fn render(&mut self, dest: &mut [u8], _frames: usize, _stride: usize, _format: &DeviceFormat) {
            for b in dest.iter_mut() {
                *b = self.0;
                self.0 = self.0.wrapping_add(1);
            }
        }
    }

    #[test]
    fn test_disconnect_records_first_reason_only() {
        let device = DeviceContext::new(DeviceFormat::default());
        assert!(device.is_connected());

        device.handle_disconnect("first");
        device.handle_disconnect("second");
        assert!(!device.is_connected());
        assert_eq!(device.disconnect_reason().as_deref(), Some("first"));

        device.reconnect();
        assert!(device.is_connected());
        assert_eq!(device.disconnect_reason(), None);
    }

    #[test]
    fn test_render_advances_clock() {
        let format = DeviceFormat {
            frequency: 1000,
            ..DeviceFormat::default()
        };
        let device = DeviceContext::with_renderer(format, Box::new(Ramp(0)));
        let mut buf = vec![0u8; 250 * format.frame_size()];
        device.render_samples(&mut buf, 250, format.channel_count());

        assert_eq!(buf[0], 0);
        assert_eq!(buf[5], 5);
        assert_eq!(device.clock_time(), Duration::from_millis(250));

        device.rebase_clock();
        assert_eq!(device.clock_time(), Duration::from_millis(250));
    }

    #[test]
    fn test_silence_renderer_uses_format_midpoint() {
        let format = DeviceFormat {
            sample_type: SampleType::UByte,
            ..DeviceFormat::default()
        };
        let device = DeviceContext::new(format);
        let mut buf = vec![0u8; 16];
        device.render_samples(&mut buf, 8, 2);
        assert!(buf.iter().all(|&b| b == 0x80));
    }
}
