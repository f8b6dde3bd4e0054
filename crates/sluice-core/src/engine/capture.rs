//! Capture engine
//!
//! Every writable ring chunk is handed to the recorder up front. The
//! recorder fills chunks in order and each completion commits one of them
//! with `write_advance`. `capture_samples` copies frames out of the read
//! region, releases the chunks it finished, and re-enqueues the chunks that
//! the release exposed at the end of the write region, so the recorder
//! always holds every chunk the application is not reading.

use std::sync::Arc;
use std::time::Duration;

use super::state::EngineState;
use crate::audio::{
    resolve_endpoint, AudioPlatform, Backend, BackendError, BackendKind, BackendResult,
    BufferRetention, CompletionCallback, PcmDescriptor, PlatformEngine, RecordingPreset,
    StreamConfiguration, StreamQueue, StreamState,
};
use crate::device::{ClockLatency, DeviceContext};
use crate::ring::RingBuffer;
use crate::types::DeviceFormat;

/// Capture half of a buffer-queue backend
pub struct CaptureEngine {
    device: Arc<DeviceContext>,
    platform: Arc<dyn AudioPlatform>,
    state: EngineState,
    device_name: String,
    ring: Option<Arc<RingBuffer>>,
    /// Frames per chunk
    update_size: usize,
    frame_size: usize,
    /// Frames of the head chunk already handed out
    read_offset: usize,
    // Field order is teardown order: the stream goes before its engine
    queue: Option<Box<dyn StreamQueue>>,
    engine: Option<Box<dyn PlatformEngine>>,
}

/// Chunk geometry for a capture stream
///
/// Total depth is at least 100 ms and each chunk lasts 10 to 50 ms.
fn capture_geometry(format: &DeviceFormat) -> (u32, usize) {
    let frequency = format.frequency;
    let length = format.buffer_size.max(frequency / 10);
    let update_len = (format.buffer_size / 3)
        .clamp(frequency / 100, frequency / 100 * 5)
        .max(1);
    let num_updates = length.div_ceil(update_len) as usize;
    (update_len, num_updates)
}

impl CaptureEngine {
    pub fn new(device: Arc<DeviceContext>, platform: Arc<dyn AudioPlatform>) -> Self {
        Self {
            device,
            platform,
            state: EngineState::Closed,
            device_name: String::new(),
            ring: None,
            update_size: 0,
            frame_size: 0,
            read_offset: 0,
            queue: None,
            engine: None,
        }
    }

    fn close(&mut self) {
        self.stop();
        self.queue = None;
        self.ring = None;
        self.engine = None;
        self.read_offset = 0;
        self.state = EngineState::Closed;
    }

    /// Create the recorder; the basic descriptor is only tried when it can
    /// carry the requested type unchanged
    fn create_recorder(
        engine: &dyn PlatformEngine,
        format: &DeviceFormat,
        queue_len: usize,
    ) -> BackendResult<Box<dyn StreamQueue>> {
        let err = match engine.create_recorder(&PcmDescriptor::extended(format), queue_len) {
            Ok(queue) => return Ok(queue),
            Err(e) => e,
        };
        log::debug!("{}", err.describe("Extended PCM format rejected"));

        if !format.sample_type.is_basic() {
            return Err(BackendError::platform("Failed to create audio recorder", err));
        }
        engine
            .create_recorder(&PcmDescriptor::basic(format), queue_len)
            .map_err(|e| BackendError::platform("Failed to create audio recorder", e))
    }
}

impl Backend for CaptureEngine {
    fn kind(&self) -> BackendKind {
        BackendKind::Capture
    }

    fn device_name(&self) -> &str {
        &self.device_name
    }

    fn state(&self) -> EngineState {
        self.state
    }

    fn open(&mut self, name: &str) -> BackendResult<()> {
        let name = resolve_endpoint(&*self.platform, BackendKind::Capture, name)?;
        if self.engine.is_some() {
            self.close();
        }

        let engine = self
            .platform
            .create_engine(BackendKind::Capture)
            .map_err(|e| BackendError::platform("Failed to initialize device", e))?;

        let mut format = self.device.format();
        let (update_len, num_updates) = capture_geometry(&format);
        let frame_size = format.frame_size();
        let ring = RingBuffer::create(num_updates, update_len as usize * frame_size, false)?;
        format.update_size = update_len;
        format.buffer_size = ring.write_space() as u32 * update_len;

        let mut queue = Self::create_recorder(&*engine, &format, ring.write_space())?;

        if let Err(e) = queue.set_configuration(StreamConfiguration::RecordingPreset(
            RecordingPreset::Generic,
        )) {
            log::warn!("{}", e.describe("Failed to set recording preset"));
        }

        if queue.retention() != BufferRetention::Retained {
            return Err(BackendError::Device(
                "Capture requires a queue that retains its buffers".to_string(),
            ));
        }

        let ring = Arc::new(ring);
        let callback: CompletionCallback = {
            let ring = Arc::clone(&ring);
            Arc::new(move || {
                if let Err(e) = ring.write_advance(1) {
                    log::error!("Capture completion: {}", e);
                }
            })
        };
        queue
            .register_callback(Some(callback))
            .map_err(|e| BackendError::platform("Failed to register callback", e))?;

        let silence = format.sample_type.silence();
        for slot in ring.write_segments().slots() {
            let mut chunk = ring.chunk_ref(slot);
            chunk.fill_with(|buf| buf.fill(silence));
            queue
                .enqueue(chunk)
                .map_err(|e| BackendError::platform("Failed to queue capture buffer", e))?;
        }

        log::info!(
            "Opened {} capture device \"{}\": {} {:?} @ {} Hz, {} x {} frames",
            self.platform.name(),
            name,
            format.sample_type,
            format.channels,
            format.frequency,
            ring.capacity(),
            update_len
        );

        self.device.rebase_clock();
        self.device.set_format(format);
        self.update_size = update_len as usize;
        self.frame_size = frame_size;
        self.read_offset = 0;
        self.ring = Some(ring);
        self.queue = Some(queue);
        self.engine = Some(engine);
        self.device_name = name;
        self.state = EngineState::Configured;
        self.device.reconnect();
        Ok(())
    }

    fn start(&mut self) -> BackendResult<()> {
        self.state.require("start", self.state.can_start())?;
        let Some(queue) = self.queue.as_mut() else {
            return Err(BackendError::InvalidState {
                operation: "start",
                state: self.state.to_string(),
            });
        };

        if let Err(e) = queue.set_state(StreamState::Running) {
            let msg = e.describe("Failed to start capture");
            self.device.handle_disconnect(msg.clone());
            return Err(BackendError::Device(msg));
        }
        self.state = EngineState::Started;
        log::info!("Capture started");
        Ok(())
    }

    fn stop(&mut self) {
        if !self.state.is_running() {
            return;
        }
        if let Some(queue) = self.queue.as_mut() {
            if let Err(e) = queue.set_state(StreamState::Paused) {
                log::error!("{}", e.describe("Failed to pause recorder"));
            }
        }
        self.state = EngineState::Stopped;
        log::info!("Capture stopped");
    }

    fn capture_samples(&mut self, dest: &mut [u8], frames: usize) -> BackendResult<()> {
        let Some(ring) = self.ring.clone() else {
            return Err(BackendError::InvalidState {
                operation: "capture_samples",
                state: self.state.to_string(),
            });
        };
        if !self.device.is_connected() {
            let reason = self.device.disconnect_reason().unwrap_or_default();
            return Err(BackendError::Device(format!("Device disconnected: {}", reason)));
        }

        let available = self.available_samples();
        if frames > available {
            return Err(BackendError::Overflow {
                requested: frames,
                available,
            });
        }
        let frame_size = self.frame_size;
        if dest.len() < frames * frame_size {
            return Err(BackendError::Overflow {
                requested: frames,
                available: dest.len() / frame_size.max(1),
            });
        }

        let chunk_bytes = ring.chunk_size();
        let mut advanced = 0;
        {
            // SAFETY: this engine is the ring's only reader.
            let data = unsafe { ring.read_vector() };
            let first_chunks = data.first.len() / chunk_bytes;
            let mut copied = 0;
            while copied < frames {
                let src = if advanced < first_chunks {
                    &data.first[advanced * chunk_bytes..][..chunk_bytes]
                } else {
                    &data.second[(advanced - first_chunks) * chunk_bytes..][..chunk_bytes]
                };
                let rem = (frames - copied).min(self.update_size - self.read_offset);
                let from = self.read_offset * frame_size;
                dest[copied * frame_size..(copied + rem) * frame_size]
                    .copy_from_slice(&src[from..from + rem * frame_size]);

                self.read_offset += rem;
                if self.read_offset == self.update_size {
                    self.read_offset = 0;
                    advanced += 1;
                }
                copied += rem;
            }
        }

        if advanced == 0 {
            return Ok(());
        }
        ring.read_advance(advanced)?;

        // Releasing chunks grows the write region at its end; those are the
        // chunks the recorder does not hold yet. Completions may commit
        // chunks at the front meanwhile, so measure from the read cursor.
        let refill = ring.write_tail(advanced);

        let Some(queue) = self.queue.as_mut() else {
            return Ok(());
        };
        for slot in refill.slots() {
            if let Err(e) = queue.enqueue(ring.chunk_ref(slot)) {
                self.device
                    .handle_disconnect(e.describe("Failed to queue capture buffer"));
                break;
            }
        }
        Ok(())
    }

    fn available_samples(&self) -> usize {
        self.ring.as_ref().map_or(0, |ring| {
            (ring.read_space() * self.update_size).saturating_sub(self.read_offset)
        })
    }

    fn clock_latency(&self) -> ClockLatency {
        let frequency = self.device.frequency().max(1) as u64;
        ClockLatency {
            clock_time: self.device.clock_time(),
            latency: Duration::from_nanos(
                self.available_samples() as u64 * 1_000_000_000 / frequency,
            ),
        }
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    use crate::audio::sim::{CaptureSource, Clocking, SimConfig, SimControl, SimPlatform};
    use crate::engine::wait_until;
    use crate::types::{ChannelLayout, SampleType};

    fn setup(config: SimConfig, format: DeviceFormat) -> (CaptureEngine, SimControl, Arc<DeviceContext>) {
        let platform = SimPlatform::new(config);
        let control = platform.control();
        let device = Arc::new(DeviceContext::new(format));
        let engine = CaptureEngine::new(Arc::clone(&device), Arc::new(platform));
        (engine, control, device)
    }

    /// 256-frame chunks of 4-byte frames: 12.8kHz stereo 16-bit
    fn small_format() -> DeviceFormat {
        DeviceFormat {
            channels: ChannelLayout::Stereo,
            sample_type: SampleType::Short,
            frequency: 12800,
            update_size: 256,
            buffer_size: 768,
        }
    }

    fn counter_config() -> SimConfig {
        SimConfig {
            source: CaptureSource::Counter,
            ..SimConfig::default()
        }
    }

    #[test]
    fn test_geometry_enforces_depth_and_chunk_bounds() {
        let format = DeviceFormat {
            frequency: 48000,
            buffer_size: 1024,
            ..DeviceFormat::default()
        };
        // 1024/3 is below 10 ms, depth is below 100 ms
        assert_eq!(capture_geometry(&format), (480, 10));

        let format = DeviceFormat {
            frequency: 48000,
            buffer_size: 48000,
            ..DeviceFormat::default()
        };
        // 16000 frames per chunk is clamped to 50 ms
        assert_eq!(capture_geometry(&format), (2400, 20));
    }

    #[test]
    fn test_open_sizes_buffer_and_primes_queue() {
        let format = DeviceFormat {
            frequency: 48000,
            buffer_size: 1024,
            ..DeviceFormat::default()
        };
        let (mut engine, control, device) = setup(SimConfig::default(), format);
        engine.open("").unwrap();

        assert_eq!(engine.state(), EngineState::Configured);
        assert_eq!(device.update_size(), 480);
        // Ten chunks round up to sixteen slots with one kept free
        assert_eq!(device.buffer_size(), 15 * 480);
        assert_eq!(control.queued(BackendKind::Capture), 15);
        assert_eq!(engine.available_samples(), 0);
        assert_eq!(
            control.configuration(BackendKind::Capture),
            vec![StreamConfiguration::RecordingPreset(RecordingPreset::Generic)]
        );
    }

    #[test]
    fn test_priming_uses_unsigned_silence() {
        let format = DeviceFormat {
            sample_type: SampleType::UByte,
            ..small_format()
        };
        let (mut engine, _control, _device) = setup(SimConfig::default(), format);
        engine.open("").unwrap();
        let ring = engine.ring.clone().unwrap();
        for slot in 0..ring.capacity() {
            assert!(ring.chunk_ref(slot).bytes().iter().all(|&b| b == 0x80));
        }
    }

    #[test]
    fn test_partial_read_reenqueues_one_chunk() {
        let (mut engine, control, _device) = setup(counter_config(), small_format());
        engine.open("").unwrap();
        engine.start().unwrap();
        let primed = control.enqueued(BackendKind::Capture);
        assert_eq!(primed, 7);

        assert_eq!(control.complete_capture(2), 2);
        assert_eq!(engine.available_samples(), 512);

        let mut buf = vec![0xFFu8; 300 * 4];
        engine.capture_samples(&mut buf, 300).unwrap();
        assert_eq!(engine.available_samples(), 212);
        assert_eq!(control.enqueued(BackendKind::Capture), primed + 1);
        assert_eq!(control.queued(BackendKind::Capture), 6);

        assert!(buf[..256 * 4].iter().all(|&b| b == 0));
        assert!(buf[256 * 4..].iter().all(|&b| b == 1));
    }

    #[test]
    fn test_sub_chunk_reads_do_not_reenqueue() {
        let (mut engine, control, _device) = setup(counter_config(), small_format());
        engine.open("").unwrap();
        engine.start().unwrap();
        control.complete_capture(1);

        let mut buf = vec![0u8; 100 * 4];
        engine.capture_samples(&mut buf, 100).unwrap();
        engine.capture_samples(&mut buf, 100).unwrap();
        assert_eq!(engine.available_samples(), 56);
        assert_eq!(control.enqueued(BackendKind::Capture), 7);

        let mut rest = vec![0u8; 56 * 4];
        engine.capture_samples(&mut rest, 56).unwrap();
        assert_eq!(engine.available_samples(), 0);
        assert_eq!(control.enqueued(BackendKind::Capture), 8);
    }

    #[test]
    fn test_steady_state_survives_wraparound() {
        let (mut engine, control, _device) = setup(counter_config(), small_format());
        engine.open("").unwrap();
        engine.start().unwrap();

        let mut buf = vec![0u8; 256 * 4];
        for round in 0..40u32 {
            assert_eq!(control.complete_capture(1), 1);
            engine.capture_samples(&mut buf, 256).unwrap();
            assert!(buf.iter().all(|&b| b == round as u8), "round {}", round);
            assert_eq!(control.queued(BackendKind::Capture), 7);
        }
    }

    #[test]
    fn test_overflow_fails_without_consuming() {
        let (mut engine, control, _device) = setup(counter_config(), small_format());
        engine.open("").unwrap();
        engine.start().unwrap();
        control.complete_capture(1);

        let mut buf = vec![0u8; 257 * 4];
        assert!(matches!(
            engine.capture_samples(&mut buf, 257),
            Err(BackendError::Overflow {
                requested: 257,
                available: 256
            })
        ));
        assert_eq!(engine.available_samples(), 256);
    }

    #[test]
    fn test_disconnected_device_fails_fast() {
        let (mut engine, control, device) = setup(counter_config(), small_format());
        engine.open("").unwrap();
        engine.start().unwrap();
        control.complete_capture(1);

        device.handle_disconnect("unplugged");
        let mut buf = vec![0u8; 16 * 4];
        assert!(matches!(
            engine.capture_samples(&mut buf, 16),
            Err(BackendError::Device(msg)) if msg.contains("unplugged")
        ));
        assert_eq!(engine.available_samples(), 256);
    }

    #[test]
    fn test_enqueue_failure_disconnects() {
        let (mut engine, control, device) = setup(counter_config(), small_format());
        engine.open("").unwrap();
        engine.start().unwrap();
        control.update(|cfg| cfg.fail_enqueue_after = Some(7));
        control.complete_capture(1);

        let mut buf = vec![0u8; 256 * 4];
        engine.capture_samples(&mut buf, 256).unwrap();
        assert!(!device.is_connected());
        assert!(device
            .disconnect_reason()
            .is_some_and(|r| r.starts_with("Failed to queue capture buffer")));

        // Reopening re-arms the device
        control.update(|cfg| cfg.fail_enqueue_after = None);
        engine.open("").unwrap();
        assert!(device.is_connected());
    }

    #[test]
    fn test_float_never_falls_back() {
        let format = DeviceFormat {
            sample_type: SampleType::Float,
            ..small_format()
        };
        let (mut engine, control, _device) = setup(
            SimConfig {
                extended_types: vec![],
                ..SimConfig::default()
            },
            format,
        );
        assert!(matches!(engine.open(""), Err(BackendError::Device(_))));
        assert_eq!(control.attempts().len(), 1);
        assert_eq!(engine.state(), EngineState::Closed);
    }

    #[test]
    fn test_short_falls_back_to_basic() {
        let (mut engine, control, _device) = setup(
            SimConfig {
                extended_types: vec![],
                ..SimConfig::default()
            },
            small_format(),
        );
        engine.open("").unwrap();
        let attempts = control.attempts();
        assert_eq!(attempts.len(), 2);
        assert!(attempts[1].accepted);
    }

    #[test]
    fn test_copying_queue_is_rejected() {
        let (mut engine, _control, _device) = setup(
            SimConfig {
                retention: BufferRetention::Copied,
                ..SimConfig::default()
            },
            small_format(),
        );
        assert!(matches!(engine.open(""), Err(BackendError::Device(_))));
    }

    #[test]
    fn test_start_failure_disconnects() {
        let (mut engine, _control, device) = setup(
            SimConfig {
                fail_play_state: true,
                ..SimConfig::default()
            },
            small_format(),
        );
        engine.open("").unwrap();
        assert!(matches!(engine.start(), Err(BackendError::Device(_))));
        assert!(!device.is_connected());
        assert_eq!(engine.state(), EngineState::Configured);
    }

    #[test]
    fn test_stop_pauses_recorder() {
        let (mut engine, control, _device) = setup(counter_config(), small_format());
        engine.open("").unwrap();
        engine.start().unwrap();
        engine.stop();
        assert_eq!(engine.state(), EngineState::Stopped);
        assert_eq!(
            control.stream_state(BackendKind::Capture),
            Some(StreamState::Paused)
        );
        // Paused recorders complete nothing
        assert_eq!(control.complete_capture(1), 0);
        engine.stop();
        engine.start().unwrap();
        assert_eq!(control.complete_capture(1), 1);
    }

    #[test]
    fn test_unknown_name_not_found() {
        let (mut engine, _control, _device) = setup(SimConfig::default(), small_format());
        assert!(matches!(engine.open("mic"), Err(BackendError::NotFound(_))));
    }

    #[test]
    fn test_realtime_capture_keeps_queue_full_and_in_order() {
        // 10 ms chunks of 80 one-byte frames, fifteen of them in flight
        let format = DeviceFormat {
            channels: ChannelLayout::Mono,
            sample_type: SampleType::UByte,
            frequency: 8000,
            update_size: 80,
            buffer_size: 240,
        };
        let (mut engine, control, device) = setup(
            SimConfig {
                clocking: Clocking::Realtime,
                source: CaptureSource::Counter,
                ..SimConfig::default()
            },
            format,
        );
        engine.open("").unwrap();
        assert_eq!(device.update_size(), 80);
        let ring = engine.ring.clone().unwrap();
        engine.start().unwrap();

        // Odd read sizes so releases land at every offset within a chunk
        const READ: usize = 37;
        let mut buf = vec![0u8; READ];
        let mut frames_read = 0usize;
        let deadline = Instant::now() + Duration::from_secs(10);
        while frames_read < 80 * 40 {
            assert!(Instant::now() < deadline, "capture stalled at {} frames", frames_read);
            if engine.available_samples() < READ {
                thread::sleep(Duration::from_millis(1));
                continue;
            }
            engine.capture_samples(&mut buf, READ).unwrap();
            for (i, &byte) in buf.iter().enumerate() {
                assert_eq!(byte, ((frames_read + i) / 80) as u8);
            }
            frames_read += READ;
        }

        engine.stop();
        assert!(device.is_connected());
        assert!(wait_until(|| {
            control.queued(BackendKind::Capture) + ring.read_space() == ring.capacity()
        }));
    }
}
