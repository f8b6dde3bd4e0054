//! Playback engine
//!
//! A dedicated render thread keeps the ring full: it renders every writable
//! chunk under the render lock, commits it, and enqueues each new chunk on
//! the device. When the ring is full it makes sure the device is playing and
//! sleeps on the semaphore until a completion frees a chunk.
//!
//! ```text
//!   renderer ──render──▶ RingBuffer ──enqueue──▶ StreamQueue ──▶ device
//!                            ▲                        │
//!                            └──── read_advance ◀─────┘ completion
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::semaphore::Semaphore;
use super::state::EngineState;
use super::EngineSettings;
use crate::audio::{
    resolve_endpoint, AudioPlatform, Backend, BackendError, BackendKind, BackendResult,
    BufferRetention, CompletionCallback, PcmDescriptor, PlatformEngine, StreamConfiguration,
    StreamQueue, StreamState, StreamType,
};
use crate::device::{lock, ClockLatency, DeviceContext};
use crate::ring::RingBuffer;
use crate::types::DeviceFormat;

/// State shared between the engine, its render thread and the completion
/// callback
struct RenderShared {
    kill: AtomicBool,
    sem: Semaphore,
    /// Held for the duration of a render pass
    render_lock: Mutex<()>,
    /// Chunks a copying queue has accepted but not completed
    in_flight: AtomicUsize,
    /// Bumped by every stop; completions carry the epoch of their start and
    /// are dropped once it is stale
    epoch: Mutex<u64>,
}

type SharedQueue = Arc<Mutex<Box<dyn StreamQueue>>>;

/// Playback half of a buffer-queue backend
pub struct PlaybackEngine {
    device: Arc<DeviceContext>,
    platform: Arc<dyn AudioPlatform>,
    settings: EngineSettings,
    state: EngineState,
    device_name: String,
    shared: Arc<RenderShared>,
    retention: BufferRetention,
    ring: Option<Arc<RingBuffer>>,
    thread: Option<JoinHandle<()>>,
    // Field order is teardown order: the stream goes before its engine
    queue: Option<SharedQueue>,
    engine: Option<Box<dyn PlatformEngine>>,
}

impl PlaybackEngine {
    pub fn new(
        device: Arc<DeviceContext>,
        platform: Arc<dyn AudioPlatform>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            device,
            platform,
            settings,
            state: EngineState::Closed,
            device_name: String::new(),
            shared: Arc::new(RenderShared {
                kill: AtomicBool::new(false),
                sem: Semaphore::new(),
                render_lock: Mutex::new(()),
                in_flight: AtomicUsize::new(0),
                epoch: Mutex::new(0),
            }),
            retention: BufferRetention::Retained,
            ring: None,
            thread: None,
            queue: None,
            engine: None,
        }
    }

    /// Create the player, falling back to a basic descriptor once
    fn create_player(&self, engine: &dyn PlatformEngine) -> Option<(Box<dyn StreamQueue>, DeviceFormat)> {
        let mut format = self.device.format();
        let num_updates = format.chunk_count();

        match engine.create_player(&PcmDescriptor::extended(&format), num_updates) {
            Ok(queue) => return Some((queue, format)),
            Err(e) => log::debug!("{}", e.describe("Extended PCM format rejected")),
        }

        let substitute = format.sample_type.basic_substitute();
        if substitute != format.sample_type {
            log::info!(
                "Falling back from {} to {} samples",
                format.sample_type,
                substitute
            );
            format.sample_type = substitute;
        }
        match engine.create_player(&PcmDescriptor::basic(&format), num_updates) {
            Ok(queue) => Some((queue, format)),
            Err(e) => {
                log::error!("{}", e.describe("Failed to create audio player"));
                None
            }
        }
    }

    fn release_stream(&mut self) {
        self.queue = None;
        self.ring = None;
    }
}

impl Backend for PlaybackEngine {
    fn kind(&self) -> BackendKind {
        BackendKind::Playback
    }

    fn device_name(&self) -> &str {
        &self.device_name
    }

    fn state(&self) -> EngineState {
        self.state
    }

    fn open(&mut self, name: &str) -> BackendResult<()> {
        let name = resolve_endpoint(&*self.platform, BackendKind::Playback, name)?;

        // Single endpoint: already open means nothing to do
        if self.engine.is_some() {
            return Ok(());
        }

        let engine = self
            .platform
            .create_engine(BackendKind::Playback)
            .map_err(|e| BackendError::platform("Failed to initialize device", e))?;

        log::info!("Opened {} playback device \"{}\"", self.platform.name(), name);
        self.engine = Some(engine);
        self.device_name = name;
        self.state = EngineState::Opened;
        self.device.reconnect();
        Ok(())
    }

    fn reset(&mut self) -> bool {
        if self.engine.is_none() {
            log::warn!("Playback reset on a closed device");
            return false;
        }
        if self.state.is_running() {
            self.stop();
        }
        self.release_stream();
        self.state = EngineState::Opened;

        let num_updates = self.device.format().chunk_count();
        if num_updates == 0 {
            log::error!(
                "Buffer size {} is smaller than update size {}",
                self.device.buffer_size(),
                self.device.update_size()
            );
            return false;
        }

        let Some(engine) = self.engine.as_deref() else {
            return false;
        };
        let Some((mut queue, format)) = self.create_player(engine) else {
            return false;
        };

        if let Err(e) = queue.set_configuration(StreamConfiguration::StreamType(StreamType::Media)) {
            log::warn!("{}", e.describe("Failed to set stream type"));
        }

        let ring = match RingBuffer::create(num_updates, format.chunk_bytes(), true) {
            Ok(ring) => ring,
            Err(e) => {
                log::error!("{}", e);
                return false;
            }
        };

        self.retention = queue.retention();
        self.device.rebase_clock();
        self.device.set_format(format);
        self.ring = Some(Arc::new(ring));
        self.queue = Some(Arc::new(Mutex::new(queue)));
        self.state = EngineState::Configured;
        self.device.reconnect();

        log::info!(
            "Playback configured: {} {:?} @ {} Hz, {} x {} frames ({:.1} ms), {:?} buffers",
            format.sample_type,
            format.channels,
            format.frequency,
            num_updates,
            format.update_size,
            format.chunk_ms() * num_updates as f32,
            self.retention
        );
        true
    }

    fn start(&mut self) -> BackendResult<()> {
        self.state.require("start", self.state.can_start())?;
        let (Some(ring), Some(queue)) = (self.ring.clone(), self.queue.clone()) else {
            return Err(BackendError::InvalidState {
                operation: "start",
                state: self.state.to_string(),
            });
        };

        ring.reset();
        self.shared.kill.store(false, Ordering::Release);
        self.shared.sem.drain();
        self.shared.in_flight.store(0, Ordering::Release);

        let epoch = *lock(&self.shared.epoch);
        let callback: CompletionCallback = {
            let ring = Arc::clone(&ring);
            let shared = Arc::clone(&self.shared);
            let retention = self.retention;
            Arc::new(move || {
                let current = lock(&shared.epoch);
                if *current != epoch {
                    log::debug!("Ignoring completion from a stopped stream");
                    return;
                }
                match retention {
                    BufferRetention::Retained => {
                        if let Err(e) = ring.read_advance(1) {
                            log::error!("Playback completion: {}", e);
                        }
                    }
                    BufferRetention::Copied => {
                        let _ = shared.in_flight.fetch_update(
                            Ordering::AcqRel,
                            Ordering::Acquire,
                            |n| n.checked_sub(1),
                        );
                    }
                }
                shared.sem.post();
            })
        };

        if let Err(e) = lock(&queue).register_callback(Some(callback)) {
            let msg = e.describe("Failed to register callback");
            self.device.handle_disconnect(msg.clone());
            return Err(BackendError::Device(msg));
        }

        let render = RenderLoop {
            device: Arc::clone(&self.device),
            shared: Arc::clone(&self.shared),
            ring,
            queue,
            retention: self.retention,
        };
        let handle = thread::Builder::new()
            .name("sluice-playback".into())
            .spawn(move || render.run())
            .map_err(|e| BackendError::Device(format!("Failed to start mixing thread: {}", e)))?;

        self.thread = Some(handle);
        self.state = EngineState::Started;
        log::info!("Playback started");
        Ok(())
    }

    fn stop(&mut self) {
        let Some(handle) = self.thread.take() else {
            return;
        };

        // Completions still in flight from here on must not touch the ring
        *lock(&self.shared.epoch) += 1;
        self.shared.kill.store(true, Ordering::Release);
        self.shared.sem.post();
        if handle.join().is_err() {
            log::error!("Playback render thread panicked");
        }

        if let Some(queue) = &self.queue {
            let mut queue = lock(queue);
            if let Err(e) = queue.set_state(StreamState::Stopped) {
                log::error!("{}", e.describe("Failed to stop player"));
            }
            match queue.clear().and_then(|_| queue.register_callback(None)) {
                Ok(()) => drain(&**queue, self.settings.drain_timeout),
                Err(e) => log::error!("{}", e.describe("Failed to clear buffer queue")),
            }
        }
        if let Some(ring) = &self.ring {
            ring.reset();
        }
        self.shared.in_flight.store(0, Ordering::Release);
        self.state = EngineState::Stopped;
        log::info!("Playback stopped");
    }

    fn clock_latency(&self) -> ClockLatency {
        let Some(ring) = &self.ring else {
            return ClockLatency {
                clock_time: self.device.clock_time(),
                latency: Duration::ZERO,
            };
        };

        let _guard = lock(&self.shared.render_lock);
        let clock_time = self.device.clock_time();
        let chunks = match self.retention {
            BufferRetention::Retained => ring.read_space(),
            BufferRetention::Copied => self.shared.in_flight.load(Ordering::Acquire),
        };
        let frames = chunks as u64 * self.device.update_size() as u64;
        let frequency = self.device.frequency().max(1) as u64;
        ClockLatency {
            clock_time,
            latency: Duration::from_nanos(frames * 1_000_000_000 / frequency),
        }
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Wait for a cleared queue to report empty, up to `timeout`
fn drain(queue: &dyn StreamQueue, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    loop {
        thread::yield_now();
        match queue.queued() {
            Ok(0) => return,
            Ok(count) if Instant::now() >= deadline => {
                log::warn!(
                    "Device queue still holds {} buffers after {:?}",
                    count,
                    timeout
                );
                return;
            }
            Ok(_) => {}
            Err(e) => {
                log::error!("{}", e.describe("Failed to get queue state"));
                return;
            }
        }
    }
}

/// Everything the render thread owns
struct RenderLoop {
    device: Arc<DeviceContext>,
    shared: Arc<RenderShared>,
    ring: Arc<RingBuffer>,
    queue: SharedQueue,
    retention: BufferRetention,
}

impl RenderLoop {
    fn run(self) {
        log::debug!("Playback render thread started");
        if let Err(reason) = self.render() {
            self.device.handle_disconnect(reason);
        }
        log::debug!("Playback render thread exiting");
    }

    /// Render until killed or disconnected; Err carries a disconnect reason
    fn render(&self) -> Result<(), String> {
        let format = self.device.format();
        let update_size = format.update_size as usize;
        let channels = format.channel_count();

        while !self.shared.kill.load(Ordering::Acquire) && self.device.is_connected() {
            let room = self.room()?;
            if room == 0 {
                self.ensure_playing()?;
                if self.room()? == 0 {
                    self.shared.sem.wait();
                }
                continue;
            }

            let segs = {
                let _guard = lock(&self.shared.render_lock);
                let segs = self.ring.write_segments().take(room);
                for seg in [segs.first, segs.second] {
                    if seg.is_empty() {
                        continue;
                    }
                    // SAFETY: this thread is the ring's only writer, and the
                    // device only holds chunks from the read region.
                    let dest = unsafe { self.ring.segment_mut(seg) };
                    self.device
                        .render_samples(dest, seg.len * update_size, channels);
                }
                self.ring
                    .write_advance(segs.total())
                    .map_err(|e| e.to_string())?;
                segs
            };

            for slot in segs.slots() {
                self.enqueue(slot)?;
            }
        }
        Ok(())
    }

    /// Chunks that can be rendered right now
    fn room(&self) -> Result<usize, String> {
        match self.retention {
            BufferRetention::Retained => Ok(self.ring.write_space()),
            BufferRetention::Copied => {
                let queued = lock(&self.queue)
                    .queued()
                    .map_err(|e| e.describe("Failed to get queue state"))?;
                Ok(self
                    .ring
                    .capacity()
                    .saturating_sub(queued)
                    .min(self.ring.write_space()))
            }
        }
    }

    fn ensure_playing(&self) -> Result<(), String> {
        let mut queue = lock(&self.queue);
        match queue.state() {
            Ok(StreamState::Running) => Ok(()),
            Ok(_) => queue
                .set_state(StreamState::Running)
                .map_err(|e| e.describe("Failed to start playback")),
            Err(e) => Err(e.describe("Failed to get play state")),
        }
    }

    fn enqueue(&self, slot: usize) -> Result<(), String> {
        let copied = self.retention == BufferRetention::Copied;
        if copied {
            self.shared.in_flight.fetch_add(1, Ordering::AcqRel);
        }
        let result = lock(&self.queue).enqueue(self.ring.chunk_ref(slot));
        if let Err(e) = result {
            if copied {
                self.shared.in_flight.fetch_sub(1, Ordering::AcqRel);
            }
            return Err(e.describe("Failed to queue audio"));
        }
        if copied {
            // The queue took its own copy, so the slot is free again
            self.ring.read_advance(1).map_err(|e| e.to_string())?;
        }
        Ok(())
    }
}
