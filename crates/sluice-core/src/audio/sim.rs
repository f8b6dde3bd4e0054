//! In-process software platform
//!
//! Implements the buffer-queue bridge without any hardware. Played chunks
//! land in a sink that can be inspected (or looped back into capture), and
//! recorded chunks are filled from a configurable signal source.
//!
//! With [`Clocking::Manual`] nothing completes until a [`SimControl`] call
//! says so, which makes engine behaviour deterministic in tests. With
//! [`Clocking::Realtime`] each stream gets a clock thread that completes the
//! head chunk once its duration has elapsed.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::{Duration, Instant};

use super::error::PlatformError;
use super::format::{DescriptorKind, PcmDescriptor};
use super::platform::{
    AudioPlatform, BackendKind, BufferRetention, CompletionCallback, PlatformEngine,
    StreamConfiguration, StreamQueue, StreamState,
};
use crate::device::lock;
use crate::ring::ChunkRef;
use crate::types::SampleType;

/// Played bytes kept for inspection or loopback
const SINK_LIMIT: usize = 4 * 1024 * 1024;

/// How completions are driven
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Clocking {
    /// Completions only happen through [`SimControl`]
    #[default]
    Manual,
    /// A clock thread per stream completes chunks at the stream's rate
    Realtime,
}

/// Signal written into recorded chunks
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum CaptureSource {
    #[default]
    Silence,
    /// Every byte of the n-th completed chunk is `n` (wrapping)
    Counter,
    Sine { frequency: f32, amplitude: f32 },
    /// Bytes taken from the playback sink, silence when it runs dry
    Loopback,
}

/// Behaviour of a [`SimPlatform`]
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// The single endpoint name advertised for both directions
    pub name: String,
    pub clocking: Clocking,
    /// Sample types accepted with an extended descriptor
    pub extended_types: Vec<SampleType>,
    /// Sample types accepted with a basic descriptor
    pub basic_types: Vec<SampleType>,
    pub fail_engine: bool,
    /// Enqueue fails once a stream has accepted this many chunks
    pub fail_enqueue_after: Option<usize>,
    /// Switching a stream to `Running` fails
    pub fail_play_state: bool,
    pub reject_configuration: bool,
    /// `clear` leaves pending chunks queued
    pub ignore_clear: bool,
    pub retention: BufferRetention,
    pub source: CaptureSource,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            name: "Software".to_string(),
            clocking: Clocking::Manual,
            extended_types: SampleType::ALL.to_vec(),
            basic_types: vec![SampleType::UByte, SampleType::Short, SampleType::Int],
            fail_engine: false,
            fail_enqueue_after: None,
            fail_play_state: false,
            reject_configuration: false,
            ignore_clear: false,
            retention: BufferRetention::Retained,
            source: CaptureSource::Silence,
        }
    }
}

/// A stream creation request seen by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateAttempt {
    pub kind: BackendKind,
    pub descriptor: PcmDescriptor,
    pub accepted: bool,
}

struct SimShared {
    config: Mutex<SimConfig>,
    attempts: Mutex<Vec<CreateAttempt>>,
    player: Mutex<Option<Arc<SimStream>>>,
    recorder: Mutex<Option<Arc<SimStream>>>,
    sink: Mutex<VecDeque<u8>>,
    engines_created: AtomicUsize,
}

impl SimShared {
    fn config(&self) -> SimConfig {
        lock(&self.config).clone()
    }

    fn slot(&self, kind: BackendKind) -> &Mutex<Option<Arc<SimStream>>> {
        match kind {
            BackendKind::Playback => &self.player,
            BackendKind::Capture => &self.recorder,
        }
    }

    fn push_played(&self, bytes: &[u8]) {
        let mut sink = lock(&self.sink);
        sink.extend(bytes.iter().copied());
        let excess = sink.len().saturating_sub(SINK_LIMIT);
        if excess > 0 {
            sink.drain(..excess);
        }
    }
}

/// Software implementation of [`AudioPlatform`]
pub struct SimPlatform {
    shared: Arc<SimShared>,
}

impl SimPlatform {
    pub fn new(config: SimConfig) -> Self {
        Self {
            shared: Arc::new(SimShared {
                config: Mutex::new(config),
                attempts: Mutex::new(Vec::new()),
                player: Mutex::new(None),
                recorder: Mutex::new(None),
                sink: Mutex::new(VecDeque::new()),
                engines_created: AtomicUsize::new(0),
            }),
        }
    }

    /// Handle for driving and inspecting the platform
    pub fn control(&self) -> SimControl {
        SimControl {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Default for SimPlatform {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

impl AudioPlatform for SimPlatform {
    fn name(&self) -> &str {
        "sim"
    }

    fn endpoints(&self, _kind: BackendKind) -> Vec<String> {
        vec![self.shared.config().name]
    }

    fn create_engine(&self, kind: BackendKind) -> Result<Box<dyn PlatformEngine>, PlatformError> {
        if self.shared.config().fail_engine {
            return Err(PlatformError::ResourceError);
        }
        self.shared.engines_created.fetch_add(1, Ordering::AcqRel);
        log::debug!("sim: created {} engine", kind);
        Ok(Box::new(SimEngine {
            shared: Arc::clone(&self.shared),
        }))
    }
}

struct SimEngine {
    shared: Arc<SimShared>,
}

impl SimEngine {
    fn create_stream(
        &self,
        kind: BackendKind,
        format: &PcmDescriptor,
        queue_len: usize,
    ) -> Result<Box<dyn StreamQueue>, PlatformError> {
        let config = self.shared.config();
        let result = Self::check_format(&config, format, queue_len);
        lock(&self.shared.attempts).push(CreateAttempt {
            kind,
            descriptor: *format,
            accepted: result.is_ok(),
        });
        let sample_type = result?;

        let stream = Arc::new(SimStream {
            kind,
            sample_type,
            channels: format.channels.max(1) as usize,
            frequency: format.frequency().max(1),
            queue_len,
            retention: config.retention,
            shared: Arc::downgrade(&self.shared),
            closed: AtomicBool::new(false),
            dispatch: Mutex::new(()),
            inner: Mutex::new(StreamInner {
                pending: VecDeque::new(),
                callback: None,
                state: StreamState::Stopped,
                enqueued: 0,
                completed: 0,
                configuration: Vec::new(),
                phase: 0.0,
            }),
        });

        if config.clocking == Clocking::Realtime {
            spawn_clock(Arc::clone(&stream)).map_err(|e| {
                log::error!("sim: failed to spawn {} clock thread: {}", kind, e);
                PlatformError::ResourceError
            })?;
        }

        *lock(self.shared.slot(kind)) = Some(Arc::clone(&stream));
        log::debug!(
            "sim: created {} stream ({:?}, {} ch, {} Hz, {}, queue {})",
            kind,
            format.kind,
            format.channels,
            format.frequency(),
            sample_type,
            queue_len
        );
        Ok(Box::new(SimQueue { stream }))
    }

    fn check_format(
        config: &SimConfig,
        format: &PcmDescriptor,
        queue_len: usize,
    ) -> Result<SampleType, PlatformError> {
        if format.channel_mask == 0 || format.channels == 0 || queue_len == 0 {
            return Err(PlatformError::ParameterInvalid);
        }
        let sample_type = format
            .sample_type()
            .ok_or(PlatformError::ContentUnsupported)?;
        let accepted = match format.kind {
            DescriptorKind::Extended => &config.extended_types,
            DescriptorKind::Basic => &config.basic_types,
        };
        if !accepted.contains(&sample_type) {
            return Err(PlatformError::ContentUnsupported);
        }
        Ok(sample_type)
    }
}

impl PlatformEngine for SimEngine {
    fn create_player(
        &self,
        format: &PcmDescriptor,
        queue_len: usize,
    ) -> Result<Box<dyn StreamQueue>, PlatformError> {
        self.create_stream(BackendKind::Playback, format, queue_len)
    }

    fn create_recorder(
        &self,
        format: &PcmDescriptor,
        queue_len: usize,
    ) -> Result<Box<dyn StreamQueue>, PlatformError> {
        self.create_stream(BackendKind::Capture, format, queue_len)
    }
}

enum Pending {
    Held(ChunkRef),
    Copied(Vec<u8>),
}

impl Pending {
    fn len(&self) -> usize {
        match self {
            Pending::Held(chunk) => chunk.len(),
            Pending::Copied(bytes) => bytes.len(),
        }
    }
}

struct StreamInner {
    pending: VecDeque<Pending>,
    callback: Option<CompletionCallback>,
    state: StreamState,
    enqueued: usize,
    completed: u64,
    configuration: Vec<StreamConfiguration>,
    /// Sine source phase in radians
    phase: f64,
}

struct SimStream {
    kind: BackendKind,
    sample_type: SampleType,
    channels: usize,
    frequency: u32,
    queue_len: usize,
    retention: BufferRetention,
    shared: Weak<SimShared>,
    closed: AtomicBool,
    /// Held while a completion is popped and its callback runs
    dispatch: Mutex<()>,
    inner: Mutex<StreamInner>,
}

impl SimStream {
    /// Complete up to `max` chunks; returns how many completed
    ///
    /// Streams only make progress while running. The callback is invoked
    /// after the stream lock is released but under the dispatch lock, so a
    /// callback that has been replaced never runs afterwards.
    fn complete(&self, max: usize) -> usize {
        let mut done = 0;
        while done < max {
            let _dispatch = lock(&self.dispatch);
            let callback = {
                let mut inner = lock(&self.inner);
                if inner.state != StreamState::Running {
                    break;
                }
                let Some(item) = inner.pending.pop_front() else {
                    break;
                };
                match self.kind {
                    BackendKind::Playback => self.play(&item),
                    BackendKind::Capture => self.record(item, &mut inner),
                }
                inner.completed += 1;
                inner.callback.clone()
            };
            if let Some(callback) = callback {
                callback();
            }
            done += 1;
        }
        done
    }

    fn play(&self, item: &Pending) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        match item {
            Pending::Held(chunk) => shared.push_played(chunk.bytes()),
            Pending::Copied(bytes) => shared.push_played(bytes),
        }
    }

    fn record(&self, item: Pending, inner: &mut StreamInner) {
        let Pending::Held(mut chunk) = item else {
            // Copied recorders have nowhere to deliver data
            return;
        };
        let source = self
            .shared
            .upgrade()
            .map(|shared| shared.config().source)
            .unwrap_or_default();
        let silence = self.sample_type.silence();
        let sequence = inner.completed as u8;

        chunk.fill_with(|buf| match source {
            CaptureSource::Silence => buf.fill(silence),
            CaptureSource::Counter => buf.fill(sequence),
            CaptureSource::Sine {
                frequency,
                amplitude,
            } => {
                let step = std::f64::consts::TAU * frequency as f64 / self.frequency as f64;
                let sample_bytes = self.sample_type.bytes();
                for frame in buf.chunks_exact_mut(sample_bytes * self.channels) {
                    let value = (inner.phase.sin() as f32) * amplitude;
                    for sample in frame.chunks_exact_mut(sample_bytes) {
                        self.sample_type.encode(value, sample);
                    }
                    inner.phase = (inner.phase + step) % std::f64::consts::TAU;
                }
            }
            CaptureSource::Loopback => {
                let taken = match self.shared.upgrade() {
                    Some(shared) => {
                        let mut sink = lock(&shared.sink);
                        let n = sink.len().min(buf.len());
                        for (dst, src) in buf.iter_mut().zip(sink.drain(..n)) {
                            *dst = src;
                        }
                        n
                    }
                    None => 0,
                };
                buf[taken..].fill(silence);
            }
        });
    }

    /// Duration of the head chunk while the stream runs
    fn head_period(&self) -> Option<Duration> {
        let inner = lock(&self.inner);
        if inner.state != StreamState::Running {
            return None;
        }
        let bytes = inner.pending.front()?.len();
        let frame_bytes = self.sample_type.bytes() * self.channels;
        let frames = bytes / frame_bytes.max(1);
        Some(Duration::from_secs_f64(frames as f64 / self.frequency as f64))
    }
}

fn spawn_clock(stream: Arc<SimStream>) -> std::io::Result<()> {
    thread::Builder::new()
        .name(format!("sim-{}-clock", stream.kind))
        .spawn(move || {
            let idle = Duration::from_millis(1);
            let mut next = Instant::now();
            while !stream.closed.load(Ordering::Acquire) {
                let Some(period) = stream.head_period() else {
                    thread::sleep(idle);
                    next = Instant::now();
                    continue;
                };
                next += period;
                let now = Instant::now();
                if next > now {
                    thread::sleep(next - now);
                } else if now - next > period * 4 {
                    // Fell far behind; don't burst to catch up
                    next = now;
                }
                stream.complete(1);
            }
            log::debug!("sim: {} clock thread exiting", stream.kind);
        })
        .map(|_| ())
}

/// Stream queue handed to engines
struct SimQueue {
    stream: Arc<SimStream>,
}

impl StreamQueue for SimQueue {
    fn set_configuration(&mut self, config: StreamConfiguration) -> Result<(), PlatformError> {
        let reject = self
            .stream
            .shared
            .upgrade()
            .map(|shared| shared.config().reject_configuration)
            .unwrap_or(false);
        if reject {
            return Err(PlatformError::FeatureUnsupported);
        }
        lock(&self.stream.inner).configuration.push(config);
        Ok(())
    }

    fn register_callback(&mut self, callback: Option<CompletionCallback>) -> Result<(), PlatformError> {
        let _dispatch = lock(&self.stream.dispatch);
        lock(&self.stream.inner).callback = callback;
        Ok(())
    }

    fn enqueue(&mut self, chunk: ChunkRef) -> Result<(), PlatformError> {
        let fail_after = self
            .stream
            .shared
            .upgrade()
            .and_then(|shared| shared.config().fail_enqueue_after);

        let mut inner = lock(&self.stream.inner);
        if fail_after.is_some_and(|limit| inner.enqueued >= limit) {
            return Err(PlatformError::IoError);
        }
        if inner.pending.len() >= self.stream.queue_len {
            return Err(PlatformError::BufferInsufficient);
        }
        let item = match self.stream.retention {
            BufferRetention::Retained => Pending::Held(chunk),
            BufferRetention::Copied => Pending::Copied(chunk.bytes().to_vec()),
        };
        inner.pending.push_back(item);
        inner.enqueued += 1;
        Ok(())
    }

    fn clear(&mut self) -> Result<(), PlatformError> {
        let ignore = self
            .stream
            .shared
            .upgrade()
            .is_some_and(|shared| shared.config().ignore_clear);
        if !ignore {
            lock(&self.stream.inner).pending.clear();
        }
        Ok(())
    }

    fn queued(&self) -> Result<usize, PlatformError> {
        Ok(lock(&self.stream.inner).pending.len())
    }

    fn state(&self) -> Result<StreamState, PlatformError> {
        Ok(lock(&self.stream.inner).state)
    }

    fn set_state(&mut self, state: StreamState) -> Result<(), PlatformError> {
        let fail = state == StreamState::Running
            && self
                .stream
                .shared
                .upgrade()
                .is_some_and(|shared| shared.config().fail_play_state);
        if fail {
            return Err(PlatformError::ResourceLost);
        }
        lock(&self.stream.inner).state = state;
        Ok(())
    }

    fn retention(&self) -> BufferRetention {
        self.stream.retention
    }
}

impl Drop for SimQueue {
    fn drop(&mut self) {
        self.stream.closed.store(true, Ordering::Release);
        let _dispatch = lock(&self.stream.dispatch);
        let mut inner = lock(&self.stream.inner);
        inner.pending.clear();
        inner.callback = None;
        inner.state = StreamState::Stopped;
    }
}

/// Drives and inspects a [`SimPlatform`]
#[derive(Clone)]
pub struct SimControl {
    shared: Arc<SimShared>,
}

impl SimControl {
    fn stream(&self, kind: BackendKind) -> Option<Arc<SimStream>> {
        lock(self.shared.slot(kind)).clone()
    }

    /// Complete up to `n` playback chunks
    pub fn complete_playback(&self, n: usize) -> usize {
        self.stream(BackendKind::Playback)
            .map_or(0, |stream| stream.complete(n))
    }

    /// Complete up to `n` capture chunks
    pub fn complete_capture(&self, n: usize) -> usize {
        self.stream(BackendKind::Capture)
            .map_or(0, |stream| stream.complete(n))
    }

    /// Take everything played so far
    pub fn take_played(&self) -> Vec<u8> {
        lock(&self.shared.sink).drain(..).collect()
    }

    /// Chunks pending in the latest stream of `kind`
    pub fn queued(&self, kind: BackendKind) -> usize {
        self.stream(kind)
            .map_or(0, |stream| lock(&stream.inner).pending.len())
    }

    /// Total chunks accepted by the latest stream of `kind`
    pub fn enqueued(&self, kind: BackendKind) -> usize {
        self.stream(kind)
            .map_or(0, |stream| lock(&stream.inner).enqueued)
    }

    pub fn stream_state(&self, kind: BackendKind) -> Option<StreamState> {
        self.stream(kind).map(|stream| lock(&stream.inner).state)
    }

    pub fn has_callback(&self, kind: BackendKind) -> bool {
        self.stream(kind)
            .is_some_and(|stream| lock(&stream.inner).callback.is_some())
    }

    /// Configuration items applied to the latest stream of `kind`
    pub fn configuration(&self, kind: BackendKind) -> Vec<StreamConfiguration> {
        self.stream(kind)
            .map(|stream| lock(&stream.inner).configuration.clone())
            .unwrap_or_default()
    }

    /// Every stream creation request, in order
    pub fn attempts(&self) -> Vec<CreateAttempt> {
        lock(&self.shared.attempts).clone()
    }

    pub fn engines_created(&self) -> usize {
        self.shared.engines_created.load(Ordering::Acquire)
    }

    /// Change platform behaviour; applies to subsequent calls
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut SimConfig),
    {
        f(&mut lock(&self.shared.config));
    }
}
