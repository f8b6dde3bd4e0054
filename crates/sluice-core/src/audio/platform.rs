//! Platform buffer-queue bridge
//!
//! A platform exposes an engine object per direction, and the engine creates
//! stream queues. A stream queue accepts chunk handles, plays or fills them
//! on its own schedule, and invokes the registered completion callback once
//! per finished chunk from a platform-owned thread.
//!
//! These traits carry exactly the calls the engines make; how a platform
//! lays out its objects stays inside its implementation.

use std::sync::Arc;

use super::error::PlatformError;
use super::format::PcmDescriptor;
use crate::ring::ChunkRef;

/// Stream direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Playback,
    Capture,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Playback => write!(f, "playback"),
            BackendKind::Capture => write!(f, "capture"),
        }
    }
}

/// Called once per completed chunk, on a platform thread
///
/// Implementations only move ring cursors and post wake-ups.
pub type CompletionCallback = Arc<dyn Fn() + Send + Sync>;

/// Play or record state of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Stopped,
    Paused,
    Running,
}

/// Optional per-stream configuration applied after creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamConfiguration {
    /// Output routing class for playback
    StreamType(StreamType),
    /// Input processing preset for capture
    RecordingPreset(RecordingPreset),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    Media,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingPreset {
    Generic,
}

/// Whether a queue keeps referencing enqueued memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferRetention {
    /// The chunk is read (or filled) until its completion is reported
    #[default]
    Retained,
    /// The chunk is copied during `enqueue`; the slot is free on return
    Copied,
}

/// Entry point of a platform audio API
pub trait AudioPlatform: Send + Sync {
    /// Platform name used in log lines
    fn name(&self) -> &str;

    /// Endpoint names available for `kind`
    fn endpoints(&self, kind: BackendKind) -> Vec<String>;

    /// Create and realize an engine object
    fn create_engine(&self, kind: BackendKind) -> Result<Box<dyn PlatformEngine>, PlatformError>;
}

/// Realized platform engine
///
/// For playback this also owns the output mix the player is routed to.
pub trait PlatformEngine: Send {
    /// Create a player fed by a queue of `queue_len` chunks
    fn create_player(
        &self,
        format: &PcmDescriptor,
        queue_len: usize,
    ) -> Result<Box<dyn StreamQueue>, PlatformError>;

    /// Create a recorder filling a queue of `queue_len` chunks
    fn create_recorder(
        &self,
        format: &PcmDescriptor,
        queue_len: usize,
    ) -> Result<Box<dyn StreamQueue>, PlatformError>;
}

/// Buffer queue of a created player or recorder
pub trait StreamQueue: Send {
    /// Apply an optional configuration item
    fn set_configuration(&mut self, config: StreamConfiguration) -> Result<(), PlatformError>;

    /// Install or remove the completion callback
    fn register_callback(&mut self, callback: Option<CompletionCallback>) -> Result<(), PlatformError>;

    /// Append a chunk to the queue
    fn enqueue(&mut self, chunk: ChunkRef) -> Result<(), PlatformError>;

    /// Drop all pending chunks without reporting completions
    fn clear(&mut self) -> Result<(), PlatformError>;

    /// Chunks currently held by the queue
    fn queued(&self) -> Result<usize, PlatformError>;

    fn state(&self) -> Result<StreamState, PlatformError>;

    fn set_state(&mut self, state: StreamState) -> Result<(), PlatformError>;

    fn retention(&self) -> BufferRetention {
        BufferRetention::Retained
    }
}
