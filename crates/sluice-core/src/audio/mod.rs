//! Platform audio bridge for Sluice
//!
//! Provides the pieces an engine needs to talk to a buffer-queue audio API:
//!
//! - **platform**: traits a platform implements (engine, stream queue,
//!   completion callbacks, play/record state)
//! - **format**: PCM descriptors handed to stream constructors
//! - **sim**: an in-process software platform
//! - **backend**: the application-facing backend trait and its factory
//!
//! # Example Usage
//!
//! ```ignore
//! use sluice_core::audio::{BackendFactory, BackendKind, QueueBackendFactory, SimPlatform};
//!
//! let mut factory = QueueBackendFactory::new(Arc::new(SimPlatform::default()));
//! factory.init();
//! let mut backend = factory.create_backend(device, BackendKind::Playback)?;
//! backend.open("")?;
//! backend.reset();
//! backend.start()?;
//! ```

mod backend;
mod config;
mod error;
mod format;
mod platform;
pub mod sim;

pub use backend::{Backend, BackendFactory, QueueBackendFactory};
pub(crate) use backend::resolve_endpoint;

pub use config::{StreamSettings, DEFAULT_DRAIN_TIMEOUT_MS, DEFAULT_RUN_SECONDS};

pub use error::{BackendError, BackendResult, PlatformError};

pub use format::{DescriptorKind, Endianness, PcmDescriptor};

pub use platform::{
    AudioPlatform, BackendKind, BufferRetention, CompletionCallback, PlatformEngine,
    RecordingPreset, StreamConfiguration, StreamQueue, StreamState, StreamType,
};

pub use sim::{CaptureSource, Clocking, SimConfig, SimControl, SimPlatform};
