//! Sluice Core - buffer-queue audio backends
//!
//! Playback and capture engines that move fixed-size chunks between a
//! lock-free ring buffer and a platform buffer queue, plus the device
//! context, format negotiation and settings they share.

pub mod audio;
pub mod config;
pub mod device;
pub mod engine;
pub mod ring;
pub mod types;

pub use types::*;
