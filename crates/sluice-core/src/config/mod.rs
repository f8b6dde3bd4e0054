//! Settings persistence
//!
//! Generic YAML loading and saving plus the standard settings location.
//!
//! # Usage
//!
//! ```ignore
//! use sluice_core::audio::StreamSettings;
//! use sluice_core::config::{default_config_path, load_config, save_config};
//!
//! let path = default_config_path("loopback.yaml");
//! let settings: StreamSettings = load_config(&path);
//! save_config(&settings, &path)?;
//! ```

mod io;
mod paths;

pub use io::{load_config, save_config};
pub use paths::{config_dir, default_config_path};
