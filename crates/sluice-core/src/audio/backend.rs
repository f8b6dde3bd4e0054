//! Backend trait and factory
//!
//! Applications talk to a [`Backend`] through the lifecycle operations
//! below. Backends are built by a [`BackendFactory`] that the application
//! constructs and passes around explicitly.

use std::sync::Arc;

use super::error::{BackendError, BackendResult};
use super::platform::{AudioPlatform, BackendKind};
use crate::device::{ClockLatency, DeviceContext};
use crate::engine::{CaptureEngine, EngineSettings, EngineState, PlaybackEngine};

/// One playback or capture stream on a device
pub trait Backend: Send {
    fn kind(&self) -> BackendKind;

    /// Name of the opened endpoint, empty while closed
    fn device_name(&self) -> &str;

    fn state(&self) -> EngineState;

    /// Acquire platform resources for an endpoint
    ///
    /// # Arguments
    /// * `name` - Endpoint name, or empty for the platform default
    ///
    /// # Returns
    /// * `NotFound` for an unknown name, `Device` when the platform refuses
    fn open(&mut self, name: &str) -> BackendResult<()>;

    /// Negotiate the stream format and rebuild buffers
    ///
    /// May update the device context's format to the negotiated values.
    fn reset(&mut self) -> bool {
        log::warn!("{} backend does not support reset", self.kind());
        false
    }

    fn start(&mut self) -> BackendResult<()>;

    /// Quiesce the stream; calling it again is a no-op
    fn stop(&mut self);

    /// Copy captured frames into `dest`
    ///
    /// # Arguments
    /// * `dest` - Destination, at least `frames` frames long
    /// * `frames` - Exact number of frames to copy
    ///
    /// # Returns
    /// * `Overflow` when fewer frames are available, `Device` once the
    ///   device has been lost
    fn capture_samples(&mut self, _dest: &mut [u8], _frames: usize) -> BackendResult<()> {
        Err(BackendError::NotSupported("capture_samples"))
    }

    /// Frames ready for `capture_samples`
    fn available_samples(&self) -> usize {
        0
    }

    /// Device clock and the audio queued ahead of it
    fn clock_latency(&self) -> ClockLatency;
}

/// Builds backends for one platform
pub trait BackendFactory {
    /// Prepare the platform; false if it is unusable
    fn init(&mut self) -> bool;

    fn query_support(&self, kind: BackendKind) -> bool;

    /// Endpoint names for `kind`
    fn enumerate(&self, kind: BackendKind) -> Vec<String>;

    /// Build a closed backend
    ///
    /// # Arguments
    /// * `device` - Context the backend reads its format from and reports to
    /// * `kind` - Playback or capture
    fn create_backend(
        &self,
        device: Arc<DeviceContext>,
        kind: BackendKind,
    ) -> BackendResult<Box<dyn Backend>>;
}

/// Factory for buffer-queue engines on any [`AudioPlatform`]
pub struct QueueBackendFactory {
    platform: Arc<dyn AudioPlatform>,
    settings: EngineSettings,
}

impl QueueBackendFactory {
    /// Factory with default engine settings
    ///
    /// # Example
    ///
    /// ```ignore
    /// let mut factory = QueueBackendFactory::new(Arc::new(SimPlatform::default()));
    /// assert!(factory.init());
    /// ```
    pub fn new(platform: Arc<dyn AudioPlatform>) -> Self {
        Self::with_settings(platform, EngineSettings::default())
    }

    /// Factory whose engines use `settings`
    ///
    /// # Arguments
    /// * `platform` - Platform every backend is built on
    /// * `settings` - Engine tuning such as the stop drain bound
    pub fn with_settings(platform: Arc<dyn AudioPlatform>, settings: EngineSettings) -> Self {
        Self { platform, settings }
    }

    pub fn platform(&self) -> &Arc<dyn AudioPlatform> {
        &self.platform
    }
}

impl BackendFactory for QueueBackendFactory {
    fn init(&mut self) -> bool {
        // Probe by realizing (and dropping) an engine object
        match self.platform.create_engine(BackendKind::Playback) {
            Ok(_) => {
                log::info!("{} platform initialized", self.platform.name());
                true
            }
            Err(e) => {
                log::error!("{}", e.describe(&format!("{} engine probe", self.platform.name())));
                false
            }
        }
    }

    fn query_support(&self, kind: BackendKind) -> bool {
        matches!(kind, BackendKind::Playback | BackendKind::Capture)
    }

    fn enumerate(&self, kind: BackendKind) -> Vec<String> {
        self.platform.endpoints(kind)
    }

    fn create_backend(
        &self,
        device: Arc<DeviceContext>,
        kind: BackendKind,
    ) -> BackendResult<Box<dyn Backend>> {
        let platform = Arc::clone(&self.platform);
        Ok(match kind {
            BackendKind::Playback => Box::new(PlaybackEngine::new(device, platform, self.settings)),
            BackendKind::Capture => Box::new(CaptureEngine::new(device, platform)),
        })
    }
}

/// Resolve `name` against the platform's endpoints for `kind`
///
/// An empty name selects the first endpoint.
///
/// # Returns
/// * The endpoint name to open, or `NotFound`
pub(crate) fn resolve_endpoint(
    platform: &dyn AudioPlatform,
    kind: BackendKind,
    name: &str,
) -> BackendResult<String> {
    let endpoints = platform.endpoints(kind);
    if name.is_empty() {
        return endpoints
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::NotFound(String::new()));
    }
    if endpoints.iter().any(|e| e == name) {
        Ok(name.to_string())
    } else {
        Err(BackendError::NotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::sim::{SimConfig, SimPlatform};
    use crate::types::DeviceFormat;

    fn factory(config: SimConfig) -> QueueBackendFactory {
        QueueBackendFactory::new(Arc::new(SimPlatform::new(config)))
    }

    #[test]
    fn test_enumerate_lists_single_endpoint() {
        let factory = factory(SimConfig::default());
        assert!(factory.query_support(BackendKind::Playback));
        assert!(factory.query_support(BackendKind::Capture));
        assert_eq!(factory.enumerate(BackendKind::Playback), vec!["Software".to_string()]);
        assert_eq!(factory.enumerate(BackendKind::Capture), vec!["Software".to_string()]);
    }

    #[test]
    fn test_init_fails_when_engine_unavailable() {
        let mut ok = factory(SimConfig::default());
        assert!(ok.init());
        let mut broken = factory(SimConfig {
            fail_engine: true,
            ..SimConfig::default()
        });
        assert!(!broken.init());
    }

    #[test]
    fn test_create_backend_per_kind() {
        let factory = factory(SimConfig::default());
        let device = Arc::new(DeviceContext::new(DeviceFormat::default()));
        let playback = factory
            .create_backend(Arc::clone(&device), BackendKind::Playback)
            .unwrap();
        let capture = factory.create_backend(device, BackendKind::Capture).unwrap();
        assert_eq!(playback.kind(), BackendKind::Playback);
        assert_eq!(capture.kind(), BackendKind::Capture);
        assert_eq!(playback.state(), EngineState::Closed);
        assert!(playback.device_name().is_empty());
    }

    #[test]
    fn test_resolve_endpoint() {
        let platform = SimPlatform::default();
        assert_eq!(
            resolve_endpoint(&platform, BackendKind::Playback, "").unwrap(),
            "Software"
        );
        assert_eq!(
            resolve_endpoint(&platform, BackendKind::Playback, "Software").unwrap(),
            "Software"
        );
        assert!(matches!(
            resolve_endpoint(&platform, BackendKind::Playback, "hw:1"),
            Err(BackendError::NotFound(name)) if name == "hw:1"
        ));
    }
}
