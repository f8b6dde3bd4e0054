//! Engine lifecycle state

use crate::audio::{BackendError, BackendResult};

/// Lifecycle position of an engine
///
/// ```text
/// Closed ─open─▶ Opened ─reset─▶ Configured ─start─▶ Started ─stop─▶ Stopped
///                                     ▲                  ▲              │
///                                     └──────reset───────┴─────start────┘
/// ```
///
/// Device loss is tracked separately by the device context's connectivity
/// flag and does not change the lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    #[default]
    Closed,
    Opened,
    Configured,
    Started,
    Stopped,
}

impl EngineState {
    pub fn is_open(&self) -> bool {
        !matches!(self, EngineState::Closed)
    }

    /// A stream exists and can be started
    pub fn can_start(&self) -> bool {
        matches!(self, EngineState::Configured | EngineState::Stopped)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, EngineState::Started)
    }

    /// Fail with `InvalidState` unless `allowed` holds
    pub(crate) fn require(&self, operation: &'static str, allowed: bool) -> BackendResult<()> {
        if allowed {
            Ok(())
        } else {
            Err(BackendError::InvalidState {
                operation,
                state: self.to_string(),
            })
        }
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EngineState::Closed => "closed",
            EngineState::Opened => "opened",
            EngineState::Configured => "configured",
            EngineState::Started => "started",
            EngineState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_allowed_after_configure_or_stop() {
        assert!(!EngineState::Closed.can_start());
        assert!(!EngineState::Opened.can_start());
        assert!(EngineState::Configured.can_start());
        assert!(EngineState::Stopped.can_start());
        assert!(!EngineState::Started.can_start());
    }

    #[test]
    fn test_require_reports_state() {
        let err = EngineState::Opened
            .require("start", EngineState::Opened.can_start())
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid state for start: opened");
    }
}
