use crate::protocol::{Command, LifecycleState, ProgressPhase};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DreamError {
    #[error("hardware acceleration unavailable: {0}")]
    CapabilityUnsupported(String),

    #[error("model '{0}' not found in catalog")]
    ModelNotFound(String),

    #[error("cannot {command} while {state}")]
    InvalidState {
        command: Command,
        state: LifecycleState,
    },

    /// An `unload` ran while the command was in flight and its outcome
    /// was discarded.
    #[error("interrupted while trying to {command}, now {state}")]
    Superseded {
        command: Command,
        state: LifecycleState,
    },

    #[error("invalid generation request: {0}")]
    InvalidRequest(String),

    #[error("failed to acquire model '{model}' during {phase}")]
    AcquireFailed {
        model: String,
        phase: ProgressPhase,
        #[source]
        cause: anyhow::Error,
    },

    #[error("image generation with '{model}' failed")]
    GenerateFailed {
        model: String,
        #[source]
        cause: anyhow::Error,
    },

    #[error("failed to release model '{model}'")]
    ReleaseFailed {
        model: String,
        #[source]
        cause: anyhow::Error,
    },
}

impl DreamError {
    /// Message with the full source chain, as stored in `Failed`
    pub fn reason(&self) -> String {
        let mut reason = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            reason.push_str(": ");
            reason.push_str(&err.to_string());
            source = err.source();
        }
        reason
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn reason_includes_capability_cause() {
        let err = DreamError::AcquireFailed {
            model: "sdxl".to_string(),
            phase: ProgressPhase::Downloading,
            cause: anyhow!("connection reset"),
        };
        assert_eq!(
            err.reason(),
            "failed to acquire model 'sdxl' during downloading: connection reset"
        );
    }

    #[test]
    fn invalid_state_names_command_and_state() {
        let err = DreamError::InvalidState {
            command: Command::GenerateImage,
            state: LifecycleState::Idle,
        };
        assert_eq!(err.to_string(), "cannot generate an image while idle");
        assert_eq!(err.reason(), err.to_string());
    }

    #[test]
    fn superseded_names_the_interrupted_command() {
        let err = DreamError::Superseded {
            command: Command::LoadModel,
            state: LifecycleState::Idle,
        };
        assert_eq!(err.to_string(), "interrupted while trying to load a model, now idle");
    }
}
