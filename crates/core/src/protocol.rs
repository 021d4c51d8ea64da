use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressPhase {
    Initialization,
    Downloading,
    Loading,
    Generating,
    Complete,
    Error,
}

impl ProgressPhase {
    /// Phases a model acquisition may report
    pub fn is_acquire(self) -> bool {
        matches!(
            self,
            ProgressPhase::Initialization | ProgressPhase::Downloading | ProgressPhase::Loading
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProgressPhase::Initialization => "initialization",
            ProgressPhase::Downloading => "downloading",
            ProgressPhase::Loading => "loading",
            ProgressPhase::Generating => "generating",
            ProgressPhase::Complete => "complete",
            ProgressPhase::Error => "error",
        }
    }
}

impl fmt::Display for ProgressPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub phase: ProgressPhase,
    /// 0..=100
    pub percent: u8,
    pub message: String,
}

impl ProgressEvent {
    pub fn new(phase: ProgressPhase, percent: u8, message: impl Into<String>) -> Self {
        Self {
            phase,
            percent: percent.min(100),
            message: message.into(),
        }
    }
}

/// Snapshot of where the lifecycle controller currently is.
///
/// Exactly one variant is ever active; the model id travels with the
/// variants where a model is involved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "lowercase")]
pub enum LifecycleState {
    Idle,
    Loading(String),
    Ready(String),
    Generating(String),
    Failed(String),
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Idle => f.write_str("idle"),
            LifecycleState::Loading(id) => write!(f, "loading '{}'", id),
            LifecycleState::Ready(id) => write!(f, "ready with '{}'", id),
            LifecycleState::Generating(id) => write!(f, "generating with '{}'", id),
            LifecycleState::Failed(reason) => write!(f, "failed ({})", reason),
        }
    }
}

/// Commands the controller accepts, used when reporting a rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    LoadModel,
    GenerateImage,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::LoadModel => f.write_str("load a model"),
            Command::GenerateImage => f.write_str("generate an image"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_is_capped() {
        let event = ProgressEvent::new(ProgressPhase::Loading, 250, "too far");
        assert_eq!(event.percent, 100);
    }

    #[test]
    fn event_serializes_with_lowercase_phase() {
        let event = ProgressEvent::new(ProgressPhase::Downloading, 10, "Downloading model files...");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["phase"], "downloading");
        assert_eq!(json["percent"], 10);
    }

    #[test]
    fn state_display_names_the_model() {
        assert_eq!(LifecycleState::Idle.to_string(), "idle");
        assert_eq!(
            LifecycleState::Generating("sd-turbo".into()).to_string(),
            "generating with 'sd-turbo'"
        );
    }

    #[test]
    fn state_serializes_tagged() {
        let json = serde_json::to_value(LifecycleState::Ready("sd-1.5".into())).unwrap();
        assert_eq!(json["state"], "ready");
        assert_eq!(json["detail"], "sd-1.5");
    }
}
