use serde::{Deserialize, Serialize};
use std::fmt;

/// Run/stop state of the pilot. Starts out stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionState {
    #[default]
    Stopped,
    Running,
}

impl fmt::Display for MotionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MotionState::Stopped => write!(f, "STOPPED"),
            MotionState::Running => write!(f, "RUNNING"),
        }
    }
}

/// Token received on the control-event feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    Stop,
    Go,
    /// Anything else; logged and otherwise ignored
    Other(String),
}

impl ControlEvent {
    /// Map a raw token. Matching is exact: case and whitespace count.
    pub fn parse(token: &str) -> Self {
        match token {
            "stop" => ControlEvent::Stop,
            "go" => ControlEvent::Go,
            other => ControlEvent::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ControlEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlEvent::Stop => write!(f, "stop"),
            ControlEvent::Go => write!(f, "go"),
            ControlEvent::Other(token) => write!(f, "{}", token),
        }
    }
}
