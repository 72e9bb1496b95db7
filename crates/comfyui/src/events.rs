//! Progress events surfaced while a workflow executes.
//!
//! The executor turns raw `progress` frames into [`ExecutionProgress`]
//! and hands them to the caller's [`ProgressCallback`].

use serde::Serialize;

/// Step-level progress of one prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionProgress {
    pub prompt_id: String,
    /// The node currently executing, if known.
    pub node: Option<String>,
    /// Current step number.
    pub value: i32,
    /// Total number of steps.
    pub max: i32,
}

impl ExecutionProgress {
    /// Completion percentage (0-100).
    pub fn percent(&self) -> i16 {
        if self.max > 0 {
            ((self.value as f64 / self.max as f64) * 100.0) as i16
        } else {
            0
        }
    }
}

/// Receiver of progress updates. Called inline from the message loop, so
/// it must not block.
pub type ProgressCallback = dyn Fn(&ExecutionProgress) + Send + Sync;
