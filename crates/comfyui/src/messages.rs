//! Frames pushed by the ComfyUI `/ws` endpoint.
//!
//! Every text frame is `{"type": ..., "data": {...}}`; the `type` picks the
//! [`ComfyUIMessage`] variant. Binary preview frames never reach this module.

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ComfyUIMessage {
    /// Queue broadcast, not tied to any prompt.
    Status(QueueBroadcast),
    ExecutionStart(PromptRef),
    ExecutionCached(CachedNodes),
    /// `node: null` marks the end of the prompt on every server version.
    Executing(NodeStarted),
    Progress(StepProgress),
    Executed(NodeOutput),
    /// Sent by newer servers next to the terminal `executing` frame.
    ExecutionSuccess(PromptRef),
    ExecutionInterrupted(Interrupted),
    ExecutionError(NodeFailure),
}

impl ComfyUIMessage {
    pub fn prompt_id(&self) -> Option<&str> {
        let id = match self {
            Self::Status(_) => return None,
            Self::Progress(p) => return p.prompt_id.as_deref(),
            Self::ExecutionStart(p) | Self::ExecutionSuccess(p) => &p.prompt_id,
            Self::ExecutionCached(c) => &c.prompt_id,
            Self::Executing(e) => &e.prompt_id,
            Self::Executed(o) => &o.prompt_id,
            Self::ExecutionInterrupted(i) => &i.prompt_id,
            Self::ExecutionError(f) => &f.prompt_id,
        };
        Some(id)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueBroadcast {
    status: Value,
}

impl QueueBroadcast {
    /// `status.exec_info.queue_remaining`, when present.
    pub fn queue_remaining(&self) -> Option<u64> {
        self.status
            .pointer("/exec_info/queue_remaining")
            .and_then(Value::as_u64)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PromptRef {
    pub prompt_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CachedNodes {
    pub prompt_id: String,
    #[serde(default)]
    pub nodes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeStarted {
    pub prompt_id: String,
    pub node: Option<String>,
}

/// Sampler step counter. Legacy servers leave out `prompt_id` and `node`.
#[derive(Debug, Clone, Deserialize)]
pub struct StepProgress {
    pub value: i32,
    pub max: i32,
    #[serde(default)]
    pub prompt_id: Option<String>,
    #[serde(default)]
    pub node: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeOutput {
    pub prompt_id: String,
    pub node: String,
    pub output: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Interrupted {
    pub prompt_id: String,
    #[serde(default)]
    pub node_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeFailure {
    pub prompt_id: String,
    pub node_id: String,
    #[serde(default)]
    pub node_type: Option<String>,
    pub exception_type: String,
    pub exception_message: String,
}

/// Unknown `type` values and malformed JSON both come back as `Err`; the
/// executor skips those frames.
pub fn parse_message(text: &str) -> Result<ComfyUIMessage, serde_json::Error> {
    serde_json::from_str(text)
}
