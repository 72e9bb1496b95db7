//! WebSocket message loop for a single submitted prompt.
//!
//! Reads raw frames from a ComfyUI WebSocket connection, parses them
//! into typed [`ComfyUIMessage`] variants, forwards progress to the
//! caller and resolves once the prompt finishes, fails, or the caller
//! cancels. Frames belonging to other prompts are skipped.

use std::collections::BTreeMap;

use futures::{Stream, StreamExt};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

use crate::api::ComfyUIApiError;
use crate::events::{ExecutionProgress, ProgressCallback};
use crate::messages::{parse_message, ComfyUIMessage};

/// What the socket reported for a prompt that ran to completion.
#[derive(Debug, Clone, Default)]
pub struct ExecutionOutcome {
    /// Outputs of `executed` frames, keyed by node id. The history
    /// endpoint is authoritative; this is the fallback when history is
    /// unavailable.
    pub executed: BTreeMap<String, serde_json::Value>,
    /// Nodes whose outputs were served from the server cache.
    pub cached_nodes: Vec<String>,
}

/// Drive `stream` until `prompt_id` completes.
///
/// Completion is `executing` with a null node or `execution_success`.
/// An `execution_error` frame yields [`ComfyUIApiError::Execution`];
/// an interruption, a close frame, or the end of the stream yield
/// [`ComfyUIApiError::WebSocket`]. Cancelling `cancel` returns
/// [`ComfyUIApiError::Cancelled`] immediately; removing the prompt from
/// the server queue is the caller's job.
pub async fn await_execution<S>(
    stream: &mut S,
    prompt_id: &str,
    on_progress: Option<&ProgressCallback>,
    cancel: &CancellationToken,
) -> Result<ExecutionOutcome, ComfyUIApiError>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let mut outcome = ExecutionOutcome::default();
    let mut started = false;

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(prompt_id = %prompt_id, "Execution cancelled by caller");
                return Err(ComfyUIApiError::Cancelled(prompt_id.to_string()));
            }
            frame = stream.next() => frame,
        };

        let text = match frame {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Binary(_))) => {
                // Preview images.
                tracing::trace!(prompt_id = %prompt_id, "Ignoring binary message");
                continue;
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
            Some(Ok(Message::Close(frame))) => {
                tracing::warn!(prompt_id = %prompt_id, ?frame, "ComfyUI WebSocket closed");
                return Err(ComfyUIApiError::WebSocket(format!(
                    "connection closed before prompt {prompt_id} completed"
                )));
            }
            Some(Err(e)) => {
                tracing::error!(prompt_id = %prompt_id, error = %e, "WebSocket receive error");
                return Err(ComfyUIApiError::WebSocket(e.to_string()));
            }
            None => {
                return Err(ComfyUIApiError::WebSocket(format!(
                    "stream ended before prompt {prompt_id} completed"
                )));
            }
        };

        let msg = match parse_message(&text) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(error = %e, raw_message = %text, "Skipping unrecognised ComfyUI message");
                continue;
            }
        };

        match msg.prompt_id() {
            Some(id) if id != prompt_id => continue,
            None if !matches!(msg, ComfyUIMessage::Progress(_)) => {
                if let ComfyUIMessage::Status(data) = &msg {
                    tracing::debug!(
                        queue_remaining = ?data.queue_remaining(),
                        "ComfyUI queue status",
                    );
                }
                continue;
            }
            _ => {}
        }

        match msg {
            ComfyUIMessage::ExecutionStart(_) => {
                started = true;
                tracing::info!(prompt_id = %prompt_id, "Execution started");
            }
            ComfyUIMessage::ExecutionCached(data) => {
                tracing::debug!(prompt_id = %prompt_id, nodes = data.nodes.len(), "Execution used cache");
                outcome.cached_nodes.extend(data.nodes);
            }
            ComfyUIMessage::Progress(data) => {
                // Legacy frames carry no prompt id; attribute them only
                // once our prompt is running.
                if data.prompt_id.is_none() && !started {
                    continue;
                }
                let progress = ExecutionProgress {
                    prompt_id: prompt_id.to_string(),
                    node: data.node,
                    value: data.value,
                    max: data.max,
                };
                tracing::debug!(
                    prompt_id = %prompt_id,
                    value = progress.value,
                    max = progress.max,
                    percent = progress.percent(),
                    "Generation progress",
                );
                if let Some(callback) = on_progress {
                    callback(&progress);
                }
            }
            ComfyUIMessage::Executing(data) => match data.node {
                Some(node) => {
                    started = true;
                    tracing::debug!(prompt_id = %prompt_id, node = %node, "Executing node");
                }
                None => {
                    tracing::info!(prompt_id = %prompt_id, "Execution completed (all nodes done)");
                    return Ok(outcome);
                }
            },
            ComfyUIMessage::ExecutionSuccess(_) => {
                tracing::info!(prompt_id = %prompt_id, "Execution succeeded");
                return Ok(outcome);
            }
            ComfyUIMessage::Executed(data) => {
                tracing::debug!(prompt_id = %prompt_id, node = %data.node, "Node executed with output");
                outcome.executed.insert(data.node, data.output);
            }
            ComfyUIMessage::ExecutionInterrupted(data) => {
                tracing::warn!(prompt_id = %prompt_id, node_id = ?data.node_id, "Execution interrupted");
                return Err(ComfyUIApiError::WebSocket(format!(
                    "execution of prompt {prompt_id} was interrupted"
                )));
            }
            ComfyUIMessage::ExecutionError(data) => {
                tracing::error!(
                    prompt_id = %prompt_id,
                    node_id = %data.node_id,
                    error_type = %data.exception_type,
                    error_message = %data.exception_message,
                    "Execution error",
                );
                return Err(ComfyUIApiError::Execution {
                    prompt_id: data.prompt_id,
                    node_id: data.node_id,
                    node_type: data.node_type,
                    exception_type: data.exception_type,
                    message: data.exception_message,
                });
            }
            ComfyUIMessage::Status(_) => {}
        }
    }
}
