//! Classification of raw SDK failures into [`ComfyError`].
//!
//! Every [`ComfyUIApiError`] is first normalised into an [`ErrorInfo`]
//! (status code, machine code, error name, message), then run through a
//! fixed chain of predicates. The first predicate that matches decides the
//! [`ErrorKind`]:
//!
//! 1. server-side execution errors (missing model files, node failures)
//! 2. HTTP status codes
//! 3. transport failures (connect, timeout, WebSocket, undecodable body)
//! 4. caller cancellation
//! 5. substring heuristics over the lowercased message
//!
//! Anything left over is `UnknownError` with the original message.
//!
//! The substrings in the last layer mirror what ComfyUI servers and the
//! underlying HTTP stack have been seen to produce. They are not a
//! documented contract and should be re-checked against real servers.

use std::sync::LazyLock;

use comfybridge_core::error::{ComfyError, ErrorKind};
use regex::Regex;

use crate::api::ComfyUIApiError;

/// `ckpt_name: 'flux1-dev.safetensors' not in [...]` as emitted by prompt
/// validation when a loader references a file the server does not have.
static MISSING_FILE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\w+_name\d?): '([^']+)' not in").expect("valid regex")
});

/// Where a failure came from, before classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSource {
    /// A non-2xx HTTP response.
    Http,
    /// Connecting or sending failed.
    Network,
    Timeout,
    /// A 2xx body that could not be decoded or had the wrong shape.
    Malformed,
    /// The WebSocket failed or closed mid-execution.
    WebSocket,
    /// The server reported a node failure.
    Execution,
    Cancelled,
    Other,
}

/// Normalised view of a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub source: ErrorSource,
    pub status: Option<u16>,
    /// Machine-readable code (`error.type` of a ComfyUI error body, or the
    /// failing node type for execution errors).
    pub code: Option<String>,
    /// Error name, e.g. the Python exception type.
    pub name: Option<String>,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(source: ErrorSource, message: impl Into<String>) -> Self {
        Self {
            source,
            status: None,
            code: None,
            name: None,
            message: message.into(),
        }
    }

    pub fn from_api_error(err: &ComfyUIApiError) -> Self {
        match err {
            ComfyUIApiError::Request(e) => {
                let source = if e.is_timeout() {
                    ErrorSource::Timeout
                } else if e.is_decode() {
                    ErrorSource::Malformed
                } else {
                    ErrorSource::Network
                };
                Self {
                    status: e.status().map(|s| s.as_u16()),
                    ..Self::new(source, e.to_string())
                }
            }
            ComfyUIApiError::Status { status, body } => {
                let code = serde_json::from_str::<serde_json::Value>(body)
                    .ok()
                    .and_then(|v| {
                        v.pointer("/error/type")
                            .and_then(|t| t.as_str())
                            .map(str::to_string)
                    });
                Self {
                    status: Some(*status),
                    code,
                    ..Self::new(ErrorSource::Http, body.clone())
                }
            }
            ComfyUIApiError::Client(e) => Self::new(ErrorSource::Network, e.to_string()),
            ComfyUIApiError::WebSocket(msg) => Self::new(ErrorSource::WebSocket, msg.clone()),
            ComfyUIApiError::Execution {
                node_type,
                exception_type,
                message,
                ..
            } => Self {
                code: node_type.clone(),
                name: Some(exception_type.clone()),
                ..Self::new(ErrorSource::Execution, message.clone())
            },
            ComfyUIApiError::MalformedResponse(msg) => Self::new(ErrorSource::Malformed, msg.clone()),
            ComfyUIApiError::Cancelled(prompt_id) => {
                Self::new(ErrorSource::Cancelled, format!("Execution of prompt {prompt_id} was cancelled"))
            }
        }
    }
}

/// Classify an SDK error. Details always include the source and, when
/// known, the HTTP status.
pub fn classify_api_error(err: &ComfyUIApiError) -> ComfyError {
    let mut classified = classify_info(&ErrorInfo::from_api_error(err));
    if let ComfyUIApiError::Execution {
        prompt_id, node_id, ..
    } = err
    {
        classified = classified
            .with_detail("promptId", prompt_id.as_str())
            .with_detail("nodeId", node_id.as_str());
    }
    tracing::debug!(kind = %classified.kind, error = %err, "Classified ComfyUI error");
    classified
}

/// Classify an arbitrary error. Already-classified errors pass through
/// untouched.
pub fn classify_error(err: &(dyn std::error::Error + 'static)) -> ComfyError {
    if let Some(classified) = err.downcast_ref::<ComfyError>() {
        return classified.clone();
    }
    if let Some(api) = err.downcast_ref::<ComfyUIApiError>() {
        return classify_api_error(api);
    }
    classify_info(&ErrorInfo::new(ErrorSource::Other, err.to_string()))
}

/// Run the predicate chain over a normalised failure.
pub fn classify_info(info: &ErrorInfo) -> ComfyError {
    let kind = classify_execution(info)
        .or_else(|| classify_status(info))
        .or_else(|| classify_transport(info))
        .or_else(|| (info.source == ErrorSource::Cancelled).then_some(ErrorKind::WorkflowExecutionFailed))
        .or_else(|| classify_message(&info.message))
        .unwrap_or(ErrorKind::UnknownError);

    let mut err = ComfyError::new(kind, summary(kind, info));
    if let Some(status) = info.status {
        err = err.with_detail("status", status);
    }
    if let Some(code) = &info.code {
        err = err.with_detail("code", code.as_str());
    }
    if let Some(name) = &info.name {
        err = err.with_detail("errorName", name.as_str());
    }
    if let Some((field, file)) = missing_file(&info.message) {
        err = err.with_detail("field", field).with_detail("fileName", file);
    }
    if info.source == ErrorSource::Cancelled {
        err = err.with_detail("cancelled", true);
    }
    err.with_detail("originalMessage", info.message.as_str())
}

// ---- predicates ----

fn classify_execution(info: &ErrorInfo) -> Option<ErrorKind> {
    if info.source != ErrorSource::Execution {
        return None;
    }
    if let Some((field, _)) = missing_file(&info.message) {
        return Some(kind_for_field(field));
    }
    let file_missing = info.name.as_deref() == Some("FileNotFoundError")
        || info.message.to_lowercase().contains("no such file");
    if file_missing {
        if let Some(kind) = info.code.as_deref().and_then(kind_for_loader) {
            return Some(kind);
        }
    }
    Some(ErrorKind::WorkflowExecutionFailed)
}

fn classify_status(info: &ErrorInfo) -> Option<ErrorKind> {
    let status = info.status?;
    match status {
        401 => Some(ErrorKind::InvalidApiKey),
        403 => Some(ErrorKind::PermissionDenied),
        400 => Some(
            missing_file(&info.message)
                .map(|(field, _)| kind_for_field(field))
                .unwrap_or(ErrorKind::WorkflowExecutionFailed),
        ),
        404 | 500..=599 => Some(ErrorKind::ServiceUnavailable),
        _ => None,
    }
}

fn classify_transport(info: &ErrorInfo) -> Option<ErrorKind> {
    match info.source {
        ErrorSource::Network
        | ErrorSource::Timeout
        | ErrorSource::Malformed
        | ErrorSource::WebSocket => Some(ErrorKind::ServiceUnavailable),
        _ => None,
    }
}

/// Last-resort heuristics over the message text.
fn classify_message(message: &str) -> Option<ErrorKind> {
    const SERVICE: &[&str] = &[
        "econnrefused",
        "connection refused",
        "enotfound",
        "etimedout",
        "timed out",
        "fetch failed",
        "socket hang up",
        "network error",
        "service unavailable",
        "bad gateway",
    ];
    const AUTH: &[&str] = &["unauthorized", "invalid api key", "authentication failed"];
    const FORBIDDEN: &[&str] = &["forbidden", "permission denied", "access denied"];
    const MODEL: &[&str] = &["model not found", "checkpoint not found", "unet not found"];
    const EMPTY: &[&str] = &["no images", "empty result"];

    let lower = message.to_lowercase();
    let hit = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if hit(SERVICE) {
        Some(ErrorKind::ServiceUnavailable)
    } else if hit(AUTH) {
        Some(ErrorKind::InvalidApiKey)
    } else if hit(FORBIDDEN) {
        Some(ErrorKind::PermissionDenied)
    } else if hit(MODEL) {
        Some(ErrorKind::ModelNotFound)
    } else if hit(EMPTY) {
        Some(ErrorKind::EmptyResult)
    } else {
        None
    }
}

// ---- helpers ----

fn missing_file(message: &str) -> Option<(&str, &str)> {
    let caps = MISSING_FILE_RE.captures(message)?;
    Some((caps.get(1)?.as_str(), caps.get(2)?.as_str()))
}

fn kind_for_field(field: &str) -> ErrorKind {
    if field.starts_with("ckpt_name") || field.starts_with("unet_name") {
        ErrorKind::ModelNotFound
    } else if field.starts_with("clip_name") {
        ErrorKind::MissingEncoder
    } else {
        ErrorKind::MissingComponent
    }
}

fn kind_for_loader(node_type: &str) -> Option<ErrorKind> {
    match node_type {
        "CheckpointLoaderSimple" | "UNETLoader" => Some(ErrorKind::ModelNotFound),
        "CLIPLoader" | "DualCLIPLoader" | "TripleCLIPLoader" => Some(ErrorKind::MissingEncoder),
        "VAELoader" | "LoraLoader" => Some(ErrorKind::MissingComponent),
        _ => None,
    }
}

fn summary(kind: ErrorKind, info: &ErrorInfo) -> String {
    match kind {
        ErrorKind::InvalidApiKey => "ComfyUI rejected the credentials".to_string(),
        ErrorKind::PermissionDenied => "Access to the ComfyUI server was denied".to_string(),
        ErrorKind::ServiceUnavailable => match info.status {
            Some(status) => format!("ComfyUI service unavailable (HTTP {status})"),
            None => "ComfyUI service unavailable".to_string(),
        },
        ErrorKind::ModelNotFound | ErrorKind::MissingEncoder | ErrorKind::MissingComponent => {
            match missing_file(&info.message) {
                Some((field, file)) => format!("File '{file}' for {field} is not available on the server"),
                None => info.message.clone(),
            }
        }
        _ => info.message.clone(),
    }
}
