//! Closed error taxonomy for the ComfyUI provider.
//!
//! Every failure that leaves the pipeline is a [`ComfyError`] carrying one
//! [`ErrorKind`]. Classification happens once, close to where the failure
//! originates; outer layers may attach context through
//! [`ComfyError::with_detail`] but never change the kind.

use serde::Serialize;
use serde_json::{Map, Value};

/// The classified kind of a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    /// A logical model id could not be resolved to a file on the server.
    ModelNotFound,
    /// A required auxiliary file (usually a VAE) is not on the server.
    MissingComponent,
    /// A required text encoder (CLIP / T5) is not on the server.
    MissingEncoder,
    /// The detected architecture or variant has no workflow builder.
    UnsupportedModel,
    /// Caller-supplied arguments are structurally invalid.
    InvalidArgs,
    /// Authentication settings are incomplete (e.g. basic auth without password).
    InvalidAuthConfig,
    /// The server answered 401.
    InvalidApiKey,
    /// The server answered 403.
    PermissionDenied,
    /// Network failure, server 5xx, or a malformed server response.
    ServiceUnavailable,
    /// The workflow ran but produced no usable image.
    EmptyResult,
    /// The server reported a failure while executing the workflow.
    WorkflowExecutionFailed,
    /// Downloading the image-to-image input failed.
    ImageFetchFailed,
    /// The image-to-image input exceeds the size limit.
    ImageTooLarge,
    /// Uploading the image-to-image input to the server failed.
    UploadFailed,
    /// Anything that could not be classified.
    UnknownError,
}

impl ErrorKind {
    /// Stable label used in serialized error payloads and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ModelNotFound => "ModelNotFound",
            Self::MissingComponent => "MissingComponent",
            Self::MissingEncoder => "MissingEncoder",
            Self::UnsupportedModel => "UnsupportedModel",
            Self::InvalidArgs => "InvalidArgs",
            Self::InvalidAuthConfig => "InvalidAuthConfig",
            Self::InvalidApiKey => "InvalidApiKey",
            Self::PermissionDenied => "PermissionDenied",
            Self::ServiceUnavailable => "ServiceUnavailable",
            Self::EmptyResult => "EmptyResult",
            Self::WorkflowExecutionFailed => "WorkflowExecutionFailed",
            Self::ImageFetchFailed => "ImageFetchFailed",
            Self::ImageTooLarge => "ImageTooLarge",
            Self::UploadFailed => "UploadFailed",
            Self::UnknownError => "UnknownError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified provider error.
///
/// `message` is short and human-readable; `details` holds whatever is needed
/// to reproduce the failure (model id, parameters, status code, ...).
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[error("{message}")]
pub struct ComfyError {
    pub kind: ErrorKind,
    pub message: String,
    pub details: Map<String, Value>,
}

/// Convenience alias used throughout the workspace.
pub type ComfyResult<T> = Result<T, ComfyError>;

impl ComfyError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: Map::new(),
        }
    }

    /// Attach a context value.
    ///
    /// An existing key is left untouched so that the detail recorded closest
    /// to the failure wins over context added by outer layers.
    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details
            .entry(key.to_string())
            .or_insert_with(|| value.into());
        self
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }

    pub fn detail(&self, key: &str) -> Option<&Value> {
        self.details.get(key)
    }

    // ---- constructors for the common cases ----

    pub fn model_not_found(model_id: &str, reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::ModelNotFound, reason).with_detail("modelId", model_id)
    }

    pub fn missing_encoder(model_file: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MissingEncoder, message).with_detail("modelFileName", model_file)
    }

    pub fn missing_component(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MissingComponent, message)
    }

    pub fn unsupported_model(model_file: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnsupportedModel, message).with_detail("modelFileName", model_file)
    }

    pub fn invalid_args(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgs, message)
    }

    pub fn invalid_auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidAuthConfig, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServiceUnavailable, message)
    }

    pub fn empty_result(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::EmptyResult, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_message_only() {
        let err = ComfyError::model_not_found("flux-dev", "Model not found: flux-dev");
        assert_eq!(err.to_string(), "Model not found: flux-dev");
    }

    #[test]
    fn with_detail_keeps_innermost_value() {
        let err = ComfyError::new(ErrorKind::ServiceUnavailable, "down")
            .with_detail("status", 503)
            .with_detail("status", 500);
        assert_eq!(err.detail("status"), Some(&Value::from(503)));
    }

    #[test]
    fn with_detail_never_changes_kind() {
        let err = ComfyError::missing_encoder("sd3.5_large.safetensors", "no encoders")
            .with_detail("modelId", "comfyui/stable-diffusion-35");
        assert!(err.is(ErrorKind::MissingEncoder));
        assert_eq!(
            err.detail("modelFileName"),
            Some(&Value::from("sd3.5_large.safetensors"))
        );
    }

    #[test]
    fn kind_serializes_as_label() {
        let json = serde_json::to_value(ErrorKind::EmptyResult).unwrap();
        assert_eq!(json, "EmptyResult");
        assert_eq!(ErrorKind::EmptyResult.to_string(), "EmptyResult");
    }
}
