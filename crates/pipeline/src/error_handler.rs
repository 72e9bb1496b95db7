//! Top-level error mapping for callers of the provider.
//!
//! Maps the domain [`ErrorKind`] onto the caller-visible
//! [`RuntimeErrorType`] and wraps the result in a serialisable
//! [`ProviderError`]. Unclassified errors are classified here first.

use comfybridge_comfyui::classify::classify_error;
use comfybridge_core::error::{ComfyError, ErrorKind};
use serde::Serialize;
use serde_json::{Map, Value};

/// Provider name carried on every [`ProviderError`].
pub const PROVIDER: &str = "comfyui";

/// Error categories exposed to the surrounding application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RuntimeErrorType {
    ComfyUIServiceUnavailable,
    ComfyUIBizError,
    ComfyUIWorkflowError,
    ComfyUIModelError,
    ComfyUIEmptyResult,
    ComfyUIUploadFailed,
    #[serde(rename = "InvalidProviderAPIKey")]
    InvalidProviderApiKey,
    PermissionDenied,
    InvalidComfyUIArgs,
    ModelNotFound,
}

impl RuntimeErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ComfyUIServiceUnavailable => "ComfyUIServiceUnavailable",
            Self::ComfyUIBizError => "ComfyUIBizError",
            Self::ComfyUIWorkflowError => "ComfyUIWorkflowError",
            Self::ComfyUIModelError => "ComfyUIModelError",
            Self::ComfyUIEmptyResult => "ComfyUIEmptyResult",
            Self::ComfyUIUploadFailed => "ComfyUIUploadFailed",
            Self::InvalidProviderApiKey => "InvalidProviderAPIKey",
            Self::PermissionDenied => "PermissionDenied",
            Self::InvalidComfyUIArgs => "InvalidComfyUIArgs",
            Self::ModelNotFound => "ModelNotFound",
        }
    }
}

impl std::fmt::Display for RuntimeErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ErrorKind> for RuntimeErrorType {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::ServiceUnavailable => Self::ComfyUIServiceUnavailable,
            ErrorKind::InvalidApiKey => Self::InvalidProviderApiKey,
            ErrorKind::PermissionDenied => Self::PermissionDenied,
            ErrorKind::InvalidArgs | ErrorKind::InvalidAuthConfig | ErrorKind::ImageTooLarge => {
                Self::InvalidComfyUIArgs
            }
            ErrorKind::ModelNotFound => Self::ModelNotFound,
            ErrorKind::MissingComponent | ErrorKind::MissingEncoder | ErrorKind::UnsupportedModel => {
                Self::ComfyUIModelError
            }
            ErrorKind::EmptyResult => Self::ComfyUIEmptyResult,
            ErrorKind::WorkflowExecutionFailed => Self::ComfyUIWorkflowError,
            ErrorKind::UploadFailed => Self::ComfyUIUploadFailed,
            ErrorKind::ImageFetchFailed | ErrorKind::UnknownError => Self::ComfyUIBizError,
        }
    }
}

/// Body of a [`ProviderError`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    pub message: String,
    pub kind: ErrorKind,
    pub details: Map<String, Value>,
}

/// The error value returned by the provider facade.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("{error_type}: {}", .error.message)]
pub struct ProviderError {
    pub error_type: RuntimeErrorType,
    pub provider: &'static str,
    pub error: ErrorBody,
}

impl ProviderError {
    pub fn kind(&self) -> ErrorKind {
        self.error.kind
    }
}

impl From<ComfyError> for ProviderError {
    fn from(err: ComfyError) -> Self {
        ErrorHandler::handle(&err)
    }
}

/// Final mapping of request failures.
pub struct ErrorHandler;

impl ErrorHandler {
    /// Map a classified error. The kind is never changed.
    pub fn handle(err: &ComfyError) -> ProviderError {
        let error_type = RuntimeErrorType::from(err.kind);
        if is_caller_error(err.kind) {
            tracing::warn!(
                kind = %err.kind,
                error_type = %error_type,
                error = %err.message,
                "ComfyUI request rejected",
            );
        } else {
            tracing::error!(
                kind = %err.kind,
                error_type = %error_type,
                error = %err.message,
                details = %serde_json::Value::Object(err.details.clone()),
                "ComfyUI request failed",
            );
        }

        ProviderError {
            error_type,
            provider: PROVIDER,
            error: ErrorBody {
                message: err.message.clone(),
                kind: err.kind,
                details: err.details.clone(),
            },
        }
    }

    /// Classify (if needed) and map any error.
    pub fn handle_any(err: &(dyn std::error::Error + 'static)) -> ProviderError {
        Self::handle(&classify_error(err))
    }
}

/// Kinds caused by the request or configuration rather than the server.
fn is_caller_error(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::ModelNotFound
            | ErrorKind::InvalidArgs
            | ErrorKind::InvalidAuthConfig
            | ErrorKind::InvalidApiKey
            | ErrorKind::PermissionDenied
            | ErrorKind::ImageTooLarge
            | ErrorKind::UnsupportedModel
    )
}
