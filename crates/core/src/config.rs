//! Connection and authentication settings for a ComfyUI server.
//!
//! [`ComfyUIOptions`] is what callers hand over (all fields optional);
//! [`ComfyUIConfig::from_options`] validates it before any network call is
//! made, so incomplete credentials surface as `InvalidAuthConfig` rather
//! than as a confusing 401 later.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ComfyError;

/// Default server URL (ComfyUI desktop listens on port 8000).
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";

/// Default HTTP request timeout in seconds. Covers long generations.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;

/// Default TTL of the live-listing caches in seconds.
pub const DEFAULT_CACHE_TTL_SECS: u64 = 60;

/// Maximum size of a downloaded image-to-image input (30 MB).
pub const MAX_INPUT_IMAGE_BYTES: u64 = 30 * 1024 * 1024;

/// Raw, caller-supplied connection options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComfyUIOptions {
    #[serde(default, alias = "baseURL")]
    pub base_url: Option<String>,
    /// `none`, `basic`, `bearer` or `custom`.
    #[serde(default)]
    pub auth_type: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub custom_headers: Option<BTreeMap<String, String>>,
}

/// Validated authentication scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthConfig {
    None,
    Basic { username: String, password: String },
    Bearer { api_key: String },
    Custom { headers: BTreeMap<String, String> },
}

/// Validated configuration for one ComfyUI server.
#[derive(Debug, Clone)]
pub struct ComfyUIConfig {
    /// Base HTTP URL without trailing slash, e.g. `http://host:8188`.
    pub base_url: String,
    pub auth: AuthConfig,
    pub request_timeout_secs: u64,
    pub cache_ttl_secs: u64,
    pub max_input_image_bytes: u64,
}

impl Default for ComfyUIConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            auth: AuthConfig::None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            max_input_image_bytes: MAX_INPUT_IMAGE_BYTES,
        }
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl ComfyUIConfig {
    /// Validate caller options.
    ///
    /// - `basic` needs `username` and `password`
    /// - `bearer` needs `api_key`
    /// - `custom` needs at least one header
    /// - `base_url` must be `http://` or `https://`
    pub fn from_options(options: &ComfyUIOptions) -> Result<Self, ComfyError> {
        let base_url = non_blank(&options.base_url).unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let lower = base_url.to_ascii_lowercase();
        if !(lower.starts_with("http://") || lower.starts_with("https://")) {
            return Err(ComfyError::invalid_args(format!(
                "Invalid ComfyUI base URL '{base_url}': must start with http:// or https://"
            ))
            .with_detail("baseUrl", base_url));
        }

        let auth_type = non_blank(&options.auth_type).unwrap_or_else(|| "none".to_string());
        let auth = match auth_type.to_ascii_lowercase().as_str() {
            "none" => AuthConfig::None,
            "basic" => match (non_blank(&options.username), non_blank(&options.password)) {
                (Some(username), Some(password)) => AuthConfig::Basic { username, password },
                _ => {
                    return Err(ComfyError::invalid_auth(
                        "Basic authentication requires both username and password",
                    )
                    .with_detail("authType", "basic"))
                }
            },
            "bearer" => match non_blank(&options.api_key) {
                Some(api_key) => AuthConfig::Bearer { api_key },
                None => {
                    return Err(ComfyError::invalid_auth(
                        "Bearer authentication requires an API key",
                    )
                    .with_detail("authType", "bearer"))
                }
            },
            "custom" => match &options.custom_headers {
                Some(headers) if !headers.is_empty() => AuthConfig::Custom {
                    headers: headers.clone(),
                },
                _ => {
                    return Err(ComfyError::invalid_auth(
                        "Custom authentication requires at least one header",
                    )
                    .with_detail("authType", "custom"))
                }
            },
            other => {
                return Err(ComfyError::invalid_auth(format!(
                    "Unsupported authentication type '{other}'"
                ))
                .with_detail("authType", other))
            }
        };

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
            ..Self::default()
        })
    }

    /// Load configuration from environment variables.
    ///
    /// | Env Var                        | Default                 |
    /// |--------------------------------|-------------------------|
    /// | `COMFYUI_BASE_URL`             | `http://127.0.0.1:8000` |
    /// | `COMFYUI_AUTH_TYPE`            | `none`                  |
    /// | `COMFYUI_USERNAME`             | -                       |
    /// | `COMFYUI_PASSWORD`             | -                       |
    /// | `COMFYUI_API_KEY`              | -                       |
    /// | `COMFYUI_CUSTOM_HEADERS`       | - (`Name: value;Other: v`) |
    /// | `COMFYUI_REQUEST_TIMEOUT_SECS` | `300`                   |
    /// | `COMFYUI_CACHE_TTL_SECS`       | `60`                    |
    pub fn from_env() -> Result<Self, ComfyError> {
        let var = |name: &str| std::env::var(name).ok();

        let options = ComfyUIOptions {
            base_url: var("COMFYUI_BASE_URL"),
            auth_type: var("COMFYUI_AUTH_TYPE"),
            username: var("COMFYUI_USERNAME"),
            password: var("COMFYUI_PASSWORD"),
            api_key: var("COMFYUI_API_KEY"),
            custom_headers: var("COMFYUI_CUSTOM_HEADERS").map(|raw| parse_header_list(&raw)),
        };
        let mut config = Self::from_options(&options)?;

        config.request_timeout_secs =
            parse_secs("COMFYUI_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?;
        config.cache_ttl_secs = parse_secs("COMFYUI_CACHE_TTL_SECS", DEFAULT_CACHE_TTL_SECS)?;

        tracing::debug!(
            base_url = %config.base_url,
            auth = config.auth_kind(),
            "Loaded ComfyUI configuration",
        );
        Ok(config)
    }

    /// Short label of the auth scheme, safe to log.
    pub fn auth_kind(&self) -> &'static str {
        match self.auth {
            AuthConfig::None => "none",
            AuthConfig::Basic { .. } => "basic",
            AuthConfig::Bearer { .. } => "bearer",
            AuthConfig::Custom { .. } => "custom",
        }
    }
}

fn parse_secs(name: &str, default: u64) -> Result<u64, ComfyError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ComfyError::invalid_args(format!("{name} must be a valid u64"))),
        Err(_) => Ok(default),
    }
}

/// Parse `Name: value;Other: value` into a header map. Malformed pairs are
/// skipped.
pub fn parse_header_list(raw: &str) -> BTreeMap<String, String> {
    raw.split(';')
        .filter_map(|pair| {
            let (name, value) = pair.split_once(':')?;
            let name = name.trim();
            (!name.is_empty()).then(|| (name.to_string(), value.trim().to_string()))
        })
        .collect()
}
