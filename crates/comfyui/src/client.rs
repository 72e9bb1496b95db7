//! Progress socket for one ComfyUI server.
//!
//! A prompt only streams progress to the socket whose `clientId` it was
//! queued with, so each run opens its own [`ProgressSocket`] first and
//! passes the id along to `POST /prompt`.

use base64::Engine;
use comfybridge_core::config::AuthConfig;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub type ComfyWsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub struct ComfyUIClient {
    socket_base: String,
    auth: AuthConfig,
}

pub struct ProgressSocket {
    pub client_id: String,
    pub ws_stream: ComfyWsStream,
}

impl ComfyUIClient {
    /// `base_url` may use `http(s)://` or `ws(s)://`.
    pub fn new(base_url: &str, auth: AuthConfig) -> Self {
        Self {
            socket_base: ws_base_url(base_url),
            auth,
        }
    }

    pub fn socket_base(&self) -> &str {
        &self.socket_base
    }

    /// Handshake on `/ws` under a fresh v4 client id, with the configured
    /// credentials as headers.
    pub async fn connect(&self) -> Result<ProgressSocket, ComfyUIClientError> {
        let client_id = uuid::Uuid::new_v4().to_string();
        let mut request = format!("{}/ws?clientId={client_id}", self.socket_base)
            .into_client_request()
            .map_err(|e| {
                ComfyUIClientError::Handshake(format!("bad socket URL {}: {e}", self.socket_base))
            })?;

        for (name, value) in auth_headers(&self.auth) {
            let header = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ComfyUIClientError::BadHeader(format!("{name}: {e}")))?;
            let value = HeaderValue::from_str(&value)
                .map_err(|e| ComfyUIClientError::BadHeader(format!("{name}: {e}")))?;
            request.headers_mut().insert(header, value);
        }

        let (ws_stream, _) = connect_async(request).await.map_err(|e| {
            ComfyUIClientError::Handshake(format!("{}: {e}", self.socket_base))
        })?;
        tracing::info!(client_id = %client_id, url = %self.socket_base, "Progress socket open");

        Ok(ProgressSocket {
            client_id,
            ws_stream,
        })
    }
}

/// `http` to `ws`, `https` to `wss`; anything else is kept.
pub fn ws_base_url(base_url: &str) -> String {
    let trimmed = base_url.trim_end_matches('/');
    if let Some(rest) = trimmed.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = trimmed.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        trimmed.to_string()
    }
}

fn auth_headers(auth: &AuthConfig) -> Vec<(String, String)> {
    match auth {
        AuthConfig::None => Vec::new(),
        AuthConfig::Basic { username, password } => {
            let token = base64::engine::general_purpose::STANDARD
                .encode(format!("{username}:{password}"));
            vec![("Authorization".to_string(), format!("Basic {token}"))]
        }
        AuthConfig::Bearer { api_key } => {
            vec![("Authorization".to_string(), format!("Bearer {api_key}"))]
        }
        AuthConfig::Custom { headers } => headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ComfyUIClientError {
    #[error("WebSocket handshake failed: {0}")]
    Handshake(String),

    /// A configured auth header is not a legal HTTP header.
    #[error("Invalid handshake header {0}")]
    BadHeader(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn http_schemes_become_ws() {
        assert_eq!(ws_base_url("http://gpu:8188/"), "ws://gpu:8188");
        assert_eq!(ws_base_url("https://comfy.example.com"), "wss://comfy.example.com");
        assert_eq!(ws_base_url("ws://already:1"), "ws://already:1");
    }

    #[test]
    fn basic_auth_header_is_base64() {
        let headers = auth_headers(&AuthConfig::Basic {
            username: "admin".into(),
            password: "secret".into(),
        });
        assert_eq!(headers, vec![("Authorization".into(), "Basic YWRtaW46c2VjcmV0".into())]);
    }

    #[test]
    fn custom_headers_pass_through() {
        let mut map = BTreeMap::new();
        map.insert("X-Token".to_string(), "abc".to_string());
        let headers = auth_headers(&AuthConfig::Custom { headers: map });
        assert_eq!(headers, vec![("X-Token".into(), "abc".into())]);
        assert!(auth_headers(&AuthConfig::None).is_empty());
    }
}
