//! Typed wrappers over the ComfyUI HTTP routes.
//!
//! One [`ComfyUIApi`] talks to one server. Every request goes through
//! [`ComfyUIApi::authorize`], so the credentials from [`ComfyUIConfig`]
//! reach listings, uploads and queue control alike.

use std::time::Duration;

use comfybridge_core::config::{AuthConfig, ComfyUIConfig};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Clone)]
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
    auth: AuthConfig,
}

/// Body of a successful `POST /prompt`.
#[derive(Debug, Deserialize)]
pub struct QueuedPrompt {
    pub prompt_id: String,
    #[serde(default, rename = "number")]
    pub queue_number: i64,
    #[serde(default)]
    pub node_errors: Value,
}

/// Body of `POST /upload/image`. The server may rename the file.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadResponse {
    pub name: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(default, rename = "type")]
    pub folder_type: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// Transport failure: refused connection, DNS, TLS, timeout.
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("ComfyUI responded {status}: {body}")]
    Status { status: u16, body: String },

    #[error(transparent)]
    Client(#[from] crate::client::ComfyUIClientError),

    /// The socket dropped or the server ended the run early.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Execution failed at node {node_id} ({exception_type}): {message}")]
    Execution {
        prompt_id: String,
        node_id: String,
        node_type: Option<String>,
        exception_type: String,
        message: String,
    },

    #[error("Malformed response from ComfyUI: {0}")]
    MalformedResponse(String),

    #[error("Execution of prompt {0} was cancelled")]
    Cancelled(String),
}

impl ComfyUIApi {
    pub fn new(config: &ComfyUIConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self::with_client(client, config)
    }

    pub fn with_client(client: reqwest::Client, config: &ComfyUIConfig) -> Self {
        Self {
            client,
            api_url: config.base_url.trim_end_matches('/').to_string(),
            auth: config.auth.clone(),
        }
    }

    /// Server root without a trailing slash.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    pub fn auth(&self) -> &AuthConfig {
        &self.auth
    }

    /// Shared client; carries the configured request timeout.
    pub fn http(&self) -> &reqwest::Client {
        &self.client
    }

    /// `GET /system_stats`. Doubles as the reachability probe.
    pub async fn system_stats(&self) -> Result<Value, ComfyUIApiError> {
        read_json(self.get("/system_stats").send().await?).await
    }

    /// `GET /models/{folder}` (`checkpoints`, `diffusion_models`, `loras`...).
    pub async fn list_models(&self, folder: &str) -> Result<Vec<String>, ComfyUIApiError> {
        read_json(self.get(&format!("/models/{folder}")).send().await?).await
    }

    /// `GET /object_info`, or a single node class when `node_name` is set.
    pub async fn object_info(&self, node_name: Option<&str>) -> Result<Value, ComfyUIApiError> {
        let path = node_name.map_or_else(|| "/object_info".to_string(), |n| format!("/object_info/{n}"));
        let defs: Value = read_json(self.get(&path).send().await?).await?;
        if defs.is_object() {
            Ok(defs)
        } else {
            Err(ComfyUIApiError::MalformedResponse(format!(
                "object_info returned {} instead of an object",
                type_name(&defs)
            )))
        }
    }

    /// Multipart upload into the server's `input/` folder, overwriting.
    pub async fn upload_image(
        &self,
        data: Vec<u8>,
        file_name: &str,
    ) -> Result<UploadResponse, ComfyUIApiError> {
        let form = reqwest::multipart::Form::new()
            .part(
                "image",
                reqwest::multipart::Part::bytes(data).file_name(file_name.to_string()),
            )
            .text("overwrite", "true");
        read_json(self.post("/upload/image").multipart(form).send().await?).await
    }

    /// `POST /prompt`. Progress frames for the run are routed to the socket
    /// registered under `client_id`.
    pub async fn queue_prompt(
        &self,
        workflow: &Value,
        client_id: &str,
    ) -> Result<QueuedPrompt, ComfyUIApiError> {
        let body = json!({ "prompt": workflow, "client_id": client_id });
        read_json(self.post("/prompt").json(&body).send().await?).await
    }

    /// Drop a prompt that has not started yet (`POST /queue`).
    pub async fn delete_from_queue(&self, prompt_id: &str) -> Result<(), ComfyUIApiError> {
        let body = json!({ "delete": [prompt_id] });
        expect_success(self.post("/queue").json(&body).send().await?).await
    }

    /// Stops whatever the server is running now, whichever prompt it is.
    pub async fn interrupt(&self) -> Result<(), ComfyUIApiError> {
        expect_success(self.post("/interrupt").send().await?).await
    }

    /// `GET /history/{prompt_id}`: outputs per node once the run finished.
    pub async fn history(&self, prompt_id: &str) -> Result<Value, ComfyUIApiError> {
        read_json(self.get(&format!("/history/{prompt_id}")).send().await?).await
    }

    /// `/view` link for a produced file, query-encoded.
    pub fn view_url(&self, file_name: &str, subfolder: &str, folder_type: &str) -> String {
        match reqwest::Url::parse(&format!("{}/view", self.api_url)) {
            Ok(mut url) => {
                url.query_pairs_mut()
                    .append_pair("filename", file_name)
                    .append_pair("subfolder", subfolder)
                    .append_pair("type", folder_type);
                url.to_string()
            }
            Err(_) => format!(
                "{}/view?filename={file_name}&subfolder={subfolder}&type={folder_type}",
                self.api_url
            ),
        }
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.authorize(self.client.get(format!("{}{path}", self.api_url)))
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.authorize(self.client.post(format!("{}{path}", self.api_url)))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            AuthConfig::None => request,
            AuthConfig::Basic { username, password } => request.basic_auth(username, Some(password)),
            AuthConfig::Bearer { api_key } => request.bearer_auth(api_key),
            AuthConfig::Custom { headers } => headers
                .iter()
                .fold(request, |req, (name, value)| req.header(name.as_str(), value.as_str())),
        }
    }
}

/// Non-2xx becomes [`ComfyUIApiError::Status`] with whatever body we could read.
async fn reject_failure(response: Response) -> Result<Response, ComfyUIApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = match response.text().await {
        Ok(text) => text,
        Err(_) => "<unreadable body>".to_string(),
    };
    Err(ComfyUIApiError::Status {
        status: status.as_u16(),
        body,
    })
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ComfyUIApiError> {
    let text = reject_failure(response).await?.text().await?;
    serde_json::from_str(&text)
        .map_err(|e| ComfyUIApiError::MalformedResponse(format!("invalid JSON body ({e})")))
}

async fn expect_success(response: Response) -> Result<(), ComfyUIApiError> {
    reject_failure(response).await.map(drop)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(base: &str) -> ComfyUIApi {
        ComfyUIApi::new(&ComfyUIConfig {
            base_url: base.to_string(),
            ..Default::default()
        })
    }

    #[test]
    fn view_url_is_query_encoded_and_slash_trimmed() {
        let api = api("http://gpu:8188/");
        assert_eq!(api.api_url(), "http://gpu:8188");
        assert_eq!(
            api.view_url("out 1.png", "", "output"),
            "http://gpu:8188/view?filename=out+1.png&subfolder=&type=output"
        );
    }

    #[test]
    fn response_bodies_tolerate_missing_fields() {
        let upload: UploadResponse = serde_json::from_str(r#"{"name":"in.png"}"#).unwrap();
        assert_eq!(upload.name, "in.png");
        assert!(upload.subfolder.is_empty());

        let queued: QueuedPrompt = serde_json::from_str(r#"{"prompt_id":"p-1"}"#).unwrap();
        assert_eq!(queued.prompt_id, "p-1");
        assert_eq!(queued.queue_number, 0);
    }

    #[test]
    fn status_error_shows_code_and_body() {
        let err = ComfyUIApiError::Status {
            status: 503,
            body: "busy".into(),
        };
        assert_eq!(err.to_string(), "ComfyUI responded 503: busy");
    }
}
