//! The SDK boundary the provider pipeline talks to.
//!
//! [`ComfyBackend`] is the complete set of server operations the pipeline
//! needs. [`HttpBackend`] implements it over the ComfyUI REST and
//! WebSocket APIs; tests substitute an in-memory fake.

use std::collections::BTreeMap;
use std::future::Future;

use comfybridge_core::config::ComfyUIConfig;
use comfybridge_core::prompt::PreparedWorkflow;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::api::{ComfyUIApi, ComfyUIApiError};
use crate::client::ComfyUIClient;
use crate::events::ProgressCallback;
use crate::executor::await_execution;

/// One produced image as reported in a node's `images` output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default = "default_folder_type")]
    pub folder_type: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

fn default_folder_type() -> String {
    "output".to_string()
}

/// Sampler and scheduler names the server accepts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplerInfo {
    pub sampler: Vec<String>,
    pub scheduler: Vec<String>,
}

/// Result of an input-image upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedImage {
    /// Name to reference in a `LoadImage` node.
    pub name: String,
}

/// Outputs of a finished prompt, keyed by node id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionOutput {
    pub prompt_id: String,
    pub outputs: BTreeMap<String, Value>,
}

/// Operations the pipeline performs against a ComfyUI server.
pub trait ComfyBackend: Send + Sync {
    /// Connectivity probe.
    fn system_stats(&self) -> impl Future<Output = Result<Value, ComfyUIApiError>> + Send;

    /// Model files loadable as checkpoints or diffusion models.
    fn get_checkpoints(&self) -> impl Future<Output = Result<Vec<String>, ComfyUIApiError>> + Send;

    fn get_loras(&self) -> impl Future<Output = Result<Vec<String>, ComfyUIApiError>> + Send;

    /// Node definitions, all of them or just `node_name`.
    fn get_node_defs(
        &self,
        node_name: Option<&str>,
    ) -> impl Future<Output = Result<Value, ComfyUIApiError>> + Send;

    fn get_sampler_info(&self) -> impl Future<Output = Result<SamplerInfo, ComfyUIApiError>> + Send;

    fn upload_image(
        &self,
        data: Vec<u8>,
        file_name: &str,
    ) -> impl Future<Output = Result<UploadedImage, ComfyUIApiError>> + Send;

    /// Submit `workflow` and wait for it to finish.
    fn run_workflow(
        &self,
        workflow: &PreparedWorkflow,
        on_progress: Option<&ProgressCallback>,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<ExecutionOutput, ComfyUIApiError>> + Send;

    /// Public URL of a produced image.
    fn get_path_image(&self, image: &ImageInfo) -> String;
}

/// Enumerated options of `input` on `node` in a node-definition map.
///
/// Understands both the legacy shape (`[[...options], {...}]`) and the
/// `COMBO` shape (`["COMBO", {"options": [...]}]`). Missing nodes or
/// inputs yield an empty list.
pub fn enum_options(node_defs: &Value, node: &str, input: &str) -> Vec<String> {
    let Some(inputs) = node_defs.get(node).and_then(|n| n.get("input")) else {
        return Vec::new();
    };
    let spec = inputs
        .get("required")
        .and_then(|r| r.get(input))
        .or_else(|| inputs.get("optional").and_then(|o| o.get(input)));
    let Some(spec) = spec else {
        return Vec::new();
    };

    let options = match spec.get(0) {
        Some(Value::Array(list)) => Some(list),
        Some(Value::String(kind)) if kind == "COMBO" => spec
            .get(1)
            .and_then(|meta| meta.get("options"))
            .and_then(Value::as_array),
        _ => None,
    };

    options
        .map(|list| {
            list.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// [`ComfyBackend`] over a live ComfyUI server.
#[derive(Clone)]
pub struct HttpBackend {
    api: ComfyUIApi,
    config: ComfyUIConfig,
}

impl HttpBackend {
    pub fn new(config: &ComfyUIConfig) -> Self {
        Self {
            api: ComfyUIApi::new(config),
            config: config.clone(),
        }
    }

    pub fn api(&self) -> &ComfyUIApi {
        &self.api
    }

    /// List a model folder, treating a 404 as "folder not present".
    async fn list_optional_folder(&self, folder: &str) -> Result<Vec<String>, ComfyUIApiError> {
        match self.api.list_models(folder).await {
            Ok(files) => Ok(files),
            Err(ComfyUIApiError::Status { status: 404, .. }) => {
                tracing::debug!(folder, "Model folder not available on server");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Best-effort removal of a prompt after the caller gave up on it.
    async fn abandon(&self, prompt_id: &str) {
        if let Err(e) = self.api.delete_from_queue(prompt_id).await {
            tracing::warn!(prompt_id, error = %e, "Failed to remove prompt from queue");
        }
        if let Err(e) = self.api.interrupt().await {
            tracing::warn!(prompt_id, error = %e, "Failed to interrupt execution");
        }
    }
}

impl ComfyBackend for HttpBackend {
    async fn system_stats(&self) -> Result<Value, ComfyUIApiError> {
        self.api.system_stats().await
    }

    async fn get_checkpoints(&self) -> Result<Vec<String>, ComfyUIApiError> {
        let mut files = self.api.list_models("checkpoints").await?;
        for file in self.list_optional_folder("diffusion_models").await? {
            if !files.contains(&file) {
                files.push(file);
            }
        }
        Ok(files)
    }

    async fn get_loras(&self) -> Result<Vec<String>, ComfyUIApiError> {
        self.list_optional_folder("loras").await
    }

    async fn get_node_defs(&self, node_name: Option<&str>) -> Result<Value, ComfyUIApiError> {
        self.api.object_info(node_name).await
    }

    async fn get_sampler_info(&self) -> Result<SamplerInfo, ComfyUIApiError> {
        let defs = self.api.object_info(Some("KSampler")).await?;
        Ok(SamplerInfo {
            sampler: enum_options(&defs, "KSampler", "sampler_name"),
            scheduler: enum_options(&defs, "KSampler", "scheduler"),
        })
    }

    async fn upload_image(
        &self,
        data: Vec<u8>,
        file_name: &str,
    ) -> Result<UploadedImage, ComfyUIApiError> {
        let response = self.api.upload_image(data, file_name).await?;
        let name = if response.subfolder.is_empty() {
            response.name
        } else {
            format!("{}/{}", response.subfolder, response.name)
        };
        tracing::info!(file_name = %name, "Uploaded input image");
        Ok(UploadedImage { name })
    }

    async fn run_workflow(
        &self,
        workflow: &PreparedWorkflow,
        on_progress: Option<&ProgressCallback>,
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutput, ComfyUIApiError> {
        let client = ComfyUIClient::new(&self.config.base_url, self.config.auth.clone());
        let mut connection = client.connect().await?;

        let body = serde_json::to_value(&workflow.workflow)
            .map_err(|e| ComfyUIApiError::MalformedResponse(format!("unserialisable workflow ({e})")))?;
        let submitted = self.api.queue_prompt(&body, &connection.client_id).await?;
        let prompt_id = submitted.prompt_id;
        tracing::info!(
            prompt_id = %prompt_id,
            queue_position = submitted.queue_number,
            nodes = workflow.workflow.len(),
            "Workflow submitted",
        );

        let outcome =
            match await_execution(&mut connection.ws_stream, &prompt_id, on_progress, cancel).await {
                Ok(outcome) => outcome,
                Err(e @ ComfyUIApiError::Cancelled(_)) => {
                    self.abandon(&prompt_id).await;
                    return Err(e);
                }
                Err(e) => return Err(e),
            };

        let history = self.api.history(&prompt_id).await?;
        let outputs = match history.get(&prompt_id).and_then(|h| h.get("outputs")) {
            Some(Value::Object(map)) => map.clone().into_iter().collect(),
            _ => {
                tracing::warn!(prompt_id = %prompt_id, "History has no outputs, using socket outputs");
                outcome.executed
            }
        };

        Ok(ExecutionOutput { prompt_id, outputs })
    }

    fn get_path_image(&self, image: &ImageInfo) -> String {
        self.api
            .view_url(&image.filename, &image.subfolder, &image.folder_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn enum_options_legacy_shape() {
        let defs = json!({
            "CheckpointLoaderSimple": {"input": {"required": {"ckpt_name": [["a.safetensors", "b.ckpt"], {}]}}}
        });
        assert_eq!(
            enum_options(&defs, "CheckpointLoaderSimple", "ckpt_name"),
            vec!["a.safetensors", "b.ckpt"]
        );
    }

    #[test]
    fn enum_options_combo_shape_and_optional_inputs() {
        let defs = json!({
            "VAELoader": {"input": {"optional": {"vae_name": ["COMBO", {"options": ["ae.safetensors"]}]}}}
        });
        assert_eq!(enum_options(&defs, "VAELoader", "vae_name"), vec!["ae.safetensors"]);
    }

    #[test]
    fn enum_options_missing_is_empty() {
        let defs = json!({"KSampler": {"input": {"required": {"seed": ["INT", {}]}}}});
        assert!(enum_options(&defs, "KSampler", "seed").is_empty());
        assert!(enum_options(&defs, "KSampler", "cfg").is_empty());
        assert!(enum_options(&defs, "CLIPLoader", "clip_name").is_empty());
    }

    #[test]
    fn image_info_defaults_to_output_folder() {
        let info: ImageInfo = serde_json::from_value(json!({"filename": "x.png"})).unwrap();
        assert_eq!(info.folder_type, "output");
        assert!(info.subfolder.is_empty());
        assert!(info.width.is_none());
    }

    #[test]
    fn path_image_uses_view_endpoint() {
        let config = ComfyUIConfig {
            base_url: "http://gpu:8188".into(),
            ..Default::default()
        };
        let backend = HttpBackend::new(&config);
        let url = backend.get_path_image(&ImageInfo {
            filename: "ComfyUI_0001_.png".into(),
            subfolder: "lobe".into(),
            folder_type: "output".into(),
            width: None,
            height: None,
        });
        assert_eq!(
            url,
            "http://gpu:8188/view?filename=ComfyUI_0001_.png&subfolder=lobe&type=output"
        );
    }
}
