//! Client Service: the cached, error-classifying wrapper over a
//! [`ComfyBackend`].
//!
//! Live listings (checkpoints, LoRAs, node definitions, sampler info) are
//! cached for the configured TTL. Uploads and executions are never cached.
//! Every SDK failure leaves this module as a classified [`ComfyError`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use comfybridge_comfyui::backend::{ComfyBackend, ImageInfo, SamplerInfo};
use comfybridge_comfyui::classify::classify_api_error;
use comfybridge_comfyui::events::ProgressCallback;
use comfybridge_core::config::DEFAULT_CACHE_TTL_SECS;
use comfybridge_core::error::{ComfyError, ComfyResult, ErrorKind};
use comfybridge_core::prompt::PreparedWorkflow;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::cache::TtlCache;

/// Cache key for node definitions when no node name is given.
const ALL_NODES: &str = "*";

pub struct ClientService<B> {
    backend: B,
    ttl: Duration,
    checkpoints: TtlCache<(), Vec<String>>,
    loras: TtlCache<(), Vec<String>>,
    node_defs: TtlCache<String, Value>,
    sampler_info: TtlCache<(), SamplerInfo>,
    connection_validated: AtomicBool,
}

impl<B: ComfyBackend> ClientService<B> {
    pub fn new(backend: B) -> Self {
        Self::with_ttl(backend, Duration::from_secs(DEFAULT_CACHE_TTL_SECS))
    }

    pub fn with_ttl(backend: B, ttl: Duration) -> Self {
        Self {
            backend,
            ttl,
            checkpoints: TtlCache::new(),
            loras: TtlCache::new(),
            node_defs: TtlCache::new(),
            sampler_info: TtlCache::new(),
            connection_validated: AtomicBool::new(false),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Probe the server once. Later calls succeed without a round-trip.
    pub async fn validate_connection(&self) -> ComfyResult<()> {
        if self.connection_validated.load(Ordering::Acquire) {
            return Ok(());
        }
        self.backend
            .system_stats()
            .await
            .map_err(|e| classify_api_error(&e))?;
        self.connection_validated.store(true, Ordering::Release);
        tracing::info!("ComfyUI connection validated");
        Ok(())
    }

    pub fn is_connection_validated(&self) -> bool {
        self.connection_validated.load(Ordering::Acquire)
    }

    pub async fn get_checkpoints(&self) -> ComfyResult<Vec<String>> {
        self.checkpoints
            .get_or_fetch(&(), self.ttl, || async {
                let files = self
                    .backend
                    .get_checkpoints()
                    .await
                    .map_err(|e| classify_api_error(&e))?;
                tracing::debug!(count = files.len(), "Fetched checkpoint listing");
                Ok(files)
            })
            .await
    }

    pub async fn get_loras(&self) -> ComfyResult<Vec<String>> {
        self.loras
            .get_or_fetch(&(), self.ttl, || async {
                self.backend
                    .get_loras()
                    .await
                    .map_err(|e| classify_api_error(&e))
            })
            .await
    }

    /// Node definitions, all of them or only `node_name`.
    pub async fn get_node_defs(&self, node_name: Option<&str>) -> ComfyResult<Value> {
        let key = node_name.unwrap_or(ALL_NODES).to_string();
        self.node_defs
            .get_or_fetch(&key, self.ttl, || async {
                let defs = self
                    .backend
                    .get_node_defs(node_name)
                    .await
                    .map_err(|e| classify_api_error(&e))?;
                tracing::debug!(node = %key, "Fetched node definitions");
                Ok(defs)
            })
            .await
    }

    pub async fn get_sampler_info(&self) -> ComfyResult<SamplerInfo> {
        self.sampler_info
            .get_or_fetch(&(), self.ttl, || async {
                self.backend
                    .get_sampler_info()
                    .await
                    .map_err(|e| classify_api_error(&e))
            })
            .await
    }

    /// Upload an input image and return the server-side name.
    ///
    /// Credential failures keep their kind; anything else is `UploadFailed`
    /// with the underlying kind recorded under `cause`.
    pub async fn upload_image(&self, data: Vec<u8>, file_name: &str) -> ComfyResult<String> {
        let size = data.len();
        match self.backend.upload_image(data, file_name).await {
            Ok(uploaded) => Ok(uploaded.name),
            Err(e) => {
                let classified = classify_api_error(&e);
                let err = match classified.kind {
                    ErrorKind::InvalidApiKey | ErrorKind::PermissionDenied => classified,
                    cause => ComfyError {
                        kind: ErrorKind::UploadFailed,
                        message: format!("Failed to upload input image: {}", classified.message),
                        details: classified.details,
                    }
                    .with_detail("cause", cause.as_str()),
                };
                Err(err.with_detail("fileName", file_name).with_detail("bytes", size))
            }
        }
    }

    /// Run a prepared workflow and return the images of its output node.
    ///
    /// Fails with `EmptyResult` when the output node produced no images or
    /// an `images` value of an unexpected shape.
    pub async fn execute_workflow(
        &self,
        workflow: &PreparedWorkflow,
        on_progress: Option<&ProgressCallback>,
        cancel: &CancellationToken,
    ) -> ComfyResult<Vec<ImageInfo>> {
        let output = self
            .backend
            .run_workflow(workflow, on_progress, cancel)
            .await
            .map_err(|e| classify_api_error(&e))?;

        let images = output
            .outputs
            .get(&workflow.output_node)
            .and_then(|node| node.get("images"))
            .ok_or_else(|| {
                ComfyError::empty_result("Workflow finished without an images output")
                    .with_detail("promptId", output.prompt_id.as_str())
                    .with_detail("outputNode", workflow.output_node.as_str())
            })?;

        let images: Vec<ImageInfo> = serde_json::from_value(images.clone()).map_err(|e| {
            ComfyError::empty_result("Workflow returned an unrecognised images payload")
                .with_detail("promptId", output.prompt_id.as_str())
                .with_detail("parseError", e.to_string())
        })?;

        if images.is_empty() {
            return Err(ComfyError::empty_result("Workflow produced no images")
                .with_detail("promptId", output.prompt_id.as_str()));
        }

        tracing::info!(
            prompt_id = %output.prompt_id,
            images = images.len(),
            "Workflow execution finished",
        );
        Ok(images)
    }

    pub fn get_path_image(&self, image: &ImageInfo) -> String {
        self.backend.get_path_image(image)
    }

    /// Drop every cached listing and forget connection validation.
    pub async fn clear_caches(&self) {
        self.checkpoints.clear().await;
        self.loras.clear().await;
        self.node_defs.clear().await;
        self.sampler_info.clear().await;
        self.connection_validated.store(false, Ordering::Release);
    }
}
