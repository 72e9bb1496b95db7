//! The ComfyUI image provider.
//!
//! [`ComfyUIProvider`] is the entry point: it owns one shared
//! [`ClientService`] (TTL-cached listings over a [`ComfyBackend`]) and runs
//! `create_image` requests through the [`ImageService`]. Failures leave as
//! [`ProviderError`].

pub mod cache;
pub mod error_handler;
pub mod image;
pub mod resolver;
pub mod router;
pub mod service;
pub mod workflows;

use std::sync::Arc;
use std::time::Duration;

use comfybridge_comfyui::backend::{ComfyBackend, HttpBackend};
use comfybridge_core::config::{ComfyUIConfig, ComfyUIOptions};
use comfybridge_core::params::{CreateImagePayload, CreateImageResponse};
use comfybridge_core::registry::get_models_by_variant;
use comfybridge_core::registry::models::{
    CUSTOM_SD_MODEL_FILE, CUSTOM_SD_MODEL_IDS, MODEL_ID_VARIANTS,
};
use tokio_util::sync::CancellationToken;

use crate::error_handler::{ErrorHandler, ProviderError};
use crate::image::ImageService;
use crate::resolver::PROVIDER_PREFIX;
use crate::service::ClientService;

pub struct ComfyUIProvider<B = HttpBackend> {
    config: ComfyUIConfig,
    images: ImageService<B>,
}

impl ComfyUIProvider<HttpBackend> {
    /// Validate `options` and connect lazily to the server they name.
    ///
    /// Configuration problems (incomplete credentials, bad base URL) fail
    /// here, before any network call.
    pub fn new(options: &ComfyUIOptions) -> Result<Self, ProviderError> {
        let config = ComfyUIConfig::from_options(options).map_err(|e| ErrorHandler::handle(&e))?;
        Ok(Self::from_config(config))
    }

    pub fn from_config(config: ComfyUIConfig) -> Self {
        let backend = HttpBackend::new(&config);
        Self::with_backend(backend, config)
    }
}

impl<B: ComfyBackend> ComfyUIProvider<B> {
    pub fn with_backend(backend: B, config: ComfyUIConfig) -> Self {
        let service = Arc::new(ClientService::with_ttl(
            backend,
            Duration::from_secs(config.cache_ttl_secs),
        ));
        let images = ImageService::new(service, &config);
        tracing::debug!(
            base_url = %config.base_url,
            auth = config.auth_kind(),
            cache_ttl_secs = config.cache_ttl_secs,
            "ComfyUI provider created",
        );
        Self { config, images }
    }

    pub fn config(&self) -> &ComfyUIConfig {
        &self.config
    }

    pub fn service(&self) -> &ClientService<B> {
        self.images.service()
    }

    pub async fn create_image(
        &self,
        payload: CreateImagePayload,
    ) -> Result<CreateImageResponse, ProviderError> {
        self.create_image_with_cancel(payload, &CancellationToken::new())
            .await
    }

    /// Like [`create_image`](Self::create_image); cancelling `cancel`
    /// aborts the wait and removes the prompt from the server queue.
    pub async fn create_image_with_cancel(
        &self,
        payload: CreateImagePayload,
        cancel: &CancellationToken,
    ) -> Result<CreateImageResponse, ProviderError> {
        self.images
            .create_image(payload, cancel)
            .await
            .map_err(|e| ErrorHandler::handle(&e))
    }

    /// Logical model ids (`comfyui/...`) with at least one file on the
    /// server.
    pub async fn models(&self) -> Result<Vec<String>, ProviderError> {
        let live = self
            .service()
            .get_checkpoints()
            .await
            .map_err(|e| ErrorHandler::handle(&e))?;
        let is_live = |file: &str| live.iter().any(|f| f == file);

        let mut ids: Vec<String> = MODEL_ID_VARIANTS
            .iter()
            .filter(|(_, variant)| get_models_by_variant(variant).into_iter().any(is_live))
            .map(|(id, _)| format!("{PROVIDER_PREFIX}{id}"))
            .collect();
        if is_live(CUSTOM_SD_MODEL_FILE) {
            ids.extend(CUSTOM_SD_MODEL_IDS.iter().map(|id| format!("{PROVIDER_PREFIX}{id}")));
        }
        Ok(ids)
    }
}
