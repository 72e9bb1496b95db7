//! Image Service: one `create_image` request end to end.
//!
//! validate arguments -> validate connection -> resolve model ->
//! (fetch + upload the image-to-image input) -> route + build workflow ->
//! execute -> first image -> response.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use comfybridge_comfyui::backend::ComfyBackend;
use comfybridge_comfyui::events::{ExecutionProgress, ProgressCallback};
use comfybridge_core::config::ComfyUIConfig;
use comfybridge_core::error::{ComfyError, ComfyResult, ErrorKind};
use comfybridge_core::params::{
    CreateImagePayload, CreateImageResponse, GenerationParams, DEFAULT_IMAGE_SIZE,
};
use reqwest::Url;
use tokio_util::sync::CancellationToken;

use crate::resolver::ModelResolver;
use crate::router::build_workflow;
use crate::service::ClientService;

/// Extension used for uploaded inputs whose URL has none.
const DEFAULT_IMAGE_EXTENSION: &str = "png";

pub struct ImageService<B> {
    service: Arc<ClientService<B>>,
    http: reqwest::Client,
    max_input_image_bytes: u64,
}

impl<B: ComfyBackend> ImageService<B> {
    pub fn new(service: Arc<ClientService<B>>, config: &ComfyUIConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            service,
            http,
            max_input_image_bytes: config.max_input_image_bytes,
        }
    }

    pub fn service(&self) -> &Arc<ClientService<B>> {
        &self.service
    }

    pub async fn create_image(
        &self,
        payload: CreateImagePayload,
        cancel: &CancellationToken,
    ) -> ComfyResult<CreateImageResponse> {
        let CreateImagePayload { model, mut params } = payload;
        validate_params(&model, &params)?;

        self.service.validate_connection().await?;

        // Memoised resolution lives for this request only; the listings
        // underneath are shared through the Client Service cache.
        let resolver = ModelResolver::new(Arc::clone(&self.service));
        let resolved = resolver.validate_model(&model).await?;
        let Some(file_name) = resolved.actual_file_name else {
            return Err(ComfyError::model_not_found(
                &model,
                format!("Model not found: {model}"),
            ));
        };

        if let Some(value) = params.input_image() {
            let uploaded = match input_image_source(value)? {
                InputImage::ServerLocal => None,
                InputImage::Remote(url) => {
                    let data = self.fetch_image(&url).await?;
                    Some(self.upload_input_image(data, &image_extension(&url), url.as_str()).await?)
                }
                InputImage::Inline { data, extension } => {
                    let source = format!("data:image/{extension}");
                    let bytes = data.len() as u64;
                    if bytes > self.max_input_image_bytes {
                        return Err(image_too_large(&source, bytes, self.max_input_image_bytes));
                    }
                    Some(self.upload_input_image(data, &extension, &source).await?)
                }
            };
            if let Some(file_name) = uploaded {
                params.set_input_image(file_name);
            }
        }

        let workflow = build_workflow(&model, &file_name, &params, &resolver)
            .await
            .map_err(|e| e.with_detail("modelId", model.as_str()))?;

        tracing::info!(
            model = %model,
            file_name = %file_name,
            nodes = workflow.workflow.len(),
            "Submitting workflow",
        );

        let on_progress: &ProgressCallback = &|p: &ExecutionProgress| {
            tracing::debug!(
                prompt_id = %p.prompt_id,
                node = ?p.node,
                value = p.value,
                max = p.max,
                percent = p.percent(),
                "Generation progress",
            );
        };
        let images = self
            .service
            .execute_workflow(&workflow, Some(on_progress), cancel)
            .await
            .map_err(|e| {
                e.with_detail("modelId", model.as_str())
                    .with_detail("modelFileName", file_name.as_str())
            })?;

        let Some(image) = images.first() else {
            return Err(ComfyError::empty_result("Workflow produced no images")
                .with_detail("modelId", model.as_str()));
        };

        let response = CreateImageResponse {
            image_url: self.service.get_path_image(image),
            width: image.width.or(params.width).unwrap_or(DEFAULT_IMAGE_SIZE),
            height: image.height.or(params.height).unwrap_or(DEFAULT_IMAGE_SIZE),
        };
        tracing::info!(
            model = %model,
            image_url = %response.image_url,
            width = response.width,
            height = response.height,
            "Image created",
        );
        Ok(response)
    }

    /// Upload under a fresh uuid name and return the server-side name.
    async fn upload_input_image(
        &self,
        data: Vec<u8>,
        extension: &str,
        source: &str,
    ) -> ComfyResult<String> {
        let file_name = format!("{}.{extension}", uuid::Uuid::new_v4());
        tracing::info!(source, bytes = data.len(), file_name = %file_name, "Uploading input image");
        self.service.upload_image(data, &file_name).await
    }

    /// Download `url`, refusing bodies above the configured limit.
    pub async fn fetch_image(&self, url: &Url) -> ComfyResult<Vec<u8>> {
        let fetch_failed = |message: String| {
            ComfyError::new(ErrorKind::ImageFetchFailed, message).with_detail("url", url.as_str())
        };
        let too_large = |bytes: u64| image_too_large(url.as_str(), bytes, self.max_input_image_bytes);

        let mut response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| fetch_failed(format!("Failed to fetch input image: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(fetch_failed(format!("Failed to fetch input image: HTTP {status}"))
                .with_detail("status", status.as_u16()));
        }
        if let Some(declared) = response.content_length() {
            if declared > self.max_input_image_bytes {
                return Err(too_large(declared));
            }
        }

        let mut data: Vec<u8> = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| fetch_failed(format!("Failed to read input image: {e}")))?
        {
            data.extend_from_slice(&chunk);
            if data.len() as u64 > self.max_input_image_bytes {
                return Err(too_large(data.len() as u64));
            }
        }

        if data.is_empty() {
            return Err(fetch_failed("Input image is empty".to_string()));
        }
        Ok(data)
    }
}

fn validate_params(model: &str, params: &GenerationParams) -> ComfyResult<()> {
    if model.trim().is_empty() {
        return Err(ComfyError::invalid_args("Model id is required"));
    }
    if params.prompt.trim().is_empty() && params.input_image().is_none() {
        return Err(ComfyError::invalid_args("Prompt is required").with_detail("modelId", model));
    }
    for (name, value) in [("width", params.width), ("height", params.height), ("steps", params.steps)] {
        if value == Some(0) {
            return Err(ComfyError::invalid_args(format!("{name} must be greater than 0"))
                .with_detail("modelId", model)
                .with_detail(name, 0));
        }
    }
    if let Some(strength) = params.strength {
        if !(0.0..=1.0).contains(&strength) {
            return Err(ComfyError::invalid_args("strength must be between 0 and 1")
                .with_detail("modelId", model)
                .with_detail("strength", strength));
        }
    }
    Ok(())
}

fn image_too_large(source: &str, bytes: u64, max_bytes: u64) -> ComfyError {
    ComfyError::new(
        ErrorKind::ImageTooLarge,
        format!("Input image exceeds the {max_bytes} byte limit"),
    )
    .with_detail("url", source)
    .with_detail("bytes", bytes)
    .with_detail("maxBytes", max_bytes)
}

/// Where the image-to-image input comes from.
#[derive(Debug, PartialEq)]
pub enum InputImage {
    /// No scheme: a file already in the server's input folder.
    ServerLocal,
    Remote(Url),
    /// Decoded `data:image/...;base64,` payload.
    Inline { data: Vec<u8>, extension: String },
}

/// Schemes other than `http`, `https` and `data` are rejected with
/// `ImageFetchFailed` instead of being handed to `LoadImage`.
pub fn input_image_source(value: &str) -> ComfyResult<InputImage> {
    let value = value.trim();
    let Ok(url) = Url::parse(value) else {
        return Ok(InputImage::ServerLocal);
    };
    match url.scheme() {
        "http" | "https" => Ok(InputImage::Remote(url)),
        "data" => decode_data_uri(value),
        scheme => Err(ComfyError::new(
            ErrorKind::ImageFetchFailed,
            format!("Unsupported input image scheme '{scheme}'"),
        )
        .with_detail("scheme", scheme)),
    }
}

fn decode_data_uri(value: &str) -> ComfyResult<InputImage> {
    let fail = |message: &str| {
        ComfyError::new(ErrorKind::ImageFetchFailed, format!("Invalid data URI: {message}"))
    };
    let rest = value.get("data:".len()..).unwrap_or_default();
    let (header, payload) = rest.split_once(',').ok_or_else(|| fail("missing ','"))?;

    let mut parts = header.split(';');
    let mime = parts.next().unwrap_or_default().to_ascii_lowercase();
    if !parts.any(|p| p.eq_ignore_ascii_case("base64")) {
        return Err(fail("only base64 payloads are supported"));
    }
    let subtype = match mime.as_str() {
        "" => DEFAULT_IMAGE_EXTENSION,
        m => m.strip_prefix("image/").ok_or_else(|| fail("not an image"))?,
    };

    let data = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| fail(&e.to_string()))?;
    if data.is_empty() {
        return Err(fail("empty payload"));
    }
    let extension = match subtype {
        "jpeg" => "jpg".to_string(),
        other => sanitize_extension(other),
    };
    Ok(InputImage::Inline { data, extension })
}

fn image_extension(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| sanitize_extension(ext))
        .unwrap_or_else(|| DEFAULT_IMAGE_EXTENSION.to_string())
}

fn sanitize_extension(ext: &str) -> String {
    let ext = ext.to_ascii_lowercase();
    if !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        ext
    } else {
        DEFAULT_IMAGE_EXTENSION.to_string()
    }
}
