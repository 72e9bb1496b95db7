//! Model and component resolution against the live server.
//!
//! The registries say which files *could* serve a logical model id or a
//! component slot; the resolver intersects that with what the server
//! reports and picks the lowest-priority live candidate. Results are
//! memoised for the lifetime of the resolver (no TTL here, the Client
//! Service already TTL-caches the listings underneath).

use std::collections::HashMap;
use std::sync::Arc;

use comfybridge_comfyui::backend::{enum_options, ComfyBackend};
use comfybridge_core::error::{ComfyError, ComfyResult, ErrorKind};
use comfybridge_core::registry::models::{
    all_variants, CUSTOM_SD_MODEL_FILE, CUSTOM_SD_MODEL_IDS, CUSTOM_SD_VAE_FILE,
};
use comfybridge_core::registry::{
    get_all_components_with_names, get_model_config, get_models_by_variant, variant_for_model_id,
    ComponentFilter, ModelFilters,
};
use comfybridge_core::types::{ComponentType, ModelFamily};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::service::ClientService;

/// Provider prefix stripped from logical ids.
pub const PROVIDER_PREFIX: &str = "comfyui/";

/// Loader inputs whose enumerations list the text encoders on the server.
const ENCODER_INPUTS: &[(&str, &str)] = &[
    ("CLIPLoader", "clip_name"),
    ("DualCLIPLoader", "clip_name1"),
    ("DualCLIPLoader", "clip_name2"),
    ("TripleCLIPLoader", "clip_name1"),
    ("TripleCLIPLoader", "clip_name2"),
    ("TripleCLIPLoader", "clip_name3"),
];

const VAE_INPUTS: &[(&str, &str)] = &[("VAELoader", "vae_name")];

/// Outcome of [`ModelResolver::validate_model`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedModel {
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_file_name: Option<String>,
}

/// Options of [`ModelResolver::select_vae`].
#[derive(Debug, Clone, Default)]
pub struct VaeOptions<'a> {
    pub model_file_name: &'a str,
    pub is_custom_sd: bool,
    /// Explicit VAE for custom SD checkpoints.
    pub custom_vae: Option<&'a str>,
}

pub struct ModelResolver<B> {
    service: Arc<ClientService<B>>,
    resolved: RwLock<HashMap<String, String>>,
    components: RwLock<HashMap<(ComponentType, ModelFamily), String>>,
    vaes: RwLock<HashMap<String, Option<String>>>,
}

/// Strip the provider prefix and surrounding whitespace.
pub fn normalize_model_id(model_id: &str) -> &str {
    let trimmed = model_id.trim();
    trimmed.strip_prefix(PROVIDER_PREFIX).unwrap_or(trimmed)
}

impl<B: ComfyBackend> ModelResolver<B> {
    pub fn new(service: Arc<ClientService<B>>) -> Self {
        Self {
            service,
            resolved: RwLock::new(HashMap::new()),
            components: RwLock::new(HashMap::new()),
            vaes: RwLock::new(HashMap::new()),
        }
    }

    pub fn service(&self) -> &ClientService<B> {
        &self.service
    }

    // -----------------------------------------------------------------------
    // Models
    // -----------------------------------------------------------------------

    /// Resolve a logical model id to a checkpoint file the server has.
    ///
    /// Tried in order:
    /// 1. the id is a live filename
    /// 2. the id is a registry filename: best live file of its variant
    /// 3. the id is in the logical id table: best live file of that variant
    /// 4. the id is a custom SD sentinel: the fixed custom file, if live
    /// 5. a registry variant name appears in the id (compatibility shim)
    pub async fn resolve_model_file_name(&self, model_id: &str) -> ComfyResult<String> {
        let id = normalize_model_id(model_id);
        if let Some(hit) = self.resolved.read().await.get(id) {
            return Ok(hit.clone());
        }

        let live = self
            .service
            .get_checkpoints()
            .await
            .map_err(|e| e.with_detail("modelId", id))?;
        let file = resolve_against(id, &live)?;

        tracing::debug!(model_id = %id, file_name = %file, "Resolved model file");
        self.resolved
            .write()
            .await
            .insert(id.to_string(), file.clone());
        Ok(file)
    }

    /// Like [`resolve_model_file_name`](Self::resolve_model_file_name), but
    /// an unknown model is `exists: false` instead of an error. Other
    /// failures (e.g. an unreachable server) are returned unchanged.
    pub async fn validate_model(&self, model_id: &str) -> ComfyResult<ResolvedModel> {
        match self.resolve_model_file_name(model_id).await {
            Ok(file) => Ok(ResolvedModel {
                exists: true,
                actual_file_name: Some(file),
            }),
            Err(e) if e.is(ErrorKind::ModelNotFound) => {
                tracing::debug!(model_id, reason = %e, "Model not available");
                Ok(ResolvedModel {
                    exists: false,
                    actual_file_name: None,
                })
            }
            Err(e) => Err(e),
        }
    }

    // -----------------------------------------------------------------------
    // Components
    // -----------------------------------------------------------------------

    /// Component files the server reports for loaders of `component_type`.
    async fn live_components(&self, component_type: ComponentType) -> ComfyResult<Vec<String>> {
        let defs = self.service.get_node_defs(None).await?;
        let inputs = if component_type.is_encoder() {
            ENCODER_INPUTS
        } else {
            VAE_INPUTS
        };
        let mut files: Vec<String> = Vec::new();
        for (node, input) in inputs {
            for file in enum_options(&defs, node, input) {
                if !files.contains(&file) {
                    files.push(file);
                }
            }
        }
        Ok(files)
    }

    /// Registry components of `component_type` (optionally scoped to a
    /// family) that the server has, lowest priority first.
    pub async fn get_available_components(
        &self,
        component_type: ComponentType,
        model_family: Option<ModelFamily>,
    ) -> ComfyResult<Vec<String>> {
        let live = self.live_components(component_type).await?;
        let mut candidates = get_all_components_with_names(&ComponentFilter {
            component_type,
            model_family,
        });
        candidates.retain(|c| live.iter().any(|f| f == c.name));
        candidates.sort_by_key(|c| c.config.priority);
        Ok(candidates.into_iter().map(|c| c.name.to_string()).collect())
    }

    /// Best live component for a slot.
    ///
    /// Fails with `MissingEncoder` for CLIP/T5 and `MissingComponent` for
    /// VAEs when nothing suitable is on the server.
    pub async fn get_optimal_component(
        &self,
        component_type: ComponentType,
        model_family: ModelFamily,
    ) -> ComfyResult<String> {
        let key = (component_type, model_family);
        if let Some(hit) = self.components.read().await.get(&key) {
            return Ok(hit.clone());
        }

        let available = self
            .get_available_components(component_type, Some(model_family))
            .await?;
        let Some(best) = available.into_iter().next() else {
            let expected: Vec<&str> = get_all_components_with_names(&ComponentFilter {
                component_type,
                model_family: Some(model_family),
            })
            .iter()
            .map(|c| c.name)
            .collect();
            let kind = if component_type.is_encoder() {
                ErrorKind::MissingEncoder
            } else {
                ErrorKind::MissingComponent
            };
            return Err(ComfyError::new(
                kind,
                format!(
                    "No {component_type} component for {model_family} models is available on the server"
                ),
            )
            .with_detail("componentType", component_type.as_str())
            .with_detail("modelFamily", model_family.as_str())
            .with_detail("expectedFiles", expected));
        };

        tracing::debug!(
            component_type = %component_type,
            model_family = %model_family,
            file_name = %best,
            "Selected component",
        );
        self.components.write().await.insert(key, best.clone());
        Ok(best)
    }

    /// External VAE for a checkpoint, or `None` to use the checkpoint's own.
    ///
    /// Only SD1/SDXL checkpoints and custom SD checkpoints ever get one.
    pub async fn select_vae(&self, options: &VaeOptions<'_>) -> ComfyResult<Option<String>> {
        let is_custom = options.is_custom_sd || options.model_file_name == CUSTOM_SD_MODEL_FILE;
        let key = format!(
            "{}|{}|{}",
            options.model_file_name,
            is_custom,
            options.custom_vae.unwrap_or_default()
        );
        if let Some(hit) = self.vaes.read().await.get(&key) {
            return Ok(hit.clone());
        }

        let selected = if is_custom {
            match options.custom_vae {
                Some(vae) => Some(vae.to_string()),
                None => {
                    let live = self.live_components(ComponentType::Vae).await?;
                    live.iter()
                        .any(|f| f == CUSTOM_SD_VAE_FILE)
                        .then(|| CUSTOM_SD_VAE_FILE.to_string())
                }
            }
        } else {
            let filters = ModelFilters {
                case_insensitive: true,
                ..Default::default()
            };
            match get_model_config(options.model_file_name, Some(&filters)) {
                Some(config) if config.model_family.attaches_external_vae() => self
                    .get_available_components(ComponentType::Vae, Some(config.model_family))
                    .await?
                    .into_iter()
                    .next(),
                _ => None,
            }
        };

        tracing::debug!(
            model_file_name = %options.model_file_name,
            vae = ?selected,
            "Selected VAE",
        );
        self.vaes.write().await.insert(key, selected.clone());
        Ok(selected)
    }

    /// Forget every memoised resolution.
    pub async fn clear_caches(&self) {
        self.resolved.write().await.clear();
        self.components.write().await.clear();
        self.vaes.write().await.clear();
    }
}

/// Pure resolution of a normalised id against a live checkpoint listing.
fn resolve_against(id: &str, live: &[String]) -> ComfyResult<String> {
    let is_live = |file: &str| live.iter().any(|f| f == file);
    let best_of = |variant: &str| {
        get_models_by_variant(variant)
            .into_iter()
            .find(|f| is_live(f))
            .map(str::to_string)
    };
    let variant_missing = |variant: &str| {
        ComfyError::model_not_found(
            id,
            format!("No file of model variant '{variant}' is available on the server"),
        )
        .with_detail("variant", variant)
        .with_detail("candidates", get_models_by_variant(variant))
    };

    if id.is_empty() {
        return Err(ComfyError::model_not_found(id, "Model id is empty"));
    }

    // Exact live filename.
    if is_live(id) {
        return Ok(id.to_string());
    }

    // Registry filename.
    if let Some(config) = get_model_config(id, None) {
        return best_of(config.variant).ok_or_else(|| variant_missing(config.variant));
    }

    // Logical id table.
    if let Some(variant) = variant_for_model_id(id) {
        return best_of(variant).ok_or_else(|| variant_missing(variant));
    }

    // Custom SD sentinel.
    if CUSTOM_SD_MODEL_IDS.contains(&id) {
        return if is_live(CUSTOM_SD_MODEL_FILE) {
            Ok(CUSTOM_SD_MODEL_FILE.to_string())
        } else {
            Err(ComfyError::model_not_found(
                id,
                format!(
                    "Custom SD model requires '{CUSTOM_SD_MODEL_FILE}' in the server's checkpoints folder"
                ),
            )
            .with_detail("expectedFile", CUSTOM_SD_MODEL_FILE))
        };
    }

    // Compatibility shim: variant name contained in the id, longest first
    // so "flux-dev" does not shadow a longer variant sharing its prefix.
    let mut variants = all_variants();
    variants.sort_by_key(|v| std::cmp::Reverse(v.len()));
    if let Some(variant) = variants.into_iter().find(|v| id.contains(v)) {
        if let Some(file) = best_of(variant) {
            tracing::warn!(
                model_id = %id,
                variant,
                file_name = %file,
                "Resolved model through fuzzy variant match",
            );
            return Ok(file);
        }
    }

    Err(ComfyError::model_not_found(id, format!("Model not found: {id}"))
        .with_detail("liveCheckpoints", live.len()))
}
