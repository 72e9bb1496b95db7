//! Workflow routing: filename -> architecture -> builder.
//!
//! Selection order for a detected file:
//! 1. the logical model id in the historical id table
//! 2. the registry variant of the file
//! 3. the default builder of the architecture

use comfybridge_comfyui::backend::ComfyBackend;
use comfybridge_core::error::{ComfyError, ComfyResult, ErrorKind};
use comfybridge_core::params::GenerationParams;
use comfybridge_core::prompt::{PreparedWorkflow, PromptBuilder};
use comfybridge_core::registry::models::{
    VARIANT_CUSTOM_SD, VARIANT_FLUX_DEV, VARIANT_FLUX_KONTEXT, VARIANT_FLUX_KREA,
    VARIANT_FLUX_SCHNELL, VARIANT_SD15, VARIANT_SD35, VARIANT_SD35_INCLCLIP, VARIANT_SDXL,
};
use comfybridge_core::registry::{get_model_config, ModelFilters};
use comfybridge_core::types::ModelFamily;
use serde::Serialize;

use crate::resolver::{normalize_model_id, ModelResolver};
use crate::workflows::flux::{build_flux_dev, build_flux_schnell};
use crate::workflows::flux_kontext::build_flux_kontext;
use crate::workflows::generic_sd::{build_generic_sd, GenericSdOptions};
use crate::workflows::sd35::build_sd35;

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    Flux,
    Sd1,
    Sdxl,
    Sd3,
    Unknown,
}

impl From<ModelFamily> for Architecture {
    fn from(family: ModelFamily) -> Self {
        match family {
            ModelFamily::Flux => Self::Flux,
            ModelFamily::Sd1 => Self::Sd1,
            ModelFamily::Sdxl => Self::Sdxl,
            ModelFamily::Sd3 => Self::Sd3,
        }
    }
}

impl Architecture {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Flux => "flux",
            Self::Sd1 => "sd1",
            Self::Sdxl => "sdxl",
            Self::Sd3 => "sd3",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Architecture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDetectionResult {
    pub architecture: Architecture,
    pub is_supported: bool,
    pub variant: Option<&'static str>,
    pub model_family: Option<ModelFamily>,
}

/// Detect the architecture of a checkpoint file from the registry.
pub fn detect(file_name: &str) -> WorkflowDetectionResult {
    let filters = ModelFilters {
        case_insensitive: true,
        ..Default::default()
    };
    match get_model_config(file_name, Some(&filters)) {
        Some(config) => WorkflowDetectionResult {
            architecture: config.model_family.into(),
            is_supported: true,
            variant: Some(config.variant),
            model_family: Some(config.model_family),
        },
        None => WorkflowDetectionResult {
            architecture: Architecture::Unknown,
            is_supported: false,
            variant: None,
            model_family: None,
        },
    }
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkflowKind {
    FluxDev,
    FluxSchnell,
    FluxKontext,
    /// Krea uses the Dev graph.
    FluxKrea,
    Sd35,
    GenericSd,
}

impl WorkflowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FluxDev => "flux-dev",
            Self::FluxSchnell => "flux-schnell",
            Self::FluxKontext => "flux-kontext",
            Self::FluxKrea => "flux-krea",
            Self::Sd35 => "sd35",
            Self::GenericSd => "generic-sd",
        }
    }
}

/// Historical logical ids pinned to a builder regardless of the file they
/// resolve to.
const LEGACY_MODEL_IDS: &[(&str, WorkflowKind)] = &[
    ("flux-schnell", WorkflowKind::FluxSchnell),
    ("flux-dev", WorkflowKind::FluxDev),
    ("flux-krea-dev", WorkflowKind::FluxKrea),
    ("flux-kontext-dev", WorkflowKind::FluxKontext),
    ("stable-diffusion-35", WorkflowKind::Sd35),
    ("stable-diffusion-35-inclclip", WorkflowKind::GenericSd),
];

const VARIANT_BUILDERS: &[(&str, WorkflowKind)] = &[
    (VARIANT_FLUX_DEV, WorkflowKind::FluxDev),
    (VARIANT_FLUX_SCHNELL, WorkflowKind::FluxSchnell),
    (VARIANT_FLUX_KONTEXT, WorkflowKind::FluxKontext),
    (VARIANT_FLUX_KREA, WorkflowKind::FluxKrea),
    (VARIANT_SD35, WorkflowKind::Sd35),
    (VARIANT_SD35_INCLCLIP, WorkflowKind::GenericSd),
    (VARIANT_SD15, WorkflowKind::GenericSd),
    (VARIANT_SDXL, WorkflowKind::GenericSd),
    (VARIANT_CUSTOM_SD, WorkflowKind::GenericSd),
];

fn lookup(table: &[(&str, WorkflowKind)], key: &str) -> Option<WorkflowKind> {
    table.iter().find(|(k, _)| *k == key).map(|(_, kind)| *kind)
}

fn architecture_default(architecture: Architecture) -> Option<WorkflowKind> {
    match architecture {
        Architecture::Flux => Some(WorkflowKind::FluxDev),
        Architecture::Sd1 | Architecture::Sdxl | Architecture::Sd3 => Some(WorkflowKind::GenericSd),
        Architecture::Unknown => None,
    }
}

/// Pick the builder for a detected file requested under `model_id`.
pub fn route(detection: &WorkflowDetectionResult, model_id: &str) -> ComfyResult<WorkflowKind> {
    let unsupported = || {
        ComfyError::new(
            ErrorKind::UnsupportedModel,
            format!("No workflow supports model '{model_id}'"),
        )
        .with_detail("modelId", model_id)
        .with_detail("architecture", detection.architecture.as_str())
    };
    if !detection.is_supported {
        return Err(unsupported());
    }

    let id = normalize_model_id(model_id);
    lookup(LEGACY_MODEL_IDS, id)
        .or_else(|| detection.variant.and_then(|v| lookup(VARIANT_BUILDERS, v)))
        .or_else(|| architecture_default(detection.architecture))
        .ok_or_else(unsupported)
}

/// Detect, route and build the workflow for a resolved checkpoint file.
pub async fn build_workflow<B: ComfyBackend>(
    model_id: &str,
    file_name: &str,
    params: &GenerationParams,
    resolver: &ModelResolver<B>,
) -> ComfyResult<PreparedWorkflow> {
    let detection = detect(file_name);
    if !detection.is_supported {
        return Err(ComfyError::unsupported_model(
            file_name,
            format!("Unrecognised model file '{file_name}'"),
        )
        .with_detail("modelId", model_id));
    }
    let kind = route(&detection, model_id).map_err(|e| e.with_detail("modelFileName", file_name))?;

    tracing::info!(
        model_id,
        file_name,
        architecture = %detection.architecture,
        workflow = kind.as_str(),
        "Routing workflow",
    );

    let builder: PromptBuilder = match kind {
        WorkflowKind::FluxDev | WorkflowKind::FluxKrea => {
            build_flux_dev(file_name, params, resolver).await?
        }
        WorkflowKind::FluxSchnell => build_flux_schnell(file_name, params, resolver).await?,
        WorkflowKind::FluxKontext => build_flux_kontext(file_name, params, resolver).await?,
        WorkflowKind::Sd35 => build_sd35(file_name, params, resolver).await?,
        WorkflowKind::GenericSd => {
            let options = GenericSdOptions {
                family: detection.model_family.unwrap_or(ModelFamily::Sdxl),
                is_custom_sd: detection.variant == Some(VARIANT_CUSTOM_SD),
                custom_vae: None,
            };
            build_generic_sd(file_name, params, resolver, options).await?
        }
    };

    builder.build().map_err(|e| {
        ComfyError::from(e)
            .with_detail("modelFileName", file_name)
            .with_detail("workflow", kind.as_str())
    })
}
