//! Static table of known checkpoint files.
//!
//! Each filename maps to exactly one [`ModelConfig`]. Files sharing a
//! `variant` are interchangeable for the same logical model (different
//! quantisations of FLUX-Dev, for example); `priority` orders them, lower
//! first.

use serde::Serialize;

use crate::types::{ModelFamily, WeightDtype};

// ---------------------------------------------------------------------------
// Variants
// ---------------------------------------------------------------------------

pub const VARIANT_FLUX_DEV: &str = "flux-dev";
pub const VARIANT_FLUX_SCHNELL: &str = "flux-schnell";
pub const VARIANT_FLUX_KONTEXT: &str = "flux-kontext";
pub const VARIANT_FLUX_KREA: &str = "flux-krea";
/// SD3.5 checkpoints shipped without text encoders.
pub const VARIANT_SD35: &str = "sd35";
/// SD3.5 checkpoints with CLIP/T5 baked in (loadable by `CheckpointLoaderSimple`).
pub const VARIANT_SD35_INCLCLIP: &str = "sd35-inclclip";
pub const VARIANT_SD15: &str = "sd15";
pub const VARIANT_SDXL: &str = "sdxl";
/// User-supplied checkpoint placed under the fixed custom filename.
pub const VARIANT_CUSTOM_SD: &str = "custom-sd";

// ---------------------------------------------------------------------------
// Custom SD convention
// ---------------------------------------------------------------------------

/// Checkpoint filename users must give their own SD model.
pub const CUSTOM_SD_MODEL_FILE: &str = "custom_sd_lobe.safetensors";

/// Optional VAE filename paired with [`CUSTOM_SD_MODEL_FILE`].
pub const CUSTOM_SD_VAE_FILE: &str = "custom_sd_vae_lobe.safetensors";

// ---------------------------------------------------------------------------
// Data structures
// ---------------------------------------------------------------------------

/// Registry metadata for one checkpoint file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
    pub model_family: ModelFamily,
    pub variant: &'static str,
    /// Lower is preferred within a variant.
    pub priority: u32,
    /// `weight_dtype` to pass to `UNETLoader`, when the file needs one.
    pub recommended_dtype: Option<WeightDtype>,
}

/// A registry row: filename plus its config.
#[derive(Debug, Clone, Copy)]
pub struct ModelEntry {
    pub file_name: &'static str,
    pub config: ModelConfig,
}

const fn entry(
    file_name: &'static str,
    model_family: ModelFamily,
    variant: &'static str,
    priority: u32,
    recommended_dtype: Option<WeightDtype>,
) -> ModelEntry {
    ModelEntry {
        file_name,
        config: ModelConfig {
            model_family,
            variant,
            priority,
            recommended_dtype,
        },
    }
}

use ModelFamily::{Flux, Sd1, Sd3, Sdxl};

/// Every checkpoint the provider knows how to drive.
///
/// Declaration order is the tiebreak for equal priorities.
pub const MODEL_REGISTRY: &[ModelEntry] = &[
    // FLUX.1 dev
    entry("flux1-dev.safetensors", Flux, VARIANT_FLUX_DEV, 1, Some(WeightDtype::Default)),
    entry("flux1-dev-fp8.safetensors", Flux, VARIANT_FLUX_DEV, 2, Some(WeightDtype::Fp8E4m3fn)),
    entry("flux1-dev-fp8-e4m3fn.safetensors", Flux, VARIANT_FLUX_DEV, 3, Some(WeightDtype::Fp8E4m3fn)),
    entry("flux1-dev-fp8-e5m2.safetensors", Flux, VARIANT_FLUX_DEV, 4, Some(WeightDtype::Fp8E5m2)),
    // FLUX.1 schnell
    entry("flux1-schnell.safetensors", Flux, VARIANT_FLUX_SCHNELL, 1, Some(WeightDtype::Default)),
    entry("flux1-schnell-fp8.safetensors", Flux, VARIANT_FLUX_SCHNELL, 2, Some(WeightDtype::Fp8E4m3fn)),
    entry("flux1-schnell-fp8-e4m3fn.safetensors", Flux, VARIANT_FLUX_SCHNELL, 3, Some(WeightDtype::Fp8E4m3fn)),
    // FLUX.1 Kontext dev
    entry("flux1-kontext-dev.safetensors", Flux, VARIANT_FLUX_KONTEXT, 1, Some(WeightDtype::Default)),
    entry("flux1-dev-kontext_fp8_scaled.safetensors", Flux, VARIANT_FLUX_KONTEXT, 2, Some(WeightDtype::Fp8E4m3fn)),
    // FLUX.1 Krea dev
    entry("flux1-krea-dev.safetensors", Flux, VARIANT_FLUX_KREA, 1, Some(WeightDtype::Default)),
    entry("flux1-krea-dev_fp8_scaled.safetensors", Flux, VARIANT_FLUX_KREA, 2, Some(WeightDtype::Fp8E4m3fn)),
    // SD3.5 without encoders
    entry("sd3.5_large.safetensors", Sd3, VARIANT_SD35, 1, None),
    entry("sd3.5_medium.safetensors", Sd3, VARIANT_SD35, 2, None),
    // SD3.5 with encoders baked in
    entry("sd3.5_large_fp8_scaled.safetensors", Sd3, VARIANT_SD35_INCLCLIP, 1, None),
    entry("sd3.5_medium_incl_clips_t5xxlfp8scaled.safetensors", Sd3, VARIANT_SD35_INCLCLIP, 2, None),
    // SD 1.5
    entry("v1-5-pruned-emaonly.safetensors", Sd1, VARIANT_SD15, 1, None),
    entry("v1-5-pruned-emaonly-fp16.safetensors", Sd1, VARIANT_SD15, 2, None),
    entry("v1-5-pruned.safetensors", Sd1, VARIANT_SD15, 3, None),
    // SDXL
    entry("sd_xl_base_1.0.safetensors", Sdxl, VARIANT_SDXL, 1, None),
    entry("sd_xl_base_1.0_0.9vae.safetensors", Sdxl, VARIANT_SDXL, 2, None),
    // Custom
    entry(CUSTOM_SD_MODEL_FILE, Sdxl, VARIANT_CUSTOM_SD, 1, None),
];

/// Logical model ids (without the `comfyui/` provider prefix) and the
/// variant each one stands for.
pub const MODEL_ID_VARIANTS: &[(&str, &str)] = &[
    ("flux-schnell", VARIANT_FLUX_SCHNELL),
    ("flux-dev", VARIANT_FLUX_DEV),
    ("flux-krea-dev", VARIANT_FLUX_KREA),
    ("flux-kontext-dev", VARIANT_FLUX_KONTEXT),
    ("stable-diffusion-35", VARIANT_SD35),
    ("stable-diffusion-35-inclclip", VARIANT_SD35_INCLCLIP),
    ("stable-diffusion-15", VARIANT_SD15),
    ("stable-diffusion-xl", VARIANT_SDXL),
];

/// Logical ids that always resolve to [`CUSTOM_SD_MODEL_FILE`].
pub const CUSTOM_SD_MODEL_IDS: &[&str] =
    &["stable-diffusion-custom", "stable-diffusion-custom-refiner"];

// ---------------------------------------------------------------------------
// Lookups
// ---------------------------------------------------------------------------

/// Optional constraints for [`get_model_config`].
#[derive(Debug, Clone, Default)]
pub struct ModelFilters<'a> {
    pub variant: Option<&'a str>,
    pub priority: Option<u32>,
    pub model_family: Option<ModelFamily>,
    pub recommended_dtype: Option<WeightDtype>,
    /// Retry with a case-insensitive filename comparison on a miss.
    pub case_insensitive: bool,
}

impl ModelFilters<'_> {
    fn accepts(&self, config: &ModelConfig) -> bool {
        self.variant.is_none_or(|v| v == config.variant)
            && self.priority.is_none_or(|p| p == config.priority)
            && self.model_family.is_none_or(|f| f == config.model_family)
            && self
                .recommended_dtype
                .is_none_or(|d| Some(d) == config.recommended_dtype)
    }
}

/// Look up the config of a checkpoint file.
///
/// Returns `None` when the file is unknown, or when it is known but does not
/// satisfy every given filter.
pub fn get_model_config(
    file_name: &str,
    filters: Option<&ModelFilters<'_>>,
) -> Option<&'static ModelConfig> {
    let exact = MODEL_REGISTRY.iter().find(|e| e.file_name == file_name);
    let found = match (exact, filters) {
        (Some(e), _) => Some(e),
        (None, Some(f)) if f.case_insensitive => MODEL_REGISTRY
            .iter()
            .find(|e| e.file_name.eq_ignore_ascii_case(file_name)),
        _ => None,
    }?;

    match filters {
        Some(f) if !f.accepts(&found.config) => None,
        _ => Some(&found.config),
    }
}

/// All filenames of a variant, sorted ascending by priority.
///
/// The sort is stable, so equal priorities keep registry declaration order.
pub fn get_models_by_variant(variant: &str) -> Vec<&'static str> {
    let mut entries: Vec<&ModelEntry> = MODEL_REGISTRY
        .iter()
        .filter(|e| e.config.variant == variant)
        .collect();
    entries.sort_by_key(|e| e.config.priority);
    entries.into_iter().map(|e| e.file_name).collect()
}

/// Variant a logical model id maps to, if it is in the id table.
pub fn variant_for_model_id(model_id: &str) -> Option<&'static str> {
    MODEL_ID_VARIANTS
        .iter()
        .find(|(id, _)| *id == model_id)
        .map(|(_, variant)| *variant)
}

/// Distinct variant names in registry order.
pub fn all_variants() -> Vec<&'static str> {
    let mut out: Vec<&'static str> = Vec::new();
    for e in MODEL_REGISTRY {
        if !out.contains(&e.config.variant) {
            out.push(e.config.variant);
        }
    }
    out
}
