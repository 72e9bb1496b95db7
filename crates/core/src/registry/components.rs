//! Static table of auxiliary files: text encoders and VAEs.
//!
//! A component may serve more than one family (CLIP-L and T5-XXL are shared
//! by FLUX and SD3). Priority orders candidates within a
//! `(type, family)` scope, lower first.

use serde::Serialize;

use crate::types::{ComponentType, ModelFamily};

/// Registry metadata for one component file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentConfig {
    #[serde(rename = "type")]
    pub component_type: ComponentType,
    pub model_families: &'static [ModelFamily],
    pub priority: u32,
}

impl ComponentConfig {
    pub fn serves(&self, family: ModelFamily) -> bool {
        self.model_families.contains(&family)
    }
}

/// A component filename together with its config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NamedComponent {
    pub name: &'static str,
    pub config: ComponentConfig,
}

const fn component(
    name: &'static str,
    component_type: ComponentType,
    model_families: &'static [ModelFamily],
    priority: u32,
) -> NamedComponent {
    NamedComponent {
        name,
        config: ComponentConfig {
            component_type,
            model_families,
            priority,
        },
    }
}

use ComponentType::{Clip, Vae, T5};
use ModelFamily::{Flux, Sd1, Sd3, Sdxl};

const FLUX_AND_SD3: &[ModelFamily] = &[Flux, Sd3];

/// CLIP-G filename fragment; everything else in the SD3 CLIP scope is CLIP-L.
pub const CLIP_G_MARKER: &str = "clip_g";

pub const COMPONENT_REGISTRY: &[NamedComponent] = &[
    // CLIP
    component("clip_l.safetensors", Clip, FLUX_AND_SD3, 1),
    component("clip_g.safetensors", Clip, &[Sd3], 2),
    // T5-XXL
    component("t5xxl_fp16.safetensors", T5, FLUX_AND_SD3, 1),
    component("t5xxl_fp8_e4m3fn.safetensors", T5, FLUX_AND_SD3, 2),
    component("t5xxl_fp8_e4m3fn_scaled.safetensors", T5, FLUX_AND_SD3, 3),
    // VAE
    component("ae.safetensors", Vae, &[Flux], 1),
    component("flux-vae-bf16.safetensors", Vae, &[Flux], 2),
    component("sdxl_vae.safetensors", Vae, &[Sdxl], 1),
    component("sdxl.vae.safetensors", Vae, &[Sdxl], 2),
    component("vae-ft-mse-840000-ema-pruned.safetensors", Vae, &[Sd1], 1),
    component("vae-ft-ema-560000-ema-pruned.safetensors", Vae, &[Sd1], 2),
];

/// Selection criteria for [`get_all_components_with_names`].
#[derive(Debug, Clone, Copy)]
pub struct ComponentFilter {
    pub component_type: ComponentType,
    pub model_family: Option<ModelFamily>,
}

/// All components of the given type (and family, if set), in registry
/// order. Callers sort by priority themselves.
pub fn get_all_components_with_names(filter: &ComponentFilter) -> Vec<NamedComponent> {
    COMPONENT_REGISTRY
        .iter()
        .filter(|c| c.config.component_type == filter.component_type)
        .filter(|c| filter.model_family.is_none_or(|f| c.config.serves(f)))
        .copied()
        .collect()
}

pub fn get_component_config(name: &str) -> Option<&'static ComponentConfig> {
    COMPONENT_REGISTRY
        .iter()
        .find(|c| c.name == name)
        .map(|c| &c.config)
}
