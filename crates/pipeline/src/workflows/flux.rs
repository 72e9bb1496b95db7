//! FLUX text-to-image workflow (Dev, Krea and Schnell).
//!
//! ```text
//! UNETLoader ─────────────────────────────┐
//! DualCLIPLoader ─ CLIPTextEncodeFlux ─ KSampler ─ VAEDecode ─ SaveImage
//! EmptySD3LatentImage ────────────────────┘          │
//! VAELoader ─────────────────────────────────────────┘
//! ```

use comfybridge_comfyui::backend::ComfyBackend;
use comfybridge_core::error::{ComfyError, ComfyResult};
use comfybridge_core::graph::{Workflow, WorkflowNode};
use comfybridge_core::params::GenerationParams;
use comfybridge_core::prompt::PromptBuilder;
use comfybridge_core::registry::{get_model_config, ModelFilters};
use comfybridge_core::types::{ComponentType, ModelFamily, WeightDtype};

use super::prompt::split_prompt_for_dual_clip;
use super::{bind_all, seed_or_random, OUTPUT_PREFIX};
use crate::resolver::ModelResolver;

/// Family defaults that differ between the full and distilled models.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FluxDefaults {
    pub steps: u32,
    pub cfg: f64,
    pub guidance: f64,
    pub sampler: &'static str,
    pub scheduler: &'static str,
    /// Whether `guidance` is a settable parameter.
    pub exposes_guidance: bool,
}

pub const FLUX_DEV_DEFAULTS: FluxDefaults = FluxDefaults {
    steps: 20,
    cfg: 3.5,
    guidance: 3.5,
    sampler: "euler",
    scheduler: "simple",
    exposes_guidance: true,
};

pub const FLUX_SCHNELL_DEFAULTS: FluxDefaults = FluxDefaults {
    steps: 4,
    cfg: 1.0,
    guidance: 3.5,
    sampler: "euler",
    scheduler: "simple",
    exposes_guidance: false,
};

pub const OUTPUT_NODE: &str = "9";

const BASE_INPUTS: &[&str] = &[
    "prompt_clip_l",
    "prompt_t5xxl",
    "width",
    "height",
    "steps",
    "cfg",
    "seed",
    "sampler",
    "scheduler",
];

const BASE_BINDINGS: &[(&str, &str)] = &[
    ("prompt_clip_l", "4.inputs.clip_l"),
    ("prompt_t5xxl", "4.inputs.t5xxl"),
    ("width", "6.inputs.width"),
    ("height", "6.inputs.height"),
    ("steps", "7.inputs.steps"),
    ("cfg", "7.inputs.cfg"),
    ("seed", "7.inputs.seed"),
    ("sampler", "7.inputs.sampler_name"),
    ("scheduler", "7.inputs.scheduler"),
];

/// `UNETLoader.weight_dtype` for a FLUX file.
pub fn weight_dtype_for(file_name: &str) -> WeightDtype {
    let filters = ModelFilters {
        case_insensitive: true,
        ..Default::default()
    };
    get_model_config(file_name, Some(&filters))
        .and_then(|c| c.recommended_dtype)
        .unwrap_or(WeightDtype::Default)
}

pub async fn build_flux_dev<B: ComfyBackend>(
    file_name: &str,
    params: &GenerationParams,
    resolver: &ModelResolver<B>,
) -> ComfyResult<PromptBuilder> {
    build_flux(file_name, params, resolver, &FLUX_DEV_DEFAULTS).await
}

pub async fn build_flux_schnell<B: ComfyBackend>(
    file_name: &str,
    params: &GenerationParams,
    resolver: &ModelResolver<B>,
) -> ComfyResult<PromptBuilder> {
    build_flux(file_name, params, resolver, &FLUX_SCHNELL_DEFAULTS).await
}

async fn build_flux<B: ComfyBackend>(
    file_name: &str,
    params: &GenerationParams,
    resolver: &ModelResolver<B>,
    defaults: &FluxDefaults,
) -> ComfyResult<PromptBuilder> {
    let with_model = |e: ComfyError| e.with_detail("modelFileName", file_name);
    let t5 = resolver
        .get_optimal_component(ComponentType::T5, ModelFamily::Flux)
        .await
        .map_err(with_model)?;
    let clip_l = resolver
        .get_optimal_component(ComponentType::Clip, ModelFamily::Flux)
        .await
        .map_err(with_model)?;
    let vae = resolver
        .get_optimal_component(ComponentType::Vae, ModelFamily::Flux)
        .await
        .map_err(with_model)?;

    let split = split_prompt_for_dual_clip(&params.prompt);

    let mut wf = Workflow::new();
    wf.add(
        "1",
        WorkflowNode::new("DualCLIPLoader", "DualCLIP Loader")
            .input("clip_name1", t5.as_str())
            .input("clip_name2", clip_l.as_str())
            .input("type", "flux"),
    )
    .add(
        "2",
        WorkflowNode::new("UNETLoader", "Load Diffusion Model")
            .input("unet_name", file_name)
            .input("weight_dtype", weight_dtype_for(file_name).as_str()),
    )
    .add(
        "3",
        WorkflowNode::new("VAELoader", "Load VAE").input("vae_name", vae.as_str()),
    )
    .add(
        "4",
        WorkflowNode::new("CLIPTextEncodeFlux", "CLIP Text Encode (Positive)")
            .input("clip_l", "")
            .input("t5xxl", "")
            .input("guidance", defaults.guidance)
            .link("clip", "1", 0),
    )
    .add(
        "5",
        WorkflowNode::new("CLIPTextEncodeFlux", "CLIP Text Encode (Negative)")
            .input("clip_l", "")
            .input("t5xxl", "")
            .input("guidance", defaults.guidance)
            .link("clip", "1", 0),
    )
    .add(
        "6",
        WorkflowNode::new("EmptySD3LatentImage", "Empty Latent Image").input("batch_size", 1),
    )
    .add(
        "7",
        WorkflowNode::new("KSampler", "KSampler")
            .input("denoise", 1.0)
            .link("model", "2", 0)
            .link("positive", "4", 0)
            .link("negative", "5", 0)
            .link("latent_image", "6", 0),
    )
    .add(
        "8",
        WorkflowNode::new("VAEDecode", "VAE Decode")
            .link("samples", "7", 0)
            .link("vae", "3", 0),
    )
    .add(
        OUTPUT_NODE,
        WorkflowNode::new("SaveImage", "Save Image")
            .input("filename_prefix", OUTPUT_PREFIX)
            .link("images", "8", 0),
    );

    let mut inputs: Vec<&str> = BASE_INPUTS.to_vec();
    if defaults.exposes_guidance {
        inputs.push("guidance");
    }

    let mut builder = bind_all(PromptBuilder::new(wf, &inputs, OUTPUT_NODE), BASE_BINDINGS)
        .input("prompt_clip_l", split.clip_l)
        .input("prompt_t5xxl", split.t5xxl)
        .input("width", params.width.unwrap_or(1024))
        .input("height", params.height.unwrap_or(1024))
        .input("steps", params.steps.unwrap_or(defaults.steps))
        .input("cfg", params.cfg.unwrap_or(defaults.cfg))
        .input("seed", seed_or_random(params.seed))
        .input(
            "sampler",
            params.sampler_name.as_deref().unwrap_or(defaults.sampler),
        )
        .input(
            "scheduler",
            params.scheduler.as_deref().unwrap_or(defaults.scheduler),
        );
    if defaults.exposes_guidance {
        builder = builder
            .set_input_node("guidance", "4.inputs.guidance")
            .input("guidance", defaults.guidance);
    }

    tracing::debug!(
        file_name,
        t5 = %t5,
        clip_l = %clip_l,
        vae = %vae,
        steps = params.steps.unwrap_or(defaults.steps),
        "Built FLUX workflow",
    );
    Ok(builder)
}
