//! FLUX Kontext image-editing workflow.
//!
//! Uses the custom-sampler primitives (`RandomNoise`, `KSamplerSelect`,
//! `BasicScheduler`, `BasicGuider`, `SamplerCustomAdvanced`). With an input
//! image the latent comes from `LoadImage -> VAEEncode` and the image is
//! also attached to the conditioning as a reference latent; without one an
//! empty latent is used.

use comfybridge_comfyui::backend::ComfyBackend;
use comfybridge_core::error::{ComfyError, ComfyResult};
use comfybridge_core::graph::{Workflow, WorkflowNode};
use comfybridge_core::params::GenerationParams;
use comfybridge_core::prompt::PromptBuilder;
use comfybridge_core::types::{ComponentType, ModelFamily};

use super::flux::weight_dtype_for;
use super::{bind_all, seed_or_random, OUTPUT_PREFIX};
use crate::resolver::ModelResolver;

pub const DEFAULT_STEPS: u32 = 28;
pub const DEFAULT_GUIDANCE: f64 = 2.5;
pub const DEFAULT_SAMPLER: &str = "euler";
pub const DEFAULT_SCHEDULER: &str = "simple";

pub const OUTPUT_NODE: &str = "15";

const COMMON_BINDINGS: &[(&str, &str)] = &[
    ("prompt", "4.inputs.text"),
    ("guidance", "5.inputs.guidance"),
    ("seed", "9.inputs.noise_seed"),
    ("sampler", "10.inputs.sampler_name"),
    ("scheduler", "11.inputs.scheduler"),
    ("steps", "11.inputs.steps"),
    ("denoise", "11.inputs.denoise"),
];

const COMMON_INPUTS: &[&str] = &[
    "prompt",
    "guidance",
    "seed",
    "sampler",
    "scheduler",
    "steps",
    "denoise",
];

pub async fn build_flux_kontext<B: ComfyBackend>(
    file_name: &str,
    params: &GenerationParams,
    resolver: &ModelResolver<B>,
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

    let input_image = params.input_image();

    let mut wf = Workflow::new();
    wf.add(
        "1",
        WorkflowNode::new("UNETLoader", "Load Diffusion Model")
            .input("unet_name", file_name)
            .input("weight_dtype", weight_dtype_for(file_name).as_str()),
    )
    .add(
        "2",
        WorkflowNode::new("DualCLIPLoader", "DualCLIP Loader")
            .input("clip_name1", t5.as_str())
            .input("clip_name2", clip_l.as_str())
            .input("type", "flux"),
    )
    .add(
        "3",
        WorkflowNode::new("VAELoader", "Load VAE").input("vae_name", vae.as_str()),
    )
    .add(
        "4",
        WorkflowNode::new("CLIPTextEncode", "CLIP Text Encode")
            .input("text", "")
            .link("clip", "2", 0),
    )
    .add(
        "5",
        WorkflowNode::new("FluxGuidance", "Flux Guidance")
            .input("guidance", DEFAULT_GUIDANCE)
            .link("conditioning", "4", 0),
    );

    let conditioning = match input_image {
        Some(image) => {
            wf.add(
                "6",
                WorkflowNode::new("LoadImage", "Load Image").input("image", image),
            )
            .add(
                "7",
                WorkflowNode::new("VAEEncode", "VAE Encode")
                    .link("pixels", "6", 0)
                    .link("vae", "3", 0),
            )
            .add(
                "8",
                WorkflowNode::new("ReferenceLatent", "Reference Latent")
                    .link("conditioning", "5", 0)
                    .link("latent", "7", 0),
            );
            "8"
        }
        None => {
            wf.add(
                "7",
                WorkflowNode::new("EmptySD3LatentImage", "Empty Latent Image")
                    .input("width", 1024)
                    .input("height", 1024)
                    .input("batch_size", 1),
            );
            "5"
        }
    };

    wf.add(
        "9",
        WorkflowNode::new("RandomNoise", "Random Noise").input("noise_seed", 0),
    )
    .add(
        "10",
        WorkflowNode::new("KSamplerSelect", "KSampler Select").input("sampler_name", DEFAULT_SAMPLER),
    )
    .add(
        "11",
        WorkflowNode::new("BasicScheduler", "Basic Scheduler")
            .input("scheduler", DEFAULT_SCHEDULER)
            .input("steps", DEFAULT_STEPS)
            .input("denoise", 1.0)
            .link("model", "1", 0),
    )
    .add(
        "12",
        WorkflowNode::new("BasicGuider", "Basic Guider")
            .link("model", "1", 0)
            .link("conditioning", conditioning, 0),
    )
    .add(
        "13",
        WorkflowNode::new("SamplerCustomAdvanced", "Sampler Custom Advanced")
            .link("noise", "9", 0)
            .link("guider", "12", 0)
            .link("sampler", "10", 0)
            .link("sigmas", "11", 0)
            .link("latent_image", "7", 0),
    )
    .add(
        "14",
        WorkflowNode::new("VAEDecode", "VAE Decode")
            .link("samples", "13", 0)
            .link("vae", "3", 0),
    )
    .add(
        OUTPUT_NODE,
        WorkflowNode::new("SaveImage", "Save Image")
            .input("filename_prefix", OUTPUT_PREFIX)
            .link("images", "14", 0),
    );

    let mut inputs: Vec<&str> = COMMON_INPUTS.to_vec();
    let mut builder_bindings: Vec<(&str, &str)> = COMMON_BINDINGS.to_vec();
    let denoise = match input_image {
        Some(_) => params.strength.unwrap_or(1.0),
        None => {
            inputs.extend(["width", "height"]);
            builder_bindings.extend([("width", "7.inputs.width"), ("height", "7.inputs.height")]);
            1.0
        }
    };

    let mut builder = bind_all(PromptBuilder::new(wf, &inputs, OUTPUT_NODE), &builder_bindings)
        .input("prompt", params.prompt.as_str())
        .input("guidance", params.cfg.unwrap_or(DEFAULT_GUIDANCE))
        .input("seed", seed_or_random(params.seed))
        .input("sampler", params.sampler_name.as_deref().unwrap_or(DEFAULT_SAMPLER))
        .input("scheduler", params.scheduler.as_deref().unwrap_or(DEFAULT_SCHEDULER))
        .input("steps", params.steps.unwrap_or(DEFAULT_STEPS))
        .input("denoise", denoise);
    if input_image.is_none() {
        builder = builder
            .input("width", params.width.unwrap_or(1024))
            .input("height", params.height.unwrap_or(1024));
    }

    tracing::debug!(
        file_name,
        image_to_image = input_image.is_some(),
        denoise,
        "Built FLUX Kontext workflow",
    );
    Ok(builder)
}
