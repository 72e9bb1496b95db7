//! Single-checkpoint Stable Diffusion workflow (SD1.5, SDXL, custom SD and
//! SD3.5 checkpoints with bundled encoders).
//!
//! CLIP comes from the checkpoint. An external VAE is attached only for
//! SD1/SDXL families, and only when the resolver finds one; otherwise the
//! checkpoint's VAE output (slot 2) is used. With an input image the
//! latent comes from `LoadImage -> VAEEncode` and the denoise strength
//! from the caller (default 0.75); otherwise an empty latent at full
//! denoise.

use comfybridge_comfyui::backend::ComfyBackend;
use comfybridge_core::error::ComfyResult;
use comfybridge_core::graph::{Workflow, WorkflowNode};
use comfybridge_core::params::GenerationParams;
use comfybridge_core::prompt::PromptBuilder;
use comfybridge_core::types::ModelFamily;

use super::{bind_all, seed_or_random, OUTPUT_PREFIX};
use crate::resolver::{ModelResolver, VaeOptions};

pub const DEFAULT_IMG2IMG_STRENGTH: f64 = 0.75;
pub const DEFAULT_SAMPLER: &str = "euler";

pub const OUTPUT_NODE: &str = "9";

/// Per-family sampling defaults.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SdDefaults {
    pub steps: u32,
    pub cfg: f64,
    pub size: u32,
    pub scheduler: &'static str,
}

pub fn defaults_for(family: ModelFamily) -> SdDefaults {
    match family {
        ModelFamily::Sd1 => SdDefaults {
            steps: 20,
            cfg: 7.0,
            size: 512,
            scheduler: "normal",
        },
        ModelFamily::Sdxl => SdDefaults {
            steps: 30,
            cfg: 7.0,
            size: 1024,
            scheduler: "normal",
        },
        ModelFamily::Sd3 | ModelFamily::Flux => SdDefaults {
            steps: 28,
            cfg: 4.5,
            size: 1024,
            scheduler: "sgm_uniform",
        },
    }
}

/// Options beyond the common builder arguments.
#[derive(Debug, Clone, Copy)]
pub struct GenericSdOptions<'a> {
    pub family: ModelFamily,
    pub is_custom_sd: bool,
    pub custom_vae: Option<&'a str>,
}

pub async fn build_generic_sd<B: ComfyBackend>(
    file_name: &str,
    params: &GenerationParams,
    resolver: &ModelResolver<B>,
    options: GenericSdOptions<'_>,
) -> ComfyResult<PromptBuilder> {
    let family = options.family;
    let defaults = defaults_for(family);

    let external_vae = if family.attaches_external_vae() {
        resolver
            .select_vae(&VaeOptions {
                model_file_name: file_name,
                is_custom_sd: options.is_custom_sd,
                custom_vae: options.custom_vae,
            })
            .await
            .map_err(|e| e.with_detail("modelFileName", file_name))?
    } else {
        None
    };

    let mut wf = Workflow::new();
    wf.add(
        "1",
        WorkflowNode::new("CheckpointLoaderSimple", "Load Checkpoint").input("ckpt_name", file_name),
    )
    .add(
        "2",
        WorkflowNode::new("CLIPTextEncode", "CLIP Text Encode (Positive)")
            .input("text", "")
            .link("clip", "1", 1),
    )
    .add(
        "3",
        WorkflowNode::new("CLIPTextEncode", "CLIP Text Encode (Negative)")
            .input("text", "")
            .link("clip", "1", 1),
    );

    let vae: (&str, u32) = match &external_vae {
        Some(vae_name) => {
            wf.add(
                "4",
                WorkflowNode::new("VAELoader", "Load VAE").input("vae_name", vae_name.as_str()),
            );
            ("4", 0)
        }
        None => ("1", 2),
    };

    let input_image = params.input_image();
    match input_image {
        Some(image) => {
            wf.add(
                "5",
                WorkflowNode::new("LoadImage", "Load Image").input("image", image),
            )
            .add(
                "6",
                WorkflowNode::new("VAEEncode", "VAE Encode")
                    .link("pixels", "5", 0)
                    .link("vae", vae.0, vae.1),
            );
        }
        None => {
            let latent_class = if family == ModelFamily::Sd3 {
                "EmptySD3LatentImage"
            } else {
                "EmptyLatentImage"
            };
            wf.add(
                "6",
                WorkflowNode::new(latent_class, "Empty Latent Image")
                    .input("width", defaults.size)
                    .input("height", defaults.size)
                    .input("batch_size", 1),
            );
        }
    }

    wf.add(
        "7",
        WorkflowNode::new("KSampler", "KSampler")
            .link("model", "1", 0)
            .link("positive", "2", 0)
            .link("negative", "3", 0)
            .link("latent_image", "6", 0),
    )
    .add(
        "8",
        WorkflowNode::new("VAEDecode", "VAE Decode")
            .link("samples", "7", 0)
            .link("vae", vae.0, vae.1),
    )
    .add(
        OUTPUT_NODE,
        WorkflowNode::new("SaveImage", "Save Image")
            .input("filename_prefix", OUTPUT_PREFIX)
            .link("images", "8", 0),
    );

    let mut inputs = vec![
        "prompt",
        "negative_prompt",
        "steps",
        "cfg",
        "seed",
        "sampler",
        "scheduler",
        "denoise",
    ];
    let mut bindings = vec![
        ("prompt", "2.inputs.text"),
        ("negative_prompt", "3.inputs.text"),
        ("steps", "7.inputs.steps"),
        ("cfg", "7.inputs.cfg"),
        ("seed", "7.inputs.seed"),
        ("sampler", "7.inputs.sampler_name"),
        ("scheduler", "7.inputs.scheduler"),
        ("denoise", "7.inputs.denoise"),
    ];
    let denoise = match input_image {
        Some(_) => params.strength.unwrap_or(DEFAULT_IMG2IMG_STRENGTH),
        None => {
            inputs.extend(["width", "height"]);
            bindings.extend([("width", "6.inputs.width"), ("height", "6.inputs.height")]);
            1.0
        }
    };

    let mut builder = bind_all(PromptBuilder::new(wf, &inputs, OUTPUT_NODE), &bindings)
        .input("prompt", params.prompt.as_str())
        .input(
            "negative_prompt",
            params.negative_prompt.as_deref().unwrap_or_default(),
        )
        .input("steps", params.steps.unwrap_or(defaults.steps))
        .input("cfg", params.cfg.unwrap_or(defaults.cfg))
        .input("seed", seed_or_random(params.seed))
        .input("sampler", params.sampler_name.as_deref().unwrap_or(DEFAULT_SAMPLER))
        .input("scheduler", params.scheduler.as_deref().unwrap_or(defaults.scheduler))
        .input("denoise", denoise);
    if input_image.is_none() {
        builder = builder
            .input("width", params.width.unwrap_or(defaults.size))
            .input("height", params.height.unwrap_or(defaults.size));
    }

    tracing::debug!(
        file_name,
        family = %family,
        external_vae = ?external_vae,
        image_to_image = input_image.is_some(),
        "Built generic SD workflow",
    );
    Ok(builder)
}
