//! Stable Diffusion 3.5 workflow for checkpoints shipped without text
//! encoders.
//!
//! The encoder loader is chosen from what the server has, best first:
//! triple (CLIP-L + CLIP-G + T5), dual CLIP (L + G), T5 only. With none
//! of those the build fails with `MissingEncoder`. `ModelSamplingSD3` sits
//! between the checkpoint and the sampler; decoding always uses the
//! checkpoint's own VAE.

use comfybridge_comfyui::backend::ComfyBackend;
use comfybridge_core::error::{ComfyError, ComfyResult};
use comfybridge_core::graph::{Workflow, WorkflowNode};
use comfybridge_core::params::GenerationParams;
use comfybridge_core::prompt::PromptBuilder;
use comfybridge_core::registry::components::CLIP_G_MARKER;
use comfybridge_core::types::{ComponentType, ModelFamily};

use super::{bind_all, seed_or_random, OUTPUT_PREFIX};
use crate::resolver::ModelResolver;

pub const DEFAULT_STEPS: u32 = 28;
pub const DEFAULT_CFG: f64 = 4.5;
pub const DEFAULT_SHIFT: f64 = 3.0;
pub const DEFAULT_SAMPLER: &str = "euler";
pub const DEFAULT_SCHEDULER: &str = "sgm_uniform";

pub const OUTPUT_NODE: &str = "9";

const INPUTS: &[&str] = &[
    "prompt",
    "negative_prompt",
    "width",
    "height",
    "steps",
    "cfg",
    "seed",
    "sampler",
    "scheduler",
    "shift",
];

const BINDINGS: &[(&str, &str)] = &[
    ("prompt", "4.inputs.text"),
    ("negative_prompt", "5.inputs.text"),
    ("width", "6.inputs.width"),
    ("height", "6.inputs.height"),
    ("steps", "7.inputs.steps"),
    ("cfg", "7.inputs.cfg"),
    ("seed", "7.inputs.seed"),
    ("sampler", "7.inputs.sampler_name"),
    ("scheduler", "7.inputs.scheduler"),
    ("shift", "3.inputs.shift"),
];

/// Which encoder configuration was available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderSetup {
    Triple {
        clip_l: String,
        clip_g: String,
        t5: String,
    },
    DualClip {
        clip_l: String,
        clip_g: String,
    },
    T5Only {
        t5: String,
    },
}

impl EncoderSetup {
    fn loader_node(&self) -> WorkflowNode {
        match self {
            Self::Triple { clip_l, clip_g, t5 } => {
                WorkflowNode::new("TripleCLIPLoader", "Triple CLIP Loader")
                    .input("clip_name1", clip_l.as_str())
                    .input("clip_name2", clip_g.as_str())
                    .input("clip_name3", t5.as_str())
            }
            Self::DualClip { clip_l, clip_g } => {
                WorkflowNode::new("DualCLIPLoader", "DualCLIP Loader")
                    .input("clip_name1", clip_l.as_str())
                    .input("clip_name2", clip_g.as_str())
                    .input("type", "sd3")
            }
            Self::T5Only { t5 } => WorkflowNode::new("CLIPLoader", "Load CLIP")
                .input("clip_name", t5.as_str())
                .input("type", "sd3"),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Triple { .. } => "triple",
            Self::DualClip { .. } => "dual-clip",
            Self::T5Only { .. } => "t5-only",
        }
    }
}

/// Pick the best encoder configuration the server supports.
pub async fn select_encoders<B: ComfyBackend>(
    file_name: &str,
    resolver: &ModelResolver<B>,
) -> ComfyResult<EncoderSetup> {
    let clips = resolver
        .get_available_components(ComponentType::Clip, Some(ModelFamily::Sd3))
        .await?;
    let t5s = resolver
        .get_available_components(ComponentType::T5, Some(ModelFamily::Sd3))
        .await?;

    let clip_g = clips.iter().find(|c| c.contains(CLIP_G_MARKER)).cloned();
    let clip_l = clips.iter().find(|c| !c.contains(CLIP_G_MARKER)).cloned();
    let t5 = t5s.into_iter().next();

    match (clip_l, clip_g, t5) {
        (Some(clip_l), Some(clip_g), Some(t5)) => Ok(EncoderSetup::Triple { clip_l, clip_g, t5 }),
        (Some(clip_l), Some(clip_g), None) => Ok(EncoderSetup::DualClip { clip_l, clip_g }),
        (_, _, Some(t5)) => Ok(EncoderSetup::T5Only { t5 }),
        _ => Err(ComfyError::missing_encoder(
            file_name,
            format!(
                "SD3.5 model '{file_name}' needs external text encoders: CLIP-L + CLIP-G, or T5-XXL"
            ),
        )
        .with_detail("availableClip", clips)),
    }
}

pub async fn build_sd35<B: ComfyBackend>(
    file_name: &str,
    params: &GenerationParams,
    resolver: &ModelResolver<B>,
) -> ComfyResult<PromptBuilder> {
    let encoders = select_encoders(file_name, resolver).await?;

    let mut wf = Workflow::new();
    wf.add(
        "1",
        WorkflowNode::new("CheckpointLoaderSimple", "Load Checkpoint").input("ckpt_name", file_name),
    )
    .add("2", encoders.loader_node())
    .add(
        "3",
        WorkflowNode::new("ModelSamplingSD3", "Model Sampling SD3")
            .input("shift", DEFAULT_SHIFT)
            .link("model", "1", 0),
    )
    .add(
        "4",
        WorkflowNode::new("CLIPTextEncode", "CLIP Text Encode (Positive)")
            .input("text", "")
            .link("clip", "2", 0),
    )
    .add(
        "5",
        WorkflowNode::new("CLIPTextEncode", "CLIP Text Encode (Negative)")
            .input("text", "")
            .link("clip", "2", 0),
    )
    .add(
        "6",
        WorkflowNode::new("EmptySD3LatentImage", "Empty Latent Image").input("batch_size", 1),
    )
    .add(
        "7",
        WorkflowNode::new("KSampler", "KSampler")
            .input("denoise", 1.0)
            .link("model", "3", 0)
            .link("positive", "4", 0)
            .link("negative", "5", 0)
            .link("latent_image", "6", 0),
    )
    .add(
        "8",
        WorkflowNode::new("VAEDecode", "VAE Decode")
            .link("samples", "7", 0)
            .link("vae", "1", 2),
    )
    .add(
        OUTPUT_NODE,
        WorkflowNode::new("SaveImage", "Save Image")
            .input("filename_prefix", OUTPUT_PREFIX)
            .link("images", "8", 0),
    );

    let builder = bind_all(PromptBuilder::new(wf, INPUTS, OUTPUT_NODE), BINDINGS)
        .input("prompt", params.prompt.as_str())
        .input(
            "negative_prompt",
            params.negative_prompt.as_deref().unwrap_or_default(),
        )
        .input("width", params.width.unwrap_or(1024))
        .input("height", params.height.unwrap_or(1024))
        .input("steps", params.steps.unwrap_or(DEFAULT_STEPS))
        .input("cfg", params.cfg.unwrap_or(DEFAULT_CFG))
        .input("seed", seed_or_random(params.seed))
        .input("sampler", params.sampler_name.as_deref().unwrap_or(DEFAULT_SAMPLER))
        .input("scheduler", params.scheduler.as_deref().unwrap_or(DEFAULT_SCHEDULER))
        .input("shift", params.shift.unwrap_or(DEFAULT_SHIFT));

    tracing::debug!(file_name, encoders = encoders.label(), "Built SD3.5 workflow");
    Ok(builder)
}
