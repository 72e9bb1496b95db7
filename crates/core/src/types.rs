use serde::{Deserialize, Serialize};

/// Model architecture family of a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelFamily {
    #[serde(rename = "FLUX")]
    Flux,
    #[serde(rename = "SD1")]
    Sd1,
    #[serde(rename = "SDXL")]
    Sdxl,
    #[serde(rename = "SD3")]
    Sd3,
}

impl ModelFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Flux => "FLUX",
            Self::Sd1 => "SD1",
            Self::Sdxl => "SDXL",
            Self::Sd3 => "SD3",
        }
    }

    /// Whether checkpoints of this family should be paired with an external
    /// `VAELoader` node.
    ///
    /// Only SD1 and SDXL qualify. SD3 checkpoints bundle their VAE; FLUX
    /// builders always load `ae.safetensors` themselves.
    pub fn attaches_external_vae(&self) -> bool {
        matches!(self, Self::Sd1 | Self::Sdxl)
    }
}

impl std::fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of auxiliary file loaded independently of the checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentType {
    Clip,
    T5,
    Vae,
}

impl ComponentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clip => "clip",
            Self::T5 => "t5",
            Self::Vae => "vae",
        }
    }

    /// Text encoders are reported as `MissingEncoder` when absent.
    pub fn is_encoder(&self) -> bool {
        matches!(self, Self::Clip | Self::T5)
    }
}

impl std::fmt::Display for ComponentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `weight_dtype` values accepted by ComfyUI's `UNETLoader`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WeightDtype {
    #[serde(rename = "default")]
    Default,
    #[serde(rename = "fp8_e4m3fn")]
    Fp8E4m3fn,
    #[serde(rename = "fp8_e4m3fn_fast")]
    Fp8E4m3fnFast,
    #[serde(rename = "fp8_e5m2")]
    Fp8E5m2,
}

impl WeightDtype {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Fp8E4m3fn => "fp8_e4m3fn",
            Self::Fp8E4m3fnFast => "fp8_e4m3fn_fast",
            Self::Fp8E5m2 => "fp8_e5m2",
        }
    }
}
