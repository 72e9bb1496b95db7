//! Request and response shapes of `create_image`.

use serde::{Deserialize, Serialize};

/// Fallback edge length when neither the result nor the request carries
/// dimensions.
pub const DEFAULT_IMAGE_SIZE: u32 = 1024;

/// Generation parameters supplied by the caller.
///
/// Everything except `prompt` is optional; each workflow builder applies its
/// own family defaults. `seed: Some(0)` is a real seed, not "absent".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationParams {
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub steps: Option<u32>,
    #[serde(default)]
    pub cfg: Option<f64>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub sampler_name: Option<String>,
    #[serde(default)]
    pub scheduler: Option<String>,
    /// Image-to-image input: a remote URL or a server-local filename.
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub image_urls: Option<Vec<String>>,
    /// Denoise strength for image-to-image, 0.0..=1.0.
    #[serde(default)]
    pub strength: Option<f64>,
    /// SD3 noise-schedule shift.
    #[serde(default)]
    pub shift: Option<f64>,
}

impl GenerationParams {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    /// The image-to-image input, if any: `image_url`, else the first entry of
    /// `image_urls`. Blank strings count as absent.
    pub fn input_image(&self) -> Option<&str> {
        let present = |s: &&str| !s.trim().is_empty();
        self.image_url
            .as_deref()
            .filter(present)
            .or_else(|| {
                self.image_urls
                    .as_ref()
                    .and_then(|urls| urls.first())
                    .map(String::as_str)
                    .filter(present)
            })
    }

    /// Point the image-to-image input at `file_name`.
    pub fn set_input_image(&mut self, file_name: impl Into<String>) {
        let file_name = file_name.into();
        if self.image_url.is_some() || self.image_urls.is_none() {
            self.image_url = Some(file_name);
        } else if let Some(first) = self.image_urls.as_mut().and_then(|urls| urls.first_mut()) {
            *first = file_name;
        }
    }
}

/// Input of `create_image`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateImagePayload {
    /// Logical model id, e.g. `comfyui/flux-schnell`.
    pub model: String,
    pub params: GenerationParams,
}

/// Output of `create_image`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateImageResponse {
    pub image_url: String,
    pub width: u32,
    pub height: u32,
}
