//! Prompt splitting for FLUX's dual text encoder.
//!
//! T5-XXL reads natural language well and always receives the full prompt.
//! CLIP-L responds to short tag-like phrases, so it receives the
//! comma-separated segments that look like style or quality keywords.

/// Maximum words in a segment for it to count as a keyword.
const KEYWORD_MAX_WORDS: usize = 4;

/// Per-encoder prompt text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DualClipPrompt {
    pub clip_l: String,
    pub t5xxl: String,
}

pub fn split_prompt_for_dual_clip(prompt: &str) -> DualClipPrompt {
    let full = prompt.trim().to_string();

    let segments: Vec<&str> = full
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    let keywords: Vec<&str> = if segments.len() > 1 {
        segments
            .iter()
            .copied()
            .filter(|s| s.split_whitespace().count() <= KEYWORD_MAX_WORDS)
            .collect()
    } else {
        Vec::new()
    };

    let clip_l = if keywords.is_empty() {
        full.clone()
    } else {
        keywords.join(", ")
    };

    DualClipPrompt {
        clip_l,
        t5xxl: full,
    }
}
