//! Workflow builders, one per model family or variant.
//!
//! Every builder takes the resolved checkpoint filename, the caller's
//! generation parameters and the resolver, and returns a
//! [`PromptBuilder`]: the node graph plus the declared parameter names,
//! their `node.inputs.field` bindings and values. Defaults are applied
//! here; `seed: Some(0)` is kept as is.

pub mod flux;
pub mod flux_kontext;
pub mod generic_sd;
pub mod prompt;
pub mod sd35;

use comfybridge_core::prompt::PromptBuilder;

/// Filename prefix for `SaveImage` nodes.
pub const OUTPUT_PREFIX: &str = "comfybridge";

/// A fresh random seed.
pub fn random_seed() -> u64 {
    u64::from(rand::random::<u32>())
}

/// The caller's seed, or a random one when absent.
pub fn seed_or_random(seed: Option<u64>) -> u64 {
    seed.unwrap_or_else(random_seed)
}

/// Bind every `(name, path)` pair.
pub(crate) fn bind_all(builder: PromptBuilder, bindings: &[(&str, &str)]) -> PromptBuilder {
    bindings
        .iter()
        .fold(builder, |b, (name, path)| b.set_input_node(name, path))
}
