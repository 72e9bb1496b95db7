//! Domain types shared by every comfybridge crate.
//!
//! Holds the error taxonomy, the static model and component registries,
//! the ComfyUI node-graph representation with its reference validation,
//! the prompt builder that binds logical parameters onto graph inputs,
//! generation request/response types, and connection configuration.

pub mod config;
pub mod error;
pub mod graph;
pub mod params;
pub mod prompt;
pub mod registry;
pub mod types;
