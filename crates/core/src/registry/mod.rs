//! Immutable lookup tables describing what the provider knows how to use.
//!
//! Nothing here talks to a server: the registries say what *could* exist,
//! and the resolver intersects that with what the server actually reports.
//! Lookups never fail; absence is `None` or an empty `Vec`.

pub mod components;
pub mod models;

pub use components::{
    get_all_components_with_names, get_component_config, ComponentConfig, ComponentFilter,
    NamedComponent,
};
pub use models::{
    get_model_config, get_models_by_variant, variant_for_model_id, ModelConfig, ModelFilters,
};
