mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use comfybridge_core::error::ErrorKind;
use comfybridge_core::types::{ComponentType, ModelFamily};
use comfybridge_pipeline::resolver::{ModelResolver, VaeOptions};
use comfybridge_pipeline::service::ClientService;

use common::{resolver, FakeBackend};

// ---------------------------------------------------------------------------
// Model file resolution
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sd35_large_preferred_when_both_live() {
    let r = resolver(FakeBackend::new().with_checkpoints(&[
        "sd3.5_medium.safetensors",
        "sd3.5_large.safetensors",
    ]));
    let file = r.resolve_model_file_name("sd3.5_large.safetensors").await.unwrap();
    assert_eq!(file, "sd3.5_large.safetensors");
}

#[tokio::test]
async fn sd35_falls_back_to_medium() {
    let r = resolver(FakeBackend::new().with_checkpoints(&["sd3.5_medium.safetensors"]));
    let file = r.resolve_model_file_name("sd3.5_large.safetensors").await.unwrap();
    assert_eq!(file, "sd3.5_medium.safetensors");
}

#[tokio::test]
async fn sd35_absent_is_model_not_found() {
    let r = resolver(FakeBackend::new().with_checkpoints(&["v1-5-pruned-emaonly.safetensors"]));
    let err = r.resolve_model_file_name("sd3.5_large.safetensors").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::ModelNotFound);
    assert_eq!(err.detail("modelId").unwrap(), "sd3.5_large.safetensors");
}

#[tokio::test]
async fn logical_id_with_provider_prefix_resolves_by_variant() {
    let r = resolver(FakeBackend::new().with_checkpoints(&[
        "flux1-schnell-fp8.safetensors",
        "flux1-dev.safetensors",
    ]));
    let file = r.resolve_model_file_name("comfyui/flux-schnell").await.unwrap();
    assert_eq!(file, "flux1-schnell-fp8.safetensors");
}

#[tokio::test]
async fn custom_sd_sentinel_needs_the_custom_file() {
    let r = resolver(FakeBackend::new().with_checkpoints(&["custom_sd_lobe.safetensors"]));
    let file = r
        .resolve_model_file_name("comfyui/stable-diffusion-custom")
        .await
        .unwrap();
    assert_eq!(file, "custom_sd_lobe.safetensors");

    let r = resolver(FakeBackend::new());
    let err = r
        .resolve_model_file_name("stable-diffusion-custom")
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::ModelNotFound);
}

#[tokio::test]
async fn repeated_resolution_fetches_listing_once() {
    // A zero TTL means every listing call would hit the backend; the
    // resolver's own memo must absorb the second lookup.
    let service = Arc::new(ClientService::with_ttl(
        FakeBackend::new().with_checkpoints(&["flux1-dev.safetensors"]),
        Duration::ZERO,
    ));
    let r = ModelResolver::new(Arc::clone(&service));

    r.resolve_model_file_name("flux-dev").await.unwrap();
    r.resolve_model_file_name("comfyui/flux-dev").await.unwrap();
    assert_eq!(service.backend().checkpoint_calls.load(Ordering::SeqCst), 1);

    r.clear_caches().await;
    r.resolve_model_file_name("flux-dev").await.unwrap();
    assert_eq!(service.backend().checkpoint_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn validate_model_reports_absence_without_error() {
    let r = resolver(FakeBackend::new().with_checkpoints(&["flux1-dev.safetensors"]));
    let result = r.validate_model("nonexistent-model").await.unwrap();
    assert!(!result.exists);
    assert_eq!(result.actual_file_name, None);

    let result = r.validate_model("flux-dev").await.unwrap();
    assert!(result.exists);
    assert_eq!(result.actual_file_name.as_deref(), Some("flux1-dev.safetensors"));
}

#[tokio::test]
async fn validate_model_passes_connection_failures_through() {
    let r = resolver(FakeBackend::new().unreachable());
    let err = r.validate_model("flux-dev").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::ServiceUnavailable);
}

// ---------------------------------------------------------------------------
// Components
// ---------------------------------------------------------------------------

#[tokio::test]
async fn optimal_component_is_lowest_priority_live_file() {
    let r = resolver(FakeBackend::new().with_encoders(&[
        "t5xxl_fp8_e4m3fn.safetensors",
        "t5xxl_fp16.safetensors",
        "clip_l.safetensors",
    ]));
    let t5 = r
        .get_optimal_component(ComponentType::T5, ModelFamily::Flux)
        .await
        .unwrap();
    assert_eq!(t5, "t5xxl_fp16.safetensors");
}

#[tokio::test]
async fn missing_encoder_and_missing_vae_kinds() {
    let r = resolver(FakeBackend::new());
    let err = r
        .get_optimal_component(ComponentType::Clip, ModelFamily::Flux)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::MissingEncoder);
    assert_eq!(err.detail("componentType").unwrap(), "clip");

    let err = r
        .get_optimal_component(ComponentType::Vae, ModelFamily::Flux)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::MissingComponent);
    assert!(err.detail("expectedFiles").is_some());
}

#[tokio::test]
async fn unregistered_live_files_are_ignored() {
    let r = resolver(FakeBackend::new().with_encoders(&["my_random_clip.safetensors"]));
    let clips = r
        .get_available_components(ComponentType::Clip, Some(ModelFamily::Sd3))
        .await
        .unwrap();
    assert!(clips.is_empty());
}

// ---------------------------------------------------------------------------
// VAE selection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sd3_never_gets_an_external_vae() {
    let r = resolver(FakeBackend::new().with_vaes(&["sdxl_vae.safetensors", "ae.safetensors"]));
    let vae = r
        .select_vae(&VaeOptions {
            model_file_name: "sd3.5_large_fp8_scaled.safetensors",
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(vae, None);
}

#[tokio::test]
async fn sdxl_gets_its_family_vae() {
    let r = resolver(FakeBackend::new().with_vaes(&["sdxl.vae.safetensors", "sdxl_vae.safetensors"]));
    let vae = r
        .select_vae(&VaeOptions {
            model_file_name: "sd_xl_base_1.0.safetensors",
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(vae.as_deref(), Some("sdxl_vae.safetensors"));
}

#[tokio::test]
async fn custom_sd_vae_rules() {
    let r = resolver(FakeBackend::new().with_vaes(&["custom_sd_vae_lobe.safetensors"]));
    let vae = r
        .select_vae(&VaeOptions {
            model_file_name: "custom_sd_lobe.safetensors",
            is_custom_sd: true,
            custom_vae: None,
        })
        .await
        .unwrap();
    assert_eq!(vae.as_deref(), Some("custom_sd_vae_lobe.safetensors"));

    let vae = r
        .select_vae(&VaeOptions {
            model_file_name: "custom_sd_lobe.safetensors",
            is_custom_sd: true,
            custom_vae: Some("override.safetensors"),
        })
        .await
        .unwrap();
    assert_eq!(vae.as_deref(), Some("override.safetensors"));

    let r = resolver(FakeBackend::new());
    assert_matches!(
        r.select_vae(&VaeOptions {
            model_file_name: "custom_sd_lobe.safetensors",
            is_custom_sd: true,
            custom_vae: None,
        })
        .await,
        Ok(None)
    );
}
