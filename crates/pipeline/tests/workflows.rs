mod common;

use assert_matches::assert_matches;
use comfybridge_core::error::ErrorKind;
use comfybridge_core::params::GenerationParams;
use comfybridge_core::types::ModelFamily;
use comfybridge_pipeline::router::build_workflow;
use comfybridge_pipeline::workflows::flux::{build_flux_dev, build_flux_schnell};
use comfybridge_pipeline::workflows::flux_kontext::build_flux_kontext;
use comfybridge_pipeline::workflows::generic_sd::{build_generic_sd, GenericSdOptions};
use comfybridge_pipeline::workflows::sd35::{build_sd35, select_encoders, EncoderSetup};
use serde_json::json;

use common::{literal, resolver, FakeBackend};

const SD3_ENCODERS: &[&str] = &[
    "clip_l.safetensors",
    "clip_g.safetensors",
    "t5xxl_fp8_e4m3fn.safetensors",
];

// ---------------------------------------------------------------------------
// FLUX
// ---------------------------------------------------------------------------

#[tokio::test]
async fn schnell_uses_distilled_defaults() {
    let r = resolver(FakeBackend::flux(&["flux1-schnell.safetensors"]));
    let params = GenerationParams::new("A beautiful landscape");
    let wf = build_flux_schnell("flux1-schnell.safetensors", &params, &r)
        .await
        .unwrap()
        .build()
        .unwrap();

    assert_eq!(literal(&wf, "7", "cfg"), &json!(1.0));
    assert_eq!(literal(&wf, "7", "steps"), &json!(4));
    assert_eq!(literal(&wf, "6", "width"), &json!(1024));
    assert_eq!(wf.output_node, "9");
}

#[tokio::test]
async fn explicit_zero_seed_is_kept() {
    let r = resolver(FakeBackend::flux(&["flux1-schnell.safetensors"]));
    let mut params = GenerationParams::new("A beautiful landscape");
    params.seed = Some(0);
    let wf = build_flux_schnell("flux1-schnell.safetensors", &params, &r)
        .await
        .unwrap()
        .build()
        .unwrap();
    assert_eq!(literal(&wf, "7", "seed"), &json!(0));
}

#[tokio::test]
async fn dev_loads_resolved_components_and_exposes_guidance() {
    let r = resolver(FakeBackend::flux(&["flux1-dev-fp8.safetensors"]));
    let builder = build_flux_dev("flux1-dev-fp8.safetensors", &GenerationParams::new("a cat"), &r)
        .await
        .unwrap();
    assert!(builder.declared_inputs().iter().any(|n| n == "guidance"));

    let wf = builder.build().unwrap();
    assert_eq!(literal(&wf, "1", "clip_name1"), "t5xxl_fp16.safetensors");
    assert_eq!(literal(&wf, "1", "clip_name2"), "clip_l.safetensors");
    assert_eq!(literal(&wf, "2", "weight_dtype"), "fp8_e4m3fn");
    assert_eq!(literal(&wf, "3", "vae_name"), "ae.safetensors");
    assert_eq!(literal(&wf, "7", "steps"), &json!(20));
    assert_eq!(literal(&wf, "7", "cfg"), &json!(3.5));
}

#[tokio::test]
async fn flux_without_vae_is_missing_component() {
    let backend = FakeBackend::flux(&["flux1-dev.safetensors"]).with_vaes(&[]);
    let r = resolver(backend);
    let err = build_flux_dev("flux1-dev.safetensors", &GenerationParams::new("a"), &r)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::MissingComponent);
    assert_eq!(err.detail("modelFileName").unwrap(), "flux1-dev.safetensors");
}

// ---------------------------------------------------------------------------
// FLUX Kontext
// ---------------------------------------------------------------------------

#[tokio::test]
async fn kontext_edit_mode_encodes_the_input_image() {
    let r = resolver(FakeBackend::flux(&["flux1-kontext-dev.safetensors"]));
    let mut params = GenerationParams::new("make it night");
    params.image_url = Some("photo.png".into());
    params.strength = Some(0.6);

    let wf = build_flux_kontext("flux1-kontext-dev.safetensors", &params, &r)
        .await
        .unwrap()
        .build()
        .unwrap();

    assert_eq!(wf.workflow.node("6").unwrap().class_type, "LoadImage");
    assert_eq!(literal(&wf, "6", "image"), "photo.png");
    assert_eq!(wf.workflow.node("7").unwrap().class_type, "VAEEncode");
    assert_eq!(literal(&wf, "11", "denoise"), &json!(0.6));
    let guider = wf.workflow.node("12").unwrap();
    assert_eq!(guider.linked("conditioning").unwrap().node_id(), "8");
    let sampler = wf.workflow.node("13").unwrap();
    assert_eq!(sampler.linked("latent_image").unwrap().node_id(), "7");
}

#[tokio::test]
async fn kontext_text_mode_uses_empty_latent_and_full_denoise() {
    let r = resolver(FakeBackend::flux(&["flux1-kontext-dev.safetensors"]));
    let mut params = GenerationParams::new("a lighthouse");
    params.strength = Some(0.3);
    params.width = Some(768);

    let wf = build_flux_kontext("flux1-kontext-dev.safetensors", &params, &r)
        .await
        .unwrap()
        .build()
        .unwrap();

    assert!(wf.workflow.node("6").is_none());
    assert_eq!(wf.workflow.node("7").unwrap().class_type, "EmptySD3LatentImage");
    assert_eq!(literal(&wf, "7", "width"), &json!(768));
    assert_eq!(literal(&wf, "11", "denoise"), &json!(1.0));
    assert_eq!(literal(&wf, "5", "guidance"), &json!(2.5));
}

// ---------------------------------------------------------------------------
// SD3.5
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sd35_without_encoders_fails_with_missing_encoder() {
    let r = resolver(FakeBackend::new().with_checkpoints(&["sd3.5_large.safetensors"]));
    let err = build_sd35("sd3.5_large.safetensors", &GenerationParams::new("x"), &r)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::MissingEncoder);
    assert_eq!(err.detail("modelFileName").unwrap(), "sd3.5_large.safetensors");
}

#[tokio::test]
async fn sd35_prefers_the_triple_loader() {
    let r = resolver(FakeBackend::new().with_encoders(SD3_ENCODERS));
    let wf = build_sd35("sd3.5_large.safetensors", &GenerationParams::new("x"), &r)
        .await
        .unwrap()
        .build()
        .unwrap();

    let loader = wf.workflow.node("2").unwrap();
    assert_eq!(loader.class_type, "TripleCLIPLoader");
    assert_eq!(literal(&wf, "2", "clip_name1"), "clip_l.safetensors");
    assert_eq!(literal(&wf, "2", "clip_name2"), "clip_g.safetensors");
    assert_eq!(literal(&wf, "2", "clip_name3"), "t5xxl_fp8_e4m3fn.safetensors");

    assert_eq!(literal(&wf, "3", "shift"), &json!(3.0));
    assert_eq!(wf.workflow.node("7").unwrap().linked("model").unwrap().node_id(), "3");
    let vae = wf.workflow.node("8").unwrap().linked("vae").unwrap();
    assert_eq!((vae.node_id(), vae.output()), ("1", 2));
}

#[tokio::test]
async fn sd35_encoder_tiers() {
    let r = resolver(FakeBackend::new().with_encoders(&["clip_l.safetensors", "clip_g.safetensors"]));
    assert_matches!(
        select_encoders("sd3.5_medium.safetensors", &r).await,
        Ok(EncoderSetup::DualClip { .. })
    );

    let r = resolver(FakeBackend::new().with_encoders(&["t5xxl_fp16.safetensors"]));
    assert_matches!(
        select_encoders("sd3.5_medium.safetensors", &r).await,
        Ok(EncoderSetup::T5Only { t5 }) if t5 == "t5xxl_fp16.safetensors"
    );

    // CLIP-L alone is not a usable configuration.
    let r = resolver(FakeBackend::new().with_encoders(&["clip_l.safetensors"]));
    assert_matches!(
        select_encoders("sd3.5_medium.safetensors", &r).await,
        Err(e) if e.kind == ErrorKind::MissingEncoder
    );
}

// ---------------------------------------------------------------------------
// Generic SD
// ---------------------------------------------------------------------------

fn options(family: ModelFamily) -> GenericSdOptions<'static> {
    GenericSdOptions {
        family,
        is_custom_sd: false,
        custom_vae: None,
    }
}

#[tokio::test]
async fn sd3_checkpoint_always_uses_its_own_vae() {
    let r = resolver(FakeBackend::new().with_vaes(&["sdxl_vae.safetensors", "ae.safetensors"]));
    let wf = build_generic_sd(
        "sd3.5_large_fp8_scaled.safetensors",
        &GenerationParams::new("x"),
        &r,
        options(ModelFamily::Sd3),
    )
    .await
    .unwrap()
    .build()
    .unwrap();

    assert!(wf.workflow.find_class("VAELoader").is_none());
    let vae = wf.workflow.node("8").unwrap().linked("vae").unwrap();
    assert_eq!((vae.node_id(), vae.output()), ("1", 2));
    assert_eq!(literal(&wf, "7", "scheduler"), "sgm_uniform");
    assert_eq!(wf.workflow.node("6").unwrap().class_type, "EmptySD3LatentImage");
}

#[tokio::test]
async fn sdxl_attaches_external_vae_when_live() {
    let r = resolver(FakeBackend::new().with_vaes(&["sdxl_vae.safetensors"]));
    let wf = build_generic_sd(
        "sd_xl_base_1.0.safetensors",
        &GenerationParams::new("x"),
        &r,
        options(ModelFamily::Sdxl),
    )
    .await
    .unwrap()
    .build()
    .unwrap();

    assert_eq!(literal(&wf, "4", "vae_name"), "sdxl_vae.safetensors");
    assert_eq!(wf.workflow.node("8").unwrap().linked("vae").unwrap().node_id(), "4");
    assert_eq!(literal(&wf, "7", "scheduler"), "normal");
    assert_eq!(literal(&wf, "7", "denoise"), &json!(1.0));
}

#[tokio::test]
async fn sd15_without_vae_falls_back_to_checkpoint_vae() {
    let r = resolver(FakeBackend::new());
    let wf = build_generic_sd(
        "v1-5-pruned-emaonly.safetensors",
        &GenerationParams::new("x"),
        &r,
        options(ModelFamily::Sd1),
    )
    .await
    .unwrap()
    .build()
    .unwrap();

    assert!(wf.workflow.node("4").is_none());
    assert_eq!(literal(&wf, "6", "width"), &json!(512));
    assert_eq!(wf.workflow.node("6").unwrap().class_type, "EmptyLatentImage");
}

#[tokio::test]
async fn generic_img2img_uses_strength_default() {
    let r = resolver(FakeBackend::new());
    let mut params = GenerationParams::new("x");
    params.image_url = Some("input.png".into());
    let wf = build_generic_sd(
        "sd_xl_base_1.0.safetensors",
        &params,
        &r,
        options(ModelFamily::Sdxl),
    )
    .await
    .unwrap()
    .build()
    .unwrap();

    assert_eq!(literal(&wf, "5", "image"), "input.png");
    assert_eq!(wf.workflow.node("6").unwrap().class_type, "VAEEncode");
    assert_eq!(literal(&wf, "7", "denoise"), &json!(0.75));
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn krea_is_built_with_the_dev_graph() {
    let r = resolver(FakeBackend::flux(&["flux1-krea-dev.safetensors"]));
    let wf = build_workflow(
        "comfyui/flux-krea-dev",
        "flux1-krea-dev.safetensors",
        &GenerationParams::new("x"),
        &r,
    )
    .await
    .unwrap();
    assert_eq!(wf.workflow.node("4").unwrap().class_type, "CLIPTextEncodeFlux");
    assert_eq!(literal(&wf, "7", "steps"), &json!(20));
}

#[tokio::test]
async fn unknown_file_is_unsupported() {
    let r = resolver(FakeBackend::new());
    let err = build_workflow("my-model", "my-model.safetensors", &GenerationParams::new("x"), &r)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnsupportedModel);
}
