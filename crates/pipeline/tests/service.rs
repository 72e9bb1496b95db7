mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use comfybridge_core::error::ErrorKind;
use comfybridge_core::params::GenerationParams;
use comfybridge_pipeline::resolver::ModelResolver;
use comfybridge_pipeline::router::build_workflow;
use comfybridge_pipeline::service::ClientService;
use tokio_util::sync::CancellationToken;

use common::{service, FakeBackend, RunResult, VIEW_BASE};

#[tokio::test]
async fn connection_probe_is_sticky_until_caches_clear() {
    let s = service(FakeBackend::new());
    assert!(!s.is_connection_validated());

    s.validate_connection().await.unwrap();
    s.validate_connection().await.unwrap();
    assert!(s.is_connection_validated());
    assert_eq!(s.backend().stats_calls.load(Ordering::SeqCst), 1);

    s.clear_caches().await;
    assert!(!s.is_connection_validated());
    s.validate_connection().await.unwrap();
    assert_eq!(s.backend().stats_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn failed_probe_is_not_remembered() {
    let s = service(FakeBackend::new().unreachable());
    let err = s.validate_connection().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::ServiceUnavailable);
    assert!(!s.is_connection_validated());

    s.validate_connection().await.unwrap_err();
    assert_eq!(s.backend().stats_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn listings_are_cached_per_node_name() {
    let s = service(FakeBackend::new().with_checkpoints(&["flux1-dev.safetensors"]));

    s.get_checkpoints().await.unwrap();
    s.get_checkpoints().await.unwrap();
    assert_eq!(s.backend().checkpoint_calls.load(Ordering::SeqCst), 1);

    s.get_node_defs(Some("VAELoader")).await.unwrap();
    s.get_node_defs(Some("VAELoader")).await.unwrap();
    s.get_node_defs(None).await.unwrap();
    assert_eq!(s.backend().node_def_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn expired_listing_is_refetched() {
    let s = ClientService::with_ttl(
        FakeBackend::new().with_checkpoints(&["flux1-dev.safetensors"]),
        Duration::ZERO,
    );
    s.get_checkpoints().await.unwrap();
    s.get_checkpoints().await.unwrap();
    assert_eq!(s.backend().checkpoint_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn sampler_info_comes_from_the_backend() {
    let info = service(FakeBackend::new()).get_sampler_info().await.unwrap();
    assert!(info.sampler.iter().any(|s| s == "euler"));
    assert!(info.scheduler.iter().any(|s| s == "sgm_uniform"));
}

#[tokio::test]
async fn upload_failure_is_upload_failed_with_context() {
    let s = service(FakeBackend::new().unreachable());
    let err = s.upload_image(vec![0; 16], "in.png").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::UploadFailed);
    assert_eq!(err.detail("fileName").unwrap(), "in.png");
    assert_eq!(err.detail("bytes").unwrap(), 16);
    assert_eq!(err.detail("cause").unwrap(), "ServiceUnavailable");
}

#[tokio::test]
async fn execution_returns_images_of_the_output_node() {
    let s = service(FakeBackend::flux(&["flux1-dev.safetensors"]));
    let workflow = build_workflow(
        "comfyui/flux-dev",
        "flux1-dev.safetensors",
        &GenerationParams::new("a fox"),
        &ModelResolver::new(s.clone()),
    )
    .await
    .unwrap();

    let images = s
        .execute_workflow(&workflow, None, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(images.len(), 1);
    assert_eq!(
        s.get_path_image(&images[0]),
        format!("{VIEW_BASE}?filename=comfybridge_00001_.png&subfolder=&type=output")
    );
}

#[tokio::test]
async fn image_entries_without_filename_are_empty_result() {
    let s = service(
        FakeBackend::flux(&["flux1-dev.safetensors"])
            .with_run_result(RunResult::Images(serde_json::json!([{"subfolder": ""}]))),
    );
    let workflow = build_workflow(
        "comfyui/flux-dev",
        "flux1-dev.safetensors",
        &GenerationParams::new("a fox"),
        &ModelResolver::new(s.clone()),
    )
    .await
    .unwrap();

    let err = s
        .execute_workflow(&workflow, None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::EmptyResult);
}
