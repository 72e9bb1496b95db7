//! `comfybridge <model> <prompt> [params-json]`
//!
//! Runs one `create_image` request against the server configured in the
//! environment (see `ComfyUIConfig::from_env`) and prints the JSON result.
//! `--models` lists the logical model ids the server can serve.

use anyhow::{bail, Context};
use comfybridge_core::config::ComfyUIConfig;
use comfybridge_core::params::{CreateImagePayload, GenerationParams};
use comfybridge_pipeline::ComfyUIProvider;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "usage: comfybridge <model> <prompt> [params-json] | comfybridge --models";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "comfybridge=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = ComfyUIConfig::from_env().context("invalid ComfyUI configuration")?;
    tracing::info!(base_url = %config.base_url, auth = config.auth_kind(), "Loaded ComfyUI configuration");
    let provider = ComfyUIProvider::from_config(config);

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.first().map(String::as_str) == Some("--models") {
        let models = provider.models().await?;
        println!("{}", serde_json::to_string_pretty(&models)?);
        return Ok(());
    }

    let (model, prompt, extra) = match args.as_slice() {
        [model, prompt] => (model, prompt, None),
        [model, prompt, extra] => (model, prompt, Some(extra)),
        _ => bail!(USAGE),
    };

    let mut params: GenerationParams = match extra {
        Some(raw) => serde_json::from_value(with_prompt(raw, prompt)?)
            .context("params must be a JSON object of generation parameters")?,
        None => GenerationParams::default(),
    };
    params.prompt = prompt.clone();

    // Ctrl-C cancels the running prompt on the server.
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling");
            on_signal.cancel();
        }
    });

    let payload = CreateImagePayload {
        model: model.clone(),
        params,
    };
    match provider.create_image_with_cancel(payload, &cancel).await {
        Ok(response) => {
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
        Err(err) => {
            eprintln!("{}", serde_json::to_string_pretty(&err)?);
            std::process::exit(1);
        }
    }
}

/// `GenerationParams` requires `prompt`; add it to the extra JSON object.
fn with_prompt(raw: &str, prompt: &str) -> anyhow::Result<serde_json::Value> {
    let mut value: serde_json::Value =
        serde_json::from_str(raw).context("params must be valid JSON")?;
    let Some(object) = value.as_object_mut() else {
        bail!("params must be a JSON object");
    };
    object.insert("prompt".into(), prompt.into());
    Ok(value)
}
