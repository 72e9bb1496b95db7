#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use comfybridge_comfyui::api::ComfyUIApiError;
use comfybridge_comfyui::backend::{
    ComfyBackend, ExecutionOutput, ImageInfo, SamplerInfo, UploadedImage,
};
use comfybridge_comfyui::events::{ExecutionProgress, ProgressCallback};
use comfybridge_core::config::ComfyUIConfig;
use comfybridge_core::prompt::PreparedWorkflow;
use comfybridge_pipeline::resolver::ModelResolver;
use comfybridge_pipeline::service::ClientService;
use comfybridge_pipeline::ComfyUIProvider;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub const VIEW_BASE: &str = "http://comfy.test/view";

pub const FLUX_COMPONENTS: &[&str] = &["clip_l.safetensors", "t5xxl_fp16.safetensors"];
pub const FLUX_VAE: &str = "ae.safetensors";

/// How `run_workflow` answers.
#[derive(Debug, Clone)]
pub enum RunResult {
    /// Output node returns this `images` value.
    Images(Value),
    /// Output node has no `images` key.
    NoImagesKey,
    Error(String),
}

/// In-memory stand-in for a ComfyUI server.
pub struct FakeBackend {
    pub checkpoints: Vec<String>,
    pub encoders: Vec<String>,
    pub vaes: Vec<String>,
    pub reachable: bool,
    pub run_result: RunResult,
    pub checkpoint_calls: AtomicUsize,
    pub node_def_calls: AtomicUsize,
    pub stats_calls: AtomicUsize,
    pub uploads: Mutex<Vec<(String, usize)>>,
    pub submitted: Mutex<Vec<PreparedWorkflow>>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self {
            checkpoints: Vec::new(),
            encoders: Vec::new(),
            vaes: Vec::new(),
            reachable: true,
            run_result: RunResult::Images(json!([
                {"filename": "comfybridge_00001_.png", "subfolder": "", "type": "output"}
            ])),
            checkpoint_calls: AtomicUsize::new(0),
            node_def_calls: AtomicUsize::new(0),
            stats_calls: AtomicUsize::new(0),
            uploads: Mutex::new(Vec::new()),
            submitted: Mutex::new(Vec::new()),
        }
    }
}

/// Legacy enum input shape: `[[options...], {}]`.
fn combo(files: &[String]) -> Value {
    json!([files, {}])
}

fn owned(files: &[&str]) -> Vec<String> {
    files.iter().map(|f| f.to_string()).collect()
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_checkpoints(mut self, files: &[&str]) -> Self {
        self.checkpoints = owned(files);
        self
    }

    pub fn with_encoders(mut self, files: &[&str]) -> Self {
        self.encoders = owned(files);
        self
    }

    pub fn with_vaes(mut self, files: &[&str]) -> Self {
        self.vaes = owned(files);
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    pub fn with_run_result(mut self, result: RunResult) -> Self {
        self.run_result = result;
        self
    }

    /// Server with FLUX encoders, the FLUX VAE and the given checkpoints.
    pub fn flux(checkpoints: &[&str]) -> Self {
        Self::new()
            .with_checkpoints(checkpoints)
            .with_encoders(FLUX_COMPONENTS)
            .with_vaes(&[FLUX_VAE])
    }

    pub fn last_submitted(&self) -> Option<PreparedWorkflow> {
        self.submitted.lock().unwrap().last().cloned()
    }

    fn node_defs(&self) -> Value {
        json!({
            "CLIPLoader": {"input": {"required": {"clip_name": combo(&self.encoders)}}},
            "DualCLIPLoader": {"input": {"required": {
                "clip_name1": combo(&self.encoders),
                "clip_name2": combo(&self.encoders),
            }}},
            "TripleCLIPLoader": {"input": {"required": {
                "clip_name1": combo(&self.encoders),
                "clip_name2": combo(&self.encoders),
                "clip_name3": combo(&self.encoders),
            }}},
            "VAELoader": {"input": {"required": {"vae_name": combo(&self.vaes)}}},
            "KSampler": {"input": {"required": {
                "sampler_name": [["euler", "dpmpp_2m"], {}],
                "scheduler": [["normal", "simple", "sgm_uniform"], {}],
            }}},
        })
    }

    fn offline(&self) -> Result<(), ComfyUIApiError> {
        if self.reachable {
            Ok(())
        } else {
            Err(ComfyUIApiError::WebSocket("connect ECONNREFUSED 127.0.0.1:8000".into()))
        }
    }
}

impl ComfyBackend for FakeBackend {
    async fn system_stats(&self) -> Result<Value, ComfyUIApiError> {
        self.stats_calls.fetch_add(1, Ordering::SeqCst);
        self.offline()?;
        Ok(json!({"system": {"os": "posix"}}))
    }

    async fn get_checkpoints(&self) -> Result<Vec<String>, ComfyUIApiError> {
        self.checkpoint_calls.fetch_add(1, Ordering::SeqCst);
        self.offline()?;
        Ok(self.checkpoints.clone())
    }

    async fn get_loras(&self) -> Result<Vec<String>, ComfyUIApiError> {
        self.offline()?;
        Ok(Vec::new())
    }

    async fn get_node_defs(&self, node_name: Option<&str>) -> Result<Value, ComfyUIApiError> {
        self.node_def_calls.fetch_add(1, Ordering::SeqCst);
        self.offline()?;
        let defs = self.node_defs();
        Ok(match node_name {
            Some(name) => json!({ name: defs.get(name).cloned().unwrap_or(Value::Null) }),
            None => defs,
        })
    }

    async fn get_sampler_info(&self) -> Result<SamplerInfo, ComfyUIApiError> {
        self.offline()?;
        Ok(SamplerInfo {
            sampler: owned(&["euler", "dpmpp_2m"]),
            scheduler: owned(&["normal", "simple", "sgm_uniform"]),
        })
    }

    async fn upload_image(
        &self,
        data: Vec<u8>,
        file_name: &str,
    ) -> Result<UploadedImage, ComfyUIApiError> {
        self.offline()?;
        self.uploads
            .lock()
            .unwrap()
            .push((file_name.to_string(), data.len()));
        Ok(UploadedImage {
            name: file_name.to_string(),
        })
    }

    async fn run_workflow(
        &self,
        workflow: &PreparedWorkflow,
        on_progress: Option<&ProgressCallback>,
        _cancel: &CancellationToken,
    ) -> Result<ExecutionOutput, ComfyUIApiError> {
        self.offline()?;
        self.submitted.lock().unwrap().push(workflow.clone());

        if let Some(cb) = on_progress {
            for value in 1..=2 {
                cb(&ExecutionProgress {
                    prompt_id: "prompt-1".into(),
                    node: Some("7".into()),
                    value,
                    max: 2,
                });
            }
        }

        let node_output = match &self.run_result {
            RunResult::Images(images) => json!({ "images": images }),
            RunResult::NoImagesKey => json!({ "text": ["done"] }),
            RunResult::Error(message) => {
                return Err(ComfyUIApiError::Execution {
                    prompt_id: "prompt-1".into(),
                    node_id: "7".into(),
                    node_type: Some("KSampler".into()),
                    exception_type: "RuntimeError".into(),
                    message: message.clone(),
                })
            }
        };
        let mut outputs = BTreeMap::new();
        outputs.insert(workflow.output_node.clone(), node_output);
        Ok(ExecutionOutput {
            prompt_id: "prompt-1".into(),
            outputs,
        })
    }

    fn get_path_image(&self, image: &ImageInfo) -> String {
        format!(
            "{VIEW_BASE}?filename={}&subfolder={}&type={}",
            image.filename, image.subfolder, image.folder_type
        )
    }
}

pub fn service(backend: FakeBackend) -> Arc<ClientService<FakeBackend>> {
    Arc::new(ClientService::with_ttl(backend, Duration::from_secs(60)))
}

pub fn resolver(backend: FakeBackend) -> ModelResolver<FakeBackend> {
    ModelResolver::new(service(backend))
}

pub fn provider(backend: FakeBackend) -> ComfyUIProvider<FakeBackend> {
    ComfyUIProvider::with_backend(backend, ComfyUIConfig::default())
}

/// Literal input `name` of `node_id`.
pub fn literal<'a>(workflow: &'a PreparedWorkflow, node_id: &str, name: &str) -> &'a Value {
    workflow
        .workflow
        .node(node_id)
        .and_then(|n| n.literal(name))
        .unwrap_or_else(|| panic!("{node_id}.inputs.{name} missing"))
}

/// Local HTTP server answering every request with `status` and `body`.
///
/// Without `declare_length` the body is close-delimited, so the client only
/// learns its size while streaming. Returns the server root URL.
pub async fn serve_image(status: u16, body: Vec<u8>, declare_length: bool) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let body = Arc::new(body);
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let body = Arc::clone(&body);
            tokio::spawn(async move {
                let mut head = Vec::new();
                let mut buf = [0u8; 4096];
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => head.extend_from_slice(&buf[..n]),
                    }
                }
                let mut response = format!(
                    "HTTP/1.1 {status} Test\r\nContent-Type: image/jpeg\r\nConnection: close\r\n"
                );
                if declare_length {
                    response.push_str(&format!("Content-Length: {}\r\n", body.len()));
                }
                response.push_str("\r\n");
                // The client hangs up early on oversized bodies.
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.write_all(&body).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    format!("http://{addr}")
}
