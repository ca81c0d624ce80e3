use std::path::Path;
use std::time::Duration;

use reqwest::multipart;
use reqwest::Client;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{ConductorError, Result};
use crate::types::{HistoryRecord, ImageRef, NodeOutput, QueueStatus};
use crate::workflow::WorkflowGraph;

/// Ports a local ComfyUI install is expected to listen on.
pub const DEFAULT_PORTS: [u16; 2] = [8188, 8000];

const READY_POLL_INTERVAL: Duration = Duration::from_millis(500);

fn normalize(endpoint: String) -> String {
    endpoint.trim_end_matches('/').to_string()
}

/// HTTP gateway to a ComfyUI server instance.
///
/// Covers prompt submission, history lookup, queue state, image
/// upload/download, model discovery, and execution control. Each client
/// carries its own endpoint and client id — there is no process-global
/// server state.
///
/// # Example
/// ```no_run
/// use comfy_conductor::ComfyClient;
///
/// # async fn example() -> comfy_conductor::Result<()> {
/// let client = ComfyClient::new("http://127.0.0.1:8188");
/// let healthy = client.health().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ComfyClient {
    http: Client,
    endpoint: String,
    client_id: String,
}

impl ComfyClient {
    /// Create a new client for the given endpoint, with a fresh v4 UUID
    /// as the client id.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            endpoint: normalize(endpoint.into()),
            client_id: Uuid::new_v4().to_string(),
        }
    }

    /// Probe `http://{host}:{port}` for each port and return a client for
    /// the first one that answers `/system_stats`.
    pub async fn discover(host: &str, ports: &[u16]) -> Option<Self> {
        for port in ports {
            let client = Self::new(format!("http://{host}:{port}"));
            if client.health().await.unwrap_or(false) {
                tracing::info!(endpoint = %client.endpoint, "discovered ComfyUI instance");
                return Some(client);
            }
        }
        None
    }

    /// Use a custom `reqwest::Client` (for connection pooling, timeouts, TLS).
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http = client;
        self
    }

    /// Override the client id used for prompt association and WebSocket
    /// filtering.
    pub fn with_client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = id.into();
        self
    }

    /// The configured endpoint URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The client id sent with every submission.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    fn unreachable_context(&self) -> String {
        format!(
            "Cannot connect to ComfyUI at {} — is the service running?",
            self.endpoint
        )
    }

    /// Surface non-2xx responses with the server body attached.
    async fn ensure_success(resp: reqwest::Response) -> Result<reqwest::Response> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ConductorError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }

    async fn get_json(&self, url: String, timeout: Duration, context: &str) -> Result<Value> {
        let resp = self
            .http
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| ConductorError::Network {
                context: context.to_string(),
                source: e,
            })?;
        let resp = Self::ensure_success(resp).await?;
        resp.json().await.map_err(|e| ConductorError::Network {
            context: format!("Failed to parse response from {url}"),
            source: e,
        })
    }

    // ── Health ──────────────────────────────────────────────────────

    /// Check whether ComfyUI is reachable via `/system_stats`.
    pub async fn health(&self) -> Result<bool> {
        let url = format!("{}/system_stats", self.endpoint);
        let resp = self
            .http
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| ConductorError::Network {
                context: self.unreachable_context(),
                source: e,
            })?;
        Ok(resp.status().is_success())
    }

    /// Poll `/system_stats` until the server answers or `timeout` elapses.
    ///
    /// This bounds the server-became-reachable phase only; job completion
    /// has its own deadline on the poller.
    pub async fn wait_until_ready(&self, timeout: Duration) -> Result<()> {
        let start = std::time::Instant::now();
        loop {
            if self.health().await.unwrap_or(false) {
                return Ok(());
            }
            if start.elapsed() >= timeout {
                return Err(ConductorError::NotReady(timeout));
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }

    // ── Prompt ──────────────────────────────────────────────────────

    /// Queue a workflow for execution. Returns the server's `prompt_id`.
    ///
    /// This is the one place structural errors are surfaced eagerly: a
    /// non-2xx response carries the server body, and node-level validation
    /// failures are raised as [`ConductorError::NodeErrors`].
    pub async fn queue_prompt(&self, workflow: &WorkflowGraph) -> Result<String> {
        let url = format!("{}/prompt", self.endpoint);
        let body = serde_json::json!({
            "prompt": workflow,
            "client_id": self.client_id,
        });

        let resp = self
            .http
            .post(&url)
            .timeout(Duration::from_secs(30))
            .json(&body)
            .send()
            .await
            .map_err(|e| ConductorError::Network {
                context: self.unreachable_context(),
                source: e,
            })?;
        let resp = Self::ensure_success(resp).await?;

        let json: Value = resp.json().await.map_err(|e| ConductorError::Network {
            context: "Failed to parse ComfyUI /prompt response".into(),
            source: e,
        })?;

        if let Some(errors) = json.get("node_errors").and_then(|v| v.as_object()) {
            if !errors.is_empty() {
                return Err(ConductorError::NodeErrors(
                    serde_json::to_string_pretty(errors).unwrap_or_default(),
                ));
            }
        }

        json.get("prompt_id")
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| ConductorError::InvalidResponse("Response missing prompt_id".into()))
    }

    // ── History ─────────────────────────────────────────────────────

    /// Fetch the history entry for a prompt. `None` until the job has
    /// finished executing — presence of the entry is the completion signal.
    pub async fn history(&self, prompt_id: &str) -> Result<Option<HistoryRecord>> {
        let url = format!("{}/history/{}", self.endpoint, prompt_id);
        let resp = self
            .http
            .get(&url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| ConductorError::Network {
                context: "Failed to fetch ComfyUI history".into(),
                source: e,
            })?;

        if !resp.status().is_success() {
            return Ok(None);
        }

        let json: Value = resp.json().await.map_err(|e| ConductorError::Network {
            context: "Failed to parse ComfyUI history response".into(),
            source: e,
        })?;

        Ok(parse_history_entry(&json, prompt_id))
    }

    // ── Images ──────────────────────────────────────────────────────

    /// Download an output image by reference. Returns raw bytes.
    pub async fn download_image(&self, img: &ImageRef) -> Result<Vec<u8>> {
        let url = reqwest::Url::parse_with_params(
            &format!("{}/view", self.endpoint),
            &[
                ("filename", img.filename.as_str()),
                ("subfolder", img.subfolder.as_str()),
                ("type", img.img_type.as_str()),
            ],
        )
        .map_err(|e| ConductorError::InvalidResponse(format!("Bad image URL: {e}")))?;

        let resp = self
            .http
            .get(url)
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| ConductorError::Network {
                context: format!("Failed to fetch image {} from ComfyUI", img.filename),
                source: e,
            })?;
        let resp = Self::ensure_success(resp).await?;

        let bytes = resp.bytes().await.map_err(|e| ConductorError::Network {
            context: "Failed to read image bytes".into(),
            source: e,
        })?;
        Ok(bytes.to_vec())
    }

    /// Upload an image into the server's input directory via
    /// `/upload/image`. Returns the server-side filename to reference in
    /// a LoadImage node.
    pub async fn upload_image(&self, file_name: &str, bytes: Vec<u8>) -> Result<String> {
        let mime = match Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("jpg") | Some("jpeg") => "image/jpeg",
            Some("webp") => "image/webp",
            _ => "image/png",
        };
        let part = multipart::Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(mime)
            .map_err(|e| ConductorError::Network {
                context: format!("Invalid upload part for {file_name}"),
                source: e,
            })?;
        let form = multipart::Form::new()
            .part("image", part)
            .text("overwrite", "true");

        let url = format!("{}/upload/image", self.endpoint);
        let resp = self
            .http
            .post(&url)
            .timeout(Duration::from_secs(60))
            .multipart(form)
            .send()
            .await
            .map_err(|e| ConductorError::Network {
                context: self.unreachable_context(),
                source: e,
            })?;
        let resp = Self::ensure_success(resp).await?;

        let json: Value = resp.json().await.map_err(|e| ConductorError::Network {
            context: "Failed to parse ComfyUI upload response".into(),
            source: e,
        })?;
        json.get("name")
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| ConductorError::InvalidResponse("Upload response missing name".into()))
    }

    /// Upload a local file, keeping its filename.
    pub async fn upload_image_file(&self, path: impl AsRef<Path>) -> Result<String> {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                ConductorError::Config(format!("Source image has no filename: {}", path.display()))
            })?
            .to_string();
        let bytes = tokio::fs::read(path).await?;
        self.upload_image(&file_name, bytes).await
    }

    // ── Queue / control ─────────────────────────────────────────────

    /// Current queue state (running + pending counts).
    pub async fn queue_status(&self) -> Result<QueueStatus> {
        let url = format!("{}/queue", self.endpoint);
        let json = self
            .get_json(url, Duration::from_secs(5), "Failed to fetch ComfyUI queue status")
            .await?;
        let count = |key: &str| {
            json.get(key)
                .and_then(|v| v.as_array())
                .map(|a| a.len() as u32)
                .unwrap_or(0)
        };
        Ok(QueueStatus {
            running: count("queue_running"),
            pending: count("queue_pending"),
        })
    }

    /// Interrupt the currently running generation.
    pub async fn interrupt(&self) -> Result<()> {
        let url = format!("{}/interrupt", self.endpoint);
        self.http
            .post(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| ConductorError::Network {
                context: "Failed to send interrupt".into(),
                source: e,
            })?;
        Ok(())
    }

    /// Free VRAM. If `unload_models` is true, all models are unloaded.
    pub async fn free_memory(&self, unload_models: bool) -> Result<()> {
        let url = format!("{}/free", self.endpoint);
        let body = if unload_models {
            serde_json::json!({"unload_models": true})
        } else {
            serde_json::json!({"free_memory": true})
        };
        self.http
            .post(&url)
            .timeout(Duration::from_secs(30))
            .json(&body)
            .send()
            .await
            .map_err(|e| ConductorError::Network {
                context: "Failed to send free memory request".into(),
                source: e,
            })?;
        Ok(())
    }

    // ── Model discovery ─────────────────────────────────────────────

    /// Checkpoint files the server knows about.
    pub async fn checkpoints(&self) -> Result<Vec<String>> {
        self.object_info_list(
            "CheckpointLoaderSimple",
            "/CheckpointLoaderSimple/input/required/ckpt_name/0",
        )
        .await
    }

    /// Sampler algorithms the server supports.
    pub async fn samplers(&self) -> Result<Vec<String>> {
        self.object_info_list("KSampler", "/KSampler/input/required/sampler_name/0")
            .await
    }

    /// Scheduler algorithms the server supports.
    pub async fn schedulers(&self) -> Result<Vec<String>> {
        self.object_info_list("KSampler", "/KSampler/input/required/scheduler/0")
            .await
    }

    async fn object_info_list(&self, node: &str, pointer: &str) -> Result<Vec<String>> {
        let url = format!("{}/object_info/{}", self.endpoint, node);
        let resp = self
            .http
            .get(&url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| ConductorError::Network {
                context: self.unreachable_context(),
                source: e,
            })?;

        if !resp.status().is_success() {
            return Ok(Vec::new());
        }

        let json: Value = resp.json().await.map_err(|e| ConductorError::Network {
            context: format!("Failed to parse {node} object_info"),
            source: e,
        })?;

        Ok(json
            .pointer(pointer)
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Parse one prompt's entry out of a `/history/{id}` response body.
fn parse_history_entry(json: &Value, prompt_id: &str) -> Option<HistoryRecord> {
    let entry = json.get(prompt_id)?;

    let status = entry
        .pointer("/status/status_str")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();
    let completed = entry
        .pointer("/status/completed")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let mut outputs = Vec::new();
    if let Some(nodes) = entry.get("outputs").and_then(|o| o.as_object()) {
        for (node_id, node_output) in nodes {
            let Some(imgs) = node_output.get("images").and_then(|i| i.as_array()) else {
                continue;
            };
            let images: Vec<ImageRef> = imgs
                .iter()
                .filter_map(|img| serde_json::from_value(img.clone()).ok())
                .collect();
            outputs.push(NodeOutput {
                node_id: node_id.clone(),
                images,
            });
        }
    }

    Some(HistoryRecord {
        status,
        completed,
        outputs,
    })
}
