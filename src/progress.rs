use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::time::Duration;

use futures_util::StreamExt;
use regex::Regex;
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::client::ComfyClient;
use crate::types::ProgressUpdate;

/// Time one socket sample may spend draining queued messages.
const SOCKET_DRAIN_WINDOW: Duration = Duration::from_millis(200);

/// Advisory progress signal for an in-flight generation.
///
/// Every variant is best-effort: a sample that yields nothing never blocks
/// or fails the completion wait. The poll loop stays identical whichever
/// variant is plugged in, so sources can be swapped or disabled freely.
pub enum ProgressSource {
    /// No progress signal; the wait is silent between polls.
    None,
    /// Scrape the server's own log file for sampler progress lines.
    LogFile(LogFileProgress),
    /// Listen to the server's WebSocket progress messages.
    Socket(SocketProgress),
}

impl ProgressSource {
    pub fn none() -> Self {
        Self::None
    }

    /// Incrementally scrape a server log file for progress lines.
    pub fn log_file(path: impl Into<PathBuf>) -> Self {
        Self::LogFile(LogFileProgress::new(path))
    }

    /// Connect to the server's WebSocket, filtered to one prompt id.
    /// Falls back to [`ProgressSource::None`] if the connection fails.
    pub async fn socket(client: &ComfyClient, prompt_id: impl Into<String>) -> Self {
        match SocketProgress::connect(client, prompt_id.into()).await {
            Some(socket) => Self::Socket(socket),
            None => Self::None,
        }
    }

    /// Take one best-effort sample. Returns only updates that are new
    /// since the previous sample.
    pub async fn sample(&mut self) -> Option<ProgressUpdate> {
        match self {
            Self::None => None,
            Self::LogFile(log) => log.sample(),
            Self::Socket(socket) => socket.sample().await,
        }
    }
}

/// Incremental log-file scraper.
///
/// Reads only bytes appended since the previous sample and scans them for
/// the sampler's `NN%|...| step/total` lines, with a bare-percent fallback.
/// A missing or truncated file yields no update.
pub struct LogFileProgress {
    path: PathBuf,
    offset: u64,
    step_pattern: Regex,
    percent_pattern: Regex,
}

impl LogFileProgress {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
            step_pattern: Regex::new(r"(\d{1,3})%\|[^|\n]*\|\s*(\d+)/(\d+)")
                .expect("static progress pattern"),
            percent_pattern: Regex::new(r"(\d{1,3})%").expect("static percent pattern"),
        }
    }

    fn sample(&mut self) -> Option<ProgressUpdate> {
        let mut file = std::fs::File::open(&self.path).ok()?;
        let len = file.metadata().ok()?.len();
        if len < self.offset {
            // Rotated or truncated; start over.
            self.offset = 0;
        }
        if len == self.offset {
            return None;
        }
        file.seek(SeekFrom::Start(self.offset)).ok()?;
        let mut chunk = String::new();
        file.take(len - self.offset)
            .read_to_string(&mut chunk)
            .ok()?;
        self.offset = len;
        self.parse_chunk(&chunk)
    }

    /// Last matching progress line in a chunk of new log output.
    fn parse_chunk(&self, chunk: &str) -> Option<ProgressUpdate> {
        if let Some(caps) = self.step_pattern.captures_iter(chunk).last() {
            let current = caps[2].parse().ok()?;
            let total = caps[3].parse().ok()?;
            return Some(ProgressUpdate {
                current_step: current,
                total_steps: total,
            });
        }
        let caps = self.percent_pattern.captures_iter(chunk).last()?;
        let percent: u32 = caps[1].parse().ok()?;
        Some(ProgressUpdate {
            current_step: percent.min(100),
            total_steps: 100,
        })
    }
}

/// WebSocket progress listener, filtered to one prompt id.
pub struct SocketProgress {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    prompt_id: String,
    closed: bool,
}

impl SocketProgress {
    async fn connect(client: &ComfyClient, prompt_id: String) -> Option<Self> {
        let ws_url = format!(
            "{}/ws?clientId={}",
            client
                .endpoint()
                .replace("http://", "ws://")
                .replace("https://", "wss://"),
            client.client_id()
        );
        match tokio_tungstenite::connect_async(&ws_url).await {
            Ok((ws, _)) => Some(Self {
                ws,
                prompt_id,
                closed: false,
            }),
            Err(e) => {
                tracing::warn!("WebSocket progress unavailable ({e}), continuing without it");
                None
            }
        }
    }

    /// Drain queued messages within a short window; return the newest
    /// progress update for our prompt, if any arrived.
    async fn sample(&mut self) -> Option<ProgressUpdate> {
        if self.closed {
            return None;
        }
        let deadline = tokio::time::Instant::now() + SOCKET_DRAIN_WINDOW;
        let mut latest = None;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, self.ws.next()).await {
                Err(_) => break,
                Ok(None) | Ok(Some(Err(_))) => {
                    self.closed = true;
                    break;
                }
                Ok(Some(Ok(msg))) if msg.is_text() => {
                    let text = msg.into_text().unwrap_or_default();
                    if let Some(update) = self.parse_message(&text) {
                        latest = Some(update);
                    }
                }
                Ok(Some(Ok(_))) => continue,
            }
        }
        latest
    }

    fn parse_message(&self, text: &str) -> Option<ProgressUpdate> {
        parse_progress_message(text, &self.prompt_id)
    }
}

/// Parse one WebSocket frame as a progress message for the given prompt.
fn parse_progress_message(text: &str, prompt_id: &str) -> Option<ProgressUpdate> {
    let json: serde_json::Value = serde_json::from_str(text).ok()?;
    if json.get("type").and_then(|v| v.as_str()) != Some("progress") {
        return None;
    }
    let data = json.get("data")?;
    // Skip messages for other prompts.
    if let Some(pid) = data.get("prompt_id").and_then(|v| v.as_str()) {
        if pid != prompt_id {
            return None;
        }
    }
    let value = data.get("value").and_then(|v| v.as_u64())? as u32;
    let max = data.get("max").and_then(|v| v.as_u64()).unwrap_or(1) as u32;
    Some(ProgressUpdate {
        current_step: value,
        total_steps: max,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_log_file_step_pattern() {
        let log = LogFileProgress::new("unused.log");
        let update = log
            .parse_chunk(" 40%|████      | 8/20 [00:05<00:08,  1.45it/s]\n")
            .unwrap();
        assert_eq!(update.current_step, 8);
        assert_eq!(update.total_steps, 20);
    }

    #[test]
    fn test_log_file_last_match_wins() {
        let log = LogFileProgress::new("unused.log");
        let chunk = " 10%|█ | 2/20\n 55%|█████▌ | 11/20\n";
        let update = log.parse_chunk(chunk).unwrap();
        assert_eq!(update.current_step, 11);
    }

    #[test]
    fn test_log_file_percent_fallback() {
        let log = LogFileProgress::new("unused.log");
        let update = log.parse_chunk("loading model: 73% done\n").unwrap();
        assert_eq!(update.current_step, 73);
        assert_eq!(update.total_steps, 100);
    }

    #[test]
    fn test_log_file_no_match() {
        let log = LogFileProgress::new("unused.log");
        assert!(log.parse_chunk("got prompt\n").is_none());
    }

    #[test]
    fn test_log_file_incremental_offsets() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("comfyui.log");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, " 25%|██▌       | 5/20").unwrap();
        file.flush().unwrap();

        let mut log = LogFileProgress::new(&path);
        let first = log.sample().unwrap();
        assert_eq!(first.current_step, 5);

        // Nothing new appended — no update.
        assert!(log.sample().is_none());

        writeln!(file, " 50%|█████     | 10/20").unwrap();
        file.flush().unwrap();
        let second = log.sample().unwrap();
        assert_eq!(second.current_step, 10);
    }

    #[test]
    fn test_log_file_missing_is_silent() {
        let mut log = LogFileProgress::new("/nonexistent/comfyui.log");
        assert!(log.sample().is_none());
    }

    #[tokio::test]
    async fn test_none_source_yields_nothing() {
        let mut source = ProgressSource::none();
        assert!(source.sample().await.is_none());
    }

    #[test]
    fn test_socket_progress_message() {
        let text = r#"{"type": "progress", "data": {"value": 12, "max": 20, "prompt_id": "abc"}}"#;
        let update = parse_progress_message(text, "abc").unwrap();
        assert_eq!(update.current_step, 12);
        assert_eq!(update.total_steps, 20);
    }

    #[test]
    fn test_socket_ignores_other_prompts() {
        let text = r#"{"type": "progress", "data": {"value": 5, "max": 20, "prompt_id": "other"}}"#;
        assert!(parse_progress_message(text, "abc").is_none());
    }

    #[test]
    fn test_socket_ignores_non_progress_types() {
        let text = r#"{"type": "executing", "data": {"node": null, "prompt_id": "abc"}}"#;
        assert!(parse_progress_message(text, "abc").is_none());
    }
}
