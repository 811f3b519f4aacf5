//! mpv IPC client.
//!
//! One-shot commands over the player's Unix socket: each call opens the
//! socket, writes a single `{"command": [...]}` line and (for property reads)
//! waits for the response matching our `request_id`, skipping the event lines
//! mpv interleaves on the same connection.  Connect failure fails the one
//! operation, never the watcher that issued it.

use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::debug;

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

const REPLY_TIMEOUT: Duration = Duration::from_secs(2);
/// Bounded polling ceiling for load readiness.
const LOAD_READY_POLLS: u32 = 10;
const LOAD_READY_STEP: Duration = Duration::from_millis(100);
/// The player may still be mid-load when the first seek lands.
const SEEK_RETRY_DELAY: Duration = Duration::from_millis(150);

#[derive(Debug, Clone)]
pub struct PlayerClient {
    socket: PathBuf,
}

impl PlayerClient {
    pub fn new(socket: PathBuf) -> Self {
        Self { socket }
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    async fn request(&self, command: Value, want_reply: bool) -> anyhow::Result<Option<Value>> {
        let stream = UnixStream::connect(&self.socket).await?;
        let (read_half, mut writer) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let msg = json!({ "command": command, "request_id": req_id });
        let mut raw = serde_json::to_string(&msg)?;
        raw.push('\n');
        debug!("player ipc send: req={} cmd={}", req_id, command);
        writer.write_all(raw.as_bytes()).await?;

        if !want_reply {
            return Ok(None);
        }

        let deadline = tokio::time::Instant::now() + REPLY_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                anyhow::bail!("player ipc timeout waiting for response req={}", req_id);
            }

            let mut line = String::new();
            match tokio::time::timeout(remaining, reader.read_line(&mut line)).await {
                Ok(Ok(0)) => anyhow::bail!("player ipc: connection closed"),
                Ok(Ok(_)) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    let resp: Value = match serde_json::from_str(trimmed) {
                        Ok(v) => v,
                        Err(e) => {
                            debug!("player ipc: invalid json line: {} ({})", trimmed, e);
                            continue;
                        }
                    };
                    if resp.get("request_id").and_then(|v| v.as_u64()) == Some(req_id) {
                        debug!("player ipc recv: req={} resp={}", req_id, resp);
                        return Ok(Some(resp));
                    }
                    // Unsolicited event line; skip.
                }
                Ok(Err(e)) => anyhow::bail!("player ipc read error: {}", e),
                Err(_) => anyhow::bail!("player ipc timeout req={}", req_id),
            }
        }
    }

    /// Send one command and discard the reply.
    pub async fn command(&self, command: Value) -> anyhow::Result<()> {
        self.request(command, false).await?;
        Ok(())
    }

    /// Fire-and-forget: IPC failure degrades to a logged no-op.
    pub async fn fire(&self, command: Value) {
        if let Err(e) = self.command(command.clone()).await {
            debug!("player ipc dropped {}: {}", command, e);
        }
    }

    // ── property reads ───────────────────────────────────────────────────────

    /// `None` for IPC failure, error replies and JSON null alike.
    pub async fn get_property(&self, name: &str) -> Option<Value> {
        let resp = self
            .request(json!(["get_property", name]), true)
            .await
            .ok()??;
        if resp["error"].as_str() != Some("success") {
            return None;
        }
        let data = resp.get("data")?.clone();
        if data.is_null() {
            None
        } else {
            Some(data)
        }
    }

    pub async fn get_string(&self, name: &str) -> String {
        self.get_property(name)
            .await
            .and_then(|v| v.as_str().map(|s| s.to_string()))
            .unwrap_or_default()
    }

    pub async fn get_f64(&self, name: &str) -> Option<f64> {
        self.get_property(name).await.and_then(|v| v.as_f64())
    }

    pub async fn get_bool(&self, name: &str) -> bool {
        self.get_property(name)
            .await
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    // ── playback ─────────────────────────────────────────────────────────────

    /// Replace-load `path`, wait (bounded) until the player reports it, seek
    /// if asked, and make sure playback is running.
    pub async fn load(&self, path: &Path, seek: u64) -> anyhow::Result<()> {
        let wanted = path.to_string_lossy().to_string();
        self.command(json!(["loadfile", wanted, "replace"])).await?;

        for _ in 0..LOAD_READY_POLLS {
            tokio::time::sleep(LOAD_READY_STEP).await;
            let current = self.get_string("path").await;
            if current == wanted {
                break;
            }
            if self.get_f64("duration").await.unwrap_or(0.0) > 0.0 {
                break;
            }
        }

        if seek > 0 {
            self.fire(json!(["seek", seek, "absolute+exact"])).await;
            tokio::time::sleep(SEEK_RETRY_DELAY).await;
            self.fire(json!(["seek", seek, "absolute+exact"])).await;
        }

        self.fire(json!(["set_property", "pause", false])).await;
        Ok(())
    }

    /// Load a URL (weather multicast, live streams).  No readiness polling;
    /// network sources buffer on their own schedule.
    pub async fn load_url(&self, url: &str) -> anyhow::Result<()> {
        self.command(json!(["loadfile", url, "replace"])).await?;
        self.fire(json!(["set_property", "pause", false])).await;
        Ok(())
    }

    // ── labeled filters ──────────────────────────────────────────────────────

    /// Adding an already-present label is treated as a no-op by dropping the
    /// error reply; labels keep the scramble and the crawl independent.
    pub async fn add_filter(&self, label: &str, graph: &str) {
        self.fire(json!(["vf", "add", format!("@{label}:lavfi=[{graph}]")]))
            .await;
    }

    pub async fn remove_filter(&self, label: &str) {
        self.fire(json!(["vf", "remove", format!("@{label}")])).await;
    }

    // ── small wrappers ───────────────────────────────────────────────────────

    pub async fn set_property(&self, name: &str, value: Value) {
        self.fire(json!(["set_property", name, value])).await;
    }

    pub async fn set_mute(&self, on: bool) {
        self.set_property("mute", json!(on)).await;
    }

    pub async fn cycle_mute(&self) {
        self.fire(json!(["cycle", "mute"])).await;
    }

    pub async fn add_volume(&self, delta: i64) {
        self.fire(json!(["add", "volume", delta])).await;
    }

    pub async fn show_text(&self, text: &str, duration_ms: u64) {
        self.fire(json!(["show-text", text, duration_ms])).await;
    }

    pub async fn eof_reached(&self) -> bool {
        self.get_bool("eof-reached").await
    }

    pub async fn idle_active(&self) -> bool {
        self.get_bool("idle-active").await
    }

    pub async fn current_path(&self) -> String {
        self.get_string("path").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::UnixListener;

    /// Fake player: answers every get_property with a canned value after
    /// first emitting an unsolicited event line, exactly the interleaving
    /// mpv produces.
    async fn fake_player(listener: UnixListener, data: Value) {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let data = data.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                let Ok(n) = stream.read(&mut buf).await else {
                    return;
                };
                let line = String::from_utf8_lossy(&buf[..n]);
                let req: Value = serde_json::from_str(line.trim()).unwrap();
                let req_id = req["request_id"].as_u64().unwrap();
                let event = json!({"event": "property-change", "id": 1, "data": 0.5});
                let reply = json!({"data": data, "error": "success", "request_id": req_id});
                let payload = format!("{event}\n{reply}\n");
                let _ = stream.write_all(payload.as_bytes()).await;
            });
        }
    }

    #[tokio::test]
    async fn get_property_skips_events_and_extracts_data() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("mpv.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        tokio::spawn(fake_player(listener, json!("/m/a.mp4")));

        let client = PlayerClient::new(socket);
        assert_eq!(client.get_string("path").await, "/m/a.mp4");
    }

    #[tokio::test]
    async fn missing_socket_is_a_soft_failure() {
        let client = PlayerClient::new(PathBuf::from("/nowhere/mpv.sock"));
        assert!(client.command(json!(["stop"])).await.is_err());
        assert_eq!(client.get_property("path").await, None);
        assert_eq!(client.get_string("path").await, "");
        // fire() swallows the failure entirely.
        client.fire(json!(["stop"])).await;
    }

    #[tokio::test]
    async fn null_data_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("mpv.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        tokio::spawn(fake_player(listener, Value::Null));

        let client = PlayerClient::new(socket);
        assert_eq!(client.get_property("time-pos").await, None);
        assert!(!client.get_bool("eof-reached").await);
    }
}
