//! mpv IPC driver with separated reader/writer tasks.
//!
//! ```text
//!   Engine::spawn_and_connect()
//!         │
//!         ├── writer_task   ← receives requests via mpsc, serialises → socket
//!         └── reader_task   ← reads JSON lines from socket
//!                                ├── response (has request_id) → matched oneshot::Sender
//!                                └── event / property / log     → EngineEvent channel
//! ```
//!
//! `EngineHandle` is cheaply cloneable; `send(cmd)` returns a future of the
//! response.  Everything the engine reports arrives as an [`EngineEvent`] on
//! one channel and is pumped into the orchestrator — the engine never calls
//! back into shared state.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use nightwave_core::platform;

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

// observe_property IDs; matched in property-change events
const OBS_ICY_TITLE: u64 = 1;
const OBS_MEDIA_TITLE: u64 = 2;
const OBS_CORE_IDLE: u64 = 3;
const OBS_PAUSE: u64 = 4;

/// Log line mpv emits when a live stream resynchronises after a stall.
/// Not an error; it means the displayed metadata may be stale.
const DISCONTINUITY_MARKER: &str = "Linearizing discontinuity";

/// What the engine reports, already interpreted.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// New inband title metadata (either underlying key, non-empty).
    Metadata(String),
    /// Stream resynchronised; a metadata refresh is advisable.
    Discontinuity,
    /// false once audio is actually flowing.
    CoreIdle(bool),
    PauseChanged(bool),
    /// The stream ended on its own (eof or error) — not a station switch.
    Ended,
}

struct PendingRequest {
    req_id: u64,
    payload: String, // serialised JSON line, '\n' included
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<PendingRequest>,
}

impl EngineHandle {
    async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let msg = json!({ "command": command, "request_id": req_id });
        let mut raw = serde_json::to_string(&msg)?;
        raw.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PendingRequest {
                req_id,
                payload: raw,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("engine writer task gone"))?;

        tokio::time::timeout(std::time::Duration::from_secs(5), reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("engine IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("engine reply channel dropped req={}", req_id))?
    }

    pub async fn load_stream(&self, url: &str) -> anyhow::Result<()> {
        self.send(json!(["loadfile", url])).await?;
        let _ = self.send(json!(["set_property", "pause", false])).await;
        Ok(())
    }

    pub async fn set_volume(&self, percent: f32) -> anyhow::Result<()> {
        let vol = percent.clamp(0.0, 100.0);
        self.send(json!(["set_property", "volume", vol])).await?;
        Ok(())
    }

    pub async fn toggle_pause(&self) -> anyhow::Result<()> {
        self.send(json!(["cycle", "pause"])).await?;
        Ok(())
    }

    /// Register every property observation and the log-message feed.  Must
    /// run once after each fresh connection.
    pub async fn observe_all(&self) {
        let props = [
            (OBS_ICY_TITLE, "metadata/by-key/icy-title"),
            (OBS_MEDIA_TITLE, "media-title"),
            (OBS_CORE_IDLE, "core-idle"),
            (OBS_PAUSE, "pause"),
        ];
        for (id, name) in &props {
            match self.send(json!(["observe_property", id, name])).await {
                Ok(_) => debug!("engine: observe_property id={} name={}", id, name),
                Err(e) => warn!("engine: observe_property {} failed: {}", name, e),
            }
        }
        // Discontinuities only show up in the log stream.
        if let Err(e) = self.send(json!(["request_log_messages", "warn"])).await {
            warn!("engine: request_log_messages failed: {}", e);
        }
    }
}

/// Owns the mpv child process.
pub struct Engine {
    process: Option<tokio::process::Child>,
}

impl Engine {
    pub fn new() -> Self {
        Self { process: None }
    }

    /// Spawn mpv and connect to its IPC socket.  Failure here is fatal to
    /// startup; the caller reports it upward rather than retrying.
    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<EngineEvent>,
        volume: f32,
    ) -> anyhow::Result<EngineHandle> {
        if let Some(mut p) = self.process.take() {
            let _ = p.kill().await;
        }

        let socket_path = platform::mpv_socket_path();
        let _ = tokio::fs::remove_file(&socket_path).await;

        let mpv_binary = platform::find_mpv_binary()
            .ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;

        info!("engine: spawning {}", mpv_binary.display());
        let child = tokio::process::Command::new(mpv_binary)
            .arg("--no-video")
            .arg("--idle=yes")
            .arg(format!("--input-ipc-server={}", socket_path.display()))
            .arg("--quiet")
            .arg(format!("--volume={}", volume.clamp(0.0, 100.0).round() as i64))
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()?;
        self.process = Some(child);

        // Wait for the IPC socket to appear
        for _ in 0..50 {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            if socket_path.exists() {
                break;
            }
        }
        if !socket_path.exists() {
            anyhow::bail!("mpv IPC socket did not appear");
        }

        let stream = UnixStream::connect(&socket_path).await?;
        info!("engine: connected to IPC socket");

        let (read_half, write_half) = stream.into_split();
        let reader = BufReader::new(read_half);

        // pending map: req_id → reply channel, shared between writer (inserts)
        // and reader (resolves)
        let pending: Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);

        tokio::spawn(writer_task(write_half, cmd_rx, pending.clone()));
        tokio::spawn(reader_task(reader, pending, event_tx));

        let handle = EngineHandle { tx: cmd_tx };
        handle.observe_all().await;
        Ok(handle)
    }
}

async fn reader_task<R>(
    mut reader: BufReader<R>,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>,
    event_tx: mpsc::Sender<EngineEvent>,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("engine reader: connection closed");
                let mut map = pending.lock().await;
                for (_, tx) in map.drain() {
                    let _ = tx.send(Err(anyhow::anyhow!("engine IPC connection closed")));
                }
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("engine reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                if let Some(req_id) = val.get("request_id").and_then(|v| v.as_u64()) {
                    let mut map = pending.lock().await;
                    if let Some(tx) = map.remove(&req_id) {
                        let result = if val["error"].as_str() == Some("success") {
                            Ok(val)
                        } else {
                            let err =
                                val["error"].as_str().unwrap_or("unknown error").to_string();
                            Err(anyhow::anyhow!("mpv error: {}", err))
                        };
                        let _ = tx.send(result);
                    } else {
                        debug!("engine reader: response for unknown req={}", req_id);
                    }
                } else if let Some(ev) = interpret(&val) {
                    let _ = event_tx.send(ev).await;
                }
            }
            Err(e) => {
                warn!("engine reader: read error: {}", e);
                let mut map = pending.lock().await;
                for (_, tx) in map.drain() {
                    let _ = tx.send(Err(anyhow::anyhow!("engine IPC read error: {}", e)));
                }
                break;
            }
        }
    }
}

async fn writer_task<W>(
    mut writer: W,
    mut rx: mpsc::Receiver<PendingRequest>,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>,
) where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // Register the reply channel before writing so the reader can match it
        {
            let mut map = pending.lock().await;
            map.insert(req.req_id, req.reply);
        }
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("engine writer: write error: {}", e);
            let mut map = pending.lock().await;
            if let Some(tx) = map.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("engine write error: {}", e)));
            }
            break;
        }
    }
    debug!("engine writer: task exiting");
}

/// Translate an unsolicited mpv message into an [`EngineEvent`].
///
/// Both metadata properties are treated identically: each emission carries
/// the first non-empty value it has.  Empty strings and nulls (cleared
/// metadata) are dropped here.
fn interpret(val: &Value) -> Option<EngineEvent> {
    match val.get("event")?.as_str()? {
        "property-change" => {
            let id = val.get("id")?.as_u64()?;
            let data = val.get("data").unwrap_or(&Value::Null);
            match id {
                OBS_ICY_TITLE | OBS_MEDIA_TITLE => {
                    let title = data.as_str()?.trim();
                    if title.is_empty() {
                        None
                    } else {
                        Some(EngineEvent::Metadata(title.to_string()))
                    }
                }
                OBS_CORE_IDLE => Some(EngineEvent::CoreIdle(data.as_bool()?)),
                OBS_PAUSE => Some(EngineEvent::PauseChanged(data.as_bool()?)),
                _ => None,
            }
        }
        "log-message" => {
            let text = val.get("text")?.as_str()?;
            if text.contains(DISCONTINUITY_MARKER) {
                Some(EngineEvent::Discontinuity)
            } else {
                None
            }
        }
        // end-file with reason "stop"/"redirect" is our own loadfile/stop;
        // only a genuine eof or error counts as the stream ending
        "end-file" => match val.get("reason").and_then(|r| r.as_str()) {
            Some("eof") | Some("error") => Some(EngineEvent::Ended),
            _ => None,
        },
        _ => None,
    }
}

// ── orchestrator-facing adapter ───────────────────────────────────────────────

/// Fire-and-forget playback control over the IPC handle.  Failures are
/// logged; outcomes are observed through engine events, never return values.
pub struct EnginePlayer {
    handle: EngineHandle,
}

impl EnginePlayer {
    pub fn new(handle: EngineHandle) -> Self {
        Self { handle }
    }
}

impl crate::core::PlayerControl for EnginePlayer {
    fn play(&self, url: &str) {
        let handle = self.handle.clone();
        let url = url.to_string();
        tokio::spawn(async move {
            if let Err(e) = handle.load_stream(&url).await {
                warn!("engine: play {} failed: {}", url, e);
            }
        });
    }

    fn toggle_pause(&self) {
        let handle = self.handle.clone();
        tokio::spawn(async move {
            if let Err(e) = handle.toggle_pause().await {
                warn!("engine: toggle pause failed: {}", e);
            }
        });
    }

    fn set_volume(&self, percent: f32) {
        let handle = self.handle.clone();
        tokio::spawn(async move {
            if let Err(e) = handle.set_volume(percent).await {
                warn!("engine: set volume failed: {}", e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpret_icy_title() {
        let val = json!({"event": "property-change", "id": OBS_ICY_TITLE, "data": "A - B"});
        assert_eq!(interpret(&val), Some(EngineEvent::Metadata("A - B".into())));
    }

    #[test]
    fn test_interpret_media_title_same_shape() {
        let val = json!({"event": "property-change", "id": OBS_MEDIA_TITLE, "data": "Show"});
        assert_eq!(interpret(&val), Some(EngineEvent::Metadata("Show".into())));
    }

    #[test]
    fn test_interpret_empty_metadata_dropped() {
        let val = json!({"event": "property-change", "id": OBS_ICY_TITLE, "data": ""});
        assert_eq!(interpret(&val), None);
        let val = json!({"event": "property-change", "id": OBS_ICY_TITLE, "data": null});
        assert_eq!(interpret(&val), None);
    }

    #[test]
    fn test_interpret_discontinuity_log_line() {
        let val = json!({
            "event": "log-message",
            "prefix": "stream",
            "level": "warn",
            "text": "Linearizing discontinuity: 132.48 -> 131.90\n"
        });
        assert_eq!(interpret(&val), Some(EngineEvent::Discontinuity));
    }

    #[test]
    fn test_interpret_other_log_lines_ignored() {
        let val = json!({
            "event": "log-message",
            "prefix": "cplayer",
            "level": "warn",
            "text": "cache underrun\n"
        });
        assert_eq!(interpret(&val), None);
    }

    #[test]
    fn test_interpret_end_file_reasons() {
        let val = json!({"event": "end-file", "reason": "eof"});
        assert_eq!(interpret(&val), Some(EngineEvent::Ended));
        let val = json!({"event": "end-file", "reason": "error"});
        assert_eq!(interpret(&val), Some(EngineEvent::Ended));
        // our own loadfile/stop must not read as the stream ending
        let val = json!({"event": "end-file", "reason": "stop"});
        assert_eq!(interpret(&val), None);
        let val = json!({"event": "end-file", "reason": "redirect"});
        assert_eq!(interpret(&val), None);
    }

    #[test]
    fn test_interpret_state_properties() {
        let val = json!({"event": "property-change", "id": OBS_CORE_IDLE, "data": false});
        assert_eq!(interpret(&val), Some(EngineEvent::CoreIdle(false)));
        let val = json!({"event": "property-change", "id": OBS_PAUSE, "data": true});
        assert_eq!(interpret(&val), Some(EngineEvent::PauseChanged(true)));
    }
}
