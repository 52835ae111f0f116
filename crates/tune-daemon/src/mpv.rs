//! mpv over its JSON IPC socket, and the [`PlaybackEngine`] built on top.
//!
//! One mpv child per daemon.  Requests carry a `request_id`; a writer task
//! parks the reply sender in a shared table and a reader task completes it
//! when the matching line comes back.  Lines without a `request_id` are
//! events and are decoded straight into [`EngineEvent`]s.
//!
//! The socket is a Unix domain socket, or a named pipe on Windows.
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};
use tune_proto::config::MpvConfig;
use tune_proto::platform;
use tune_proto::protocol::RepeatMode;

use crate::engine::{EndReason, EngineError, EngineEvent, PlaybackEngine};

#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(windows)]
use tokio::net::windows::named_pipe::ClientOptions;

const REPLY_TIMEOUT: Duration = Duration::from_secs(5);
const CONNECT_ATTEMPTS: u32 = 50;
const CONNECT_POLL: Duration = Duration::from_millis(100);

// ── observed properties ─────────────────────────────────────────────────────

const OBS_PAUSE: u64 = 1;
const OBS_IDLE: u64 = 2;
const OBS_TIME_POS: u64 = 3;
const OBS_DURATION: u64 = 4;
const OBS_PATH: u64 = 5;

const OBSERVED: [(u64, &str); 5] = [
    (OBS_PAUSE, "pause"),
    (OBS_IDLE, "idle-active"),
    (OBS_TIME_POS, "time-pos"),
    (OBS_DURATION, "duration"),
    (OBS_PATH, "path"),
];

/// Decode one unsolicited mpv line.  `None` for anything the session does
/// not track.
fn decode_event(raw: &Value) -> Option<EngineEvent> {
    match raw.get("event")?.as_str()? {
        "property-change" => {
            let data = raw.get("data").unwrap_or(&Value::Null);
            match raw.get("id")?.as_u64()? {
                OBS_PAUSE => data.as_bool().map(EngineEvent::PauseChanged),
                OBS_IDLE => data.as_bool().map(EngineEvent::IdleChanged),
                OBS_TIME_POS => data.as_f64().map(|s| EngineEvent::Position(secs_to_ms(s))),
                OBS_DURATION => data.as_f64().map(|s| EngineEvent::Duration(secs_to_ms(s))),
                OBS_PATH => data.as_str().map(|p| EngineEvent::FileStarted {
                    path: p.to_string(),
                }),
                _ => None,
            }
        }
        "file-loaded" => Some(EngineEvent::Ready),
        "end-file" => Some(EngineEvent::EndFile {
            reason: raw
                .get("reason")
                .and_then(Value::as_str)
                .map_or(EndReason::Unknown, EndReason::parse),
            error: raw
                .get("file_error")
                .and_then(Value::as_str)
                .map(str::to_string),
        }),
        _ => None,
    }
}

fn secs_to_ms(secs: f64) -> u64 {
    (secs.max(0.0) * 1000.0).round() as u64
}

/// What one line from the socket turned out to be.
#[derive(Debug)]
enum Incoming {
    Reply { id: u64, result: Result<Value, String> },
    Event(Value),
}

fn classify(line: &str) -> Option<Incoming> {
    let val: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            debug!("mpv: unparseable line {:?}: {}", line, e);
            return None;
        }
    };
    let Some(id) = val.get("request_id").and_then(Value::as_u64) else {
        return Some(Incoming::Event(val));
    };
    let result = match val.get("error").and_then(Value::as_str) {
        Some("success") => Ok(val),
        Some(err) => Err(err.to_string()),
        None => Err("no status in reply".to_string()),
    };
    Some(Incoming::Reply { id, result })
}

// ── IPC client ──────────────────────────────────────────────────────────────

type Waiters = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

struct Outgoing {
    id: u64,
    /// One JSON line, newline included.
    line: String,
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

/// Request/response access to a connected mpv.  Cheap to clone.
#[derive(Clone)]
struct IpcClient {
    outgoing: mpsc::Sender<Outgoing>,
    next_id: Arc<AtomicU64>,
}

impl IpcClient {
    /// Split `read`/`write` into reader and writer tasks.  Events go to
    /// `events`; the channel closes when the connection does.
    fn start<R, W>(read: R, write: W, events: mpsc::Sender<EngineEvent>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let waiters: Waiters = Arc::new(Mutex::new(HashMap::new()));
        let (outgoing, rx) = mpsc::channel::<Outgoing>(64);
        tokio::spawn(write_loop(write, rx, waiters.clone()));
        tokio::spawn(read_loop(BufReader::new(read), waiters, events));
        Self {
            outgoing,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    async fn request(&self, command: Value) -> anyhow::Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut line = serde_json::to_string(&json!({ "command": command, "request_id": id }))?;
        line.push('\n');

        let (reply, rx) = oneshot::channel();
        self.outgoing
            .send(Outgoing { id, line, reply })
            .await
            .map_err(|_| anyhow::anyhow!("mpv connection is closed"))?;

        match tokio::time::timeout(REPLY_TIMEOUT, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => anyhow::bail!("mpv dropped request {}", id),
            Err(_) => anyhow::bail!("mpv did not answer request {} in time", id),
        }
    }

    /// Property observers die with the connection, so every new connection
    /// registers them again.
    async fn observe(&self) {
        for (id, name) in OBSERVED {
            if let Err(e) = self.request(json!(["observe_property", id, name])).await {
                warn!("mpv: cannot observe {}: {}", name, e);
            }
        }
    }

    /// Where `path` sits in mpv's playlist, which differs from ours once
    /// mpv has shuffled.
    async fn playlist_position(&self, path: &str) -> anyhow::Result<Option<usize>> {
        let resp = self.request(json!(["get_property", "playlist"])).await?;
        Ok(resp["data"]
            .as_array()
            .and_then(|entries| {
                entries
                    .iter()
                    .position(|e| e["filename"].as_str() == Some(path))
            }))
    }
}

async fn read_loop<R: AsyncRead + Unpin>(
    mut reader: BufReader<R>,
    waiters: Waiters,
    events: mpsc::Sender<EngineEvent>,
) {
    let mut line = String::new();
    let why = loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break "mpv closed the connection".to_string(),
            Err(e) => break format!("mpv read failed: {}", e),
            Ok(_) => {}
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match classify(trimmed) {
            Some(Incoming::Reply { id, result }) => {
                let Some(waiter) = waiters.lock().await.remove(&id) else {
                    debug!("mpv: reply {} has no waiter", id);
                    continue;
                };
                let _ = waiter.send(result.map_err(|e| anyhow::anyhow!("mpv: {}", e)));
            }
            Some(Incoming::Event(raw)) => {
                let Some(evt) = decode_event(&raw) else {
                    continue;
                };
                debug!("mpv: {:?}", evt);
                if events.send(evt).await.is_err() {
                    break "event receiver gone".to_string();
                }
            }
            None => {}
        }
    };
    debug!("mpv reader stopped: {}", why);
    for (_, waiter) in waiters.lock().await.drain() {
        let _ = waiter.send(Err(anyhow::anyhow!("{}", why)));
    }
    let _ = events.send(EngineEvent::Exited).await;
}

async fn write_loop<W: AsyncWrite + Unpin>(
    mut writer: W,
    mut rx: mpsc::Receiver<Outgoing>,
    waiters: Waiters,
) {
    while let Some(Outgoing { id, line, reply }) = rx.recv().await {
        // Parked before the write, or a fast reply would find no waiter
        waiters.lock().await.insert(id, reply);
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            warn!("mpv: write failed: {}", e);
            if let Some(waiter) = waiters.lock().await.remove(&id) {
                let _ = waiter.send(Err(anyhow::anyhow!("mpv write failed: {}", e)));
            }
            return;
        }
    }
}

// ── process ─────────────────────────────────────────────────────────────────

/// The mpv child and how to reach it.
struct MpvProcess {
    socket_name: String,
    binary: Option<PathBuf>,
    volume: u8,
    child: Option<tokio::process::Child>,
}

impl MpvProcess {
    fn new(config: &MpvConfig) -> Self {
        Self {
            socket_name: platform::mpv_socket_name(),
            binary: config.binary.clone(),
            volume: config.volume.min(100),
            child: None,
        }
    }

    fn running(&mut self) -> bool {
        self.child
            .as_mut()
            .is_some_and(|c| matches!(c.try_wait(), Ok(None)))
    }

    async fn kill(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill().await;
        }
    }

    fn spawn(&mut self) -> anyhow::Result<()> {
        let binary = platform::find_mpv_binary(self.binary.as_ref())
            .ok_or_else(|| anyhow::anyhow!("mpv not found; set [mpv] binary in the config"))?;
        info!("mpv: starting {:?}", binary);
        let child = tokio::process::Command::new(binary)
            .args(["--no-video", "--idle=yes", "--audio-display=no", "--quiet"])
            .arg(platform::mpv_socket_arg())
            .arg(format!("--volume={}", self.volume))
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        self.child = Some(child);
        Ok(())
    }

    /// Fresh process plus a connected client.
    #[cfg(unix)]
    async fn launch(&mut self, events: mpsc::Sender<EngineEvent>) -> anyhow::Result<IpcClient> {
        self.kill().await;
        let socket = PathBuf::from(&self.socket_name);
        let _ = tokio::fs::remove_file(&socket).await;
        self.spawn()?;

        for _ in 0..CONNECT_ATTEMPTS {
            tokio::time::sleep(CONNECT_POLL).await;
            if let Ok(stream) = UnixStream::connect(&socket).await {
                info!("mpv: IPC connected at {:?}", socket);
                let (read, write) = stream.into_split();
                return Ok(IpcClient::start(read, write, events));
            }
        }
        anyhow::bail!("mpv IPC socket {:?} never accepted a connection", socket)
    }

    #[cfg(windows)]
    async fn launch(&mut self, events: mpsc::Sender<EngineEvent>) -> anyhow::Result<IpcClient> {
        self.kill().await;
        self.spawn()?;

        let pipe = format!(r"\\.\pipe\{}", self.socket_name);
        for _ in 0..CONNECT_ATTEMPTS {
            tokio::time::sleep(CONNECT_POLL).await;
            if let Ok(client) = ClientOptions::new().open(&pipe) {
                info!("mpv: IPC connected at {}", pipe);
                let (read, write) = tokio::io::split(client);
                return Ok(IpcClient::start(read, write, events));
            }
        }
        anyhow::bail!("mpv pipe {} never appeared", pipe)
    }
}

// ── engine ──────────────────────────────────────────────────────────────────

/// mpv as the session's playback engine.  mpv keeps its own playlist, so
/// next/previous/shuffle/repeat are handed straight to it.
pub struct MpvEngine {
    process: MpvProcess,
    client: Option<IpcClient>,
    shuffle: bool,
}

impl MpvEngine {
    pub fn new(config: &MpvConfig) -> Self {
        Self {
            process: MpvProcess::new(config),
            client: None,
            shuffle: false,
        }
    }

    async fn cmd(&self, command: Value) -> Result<Value, EngineError> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| EngineError::Unavailable("mpv is not running".into()))?;
        Ok(client.request(command).await?)
    }

    async fn play_path(&self, path: &str) -> Result<(), EngineError> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| EngineError::Unavailable("mpv is not running".into()))?;
        let idx = client
            .playlist_position(path)
            .await?
            .ok_or_else(|| EngineError::Command(format!("{} is not in the mpv playlist", path)))?;
        self.cmd(json!(["set_property", "pause", false])).await?;
        self.cmd(json!(["playlist-play-index", idx])).await?;
        Ok(())
    }
}

#[async_trait]
impl PlaybackEngine for MpvEngine {
    async fn ensure_started(
        &mut self,
        events: mpsc::Sender<EngineEvent>,
    ) -> Result<(), EngineError> {
        if self.is_alive() {
            return Ok(());
        }
        if self.client.take().is_some() {
            warn!("mpv: process died, restarting");
        }

        let client = self
            .process
            .launch(events)
            .await
            .map_err(|e| EngineError::Unavailable(e.to_string()))?;
        client.observe().await;
        self.client = Some(client);
        self.shuffle = false;
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        self.client.is_some() && self.process.running()
    }

    async fn load(&mut self, paths: &[String], start_index: usize) -> Result<(), EngineError> {
        let start = paths
            .get(start_index)
            .ok_or_else(|| EngineError::Command(format!("start index {} out of range", start_index)))?;

        self.cmd(json!(["stop"])).await?;
        self.cmd(json!(["playlist-clear"])).await?;
        for path in paths {
            self.cmd(json!(["loadfile", path, "append"])).await?;
        }
        if self.shuffle {
            self.cmd(json!(["playlist-shuffle"])).await?;
        }
        info!("mpv: loaded {} files, starting at {}", paths.len(), start);
        self.play_path(start).await
    }

    async fn set_paused(&mut self, paused: bool) -> Result<(), EngineError> {
        self.cmd(json!(["set_property", "pause", paused])).await?;
        Ok(())
    }

    async fn next(&mut self) -> Result<(), EngineError> {
        self.cmd(json!(["playlist-next", "weak"])).await?;
        Ok(())
    }

    async fn previous(&mut self) -> Result<(), EngineError> {
        self.cmd(json!(["playlist-prev", "weak"])).await?;
        Ok(())
    }

    async fn jump_to(&mut self, path: &str) -> Result<(), EngineError> {
        self.play_path(path).await
    }

    async fn seek(&mut self, position_ms: u64) -> Result<(), EngineError> {
        let secs = position_ms as f64 / 1000.0;
        self.cmd(json!(["seek", secs, "absolute"])).await?;
        Ok(())
    }

    async fn set_shuffle(&mut self, shuffle: bool) -> Result<(), EngineError> {
        let command = if shuffle {
            "playlist-shuffle"
        } else {
            "playlist-unshuffle"
        };
        self.cmd(json!([command])).await?;
        self.shuffle = shuffle;
        Ok(())
    }

    async fn set_repeat(&mut self, repeat: RepeatMode) -> Result<(), EngineError> {
        let (loop_file, loop_playlist) = match repeat {
            RepeatMode::Off => ("no", "no"),
            RepeatMode::One => ("inf", "no"),
            RepeatMode::All => ("no", "inf"),
        };
        self.cmd(json!(["set_property", "loop-file", loop_file])).await?;
        self.cmd(json!(["set_property", "loop-playlist", loop_playlist]))
            .await?;
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), EngineError> {
        self.cmd(json!(["stop"])).await?;
        Ok(())
    }

    async fn shutdown(&mut self) {
        if let Some(client) = self.client.take() {
            let _ = client.request(json!(["quit"])).await;
        }
        self.process.kill().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_changes_map_to_engine_events() {
        let pause = json!({"event":"property-change","id":OBS_PAUSE,"name":"pause","data":true});
        assert_eq!(decode_event(&pause), Some(EngineEvent::PauseChanged(true)));

        let pos = json!({"event":"property-change","id":OBS_TIME_POS,"data":12.3456});
        assert_eq!(decode_event(&pos), Some(EngineEvent::Position(12_346)));

        let path = json!({"event":"property-change","id":OBS_PATH,"data":"/m/a.flac"});
        assert_eq!(
            decode_event(&path),
            Some(EngineEvent::FileStarted {
                path: "/m/a.flac".into()
            })
        );
    }

    #[test]
    fn test_null_path_is_ignored() {
        let cleared = json!({"event":"property-change","id":OBS_PATH,"data":null});
        assert_eq!(decode_event(&cleared), None);
    }

    #[test]
    fn test_end_file_error_carries_reason() {
        let end = json!({"event":"end-file","reason":"error","file_error":"loading failed"});
        assert_eq!(
            decode_event(&end),
            Some(EngineEvent::EndFile {
                reason: EndReason::Error,
                error: Some("loading failed".into())
            })
        );
        let eof = json!({"event":"end-file","reason":"eof"});
        assert_eq!(
            decode_event(&eof),
            Some(EngineEvent::EndFile {
                reason: EndReason::Eof,
                error: None
            })
        );
    }

    #[test]
    fn test_file_loaded_is_ready() {
        assert_eq!(decode_event(&json!({"event":"file-loaded"})), Some(EngineEvent::Ready));
        assert_eq!(decode_event(&json!({"event":"seek"})), None);
    }

    #[test]
    fn test_classify_separates_replies_from_events() {
        match classify(r#"{"request_id":4,"error":"success","data":1}"#) {
            Some(Incoming::Reply { id: 4, result: Ok(v) }) => assert_eq!(v["data"], 1),
            other => panic!("unexpected {:?}", other),
        }
        match classify(r#"{"request_id":5,"error":"property unavailable"}"#) {
            Some(Incoming::Reply { id: 5, result: Err(e) }) => assert_eq!(e, "property unavailable"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            classify(r#"{"event":"idle"}"#),
            Some(Incoming::Event(_))
        ));
        assert!(classify("not json").is_none());
    }

    #[tokio::test]
    async fn test_request_gets_matching_reply() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let (read, write) = tokio::io::split(client_io);
        let (events_tx, mut events_rx) = mpsc::channel(8);
        let client = IpcClient::start(read, write, events_tx);

        let (server_read, mut server_write) = tokio::io::split(server_io);
        tokio::spawn(async move {
            let mut lines = BufReader::new(server_read).lines();
            let Ok(Some(line)) = lines.next_line().await else {
                return;
            };
            let req: Value = serde_json::from_str(&line).unwrap();
            let id = req["request_id"].as_u64().unwrap();
            // An event first, then the answer
            let out = format!(
                "{}\n{}\n",
                json!({"event":"file-loaded"}),
                json!({"request_id":id,"error":"success","data":"ok"})
            );
            server_write.write_all(out.as_bytes()).await.unwrap();
        });

        let reply = client.request(json!(["get_property", "x"])).await.unwrap();
        assert_eq!(reply["data"], "ok");
        assert_eq!(events_rx.recv().await, Some(EngineEvent::Ready));
    }
}
