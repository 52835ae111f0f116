//! Client side of the daemon socket.
//!
//! One background task owns the TCP connection and reconnects with backoff
//! (starting the daemon once if nothing is listening).  Everything else talks
//! to it through a cloneable [`DaemonLink`].

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};
use tune_proto::protocol::{
    drain_frames, Broadcast, Command, Message, NowPlaying, SessionState, PROTOCOL_VERSION,
};

/// What the connection task reports to the UI, in the order the daemon sent it.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Handshake done; a snapshot is available.
    Connected,
    StateChanged(SessionState),
    NowPlaying(Option<NowPlaying>),
    Error(String),
    Log(String),
    Disconnected(String),
}

/// Handle to a live playback session.
pub trait SessionLink: Clone + Send + Sync + 'static {
    /// Latest full session state, `None` while not connected.
    fn snapshot(&self) -> Option<SessionState>;
    /// Fire-and-forget command.
    fn send(&self, cmd: Command);
    fn subscribe(&self) -> broadcast::Receiver<SessionEvent>;
}

#[derive(Clone)]
pub struct DaemonLink {
    cmd_tx: mpsc::Sender<Command>,
    state_rx: watch::Receiver<Option<SessionState>>,
    events: broadcast::Sender<SessionEvent>,
}

impl DaemonLink {
    /// Start the connection task for `address`.
    pub fn spawn(address: String) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let (state_tx, state_rx) = watch::channel(None);
        let (events, _) = broadcast::channel(256);
        tokio::spawn(connection_handler(address, state_tx, events.clone(), cmd_rx));
        Self {
            cmd_tx,
            state_rx,
            events,
        }
    }
}

#[cfg(test)]
impl DaemonLink {
    /// A link with no connection task behind it; commands land in the receiver.
    pub(crate) fn offline() -> (Self, mpsc::Receiver<Command>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (_, state_rx) = watch::channel(None);
        let (events, _) = broadcast::channel(16);
        let link = Self {
            cmd_tx,
            state_rx,
            events,
        };
        (link, cmd_rx)
    }
}

impl SessionLink for DaemonLink {
    fn snapshot(&self) -> Option<SessionState> {
        self.state_rx.borrow().clone()
    }

    fn send(&self, cmd: Command) {
        if let Err(e) = self.cmd_tx.try_send(cmd) {
            warn!("Dropping command, connection busy or gone: {}", e);
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}

// ── Connection task ──────────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
enum SessionEnd {
    /// Every link was dropped; the client is shutting down.
    ClientGone,
    Lost(String),
}

const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(100);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(5);

async fn connection_handler(
    address: String,
    state_tx: watch::Sender<Option<SessionState>>,
    events: broadcast::Sender<SessionEvent>,
    cmd_rx: mpsc::Receiver<Command>,
) {
    let connect = move || {
        let address = address.clone();
        async move {
            let stream = TcpStream::connect(&address).await?;
            info!("Connected to daemon at {}", address);
            Ok::<_, std::io::Error>(stream.into_split())
        }
    };
    reconnect_loop(connect, state_tx, events, cmd_rx).await
}

/// Keep a session going over whatever `connect` hands back.  Failed connects
/// and lost sessions both back off; the delay only resets once a session got
/// past the handshake.
async fn reconnect_loop<C, F, R, W>(
    mut connect: C,
    state_tx: watch::Sender<Option<SessionState>>,
    events: broadcast::Sender<SessionEvent>,
    mut cmd_rx: mpsc::Receiver<Command>,
) where
    C: FnMut() -> F,
    F: Future<Output = std::io::Result<(R, W)>>,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut retry_delay = INITIAL_RETRY_DELAY;
    let mut tried_starting_daemon = false;

    loop {
        match connect().await {
            Ok((read_half, write_half)) => {
                // Anything typed while disconnected is stale by now
                while cmd_rx.try_recv().is_ok() {}

                match run_session(read_half, write_half, &state_tx, &events, &mut cmd_rx).await {
                    SessionEnd::ClientGone => return,
                    SessionEnd::Lost(reason) => {
                        warn!("Daemon connection lost: {}", reason);
                        let handshaken = state_tx.send_replace(None).is_some();
                        let _ = events.send(SessionEvent::Disconnected(reason));
                        if handshaken {
                            retry_delay = INITIAL_RETRY_DELAY;
                        }
                        tokio::time::sleep(retry_delay).await;
                        retry_delay = (retry_delay * 2).min(MAX_RETRY_DELAY);
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused && !tried_starting_daemon => {
                tried_starting_daemon = true;
                info!("Daemon not running, starting it");
                let _ = events.send(SessionEvent::Log("Starting daemon…".to_string()));
                if let Err(e) = start_daemon().await {
                    warn!("Failed to start daemon: {}", e);
                    let _ = events.send(SessionEvent::Error(format!("Failed to start daemon: {}", e)));
                }
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
            Err(e) => {
                debug!("Failed to connect to daemon: {}", e);
                tokio::time::sleep(retry_delay).await;
                retry_delay = (retry_delay * 2).min(MAX_RETRY_DELAY);
            }
        }

        if cmd_rx.is_closed() {
            return;
        }
    }
}

async fn run_session<R, W>(
    mut read_half: R,
    mut write_half: W,
    state_tx: &watch::Sender<Option<SessionState>>,
    events: &broadcast::Sender<SessionEvent>,
    cmd_rx: &mut mpsc::Receiver<Command>,
) -> SessionEnd
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut read_buf: Vec<u8> = Vec::new();
    let mut tmp = [0u8; 8192];

    loop {
        tokio::select! {
            result = read_half.read(&mut tmp) => match result {
                Ok(0) => return SessionEnd::Lost("connection closed".into()),
                Ok(n) => {
                    read_buf.extend_from_slice(&tmp[..n]);
                    let frames = match drain_frames(&mut read_buf) {
                        Ok(frames) => frames,
                        Err(e) => return SessionEnd::Lost(format!("protocol error: {}", e)),
                    };
                    for frame in frames {
                        if let Message::Broadcast(b) = frame {
                            if let Err(reason) = dispatch(b, state_tx, events) {
                                return SessionEnd::Lost(reason);
                            }
                        }
                    }
                }
                Err(e) => return SessionEnd::Lost(format!("read error: {}", e)),
            },

            cmd = cmd_rx.recv() => match cmd {
                None => return SessionEnd::ClientGone,
                Some(cmd) => {
                    let encoded = match Message::Command(cmd).encode() {
                        Ok(bytes) => bytes,
                        Err(e) => {
                            warn!("Failed to encode command: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = write_half.write_all(&encoded).await {
                        return SessionEnd::Lost(format!("write error: {}", e));
                    }
                }
            },
        }
    }
}

fn dispatch(
    broadcast: Broadcast,
    state_tx: &watch::Sender<Option<SessionState>>,
    events: &broadcast::Sender<SessionEvent>,
) -> Result<(), String> {
    match broadcast {
        Broadcast::Hello {
            protocol_version,
            daemon_rev,
            state,
        } => {
            if protocol_version != PROTOCOL_VERSION {
                return Err(format!(
                    "daemon speaks protocol {} (expected {})",
                    protocol_version, PROTOCOL_VERSION
                ));
            }
            debug!("Hello from daemon, rev {}", daemon_rev);
            state_tx.send_replace(Some(state.clone()));
            let _ = events.send(SessionEvent::Connected);
            let _ = events.send(SessionEvent::StateChanged(state));
        }
        Broadcast::State { state } => {
            state_tx.send_replace(Some(state.clone()));
            let _ = events.send(SessionEvent::StateChanged(state));
        }
        Broadcast::NowPlaying { notification } => {
            let _ = events.send(SessionEvent::NowPlaying(notification));
        }
        Broadcast::Log { message } => {
            let _ = events.send(SessionEvent::Log(message));
        }
        Broadcast::Error { message } => {
            let _ = events.send(SessionEvent::Error(message));
        }
    }
    Ok(())
}

async fn start_daemon() -> anyhow::Result<()> {
    let current_exe = std::env::current_exe()?;

    #[cfg(windows)]
    let daemon_name = "tune-daemon.exe";
    #[cfg(not(windows))]
    let daemon_name = "tune-daemon";

    let daemon_path = current_exe
        .parent()
        .map(|p| p.join(daemon_name))
        .unwrap_or_else(|| PathBuf::from(daemon_name));

    info!("Starting daemon from: {:?}", daemon_path);
    if !daemon_path.exists() {
        anyhow::bail!("Daemon not found at: {}", daemon_path.display());
    }

    let child = tokio::process::Command::new(daemon_path)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()?;
    info!("Daemon spawned with PID: {:?}", child.id());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tune_proto::protocol::TransportStatus;

    fn state(rev: u64) -> SessionState {
        SessionState {
            rev,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_session_relays_hello_and_commands() {
        let (client, daemon) = tokio::io::duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client);
        let (mut daemon_read, mut daemon_write) = tokio::io::split(daemon);

        let (state_tx, state_rx) = watch::channel(None);
        let (events, mut events_rx) = broadcast::channel(16);
        let (cmd_tx, mut cmd_rx) = mpsc::channel(8);

        let session = tokio::spawn(async move {
            run_session(client_read, client_write, &state_tx, &events, &mut cmd_rx).await
        });

        let hello = Message::Broadcast(Broadcast::Hello {
            protocol_version: PROTOCOL_VERSION,
            daemon_rev: 7,
            state: state(7),
        });
        daemon_write.write_all(&hello.encode().unwrap()).await.unwrap();

        assert!(matches!(events_rx.recv().await.unwrap(), SessionEvent::Connected));
        match events_rx.recv().await.unwrap() {
            SessionEvent::StateChanged(s) => assert_eq!(s.rev, 7),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(state_rx.borrow().as_ref().map(|s| s.rev), Some(7));

        cmd_tx.send(Command::TogglePause).await.unwrap();
        let mut buf = Vec::new();
        let mut tmp = [0u8; 1024];
        let frame = loop {
            if let Some(msg) = drain_frames(&mut buf).unwrap().into_iter().next() {
                break msg;
            }
            let n = daemon_read.read(&mut tmp).await.unwrap();
            buf.extend_from_slice(&tmp[..n]);
        };
        assert!(matches!(frame, Message::Command(Command::TogglePause)));

        drop(cmd_tx);
        assert_eq!(session.await.unwrap(), SessionEnd::ClientGone);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_handshakes_back_off() {
        use std::sync::{Arc, Mutex};
        use tokio::io::DuplexStream;
        use tokio::time::Instant;

        let attempts: Arc<Mutex<Vec<Instant>>> = Arc::default();
        let daemons: Arc<Mutex<Vec<DuplexStream>>> = Arc::default();
        let (seen, kept) = (attempts.clone(), daemons.clone());
        let connect = move || {
            let count = {
                let mut seen = seen.lock().unwrap();
                seen.push(Instant::now());
                seen.len()
            };
            let kept = kept.clone();
            async move {
                if count > 2 {
                    return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "down"));
                }
                // a daemon that speaks another protocol version
                let (client, mut daemon) = tokio::io::duplex(64 * 1024);
                let hello = Message::Broadcast(Broadcast::Hello {
                    protocol_version: PROTOCOL_VERSION + 1,
                    daemon_rev: 1,
                    state: state(1),
                });
                daemon.write_all(&hello.encode().unwrap()).await.unwrap();
                kept.lock().unwrap().push(daemon);
                Ok(tokio::io::split(client))
            }
        };

        let (state_tx, _state_rx) = watch::channel(None);
        let (events, mut events_rx) = broadcast::channel(16);
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let task = tokio::spawn(reconnect_loop(connect, state_tx, events, cmd_rx));

        for _ in 0..2 {
            assert!(matches!(
                events_rx.recv().await.unwrap(),
                SessionEvent::Disconnected(reason) if reason.contains("protocol")
            ));
        }
        tokio::time::sleep(Duration::from_secs(1)).await;

        {
            let attempts = attempts.lock().unwrap();
            assert!(attempts.len() >= 3);
            assert!(attempts[1] - attempts[0] >= Duration::from_millis(100));
            assert!(attempts[2] - attempts[1] >= Duration::from_millis(200));
        }

        drop(cmd_tx);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_protocol_mismatch_ends_session() {
        let (client, daemon) = tokio::io::duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client);
        let (_daemon_read, mut daemon_write) = tokio::io::split(daemon);

        let (state_tx, state_rx) = watch::channel(None);
        let (events, _) = broadcast::channel(16);
        let (_cmd_tx, mut cmd_rx) = mpsc::channel(8);

        let hello = Message::Broadcast(Broadcast::Hello {
            protocol_version: PROTOCOL_VERSION + 1,
            daemon_rev: 1,
            state: SessionState {
                status: TransportStatus::Playing,
                ..Default::default()
            },
        });
        daemon_write.write_all(&hello.encode().unwrap()).await.unwrap();

        let end = run_session(client_read, client_write, &state_tx, &events, &mut cmd_rx).await;
        assert!(matches!(end, SessionEnd::Lost(reason) if reason.contains("protocol")));
        assert!(state_rx.borrow().is_none());
    }
}
