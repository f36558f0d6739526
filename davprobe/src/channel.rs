use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

#[derive(Clone, Debug)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Connection lifecycle. Transitions only ever advance; `Closed` and
/// `Failed` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    AwaitingAuth,
    Authenticated,
    Subscribed,
    Closed,
    Failed,
}

impl ChannelState {
    fn rank(self) -> u8 {
        match self {
            ChannelState::Connecting => 0,
            ChannelState::AwaitingAuth => 1,
            ChannelState::Authenticated => 2,
            ChannelState::Subscribed => 3,
            ChannelState::Closed => 4,
            ChannelState::Failed => 5,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ChannelState::Closed | ChannelState::Failed)
    }
}

/// One decoded inbound frame. Anything that does not parse as a known
/// envelope lands in `Unrecognized` and is kept for diagnostics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelMessage {
    AuthRequired,
    AuthSuccess,
    SubscriptionConfirmed,
    FileChange { path: String },
    Unrecognized { raw: String },
}

impl fmt::Display for ChannelMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelMessage::AuthRequired => write!(f, "auth_required"),
            ChannelMessage::AuthSuccess => write!(f, "auth_success"),
            ChannelMessage::SubscriptionConfirmed => write!(f, "subscriptionConfirmed"),
            ChannelMessage::FileChange { path } => write!(f, "fileChange path={path}"),
            ChannelMessage::Unrecognized { raw } => write!(f, "unrecognized: {raw}"),
        }
    }
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame<'a> {
    Authenticate { username: &'a str, password: &'a str },
    Subscribe { path: &'a str },
}

// Server frame discriminators mix snake_case and camelCase on the wire, so
// each variant carries its literal tag. Unknown extra fields are ignored.
#[derive(Deserialize)]
#[serde(tag = "type")]
enum ServerFrame {
    #[serde(rename = "auth_required")]
    AuthRequired,
    #[serde(rename = "auth_success")]
    AuthSuccess,
    #[serde(rename = "subscriptionConfirmed")]
    SubscriptionConfirmed,
    #[serde(rename = "fileChange")]
    FileChange { path: String },
}

fn decode_frame(raw: &str) -> ChannelMessage {
    match serde_json::from_str::<ServerFrame>(raw) {
        Ok(ServerFrame::AuthRequired) => ChannelMessage::AuthRequired,
        Ok(ServerFrame::AuthSuccess) => ChannelMessage::AuthSuccess,
        Ok(ServerFrame::SubscriptionConfirmed) => ChannelMessage::SubscriptionConfirmed,
        Ok(ServerFrame::FileChange { path }) => ChannelMessage::FileChange { path },
        Err(_) => ChannelMessage::Unrecognized {
            raw: raw.to_string(),
        },
    }
}

#[derive(Debug, Error)]
enum ChannelError {
    #[error("frame encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
}

struct Shared {
    state: Mutex<ChannelState>,
    log: Mutex<Vec<ChannelMessage>>,
    changed: Notify,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: Mutex::new(ChannelState::Connecting),
            log: Mutex::new(Vec::new()),
            changed: Notify::new(),
        }
    }

    // Forward-only: a transition to an earlier (or equal) rank is dropped,
    // which also keeps `Failed` from being downgraded to `Closed`.
    fn advance(&self, next: ChannelState) {
        {
            let mut state = self.state.lock().expect("channel state lock poisoned");
            if next.rank() <= state.rank() {
                return;
            }
            *state = next;
        }
        self.changed.notify_waiters();
    }

    fn push(&self, message: ChannelMessage) {
        self.log
            .lock()
            .expect("channel log lock poisoned")
            .push(message);
        self.changed.notify_waiters();
    }

    fn state(&self) -> ChannelState {
        *self.state.lock().expect("channel state lock poisoned")
    }

    fn snapshot(&self) -> Vec<ChannelMessage> {
        self.log
            .lock()
            .expect("channel log lock poisoned")
            .clone()
    }
}

/// Handle to one push-channel connection. The receive loop runs on a
/// background task; this handle only observes shared state and can request
/// shutdown. One connection attempt per handle, no retries.
pub struct PushChannel {
    shared: Arc<Shared>,
    close_tx: mpsc::UnboundedSender<()>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PushChannel {
    /// Connect and drive the handshake in the background. `subscribe_path`
    /// is sent in a single `subscribe` frame once the server confirms
    /// authentication.
    pub fn open(
        ws_url: String,
        credentials: Credentials,
        subscribe_path: String,
        debug: bool,
    ) -> Self {
        let shared = Arc::new(Shared::new());
        let (close_tx, close_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_connection(
            ws_url,
            credentials,
            subscribe_path,
            debug,
            Arc::clone(&shared),
            close_rx,
        ));
        Self {
            shared,
            close_tx,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn state(&self) -> ChannelState {
        self.shared.state()
    }

    /// Snapshot of the message log. The log may still be growing while the
    /// caller inspects the copy.
    pub fn messages(&self) -> Vec<ChannelMessage> {
        self.shared.snapshot()
    }

    /// Wait until `predicate` holds over (state, log), the budget elapses,
    /// or the connection reaches a terminal state. Returns the final
    /// predicate verdict.
    pub async fn wait_until<F>(&self, budget: Duration, predicate: F) -> bool
    where
        F: Fn(ChannelState, &[ChannelMessage]) -> bool,
    {
        let deadline = tokio::time::Instant::now() + budget;
        loop {
            // Register for wakeups before inspecting state, so a change
            // landing between the check and the await is not lost.
            let mut notified = std::pin::pin!(self.shared.changed.notified());
            notified.as_mut().enable();
            let state = self.shared.state();
            let satisfied = {
                let log = self.shared.log.lock().expect("channel log lock poisoned");
                predicate(state, &log)
            };
            if satisfied {
                return true;
            }
            if state.is_terminal() {
                return false;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                let state = self.shared.state();
                let log = self.shared.log.lock().expect("channel log lock poisoned");
                return predicate(state, &log);
            }
        }
    }

    /// Request shutdown and wait for the receive loop to finish. Idempotent,
    /// and safe to call before the handshake ever completed.
    pub async fn close(&self) {
        let _ = self.close_tx.send(());
        let task = self
            .task
            .lock()
            .expect("channel task lock poisoned")
            .take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn send_frame(ws: &mut WsStream, frame: &ClientFrame<'_>) -> Result<(), ChannelError> {
    let payload = serde_json::to_string(frame)?;
    ws.send(Message::Text(payload)).await?;
    Ok(())
}

async fn run_connection(
    ws_url: String,
    credentials: Credentials,
    subscribe_path: String,
    debug: bool,
    shared: Arc<Shared>,
    mut close_rx: mpsc::UnboundedReceiver<()>,
) {
    let mut ws = tokio::select! {
        _ = close_rx.recv() => {
            shared.advance(ChannelState::Closed);
            return;
        }
        connected = connect_async(ws_url.as_str()) => match connected {
            Ok((ws, _)) => ws,
            Err(err) => {
                eprintln!("[davprobe] channel connect failed: {err}");
                shared.advance(ChannelState::Failed);
                return;
            }
        }
    };

    // The handshake opens with an immediate authenticate; a server that
    // challenges with auth_required re-triggers the same send instead.
    let auth = ClientFrame::Authenticate {
        username: &credentials.username,
        password: &credentials.password,
    };
    if let Err(err) = send_frame(&mut ws, &auth).await {
        eprintln!("[davprobe] channel handshake failed: {err}");
        shared.advance(ChannelState::Failed);
        return;
    }
    shared.advance(ChannelState::AwaitingAuth);

    let mut subscribe_sent = false;
    loop {
        tokio::select! {
            _ = close_rx.recv() => {
                let _ = ws.close(None).await;
                shared.advance(ChannelState::Closed);
                break;
            }
            frame = ws.next() => match frame {
                Some(Ok(Message::Text(raw))) => {
                    if !handle_frame(
                        &mut ws,
                        &raw,
                        &credentials,
                        &subscribe_path,
                        &mut subscribe_sent,
                        debug,
                        &shared,
                    )
                    .await
                    {
                        break;
                    }
                }
                Some(Ok(Message::Binary(bytes))) => {
                    let raw = String::from_utf8_lossy(&bytes).into_owned();
                    if !handle_frame(
                        &mut ws,
                        &raw,
                        &credentials,
                        &subscribe_path,
                        &mut subscribe_sent,
                        debug,
                        &shared,
                    )
                    .await
                    {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    shared.advance(ChannelState::Closed);
                    break;
                }
                // Ping/pong are answered by the transport.
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    eprintln!("[davprobe] channel transport error: {err}");
                    shared.advance(ChannelState::Failed);
                    break;
                }
            }
        }
    }
}

/// Apply one inbound frame. Returns false when the connection must stop.
async fn handle_frame(
    ws: &mut WsStream,
    raw: &str,
    credentials: &Credentials,
    subscribe_path: &str,
    subscribe_sent: &mut bool,
    debug: bool,
    shared: &Shared,
) -> bool {
    if debug {
        eprintln!("[davprobe] channel frame: {raw}");
    }
    let message = decode_frame(raw);
    shared.push(message.clone());

    let outcome = match message {
        ChannelMessage::AuthRequired => {
            // Only answer the challenge while the handshake is still open.
            if shared.state().rank() < ChannelState::Authenticated.rank() {
                let auth = ClientFrame::Authenticate {
                    username: &credentials.username,
                    password: &credentials.password,
                };
                send_frame(ws, &auth).await
            } else {
                Ok(())
            }
        }
        ChannelMessage::AuthSuccess => {
            shared.advance(ChannelState::Authenticated);
            if *subscribe_sent {
                Ok(())
            } else {
                *subscribe_sent = true;
                send_frame(
                    ws,
                    &ClientFrame::Subscribe {
                        path: subscribe_path,
                    },
                )
                .await
            }
        }
        ChannelMessage::SubscriptionConfirmed => {
            shared.advance(ChannelState::Subscribed);
            Ok(())
        }
        // Logged above; neither changes state.
        ChannelMessage::FileChange { .. } | ChannelMessage::Unrecognized { .. } => Ok(()),
    };

    match outcome {
        Ok(()) => true,
        Err(err) => {
            eprintln!("[davprobe] channel send failed: {err}");
            shared.advance(ChannelState::Failed);
            false
        }
    }
}
