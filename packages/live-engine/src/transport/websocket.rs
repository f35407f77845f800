//! Push-driven strategy
//!
//! The socket only announces that something changed (a new cursor) or that a
//! listing went away. Payloads still come from the delta endpoint, so a
//! notify triggers the same fetch-and-merge the polling strategy runs.
//!
//! Outbound frames: `{"type":"version","value":3}`, `{"type":"ping"}`,
//! `{"type":"subscribe","value":"<hash>"}`.
//! Inbound frames: `{"type":"notify","value":"<cursor>"}`,
//! `{"type":"del","value":"<hash>"}`, `{"type":"pong"}`.

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant};
use tokio_tungstenite::{connect_async, tungstenite, tungstenite::Message};
use tracing::{debug, info, trace, warn};

use super::{apply_delta, LiveTransport};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::machine::{LiveSession, QueryState, QueryStateMachine, Trigger};
use crate::search::value_as_text;
use crate::source::SourceCore;

pub const PROTOCOL_VERSION: u32 = 3;

#[derive(Debug, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
enum SocketCommand<'a> {
    Version(u32),
    Ping,
    Subscribe(&'a str),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
enum SocketEvent {
    Notify(Value),
    Del(Value),
    Pong,
    #[serde(other)]
    Unknown,
}

/// Why the socket loop ended without an error
enum SocketExit {
    /// We were asked to stop
    Shutdown,
    /// The site closed the socket
    Closed,
}

/// A running socket task for one live session
struct LiveSocket {
    live_query_id: String,
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Everything the socket task needs, fixed at spawn time
#[derive(Clone)]
struct SocketParams {
    url: String,
    live_query_id: String,
    epoch: u64,
    connect_timeout: Duration,
    ping_interval: Duration,
    close_timeout: Duration,
}

pub struct WebSocketTransport {
    socket_url: String,
    connect_timeout: Duration,
    ping_interval: Duration,
    close_timeout: Duration,
    socket: Mutex<Option<LiveSocket>>,
}

impl WebSocketTransport {
    pub fn new(
        socket_url: impl Into<String>,
        connect_timeout: Duration,
        ping_interval: Duration,
        close_timeout: Duration,
    ) -> Self {
        Self {
            socket_url: socket_url.into(),
            connect_timeout,
            ping_interval,
            close_timeout,
            socket: Mutex::new(None),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.site.socket_url.clone(),
            config.request_timeout(),
            config.ping_interval(),
            config.close_timeout(),
        )
    }

    fn session_url(&self, live_query_id: &str) -> String {
        format!("{}/{}", self.socket_url.trim_end_matches('/'), live_query_id)
    }

    /// Whether a socket task is currently running
    pub async fn is_connected(&self) -> bool {
        self.socket
            .lock()
            .await
            .as_ref()
            .is_some_and(|socket| !socket.handle.is_finished())
    }
}

#[async_trait]
impl LiveTransport for WebSocketTransport {
    async fn on_live_started(&self, core: &Arc<SourceCore>, session: &LiveSession, epoch: u64) {
        let params = SocketParams {
            url: self.session_url(&session.live_query_id),
            live_query_id: session.live_query_id.clone(),
            epoch,
            connect_timeout: self.connect_timeout,
            ping_interval: self.ping_interval,
            close_timeout: self.close_timeout,
        };
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(run_socket(Arc::downgrade(core), params, shutdown_rx));

        let previous = self.socket.lock().await.replace(LiveSocket {
            live_query_id: session.live_query_id.clone(),
            shutdown_tx,
            handle,
        });

        // The session this socket belonged to is already gone
        if let Some(previous) = previous {
            debug!(
                "[{}] Dropping socket of previous session {}",
                core.id, previous.live_query_id
            );
            previous.handle.abort();
        }
    }

    async fn refresh(&self, _core: &SourceCore, _machine: &mut QueryStateMachine) {}

    async fn shutdown(&self) {
        let Some(socket) = self.socket.lock().await.take() else {
            return;
        };

        let LiveSocket {
            live_query_id,
            shutdown_tx,
            mut handle,
        } = socket;

        // The task may already be gone; that is fine
        let _ = shutdown_tx.send(());
        if timeout(self.close_timeout, &mut handle).await.is_err() {
            debug!(
                "Socket for {} did not close within {:?}, aborting",
                live_query_id, self.close_timeout
            );
            handle.abort();
        }
    }
}

async fn run_socket(core: Weak<SourceCore>, params: SocketParams, shutdown_rx: oneshot::Receiver<()>) {
    match session_loop(&core, &params, shutdown_rx).await {
        Ok(SocketExit::Shutdown) => {
            debug!("Socket for {} closed", params.live_query_id);
        }
        Ok(SocketExit::Closed) => {
            warn!("Socket for {} closed by the site", params.live_query_id);
            fail_session(&core, &params).await;
        }
        Err(EngineError::Disposed) => {
            debug!("Socket for {} outlived its session", params.live_query_id);
        }
        Err(e) => {
            warn!("Socket for {} failed: {}", params.live_query_id, e);
            fail_session(&core, &params).await;
        }
    }
}

/// Fire `LiveQueryFailed` if this socket still belongs to the current session
async fn fail_session(core: &Weak<SourceCore>, params: &SocketParams) {
    let Some(core) = core.upgrade() else {
        return;
    };
    if core.is_disposed() {
        return;
    }

    let mut machine = core.machine.lock().await;
    if machine.state() == QueryState::LiveQuery && core.live_epoch() == params.epoch {
        core.counters.record_failure();
        core.fire(&mut machine, Trigger::LiveQueryFailed);
    }
}

async fn session_loop(
    core: &Weak<SourceCore>,
    params: &SocketParams,
    mut shutdown_rx: oneshot::Receiver<()>,
) -> EngineResult<SocketExit> {
    let (ws_stream, _) = timeout(params.connect_timeout, connect_async(params.url.as_str())).await??;
    info!("Connected live socket {}", params.url);

    let (mut write, mut read) = ws_stream.split();

    send_command(&mut write, &SocketCommand::Version(PROTOCOL_VERSION)).await?;
    send_command(&mut write, &SocketCommand::Ping).await?;

    let mut subscribed = HashSet::new();
    subscribe_new_items(core, params, &mut write, &mut subscribed).await?;

    let mut ping_timer = interval_at(Instant::now() + params.ping_interval, params.ping_interval);

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                close_gracefully(&mut write, &mut read, params.close_timeout).await;
                return Ok(SocketExit::Shutdown);
            }

            _ = ping_timer.tick() => {
                if core.strong_count() == 0 {
                    return Err(EngineError::Disposed);
                }
                send_command(&mut write, &SocketCommand::Ping).await?;
                trace!("Sent ping on {}", params.live_query_id);
            }

            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    handle_event(core, params, text.as_str(), &mut write, &mut subscribed).await?;
                }
                Some(Ok(Message::Ping(data))) => {
                    write.send(Message::Pong(data)).await?;
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!("Close frame on {}: {:?}", params.live_query_id, frame);
                    return Ok(SocketExit::Closed);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(SocketExit::Closed),
            }
        }
    }
}

async fn handle_event<S>(
    core: &Weak<SourceCore>,
    params: &SocketParams,
    text: &str,
    write: &mut S,
    subscribed: &mut HashSet<String>,
) -> EngineResult<()>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let event = match serde_json::from_str::<SocketEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            debug!("Ignoring unparseable socket message {}: {}", text, e);
            return Ok(());
        }
    };

    match event {
        SocketEvent::Notify(value) => {
            let Some(cursor) = value_as_text(&value).filter(|c| !c.trim().is_empty()) else {
                return Err(EngineError::MissingCursor);
            };
            on_notify(core, params, &cursor).await?;
            subscribe_new_items(core, params, write, subscribed).await?;
        }
        SocketEvent::Del(value) => {
            if let Some(hash) = value_as_text(&value) {
                on_delete(core, params, &hash).await?;
                subscribed.remove(&hash);
            }
        }
        SocketEvent::Pong => trace!("Pong on {}", params.live_query_id),
        SocketEvent::Unknown => debug!("Unknown socket message: {}", text),
    }
    Ok(())
}

/// Lock the source if it is still on the session this socket was opened for
async fn lock_current<'a>(
    core: &'a Arc<SourceCore>,
    params: &SocketParams,
) -> EngineResult<tokio::sync::MutexGuard<'a, QueryStateMachine>> {
    let machine = core.machine.lock().await;
    if core.is_disposed()
        || machine.state() != QueryState::LiveQuery
        || core.live_epoch() != params.epoch
    {
        return Err(EngineError::Disposed);
    }
    Ok(machine)
}

async fn on_notify(core: &Weak<SourceCore>, params: &SocketParams, cursor: &str) -> EngineResult<()> {
    let core = core.upgrade().ok_or(EngineError::Disposed)?;
    let mut machine = lock_current(&core, params).await?;

    let stats = apply_delta(&core, &mut machine, cursor).await?;
    debug!(
        "[{}] Notify {} on {}: +{} -{}",
        core.id, cursor, params.live_query_id, stats.upserted, stats.removed
    );
    Ok(())
}

async fn on_delete(core: &Weak<SourceCore>, params: &SocketParams, hash: &str) -> EngineResult<()> {
    let core = core.upgrade().ok_or(EngineError::Disposed)?;
    let mut machine = lock_current(&core, params).await?;

    if let Some(cache) = machine.cache_mut() {
        if cache.remove(hash) {
            debug!("[{}] Listing {} removed", core.id, hash);
        }
    }
    Ok(())
}

/// Subscribe to every cached hash this socket has not subscribed to yet.
///
/// Hashes that left the cache are forgotten first, so a relisted item is
/// subscribed again.
async fn subscribe_new_items<S>(
    core: &Weak<SourceCore>,
    params: &SocketParams,
    write: &mut S,
    subscribed: &mut HashSet<String>,
) -> EngineResult<()>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let fresh: Vec<String> = {
        let core = core.upgrade().ok_or(EngineError::Disposed)?;
        let machine = lock_current(&core, params).await?;
        let cache = machine.cache();
        subscribed.retain(|hash| cache.contains(hash));
        let hashes = cache.hashes();
        hashes
            .into_iter()
            .filter(|hash| !subscribed.contains(hash))
            .collect()
    };

    for hash in fresh {
        send_command(write, &SocketCommand::Subscribe(&hash)).await?;
        subscribed.insert(hash);
    }
    Ok(())
}

async fn send_command<S>(write: &mut S, command: &SocketCommand<'_>) -> EngineResult<()>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let json = serde_json::to_string(command)?;
    write.send(Message::Text(json.into())).await?;
    Ok(())
}

/// Send a close frame and wait briefly for the site to answer it
async fn close_gracefully<S, R>(write: &mut S, read: &mut R, close_timeout: Duration)
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
    R: futures_util::Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    if let Err(e) = write.send(Message::Close(None)).await {
        debug!("Close frame not sent: {}", e);
        return;
    }

    let drained = timeout(close_timeout, async {
        while let Some(msg) = read.next().await {
            match msg {
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    })
    .await;

    if drained.is_err() {
        debug!("Close handshake timed out after {:?}", close_timeout);
    }
}
