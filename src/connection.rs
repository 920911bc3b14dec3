//! The duplex connection to the venue.
//!
//! One read task per physical connection decodes inbound frames and
//! dispatches each either to an outstanding call (matched by request ID) or
//! to the push handlers. Outbound traffic, keepalive pings, and reconnects
//! are all driven by the same task; callers interact with it through a
//! command channel and never block the read loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rand::Rng;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, sleep, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::client::WsConfig;
use crate::error::{WsError, WsResult};
use crate::handlers::MessageHandler;
use crate::subscriptions::SubscriptionManager;
use crate::types::{FramePeek, WsEvent, WsRequest};

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub(crate) type WsSink = SplitSink<WsStream, Message>;
pub(crate) type WsSource = SplitStream<WsStream>;

/// Connection timeout for the initial dial and every redial
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Commands accepted by the connection task
pub(crate) enum ConnectionCommand {
    Send(String),
    Ping,
    Disconnect,
}

/// Calls awaiting response frames, keyed by request ID.
///
/// The read loop owns the receiving half of the socket; callers park here
/// until their frames are routed back to them.
#[derive(Debug, Default)]
pub(crate) struct PendingCalls {
    calls: Mutex<HashMap<String, mpsc::Sender<String>>>,
}

impl PendingCalls {
    fn register(&self, req_id: &str, capacity: usize) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.calls.lock().insert(req_id.to_string(), tx);
        rx
    }

    fn remove(&self, req_id: &str) {
        self.calls.lock().remove(req_id);
    }

    /// Route a frame to the call it answers. Returns false when no call is
    /// waiting on this request ID.
    pub(crate) fn dispatch(&self, req_id: &str, frame: &str) -> bool {
        let calls = self.calls.lock();
        match calls.get(req_id) {
            Some(tx) => {
                if tx.try_send(frame.to_string()).is_err() {
                    tracing::warn!(
                        request_id = req_id,
                        "dropping surplus response frame for completed call"
                    );
                }
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.calls.lock().len()
    }
}

/// Removes the pending entry when a call completes or its future is dropped,
/// so cancelled waits never leave a registration behind.
struct PendingGuard<'a> {
    pending: &'a PendingCalls,
    req_id: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.req_id);
    }
}

#[derive(Debug)]
struct ConnInner {
    cmd_tx: mpsc::Sender<ConnectionCommand>,
    pending: Arc<PendingCalls>,
    next_id: AtomicU64,
    call_timeout: Duration,
}

/// Handle to a live connection. Cheap to clone; all clones share the same
/// command channel, pending-call registry, and request-ID counter.
#[derive(Debug, Clone)]
pub struct Connection {
    inner: Arc<ConnInner>,
}

impl Connection {
    pub(crate) fn new(cmd_tx: mpsc::Sender<ConnectionCommand>, call_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(ConnInner {
                cmd_tx,
                pending: Arc::new(PendingCalls::default()),
                next_id: AtomicU64::new(1),
                call_timeout,
            }),
        }
    }

    /// Fresh request ID, unique for the lifetime of this connection.
    /// A monotonic counter rather than a clock read, so bursts of calls on a
    /// coarse clock cannot collide.
    pub fn generate_message_id(&self) -> String {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed).to_string()
    }

    pub(crate) fn pending(&self) -> Arc<PendingCalls> {
        Arc::clone(&self.inner.pending)
    }

    pub(crate) async fn command(&self, cmd: ConnectionCommand) -> WsResult<()> {
        self.inner
            .cmd_tx
            .send(cmd)
            .await
            .map_err(|_| WsError::ChannelClosed)
    }

    /// Send a raw text frame without waiting for any response.
    pub async fn send_text(&self, text: String) -> WsResult<()> {
        self.command(ConnectionCommand::Send(text)).await
    }

    /// Send a request expecting exactly one response frame.
    pub async fn send_one(&self, req_id: &str, payload: String) -> WsResult<String> {
        let mut frames = self.send_multi(req_id, payload, 1, |_| false).await?;
        frames.pop().ok_or(WsError::EmptyResponse {
            channel: String::new(),
        })
    }

    /// Send a request expecting `expected` response frames.
    ///
    /// `is_ack` classifies intermediate acknowledgement frames; the wait
    /// loop collects frames until the expected count is reached or a
    /// terminal (non-ack) frame arrives, and times out otherwise. An
    /// exchange that never produces a terminal frame fails with
    /// [`WsError::Timeout`]; an ack is never accepted as the result.
    pub async fn send_multi(
        &self,
        req_id: &str,
        payload: String,
        expected: usize,
        is_ack: fn(&str) -> bool,
    ) -> WsResult<Vec<String>> {
        if expected == 0 {
            return Err(WsError::Precondition(
                "expected response count must be at least 1".to_string(),
            ));
        }

        // Register before sending so a fast response cannot slip past the
        // registry; the guard clears the entry on every exit path,
        // cancellation included.
        let mut rx = self.inner.pending.register(req_id, expected);
        let _guard = PendingGuard {
            pending: self.inner.pending.as_ref(),
            req_id: req_id.to_string(),
        };

        self.send_text(payload).await?;

        let deadline = Instant::now() + self.inner.call_timeout;
        let mut frames = Vec::with_capacity(expected);
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let frame = timeout(remaining, rx.recv())
                .await
                .map_err(|_| WsError::Timeout)?
                .ok_or(WsError::ChannelClosed)?;

            let terminal = !is_ack(&frame);
            frames.push(frame);
            if frames.len() >= expected || terminal {
                return Ok(frames);
            }
        }
    }
}

/// Dial the venue, with a bounded connect time.
pub(crate) async fn establish(url: &str) -> WsResult<WsStream> {
    let (stream, _) = timeout(CONNECTION_TIMEOUT, connect_async(url))
        .await
        .map_err(|_| WsError::Timeout)?
        .map_err(WsError::from)?;
    Ok(stream)
}

/// Shared context for the connection task
pub(crate) struct ConnectionContext {
    pub pending: Arc<PendingCalls>,
    pub handler: Arc<MessageHandler>,
    pub event_tx: mpsc::Sender<WsEvent>,
    pub config: WsConfig,
    pub subscriptions: Arc<RwLock<SubscriptionManager>>,
    pub url: String,
    pub ping_channel: String,
}

/// Connection task: the single reader of the socket.
pub(crate) async fn connection_task(
    mut sink: WsSink,
    mut source: WsSource,
    mut cmd_rx: mpsc::Receiver<ConnectionCommand>,
    ctx: ConnectionContext,
) {
    let ping_interval_duration = Duration::from_secs(ctx.config.ping_interval_secs);
    let pong_timeout_duration = Duration::from_secs(ctx.config.pong_timeout_secs);
    let mut ping_interval = interval(ping_interval_duration);
    ping_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut reconnect_attempt = 0u32;
    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            msg = source.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let text = text.as_str();

                        // Correlated response? Route it to the waiting call.
                        if let Ok(FramePeek { request_id: Some(id) }) =
                            serde_json::from_str::<FramePeek>(text)
                        {
                            if ctx.pending.dispatch(&id, text) {
                                continue;
                            }
                            // Call already timed out or was cancelled; the
                            // venue may still have processed it.
                            tracing::debug!(request_id = %id, "unmatched response frame");
                            continue;
                        }

                        let events = ctx.handler.handle_push(text).await;
                        for event in events {
                            if matches!(event, WsEvent::Pong) {
                                last_pong = Instant::now();
                                awaiting_pong = false;
                            }

                            // try_send keeps a slow consumer from stalling
                            // the read loop
                            match ctx.event_tx.try_send(event) {
                                Ok(_) => {}
                                Err(mpsc::error::TrySendError::Full(dropped)) => {
                                    tracing::warn!(
                                        "event channel full, dropping event: {:?}",
                                        std::mem::discriminant(&dropped)
                                    );
                                }
                                Err(mpsc::error::TrySendError::Closed(_)) => {
                                    tracing::debug!("event receiver dropped");
                                    return;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = sink.send(Message::Pong(data)).await {
                            tracing::warn!("failed to send pong: {e}");
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .as_ref()
                            .map(|f| format!("code: {}, reason: {}", f.code, f.reason))
                            .unwrap_or_else(|| "no reason".to_string());
                        tracing::info!("WebSocket closed: {reason}");
                        let _ = ctx.event_tx.send(WsEvent::Disconnected { reason }).await;

                        match recover(&ctx, &mut reconnect_attempt).await {
                            Some((new_sink, new_source)) => {
                                sink = new_sink;
                                source = new_source;
                                last_pong = Instant::now();
                                awaiting_pong = false;
                            }
                            None => return,
                        }
                    }
                    Some(Ok(Message::Binary(_))) | Some(Ok(Message::Frame(_))) => {
                        // The venue only speaks text frames
                    }
                    Some(Err(e)) => {
                        tracing::error!("WebSocket error: {e}");
                        let _ = ctx.event_tx.send(WsEvent::Error { error: WsError::from(e) }).await;
                    }
                    None => {
                        tracing::info!("WebSocket stream ended");
                        let _ = ctx.event_tx.send(WsEvent::Disconnected {
                            reason: "stream ended".to_string(),
                        }).await;

                        match recover(&ctx, &mut reconnect_attempt).await {
                            Some((new_sink, new_source)) => {
                                sink = new_sink;
                                source = new_source;
                                last_pong = Instant::now();
                                awaiting_pong = false;
                            }
                            None => return,
                        }
                    }
                }
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(ConnectionCommand::Send(text)) => {
                        if let Err(e) = sink.send(Message::Text(text.into())).await {
                            tracing::warn!("failed to send message: {e}");
                        }
                    }
                    Some(ConnectionCommand::Ping) => {
                        send_ping(&mut sink, &ctx.ping_channel).await;
                    }
                    Some(ConnectionCommand::Disconnect) => {
                        let _ = sink.send(Message::Close(Some(CloseFrame {
                            code: tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode::Normal,
                            reason: "client disconnect".into(),
                        }))).await;
                        return;
                    }
                    None => return,
                }
            }

            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > pong_timeout_duration {
                    tracing::warn!("pong timeout after {pong_timeout_duration:?}");
                    let _ = ctx.event_tx.send(WsEvent::Error { error: WsError::PingTimeout }).await;
                    let _ = ctx.event_tx.send(WsEvent::Disconnected {
                        reason: "ping timeout".to_string(),
                    }).await;

                    match recover(&ctx, &mut reconnect_attempt).await {
                        Some((new_sink, new_source)) => {
                            sink = new_sink;
                            source = new_source;
                            last_pong = Instant::now();
                            awaiting_pong = false;
                        }
                        None => return,
                    }
                } else {
                    send_ping(&mut sink, &ctx.ping_channel).await;
                    awaiting_pong = true;
                }
            }
        }
    }
}

async fn send_ping(sink: &mut WsSink, ping_channel: &str) {
    let request = WsRequest::ping(ping_channel);
    if let Ok(json) = serde_json::to_string(&request) {
        if let Err(e) = sink.send(Message::Text(json.into())).await {
            tracing::warn!("failed to send ping: {e}");
        }
    }
}

/// Reconnect with exponential backoff and full jitter. Returns the fresh
/// sink/source, or None once auto-reconnect is disabled or attempts are
/// exhausted.
async fn recover(
    ctx: &ConnectionContext,
    attempt: &mut u32,
) -> Option<(WsSink, WsSource)> {
    while ctx.config.auto_reconnect && *attempt < ctx.config.reconnect_attempts {
        *attempt += 1;
        let _ = ctx
            .event_tx
            .send(WsEvent::Reconnecting { attempt: *attempt })
            .await;

        // Full jitter: randomize between 0 and the exponential delay to
        // avoid a thundering herd against the venue
        let ceiling = ctx
            .config
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
            .min(ctx.config.max_delay_ms);
        let delay = rand::thread_rng().gen_range(0..=ceiling);
        sleep(Duration::from_millis(delay)).await;

        match reconnect(ctx).await {
            Ok(pair) => {
                *attempt = 0;
                let _ = ctx.event_tx.send(WsEvent::Connected).await;
                return Some(pair);
            }
            Err(e) => {
                tracing::error!("reconnect failed: {e}");
                let _ = ctx.event_tx.send(WsEvent::Error { error: e }).await;
            }
        }
    }
    None
}

/// Redial and replay every tracked subscription. Local books are dropped
/// first; they are rebuilt from the fresh snapshots the venue pushes after
/// resubscription.
async fn reconnect(ctx: &ConnectionContext) -> WsResult<(WsSink, WsSource)> {
    let stream = establish(&ctx.url).await?;
    let (mut sink, source) = stream.split();

    ctx.handler.reset().await;

    if ctx.config.auto_resubscribe {
        let subs = ctx.subscriptions.read().await.all();
        for sub in subs {
            let request = sub.subscribe_request(None);
            if let Ok(json) = serde_json::to_string(&request) {
                if let Err(e) = sink.send(Message::Text(json.into())).await {
                    tracing::warn!("failed to re-subscribe after reconnect: {e}");
                }
            }
        }
    }

    Ok((sink, source))
}
