//! Main WebSocket client.
//!
//! Owns one connection per endpoint and the local state derived from it.
//! Events are consumed by polling the client as a [`Stream`].

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use pin_project_lite::pin_project;
use tokio::sync::{mpsc, RwLock};

use crate::auth::Credentials;
use crate::connection::{self, Connection, ConnectionCommand, ConnectionContext};
use crate::error::{WsError, WsResult};
use crate::handlers::MessageHandler;
use crate::network;
use crate::resubscribe::ResubscribeCoordinator;
use crate::rpc::{self, LoginIdentity};
use crate::state::{depth_limit, spot_depth_limit, LocalOrderbook, OrderbookReconciler};
use crate::subscriptions::{Subscription, SubscriptionManager};
use crate::trading::{self, AmendParams, CancelParams, OrderParams, OrderResult};
use crate::types::{AssetClass, Settle, WsEvent};

/// WebSocket client configuration
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Number of reconnect attempts before giving up
    pub reconnect_attempts: u32,
    /// Base delay for exponential backoff (ms)
    pub base_delay_ms: u64,
    /// Maximum delay for exponential backoff (ms)
    pub max_delay_ms: u64,
    /// Interval for the application-level ping (seconds)
    pub ping_interval_secs: u64,
    /// Timeout for the pong response (seconds); the connection is considered
    /// dead when no pong arrives within this time
    pub pong_timeout_secs: u64,
    /// Whether to automatically reconnect on disconnect
    pub auto_reconnect: bool,
    /// Whether to automatically re-subscribe after reconnect
    pub auto_resubscribe: bool,
    /// Deadline for a correlated call to collect its response frames (seconds)
    pub call_timeout_secs: u64,
    /// Capacity of the event channel
    pub event_channel_capacity: usize,
    /// Capacity of the command channel
    pub command_channel_capacity: usize,
    /// API credentials for `login` and private channels
    pub credentials: Option<Credentials>,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            reconnect_attempts: 10,
            base_delay_ms: 1000,
            max_delay_ms: 30000,
            ping_interval_secs: 30,
            pong_timeout_secs: 60,
            auto_reconnect: true,
            auto_resubscribe: true,
            call_timeout_secs: 10,
            event_channel_capacity: 1000,
            command_channel_capacity: 100,
            credentials: None,
        }
    }
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Disconnecting,
}

pin_project! {
    /// WebSocket client for the Coreline exchange.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use coreline_ws::prelude::*;
    /// use futures_util::StreamExt;
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), WsError> {
    ///     let mut client = CorelineWsClient::connect_spot(WsConfig::default()).await?;
    ///     client.subscribe_order_book("BTC_USDT", "100ms").await?;
    ///
    ///     while let Some(event) = client.next().await {
    ///         if let WsEvent::BookDelta { pair, asset } = event {
    ///             if let Some(book) = client.book(&pair).await {
    ///                 println!("{pair} ({asset}) best bid: {:?}", book.best_bid());
    ///             }
    ///         }
    ///     }
    ///     Ok(())
    /// }
    /// ```
    pub struct CorelineWsClient {
        url: String,
        config: WsConfig,
        asset: AssetClass,
        state: ConnectionState,
        connection: Connection,
        subscriptions: Arc<RwLock<SubscriptionManager>>,
        reconciler: Arc<RwLock<OrderbookReconciler>>,
        coordinator: Arc<ResubscribeCoordinator>,
        #[pin]
        event_rx: mpsc::Receiver<WsEvent>,
        connection_task_handle: Option<tokio::task::JoinHandle<()>>,
    }
}

impl CorelineWsClient {
    /// Connect to the spot endpoint.
    pub async fn connect_spot(config: WsConfig) -> WsResult<Self> {
        Self::connect_url(network::DEFAULT_SPOT_WS_URL, AssetClass::Spot, config).await
    }

    /// Connect to the endpoint for an asset class and settlement currency.
    ///
    /// Derivative orders settle in a specific currency; each settlement
    /// currency has its own endpoint and connection.
    pub async fn connect(asset: AssetClass, settle: Settle, config: WsConfig) -> WsResult<Self> {
        Self::connect_url(network::ws_endpoint(asset, settle), asset, config).await
    }

    /// Connect to an explicit URL.
    pub async fn connect_url(url: &str, asset: AssetClass, config: WsConfig) -> WsResult<Self> {
        let stream = connection::establish(url).await?;
        let (sink, source) = stream.split();

        let (cmd_tx, cmd_rx) = mpsc::channel(config.command_channel_capacity);
        let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity);

        let connection = Connection::new(cmd_tx, Duration::from_secs(config.call_timeout_secs));
        let reconciler = Arc::new(RwLock::new(OrderbookReconciler::new()));
        let subscriptions = Arc::new(RwLock::new(SubscriptionManager::new()));
        let coordinator = Arc::new(ResubscribeCoordinator::new(
            connection.clone(),
            Arc::clone(&reconciler),
            Arc::clone(&subscriptions),
        ));
        let handler = Arc::new(MessageHandler::new(
            Arc::clone(&reconciler),
            Arc::clone(&coordinator),
        ));

        let ctx = ConnectionContext {
            pending: connection.pending(),
            handler,
            event_tx: event_tx.clone(),
            config: config.clone(),
            subscriptions: Arc::clone(&subscriptions),
            url: url.to_string(),
            ping_channel: asset.channel("ping"),
        };
        let handle = tokio::spawn(connection::connection_task(sink, source, cmd_rx, ctx));

        let _ = event_tx.send(WsEvent::Connected).await;

        Ok(Self {
            url: url.to_string(),
            config,
            asset,
            state: ConnectionState::Connected,
            connection,
            subscriptions,
            reconciler,
            coordinator,
            event_rx,
            connection_task_handle: Some(handle),
        })
    }

    /// Authenticate this connection for private channels.
    pub async fn login(&self) -> WsResult<LoginIdentity> {
        let credentials = self.config.credentials.as_ref().ok_or_else(|| {
            WsError::Precondition("login requires credentials in the config".to_string())
        })?;
        rpc::login(&self.connection, credentials, &self.asset.channel("login")).await
    }

    /// Subscribe to incremental order book updates for a pair.
    ///
    /// On spot, `interval` encodes the requested depth (`"20ms"` carries 20
    /// rows, `"100ms"` carries 100); derivative books run at the fixed depth
    /// of their asset class and ignore `interval`.
    pub async fn subscribe_order_book(&mut self, pair: &str, interval: &str) -> WsResult<()> {
        let (depth, payload) = match self.asset {
            AssetClass::Spot => (
                spot_depth_limit(interval)?,
                vec![pair.to_string(), interval.to_string()],
            ),
            other => (depth_limit(other), vec![pair.to_string()]),
        };

        let sub = Subscription::new(self.asset.channel("order_book_update"), payload);
        self.reconciler.write().await.track(pair, self.asset, depth);
        self.subscriptions.write().await.upsert(sub.clone());
        self.open(&sub).await
    }

    /// Unsubscribe from order book updates and drop the local book.
    pub async fn unsubscribe_order_book(&mut self, pair: &str) -> WsResult<()> {
        let channel = self.asset.channel("order_book_update");
        let sub = self
            .subscriptions
            .read()
            .await
            .find(&channel, pair)
            .cloned()
            .ok_or_else(|| WsError::SubscriptionNotFound {
                channel: channel.clone(),
            })?;

        self.subscriptions.write().await.remove(&channel, pair);
        self.reconciler.write().await.untrack(pair, self.asset);
        self.close(&sub).await
    }

    /// Subscribe to ticker pushes for a set of pairs.
    pub async fn subscribe_tickers(&mut self, pairs: Vec<String>) -> WsResult<()> {
        let sub = Subscription::new(self.asset.channel("tickers"), pairs);
        self.subscriptions.write().await.upsert(sub.clone());
        self.open(&sub).await
    }

    /// Subscribe to public trade pushes for a set of pairs.
    pub async fn subscribe_trades(&mut self, pairs: Vec<String>) -> WsResult<()> {
        let sub = Subscription::new(self.asset.channel("trades"), pairs);
        self.subscriptions.write().await.upsert(sub.clone());
        self.open(&sub).await
    }

    /// Subscribe to private order updates. Requires a prior [`login`].
    ///
    /// [`login`]: CorelineWsClient::login
    pub async fn subscribe_orders(&mut self, pairs: Vec<String>) -> WsResult<()> {
        let sub = Subscription::new(self.asset.channel("orders"), pairs);
        self.subscriptions.write().await.upsert(sub.clone());
        self.open(&sub).await
    }

    /// Subscribe to private balance updates. Requires a prior [`login`].
    ///
    /// [`login`]: CorelineWsClient::login
    pub async fn subscribe_balances(&mut self) -> WsResult<()> {
        let sub = Subscription::new(self.asset.channel("balances"), Vec::new());
        self.subscriptions.write().await.upsert(sub.clone());
        self.open(&sub).await
    }

    /// Place a limit order.
    pub async fn order_place(&self, params: &OrderParams) -> WsResult<OrderResult> {
        trading::order_place(&self.connection, self.asset, params).await
    }

    /// Cancel a resting order.
    pub async fn order_cancel(&self, params: &CancelParams) -> WsResult<OrderResult> {
        trading::order_cancel(&self.connection, self.asset, params).await
    }

    /// Amend a resting order's price and/or amount.
    pub async fn order_amend(&self, params: &AmendParams) -> WsResult<OrderResult> {
        trading::order_amend(&self.connection, self.asset, params).await
    }

    /// Snapshot of the local order book for a pair.
    pub async fn book(&self, pair: &str) -> Option<LocalOrderbook> {
        self.reconciler.read().await.book(pair, self.asset).cloned()
    }

    /// Whether a recovery handshake for this pair's book is running.
    pub async fn is_resubscribing(&self, pair: &str) -> bool {
        self.coordinator.is_resubscribing(pair, self.asset).await
    }

    /// Send an application-level ping now (one is also sent periodically).
    pub async fn ping(&self) -> WsResult<()> {
        self.connection.command(ConnectionCommand::Ping).await
    }

    /// Disconnect from the venue and wait for the connection task to finish.
    pub async fn disconnect(&mut self) -> WsResult<()> {
        self.state = ConnectionState::Disconnecting;

        let _ = self.connection.command(ConnectionCommand::Disconnect).await;
        if let Some(handle) = self.connection_task_handle.take() {
            let _ = handle.await;
        }

        self.state = ConnectionState::Disconnected;
        Ok(())
    }

    async fn open(&self, sub: &Subscription) -> WsResult<()> {
        let id = self.connection.generate_message_id();
        let request = sub.subscribe_request(Some(id.clone()));
        let frame = self
            .connection
            .send_one(&id, serde_json::to_string(&request)?)
            .await
            .map_err(|e| e.on_channel(&sub.channel))?;
        rpc::check_confirm(&frame).map_err(|e| e.on_channel(&sub.channel))
    }

    async fn close(&self, sub: &Subscription) -> WsResult<()> {
        let id = self.connection.generate_message_id();
        let request = sub.unsubscribe_request(Some(id.clone()));
        let frame = self
            .connection
            .send_one(&id, serde_json::to_string(&request)?)
            .await
            .map_err(|e| e.on_channel(&sub.channel))?;
        rpc::check_confirm(&frame).map_err(|e| e.on_channel(&sub.channel))
    }

    /// The underlying connection handle, for issuing raw correlated calls.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Check if the connection task is still running
    pub fn is_task_running(&self) -> bool {
        self.connection_task_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn asset(&self) -> AssetClass {
        self.asset
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn config(&self) -> &WsConfig {
        &self.config
    }
}

impl Stream for CorelineWsClient {
    type Item = WsEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        this.event_rx.poll_recv(cx)
    }
}
