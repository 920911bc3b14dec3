//! Message types for the Coreline WebSocket v4 protocol.
//!
//! This module contains the request/response envelopes, the push payload
//! types, and the identifiers (asset class, settlement currency, currency
//! pair) used to key local state.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::error::{WsError, WsResult};

// ============================================================================
// IDENTIFIERS
// ============================================================================

/// Asset class an endpoint / channel / book belongs to.
///
/// Channels are prefixed with the asset-class tag (`spot.order_book_update`,
/// `futures.order_place`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetClass {
    Spot,
    Futures,
    Delivery,
    Options,
}

impl AssetClass {
    /// The channel-prefix tag for this asset class.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spot => "spot",
            Self::Futures => "futures",
            Self::Delivery => "delivery",
            Self::Options => "options",
        }
    }

    /// Build the full channel name for a route under this asset class.
    pub fn channel(&self, route: &str) -> String {
        format!("{}.{}", self.as_str(), route)
    }
}

impl From<&str> for AssetClass {
    fn from(s: &str) -> Self {
        match s {
            "futures" => Self::Futures,
            "delivery" => Self::Delivery,
            "options" => Self::Options,
            _ => Self::Spot,
        }
    }
}

impl std::fmt::Display for AssetClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settlement currency of a derivative contract; selects the endpoint a
/// derivative order is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Settle {
    Usdt,
    Btc,
    Usd,
}

impl Settle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Usdt => "usdt",
            Self::Btc => "btc",
            Self::Usd => "usd",
        }
    }
}

/// A trading pair split into base and quote currencies.
///
/// The venue encodes pairs as `BASE_QUOTE` (e.g. `BTC_USDT`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CurrencyPair {
    pub base: String,
    pub quote: String,
}

impl CurrencyPair {
    /// Parse a `BASE_QUOTE` pair string.
    pub fn parse(pair: &str) -> WsResult<Self> {
        match pair.split_once('_') {
            Some((base, quote)) if !base.is_empty() && !quote.is_empty() => Ok(Self {
                base: base.to_string(),
                quote: quote.to_string(),
            }),
            _ => Err(WsError::Precondition(format!(
                "malformed currency pair: {pair}"
            ))),
        }
    }
}

impl std::fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.base, self.quote)
    }
}

// ============================================================================
// REQUEST TYPES (Client → Server)
// ============================================================================

/// Outgoing request envelope.
///
/// Subscribe/unsubscribe requests carry the subscription arguments directly
/// as `payload`; API calls carry an [`ApiPayload`] with the per-call request
/// ID and optional credentials proof.
#[derive(Debug, Clone, Serialize)]
pub struct WsRequest<P> {
    pub time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub channel: String,
    pub event: String,
    pub payload: P,
}

impl WsRequest<Vec<String>> {
    /// Create a subscribe request.
    pub fn subscribe(channel: &str, payload: Vec<String>, id: Option<String>) -> Self {
        Self::channel_event(channel, "subscribe", payload, id)
    }

    /// Create an unsubscribe request.
    pub fn unsubscribe(channel: &str, payload: Vec<String>, id: Option<String>) -> Self {
        Self::channel_event(channel, "unsubscribe", payload, id)
    }

    /// Create an application-level ping request.
    pub fn ping(channel: &str) -> Self {
        Self::channel_event(channel, "ping", Vec::new(), None)
    }

    fn channel_event(channel: &str, event: &str, payload: Vec<String>, id: Option<String>) -> Self {
        Self {
            time: Utc::now().timestamp(),
            id,
            channel: channel.to_string(),
            event: event.to_string(),
            payload,
        }
    }
}

impl WsRequest<ApiPayload> {
    /// Create an API call request.
    pub fn api(channel: &str, payload: ApiPayload) -> Self {
        Self::api_event(channel, "api", payload)
    }

    /// Create an API call request with an explicit event name.
    pub fn api_event(channel: &str, event: &str, payload: ApiPayload) -> Self {
        Self {
            time: Utc::now().timestamp(),
            id: None,
            channel: channel.to_string(),
            event: event.to_string(),
            payload,
        }
    }
}

/// Payload of an API call: per-call request ID, optional credentials proof,
/// and the marshalled call parameters.
#[derive(Debug, Clone, Serialize)]
pub struct ApiPayload {
    pub req_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub req_param: Option<serde_json::Value>,
}

impl ApiPayload {
    /// Payload for an unauthenticated call.
    pub fn params(req_id: String, req_param: serde_json::Value) -> Self {
        Self {
            req_id,
            api_key: None,
            signature: None,
            timestamp: None,
            req_param: Some(req_param),
        }
    }
}

// ============================================================================
// RESPONSE TYPES (Server → Client)
// ============================================================================

/// Minimal probe used by the read loop to decide whether a frame answers an
/// outstanding call.
#[derive(Debug, Clone, Deserialize)]
pub struct FramePeek {
    #[serde(default)]
    pub request_id: Option<String>,
}

/// Response envelope for correlated calls.
#[derive(Debug, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub header: Option<ResponseHeader>,
    #[serde(default)]
    pub data: Option<ResponseData>,
}

/// Header of a correlated response.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseHeader {
    pub status: String,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub event: String,
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub response_time: Option<String>,
}

/// Status value the venue uses for successful calls.
pub const STATUS_OK: &str = "200";

/// Body of a correlated response. `result` is kept raw and decoded into the
/// caller's type only after the status check.
#[derive(Debug, Deserialize)]
pub struct ResponseData {
    #[serde(default)]
    pub result: Option<Box<RawValue>>,
    #[serde(default)]
    pub errs: Option<VenueErr>,
    #[serde(default)]
    pub ack: Option<bool>,
}

/// Structured error the venue attaches to non-success responses.
#[derive(Debug, Clone, Deserialize)]
pub struct VenueErr {
    pub label: String,
    #[serde(default)]
    pub message: String,
}

/// Envelope of unsolicited push frames.
#[derive(Debug, Deserialize)]
pub struct PushEnvelope {
    #[serde(default)]
    pub time: i64,
    pub channel: String,
    pub event: String,
    #[serde(default)]
    pub result: Option<Box<RawValue>>,
}

/// Push routes, classified by the suffix of the channel name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushKind {
    OrderBookUpdate,
    Tickers,
    Trades,
    Orders,
    Balances,
    Pong,
    Unknown,
}

impl From<&str> for PushKind {
    fn from(route: &str) -> Self {
        match route {
            "order_book_update" => Self::OrderBookUpdate,
            "tickers" => Self::Tickers,
            "trades" => Self::Trades,
            "orders" => Self::Orders,
            "balances" => Self::Balances,
            "pong" => Self::Pong,
            _ => Self::Unknown,
        }
    }
}

// ============================================================================
// ORDER BOOK PAYLOADS
// ============================================================================

/// One price level: `[price, amount]`. An amount of zero deletes the level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel(pub Decimal, pub Decimal);

impl PriceLevel {
    pub fn price(&self) -> Decimal {
        self.0
    }

    pub fn amount(&self) -> Decimal {
        self.1
    }
}

/// Full order book state for a pair. Replaces any previously held state.
#[derive(Debug, Clone, Deserialize)]
pub struct BookSnapshot {
    #[serde(rename = "t", default)]
    pub time: i64,
    #[serde(rename = "s")]
    pub pair: String,
    pub last_update_id: u64,
    #[serde(default)]
    pub bids: Vec<PriceLevel>,
    #[serde(default)]
    pub asks: Vec<PriceLevel>,
}

/// Incremental order book change covering venue update IDs `U..=u`.
#[derive(Debug, Clone, Deserialize)]
pub struct BookDelta {
    #[serde(rename = "t", default)]
    pub time: i64,
    #[serde(rename = "s")]
    pub pair: String,
    #[serde(rename = "U")]
    pub first_update_id: u64,
    #[serde(rename = "u")]
    pub last_update_id: u64,
    #[serde(rename = "b", default)]
    pub bids: Vec<PriceLevel>,
    #[serde(rename = "a", default)]
    pub asks: Vec<PriceLevel>,
}

// ============================================================================
// MARKET DATA PAYLOADS
// ============================================================================

/// Ticker push payload.
#[derive(Debug, Clone, Deserialize)]
pub struct TickerData {
    pub currency_pair: String,
    pub last: Decimal,
    #[serde(default)]
    pub lowest_ask: Option<Decimal>,
    #[serde(default)]
    pub highest_bid: Option<Decimal>,
    #[serde(default)]
    pub base_volume: Option<Decimal>,
    #[serde(default)]
    pub quote_volume: Option<Decimal>,
}

/// Public trade push payload.
#[derive(Debug, Clone, Deserialize)]
pub struct TradeData {
    pub id: u64,
    pub currency_pair: String,
    pub side: String,
    pub price: Decimal,
    pub amount: Decimal,
    #[serde(default)]
    pub create_time_ms: Option<i64>,
}

// ============================================================================
// ACCOUNT EVENT PAYLOADS
// ============================================================================

/// Private order update push payload.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderUpdate {
    pub id: String,
    pub currency_pair: String,
    pub side: String,
    /// `open`, `closed` or `cancelled`
    pub status: String,
    pub price: Decimal,
    pub amount: Decimal,
    #[serde(default)]
    pub left: Option<Decimal>,
    #[serde(default)]
    pub text: Option<String>,
}

/// Private balance update push payload.
#[derive(Debug, Clone, Deserialize)]
pub struct BalanceUpdate {
    pub currency: String,
    pub available: Decimal,
    #[serde(default)]
    pub total: Option<Decimal>,
}

// ============================================================================
// CLIENT EVENTS
// ============================================================================

/// Events emitted on the client's event stream.
#[derive(Debug, Clone)]
pub enum WsEvent {
    /// Successfully connected to the venue
    Connected,

    /// Disconnected from the venue
    Disconnected { reason: String },

    /// Reconnect attempt in progress
    Reconnecting { attempt: u32 },

    /// A full snapshot replaced the local book
    BookSnapshot { pair: String, asset: AssetClass },

    /// A delta was applied to the local book
    BookDelta { pair: String, asset: AssetClass },

    /// A sequence gap invalidated the local book; recovery has been handed
    /// to the resubscription coordinator
    BookInvalidated { pair: String, asset: AssetClass },

    /// Ticker push
    Ticker(TickerData),

    /// Public trade push
    Trade(TradeData),

    /// Private order update push
    Order(OrderUpdate),

    /// Private balance update push
    Balance(BalanceUpdate),

    /// Application-level pong received
    Pong,

    /// Error occurred
    Error { error: WsError },
}
