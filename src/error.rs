//! Error types for the Coreline WebSocket client.

use thiserror::Error;

use crate::types::AssetClass;

/// Errors surfaced by the WebSocket client.
#[derive(Debug, Clone, Error)]
pub enum WsError {
    /// Caller bug: invalid arguments, missing required fields. Never retried,
    /// no I/O is attempted.
    #[error("precondition violated: {0}")]
    Precondition(String),

    /// Malformed envelope, unknown channel, or other wire-contract breach
    #[error("protocol error: {0}")]
    Protocol(String),

    /// JSON (de)serialization failure
    #[error("failed to parse message: {0}")]
    MessageParse(String),

    /// A call completed without producing any response frame
    #[error("no response frames received on {channel}")]
    EmptyResponse { channel: String },

    /// Non-success status with the venue's structured error attached
    #[error("venue rejected request: {label}: {message}")]
    VenueRejection { label: String, message: String },

    /// Update-ID gap detected; the local book is stale and must be
    /// resynchronized from a fresh snapshot
    #[error("order book snapshot outdated for {pair} ({asset})")]
    SnapshotOutdated { pair: String, asset: AssetClass },

    /// Snapshot carried no levels at all
    #[error("malformed orderbook data")]
    MalformedBook,

    /// Spot depth is encoded in the subscription interval; only the venue's
    /// published intervals are accepted
    #[error("invalid orderbook update interval: {0}")]
    InvalidUpdateInterval(String),

    /// A recovery handshake for this key is already running
    #[error("resubscription already in flight for {pair} ({asset})")]
    ResubscribeInFlight { pair: String, asset: AssetClass },

    /// Recovery was requested for a channel that is not subscribed
    #[error("no active subscription on channel {channel}")]
    SubscriptionNotFound { channel: String },

    /// A lower-layer failure wrapped with the failing call's channel
    #[error("request on {channel} failed: {source}")]
    Call {
        channel: String,
        #[source]
        source: Box<WsError>,
    },

    /// Initial connection failure
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Unexpected connection close
    #[error("connection closed: code {code}, reason: {reason}")]
    ConnectionClosed { code: u16, reason: String },

    /// Not connected to the venue
    #[error("not connected to WebSocket server")]
    NotConnected,

    /// Internal channel closed
    #[error("internal channel closed")]
    ChannelClosed,

    /// Invalid URL
    #[error("invalid WebSocket URL: {0}")]
    InvalidUrl(String),

    /// Call wait aborted after the configured deadline
    #[error("operation timed out")]
    Timeout,

    /// Client ping not answered within the pong timeout
    #[error("ping timeout: no pong response received")]
    PingTimeout,

    /// IO error
    #[error("IO error: {0}")]
    Io(String),
}

impl WsError {
    /// Wrap a lower-layer error with the channel of the failing call.
    pub(crate) fn on_channel(self, channel: &str) -> Self {
        WsError::Call {
            channel: channel.to_string(),
            source: Box::new(self),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for WsError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error;
        match err {
            Error::ConnectionClosed => WsError::ConnectionClosed {
                code: 1000,
                reason: "connection closed normally".to_string(),
            },
            Error::AlreadyClosed => WsError::NotConnected,
            Error::Io(e) => WsError::Io(e.to_string()),
            Error::Protocol(e) => WsError::Protocol(e.to_string()),
            Error::Url(e) => WsError::InvalidUrl(e.to_string()),
            Error::Http(resp) => {
                WsError::ConnectionFailed(format!("HTTP error: {:?}", resp.status()))
            }
            Error::HttpFormat(e) => WsError::ConnectionFailed(e.to_string()),
            other => WsError::Protocol(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for WsError {
    fn from(err: serde_json::Error) -> Self {
        WsError::MessageParse(err.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for WsError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        WsError::ChannelClosed
    }
}

/// Result type alias for WebSocket operations
pub type WsResult<T> = Result<T, WsError>;
