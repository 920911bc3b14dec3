//! # Coreline WebSocket SDK
//!
//! A Rust client for the Coreline exchange WebSocket v4 API. One persistent
//! duplex connection carries both correlated request/response calls (login,
//! order entry) and continuous push data (tickers, trades, order book
//! updates, account events); this crate multiplexes the two and keeps local
//! order books consistent with the venue's authoritative update sequence.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use coreline_ws::prelude::*;
//! use futures_util::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), WsError> {
//!     let mut client = CorelineWsClient::connect_spot(WsConfig::default()).await?;
//!     client.subscribe_order_book("BTC_USDT", "100ms").await?;
//!
//!     while let Some(event) = client.next().await {
//!         match event {
//!             WsEvent::BookDelta { pair, .. } => {
//!                 if let Some(book) = client.book(&pair).await {
//!                     println!("best bid: {:?}", book.best_bid());
//!                 }
//!             }
//!             WsEvent::BookInvalidated { pair, .. } => {
//!                 // Recovery runs on its own task; the fresh snapshot
//!                 // arrives as a BookSnapshot event.
//!                 println!("{pair} resynchronizing");
//!             }
//!             _ => {}
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Trading
//!
//! ```rust,ignore
//! let config = WsConfig {
//!     credentials: Some(Credentials::new(api_key, api_secret)),
//!     ..Default::default()
//! };
//! let client = CorelineWsClient::connect_spot(config).await?;
//! client.login().await?;
//!
//! let order = client.order_place(&OrderParams {
//!     currency_pair: "BTC_USDT".to_string(),
//!     side: OrderSide::Buy,
//!     price: "30000".parse().unwrap(),
//!     amount: "0.01".parse().unwrap(),
//!     time_in_force: Some(TimeInForce::Gtc),
//!     text: None,
//! }).await?;
//! ```

// ============================================================================
// MODULES
// ============================================================================

/// Login signing (HMAC-SHA512) and credentials.
pub mod auth;

/// Main WebSocket client and configuration.
pub mod client;

/// Connection task, pending-call registry, and transport plumbing.
pub mod connection;

/// Error types.
pub mod error;

/// Push-frame dispatch.
pub mod handlers;

/// Endpoint URL constants and settlement-currency routing.
pub mod network;

/// Recovery coordination for invalidated order books.
pub mod resubscribe;

/// Request/response correlation over the push channel.
pub mod rpc;

/// Local state maintained from venue push data.
pub mod state;

/// Subscription tracking and replay.
pub mod subscriptions;

/// Typed order entry.
pub mod trading;

/// Wire types: envelopes, push payloads, identifiers.
pub mod types;

// ============================================================================
// PRELUDE
// ============================================================================

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use coreline_ws::prelude::*;
/// ```
pub mod prelude {
    pub use crate::auth::Credentials;
    pub use crate::client::{ConnectionState, CorelineWsClient, WsConfig};
    pub use crate::connection::Connection;
    pub use crate::error::{WsError, WsResult};
    pub use crate::network::{ws_endpoint, DEFAULT_SPOT_WS_URL};
    pub use crate::resubscribe::ResubscribeCoordinator;
    pub use crate::rpc::{is_ack_frame, login, send_request, LoginIdentity};
    pub use crate::state::{
        can_apply, depth_limit, spot_depth_limit, BookStatus, DeltaApply, LocalOrderbook,
        OrderbookReconciler,
    };
    pub use crate::subscriptions::{Subscription, SubscriptionManager};
    pub use crate::trading::{
        AmendParams, CancelParams, OrderParams, OrderResult, OrderSide, TimeInForce,
    };
    pub use crate::types::{
        AssetClass, BalanceUpdate, BookDelta, BookSnapshot, CurrencyPair, OrderUpdate, PriceLevel,
        Settle, TickerData, TradeData, WsEvent,
    };
}
