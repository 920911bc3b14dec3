//! Network URL constants for the Coreline WebSocket API.

use crate::types::{AssetClass, Settle};

/// Default WebSocket URL for the spot endpoint.
pub const DEFAULT_SPOT_WS_URL: &str = "wss://ws.coreline.exchange/v4";

/// USDT-margined perpetual futures endpoint.
pub const FUTURES_USDT_WS_URL: &str = "wss://fx-ws.coreline.exchange/v4/ws/usdt";

/// BTC-margined perpetual futures endpoint.
pub const FUTURES_BTC_WS_URL: &str = "wss://fx-ws.coreline.exchange/v4/ws/btc";

/// Delivery futures endpoint (USDT-settled).
pub const DELIVERY_USDT_WS_URL: &str = "wss://fx-ws.coreline.exchange/v4/ws/delivery/usdt";

/// Options endpoint (USDT-settled).
pub const OPTIONS_USDT_WS_URL: &str = "wss://op-ws.coreline.exchange/v4/ws/usdt";

/// Resolve the endpoint for an asset class and settlement currency.
///
/// Derivative contracts are routed to the endpoint of the currency their
/// profit/loss settles in; spot has a single endpoint.
pub fn ws_endpoint(asset: AssetClass, settle: Settle) -> &'static str {
    match (asset, settle) {
        (AssetClass::Spot, _) => DEFAULT_SPOT_WS_URL,
        (AssetClass::Futures, Settle::Btc) => FUTURES_BTC_WS_URL,
        (AssetClass::Futures, _) => FUTURES_USDT_WS_URL,
        (AssetClass::Delivery, _) => DELIVERY_USDT_WS_URL,
        (AssetClass::Options, _) => OPTIONS_USDT_WS_URL,
    }
}
