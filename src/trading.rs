//! Typed order entry over the correlator.
//!
//! Mapping only: each call marshals its parameters, picks the channel for
//! the asset class, and waits out the venue's two-frame (ack + result)
//! exchange.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::connection::Connection;
use crate::error::WsResult;
use crate::rpc;
use crate::types::AssetClass;

/// Order routes answer with an ack frame followed by the terminal result.
const ORDER_RESPONSE_FRAMES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeInForce {
    /// Good till cancelled
    Gtc,
    /// Immediate or cancel
    Ioc,
    /// Pending or cancel (post-only)
    Poc,
}

/// Parameters for placing a limit order.
#[derive(Debug, Clone, Serialize)]
pub struct OrderParams {
    pub currency_pair: String,
    pub side: OrderSide,
    pub price: Decimal,
    pub amount: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_in_force: Option<TimeInForce>,
    /// Client-assigned order label
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Parameters for cancelling an order.
#[derive(Debug, Clone, Serialize)]
pub struct CancelParams {
    pub order_id: String,
    pub currency_pair: String,
}

/// Parameters for amending a resting order. Omitted fields are unchanged.
#[derive(Debug, Clone, Serialize)]
pub struct AmendParams {
    pub order_id: String,
    pub currency_pair: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<Decimal>,
}

/// Venue's view of an order after a trading call.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderResult {
    pub id: String,
    pub currency_pair: String,
    #[serde(default)]
    pub side: Option<OrderSide>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub left: Option<Decimal>,
    #[serde(default)]
    pub text: Option<String>,
}

pub async fn order_place(
    conn: &Connection,
    asset: AssetClass,
    params: &OrderParams,
) -> WsResult<OrderResult> {
    rpc::send_request(
        conn,
        &asset.channel("order_place"),
        "api",
        params,
        ORDER_RESPONSE_FRAMES,
    )
    .await
}

pub async fn order_cancel(
    conn: &Connection,
    asset: AssetClass,
    params: &CancelParams,
) -> WsResult<OrderResult> {
    rpc::send_request(
        conn,
        &asset.channel("order_cancel"),
        "api",
        params,
        ORDER_RESPONSE_FRAMES,
    )
    .await
}

pub async fn order_amend(
    conn: &Connection,
    asset: AssetClass,
    params: &AmendParams,
) -> WsResult<OrderResult> {
    rpc::send_request(
        conn,
        &asset.channel("order_amend"),
        "api",
        params,
        ORDER_RESPONSE_FRAMES,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionCommand;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[test]
    fn test_order_params_serialization() {
        let params = OrderParams {
            currency_pair: "BTC_USDT".to_string(),
            side: OrderSide::Buy,
            price: "30000.5".parse().unwrap(),
            amount: "0.25".parse().unwrap(),
            time_in_force: Some(TimeInForce::Gtc),
            text: None,
        };
        let json = serde_json::to_string(&params).unwrap();
        assert!(json.contains(r#""side":"buy""#));
        assert!(json.contains(r#""price":"30000.5""#));
        assert!(json.contains(r#""time_in_force":"gtc""#));
        assert!(!json.contains("text"));
    }

    #[tokio::test]
    async fn test_order_place_round_trip() {
        let (cmd_tx, mut cmd_rx) = mpsc::channel(16);
        let conn = Connection::new(cmd_tx, Duration::from_millis(500));
        let pending = conn.pending();
        tokio::spawn(async move {
            while let Some(cmd) = cmd_rx.recv().await {
                if let ConnectionCommand::Send(text) = cmd {
                    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
                    // The facade must route by asset class.
                    assert_eq!(value["channel"], "futures.order_place");
                    let req_id = value["payload"]["req_id"].as_str().unwrap();
                    let ack = format!(
                        r#"{{"request_id":"{req_id}","header":{{"status":"200","channel":"futures.order_place","event":"api"}},"data":{{"ack":true}}}}"#
                    );
                    let result = format!(
                        r#"{{"request_id":"{req_id}","header":{{"status":"200","channel":"futures.order_place","event":"api"}},"data":{{"result":{{"id":"o-9","currency_pair":"BTC_USDT","status":"open","left":"0.25"}}}}}}"#
                    );
                    pending.dispatch(req_id, &ack);
                    pending.dispatch(req_id, &result);
                }
            }
        });

        let params = OrderParams {
            currency_pair: "BTC_USDT".to_string(),
            side: OrderSide::Sell,
            price: "30000".parse().unwrap(),
            amount: "0.25".parse().unwrap(),
            time_in_force: None,
            text: Some("t-client-1".to_string()),
        };
        let order = order_place(&conn, AssetClass::Futures, &params).await.unwrap();
        assert_eq!(order.id, "o-9");
        assert_eq!(order.status, "open");
        assert_eq!(order.left, Some("0.25".parse().unwrap()));
    }
}
