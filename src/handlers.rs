//! Push-frame dispatch.
//!
//! Frames that answer an outstanding call are routed by the connection task
//! straight to the pending-call registry; everything else lands here and is
//! decoded and applied by channel kind.

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::{WsError, WsResult};
use crate::resubscribe::ResubscribeCoordinator;
use crate::state::{DeltaApply, OrderbookReconciler};
use crate::types::{
    AssetClass, BalanceUpdate, BookDelta, BookSnapshot, OrderUpdate, PushEnvelope, PushKind,
    TickerData, TradeData, WsEvent,
};

/// Routes unsolicited frames to the reconciler and the typed event stream.
#[derive(Debug)]
pub struct MessageHandler {
    reconciler: Arc<RwLock<OrderbookReconciler>>,
    coordinator: Arc<ResubscribeCoordinator>,
}

impl MessageHandler {
    pub(crate) fn new(
        reconciler: Arc<RwLock<OrderbookReconciler>>,
        coordinator: Arc<ResubscribeCoordinator>,
    ) -> Self {
        Self {
            reconciler,
            coordinator,
        }
    }

    /// Handle one unsolicited frame and return the events it produced.
    pub async fn handle_push(&self, text: &str) -> Vec<WsEvent> {
        let envelope: PushEnvelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!("failed to parse push frame: {e}");
                return vec![WsEvent::Error {
                    error: WsError::MessageParse(e.to_string()),
                }];
            }
        };

        let (prefix, route) = match envelope.channel.split_once('.') {
            Some(parts) => parts,
            None => {
                tracing::warn!(channel = %envelope.channel, "unknown channel format");
                return vec![WsEvent::Error {
                    error: WsError::Protocol(format!("unknown channel: {}", envelope.channel)),
                }];
            }
        };
        let asset = AssetClass::from(prefix);

        match PushKind::from(route) {
            PushKind::OrderBookUpdate => self.handle_book_update(&envelope, asset).await,
            PushKind::Tickers => decode_push::<TickerData>(&envelope)
                .map(|t| vec![WsEvent::Ticker(t)])
                .unwrap_or_else(parse_error_event),
            PushKind::Trades => decode_push::<TradeData>(&envelope)
                .map(|t| vec![WsEvent::Trade(t)])
                .unwrap_or_else(parse_error_event),
            PushKind::Orders => decode_push::<Vec<OrderUpdate>>(&envelope)
                .map(|orders| orders.into_iter().map(WsEvent::Order).collect())
                .unwrap_or_else(parse_error_event),
            PushKind::Balances => decode_push::<Vec<BalanceUpdate>>(&envelope)
                .map(|balances| balances.into_iter().map(WsEvent::Balance).collect())
                .unwrap_or_else(parse_error_event),
            PushKind::Pong => vec![WsEvent::Pong],
            PushKind::Unknown => {
                // Subscribe confirmations replayed without an ID end up
                // here; so do channels this client never asked for.
                if envelope.event == "subscribe" || envelope.event == "unsubscribe" {
                    tracing::debug!(channel = %envelope.channel, event = %envelope.event,
                        "subscription confirmation");
                } else {
                    tracing::warn!(channel = %envelope.channel, "unhandled push channel");
                }
                vec![]
            }
        }
    }

    /// Apply a book frame. Snapshots replace state; deltas advance it; a
    /// gap hands the book to the resubscription coordinator.
    async fn handle_book_update(&self, envelope: &PushEnvelope, asset: AssetClass) -> Vec<WsEvent> {
        match envelope.event.as_str() {
            "all" => {
                let snapshot: BookSnapshot = match decode_push(envelope) {
                    Ok(snapshot) => snapshot,
                    Err(e) => return parse_error_event(e),
                };
                let pair = snapshot.pair.clone();
                match self.reconciler.write().await.load_snapshot(asset, &snapshot) {
                    Ok(()) => vec![WsEvent::BookSnapshot { pair, asset }],
                    Err(error) => {
                        tracing::warn!(pair = %pair, %asset, "rejected snapshot: {error}");
                        vec![WsEvent::Error { error }]
                    }
                }
            }
            "update" => {
                let delta: BookDelta = match decode_push(envelope) {
                    Ok(delta) => delta,
                    Err(e) => return parse_error_event(e),
                };
                let pair = delta.pair.clone();
                let applied = self.reconciler.write().await.apply_update(asset, &delta);
                match applied {
                    Ok(DeltaApply::Applied) => vec![WsEvent::BookDelta { pair, asset }],
                    Ok(DeltaApply::Stale) => vec![],
                    Err(WsError::SnapshotOutdated { .. }) => {
                        self.recover_book(&pair, asset, &envelope.channel).await;
                        vec![WsEvent::BookInvalidated { pair, asset }]
                    }
                    Err(error) => vec![WsEvent::Error { error }],
                }
            }
            other => {
                tracing::warn!(event = other, "unknown order book event");
                vec![]
            }
        }
    }

    /// Kick off recovery for a gapped book. An already-running handshake
    /// for the same key means the work is done; anything else is surfaced
    /// in the log, never to the read loop.
    async fn recover_book(&self, pair: &str, asset: AssetClass, channel: &str) {
        tracing::warn!(pair, %asset, "order book gap detected, resubscribing");
        match self.coordinator.resubscribe(pair, asset, channel).await {
            Ok(()) => {}
            Err(WsError::ResubscribeInFlight { .. }) => {
                tracing::debug!(pair, %asset, "resubscription already in flight");
            }
            Err(e) => {
                tracing::warn!(pair, %asset, "failed to start resubscription: {e}");
            }
        }
    }

    /// Drop all locally derived state. Used on reconnect.
    pub(crate) async fn reset(&self) {
        self.reconciler.write().await.clear();
    }
}

fn decode_push<T: serde::de::DeserializeOwned>(envelope: &PushEnvelope) -> WsResult<T> {
    let raw = envelope
        .result
        .as_ref()
        .ok_or_else(|| WsError::Protocol(format!("push frame on {} has no result", envelope.channel)))?;
    Ok(serde_json::from_str(raw.get())?)
}

fn parse_error_event(error: WsError) -> Vec<WsEvent> {
    tracing::warn!("failed to decode push payload: {error}");
    vec![WsEvent::Error { error }]
}
