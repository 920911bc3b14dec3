//! Recovery coordination for invalidated order books.
//!
//! A burst of reordered deltas can trigger many near-simultaneous gap
//! detections for the same book. This coordinator is the single dedup point:
//! it admits at most one unsubscribe→resubscribe handshake per
//! (base, quote, asset class) key at a time, so recovery never turns into
//! redundant subscription churn against the venue.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::connection::Connection;
use crate::error::{WsError, WsResult};
use crate::rpc;
use crate::state::OrderbookReconciler;
use crate::subscriptions::{Subscription, SubscriptionManager};
use crate::types::{AssetClass, CurrencyPair};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ResubKey {
    base: String,
    quote: String,
    asset: AssetClass,
}

impl ResubKey {
    fn new(pair: &str, asset: AssetClass) -> WsResult<Self> {
        let pair = CurrencyPair::parse(pair)?;
        Ok(Self {
            base: pair.base,
            quote: pair.quote,
            asset,
        })
    }
}

/// Deduplicates recovery handshakes per (base, quote, asset class).
///
/// Owned state, constructed explicitly with its collaborators injected; the
/// in-flight set has its own lock, distinct from the book lock, so marking a
/// key never contends with book mutation.
#[derive(Debug)]
pub struct ResubscribeCoordinator {
    in_flight: RwLock<HashSet<ResubKey>>,
    conn: Connection,
    reconciler: Arc<RwLock<OrderbookReconciler>>,
    subscriptions: Arc<RwLock<SubscriptionManager>>,
}

impl ResubscribeCoordinator {
    pub(crate) fn new(
        conn: Connection,
        reconciler: Arc<RwLock<OrderbookReconciler>>,
        subscriptions: Arc<RwLock<SubscriptionManager>>,
    ) -> Self {
        Self {
            in_flight: RwLock::new(HashSet::new()),
            conn,
            reconciler,
            subscriptions,
        }
    }

    /// Point-in-time check whether recovery for this key is running.
    pub async fn is_resubscribing(&self, pair: &str, asset: AssetClass) -> bool {
        match ResubKey::new(pair, asset) {
            Ok(key) => self.in_flight.read().await.contains(&key),
            Err(_) => false,
        }
    }

    /// Recover the subscription feeding (pair, asset).
    ///
    /// The stale book is invalidated synchronously before anything else, so
    /// no caller can read it mid-recovery. The handshake itself runs on its
    /// own task; the dispatch path that detected the gap returns
    /// immediately. Whatever the handshake's outcome, the in-flight marker
    /// is cleared on completion.
    pub async fn resubscribe(
        self: &Arc<Self>,
        pair: &str,
        asset: AssetClass,
        channel: &str,
    ) -> WsResult<()> {
        let key = ResubKey::new(pair, asset)?;

        if let Err(e) = self.reconciler.write().await.invalidate(pair, asset) {
            tracing::debug!(pair, %asset, "invalidate before resubscribe: {e}");
        }

        let sub = self
            .subscriptions
            .read()
            .await
            .find(channel, pair)
            .cloned()
            .ok_or_else(|| WsError::SubscriptionNotFound {
                channel: channel.to_string(),
            })?;

        {
            let mut in_flight = self.in_flight.write().await;
            if !in_flight.insert(key) {
                return Err(WsError::ResubscribeInFlight {
                    pair: pair.to_string(),
                    asset,
                });
            }
        }

        let coordinator = Arc::clone(self);
        let conn = self.conn.clone();
        let pair = pair.to_string();
        tokio::spawn(async move {
            if let Err(e) = run_handshake(&conn, &sub).await {
                tracing::warn!(pair = %pair, %asset, "resubscribe handshake failed: {e}");
            } else {
                tracing::info!(pair = %pair, %asset, channel = %sub.channel, "resubscribed");
            }
            coordinator.completed_resubscribe(&pair, asset).await;
        });

        Ok(())
    }

    /// Clear the in-flight marker for a key. Idempotent.
    pub async fn completed_resubscribe(&self, pair: &str, asset: AssetClass) {
        if let Ok(key) = ResubKey::new(pair, asset) {
            self.in_flight.write().await.remove(&key);
        }
    }
}

/// Close and reopen one subscription, waiting for the venue to confirm each
/// half.
async fn run_handshake(conn: &Connection, sub: &Subscription) -> WsResult<()> {
    let unsub_id = conn.generate_message_id();
    let request = sub.unsubscribe_request(Some(unsub_id.clone()));
    let frame = conn
        .send_one(&unsub_id, serde_json::to_string(&request)?)
        .await
        .map_err(|e| e.on_channel(&sub.channel))?;
    rpc::check_confirm(&frame).map_err(|e| e.on_channel(&sub.channel))?;

    let sub_id = conn.generate_message_id();
    let request = sub.subscribe_request(Some(sub_id.clone()));
    let frame = conn
        .send_one(&sub_id, serde_json::to_string(&request)?)
        .await
        .map_err(|e| e.on_channel(&sub.channel))?;
    rpc::check_confirm(&frame).map_err(|e| e.on_channel(&sub.channel))
}
