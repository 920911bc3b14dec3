//! Subscription tracking.
//!
//! Remembers every active subscription so it can be replayed after a
//! reconnect, and so the resubscription coordinator can look up the exact
//! arguments to replay when a single book needs recovery.

use crate::types::WsRequest;

/// One active subscription: a channel plus the payload it was opened with.
/// The first payload argument identifies the market (currency pair or
/// contract name).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub channel: String,
    pub payload: Vec<String>,
}

impl Subscription {
    pub fn new(channel: impl Into<String>, payload: Vec<String>) -> Self {
        Self {
            channel: channel.into(),
            payload,
        }
    }

    /// The market this subscription is scoped to, if any.
    pub fn market(&self) -> Option<&str> {
        self.payload.first().map(String::as_str)
    }

    /// Build the subscribe request that (re)opens this subscription.
    pub fn subscribe_request(&self, id: Option<String>) -> WsRequest<Vec<String>> {
        WsRequest::subscribe(&self.channel, self.payload.clone(), id)
    }

    /// Build the unsubscribe request that closes this subscription.
    pub fn unsubscribe_request(&self, id: Option<String>) -> WsRequest<Vec<String>> {
        WsRequest::unsubscribe(&self.channel, self.payload.clone(), id)
    }
}

/// Registry of active subscriptions.
#[derive(Debug, Default)]
pub struct SubscriptionManager {
    subs: Vec<Subscription>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a subscription, replacing a previous one for the same channel
    /// and market.
    pub fn upsert(&mut self, sub: Subscription) {
        match self
            .subs
            .iter_mut()
            .find(|s| s.channel == sub.channel && s.market() == sub.market())
        {
            Some(existing) => *existing = sub,
            None => self.subs.push(sub),
        }
    }

    /// Remove the subscription for a channel and market.
    pub fn remove(&mut self, channel: &str, market: &str) {
        self.subs
            .retain(|s| !(s.channel == channel && s.market() == Some(market)));
    }

    /// Look up the active subscription by channel identity, narrowed to the
    /// market being recovered.
    pub fn find(&self, channel: &str, market: &str) -> Option<&Subscription> {
        self.subs
            .iter()
            .find(|s| s.channel == channel && s.market() == Some(market))
    }

    /// All subscriptions, for replay after reconnect.
    pub fn all(&self) -> Vec<Subscription> {
        self.subs.clone()
    }

    pub fn clear(&mut self) {
        self.subs.clear();
    }

    pub fn len(&self) -> usize {
        self.subs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book_sub(pair: &str, interval: &str) -> Subscription {
        Subscription::new(
            "spot.order_book_update",
            vec![pair.to_string(), interval.to_string()],
        )
    }

    #[test]
    fn test_upsert_replaces_same_market() {
        let mut manager = SubscriptionManager::new();
        manager.upsert(book_sub("BTC_USDT", "100ms"));
        manager.upsert(book_sub("BTC_USDT", "20ms"));
        manager.upsert(book_sub("ETH_USDT", "100ms"));

        assert_eq!(manager.len(), 2);
        let sub = manager.find("spot.order_book_update", "BTC_USDT").unwrap();
        assert_eq!(sub.payload[1], "20ms");
    }

    #[test]
    fn test_find_requires_channel_and_market() {
        let mut manager = SubscriptionManager::new();
        manager.upsert(book_sub("BTC_USDT", "100ms"));

        assert!(manager.find("spot.order_book_update", "BTC_USDT").is_some());
        assert!(manager.find("spot.order_book_update", "ETH_USDT").is_none());
        assert!(manager.find("spot.trades", "BTC_USDT").is_none());
    }

    #[test]
    fn test_remove() {
        let mut manager = SubscriptionManager::new();
        manager.upsert(book_sub("BTC_USDT", "100ms"));
        manager.upsert(book_sub("ETH_USDT", "100ms"));

        manager.remove("spot.order_book_update", "BTC_USDT");
        assert!(manager.find("spot.order_book_update", "BTC_USDT").is_none());
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_replay_requests() {
        let sub = book_sub("BTC_USDT", "100ms");
        let request = sub.subscribe_request(None);
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains(r#""event":"subscribe""#));
        assert!(json.contains("BTC_USDT"));

        let request = sub.unsubscribe_request(Some("9".to_string()));
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains(r#""event":"unsubscribe""#));
        assert!(json.contains(r#""id":"9""#));
    }
}
