//! Order book reconciliation.
//!
//! Maintains a local copy of each subscribed book, applying snapshots and
//! deltas from push frames and tracking validity against the venue's
//! monotonically increasing update IDs. A detected gap invalidates the local
//! book only; it is never fatal to the process.

use std::collections::{BTreeMap, HashMap};

use rust_decimal::Decimal;

use crate::error::{WsError, WsResult};
use crate::types::{AssetClass, BookDelta, BookSnapshot, PriceLevel};

/// Validity of a local book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookStatus {
    /// No snapshot has been applied yet
    Uninitialized,
    /// Snapshot applied; deltas are usable
    Valid,
    /// A gap was detected; deltas are unusable until a fresh snapshot lands
    Invalid,
}

/// Outcome of a delta application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaApply {
    /// The delta advanced the book
    Applied,
    /// The delta predates the book and was discarded; not an error
    Stale,
}

/// Strict-contiguity check: a delta starting at `first` extends a book at
/// `last` only when it begins exactly one past it. Used where overlap
/// tolerance is not permitted.
pub fn can_apply(last_update_id: u64, first_update_id: u64) -> bool {
    last_update_id + 1 == first_update_id
}

/// Resolve a spot book's depth from its subscription interval. The venue
/// encodes requested depth as the update interval: 20ms carries 20 rows,
/// 100ms carries 100.
pub fn spot_depth_limit(interval: &str) -> WsResult<usize> {
    match interval {
        "20ms" => Ok(20),
        "100ms" => Ok(100),
        other => Err(WsError::InvalidUpdateInterval(other.to_string())),
    }
}

/// Fixed depth carried by derivative book channels, keyed by asset class.
pub fn depth_limit(asset: AssetClass) -> usize {
    match asset {
        AssetClass::Spot => 100,
        AssetClass::Futures => 20,
        AssetClass::Delivery => 20,
        AssetClass::Options => 50,
    }
}

/// Local order book for one (pair, asset class).
#[derive(Debug, Clone)]
pub struct LocalOrderbook {
    pair: String,
    asset: AssetClass,
    /// Bid levels (price -> amount)
    bids: BTreeMap<Decimal, Decimal>,
    /// Ask levels (price -> amount)
    asks: BTreeMap<Decimal, Decimal>,
    last_update_id: u64,
    status: BookStatus,
    depth: usize,
    last_time: i64,
}

impl LocalOrderbook {
    pub fn new(pair: String, asset: AssetClass, depth: usize) -> Self {
        Self {
            pair,
            asset,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            last_update_id: 0,
            status: BookStatus::Uninitialized,
            depth,
            last_time: 0,
        }
    }

    /// Replace the book with a full snapshot. Valid from any state; a
    /// snapshot with no levels on either side is rejected.
    pub fn load_snapshot(&mut self, snapshot: &BookSnapshot) -> WsResult<()> {
        if snapshot.bids.is_empty() && snapshot.asks.is_empty() {
            return Err(WsError::MalformedBook);
        }

        self.bids.clear();
        self.asks.clear();
        for level in &snapshot.bids {
            if !level.amount().is_zero() {
                self.bids.insert(level.price(), level.amount());
            }
        }
        for level in &snapshot.asks {
            if !level.amount().is_zero() {
                self.asks.insert(level.price(), level.amount());
            }
        }

        self.last_update_id = snapshot.last_update_id;
        self.last_time = snapshot.time;
        self.status = BookStatus::Valid;
        Ok(())
    }

    /// Apply a delta against the last applied update ID.
    ///
    /// A delta wholly behind the book is discarded silently. A delta that
    /// leaves a gap marks the book [`BookStatus::Invalid`] and fails with
    /// [`WsError::SnapshotOutdated`]; the caller must obtain a fresh
    /// snapshot before further deltas are usable. Spot deltas may overlap
    /// the applied range; derivative books require strict contiguity.
    pub fn apply_update(&mut self, delta: &BookDelta) -> WsResult<DeltaApply> {
        if self.status != BookStatus::Valid {
            return Err(self.outdated());
        }

        let next_expected = self.last_update_id + 1;
        if delta.last_update_id < next_expected {
            tracing::debug!(
                pair = %self.pair,
                last_update_id = delta.last_update_id,
                "discarding stale order book delta"
            );
            return Ok(DeltaApply::Stale);
        }

        let applicable = if self.asset == AssetClass::Spot {
            delta.first_update_id <= next_expected
        } else {
            can_apply(self.last_update_id, delta.first_update_id)
        };
        if !applicable {
            self.status = BookStatus::Invalid;
            return Err(self.outdated());
        }

        for level in &delta.bids {
            if level.amount().is_zero() {
                self.bids.remove(&level.price());
            } else {
                self.bids.insert(level.price(), level.amount());
            }
        }
        for level in &delta.asks {
            if level.amount().is_zero() {
                self.asks.remove(&level.price());
            } else {
                self.asks.insert(level.price(), level.amount());
            }
        }
        self.truncate_to_depth();

        self.last_update_id = delta.last_update_id;
        self.last_time = delta.time;
        Ok(DeltaApply::Applied)
    }

    /// Mark the book unusable until a fresh snapshot lands.
    pub fn invalidate(&mut self) {
        self.status = BookStatus::Invalid;
    }

    fn outdated(&self) -> WsError {
        WsError::SnapshotOutdated {
            pair: self.pair.clone(),
            asset: self.asset,
        }
    }

    /// The channel carries at most `depth` rows per side; rows pushed out of
    /// range by deltas are dropped from the far end.
    fn truncate_to_depth(&mut self) {
        while self.bids.len() > self.depth {
            self.bids.pop_first();
        }
        while self.asks.len() > self.depth {
            self.asks.pop_last();
        }
    }

    pub fn pair(&self) -> &str {
        &self.pair
    }

    pub fn asset(&self) -> AssetClass {
        self.asset
    }

    pub fn status(&self) -> BookStatus {
        self.status
    }

    pub fn is_valid(&self) -> bool {
        self.status == BookStatus::Valid
    }

    pub fn last_update_id(&self) -> u64 {
        self.last_update_id
    }

    /// Last venue timestamp applied to the book (unix ms).
    pub fn last_time(&self) -> i64 {
        self.last_time
    }

    /// Highest bid
    pub fn best_bid(&self) -> Option<(Decimal, Decimal)> {
        self.bids.iter().next_back().map(|(&p, &a)| (p, a))
    }

    /// Lowest ask
    pub fn best_ask(&self) -> Option<(Decimal, Decimal)> {
        self.asks.iter().next().map(|(&p, &a)| (p, a))
    }

    /// Bid levels sorted descending by price
    pub fn bids(&self) -> Vec<PriceLevel> {
        self.bids
            .iter()
            .rev()
            .map(|(&p, &a)| PriceLevel(p, a))
            .collect()
    }

    /// Ask levels sorted ascending by price
    pub fn asks(&self) -> Vec<PriceLevel> {
        self.asks.iter().map(|(&p, &a)| PriceLevel(p, a)).collect()
    }

    pub fn bid_count(&self) -> usize {
        self.bids.len()
    }

    pub fn ask_count(&self) -> usize {
        self.asks.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BookKey {
    pair: String,
    asset: AssetClass,
}

/// Owns every local book and decides apply/discard/invalidate for incoming
/// push frames. All mutations funnel through the connection's dispatch path,
/// so each book is single-writer.
#[derive(Debug, Default)]
pub struct OrderbookReconciler {
    books: HashMap<BookKey, LocalOrderbook>,
}

impl OrderbookReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the book for a new subscription, replacing any previous state.
    pub fn track(&mut self, pair: &str, asset: AssetClass, depth: usize) {
        let key = BookKey {
            pair: pair.to_string(),
            asset,
        };
        self.books
            .insert(key, LocalOrderbook::new(pair.to_string(), asset, depth));
    }

    /// Drop the book for an ended subscription.
    pub fn untrack(&mut self, pair: &str, asset: AssetClass) {
        self.books.remove(&BookKey {
            pair: pair.to_string(),
            asset,
        });
    }

    pub fn book(&self, pair: &str, asset: AssetClass) -> Option<&LocalOrderbook> {
        self.books.get(&BookKey {
            pair: pair.to_string(),
            asset,
        })
    }

    /// Apply a full snapshot, creating the book if the subscription raced
    /// ahead of `track`.
    pub fn load_snapshot(&mut self, asset: AssetClass, snapshot: &BookSnapshot) -> WsResult<()> {
        let key = BookKey {
            pair: snapshot.pair.clone(),
            asset,
        };
        let book = self.books.entry(key).or_insert_with(|| {
            LocalOrderbook::new(snapshot.pair.clone(), asset, depth_limit(asset))
        });
        book.load_snapshot(snapshot)
    }

    /// Apply a delta to the tracked book. A delta for an untracked or
    /// invalid book fails with [`WsError::SnapshotOutdated`].
    pub fn apply_update(&mut self, asset: AssetClass, delta: &BookDelta) -> WsResult<DeltaApply> {
        let key = BookKey {
            pair: delta.pair.clone(),
            asset,
        };
        match self.books.get_mut(&key) {
            Some(book) => book.apply_update(delta),
            None => Err(WsError::SnapshotOutdated {
                pair: delta.pair.clone(),
                asset,
            }),
        }
    }

    /// Mark a book unusable. Fails if the book was never tracked.
    pub fn invalidate(&mut self, pair: &str, asset: AssetClass) -> WsResult<()> {
        let key = BookKey {
            pair: pair.to_string(),
            asset,
        };
        match self.books.get_mut(&key) {
            Some(book) => {
                book.invalidate();
                Ok(())
            }
            None => Err(WsError::Precondition(format!(
                "no local book for {pair} ({asset})"
            ))),
        }
    }

    /// Drop all books. Used on reconnect: state is rebuilt from fresh venue
    /// snapshots.
    pub fn clear(&mut self) {
        self.books.clear();
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(price: &str, amount: &str) -> PriceLevel {
        PriceLevel(price.parse().unwrap(), amount.parse().unwrap())
    }

    fn snapshot(last_update_id: u64) -> BookSnapshot {
        BookSnapshot {
            time: 1700000000000,
            pair: "BTC_USDT".to_string(),
            last_update_id,
            bids: vec![level("30000", "1.5"), level("29999", "2")],
            asks: vec![level("30001", "0.5"), level("30002", "1")],
        }
    }

    fn delta(first: u64, last: u64) -> BookDelta {
        BookDelta {
            time: 1700000000100,
            pair: "BTC_USDT".to_string(),
            first_update_id: first,
            last_update_id: last,
            bids: vec![level("30000", "1.0")],
            asks: vec![level("30001", "0")],
        }
    }

    fn spot_book(last_update_id: u64) -> LocalOrderbook {
        let mut book = LocalOrderbook::new("BTC_USDT".to_string(), AssetClass::Spot, 100);
        book.load_snapshot(&snapshot(last_update_id)).unwrap();
        book
    }

    #[test]
    fn test_snapshot_replaces_state() {
        let mut book = spot_book(100);
        assert!(book.is_valid());
        assert_eq!(book.last_update_id(), 100);
        assert_eq!(book.best_bid().unwrap().0, "30000".parse().unwrap());
        assert_eq!(book.best_ask().unwrap().0, "30001".parse().unwrap());

        let mut next = snapshot(250);
        next.bids = vec![level("31000", "1")];
        next.asks = vec![level("31002", "1")];
        book.load_snapshot(&next).unwrap();
        assert_eq!(book.last_update_id(), 250);
        assert_eq!(book.bid_count(), 1);
        assert_eq!(book.ask_count(), 1);
    }

    #[test]
    fn test_empty_snapshot_rejected() {
        let mut book = LocalOrderbook::new("BTC_USDT".to_string(), AssetClass::Spot, 100);
        let empty = BookSnapshot {
            time: 0,
            pair: "BTC_USDT".to_string(),
            last_update_id: 1,
            bids: vec![],
            asks: vec![],
        };
        assert!(matches!(
            book.load_snapshot(&empty),
            Err(WsError::MalformedBook)
        ));
        assert_eq!(book.status(), BookStatus::Uninitialized);
    }

    #[test]
    fn test_stale_delta_discarded_silently() {
        let mut book = spot_book(100);
        // Entirely behind the book: no error, no state change.
        let result = book.apply_update(&delta(95, 100)).unwrap();
        assert_eq!(result, DeltaApply::Stale);
        assert_eq!(book.last_update_id(), 100);
        assert_eq!(book.best_bid().unwrap().1, "1.5".parse().unwrap());
    }

    #[test]
    fn test_gap_invalidates_book() {
        let mut book = spot_book(100);
        let err = book.apply_update(&delta(103, 110)).unwrap_err();
        assert!(matches!(err, WsError::SnapshotOutdated { .. }));
        assert_eq!(book.status(), BookStatus::Invalid);

        // Until a fresh snapshot lands, every delta fails the same way.
        let err = book.apply_update(&delta(101, 110)).unwrap_err();
        assert!(matches!(err, WsError::SnapshotOutdated { .. }));
    }

    #[test]
    fn test_contiguous_delta_applies() {
        let mut book = spot_book(100);
        let result = book.apply_update(&delta(101, 105)).unwrap();
        assert_eq!(result, DeltaApply::Applied);
        assert_eq!(book.last_update_id(), 105);
        // bid amount updated, ask level removed
        assert_eq!(book.best_bid().unwrap().1, "1.0".parse().unwrap());
        assert_eq!(book.best_ask().unwrap().0, "30002".parse().unwrap());
    }

    #[test]
    fn test_covering_delta_applies_on_spot() {
        let mut book = spot_book(100);
        // Overlaps the applied range but reaches past it.
        let result = book.apply_update(&delta(98, 104)).unwrap();
        assert_eq!(result, DeltaApply::Applied);
        assert_eq!(book.last_update_id(), 104);
    }

    #[test]
    fn test_overlap_rejected_on_futures() {
        let mut book = LocalOrderbook::new("BTC_USDT".to_string(), AssetClass::Futures, 20);
        book.load_snapshot(&snapshot(100)).unwrap();

        let err = book.apply_update(&delta(98, 104)).unwrap_err();
        assert!(matches!(err, WsError::SnapshotOutdated { .. }));
        assert_eq!(book.status(), BookStatus::Invalid);
    }

    #[test]
    fn test_strict_contiguity_applies_on_futures() {
        let mut book = LocalOrderbook::new("BTC_USDT".to_string(), AssetClass::Futures, 20);
        book.load_snapshot(&snapshot(100)).unwrap();
        assert_eq!(
            book.apply_update(&delta(101, 103)).unwrap(),
            DeltaApply::Applied
        );
        assert_eq!(book.last_update_id(), 103);
    }

    #[test]
    fn test_can_apply_exact_successor_only() {
        assert!(can_apply(100, 101));
        assert!(!can_apply(100, 100));
        assert!(!can_apply(100, 102));
        assert!(!can_apply(0, 0));
        assert!(can_apply(0, 1));
    }

    #[test]
    fn test_depth_resolution() {
        assert_eq!(spot_depth_limit("20ms").unwrap(), 20);
        assert_eq!(spot_depth_limit("100ms").unwrap(), 100);
        assert!(matches!(
            spot_depth_limit("50ms"),
            Err(WsError::InvalidUpdateInterval(ref i)) if i == "50ms"
        ));
        assert_eq!(depth_limit(AssetClass::Futures), 20);
        assert_eq!(depth_limit(AssetClass::Options), 50);
    }

    #[test]
    fn test_depth_truncation() {
        let mut book = LocalOrderbook::new("BTC_USDT".to_string(), AssetClass::Spot, 2);
        book.load_snapshot(&snapshot(100)).unwrap();

        let grow = BookDelta {
            time: 0,
            pair: "BTC_USDT".to_string(),
            first_update_id: 101,
            last_update_id: 101,
            bids: vec![level("29998", "1"), level("29997", "1")],
            asks: vec![],
        };
        book.apply_update(&grow).unwrap();
        assert_eq!(book.bid_count(), 2);
        // The best rows survive truncation.
        assert_eq!(book.best_bid().unwrap().0, "30000".parse().unwrap());
    }

    #[test]
    fn test_reconciler_routes_by_pair_and_asset() {
        let mut reconciler = OrderbookReconciler::new();
        reconciler.track("BTC_USDT", AssetClass::Spot, 100);
        reconciler.load_snapshot(AssetClass::Spot, &snapshot(100)).unwrap();

        assert!(reconciler.book("BTC_USDT", AssetClass::Spot).is_some());
        assert!(reconciler.book("BTC_USDT", AssetClass::Futures).is_none());

        reconciler.invalidate("BTC_USDT", AssetClass::Spot).unwrap();
        assert!(!reconciler
            .book("BTC_USDT", AssetClass::Spot)
            .unwrap()
            .is_valid());
        assert!(reconciler.invalidate("ETH_USDT", AssetClass::Spot).is_err());
    }

    #[test]
    fn test_delta_for_untracked_book_requires_snapshot() {
        let mut reconciler = OrderbookReconciler::new();
        let err = reconciler
            .apply_update(AssetClass::Spot, &delta(1, 2))
            .unwrap_err();
        assert!(matches!(err, WsError::SnapshotOutdated { .. }));
    }
}
