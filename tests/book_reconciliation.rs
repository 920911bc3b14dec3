//! End-to-end properties of the order book reconciliation pipeline.

use coreline_ws::prelude::*;
use rand::Rng;

fn level(price: &str, amount: &str) -> PriceLevel {
    PriceLevel(price.parse().unwrap(), amount.parse().unwrap())
}

fn snapshot(pair: &str, last_update_id: u64) -> BookSnapshot {
    BookSnapshot {
        time: 1700000000000,
        pair: pair.to_string(),
        last_update_id,
        bids: vec![level("30000", "1"), level("29990", "3")],
        asks: vec![level("30010", "2"), level("30020", "4")],
    }
}

fn delta(pair: &str, first: u64, last: u64) -> BookDelta {
    BookDelta {
        time: 1700000000500,
        pair: pair.to_string(),
        first_update_id: first,
        last_update_id: last,
        bids: vec![level("30000", "0"), level("29995", "1")],
        asks: vec![level("30010", "1")],
    }
}

fn valid_spot_book(last_update_id: u64) -> OrderbookReconciler {
    let mut reconciler = OrderbookReconciler::new();
    reconciler.track("BTC_USDT", AssetClass::Spot, 100);
    reconciler
        .load_snapshot(AssetClass::Spot, &snapshot("BTC_USDT", last_update_id))
        .unwrap();
    reconciler
}

// For any snapshot at L: a delta with u < L+1 is a no-op, a delta with
// U > L+1 invalidates, and a delta with U <= L+1 <= u applies and advances
// the book to u.
#[test]
fn delta_classification_against_snapshot() {
    let l = 1000u64;

    // u < L+1: no-op
    let mut reconciler = valid_spot_book(l);
    let outcome = reconciler
        .apply_update(AssetClass::Spot, &delta("BTC_USDT", 900, 1000))
        .unwrap();
    assert_eq!(outcome, DeltaApply::Stale);
    let book = reconciler.book("BTC_USDT", AssetClass::Spot).unwrap();
    assert_eq!(book.last_update_id(), l);
    assert!(book.is_valid());

    // U > L+1: gap, book invalid
    let mut reconciler = valid_spot_book(l);
    let err = reconciler
        .apply_update(AssetClass::Spot, &delta("BTC_USDT", 1002, 1010))
        .unwrap_err();
    assert!(matches!(err, WsError::SnapshotOutdated { .. }));
    assert!(!reconciler.book("BTC_USDT", AssetClass::Spot).unwrap().is_valid());

    // U <= L+1 <= u: applied, last_update_id advances to u
    for (first, last) in [(1001, 1001), (998, 1001), (1001, 1200), (990, 1005)] {
        let mut reconciler = valid_spot_book(l);
        let outcome = reconciler
            .apply_update(AssetClass::Spot, &delta("BTC_USDT", first, last))
            .unwrap();
        assert_eq!(outcome, DeltaApply::Applied, "U={first} u={last}");
        assert_eq!(
            reconciler
                .book("BTC_USDT", AssetClass::Spot)
                .unwrap()
                .last_update_id(),
            last
        );
    }
}

#[test]
fn can_apply_matches_exact_successor_for_random_pairs() {
    let mut rng = rand::thread_rng();
    for _ in 0..10_000 {
        let last: u64 = rng.gen_range(0..u64::MAX / 2);
        let first: u64 = rng.gen_range(0..u64::MAX / 2);
        assert_eq!(
            can_apply(last, first),
            first == last + 1,
            "last={last} first={first}"
        );
        assert!(can_apply(last, last + 1));
    }
}

#[test]
fn gap_requires_fresh_snapshot_before_further_deltas() {
    let mut reconciler = valid_spot_book(100);

    let err = reconciler
        .apply_update(AssetClass::Spot, &delta("BTC_USDT", 105, 110))
        .unwrap_err();
    assert!(matches!(err, WsError::SnapshotOutdated { .. }));

    // A perfectly contiguous delta is still rejected while the book is
    // invalid.
    let err = reconciler
        .apply_update(AssetClass::Spot, &delta("BTC_USDT", 101, 102))
        .unwrap_err();
    assert!(matches!(err, WsError::SnapshotOutdated { .. }));

    // A fresh snapshot restores the book.
    reconciler
        .load_snapshot(AssetClass::Spot, &snapshot("BTC_USDT", 200))
        .unwrap();
    let outcome = reconciler
        .apply_update(AssetClass::Spot, &delta("BTC_USDT", 201, 205))
        .unwrap();
    assert_eq!(outcome, DeltaApply::Applied);
}

#[test]
fn empty_snapshot_is_malformed() {
    let mut reconciler = OrderbookReconciler::new();
    let empty = BookSnapshot {
        time: 0,
        pair: "BTC_USDT".to_string(),
        last_update_id: 5,
        bids: vec![],
        asks: vec![],
    };
    assert!(matches!(
        reconciler.load_snapshot(AssetClass::Spot, &empty),
        Err(WsError::MalformedBook)
    ));
}

#[test]
fn derivative_books_require_strict_contiguity() {
    let mut reconciler = OrderbookReconciler::new();
    reconciler.track("BTC_USDT", AssetClass::Futures, 20);
    reconciler
        .load_snapshot(AssetClass::Futures, &snapshot("BTC_USDT", 100))
        .unwrap();

    // Overlap is tolerated on spot but not here.
    let err = reconciler
        .apply_update(AssetClass::Futures, &delta("BTC_USDT", 99, 103))
        .unwrap_err();
    assert!(matches!(err, WsError::SnapshotOutdated { .. }));
}

#[test]
fn depth_resolution_table() {
    assert_eq!(spot_depth_limit("20ms").unwrap(), 20);
    assert_eq!(spot_depth_limit("100ms").unwrap(), 100);
    assert!(matches!(
        spot_depth_limit("50ms"),
        Err(WsError::InvalidUpdateInterval(_))
    ));
    assert!(matches!(
        spot_depth_limit(""),
        Err(WsError::InvalidUpdateInterval(_))
    ));

    assert_eq!(depth_limit(AssetClass::Futures), 20);
    assert_eq!(depth_limit(AssetClass::Delivery), 20);
    assert_eq!(depth_limit(AssetClass::Options), 50);
}

#[test]
fn book_levels_stay_sorted() {
    let reconciler = valid_spot_book(100);
    let book = reconciler.book("BTC_USDT", AssetClass::Spot).unwrap();

    let bids = book.bids();
    assert!(bids.windows(2).all(|w| w[0].price() > w[1].price()));
    let asks = book.asks();
    assert!(asks.windows(2).all(|w| w[0].price() < w[1].price()));
    assert_eq!(book.best_bid().unwrap().0, "30000".parse().unwrap());
    assert_eq!(book.best_ask().unwrap().0, "30010".parse().unwrap());
}
