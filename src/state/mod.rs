//! Local state maintained from venue push data.

pub mod orderbook;

pub use orderbook::{
    can_apply, depth_limit, spot_depth_limit, BookStatus, DeltaApply, LocalOrderbook,
    OrderbookReconciler,
};
