//! Core replay components.
//!
//! - `Candle` and `CandleFeed`: validated OHLCV history with a cursor.
//! - `Trade` and `TradeStore`: orders and positions keyed by id.
//! - `MatchingEngine`: per-candle fills and stop/target exits.
//! - `Wallet`: balance, equity and the equity curve.
//! - `Replay`: the driver tying them together.

mod candle;
mod command;
mod feed;
mod matching;
mod news;
mod replay;
mod snapshot;
mod store;
mod trade;
mod wallet;

pub use candle::*;
pub use command::Command;
pub use feed::*;
pub use matching::*;
pub use news::*;
pub use replay::*;
pub use snapshot::*;
pub use store::*;
pub use trade::{
    AnnotationPatch, Annotations, CloseReason, OrderRequest, OrderType, Side, Trade, TradeId, TradeState, price_pnl,
};
pub use wallet::*;
