//! # BTS Replay: bar-by-bar market replay for manual trading practice
//!
//! **BTS Replay** steps through historical candlestick (OHLCV) data one candle at a time,
//! matches simulated orders and positions against each candle, and keeps a realized and
//! floating P&L ledger. It is the engine behind a chart replay: the user places orders,
//! moves stops and journals trades while the market advances at the user's pace.
//!
//! ## Core Components
//! | Component         | Description                                                                         |
//! |-------------------|-------------------------------------------------------------------------------------|
//! | **`CandleFeed`**  | Validated, time-ordered OHLCV history with a cursor.                                 |
//! | **`TradeStore`**  | Every order and position as one `Trade` with a tagged `Pending/Open/Closed` state.  |
//! | **`MatchingEngine`** | Fills pending orders and triggers stop-loss and take-profit inside each candle. |
//! | **`Wallet`**      | Balance, equity, commission and the equity curve.                                   |
//! | **`Replay`**      | The driver: steps, queues commands, rewinds and publishes snapshots.                |
//! | **`Metrics`**     | Win rate, profit factor, drawdown and more (feature `metrics`).                     |
//! | **`Optimizer`**   | Parallel sweeps over parameters (feature `optimizer`).                              |
//!
//! ## Matching rules
//! | Situation                                   | Fill                                            |
//! |---------------------------------------------|-------------------------------------------------|
//! | Market order                                | Open of the next candle                         |
//! | Limit/stop trigger inside `[low, high]`     | Exactly the trigger                             |
//! | Candle opens beyond the trigger             | The open (gap fill)                             |
//! | Stop-loss and take-profit in one candle     | `ExitPriority`, stop-loss first by default      |
//!
//! ## Getting Started
//! ```rust
//! use bts_replay::prelude::*;
//! use chrono::Duration;
//!
//! let candles = random_walk(7, 100, 1.1000, Duration::minutes(15)).unwrap();
//! let config = ReplayConfig::default()
//!     .contract_multiplier(100_000.0)
//!     .commission(CommissionModel::PerLot(7.0));
//! let mut replay = Replay::new(candles, config).unwrap();
//!
//! replay
//!     .run(|replay, report| {
//!         if report.index == 10 {
//!             let price = report.candle.close();
//!             let order = (Side::Long, OrderType::Market, 0.1, Some(price - 0.0020), Some(price + 0.0040));
//!             replay.submit_order(order.into())?;
//!         }
//!         Ok(())
//!     })
//!     .unwrap();
//!
//! let stats = replay.account_stats();
//! println!("balance {:.2}, equity {:.2}", stats.balance, stats.equity);
//!
//! #[cfg(feature = "metrics")]
//! println!("{}", Metrics::from(&replay));
//! ```
//!
//! ## Error Handling
//! Commands that do not make sense (wrong state, unknown id, bad levels) return an
//! error and leave the replay untouched; the replay keeps going. Only internal
//! inconsistencies stop a step.
//!
//! ## Logging
//! The crate emits [`tracing`](https://crates.io/crates/tracing) events and never
//! installs a subscriber.
//!
//! ## License
//! MIT

/// Replay engine: candles, trades, matching, wallet and the driver.
pub mod engine;

/// Error types for the library.
pub mod errors;

/// Replay configuration.
pub mod config;

/// Utility functions and helpers.
pub mod utils;

/// Performance metrics: drawdown, profit factor, win rate, etc.
#[cfg(feature = "metrics")]
pub mod metrics;

/// Parallel parameter sweeps.
#[cfg(feature = "optimizer")]
pub mod optimizer;

/// Re-exports of commonly used types and traits for convenience.
pub mod prelude {
    pub use super::PercentCalculus;
    pub use crate::config::*;
    pub use crate::engine::*;
    pub use crate::errors::*;
    pub use crate::utils::*;

    #[cfg(feature = "metrics")]
    pub use crate::metrics::*;

    #[cfg(feature = "optimizer")]
    pub use crate::optimizer::*;
}

use std::ops::{Add, Div, Mul, Sub};

/// Trait for performing percentage-based calculations.
///
/// This trait provides methods to add, subtract, and calculate percentages
/// for numeric types, enabling common financial calculations.
pub trait PercentCalculus<Rhs = Self> {
    /// Adds a percentage to the value.
    ///
    /// ### Arguments
    /// * `rhs` - The percentage to add (e.g., 10.0 for 10%).
    ///
    /// ### Returns
    /// The value increased by the given percentage.
    fn addpercent(self, rhs: Rhs) -> Self;

    /// Subtracts a percentage from the value.
    ///
    /// ### Arguments
    /// * `rhs` - The percentage to subtract (e.g., 10.0 for 10%).
    ///
    /// ### Returns
    /// The value decreased by the given percentage.
    fn subpercent(self, rhs: Rhs) -> Self;

    /// Calculates the absolute value of a percentage.
    ///
    /// ### Arguments
    /// * `percent` - The percentage to calculate (e.g., 10.0 for 10%).
    ///
    /// ### Returns
    /// The absolute value of the given percentage.
    fn how_many(self, percent: Self) -> Self;

    /// Calculates the percentage change between two values.
    ///
    /// ### Arguments
    /// * `new` - The new value to compare with.
    ///
    /// ### Returns
    /// The percentage change from the original value to the new value.
    fn change(self, new: Self) -> Self;
}

impl PercentCalculus for f64 {
    fn addpercent(self, percent: Self) -> Self {
        self.add(self.mul(percent.div(100.0)))
    }

    fn subpercent(self, percent: Self) -> Self {
        self.sub(self.mul(percent.div(100.0)))
    }

    fn how_many(self, percent: Self) -> Self {
        percent.mul(self.div(100.0))
    }

    fn change(self, new: Self) -> Self {
        new.sub(self).div(self).mul(100.0)
    }
}

#[cfg(test)]
mod percent {
    use super::*;

    #[test]
    fn add() {
        assert_eq!(110.0, 100.0.addpercent(10.0))
    }

    #[test]
    fn sub() {
        assert_eq!(90.0, 100.0.subpercent(10.0))
    }

    #[test]
    fn how_many() {
        assert_eq!(10.0, 100.0.how_many(10.0))
    }

    #[test]
    fn change() {
        assert_eq!(10.0, 100.0.change(110.0))
    }
}
