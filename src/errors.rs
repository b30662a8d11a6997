use crate::engine::TradeId;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The order cannot exist as submitted (trigger on the wrong side, bad lot size, bad exit levels).
    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    /// No trade with this id is known to the store.
    #[error("Trade {0} not found")]
    NotFound(TradeId),

    /// The operation is illegal for the current lifecycle state of the trade.
    #[error("Cannot {operation} trade {id} while it is {state}")]
    InvalidState {
        /// Trade the operation targeted.
        id: TradeId,
        /// Lifecycle state the trade was in.
        state: &'static str,
        /// Name of the rejected operation.
        operation: &'static str,
    },

    /// A partial close fraction outside the accepted range.
    #[error("Close fraction must be within (0, 1] (got: {0})")]
    InvalidFraction(f64),

    /// The candle data provided is empty. Replay requires at least one candle.
    #[error("Candle data is empty: replay requires at least one candle")]
    CandleDataEmpty,

    /// A candle with impossible prices.
    #[error("Invalid candle: {0}")]
    InvalidCandle(String),

    /// Candles must be strictly ascending in time, without duplicates.
    #[error("Candle at index {index} is not strictly after its predecessor")]
    UnorderedCandles {
        /// Index of the offending candle.
        index: usize,
    },

    /// The requested candle does not exist.
    #[error("Candle not found")]
    CandleNotFound,

    /// The starting balance is not positive.
    #[error("Balance must be positive (got: {0})")]
    NegZeroBalance(f64),

    /// A configuration value is out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// An unreachable context was encountered. This is likely a bug.
    #[error("Unreachable context (internal error): {0}")]
    Unreachable(String),

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error occurred.
    #[cfg(feature = "serde")]
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl Error {
    /// Returns `true` for errors caused by a user command.
    ///
    /// These never stop a replay; anything else coming out of a step is fatal.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InvalidOrder(_) | Self::NotFound(_) | Self::InvalidState { .. } | Self::InvalidFraction(_)
        )
    }
}

#[cfg(test)]
#[test]
fn command_errors_are_recoverable() {
    assert!(Error::InvalidOrder("trigger above price".into()).is_recoverable());
    assert!(Error::NotFound(TradeId::from(7)).is_recoverable());
    assert!(Error::InvalidFraction(1.5).is_recoverable());
    assert!(!Error::Unreachable("nan trigger".into()).is_recoverable());
    assert!(!Error::CandleDataEmpty.is_recoverable());
}

#[cfg(test)]
#[test]
fn invalid_state_message() {
    let err = Error::InvalidState {
        id: TradeId::from(3),
        state: "closed",
        operation: "close",
    };
    assert_eq!(err.to_string(), "Cannot close trade #3 while it is closed");
}
