//! Replay configuration.
//!
//! Every knob that changes fills or P&L lives here so that two replays built
//! from the same config, candles and commands are bit-for-bit identical.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::PercentCalculus;
use crate::errors::{Error, Result};

/// Which exit wins when stop-loss and take-profit are both inside one candle.
///
/// OHLC data cannot tell which level traded first, so this is a policy.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExitPriority {
    /// Worst case: the stop is assumed to trade first.
    #[default]
    StopLossFirst,
    /// Favorable: the target is assumed to trade first.
    TakeProfitFirst,
}

/// Commission charged when a position is opened.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum CommissionModel {
    #[default]
    None,
    /// Fixed amount per lot.
    PerLot(f64),
    /// Percentage of the entry notional (e.g. 0.1 for 0.1%).
    Percent(f64),
}

impl CommissionModel {
    /// Commission for `lot_size` lots filled at `price`.
    pub fn charge(&self, price: f64, lot_size: f64, contract_multiplier: f64) -> f64 {
        match *self {
            Self::None => 0.0,
            Self::PerLot(amount) => amount * lot_size,
            Self::Percent(percent) => (price * lot_size * contract_multiplier).how_many(percent),
        }
    }
}

/// Parameters of a replay.
///
/// ```rust
/// use bts_replay::prelude::*;
///
/// let config = ReplayConfig::default()
///     .starting_balance(10_000.0)
///     .contract_multiplier(100_000.0)
///     .commission(CommissionModel::PerLot(7.0))
///     .exit_priority(ExitPriority::StopLossFirst);
/// assert!(config.validate().is_ok());
/// ```
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayConfig {
    pub starting_balance: f64,
    pub contract_multiplier: f64,
    pub commission: CommissionModel,
    pub exit_priority: ExitPriority,
    pub partial_close_fraction: f64,
    pub lot_epsilon: f64,
    pub same_candle_exits: bool,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            starting_balance: 10_000.0,
            contract_multiplier: 1.0,
            commission: CommissionModel::None,
            exit_priority: ExitPriority::StopLossFirst,
            partial_close_fraction: 0.5,
            lot_epsilon: 1e-9,
            same_candle_exits: true,
        }
    }
}

impl ReplayConfig {
    pub fn starting_balance(mut self, balance: f64) -> Self {
        self.starting_balance = balance;
        self
    }

    /// Value of a one-point move for one lot (e.g. 100 000 for a standard FX lot).
    pub fn contract_multiplier(mut self, multiplier: f64) -> Self {
        self.contract_multiplier = multiplier;
        self
    }

    pub fn commission(mut self, commission: CommissionModel) -> Self {
        self.commission = commission;
        self
    }

    pub fn exit_priority(mut self, priority: ExitPriority) -> Self {
        self.exit_priority = priority;
        self
    }

    /// Fraction closed by a one-click partial close.
    pub fn partial_close_fraction(mut self, fraction: f64) -> Self {
        self.partial_close_fraction = fraction;
        self
    }

    pub fn lot_epsilon(mut self, epsilon: f64) -> Self {
        self.lot_epsilon = epsilon;
        self
    }

    /// Whether a position can hit its exits on the candle that filled it.
    ///
    /// A fill at the open sees the whole candle. After a limit or stop fill inside
    /// the candle, the high or low may have printed before the fill, so only the
    /// stop-loss is checked there under [`ExitPriority::StopLossFirst`].
    /// [`ExitPriority::TakeProfitFirst`] checks both levels and is optimistic.
    pub fn same_candle_exits(mut self, enabled: bool) -> Self {
        self.same_candle_exits = enabled;
        self
    }

    /// Checks every value is usable.
    pub fn validate(&self) -> Result<()> {
        if !self.starting_balance.is_finite() || self.starting_balance <= 0.0 {
            return Err(Error::NegZeroBalance(self.starting_balance));
        }
        if !self.contract_multiplier.is_finite() || self.contract_multiplier <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "contract multiplier must be positive (got: {})",
                self.contract_multiplier
            )));
        }
        match self.commission {
            CommissionModel::PerLot(value) | CommissionModel::Percent(value) if !value.is_finite() || value < 0.0 => {
                return Err(Error::InvalidConfig(format!("commission must not be negative (got: {value})")));
            }
            _ => {}
        }
        if !(self.partial_close_fraction > 0.0 && self.partial_close_fraction < 1.0) {
            return Err(Error::InvalidFraction(self.partial_close_fraction));
        }
        if !self.lot_epsilon.is_finite() || self.lot_epsilon < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "lot epsilon must not be negative (got: {})",
                self.lot_epsilon
            )));
        }
        Ok(())
    }

    /// Reads and validates a JSON config file. Missing keys take their defaults.
    #[cfg(feature = "serde")]
    pub fn from_json_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        use std::{fs::File, io::BufReader};

        let reader = BufReader::new(File::open(path)?);
        let config: Self = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        let config = ReplayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.exit_priority, ExitPriority::StopLossFirst);
        assert_eq!(config.partial_close_fraction, 0.5);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            ReplayConfig::default().starting_balance(0.0).validate(),
            Err(Error::NegZeroBalance(_))
        ));
        assert!(matches!(
            ReplayConfig::default().contract_multiplier(-1.0).validate(),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            ReplayConfig::default().commission(CommissionModel::PerLot(-3.0)).validate(),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            ReplayConfig::default().partial_close_fraction(1.0).validate(),
            Err(Error::InvalidFraction(_))
        ));
    }

    #[test]
    fn commission_models() {
        assert_eq!(CommissionModel::None.charge(1.1, 2.0, 100_000.0), 0.0);
        assert_eq!(CommissionModel::PerLot(7.0).charge(1.1, 2.0, 100_000.0), 14.0);
        assert_eq!(CommissionModel::Percent(0.1).charge(100.0, 2.0, 1.0), 0.2);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn load_from_json_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "starting_balance": 2500.0, "commission": {{ "PerLot": 3.5 }}, "exit_priority": "TakeProfitFirst" }}"#
        )
        .unwrap();

        let config = ReplayConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.starting_balance, 2500.0);
        assert_eq!(config.commission, CommissionModel::PerLot(3.5));
        assert_eq!(config.exit_priority, ExitPriority::TakeProfitFirst);
        assert_eq!(config.contract_multiplier, 1.0);
    }
}
