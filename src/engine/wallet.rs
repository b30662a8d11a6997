use chrono::{DateTime, Utc};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::engine::Trade;
use crate::errors::{Error, Result};

/// Account figures shown next to the replay chart.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccountStats {
    pub starting_balance: f64,
    /// Changes only when a position closes.
    pub balance: f64,
    /// `balance + floating_pnl`, marked at the last candle close.
    pub equity: f64,
    pub floating_pnl: f64,
    /// Sum of realized P&L, net of commission.
    pub realized_pnl: f64,
    pub commission_paid: f64,
    pub open_positions: usize,
    pub pending_orders: usize,
}

/// Balance and equity at the close of one candle.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EquityPoint {
    pub time: DateTime<Utc>,
    pub balance: f64,
    pub equity: f64,
}

/// Account ledger of a replay.
///
/// The balance moves only through [`Wallet::realize`]; floating P&L is derived
/// from the open positions at every candle and never accumulated.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone)]
pub struct Wallet {
    // Starting balance used for reset
    initial_balance: f64,
    // Realized balance
    balance: f64,
    // Floating P&L of open positions at the last mark
    floating_pnl: f64,
    // Cumulative realized P&L, net of commission
    realized_pnl: f64,
    // Cumulative commission debited
    commission_paid: f64,
    equity_curve: Vec<EquityPoint>,
}

impl Wallet {
    /// Creates a new wallet with the given starting balance.
    /// Non-positive balances are rejected.
    pub fn new(balance: f64) -> Result<Self> {
        if balance <= 0.0 || !balance.is_finite() {
            return Err(Error::NegZeroBalance(balance));
        }

        Ok(Self {
            balance,
            floating_pnl: 0.0,
            realized_pnl: 0.0,
            commission_paid: 0.0,
            initial_balance: balance,
            equity_curve: Vec::new(),
        })
    }

    pub fn initial_balance(&self) -> f64 {
        self.initial_balance
    }

    /// Returns the realized balance.
    pub fn balance(&self) -> f64 {
        self.balance
    }

    /// Returns the balance plus the floating P&L of the last mark.
    pub fn equity(&self) -> f64 {
        self.balance + self.floating_pnl
    }

    pub fn floating_pnl(&self) -> f64 {
        self.floating_pnl
    }

    pub fn realized_pnl(&self) -> f64 {
        self.realized_pnl
    }

    pub fn commission_paid(&self) -> f64 {
        self.commission_paid
    }

    /// One point per processed candle.
    pub fn equity_curve(&self) -> &[EquityPoint] {
        &self.equity_curve
    }

    /// Books a closed position: `balance += gross_pnl - commission`.
    pub(crate) fn realize(&mut self, gross_pnl: f64, commission: f64) {
        let net = gross_pnl - commission;
        self.balance += net;
        self.realized_pnl += net;
        self.commission_paid += commission;
    }

    /// `balance + Σ floating P&L` of `positions` marked at `price`.
    pub fn compute_equity<'a, I>(&self, positions: I, price: f64, contract_multiplier: f64) -> f64
    where
        I: IntoIterator<Item = &'a Trade>,
    {
        self.balance + floating_pnl(positions, price, contract_multiplier)
    }

    /// Re-marks open positions at a candle close and appends to the equity curve.
    pub(crate) fn mark<'a, I>(&mut self, positions: I, time: DateTime<Utc>, price: f64, contract_multiplier: f64)
    where
        I: IntoIterator<Item = &'a Trade>,
    {
        self.floating_pnl = floating_pnl(positions, price, contract_multiplier);
        self.equity_curve.push(EquityPoint {
            time,
            balance: self.balance,
            equity: self.equity(),
        });
    }

    /// Resets the wallet to its starting balance.
    pub(crate) fn reset(&mut self) {
        self.floating_pnl = 0.0;
        self.realized_pnl = 0.0;
        self.commission_paid = 0.0;
        self.balance = self.initial_balance;
        self.equity_curve.clear();
    }
}

fn floating_pnl<'a, I>(positions: I, price: f64, contract_multiplier: f64) -> f64
where
    I: IntoIterator<Item = &'a Trade>,
{
    positions
        .into_iter()
        .filter_map(|p| p.floating_pnl(price, contract_multiplier))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::*;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_515_151_515, 0).unwrap()
    }

    #[test]
    fn new_wallet_valid_balance() {
        let wallet = Wallet::new(100.0).unwrap();
        assert_eq!(wallet.balance(), 100.0);
        assert_eq!(wallet.equity(), 100.0);
        assert!(wallet.equity_curve().is_empty());
    }

    #[test]
    fn new_wallet_invalid_balance() {
        assert!(matches!(Wallet::new(0.0), Err(Error::NegZeroBalance(_))));
        assert!(matches!(Wallet::new(-10.0), Err(Error::NegZeroBalance(_))));
        assert!(matches!(Wallet::new(f64::INFINITY), Err(Error::NegZeroBalance(_))));
    }

    #[test]
    fn realize_profit_and_loss() {
        let mut wallet = Wallet::new(1000.0).unwrap();
        wallet.realize(40.0, 7.0);
        assert_eq!(wallet.balance(), 1033.0);
        wallet.realize(-20.0, 7.0);
        assert_eq!(wallet.balance(), 1006.0);
        assert_eq!(wallet.realized_pnl(), 6.0);
        assert_eq!(wallet.commission_paid(), 14.0);
    }

    #[test]
    fn equity_marks_open_positions_only() {
        let mut store = TradeStore::new(10.0, 1e-9);
        let long = store.submit_pending((Side::Long, OrderType::Market, 1.0).into(), 100.0, now()).unwrap();
        let short = store.submit_pending((Side::Short, OrderType::Market, 2.0).into(), 100.0, now()).unwrap();
        store.submit_pending((Side::Long, OrderType::Limit(90.0), 1.0).into(), 100.0, now()).unwrap();
        store.open(long, 100.0, now(), 0.0).unwrap();
        store.open(short, 104.0, now(), 0.0).unwrap();

        let mut wallet = Wallet::new(1000.0).unwrap();
        // long: +2 * 10, short: 2 lots * +2 * 10
        let equity = wallet.compute_equity(store.list(TradeFilter::All), 102.0, 10.0);
        assert_eq!(equity, 1060.0);

        wallet.mark(store.list(TradeFilter::Open), now(), 102.0, 10.0);
        assert_eq!(wallet.floating_pnl(), 60.0);
        assert_eq!(wallet.balance(), 1000.0);
        assert_eq!(wallet.equity_curve().len(), 1);
        assert_eq!(wallet.equity_curve()[0].equity, 1060.0);
    }

    #[test]
    fn equity_equals_balance_without_positions() {
        let mut wallet = Wallet::new(500.0).unwrap();
        wallet.realize(12.5, 0.5);
        wallet.mark(std::iter::empty(), now(), 1.0, 1.0);
        assert_eq!(wallet.equity(), wallet.balance());
    }

    #[test]
    fn reset_wallet() {
        let mut wallet = Wallet::new(100.0).unwrap();
        wallet.realize(10.0, 0.2);
        wallet.mark(std::iter::empty(), now(), 1.0, 1.0);
        wallet.reset();
        assert_eq!(wallet.balance(), 100.0);
        assert_eq!(wallet.equity(), 100.0);
        assert_eq!(wallet.commission_paid(), 0.0);
        assert!(wallet.equity_curve().is_empty());
    }
}
