//! Performance metrics of a replay.
//!
//! The driver records an [`Event`] for every lifecycle transition and every
//! processed candle. [`Metrics`] turns that journal into the figures of the
//! stats panel:
//! - Net P&L and commission
//! - Win rate and profit factor
//! - Average win and loss
//! - Max drawdown of the equity curve

use std::fmt;

use chrono::{DateTime, Utc};

use crate::engine::*;

/// Events recorded during a replay.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A submitted order reached the book, as a pending trade.
    OrderPlaced(DateTime<Utc>, Trade),

    /// A pending order was cancelled.
    OrderCancelled(DateTime<Utc>, TradeId),

    /// A pending order filled at the given price.
    PositionOpened(DateTime<Utc>, TradeId, f64),

    /// A position, or part of one, was closed. Carries the closed record.
    PositionClosed(DateTime<Utc>, Trade),

    /// Balance and equity at a candle close.
    Equity(EquityPoint),
}

/// Summary statistics computed from a list of [`Event`]s.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone)]
pub struct Metrics {
    initial_balance: f64,
    balance: f64,
    commission: f64,
    events: Vec<Event>,
}

impl From<&Replay> for Metrics {
    fn from(value: &Replay) -> Self {
        Self {
            initial_balance: value.initial_balance(),
            balance: value.balance(),
            commission: value.commission_paid(),
            events: value.events().cloned().collect(),
        }
    }
}

impl Metrics {
    /// Creates metrics from an event list, the starting and final balance and the commission paid.
    pub fn new(events: Vec<Event>, initial_balance: f64, balance: f64, commission: f64) -> Self {
        Self {
            events,
            balance,
            commission,
            initial_balance,
        }
    }

    pub fn initial_balance(&self) -> f64 {
        self.initial_balance
    }

    pub fn balance(&self) -> f64 {
        self.balance
    }

    pub fn commission(&self) -> f64 {
        self.commission
    }

    pub fn events(&self) -> std::slice::Iter<'_, Event> {
        self.events.iter()
    }

    /// Realized P&L of the replay, net of commission.
    pub fn net_pnl(&self) -> f64 {
        self.balance - self.initial_balance
    }

    fn closed_pnls(&self) -> impl Iterator<Item = f64> + '_ {
        self.events.iter().filter_map(|event| match event {
            Event::PositionClosed(_, record) => record.realized_pnl(),
            _ => None,
        })
    }

    /// Number of closed records, partial closes included.
    pub fn trades(&self) -> usize {
        self.closed_pnls().count()
    }

    /// Computes the maximum drawdown of the equity curve, as a percentage.
    pub fn max_drawdown(&self) -> f64 {
        let mut max_peak = self.initial_balance;
        let mut max_drawdown = 0.0;

        for event in &self.events {
            if let Event::Equity(EquityPoint { equity, .. }) = event {
                if *equity > max_peak {
                    max_peak = *equity;
                }
                let drawdown = (max_peak - equity) / max_peak;
                if drawdown > max_drawdown {
                    max_drawdown = drawdown;
                }
            }
        }

        max_drawdown * 100.0
    }

    /// Gross wins over gross losses; infinite without losses.
    pub fn profit_factor(&self) -> f64 {
        let mut total_gains = 0.0;
        let mut total_losses = 0.0;

        for pnl in self.closed_pnls() {
            if pnl > 0.0 {
                total_gains += pnl;
            } else {
                total_losses += pnl.abs();
            }
        }

        if total_losses == 0.0 {
            return f64::INFINITY;
        }

        total_gains / total_losses
    }

    /// Percentage of closed records with a positive net P&L.
    pub fn win_rate(&self) -> f64 {
        let mut winning_trades = 0;
        let mut total_trades = 0;

        for pnl in self.closed_pnls() {
            total_trades += 1;
            if pnl > 0.0 {
                winning_trades += 1;
            }
        }

        if total_trades == 0 {
            return 0.0;
        }

        (winning_trades as f64 / total_trades as f64) * 100.0
    }

    /// Mean net P&L of winning records, 0 without any.
    pub fn average_win(&self) -> f64 {
        mean(self.closed_pnls().filter(|pnl| *pnl > 0.0))
    }

    /// Mean net P&L of losing records (negative), 0 without any.
    pub fn average_loss(&self) -> f64 {
        mean(self.closed_pnls().filter(|pnl| *pnl <= 0.0))
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 { 0.0 } else { sum / count as f64 }
}

impl fmt::Display for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Replay Metrics ===")?;
        writeln!(f, "Initial Balance: {:.2}", self.initial_balance)?;
        writeln!(f, "Final Balance: {:.2}", self.balance)?;
        writeln!(f, "Net P&L: {:.2}", self.net_pnl())?;
        writeln!(f, "Commission paid: {:.2}", self.commission)?;
        #[allow(clippy::writeln_empty_string)]
        writeln!(f, "")?;
        writeln!(f, "Trades: {}", self.trades())?;
        writeln!(f, "Win Rate: {:.2}%", self.win_rate())?;
        writeln!(f, "Profit Factor: {:.2}", self.profit_factor())?;
        writeln!(f, "Average Win: {:.2}", self.average_win())?;
        writeln!(f, "Average Loss: {:.2}", self.average_loss())?;
        writeln!(f, "Max Drawdown: {:.2}%", self.max_drawdown())
    }
}

#[cfg(test)]
fn now() -> DateTime<Utc> {
    DateTime::from_timestamp(1_515_151_515, 0).unwrap()
}

#[cfg(test)]
// Closed record of one long lot entered at 100 with the given net P&L
fn closed(pnl: f64) -> Event {
    let mut store = TradeStore::new(1.0, 1e-9);
    let id = store
        .submit_pending((Side::Long, OrderType::Market, 1.0).into(), 100.0, now())
        .unwrap();
    store.open(id, 100.0, now(), 0.0).unwrap();
    let record = store.close(id, 100.0 + pnl, now(), CloseReason::Manual, 1.0).unwrap();
    Event::PositionClosed(now(), record)
}

#[cfg(test)]
fn equity(equity: f64) -> Event {
    Event::Equity(EquityPoint {
        time: now(),
        balance: equity,
        equity,
    })
}

#[cfg(test)]
#[test]
fn max_drawdown() {
    let events = vec![equity(10000.0), equity(12000.0), equity(9000.0), equity(11000.0)];
    let metrics = Metrics::new(events, 10000.0, 11000.0, 0.0);
    assert_eq!(metrics.max_drawdown(), 25.0); // (12000 - 9000) / 12000
}

#[cfg(test)]
#[test]
fn max_drawdown_no_events() {
    let metrics = Metrics::new(vec![], 10000.0, 10000.0, 0.0);
    assert_eq!(metrics.max_drawdown(), 0.0);
}

#[cfg(test)]
#[test]
fn profit_factor() {
    let metrics = Metrics::new(vec![closed(20.0), closed(-10.0)], 10000.0, 10010.0, 0.0);
    assert_eq!(metrics.profit_factor(), 2.0);
    assert_eq!(metrics.trades(), 2);
    assert_eq!(metrics.net_pnl(), 10.0);
}

#[cfg(test)]
#[test]
fn profit_factor_no_losses() {
    let metrics = Metrics::new(vec![closed(20.0)], 10000.0, 10020.0, 0.0);
    assert_eq!(metrics.profit_factor(), f64::INFINITY);
}

#[cfg(test)]
#[test]
fn win_rate() {
    let metrics = Metrics::new(vec![closed(20.0), closed(-10.0)], 10000.0, 10010.0, 0.0);
    assert_eq!(metrics.win_rate(), 50.0);
}

#[cfg(test)]
#[test]
fn win_rate_no_trades() {
    let metrics = Metrics::new(vec![equity(10000.0)], 10000.0, 10000.0, 0.0);
    assert_eq!(metrics.win_rate(), 0.0);
    assert_eq!(metrics.average_win(), 0.0);
}

#[cfg(test)]
#[test]
fn averages() {
    let events = vec![closed(20.0), closed(40.0), closed(-10.0), equity(10050.0)];
    let metrics = Metrics::new(events, 10000.0, 10050.0, 0.0);
    assert_eq!(metrics.average_win(), 30.0);
    assert_eq!(metrics.average_loss(), -10.0);
}

#[cfg(test)]
#[test]
fn display() {
    let metrics = Metrics::new(vec![closed(20.0)], 10000.0, 10020.0, 0.0);
    let text = metrics.to_string();
    assert!(text.starts_with("=== Replay Metrics ==="));
    assert!(text.contains("Win Rate: 100.00%"));
}
