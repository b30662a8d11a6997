//! Per-candle fill and exit logic.
//!
//! One pass over a candle runs in two phases, each in ascending trade id:
//! 1. pending orders are tested against the candle and filled,
//! 2. open positions are tested against their stop-loss and take-profit.
//!
//! A level already beyond the candle open fills at the open (gap fill); a level
//! inside `[low, high]` fills at exactly that level. When both exits of a
//! position sit inside one candle the configured [`ExitPriority`] decides.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::config::{CommissionModel, ExitPriority, ReplayConfig};
use crate::engine::*;
use crate::errors::{Error, Result};

/// A state transition produced by the matching pass.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum Execution {
    /// A pending order became an open position.
    Entry {
        id: TradeId,
        price: f64,
        time: DateTime<Utc>,
        commission: f64,
        /// The candle opened beyond the trigger.
        gap: bool,
    },
    /// A position (or part of one) was closed; `record` is the closed trade.
    Exit { record: Trade },
}

impl Execution {
    pub fn id(&self) -> TradeId {
        match self {
            Self::Entry { id, .. } => *id,
            Self::Exit { record } => record.id(),
        }
    }
}

/// Direction the price must travel to reach a level.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Cross {
    Down,
    Up,
}

impl Cross {
    /// Fill price for a level on this candle, given the first price traded.
    fn fill(&self, level: f64, start: f64, candle: &Candle) -> Option<(f64, bool)> {
        match self {
            Self::Down if start <= level => Some((start, true)),
            Self::Up if start >= level => Some((start, true)),
            Self::Down if candle.low() <= level => Some((level, false)),
            Self::Up if candle.high() >= level => Some((level, false)),
            _ => None,
        }
    }
}

fn entry_cross(side: Side, order_type: OrderType) -> Option<Cross> {
    match (side, order_type) {
        (_, OrderType::Market) => None,
        (Side::Long, OrderType::Limit(_)) | (Side::Short, OrderType::Stop(_)) => Some(Cross::Down),
        (Side::Long, OrderType::Stop(_)) | (Side::Short, OrderType::Limit(_)) => Some(Cross::Up),
    }
}

fn stop_cross(side: Side) -> Cross {
    match side {
        Side::Long => Cross::Down,
        Side::Short => Cross::Up,
    }
}

fn target_cross(side: Side) -> Cross {
    match side {
        Side::Long => Cross::Up,
        Side::Short => Cross::Down,
    }
}

fn checked_level(id: TradeId, name: &str, level: f64) -> Result<f64> {
    if level.is_finite() {
        Ok(level)
    } else {
        Err(Error::Unreachable(format!("trade {id} has a non-finite {name}: {level}")))
    }
}

/// Stateless matcher configured from a [`ReplayConfig`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchingEngine {
    exit_priority: ExitPriority,
    same_candle_exits: bool,
    commission: CommissionModel,
    contract_multiplier: f64,
}

impl From<&ReplayConfig> for MatchingEngine {
    fn from(config: &ReplayConfig) -> Self {
        Self {
            exit_priority: config.exit_priority,
            same_candle_exits: config.same_candle_exits,
            commission: config.commission,
            contract_multiplier: config.contract_multiplier,
        }
    }
}

impl MatchingEngine {
    pub fn exit_priority(&self) -> ExitPriority {
        self.exit_priority
    }

    /// Runs both phases for `candle` and returns what happened, in application order.
    ///
    /// ### Errors
    /// Only invariant violations, reported as [`Error::Unreachable`].
    pub fn process(&self, store: &mut TradeStore, candle: &Candle) -> Result<Vec<Execution>> {
        let mut executions = Vec::new();
        let mut filled_at = BTreeMap::new();

        for id in store.ids(TradeFilter::Pending) {
            let Some(execution) = self.try_fill(store, id, candle)? else {
                continue;
            };
            if let Execution::Entry { price, gap, .. } = execution {
                filled_at.insert(id, (price, gap || price == candle.open()));
            }
            executions.push(execution);
        }

        for id in store.ids(TradeFilter::Open) {
            // the open is not a traded price for a position filled later in the candle,
            // and its high or low may have printed before the fill
            let (start, check_target) = match filled_at.get(&id) {
                Some(_) if !self.same_candle_exits => continue,
                Some(&(fill_price, at_open)) => {
                    (fill_price, at_open || self.exit_priority == ExitPriority::TakeProfitFirst)
                }
                None => (candle.open(), true),
            };
            if let Some(record) = self.try_exit(store, id, start, check_target, candle)? {
                executions.push(Execution::Exit { record });
            }
        }

        Ok(executions)
    }

    fn try_fill(&self, store: &mut TradeStore, id: TradeId, candle: &Candle) -> Result<Option<Execution>> {
        let trade = store
            .get(id)
            .ok_or_else(|| Error::Unreachable(format!("pending trade {id} vanished")))?;
        let TradeState::Pending { order_type, .. } = *trade.state() else {
            return Err(Error::Unreachable(format!("trade {id} is listed pending but is {}", trade.state().name())));
        };

        let fill = match (entry_cross(trade.side(), order_type), order_type.trigger()) {
            (None, None) => Some((candle.open(), false)),
            (Some(cross), Some(trigger)) => cross.fill(checked_level(id, "trigger", trigger)?, candle.open(), candle),
            _ => return Err(Error::Unreachable(format!("trade {id} has no trigger comparison"))),
        };
        let Some((price, gap)) = fill else {
            return Ok(None);
        };

        let commission = self.commission.charge(price, trade.lot_size(), self.contract_multiplier);
        let time = candle.time();
        store
            .open(id, price, time, commission)
            .map_err(|e| Error::Unreachable(e.to_string()))?;
        tracing::debug!(%id, price, gap, commission, "order filled");

        Ok(Some(Execution::Entry {
            id,
            price,
            time,
            commission,
            gap,
        }))
    }

    fn try_exit(
        &self,
        store: &mut TradeStore,
        id: TradeId,
        start: f64,
        check_target: bool,
        candle: &Candle,
    ) -> Result<Option<Trade>> {
        let trade = store
            .get(id)
            .ok_or_else(|| Error::Unreachable(format!("open trade {id} vanished")))?;
        let side = trade.side();

        let stop = match trade.stop_loss() {
            Some(level) => stop_cross(side).fill(checked_level(id, "stop-loss", level)?, start, candle),
            None => None,
        };
        let target = match trade.take_profit() {
            Some(level) if check_target => target_cross(side).fill(checked_level(id, "take-profit", level)?, start, candle),
            _ => None,
        };

        let exit = match (stop, target) {
            (None, None) => return Ok(None),
            // a gap through the stop is decided before anything else trades
            (Some((price, true)), _) => (price, CloseReason::StopLoss),
            (_, Some((price, true))) => (price, CloseReason::TakeProfit),
            (Some((sl, false)), Some((tp, false))) => match self.exit_priority {
                ExitPriority::StopLossFirst => (sl, CloseReason::StopLoss),
                ExitPriority::TakeProfitFirst => (tp, CloseReason::TakeProfit),
            },
            (Some((sl, false)), None) => (sl, CloseReason::StopLoss),
            (None, Some((tp, false))) => (tp, CloseReason::TakeProfit),
        };

        let (price, reason) = exit;
        let record = store
            .close(id, price, candle.time(), reason, 1.0)
            .map_err(|e| Error::Unreachable(e.to_string()))?;
        tracing::debug!(%id, price, ?reason, "exit triggered");
        Ok(Some(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration};

    fn at(i: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_515_151_515, 0).unwrap() + Duration::hours(i)
    }

    fn candle(open: f64, high: f64, low: f64, close: f64) -> Candle {
        CandleBuilder::builder()
            .time(at(1))
            .open(open)
            .high(high)
            .low(low)
            .close(close)
            .build()
            .unwrap()
    }

    fn engine(priority: ExitPriority) -> MatchingEngine {
        MatchingEngine::from(&ReplayConfig::default().exit_priority(priority))
    }

    fn open_long(store: &mut TradeStore, entry: f64, sl: Option<f64>, tp: Option<f64>) -> TradeId {
        let id = store
            .submit_pending((Side::Long, OrderType::Market, 1.0, sl, tp).into(), entry, at(0))
            .unwrap();
        store.open(id, entry, at(0), 0.0).unwrap();
        id
    }

    fn exit_of(executions: &[Execution]) -> (f64, CloseReason) {
        match executions {
            [Execution::Exit { record }] => match record.state() {
                TradeState::Closed { exit_price, reason, .. } => (*exit_price, *reason),
                _ => panic!("exit record is not closed"),
            },
            other => panic!("expected one exit, got {other:?}"),
        }
    }

    #[test]
    fn market_order_fills_at_open() {
        let mut store = TradeStore::new(1.0, 1e-9);
        let id = store
            .submit_pending((Side::Short, OrderType::Market, 1.0).into(), 100.0, at(0))
            .unwrap();
        let executions = engine(ExitPriority::StopLossFirst)
            .process(&mut store, &candle(101.0, 103.0, 99.0, 100.0))
            .unwrap();

        assert!(matches!(executions[..], [Execution::Entry { price, gap: false, .. }] if price == 101.0));
        assert_eq!(store.get(id).unwrap().entry_price(), Some(101.0));
    }

    #[test]
    fn limit_fills_at_trigger_not_extreme() {
        let mut store = TradeStore::new(1.0, 1e-9);
        store
            .submit_pending((Side::Long, OrderType::Limit(98.0), 1.0).into(), 100.0, at(0))
            .unwrap();
        let executions = engine(ExitPriority::StopLossFirst)
            .process(&mut store, &candle(100.0, 101.0, 95.0, 99.0))
            .unwrap();
        assert!(matches!(executions[..], [Execution::Entry { price, gap: false, .. }] if price == 98.0));
    }

    #[test]
    fn stop_gaps_fill_at_open() {
        let mut store = TradeStore::new(1.0, 1e-9);
        store
            .submit_pending((Side::Long, OrderType::Stop(102.0), 1.0).into(), 100.0, at(0))
            .unwrap();
        let executions = engine(ExitPriority::StopLossFirst)
            .process(&mut store, &candle(104.0, 106.0, 103.0, 105.0))
            .unwrap();
        assert!(matches!(executions[..], [Execution::Entry { price, gap: true, .. }] if price == 104.0));
    }

    #[test]
    fn untouched_trigger_rests() {
        let mut store = TradeStore::new(1.0, 1e-9);
        let id = store
            .submit_pending((Side::Short, OrderType::Limit(105.0), 1.0).into(), 100.0, at(0))
            .unwrap();
        let executions = engine(ExitPriority::StopLossFirst)
            .process(&mut store, &candle(100.0, 104.99, 98.0, 101.0))
            .unwrap();
        assert!(executions.is_empty());
        assert!(store.get(id).unwrap().is_pending());
    }

    #[test]
    fn take_profit_inside_range() {
        let mut store = TradeStore::new(1.0, 1e-9);
        open_long(&mut store, 1.1000, Some(1.0980), Some(1.1040));
        let executions = engine(ExitPriority::StopLossFirst)
            .process(&mut store, &candle(1.1010, 1.1045, 1.0990, 1.1030))
            .unwrap();
        assert_eq!(exit_of(&executions), (1.1040, CloseReason::TakeProfit));
    }

    #[test]
    fn both_levels_in_range_follow_priority() {
        let both = candle(1.1000, 1.1050, 1.0975, 1.1010);

        let mut store = TradeStore::new(1.0, 1e-9);
        open_long(&mut store, 1.1000, Some(1.0980), Some(1.1040));
        let executions = engine(ExitPriority::StopLossFirst).process(&mut store, &both).unwrap();
        assert_eq!(exit_of(&executions), (1.0980, CloseReason::StopLoss));

        let mut store = TradeStore::new(1.0, 1e-9);
        open_long(&mut store, 1.1000, Some(1.0980), Some(1.1040));
        let executions = engine(ExitPriority::TakeProfitFirst).process(&mut store, &both).unwrap();
        assert_eq!(exit_of(&executions), (1.1040, CloseReason::TakeProfit));
    }

    #[test]
    fn gap_through_stop_exits_at_open() {
        let mut store = TradeStore::new(1.0, 1e-9);
        open_long(&mut store, 100.0, Some(98.0), Some(110.0));
        let executions = engine(ExitPriority::TakeProfitFirst)
            .process(&mut store, &candle(97.0, 111.0, 96.0, 105.0))
            .unwrap();
        assert_eq!(exit_of(&executions), (97.0, CloseReason::StopLoss));
    }

    #[test]
    fn short_exits_are_mirrored() {
        let mut store = TradeStore::new(1.0, 1e-9);
        let id = store
            .submit_pending((Side::Short, OrderType::Market, 1.0, Some(105.0), Some(90.0)).into(), 100.0, at(0))
            .unwrap();
        store.open(id, 100.0, at(0), 0.0).unwrap();
        let executions = engine(ExitPriority::StopLossFirst)
            .process(&mut store, &candle(101.0, 106.0, 100.0, 104.0))
            .unwrap();
        assert_eq!(exit_of(&executions), (105.0, CloseReason::StopLoss));
    }

    #[test]
    fn fills_apply_in_ascending_id() {
        let mut store = TradeStore::new(1.0, 1e-9);
        let first = store
            .submit_pending((Side::Long, OrderType::Limit(99.0), 1.0).into(), 100.0, at(0))
            .unwrap();
        let second = store
            .submit_pending((Side::Short, OrderType::Limit(101.0), 1.0).into(), 100.0, at(0))
            .unwrap();
        let executions = engine(ExitPriority::StopLossFirst)
            .process(&mut store, &candle(100.0, 102.0, 98.0, 100.0))
            .unwrap();
        let ids: Vec<_> = executions.iter().map(Execution::id).collect();
        assert_eq!(ids, vec![first, second]);
    }

    #[test]
    fn entry_candle_exits_can_be_disabled() {
        let config = ReplayConfig::default().same_candle_exits(false);
        let mut store = TradeStore::new(1.0, 1e-9);
        let id = store
            .submit_pending((Side::Long, OrderType::Limit(99.0), 1.0, Some(97.0), None).into(), 100.0, at(0))
            .unwrap();
        let executions = MatchingEngine::from(&config)
            .process(&mut store, &candle(100.0, 100.5, 96.0, 98.0))
            .unwrap();
        assert_eq!(executions.len(), 1);
        assert!(store.get(id).unwrap().is_open());
    }

    #[test]
    fn entry_candle_exit_uses_fill_price_as_start() {
        // the candle opened above the target, but only after the fill can it be hit
        let mut store = TradeStore::new(1.0, 1e-9);
        store
            .submit_pending((Side::Long, OrderType::Limit(99.0), 1.0, Some(97.0), Some(99.5)).into(), 100.0, at(0))
            .unwrap();
        let executions = engine(ExitPriority::TakeProfitFirst)
            .process(&mut store, &candle(100.0, 100.5, 98.0, 99.0))
            .unwrap();
        assert_eq!(executions.len(), 2);
        assert_eq!(exit_of(&executions[1..]), (99.5, CloseReason::TakeProfit));
    }

    #[test]
    fn entry_candle_target_waits_for_next_candle() {
        // the high may have printed before the limit filled
        let mut store = TradeStore::new(1.0, 1e-9);
        let id = store
            .submit_pending((Side::Long, OrderType::Limit(99.0), 1.0, Some(97.0), Some(99.5)).into(), 100.0, at(0))
            .unwrap();
        let engine = engine(ExitPriority::StopLossFirst);
        let executions = engine.process(&mut store, &candle(100.0, 100.5, 98.0, 99.0)).unwrap();
        assert_eq!(executions.len(), 1);
        assert!(store.get(id).unwrap().is_open());

        let executions = engine.process(&mut store, &candle(99.0, 99.6, 98.5, 99.4)).unwrap();
        assert_eq!(exit_of(&executions), (99.5, CloseReason::TakeProfit));
    }

    #[test]
    fn entry_candle_stop_still_triggers() {
        let mut store = TradeStore::new(1.0, 1e-9);
        store
            .submit_pending((Side::Long, OrderType::Limit(99.0), 1.0, Some(97.0), Some(99.5)).into(), 100.0, at(0))
            .unwrap();
        let executions = engine(ExitPriority::StopLossFirst)
            .process(&mut store, &candle(100.0, 100.5, 96.0, 97.5))
            .unwrap();
        assert_eq!(exit_of(&executions[1..]), (97.0, CloseReason::StopLoss));
    }

    #[test]
    fn market_fill_can_reach_target_on_entry_candle() {
        let mut store = TradeStore::new(1.0, 1e-9);
        store
            .submit_pending((Side::Long, OrderType::Market, 1.0, Some(97.0), Some(100.4)).into(), 100.0, at(0))
            .unwrap();
        let executions = engine(ExitPriority::StopLossFirst)
            .process(&mut store, &candle(100.0, 100.5, 99.5, 100.2))
            .unwrap();
        assert_eq!(exit_of(&executions[1..]), (100.4, CloseReason::TakeProfit));
    }
}
