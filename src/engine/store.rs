use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::engine::trade::check_exit_levels;
use crate::engine::*;
use crate::errors::{Error, Result};

/// Selects trades by lifecycle state.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TradeFilter {
    Pending,
    Open,
    Closed,
    All,
}

impl TradeFilter {
    pub fn matches(&self, trade: &Trade) -> bool {
        match self {
            Self::Pending => trade.is_pending(),
            Self::Open => trade.is_open(),
            Self::Closed => trade.is_closed(),
            Self::All => true,
        }
    }
}

fn invalid_state(trade: &Trade, operation: &'static str) -> Error {
    Error::InvalidState {
        id: trade.id,
        state: trade.state.name(),
        operation,
    }
}

/// Ledger of every order and position of a replay, keyed by ascending id.
#[derive(Debug, Clone)]
pub struct TradeStore {
    next_id: u64,
    trades: BTreeMap<TradeId, Trade>,
    contract_multiplier: f64,
    lot_epsilon: f64,
}

impl TradeStore {
    /// Creates an empty store.
    ///
    /// ### Arguments
    /// * `contract_multiplier` - Value of a one-point move for one lot.
    /// * `lot_epsilon` - Remainders below this lot size are closed with the rest.
    pub fn new(contract_multiplier: f64, lot_epsilon: f64) -> Self {
        Self {
            next_id: 1,
            trades: BTreeMap::new(),
            contract_multiplier,
            lot_epsilon,
        }
    }

    pub fn contract_multiplier(&self) -> f64 {
        self.contract_multiplier
    }

    pub(crate) fn allocate_id(&mut self) -> TradeId {
        let id = TradeId::from(self.next_id);
        self.next_id += 1;
        id
    }

    /// Validates `request` against `reference_price` and inserts it as pending.
    pub fn submit_pending(
        &mut self,
        request: OrderRequest,
        reference_price: f64,
        time: DateTime<Utc>,
    ) -> Result<TradeId> {
        request.validate(reference_price)?;
        let id = self.allocate_id();
        self.insert_pending(id, request, Annotations::default(), time);
        Ok(id)
    }

    /// Inserts an already validated request under a reserved id.
    pub(crate) fn insert_pending(
        &mut self,
        id: TradeId,
        request: OrderRequest,
        annotations: Annotations,
        time: DateTime<Utc>,
    ) {
        let trade = Trade {
            id,
            side: request.side,
            lot_size: request.lot_size,
            stop_loss: request.stop_loss,
            take_profit: request.take_profit,
            state: TradeState::Pending {
                order_type: request.order_type,
                submitted_at: time,
            },
            parent: None,
            annotations,
        };
        self.next_id = self.next_id.max(id.get() + 1);
        self.trades.insert(id, trade);
    }

    pub fn get(&self, id: TradeId) -> Option<&Trade> {
        self.trades.get(&id)
    }

    fn get_mut(&mut self, id: TradeId) -> Result<&mut Trade> {
        self.trades.get_mut(&id).ok_or(Error::NotFound(id))
    }

    /// All trades in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &Trade> {
        self.trades.values()
    }

    /// Trades matching `filter`, in ascending id order.
    pub fn list(&self, filter: TradeFilter) -> impl Iterator<Item = &Trade> {
        self.trades.values().filter(move |t| filter.matches(t))
    }

    pub fn count(&self, filter: TradeFilter) -> usize {
        self.list(filter).count()
    }

    pub(crate) fn ids(&self, filter: TradeFilter) -> Vec<TradeId> {
        self.list(filter).map(|t| t.id).collect()
    }

    /// `Pending -> Open`.
    pub fn open(&mut self, id: TradeId, fill_price: f64, fill_time: DateTime<Utc>, commission: f64) -> Result<&Trade> {
        let trade = self.get_mut(id)?;
        if !trade.is_pending() {
            return Err(invalid_state(trade, "open"));
        }
        trade.state = TradeState::Open {
            entry_price: fill_price,
            entry_time: fill_time,
            commission,
        };
        Ok(trade)
    }

    /// Closes `fraction` of an open position.
    ///
    /// With `fraction == 1.0` (or a remainder below the lot epsilon) the position
    /// itself becomes closed with `reason`. Otherwise the position stays open
    /// with the remaining lot size and a new closed record, with reason
    /// [`CloseReason::Partial`], is created for the closed portion. Commission
    /// is split pro-rata.
    ///
    /// ### Returns
    /// The closed record.
    pub fn close(
        &mut self,
        id: TradeId,
        exit_price: f64,
        exit_time: DateTime<Utc>,
        reason: CloseReason,
        fraction: f64,
    ) -> Result<Trade> {
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(Error::InvalidFraction(fraction));
        }
        let multiplier = self.contract_multiplier;
        let lot_epsilon = self.lot_epsilon;
        let trade = self.get_mut(id)?;
        let TradeState::Open {
            entry_price,
            entry_time,
            commission,
        } = trade.state
        else {
            return Err(invalid_state(trade, "close"));
        };

        let remaining_lot = trade.lot_size - trade.lot_size * fraction;
        // closed + remaining must add back to the original lot exactly
        let closed_lot = trade.lot_size - remaining_lot;

        if fraction >= 1.0 || remaining_lot < lot_epsilon {
            let gross_pnl = price_pnl(trade.side, entry_price, exit_price, trade.lot_size, multiplier);
            trade.state = TradeState::Closed {
                entry_price,
                entry_time,
                exit_price,
                exit_time,
                commission,
                gross_pnl,
                realized_pnl: gross_pnl - commission,
                reason,
            };
            return Ok(trade.clone());
        }

        let closed_commission = commission * closed_lot / trade.lot_size;
        trade.lot_size = remaining_lot;
        trade.state = TradeState::Open {
            entry_price,
            entry_time,
            commission: commission - closed_commission,
        };

        let gross_pnl = price_pnl(trade.side, entry_price, exit_price, closed_lot, multiplier);
        let mut record = trade.clone();
        record.lot_size = closed_lot;
        record.parent = Some(id);
        record.state = TradeState::Closed {
            entry_price,
            entry_time,
            exit_price,
            exit_time,
            commission: closed_commission,
            gross_pnl,
            realized_pnl: gross_pnl - closed_commission,
            reason: CloseReason::Partial,
        };

        record.id = self.allocate_id();
        self.trades.insert(record.id, record.clone());
        Ok(record)
    }

    /// Moves the stop-loss of an open position to its entry price.
    pub fn set_break_even(&mut self, id: TradeId) -> Result<f64> {
        let trade = self.get_mut(id)?;
        let TradeState::Open { entry_price, .. } = trade.state else {
            return Err(invalid_state(trade, "move to break-even"));
        };
        trade.stop_loss = Some(entry_price);
        Ok(entry_price)
    }

    /// Replaces the exit levels of an open position, checked against `reference_price`.
    pub fn set_exits(
        &mut self,
        id: TradeId,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
        reference_price: f64,
    ) -> Result<()> {
        let trade = self.expect_state(id, TradeFilter::Open, "modify exits of")?;
        check_exit_levels(trade.side, reference_price, stop_loss, take_profit)?;
        self.replace_exits(id, stop_loss, take_profit)
    }

    /// Replaces the exit levels of an open position without checking them.
    ///
    /// A level already crossed exits at the next candle open.
    pub(crate) fn replace_exits(&mut self, id: TradeId, stop_loss: Option<f64>, take_profit: Option<f64>) -> Result<()> {
        let trade = self.get_mut(id)?;
        if !trade.is_open() {
            return Err(invalid_state(trade, "modify exits of"));
        }
        trade.stop_loss = stop_loss;
        trade.take_profit = take_profit;
        Ok(())
    }

    /// Removes a pending order.
    pub fn cancel(&mut self, id: TradeId) -> Result<Trade> {
        let trade = self.get_mut(id)?;
        if !trade.is_pending() {
            return Err(invalid_state(trade, "cancel"));
        }
        self.trades.remove(&id).ok_or(Error::NotFound(id))
    }

    /// Updates the journal fields of a trade in any state.
    pub fn annotate(&mut self, id: TradeId, patch: AnnotationPatch) -> Result<()> {
        let trade = self.get_mut(id)?;
        patch.apply(&mut trade.annotations);
        Ok(())
    }

    /// Fails unless `id` names a trade `filter` accepts.
    pub(crate) fn expect_state(&self, id: TradeId, filter: TradeFilter, operation: &'static str) -> Result<&Trade> {
        let trade = self.get(id).ok_or(Error::NotFound(id))?;
        if !filter.matches(trade) {
            return Err(invalid_state(trade, operation));
        }
        Ok(trade)
    }
}
