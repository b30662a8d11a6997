use std::fmt;

use chrono::{DateTime, Utc};

use crate::errors::{Error, Result};

/// Unique, monotonic identifier of a trade.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TradeId(u64);

impl TradeId {
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for TradeId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for TradeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Direction of a trade.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// Buy.
    Long,
    /// Sell.
    Short,
}

impl Side {
    /// `1.0` for long, `-1.0` for short.
    pub fn sign(&self) -> f64 {
        match self {
            Self::Long => 1.0,
            Self::Short => -1.0,
        }
    }
}

/// How a pending order enters the market.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OrderType {
    /// Fills at the open of the next processed candle.
    Market,
    /// Buy below / sell above the current price.
    Limit(f64),
    /// Buy above / sell below the current price.
    Stop(f64),
}

impl OrderType {
    /// Trigger price of a resting order.
    pub fn trigger(&self) -> Option<f64> {
        match self {
            Self::Market => None,
            Self::Limit(price) | Self::Stop(price) => Some(*price),
        }
    }
}

/// Why a position left the book.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    StopLoss,
    TakeProfit,
    Manual,
    Partial,
}

/// Free-form journal fields. Never read by the matching engine.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Annotations {
    pub notes: String,
    pub tags: Vec<String>,
    pub playbook: Option<String>,
}

/// Partial update of [`Annotations`]; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnotationPatch {
    pub notes: Option<String>,
    pub tags: Option<Vec<String>>,
    pub playbook: Option<Option<String>>,
}

impl AnnotationPatch {
    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    pub fn playbook(mut self, playbook: Option<String>) -> Self {
        self.playbook = Some(playbook);
        self
    }

    pub(crate) fn apply(self, annotations: &mut Annotations) {
        if let Some(notes) = self.notes {
            annotations.notes = notes;
        }
        if let Some(tags) = self.tags {
            annotations.tags = tags;
        }
        if let Some(playbook) = self.playbook {
            annotations.playbook = playbook;
        }
    }
}

/// What the user asks for when placing an order.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub side: Side,
    pub order_type: OrderType,
    pub lot_size: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

type R1 = (Side, OrderType, f64);
type R2 = (Side, OrderType, f64, Option<f64>, Option<f64>);

impl From<R1> for OrderRequest {
    fn from((side, order_type, lot_size): R1) -> Self {
        Self {
            side,
            order_type,
            lot_size,
            stop_loss: None,
            take_profit: None,
        }
    }
}

impl From<R2> for OrderRequest {
    fn from((side, order_type, lot_size, stop_loss, take_profit): R2) -> Self {
        Self {
            side,
            order_type,
            lot_size,
            stop_loss,
            take_profit,
        }
    }
}

impl OrderRequest {
    /// Checks the request against `reference_price`, the last price the user saw.
    pub fn validate(&self, reference_price: f64) -> Result<()> {
        if !self.lot_size.is_finite() || self.lot_size <= 0.0 {
            return Err(Error::InvalidOrder(format!("lot size must be positive (got: {})", self.lot_size)));
        }
        for level in [self.stop_loss, self.take_profit].into_iter().flatten() {
            if !level.is_finite() || level <= 0.0 {
                return Err(Error::InvalidOrder(format!("exit level must be positive (got: {level})")));
            }
        }

        let entry = match self.order_type {
            OrderType::Market => reference_price,
            OrderType::Limit(trigger) | OrderType::Stop(trigger) => {
                if !trigger.is_finite() || trigger <= 0.0 {
                    return Err(Error::InvalidOrder(format!("trigger must be positive (got: {trigger})")));
                }
                let below = trigger < reference_price;
                let above = trigger > reference_price;
                let correct_side = match (self.side, self.order_type) {
                    (Side::Long, OrderType::Limit(_)) | (Side::Short, OrderType::Stop(_)) => below,
                    _ => above,
                };
                if !correct_side {
                    return Err(Error::InvalidOrder(format!(
                        "{:?} {:?} trigger {trigger} is on the wrong side of price {reference_price}",
                        self.side, self.order_type
                    )));
                }
                trigger
            }
        };

        check_exit_levels(self.side, entry, self.stop_loss, self.take_profit)
    }
}

/// Stop-loss must sit on the losing side of `entry`, take-profit on the winning side.
pub(crate) fn check_exit_levels(side: Side, entry: f64, stop_loss: Option<f64>, take_profit: Option<f64>) -> Result<()> {
    if let Some(sl) = stop_loss
        && (sl - entry) * side.sign() >= 0.0
    {
        return Err(Error::InvalidOrder(format!("stop-loss {sl} is not on the losing side of {entry}")));
    }
    if let Some(tp) = take_profit
        && (tp - entry) * side.sign() <= 0.0
    {
        return Err(Error::InvalidOrder(format!("take-profit {tp} is not on the winning side of {entry}")));
    }
    Ok(())
}

/// Price P&L of `lot_size` units moved from `entry` to `exit`.
pub fn price_pnl(side: Side, entry: f64, exit: f64, lot_size: f64, contract_multiplier: f64) -> f64 {
    (exit - entry) * side.sign() * lot_size * contract_multiplier
}

/// Lifecycle state of a trade; each variant carries only the fields valid for it.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum TradeState {
    Pending {
        order_type: OrderType,
        submitted_at: DateTime<Utc>,
    },
    Open {
        entry_price: f64,
        entry_time: DateTime<Utc>,
        /// Commission charged at entry for the current lot size, debited on close.
        commission: f64,
    },
    Closed {
        entry_price: f64,
        entry_time: DateTime<Utc>,
        exit_price: f64,
        exit_time: DateTime<Utc>,
        commission: f64,
        gross_pnl: f64,
        /// `gross_pnl - commission`.
        realized_pnl: f64,
        reason: CloseReason,
    },
}

impl TradeState {
    /// Short lowercase name, used in error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending { .. } => "pending",
            Self::Open { .. } => "open",
            Self::Closed { .. } => "closed",
        }
    }
}

/// An order, an open position or a closed position: one entity over its whole life.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Trade {
    pub(crate) id: TradeId,
    pub(crate) side: Side,
    pub(crate) lot_size: f64,
    pub(crate) stop_loss: Option<f64>,
    pub(crate) take_profit: Option<f64>,
    pub(crate) state: TradeState,
    pub(crate) parent: Option<TradeId>,
    pub(crate) annotations: Annotations,
}

impl Trade {
    pub fn id(&self) -> TradeId {
        self.id
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn lot_size(&self) -> f64 {
        self.lot_size
    }

    pub fn stop_loss(&self) -> Option<f64> {
        self.stop_loss
    }

    pub fn take_profit(&self) -> Option<f64> {
        self.take_profit
    }

    pub fn state(&self) -> &TradeState {
        &self.state
    }

    /// Position this record was split from by a partial close.
    pub fn parent(&self) -> Option<TradeId> {
        self.parent
    }

    pub fn annotations(&self) -> &Annotations {
        &self.annotations
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, TradeState::Pending { .. })
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, TradeState::Open { .. })
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, TradeState::Closed { .. })
    }

    /// Entry price once filled.
    pub fn entry_price(&self) -> Option<f64> {
        match self.state {
            TradeState::Open { entry_price, .. } | TradeState::Closed { entry_price, .. } => Some(entry_price),
            TradeState::Pending { .. } => None,
        }
    }

    /// Realized P&L net of commission, once closed.
    pub fn realized_pnl(&self) -> Option<f64> {
        match self.state {
            TradeState::Closed { realized_pnl, .. } => Some(realized_pnl),
            _ => None,
        }
    }

    /// Unrealized P&L marked at `price`; `None` unless open.
    pub fn floating_pnl(&self, price: f64, contract_multiplier: f64) -> Option<f64> {
        match self.state {
            TradeState::Open { entry_price, .. } => {
                Some(price_pnl(self.side, entry_price, price, self.lot_size, contract_multiplier))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_limit_must_be_below_price() {
        let order: OrderRequest = (Side::Long, OrderType::Limit(99.0), 1.0).into();
        assert!(order.validate(100.0).is_ok());
        assert!(matches!(order.validate(98.0), Err(Error::InvalidOrder(_))));
        assert!(matches!(order.validate(99.0), Err(Error::InvalidOrder(_))));
    }

    #[test]
    fn long_stop_must_be_above_price() {
        let order: OrderRequest = (Side::Long, OrderType::Stop(101.0), 1.0).into();
        assert!(order.validate(100.0).is_ok());
        assert!(order.validate(102.0).is_err());
    }

    #[test]
    fn short_limit_and_stop() {
        let limit: OrderRequest = (Side::Short, OrderType::Limit(101.0), 1.0).into();
        assert!(limit.validate(100.0).is_ok());
        assert!(limit.validate(101.5).is_err());

        let stop: OrderRequest = (Side::Short, OrderType::Stop(99.0), 1.0).into();
        assert!(stop.validate(100.0).is_ok());
        assert!(stop.validate(98.0).is_err());
    }

    #[test]
    fn market_order_checks_exits_against_reference() {
        let order: OrderRequest = (Side::Long, OrderType::Market, 1.0, Some(95.0), Some(110.0)).into();
        assert!(order.validate(100.0).is_ok());
        assert!(order.validate(94.0).is_err());
        assert!(order.validate(111.0).is_err());
    }

    #[test]
    fn short_exit_levels_are_mirrored() {
        let order: OrderRequest = (Side::Short, OrderType::Market, 1.0, Some(105.0), Some(90.0)).into();
        assert!(order.validate(100.0).is_ok());

        let wrong: OrderRequest = (Side::Short, OrderType::Market, 1.0, Some(95.0), None).into();
        assert!(wrong.validate(100.0).is_err());
    }

    #[test]
    fn bad_lot_size() {
        let zero: OrderRequest = (Side::Long, OrderType::Market, 0.0).into();
        assert!(zero.validate(100.0).is_err());
        let nan: OrderRequest = (Side::Long, OrderType::Market, f64::NAN).into();
        assert!(nan.validate(100.0).is_err());
    }

    #[test]
    fn pnl_is_mirrored_for_shorts() {
        assert_eq!(price_pnl(Side::Long, 100.0, 110.0, 2.0, 1.0), 20.0);
        assert_eq!(price_pnl(Side::Short, 100.0, 110.0, 2.0, 1.0), -20.0);
        assert_eq!(price_pnl(Side::Short, 100.0, 90.0, 1.0, 10.0), 100.0);
    }

    #[test]
    fn annotation_patch_leaves_unset_fields() {
        let mut annotations = Annotations {
            notes: "first".into(),
            tags: vec!["london".into()],
            playbook: Some("breakout".into()),
        };
        AnnotationPatch::default().notes("revised").apply(&mut annotations);
        assert_eq!(annotations.notes, "revised");
        assert_eq!(annotations.tags, vec!["london".to_string()]);
        assert_eq!(annotations.playbook.as_deref(), Some("breakout"));

        AnnotationPatch::default().tags(["ny", "fvg"]).playbook(None).apply(&mut annotations);
        assert_eq!(annotations.tags, vec!["ny".to_string(), "fvg".to_string()]);
        assert!(annotations.playbook.is_none());
    }
}
