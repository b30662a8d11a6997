use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use crate::engine::{AccountStats, Trade, TradeFilter};

/// Copy of the replay state after a step, safe to hand to another thread.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Number of candles processed.
    pub cursor: usize,
    /// Time of the last processed candle.
    pub time: Option<DateTime<Utc>>,
    pub stats: AccountStats,
    /// Every trade, ascending by id.
    pub trades: Vec<Trade>,
}

impl Snapshot {
    pub fn trades(&self, filter: TradeFilter) -> impl Iterator<Item = &Trade> {
        self.trades.iter().filter(move |t| filter.matches(t))
    }
}

/// Read side of the snapshot published by a replay.
///
/// Readers get the last complete snapshot; they never see a step half-applied.
#[derive(Debug, Clone)]
pub struct SnapshotReader {
    cell: Arc<RwLock<Arc<Snapshot>>>,
}

impl SnapshotReader {
    pub(crate) fn new(snapshot: Snapshot) -> Self {
        Self {
            cell: Arc::new(RwLock::new(Arc::new(snapshot))),
        }
    }

    /// Latest published snapshot.
    pub fn load(&self) -> Arc<Snapshot> {
        let guard = self.cell.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    pub(crate) fn publish(&self, snapshot: Snapshot) {
        let mut guard = self.cell.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(snapshot);
    }
}
