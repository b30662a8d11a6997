use crate::engine::{AnnotationPatch, Annotations, OrderRequest, TradeId};

/// A lifecycle command, queued by the driver and applied at the open of the next candle.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Insert a pending order under an id reserved when the command was issued.
    ///
    /// `annotations` collects journal edits made while the order waits in the queue.
    Submit {
        id: TradeId,
        request: OrderRequest,
        annotations: Annotations,
    },
    /// Close the whole position.
    Close { id: TradeId },
    /// Close `fraction` of the position.
    PartialClose { id: TradeId, fraction: f64 },
    /// Move the stop-loss to the entry price.
    BreakEven { id: TradeId },
    /// Replace both exit levels.
    SetExits {
        id: TradeId,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
    },
    /// Remove a pending order.
    Cancel { id: TradeId },
}

impl Command {
    /// Trade the command targets.
    pub fn id(&self) -> TradeId {
        match self {
            Self::Submit { id, .. }
            | Self::Close { id }
            | Self::PartialClose { id, .. }
            | Self::BreakEven { id }
            | Self::SetExits { id, .. }
            | Self::Cancel { id } => *id,
        }
    }
}

/// Everything the user did between two steps, in call order.
///
/// Rewinding re-issues this log from the first candle.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Issued {
    Command(Command),
    Annotate(TradeId, AnnotationPatch),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct JournalEntry {
    /// Cursor of the driver when the call was made.
    pub(crate) cursor: usize,
    pub(crate) issued: Issued,
}

#[cfg(test)]
#[test]
fn command_targets() {
    let id = TradeId::from(4);
    assert_eq!(Command::Close { id }.id(), id);
    assert_eq!(
        Command::SetExits {
            id,
            stop_loss: None,
            take_profit: Some(1.2)
        }
        .id(),
        id
    );
}
