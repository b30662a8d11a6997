use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Duration;

use crate::config::ReplayConfig;
use crate::engine::command::{Issued, JournalEntry};
use crate::engine::trade::check_exit_levels;
use crate::engine::*;
use crate::errors::{Error, Result};
#[cfg(feature = "metrics")]
use crate::metrics::Event;

/// Outcome of one [`Replay::step`].
#[derive(Debug)]
pub struct StepReport {
    /// Index of the processed candle.
    pub index: usize,
    pub candle: Candle,
    /// Manual closes first, then fills and exits of the matching pass.
    pub executions: Vec<Execution>,
    /// Queued commands that could no longer be applied.
    pub rejected: Vec<(Command, Error)>,
    /// News scheduled during this candle.
    pub news: Vec<NewsEvent>,
    /// Account after the candle close.
    pub stats: AccountStats,
}

/// Mutable part of a replay; cloned whole by [`Replay::checkpoint`].
#[derive(Debug, Clone)]
struct State {
    cursor: usize,
    store: TradeStore,
    wallet: Wallet,
    queue: VecDeque<Command>,
    journal: Vec<JournalEntry>,
    #[cfg(feature = "metrics")]
    events: Vec<Event>,
}

/// Saved replay state, restorable with [`Replay::restore`].
#[derive(Debug, Clone)]
pub struct Checkpoint(State);

impl Checkpoint {
    /// Number of candles processed when the checkpoint was taken.
    pub fn cursor(&self) -> usize {
        self.0.cursor
    }
}

/// Bar-by-bar replay driver.
///
/// Owns the candle cursor, the trade store and the wallet. User commands are
/// validated when issued and applied in issue order at the open of the next
/// candle, before that candle's matching pass.
///
/// ```rust
/// use bts_replay::prelude::*;
/// use chrono::{DateTime, Duration};
///
/// let start = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
/// let candles: Vec<_> = [(1.1000, 1.1010), (1.1005, 1.1045), (1.1040, 1.1050)]
///     .iter()
///     .enumerate()
///     .map(|(i, &(open, high))| {
///         CandleBuilder::builder()
///             .time(start + Duration::hours(i as i64))
///             .open(open)
///             .high(high)
///             .low(open - 0.0005)
///             .close(open + 0.0002)
///             .build()
///             .unwrap()
///     })
///     .collect();
///
/// let config = ReplayConfig::default().contract_multiplier(100_000.0);
/// let mut replay = Replay::new(candles, config).unwrap();
/// replay.step().unwrap();
///
/// let order = OrderRequest::from((Side::Long, OrderType::Market, 1.0, Some(1.0980), Some(1.1040)));
/// let id = replay.submit_order(order).unwrap();
/// replay.run_to_end().unwrap();
///
/// let trade = replay.store().get(id).unwrap();
/// assert!(trade.is_closed());
/// assert!(replay.balance() > 10_000.0);
/// ```
///
/// A clone is detached: it starts without a [`SnapshotReader`].
#[derive(Debug)]
pub struct Replay {
    feed: CandleFeed,
    news: NewsCalendar,
    config: ReplayConfig,
    engine: MatchingEngine,
    state: State,
    reader: Option<SnapshotReader>,
}

impl Clone for Replay {
    fn clone(&self) -> Self {
        Self {
            feed: self.feed.clone(),
            news: self.news.clone(),
            config: self.config.clone(),
            engine: self.engine.clone(),
            state: self.state.clone(),
            reader: None,
        }
    }
}

impl std::ops::Deref for Replay {
    type Target = Wallet;

    fn deref(&self) -> &Self::Target {
        &self.state.wallet
    }
}

impl Replay {
    /// Creates a replay over `data`.
    ///
    /// ### Errors
    /// Empty or unordered candles, invalid candles and invalid configuration.
    pub fn new(data: impl Into<Arc<[Candle]>>, config: ReplayConfig) -> Result<Self> {
        config.validate()?;
        let feed = CandleFeed::new(data)?;
        let state = State {
            cursor: 0,
            store: TradeStore::new(config.contract_multiplier, config.lot_epsilon),
            wallet: Wallet::new(config.starting_balance)?,
            queue: VecDeque::new(),
            journal: Vec::new(),
            #[cfg(feature = "metrics")]
            events: Vec::new(),
        };

        Ok(Self {
            feed,
            state,
            engine: MatchingEngine::from(&config),
            news: NewsCalendar::default(),
            config,
            reader: None,
        })
    }

    /// Attaches a news calendar.
    pub fn with_news(mut self, news: NewsCalendar) -> Self {
        self.news = news;
        self
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    pub fn feed(&self) -> &CandleFeed {
        &self.feed
    }

    pub fn news(&self) -> &NewsCalendar {
        &self.news
    }

    pub fn store(&self) -> &TradeStore {
        &self.state.store
    }

    pub fn wallet(&self) -> &Wallet {
        &self.state.wallet
    }

    /// Number of candles processed so far.
    pub fn cursor(&self) -> usize {
        self.state.cursor
    }

    pub fn is_finished(&self) -> bool {
        self.state.cursor >= self.feed.len()
    }

    /// Last processed candle.
    pub fn current_candle(&self) -> Option<&Candle> {
        self.state.cursor.checked_sub(1).and_then(|i| self.feed.get(i))
    }

    /// Price the user sees: the last close, or the first open before any step.
    pub fn current_price(&self) -> f64 {
        match self.current_candle() {
            Some(candle) => candle.close(),
            None => self.feed.get(0).map(Candle::open).unwrap_or_default(),
        }
    }

    /// Commands waiting for the next step.
    pub fn queued(&self) -> impl Iterator<Item = &Command> {
        self.state.queue.iter()
    }

    /// Trades matching `filter`, ascending by id.
    pub fn list_positions(&self, filter: TradeFilter) -> impl Iterator<Item = &Trade> {
        self.state.store.list(filter)
    }

    pub fn account_stats(&self) -> AccountStats {
        let wallet = &self.state.wallet;
        AccountStats {
            starting_balance: wallet.initial_balance(),
            balance: wallet.balance(),
            equity: wallet.equity(),
            floating_pnl: wallet.floating_pnl(),
            realized_pnl: wallet.realized_pnl(),
            commission_paid: wallet.commission_paid(),
            open_positions: self.state.store.count(TradeFilter::Open),
            pending_orders: self.state.store.count(TradeFilter::Pending),
        }
    }

    /// Balance and equity after every processed candle.
    pub fn equity_curve(&self) -> &[EquityPoint] {
        self.state.wallet.equity_curve()
    }

    /// Recorded events.
    #[cfg(feature = "metrics")]
    pub fn events(&self) -> std::slice::Iter<'_, Event> {
        self.state.events.iter()
    }

    /// News scheduled between the open of candle `index` and the open of the next one.
    pub fn news_for(&self, index: usize) -> &[NewsEvent] {
        let Some(candle) = self.feed.get(index) else {
            return &[];
        };
        let from = candle.time();
        let to = match (self.feed.get(index + 1), index.checked_sub(1).and_then(|i| self.feed.get(i))) {
            (Some(next), _) => next.time(),
            (None, Some(previous)) => from + (from - previous.time()),
            (None, None) => from + Duration::nanoseconds(1),
        };
        self.news.between(from, to)
    }

    /// Queues a new order and returns the id it will carry.
    ///
    /// Limit and stop triggers are checked against [`Replay::current_price`].
    pub fn submit_order(&mut self, request: OrderRequest) -> Result<TradeId> {
        request.validate(self.current_price())?;
        let id = self.state.store.allocate_id();
        self.issue(Command::Submit {
            id,
            request,
            annotations: Annotations::default(),
        });
        Ok(id)
    }

    /// Queues a full close ("X" button).
    pub fn close_position(&mut self, id: TradeId) -> Result<()> {
        self.state.store.expect_state(id, TradeFilter::Open, "close")?;
        self.issue(Command::Close { id });
        Ok(())
    }

    /// Queues a close of the configured partial fraction (half by default).
    pub fn partial_close(&mut self, id: TradeId) -> Result<()> {
        self.partial_close_by(id, self.config.partial_close_fraction)
    }

    /// Queues a close of `fraction` of the position; `fraction` must be in `(0, 1)`.
    pub fn partial_close_by(&mut self, id: TradeId, fraction: f64) -> Result<()> {
        if !(fraction > 0.0 && fraction < 1.0) {
            return Err(Error::InvalidFraction(fraction));
        }
        self.state.store.expect_state(id, TradeFilter::Open, "partially close")?;
        self.issue(Command::PartialClose { id, fraction });
        Ok(())
    }

    /// Queues a break-even move of the stop-loss.
    pub fn set_break_even(&mut self, id: TradeId) -> Result<()> {
        self.state.store.expect_state(id, TradeFilter::Open, "move to break-even")?;
        self.issue(Command::BreakEven { id });
        Ok(())
    }

    /// Queues new exit levels, checked against [`Replay::current_price`].
    pub fn set_exits(&mut self, id: TradeId, stop_loss: Option<f64>, take_profit: Option<f64>) -> Result<()> {
        let trade = self.state.store.expect_state(id, TradeFilter::Open, "modify exits of")?;
        check_exit_levels(trade.side(), self.current_price(), stop_loss, take_profit)?;
        self.issue(Command::SetExits {
            id,
            stop_loss,
            take_profit,
        });
        Ok(())
    }

    /// Cancels a pending order, or drops a submission still waiting in the queue.
    pub fn cancel_order(&mut self, id: TradeId) -> Result<()> {
        let queued = self
            .state
            .queue
            .iter()
            .any(|c| matches!(c, Command::Submit { id: queued, .. } if *queued == id));
        if !queued {
            self.state.store.expect_state(id, TradeFilter::Pending, "cancel")?;
        }
        self.issue(Command::Cancel { id });
        Ok(())
    }

    /// Updates journal fields immediately. Lifecycle fields cannot be reached from here.
    ///
    /// An order still waiting in the queue keeps the edit and is inserted with it.
    pub fn annotate(&mut self, id: TradeId, patch: AnnotationPatch) -> Result<()> {
        self.annotate_now(id, patch.clone())?;
        self.state.journal.push(JournalEntry {
            cursor: self.state.cursor,
            issued: Issued::Annotate(id, patch),
        });
        self.publish();
        Ok(())
    }

    fn annotate_now(&mut self, id: TradeId, patch: AnnotationPatch) -> Result<()> {
        let queued = self.state.queue.iter_mut().find_map(|c| match c {
            Command::Submit {
                id: queued,
                annotations,
                ..
            } if *queued == id => Some(annotations),
            _ => None,
        });
        match queued {
            Some(annotations) => {
                patch.apply(annotations);
                Ok(())
            }
            None => self.state.store.annotate(id, patch),
        }
    }

    fn issue(&mut self, command: Command) {
        tracing::debug!(cursor = self.state.cursor, ?command, "command queued");
        self.state.journal.push(JournalEntry {
            cursor: self.state.cursor,
            issued: Issued::Command(command.clone()),
        });
        self.enqueue(command);
        self.publish();
    }

    fn enqueue(&mut self, command: Command) {
        if let Command::Cancel { id } = command {
            let queued = self
                .state
                .queue
                .iter()
                .position(|c| matches!(c, Command::Submit { id: queued, .. } if *queued == id));
            if let Some(index) = queued {
                self.state.queue.remove(index);
                return;
            }
        }
        self.state.queue.push_back(command);
    }

    /// Processes the next candle; `None` once the feed is exhausted.
    ///
    /// Rejected commands are reported, not returned as errors.
    ///
    /// ### Errors
    /// Only internal invariant violations.
    pub fn step(&mut self) -> Result<Option<StepReport>> {
        let index = self.state.cursor;
        let Some(candle) = self.feed.get(index).copied() else {
            return Ok(None);
        };

        let mut executions = Vec::new();
        let mut rejected = Vec::new();
        while let Some(command) = self.state.queue.pop_front() {
            match self.apply(&command, &candle) {
                Ok(Some(execution)) => executions.push(execution),
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(index, ?command, %err, "queued command rejected");
                    rejected.push((command, err));
                }
            }
        }

        let matched = self.engine.process(&mut self.state.store, &candle)?;
        for execution in &matched {
            match execution {
                Execution::Entry { id, price, time, .. } => {
                    #[cfg(feature = "metrics")]
                    self.state.events.push(Event::PositionOpened(*time, *id, *price));
                    #[cfg(not(feature = "metrics"))]
                    let _ = (id, price, time);
                }
                Execution::Exit { record } => self.book_close(record)?,
            }
        }
        executions.extend(matched);

        let multiplier = self.config.contract_multiplier;
        let state = &mut self.state;
        state
            .wallet
            .mark(state.store.list(TradeFilter::Open), candle.time(), candle.close(), multiplier);
        #[cfg(feature = "metrics")]
        if let Some(point) = state.wallet.equity_curve().last() {
            state.events.push(Event::Equity(*point));
        }
        state.cursor += 1;
        tracing::trace!(index, equity = state.wallet.equity(), "candle processed");

        self.publish();
        Ok(Some(StepReport {
            index,
            candle,
            executions,
            rejected,
            news: self.news_for(index).to_vec(),
            stats: self.account_stats(),
        }))
    }

    fn apply(&mut self, command: &Command, candle: &Candle) -> Result<Option<Execution>> {
        let store = &mut self.state.store;
        match *command {
            Command::Submit {
                id,
                ref request,
                ref annotations,
            } => {
                store.insert_pending(id, request.clone(), annotations.clone(), candle.time());
                #[cfg(feature = "metrics")]
                if let Some(trade) = store.get(id) {
                    self.state.events.push(Event::OrderPlaced(candle.time(), trade.clone()));
                }
                Ok(None)
            }
            Command::Close { id } => self.close_at_open(id, candle, 1.0).map(Some),
            Command::PartialClose { id, fraction } => self.close_at_open(id, candle, fraction).map(Some),
            Command::BreakEven { id } => store.set_break_even(id).map(|_| None),
            Command::SetExits {
                id,
                stop_loss,
                take_profit,
            } => store.replace_exits(id, stop_loss, take_profit).map(|_| None),
            Command::Cancel { id } => {
                store.cancel(id)?;
                #[cfg(feature = "metrics")]
                self.state.events.push(Event::OrderCancelled(candle.time(), id));
                Ok(None)
            }
        }
    }

    fn close_at_open(&mut self, id: TradeId, candle: &Candle, fraction: f64) -> Result<Execution> {
        let record = self
            .state
            .store
            .close(id, candle.open(), candle.time(), CloseReason::Manual, fraction)?;
        self.book_close(&record)?;
        Ok(Execution::Exit { record })
    }

    /// Realizes a closed record in the wallet. The only path to the balance.
    fn book_close(&mut self, record: &Trade) -> Result<()> {
        let TradeState::Closed {
            gross_pnl,
            commission,
            realized_pnl,
            reason,
            ..
        } = *record.state()
        else {
            return Err(Error::Unreachable(format!("trade {} booked while not closed", record.id())));
        };
        self.state.wallet.realize(gross_pnl, commission);
        tracing::info!(id = %record.id(), ?reason, realized_pnl, balance = self.state.wallet.balance(), "position closed");
        #[cfg(feature = "metrics")]
        if let TradeState::Closed { exit_time, .. } = record.state() {
            self.state.events.push(Event::PositionClosed(*exit_time, record.clone()));
        }
        Ok(())
    }

    /// Steps until the feed is exhausted and returns the number of candles processed.
    pub fn run_to_end(&mut self) -> Result<usize> {
        let mut processed = 0;
        while self.step()?.is_some() {
            processed += 1;
        }
        Ok(processed)
    }

    /// Steps until the end, calling `strategy` after every candle.
    ///
    /// Commands the strategy issues are applied at the next candle's open.
    pub fn run<S>(&mut self, mut strategy: S) -> Result<()>
    where
        S: FnMut(&mut Self, &StepReport) -> Result<()>,
    {
        while let Some(report) = self.step()? {
            strategy(self, &report)?;
        }
        Ok(())
    }

    /// Saves the whole mutable state.
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint(self.state.clone())
    }

    /// Restores a state saved by [`Replay::checkpoint`] on this replay.
    pub fn restore(&mut self, checkpoint: &Checkpoint) -> Result<()> {
        if checkpoint.0.cursor > self.feed.len() {
            return Err(Error::CandleNotFound);
        }
        self.state = checkpoint.0.clone();
        self.publish();
        Ok(())
    }

    /// Rebuilds the state as it was after `cursor` candles.
    ///
    /// Starts from scratch and re-issues the journal of user calls, so the
    /// result is exactly what was seen the first time. Calls made after
    /// `cursor` are discarded.
    pub fn rewind_to(&mut self, cursor: usize) -> Result<()> {
        if cursor > self.state.cursor {
            return Err(Error::CandleNotFound);
        }

        let journal: Vec<_> = self
            .state
            .journal
            .iter()
            .filter(|entry| entry.cursor <= cursor)
            .cloned()
            .collect();
        self.reset();

        let mut entries = journal.into_iter().peekable();
        loop {
            let at = self.state.cursor;
            while let Some(entry) = entries.next_if(|e| e.cursor == at) {
                self.reissue(entry)?;
            }
            if at == cursor {
                break;
            }
            self.step()?;
        }

        tracing::info!(cursor, "replay rewound");
        self.publish();
        Ok(())
    }

    fn reissue(&mut self, entry: JournalEntry) -> Result<()> {
        match &entry.issued {
            Issued::Command(command) => {
                if let Command::Submit { id, .. } = command {
                    let reserved = self.state.store.allocate_id();
                    if reserved != *id {
                        return Err(Error::Unreachable(format!(
                            "journal replay reserved {reserved} instead of {id}"
                        )));
                    }
                }
                self.enqueue(command.clone());
            }
            Issued::Annotate(id, patch) => self.annotate_now(*id, patch.clone())?,
        }
        self.state.journal.push(entry);
        Ok(())
    }

    /// Back to the first candle with an empty book.
    pub fn reset(&mut self) {
        self.state = State {
            cursor: 0,
            store: TradeStore::new(self.config.contract_multiplier, self.config.lot_epsilon),
            wallet: {
                let mut wallet = self.state.wallet.clone();
                wallet.reset();
                wallet
            },
            queue: VecDeque::new(),
            journal: Vec::new(),
            #[cfg(feature = "metrics")]
            events: Vec::new(),
        };
        self.publish();
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            cursor: self.state.cursor,
            time: self.current_candle().map(Candle::time),
            stats: self.account_stats(),
            trades: self.state.store.iter().cloned().collect(),
        }
    }

    /// Reader that always sees the last complete snapshot, for another thread.
    pub fn snapshot_reader(&mut self) -> SnapshotReader {
        let snapshot = self.snapshot();
        self.reader.get_or_insert_with(|| SnapshotReader::new(snapshot)).clone()
    }

    fn publish(&self) {
        if let Some(reader) = &self.reader {
            reader.publish(self.snapshot());
        }
    }
}
