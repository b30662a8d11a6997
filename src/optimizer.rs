//! Parallel parameter sweeps.
//!
//! Every parameter combination gets its own [`Replay`] over the same candles.
//! Replays stay single-threaded; `rayon` spreads the combinations over the
//! available cores.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::config::ReplayConfig;
use crate::engine::{AccountStats, Candle, NewsCalendar, Replay, StepReport};
use crate::errors::Result;

use rayon::prelude::*;

/// Defines the parameter combinations a sweep tests.
pub trait ParameterCombination: Sync {
    /// A single combination (e.g. `(usize, f64)`).
    type Output: Clone + Send + Sync;

    /// Every combination to test.
    fn generate() -> Vec<Self::Output>;
}

/// Runs one replay per parameter combination and collects the final account figures.
pub struct Optimizer<PC: ParameterCombination> {
    data: Arc<[Candle]>,
    news: NewsCalendar,
    _marker: PhantomData<PC>,
}

impl<PC: ParameterCombination> From<&Replay> for Optimizer<PC> {
    fn from(value: &Replay) -> Self {
        Self {
            data: value.feed().candles().copied().collect(),
            news: value.news().clone(),
            _marker: PhantomData,
        }
    }
}

impl<PC: ParameterCombination> Optimizer<PC> {
    pub fn new(data: impl Into<Arc<[Candle]>>) -> Self {
        Self {
            data: data.into(),
            news: NewsCalendar::default(),
            _marker: PhantomData,
        }
    }

    pub fn with_news(mut self, news: NewsCalendar) -> Self {
        self.news = news;
        self
    }

    /// Replays `strategy` for every combination.
    ///
    /// ### Arguments
    /// * `combinator` - Turns a combination into a replay configuration and the strategy's own state.
    /// * `strategy` - Called after every candle, like [`Replay::run`].
    ///
    /// ### Returns
    /// Each combination with the account figures at the end of its replay, in generation order.
    pub fn with<T, C, S>(&self, combinator: C, strategy: S) -> Result<Vec<(PC::Output, AccountStats)>>
    where
        C: Fn(&PC::Output) -> Result<(ReplayConfig, T)> + Sync,
        S: Fn(&mut Replay, &mut T, &StepReport) -> Result<()> + Sync,
    {
        let num_cpus = num_cpus::get();
        let combinations = PC::generate();
        let chunk_size = combinations.len().div_ceil(num_cpus).max(1);

        combinations
            .par_chunks(chunk_size)
            .map::<_, Result<_>>(|par_combinations| {
                let mut local_results = Vec::with_capacity(par_combinations.len());

                for param_set in par_combinations {
                    let (config, mut state) = combinator(param_set)?;
                    let mut replay = Replay::new(Arc::clone(&self.data), config)?.with_news(self.news.clone());
                    replay.run(|replay, report| strategy(replay, &mut state, report))?;
                    tracing::debug!(balance = replay.balance(), "sweep replay finished");
                    local_results.push((param_set.clone(), replay.account_stats()));
                }

                Ok(local_results)
            })
            .collect::<Result<Vec<_>>>()
            .map(|chunks| chunks.into_iter().flatten().collect())
    }
}

#[cfg(test)]
struct Parameters;

#[cfg(test)]
impl ParameterCombination for Parameters {
    type Output = (usize, f64);

    fn generate() -> Vec<Self::Output> {
        (5..=9)
            .flat_map(|ema| [0.002, 0.004].into_iter().map(move |distance| (ema, distance)))
            .collect()
    }
}

#[cfg(test)]
#[test]
fn optimizer_with_ema() {
    use crate::prelude::*;
    use chrono::Duration;
    use ta::Next;
    use ta::indicators::ExponentialMovingAverage;

    let candles = random_walk(42, 300, 100.0, Duration::hours(1)).unwrap();
    let opt = Optimizer::<Parameters>::new(candles);

    let sweep = |opt: &Optimizer<Parameters>| {
        opt.with(
            |&(period, distance)| {
                let ema = ExponentialMovingAverage::new(period).map_err(|e| Error::InvalidConfig(e.to_string()))?;
                Ok((ReplayConfig::default().commission(CommissionModel::PerLot(0.01)), (ema, distance)))
            },
            |replay, (ema, distance), report| {
                let close = report.candle.close();
                let average = ema.next(close);
                if close > average && replay.store().count(TradeFilter::Open) == 0 && replay.queued().count() == 0 {
                    let distance = close * *distance;
                    let order = (
                        Side::Long,
                        OrderType::Market,
                        1.0,
                        Some(close - distance),
                        Some(close + distance),
                    );
                    replay.submit_order(order.into())?;
                }
                Ok(())
            },
        )
        .unwrap()
    };

    let result = sweep(&opt);
    assert_eq!(result.len(), Parameters::generate().len());
    assert_eq!(result[0].0, (5, 0.002));
    assert!(result.iter().any(|(_, stats)| stats.commission_paid > 0.0));

    // parallel runs are deterministic
    let again = sweep(&opt);
    for ((_, a), (_, b)) in result.iter().zip(&again) {
        assert_eq!(a.balance.to_bits(), b.balance.to_bits());
    }
}
