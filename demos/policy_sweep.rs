//! # Exit policy sweep
//!
//! Replays one EMA crossover over every combination of EMA period and
//! same-candle exit policy, in parallel.

use bts_replay::prelude::*;
use chrono::Duration;
use ta::{Next, indicators::ExponentialMovingAverage};

struct Parameters;

impl ParameterCombination for Parameters {
    type Output = (usize, ExitPriority);

    fn generate() -> Vec<Self::Output> {
        (10..=60)
            .step_by(10)
            .flat_map(|period| {
                [ExitPriority::StopLossFirst, ExitPriority::TakeProfitFirst]
                    .into_iter()
                    .map(move |priority| (period, priority))
            })
            .collect()
    }
}

fn main() -> anyhow::Result<()> {
    let candles = random_walk(2024, 5000, 1.2700, Duration::minutes(15))?;
    let optimizer = Optimizer::<Parameters>::new(candles);

    let mut results = optimizer.with(
        |&(period, priority)| {
            let ema = ExponentialMovingAverage::new(period).map_err(|e| Error::InvalidConfig(e.to_string()))?;
            let config = ReplayConfig::default()
                .contract_multiplier(100_000.0)
                .commission(CommissionModel::PerLot(7.0))
                .exit_priority(priority);
            Ok((config, ema))
        },
        |replay, ema, report| {
            let close = report.candle.close();
            let average = ema.next(close);
            let flat = replay.account_stats().open_positions == 0 && replay.queued().count() == 0;
            if flat {
                let side = if close > average { Side::Long } else { Side::Short };
                let distance = 0.0010 * side.sign();
                let order = (side, OrderType::Market, 0.2, Some(close - distance), Some(close + 2.0 * distance));
                replay.submit_order(order.into())?;
            }
            Ok(())
        },
    )?;

    results.sort_by(|(_, a), (_, b)| b.balance.total_cmp(&a.balance));
    for ((period, priority), stats) in results {
        println!(
            "ema {period:>3} {priority:<16?} balance {:>10.2} commission {:>8.2}",
            stats.balance, stats.commission_paid
        );
    }

    Ok(())
}
