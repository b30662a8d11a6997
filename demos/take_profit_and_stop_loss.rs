//! # Trend following with take-profit and stop-loss
//!
//! Buys when the close is above a 50 EMA and the MACD histogram is positive,
//! with a 1:3 risk/reward bracket. The bracket is matched inside each candle,
//! so a stop and a target in the same candle resolve stop-loss first.

use bts_replay::prelude::*;
use chrono::Duration;
use ta::{
    indicators::{
        ExponentialMovingAverage, MovingAverageConvergenceDivergence, MovingAverageConvergenceDivergenceOutput,
    },
    *,
};

fn main() -> anyhow::Result<()> {
    let candles = random_walk(42, 3000, 1.1000, Duration::minutes(15))?;
    let config = ReplayConfig::default()
        .contract_multiplier(100_000.0)
        .commission(CommissionModel::PerLot(7.0));
    let mut replay = Replay::new(candles.clone(), config)?;
    let mut ema = ExponentialMovingAverage::new(50)?;
    let mut macd = MovingAverageConvergenceDivergence::default();

    replay.run(|replay, report| {
        let close = report.candle.close();
        let output = ema.next(close);
        let MovingAverageConvergenceDivergenceOutput { histogram, .. } = macd.next(close);

        let flat = replay.account_stats().open_positions == 0 && replay.queued().count() == 0;
        if flat && close > output && histogram > 0.0 {
            let order = (
                Side::Long,
                OrderType::Market,
                0.1,
                Some(close.subpercent(0.1)),
                // 1/3 RR
                Some(close.addpercent(0.3)),
            );
            replay.submit_order(order.into())?;
        }

        Ok(())
    })?;

    #[cfg(feature = "metrics")]
    {
        let metrics = Metrics::from(&replay);
        println!("{metrics}");
    }

    #[cfg(not(feature = "metrics"))]
    {
        let stats = replay.account_stats();
        let trades = replay.store().count(TradeFilter::Closed);
        println!("trades {trades}");
        println!(
            "balance {:.2} ({:.2}%)",
            stats.balance,
            stats.starting_balance.change(stats.balance)
        );
    }

    let first_price = candles.first().map(Candle::open).unwrap_or_default();
    let last_price = candles.last().map(Candle::close).unwrap_or_default();
    println!("buy and hold {:.2}%", first_price.change(last_price));

    Ok(())
}
