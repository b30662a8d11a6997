//! # Manual replay session
//!
//! Drives the replay the way a chart UI would: one candle at a time, with a
//! pending order, a journal note, a partial close, a break-even move and a
//! rewind. A second thread watches the account through a snapshot reader.

use std::sync::mpsc;
use std::thread;

use bts_replay::prelude::*;
use chrono::Duration;

fn main() -> anyhow::Result<()> {
    let candles = random_walk(7, 400, 1.0850, Duration::minutes(5))?;
    let news = NewsCalendar::new(vec![NewsEvent {
        time: candles[120].time() + Duration::minutes(2),
        currency: "EUR".into(),
        title: "ECB rate decision".into(),
        impact: Impact::High,
    }]);
    let filter = NewsFilter {
        min_impact: Impact::High,
        window_minutes: 30,
    };

    let config = ReplayConfig::default()
        .contract_multiplier(100_000.0)
        .commission(CommissionModel::PerLot(6.0));
    let mut replay = Replay::new(candles, config)?.with_news(news);

    let (done, finished) = mpsc::channel::<()>();
    let reader = replay.snapshot_reader();
    let watcher = thread::spawn(move || {
        let mut last = None;
        while finished.try_recv().is_err() {
            let snapshot = reader.load();
            if last != Some(snapshot.cursor) && snapshot.cursor % 100 == 0 {
                println!("[watcher] candle {} equity {:.2}", snapshot.cursor, snapshot.stats.equity);
                last = Some(snapshot.cursor);
            }
            thread::yield_now();
        }
    });

    // scroll forward to a setup
    for _ in 0..50 {
        replay.step()?;
    }

    let price = replay.current_price();
    let entry = price - 0.0005;
    let order = (Side::Long, OrderType::Limit(entry), 1.0, Some(entry - 0.0015), Some(entry + 0.0045));
    let id = replay.submit_order(order.into())?;
    replay.annotate(id, AnnotationPatch::default().notes("pullback to value").tags(["eurusd", "m5"]))?;
    println!("placed {id} at {entry:.5}");

    let checkpoint = replay.checkpoint();
    let mut halved = false;
    while let Some(report) = replay.step()? {
        for (command, err) in &report.rejected {
            println!("rejected {command:?}: {err}");
        }
        if !report.news.is_empty() {
            println!("news at candle {}: {}", report.index, report.news[0].title);
        }

        let Some(trade) = replay.store().get(id) else {
            break;
        };
        if trade.is_closed() {
            println!("{id} closed: {:?}", trade.state());
            break;
        }
        if trade.is_pending() && filter.blocks(replay.news(), report.candle.time()) {
            println!("cancelling {id} ahead of high impact news");
            replay.cancel_order(id)?;
            continue;
        }

        let floating = trade.floating_pnl(report.candle.close(), replay.store().contract_multiplier());
        if !halved && floating.is_some_and(|pnl| pnl > 15.0) {
            replay.partial_close(id)?;
            replay.set_break_even(id)?;
            halved = true;
        }
    }

    for trade in replay.list_positions(TradeFilter::Closed) {
        println!("closed record {} lot {:.2} pnl {:?}", trade.id(), trade.lot_size(), trade.realized_pnl());
    }
    println!("{:?}", replay.account_stats());

    // what if the trade had been left alone?
    replay.restore(&checkpoint)?;
    replay.run_to_end()?;
    println!("untouched: balance {:.2}", replay.balance());

    replay.rewind_to(50)?;
    println!("rewound to candle {}, {} queued", replay.cursor(), replay.queued().count());

    done.send(())?;
    watcher.join().map_err(|_| anyhow::anyhow!("watcher panicked"))?;
    Ok(())
}
