use chrono::{DateTime, Duration, Utc};
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::engine::{Candle, CandleBuilder};
use crate::errors::{Error, Result};

/// Generates `len` seeded random-walk candles starting at `start_price`.
///
/// The same seed always gives the same candles, which makes the walk usable
/// in tests and demos that compare replays bit for bit.
///
/// ### Errors
/// [`Error::InvalidConfig`] when a candle time would run past what `DateTime` can hold.
pub fn random_walk(seed: u64, len: usize, start_price: f64, interval: Duration) -> Result<Vec<Candle>> {
    let mut rng = StdRng::seed_from_u64(seed);
    // 2024-01-01T00:00:00Z
    let start = DateTime::<Utc>::from_timestamp(1_704_067_200, 0).unwrap_or_default();
    let mut open = start_price;
    let mut candles = Vec::with_capacity(len);
    let mut time = start;

    for i in 0..len {
        if i > 0 {
            time = time.checked_add_signed(interval).ok_or_else(|| {
                Error::InvalidConfig(format!("random walk candle {i} is past the last representable time"))
            })?;
        }
        let close = open * (1.0 + rng.random_range(-0.002..0.002));
        let high = open.max(close) * (1.0 + rng.random_range(0.0..0.001));
        let low = open.min(close) * (1.0 - rng.random_range(0.0..0.001));

        let candle = CandleBuilder::builder()
            .time(time)
            .open(open)
            .high(high)
            .low(low)
            .close(close)
            .volume(rng.random_range(100.0..1000.0))
            .build()?;
        candles.push(candle);
        open = close;
    }

    Ok(candles)
}

/// Reads candles from a JSON array.
#[cfg(feature = "serde")]
pub fn candles_from_json_file(path: impl AsRef<std::path::Path>) -> Result<Vec<Candle>> {
    use std::{fs::File, io::BufReader};

    let reader = BufReader::new(File::open(path)?);
    let candles: Vec<Candle> = serde_json::from_reader(reader)?;
    candles.iter().try_for_each(Candle::validate)?;
    Ok(candles)
}

/// Reads a news calendar from a JSON array of events.
#[cfg(feature = "serde")]
pub fn news_from_json_file(path: impl AsRef<std::path::Path>) -> Result<crate::engine::NewsCalendar> {
    use std::{fs::File, io::BufReader};

    let reader = BufReader::new(File::open(path)?);
    let events = serde_json::from_reader(reader)?;
    Ok(crate::engine::NewsCalendar::new(events))
}
