use std::sync::Arc;

use crate::engine::Candle;
use crate::errors::{Error, Result};

/// Ordered, finite and restartable sequence of candles.
///
/// The feed only moves a cursor over shared, immutable data, so cloning it or
/// rewinding it is cheap.
#[derive(Debug, Clone)]
pub struct CandleFeed {
    data: Arc<[Candle]>,
    cursor: usize,
}

impl CandleFeed {
    /// Creates a feed, checking that candles are valid and strictly ascending in time.
    pub fn new(data: impl Into<Arc<[Candle]>>) -> Result<Self> {
        let data = data.into();
        if data.is_empty() {
            return Err(Error::CandleDataEmpty);
        }
        for candle in data.iter() {
            candle.validate()?;
        }
        if let Some(index) = data
            .windows(2)
            .position(|pair| pair[1].time() <= pair[0].time())
        {
            return Err(Error::UnorderedCandles { index: index + 1 });
        }
        Ok(Self { data, cursor: 0 })
    }

    /// Number of candles in the feed.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Always `false`: an empty feed cannot be built.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Index of the next candle `next()` will yield.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Returns `true` once every candle has been yielded.
    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.data.len()
    }

    /// Candle at `index`, independent of the cursor.
    pub fn get(&self, index: usize) -> Option<&Candle> {
        self.data.get(index)
    }

    /// Next candle without advancing.
    pub fn peek(&self) -> Option<&Candle> {
        self.data.get(self.cursor)
    }

    /// Last candle yielded, if any.
    pub fn last_seen(&self) -> Option<&Candle> {
        self.cursor.checked_sub(1).and_then(|i| self.data.get(i))
    }

    /// Moves the cursor back to the first candle.
    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    /// Moves the cursor so that the next candle yielded is `index`.
    pub fn seek(&mut self, index: usize) -> Result<()> {
        if index > self.data.len() {
            return Err(Error::CandleNotFound);
        }
        self.cursor = index;
        Ok(())
    }

    /// Iterator over every candle, ignoring the cursor.
    pub fn candles(&self) -> std::slice::Iter<'_, Candle> {
        self.data.iter()
    }
}

impl Iterator for CandleFeed {
    type Item = Candle;

    fn next(&mut self) -> Option<Self::Item> {
        let candle = self.data.get(self.cursor).copied()?;
        self.cursor += 1;
        Some(candle)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.data.len().saturating_sub(self.cursor);
        (remaining, Some(remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::CandleBuilder;
    use chrono::{DateTime, Duration};

    fn candles(n: i64) -> Vec<Candle> {
        let start = DateTime::from_timestamp(1_515_151_515, 0).unwrap();
        (0..n)
            .map(|i| {
                let base = 100.0 + i as f64;
                CandleBuilder::builder()
                    .time(start + Duration::minutes(i))
                    .open(base)
                    .high(base + 2.0)
                    .low(base - 2.0)
                    .close(base + 1.0)
                    .build()
                    .unwrap()
            })
            .collect()
    }

    #[test]
    fn empty_feed() {
        assert!(matches!(CandleFeed::new(Vec::<Candle>::new()), Err(Error::CandleDataEmpty)));
    }

    #[test]
    fn duplicate_timestamps() {
        let mut data = candles(3);
        data[2] = data[1];
        assert!(matches!(CandleFeed::new(data), Err(Error::UnorderedCandles { index: 2 })));
    }

    #[test]
    fn iterate_and_rewind() {
        let mut feed = CandleFeed::new(candles(3)).unwrap();
        let first = feed.next().unwrap();
        assert_eq!(feed.cursor(), 1);
        assert_eq!(feed.last_seen(), Some(&first));

        assert_eq!(feed.by_ref().count(), 2);
        assert!(feed.is_exhausted());
        assert!(feed.next().is_none());

        feed.rewind();
        assert_eq!(feed.next(), Some(first));
    }

    #[test]
    fn seek_and_peek() {
        let mut feed = CandleFeed::new(candles(5)).unwrap();
        feed.seek(3).unwrap();
        assert_eq!(feed.peek().map(|c| c.open()), Some(103.0));
        assert_eq!(feed.size_hint(), (2, Some(2)));
        assert!(feed.seek(5).is_ok());
        assert!(feed.is_exhausted());
        assert!(matches!(feed.seek(6), Err(Error::CandleNotFound)));
    }
}
