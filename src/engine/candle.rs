use chrono::{DateTime, Utc};

use crate::errors::{Error, Result};

/// One OHLC bar of the replayed instrument.
///
/// Candles are immutable once built; use [`CandleBuilder`] to create them.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candle {
    time: DateTime<Utc>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[cfg_attr(feature = "serde", serde(default))]
    volume: f64,
}

impl Candle {
    /// Opening time of the bar.
    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    pub fn open(&self) -> f64 {
        self.open
    }

    pub fn high(&self) -> f64 {
        self.high
    }

    pub fn low(&self) -> f64 {
        self.low
    }

    pub fn close(&self) -> f64 {
        self.close
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    /// Returns `true` if `price` lies inside `[low, high]`.
    pub fn contains(&self, price: f64) -> bool {
        price >= self.low && price <= self.high
    }

    pub(crate) fn validate(&self) -> Result<()> {
        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            return Err(Error::InvalidCandle(format!("prices must be positive and finite: {prices:?}")));
        }
        if self.high < self.open.max(self.close) {
            return Err(Error::InvalidCandle(format!(
                "high {} is below open/close at {}",
                self.high, self.time
            )));
        }
        if self.low > self.open.min(self.close) {
            return Err(Error::InvalidCandle(format!(
                "low {} is above open/close at {}",
                self.low, self.time
            )));
        }
        if !self.volume.is_finite() || self.volume < 0.0 {
            return Err(Error::InvalidCandle(format!("volume {} at {}", self.volume, self.time)));
        }
        Ok(())
    }
}

/// Builder for [`Candle`].
///
/// ```rust
/// use bts_replay::prelude::*;
/// use chrono::DateTime;
///
/// let candle = CandleBuilder::builder()
///     .time(DateTime::from_timestamp(1_700_000_000, 0).unwrap())
///     .open(1.1000)
///     .high(1.1010)
///     .low(1.0990)
///     .close(1.1005)
///     .build()
///     .unwrap();
/// assert!(candle.contains(1.1000));
/// ```
#[derive(Debug, Default)]
pub struct CandleBuilder {
    time: Option<DateTime<Utc>>,
    open: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    close: Option<f64>,
    volume: Option<f64>,
}

impl CandleBuilder {
    pub fn builder() -> Self {
        Self::default()
    }

    pub fn time(mut self, time: DateTime<Utc>) -> Self {
        self.time = Some(time);
        self
    }

    pub fn open(mut self, open: f64) -> Self {
        self.open = Some(open);
        self
    }

    pub fn high(mut self, high: f64) -> Self {
        self.high = Some(high);
        self
    }

    pub fn low(mut self, low: f64) -> Self {
        self.low = Some(low);
        self
    }

    pub fn close(mut self, close: f64) -> Self {
        self.close = Some(close);
        self
    }

    pub fn volume(mut self, volume: f64) -> Self {
        self.volume = Some(volume);
        self
    }

    /// Builds the candle, rejecting missing fields and impossible ranges.
    pub fn build(self) -> Result<Candle> {
        let missing = |field: &str| Error::InvalidCandle(format!("missing {field}"));
        let candle = Candle {
            time: self.time.ok_or_else(|| missing("time"))?,
            open: self.open.ok_or_else(|| missing("open"))?,
            high: self.high.ok_or_else(|| missing("high"))?,
            low: self.low.ok_or_else(|| missing("low"))?,
            close: self.close.ok_or_else(|| missing("close"))?,
            volume: self.volume.unwrap_or_default(),
        };
        candle.validate()?;
        Ok(candle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn time() -> DateTime<Utc> {
        DateTime::from_timestamp(1_515_151_515, 0).unwrap()
    }

    #[test]
    fn build_valid_candle() {
        let candle = CandleBuilder::builder()
            .time(time())
            .open(100.0)
            .high(110.0)
            .low(95.0)
            .close(105.0)
            .volume(3.0)
            .build()
            .unwrap();

        assert_eq!(candle.open(), 100.0);
        assert_eq!(candle.high(), 110.0);
        assert_eq!(candle.low(), 95.0);
        assert_eq!(candle.close(), 105.0);
        assert_eq!(candle.volume(), 3.0);
        assert_eq!(candle.time(), time());
    }

    #[test]
    fn missing_field() {
        let result = CandleBuilder::builder().time(time()).open(1.0).high(1.0).low(1.0).build();
        assert!(matches!(result, Err(Error::InvalidCandle(msg)) if msg.contains("close")));
    }

    #[test]
    fn high_below_close() {
        let result = CandleBuilder::builder()
            .time(time())
            .open(100.0)
            .high(101.0)
            .low(99.0)
            .close(102.0)
            .build();
        assert!(matches!(result, Err(Error::InvalidCandle(_))));
    }

    #[test]
    fn low_above_open() {
        let result = CandleBuilder::builder()
            .time(time())
            .open(100.0)
            .high(105.0)
            .low(100.5)
            .close(104.0)
            .build();
        assert!(matches!(result, Err(Error::InvalidCandle(_))));
    }

    #[test]
    fn non_finite_price() {
        let result = CandleBuilder::builder()
            .time(time())
            .open(f64::NAN)
            .high(105.0)
            .low(99.0)
            .close(104.0)
            .build();
        assert!(matches!(result, Err(Error::InvalidCandle(_))));
    }

    #[test]
    fn contains_bounds() {
        let candle = CandleBuilder::builder()
            .time(time())
            .open(100.0)
            .high(110.0)
            .low(90.0)
            .close(105.0)
            .build()
            .unwrap();
        assert!(candle.contains(90.0));
        assert!(candle.contains(110.0));
        assert!(!candle.contains(89.99));
        assert!(!candle.contains(110.01));
    }
}
