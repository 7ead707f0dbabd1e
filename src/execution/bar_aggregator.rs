use crate::models::MinuteBar;

/// Samples per bar at one sample per second
pub const SAMPLES_PER_BAR: usize = 60;

/// Bar under construction; close is only known at the boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PartialBar {
    open: i64,
    high: i64,
    low: i64,
}

impl PartialBar {
    fn starting_at(price: i64) -> Self {
        Self {
            open: price,
            high: price,
            low: price,
        }
    }

    fn absorb(&mut self, price: i64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
    }
}

/// Builds OHLC bars from a stream of per-second prices.
///
/// The first sample opens a bar. Every `period`-th sample after that
/// updates the running high/low, becomes the close of the finished bar and
/// opens the next one.
#[derive(Debug, Clone)]
pub struct BarAggregator {
    period: usize,
    count: usize,
    current: Option<PartialBar>,
}

impl BarAggregator {
    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
            count: 0,
            current: None,
        }
    }

    /// Feed one sample, returning the completed bar at a boundary
    pub fn push(&mut self, price: i64) -> Option<MinuteBar> {
        if let Some(bar) = self.current.as_mut() {
            bar.absorb(price);
        }

        let mut completed = None;
        if self.count % self.period == 0 {
            if let Some(bar) = self.current.take() {
                completed = Some(MinuteBar {
                    open: bar.open,
                    high: bar.high,
                    low: bar.low,
                    close: price,
                });
            }
            self.current = Some(PartialBar::starting_at(price));
        }

        self.count += 1;
        completed
    }

    #[cfg(test)]
    fn current(&self) -> Option<PartialBar> {
        self.current
    }
}

impl Default for BarAggregator {
    fn default() -> Self {
        Self::new(SAMPLES_PER_BAR)
    }
}
