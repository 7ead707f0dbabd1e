use std::collections::VecDeque;

use crate::models::{Direction, PriceSample, Side};

/// Fixed-capacity FIFO of the most recent samples.
///
/// Oldest samples are evicted once capacity is reached. The entry judge only
/// runs on a full window.
#[derive(Debug, Clone)]
pub struct SignalWindow {
    capacity: usize,
    samples: VecDeque<PriceSample>,
}

impl SignalWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, sample: PriceSample) {
        while self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Entry side implied by the window, if any.
    ///
    /// The move from oldest to newest must strictly exceed
    /// `direction_judge_percentage` of the newest price, and the share of
    /// samples moving that way must reach `count_judge_ratio`.
    pub fn judge(&self, direction_judge_percentage: f64, count_judge_ratio: f64) -> Option<Side> {
        if !self.is_full() {
            return None;
        }
        let first = self.samples.front()?;
        let last = self.samples.back()?;

        let delta = last.price - first.price;
        let range = (last.price as f64 * direction_judge_percentage / 100.0) as i64;

        let side = if delta > range {
            Side::Long
        } else if delta < -range {
            Side::Short
        } else {
            tracing::debug!("Window delta {} within range {}", delta, range);
            return None;
        };

        let ups = self.count(Direction::Up);
        let downs = self.count(Direction::Down);
        let size = self.samples.len() as f64;
        tracing::debug!(
            "Window delta: {} range: {} up: {} down: {}",
            delta,
            range,
            ups,
            downs
        );

        let ratio = match side {
            Side::Long => ups as f64 / size,
            Side::Short => downs as f64 / size,
        };
        (ratio >= count_judge_ratio).then_some(side)
    }

    fn count(&self, direction: Direction) -> usize {
        self.samples
            .iter()
            .filter(|s| s.direction == direction)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    /// Build a window from prices; the first sample is `Stay`
    fn window_of(prices: &[i64]) -> SignalWindow {
        let mut window = SignalWindow::new(prices.len());
        let mut previous = None;
        for &price in prices {
            window.push(PriceSample {
                price,
                direction: Direction::between(previous, price),
                observed_at: Utc::now(),
                stale: false,
            });
            previous = Some(price);
        }
        window
    }

    #[test]
    fn test_rising_window_goes_long() {
        let window = window_of(&[100, 101, 102, 103, 104]);

        assert!(window.is_full());
        assert_eq!(window.judge(0.1, 0.8), Some(Side::Long));
    }

    #[test]
    fn test_falling_window_goes_short() {
        let window = window_of(&[104, 103, 102, 101, 100]);
        assert_eq!(window.judge(0.1, 0.8), Some(Side::Short));
    }

    #[test]
    fn test_partial_window_never_judges() {
        let mut window = SignalWindow::new(5);
        let full = window_of(&[100, 101, 102]);
        for sample in full.samples {
            window.push(sample);
        }
        assert!(!window.is_full());
        assert_eq!(window.judge(0.0, 0.0), None);
    }

    #[test]
    fn test_delta_equal_to_range_does_not_fire() {
        // range = trunc(1_010_000 * 1 / 100) = 10_100, delta = 10_000
        let window = window_of(&[1_000_000, 1_005_000, 1_010_000]);
        assert_eq!(window.judge(1.0, 0.0), None);

        // range = trunc(1_010_000 * 0.5 / 100) = 5_050
        assert_eq!(window.judge(0.5, 0.0), Some(Side::Long));

        // exact equality: range = trunc(200 * 5 / 100) = 10, delta = 10
        let window = window_of(&[190, 195, 200]);
        assert_eq!(window.judge(5.0, 0.0), None);
    }

    #[test]
    fn test_count_ratio_is_inclusive() {
        // 4 ups of 5 samples = 0.8
        let window = window_of(&[100, 101, 102, 103, 104]);
        assert_eq!(window.judge(0.1, 0.8), Some(Side::Long));
        assert_eq!(window.judge(0.1, 0.81), None);
    }

    #[test]
    fn test_choppy_window_fails_count_test() {
        // Net up move but only 2 of 5 samples rose
        let window = window_of(&[100, 110, 105, 106, 104]);
        assert_eq!(window.judge(0.1, 0.6), None);
    }

    #[test]
    fn test_all_stay_window_passes_delta_only_with_zero_ratio() {
        let mut window = SignalWindow::new(3);
        for price in [100, 105, 110] {
            window.push(PriceSample {
                price,
                direction: Direction::Stay,
                observed_at: Utc::now(),
                stale: true,
            });
        }
        assert_eq!(window.judge(0.1, 0.5), None);
        assert_eq!(window.judge(0.1, 0.0), Some(Side::Long));
    }

    #[test]
    fn test_window_evicts_oldest() {
        let mut window = window_of(&[100, 101, 102]);
        window.push(PriceSample {
            price: 90,
            direction: Direction::Down,
            observed_at: Utc::now(),
            stale: false,
        });

        assert_eq!(window.len(), 3);
        // oldest is now 101, newest 90
        assert_eq!(window.judge(0.0, 0.3), Some(Side::Short));

        window.clear();
        assert!(window.is_empty());
    }
}
