use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::fmt;

use crate::error::EngineError;
use crate::models::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    LossCut,
    ProfitTake,
    Timeout,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExitReason::LossCut => "LOSS CUT",
            ExitReason::ProfitTake => "PROFIT TAKE",
            ExitReason::Timeout => "TIMEOUT",
        };
        f.write_str(s)
    }
}

/// How an open position is expected to end
#[derive(Debug, Clone, PartialEq)]
pub enum ExitPlan {
    /// Trend: ratcheting trail line, armed once price first passes it
    Trail { trailing: bool, trail_line: i64 },
    /// Scalping: fixed profit target plus a hard deadline
    Scalp {
        profit_take_price: i64,
        close_deadline: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub side: Side,
    pub entry_price: i64,
    pub size: Decimal,
    pub loss_cut_line: i64,
    pub exit_plan: ExitPlan,
    pub opened_at: DateTime<Utc>,
}

impl Position {
    pub fn is_trailing(&self) -> bool {
        matches!(self.exit_plan, ExitPlan::Trail { trailing: true, .. })
    }

    pub fn trail_line(&self) -> Option<i64> {
        match self.exit_plan {
            ExitPlan::Trail { trail_line, .. } => Some(trail_line),
            ExitPlan::Scalp { .. } => None,
        }
    }

    pub fn profit_take_price(&self) -> Option<i64> {
        match self.exit_plan {
            ExitPlan::Scalp {
                profit_take_price, ..
            } => Some(profit_take_price),
            ExitPlan::Trail { .. } => None,
        }
    }

    /// Whole seconds since the entry was accepted
    pub fn held_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.opened_at).num_seconds()
    }

    /// Unrealized P&L at `price`, in settlement currency
    pub fn unrealized_pnl(&self, price: i64) -> Decimal {
        let diff = Decimal::from(price - self.entry_price);
        match self.side {
            Side::Long => diff * self.size,
            Side::Short => -diff * self.size,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} @ {} loss cut: {}",
            self.side, self.size, self.entry_price, self.loss_cut_line
        )?;
        match &self.exit_plan {
            ExitPlan::Trail {
                trailing,
                trail_line,
            } => write!(f, " trail: {} trailing: {}", trail_line, trailing),
            ExitPlan::Scalp {
                profit_take_price,
                close_deadline,
            } => write!(
                f,
                " profit take: {} deadline: {}",
                profit_take_price,
                close_deadline.format("%H:%M:%S")
            ),
        }
    }
}

/// Outcome of one trailing-stop evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum TrailDecision {
    Hold,
    TrailStarted { line: i64 },
    TrailUpdated { from: i64, to: i64 },
    Close { reason: ExitReason, price: i64 },
}

/// Price adjusted for the spread of the side we would trade at.
///
/// Buying pays half the spread above mid; selling receives half below.
pub fn half_spread_price(mid: i64, spread_percentage: f64, side: Side) -> i64 {
    let mid = mid as f64;
    let half = mid * spread_percentage / 200.0;
    match side {
        Side::Long => (mid + half) as i64,
        Side::Short => (mid - half) as i64,
    }
}

fn scale(price: f64, percentage: f64) -> f64 {
    price + price * percentage / 100.0
}

/// Single-position state machine; `None` is flat.
///
/// Entries happen only after the exchange accepted the order, so the
/// state never runs ahead of what the exchange confirmed.
#[derive(Debug, Default)]
pub struct PositionManager {
    position: Option<Position>,
}

impl PositionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    pub fn is_flat(&self) -> bool {
        self.position.is_none()
    }

    pub fn side(&self) -> Option<Side> {
        self.position.as_ref().map(|p| p.side)
    }

    /// Refuse to open a side that is already held locally
    pub fn ensure_can_open(&self, side: Side) -> Result<(), EngineError> {
        match &self.position {
            Some(position) if position.side == side => Err(EngineError::Invariant(format!(
                "attempted to open {} while already holding {}",
                side, position
            ))),
            _ => Ok(()),
        }
    }

    /// Record an accepted trend entry (replaces any reversed position)
    pub fn open_trend(
        &mut self,
        side: Side,
        entry_price: i64,
        size: Decimal,
        trail_percentage: f64,
        loss_cut_percentage: f64,
        now: DateTime<Utc>,
    ) -> &Position {
        let trail_offset = (entry_price as f64 * trail_percentage / 100.0) as i64;
        let loss_cut_offset = (entry_price as f64 * loss_cut_percentage / 100.0) as i64;

        let (trail_line, loss_cut_line) = match side {
            Side::Long => (entry_price + trail_offset, entry_price - loss_cut_offset),
            Side::Short => (entry_price - trail_offset, entry_price + loss_cut_offset),
        };

        self.position.insert(Position {
            side,
            entry_price,
            size,
            loss_cut_line,
            exit_plan: ExitPlan::Trail {
                trailing: false,
                trail_line,
            },
            opened_at: now,
        })
    }

    /// Record an accepted scalping entry.
    ///
    /// Exit levels are derived from the reference price pushed by the spread
    /// in the direction of the entry.
    #[allow(clippy::too_many_arguments)]
    pub fn open_scalp(
        &mut self,
        side: Side,
        reference_price: i64,
        size: Decimal,
        spread_percentage: f64,
        profit_take_percentage: f64,
        loss_cut_percentage: f64,
        close_seconds: i64,
        now: DateTime<Utc>,
    ) -> &Position {
        let reference = reference_price as f64;
        let (entry, profit_take, loss_cut) = match side {
            Side::Long => {
                let adjusted = scale(reference, spread_percentage) as i64;
                (
                    adjusted,
                    scale(adjusted as f64, profit_take_percentage),
                    scale(adjusted as f64, -loss_cut_percentage),
                )
            }
            Side::Short => {
                let adjusted = scale(reference, -spread_percentage) as i64;
                (
                    adjusted,
                    scale(adjusted as f64, -profit_take_percentage),
                    scale(adjusted as f64, loss_cut_percentage),
                )
            }
        };

        self.position.insert(Position {
            side,
            entry_price: entry,
            size,
            loss_cut_line: loss_cut as i64,
            exit_plan: ExitPlan::Scalp {
                profit_take_price: profit_take as i64,
                close_deadline: now + Duration::seconds(close_seconds),
            },
            opened_at: now,
        })
    }

    /// Evaluate the trailing stop at a bar close.
    ///
    /// Loss cut is checked first and wins over a simultaneous trail breach.
    /// The trail line only moves in the position's favor.
    pub fn judge_trail(&mut self, mid: i64, spread_percentage: f64) -> TrailDecision {
        let Some(position) = self.position.as_mut() else {
            return TrailDecision::Hold;
        };
        let side = position.side;
        let loss_cut_line = position.loss_cut_line;
        let ExitPlan::Trail {
            trailing,
            trail_line,
        } = &mut position.exit_plan
        else {
            return TrailDecision::Hold;
        };

        // Closing a long sells at the bid, closing a short buys at the ask
        let price = half_spread_price(mid, spread_percentage, side.opposite());

        let (loss_cut_hit, trail_hit, improved) = match side {
            Side::Long => (price < loss_cut_line, price <= *trail_line, price > *trail_line),
            Side::Short => (price > loss_cut_line, price >= *trail_line, price < *trail_line),
        };

        if loss_cut_hit {
            return TrailDecision::Close {
                reason: ExitReason::LossCut,
                price,
            };
        }
        if *trailing && trail_hit {
            return TrailDecision::Close {
                reason: ExitReason::ProfitTake,
                price,
            };
        }
        if improved {
            let from = *trail_line;
            *trail_line = price;
            if *trailing {
                return TrailDecision::TrailUpdated { from, to: price };
            }
            *trailing = true;
            return TrailDecision::TrailStarted { line: price };
        }

        TrailDecision::Hold
    }

    /// Evaluate a scalping position against its exit levels.
    ///
    /// Order: profit take, loss cut, then timeout.
    pub fn judge_scalp_exit(
        &self,
        price: i64,
        spread_percentage: f64,
        now: DateTime<Utc>,
    ) -> Option<ExitReason> {
        let position = self.position.as_ref()?;
        let ExitPlan::Scalp {
            profit_take_price,
            close_deadline,
        } = position.exit_plan
        else {
            return None;
        };

        // Closing trades across the spread
        let (profit_hit, loss_hit) = match position.side {
            Side::Long => {
                let adjusted = scale(price as f64, -spread_percentage) as i64;
                (adjusted > profit_take_price, adjusted < position.loss_cut_line)
            }
            Side::Short => {
                let adjusted = scale(price as f64, spread_percentage) as i64;
                (adjusted < profit_take_price, adjusted > position.loss_cut_line)
            }
        };

        if profit_hit {
            Some(ExitReason::ProfitTake)
        } else if loss_hit {
            Some(ExitReason::LossCut)
        } else if now > close_deadline {
            Some(ExitReason::Timeout)
        } else {
            None
        }
    }

    /// Forget the local position after its closing order was accepted
    pub fn close(&mut self) -> Option<Position> {
        self.position.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn long_trend(pm: &mut PositionManager) {
        // entry 10000, trail 1% → 10100, loss cut 1% → 9900
        pm.open_trend(Side::Long, 10_000, dec("0.5"), 1.0, 1.0, Utc::now());
    }

    #[test]
    fn test_open_trend_long_levels() {
        let mut pm = PositionManager::new();
        long_trend(&mut pm);

        let position = pm.position().unwrap();
        assert_eq!(position.side, Side::Long);
        assert_eq!(position.trail_line(), Some(10_100));
        assert_eq!(position.loss_cut_line, 9_900);
        assert!(!position.is_trailing());
    }

    #[test]
    fn test_open_trend_short_levels_are_mirrored() {
        let mut pm = PositionManager::new();
        pm.open_trend(Side::Short, 10_000, dec("0.5"), 2.0, 1.0, Utc::now());

        let position = pm.position().unwrap();
        assert_eq!(position.trail_line(), Some(9_800));
        assert_eq!(position.loss_cut_line, 10_100);
    }

    #[test]
    fn test_same_side_entry_is_invariant_violation() {
        let mut pm = PositionManager::new();
        assert!(pm.ensure_can_open(Side::Long).is_ok());

        long_trend(&mut pm);
        let result = pm.ensure_can_open(Side::Long);
        assert!(matches!(result, Err(EngineError::Invariant(_))));

        // Reversal to the other side is allowed
        assert!(pm.ensure_can_open(Side::Short).is_ok());
    }

    #[test]
    fn test_trail_starts_when_price_passes_line() {
        let mut pm = PositionManager::new();
        long_trend(&mut pm);

        // spread 0 keeps bid == mid
        assert_eq!(pm.judge_trail(10_050, 0.0), TrailDecision::Hold);
        assert_eq!(
            pm.judge_trail(10_150, 0.0),
            TrailDecision::TrailStarted { line: 10_150 }
        );
        assert!(pm.position().unwrap().is_trailing());
    }

    #[test]
    fn test_trail_line_is_monotonic_for_long() {
        let mut pm = PositionManager::new();
        long_trend(&mut pm);

        let mids = [10_150, 10_300, 10_250, 10_400, 10_350];
        let mut last_line = pm.position().unwrap().trail_line().unwrap();

        for mid in mids {
            let decision = pm.judge_trail(mid, 0.0);
            if let Some(position) = pm.position() {
                let line = position.trail_line().unwrap();
                assert!(line >= last_line, "trail line went down: {} -> {}", last_line, line);
                last_line = line;
            }
            if matches!(decision, TrailDecision::Close { .. }) {
                break;
            }
        }
    }

    #[test]
    fn test_trail_line_is_monotonic_for_short() {
        let mut pm = PositionManager::new();
        pm.open_trend(Side::Short, 10_000, dec("0.5"), 1.0, 1.0, Utc::now());

        assert_eq!(
            pm.judge_trail(9_850, 0.0),
            TrailDecision::TrailStarted { line: 9_850 }
        );
        assert_eq!(
            pm.judge_trail(9_700, 0.0),
            TrailDecision::TrailUpdated {
                from: 9_850,
                to: 9_700
            }
        );
        assert_eq!(pm.position().unwrap().trail_line(), Some(9_700));
    }

    #[test]
    fn test_trailing_long_closes_when_price_falls_back_to_line() {
        let mut pm = PositionManager::new();
        long_trend(&mut pm);
        pm.judge_trail(10_200, 0.0);

        assert_eq!(
            pm.judge_trail(10_200, 0.0),
            TrailDecision::Close {
                reason: ExitReason::ProfitTake,
                price: 10_200
            }
        );
    }

    #[test]
    fn test_loss_cut_dominates_trail_breach() {
        let mut pm = PositionManager::new();
        long_trend(&mut pm);
        pm.judge_trail(10_200, 0.0);

        // Both below the trail line and below the loss-cut line
        let decision = pm.judge_trail(9_800, 0.0);
        assert_eq!(
            decision,
            TrailDecision::Close {
                reason: ExitReason::LossCut,
                price: 9_800
            }
        );
    }

    #[test]
    fn test_trail_judge_uses_bid_for_long() {
        let mut pm = PositionManager::new();
        long_trend(&mut pm);

        // mid 9_990 with 0.4% spread → bid = trunc(9_990 - 19.98) = 9_970: no loss cut yet
        assert_eq!(pm.judge_trail(9_990, 0.4), TrailDecision::Hold);
        // mid 9_910 → bid = trunc(9_910 - 19.82) = 9_890 < 9_900
        assert!(matches!(
            pm.judge_trail(9_910, 0.4),
            TrailDecision::Close {
                reason: ExitReason::LossCut,
                ..
            }
        ));
    }

    fn short_trend(pm: &mut PositionManager) {
        // entry 10000, trail 1% → 9900, loss cut 1% → 10100
        pm.open_trend(Side::Short, 10_000, dec("0.5"), 1.0, 1.0, Utc::now());
    }

    #[test]
    fn test_short_loss_cut_when_price_rises_past_line() {
        let mut pm = PositionManager::new();
        short_trend(&mut pm);

        assert_eq!(pm.judge_trail(10_100, 0.0), TrailDecision::Hold);
        assert_eq!(
            pm.judge_trail(10_150, 0.0),
            TrailDecision::Close {
                reason: ExitReason::LossCut,
                price: 10_150
            }
        );
    }

    #[test]
    fn test_trail_judge_uses_ask_for_short() {
        let mut pm = PositionManager::new();
        short_trend(&mut pm);

        // mid 10_070 with 0.4% spread → ask = trunc(10_070 + 20.14) = 10_090: still inside
        assert_eq!(pm.judge_trail(10_070, 0.4), TrailDecision::Hold);
        // mid 10_090 → ask = trunc(10_090 + 20.18) = 10_110 > 10_100
        assert_eq!(
            pm.judge_trail(10_090, 0.4),
            TrailDecision::Close {
                reason: ExitReason::LossCut,
                price: 10_110
            }
        );
    }

    #[test]
    fn test_trailing_short_closes_when_price_climbs_back_to_line() {
        let mut pm = PositionManager::new();
        short_trend(&mut pm);

        assert_eq!(
            pm.judge_trail(9_800, 0.0),
            TrailDecision::TrailStarted { line: 9_800 }
        );
        assert_eq!(
            pm.judge_trail(9_800, 0.0),
            TrailDecision::Close {
                reason: ExitReason::ProfitTake,
                price: 9_800
            }
        );
    }

    #[test]
    fn test_short_untrailed_line_touch_holds() {
        let mut pm = PositionManager::new();
        short_trend(&mut pm);

        // At or above the initial line without trailing armed: nothing happens
        assert_eq!(pm.judge_trail(9_900, 0.0), TrailDecision::Hold);
        assert_eq!(pm.judge_trail(9_950, 0.0), TrailDecision::Hold);
        assert!(!pm.position().unwrap().is_trailing());
    }

    #[test]
    fn test_short_loss_cut_dominates_trail_breach() {
        let mut pm = PositionManager::new();
        short_trend(&mut pm);
        pm.judge_trail(9_800, 0.0);

        // Above the trail line and above the loss-cut line
        assert_eq!(
            pm.judge_trail(10_200, 0.0),
            TrailDecision::Close {
                reason: ExitReason::LossCut,
                price: 10_200
            }
        );
    }

    #[test]
    fn test_held_seconds_since_entry() {
        let mut pm = PositionManager::new();
        let opened = Utc::now();
        pm.open_trend(Side::Long, 10_000, dec("0.5"), 1.0, 1.0, opened);

        let position = pm.position().unwrap();
        assert_eq!(position.held_seconds(opened), 0);
        assert_eq!(position.held_seconds(opened + Duration::seconds(90)), 90);
    }

    #[test]
    fn test_open_scalp_long_levels() {
        let mut pm = PositionManager::new();
        let now = Utc::now();
        pm.open_scalp(Side::Long, 1_000_000, dec("0.01"), 0.0, 0.1, 0.2, 60, now);

        let position = pm.position().unwrap();
        assert_eq!(position.profit_take_price(), Some(1_001_000));
        assert_eq!(position.loss_cut_line, 998_000);
        assert_eq!(
            position.exit_plan,
            ExitPlan::Scalp {
                profit_take_price: 1_001_000,
                close_deadline: now + Duration::seconds(60),
            }
        );
    }

    #[test]
    fn test_scalp_exit_order_profit_loss_timeout() {
        let mut pm = PositionManager::new();
        let now = Utc::now();
        pm.open_scalp(Side::Long, 1_000_000, dec("0.01"), 0.0, 0.1, 0.1, 60, now);

        assert_eq!(pm.judge_scalp_exit(1_000_500, 0.0, now), None);
        assert_eq!(
            pm.judge_scalp_exit(1_001_500, 0.0, now),
            Some(ExitReason::ProfitTake)
        );
        assert_eq!(
            pm.judge_scalp_exit(998_500, 0.0, now),
            Some(ExitReason::LossCut)
        );
        assert_eq!(
            pm.judge_scalp_exit(1_000_000, 0.0, now + Duration::seconds(61)),
            Some(ExitReason::Timeout)
        );
        // Exactly at the deadline is still in time
        assert_eq!(
            pm.judge_scalp_exit(1_000_000, 0.0, now + Duration::seconds(60)),
            None
        );
    }

    #[test]
    fn test_scalp_short_profit_take_below_entry() {
        let mut pm = PositionManager::new();
        let now = Utc::now();
        pm.open_scalp(Side::Short, 1_000_000, dec("0.01"), 0.0, 0.1, 0.1, 60, now);

        assert_eq!(pm.position().unwrap().profit_take_price(), Some(999_000));
        assert_eq!(
            pm.judge_scalp_exit(998_000, 0.0, now),
            Some(ExitReason::ProfitTake)
        );
        assert_eq!(
            pm.judge_scalp_exit(1_002_000, 0.0, now),
            Some(ExitReason::LossCut)
        );
    }

    #[test]
    fn test_close_returns_to_flat() {
        let mut pm = PositionManager::new();
        long_trend(&mut pm);

        let closed = pm.close().unwrap();
        assert_eq!(closed.side, Side::Long);
        assert!(pm.is_flat());
        assert!(pm.close().is_none());
    }

    #[test]
    fn test_unrealized_pnl_by_side() {
        let mut pm = PositionManager::new();
        pm.open_trend(Side::Short, 10_000, dec("0.5"), 1.0, 1.0, Utc::now());

        assert_eq!(pm.position().unwrap().unrealized_pnl(9_800), dec("100"));
        assert_eq!(pm.position().unwrap().unrealized_pnl(10_200), dec("-100"));
    }
}
