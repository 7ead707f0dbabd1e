// Price sampling, bar building, position state and order execution
pub mod bar_aggregator;
pub mod executor;
pub mod position_manager;
pub mod price_feed;

pub use bar_aggregator::{BarAggregator, SAMPLES_PER_BAR};
pub use executor::{OrderExecutor, OrderOutcome};
pub use position_manager::{
    half_spread_price, ExitPlan, ExitReason, Position, PositionManager, TrailDecision,
};
pub use price_feed::{PriceSampler, PriceSource};
