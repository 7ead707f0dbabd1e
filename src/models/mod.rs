use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Side of an order or of the open position
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Side {
    #[serde(rename = "BUY")]
    Long,
    #[serde(rename = "SELL")]
    Short,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }

    /// Wire name used by the exchange
    pub fn as_order_side(self) -> &'static str {
        match self {
            Side::Long => "BUY",
            Side::Short => "SELL",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_order_side())
    }
}

/// Price movement relative to the previous sample
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Stay,
}

impl Direction {
    /// Direction of `price` compared to `previous` (first sample is always `Stay`)
    pub fn between(previous: Option<i64>, price: i64) -> Self {
        match previous {
            Some(prev) if prev < price => Direction::Up,
            Some(prev) if prev > price => Direction::Down,
            _ => Direction::Stay,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Direction::Up => "UP",
            Direction::Down => "DOWN",
            Direction::Stay => "STAY",
        };
        f.write_str(s)
    }
}

/// One price observation per wall-clock second
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSample {
    pub price: i64,
    pub direction: Direction,
    pub observed_at: DateTime<Utc>,
    /// True when the fetch failed and the previous price was reused
    pub stale: bool,
}

/// One-minute OHLC bar built from per-second samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinuteBar {
    pub open: i64,
    pub high: i64,
    pub low: i64,
    pub close: i64,
}

impl fmt::Display for MinuteBar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "O:{} H:{} L:{} C:{}",
            self.open, self.high, self.low, self.close
        )
    }
}

/// Account margin snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Collateral {
    pub evaluated_amount: i64,
    pub open_position_pnl: i64,
}

/// Operational state reported by the exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    Normal,
    Busy,
    VeryBusy,
    SuperBusy,
    NoOrder,
    Stop,
    Unknown(String),
}

impl HealthStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "NORMAL" => HealthStatus::Normal,
            "BUSY" => HealthStatus::Busy,
            "VERY BUSY" => HealthStatus::VeryBusy,
            "SUPER BUSY" => HealthStatus::SuperBusy,
            "NO ORDER" => HealthStatus::NoOrder,
            "STOP" => HealthStatus::Stop,
            other => HealthStatus::Unknown(other.to_string()),
        }
    }

    /// Whether orders are expected to be accepted in this state
    pub fn accepts_orders(&self) -> bool {
        matches!(
            self,
            HealthStatus::Normal | HealthStatus::Busy | HealthStatus::VeryBusy
        )
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthStatus::Normal => "NORMAL",
            HealthStatus::Busy => "BUSY",
            HealthStatus::VeryBusy => "VERY BUSY",
            HealthStatus::SuperBusy => "SUPER BUSY",
            HealthStatus::NoOrder => "NO ORDER",
            HealthStatus::Stop => "STOP",
            HealthStatus::Unknown(raw) => raw,
        };
        f.write_str(s)
    }
}

/// Exchange-side open position (one lot of the instrument)
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangePosition {
    pub side: Side,
    pub size: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    Limit,
    Market,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Limit => f.write_str("LIMIT"),
            OrderType::Market => f.write_str("MARKET"),
        }
    }
}

/// Order to be sent to the exchange
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub side: Side,
    pub price: i64,
    pub size: Decimal,
    pub order_type: OrderType,
}

/// Exchange acknowledgement of an accepted order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderAcceptance {
    pub acceptance_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_between() {
        assert_eq!(Direction::between(None, 100), Direction::Stay);
        assert_eq!(Direction::between(Some(99), 100), Direction::Up);
        assert_eq!(Direction::between(Some(101), 100), Direction::Down);
        assert_eq!(Direction::between(Some(100), 100), Direction::Stay);
    }

    #[test]
    fn test_health_status_parse() {
        assert_eq!(HealthStatus::parse("NORMAL"), HealthStatus::Normal);
        assert_eq!(HealthStatus::parse("VERY BUSY"), HealthStatus::VeryBusy);
        assert_eq!(
            HealthStatus::parse("WEIRD"),
            HealthStatus::Unknown("WEIRD".to_string())
        );
        assert!(HealthStatus::Busy.accepts_orders());
        assert!(!HealthStatus::SuperBusy.accepts_orders());
        assert!(!HealthStatus::Stop.accepts_orders());
    }

    #[test]
    fn test_side_opposite_and_wire_name() {
        assert_eq!(Side::Long.opposite(), Side::Short);
        assert_eq!(Side::Short.opposite(), Side::Long);
        assert_eq!(Side::Long.to_string(), "BUY");
        assert_eq!(Side::Short.to_string(), "SELL");
    }
}
