// Order gating
pub mod health_gate;

pub use health_gate::{HealthCheck, HealthGate, UnhealthyReason};
