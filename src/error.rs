use thiserror::Error;

/// Failure of a single exchange call.
///
/// The engine treats every variant as "unavailable": it skips the cycle,
/// reuses a cached value or reports the order as failed.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("exchange returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("empty response from {0}")]
    Empty(&'static str),

    #[error("retries exhausted for {endpoint} after {attempts} attempts")]
    RetriesExhausted { endpoint: String, attempts: u32 },
}

/// Conditions under which the engine must stop.
///
/// Anything that reaches a loop boundary as an `EngineError` ends the
/// process through the orderly shutdown path.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("exchange still unhealthy after {attempts} checks (status: {status})")]
    ExchangeUnhealthy { attempts: u32, status: String },

    #[error("internal invariant violated: {0}")]
    Invariant(String),

    #[error("no price available to {0}")]
    PriceUnavailable(&'static str),

    #[error("clearing order was not accepted: {0}")]
    ClearRejected(String),

    #[error("exchange call failed during {context}: {source}")]
    Api {
        context: &'static str,
        #[source]
        source: ApiError,
    },
}

impl EngineError {
    pub fn api(context: &'static str, source: ApiError) -> Self {
        EngineError::Api { context, source }
    }
}

/// Invalid settings detected before the engine starts
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}
