use crate::types::Stage;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GreenlightError {
    #[error("not initialized: run 'greenlight init'")]
    NotInitialized,

    #[error("invalid item: {field}: {reason}")]
    InvalidItem { field: String, reason: String },

    #[error("duplicate item: fingerprint {0} already recorded")]
    DuplicateItem(String),

    #[error("item not found: {0}")]
    ItemNotFound(String),

    #[error("venture not found: {0}")]
    VentureNotFound(String),

    #[error("venture already exists: {0}")]
    VentureExists(String),

    #[error("invalid slug '{0}': must be lowercase alphanumeric with hyphens")]
    InvalidSlug(String),

    #[error("invalid stage: {0}")]
    InvalidStage(String),

    #[error("invalid transition from {from} to {to}: {reason}")]
    InvalidTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("venture '{0}' is locked by another transition")]
    StageLocked(String),

    #[error("ordering guard failed for '{venture}': requires {required}, currently {actual}")]
    GuardFailed {
        venture: String,
        required: Stage,
        actual: Stage,
    },

    #[error("action not found: {0}")]
    ActionNotFound(String),

    #[error("action {id} is still {status}: cannot {op}")]
    InvalidActionState {
        id: String,
        status: String,
        op: String,
    },

    #[error("unknown threshold field: {0}")]
    UnknownThresholdField(String),

    #[error("threshold {field} out of range: {value} not in [{floor}, {ceil}]")]
    ThresholdOutOfRange {
        field: String,
        value: f64,
        floor: f64,
        ceil: f64,
    },

    #[error("circuit open for '{caller}': retry in {retry_in_secs}s")]
    CircuitOpen { caller: String, retry_in_secs: i64 },

    #[error("notification failed: {0}")]
    Notify(String),

    #[error("store error: {0}")]
    Store(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, GreenlightError>;
