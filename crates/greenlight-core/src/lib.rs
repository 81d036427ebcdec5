pub mod breaker;
pub mod config;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod io;
pub mod item;
pub mod notify;
pub mod paths;
pub mod pipeline;
pub mod queue;
pub mod retry;
pub mod scoring;
pub mod session;
pub mod store;
pub mod threshold;
pub mod types;

pub use error::{GreenlightError, Result};
