use crate::error::{GreenlightError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;

// ---------------------------------------------------------------------------
// CircuitBreaker
// ---------------------------------------------------------------------------

/// Breaker state for one logical caller.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BreakerState {
    pub consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_until: Option<DateTime<Utc>>,
}

/// Per-caller circuit breaker.
///
/// Consecutive failures at or past the threshold open the circuit for the
/// cooldown; while open, `check` fails fast without attempting the
/// underlying call. A single success resets the count. After the cooldown
/// the next call is allowed through as a probe: its failure re-opens the
/// circuit immediately, its success closes it fully.
///
/// State is local to one process instance.
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    states: Mutex<HashMap<String, BreakerState>>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold,
            cooldown,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Fail fast with `CircuitOpen` while the caller's circuit is open.
    pub fn check(&self, caller: &str, now: DateTime<Utc>) -> Result<()> {
        let mut states = self.states.lock().unwrap();
        if let Some(state) = states.get_mut(caller) {
            if let Some(open_until) = state.open_until {
                if now < open_until {
                    return Err(GreenlightError::CircuitOpen {
                        caller: caller.to_string(),
                        retry_in_secs: (open_until - now).num_seconds().max(1),
                    });
                }
                // cooldown elapsed: allow a probe through
                state.open_until = None;
                tracing::debug!(caller, "circuit cooldown elapsed; probing");
            }
        }
        Ok(())
    }

    /// Any single success resets the failure count to zero.
    pub fn record_success(&self, caller: &str) {
        let mut states = self.states.lock().unwrap();
        if let Some(state) = states.get_mut(caller) {
            if state.consecutive_failures > 0 {
                tracing::debug!(
                    caller,
                    failures = state.consecutive_failures,
                    "circuit reset after success"
                );
            }
            state.consecutive_failures = 0;
            state.open_until = None;
        }
    }

    /// Count a failure; opens the circuit at the threshold. Returns the
    /// updated consecutive-failure count.
    pub fn record_failure(&self, caller: &str, now: DateTime<Utc>) -> u32 {
        let mut states = self.states.lock().unwrap();
        let state = states.entry(caller.to_string()).or_default();
        state.consecutive_failures += 1;
        if state.consecutive_failures >= self.threshold && state.open_until.is_none() {
            state.open_until = Some(now + self.cooldown);
            tracing::warn!(
                caller,
                failures = state.consecutive_failures,
                cooldown_secs = self.cooldown.num_seconds(),
                "circuit opened"
            );
        }
        state.consecutive_failures
    }

    pub fn is_open(&self, caller: &str, now: DateTime<Utc>) -> bool {
        let states = self.states.lock().unwrap();
        states
            .get(caller)
            .and_then(|s| s.open_until)
            .map_or(false, |t| now < t)
    }

    pub fn state(&self, caller: &str) -> Option<BreakerState> {
        let states = self.states.lock().unwrap();
        states.get(caller).cloned()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
