use crate::config::ThresholdsConfig;
use crate::error::{GreenlightError, Result};
use crate::types::ItemKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Adjustment factors
// ---------------------------------------------------------------------------

/// Approval rate above twice the target: the pipeline is clearly too lenient.
pub const FACTOR_RAISE_FAST: f64 = 1.05;
/// Approval rate above target: nudge upward.
pub const FACTOR_RAISE_SLOW: f64 = 1.02;
/// Two consecutive empty windows: the pipeline is starved, relax the bar.
pub const FACTOR_RELAX: f64 = 0.95;

// ---------------------------------------------------------------------------
// ThresholdField
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdField {
    Problem,
    Solution,
    Feasibility,
    Gate,
}

impl ThresholdField {
    pub fn all() -> &'static [ThresholdField] {
        &[
            ThresholdField::Problem,
            ThresholdField::Solution,
            ThresholdField::Feasibility,
            ThresholdField::Gate,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ThresholdField::Problem => "problem",
            ThresholdField::Solution => "solution",
            ThresholdField::Feasibility => "feasibility",
            ThresholdField::Gate => "gate",
        }
    }
}

impl fmt::Display for ThresholdField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ThresholdField {
    type Err = GreenlightError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "problem" => Ok(ThresholdField::Problem),
            "solution" => Ok(ThresholdField::Solution),
            "feasibility" => Ok(ThresholdField::Feasibility),
            "gate" => Ok(ThresholdField::Gate),
            _ => Err(GreenlightError::UnknownThresholdField(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// ThresholdSnapshot
// ---------------------------------------------------------------------------

/// One row of the append-only threshold log.
///
/// The current thresholds are always the most recent row; rows are never
/// mutated or deleted, so writers only append and readers only take the
/// latest. No read-modify-write race exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdSnapshot {
    pub problem: f64,
    pub solution: f64,
    pub feasibility: f64,
    pub gate: f64,
    pub observed_approval_rate: f64,
    /// FinalGate items the retune window saw. `None` for seed and manual
    /// rows, which must never count as an "empty cycle" toward relaxation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_items: Option<u32>,
    pub rationale: String,
    pub created_at: DateTime<Utc>,
}

impl ThresholdSnapshot {
    /// Initial row written at `init`.
    pub fn seed(cfg: &ThresholdsConfig, now: DateTime<Utc>) -> Self {
        Self {
            problem: cfg.initial_problem,
            solution: cfg.initial_solution,
            feasibility: cfg.initial_feasibility,
            gate: cfg.initial_gate,
            observed_approval_rate: 0.0,
            window_items: None,
            rationale: "initial thresholds".to_string(),
            created_at: now,
        }
    }

    pub fn get(&self, field: ThresholdField) -> f64 {
        match field {
            ThresholdField::Problem => self.problem,
            ThresholdField::Solution => self.solution,
            ThresholdField::Feasibility => self.feasibility,
            ThresholdField::Gate => self.gate,
        }
    }

    /// The gate an item of `kind` is compared against when ingested.
    pub fn for_kind(&self, kind: ItemKind) -> f64 {
        match kind {
            ItemKind::Problem => self.problem,
            ItemKind::Solution => self.solution,
            ItemKind::FinalGate => self.gate,
        }
    }

    /// One controller cycle over the FinalGate scores observed in the window.
    ///
    /// All four fields move in lockstep by the same factor, clamped to the
    /// configured band. A single empty window holds steady; only the second
    /// consecutive empty window relaxes.
    pub fn retune(
        &self,
        window_scores: &[f64],
        cfg: &ThresholdsConfig,
        now: DateTime<Utc>,
    ) -> ThresholdSnapshot {
        let count = window_scores.len();
        let approval_rate = if count == 0 {
            0.0
        } else {
            let approved = window_scores.iter().filter(|s| **s >= self.gate).count();
            approved as f64 / count as f64
        };

        let target = cfg.target_approval_rate;
        let (factor, rationale) = if count == 0 {
            if self.window_items == Some(0) {
                (
                    FACTOR_RELAX,
                    "no gate items for two consecutive cycles; relaxing thresholds by 5%"
                        .to_string(),
                )
            } else {
                (1.0, "no gate items this cycle; holding thresholds".to_string())
            }
        } else if approval_rate > 2.0 * target {
            (
                FACTOR_RAISE_FAST,
                format!(
                    "approval rate {approval_rate:.2} above 2x target {target:.2}; raising thresholds by 5%"
                ),
            )
        } else if approval_rate > target {
            (
                FACTOR_RAISE_SLOW,
                format!(
                    "approval rate {approval_rate:.2} above target {target:.2}; raising thresholds by 2%"
                ),
            )
        } else {
            (
                1.0,
                format!(
                    "approval rate {approval_rate:.2} within target {target:.2}; holding thresholds"
                ),
            )
        };

        let adjust = |old: f64| (old * factor).clamp(cfg.floor, cfg.ceil);
        ThresholdSnapshot {
            problem: adjust(self.problem),
            solution: adjust(self.solution),
            feasibility: adjust(self.feasibility),
            gate: adjust(self.gate),
            observed_approval_rate: approval_rate,
            window_items: Some(count as u32),
            rationale,
            created_at: now,
        }
    }

    /// Out-of-cycle manual override of a single field. Values outside the
    /// configured band are rejected rather than silently clamped.
    pub fn with_override(
        &self,
        field: ThresholdField,
        value: f64,
        cfg: &ThresholdsConfig,
        now: DateTime<Utc>,
    ) -> Result<ThresholdSnapshot> {
        if !value.is_finite() || value < cfg.floor || value > cfg.ceil {
            return Err(GreenlightError::ThresholdOutOfRange {
                field: field.to_string(),
                value,
                floor: cfg.floor,
                ceil: cfg.ceil,
            });
        }
        let mut next = ThresholdSnapshot {
            window_items: None,
            rationale: format!("manual override: {field} set to {value}"),
            created_at: now,
            ..self.clone()
        };
        match field {
            ThresholdField::Problem => next.problem = value,
            ThresholdField::Solution => next.solution = value,
            ThresholdField::Feasibility => next.feasibility = value,
            ThresholdField::Gate => next.gate = value,
        }
        Ok(next)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> ThresholdsConfig {
        ThresholdsConfig::default()
    }

    fn seed() -> ThresholdSnapshot {
        ThresholdSnapshot::seed(&cfg(), Utc::now())
    }

    #[test]
    fn seed_uses_initial_values() {
        let snap = seed();
        assert_eq!(snap.problem, 0.55);
        assert_eq!(snap.solution, 0.60);
        assert_eq!(snap.feasibility, 0.50);
        assert_eq!(snap.gate, 0.70);
        assert_eq!(snap.window_items, None);
    }

    #[test]
    fn high_approval_raises_fast() {
        let prev = seed();
        // 2 of 4 clear the 0.70 gate: rate 0.5 > 2 * 0.15
        let next = prev.retune(&[0.8, 0.9, 0.5, 0.6], &cfg(), Utc::now());
        assert!((next.gate - 0.735).abs() < 1e-9);
        assert!((next.problem - 0.5775).abs() < 1e-9);
        assert!((next.observed_approval_rate - 0.5).abs() < 1e-9);
        assert_eq!(next.window_items, Some(4));
        assert!(next.rationale.contains("above 2x target"));
        // strict increase on every field
        for field in ThresholdField::all() {
            assert!(next.get(*field) > prev.get(*field));
        }
    }

    #[test]
    fn moderate_approval_raises_slow() {
        let prev = seed();
        // 1 of 4: rate 0.25, between target and 2x target
        let next = prev.retune(&[0.8, 0.5, 0.5, 0.5], &cfg(), Utc::now());
        assert!((next.gate - 0.714).abs() < 1e-9);
        assert!(next.rationale.contains("raising thresholds by 2%"));
    }

    #[test]
    fn on_target_holds() {
        let prev = seed();
        // 1 of 8: rate 0.125, below the 0.15 target
        let next = prev.retune(
            &[0.8, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5],
            &cfg(),
            Utc::now(),
        );
        assert_eq!(next.gate, prev.gate);
        assert_eq!(next.problem, prev.problem);
        assert!(next.rationale.contains("holding"));
    }

    #[test]
    fn single_empty_cycle_holds() {
        let prev = seed();
        let next = prev.retune(&[], &cfg(), Utc::now());
        assert_eq!(next.gate, prev.gate);
        assert_eq!(next.window_items, Some(0));
        assert!(next.rationale.contains("no gate items this cycle"));
    }

    #[test]
    fn second_empty_cycle_relaxes() {
        let prev = seed();
        let first = prev.retune(&[], &cfg(), Utc::now());
        let second = first.retune(&[], &cfg(), Utc::now());
        assert!((second.gate - 0.70 * 0.95).abs() < 1e-9);
        for field in ThresholdField::all() {
            assert!(second.get(*field) < first.get(*field));
        }
        assert!(second.rationale.contains("two consecutive cycles"));
    }

    #[test]
    fn relax_bounded_by_floor() {
        let mut prev = seed();
        prev.problem = 0.31;
        prev.window_items = Some(0);
        let next = prev.retune(&[], &cfg(), Utc::now());
        // 0.31 * 0.95 = 0.2945, clamped up to the 0.30 floor
        assert_eq!(next.problem, 0.30);
    }

    #[test]
    fn raise_bounded_by_ceiling() {
        let mut prev = seed();
        prev.gate = 0.94;
        let next = prev.retune(&[0.99, 0.98, 0.97], &cfg(), Utc::now());
        assert_eq!(next.gate, 0.95);
    }

    #[test]
    fn seed_row_never_counts_as_empty_cycle() {
        // seed has window_items = None, so one empty retune after init holds
        let prev = seed();
        assert_eq!(prev.window_items, None);
        let next = prev.retune(&[], &cfg(), Utc::now());
        assert_eq!(next.gate, prev.gate);
    }

    #[test]
    fn override_replaces_single_field() {
        let prev = seed();
        let next = prev
            .with_override(ThresholdField::Gate, 0.80, &cfg(), Utc::now())
            .unwrap();
        assert_eq!(next.gate, 0.80);
        assert_eq!(next.problem, prev.problem);
        assert_eq!(next.window_items, None);
        assert!(next.rationale.contains("manual override"));
    }

    #[test]
    fn override_rejects_out_of_band() {
        let prev = seed();
        assert!(prev
            .with_override(ThresholdField::Gate, 0.99, &cfg(), Utc::now())
            .is_err());
        assert!(prev
            .with_override(ThresholdField::Gate, 0.1, &cfg(), Utc::now())
            .is_err());
        assert!(prev
            .with_override(ThresholdField::Gate, f64::NAN, &cfg(), Utc::now())
            .is_err());
    }

    #[test]
    fn field_roundtrip() {
        use std::str::FromStr;
        for field in ThresholdField::all() {
            assert_eq!(ThresholdField::from_str(field.as_str()).unwrap(), *field);
        }
        assert!(ThresholdField::from_str("bogus").is_err());
    }

    #[test]
    fn for_kind_mapping() {
        let snap = seed();
        assert_eq!(snap.for_kind(ItemKind::Problem), snap.problem);
        assert_eq!(snap.for_kind(ItemKind::Solution), snap.solution);
        assert_eq!(snap.for_kind(ItemKind::FinalGate), snap.gate);
    }
}
