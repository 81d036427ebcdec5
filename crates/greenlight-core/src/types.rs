use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// The eleven pipeline stages a venture moves through, in order.
///
/// Derives `Ord` so stage comparisons are index comparisons; the state
/// machine only ever moves a venture to an equal or later stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    SpecPending,
    SpecApproved,
    LegalPending,
    LegalApproved,
    SmokePending,
    SmokeApproved,
    SmokeDone,
    BuildPending,
    BuildRunning,
    BuildDone,
    Launched,
}

impl Stage {
    pub fn all() -> &'static [Stage] {
        &[
            Stage::SpecPending,
            Stage::SpecApproved,
            Stage::LegalPending,
            Stage::LegalApproved,
            Stage::SmokePending,
            Stage::SmokeApproved,
            Stage::SmokeDone,
            Stage::BuildPending,
            Stage::BuildRunning,
            Stage::BuildDone,
            Stage::Launched,
        ]
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn next(self) -> Option<Stage> {
        let all = Stage::all();
        let i = self.index();
        all.get(i + 1).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::SpecPending => "spec_pending",
            Stage::SpecApproved => "spec_approved",
            Stage::LegalPending => "legal_pending",
            Stage::LegalApproved => "legal_approved",
            Stage::SmokePending => "smoke_pending",
            Stage::SmokeApproved => "smoke_approved",
            Stage::SmokeDone => "smoke_done",
            Stage::BuildPending => "build_pending",
            Stage::BuildRunning => "build_running",
            Stage::BuildDone => "build_done",
            Stage::Launched => "launched",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = crate::error::GreenlightError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "spec_pending" => Ok(Stage::SpecPending),
            "spec_approved" => Ok(Stage::SpecApproved),
            "legal_pending" => Ok(Stage::LegalPending),
            "legal_approved" => Ok(Stage::LegalApproved),
            "smoke_pending" => Ok(Stage::SmokePending),
            "smoke_approved" => Ok(Stage::SmokeApproved),
            "smoke_done" => Ok(Stage::SmokeDone),
            "build_pending" => Ok(Stage::BuildPending),
            "build_running" => Ok(Stage::BuildRunning),
            "build_done" => Ok(Stage::BuildDone),
            "launched" => Ok(Stage::Launched),
            _ => Err(crate::error::GreenlightError::InvalidStage(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// ItemKind
// ---------------------------------------------------------------------------

/// Which gate an item is scored against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Problem,
    Solution,
    FinalGate,
}

impl ItemKind {
    pub fn all() -> &'static [ItemKind] {
        &[ItemKind::Problem, ItemKind::Solution, ItemKind::FinalGate]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ItemKind::Problem => "problem",
            ItemKind::Solution => "solution",
            ItemKind::FinalGate => "final_gate",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ItemKind {
    type Err = crate::error::GreenlightError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "problem" => Ok(ItemKind::Problem),
            "solution" => Ok(ItemKind::Solution),
            "final_gate" => Ok(ItemKind::FinalGate),
            _ => Err(crate::error::GreenlightError::InvalidItem {
                field: "kind".to_string(),
                reason: format!("unknown kind '{s}'"),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Recommendation
// ---------------------------------------------------------------------------

/// External accept/reject recommendation attached to an item before scoring.
///
/// The scoring engine folds this in as a multiplier: a rejection halves the
/// composite score, a conditional accept scales by its confidence (never
/// below 0.7), a plain accept leaves it untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Recommendation {
    Accept,
    ConditionalAccept { confidence: f64 },
    Reject,
}

impl Recommendation {
    pub fn multiplier(&self) -> f64 {
        match self {
            Recommendation::Accept => 1.0,
            Recommendation::ConditionalAccept { confidence } => confidence.max(0.7),
            Recommendation::Reject => 0.5,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
