use crate::error::{GreenlightError, Result};
use crate::types::Stage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

/// Weight of the urgency component in the stored priority score.
pub const URGENCY_WEIGHT: f64 = 0.35;
/// Weight of the importance component in the stored priority score.
pub const IMPORTANCE_WEIGHT: f64 = 0.25;

/// Monotone combination of base priority with urgency and importance.
///
/// Computed once at enqueue time and stored, so queue order stays stable
/// while an action is in flight. Base priority is clamped to [0, 10],
/// urgency and importance to [0, 1].
pub fn priority_score(priority: f64, urgency: f64, importance: f64) -> f64 {
    let base = priority.clamp(0.0, 10.0);
    let score = base
        * (1.0 + URGENCY_WEIGHT * urgency.clamp(0.0, 1.0)
            + IMPORTANCE_WEIGHT * importance.clamp(0.0, 1.0));
    (score * 10_000.0).round() / 10_000.0
}

// ---------------------------------------------------------------------------
// ActionStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a queue action.
///
/// Transitions are one-way: `Pending` moves into exactly one terminal state
/// and never back. Completing an already-terminal action is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Completed,
    Rejected,
    Skipped,
    Expired,
}

impl ActionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ActionStatus::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActionStatus::Pending => "pending",
            ActionStatus::Completed => "completed",
            ActionStatus::Rejected => "rejected",
            ActionStatus::Skipped => "skipped",
            ActionStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ActionKind / ActionPayload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    ProblemReview,
    SolutionReview,
    GateDecision,
    StageApproval,
    OrderingAlert,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::ProblemReview => "problem_review",
            ActionKind::SolutionReview => "solution_review",
            ActionKind::GateDecision => "gate_decision",
            ActionKind::StageApproval => "stage_approval",
            ActionKind::OrderingAlert => "ordering_alert",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific payload, one schema per action kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionPayload {
    /// A discovery item cleared the problem threshold.
    ProblemReview { item_id: Uuid, score: f64 },
    /// A solution item cleared the solution and feasibility thresholds.
    SolutionReview { item_id: Uuid, score: f64 },
    /// A final-gate item cleared the gate threshold; approval creates a
    /// venture at the first pipeline stage.
    GateDecision {
        item_id: Uuid,
        score: f64,
        threshold: f64,
    },
    /// A venture is ready to move to its next stage.
    StageApproval {
        venture_slug: String,
        from: Stage,
        to: Stage,
    },
    /// A strict ordering guard failed; the operator must intervene.
    OrderingAlert {
        venture_slug: String,
        required: Stage,
        actual: Stage,
    },
}

impl ActionPayload {
    pub fn kind(&self) -> ActionKind {
        match self {
            ActionPayload::ProblemReview { .. } => ActionKind::ProblemReview,
            ActionPayload::SolutionReview { .. } => ActionKind::SolutionReview,
            ActionPayload::GateDecision { .. } => ActionKind::GateDecision,
            ActionPayload::StageApproval { .. } => ActionKind::StageApproval,
            ActionPayload::OrderingAlert { .. } => ActionKind::OrderingAlert,
        }
    }
}

// ---------------------------------------------------------------------------
// PendingAction
// ---------------------------------------------------------------------------

/// A durable queue row awaiting a human decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingAction {
    pub id: Uuid,
    pub user_id: String,
    pub kind: ActionKind,
    pub title: String,
    pub description: String,
    pub payload: ActionPayload,
    pub priority_score: f64,
    pub status: ActionStatus,
    /// Operator note or failure line surfaced on this action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl PendingAction {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        user_id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        payload: ActionPayload,
        priority: f64,
        urgency: f64,
        importance: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            kind: payload.kind(),
            title: title.into(),
            description: description.into(),
            payload,
            priority_score: priority_score(priority, urgency, importance),
            status: ActionStatus::Pending,
            note: None,
            created_at: now,
            completed_at: None,
        }
    }

    /// One-way transition into a terminal status.
    ///
    /// Returns `true` if the transition happened, `false` if the action was
    /// already terminal (idempotent no-op; the stored status and note are
    /// left untouched). `status` itself must be terminal.
    pub fn finish(
        &mut self,
        status: ActionStatus,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        if !status.is_terminal() {
            return Err(GreenlightError::InvalidActionState {
                id: self.id.to_string(),
                status: self.status.to_string(),
                op: format!("finish with non-terminal status '{status}'"),
            });
        }
        if self.status.is_terminal() {
            return Ok(false);
        }
        self.status = status;
        self.note = note;
        self.completed_at = Some(now);
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
