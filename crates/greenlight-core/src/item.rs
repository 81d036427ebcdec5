use crate::error::{GreenlightError, Result};
use crate::types::{ItemKind, Recommendation};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// ItemDraft
// ---------------------------------------------------------------------------

/// Unsanitized candidate item as delivered by an upstream analyzer.
///
/// Drafts carry the raw feature vector and the free-text fields the
/// specificity heuristics inspect. A draft becomes an [`Item`] only after
/// `validate()` passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemDraft {
    pub kind: ItemKind,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub why_now: Option<String>,
    #[serde(default)]
    pub raw_features: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<Recommendation>,
}

impl ItemDraft {
    pub fn new(kind: ItemKind, summary: impl Into<String>) -> Self {
        Self {
            kind,
            summary: summary.into(),
            target: None,
            evidence: None,
            why_now: None,
            raw_features: BTreeMap::new(),
            decision: None,
        }
    }

    /// Rejects drafts that must never enter the pipeline: empty summary,
    /// empty feature vector, non-finite feature values, or a non-finite
    /// recommendation confidence.
    pub fn validate(&self) -> Result<()> {
        if self.summary.trim().is_empty() {
            return Err(GreenlightError::InvalidItem {
                field: "summary".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if self.raw_features.is_empty() {
            return Err(GreenlightError::InvalidItem {
                field: "raw_features".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        for (name, value) in &self.raw_features {
            if !value.is_finite() {
                return Err(GreenlightError::InvalidItem {
                    field: format!("raw_features.{name}"),
                    reason: format!("value {value} is not finite"),
                });
            }
        }
        if let Some(Recommendation::ConditionalAccept { confidence }) = &self.decision {
            if !confidence.is_finite() {
                return Err(GreenlightError::InvalidItem {
                    field: "decision.confidence".to_string(),
                    reason: format!("value {confidence} is not finite"),
                });
            }
        }
        Ok(())
    }

    /// Content hash used as the dedup key: sha256 over kind, normalized
    /// summary, and normalized target. Whitespace and case differences do
    /// not produce distinct fingerprints.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.kind.as_str().as_bytes());
        hasher.update(b"|");
        hasher.update(normalize(&self.summary).as_bytes());
        hasher.update(b"|");
        hasher.update(normalize(self.target.as_deref().unwrap_or("")).as_bytes());
        hex_lower(&hasher.finalize())
    }
}

// ---------------------------------------------------------------------------
// Item
// ---------------------------------------------------------------------------

/// A validated candidate item, scored exactly once then frozen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: Uuid,
    pub kind: ItemKind,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub why_now: Option<String>,
    pub raw_features: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub composite_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<Recommendation>,
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
}

impl Item {
    pub fn from_draft(draft: ItemDraft, now: DateTime<Utc>) -> Self {
        let fingerprint = draft.fingerprint();
        Self {
            id: Uuid::new_v4(),
            kind: draft.kind,
            summary: draft.summary,
            target: draft.target,
            evidence: draft.evidence,
            why_now: draft.why_now,
            raw_features: draft.raw_features,
            composite_score: None,
            decision: draft.decision,
            fingerprint,
            created_at: now,
        }
    }

    /// Stores the composite score. An item is scored exactly once; a second
    /// call is an error rather than a silent overwrite.
    pub fn record_score(&mut self, score: f64) -> Result<()> {
        if self.composite_score.is_some() {
            return Err(GreenlightError::InvalidItem {
                field: "composite_score".to_string(),
                reason: "item already scored".to_string(),
            });
        }
        self.composite_score = Some(score);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Lowercase + collapse runs of whitespace to single spaces.
fn normalize(s: &str) -> String {
    s.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

pub(crate) fn hex_lower(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn draft_with_features(pairs: &[(&str, f64)]) -> ItemDraft {
        let mut draft = ItemDraft::new(ItemKind::Problem, "checkout drop-off on mobile");
        for (name, value) in pairs {
            draft.raw_features.insert(name.to_string(), *value);
        }
        draft
    }

    #[test]
    fn validate_accepts_complete_draft() {
        let draft = draft_with_features(&[("severity", 0.8), ("frequency", 0.6)]);
        assert!(draft.validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_summary() {
        let mut draft = draft_with_features(&[("severity", 0.8)]);
        draft.summary = "   ".to_string();
        assert!(draft.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_features() {
        let draft = ItemDraft::new(ItemKind::Problem, "something");
        assert!(draft.validate().is_err());
    }

    #[test]
    fn validate_rejects_non_finite_feature() {
        let draft = draft_with_features(&[("severity", f64::NAN)]);
        assert!(draft.validate().is_err());
        let draft = draft_with_features(&[("severity", f64::INFINITY)]);
        assert!(draft.validate().is_err());
    }

    #[test]
    fn validate_rejects_non_finite_confidence() {
        let mut draft = draft_with_features(&[("severity", 0.5)]);
        draft.decision = Some(Recommendation::ConditionalAccept {
            confidence: f64::NAN,
        });
        assert!(draft.validate().is_err());
    }

    #[test]
    fn fingerprint_ignores_case_and_whitespace() {
        let mut a = ItemDraft::new(ItemKind::Problem, "Checkout   Drop-off");
        a.target = Some("SMB retailers  in EU".to_string());
        let mut b = ItemDraft::new(ItemKind::Problem, "checkout drop-off");
        b.target = Some("smb retailers in eu".to_string());
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_distinguishes_kind() {
        let a = ItemDraft::new(ItemKind::Problem, "checkout drop-off");
        let b = ItemDraft::new(ItemKind::Solution, "checkout drop-off");
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn score_recorded_once() {
        let draft = draft_with_features(&[("severity", 0.8)]);
        let mut item = Item::from_draft(draft, Utc::now());
        item.record_score(0.71).unwrap();
        assert_eq!(item.composite_score, Some(0.71));
        assert!(item.record_score(0.9).is_err());
        assert_eq!(item.composite_score, Some(0.71));
    }
}
