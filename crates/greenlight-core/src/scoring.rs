use crate::error::Result;
use crate::item::ItemDraft;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Tuning constants
// ---------------------------------------------------------------------------

/// Feature value assumed when a weighted feature is absent from the vector.
pub const NEUTRAL_FEATURE: f64 = 0.5;

/// Specificity deltas, folded into the raw score before compression.
/// Target adjustments are mutually exclusive, as are the evidence pair.
pub const GENERIC_TARGET_PENALTY: f64 = 0.20;
pub const QUALIFIED_TARGET_BONUS: f64 = 0.10;
pub const THIN_EVIDENCE_PENALTY: f64 = 0.15;
pub const SOURCED_EVIDENCE_BONUS: f64 = 0.10;
pub const MISSING_WHY_NOW_PENALTY: f64 = 0.10;

/// Minimum lengths before the corresponding text counts as present.
pub const MIN_QUALIFIED_TARGET_LEN: usize = 20;
pub const MIN_EVIDENCE_LEN: usize = 40;
pub const MIN_WHY_NOW_LEN: usize = 12;

const SCORE_DECIMALS: f64 = 10_000.0;

// ---------------------------------------------------------------------------
// Scorer
// ---------------------------------------------------------------------------

/// External feature-vector oracle.
///
/// Implementations call whatever upstream analyzer produces raw features for
/// a draft; the engine wraps every call in retry + circuit breaker, so
/// implementations surface transient failures as plain errors.
pub trait Scorer: Send + Sync {
    fn score(&self, draft: &ItemDraft) -> Result<BTreeMap<String, f64>>;
}

// ---------------------------------------------------------------------------
// Composite score
// ---------------------------------------------------------------------------

/// Full scoring path: validate, weight, adjust for specificity, apply the
/// decision multiplier, compress, round. Deterministic for identical inputs.
pub fn compute_score(
    draft: &ItemDraft,
    weights: &BTreeMap<String, f64>,
    gamma: f64,
) -> Result<f64> {
    draft.validate()?;
    let mut raw = weighted_raw(&draft.raw_features, weights);
    raw += target_adjustment(draft.target.as_deref());
    raw += evidence_adjustment(draft.evidence.as_deref());
    raw += why_now_adjustment(draft.why_now.as_deref());
    if let Some(decision) = &draft.decision {
        raw *= decision.multiplier();
    }
    Ok(round_score(compress(raw, gamma)))
}

/// Weighted sum over the configured weight vector. Each feature is clamped
/// to [0, 1]; a feature missing from the vector contributes the neutral 0.5.
/// Weights are not required to sum to 1 (documented, not enforced).
pub fn weighted_raw(features: &BTreeMap<String, f64>, weights: &BTreeMap<String, f64>) -> f64 {
    weights
        .iter()
        .map(|(name, weight)| {
            let value = features.get(name).copied().unwrap_or(NEUTRAL_FEATURE);
            weight * value.clamp(0.0, 1.0)
        })
        .sum()
}

/// Non-linear compression: `clamp(raw, 0, 1) ^ gamma` with gamma > 1.
/// Separates mediocre from excellent candidates instead of letting scores
/// cluster near the top of the range.
pub fn compress(raw: f64, gamma: f64) -> f64 {
    raw.clamp(0.0, 1.0).powf(gamma)
}

/// Round to 4 decimal places.
pub fn round_score(score: f64) -> f64 {
    (score * SCORE_DECIMALS).round() / SCORE_DECIMALS
}

// ---------------------------------------------------------------------------
// Batch normalization
// ---------------------------------------------------------------------------

/// Remap a batch of scores onto a controlled descending band.
///
/// `best = min(max_observed, cap)` (never below `floor`); ranks step down
/// linearly from `best` to `floor`. Ties keep their original batch order.
/// A single-element batch gets `best`. Used for discovery items scored
/// many-at-once, where per-item scores otherwise cluster near 1.0.
pub fn normalize_batch(scores: &[f64], cap: f64, floor: f64) -> Vec<f64> {
    if scores.is_empty() {
        return Vec::new();
    }
    let max_observed = scores.iter().copied().fold(f64::MIN, f64::max);
    let best = max_observed.min(cap).max(floor);
    if scores.len() == 1 {
        return vec![round_score(best)];
    }

    let step = (best - floor) / (scores.len() - 1) as f64;
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| {
        scores[b]
            .partial_cmp(&scores[a])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });

    let mut out = vec![0.0; scores.len()];
    for (rank, &idx) in order.iter().enumerate() {
        out[idx] = round_score(best - step * rank as f64);
    }
    out
}

// ---------------------------------------------------------------------------
// Specificity heuristics
// ---------------------------------------------------------------------------

static GENERIC_TARGET_RE: OnceLock<Regex> = OnceLock::new();
static QUALIFIER_RE: OnceLock<Regex> = OnceLock::new();
static SOURCE_MARKER_RE: OnceLock<Regex> = OnceLock::new();

fn generic_target_re() -> &'static Regex {
    GENERIC_TARGET_RE.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*(every(one|body)|anyone|all\s+(users|people|companies|businesses)|people|users|consumers|customers|the\s+(public|world)|general\s+(public|audience))\s*$",
        )
        .unwrap()
    })
}

fn qualifier_re() -> &'static Regex {
    QUALIFIER_RE.get_or_init(|| {
        Regex::new(r"(?i)\b(in|with|who|at|under|over|between|using|running|aged|based)\b").unwrap()
    })
}

fn source_marker_re() -> &'static Regex {
    SOURCE_MARKER_RE.get_or_init(|| {
        Regex::new(
            r"(?i)(according to|survey|study|report|interview|benchmark|dataset|respondents|cohort|n\s*=|%)",
        )
        .unwrap()
    })
}

/// Generic audience text (or no target at all) is penalized; a named
/// segment long enough to carry a qualifier earns the bonus. Anything in
/// between is neutral.
pub fn target_adjustment(target: Option<&str>) -> f64 {
    match target {
        None => -GENERIC_TARGET_PENALTY,
        Some(t) if t.trim().is_empty() || generic_target_re().is_match(t) => {
            -GENERIC_TARGET_PENALTY
        }
        Some(t) if t.trim().len() >= MIN_QUALIFIED_TARGET_LEN && qualifier_re().is_match(t) => {
            QUALIFIED_TARGET_BONUS
        }
        Some(_) => 0.0,
    }
}

/// Thin evidence is penalized; evidence carrying both a number and a source
/// marker earns the bonus.
pub fn evidence_adjustment(evidence: Option<&str>) -> f64 {
    match evidence {
        None => -THIN_EVIDENCE_PENALTY,
        Some(e) if e.trim().len() < MIN_EVIDENCE_LEN => -THIN_EVIDENCE_PENALTY,
        Some(e) if e.chars().any(|c| c.is_ascii_digit()) && source_marker_re().is_match(e) => {
            SOURCED_EVIDENCE_BONUS
        }
        Some(_) => 0.0,
    }
}

/// Missing or token-length "why now" justification is penalized.
pub fn why_now_adjustment(why_now: Option<&str>) -> f64 {
    match why_now {
        None => -MISSING_WHY_NOW_PENALTY,
        Some(w) if w.trim().len() < MIN_WHY_NOW_LEN => -MISSING_WHY_NOW_PENALTY,
        Some(_) => 0.0,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ItemKind, Recommendation};

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn make_weights(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn weighted_raw_scenario() {
        // weights {a: 0.5, b: 0.5}, features {a: 0.8, b: 0.8} -> raw 0.8
        let weights = make_weights(&[("a", 0.5), ("b", 0.5)]);
        let features = make_weights(&[("a", 0.8), ("b", 0.8)]);
        assert!(approx(weighted_raw(&features, &weights), 0.8));
    }

    #[test]
    fn weighted_raw_missing_feature_is_neutral() {
        let weights = make_weights(&[("a", 1.0)]);
        let features = BTreeMap::new();
        assert!(approx(weighted_raw(&features, &weights), 0.5));
    }

    #[test]
    fn weighted_raw_clamps_feature_values() {
        let weights = make_weights(&[("a", 1.0)]);
        let features = make_weights(&[("a", 1.7)]);
        assert!(approx(weighted_raw(&features, &weights), 1.0));
        let features = make_weights(&[("a", -0.3)]);
        assert!(approx(weighted_raw(&features, &weights), 0.0));
    }

    #[test]
    fn compress_scenario() {
        // 0.8 ^ 1.5 = 0.71554...; rounds to 0.7155
        let compressed = compress(0.8, 1.5);
        assert!((compressed - 0.7155417).abs() < 1e-6);
        assert!(approx(round_score(compressed), 0.7155));
    }

    #[test]
    fn compress_monotonic_and_below_raw() {
        let gamma = 1.35;
        let mut prev = -1.0;
        for i in 0..=100 {
            let raw = i as f64 / 100.0;
            let c = compress(raw, gamma);
            assert!(c >= prev, "compress not monotonic at raw={raw}");
            assert!(c <= raw + 1e-12, "compress exceeds raw at raw={raw}");
            prev = c;
        }
    }

    #[test]
    fn compress_clamps_out_of_range_input() {
        assert!(approx(compress(1.4, 1.5), 1.0));
        assert!(approx(compress(-0.2, 1.5), 0.0));
    }

    #[test]
    fn target_adjustments() {
        assert!(approx(target_adjustment(None), -0.20));
        assert!(approx(target_adjustment(Some("everyone")), -0.20));
        assert!(approx(target_adjustment(Some("  All Users ")), -0.20));
        assert!(approx(
            target_adjustment(Some("ops managers at mid-size logistics firms")),
            0.10
        ));
        // named but unqualified segment is neutral
        assert!(approx(target_adjustment(Some("developers")), 0.0));
    }

    #[test]
    fn evidence_adjustments() {
        assert!(approx(evidence_adjustment(None), -0.15));
        assert!(approx(evidence_adjustment(Some("users complain")), -0.15));
        assert!(approx(
            evidence_adjustment(Some(
                "Survey of 214 respondents showed 38% abandon checkout on mobile"
            )),
            0.10
        ));
        // long but unsourced prose is neutral
        assert!(approx(
            evidence_adjustment(Some(
                "several support threads describe the same frustration in detail"
            )),
            0.0
        ));
    }

    #[test]
    fn why_now_adjustments() {
        assert!(approx(why_now_adjustment(None), -0.10));
        assert!(approx(why_now_adjustment(Some("soon")), -0.10));
        assert!(approx(
            why_now_adjustment(Some("new EU regulation takes effect in January")),
            0.0
        ));
    }

    #[test]
    fn compute_score_full_path() {
        let mut draft = ItemDraft::new(ItemKind::Problem, "checkout drop-off");
        draft.raw_features = make_weights(&[("severity", 0.8), ("frequency", 0.8)]);
        draft.target = Some("everyone".to_string());
        draft.decision = Some(Recommendation::Reject);
        let weights = make_weights(&[("severity", 0.5), ("frequency", 0.5)]);

        // raw 0.8, target -0.2, evidence -0.15, why_now -0.1 => 0.35
        // reject multiplier => 0.175; 0.175^1.5 = 0.07320...
        let score = compute_score(&draft, &weights, 1.5).unwrap();
        assert!(approx(score, 0.0732));
    }

    #[test]
    fn compute_score_rejects_invalid_draft() {
        let draft = ItemDraft::new(ItemKind::Problem, "no features");
        let weights = make_weights(&[("severity", 1.0)]);
        assert!(compute_score(&draft, &weights, 1.35).is_err());
    }

    #[test]
    fn compute_score_deterministic() {
        let mut draft = ItemDraft::new(ItemKind::Solution, "widget");
        draft.raw_features = make_weights(&[("feasibility", 0.7)]);
        let weights = make_weights(&[("feasibility", 1.0)]);
        let a = compute_score(&draft, &weights, 1.35).unwrap();
        let b = compute_score(&draft, &weights, 1.35).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn normalize_batch_descending_band() {
        let out = normalize_batch(&[0.97, 0.85, 0.94], 0.92, 0.55);
        // best = min(0.97, 0.92); ranks: idx0, idx2, idx1
        assert!(approx(out[0], 0.92));
        assert!(approx(out[2], 0.735));
        assert!(approx(out[1], 0.55));
    }

    #[test]
    fn normalize_batch_single_gets_best() {
        let out = normalize_batch(&[0.99], 0.92, 0.55);
        assert_eq!(out, vec![0.92]);
        let out = normalize_batch(&[0.70], 0.92, 0.55);
        assert_eq!(out, vec![0.70]);
    }

    #[test]
    fn normalize_batch_ties_keep_original_order() {
        let out = normalize_batch(&[0.8, 0.8, 0.8], 0.92, 0.55);
        // shared value, earlier index ranks first
        assert!(out[0] > out[1]);
        assert!(out[1] > out[2]);
        assert!(approx(out[0], 0.8));
        assert!(approx(out[2], 0.55));
    }

    #[test]
    fn normalize_batch_empty() {
        assert!(normalize_batch(&[], 0.92, 0.55).is_empty());
    }
}
