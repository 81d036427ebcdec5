use crate::error::{GreenlightError, Result};
use crate::store::GateDb;
use crate::types::Stage;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Venture
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTransition {
    pub stage: Stage,
    pub entered: DateTime<Utc>,
}

/// A tracked project moving through the pipeline.
///
/// The stage index is monotonically non-decreasing for the life of the
/// venture; `locked` guards exclusive multi-step operations and
/// `updated_at` doubles as the last-activity timestamp the janitor reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Venture {
    pub slug: String,
    pub title: String,
    pub stage: Stage,
    #[serde(default)]
    pub locked: bool,
    pub stage_history: Vec<StageTransition>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Venture {
    pub fn new(slug: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            slug: slug.into(),
            title: title.into(),
            stage: Stage::SpecPending,
            locked: false,
            stage_history: vec![StageTransition {
                stage: Stage::SpecPending,
                entered: now,
            }],
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `target`. Backward transitions are always rejected; a
    /// transition to the current stage is a no-op success. Returns whether
    /// the stage actually changed.
    pub fn advance(&mut self, target: Stage, now: DateTime<Utc>) -> Result<bool> {
        if target.index() < self.stage.index() {
            return Err(GreenlightError::InvalidTransition {
                from: self.stage.to_string(),
                to: target.to_string(),
                reason: "backward transitions are rejected".to_string(),
            });
        }
        if target == self.stage {
            return Ok(false);
        }
        self.stage = target;
        self.stage_history.push(StageTransition {
            stage: target,
            entered: now,
        });
        self.updated_at = now;
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Ordering guard
// ---------------------------------------------------------------------------

/// How an ordering check failure is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardMode {
    /// Mutating contexts fail closed: an unmet requirement or an
    /// unevaluable check refuses the action.
    Strict,
    /// Read-only contexts fail open: log a warning and allow the action
    /// when the check fails or cannot be evaluated.
    Advisory,
}

/// Check that the venture has reached at least `stage` before a
/// stage-specific action runs.
pub fn require_at_least(db: &GateDb, slug: &str, stage: Stage, mode: GuardMode) -> Result<()> {
    match db.load_venture(slug) {
        Ok(venture) => {
            if venture.stage >= stage {
                return Ok(());
            }
            match mode {
                GuardMode::Strict => Err(GreenlightError::GuardFailed {
                    venture: slug.to_string(),
                    required: stage,
                    actual: venture.stage,
                }),
                GuardMode::Advisory => {
                    tracing::warn!(
                        slug,
                        required = %stage,
                        actual = %venture.stage,
                        "ordering check failed; allowing (advisory)"
                    );
                    Ok(())
                }
            }
        }
        Err(e) => match mode {
            GuardMode::Strict => Err(e),
            GuardMode::Advisory => {
                tracing::warn!(slug, error = %e, "ordering check unavailable; allowing (advisory)");
                Ok(())
            }
        },
    }
}

// ---------------------------------------------------------------------------
// Stage lock
// ---------------------------------------------------------------------------

/// Scoped hold on a venture's `locked` flag.
///
/// `release()` is the explicit happy path and reports unlock errors;
/// `Drop` covers every other exit path best-effort so an early return or
/// error can never leave the flag set by a live process.
pub struct StageLock<'a> {
    db: &'a GateDb,
    slug: String,
    released: bool,
}

pub fn acquire_lock<'a>(db: &'a GateDb, slug: &str) -> Result<StageLock<'a>> {
    let mut venture = db.load_venture(slug)?;
    if venture.locked {
        return Err(GreenlightError::StageLocked(slug.to_string()));
    }
    venture.locked = true;
    venture.updated_at = Utc::now();
    db.save_venture(&venture)?;
    Ok(StageLock {
        db,
        slug: slug.to_string(),
        released: false,
    })
}

impl StageLock<'_> {
    pub fn slug(&self) -> &str {
        &self.slug
    }

    pub fn release(mut self) -> Result<()> {
        self.released = true;
        unlock(self.db, &self.slug)
    }
}

impl Drop for StageLock<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = unlock(self.db, &self.slug) {
            tracing::warn!(slug = %self.slug, error = %e, "failed to release venture lock");
        }
    }
}

fn unlock(db: &GateDb, slug: &str) -> Result<()> {
    let mut venture = db.load_venture(slug)?;
    venture.locked = false;
    venture.updated_at = Utc::now();
    db.save_venture(&venture)
}

/// Janitor: force-unlock ventures whose last activity is older than
/// `max_age`. Covers locks orphaned by a crashed process. Returns the
/// number of locks released.
pub fn release_stale_locks(db: &GateDb, max_age: Duration, now: DateTime<Utc>) -> Result<u32> {
    let cutoff = now - max_age;
    let mut count = 0u32;
    for mut venture in db.list_ventures()? {
        if venture.locked && venture.updated_at < cutoff {
            venture.locked = false;
            venture.updated_at = now;
            db.save_venture(&venture)?;
            tracing::warn!(slug = %venture.slug, "released stale venture lock");
            count += 1;
        }
    }
    Ok(count)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_tmp() -> (TempDir, GateDb) {
        let dir = TempDir::new().unwrap();
        let db = GateDb::open(&dir.path().join("test.db")).unwrap();
        (dir, db)
    }

    #[test]
    fn advance_moves_forward() {
        let mut venture = Venture::new("ai-invoicing", "AI invoicing");
        let moved = venture.advance(Stage::SpecApproved, Utc::now()).unwrap();
        assert!(moved);
        assert_eq!(venture.stage, Stage::SpecApproved);
        assert_eq!(venture.stage_history.len(), 2);
    }

    #[test]
    fn advance_can_skip_stages() {
        let mut venture = Venture::new("v", "V");
        venture.advance(Stage::SmokePending, Utc::now()).unwrap();
        assert_eq!(venture.stage, Stage::SmokePending);
    }

    #[test]
    fn advance_same_stage_is_noop() {
        let mut venture = Venture::new("v", "V");
        venture.advance(Stage::SpecApproved, Utc::now()).unwrap();
        let before = venture.stage_history.len();
        let moved = venture.advance(Stage::SpecApproved, Utc::now()).unwrap();
        assert!(!moved);
        assert_eq!(venture.stage_history.len(), before);
    }

    #[test]
    fn advance_backward_rejected() {
        let mut venture = Venture::new("v", "V");
        venture.advance(Stage::LegalPending, Utc::now()).unwrap();
        let err = venture.advance(Stage::SpecPending, Utc::now()).unwrap_err();
        assert!(matches!(err, GreenlightError::InvalidTransition { .. }));
        assert_eq!(venture.stage, Stage::LegalPending);
    }

    #[test]
    fn stage_index_non_decreasing_over_any_sequence() {
        let mut venture = Venture::new("v", "V");
        let targets = [
            Stage::SpecApproved,
            Stage::SpecPending,
            Stage::SmokeDone,
            Stage::LegalPending,
            Stage::SmokeDone,
            Stage::Launched,
        ];
        let mut last_index = venture.stage.index();
        for target in targets {
            let _ = venture.advance(target, Utc::now());
            assert!(venture.stage.index() >= last_index);
            last_index = venture.stage.index();
        }
        assert_eq!(venture.stage, Stage::Launched);
    }

    #[test]
    fn strict_guard_fails_closed() {
        let (_dir, db) = open_tmp();
        db.save_venture(&Venture::new("v", "V")).unwrap();

        let err = require_at_least(&db, "v", Stage::SmokeDone, GuardMode::Strict).unwrap_err();
        assert!(matches!(err, GreenlightError::GuardFailed { .. }));
        // missing venture also fails closed
        assert!(require_at_least(&db, "ghost", Stage::SpecPending, GuardMode::Strict).is_err());
    }

    #[test]
    fn advisory_guard_fails_open() {
        let (_dir, db) = open_tmp();
        db.save_venture(&Venture::new("v", "V")).unwrap();

        assert!(require_at_least(&db, "v", Stage::SmokeDone, GuardMode::Advisory).is_ok());
        assert!(require_at_least(&db, "ghost", Stage::SpecPending, GuardMode::Advisory).is_ok());
    }

    #[test]
    fn guard_passes_when_stage_reached() {
        let (_dir, db) = open_tmp();
        let mut venture = Venture::new("v", "V");
        venture.advance(Stage::SmokeDone, Utc::now()).unwrap();
        db.save_venture(&venture).unwrap();

        assert!(require_at_least(&db, "v", Stage::SmokeDone, GuardMode::Strict).is_ok());
        assert!(require_at_least(&db, "v", Stage::SpecApproved, GuardMode::Strict).is_ok());
    }

    #[test]
    fn lock_acquire_release() {
        let (_dir, db) = open_tmp();
        db.save_venture(&Venture::new("v", "V")).unwrap();

        let lock = acquire_lock(&db, "v").unwrap();
        assert!(db.load_venture("v").unwrap().locked);
        // second acquisition refused while held
        assert!(matches!(
            acquire_lock(&db, "v").err(),
            Some(GreenlightError::StageLocked(_))
        ));
        lock.release().unwrap();
        assert!(!db.load_venture("v").unwrap().locked);
    }

    #[test]
    fn lock_released_on_drop() {
        let (_dir, db) = open_tmp();
        db.save_venture(&Venture::new("v", "V")).unwrap();

        {
            let _lock = acquire_lock(&db, "v").unwrap();
            assert!(db.load_venture("v").unwrap().locked);
        }
        assert!(!db.load_venture("v").unwrap().locked);
    }

    #[test]
    fn janitor_releases_only_stale_locks() {
        let (_dir, db) = open_tmp();
        let now = Utc::now();

        let mut stale = Venture::new("stale", "Stale");
        stale.locked = true;
        stale.updated_at = now - Duration::minutes(30);
        db.save_venture(&stale).unwrap();

        let mut fresh = Venture::new("fresh", "Fresh");
        fresh.locked = true;
        fresh.updated_at = now - Duration::minutes(2);
        db.save_venture(&fresh).unwrap();

        let released = release_stale_locks(&db, Duration::minutes(15), now).unwrap();
        assert_eq!(released, 1);
        assert!(!db.load_venture("stale").unwrap().locked);
        assert!(db.load_venture("fresh").unwrap().locked);
    }
}
