//! Persistent storage for the gating engine using redb.
//!
//! # Table design
//!
//! Five tables, all JSON-encoded values:
//!
//! - `items`: key = uuid (16 bytes)
//! - `fingerprints`: key = content hash hex, value = item uuid; the dedup
//!   index consulted before any item insert
//! - `snapshots`: key = `[timestamp_ms: u64 BE (8) | uuid (16)]`; byte
//!   ordering equals time ordering, so the latest row is the last key and
//!   history reads are a plain forward scan
//! - `ventures`: key = slug
//! - `actions`: key = 40-byte composite
//!   `[user hash (8) | inverted priority: u64 BE (8) | timestamp_ms: u64 BE (8) | uuid (16)]`
//!
//! The inverted priority is `u64::MAX - round(priority_score * 1e6)`, so for
//! one user byte order equals queue order: highest priority first, oldest
//! first within a priority. `peek` is a prefix range scan that stops at the
//! first `Pending` row.

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{GreenlightError, Result};
use crate::item::Item;
use crate::pipeline::Venture;
use crate::queue::{ActionStatus, PendingAction};
use crate::threshold::ThresholdSnapshot;
use crate::types::ItemKind;

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

const ITEMS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("items");
const FINGERPRINTS: TableDefinition<&str, &[u8]> = TableDefinition::new("fingerprints");
const SNAPSHOTS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("snapshots");
const VENTURES: TableDefinition<&str, &[u8]> = TableDefinition::new("ventures");
const ACTIONS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("actions");

fn store_err<E: std::fmt::Display>(e: E) -> GreenlightError {
    GreenlightError::Store(e.to_string())
}

// ---------------------------------------------------------------------------
// Key helpers
// ---------------------------------------------------------------------------

fn ts_ms(ts: DateTime<Utc>) -> u64 {
    ts.timestamp_millis().max(0) as u64
}

fn snapshot_key(ts: DateTime<Utc>, id: Uuid) -> [u8; 24] {
    let mut key = [0u8; 24];
    key[..8].copy_from_slice(&ts_ms(ts).to_be_bytes());
    key[8..].copy_from_slice(id.as_bytes());
    key
}

fn user_prefix(user_id: &str) -> [u8; 8] {
    let digest = Sha256::digest(user_id.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    prefix
}

/// Higher stored priority must sort earlier, so the key carries the
/// complement of the scaled score.
fn inverted_priority(priority_score: f64) -> u64 {
    const SCALE: f64 = 1_000_000.0;
    u64::MAX - (priority_score.max(0.0) * SCALE).round() as u64
}

fn action_key(action: &PendingAction) -> [u8; 40] {
    let mut key = [0u8; 40];
    key[..8].copy_from_slice(&user_prefix(&action.user_id));
    key[8..16].copy_from_slice(&inverted_priority(action.priority_score).to_be_bytes());
    key[16..24].copy_from_slice(&ts_ms(action.created_at).to_be_bytes());
    key[24..].copy_from_slice(action.id.as_bytes());
    key
}

/// Bounds for a range scan over one user's actions.
fn user_bounds(user_id: &str) -> ([u8; 40], [u8; 40]) {
    let prefix = user_prefix(user_id);
    let mut lower = [0u8; 40];
    let mut upper = [0xffu8; 40];
    lower[..8].copy_from_slice(&prefix);
    upper[..8].copy_from_slice(&prefix);
    (lower, upper)
}

// ---------------------------------------------------------------------------
// GateDb
// ---------------------------------------------------------------------------

/// Persistent store for items, threshold snapshots, ventures, and the
/// action queue.
pub struct GateDb {
    db: Database,
}

impl GateDb {
    /// Open or create the database at `path`, ensuring all tables exist.
    ///
    /// A store that cannot be opened is fatal to the caller; nothing in the
    /// engine works without it.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).map_err(store_err)?;
        let wt = db.begin_write().map_err(store_err)?;
        wt.open_table(ITEMS).map_err(store_err)?;
        wt.open_table(FINGERPRINTS).map_err(store_err)?;
        wt.open_table(SNAPSHOTS).map_err(store_err)?;
        wt.open_table(VENTURES).map_err(store_err)?;
        wt.open_table(ACTIONS).map_err(store_err)?;
        wt.commit().map_err(store_err)?;
        Ok(Self { db })
    }

    // -----------------------------------------------------------------------
    // Items
    // -----------------------------------------------------------------------

    /// Insert an item and record its fingerprint. An equivalent item
    /// already on record is a `DuplicateItem` error and nothing is written.
    pub fn insert_item(&self, item: &Item) -> Result<()> {
        let value = serde_json::to_vec(item).map_err(store_err)?;
        let wt = self.db.begin_write().map_err(store_err)?;
        {
            let mut fingerprints = wt.open_table(FINGERPRINTS).map_err(store_err)?;
            if fingerprints
                .get(item.fingerprint.as_str())
                .map_err(store_err)?
                .is_some()
            {
                return Err(GreenlightError::DuplicateItem(item.fingerprint.clone()));
            }
            fingerprints
                .insert(item.fingerprint.as_str(), item.id.as_bytes().as_slice())
                .map_err(store_err)?;
            let mut items = wt.open_table(ITEMS).map_err(store_err)?;
            items
                .insert(item.id.as_bytes().as_slice(), value.as_slice())
                .map_err(store_err)?;
        }
        wt.commit().map_err(store_err)?;
        Ok(())
    }

    pub fn fingerprint_exists(&self, fingerprint: &str) -> Result<bool> {
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(FINGERPRINTS).map_err(store_err)?;
        Ok(table.get(fingerprint).map_err(store_err)?.is_some())
    }

    pub fn load_item(&self, id: Uuid) -> Result<Item> {
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(ITEMS).map_err(store_err)?;
        let entry = table
            .get(id.as_bytes().as_slice())
            .map_err(store_err)?
            .ok_or_else(|| GreenlightError::ItemNotFound(id.to_string()))?;
        serde_json::from_slice(entry.value()).map_err(store_err)
    }

    /// All items, newest first.
    pub fn list_items(&self) -> Result<Vec<Item>> {
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(ITEMS).map_err(store_err)?;
        let mut result = Vec::new();
        for entry in table.iter().map_err(store_err)? {
            let (_, v) = entry.map_err(store_err)?;
            let item: Item = serde_json::from_slice(v.value()).map_err(store_err)?;
            result.push(item);
        }
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(result)
    }

    /// Composite scores of FinalGate items created strictly after `cutoff`.
    /// The retune window feeds on these.
    pub fn final_gate_scores_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<f64>> {
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(ITEMS).map_err(store_err)?;
        let mut scores = Vec::new();
        for entry in table.iter().map_err(store_err)? {
            let (_, v) = entry.map_err(store_err)?;
            let item: Item = serde_json::from_slice(v.value()).map_err(store_err)?;
            if item.kind == ItemKind::FinalGate && item.created_at > cutoff {
                if let Some(score) = item.composite_score {
                    scores.push(score);
                }
            }
        }
        Ok(scores)
    }

    // -----------------------------------------------------------------------
    // Threshold snapshots
    // -----------------------------------------------------------------------

    /// Append a snapshot row. The log is append-only: rows are never
    /// touched after this write.
    pub fn append_snapshot(&self, snapshot: &ThresholdSnapshot) -> Result<()> {
        let key = snapshot_key(snapshot.created_at, Uuid::new_v4());
        let value = serde_json::to_vec(snapshot).map_err(store_err)?;
        let wt = self.db.begin_write().map_err(store_err)?;
        {
            let mut table = wt.open_table(SNAPSHOTS).map_err(store_err)?;
            table
                .insert(key.as_slice(), value.as_slice())
                .map_err(store_err)?;
        }
        wt.commit().map_err(store_err)?;
        Ok(())
    }

    /// The current thresholds: the most recent snapshot row. A database
    /// without its seed row has not been initialized.
    pub fn latest_snapshot(&self) -> Result<ThresholdSnapshot> {
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(SNAPSHOTS).map_err(store_err)?;
        let entry = table
            .iter()
            .map_err(store_err)?
            .next_back()
            .ok_or(GreenlightError::NotInitialized)?
            .map_err(store_err)?;
        let (_, v) = entry;
        serde_json::from_slice(v.value()).map_err(store_err)
    }

    /// Full snapshot history, oldest first.
    pub fn snapshot_history(&self) -> Result<Vec<ThresholdSnapshot>> {
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(SNAPSHOTS).map_err(store_err)?;
        let mut result = Vec::new();
        for entry in table.iter().map_err(store_err)? {
            let (_, v) = entry.map_err(store_err)?;
            result.push(serde_json::from_slice(v.value()).map_err(store_err)?);
        }
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // Ventures
    // -----------------------------------------------------------------------

    /// Insert a new venture; an existing slug is an error.
    pub fn create_venture(&self, venture: &Venture) -> Result<()> {
        let value = serde_json::to_vec(venture).map_err(store_err)?;
        let wt = self.db.begin_write().map_err(store_err)?;
        {
            let mut table = wt.open_table(VENTURES).map_err(store_err)?;
            if table
                .get(venture.slug.as_str())
                .map_err(store_err)?
                .is_some()
            {
                return Err(GreenlightError::VentureExists(venture.slug.clone()));
            }
            table
                .insert(venture.slug.as_str(), value.as_slice())
                .map_err(store_err)?;
        }
        wt.commit().map_err(store_err)?;
        Ok(())
    }

    /// Write a venture's current state, replacing any previous row.
    pub fn save_venture(&self, venture: &Venture) -> Result<()> {
        let value = serde_json::to_vec(venture).map_err(store_err)?;
        let wt = self.db.begin_write().map_err(store_err)?;
        {
            let mut table = wt.open_table(VENTURES).map_err(store_err)?;
            table
                .insert(venture.slug.as_str(), value.as_slice())
                .map_err(store_err)?;
        }
        wt.commit().map_err(store_err)?;
        Ok(())
    }

    pub fn load_venture(&self, slug: &str) -> Result<Venture> {
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(VENTURES).map_err(store_err)?;
        let entry = table
            .get(slug)
            .map_err(store_err)?
            .ok_or_else(|| GreenlightError::VentureNotFound(slug.to_string()))?;
        serde_json::from_slice(entry.value()).map_err(store_err)
    }

    /// All ventures, newest first.
    pub fn list_ventures(&self) -> Result<Vec<Venture>> {
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(VENTURES).map_err(store_err)?;
        let mut result = Vec::new();
        for entry in table.iter().map_err(store_err)? {
            let (_, v) = entry.map_err(store_err)?;
            result.push(serde_json::from_slice(v.value()).map_err(store_err)?);
        }
        result.sort_by(|a: &Venture, b: &Venture| b.created_at.cmp(&a.created_at));
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // Action queue
    // -----------------------------------------------------------------------

    pub fn insert_action(&self, action: &PendingAction) -> Result<()> {
        let key = action_key(action);
        let value = serde_json::to_vec(action).map_err(store_err)?;
        let wt = self.db.begin_write().map_err(store_err)?;
        {
            let mut table = wt.open_table(ACTIONS).map_err(store_err)?;
            table
                .insert(key.as_slice(), value.as_slice())
                .map_err(store_err)?;
        }
        wt.commit().map_err(store_err)?;
        Ok(())
    }

    /// Find an action by id, scanning all records.
    pub fn load_action(&self, id: Uuid) -> Result<PendingAction> {
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(ACTIONS).map_err(store_err)?;
        for entry in table.iter().map_err(store_err)? {
            let (_, v) = entry.map_err(store_err)?;
            let action: PendingAction = serde_json::from_slice(v.value()).map_err(store_err)?;
            if action.id == id {
                return Ok(action);
            }
        }
        Err(GreenlightError::ActionNotFound(id.to_string()))
    }

    /// Rewrite an action in place. The key fields (user, priority score,
    /// created_at, id) never change after insert, so the key is stable.
    pub fn update_action(&self, action: &PendingAction) -> Result<()> {
        let key = action_key(action);
        let value = serde_json::to_vec(action).map_err(store_err)?;
        let wt = self.db.begin_write().map_err(store_err)?;
        {
            let mut table = wt.open_table(ACTIONS).map_err(store_err)?;
            table.remove(key.as_slice()).map_err(store_err)?;
            table
                .insert(key.as_slice(), value.as_slice())
                .map_err(store_err)?;
        }
        wt.commit().map_err(store_err)?;
        Ok(())
    }

    /// Highest-priority pending action for `user_id`, oldest first within a
    /// priority. Key order makes this the first pending row in a prefix
    /// range scan.
    pub fn peek_next_action(&self, user_id: &str) -> Result<Option<PendingAction>> {
        let (lower, upper) = user_bounds(user_id);
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(ACTIONS).map_err(store_err)?;
        for entry in table
            .range(lower.as_slice()..=upper.as_slice())
            .map_err(store_err)?
        {
            let (_, v) = entry.map_err(store_err)?;
            let action: PendingAction = serde_json::from_slice(v.value()).map_err(store_err)?;
            if action.status == ActionStatus::Pending {
                return Ok(Some(action));
            }
        }
        Ok(None)
    }

    /// Actions for `user_id` in queue order. Terminal actions are included
    /// only when `include_terminal` is set.
    pub fn list_actions(&self, user_id: &str, include_terminal: bool) -> Result<Vec<PendingAction>> {
        let (lower, upper) = user_bounds(user_id);
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(ACTIONS).map_err(store_err)?;
        let mut result = Vec::new();
        for entry in table
            .range(lower.as_slice()..=upper.as_slice())
            .map_err(store_err)?
        {
            let (_, v) = entry.map_err(store_err)?;
            let action: PendingAction = serde_json::from_slice(v.value()).map_err(store_err)?;
            if include_terminal || action.status == ActionStatus::Pending {
                result.push(action);
            }
        }
        Ok(result)
    }

    /// Finish an action and persist the result. Returns the stored action
    /// and whether this call performed the transition; `false` means the
    /// action was already terminal and nothing changed (idempotent repeat).
    pub fn complete_action(
        &self,
        id: Uuid,
        status: ActionStatus,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(PendingAction, bool)> {
        let mut action = self.load_action(id)?;
        let changed = action.finish(status, note, now)?;
        if changed {
            self.update_action(&action)?;
        }
        Ok((action, changed))
    }

    // -----------------------------------------------------------------------
    // Queue GC
    // -----------------------------------------------------------------------

    /// Expire pending actions older than `max_age`. Returns the count.
    pub fn expire_stale_actions(&self, max_age: Duration, now: DateTime<Utc>) -> Result<u32> {
        let cutoff = now - max_age;
        let mut count = 0u32;
        for mut action in self.all_actions()? {
            if action.status == ActionStatus::Pending && action.created_at < cutoff {
                action.finish(
                    ActionStatus::Expired,
                    Some("expired by queue gc".to_string()),
                    now,
                )?;
                self.update_action(&action)?;
                count += 1;
            }
        }
        Ok(count)
    }

    /// Delete terminal actions finished more than `max_age` ago. This is
    /// the only destructive delete in the store, gated on terminal status
    /// plus age.
    pub fn purge_terminal_actions(&self, max_age: Duration, now: DateTime<Utc>) -> Result<u32> {
        let cutoff = now - max_age;
        let mut count = 0u32;
        for action in self.all_actions()? {
            if !action.status.is_terminal() {
                continue;
            }
            let finished_at = action.completed_at.unwrap_or(action.created_at);
            if finished_at < cutoff {
                let key = action_key(&action);
                let wt = self.db.begin_write().map_err(store_err)?;
                {
                    let mut table = wt.open_table(ACTIONS).map_err(store_err)?;
                    table.remove(key.as_slice()).map_err(store_err)?;
                }
                wt.commit().map_err(store_err)?;
                count += 1;
            }
        }
        Ok(count)
    }

    fn all_actions(&self) -> Result<Vec<PendingAction>> {
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(ACTIONS).map_err(store_err)?;
        let mut result = Vec::new();
        for entry in table.iter().map_err(store_err)? {
            let (_, v) = entry.map_err(store_err)?;
            result.push(serde_json::from_slice(v.value()).map_err(store_err)?);
        }
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
