use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Per-user interaction state: the pinned current action, last activity,
/// and the earliest moment the next prompt may be offered.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub user_id: String,
    pub current_action: Option<Uuid>,
    pub last_activity_at: DateTime<Utc>,
    pub next_prompt_after: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// SessionStore
// ---------------------------------------------------------------------------

/// Owner of all live sessions.
///
/// Sessions are in-memory only and TTL-evicted; a dropped session just
/// means the next interaction starts fresh with no pinned action.
pub struct SessionStore {
    ttl: Duration,
    prompt_gap: Duration,
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new(ttl: Duration, prompt_gap: Duration) -> Self {
        Self {
            ttl,
            prompt_gap,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Record operator activity, creating the session on first touch.
    pub fn touch(&self, user_id: &str, now: DateTime<Utc>) {
        let mut sessions = self.sessions.lock().unwrap();
        sessions
            .entry(user_id.to_string())
            .and_modify(|s| s.last_activity_at = now)
            .or_insert_with(|| Session {
                user_id: user_id.to_string(),
                current_action: None,
                last_activity_at: now,
                next_prompt_after: None,
                created_at: now,
            });
    }

    pub fn last_activity(&self, user_id: &str) -> Option<DateTime<Utc>> {
        let sessions = self.sessions.lock().unwrap();
        sessions.get(user_id).map(|s| s.last_activity_at)
    }

    /// Pin the action currently in front of the operator.
    pub fn pin_current(&self, user_id: &str, action_id: Uuid, now: DateTime<Utc>) {
        self.touch(user_id, now);
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(session) = sessions.get_mut(user_id) {
            session.current_action = Some(action_id);
        }
    }

    pub fn current_action(&self, user_id: &str) -> Option<Uuid> {
        let sessions = self.sessions.lock().unwrap();
        sessions.get(user_id).and_then(|s| s.current_action)
    }

    /// Unpin the finished action and start the deliberate pause before the
    /// next one may be offered.
    pub fn note_completion(&self, user_id: &str, now: DateTime<Utc>) {
        self.touch(user_id, now);
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(session) = sessions.get_mut(user_id) {
            session.current_action = None;
            session.next_prompt_after = Some(now + self.prompt_gap);
        }
    }

    /// Whether the prompt gap has elapsed and a new action may be offered.
    pub fn ready_for_next(&self, user_id: &str, now: DateTime<Utc>) -> bool {
        let sessions = self.sessions.lock().unwrap();
        match sessions.get(user_id) {
            Some(session) => session.next_prompt_after.map_or(true, |t| now >= t),
            None => true,
        }
    }

    pub fn snapshot(&self, user_id: &str) -> Option<Session> {
        let sessions = self.sessions.lock().unwrap();
        sessions.get(user_id).cloned()
    }

    /// Drop sessions idle past the TTL. Returns the count evicted.
    pub fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.ttl;
        let mut sessions = self.sessions.lock().unwrap();
        let before = sessions.len();
        sessions.retain(|_, s| s.last_activity_at >= cutoff);
        before - sessions.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
