//! Outbound operator notifications.
//!
//! All sends flow through a per-channel circuit breaker, a duplicate
//! suppression cache, and a batching window that avoids interrupting an
//! actively working operator.

use crate::breaker::CircuitBreaker;
use crate::config::ResilienceConfig;
use crate::dedup::DedupCache;
use crate::error::Result;
use crate::retry::with_backoff;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// Action button attached to an outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub label: String,
    /// Command line the operator runs to take the action.
    pub command: String,
}

impl Button {
    pub fn new(label: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            command: command.into(),
        }
    }
}

/// Transport for operator-facing messages.
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &'static str;
    fn send(&self, recipient: &str, text: &str, buttons: &[Button]) -> Result<()>;
}

// ---------------------------------------------------------------------------
// BatchWindow
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Immediate,
    Buffered,
}

/// Buffers non-critical messages while the operator is actively working.
///
/// Buffered messages flush as one combined digest per recipient once the
/// operator has been silent for the configured window.
pub struct BatchWindow {
    silence: Duration,
    active_window: Duration,
    buffer: Mutex<HashMap<String, Vec<String>>>,
}

impl BatchWindow {
    pub fn new(silence: Duration, active_window: Duration) -> Self {
        Self {
            silence,
            active_window,
            buffer: Mutex::new(HashMap::new()),
        }
    }

    /// Critical messages and messages to an idle operator go out now;
    /// everything else waits in the buffer.
    pub fn disposition(
        &self,
        critical: bool,
        last_activity: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Disposition {
        if critical {
            return Disposition::Immediate;
        }
        match last_activity {
            Some(t) if now - t <= self.active_window => Disposition::Buffered,
            _ => Disposition::Immediate,
        }
    }

    pub fn push(&self, recipient: &str, text: &str) {
        let mut buffer = self.buffer.lock().unwrap();
        buffer
            .entry(recipient.to_string())
            .or_default()
            .push(text.to_string());
    }

    pub fn pending(&self, recipient: &str) -> usize {
        let buffer = self.buffer.lock().unwrap();
        buffer.get(recipient).map_or(0, Vec::len)
    }

    /// Drains recipients whose operator has been silent long enough and
    /// returns one joined digest per recipient, ordered by recipient.
    pub fn flush_due<F>(&self, last_activity: F, now: DateTime<Utc>) -> Vec<(String, String)>
    where
        F: Fn(&str) -> Option<DateTime<Utc>>,
    {
        let mut buffer = self.buffer.lock().unwrap();
        let due: Vec<String> = buffer
            .iter()
            .filter(|(recipient, texts)| {
                !texts.is_empty()
                    && last_activity(recipient).map_or(true, |t| now - t >= self.silence)
            })
            .map(|(recipient, _)| recipient.clone())
            .collect();

        let mut out = Vec::with_capacity(due.len());
        for recipient in due {
            if let Some(texts) = buffer.remove(&recipient) {
                out.push((recipient, texts.join("\n")));
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Deduplicated,
    Buffered,
}

/// Notification frontend composing the channel with the resilience layers.
pub struct Notifier {
    channel: Box<dyn NotificationChannel>,
    breaker: CircuitBreaker,
    dedup: DedupCache,
    batch: BatchWindow,
    retry_max_attempts: u32,
    retry_base_ms: u64,
}

impl Notifier {
    pub fn new(channel: Box<dyn NotificationChannel>, cfg: &ResilienceConfig) -> Self {
        Self {
            breaker: CircuitBreaker::new(
                cfg.breaker_threshold,
                Duration::seconds(i64::from(cfg.breaker_cooldown_secs)),
            ),
            dedup: DedupCache::new(Duration::seconds(i64::from(cfg.dedup_ttl_secs))),
            batch: BatchWindow::new(
                Duration::seconds(i64::from(cfg.batch_silence_secs)),
                Duration::seconds(i64::from(cfg.active_window_secs)),
            ),
            retry_max_attempts: cfg.retry_max_attempts,
            retry_base_ms: cfg.retry_base_ms,
            channel,
        }
    }

    /// Sends one message through breaker, dedup, and batching in that order.
    ///
    /// A transport failure counts against the breaker and forgets the dedup
    /// record so the caller's retry is not suppressed.
    pub fn notify(
        &self,
        recipient: &str,
        text: &str,
        buttons: &[Button],
        critical: bool,
        last_activity: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<SendOutcome> {
        let name = self.channel.name();
        self.breaker.check(name, now)?;
        if !self.dedup.should_send(name, text, now) {
            return Ok(SendOutcome::Deduplicated);
        }
        if self.batch.disposition(critical, last_activity, now) == Disposition::Buffered {
            self.batch.push(recipient, text);
            return Ok(SendOutcome::Buffered);
        }
        match with_backoff(self.retry_max_attempts, self.retry_base_ms, || {
            self.channel.send(recipient, text, buttons)
        }) {
            Ok(()) => {
                self.breaker.record_success(name);
                Ok(SendOutcome::Sent)
            }
            Err(err) => {
                self.breaker.record_failure(name, now);
                self.dedup.forget(name, text);
                Err(err)
            }
        }
    }

    /// Sends due digests. Digest sends carry no buttons. On a transport
    /// failure the failed digest and every digest not yet attempted go
    /// back into the buffer for the next pass.
    pub fn flush<F>(&self, last_activity: F, now: DateTime<Utc>) -> Result<u32>
    where
        F: Fn(&str) -> Option<DateTime<Utc>>,
    {
        let name = self.channel.name();
        self.breaker.check(name, now)?;
        let mut due = self.batch.flush_due(last_activity, now).into_iter();
        let mut sent = 0;
        while let Some((recipient, digest)) = due.next() {
            match with_backoff(self.retry_max_attempts, self.retry_base_ms, || {
                self.channel.send(&recipient, &digest, &[])
            }) {
                Ok(()) => {
                    self.breaker.record_success(name);
                    sent += 1;
                }
                Err(err) => {
                    self.breaker.record_failure(name, now);
                    self.batch.push(&recipient, &digest);
                    for (recipient, digest) in due.by_ref() {
                        self.batch.push(&recipient, &digest);
                    }
                    return Err(err);
                }
            }
        }
        Ok(sent)
    }

    pub fn pending(&self, recipient: &str) -> usize {
        self.batch.pending(recipient)
    }

    /// Dedup cache housekeeping. Returns the number of entries dropped.
    pub fn compact(&self, now: DateTime<Utc>) -> usize {
        self.dedup.compact(now)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
