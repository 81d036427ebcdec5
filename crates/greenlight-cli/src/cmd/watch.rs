use crate::cmd::open_engine;
use chrono::{DateTime, Utc};
use greenlight_core::engine::Engine;
use std::path::Path;

/// Foreground maintenance loop: the scheduled jobs a deployed instance
/// would run from a timer all live here. One pass per tick, first tick
/// immediately on startup.
pub fn run(root: &Path, interval: u64) -> anyhow::Result<()> {
    let engine = open_engine(root)?;
    let interval = interval.max(1);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let mut tick = tokio::time::interval(std::time::Duration::from_secs(interval));
        println!(
            "Watching {} (pass every {interval}s). Ctrl-C to stop.",
            engine.root().display()
        );
        loop {
            tokio::select! {
                _ = tick.tick() => maintenance_pass(&engine, Utc::now()),
                _ = tokio::signal::ctrl_c() => {
                    println!("Stopped.");
                    return Ok(());
                }
            }
        }
    })
}

/// One pass over every periodic job. A failing job logs and never stops
/// the others.
fn maintenance_pass(engine: &Engine, now: DateTime<Utc>) {
    if let Err(err) = engine.run_retune(now) {
        tracing::warn!(error = %err, "retune pass failed");
    }
    if let Err(err) = engine.run_gc(now) {
        tracing::warn!(error = %err, "gc pass failed");
    }
    match engine.flush_notifications(now) {
        Ok(0) => {}
        Ok(flushed) => tracing::info!(flushed, "sent buffered notification digests"),
        Err(err) => tracing::warn!(error = %err, "notification flush failed"),
    }
    match engine.release_stale_locks(now) {
        Ok(0) => {}
        Ok(released) => tracing::info!(released, "released stale stage locks"),
        Err(err) => tracing::warn!(error = %err, "lock janitor failed"),
    }
    let evicted = engine.evict_sessions(now);
    if evicted > 0 {
        tracing::debug!(evicted, "evicted idle sessions");
    }
    let compacted = engine.compact_dedup(now);
    if compacted > 0 {
        tracing::debug!(compacted, "compacted dedup cache");
    }
}
