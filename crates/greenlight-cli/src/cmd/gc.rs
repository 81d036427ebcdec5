use crate::cmd::open_engine;
use crate::output::print_json;
use chrono::Utc;
use std::path::Path;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let engine = open_engine(root)?;
    let outcome = engine.run_gc(Utc::now())?;

    if json {
        print_json(&outcome)?;
        return Ok(());
    }
    println!(
        "Expired {} stale action(s); purged {} old terminal action(s).",
        outcome.expired, outcome.purged
    );
    Ok(())
}
