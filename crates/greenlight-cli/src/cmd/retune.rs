use crate::cmd::open_engine;
use crate::output::print_json;
use chrono::Utc;
use std::path::Path;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let engine = open_engine(root)?;
    let snapshot = engine.retune_now(Utc::now())?;

    if json {
        print_json(&snapshot)?;
        return Ok(());
    }

    println!("Retuned thresholds.");
    println!("  gate:          {:.4}", snapshot.gate);
    println!("  approval rate: {:.2}", snapshot.observed_approval_rate);
    println!(
        "  window items:  {}",
        snapshot
            .window_items
            .map(|n| n.to_string())
            .unwrap_or_else(|| "-".to_string())
    );
    println!("  rationale:     {}", snapshot.rationale);
    Ok(())
}
