use crate::cmd::open_engine;
use crate::output::print_json;
use std::path::Path;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let engine = open_engine(root)?;
    let report = engine.status()?;

    if json {
        print_json(&report)?;
        return Ok(());
    }

    println!("Project:   {}", report.project);
    println!("Operator:  {}", report.operator);
    println!("Pending:   {} action(s)", report.pending_actions);
    println!("Items:     {} recorded", report.items_recorded);
    println!("Ventures:  {}", report.ventures);
    println!(
        "\nThresholds as of {}:",
        report.thresholds.created_at.format("%Y-%m-%d %H:%M UTC")
    );
    println!("  problem:      {:.2}", report.thresholds.problem);
    println!("  solution:     {:.2}", report.thresholds.solution);
    println!("  feasibility:  {:.2}", report.thresholds.feasibility);
    println!("  gate:         {:.2}", report.thresholds.gate);
    Ok(())
}
