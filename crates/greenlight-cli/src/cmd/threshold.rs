use crate::cmd::open_engine;
use crate::output::{print_json, print_table};
use chrono::Utc;
use clap::Subcommand;
use greenlight_core::threshold::{ThresholdField, ThresholdSnapshot};
use std::path::Path;

#[derive(Subcommand)]
pub enum ThresholdSubcommand {
    /// Show the active threshold snapshot
    Show {
        /// Show the full append-only snapshot history
        #[arg(long)]
        history: bool,
    },
    /// Override one threshold field out of cycle
    Set {
        /// problem | solution | feasibility | gate
        field: String,
        value: f64,
    },
}

pub fn run(root: &Path, subcommand: ThresholdSubcommand, json: bool) -> anyhow::Result<()> {
    match subcommand {
        ThresholdSubcommand::Show { history } => show(root, history, json),
        ThresholdSubcommand::Set { field, value } => set(root, &field, value, json),
    }
}

fn show(root: &Path, history: bool, json: bool) -> anyhow::Result<()> {
    let engine = open_engine(root)?;

    if history {
        let snapshots = engine.threshold_history()?;
        if json {
            print_json(&snapshots)?;
            return Ok(());
        }
        let rows: Vec<Vec<String>> = snapshots.iter().map(snapshot_row).collect();
        print_table(
            &["WHEN", "GATE", "PROBLEM", "SOLUTION", "FEAS", "RATE", "ITEMS", "RATIONALE"],
            rows,
        );
        return Ok(());
    }

    let snapshot = engine.current_thresholds()?;
    if json {
        print_json(&snapshot)?;
        return Ok(());
    }
    println!("Thresholds as of {}:", snapshot.created_at.format("%Y-%m-%d %H:%M UTC"));
    println!("  problem:      {:.2}", snapshot.problem);
    println!("  solution:     {:.2}", snapshot.solution);
    println!("  feasibility:  {:.2}", snapshot.feasibility);
    println!("  gate:         {:.2}", snapshot.gate);
    println!("  rationale:    {}", snapshot.rationale);
    Ok(())
}

fn set(root: &Path, field: &str, value: f64, json: bool) -> anyhow::Result<()> {
    let field: ThresholdField = field.parse()?;
    let engine = open_engine(root)?;
    let snapshot = engine.set_threshold(field, value, Utc::now())?;

    if json {
        print_json(&snapshot)?;
        return Ok(());
    }
    println!("Set {} to {:.2}.", field, snapshot.get(field));
    Ok(())
}

fn snapshot_row(snapshot: &ThresholdSnapshot) -> Vec<String> {
    vec![
        snapshot.created_at.format("%Y-%m-%d %H:%M").to_string(),
        format!("{:.2}", snapshot.gate),
        format!("{:.2}", snapshot.problem),
        format!("{:.2}", snapshot.solution),
        format!("{:.2}", snapshot.feasibility),
        format!("{:.2}", snapshot.observed_approval_rate),
        snapshot
            .window_items
            .map(|n| n.to_string())
            .unwrap_or_else(|| "-".to_string()),
        snapshot.rationale.clone(),
    ]
}
