use crate::cmd::open_engine;
use crate::output::{fmt_score, print_json, print_table};
use anyhow::Context;
use chrono::Utc;
use greenlight_core::engine::IngestOutcome;
use greenlight_core::item::ItemDraft;
use std::path::Path;

/// Score drafts from a JSON file. A top-level object is a single draft;
/// a top-level array goes through the batch path, which also normalizes
/// multi-problem discovery output onto the descending band.
pub fn run(root: &Path, file: &Path, json: bool) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let value: serde_json::Value =
        serde_json::from_str(&raw).context("draft file is not valid JSON")?;

    let engine = open_engine(root)?;
    let now = Utc::now();

    let outcomes = if value.is_array() {
        let drafts: Vec<ItemDraft> =
            serde_json::from_value(value).context("draft array has an unexpected shape")?;
        engine.ingest_batch(drafts, now)?
    } else {
        let draft: ItemDraft =
            serde_json::from_value(value).context("draft object has an unexpected shape")?;
        vec![engine.ingest(draft, now)?]
    };

    if json {
        print_json(&outcomes)?;
        return Ok(());
    }

    let rows: Vec<Vec<String>> = outcomes
        .iter()
        .enumerate()
        .map(|(i, outcome)| {
            let (label, score, detail) = match outcome {
                IngestOutcome::Queued {
                    item_id, score, ..
                } => ("queued", fmt_score(*score), item_id.to_string()),
                IngestOutcome::Recorded { item_id, score } => {
                    ("recorded", fmt_score(*score), item_id.to_string())
                }
                IngestOutcome::Duplicate => ("duplicate", "-".to_string(), String::new()),
                IngestOutcome::Invalid { reason } => {
                    ("invalid", "-".to_string(), reason.clone())
                }
            };
            vec![(i + 1).to_string(), label.to_string(), score, detail]
        })
        .collect();
    print_table(&["#", "OUTCOME", "SCORE", "DETAIL"], rows);

    let queued = outcomes
        .iter()
        .filter(|o| matches!(o, IngestOutcome::Queued { .. }))
        .count();
    if queued > 0 {
        println!("\n{queued} action(s) queued. Run: greenlight next");
    }
    Ok(())
}
