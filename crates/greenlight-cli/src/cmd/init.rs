use crate::output::print_json;
use anyhow::Context;
use chrono::Utc;
use greenlight_core::engine::Engine;
use std::path::Path;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let project_name = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "project".to_string());

    let created = Engine::init(root, &project_name, Utc::now())
        .context("failed to initialize greenlight")?;

    if json {
        print_json(&serde_json::json!({
            "root": root.display().to_string(),
            "project": project_name,
            "created": created,
        }))?;
        return Ok(());
    }

    println!("Initializing greenlight in: {}", root.display());
    if created {
        println!("  created: .greenlight/config.yaml");
    } else {
        println!("  exists:  .greenlight/config.yaml");
    }
    println!("  store:   .greenlight/greenlight.db");
    println!("\nNext: greenlight ingest --file <drafts.json>");
    Ok(())
}
