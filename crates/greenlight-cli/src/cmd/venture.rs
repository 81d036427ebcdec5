use crate::cmd::open_engine;
use crate::output::{print_json, print_table};
use anyhow::Context;
use chrono::Utc;
use clap::Subcommand;
use greenlight_core::types::Stage;
use std::path::Path;

#[derive(Subcommand)]
pub enum VentureSubcommand {
    /// Create a venture directly, bypassing the gate queue
    Create {
        /// Venture title; the slug is derived from it
        title: String,
    },
    /// List all ventures
    List,
    /// Show one venture and its stage history
    Show { slug: String },
    /// Advance a venture to a later stage
    Advance { slug: String, stage: String },
    /// Queue a stage approval for the operator instead of advancing directly
    Request { slug: String, stage: String },
}

pub fn run(root: &Path, subcommand: VentureSubcommand, json: bool) -> anyhow::Result<()> {
    match subcommand {
        VentureSubcommand::Create { title } => create(root, &title, json),
        VentureSubcommand::List => list(root, json),
        VentureSubcommand::Show { slug } => show(root, &slug, json),
        VentureSubcommand::Advance { slug, stage } => advance(root, &slug, &stage, json),
        VentureSubcommand::Request { slug, stage } => request(root, &slug, &stage, json),
    }
}

fn parse_stage(stage: &str) -> anyhow::Result<Stage> {
    stage
        .parse()
        .with_context(|| format!("valid stages: {}", stage_names()))
}

fn stage_names() -> String {
    Stage::all()
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn create(root: &Path, title: &str, json: bool) -> anyhow::Result<()> {
    let engine = open_engine(root)?;
    let venture = engine
        .create_venture(title)
        .with_context(|| format!("failed to create venture '{title}'"))?;

    if json {
        print_json(&venture)?;
        return Ok(());
    }
    println!("Created venture '{}' at {}.", venture.slug, venture.stage);
    Ok(())
}

fn list(root: &Path, json: bool) -> anyhow::Result<()> {
    let engine = open_engine(root)?;
    let ventures = engine.ventures()?;

    if json {
        print_json(&ventures)?;
        return Ok(());
    }

    if ventures.is_empty() {
        println!("No ventures.");
        return Ok(());
    }

    let rows: Vec<Vec<String>> = ventures
        .iter()
        .map(|v| {
            vec![
                v.slug.clone(),
                v.stage.to_string(),
                if v.locked { "yes" } else { "" }.to_string(),
                v.title.clone(),
            ]
        })
        .collect();
    print_table(&["SLUG", "STAGE", "LOCKED", "TITLE"], rows);
    Ok(())
}

fn show(root: &Path, slug: &str, json: bool) -> anyhow::Result<()> {
    let engine = open_engine(root)?;
    let venture = engine
        .venture(slug)
        .with_context(|| format!("venture '{slug}' not found"))?;

    if json {
        print_json(&venture)?;
        return Ok(());
    }

    println!("Venture:  {} - {}", venture.slug, venture.title);
    println!("Stage:    {}", venture.stage);
    println!("Created:  {}", venture.created_at.format("%Y-%m-%d %H:%M UTC"));
    if venture.locked {
        println!("Locked:   yes");
    }
    if !venture.stage_history.is_empty() {
        println!("History:");
        for t in &venture.stage_history {
            println!("  {:<15} {}", t.stage, t.entered.format("%Y-%m-%d %H:%M UTC"));
        }
    }
    Ok(())
}

fn advance(root: &Path, slug: &str, stage: &str, json: bool) -> anyhow::Result<()> {
    let target = parse_stage(stage)?;
    let engine = open_engine(root)?;
    let (venture, moved) = engine.advance_venture(slug, target, Utc::now())?;

    if json {
        print_json(&serde_json::json!({
            "slug": venture.slug,
            "stage": venture.stage,
            "moved": moved,
        }))?;
        return Ok(());
    }
    if moved {
        println!("Venture '{}' advanced to {}.", venture.slug, venture.stage);
    } else {
        println!("Venture '{}' is already at {}.", venture.slug, venture.stage);
    }
    Ok(())
}

fn request(root: &Path, slug: &str, stage: &str, json: bool) -> anyhow::Result<()> {
    let target = parse_stage(stage)?;
    let engine = open_engine(root)?;
    let action_id = engine.request_advance(slug, target, Utc::now())?;

    if json {
        print_json(&serde_json::json!({
            "slug": slug,
            "stage": target,
            "action_id": action_id,
        }))?;
        return Ok(());
    }
    println!("Queued stage approval {action_id} for '{slug}' -> {target}.");
    Ok(())
}
