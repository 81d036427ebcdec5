use crate::cmd::open_engine;
use crate::output::print_json;
use anyhow::Context;
use chrono::Utc;
use greenlight_core::engine::Response;
use greenlight_core::queue::ActionStatus;
use std::path::Path;
use uuid::Uuid;

pub fn approve(root: &Path, id: &str, json: bool) -> anyhow::Result<()> {
    run(root, id, Response::Approve, json)
}

pub fn reject(root: &Path, id: &str, reason: Option<&str>, json: bool) -> anyhow::Result<()> {
    run(
        root,
        id,
        Response::Reject {
            reason: reason.map(str::to_string),
        },
        json,
    )
}

pub fn skip(root: &Path, id: &str, json: bool) -> anyhow::Result<()> {
    run(root, id, Response::Skip, json)
}

fn run(root: &Path, id: &str, response: Response, json: bool) -> anyhow::Result<()> {
    let id = Uuid::parse_str(id).with_context(|| format!("invalid action id '{id}'"))?;
    let engine = open_engine(root)?;
    let outcome = engine.respond(engine.operator(), id, response, Utc::now())?;

    if json {
        print_json(&outcome)?;
        return Ok(());
    }

    let verb = match outcome.status {
        ActionStatus::Completed => "approved",
        ActionStatus::Rejected => "rejected",
        ActionStatus::Skipped => "skipped",
        ActionStatus::Expired => "expired",
        ActionStatus::Pending => "pending",
    };
    if !outcome.changed {
        println!("Action {} was already {}; nothing changed.", outcome.action_id, verb);
        return Ok(());
    }
    println!("Action {} {}.", outcome.action_id, verb);
    if let Some(slug) = &outcome.venture {
        println!("Venture:   {slug}");
    }
    Ok(())
}
