use crate::cmd::open_engine;
use crate::output::{fmt_score, print_json, print_table};
use std::path::Path;

pub fn run(root: &Path, all: bool, json: bool) -> anyhow::Result<()> {
    let engine = open_engine(root)?;
    let actions = engine.queue(all)?;

    if json {
        print_json(&actions)?;
        return Ok(());
    }

    if actions.is_empty() {
        println!("Queue is empty.");
        return Ok(());
    }

    let rows: Vec<Vec<String>> = actions
        .iter()
        .map(|a| {
            vec![
                a.id.to_string(),
                a.kind.to_string(),
                fmt_score(a.priority_score),
                a.status.to_string(),
                a.title.clone(),
            ]
        })
        .collect();
    print_table(&["ID", "KIND", "PRIORITY", "STATUS", "TITLE"], rows);
    Ok(())
}
