use crate::cmd::open_engine;
use crate::output::{fmt_score, print_json};
use chrono::Utc;
use std::path::Path;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let engine = open_engine(root)?;
    let action = engine.next_action(engine.operator(), Utc::now())?;

    if json {
        match &action {
            Some(action) => print_json(action)?,
            None => print_json(&serde_json::Value::Null)?,
        }
        return Ok(());
    }

    let Some(action) = action else {
        // None covers both an empty queue and the post-completion pause
        if engine.queue(false)?.is_empty() {
            println!("No pending actions.");
        } else {
            println!("Pending actions exist; the prompt gap is still open. Try again shortly.");
        }
        return Ok(());
    };

    println!("Action:    {}", action.title);
    println!("Id:        {}", action.id);
    println!("Kind:      {}", action.kind);
    println!("Priority:  {}", fmt_score(action.priority_score));
    println!("Queued:    {}", action.created_at.format("%Y-%m-%d %H:%M UTC"));
    println!("\n{}", action.description);
    println!(
        "\nRespond: greenlight approve {id} | greenlight reject {id} | greenlight skip {id}",
        id = action.id
    );
    Ok(())
}
