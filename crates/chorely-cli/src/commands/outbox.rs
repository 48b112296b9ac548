use std::path::Path;

use chrono::Utc;

use crate::commands::common::{format_outbox_lines, list_outbox, open_store, outbox_to_item};
use crate::error::CliError;

pub async fn run_outbox(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path)?;
    let entries = list_outbox(store.as_ref()).await?;
    let now_ms = Utc::now().timestamp_millis();

    if as_json {
        let items = entries
            .iter()
            .map(|entry| outbox_to_item(entry, now_ms))
            .collect::<Vec<_>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("Outbox is empty.");
        return Ok(());
    }

    for line in format_outbox_lines(&entries, now_ms) {
        println!("{line}");
    }
    Ok(())
}
