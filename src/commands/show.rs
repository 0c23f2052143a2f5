use anyhow::{bail, Result};
use std::io::Write;

use crate::commands::export;
use crate::config::Config;
use crate::tracker::Tracker;

/// Prints the record `export` would write for ticket `id`, without touching
/// the export tree.
pub fn run(tracker: &dyn Tracker, config: &Config, id: i64, out: &mut impl Write) -> Result<()> {
    let record = match export::fetch_record(tracker, config, id)? {
        Some(record) => record,
        None => bail!("Ticket #{} not found", id),
    };

    let attribution = export::attribute(&record.ticket, &record.comments);
    writeln!(out, "{}", serde_json::to_string_pretty(&record)?)?;
    writeln!(
        out,
        "Last edited by {}{}",
        attribution.editor,
        attribution
            .link
            .map(|link| format!(" ({})", link))
            .unwrap_or_default()
    )?;
    Ok(())
}
