use anyhow::{bail, Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::commands::report;
use crate::config::{AttachmentSource, Config};
use crate::feed;
use crate::fetch::{retry, Outcome};
use crate::models::{Attribution, Comment, ExportRecord, Ticket};
use crate::normalize;
use crate::tracker::Tracker;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExportSummary {
    pub exported: usize,
    pub skipped: usize,
    pub attachment_failures: usize,
}

#[derive(Debug)]
pub struct ExportedTicket {
    pub record: ExportRecord,
    pub attribution: Attribution,
    pub path: PathBuf,
    pub attachments: usize,
    pub attachment_failures: usize,
}

/// Exports every ticket in `ids`, writing one report line per exported
/// ticket to `out`.
pub fn run(
    tracker: &dyn Tracker,
    config: &Config,
    ids: &[i64],
    out: &mut impl Write,
) -> Result<ExportSummary> {
    let mut summary = ExportSummary::default();

    for &id in ids {
        match export_ticket(tracker, config, id)? {
            Some(exported) => {
                summary.exported += 1;
                summary.attachment_failures += exported.attachment_failures;
                let line = report::line(
                    id,
                    &exported.record.ticket,
                    &exported.attribution,
                    config.report_offset,
                );
                writeln!(out, "{}", line)?;
            }
            None => summary.skipped += 1,
        }
    }

    Ok(summary)
}

/// Fetches, attributes and persists one ticket. `None` when the ticket was
/// skipped.
pub fn export_ticket(
    tracker: &dyn Tracker,
    config: &Config,
    id: i64,
) -> Result<Option<ExportedTicket>> {
    let record = match fetch_record(tracker, config, id)? {
        Some(record) => record,
        None => return Ok(None),
    };

    let attribution = attribute(&record.ticket, &record.comments);
    let path = export_path(&config.export_dir, &record.ticket, id);
    fs::create_dir_all(&path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    let filenames = match retry(&config.retry, "attachment listing", || {
        tracker.list_attachments(id)
    })? {
        Outcome::Data(names) => names,
        Outcome::Empty => Vec::new(),
        Outcome::Failed(reason) => {
            warn!(ticket = id, "Giving up on attachment listing: {}", reason);
            Vec::new()
        }
    };

    let mut attachment_failures = 0;
    for filename in &filenames {
        if let Err(e) = save_attachment(tracker, config.attachment_source, id, filename, &path) {
            warn!(ticket = id, attachment = %filename, "Attachment not saved: {:#}", e);
            attachment_failures += 1;
        }
    }

    write_record(&path, &record)?;
    debug!(ticket = id, path = %path.display(), "Ticket exported");

    Ok(Some(ExportedTicket {
        record,
        attribution,
        path,
        attachments: filenames.len() - attachment_failures,
        attachment_failures,
    }))
}

/// The ticket with its comment history, or `None` when it can't be
/// exported.
pub fn fetch_record(
    tracker: &dyn Tracker,
    config: &Config,
    id: i64,
) -> Result<Option<ExportRecord>> {
    let raw = match tracker.get_ticket(id)? {
        Outcome::Data(raw) => raw,
        Outcome::Empty => {
            info!(ticket = id, "Ticket not found, skipping");
            return Ok(None);
        }
        Outcome::Failed(reason) => {
            warn!(ticket = id, "Ticket fetch failed, skipping: {}", reason);
            return Ok(None);
        }
    };

    let ticket = match normalize::ticket(id, tracker.base_url(), raw) {
        Ok(ticket) => ticket,
        Err(e) => {
            warn!(ticket = id, "Malformed ticket, skipping: {}", e);
            return Ok(None);
        }
    };

    let comments = fetch_comments(tracker, config, id)?;

    Ok(Some(ExportRecord {
        ticket,
        ticket_id: id,
        comments,
    }))
}

fn fetch_comments(tracker: &dyn Tracker, config: &Config, id: i64) -> Result<Vec<Comment>> {
    match retry(&config.retry, "comments feed", || tracker.comments_feed(id))? {
        Outcome::Data(xml) => feed::parse_comments(&xml)
            .with_context(|| format!("Failed to parse comments feed for ticket #{}", id)),
        Outcome::Empty => Ok(Vec::new()),
        Outcome::Failed(reason) => {
            warn!(ticket = id, "Giving up on comments feed: {}", reason);
            Ok(Vec::new())
        }
    }
}

/// The first comment stamped at the ticket's change time names the last
/// editor. Otherwise the reporter gets the credit, with no link.
pub fn attribute(ticket: &Ticket, comments: &[Comment]) -> Attribution {
    comments
        .iter()
        .find(|c| Some(c.timestamp) == ticket.changetime)
        .map(|c| Attribution {
            editor: c.dc_creator.clone(),
            link: Some(c.link.clone()),
        })
        .unwrap_or_else(|| Attribution {
            editor: ticket.reporter.clone(),
            link: None,
        })
}

/// `{root}/{status}/{id}_{reporter}_{summary}`, substituted as-is.
pub fn export_path(root: &Path, ticket: &Ticket, id: i64) -> PathBuf {
    root.join(&ticket.status)
        .join(format!("{}_{}_{}", id, ticket.reporter, ticket.summary))
}

fn save_attachment(
    tracker: &dyn Tracker,
    source: AttachmentSource,
    id: i64,
    filename: &str,
    export_path: &Path,
) -> Result<()> {
    let outcome = match source {
        AttachmentSource::Http => tracker.raw_attachment(id, filename)?,
        AttachmentSource::Rpc => tracker.get_attachment(id, filename)?,
    };
    let bytes = match outcome {
        Outcome::Data(bytes) => bytes,
        Outcome::Empty => bail!("tracker has no attachment '{}'", filename),
        Outcome::Failed(reason) => bail!(reason),
    };

    let dir = export_path.join("files");
    fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let file = dir.join(filename);
    fs::write(&file, &bytes).with_context(|| format!("Failed to write {}", file.display()))?;
    debug!(ticket = id, attachment = %filename, size = bytes.len(), "Attachment saved");
    Ok(())
}

pub fn write_record(export_path: &Path, record: &ExportRecord) -> Result<()> {
    let json = serde_json::to_string_pretty(record)?;
    let file = export_path.join("ticket.json");
    fs::write(&file, json).with_context(|| format!("Failed to write {}", file.display()))
}
