use chrono::{DateTime, FixedOffset};

use crate::models::{Attribution, Ticket};

const GREY: &str = "\x1b[1;30m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RESET: &str = "\x1b[0m";

/// One console line per exported ticket:
/// date, time, `#id`, `(by editor)`, summary, last edit link.
pub fn line(id: i64, ticket: &Ticket, attribution: &Attribution, offset: FixedOffset) -> String {
    let (date, time) = ticket
        .changetime
        .and_then(|ts| DateTime::from_timestamp(ts, 0))
        .map(|dt| {
            let local = dt.with_timezone(&offset);
            (
                local.format("%Y-%m-%d").to_string(),
                local.format("%H:%M").to_string(),
            )
        })
        .unwrap_or_default();

    format!(
        "{GREY}{date} {RESET}{time} #{id} (by {GREEN}{editor}{RESET}) {summary} {YELLOW}{link}{RESET}",
        editor = attribution.editor,
        summary = ticket.summary,
        link = attribution.link.as_deref().unwrap_or(""),
    )
}
