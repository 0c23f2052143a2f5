//! Turns the raw `ticket.get` field struct into a [`Ticket`].

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use thiserror::Error;
use tracing::warn;

use crate::models::Ticket;
use crate::xmlrpc::Value;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("ticket has no '{0}' field")]
    MissingField(&'static str),
    #[error("ticket field '{0}' is not a timestamp")]
    InvalidTimestamp(&'static str),
}

pub fn ticket_link(base_url: &str, id: i64) -> String {
    format!("{}/ticket/{}", base_url, id)
}

pub fn ticket(
    id: i64,
    base_url: &str,
    mut raw: BTreeMap<String, Value>,
) -> Result<Ticket, NormalizeError> {
    // revision counter used for optimistic locking on update
    raw.remove("_ts");
    // derived keys win over tracker fields of the same name
    for derived in ["link", "duedate_ts", "ticket_id", "comments"] {
        raw.remove(derived);
    }

    let status = take_text(&mut raw, "status")?;
    let reporter = take_text(&mut raw, "reporter")?;
    let summary = take_text(&mut raw, "summary")?;
    let time = take_timestamp(&mut raw, "time")?;
    let changetime = take_timestamp(&mut raw, "changetime")?;

    let due = raw.remove("duedate").map(|v| match v {
        Value::String(s) => Some(s),
        _ => None,
    });
    let (duedate, duedate_ts) = match due {
        Some(Some(text)) if !text.is_empty() => {
            let repaired = if text.chars().count() == 10 {
                text
            } else {
                repair_due_date(&text)
            };
            let ts = due_date_timestamp(&repaired);
            if ts.is_none() {
                warn!(ticket = id, duedate = %repaired, "Unparseable due date");
            }
            (Some(Some(repaired)), Some(ts))
        }
        Some(_) => (Some(None), Some(None)),
        None if time.is_some() => (Some(None), Some(None)),
        None => (None, None),
    };

    let fields = raw.into_iter().map(|(k, v)| (k, v.into_json())).collect();

    Ok(Ticket {
        status,
        reporter,
        summary,
        time,
        changetime,
        duedate,
        duedate_ts,
        link: ticket_link(base_url, id),
        fields,
    })
}

fn take_text(
    raw: &mut BTreeMap<String, Value>,
    name: &'static str,
) -> Result<String, NormalizeError> {
    match raw.remove(name) {
        Some(Value::String(s)) => Ok(s),
        Some(Value::Int(i)) => Ok(i.to_string()),
        _ => Err(NormalizeError::MissingField(name)),
    }
}

fn take_timestamp(
    raw: &mut BTreeMap<String, Value>,
    name: &'static str,
) -> Result<Option<i64>, NormalizeError> {
    raw.remove(name)
        .map(|v| v.as_timestamp().ok_or(NormalizeError::InvalidTimestamp(name)))
        .transpose()
}

/// Repairs hand-typed due dates: single-digit components are zero padded
/// and an eight character result is read as `MM-DD-YY`.
pub fn repair_due_date(text: &str) -> String {
    let padded = text
        .split('-')
        .map(|part| {
            if part.chars().count() < 2 {
                format!("0{}", part)
            } else {
                part.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("-");

    if padded.chars().count() == 8 {
        if let Ok(date) = NaiveDate::parse_from_str(&padded, "%m-%d-%y") {
            // two-digit years 69-99 are 1969-1999
            let date = if date.year() >= 2069 {
                date.with_year(date.year() - 100).unwrap_or(date)
            } else {
                date
            };
            return date.format("%Y-%m-%d").to_string();
        }
    }
    padded
}

/// Midnight UTC of a `YYYY-MM-DD` date, in epoch seconds.
pub fn due_date_timestamp(date: &str) -> Option<i64> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp())
}
