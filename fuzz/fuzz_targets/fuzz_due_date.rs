#![no_main]

//! Fuzz target for due-date repair and ticket normalization.
//!
//! Due dates are free text typed by users. Repair slices on component
//! boundaries, so multi-byte characters and odd separators must not panic.

use std::collections::BTreeMap;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use trac_crawler::normalize;
use trac_crawler::xmlrpc::Value;

#[derive(Arbitrary, Debug)]
struct TicketInput {
    duedate: Option<String>,
    status: String,
    reporter: String,
    summary: String,
    time: i32,
    has_time: bool,
}

fuzz_target!(|input: TicketInput| {
    if let Some(ref due) = input.duedate {
        let repaired = normalize::repair_due_date(due);
        let _ = normalize::due_date_timestamp(&repaired);
    }

    let mut raw = BTreeMap::new();
    raw.insert("status".to_string(), Value::String(input.status));
    raw.insert("reporter".to_string(), Value::String(input.reporter));
    raw.insert("summary".to_string(), Value::String(input.summary));
    if input.has_time {
        if let Some(at) = chrono::DateTime::from_timestamp(i64::from(input.time), 0) {
            raw.insert("time".to_string(), Value::DateTime(at));
            raw.insert("changetime".to_string(), Value::DateTime(at));
        }
    }
    if let Some(due) = input.duedate {
        raw.insert("duedate".to_string(), Value::String(due));
    }

    if let Ok(ticket) = normalize::ticket(1, "https://trac.example.com", raw) {
        assert!(ticket.duedate.is_some() || !input.has_time);
        let _ = serde_json::to_string(&ticket);
    }
});
