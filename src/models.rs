use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// A ticket as exported. Fields the tracker defines beyond the ones named
/// here are carried verbatim in `fields`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub status: String,
    pub reporter: String,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changetime: Option<i64>,
    /// Outer `None`: the tracker has no due-date field. `Some(None)`: the
    /// field exists but is unset, written as an explicit `null`.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "explicit_null"
    )]
    pub duedate: Option<Option<String>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "explicit_null"
    )]
    pub duedate_ts: Option<Option<i64>>,
    pub link: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    #[serde(rename = "pubDate")]
    pub pub_date: String,
    pub title: String,
    pub link: String,
    pub guid: String,
    pub description: String,
    pub category: String,
    pub dc_creator: String,
    pub timestamp: i64,
}

/// The document written to `ticket.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRecord {
    #[serde(flatten)]
    pub ticket: Ticket,
    pub ticket_id: i64,
    pub comments: Vec<Comment>,
}

/// Who last touched a ticket, for the console report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribution {
    pub editor: String,
    pub link: Option<String>,
}

fn explicit_null<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
