//! In-memory [`Tracker`] for command tests.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};

use crate::fetch::Outcome;
use crate::tracker::Tracker;
use crate::xmlrpc::Value;

pub const BASE_URL: &str = "https://trac.example.com";

#[derive(Default)]
pub struct FakeTracker {
    tickets: HashMap<i64, BTreeMap<String, Value>>,
    unavailable_tickets: HashSet<i64>,
    queries: HashMap<String, Vec<i64>>,
    feeds: HashMap<i64, String>,
    feed_failures: Cell<u32>,
    list_failures: Cell<u32>,
    attachments: HashMap<i64, Vec<(String, Vec<u8>)>>,
    broken_downloads: HashSet<String>,
    pub calls: RefCell<Vec<String>>,
}

impl FakeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ticket(mut self, id: i64, fields: BTreeMap<String, Value>) -> Self {
        self.tickets.insert(id, fields);
        self
    }

    /// `ticket.get` answers with a non-2xx status for this ID.
    pub fn with_unavailable_ticket(mut self, id: i64) -> Self {
        self.unavailable_tickets.insert(id);
        self
    }

    pub fn with_query(mut self, query: &str, ids: Vec<i64>) -> Self {
        self.queries.insert(query.to_string(), ids);
        self
    }

    pub fn with_feed(mut self, id: i64, xml: String) -> Self {
        self.feeds.insert(id, xml);
        self
    }

    /// The next `n` feed requests fail before the feed is served.
    pub fn failing_feed(self, n: u32) -> Self {
        self.feed_failures.set(n);
        self
    }

    pub fn failing_listing(self, n: u32) -> Self {
        self.list_failures.set(n);
        self
    }

    pub fn with_attachment(mut self, id: i64, name: &str, bytes: &[u8]) -> Self {
        self.attachments
            .entry(id)
            .or_default()
            .push((name.to_string(), bytes.to_vec()));
        self
    }

    /// Downloading this filename errors out at the transport level.
    pub fn with_broken_download(mut self, name: &str) -> Self {
        self.broken_downloads.insert(name.to_string());
        self
    }

    pub fn call_count(&self, prefix: &str) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn record(&self, call: String) {
        self.calls.borrow_mut().push(call);
    }

    fn attachment(&self, id: i64, filename: &str) -> Option<Vec<u8>> {
        self.attachments
            .get(&id)?
            .iter()
            .find(|(name, _)| name == filename)
            .map(|(_, bytes)| bytes.clone())
    }
}

fn take_failure(counter: &Cell<u32>) -> bool {
    let left = counter.get();
    if left > 0 {
        counter.set(left - 1);
        true
    } else {
        false
    }
}

impl Tracker for FakeTracker {
    fn base_url(&self) -> &str {
        BASE_URL
    }

    fn get_ticket(&self, id: i64) -> Result<Outcome<BTreeMap<String, Value>>> {
        self.record(format!("ticket.get {}", id));
        if self.unavailable_tickets.contains(&id) {
            return Ok(Outcome::Failed("ticket.get returned HTTP 502".to_string()));
        }
        Ok(match self.tickets.get(&id) {
            Some(fields) => Outcome::Data(fields.clone()),
            None => Outcome::Empty,
        })
    }

    fn query(&self, query: &str) -> Result<Outcome<Vec<i64>>> {
        self.record(format!("ticket.query {}", query));
        Ok(match self.queries.get(query) {
            Some(ids) => Outcome::Data(ids.clone()),
            None => Outcome::Empty,
        })
    }

    fn list_attachments(&self, id: i64) -> Result<Outcome<Vec<String>>> {
        self.record(format!("ticket.listAttachments {}", id));
        if take_failure(&self.list_failures) {
            return Ok(Outcome::Failed("HTTP 503".to_string()));
        }
        Ok(match self.attachments.get(&id) {
            Some(files) => Outcome::Data(files.iter().map(|(name, _)| name.clone()).collect()),
            None => Outcome::Empty,
        })
    }

    fn get_attachment(&self, id: i64, filename: &str) -> Result<Outcome<Vec<u8>>> {
        self.record(format!("ticket.getAttachment {} {}", id, filename));
        Ok(match self.attachment(id, filename) {
            Some(bytes) => Outcome::Data(bytes),
            None => Outcome::Empty,
        })
    }

    fn comments_feed(&self, id: i64) -> Result<Outcome<String>> {
        self.record(format!("feed {}", id));
        if take_failure(&self.feed_failures) {
            return Ok(Outcome::Failed("comments feed returned HTTP 500".to_string()));
        }
        Ok(match self.feeds.get(&id) {
            Some(xml) => Outcome::Data(xml.clone()),
            None => Outcome::Failed("comments feed returned HTTP 404".to_string()),
        })
    }

    fn raw_attachment(&self, id: i64, filename: &str) -> Result<Outcome<Vec<u8>>> {
        self.record(format!("raw-attachment {} {}", id, filename));
        if self.broken_downloads.contains(filename) {
            bail!("connection reset downloading {}", filename);
        }
        Ok(match self.attachment(id, filename) {
            Some(bytes) => Outcome::Data(bytes),
            None => Outcome::Failed("attachment download returned HTTP 404".to_string()),
        })
    }
}

pub fn ticket_fields(
    status: &str,
    reporter: &str,
    summary: &str,
    changetime: i64,
) -> BTreeMap<String, Value> {
    let at = |ts: i64| Value::DateTime(DateTime::<Utc>::from_timestamp(ts, 0).unwrap_or_default());
    let mut fields = BTreeMap::new();
    fields.insert("status".to_string(), Value::String(status.to_string()));
    fields.insert("reporter".to_string(), Value::String(reporter.to_string()));
    fields.insert("summary".to_string(), Value::String(summary.to_string()));
    fields.insert("time".to_string(), at(changetime - 3600));
    fields.insert("changetime".to_string(), at(changetime));
    fields.insert("_ts".to_string(), Value::String("1".to_string()));
    fields.insert("owner".to_string(), Value::String("carol".to_string()));
    fields
}

/// An RSS ticket feed with one item per `(timestamp, creator, link)`.
/// An empty creator omits the `dc:creator` element.
pub fn feed_xml(items: &[(i64, &str, &str)]) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0"?><rss version="2.0" xmlns:dc="http://purl.org/dc/elements/1.1/"><channel><title>t</title><link>l</link><description>d</description>"#,
    );
    for (ts, creator, link) in items {
        let date = DateTime::<Utc>::from_timestamp(*ts, 0)
            .unwrap_or_default()
            .to_rfc2822();
        xml.push_str("<item>");
        if !creator.is_empty() {
            xml.push_str(&format!("<dc:creator>{}</dc:creator>", creator));
        }
        xml.push_str(&format!(
            "<pubDate>{}</pubDate><title>changed</title><link>{}</link><guid>{}</guid><description>desc</description><category>ticket</category></item>",
            date, link, link
        ));
    }
    xml.push_str("</channel></rss>");
    xml
}
