use std::collections::HashSet;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::fetch::Outcome;
use crate::tracker::Tracker;

/// Every ticket whose keywords field contains `keyword`, unbounded.
pub fn keyword_query(keyword: &str) -> String {
    format!("keywords=~{}&max=0", keyword)
}

/// Literal IDs first, then each keyword's matches, with later duplicates
/// dropped.
pub fn run(tracker: &dyn Tracker, ids: &[i64], keywords: &[String]) -> Result<Vec<i64>> {
    let mut resolved = ids.to_vec();

    for keyword in keywords {
        match tracker.query(&keyword_query(keyword))? {
            Outcome::Data(found) => {
                debug!(keyword = %keyword, count = found.len(), "Keyword matched tickets");
                resolved.extend(found);
            }
            Outcome::Empty => info!(keyword = %keyword, "Keyword query faulted, skipping"),
            Outcome::Failed(reason) => {
                warn!(keyword = %keyword, "Keyword query failed: {}", reason)
            }
        }
    }

    Ok(dedup(resolved))
}

pub fn dedup(ids: Vec<i64>) -> Vec<i64> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}
