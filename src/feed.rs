//! Ticket change history from the `?format=rss` ticket view.

use anyhow::{Context, Result};
use chrono::DateTime;

use crate::models::Comment;

pub fn parse_comments(xml: &str) -> Result<Vec<Comment>> {
    let channel = xml
        .parse::<rss::Channel>()
        .context("Malformed comments feed")?;

    channel
        .items()
        .iter()
        .map(|item| {
            let pub_date = item
                .pub_date()
                .context("Feed item has no pubDate")?
                .to_string();
            let timestamp = pubdate_timestamp(&pub_date)?;

            Ok(Comment {
                title: item.title().unwrap_or_default().to_string(),
                link: item.link().unwrap_or_default().to_string(),
                guid: item
                    .guid()
                    .map(|g| g.value().to_string())
                    .unwrap_or_default(),
                description: item.description().unwrap_or_default().to_string(),
                category: item
                    .categories()
                    .first()
                    .map(|c| c.name().to_string())
                    .unwrap_or_default(),
                dc_creator: creator(item),
                pub_date,
                timestamp,
            })
        })
        .collect()
}

/// `Thu, 20 Jan 2022 02:34:51 GMT` to epoch seconds.
pub fn pubdate_timestamp(pub_date: &str) -> Result<i64> {
    DateTime::parse_from_rfc2822(pub_date.trim())
        .map(|dt| dt.timestamp())
        .with_context(|| format!("Invalid pubDate '{}'", pub_date))
}

fn creator(item: &rss::Item) -> String {
    if let Some(name) = item
        .dublin_core_ext()
        .and_then(|dc| dc.creators().first())
    {
        return name.clone();
    }

    // Feeds that use the `dc:` prefix without declaring the namespace end
    // up in the generic extension map.
    item.extensions()
        .get("dc")
        .and_then(|dc| dc.get("creator"))
        .and_then(|values| values.first())
        .and_then(|ext| ext.value())
        .unwrap_or_default()
        .to_string()
}
