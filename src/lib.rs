//! Exports tickets from a Trac instance into a local directory tree:
//! one `ticket.json` per ticket plus its attachments, partitioned by status.

pub mod commands;
pub mod config;
pub mod feed;
pub mod fetch;
pub mod models;
pub mod normalize;
pub mod tracker;
pub mod xmlrpc;

#[cfg(test)]
pub mod test_support;
