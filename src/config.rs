use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::Engine as _;
use chrono::FixedOffset;
use clap::{Args, ValueEnum};

use crate::fetch::RetryPolicy;

/// Where attachment bytes are downloaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AttachmentSource {
    /// `GET /raw-attachment/ticket/{id}/{filename}`
    Http,
    /// `ticket.getAttachment` over XML-RPC
    Rpc,
}

/// Settings as read from the environment (or the equivalent flags).
#[derive(Debug, Clone, Args)]
pub struct ConfigArgs {
    /// Tracker host and path, e.g. trac.example.com/project
    #[arg(long, env = "TRAC_PATH", default_value = "")]
    pub trac_path: String,

    /// Base64-encoded `user:password`
    #[arg(long, env = "CREDENTIAL", default_value = "", hide_env_values = true)]
    pub credential: String,

    /// Comma-separated ticket IDs
    #[arg(long, env = "TICKET_IDS", default_value = "")]
    pub ticket_ids: String,

    /// Comma-separated keywords; every ticket tagged with one is exported
    #[arg(long, env = "KEYWORDS", default_value = "")]
    pub keywords: String,

    /// Root of the export tree
    #[arg(long, env = "EXPORT_DIR", default_value = "export")]
    pub export_dir: PathBuf,

    /// Attempts for the comments feed and attachment listing
    #[arg(long, env = "RETRY_ATTEMPTS", default_value_t = 5)]
    pub retry_attempts: u32,

    /// Seconds to sleep between attempts
    #[arg(
        long,
        env = "RETRY_DELAY_SECS",
        default_value_t = 1.0,
        allow_negative_numbers = true
    )]
    pub retry_delay_secs: f64,

    /// Hours added to UTC when printing report timestamps
    #[arg(
        long,
        env = "REPORT_UTC_OFFSET",
        default_value_t = 8,
        allow_negative_numbers = true
    )]
    pub report_utc_offset: i32,

    #[arg(long, env = "ATTACHMENT_SOURCE", value_enum, default_value_t = AttachmentSource::Http)]
    pub attachment_source: AttachmentSource,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub user: String,
    pub password: String,
}

impl Credential {
    /// Decodes a base64 `user:password` string. An empty input means
    /// anonymous access.
    pub fn decode(encoded: &str) -> Result<Option<Credential>> {
        let encoded = encoded.trim();
        if encoded.is_empty() {
            return Ok(None);
        }

        let raw = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .context("Credential is not valid base64")?;
        let text = String::from_utf8(raw).context("Credential is not valid UTF-8")?;

        match text.split_once(':') {
            Some((user, password)) => Ok(Some(Credential {
                user: user.to_string(),
                password: password.to_string(),
            })),
            None => bail!("Credential must decode to 'user:password'"),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub credential: Option<Credential>,
    pub ticket_ids: Vec<i64>,
    pub keywords: Vec<String>,
    pub export_dir: PathBuf,
    pub retry: RetryPolicy,
    pub report_offset: FixedOffset,
    pub attachment_source: AttachmentSource,
}

impl ConfigArgs {
    pub fn into_config(self) -> Result<Config> {
        let delay = Duration::try_from_secs_f64(self.retry_delay_secs).with_context(|| {
            format!("Invalid retry delay '{}'", self.retry_delay_secs)
        })?;
        let report_offset = self
            .report_utc_offset
            .checked_mul(3600)
            .and_then(FixedOffset::east_opt)
            .with_context(|| format!("Invalid UTC offset '{}'", self.report_utc_offset))?;

        Ok(Config {
            base_url: base_url(&self.trac_path),
            credential: Credential::decode(&self.credential)?,
            ticket_ids: parse_ticket_ids(&self.ticket_ids)?,
            keywords: parse_keywords(&self.keywords),
            export_dir: self.export_dir,
            retry: RetryPolicy {
                attempts: self.retry_attempts,
                delay,
            },
            report_offset,
            attachment_source: self.attachment_source,
        })
    }
}

pub fn base_url(trac_path: &str) -> String {
    format!("https://{}", trac_path.trim().trim_end_matches('/'))
}

pub fn parse_ticket_ids(raw: &str) -> Result<Vec<i64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>()
                .with_context(|| format!("Invalid ticket ID '{}'", s))
        })
        .collect()
}

pub fn parse_keywords(raw: &str) -> Vec<String> {
    raw.split(',')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
