use std::collections::BTreeMap;

use anyhow::{anyhow, bail, Context, Result};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Url;
use tracing::debug;

use crate::config::Credential;
use crate::fetch::Outcome;
use crate::xmlrpc::{self, MethodResponse, Value};

const USER_AGENT: &str = concat!("trac-crawler/", env!("CARGO_PKG_VERSION"));

/// The remote issue tracker: its XML-RPC interface, the RSS ticket view
/// and raw attachment downloads.
///
/// Faults map to [`Outcome::Empty`], transient HTTP trouble to
/// [`Outcome::Failed`]; anything else is a fatal `Err`.
pub trait Tracker {
    /// `https://host/path`, no trailing slash.
    fn base_url(&self) -> &str;

    /// `ticket.get`, returning the field struct (element 3 of the reply).
    fn get_ticket(&self, id: i64) -> Result<Outcome<BTreeMap<String, Value>>>;

    /// `ticket.query`
    fn query(&self, query: &str) -> Result<Outcome<Vec<i64>>>;

    /// `ticket.listAttachments`, filenames only.
    fn list_attachments(&self, id: i64) -> Result<Outcome<Vec<String>>>;

    /// `ticket.getAttachment`
    fn get_attachment(&self, id: i64, filename: &str) -> Result<Outcome<Vec<u8>>>;

    /// Body of `/ticket/{id}?format=rss`.
    fn comments_feed(&self, id: i64) -> Result<Outcome<String>>;

    /// Body of `/raw-attachment/ticket/{id}/{filename}`.
    fn raw_attachment(&self, id: i64, filename: &str) -> Result<Outcome<Vec<u8>>>;
}

pub struct TracClient {
    http: Client,
    base_url: String,
    credential: Option<Credential>,
}

impl TracClient {
    pub fn new(base_url: impl Into<String>, credential: Option<Credential>) -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(TracClient {
            http,
            base_url: base_url.into(),
            credential,
        })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credential {
            Some(cred) => request.basic_auth(&cred.user, Some(&cred.password)),
            None => request,
        }
    }

    fn send(&self, request: RequestBuilder, what: &str) -> Result<Outcome<Response>> {
        match self.authorize(request).send() {
            Ok(response) if response.status().is_success() => Ok(Outcome::Data(response)),
            Ok(response) => Ok(Outcome::Failed(format!(
                "{} returned HTTP {}",
                what,
                response.status()
            ))),
            Err(e) if e.is_timeout() || e.is_connect() => {
                Ok(Outcome::Failed(format!("{}: {}", what, e)))
            }
            Err(e) => Err(e).with_context(|| format!("{} failed", what)),
        }
    }

    fn call(&self, method: &str, params: &[Value]) -> Result<Outcome<Value>> {
        debug!(method, "XML-RPC call");
        let request = self
            .http
            .post(format!("{}/xmlrpc", self.base_url))
            .header(CONTENT_TYPE, "application/xml")
            .header(ACCEPT, "application/xml")
            .body(xmlrpc::encode_call(method, params));

        let body = match self.send(request, method)? {
            Outcome::Data(response) => response
                .text()
                .with_context(|| format!("Failed to read {} response", method))?,
            Outcome::Empty => return Ok(Outcome::Empty),
            Outcome::Failed(reason) => return Ok(Outcome::Failed(reason)),
        };

        match xmlrpc::parse_response(&body)
            .with_context(|| format!("Malformed {} response", method))?
        {
            MethodResponse::Success(value) => Ok(Outcome::Data(value)),
            MethodResponse::Fault(fault) => {
                debug!(method, %fault, "XML-RPC fault");
                Ok(Outcome::Empty)
            }
        }
    }

    fn raw_attachment_url(&self, id: i64, filename: &str) -> Result<Url> {
        let id = id.to_string();
        let mut url = Url::parse(&self.base_url)
            .with_context(|| format!("Invalid tracker URL '{}'", self.base_url))?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("Tracker URL '{}' cannot carry a path", self.base_url))?
            .pop_if_empty()
            .extend(["raw-attachment", "ticket", id.as_str(), filename]);
        Ok(url)
    }
}

impl Tracker for TracClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn get_ticket(&self, id: i64) -> Result<Outcome<BTreeMap<String, Value>>> {
        self.call("ticket.get", &[Value::Int(id)])?.try_map(|value| {
            value
                .into_array()
                .and_then(|items| items.into_iter().nth(3))
                .and_then(Value::into_struct)
                .with_context(|| format!("Unexpected ticket.get reply for #{}", id))
        })
    }

    fn query(&self, query: &str) -> Result<Outcome<Vec<i64>>> {
        self.call("ticket.query", &[Value::String(query.to_string())])?
            .try_map(|value| {
                value
                    .into_array()
                    .context("Unexpected ticket.query reply")?
                    .iter()
                    .map(|v| {
                        v.as_i64()
                            .with_context(|| format!("Non-integer ticket ID {:?}", v))
                    })
                    .collect()
            })
    }

    fn list_attachments(&self, id: i64) -> Result<Outcome<Vec<String>>> {
        self.call("ticket.listAttachments", &[Value::Int(id)])?
            .try_map(|value| {
                let rows = value
                    .into_array()
                    .context("Unexpected ticket.listAttachments reply")?;
                let mut names = Vec::with_capacity(rows.len());
                for row in rows {
                    match row.into_array().and_then(|r| r.into_iter().next()) {
                        Some(Value::String(name)) => names.push(name),
                        other => bail!("Unexpected attachment entry {:?}", other),
                    }
                }
                Ok(names)
            })
    }

    fn get_attachment(&self, id: i64, filename: &str) -> Result<Outcome<Vec<u8>>> {
        let params = [Value::Int(id), Value::String(filename.to_string())];
        self.call("ticket.getAttachment", &params)?
            .try_map(|value| match value {
                Value::Base64(bytes) => Ok(bytes),
                other => bail!("Unexpected ticket.getAttachment reply {:?}", other),
            })
    }

    fn comments_feed(&self, id: i64) -> Result<Outcome<String>> {
        debug!(ticket = id, "Fetching comments feed");
        let request = self
            .http
            .get(format!("{}/ticket/{}", self.base_url, id))
            .query(&[("format", "rss")]);

        self.send(request, "comments feed")?
            .try_map(|response| response.text().context("Failed to read comments feed"))
    }

    fn raw_attachment(&self, id: i64, filename: &str) -> Result<Outcome<Vec<u8>>> {
        let url = self.raw_attachment_url(id, filename)?;
        debug!(ticket = id, %url, "Downloading attachment");

        self.send(self.http.get(url), "attachment download")?
            .try_map(|response| {
                Ok(response
                    .bytes()
                    .context("Failed to read attachment body")?
                    .to_vec())
            })
    }
}
