use std::thread;
use std::time::Duration;

use anyhow::Result;
use tracing::warn;

/// Result of one tracker call once transport-level fatal errors are
/// separated out.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Data(T),
    /// The tracker answered with a fault, e.g. "ticket does not exist".
    Empty,
    /// A transient failure (non-2xx status, timeout). Worth retrying.
    Failed(String),
}

impl<T> Outcome<T> {
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Outcome<U> {
        match self {
            Outcome::Data(t) => Outcome::Data(f(t)),
            Outcome::Empty => Outcome::Empty,
            Outcome::Failed(reason) => Outcome::Failed(reason),
        }
    }

    /// Like [`Outcome::map`] for conversions that can fail fatally.
    pub fn try_map<U, F: FnOnce(T) -> Result<U>>(self, f: F) -> Result<Outcome<U>> {
        Ok(match self {
            Outcome::Data(t) => Outcome::Data(f(t)?),
            Outcome::Empty => Outcome::Empty,
            Outcome::Failed(reason) => Outcome::Failed(reason),
        })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            attempts: 5,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn immediate(attempts: u32) -> Self {
        RetryPolicy {
            attempts,
            delay: Duration::ZERO,
        }
    }
}

/// Runs `op` until it yields `Data` or `Empty`, at most `policy.attempts`
/// times, sleeping `policy.delay` between attempts. Errors from `op` are
/// fatal and returned immediately.
pub fn retry<T, F>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<Outcome<T>>
where
    F: FnMut() -> Result<Outcome<T>>,
{
    let attempts = policy.attempts.max(1);
    let mut last_reason = String::new();

    for attempt in 1..=attempts {
        match op()? {
            Outcome::Failed(reason) => {
                warn!(attempt, attempts, "{} failed: {}", label, reason);
                last_reason = reason;
                if attempt < attempts && !policy.delay.is_zero() {
                    thread::sleep(policy.delay);
                }
            }
            done => return Ok(done),
        }
    }

    Ok(Outcome::Failed(last_reason))
}
