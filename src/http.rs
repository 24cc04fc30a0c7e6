#![forbid(unsafe_code)]

//! Blocking HTTP access and request pacing.
//!
//! Workers call the API through a [`Transport`] so the pagination logic can be
//! exercised against scripted responses. [`RatePolicy`] replaces the old fixed
//! one-second sleep: it keeps a minimum gap between requests of one fetch
//! sequence and backs off when the server answers 429 or 503.

use parking_lot::Mutex;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::{HarvestError, Result};

pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/58.0.3029.110 Safari/537.3";

/// Upper bound for a server supplied `Retry-After`.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub retry_after: Option<Duration>,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    fn is_throttled(&self) -> bool {
        matches!(self.status, 429 | 503)
    }
}

/// A GET-only HTTP client. Non-2xx statuses are returned as responses, not
/// errors; only transport failures (DNS, connect, timeout, body read) fail.
pub trait Transport: Send + Sync {
    fn get(&self, url: &str) -> Result<HttpResponse>;
}

/// Production transport: a `ureq` agent carrying the browser user agent.
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build();
        Self { agent }
    }
}

impl Transport for UreqTransport {
    fn get(&self, url: &str) -> Result<HttpResponse> {
        let response = match self.agent.get(url).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(_, response)) => response,
            Err(ureq::Error::Transport(err)) => {
                return Err(HarvestError::Transport {
                    url: url.to_string(),
                    message: err.to_string(),
                });
            }
        };

        let status = response.status();
        let retry_after = response
            .header("Retry-After")
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response.into_string().map_err(|err| HarvestError::Transport {
            url: url.to_string(),
            message: err.to_string(),
        })?;

        Ok(HttpResponse {
            status,
            retry_after,
            body,
        })
    }
}

/// Pacing and retry knobs shared by every worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatePolicy {
    /// Minimum gap between two requests of the same fetch sequence.
    pub min_interval: Duration,
    /// Retries after a 429/503 before the status is reported as an error.
    pub max_retries: u32,
    /// First backoff delay; doubled on every further retry.
    pub base_backoff: Duration,
}

impl Default for RatePolicy {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(1),
            max_retries: 3,
            base_backoff: Duration::from_secs(2),
        }
    }
}

impl RatePolicy {
    pub fn backoff_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        match retry_after {
            Some(delay) => delay.min(MAX_RETRY_AFTER),
            None => self.base_backoff.saturating_mul(2u32.saturating_pow(attempt)),
        }
    }
}

/// Process-wide throttle state. When one worker gets throttled every worker
/// waits out the same cooldown before its next request.
#[derive(Debug, Default)]
pub struct RateLimiter {
    policy: RatePolicy,
    cooldown_until: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(policy: RatePolicy) -> Self {
        Self {
            policy,
            cooldown_until: Mutex::new(None),
        }
    }

    fn wait_for_cooldown(&self) {
        let until = *self.cooldown_until.lock();
        if let Some(until) = until {
            let now = Instant::now();
            if until > now {
                thread::sleep(until - now);
            }
        }
    }

    fn extend_cooldown(&self, delay: Duration) {
        let candidate = Instant::now() + delay;
        let mut guard = self.cooldown_until.lock();
        if guard.is_none_or(|current| current < candidate) {
            *guard = Some(candidate);
        }
    }

    /// Performs a paced GET. Throttled responses are retried with backoff;
    /// any other non-2xx status becomes [`HarvestError::Status`].
    pub fn get<T: Transport + ?Sized>(
        &self,
        transport: &T,
        pacer: &Pacer,
        url: &str,
    ) -> Result<HttpResponse> {
        let mut attempt = 0;
        loop {
            pacer.wait_turn(self.policy.min_interval);
            self.wait_for_cooldown();
            debug!(url, attempt, "GET");
            let response = transport.get(url)?;

            if response.is_throttled() && attempt < self.policy.max_retries {
                let delay = self.policy.backoff_for(attempt, response.retry_after);
                warn!(
                    url,
                    status = response.status,
                    backoff_ms = delay.as_millis() as u64,
                    "throttled, backing off"
                );
                self.extend_cooldown(delay);
                attempt += 1;
                continue;
            }

            if !response.is_success() {
                return Err(HarvestError::Status {
                    status: response.status,
                    url: url.to_string(),
                });
            }
            return Ok(response);
        }
    }
}

/// Per-sequence clock. One pacer lives for one video's fetch so parallel
/// videos do not slow each other down.
#[derive(Debug, Default)]
pub struct Pacer {
    last_request: std::cell::Cell<Option<Instant>>,
}

impl Pacer {
    pub fn new() -> Self {
        Self::default()
    }

    fn wait_turn(&self, min_interval: Duration) {
        if let Some(last) = self.last_request.get() {
            let elapsed = last.elapsed();
            if elapsed < min_interval {
                thread::sleep(min_interval - elapsed);
            }
        }
        self.last_request.set(Some(Instant::now()));
    }
}
