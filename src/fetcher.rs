//! Feed retrieval over HTTP with rotating client identity and retry/backoff.
//!
//! # Architecture
//!
//! - [`Fetcher`]: the capability the pipeline depends on
//! - [`HttpFetcher`]: the `reqwest` implementation
//! - [`RetryFetch`]: decorator that retries transient failures on any
//!   [`Fetcher`]
//!
//! # Retry Strategy
//!
//! - Only transient failures are retried: timeouts, connection errors and
//!   HTTP 408/429/5xx
//! - Exponential backoff starting at `base_delay`, capped at 30 seconds
//! - Random jitter (0-250ms) added to each delay

use crate::error::FetchFailure;
use crate::utils::decode_body;
use rand::seq::IndexedRandom;
use rand::{Rng, rng};
use reqwest::Client;
use reqwest::header::{ACCEPT, ACCEPT_ENCODING, ACCEPT_LANGUAGE, CONTENT_ENCODING, USER_AGENT};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, instrument, warn};

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

const FEED_ACCEPT: &str =
    "application/rss+xml, application/atom+xml, application/xml;q=0.9, text/xml;q=0.9, */*;q=0.8";

/// A browser identity presented to upstream servers.
#[derive(Debug, Clone, Copy)]
pub struct HeaderProfile {
    pub user_agent: &'static str,
    pub accept_language: &'static str,
}

/// Identities rotated across requests; one is picked at random per call.
pub const HEADER_PROFILES: &[HeaderProfile] = &[
    HeaderProfile {
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        accept_language: "fr-FR,fr;q=0.9,en-US;q=0.8,en;q=0.7",
    },
    HeaderProfile {
        user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
        accept_language: "en-US,en;q=0.9",
    },
    HeaderProfile {
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 13_6) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.6 Safari/605.1.15",
        accept_language: "en-GB,en;q=0.9,fr;q=0.6",
    },
    HeaderProfile {
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
        accept_language: "fr,fr-FR;q=0.8,en-US;q=0.5,en;q=0.3",
    },
    HeaderProfile {
        user_agent: "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1",
        accept_language: "en-US,en;q=0.9",
    },
];

/// Pick a header profile at random.
pub fn pick_profile() -> HeaderProfile {
    *HEADER_PROFILES
        .choose(&mut rng())
        .unwrap_or(&HEADER_PROFILES[0])
}

/// Retrieval of raw feed payloads.
///
/// Futures are not required to be `Send`: the pipeline drives them on the
/// task that owns the fetcher.
#[allow(async_fn_in_trait)]
pub trait Fetcher {
    /// Fetch `url` and return the (decompressed) response body.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchFailure>;
}

/// Production [`Fetcher`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpFetcher {
    /// Build a fetcher whose requests each time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .build()?;
        Ok(Self { client, timeout })
    }
}

impl Fetcher for HttpFetcher {
    /// GET `url` with a random header profile.
    ///
    /// # Errors
    ///
    /// - [`FetchFailure::Timeout`] when no complete response arrives within the
    ///   configured timeout
    /// - [`FetchFailure::ConnectionError`] when the host cannot be reached
    /// - [`FetchFailure::HttpError`] for any non-2xx status
    #[instrument(level = "info", skip(self))]
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchFailure> {
        let t0 = Instant::now();
        let profile = pick_profile();

        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .header(USER_AGENT, profile.user_agent)
            .header(ACCEPT, FEED_ACCEPT)
            .header(ACCEPT_LANGUAGE, profile.accept_language)
            .header(ACCEPT_ENCODING, "gzip, deflate")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "Feed request returned an error status");
            return Err(FetchFailure::HttpError {
                status: status.as_u16(),
            });
        }

        let encoding = response
            .headers()
            .get(CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let raw = response.bytes().await?.to_vec();
        let body = decode_body(encoding.as_deref(), raw);

        debug!(
            bytes = body.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Fetched feed"
        );
        Ok(body)
    }
}

/// Wrapper that adds exponential backoff retry logic to any [`Fetcher`].
///
/// The delay before retry `n` (1-based) is:
/// ```text
/// delay = min(base_delay * 2^(n-1), max_delay) + random_jitter(0..250ms)
/// ```
pub struct RetryFetch<T> {
    inner: T,
    max_retries: usize,
    base_delay: Duration,
    max_delay: Duration,
}

impl<T> RetryFetch<T>
where
    T: Fetcher,
{
    /// Wrap `inner`, retrying transient failures up to `max_retries` times.
    pub fn new(inner: T, max_retries: usize, base_delay: Duration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: Duration::from_secs(30),
        }
    }

    fn backoff(&self, attempt: usize) -> Duration {
        let shift = (attempt.saturating_sub(1)).min(16) as u32;
        let delay = self.base_delay.saturating_mul(1 << shift).min(self.max_delay);
        let jitter_ms: u64 = rng().random_range(0..=250);
        delay + Duration::from_millis(jitter_ms)
    }
}

impl<T> fmt::Debug for RetryFetch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryFetch")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl<T> Fetcher for RetryFetch<T>
where
    T: Fetcher,
{
    #[instrument(level = "debug", skip(self))]
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchFailure> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            match self.inner.fetch(url).await {
                Ok(body) => return Ok(body),
                Err(failure) => {
                    attempt += 1;
                    if !failure.is_transient() || attempt > self.max_retries {
                        if failure.is_transient() {
                            error!(
                                attempt,
                                max = self.max_retries,
                                elapsed_ms_total = total_t0.elapsed().as_millis() as u64,
                                error = %failure,
                                "fetch() exhausted retries"
                            );
                        }
                        return Err(failure);
                    }

                    let delay = self.backoff(attempt);
                    warn!(
                        attempt,
                        max = self.max_retries,
                        ?delay,
                        error = %failure,
                        "fetch() attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}
