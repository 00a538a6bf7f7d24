//! HTTP client with rate limiting for metadata lookups.
//!
//! This module provides a wrapper around `reqwest::Client` that adds:
//! * Request rate limiting for metadata and playlist requests
//! * Consistent timeouts and headers
//! * Unthrottled byte streams for bulk audio downloads
//!
//! # Rate Limiting
//!
//! Metadata requests are limited to 20 calls per 5-second interval, allowing
//! bursts up to that maximum. Requests that would exceed the limit are
//! delayed. Audio downloads are few and long-lived, so they bypass the
//! limiter.

use std::{future::Future, num::NonZeroU32, time::Duration};

use bytes::Bytes;
use futures_util::{stream::BoxStream, FutureExt, StreamExt};
use governor::{DefaultDirectRateLimiter, Quota};
use reqwest::{Method, Url};

use crate::{
    config::Config,
    error::{Error, Result},
};

/// HTTP client with built-in rate limiting.
pub struct Client {
    /// Unlimited request client for downloads.
    pub unlimited: reqwest::Client,

    /// Rate limiter for metadata requests.
    rate_limiter: DefaultDirectRateLimiter,
}

impl Client {
    /// Rolling window over which metadata requests are counted.
    const RATE_LIMIT_INTERVAL: Duration = Duration::from_secs(5);

    /// Maximum metadata requests per interval.
    const RATE_LIMIT_CALLS_PER_INTERVAL: u8 = 20;

    /// Duration to keep idle connections alive.
    const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Duration to wait for individual network reads.
    ///
    /// Longer than a typical API call because CDNs may stall briefly before
    /// the first byte of a large file.
    const READ_TIMEOUT: Duration = Duration::from_secs(10);

    /// Creates a new client.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built, for example when the
    /// TLS backend fails to initialize.
    pub fn new(config: &Config) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .tcp_keepalive(Self::KEEPALIVE_TIMEOUT)
            .read_timeout(Self::READ_TIMEOUT)
            .user_agent(&config.user_agent);

        let replenish_interval =
            Self::RATE_LIMIT_INTERVAL / u32::from(Self::RATE_LIMIT_CALLS_PER_INTERVAL);
        let quota = Quota::with_period(replenish_interval)
            .ok_or_else(|| Error::internal("quota time interval is zero"))?
            .allow_burst(
                NonZeroU32::new(Self::RATE_LIMIT_CALLS_PER_INTERVAL.into())
                    .ok_or_else(|| Error::internal("calls per interval is zero"))?,
            );

        Ok(Self {
            unlimited: http_client.build()?,
            rate_limiter: governor::RateLimiter::direct(quota),
        })
    }

    /// Builds a GET request without a body.
    pub fn get<U>(&self, url: U) -> reqwest::Request
    where
        U: Into<Url>,
    {
        reqwest::Request::new(Method::GET, url.into())
    }

    /// Executes a request with rate limiting.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails on the network or the server
    /// responds with an error status.
    pub fn execute(
        &self,
        request: reqwest::Request,
    ) -> impl Future<Output = Result<reqwest::Response>> + '_ {
        // No need to await with jitter because the level of concurrency is low.
        let throttle = self.rate_limiter.until_ready();
        throttle.then(|()| {
            self.unlimited.execute(request).map(|result| {
                result
                    .and_then(reqwest::Response::error_for_status)
                    .map_err(Into::into)
            })
        })
    }

    /// Fetches a text document, such as a playlist, with rate limiting.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the body is not valid text.
    pub async fn text(&self, url: Url) -> Result<String> {
        let response = self.execute(self.get(url)).await?;
        response.text().await.map_err(Error::from)
    }

    /// Starts an unthrottled download and returns the body as a byte stream.
    ///
    /// The stream ends when the body is complete. Errors while reading the
    /// body are reported as `Download` errors.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails before the body starts.
    pub async fn stream(&self, url: Url) -> Result<BoxStream<'static, Result<Bytes>>> {
        trace!("downloading {url}");
        let response = self
            .unlimited
            .get(url)
            .send()
            .await?
            .error_for_status()?;

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(Error::download))
            .boxed())
    }
}
