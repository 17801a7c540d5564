//! HTTP access for transfers.
//!
//! The worker talks to the network through the [`Fetcher`] trait so that the
//! attempt loop can be driven by scripted responses in tests. Failures come
//! back as typed [`Error`] values: anything returned as `Err` from
//! [`Fetcher::fetch`] or from the body stream is a transport failure.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::StatusCode;
use reqwest::header::RANGE;

use crate::config::DownloadConfig;
use crate::error::{Error, Result};

/// Streamed response body.
pub type BodyStream = BoxStream<'static, Result<Bytes>>;

/// How the server answered a (possibly ranged) GET.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// `200 OK`: the body is the whole object, whatever range was asked for.
    Full,
    /// `206 Partial Content`: the body starts at the requested offset.
    Partial,
    /// `416 Range Not Satisfiable` on a ranged request: nothing exists past the offset.
    Unsatisfiable,
}

/// A response whose headers have arrived and whose body is still streaming.
pub struct FetchResponse {
    /// Classification of the status code.
    pub kind: ResponseKind,
    /// Reported `content-length` of this response body.
    pub content_length: Option<u64>,
    /// The body, yielded in whatever pieces the transport produces.
    pub body: BodyStream,
}

impl std::fmt::Debug for FetchResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchResponse")
            .field("kind", &self.kind)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Formats the `Range` header value for resuming at `offset`.
#[must_use]
pub fn range_header(offset: u64) -> String {
    format!("bytes={offset}-")
}

/// Source of HTTP responses for a transfer.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Issues a GET for `url`, asking for bytes from `offset` onward when it is non-zero.
    ///
    /// Non-success statuses are returned as [`Error::Status`], except a 416 reply
    /// to a ranged request, which is [`ResponseKind::Unsatisfiable`].
    async fn fetch(&self, url: &str, offset: u64) -> Result<FetchResponse>;
}

/// [`Fetcher`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
    header_timeout: Duration,
}

impl ReqwestFetcher {
    /// Builds a client configured from `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialised.
    pub fn new(config: &DownloadConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.request_timeout())
            .read_timeout(config.request_timeout())
            .pool_idle_timeout(Duration::from_secs(60))
            .tcp_keepalive(Duration::from_secs(30))
            .build()?;
        Ok(Self::with_client(client, config.request_timeout()))
    }

    /// Wraps an existing client. `header_timeout` bounds the wait for response headers.
    #[must_use]
    pub const fn with_client(client: reqwest::Client, header_timeout: Duration) -> Self {
        Self {
            client,
            header_timeout,
        }
    }
}

#[async_trait]
impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str, offset: u64) -> Result<FetchResponse> {
        let mut request = self.client.get(url);
        if offset > 0 {
            request = request.header(RANGE, range_header(offset));
        }

        // Bounds the wait for headers. Body reads are bounded per read by the client, not in total.
        let response = tokio::time::timeout(self.header_timeout, request.send())
            .await
            .map_err(|_| Error::Timeout(self.header_timeout))??;

        let status = response.status();
        let kind = match status {
            StatusCode::PARTIAL_CONTENT => ResponseKind::Partial,
            StatusCode::RANGE_NOT_SATISFIABLE if offset > 0 => ResponseKind::Unsatisfiable,
            s if s.is_success() => ResponseKind::Full,
            s => {
                return Err(Error::Status {
                    status: s.as_u16(),
                    url: url.to_string(),
                });
            }
        };

        let content_length = match kind {
            ResponseKind::Unsatisfiable => None,
            _ => response.content_length(),
        };
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(Error::from))
            .boxed();

        Ok(FetchResponse {
            kind,
            content_length,
            body,
        })
    }
}
