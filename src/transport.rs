//! The upstream seam: anything that can open a streaming connection for a
//! stream kind and keyword set.
//!
//! The controller only ever talks to a [`Transport`]; production code plugs
//! in [`TwitterTransport`] (signed reqwest streaming requests), tests plug in
//! a scripted implementation.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, TryStreamExt as _};
use reqwest::Method;
use reqwest::header::AUTHORIZATION;

use crate::controller::StreamKind;
use crate::oauth::{self, Credentials};

/// The raw body of an established upstream connection.
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("rate limited by upstream (HTTP 420)")]
    RateLimited,
    /// 4xx other than the rate-limit status: credentials or request are
    /// wrong, retrying soon will not help.
    #[error("upstream rejected the request (HTTP {0})")]
    Rejected(u16),
    #[error("upstream server error (HTTP {0})")]
    Server(u16),
    #[error("transport error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the upstream connection for `kind`, tracking `keywords` (empty
    /// for sample streams). Resolves once response headers are in; the body
    /// is the returned byte stream.
    async fn connect(
        &self,
        kind: StreamKind,
        keywords: &[String],
    ) -> Result<ByteStream, ConnectError>;
}

pub const SAMPLE_URL: &str = "https://stream.twitter.com/1.1/statuses/sample.json";
pub const FILTER_URL: &str = "https://stream.twitter.com/1.1/statuses/filter.json";

/// Signed streaming requests against the real upstream. One instance (and
/// its pooled HTTP client) is shared by every controller in the process.
pub struct TwitterTransport {
    http: reqwest::Client,
    credentials: Credentials,
}

impl TwitterTransport {
    pub fn new(credentials: Credentials) -> Self {
        TwitterTransport {
            http: reqwest::Client::new(),
            credentials,
        }
    }
}

#[async_trait]
impl Transport for TwitterTransport {
    async fn connect(
        &self,
        kind: StreamKind,
        keywords: &[String],
    ) -> Result<ByteStream, ConnectError> {
        let params = request_params(kind, keywords);
        let (method, url) = match kind {
            StreamKind::Sample => (Method::GET, SAMPLE_URL),
            StreamKind::Filter => (Method::POST, FILTER_URL),
        };
        let authorization =
            oauth::authorization_header(&self.credentials, method.as_str(), url, &params);

        let request = match kind {
            StreamKind::Sample => self.http.get(url).query(&params),
            StreamKind::Filter => self.http.post(url).form(&params),
        };
        let response = request
            .header(AUTHORIZATION, authorization)
            .send()
            .await
            .map_err(|e| ConnectError::Transport(e.to_string()))?;

        match response.status().as_u16() {
            200..=299 => Ok(Box::pin(
                response.bytes_stream().map_err(std::io::Error::other),
            )),
            420 => Err(ConnectError::RateLimited),
            status @ 400..=499 => Err(ConnectError::Rejected(status)),
            status => Err(ConnectError::Server(status)),
        }
    }
}

/// Query/body parameters for one connect: always length-delimited framing,
/// plus the comma-joined keyword union when filtering.
fn request_params(kind: StreamKind, keywords: &[String]) -> Vec<(String, String)> {
    let mut params = vec![("delimited".to_owned(), "length".to_owned())];
    if kind == StreamKind::Filter && !keywords.is_empty() {
        params.push(("track".to_owned(), keywords.join(",")));
    }
    params
}
