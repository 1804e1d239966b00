//! Range fetch clients.
//!
//! Workers talk to the range service through the [`RangeClient`] trait and
//! obtain clients from a [`ClientFactory`], so a worker can throw away a
//! client whose connections are suspect and build a fresh one. The HTTP
//! implementation wraps a `reqwest::Client` configured from
//! [`HttpClientConfig`].
//!
//! Every failure is classified here, where the concrete error is still
//! available, into a [`FetchErrorKind`].

use std::error::Error as StdError;
use std::io;

use async_trait::async_trait;

use crate::config::HttpClientConfig;
use crate::error::{FetchError, FetchErrorKind};
use crate::keyspace::KeyspaceUnit;

/// Fetches the raw body for one keyspace unit.
#[async_trait]
pub trait RangeClient: Send + Sync {
    /// Return the response body, a CRLF-delimited list of `suffix:count`
    /// lines.
    async fn fetch_range(&self, unit: KeyspaceUnit) -> Result<String, FetchError>;
}

/// Builds fresh, fully configured clients.
pub trait ClientFactory: Send + Sync + 'static {
    type Client: RangeClient + 'static;

    fn build(&self) -> Result<Self::Client, FetchError>;
}

/// HTTP range client backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpRangeClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRangeClient {
    pub fn url_for(&self, unit: KeyspaceUnit) -> String {
        format!("{}{}", self.base_url, unit)
    }
}

#[async_trait]
impl RangeClient for HttpRangeClient {
    async fn fetch_range(&self, unit: KeyspaceUnit) -> Result<String, FetchError> {
        let url = self.url_for(unit);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::new(
                FetchErrorKind::from_status(status.as_u16()),
                format!("HTTP {} from {}", status, url),
            ));
        }

        response.text().await.map_err(|e| classify_reqwest_error(&e))
    }
}

/// Factory for [`HttpRangeClient`]s sharing one configuration.
#[derive(Debug, Clone)]
pub struct HttpClientFactory {
    config: HttpClientConfig,
}

impl HttpClientFactory {
    pub fn new(config: HttpClientConfig) -> Self {
        Self { config }
    }
}

impl ClientFactory for HttpClientFactory {
    type Client = HttpRangeClient;

    fn build(&self) -> Result<HttpRangeClient, FetchError> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(self.config.max_idle_per_host)
            .pool_idle_timeout(self.config.idle_timeout())
            .tcp_keepalive(Some(self.config.tcp_keepalive()))
            .connect_timeout(self.config.connect_timeout())
            .timeout(self.config.request_timeout())
            .user_agent(self.config.user_agent.clone())
            .build()
            .map_err(|e| FetchError::new(FetchErrorKind::Client, e.to_string()))?;

        Ok(HttpRangeClient {
            client,
            base_url: self.config.base_url.clone(),
        })
    }
}

/// Classify a `reqwest` failure.
///
/// Order matters: a timeout can carry an I/O source, and a reset during the
/// exchange can surface as a request error.
pub fn classify_reqwest_error(err: &reqwest::Error) -> FetchError {
    let kind = if err.is_timeout() {
        FetchErrorKind::Timeout
    } else if io_error_kind(err).is_some_and(is_connection_drop) {
        FetchErrorKind::ConnectionReset
    } else if err.is_connect() {
        FetchErrorKind::Connect
    } else if err.is_body() || err.is_decode() || err.is_request() {
        // The connection was up but the exchange ended early. reqwest reports
        // hyper's IncompleteMessage (connection closed before the message
        // completed) as a request error, so `is_request` lands here too.
        FetchErrorKind::ProtocolTerminated
    } else if err.is_builder() {
        FetchErrorKind::Client
    } else {
        FetchErrorKind::Request
    };
    FetchError::new(kind, error_chain(err))
}

fn is_connection_drop(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
    )
}

fn io_error_kind(err: &(dyn StdError + 'static)) -> Option<io::ErrorKind> {
    let mut source = err.source();
    while let Some(e) = source {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            return Some(io_err.kind());
        }
        source = e.source();
    }
    None
}

fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(e) = source {
        message.push_str(": ");
        message.push_str(&e.to_string());
        source = e.source();
    }
    message
}
