//! Property management API client used by the property update steps.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

/// Future returned by [`PapiClient`] calls.
pub type PapiFuture<'a> =
    Pin<Box<dyn Future<Output = Result<PapiResponse, PapiError>> + Send + 'a>>;

/// Status and body of one vendor API response.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PapiResponse {
    /// HTTP status code.
    pub status: u16,
    /// Raw response body.
    pub body: String,
}

impl PapiResponse {
    /// Builds a response from a status and a JSON body.
    #[must_use]
    pub fn json(status: u16, body: &Value) -> Self {
        Self {
            status,
            body: body.to_string(),
        }
    }

    /// Parses the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns the parser error when the body is not JSON.
    pub fn parse(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

/// Errors raised before a vendor response is available.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum PapiError {
    /// Raised when the HTTP client cannot be built.
    #[error("failed to build HTTP client: {message}")]
    Client {
        /// Builder error message.
        message: String,
    },
    /// Raised when the request cannot be sent or its body read.
    #[error("request to {url} failed: {message}")]
    Transport {
        /// Request URL.
        url: String,
        /// Transport error message.
        message: String,
    },
}

/// Minimal verb surface of the vendor's property management API.
///
/// Paths are relative to the API root (for example
/// `properties/prp_1/versions`).
pub trait PapiClient: Send + Sync {
    /// Issues a `GET`.
    fn get<'a>(&'a self, path: &'a str) -> PapiFuture<'a>;

    /// Issues a `POST` with a JSON body.
    fn post<'a>(&'a self, path: &'a str, body: &'a Value) -> PapiFuture<'a>;

    /// Issues a `PUT` with a JSON body.
    fn put<'a>(&'a self, path: &'a str, body: &'a Value) -> PapiFuture<'a>;
}

/// [`PapiClient`] backed by `reqwest`.
///
/// Request signing is left to a proxy in front of the vendor API.
#[derive(Clone, Debug)]
pub struct ReqwestPapiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ReqwestPapiClient {
    /// Builds a client rooted at `{base_url}/papi/v0/`.
    ///
    /// # Errors
    ///
    /// Returns [`PapiError::Client`] when the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, PapiError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| PapiError::Client {
                message: err.to_string(),
            })?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
        })
    }

    /// Absolute URL for an API path.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}/papi/v0/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        url: String,
    ) -> Result<PapiResponse, PapiError> {
        let transport = |err: reqwest::Error| PapiError::Transport {
            url: url.clone(),
            message: err.to_string(),
        };
        let response = request.send().await.map_err(transport)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(transport)?;
        tracing::debug!(url = %url, status, "vendor API responded");
        Ok(PapiResponse { status, body })
    }
}

impl PapiClient for ReqwestPapiClient {
    fn get<'a>(&'a self, path: &'a str) -> PapiFuture<'a> {
        Box::pin(async move {
            let url = self.url(path);
            self.send(self.client.get(&url), url).await
        })
    }

    fn post<'a>(&'a self, path: &'a str, body: &'a Value) -> PapiFuture<'a> {
        Box::pin(async move {
            let url = self.url(path);
            self.send(self.client.post(&url).json(body), url).await
        })
    }

    fn put<'a>(&'a self, path: &'a str, body: &'a Value) -> PapiFuture<'a> {
        Box::pin(async move {
            let url = self.url(path);
            self.send(self.client.put(&url).json(body), url).await
        })
    }
}
