//! # HTTP Retrieval Utilities
//!
//! This module provides an asynchronous API client wrapper around `reqwest`.
//! It includes middleware support for exponential backoff retries, a fixed
//! per-request timeout and standardized JSON response handling.

use std::time::Duration;

use reqwest::header::{HeaderMap, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, Url};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Failures raised by [`ApiClient`].
#[derive(Debug, Error)]
pub enum ApiError {
    /// The base URL does not parse as an absolute URL.
    #[error("invalid base url '{url}': {source}")]
    InvalidBaseUrl {
        /// The rejected input.
        url: String,
        /// Parser error.
        #[source]
        source: url::ParseError,
    },

    /// The base URL has no hierarchical path (e.g. `mailto:`).
    #[error("base url '{0}' cannot carry path segments")]
    NotABase(String),

    /// The underlying `reqwest` client could not be built.
    #[error("failed to build http client: {0}")]
    Build(#[source] reqwest::Error),

    /// Raised by the retry middleware itself.
    #[error("request middleware failed: {0}")]
    Middleware(#[source] anyhow::Error),

    /// Network, TLS or timeout failure.
    #[error("http request failed: {0}")]
    Http(#[source] reqwest::Error),

    /// The request body could not be serialized.
    #[error("failed to encode request body: {0}")]
    Encode(#[source] serde_json::Error),

    /// A 2xx body did not deserialize into the expected type.
    #[error("failed to decode response body: {0}")]
    Decode(String),
}

impl ApiError {
    /// True when the request hit the client timeout, including a timeout
    /// reported after the retry middleware gave up.
    pub fn is_timeout(&self) -> bool {
        match self {
            ApiError::Http(e) => e.is_timeout(),
            ApiError::Middleware(e) => e
                .chain()
                .any(|cause| cause.downcast_ref::<reqwest::Error>().is_some_and(reqwest::Error::is_timeout)),
            _ => false,
        }
    }
}

impl From<reqwest_middleware::Error> for ApiError {
    fn from(e: reqwest_middleware::Error) -> Self {
        match e {
            reqwest_middleware::Error::Reqwest(e) => ApiError::Http(e),
            reqwest_middleware::Error::Middleware(e) => ApiError::Middleware(e),
        }
    }
}

/// A standardized container for API responses.
///
/// This struct wraps the deserialized data along with metadata about the
/// HTTP transaction, such as status codes and headers.
#[derive(Debug)]
pub struct ApiResponse<T> {
    /// The successfully deserialized response body, if any.
    pub data: Option<T>,
    /// The raw error body returned by the server if the request failed.
    pub error_body: Option<String>,
    /// The numeric HTTP status code.
    pub status: u16,
    /// Indicates if the status code was in the 2xx range.
    pub success: bool,
    /// The headers returned by the server.
    pub headers: HeaderMap,
}

/// A flexible asynchronous HTTP client.
///
/// Built on top of `reqwest_middleware`, it handles base URLs,
/// authentication tokens, and automatic retries.
pub struct ApiClient {
    /// The underlying middleware-enabled client.
    inner: ClientWithMiddleware,
    /// The base URL every endpoint is built from.
    base_url: Url,
    /// An optional Bearer token used for authorization.
    auth_token: Option<String>,
}

impl ApiClient {
    /// Creates a new `ApiClient` instance with a retry policy.
    ///
    /// # Arguments
    /// * `base_url` - The absolute base URL for the API (e.g., "https://api.example.com/v1").
    /// * `auth_token` - An optional string for the Authorization header.
    /// * `timeout` - Upper bound for one HTTP attempt.
    /// * `max_retries` - Transient-failure retries with exponential backoff; `0` disables them.
    ///
    /// # Errors
    /// Fails if `base_url` is not an absolute, hierarchical URL.
    pub fn new(
        base_url: &str,
        auth_token: Option<String>,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Self, ApiError> {
        let url = Url::parse(base_url).map_err(|source| ApiError::InvalidBaseUrl {
            url: base_url.to_string(),
            source,
        })?;
        if url.cannot_be_a_base() {
            return Err(ApiError::NotABase(base_url.to_string()));
        }

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ApiError::Build)?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(max_retries);
        let client = ClientBuilder::new(http)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            inner: client,
            base_url: url,
            auth_token,
        })
    }

    /// The base URL endpoints are built from.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Appends `segments` to the base URL's path, percent-encoding each one.
    ///
    /// A `/` inside a segment is encoded rather than treated as a separator.
    pub fn endpoint<I, S>(&self, segments: I) -> Result<Url, ApiError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::NotABase(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Performs a generic HTTP request and handles the response.
    ///
    /// Non-2xx answers are not errors: they come back with `success == false`
    /// and the raw body in `error_body`.
    ///
    /// # Errors
    /// Network failures, timeouts and undecodable 2xx bodies.
    pub async fn request<T, B>(
        &self,
        method: Method,
        url: Url,
        headers: Option<HeaderMap>,
        body: Option<&B>,
    ) -> Result<ApiResponse<T>, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let mut req = self.inner.request(method, url);

        if let Some(h) = headers {
            req = req.headers(h);
        }

        if let Some(token) = &self.auth_token {
            req = req.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        if let Some(b) = body {
            let json_body = serde_json::to_string(b).map_err(ApiError::Encode)?;
            req = req.header(CONTENT_TYPE, "application/json").body(json_body);
        }

        let response: reqwest::Response = req.send().await?;
        let status = response.status();
        let resp_headers = response.headers().clone();

        if status.is_success() {
            let text = response.text().await.map_err(ApiError::Http)?;
            let data = serde_json::from_str::<T>(&text).map_err(|e| ApiError::Decode(e.to_string()))?;
            Ok(ApiResponse {
                data: Some(data),
                error_body: None,
                status: status.as_u16(),
                success: true,
                headers: resp_headers,
            })
        } else {
            // Keep the error body for diagnostics; losing it is not fatal.
            let error_text = response.text().await.ok();
            Ok(ApiResponse {
                data: None,
                error_body: error_text,
                status: status.as_u16(),
                success: false,
                headers: resp_headers,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> ApiClient {
        ApiClient::new(base, None, Duration::from_secs(1), 0).unwrap()
    }

    #[test]
    fn endpoint_appends_encoded_segments() {
        let url = client("http://localhost:8000/api/").endpoint(["traces", "a/b c", "sync"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8000/api/traces/a%2Fb%20c/sync");
    }

    #[test]
    fn endpoint_without_trailing_slash() {
        let url = client("http://localhost:8000").endpoint(["traces", "t1", "sync"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8000/traces/t1/sync");
    }

    #[test]
    fn rejects_relative_and_opaque_urls() {
        assert!(matches!(
            ApiClient::new("not a url", None, Duration::from_secs(1), 0),
            Err(ApiError::InvalidBaseUrl { .. })
        ));
        assert!(matches!(
            ApiClient::new("mailto:someone@example.com", None, Duration::from_secs(1), 0),
            Err(ApiError::NotABase(_))
        ));
    }
}
