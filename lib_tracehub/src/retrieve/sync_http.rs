//! # HTTP Sync Client
//!
//! [`SyncClient`] over the remote authority's REST endpoint:
//!
//! ```text
//! POST {base}/traces/{key}/sync?force={true|false}
//! 200 {"is_terminal": false, ...}
//! ```
//!
//! The trace key travels as a single percent-encoded path segment.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use tracing::trace;

use crate::core::registry::TraceKey;
use crate::core::sync_client::{SyncClient, SyncError, SyncOutcome};
use crate::retrieve::ky_http::{ApiClient, ApiError};

/// [`SyncClient`] talking to the remote over HTTP.
pub struct HttpSyncClient {
    api: ApiClient,
    timeout: Duration,
}

impl HttpSyncClient {
    /// Builds a client for `base_url`. `timeout` bounds each HTTP attempt.
    pub fn new(
        base_url: &str,
        auth_token: Option<String>,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Self, ApiError> {
        Ok(Self {
            api: ApiClient::new(base_url, auth_token, timeout, max_retries)?,
            timeout,
        })
    }

    /// The refresh URL for `key`.
    pub fn sync_url(&self, key: &TraceKey, force: bool) -> Result<reqwest::Url, SyncError> {
        let mut url = self
            .api
            .endpoint(["traces", key.as_str(), "sync"])
            .map_err(|e| SyncError::InvalidEndpoint(e.to_string()))?;
        url.query_pairs_mut().append_pair("force", if force { "true" } else { "false" });
        Ok(url)
    }

    fn map_error(&self, e: ApiError) -> SyncError {
        if e.is_timeout() {
            return SyncError::Timeout(self.timeout);
        }
        match e {
            ApiError::Decode(msg) => SyncError::Decode(msg),
            ApiError::InvalidBaseUrl { .. } | ApiError::NotABase(_) => SyncError::InvalidEndpoint(e.to_string()),
            other => SyncError::Transport(other.to_string()),
        }
    }
}

#[async_trait]
impl SyncClient for HttpSyncClient {
    async fn request_sync(&self, key: &TraceKey, force: bool) -> Result<SyncOutcome, SyncError> {
        let url = self.sync_url(key, force)?;
        trace!(trace_key = %key, %url, "requesting remote sync");

        let response = self
            .api
            .request::<Value, ()>(Method::POST, url, None, None)
            .await
            .map_err(|e| self.map_error(e))?;

        if !response.success {
            return Err(SyncError::Status {
                status: response.status,
                body: response.error_body.unwrap_or_default(),
            });
        }

        match response.data {
            Some(body) => SyncOutcome::from_value(body),
            None => Err(SyncError::Decode("empty response body".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    /// Serves one connection with `status` and `body`, returning the request head.
    fn serve_once(status: &'static str, body: &'static str, delay: Duration) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind to random port");
        let port = listener.local_addr().unwrap().port();
        let base = format!("http://127.0.0.1:{}/api", port);

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                match stream.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => head.extend_from_slice(&buf[..n]),
                }
            }

            thread::sleep(delay);
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Length: {}\r\nContent-Type: application/json\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            let _ = stream.write_all(response.as_bytes());
            let _ = stream.flush();
            String::from_utf8_lossy(&head).into_owned()
        });

        (base, handle)
    }

    fn client(base: &str, timeout: Duration) -> HttpSyncClient {
        HttpSyncClient::new(base, Some("secret".into()), timeout, 0).unwrap()
    }

    #[tokio::test]
    async fn posts_to_the_encoded_sync_endpoint() {
        let (base, server) = serve_once("200 OK", r#"{"is_terminal": false, "status": "running"}"#, Duration::ZERO);

        let outcome = client(&base, Duration::from_secs(5))
            .request_sync(&TraceKey::from("run 1/a"), true)
            .await
            .unwrap();

        let head = server.join().unwrap();
        assert!(head.starts_with("POST /api/traces/run%201%2Fa/sync?force=true HTTP/1.1"), "{head}");
        assert!(head.to_ascii_lowercase().contains("authorization: bearer secret"));
        assert!(!outcome.is_terminal);
        assert_eq!(outcome.extra["status"], "running");
    }

    #[tokio::test]
    async fn terminal_answer_is_decoded() {
        let (base, server) = serve_once("200 OK", r#"{"is_terminal": true}"#, Duration::ZERO);
        let outcome = client(&base, Duration::from_secs(5))
            .request_sync(&TraceKey::from("t1"), false)
            .await
            .unwrap();
        server.join().unwrap();
        assert!(outcome.is_terminal);
    }

    #[tokio::test]
    async fn error_status_keeps_the_body() {
        let (base, server) = serve_once("503 Service Unavailable", "remote busy", Duration::ZERO);
        let err = client(&base, Duration::from_secs(5))
            .request_sync(&TraceKey::from("t1"), true)
            .await
            .unwrap_err();
        server.join().unwrap();
        assert_eq!(
            err,
            SyncError::Status {
                status: 503,
                body: "remote busy".into()
            }
        );
    }

    #[tokio::test]
    async fn non_object_body_is_a_decode_error() {
        let (base, server) = serve_once("200 OK", "[true]", Duration::ZERO);
        let err = client(&base, Duration::from_secs(5))
            .request_sync(&TraceKey::from("t1"), true)
            .await
            .unwrap_err();
        server.join().unwrap();
        assert!(matches!(err, SyncError::Decode(_)));
    }

    #[tokio::test]
    async fn slow_remote_times_out() {
        let (base, server) = serve_once("200 OK", "{}", Duration::from_millis(800));
        let err = client(&base, Duration::from_millis(100))
            .request_sync(&TraceKey::from("t1"), true)
            .await
            .unwrap_err();
        server.join().unwrap();
        assert_eq!(err, SyncError::Timeout(Duration::from_millis(100)));
    }

    #[test]
    fn sync_url_encodes_force_flag() {
        let client = client("http://localhost:9/api/", Duration::from_secs(1));
        let url = client.sync_url(&TraceKey::from("t1"), false).unwrap();
        assert_eq!(url.as_str(), "http://localhost:9/api/traces/t1/sync?force=false");
    }
}
