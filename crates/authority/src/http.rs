use async_trait::async_trait;
use butterfly_core::{Config, Credential, Error, Policy, Result};
use reqwest::{Client, StatusCode};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

use crate::{Authority, UsageLog};

pub struct HttpAuthority {
    client: Client,
    base_url: String,
}

impl HttpAuthority {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let client = Client::builder().timeout(timeout).build().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to build HTTP client, using default");
            Client::new()
        });
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.authority_base_url(), config.authority_timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Maps a raw policy response to a `Policy` or the matching error kind.
pub(crate) fn parse_policy_response(status: StatusCode, body: &str) -> Result<Policy> {
    if !status.is_success() {
        return Err(Error::Network(format!("authority returned {}: {}", status, body)));
    }
    Policy::from_json(body)
}

#[async_trait]
impl Authority for HttpAuthority {
    async fn fetch_policy(&self, credential: &Credential) -> Result<Policy> {
        let url = self.endpoint("/extension/policy");
        debug!(url = %url, "Fetching policy");

        let response = self
            .client
            .post(&url)
            .json(&json!({ "hash_key": credential.as_str() }))
            .send()
            .await
            .map_err(|e| Error::Network(format!("policy request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Network(format!("policy body unreadable: {}", e)))?;
        parse_policy_response(status, &body)
    }

    async fn log_usage(&self, entry: &UsageLog) -> Result<()> {
        let url = self.endpoint("/extension/usage");
        let response = self
            .client
            .post(&url)
            .json(entry)
            .send()
            .await
            .map_err(|e| Error::Network(format!("usage request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Network(format!("authority returned {}", status)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Request line and JSON body of one captured request.
    struct Captured {
        request_line: String,
        body: serde_json::Value,
    }

    /// Accepts a single connection on a loopback port, answers `response`
    /// with 200 and hands back what the client sent.
    async fn capture_one(response: &'static str) -> (String, JoinHandle<Captured>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}/api", listener.local_addr().unwrap());
        let task = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 1024];
            let header_end = loop {
                let n = socket.read(&mut buf).await.unwrap();
                assert!(n > 0, "connection closed before headers");
                raw.extend_from_slice(&buf[..n]);
                if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
            };
            let head = String::from_utf8_lossy(&raw[..header_end]).to_string();
            let content_length = head
                .lines()
                .filter_map(|line| line.split_once(':'))
                .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            while raw.len() < header_end + content_length {
                let n = socket.read(&mut buf).await.unwrap();
                assert!(n > 0, "connection closed before body");
                raw.extend_from_slice(&buf[..n]);
            }

            let reply = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                response.len(),
                response
            );
            socket.write_all(reply.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;

            Captured {
                request_line: head.lines().next().unwrap_or_default().to_string(),
                body: serde_json::from_slice(&raw[header_end..header_end + content_length])
                    .unwrap(),
            }
        });
        (base, task)
    }

    #[test]
    fn test_endpoint_joins_base() {
        let authority = HttpAuthority::new("https://school.example/api/", Duration::from_secs(5));
        assert_eq!(authority.base_url(), "https://school.example/api");
        assert_eq!(
            authority.endpoint("/extension/policy"),
            "https://school.example/api/extension/policy"
        );
    }

    #[test]
    fn test_policy_response_mapping() {
        let ok = parse_policy_response(
            StatusCode::OK,
            r#"{"blocked_sites":["a.com"],"controlled_sites":[],"allowed_sites":{},"daily_time_limit":120}"#,
        )
        .unwrap();
        assert_eq!(ok.daily_quota_seconds, 120);

        let not_found = parse_policy_response(StatusCode::NOT_FOUND, r#"{"detail":"Invalid hash key"}"#);
        assert!(matches!(not_found, Err(Error::Network(_))));

        let malformed = parse_policy_response(StatusCode::OK, "<html>");
        assert!(matches!(malformed, Err(Error::MalformedResponse(_))));
    }

    #[tokio::test]
    async fn test_unreachable_authority_is_network_error() {
        // Port 9 (discard) on localhost is closed in test environments.
        let authority = HttpAuthority::new("http://127.0.0.1:9/api", Duration::from_secs(2));
        let key = Credential::parse("ABC12").unwrap();
        let err = authority.fetch_policy(&key).await.unwrap_err();
        assert!(matches!(err, Error::Network(_)));
    }

    #[tokio::test]
    async fn test_fetch_policy_posts_hash_key() {
        let (base, server) = capture_one(
            r#"{"blocked_sites":["games.io"],"controlled_sites":["video.com"],"allowed_sites":{},"daily_time_limit":90}"#,
        )
        .await;
        let authority = HttpAuthority::new(&base, Duration::from_secs(5));
        let key = Credential::parse("abc12").unwrap();

        let policy = authority.fetch_policy(&key).await.unwrap();
        assert_eq!(policy.blocked_patterns, vec!["games.io"]);
        assert_eq!(policy.daily_quota_seconds, 90);

        let captured = server.await.unwrap();
        assert_eq!(captured.request_line, "POST /api/extension/policy HTTP/1.1");
        assert_eq!(captured.body, serde_json::json!({ "hash_key": "ABC12" }));
    }

    #[tokio::test]
    async fn test_log_usage_posts_entry() {
        let (base, server) = capture_one(r#"{"status":"ok"}"#).await;
        let authority = HttpAuthority::new(&base, Duration::from_secs(5));
        let key = Credential::parse("ABC12").unwrap();
        let entry = UsageLog::new(&key, "https://badsite.com/", "Blocked Site", true);

        authority.log_usage(&entry).await.unwrap();

        let captured = server.await.unwrap();
        assert_eq!(captured.request_line, "POST /api/extension/usage HTTP/1.1");
        assert_eq!(captured.body["student_hash"], "ABC12");
        assert_eq!(captured.body["url"], "https://badsite.com/");
        assert_eq!(captured.body["title"], "Blocked Site");
        assert_eq!(captured.body["is_blocked"], true);
        assert_eq!(captured.body["duration"], 0);
        assert!(captured.body["timestamp"].is_string());
    }
}
