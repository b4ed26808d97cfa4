//! Client side of the supervising authority's REST API.

pub mod http;
pub mod scripted;

use async_trait::async_trait;
use butterfly_core::{Credential, Policy, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};

pub use http::HttpAuthority;
pub use scripted::ScriptedAuthority;

#[async_trait]
pub trait Authority: Send + Sync {
    /// `POST /extension/policy`.
    async fn fetch_policy(&self, credential: &Credential) -> Result<Policy>;

    /// `POST /extension/usage`. The response body is ignored.
    async fn log_usage(&self, entry: &UsageLog) -> Result<()>;
}

/// One navigation record reported to the authority.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageLog {
    pub student_hash: String,
    pub url: String,
    pub title: String,
    #[serde(serialize_with = "serialize_iso8601")]
    pub timestamp: DateTime<Utc>,
    pub duration: u64,
    pub is_blocked: bool,
}

impl UsageLog {
    pub fn new(credential: &Credential, url: &str, title: &str, is_blocked: bool) -> Self {
        Self {
            student_hash: credential.as_str().to_string(),
            url: url.to_string(),
            title: title.to_string(),
            timestamp: Utc::now(),
            duration: 0,
            is_blocked,
        }
    }
}

fn serialize_iso8601<S: Serializer>(at: &DateTime<Utc>, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&at.to_rfc3339_opts(SecondsFormat::Millis, true))
}
