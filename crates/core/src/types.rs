use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, Result};

/// Host-assigned tab identifier.
pub type TabId = i64;

/// Host-assigned frame identifier; the primary frame of a tab is `0`.
pub type FrameId = i64;

pub const PRIMARY_FRAME: FrameId = 0;

pub const DEFAULT_DAILY_QUOTA_SECS: u64 = 3600;

/// The policy set handed down by the supervising authority.
///
/// Serialized with the authority's wire names so the cached snapshot is the
/// response body as received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    #[serde(rename = "blocked_sites", default)]
    pub blocked_patterns: Vec<String>,
    #[serde(rename = "controlled_sites", default)]
    pub rationed_patterns: Vec<String>,
    /// Display name -> URL. Informational only.
    #[serde(rename = "allowed_sites", default)]
    pub recommended_sites: BTreeMap<String, String>,
    #[serde(
        rename = "daily_time_limit",
        default = "default_daily_quota",
        deserialize_with = "deserialize_quota"
    )]
    pub daily_quota_seconds: u64,
}

fn default_daily_quota() -> u64 {
    DEFAULT_DAILY_QUOTA_SECS
}

// Zero, negative and null limits all fall back to the default quota.
fn deserialize_quota<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<i64> = Option::deserialize(deserializer)?;
    Ok(match raw {
        Some(secs) if secs > 0 => secs as u64,
        _ => DEFAULT_DAILY_QUOTA_SECS,
    })
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            blocked_patterns: Vec::new(),
            rationed_patterns: Vec::new(),
            recommended_sites: BTreeMap::new(),
            daily_quota_seconds: DEFAULT_DAILY_QUOTA_SECS,
        }
    }
}

impl Policy {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| Error::MalformedResponse(e.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.blocked_patterns.is_empty() && self.rationed_patterns.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementDecision {
    Allowed,
    Blocked,
    TimeLimited,
    TimeExceeded,
}

impl EnforcementDecision {
    /// Whether the navigation must be redirected away.
    pub fn is_denied(self) -> bool {
        matches!(self, Self::Blocked | Self::TimeExceeded)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allowed => "allowed",
            Self::Blocked => "blocked",
            Self::TimeLimited => "time_limited",
            Self::TimeExceeded => "time_exceeded",
        }
    }
}

impl fmt::Display for EnforcementDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supervising-group hash key, as issued by the dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub const LEN: usize = 5;

    /// Keys are issued uppercase and matched exactly, so input is normalized.
    pub fn parse(raw: &str) -> Result<Self> {
        let key = raw.trim();
        if key.chars().count() != Self::LEN {
            return Err(Error::Validation(format!(
                "hash key must be exactly {} characters",
                Self::LEN
            )));
        }
        if key.chars().any(char::is_whitespace) {
            return Err(Error::Validation("hash key must not contain whitespace".to_string()));
        }
        Ok(Self(key.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
