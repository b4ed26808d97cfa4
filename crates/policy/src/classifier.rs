//! Destination classification.
//!
//! Pattern matching is a bidirectional substring test on the hostname: a
//! pattern matches when the hostname contains it or it contains the hostname.
//! This deliberately catches subdomains and partial variants, and it also
//! produces false positives ("art.com" matches "heart.com").

use async_trait::async_trait;
use butterfly_core::types::DEFAULT_DAILY_QUOTA_SECS;
use butterfly_core::{EnforcementDecision, Policy};
use url::Url;

/// Which list of the policy a hostname falls under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    Blocked,
    Rationed,
    Unrestricted,
}

/// Today's accumulated usage, as seen by the classifier.
#[async_trait]
pub trait UsageSource: Send + Sync {
    async fn seconds_today(&self, domain: &str) -> u64;
}

/// Outcome of classifying one destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub host: String,
    pub rule: Rule,
    /// Today's usage for `host`; only looked up when the host is rationed.
    pub used_seconds: u64,
    pub quota_seconds: u64,
    pub decision: EnforcementDecision,
}

/// Hostname of `url`, lowercased. Strings that do not parse, or parse
/// without a host, are used as-is.
pub fn extract_host(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => match parsed.host_str() {
            Some(host) => host.to_ascii_lowercase(),
            None => url.to_ascii_lowercase(),
        },
        Err(_) => url.to_ascii_lowercase(),
    }
}

fn fragment_matches(host: &str, pattern: &str) -> bool {
    let pattern = pattern.trim().to_ascii_lowercase();
    if host.is_empty() || pattern.is_empty() {
        return false;
    }
    host.contains(pattern.as_str()) || pattern.contains(host)
}

fn matches_any(host: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|p| fragment_matches(host, p))
}

/// Blocked takes precedence when a host matches both lists.
pub fn rule_for(host: &str, policy: &Policy) -> Rule {
    if matches_any(host, &policy.blocked_patterns) {
        Rule::Blocked
    } else if matches_any(host, &policy.rationed_patterns) {
        Rule::Rationed
    } else {
        Rule::Unrestricted
    }
}

pub fn decide(rule: Rule, used_seconds: u64, quota_seconds: u64) -> EnforcementDecision {
    match rule {
        Rule::Blocked => EnforcementDecision::Blocked,
        Rule::Rationed if used_seconds >= quota_seconds => EnforcementDecision::TimeExceeded,
        Rule::Rationed => EnforcementDecision::TimeLimited,
        Rule::Unrestricted => EnforcementDecision::Allowed,
    }
}

/// Classifies `url` against `policy`. With no policy loaded every
/// destination is allowed.
pub async fn classify(
    url: &str,
    policy: Option<&Policy>,
    usage: &dyn UsageSource,
) -> Classification {
    let host = extract_host(url);
    let Some(policy) = policy else {
        return Classification {
            host,
            rule: Rule::Unrestricted,
            used_seconds: 0,
            quota_seconds: DEFAULT_DAILY_QUOTA_SECS,
            decision: EnforcementDecision::Allowed,
        };
    };
    let rule = rule_for(&host, policy);
    let used_seconds = match rule {
        Rule::Rationed => usage.seconds_today(&host).await,
        _ => 0,
    };
    Classification {
        decision: decide(rule, used_seconds, policy.daily_quota_seconds),
        host,
        rule,
        used_seconds,
        quota_seconds: policy.daily_quota_seconds,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Usage figures keyed by host.
    struct FixedUsage(HashMap<String, u64>);

    impl FixedUsage {
        fn none() -> Self {
            Self(HashMap::new())
        }

        fn of(host: &str, seconds: u64) -> Self {
            Self(HashMap::from([(host.to_string(), seconds)]))
        }
    }

    #[async_trait]
    impl UsageSource for FixedUsage {
        async fn seconds_today(&self, domain: &str) -> u64 {
            self.0.get(domain).copied().unwrap_or(0)
        }
    }

    fn policy(blocked: &[&str], rationed: &[&str], quota: u64) -> Policy {
        Policy {
            blocked_patterns: blocked.iter().map(|s| s.to_string()).collect(),
            rationed_patterns: rationed.iter().map(|s| s.to_string()).collect(),
            daily_quota_seconds: quota,
            ..Default::default()
        }
    }

    async fn decision(url: &str, policy: &Policy, usage: &FixedUsage) -> EnforcementDecision {
        classify(url, Some(policy), usage).await.decision
    }

    #[test]
    fn test_extract_host() {
        assert_eq!(extract_host("https://Sub.Example.com:8443/path?q=1"), "sub.example.com");
        assert_eq!(extract_host("not a url"), "not a url");
        assert_eq!(extract_host("video.com"), "video.com");
    }

    #[tokio::test]
    async fn test_blocked_subdomain() {
        let p = policy(&["example-blocked.com"], &[], 3600);
        let c = classify("https://sub.example-blocked.com/path", Some(&p), &FixedUsage::none()).await;
        assert_eq!(c.decision, EnforcementDecision::Blocked);
        assert_eq!(c.rule, Rule::Blocked);
        assert_eq!(c.host, "sub.example-blocked.com");
    }

    #[tokio::test]
    async fn test_blocked_wins_regardless_of_quota() {
        let p = policy(&["video.com"], &["video.com"], 60);
        for used in [0u64, 59, 60, 10_000] {
            let usage = FixedUsage::of("video.com", used);
            assert_eq!(
                decision("https://video.com/", &p, &usage).await,
                EnforcementDecision::Blocked
            );
        }
    }

    #[test]
    fn test_decide_against_quota() {
        assert_eq!(decide(Rule::Rationed, 40, 60), EnforcementDecision::TimeLimited);
        assert_eq!(decide(Rule::Rationed, 59, 60), EnforcementDecision::TimeLimited);
        assert_eq!(decide(Rule::Rationed, 60, 60), EnforcementDecision::TimeExceeded);
        assert_eq!(decide(Rule::Rationed, 70, 60), EnforcementDecision::TimeExceeded);
        assert_eq!(decide(Rule::Unrestricted, 70, 60), EnforcementDecision::Allowed);
    }

    #[tokio::test]
    async fn test_rationed_reports_usage_and_quota() {
        let p = policy(&[], &["video.com"], 60);
        let c = classify("https://video.com/", Some(&p), &FixedUsage::of("video.com", 40)).await;
        assert_eq!(c.decision, EnforcementDecision::TimeLimited);
        assert_eq!(c.used_seconds, 40);
        assert_eq!(c.quota_seconds, 60);
    }

    #[tokio::test]
    async fn test_quota_is_looked_up_by_host() {
        let p = policy(&[], &["video.com"], 60);
        let usage = FixedUsage::of("m.video.com", 90);
        assert_eq!(
            decision("https://m.video.com/watch", &p, &usage).await,
            EnforcementDecision::TimeExceeded
        );
        assert_eq!(
            decision("https://www.video.com/watch", &p, &usage).await,
            EnforcementDecision::TimeLimited
        );
    }

    #[tokio::test]
    async fn test_usage_ignored_for_unrationed_hosts() {
        let p = policy(&[], &["video.com"], 60);
        let c = classify("https://news.org/", Some(&p), &FixedUsage::of("news.org", 999)).await;
        assert_eq!(c.decision, EnforcementDecision::Allowed);
        assert_eq!(c.used_seconds, 0);
    }

    #[test]
    fn test_bidirectional_matching() {
        // Host shorter than the pattern still matches.
        let p = policy(&["www.games.io"], &[], 3600);
        assert_eq!(rule_for("games.io", &p), Rule::Blocked);

        // Permissive: a fragment inside an unrelated host matches.
        let p = policy(&["art.com"], &[], 3600);
        assert_eq!(rule_for("heart.com", &p), Rule::Blocked);
    }

    #[tokio::test]
    async fn test_case_insensitive() {
        let p = policy(&["Example-Blocked.COM"], &[], 3600);
        assert_eq!(
            decision("https://EXAMPLE-blocked.com/", &p, &FixedUsage::none()).await,
            EnforcementDecision::Blocked
        );
    }

    #[test]
    fn test_empty_patterns_never_match() {
        let p = policy(&[""], &["  "], 3600);
        assert_eq!(rule_for("anything.org", &p), Rule::Unrestricted);
        assert_eq!(rule_for("", &policy(&["a.com"], &[], 3600)), Rule::Unrestricted);
    }

    #[tokio::test]
    async fn test_unparseable_url_uses_raw_string() {
        let p = policy(&["blocked"], &[], 3600);
        assert_eq!(
            decision("::blocked::", &p, &FixedUsage::none()).await,
            EnforcementDecision::Blocked
        );
    }

    #[tokio::test]
    async fn test_no_policy_fails_open() {
        let usage = FixedUsage::of("video.com", u64::MAX);
        for url in ["https://example-blocked.com/", "https://video.com", "garbage"] {
            let c = classify(url, None, &usage).await;
            assert_eq!(c.decision, EnforcementDecision::Allowed);
            assert_eq!(c.rule, Rule::Unrestricted);
        }
    }

    #[tokio::test]
    async fn test_unlisted_is_allowed() {
        let p = policy(&["a.com"], &["b.com"], 60);
        assert_eq!(
            decision("https://wikipedia.org/", &p, &FixedUsage::none()).await,
            EnforcementDecision::Allowed
        );
    }
}
