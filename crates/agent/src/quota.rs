//! Dwell-time accounting for rationed domains.
//!
//! Sessions live in a mutex-guarded table keyed by tab. Every session
//! mutation happens inside one critical section that never spans an
//! `.await`; the resulting flush is persisted afterwards. A session's
//! credited seconds therefore partition its wall-clock life exactly: each
//! flush moves the session start forward by what it credited, carrying
//! sub-second remainders into the next flush.

use async_trait::async_trait;
use butterfly_core::{local_day, Clock, TabId};
use butterfly_policy::UsageSource;
use butterfly_storage::UsageStore;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
struct DwellSession {
    domain: String,
    started_at: DateTime<Utc>,
}

impl DwellSession {
    /// Whole seconds elapsed up to `now`; never negative.
    fn elapsed_secs(&self, now: DateTime<Utc>) -> u64 {
        (now - self.started_at).num_seconds().max(0) as u64
    }
}

pub struct QuotaTracker {
    sessions: Mutex<HashMap<TabId, DwellSession>>,
    usage: UsageStore,
    clock: Arc<dyn Clock>,
}

impl QuotaTracker {
    pub fn new(usage: UsageStore, clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            usage,
            clock,
        }
    }

    fn sessions(&self) -> std::sync::MutexGuard<'_, HashMap<TabId, DwellSession>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Adds `seconds` to today's counter. Zero-length flushes write nothing;
    /// storage failures are logged and swallowed.
    async fn credit(&self, domain: &str, seconds: u64, at: DateTime<Utc>) {
        if seconds == 0 {
            return;
        }
        let day = local_day(at);
        match self.usage.add(domain, &day, seconds).await {
            Ok(total) => debug!(domain = %domain, seconds, total, "Dwell flushed"),
            Err(e) => warn!(domain = %domain, seconds, error = %e, "Failed to persist dwell time"),
        }
    }

    /// Starts counting `domain` against `tab`. An existing session for the
    /// tab is closed out first.
    pub async fn begin_dwell(&self, tab: TabId, domain: &str) {
        let now = self.clock.now();
        let previous = self.sessions().insert(
            tab,
            DwellSession {
                domain: domain.to_string(),
                started_at: now,
            },
        );
        if let Some(previous) = previous {
            let seconds = previous.elapsed_secs(now);
            debug!(tab, domain = %previous.domain, seconds, "Replacing open dwell session");
            self.credit(&previous.domain, seconds, now).await;
        }
        debug!(tab, domain = %domain, "Dwell session opened");
    }

    /// Closes the tab's session and returns the seconds it flushed; 0 when
    /// the tab was not being tracked.
    pub async fn end_dwell(&self, tab: TabId) -> u64 {
        let now = self.clock.now();
        let Some(session) = self.sessions().remove(&tab) else {
            return 0;
        };
        let seconds = session.elapsed_secs(now);
        self.credit(&session.domain, seconds, now).await;
        debug!(tab, domain = %session.domain, seconds, "Dwell session closed");
        seconds
    }

    /// Credits every session except `active_tab`'s up to now and keeps them
    /// open. Returns the total seconds flushed.
    pub async fn switch_foreground(&self, active_tab: TabId) -> u64 {
        let now = self.clock.now();
        let flushes: Vec<(String, u64)> = {
            let mut sessions = self.sessions();
            sessions
                .iter_mut()
                .filter(|(tab, _)| **tab != active_tab)
                .filter_map(|(_, session)| {
                    let seconds = session.elapsed_secs(now);
                    if seconds == 0 {
                        return None;
                    }
                    session.started_at += chrono::Duration::seconds(seconds as i64);
                    Some((session.domain.clone(), seconds))
                })
                .collect()
        };

        let mut total = 0;
        for (domain, seconds) in flushes {
            self.credit(&domain, seconds, now).await;
            total += seconds;
        }
        total
    }

    /// Closes every open session, e.g. on shutdown.
    pub async fn flush_all(&self) -> u64 {
        let now = self.clock.now();
        let drained: Vec<(TabId, DwellSession)> = self.sessions().drain().collect();
        let mut total = 0;
        for (tab, session) in drained {
            let seconds = session.elapsed_secs(now);
            self.credit(&session.domain, seconds, now).await;
            debug!(tab, domain = %session.domain, seconds, "Dwell session flushed on shutdown");
            total += seconds;
        }
        if total > 0 {
            info!(seconds = total, "Flushed open dwell sessions");
        }
        total
    }

    /// Seconds recorded for `domain` today. Unreadable storage reads as 0.
    pub async fn today_usage(&self, domain: &str) -> u64 {
        let day = local_day(self.clock.now());
        self.usage.seconds(domain, &day).await.unwrap_or_else(|e| {
            warn!(domain = %domain, error = %e, "Failed to read usage, assuming none");
            0
        })
    }

    pub async fn remaining_today(&self, domain: &str, quota_seconds: u64) -> u64 {
        quota_seconds.saturating_sub(self.today_usage(domain).await)
    }

    /// Per-domain totals for `day` (`YYYY-MM-DD`), or for today.
    pub async fn usage_report(&self, day: Option<&str>) -> Vec<(String, u64)> {
        let day = day
            .map(str::to_string)
            .unwrap_or_else(|| local_day(self.clock.now()));
        self.usage.day_report(&day).await.unwrap_or_else(|e| {
            warn!(day = %day, error = %e, "Failed to read usage report");
            Vec::new()
        })
    }

    pub fn is_tracking(&self, tab: TabId) -> bool {
        self.sessions().contains_key(&tab)
    }

    pub fn tracked_tabs(&self) -> Vec<TabId> {
        let mut tabs: Vec<TabId> = self.sessions().keys().copied().collect();
        tabs.sort_unstable();
        tabs
    }
}

#[async_trait]
impl UsageSource for QuotaTracker {
    async fn seconds_today(&self, domain: &str) -> u64 {
        self.today_usage(domain).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use butterfly_core::ManualClock;
    use butterfly_storage::{KvStore, MemoryKvStore};

    fn tracker() -> (QuotaTracker, Arc<ManualClock>, Arc<MemoryKvStore>) {
        let clock = Arc::new(ManualClock::default());
        let kv = Arc::new(MemoryKvStore::new());
        let tracker = QuotaTracker::new(UsageStore::new(kv.clone()), clock.clone());
        (tracker, clock, kv)
    }

    #[tokio::test]
    async fn test_end_dwell_credits_elapsed() {
        let (tracker, clock, _) = tracker();
        tracker.begin_dwell(1, "video.com").await;
        clock.advance_secs(40);
        assert_eq!(tracker.end_dwell(1).await, 40);
        assert_eq!(tracker.today_usage("video.com").await, 40);
        assert!(!tracker.is_tracking(1));
    }

    #[tokio::test]
    async fn test_end_dwell_is_idempotent() {
        let (tracker, clock, _) = tracker();
        tracker.begin_dwell(1, "video.com").await;
        clock.advance_secs(12);
        assert_eq!(tracker.end_dwell(1).await, 12);
        clock.advance_secs(30);
        assert_eq!(tracker.end_dwell(1).await, 0);
        assert_eq!(tracker.today_usage("video.com").await, 12);
    }

    #[tokio::test]
    async fn test_untracked_tab_is_noop() {
        let (tracker, _, _) = tracker();
        assert_eq!(tracker.end_dwell(99).await, 0);
        assert_eq!(tracker.today_usage("video.com").await, 0);
    }

    #[tokio::test]
    async fn test_sub_second_session_writes_nothing() {
        let (tracker, clock, kv) = tracker();
        tracker.begin_dwell(1, "video.com").await;
        clock.advance_millis(800);
        assert_eq!(tracker.end_dwell(1).await, 0);
        assert!(!tracker.is_tracking(1));
        assert!(kv.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_begin_twice_flushes_previous() {
        let (tracker, clock, _) = tracker();
        tracker.begin_dwell(1, "video.com").await;
        clock.advance_secs(7);
        tracker.begin_dwell(1, "games.io").await;
        assert_eq!(tracker.today_usage("video.com").await, 7);
        assert!(tracker.is_tracking(1));

        clock.advance_secs(3);
        assert_eq!(tracker.end_dwell(1).await, 3);
        assert_eq!(tracker.today_usage("games.io").await, 3);
        assert_eq!(tracker.today_usage("video.com").await, 7);
    }

    #[tokio::test]
    async fn test_switch_foreground_scenario() {
        // Tab A dwells 10s, tab B is activated, A closes 5s later.
        let (tracker, clock, _) = tracker();
        tracker.begin_dwell(1, "video.com").await;
        clock.advance_secs(10);

        assert_eq!(tracker.switch_foreground(2).await, 10);
        assert!(tracker.is_tracking(1));
        assert_eq!(tracker.today_usage("video.com").await, 10);

        clock.advance_secs(5);
        assert_eq!(tracker.end_dwell(1).await, 5);
        assert_eq!(tracker.today_usage("video.com").await, 15);
    }

    #[tokio::test]
    async fn test_switch_foreground_skips_active_tab() {
        let (tracker, clock, _) = tracker();
        tracker.begin_dwell(1, "video.com").await;
        tracker.begin_dwell(2, "games.io").await;
        clock.advance_secs(4);

        assert_eq!(tracker.switch_foreground(1).await, 4);
        assert_eq!(tracker.today_usage("games.io").await, 4);
        assert_eq!(tracker.today_usage("video.com").await, 0);

        clock.advance_secs(2);
        assert_eq!(tracker.end_dwell(1).await, 6);
    }

    #[tokio::test]
    async fn test_conservation_with_fractional_flushes() {
        let (tracker, clock, _) = tracker();
        tracker.begin_dwell(1, "video.com").await;

        let mut credited = 0;
        for step_ms in [10_700u64, 300, 4_600, 2_250, 999] {
            clock.advance_millis(step_ms);
            credited += tracker.switch_foreground(2).await;
        }
        clock.advance_millis(1_451);
        credited += tracker.end_dwell(1).await;

        // 10.7 + 0.3 + 4.6 + 2.25 + 0.999 + 1.451 = 20.3s
        assert_eq!(credited, 20);
        assert_eq!(tracker.today_usage("video.com").await, 20);
    }

    #[tokio::test]
    async fn test_storage_failure_is_swallowed() {
        let (tracker, clock, kv) = tracker();
        kv.set_fail_writes(true);
        tracker.begin_dwell(1, "video.com").await;
        clock.advance_secs(5);
        assert_eq!(tracker.end_dwell(1).await, 5);
        assert!(!tracker.is_tracking(1));
        assert_eq!(tracker.today_usage("video.com").await, 0);
    }

    #[tokio::test]
    async fn test_flush_all_and_report() {
        let (tracker, clock, _) = tracker();
        tracker.begin_dwell(1, "video.com").await;
        tracker.begin_dwell(2, "games.io").await;
        assert_eq!(tracker.tracked_tabs(), vec![1, 2]);
        clock.advance_secs(9);

        assert_eq!(tracker.flush_all().await, 18);
        assert!(tracker.tracked_tabs().is_empty());
        assert_eq!(
            tracker.usage_report(None).await,
            vec![("games.io".to_string(), 9), ("video.com".to_string(), 9)]
        );
        assert_eq!(tracker.remaining_today("video.com", 60).await, 51);
        assert_eq!(tracker.remaining_today("video.com", 5).await, 0);
    }

    #[tokio::test]
    async fn test_usage_source_reads_today() {
        let (tracker, clock, _) = tracker();
        tracker.begin_dwell(1, "video.com").await;
        clock.advance_secs(25);
        tracker.end_dwell(1).await;

        let usage: &dyn UsageSource = &tracker;
        assert_eq!(usage.seconds_today("video.com").await, 25);
        assert_eq!(usage.seconds_today("games.io").await, 0);
    }
}
