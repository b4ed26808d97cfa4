//! Per-tab enforcement state machine.
//!
//! Navigation intents are classified before the page loads and denied ones are
//! redirected to the interstitial page. Completed navigations on rationed
//! domains open dwell sessions; tab activation and closure move time into the
//! daily counters. Nothing here returns an error to the caller: remote and
//! storage failures are logged and the navigation proceeds.

use butterfly_core::config::EnforcementConfig;
use butterfly_core::{Credential, EnforcementDecision, FrameId, HostEvent, TabId, PRIMARY_FRAME};
use butterfly_policy::{Classification, PolicyStore, Rule};
use butterfly_scheduler::{RefreshHandle, RefreshReason};
use butterfly_storage::CredentialStore;
use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use url::form_urlencoded;

use crate::host::Host;
use crate::quota::QuotaTracker;
use crate::report::{UsageReporter, BLOCKED_TITLE, TIME_EXCEEDED_TITLE, UNKNOWN_TITLE};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TabState {
    #[default]
    Unobserved,
    /// Navigation allowed; waiting for it to complete.
    Evaluating,
    Allowed,
    /// Redirected to the interstitial page.
    Blocked,
    Rationed { domain: String },
}

pub struct EnforcementAgent {
    config: EnforcementConfig,
    policies: Arc<PolicyStore>,
    quota: Arc<QuotaTracker>,
    reporter: UsageReporter,
    credentials: CredentialStore,
    host: Arc<dyn Host>,
    refresh: Option<RefreshHandle>,
    tabs: Mutex<HashMap<TabId, TabState>>,
    active_tab: Mutex<Option<TabId>>,
}

impl EnforcementAgent {
    pub fn new(
        config: EnforcementConfig,
        policies: Arc<PolicyStore>,
        quota: Arc<QuotaTracker>,
        reporter: UsageReporter,
        credentials: CredentialStore,
        host: Arc<dyn Host>,
    ) -> Self {
        Self {
            config,
            policies,
            quota,
            reporter,
            credentials,
            host,
            refresh: None,
            tabs: Mutex::new(HashMap::new()),
            active_tab: Mutex::new(None),
        }
    }

    /// Routes credential changes to a running refresh service. Without one,
    /// a credential change re-hydrates the policy from the cache.
    pub fn with_refresh(mut self, refresh: RefreshHandle) -> Self {
        self.refresh = Some(refresh);
        self
    }

    /// Loads the cached policy so enforcement starts before the first refresh
    /// lands. Returns whether a policy is in force.
    pub async fn init(&self) -> bool {
        let loaded = self.policies.hydrate().await;
        if loaded {
            info!("Enforcement started with cached policy");
        } else {
            info!("Enforcement started without a policy, allowing all navigation");
        }
        loaded
    }

    pub fn tab_state(&self, tab: TabId) -> TabState {
        self.tabs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&tab)
            .cloned()
            .unwrap_or_default()
    }

    fn set_state(&self, tab: TabId, state: TabState) {
        self.tabs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(tab, state);
    }

    pub fn active_tab(&self) -> Option<TabId> {
        *self.active_tab.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_foreground(&self, tab: TabId) -> bool {
        self.active_tab().map_or(true, |active| active == tab)
    }

    pub fn quota(&self) -> &Arc<QuotaTracker> {
        &self.quota
    }

    fn should_ignore(&self, frame: FrameId, url: &str) -> bool {
        frame != PRIMARY_FRAME || self.config.is_internal_url(url)
    }

    fn forget_tab(&self, tab: TabId) {
        self.tabs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&tab);
    }

    /// Interstitial page URL carrying `param=value`.
    pub fn interstitial_url(&self, param: &str, value: &str) -> String {
        let base = &self.config.interstitial_url;
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair(param, value)
            .finish();
        let separator = if base.contains('?') { '&' } else { '?' };
        format!("{}{}{}", base, separator, query)
    }

    /// Classifies `url` against the current policy and today's usage.
    pub async fn evaluate(&self, url: &str) -> Classification {
        self.policies.classify(url, self.quota.as_ref()).await
    }

    /// Handles one host event. `Break` means the host asked the agent to stop;
    /// open sessions have been flushed by then.
    pub async fn handle_event(&self, event: HostEvent) -> ControlFlow<()> {
        match event {
            HostEvent::NavigationIntent {
                tab_id,
                frame_id,
                url,
            } => self.on_navigation_intent(tab_id, frame_id, &url).await,
            HostEvent::NavigationComplete {
                tab_id,
                frame_id,
                url,
                title,
            } => {
                self.on_navigation_complete(tab_id, frame_id, &url, title.as_deref())
                    .await
            }
            HostEvent::TabActivated { tab_id } => self.on_tab_activated(tab_id).await,
            HostEvent::TabClosed { tab_id } => self.on_tab_closed(tab_id).await,
            HostEvent::CredentialChanged { hash_key } => {
                self.on_credential_changed(hash_key.as_deref()).await
            }
            HostEvent::Shutdown => {
                self.shutdown().await;
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    pub async fn on_navigation_intent(&self, tab: TabId, frame: FrameId, url: &str) {
        if frame != PRIMARY_FRAME {
            return;
        }

        // The tab is leaving whatever it was showing.
        self.quota.end_dwell(tab).await;

        if self.config.is_internal_url(url) {
            // The interstitial load that follows a redirect keeps the tab blocked.
            if self.tab_state(tab) != TabState::Blocked {
                self.forget_tab(tab);
            }
            debug!(tab, url = %url, "Internal navigation, not enforced");
            return;
        }

        let Classification { host, decision, .. } = self.evaluate(url).await;
        debug!(tab, url = %url, decision = %decision, "Navigation classified");

        let (title, target) = match decision {
            EnforcementDecision::Blocked => (BLOCKED_TITLE, self.interstitial_url("blocked", url)),
            EnforcementDecision::TimeExceeded => {
                (TIME_EXCEEDED_TITLE, self.interstitial_url("timelimit", &host))
            }
            EnforcementDecision::Allowed | EnforcementDecision::TimeLimited => {
                self.set_state(tab, TabState::Evaluating);
                return;
            }
        };

        info!(tab, url = %url, decision = %decision, "Navigation denied");
        self.reporter.spawn_report(url, title, true);
        self.set_state(tab, TabState::Blocked);
        if let Err(e) = self.host.redirect(tab, &target).await {
            warn!(tab, error = %e, "Failed to redirect tab to interstitial page");
        }
    }

    pub async fn on_navigation_complete(
        &self,
        tab: TabId,
        frame: FrameId,
        url: &str,
        title: Option<&str>,
    ) {
        if self.should_ignore(frame, url) || self.tab_state(tab) == TabState::Blocked {
            return;
        }

        let title = title.filter(|t| !t.is_empty()).unwrap_or(UNKNOWN_TITLE);
        self.reporter.spawn_report(url, title, false);

        let Classification { host, rule, .. } = self.evaluate(url).await;
        if rule != Rule::Rationed {
            self.set_state(tab, TabState::Allowed);
            return;
        }

        if self.is_foreground(tab) {
            self.quota.begin_dwell(tab, &host).await;
        } else {
            debug!(tab, domain = %host, "Rationed page loaded in background");
        }
        self.set_state(tab, TabState::Rationed { domain: host });
    }

    pub async fn on_tab_activated(&self, tab: TabId) {
        *self.active_tab.lock().unwrap_or_else(|e| e.into_inner()) = Some(tab);
        self.quota.switch_foreground(tab).await;

        if let TabState::Rationed { domain } = self.tab_state(tab) {
            if !self.quota.is_tracking(tab) {
                self.quota.begin_dwell(tab, &domain).await;
            }
        }
    }

    pub async fn on_tab_closed(&self, tab: TabId) {
        let seconds = self.quota.end_dwell(tab).await;
        self.forget_tab(tab);
        {
            let mut active = self.active_tab.lock().unwrap_or_else(|e| e.into_inner());
            if *active == Some(tab) {
                *active = None;
            }
        }
        debug!(tab, seconds, "Tab closed");
    }

    /// Stores a key carried by the event (an empty key clears it), then asks
    /// the refresh service to start over with the new credential. With no
    /// refresh service the current policy is dropped and reloaded from the
    /// cache.
    pub async fn on_credential_changed(&self, hash_key: Option<&str>) {
        match hash_key.map(str::trim) {
            Some("") => {
                if let Err(e) = self.credentials.clear().await {
                    warn!(error = %e, "Failed to clear hash key");
                }
            }
            Some(raw) => match Credential::parse(raw) {
                Ok(credential) => {
                    if let Err(e) = self.credentials.save(&credential).await {
                        warn!(error = %e, "Failed to store hash key");
                    }
                }
                Err(e) => warn!(error = %e, "Ignoring invalid hash key"),
            },
            None => {}
        }

        match &self.refresh {
            Some(refresh) => {
                refresh.request(RefreshReason::CredentialChanged);
            }
            None => {
                self.policies.invalidate();
                let loaded = self.policies.hydrate().await;
                info!(loaded, "Credential changed, policy reloaded from cache");
            }
        }
    }

    /// Flushes every open dwell session.
    pub async fn shutdown(&self) {
        let tabs = self.quota.tracked_tabs();
        let seconds = self.quota.flush_all().await;
        info!(seconds, open_sessions = tabs.len(), "Enforcement stopped");
    }

    /// Dispatches events in arrival order until the stream ends, a `Shutdown`
    /// event arrives, or the shutdown signal fires.
    pub async fn run_loop(
        self: Arc<Self>,
        mut events: mpsc::Receiver<HostEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!("EnforcementAgent started");
        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        debug!("Host event stream closed");
                        self.shutdown().await;
                        break;
                    };
                    if self.handle_event(event).await.is_break() {
                        break;
                    }
                }
                _ = shutdown.recv() => {
                    info!("EnforcementAgent shutting down");
                    self.shutdown().await;
                    break;
                }
            }
        }
    }
}
