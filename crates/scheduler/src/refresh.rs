use butterfly_core::{Policy, Result};
use butterfly_policy::PolicyStore;
use butterfly_storage::CredentialStore;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshReason {
    Startup,
    Timer,
    /// The credential changed: drop the current policy and start over.
    CredentialChanged,
    Manual,
}

impl fmt::Display for RefreshReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshReason::Startup => write!(f, "startup"),
            RefreshReason::Timer => write!(f, "timer"),
            RefreshReason::CredentialChanged => write!(f, "credential_changed"),
            RefreshReason::Manual => write!(f, "manual"),
        }
    }
}

/// Cheap, cloneable way to ask the refresh service for an out-of-band refresh.
#[derive(Clone)]
pub struct RefreshHandle {
    tx: mpsc::Sender<RefreshReason>,
}

impl RefreshHandle {
    /// Queues a refresh without waiting. Returns false if the service is gone
    /// or already has a backlog.
    pub fn request(&self, reason: RefreshReason) -> bool {
        match self.tx.try_send(reason) {
            Ok(()) => true,
            Err(e) => {
                warn!(reason = %reason, error = %e, "Refresh request dropped");
                false
            }
        }
    }
}

/// Keeps the policy store in step with the authority: once at start, on a
/// fixed interval, and whenever a refresh is requested.
pub struct PolicyRefreshService {
    policies: Arc<PolicyStore>,
    credentials: CredentialStore,
    interval: Duration,
}

impl PolicyRefreshService {
    pub fn new(policies: Arc<PolicyStore>, credentials: CredentialStore) -> Self {
        Self {
            policies,
            credentials,
            interval: Duration::from_secs(5 * 60),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Creates the request channel. The receiver goes to `run_loop`.
    pub fn channel() -> (RefreshHandle, mpsc::Receiver<RefreshReason>) {
        let (tx, rx) = mpsc::channel(16);
        (RefreshHandle { tx }, rx)
    }

    /// Runs one refresh. `Ok(None)` means no credential is configured and the
    /// authority was not contacted.
    pub async fn refresh_now(&self, reason: RefreshReason) -> Result<Option<Arc<Policy>>> {
        let credential = if reason == RefreshReason::CredentialChanged {
            self.policies.invalidate();
            self.credentials.reload().await?
        } else {
            self.credentials.load().await?
        };

        let Some(credential) = credential else {
            debug!(reason = %reason, "No hash key configured, skipping policy refresh");
            if reason == RefreshReason::CredentialChanged {
                self.policies.hydrate().await;
            }
            return Ok(None);
        };

        debug!(reason = %reason, "Refreshing policy");
        self.policies.refresh(&credential).await.map(Some)
    }

    fn spawn_refresh(self: &Arc<Self>, reason: RefreshReason) {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = service.refresh_now(reason).await {
                error!(reason = %reason, error = %e, "Policy refresh failed");
            }
        });
    }

    /// Refreshes are detached so a slow authority never holds up the next tick
    /// or a credential change.
    pub async fn run_loop(
        self: Arc<Self>,
        mut requests: mpsc::Receiver<RefreshReason>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!(interval_secs = self.interval.as_secs(), "PolicyRefreshService started");

        let mut interval = tokio::time::interval(self.interval);
        let mut started = false;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let reason = if started { RefreshReason::Timer } else { RefreshReason::Startup };
                    started = true;
                    self.spawn_refresh(reason);
                }
                Some(reason) = requests.recv() => {
                    self.spawn_refresh(reason);
                }
                _ = shutdown.recv() => {
                    info!("PolicyRefreshService shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use butterfly_authority::ScriptedAuthority;
    use butterfly_core::Credential;
    use butterfly_storage::{MemoryKvStore, PolicyCache};

    fn blocking(pattern: &str) -> Policy {
        Policy {
            blocked_patterns: vec![pattern.to_string()],
            ..Default::default()
        }
    }

    struct Fixture {
        authority: Arc<ScriptedAuthority>,
        policies: Arc<PolicyStore>,
        credentials: CredentialStore,
        service: Arc<PolicyRefreshService>,
    }

    fn fixture(policy: Option<Policy>) -> Fixture {
        let authority = Arc::new(ScriptedAuthority::offline());
        authority.set_policy(policy);
        let policies = Arc::new(PolicyStore::new(
            authority.clone(),
            PolicyCache::new(Arc::new(MemoryKvStore::new())),
        ));
        let credentials = CredentialStore::new(Arc::new(MemoryKvStore::new()));
        let service = Arc::new(PolicyRefreshService::new(policies.clone(), credentials.clone()));
        Fixture {
            authority,
            policies,
            credentials,
            service,
        }
    }

    #[tokio::test]
    async fn test_no_credential_skips_network() {
        let f = fixture(Some(blocking("a.com")));
        let result = f.service.refresh_now(RefreshReason::Startup).await.unwrap();
        assert!(result.is_none());
        assert_eq!(f.authority.policy_requests(), 0);
        assert!(f.policies.current().is_none());
    }

    #[tokio::test]
    async fn test_refresh_with_credential() {
        let f = fixture(Some(blocking("a.com")));
        f.credentials.save(&Credential::parse("ABC12").unwrap()).await.unwrap();
        let policy = f.service.refresh_now(RefreshReason::Timer).await.unwrap().unwrap();
        assert_eq!(policy.blocked_patterns, vec!["a.com"]);
        assert_eq!(f.authority.policy_requests(), 1);
    }

    #[tokio::test]
    async fn test_credential_change_replaces_policy() {
        let f = fixture(Some(blocking("old.com")));
        f.credentials.save(&Credential::parse("ABC12").unwrap()).await.unwrap();
        f.service.refresh_now(RefreshReason::Startup).await.unwrap();

        f.authority.set_policy(Some(blocking("new.com")));
        f.credentials.save(&Credential::parse("XYZ99").unwrap()).await.unwrap();
        f.service.refresh_now(RefreshReason::CredentialChanged).await.unwrap();
        assert_eq!(f.policies.current().as_deref(), Some(&blocking("new.com")));
    }

    #[tokio::test]
    async fn test_run_loop_refreshes_on_start_and_request() {
        let f = fixture(Some(blocking("a.com")));
        f.credentials.save(&Credential::parse("ABC12").unwrap()).await.unwrap();

        let service = Arc::new(
            PolicyRefreshService::new(f.policies.clone(), f.credentials.clone())
                .with_interval(Duration::from_secs(3600)),
        );
        let (handle, requests) = PolicyRefreshService::channel();
        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let shutdown_rx = shutdown_tx.subscribe();
        let task = tokio::spawn(service.run_loop(requests, shutdown_rx));

        for _ in 0..100 {
            if f.authority.policy_requests() >= 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(f.authority.policy_requests(), 1);
        assert!(f.policies.current().is_some());

        assert!(handle.request(RefreshReason::Manual));
        for _ in 0..100 {
            if f.authority.policy_requests() >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(f.authority.policy_requests(), 2);

        let _ = shutdown_tx.send(());
        task.await.unwrap();
    }

    async fn wait_for_requests(authority: &ScriptedAuthority, count: usize) -> usize {
        for _ in 0..100 {
            if authority.policy_requests() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        authority.policy_requests()
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_refreshes_on_interval() {
        let f = fixture(Some(blocking("a.com")));
        f.credentials.save(&Credential::parse("ABC12").unwrap()).await.unwrap();

        let service = Arc::new(
            PolicyRefreshService::new(f.policies.clone(), f.credentials.clone())
                .with_interval(Duration::from_secs(60)),
        );
        let (_handle, requests) = PolicyRefreshService::channel();
        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let task = tokio::spawn(service.run_loop(requests, shutdown_tx.subscribe()));

        assert_eq!(wait_for_requests(&f.authority, 1).await, 1);

        f.authority.set_policy(Some(blocking("b.com")));
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(wait_for_requests(&f.authority, 2).await, 2);
        assert_eq!(f.policies.current().as_deref(), Some(&blocking("b.com")));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(wait_for_requests(&f.authority, 3).await, 3);

        let _ = shutdown_tx.send(());
        task.await.unwrap();
    }
}
