use butterfly_authority::{Authority, UsageLog};
use butterfly_core::Result;
use butterfly_storage::CredentialStore;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub const BLOCKED_TITLE: &str = "Blocked Page";
pub const TIME_EXCEEDED_TITLE: &str = "Time Limit Exceeded";
pub const UNKNOWN_TITLE: &str = "Unknown Page";

/// Best-effort navigation logging to the authority.
#[derive(Clone)]
pub struct UsageReporter {
    authority: Arc<dyn Authority>,
    credentials: CredentialStore,
}

impl UsageReporter {
    pub fn new(authority: Arc<dyn Authority>, credentials: CredentialStore) -> Self {
        Self {
            authority,
            credentials,
        }
    }

    /// Sends one log entry. Returns `Ok(false)` when no credential is
    /// configured and nothing was sent.
    pub async fn report(&self, url: &str, title: &str, is_blocked: bool) -> Result<bool> {
        let Some(credential) = self.credentials.load().await? else {
            debug!(url = %url, "No hash key configured, not logging navigation");
            return Ok(false);
        };
        let entry = UsageLog::new(&credential, url, title, is_blocked);
        self.authority.log_usage(&entry).await?;
        debug!(url = %url, is_blocked, "Navigation logged");
        Ok(true)
    }

    /// Runs [`report`](Self::report) on a detached task; failures are only logged.
    pub fn spawn_report(&self, url: &str, title: &str, is_blocked: bool) -> JoinHandle<()> {
        let reporter = self.clone();
        let url = url.to_string();
        let title = title.to_string();
        tokio::spawn(async move {
            if let Err(e) = reporter.report(&url, &title, is_blocked).await {
                warn!(url = %url, error = %e, "Failed to log navigation");
            }
        })
    }
}
