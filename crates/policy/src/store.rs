use butterfly_authority::Authority;
use butterfly_core::{Credential, Policy, Result};
use butterfly_storage::PolicyCache;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

use crate::classifier::{self, Classification, UsageSource};

/// Holds the current policy and keeps it in step with the authority.
///
/// Readers get an `Arc<Policy>` snapshot; a refresh swaps the whole `Arc`, so
/// nobody ever observes a partially updated policy. Concurrent refreshes are
/// not ordered: whichever completes last wins.
pub struct PolicyStore {
    current: RwLock<Option<Arc<Policy>>>,
    authority: Arc<dyn Authority>,
    cache: PolicyCache,
}

impl PolicyStore {
    pub fn new(authority: Arc<dyn Authority>, cache: PolicyCache) -> Self {
        Self {
            current: RwLock::new(None),
            authority,
            cache,
        }
    }

    /// The last successfully loaded policy, if any.
    pub fn current(&self) -> Option<Arc<Policy>> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn swap(&self, policy: Option<Arc<Policy>>) {
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = policy;
    }

    /// Loads the cached snapshot when no policy is current. Returns whether a
    /// policy is current afterwards.
    pub async fn hydrate(&self) -> bool {
        if self.current().is_some() {
            return true;
        }
        match self.cache.load().await {
            Ok(Some(policy)) => {
                info!(
                    blocked = policy.blocked_patterns.len(),
                    rationed = policy.rationed_patterns.len(),
                    "Policy hydrated from cache"
                );
                self.swap(Some(Arc::new(policy)));
                true
            }
            Ok(None) => {
                debug!("No cached policy available");
                false
            }
            Err(e) => {
                warn!(error = %e, "Failed to read cached policy");
                false
            }
        }
    }

    /// Fetches the policy for `credential`.
    ///
    /// On success the policy becomes current and is written to the cache. On
    /// failure the current policy is left alone; if there is none, the cache
    /// is tried instead. The fetch error is returned either way.
    pub async fn refresh(&self, credential: &Credential) -> Result<Arc<Policy>> {
        match self.authority.fetch_policy(credential).await {
            Ok(policy) => {
                let policy = Arc::new(policy);
                self.swap(Some(policy.clone()));
                info!(
                    blocked = policy.blocked_patterns.len(),
                    rationed = policy.rationed_patterns.len(),
                    daily_quota_secs = policy.daily_quota_seconds,
                    "Policy refreshed"
                );
                if let Err(e) = self.cache.save(&policy).await {
                    warn!(error = %e, "Failed to cache refreshed policy");
                }
                Ok(policy)
            }
            Err(e) => {
                warn!(error = %e, "Policy refresh failed");
                if self.current().is_none() {
                    self.hydrate().await;
                }
                Err(e)
            }
        }
    }

    /// Forgets the current policy so the next refresh starts from scratch.
    pub fn invalidate(&self) {
        debug!("Policy invalidated");
        self.swap(None);
    }

    pub fn recommended_sites(&self) -> BTreeMap<String, String> {
        self.current()
            .map(|p| p.recommended_sites.clone())
            .unwrap_or_default()
    }

    /// Classifies `url` against the current policy snapshot.
    pub async fn classify(&self, url: &str, usage: &dyn UsageSource) -> Classification {
        let policy = self.current();
        classifier::classify(url, policy.as_deref(), usage).await
    }
}
