//! In-process authority with a programmable policy, for offline runs and tests.

use async_trait::async_trait;
use butterfly_core::{Credential, Error, Policy, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::{Authority, UsageLog};

#[derive(Default)]
pub struct ScriptedAuthority {
    policy: Mutex<Option<Policy>>,
    logs: Mutex<Vec<UsageLog>>,
    fail_logs: Mutex<bool>,
    policy_requests: AtomicUsize,
}

impl ScriptedAuthority {
    /// Serves `policy` to every fetch.
    pub fn serving(policy: Policy) -> Self {
        let authority = Self::default();
        authority.set_policy(Some(policy));
        authority
    }

    /// Fails every call as if the authority were unreachable.
    pub fn offline() -> Self {
        let authority = Self::default();
        authority.set_fail_logs(true);
        authority
    }

    pub fn set_policy(&self, policy: Option<Policy>) {
        *self.policy.lock().unwrap_or_else(|e| e.into_inner()) = policy;
    }

    pub fn set_fail_logs(&self, fail: bool) {
        *self.fail_logs.lock().unwrap_or_else(|e| e.into_inner()) = fail;
    }

    pub fn logs(&self) -> Vec<UsageLog> {
        self.logs.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn policy_requests(&self) -> usize {
        self.policy_requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Authority for ScriptedAuthority {
    async fn fetch_policy(&self, _credential: &Credential) -> Result<Policy> {
        self.policy_requests.fetch_add(1, Ordering::SeqCst);
        self.policy
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| Error::Network("authority unreachable".to_string()))
    }

    async fn log_usage(&self, entry: &UsageLog) -> Result<()> {
        if *self.fail_logs.lock().unwrap_or_else(|e| e.into_inner()) {
            return Err(Error::Network("authority unreachable".to_string()));
        }
        self.logs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry.clone());
        Ok(())
    }
}
