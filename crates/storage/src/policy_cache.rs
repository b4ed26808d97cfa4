use butterfly_core::{Policy, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::kv::KvStore;

pub const POLICY_CACHE_KEY: &str = "butterflyPolicies";

/// Last policy fetched from the authority, kept for offline start-up.
#[derive(Clone)]
pub struct PolicyCache {
    local: Arc<dyn KvStore>,
}

impl PolicyCache {
    pub fn new(local: Arc<dyn KvStore>) -> Self {
        Self { local }
    }

    pub async fn load(&self) -> Result<Option<Policy>> {
        let found = self.local.get(&[POLICY_CACHE_KEY]).await?;
        let Some(raw) = found.get(POLICY_CACHE_KEY) else {
            return Ok(None);
        };
        if raw.is_null() {
            return Ok(None);
        }
        match serde_json::from_value::<Policy>(raw.clone()) {
            Ok(policy) => Ok(Some(policy)),
            Err(e) => {
                warn!(error = %e, "Cached policy is unreadable, ignoring it");
                Ok(None)
            }
        }
    }

    pub async fn save(&self, policy: &Policy) -> Result<()> {
        let value = serde_json::to_value(policy)?;
        self.local
            .set(HashMap::from([(POLICY_CACHE_KEY.to_string(), value)]))
            .await
    }

    pub async fn clear(&self) -> Result<()> {
        self.local.remove(&[POLICY_CACHE_KEY]).await
    }
}
