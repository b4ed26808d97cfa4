use butterfly_core::{Credential, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::kv::KvStore;

pub const CREDENTIAL_KEY: &str = "butterflyHashKey";

/// The supervising-group credential, kept in the sync namespace.
#[derive(Clone)]
pub struct CredentialStore {
    sync: Arc<dyn KvStore>,
}

impl CredentialStore {
    pub fn new(sync: Arc<dyn KvStore>) -> Self {
        Self { sync }
    }

    pub async fn load(&self) -> Result<Option<Credential>> {
        let found = self.sync.get(&[CREDENTIAL_KEY]).await?;
        let Some(raw) = found.get(CREDENTIAL_KEY).and_then(Value::as_str) else {
            return Ok(None);
        };
        match Credential::parse(raw) {
            Ok(credential) => Ok(Some(credential)),
            Err(e) => {
                warn!(error = %e, "Stored hash key is invalid, ignoring it");
                Ok(None)
            }
        }
    }

    pub async fn save(&self, credential: &Credential) -> Result<()> {
        self.sync
            .set(HashMap::from([(
                CREDENTIAL_KEY.to_string(),
                Value::from(credential.as_str()),
            )]))
            .await
    }

    pub async fn clear(&self) -> Result<()> {
        self.sync.remove(&[CREDENTIAL_KEY]).await
    }

    /// Re-reads the namespace, picking up a key written by another process.
    pub async fn reload(&self) -> Result<Option<Credential>> {
        self.sync.reload().await?;
        self.load().await
    }
}
