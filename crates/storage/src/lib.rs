pub mod credential;
pub mod kv;
pub mod policy_cache;
pub mod usage;

pub use credential::CredentialStore;
pub use kv::{FileKvStore, KvStore, MemoryKvStore};
pub use policy_cache::PolicyCache;
pub use usage::{usage_key, UsageStore};

use butterfly_core::Paths;
use std::sync::Arc;

/// The two storage namespaces the agent uses.
#[derive(Clone)]
pub struct Storage {
    /// Synced across the user's devices; holds the credential.
    pub sync: Arc<dyn KvStore>,
    /// Device-local; holds the policy snapshot and usage counters.
    pub local: Arc<dyn KvStore>,
}

impl Storage {
    pub fn open(paths: &Paths) -> Self {
        Self {
            sync: Arc::new(FileKvStore::new(paths.sync_store_file())),
            local: Arc::new(FileKvStore::new(paths.local_store_file())),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            sync: Arc::new(MemoryKvStore::new()),
            local: Arc::new(MemoryKvStore::new()),
        }
    }

    pub fn credentials(&self) -> CredentialStore {
        CredentialStore::new(self.sync.clone())
    }

    pub fn policy_cache(&self) -> PolicyCache {
        PolicyCache::new(self.local.clone())
    }

    /// Counters are serialized per `UsageStore`; share one instance per process.
    pub fn usage(&self) -> UsageStore {
        UsageStore::new(self.local.clone())
    }
}
