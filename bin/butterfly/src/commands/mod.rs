pub mod check;
pub mod key;
pub mod onboard;
pub mod refresh;
pub mod run_cmd;
pub mod status;
pub mod usage;

use butterfly_agent::QuotaTracker;
use butterfly_authority::{Authority, HttpAuthority, ScriptedAuthority};
use butterfly_core::{Config, Paths, SystemClock};
use butterfly_policy::PolicyStore;
use butterfly_storage::Storage;
use std::sync::Arc;

/// The long-lived pieces every command wires together.
pub struct Services {
    pub paths: Paths,
    pub config: Config,
    pub storage: Storage,
    pub authority: Arc<dyn Authority>,
    pub policies: Arc<PolicyStore>,
    pub quota: Arc<QuotaTracker>,
}

impl Services {
    pub fn open(offline: bool) -> anyhow::Result<Self> {
        let paths = Paths::new();
        paths.ensure_dirs()?;
        let config = Config::load_or_default(&paths)?;
        let storage = Storage::open(&paths);

        let authority: Arc<dyn Authority> = if offline {
            Arc::new(ScriptedAuthority::offline())
        } else {
            Arc::new(HttpAuthority::from_config(&config))
        };
        let policies = Arc::new(PolicyStore::new(authority.clone(), storage.policy_cache()));
        let quota = Arc::new(QuotaTracker::new(storage.usage(), Arc::new(SystemClock)));

        Ok(Self {
            paths,
            config,
            storage,
            authority,
            policies,
            quota,
        })
    }
}

pub fn format_duration(seconds: u64) -> String {
    let (h, m, s) = (seconds / 3600, (seconds % 3600) / 60, seconds % 60);
    if h > 0 {
        format!("{}h {:02}m {:02}s", h, m, s)
    } else if m > 0 {
        format!("{}m {:02}s", m, s)
    } else {
        format!("{}s", s)
    }
}
