use butterfly_core::{Error, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::kv::KvStore;

const USAGE_KEY_PREFIX: &str = "timeUsage_";

/// Storage key for one (domain, day) usage counter.
pub fn usage_key(domain: &str, day: &str) -> String {
    format!("{}{}_{}", USAGE_KEY_PREFIX, domain, day)
}

/// Per-domain, per-day accumulated seconds in the local namespace.
pub struct UsageStore {
    local: Arc<dyn KvStore>,
    // Serializes read-modify-write of counters.
    write_lock: Mutex<()>,
}

impl UsageStore {
    pub fn new(local: Arc<dyn KvStore>) -> Self {
        Self {
            local,
            write_lock: Mutex::new(()),
        }
    }

    pub async fn seconds(&self, domain: &str, day: &str) -> Result<u64> {
        let key = usage_key(domain, day);
        let found = self.local.get(&[key.as_str()]).await?;
        Ok(found.get(&key).map(counter_value).unwrap_or(0))
    }

    /// Adds `seconds` to the counter and returns the new total.
    pub async fn add(&self, domain: &str, day: &str, seconds: u64) -> Result<u64> {
        let _guard = self.write_lock.lock().await;
        let current = self.seconds(domain, day).await?;
        let total = current
            .checked_add(seconds)
            .ok_or_else(|| Error::Storage(format!("usage counter overflow for {}", domain)))?;
        let key = usage_key(domain, day);
        self.local
            .set(HashMap::from([(key, Value::from(total))]))
            .await?;
        debug!(domain = %domain, day = %day, added = seconds, total, "Usage updated");
        Ok(total)
    }

    /// Every domain with a counter for `day`, sorted by domain.
    pub async fn day_report(&self, day: &str) -> Result<Vec<(String, u64)>> {
        let suffix = format!("_{}", day);
        let mut report: Vec<(String, u64)> = self
            .local
            .get_all()
            .await?
            .iter()
            .filter_map(|(key, value)| {
                let domain = key.strip_prefix(USAGE_KEY_PREFIX)?.strip_suffix(&suffix)?;
                Some((domain.to_string(), counter_value(value)))
            })
            .collect();
        report.sort();
        Ok(report)
    }
}

// Counters written by older builds may be floats; anything else reads as zero.
fn counter_value(value: &Value) -> u64 {
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|f| *f > 0.0).map(|f| f as u64))
        .unwrap_or(0)
}
