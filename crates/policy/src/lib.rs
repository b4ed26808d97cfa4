pub mod classifier;
pub mod store;

pub use classifier::{classify, decide, extract_host, rule_for, Classification, Rule, UsageSource};
pub use store::PolicyStore;
