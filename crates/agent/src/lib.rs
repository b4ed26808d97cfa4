pub mod enforcement;
pub mod host;
pub mod quota;
pub mod report;

pub use enforcement::{EnforcementAgent, TabState};
pub use host::{ChannelHost, Host};
pub use quota::QuotaTracker;
pub use report::UsageReporter;
