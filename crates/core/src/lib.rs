pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod paths;
pub mod types;

pub use clock::{local_day, Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{Error, Result};
pub use event::{HostCommand, HostEvent};
pub use paths::Paths;
pub use types::{Credential, EnforcementDecision, FrameId, Policy, TabId, PRIMARY_FRAME};
