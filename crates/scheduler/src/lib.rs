pub mod refresh;

pub use refresh::{PolicyRefreshService, RefreshHandle, RefreshReason};
