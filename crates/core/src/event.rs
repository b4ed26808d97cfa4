use serde::{Deserialize, Serialize};

use crate::types::{FrameId, TabId, PRIMARY_FRAME};

/// Lifecycle events raised by the host platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HostEvent {
    /// A tab is about to navigate.
    #[serde(rename_all = "camelCase")]
    NavigationIntent {
        tab_id: TabId,
        #[serde(default)]
        frame_id: FrameId,
        url: String,
    },
    /// A navigation finished loading.
    #[serde(rename_all = "camelCase")]
    NavigationComplete {
        tab_id: TabId,
        #[serde(default)]
        frame_id: FrameId,
        url: String,
        #[serde(default)]
        title: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    TabActivated { tab_id: TabId },
    #[serde(rename_all = "camelCase")]
    TabClosed { tab_id: TabId },
    /// The supervising-group credential changed. A key carried on the event
    /// is stored first; without one the sync namespace is re-read.
    #[serde(rename_all = "camelCase")]
    CredentialChanged {
        #[serde(default)]
        hash_key: Option<String>,
    },
    Shutdown,
}

impl HostEvent {
    pub fn tab_id(&self) -> Option<TabId> {
        match self {
            Self::NavigationIntent { tab_id, .. }
            | Self::NavigationComplete { tab_id, .. }
            | Self::TabActivated { tab_id }
            | Self::TabClosed { tab_id } => Some(*tab_id),
            Self::CredentialChanged { .. } | Self::Shutdown => None,
        }
    }

    /// Whether the event concerns a tab's top-level document. Tab-level
    /// events count as primary.
    pub fn is_primary_frame(&self) -> bool {
        match self {
            Self::NavigationIntent { frame_id, .. } | Self::NavigationComplete { frame_id, .. } => {
                *frame_id == PRIMARY_FRAME
            }
            _ => true,
        }
    }
}

/// Instructions sent back to the host platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HostCommand {
    #[serde(rename_all = "camelCase")]
    Redirect { tab_id: TabId, url: String },
}
