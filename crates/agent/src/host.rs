use async_trait::async_trait;
use butterfly_core::{Error, HostCommand, Result, TabId};
use tokio::sync::mpsc;

/// What the agent can ask of the host platform.
#[async_trait]
pub trait Host: Send + Sync {
    /// Points `tab` at `url`, replacing whatever it was loading.
    async fn redirect(&self, tab: TabId, url: &str) -> Result<()>;
}

/// Queues host commands for whatever bridge drains the paired receiver.
pub struct ChannelHost {
    tx: mpsc::Sender<HostCommand>,
}

impl ChannelHost {
    /// A host plus the receiving end its commands are written to.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<HostCommand>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Host for ChannelHost {
    async fn redirect(&self, tab: TabId, url: &str) -> Result<()> {
        self.tx
            .send(HostCommand::Redirect {
                tab_id: tab,
                url: url.to_string(),
            })
            .await
            .map_err(|e| Error::Other(format!("host bridge closed: {}", e)))
    }
}
