//! The bridge supervisor: owns both platform sessions and the router,
//! wires them together, and coordinates startup and shutdown.

use crate::config::BridgeConfig;
use crate::error::Result;
use crate::platform::mattermost::MattermostClient;
use crate::platform::slack::SlackClient;
use crate::relay::RelayRouter;
use crate::session::traits::PlatformClient;
use crate::session::{PlatformSession, SessionSettings};
use std::sync::Arc;

/// Top-level owner of the two sessions and the relay router.
pub struct Bridge<A: PlatformClient = SlackClient, B: PlatformClient = MattermostClient> {
    left: Arc<PlatformSession<A>>,
    right: Arc<PlatformSession<B>>,
    router: Arc<RelayRouter>,
}

impl Bridge {
    /// Build the Slack↔Mattermost bridge from validated configuration.
    pub fn from_config(config: &BridgeConfig) -> Result<Self> {
        let settings = SessionSettings {
            heartbeat_interval: config.bridge.heartbeat_interval(),
            reconnect_delay: config.bridge.reconnect_delay(),
        };
        let slack = SlackClient::new(&config.slack)?;
        let mattermost = MattermostClient::new(&config.mattermost)?;
        Ok(Self::pair(
            PlatformSession::new(slack, settings.clone()),
            PlatformSession::new(mattermost, settings),
        ))
    }
}

impl<A: PlatformClient, B: PlatformClient> Bridge<A, B> {
    /// Wire two sessions together. Exposed generically so the pipeline can
    /// run against any pair of platform clients.
    pub fn pair(left: PlatformSession<A>, right: PlatformSession<B>) -> Self {
        Self {
            left: Arc::new(left),
            right: Arc::new(right),
            router: Arc::new(RelayRouter::new()),
        }
    }

    pub fn left(&self) -> &Arc<PlatformSession<A>> {
        &self.left
    }

    pub fn right(&self) -> &Arc<PlatformSession<B>> {
        &self.right
    }

    /// Start both sessions sequentially, failing fast (a bridge with one
    /// live side is useless), then begin relaying in both directions.
    pub async fn start(&self) -> Result<()> {
        self.left.start().await?;
        self.right.start().await?;

        {
            let source = Arc::clone(&self.left);
            let dest = Arc::clone(&self.right);
            let router = Arc::clone(&self.router);
            self.left.spawn_listen(move |event| {
                let source = Arc::clone(&source);
                let dest = Arc::clone(&dest);
                let router = Arc::clone(&router);
                async move { router.handle(event, source.as_ref(), dest.as_ref()).await }
            });
        }
        {
            let source = Arc::clone(&self.right);
            let dest = Arc::clone(&self.left);
            let router = Arc::clone(&self.router);
            self.right.spawn_listen(move |event| {
                let source = Arc::clone(&source);
                let dest = Arc::clone(&dest);
                let router = Arc::clone(&router);
                async move { router.handle(event, source.as_ref(), dest.as_ref()).await }
            });
        }

        tracing::info!(
            left = self.left.platform(),
            right = self.right.platform(),
            "bridge relaying"
        );
        Ok(())
    }

    /// Stop both sessions. Each stop blocks until that session's loops have
    /// exited, so when this returns no further relay activity can occur.
    pub async fn stop(&self) {
        self.left.stop().await;
        self.right.stop().await;
        tracing::info!("bridge stopped");
    }
}
