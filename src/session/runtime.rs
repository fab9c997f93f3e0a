//! Connection lifecycle for one platform.
//!
//! A session owns its client, its directory cache and its state machine.
//! `start` performs the one-time snapshot (fatal on failure), `listen`
//! supervises the event stream with heartbeat-driven reconnects, `stop`
//! blocks until every internal loop has exited.

use crate::RelayAuthor;
use crate::directory::{DirectoryCache, PlatformChannel, PlatformUser};
use crate::error::{PlatformError, Result};
use crate::mention;
use crate::session::heartbeat;
use crate::session::traits::{EventSource, OutboundPost, PlatformClient, RelayEvent};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Session connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Live,
    /// A liveness ack was missed; a forced reconnect is pending.
    Degraded,
    Terminated,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "disconnected"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Live => write!(f, "live"),
            SessionState::Degraded => write!(f, "degraded"),
            SessionState::Terminated => write!(f, "terminated"),
        }
    }
}

/// Session timing knobs.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub heartbeat_interval: Duration,
    pub reconnect_delay: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(2),
        }
    }
}

/// One platform's session: client, directory, and connection lifecycle.
pub struct PlatformSession<C: PlatformClient> {
    client: C,
    directory: DirectoryCache,
    identity: OnceLock<PlatformUser>,
    state: Arc<watch::Sender<SessionState>>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    settings: SessionSettings,
}

impl<C: PlatformClient> PlatformSession<C> {
    pub fn new(client: C, settings: SessionSettings) -> Self {
        let directory = DirectoryCache::new(client.platform());
        let (state, _) = watch::channel(SessionState::Disconnected);
        Self {
            client,
            directory,
            identity: OnceLock::new(),
            state: Arc::new(state),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            settings,
        }
    }

    pub fn platform(&self) -> &'static str {
        self.client.platform()
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn directory(&self) -> &DirectoryCache {
        &self.directory
    }

    /// Observe connection state transitions.
    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// The bridge's own identity on this platform, once `start` has run.
    pub fn identity(&self) -> Option<&PlatformUser> {
        self.identity.get()
    }

    pub fn is_self(&self, user_id: &str) -> bool {
        self.identity.get().is_some_and(|me| me.id == user_id)
    }

    fn set_state(&self, next: SessionState) {
        self.state.send_replace(next);
    }

    /// One-time setup: authenticate, snapshot the directory, join all
    /// joinable public channels. Any failure here is fatal, not retried.
    pub async fn start(&self) -> Result<()> {
        let platform = self.platform();
        let me = self.client.authenticate().await?;
        tracing::info!(platform, bot = %me.display_name, "authenticated");
        let _ = self.identity.set(me);

        let users = self.client.fetch_users().await?;
        tracing::info!(platform, count = users.len(), "fetched user snapshot");
        self.directory.load_users(users).await;

        let mut channels = self.client.fetch_channels().await?;
        let mut joined = 0usize;
        for channel in &mut channels {
            if channel.member || channel.private {
                continue;
            }
            self.client.join_channel(&channel.id).await?;
            channel.member = true;
            joined += 1;
        }
        tracing::info!(platform, count = channels.len(), joined, "fetched channel snapshot");
        self.directory.load_channels(channels).await;

        Ok(())
    }

    /// Supervising listen loop. Dispatches each event to `handler`; handler
    /// errors cost that event only. Reconnects with a fixed delay whenever
    /// the stream is lost, and returns only on `stop`.
    pub async fn listen<H, F>(&self, handler: H)
    where
        H: Fn(RelayEvent) -> F + Send,
        F: Future<Output = Result<()>> + Send,
    {
        let platform = self.platform();
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            self.set_state(SessionState::Connecting);
            match self.run_connection(&handler).await {
                Ok(()) => break,
                Err(error) => {
                    self.set_state(SessionState::Disconnected);
                    tracing::warn!(
                        platform,
                        %error,
                        delay_secs = self.settings.reconnect_delay.as_secs(),
                        "event stream lost, reconnecting"
                    );
                    tokio::select! {
                        biased;
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.settings.reconnect_delay) => {}
                    }
                }
            }
        }
        self.set_state(SessionState::Terminated);
        tracing::info!(platform, "session terminated");
    }

    /// Spawn `listen` onto the session's task tracker so `stop` can wait
    /// for it.
    pub fn spawn_listen<H, F>(self: &Arc<Self>, handler: H)
    where
        H: Fn(RelayEvent) -> F + Send + Sync + 'static,
        F: Future<Output = Result<()>> + Send,
    {
        let session = Arc::clone(self);
        self.tracker.spawn(async move { session.listen(handler).await });
    }

    async fn run_connection<H, F>(&self, handler: &H) -> std::result::Result<(), PlatformError>
    where
        H: Fn(RelayEvent) -> F + Send,
        F: Future<Output = Result<()>> + Send,
    {
        let platform = self.platform();
        let mut socket = self.client.connect().await?;
        self.set_state(SessionState::Live);
        tracing::info!(platform, "event stream connected");

        let connection = self.shutdown.child_token();
        let heartbeat = self.tracker.spawn(heartbeat::run(
            socket.pinger(),
            self.settings.heartbeat_interval,
            Arc::clone(&self.state),
            connection.clone(),
            platform,
        ));

        let outcome = loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break Ok(()),
                _ = connection.cancelled() => break Err(PlatformError::HeartbeatTimeout),
                event = socket.next() => match event {
                    Ok(event) => {
                        if let Err(error) = handler(event).await {
                            tracing::warn!(platform, %error, "dropping event");
                        }
                    }
                    Err(error) => break Err(error),
                },
            }
        };

        connection.cancel();
        socket.shutdown().await;
        let _ = heartbeat.await;
        outcome
    }

    /// Stop the session and block until the listen loop, heartbeat and
    /// socket reader have all exited. Safe to call on a session that never
    /// started.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        self.set_state(SessionState::Terminated);
    }

    /// Relay a message into the named channel on this platform. The author
    /// is re-resolved locally by email for display name and avatar; unknown
    /// emails fall back to the origin's rendering.
    pub async fn post(
        &self,
        channel_name: &str,
        author: &RelayAuthor,
        text: &str,
    ) -> std::result::Result<(), PlatformError> {
        let Some(channel) = self.directory.channel_by_name(channel_name).await else {
            return Err(PlatformError::ChannelNotFound(channel_name.to_string()));
        };
        let local = if author.email.is_empty() {
            None
        } else {
            self.directory.user_by_email(&author.email).await
        };
        let (author_name, avatar_url) = match local {
            Some(user) => (user.display_name.clone(), user.avatar_url.clone()),
            None => (author.display_name.clone(), None),
        };
        let post = OutboundPost {
            channel_id: channel.id.clone(),
            author_name,
            avatar_url,
            text: text.to_string(),
        };
        self.client.post_message(&post).await?;
        tracing::debug!(
            platform = self.platform(),
            channel = channel_name,
            author = %author.email,
            "relayed message"
        );
        Ok(())
    }

    /// Mirror a channel created on the counterpart platform.
    pub async fn mirror_channel(&self, name: &str) -> std::result::Result<(), PlatformError> {
        self.directory
            .create_and_join_channel(&self.client, name)
            .await
            .map(|_| ())
    }

    pub async fn resolve_user(&self, id: &str) -> std::result::Result<Arc<PlatformUser>, PlatformError> {
        self.directory.resolve_user(&self.client, id).await
    }

    pub async fn resolve_channel(&self, id: &str) -> std::result::Result<Arc<PlatformChannel>, PlatformError> {
        self.directory.resolve_channel(&self.client, id).await
    }

    /// Rewrite this platform's mention tokens to plain display names the
    /// counterpart's readers understand. Lookups are cache-only: an unknown
    /// mention stays as-is rather than triggering a fetch per token.
    pub async fn rewrite_mentions(&self, text: &str) -> String {
        let Some(pattern) = self.client.mention_pattern() else {
            return text.to_string();
        };
        let ids = mention::mentioned_ids(pattern, text);
        if ids.is_empty() {
            return text.to_string();
        }
        let mut resolved = HashMap::new();
        for id in ids {
            if let Some(user) = self.directory.user_by_id(&id).await {
                resolved.insert(id, user.display_name.clone());
            }
        }
        mention::rewrite(pattern, text, &resolved)
    }
}
