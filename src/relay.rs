//! The relay router: turns one platform's inbound event into the
//! counterpart platform's outbound post, a directory update, or nothing.

use crate::RelayAuthor;
use crate::directory::{PlatformChannel, PlatformUser};
use crate::error::Result;
use crate::session::traits::{PlatformClient, RelayEvent};
use crate::session::PlatformSession;
use std::sync::Arc;

/// Zero-width space appended to every relayed message.
///
/// Belt-and-braces loop suppression: even if the self-identity check fails
/// (say, the relay runs through a second bot account), a message carrying
/// the marker is recognized as an echo and dropped on ingestion. Invisible
/// on both platforms.
pub const ECHO_MARKER: char = '\u{200B}';

/// Tag outbound text as relayed.
pub fn mark_relayed(text: &str) -> String {
    format!("{text}{ECHO_MARKER}")
}

/// Whether inbound text is an echo of a relayed message.
pub fn is_relayed(text: &str) -> bool {
    text.ends_with(ECHO_MARKER)
}

/// Stateless event router between two platform sessions.
#[derive(Debug, Default)]
pub struct RelayRouter;

impl RelayRouter {
    pub fn new() -> Self {
        Self
    }

    /// Handle one event from `source`, posting to `dest` when it relays.
    /// Errors are per-event: the supervising listen loop logs them and
    /// carries on.
    pub async fn handle<S, D>(
        &self,
        event: RelayEvent,
        source: &PlatformSession<S>,
        dest: &PlatformSession<D>,
    ) -> Result<()>
    where
        S: PlatformClient,
        D: PlatformClient,
    {
        match event {
            RelayEvent::UserJoin { user_id, profile } => {
                self.admit_user(source, &user_id, profile).await
            }
            RelayEvent::ChannelJoin {
                channel_id,
                channel,
                private,
            } => self.mirror_join(source, dest, &channel_id, channel, private).await,
            RelayEvent::SystemNotice { channel_id } => {
                tracing::debug!(
                    platform = source.platform(),
                    channel = %channel_id,
                    "ignoring system notice"
                );
                Ok(())
            }
            RelayEvent::Message {
                channel_id,
                user_id,
                text,
            } => self.forward(source, dest, &channel_id, &user_id, &text).await,
        }
    }

    async fn admit_user<S: PlatformClient>(
        &self,
        source: &PlatformSession<S>,
        user_id: &str,
        profile: Option<PlatformUser>,
    ) -> Result<()> {
        let user: Arc<PlatformUser> = match profile {
            Some(profile) => source.directory().upsert_user(profile).await,
            None => source.resolve_user(user_id).await?,
        };
        tracing::info!(
            platform = source.platform(),
            user = %user.display_name,
            "user joined the team"
        );
        Ok(())
    }

    async fn mirror_join<S, D>(
        &self,
        source: &PlatformSession<S>,
        dest: &PlatformSession<D>,
        channel_id: &str,
        channel: Option<PlatformChannel>,
        private: bool,
    ) -> Result<()>
    where
        S: PlatformClient,
        D: PlatformClient,
    {
        let channel: Arc<PlatformChannel> = match channel {
            Some(channel) => source.directory().upsert_channel(channel).await,
            None => source.resolve_channel(channel_id).await?,
        };
        tracing::info!(
            platform = source.platform(),
            channel = %channel.name,
            "joined channel"
        );
        if private || channel.private {
            return Ok(());
        }
        dest.mirror_channel(&channel.name).await?;
        Ok(())
    }

    async fn forward<S, D>(
        &self,
        source: &PlatformSession<S>,
        dest: &PlatformSession<D>,
        channel_id: &str,
        user_id: &str,
        text: &str,
    ) -> Result<()>
    where
        S: PlatformClient,
        D: PlatformClient,
    {
        if source.is_self(user_id) {
            tracing::debug!(platform = source.platform(), "suppressing own message");
            return Ok(());
        }
        if is_relayed(text) {
            tracing::debug!(platform = source.platform(), "suppressing relayed echo");
            return Ok(());
        }

        let author = source.resolve_user(user_id).await?;
        let channel = source.resolve_channel(channel_id).await?;
        let text = source.rewrite_mentions(text).await;

        let author = RelayAuthor {
            email: author.email.clone(),
            display_name: author.display_name.clone(),
        };
        dest.post(&channel.name, &author, &mark_relayed(&text)).await?;
        Ok(())
    }
}
