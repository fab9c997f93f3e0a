//! The SDK-level seam between the session lifecycle and a platform's
//! transport plumbing.

use crate::directory::{PlatformChannel, PlatformUser};
use crate::error::PlatformError;
use crate::session::socket::SocketPinger;
use regex::Regex;
use std::future::Future;

/// Event envelope decoded once at the platform boundary.
///
/// Administrative kinds carry the full entity when the wire event includes
/// it; otherwise just the platform ID, which the router resolves through
/// the origin directory.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    /// A message posted in a channel.
    Message {
        channel_id: String,
        user_id: String,
        text: String,
    },

    /// A platform-internal system notice (membership changes and the like).
    SystemNotice { channel_id: String },

    /// A channel was joined or created.
    ChannelJoin {
        channel_id: String,
        channel: Option<PlatformChannel>,
        private: bool,
    },

    /// A user joined the team/workspace.
    UserJoin {
        user_id: String,
        profile: Option<PlatformUser>,
    },
}

/// Outbound message handed to a platform client for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundPost {
    pub channel_id: String,
    pub author_name: String,
    pub avatar_url: Option<String>,
    pub text: String,
}

/// A platform's SDK-level client: authentication, directory fetches,
/// channel management, message delivery and the subscribed event stream.
pub trait PlatformClient: Send + Sync + 'static {
    type Socket: EventSource;

    /// Short platform tag used in logs and directory diagnostics.
    fn platform(&self) -> &'static str;

    /// Log in / verify credentials and return the bridge's own identity on
    /// this platform.
    fn authenticate(&self) -> impl Future<Output = Result<PlatformUser, PlatformError>> + Send;

    fn fetch_users(&self) -> impl Future<Output = Result<Vec<PlatformUser>, PlatformError>> + Send;

    fn fetch_user(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<PlatformUser, PlatformError>> + Send;

    fn fetch_channels(
        &self,
    ) -> impl Future<Output = Result<Vec<PlatformChannel>, PlatformError>> + Send;

    fn fetch_channel(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<PlatformChannel, PlatformError>> + Send;

    fn join_channel(&self, id: &str) -> impl Future<Output = Result<(), PlatformError>> + Send;

    fn create_channel(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<PlatformChannel, PlatformError>> + Send;

    fn post_message(
        &self,
        post: &OutboundPost,
    ) -> impl Future<Output = Result<(), PlatformError>> + Send;

    /// Establish the subscribed event stream.
    fn connect(&self) -> impl Future<Output = Result<Self::Socket, PlatformError>> + Send;

    /// Pattern matching the platform's in-text mention tokens, with the
    /// platform-native user ID as capture group 1. `None` when the
    /// platform's mention syntax does not embed IDs.
    fn mention_pattern(&self) -> Option<&Regex> {
        None
    }
}

/// A live event stream plus its liveness-probe handle.
pub trait EventSource: Send + 'static {
    /// Next decoded event. Errors when the stream is lost; must be
    /// cancel-safe (the session races it against stop and heartbeat
    /// signals).
    fn next(&mut self) -> impl Future<Output = Result<RelayEvent, PlatformError>> + Send;

    /// Handle for issuing liveness probes on this stream.
    fn pinger(&self) -> SocketPinger;

    /// Close the stream and wait for its internal reader to exit.
    fn shutdown(&mut self) -> impl Future<Output = ()> + Send;
}
