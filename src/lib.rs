//! Chatbridge: a bidirectional relay between Slack and Mattermost channels.
//!
//! Messages posted in one platform's channels are reposted into the
//! equivalently-named channel on the other platform, with author attribution
//! preserved and in-text mentions rewritten for the destination audience.
//! Users are correlated across platforms by email, channels by name.

pub mod bridge;
pub mod config;
pub mod directory;
pub mod error;
pub mod mention;
pub mod platform;
pub mod relay;
pub mod session;

#[cfg(test)]
mod testutil;

pub use bridge::Bridge;
pub use config::BridgeConfig;
pub use error::{Error, Result};

/// Author attribution carried across the bridge with a relayed message.
///
/// The email is the cross-platform key; the display name is the origin
/// platform's rendering, used as a fallback when the destination platform
/// has no user with that email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayAuthor {
    pub email: String,
    pub display_name: String,
}
