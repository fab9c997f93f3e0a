//! Slack plumbing: Web API client plus the RTM event-socket codec.
//!
//! The Web API side covers authentication, directory snapshots, channel
//! management and message delivery (with `username`/`icon_url` overrides so
//! relayed posts render as their origin author). The RTM side decodes
//! `message`, `channel_joined`, `group_joined` and `team_join` events and
//! answers liveness through RTM's JSON `ping`/`pong`.

use crate::config::SlackConfig;
use crate::directory::{PlatformChannel, PlatformUser};
use crate::error::{ConfigError, PlatformError};
use crate::session::socket::{Decoded, EventSocket, SocketCodec};
use crate::session::traits::{OutboundPost, PlatformClient, RelayEvent};
use regex::Regex;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::LazyLock;

/// RTM mention tokens: `<@U123ABC>`, ID in group 1.
static MENTION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<@([A-Z0-9]+)>").expect("static pattern"));

#[derive(Debug)]
pub struct SlackClient {
    http: reqwest::Client,
    token: String,
    api_base: String,
}

impl SlackClient {
    pub fn new(config: &SlackConfig) -> Result<Self, ConfigError> {
        if config.token.is_empty() {
            return Err(ConfigError::MissingKey("slack.token".into()));
        }
        Ok(Self {
            http: reqwest::Client::new(),
            token: config.token.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
        })
    }

    /// Call a Web API method. Slack wraps every response in an `ok`/`error`
    /// envelope; a falsy `ok` becomes an `Api` error.
    async fn call<T: DeserializeOwned>(
        &self,
        method: &'static str,
        args: &[(&str, &str)],
    ) -> Result<T, PlatformError> {
        let url = format!("{}/{}", self.api_base, method);
        let value: Value = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .form(args)
            .send()
            .await?
            .json()
            .await?;
        if !value.get("ok").and_then(Value::as_bool).unwrap_or(false) {
            let message = value
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            return Err(PlatformError::Api {
                call: method.to_string(),
                message,
            });
        }
        serde_json::from_value(value).map_err(|error| PlatformError::Api {
            call: method.to_string(),
            message: error.to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct AuthTest {
    user_id: String,
    user: String,
    team: String,
}

#[derive(Debug, Default, Deserialize)]
struct PageCursor {
    #[serde(default)]
    next_cursor: String,
}

#[derive(Debug, Deserialize)]
struct UserList {
    members: Vec<SlackUser>,
    #[serde(default)]
    response_metadata: Option<PageCursor>,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    user: SlackUser,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SlackUser {
    id: String,
    name: String,
    #[serde(default)]
    deleted: bool,
    #[serde(default)]
    profile: SlackProfile,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SlackProfile {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    image_48: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChannelList {
    channels: Vec<SlackChannel>,
    #[serde(default)]
    response_metadata: Option<PageCursor>,
}

#[derive(Debug, Deserialize)]
struct ChannelInfo {
    channel: SlackChannel,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SlackChannel {
    id: String,
    name: String,
    #[serde(default)]
    is_private: bool,
    #[serde(default)]
    is_member: bool,
}

#[derive(Debug, Deserialize)]
struct RtmConnect {
    url: String,
}

impl From<SlackUser> for PlatformUser {
    fn from(user: SlackUser) -> Self {
        let display_name = user
            .profile
            .display_name
            .filter(|name| !name.is_empty())
            .unwrap_or(user.name);
        Self {
            id: user.id,
            display_name,
            email: user.profile.email.unwrap_or_default(),
            avatar_url: user.profile.image_48,
        }
    }
}

impl From<SlackChannel> for PlatformChannel {
    fn from(channel: SlackChannel) -> Self {
        Self {
            id: channel.id,
            name: channel.name,
            private: channel.is_private,
            member: channel.is_member,
        }
    }
}

impl PlatformClient for SlackClient {
    type Socket = EventSocket;

    fn platform(&self) -> &'static str {
        "slack"
    }

    async fn authenticate(&self) -> Result<PlatformUser, PlatformError> {
        let auth: AuthTest = match self.call("auth.test", &[]).await {
            Ok(auth) => auth,
            Err(PlatformError::Api { message, .. }) => return Err(PlatformError::Auth(message)),
            Err(error) => return Err(error),
        };
        tracing::debug!(team = %auth.team, "slack token accepted");
        Ok(PlatformUser {
            id: auth.user_id,
            display_name: auth.user,
            email: String::new(),
            avatar_url: None,
        })
    }

    async fn fetch_users(&self) -> Result<Vec<PlatformUser>, PlatformError> {
        let mut users = Vec::new();
        let mut cursor = String::new();
        loop {
            let page: UserList = if cursor.is_empty() {
                self.call("users.list", &[("limit", "200")]).await?
            } else {
                self.call("users.list", &[("limit", "200"), ("cursor", cursor.as_str())])
                    .await?
            };
            users.extend(
                page.members
                    .into_iter()
                    .filter(|user| !user.deleted)
                    .map(PlatformUser::from),
            );
            cursor = page
                .response_metadata
                .map(|meta| meta.next_cursor)
                .unwrap_or_default();
            if cursor.is_empty() {
                break;
            }
        }
        Ok(users)
    }

    async fn fetch_user(&self, id: &str) -> Result<PlatformUser, PlatformError> {
        let info: UserInfo = self
            .call("users.info", &[("user", id)])
            .await
            .map_err(|error| match error {
                PlatformError::Api { message, .. } if message == "user_not_found" => {
                    PlatformError::UserNotFound(id.to_string())
                }
                other => other,
            })?;
        Ok(info.user.into())
    }

    async fn fetch_channels(&self) -> Result<Vec<PlatformChannel>, PlatformError> {
        let mut channels = Vec::new();
        let mut cursor = String::new();
        loop {
            let page: ChannelList = if cursor.is_empty() {
                self.call(
                    "conversations.list",
                    &[("types", "public_channel"), ("exclude_archived", "true"), ("limit", "200")],
                )
                .await?
            } else {
                self.call(
                    "conversations.list",
                    &[
                        ("types", "public_channel"),
                        ("exclude_archived", "true"),
                        ("limit", "200"),
                        ("cursor", cursor.as_str()),
                    ],
                )
                .await?
            };
            channels.extend(page.channels.into_iter().map(PlatformChannel::from));
            cursor = page
                .response_metadata
                .map(|meta| meta.next_cursor)
                .unwrap_or_default();
            if cursor.is_empty() {
                break;
            }
        }
        Ok(channels)
    }

    async fn fetch_channel(&self, id: &str) -> Result<PlatformChannel, PlatformError> {
        let info: ChannelInfo = self
            .call("conversations.info", &[("channel", id)])
            .await
            .map_err(|error| match error {
                PlatformError::Api { message, .. } if message == "channel_not_found" => {
                    PlatformError::ChannelNotFound(id.to_string())
                }
                other => other,
            })?;
        Ok(info.channel.into())
    }

    async fn join_channel(&self, id: &str) -> Result<(), PlatformError> {
        let _: Value = self.call("conversations.join", &[("channel", id)]).await?;
        Ok(())
    }

    async fn create_channel(&self, name: &str) -> Result<PlatformChannel, PlatformError> {
        let info: ChannelInfo = self.call("conversations.create", &[("name", name)]).await?;
        Ok(info.channel.into())
    }

    async fn post_message(&self, post: &OutboundPost) -> Result<(), PlatformError> {
        let mut args = vec![
            ("channel", post.channel_id.as_str()),
            ("text", post.text.as_str()),
            ("username", post.author_name.as_str()),
            ("link_names", "1"),
        ];
        if let Some(icon_url) = post.avatar_url.as_deref() {
            args.push(("icon_url", icon_url));
        }
        let _: Value = self.call("chat.postMessage", &args).await?;
        Ok(())
    }

    async fn connect(&self) -> Result<Self::Socket, PlatformError> {
        let rtm: RtmConnect = self.call("rtm.connect", &[]).await?;
        let (ws, _) = tokio_tungstenite::connect_async(rtm.url.as_str()).await?;
        Ok(EventSocket::spawn(ws, SlackCodec::default(), "slack"))
    }

    fn mention_pattern(&self) -> Option<&Regex> {
        Some(&MENTION_PATTERN)
    }
}

/// RTM wire codec.
#[derive(Debug, Default)]
pub(crate) struct SlackCodec {
    seq: u64,
}

impl SocketCodec for SlackCodec {
    fn probe(&mut self) -> String {
        self.seq += 1;
        serde_json::json!({"id": self.seq, "type": "ping"}).to_string()
    }

    fn decode(&mut self, text: &str) -> Decoded {
        let Ok(value) = serde_json::from_str::<Value>(text) else {
            return Decoded::Ignore;
        };
        match value.get("type").and_then(Value::as_str) {
            Some("pong") => Decoded::Ack,
            Some("message") => {
                let channel_id = value
                    .get("channel")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                // Subtyped messages (joins, edits, bot posts) are platform
                // noise, not user speech.
                if value.get("subtype").is_some() {
                    return Decoded::Event(RelayEvent::SystemNotice { channel_id });
                }
                let (Some(user_id), Some(text)) = (
                    value.get("user").and_then(Value::as_str),
                    value.get("text").and_then(Value::as_str),
                ) else {
                    return Decoded::Ignore;
                };
                Decoded::Event(RelayEvent::Message {
                    channel_id,
                    user_id: user_id.to_string(),
                    text: text.to_string(),
                })
            }
            Some(kind @ ("channel_joined" | "group_joined")) => {
                let Some(payload) = value.get("channel").cloned() else {
                    return Decoded::Ignore;
                };
                let Ok(channel) = serde_json::from_value::<SlackChannel>(payload) else {
                    return Decoded::Ignore;
                };
                let private = kind == "group_joined";
                let mut channel = PlatformChannel::from(channel);
                channel.private = private;
                channel.member = true;
                Decoded::Event(RelayEvent::ChannelJoin {
                    channel_id: channel.id.clone(),
                    channel: Some(channel),
                    private,
                })
            }
            Some("team_join") => {
                let Some(payload) = value.get("user").cloned() else {
                    return Decoded::Ignore;
                };
                let Ok(user) = serde_json::from_value::<SlackUser>(payload) else {
                    return Decoded::Ignore;
                };
                let user = PlatformUser::from(user);
                Decoded::Event(RelayEvent::UserJoin {
                    user_id: user.id.clone(),
                    profile: Some(user),
                })
            }
            _ => Decoded::Ignore,
        }
    }
}
