//! Mattermost plumbing: REST API v4 client plus the websocket codec.
//!
//! Login captures the session token from the response headers; the team is
//! resolved by name up front (an unknown team is fatal at startup). The
//! websocket authenticates with a challenge frame, classifies `posted`
//! events (whose post payload is itself JSON-encoded), and answers liveness
//! through `get_statuses_by_ids`, acked by a `seq_reply` response.

use crate::config::MattermostConfig;
use crate::directory::{PlatformChannel, PlatformUser};
use crate::error::{ConfigError, PlatformError};
use crate::session::socket::{Decoded, EventSocket, SocketCodec};
use crate::session::traits::{OutboundPost, PlatformClient, RelayEvent};
use futures::SinkExt;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::Message as WsMessage;

const PER_PAGE: usize = 200;

/// Post types starting with this prefix are platform-internal notices.
const SYSTEM_PREFIX: &str = "system_";

/// Post type marking a channel-membership addition.
const ADD_TO_CHANNEL: &str = "system_add_to_channel";

#[derive(Debug)]
pub struct MattermostClient {
    http: reqwest::Client,
    base_url: String,
    ws_url: String,
    team: String,
    email: String,
    password: String,
    auth: RwLock<AuthState>,
}

#[derive(Debug, Default)]
struct AuthState {
    token: String,
    team_id: String,
    user_id: String,
}

#[derive(Debug, Deserialize)]
struct MmError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct MmUser {
    id: String,
    username: String,
    #[serde(default)]
    email: String,
}

#[derive(Debug, Deserialize)]
struct MmTeam {
    id: String,
}

#[derive(Debug, Deserialize)]
struct MmChannel {
    id: String,
    name: String,
    #[serde(rename = "type", default)]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct MmPost {
    #[serde(default)]
    user_id: String,
    channel_id: String,
    #[serde(default)]
    message: String,
    #[serde(rename = "type", default)]
    kind: String,
}

impl MattermostClient {
    pub fn new(config: &MattermostConfig) -> Result<Self, ConfigError> {
        if config.server.is_empty() {
            return Err(ConfigError::MissingKey("mattermost.server".into()));
        }
        if config.server.contains("://") {
            return Err(ConfigError::Invalid(
                "mattermost.server is a host name, not a URL".into(),
            ));
        }
        if config.team.is_empty() {
            return Err(ConfigError::MissingKey("mattermost.team".into()));
        }
        Ok(Self {
            http: reqwest::Client::new(),
            base_url: format!("https://{}", config.server),
            ws_url: format!("wss://{}/api/v4/websocket", config.server),
            team: config.team.clone(),
            email: config.email.clone(),
            password: config.password.clone(),
            auth: RwLock::new(AuthState::default()),
        })
    }

    fn api(&self, path: &str) -> String {
        format!("{}/api/v4/{path}", self.base_url)
    }

    fn avatar_url(&self, user_id: &str) -> String {
        format!("{}/api/v4/users/{user_id}/image", self.base_url)
    }

    async fn token(&self) -> Result<String, PlatformError> {
        let auth = self.auth.read().await;
        if auth.token.is_empty() {
            return Err(PlatformError::Auth("not logged in".into()));
        }
        Ok(auth.token.clone())
    }

    async fn read_json<T: DeserializeOwned>(
        call: &str,
        response: reqwest::Response,
    ) -> Result<T, PlatformError> {
        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<MmError>()
                .await
                .map(|error| error.message)
                .unwrap_or_else(|_| status.to_string());
            return Err(PlatformError::Api {
                call: call.to_string(),
                message,
            });
        }
        Ok(response.json::<T>().await?)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, PlatformError> {
        let token = self.token().await?;
        let response = self.http.get(self.api(path)).bearer_auth(token).send().await?;
        Self::read_json(path, response).await
    }

    /// GET that reports 404 as the given not-found error instead of a
    /// generic API failure.
    async fn get_or_not_found<T: DeserializeOwned>(
        &self,
        path: &str,
        not_found: PlatformError,
    ) -> Result<T, PlatformError> {
        let token = self.token().await?;
        let response = self.http.get(self.api(path)).bearer_auth(token).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(not_found);
        }
        Self::read_json(path, response).await
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &Value,
    ) -> Result<T, PlatformError> {
        let token = self.token().await?;
        let response = self
            .http
            .post(self.api(path))
            .bearer_auth(token)
            .json(body)
            .send()
            .await?;
        Self::read_json(path, response).await
    }

    fn user_from(&self, user: MmUser) -> PlatformUser {
        let avatar_url = Some(self.avatar_url(&user.id));
        PlatformUser {
            id: user.id,
            display_name: user.username,
            email: user.email,
            avatar_url,
        }
    }

    fn channel_from(channel: MmChannel) -> PlatformChannel {
        PlatformChannel {
            id: channel.id,
            name: channel.name,
            private: channel.kind != "O",
            member: false,
        }
    }
}

impl PlatformClient for MattermostClient {
    type Socket = EventSocket;

    fn platform(&self) -> &'static str {
        "mattermost"
    }

    async fn authenticate(&self) -> Result<PlatformUser, PlatformError> {
        let body = serde_json::json!({
            "login_id": self.email,
            "password": self.password,
        });
        let response = self
            .http
            .post(self.api("users/login"))
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let message = response
                .json::<MmError>()
                .await
                .map(|error| error.message)
                .unwrap_or_else(|_| status.to_string());
            return Err(PlatformError::Auth(message));
        }
        let token = response
            .headers()
            .get("Token")
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if token.is_empty() {
            return Err(PlatformError::Auth("login response carried no session token".into()));
        }
        let me: MmUser = response.json().await?;
        {
            let mut auth = self.auth.write().await;
            auth.token = token;
            auth.user_id = me.id.clone();
        }

        let team: MmTeam = self
            .get_or_not_found(
                &format!("teams/name/{}", self.team),
                PlatformError::Auth(format!("unknown team: {}", self.team)),
            )
            .await?;
        self.auth.write().await.team_id = team.id;

        Ok(self.user_from(me))
    }

    async fn fetch_users(&self) -> Result<Vec<PlatformUser>, PlatformError> {
        let team_id = self.auth.read().await.team_id.clone();
        let mut users = Vec::new();
        let mut page = 0usize;
        loop {
            let batch: Vec<MmUser> = self
                .get(&format!("users?in_team={team_id}&page={page}&per_page={PER_PAGE}"))
                .await?;
            if batch.is_empty() {
                break;
            }
            users.extend(batch.into_iter().map(|user| self.user_from(user)));
            page += 1;
        }
        Ok(users)
    }

    async fn fetch_user(&self, id: &str) -> Result<PlatformUser, PlatformError> {
        let user: MmUser = self
            .get_or_not_found(
                &format!("users/{id}"),
                PlatformError::UserNotFound(id.to_string()),
            )
            .await?;
        Ok(self.user_from(user))
    }

    async fn fetch_channels(&self) -> Result<Vec<PlatformChannel>, PlatformError> {
        let team_id = self.auth.read().await.team_id.clone();
        let mut channels = Vec::new();
        let mut page = 0usize;
        loop {
            let batch: Vec<MmChannel> = self
                .get(&format!("teams/{team_id}/channels?page={page}&per_page={PER_PAGE}"))
                .await?;
            if batch.is_empty() {
                break;
            }
            channels.extend(batch.into_iter().map(Self::channel_from));
            page += 1;
        }
        Ok(channels)
    }

    async fn fetch_channel(&self, id: &str) -> Result<PlatformChannel, PlatformError> {
        let channel: MmChannel = self
            .get_or_not_found(
                &format!("channels/{id}"),
                PlatformError::ChannelNotFound(id.to_string()),
            )
            .await?;
        Ok(Self::channel_from(channel))
    }

    async fn join_channel(&self, id: &str) -> Result<(), PlatformError> {
        let user_id = self.auth.read().await.user_id.clone();
        let body = serde_json::json!({ "user_id": user_id });
        let _: Value = self.post_json(&format!("channels/{id}/members"), &body).await?;
        Ok(())
    }

    async fn create_channel(&self, name: &str) -> Result<PlatformChannel, PlatformError> {
        let team_id = self.auth.read().await.team_id.clone();
        let body = serde_json::json!({
            "team_id": team_id,
            "name": name,
            "display_name": name,
            "type": "O",
        });
        let channel: MmChannel = self.post_json("channels", &body).await?;
        Ok(Self::channel_from(channel))
    }

    async fn post_message(&self, post: &OutboundPost) -> Result<(), PlatformError> {
        // Mattermost has no per-post author override; attribute inline, the
        // way relayed posts have always rendered here.
        let message = if post.author_name.is_empty() {
            post.text.clone()
        } else {
            format!("<@{}>: {}", post.author_name, post.text)
        };
        let body = serde_json::json!({
            "channel_id": post.channel_id,
            "message": message,
        });
        let _: Value = self.post_json("posts", &body).await?;
        Ok(())
    }

    async fn connect(&self) -> Result<Self::Socket, PlatformError> {
        let token = self.token().await?;
        let user_id = self.auth.read().await.user_id.clone();
        let (mut ws, _) = tokio_tungstenite::connect_async(self.ws_url.as_str()).await?;
        let challenge = serde_json::json!({
            "seq": 1,
            "action": "authentication_challenge",
            "data": { "token": token },
        });
        ws.send(WsMessage::text(challenge.to_string())).await?;
        Ok(EventSocket::spawn(
            ws,
            MattermostCodec::new(user_id),
            "mattermost",
        ))
    }
}

/// Websocket wire codec.
#[derive(Debug)]
pub(crate) struct MattermostCodec {
    user_id: String,
    seq: u64,
}

impl MattermostCodec {
    pub(crate) fn new(user_id: String) -> Self {
        // seq 1 is spent on the authentication challenge.
        Self { user_id, seq: 1 }
    }
}

impl SocketCodec for MattermostCodec {
    fn probe(&mut self) -> String {
        self.seq += 1;
        serde_json::json!({
            "action": "get_statuses_by_ids",
            "seq": self.seq,
            "data": { "user_ids": [self.user_id] },
        })
        .to_string()
    }

    fn decode(&mut self, text: &str) -> Decoded {
        let Ok(value) = serde_json::from_str::<Value>(text) else {
            return Decoded::Ignore;
        };
        // Action replies (auth challenge, status probes) carry seq_reply.
        if value.get("seq_reply").is_some() {
            return Decoded::Ack;
        }
        match value.get("event").and_then(Value::as_str) {
            Some("posted") => {
                let Some(data) = value.get("data") else {
                    return Decoded::Ignore;
                };
                // The post rides inside the event as a JSON string.
                let Some(raw_post) = data.get("post").and_then(Value::as_str) else {
                    return Decoded::Ignore;
                };
                let Ok(post) = serde_json::from_str::<MmPost>(raw_post) else {
                    return Decoded::Ignore;
                };
                let channel_type = data
                    .get("channel_type")
                    .and_then(Value::as_str)
                    .unwrap_or("O");
                if post.kind == ADD_TO_CHANNEL {
                    Decoded::Event(RelayEvent::ChannelJoin {
                        channel_id: post.channel_id,
                        channel: None,
                        private: channel_type != "O",
                    })
                } else if post.kind.starts_with(SYSTEM_PREFIX) {
                    Decoded::Event(RelayEvent::SystemNotice {
                        channel_id: post.channel_id,
                    })
                } else {
                    Decoded::Event(RelayEvent::Message {
                        channel_id: post.channel_id,
                        user_id: post.user_id,
                        text: post.message,
                    })
                }
            }
            Some("new_user" | "added_to_team") => {
                let Some(user_id) = value
                    .get("data")
                    .and_then(|data| data.get("user_id"))
                    .and_then(Value::as_str)
                else {
                    return Decoded::Ignore;
                };
                Decoded::Event(RelayEvent::UserJoin {
                    user_id: user_id.to_string(),
                    profile: None,
                })
            }
            _ => Decoded::Ignore,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> MattermostCodec {
        MattermostCodec::new("BOT".to_string())
    }

    fn posted_event(post: &Value, channel_type: &str) -> String {
        serde_json::json!({
            "event": "posted",
            "data": {
                "channel_name": "general",
                "channel_type": channel_type,
                "post": post.to_string(),
            },
            "broadcast": { "channel_id": post["channel_id"].clone() },
        })
        .to_string()
    }

    #[test]
    fn decodes_a_posted_message_from_the_nested_payload() {
        let post = serde_json::json!({
            "id": "p1",
            "user_id": "U1",
            "channel_id": "C1",
            "message": "hello",
            "type": "",
        });
        let Decoded::Event(event) = codec().decode(&posted_event(&post, "O")) else {
            panic!("expected event");
        };
        assert_eq!(
            event,
            RelayEvent::Message {
                channel_id: "C1".to_string(),
                user_id: "U1".to_string(),
                text: "hello".to_string(),
            }
        );
    }

    #[test]
    fn add_to_channel_posts_classify_as_channel_joins() {
        let post = serde_json::json!({
            "user_id": "U1",
            "channel_id": "C2",
            "message": "user added to the channel",
            "type": "system_add_to_channel",
        });
        let Decoded::Event(RelayEvent::ChannelJoin {
            channel_id,
            channel: None,
            private,
        }) = codec().decode(&posted_event(&post, "O"))
        else {
            panic!("expected channel join");
        };
        assert_eq!(channel_id, "C2");
        assert!(!private);
    }

    #[test]
    fn other_system_posts_classify_as_notices() {
        let post = serde_json::json!({
            "user_id": "U1",
            "channel_id": "C1",
            "message": "user joined the channel",
            "type": "system_join_channel",
        });
        let Decoded::Event(event) = codec().decode(&posted_event(&post, "O")) else {
            panic!("expected event");
        };
        assert_eq!(
            event,
            RelayEvent::SystemNotice {
                channel_id: "C1".to_string()
            }
        );
    }

    #[test]
    fn new_user_events_carry_the_id_only() {
        let raw = serde_json::json!({
            "event": "new_user",
            "data": { "user_id": "U9" },
        })
        .to_string();
        let Decoded::Event(event) = codec().decode(&raw) else {
            panic!("expected event");
        };
        assert_eq!(
            event,
            RelayEvent::UserJoin {
                user_id: "U9".to_string(),
                profile: None,
            }
        );
    }

    #[test]
    fn seq_replies_ack_probes() {
        let raw = r#"{"status":"OK","seq_reply":2}"#;
        assert!(matches!(codec().decode(raw), Decoded::Ack));
    }

    #[test]
    fn probe_sequence_starts_after_the_auth_challenge() {
        let mut codec = codec();
        let first: Value = serde_json::from_str(&codec.probe()).expect("json");
        assert_eq!(first["action"], "get_statuses_by_ids");
        assert_eq!(first["seq"], 2);
        assert_eq!(first["data"]["user_ids"][0], "BOT");
    }

    #[test]
    fn malformed_frames_are_ignored() {
        assert!(matches!(codec().decode("not json"), Decoded::Ignore));
        assert!(matches!(
            codec().decode(r#"{"event":"posted","data":{"post":"not json"}}"#),
            Decoded::Ignore
        ));
        assert!(matches!(codec().decode(r#"{"event":"hello"}"#), Decoded::Ignore));
    }

    #[test]
    fn server_host_with_scheme_is_rejected() {
        let config = MattermostConfig {
            server: "https://chat.example.com".to_string(),
            team: "core".to_string(),
            email: "bridge@example.com".to_string(),
            password: "hunter2".to_string(),
        };
        let error = MattermostClient::new(&config).expect_err("scheme rejected");
        assert!(matches!(error, ConfigError::Invalid(_)));
    }
}
