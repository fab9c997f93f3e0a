//! Test doubles for the platform SDK seam.

use crate::directory::{PlatformChannel, PlatformUser};
use crate::error::PlatformError;
use crate::session::socket::{SocketCommand, SocketPinger};
use crate::session::traits::{EventSource, OutboundPost, PlatformClient, RelayEvent};
use regex::Regex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

pub(crate) fn user(id: &str, name: &str, email: &str) -> PlatformUser {
    PlatformUser {
        id: id.to_string(),
        display_name: name.to_string(),
        email: email.to_string(),
        avatar_url: None,
    }
}

pub(crate) fn channel(id: &str, name: &str) -> PlatformChannel {
    PlatformChannel {
        id: id.to_string(),
        name: name.to_string(),
        private: false,
        member: false,
    }
}

/// Observable side effects of a [`MockPlatform`].
#[derive(Default)]
pub(crate) struct MockState {
    pub users: Vec<PlatformUser>,
    pub channels: Vec<PlatformChannel>,
    pub fetch_user_calls: AtomicUsize,
    pub fetch_channel_calls: AtomicUsize,
    pub auth_calls: AtomicUsize,
    pub connect_calls: AtomicUsize,
    pub created: Mutex<Vec<String>>,
    pub joined: Mutex<Vec<String>>,
    pub posts: Mutex<Vec<OutboundPost>>,
    /// One feed sender per `connect` call; tests push events through these.
    pub event_feeds: Mutex<Vec<mpsc::Sender<RelayEvent>>>,
}

/// In-memory platform client.
pub(crate) struct MockPlatform {
    pub name: &'static str,
    pub identity: PlatformUser,
    pub state: Arc<MockState>,
    mention: Option<Regex>,
    fail_auth: bool,
    dead_stream: bool,
    ack_probes: bool,
}

impl MockPlatform {
    pub fn new(
        name: &'static str,
        identity: PlatformUser,
        users: Vec<PlatformUser>,
        channels: Vec<PlatformChannel>,
    ) -> Self {
        Self {
            name,
            identity,
            state: Arc::new(MockState {
                users,
                channels,
                ..MockState::default()
            }),
            mention: None,
            fail_auth: false,
            dead_stream: false,
            ack_probes: true,
        }
    }

    pub fn with_mentions(mut self, pattern: Regex) -> Self {
        self.mention = Some(pattern);
        self
    }

    pub fn with_failing_auth(mut self) -> Self {
        self.fail_auth = true;
        self
    }

    /// Every connection's event stream ends immediately.
    pub fn with_dead_stream(mut self) -> Self {
        self.dead_stream = true;
        self
    }

    /// The socket swallows liveness probes instead of acking them.
    pub fn without_acks(mut self) -> Self {
        self.ack_probes = false;
        self
    }
}

impl PlatformClient for MockPlatform {
    type Socket = MockSocket;

    fn platform(&self) -> &'static str {
        self.name
    }

    async fn authenticate(&self) -> Result<PlatformUser, PlatformError> {
        self.state.auth_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_auth {
            return Err(PlatformError::Auth("bad credentials".to_string()));
        }
        Ok(self.identity.clone())
    }

    async fn fetch_users(&self) -> Result<Vec<PlatformUser>, PlatformError> {
        Ok(self.state.users.clone())
    }

    async fn fetch_user(&self, id: &str) -> Result<PlatformUser, PlatformError> {
        self.state.fetch_user_calls.fetch_add(1, Ordering::SeqCst);
        self.state
            .users
            .iter()
            .find(|user| user.id == id)
            .cloned()
            .ok_or_else(|| PlatformError::UserNotFound(id.to_string()))
    }

    async fn fetch_channels(&self) -> Result<Vec<PlatformChannel>, PlatformError> {
        Ok(self.state.channels.clone())
    }

    async fn fetch_channel(&self, id: &str) -> Result<PlatformChannel, PlatformError> {
        self.state.fetch_channel_calls.fetch_add(1, Ordering::SeqCst);
        self.state
            .channels
            .iter()
            .find(|channel| channel.id == id)
            .cloned()
            .ok_or_else(|| PlatformError::ChannelNotFound(id.to_string()))
    }

    async fn join_channel(&self, id: &str) -> Result<(), PlatformError> {
        self.state.joined.lock().expect("lock").push(id.to_string());
        Ok(())
    }

    async fn create_channel(&self, name: &str) -> Result<PlatformChannel, PlatformError> {
        self.state.created.lock().expect("lock").push(name.to_string());
        Ok(PlatformChannel {
            id: format!("{name}-id"),
            name: name.to_string(),
            private: false,
            member: false,
        })
    }

    async fn post_message(&self, post: &OutboundPost) -> Result<(), PlatformError> {
        self.state.posts.lock().expect("lock").push(post.clone());
        Ok(())
    }

    async fn connect(&self) -> Result<Self::Socket, PlatformError> {
        self.state.connect_calls.fetch_add(1, Ordering::SeqCst);
        let (feed, events) = mpsc::channel(16);
        if self.dead_stream {
            drop(feed);
        } else {
            self.state.event_feeds.lock().expect("lock").push(feed);
        }
        Ok(MockSocket::new(events, self.ack_probes))
    }

    fn mention_pattern(&self) -> Option<&Regex> {
        self.mention.as_ref()
    }
}

/// Event source backed by a test-fed channel.
pub(crate) struct MockSocket {
    events: mpsc::Receiver<RelayEvent>,
    commands: mpsc::Sender<SocketCommand>,
}

impl MockSocket {
    fn new(events: mpsc::Receiver<RelayEvent>, ack_probes: bool) -> Self {
        let (commands, mut command_rx) = mpsc::channel(8);
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Some(command) = command_rx.recv().await {
                match command {
                    SocketCommand::Probe { ack } => {
                        if ack_probes {
                            let _ = ack.send(());
                        } else {
                            held.push(ack);
                        }
                    }
                    SocketCommand::Close => break,
                }
            }
        });
        Self { events, commands }
    }
}

impl EventSource for MockSocket {
    async fn next(&mut self) -> Result<RelayEvent, PlatformError> {
        self.events.recv().await.ok_or(PlatformError::StreamClosed)
    }

    fn pinger(&self) -> SocketPinger {
        SocketPinger::new(self.commands.clone())
    }

    async fn shutdown(&mut self) {
        let _ = self.commands.send(SocketCommand::Close).await;
    }
}
