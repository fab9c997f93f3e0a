//! Per-platform directory of users and channels.
//!
//! Every entity is indexed twice: by its platform-native ID and by its
//! cross-platform key (email for users, name for channels). Both views are
//! updated under one lock so no reader can observe them out of sync. Entries
//! are never removed for the lifetime of the process.

use crate::error::PlatformError;
use crate::session::traits::PlatformClient;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A platform user. Email is the cross-platform key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformUser {
    pub id: String,
    pub display_name: String,
    pub email: String,
    pub avatar_url: Option<String>,
}

/// A platform channel. Name is the cross-platform key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformChannel {
    pub id: String,
    pub name: String,
    pub private: bool,
    /// Whether the bridge has joined the channel.
    pub member: bool,
}

#[derive(Debug)]
struct DualIndex<T> {
    by_id: HashMap<String, Arc<T>>,
    by_key: HashMap<String, Arc<T>>,
}

impl<T> Default for DualIndex<T> {
    fn default() -> Self {
        Self {
            by_id: HashMap::new(),
            by_key: HashMap::new(),
        }
    }
}

/// Directory cache for one platform.
///
/// Mutated only by that platform's own session and event handler; the relay
/// router reads it. The two platforms' caches are fully independent.
#[derive(Debug)]
pub struct DirectoryCache {
    platform: &'static str,
    users: RwLock<DualIndex<PlatformUser>>,
    channels: RwLock<DualIndex<PlatformChannel>>,
}

impl DirectoryCache {
    pub fn new(platform: &'static str) -> Self {
        Self {
            platform,
            users: RwLock::new(DualIndex::default()),
            channels: RwLock::new(DualIndex::default()),
        }
    }

    /// Insert or overwrite a user in both views. Users without an email are
    /// reachable by ID only.
    pub async fn upsert_user(&self, user: PlatformUser) -> Arc<PlatformUser> {
        let user = Arc::new(user);
        let mut index = self.users.write().await;
        if !user.email.is_empty() {
            index.by_key.insert(user.email.clone(), Arc::clone(&user));
        }
        index.by_id.insert(user.id.clone(), Arc::clone(&user));
        user
    }

    /// Insert or overwrite a channel in both views.
    pub async fn upsert_channel(&self, channel: PlatformChannel) -> Arc<PlatformChannel> {
        let channel = Arc::new(channel);
        let mut index = self.channels.write().await;
        index.by_key.insert(channel.name.clone(), Arc::clone(&channel));
        index.by_id.insert(channel.id.clone(), Arc::clone(&channel));
        channel
    }

    /// Bulk-populate users from the startup snapshot.
    pub async fn load_users(&self, users: Vec<PlatformUser>) {
        let mut index = self.users.write().await;
        for user in users {
            let user = Arc::new(user);
            if !user.email.is_empty() {
                index.by_key.insert(user.email.clone(), Arc::clone(&user));
            }
            index.by_id.insert(user.id.clone(), user);
        }
    }

    /// Bulk-populate channels from the startup snapshot.
    pub async fn load_channels(&self, channels: Vec<PlatformChannel>) {
        let mut index = self.channels.write().await;
        for channel in channels {
            let channel = Arc::new(channel);
            index.by_key.insert(channel.name.clone(), Arc::clone(&channel));
            index.by_id.insert(channel.id.clone(), channel);
        }
    }

    pub async fn user_by_id(&self, id: &str) -> Option<Arc<PlatformUser>> {
        self.users.read().await.by_id.get(id).cloned()
    }

    pub async fn user_by_email(&self, email: &str) -> Option<Arc<PlatformUser>> {
        self.users.read().await.by_key.get(email).cloned()
    }

    pub async fn channel_by_id(&self, id: &str) -> Option<Arc<PlatformChannel>> {
        self.channels.read().await.by_id.get(id).cloned()
    }

    pub async fn channel_by_name(&self, name: &str) -> Option<Arc<PlatformChannel>> {
        self.channels.read().await.by_key.get(name).cloned()
    }

    /// Resolve a user by platform ID, fetching through the client on a miss.
    pub async fn resolve_user<C: PlatformClient>(
        &self,
        client: &C,
        id: &str,
    ) -> Result<Arc<PlatformUser>, PlatformError> {
        if let Some(user) = self.user_by_id(id).await {
            return Ok(user);
        }
        let fetched = client.fetch_user(id).await?;
        tracing::debug!(
            platform = self.platform,
            user = %fetched.display_name,
            "cached user after directory miss"
        );
        Ok(self.upsert_user(fetched).await)
    }

    /// Resolve a channel by platform ID, fetching through the client on a
    /// miss.
    pub async fn resolve_channel<C: PlatformClient>(
        &self,
        client: &C,
        id: &str,
    ) -> Result<Arc<PlatformChannel>, PlatformError> {
        if let Some(channel) = self.channel_by_id(id).await {
            return Ok(channel);
        }
        let fetched = client.fetch_channel(id).await?;
        tracing::debug!(
            platform = self.platform,
            channel = %fetched.name,
            "cached channel after directory miss"
        );
        Ok(self.upsert_channel(fetched).await)
    }

    /// Create and join a channel by name, mirroring the counterpart
    /// platform's topology. No-op when the name is already known.
    pub async fn create_and_join_channel<C: PlatformClient>(
        &self,
        client: &C,
        name: &str,
    ) -> Result<Arc<PlatformChannel>, PlatformError> {
        if let Some(existing) = self.channel_by_name(name).await {
            return Ok(existing);
        }
        let mut created = client.create_channel(name).await?;
        client.join_channel(&created.id).await?;
        created.member = true;
        tracing::info!(platform = self.platform, channel = name, "created and joined channel");
        Ok(self.upsert_channel(created).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{channel, user, MockPlatform};
    use std::sync::atomic::Ordering;

    fn mock() -> MockPlatform {
        MockPlatform::new(
            "mock",
            user("B1", "bridge", "bridge@example.com"),
            vec![user("U1", "alice", "alice@example.com")],
            vec![channel("C1", "general")],
        )
    }

    #[tokio::test]
    async fn upsert_then_resolve_hits_cache_without_fetch() {
        let client = mock();
        let cache = DirectoryCache::new("mock");
        let alice = user("U1", "alice", "alice@example.com");
        cache.upsert_user(alice.clone()).await;

        let resolved = cache.resolve_user(&client, "U1").await.expect("resolve");
        assert_eq!(*resolved, alice);
        assert_eq!(client.state.fetch_user_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn resolve_miss_fetches_once_and_caches() {
        let client = mock();
        let cache = DirectoryCache::new("mock");

        let first = cache.resolve_user(&client, "U1").await.expect("resolve");
        let second = cache.resolve_user(&client, "U1").await.expect("resolve");
        assert_eq!(first, second);
        assert_eq!(client.state.fetch_user_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn resolve_unknown_user_reports_not_found() {
        let client = mock();
        let cache = DirectoryCache::new("mock");

        let error = cache.resolve_user(&client, "U404").await.expect_err("miss");
        assert!(matches!(error, PlatformError::UserNotFound(id) if id == "U404"));
    }

    #[tokio::test]
    async fn dual_index_returns_the_same_entity() {
        let cache = DirectoryCache::new("mock");
        cache.upsert_user(user("U1", "alice", "alice@example.com")).await;
        cache.upsert_channel(channel("C1", "general")).await;

        let by_id = cache.user_by_id("U1").await.expect("by id");
        let by_email = cache.user_by_email("alice@example.com").await.expect("by email");
        assert!(Arc::ptr_eq(&by_id, &by_email));

        let by_id = cache.channel_by_id("C1").await.expect("by id");
        let by_name = cache.channel_by_name("general").await.expect("by name");
        assert!(Arc::ptr_eq(&by_id, &by_name));
    }

    #[tokio::test]
    async fn user_without_email_is_reachable_by_id_only() {
        let cache = DirectoryCache::new("mock");
        cache.upsert_user(user("U2", "deploy-bot", "")).await;

        assert!(cache.user_by_id("U2").await.is_some());
        assert!(cache.user_by_email("").await.is_none());
    }

    #[tokio::test]
    async fn create_and_join_channel_is_idempotent() {
        let client = mock();
        let cache = DirectoryCache::new("mock");

        let first = cache
            .create_and_join_channel(&client, "incidents")
            .await
            .expect("create");
        assert!(first.member);

        cache
            .create_and_join_channel(&client, "incidents")
            .await
            .expect("no-op");
        assert_eq!(client.state.created.lock().expect("lock").len(), 1);
        assert_eq!(client.state.joined.lock().expect("lock").len(), 1);
    }

    #[tokio::test]
    async fn known_channel_is_never_recreated() {
        let client = mock();
        let cache = DirectoryCache::new("mock");
        cache.load_channels(vec![channel("C1", "general")]).await;

        cache
            .create_and_join_channel(&client, "general")
            .await
            .expect("no-op");
        assert!(client.state.created.lock().expect("lock").is_empty());
    }
}
