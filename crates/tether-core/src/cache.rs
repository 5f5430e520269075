use std::sync::Arc;
use std::time::Duration;

use tether_models::StoredMessage;

pub const RECENT_CACHE_MESSAGES_PER_CONVERSATION: usize = 50;
pub const RECENT_CACHE_TTL_SECS: u64 = 60 * 60;

/// Look-aside cache of the most recent messages per conversation,
/// most-recent-first, capped at 50 entries with a ~1 hour expiry refreshed
/// on each append.
///
/// Advisory only: a concurrent append can lose a race and a reader must
/// always tolerate a miss by falling through to the store, which stays the
/// durable source of truth.
#[derive(Clone)]
pub struct RecentMessageCache {
    inner: moka::future::Cache<String, Arc<Vec<StoredMessage>>>,
    per_conversation: usize,
}

impl RecentMessageCache {
    pub fn new(max_conversations: u64, ttl: Duration, per_conversation: usize) -> Self {
        let inner = moka::future::Cache::builder()
            .max_capacity(max_conversations)
            .time_to_live(ttl)
            .build();
        Self {
            inner,
            per_conversation,
        }
    }

    /// Prepend a message to the conversation's entry, trimming to the cap.
    /// Re-inserting refreshes the entry's expiry.
    pub async fn push(&self, conversation_id: &str, message: StoredMessage) {
        let mut list: Vec<StoredMessage> = match self.inner.get(conversation_id).await {
            Some(existing) => {
                let mut copy = Vec::with_capacity(existing.len() + 1);
                copy.push(message);
                copy.extend(existing.iter().cloned());
                copy
            }
            None => vec![message],
        };
        list.truncate(self.per_conversation);
        self.inner
            .insert(conversation_id.to_string(), Arc::new(list))
            .await;
    }

    /// Replace a conversation's entry wholesale (used to prime the cache
    /// after a store read). `messages` must already be most-recent-first.
    pub async fn prime(&self, conversation_id: &str, mut messages: Vec<StoredMessage>) {
        messages.truncate(self.per_conversation);
        self.inner
            .insert(conversation_id.to_string(), Arc::new(messages))
            .await;
    }

    /// Most-recent-first snapshot, or None on a miss.
    pub async fn get(&self, conversation_id: &str) -> Option<Vec<StoredMessage>> {
        self.inner
            .get(conversation_id)
            .await
            .map(|list| list.as_ref().clone())
    }

    pub async fn invalidate(&self, conversation_id: &str) {
        self.inner.invalidate(conversation_id).await;
    }
}

impl Default for RecentMessageCache {
    fn default() -> Self {
        Self::new(
            10_000,
            Duration::from_secs(RECENT_CACHE_TTL_SECS),
            RECENT_CACHE_MESSAGES_PER_CONVERSATION,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tether_models::MessageType;

    fn msg(n: usize) -> StoredMessage {
        StoredMessage {
            id: format!("m{n}"),
            conversation_id: "alice_bob".into(),
            sender_id: "alice".into(),
            receiver_id: "bob".into(),
            content: format!("message {n}"),
            message_type: MessageType::Text,
            attachment: None,
            is_read: false,
            read_at: None,
            created_at: Utc::now(),
            sender_name: None,
            receiver_name: None,
        }
    }

    #[tokio::test]
    async fn bounded_at_fifty_most_recent_first() {
        let cache = RecentMessageCache::default();
        for n in 0..60 {
            cache.push("alice_bob", msg(n)).await;
        }

        let list = cache.get("alice_bob").await.expect("hit");
        assert_eq!(list.len(), RECENT_CACHE_MESSAGES_PER_CONVERSATION);
        assert_eq!(list[0].id, "m59");
        assert_eq!(list.last().unwrap().id, "m10");
    }

    #[tokio::test]
    async fn miss_and_invalidate() {
        let cache = RecentMessageCache::default();
        assert!(cache.get("nobody_nowhere").await.is_none());

        cache.push("alice_bob", msg(1)).await;
        assert!(cache.get("alice_bob").await.is_some());
        cache.invalidate("alice_bob").await;
        assert!(cache.get("alice_bob").await.is_none());
    }

    #[tokio::test]
    async fn prime_replaces_wholesale() {
        let cache = RecentMessageCache::default();
        cache.push("alice_bob", msg(0)).await;
        cache.prime("alice_bob", vec![msg(2), msg(1)]).await;

        let list = cache.get("alice_bob").await.expect("hit");
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, "m2");
    }
}
