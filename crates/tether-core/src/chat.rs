use tether_db::messages::{self, MessageRow, DEFAULT_PAGE_SIZE};
use tether_db::users;
use tether_models::{Attachment, MessageType, StoredMessage};
use tether_util::{conversation_id, validation};
use uuid::Uuid;

use crate::error::ChatError;
use crate::AppState;

/// A send request as it arrives from a client, before validation.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub receiver_id: String,
    pub content: String,
    pub message_type: Option<String>,
    pub attachment: Option<Attachment>,
}

/// One entry of a user's conversation list.
#[derive(Debug, Clone)]
pub struct ConversationSummary {
    pub last_message: StoredMessage,
    pub unread_count: i64,
}

fn row_to_stored(
    row: MessageRow,
    sender_name: Option<String>,
    receiver_name: Option<String>,
) -> StoredMessage {
    let attachment = row.attachment.as_deref().and_then(|raw| {
        serde_json::from_str::<Attachment>(raw)
            .map_err(|e| tracing::warn!(message_id = %row.id, "unreadable attachment json: {e}"))
            .ok()
    });
    let message_type = MessageType::parse(&row.message_type).unwrap_or_default();
    StoredMessage {
        id: row.id,
        conversation_id: row.conversation_id,
        sender_id: row.sender_id,
        receiver_id: row.receiver_id,
        content: row.content,
        message_type,
        attachment,
        is_read: row.is_read,
        read_at: row.read_at,
        created_at: row.created_at,
        sender_name,
        receiver_name,
    }
}

async fn display_name_of(state: &AppState, identity: &str) -> Option<String> {
    match users::get_display_name(&state.db, identity).await {
        Ok(name) => name,
        Err(e) => {
            tracing::warn!(identity, "display name lookup failed: {e}");
            None
        }
    }
}

/// Validate and persist an outbound message, join display data, and update
/// the look-aside cache. The cache write is best-effort and never fails the
/// send.
pub async fn send_message(
    state: &AppState,
    sender_id: &str,
    outgoing: OutgoingMessage,
) -> Result<StoredMessage, ChatError> {
    validation::validate_identity(sender_id)
        .map_err(|e| ChatError::Validation(format!("senderId: {e}")))?;
    validation::validate_identity(&outgoing.receiver_id)
        .map_err(|e| ChatError::Validation(format!("receiverId: {e}")))?;
    if sender_id == outgoing.receiver_id {
        return Err(ChatError::Validation(
            "cannot send a message to yourself".to_string(),
        ));
    }
    validation::validate_message_content(&outgoing.content)
        .map_err(|e| ChatError::Validation(format!("content: {e}")))?;

    let message_type = match outgoing.message_type.as_deref() {
        None | Some("") => MessageType::Text,
        Some(raw) => MessageType::parse(raw)
            .ok_or_else(|| ChatError::Validation(format!("unknown messageType '{raw}'")))?,
    };
    let attachment_json = match &outgoing.attachment {
        Some(attachment) => Some(
            serde_json::to_string(attachment)
                .map_err(|e| ChatError::Validation(format!("attachment: {e}")))?,
        ),
        None => None,
    };

    let convo = conversation_id(sender_id, &outgoing.receiver_id);
    let row = messages::create_message(
        &state.db,
        &Uuid::new_v4().to_string(),
        &convo,
        sender_id,
        &outgoing.receiver_id,
        outgoing.content.trim(),
        message_type.as_str(),
        attachment_json.as_deref(),
    )
    .await?;

    let sender_name = display_name_of(state, sender_id).await;
    let receiver_name = display_name_of(state, &outgoing.receiver_id).await;
    let stored = row_to_stored(row, sender_name, receiver_name);

    state.recent_cache.push(&convo, stored.clone()).await;

    Ok(stored)
}

/// One page of the conversation between `me` and `other`, ascending by
/// creation time, as seen by `me`. Consults the recent-message cache when
/// it provably holds the whole thread; otherwise reads the store and primes
/// the cache when this page reaches the thread's end.
///
/// The cache is shared between both participants and holds the unfiltered
/// thread, so every read filters out the viewer's own soft-deletions, and
/// priming is skipped for a viewer whose page is already filtered.
pub async fn conversation_page(
    state: &AppState,
    me: &str,
    other: &str,
    page: i64,
    page_size: i64,
) -> Result<Vec<StoredMessage>, ChatError> {
    let convo = conversation_id(me, other);
    let page_size = if page_size > 0 { page_size } else { DEFAULT_PAGE_SIZE };

    if page <= 1 {
        if let Some(cached) = state.recent_cache.get(&convo).await {
            // A full (< cap) cached thread answers page 1 exactly; a capped
            // entry may be missing older rows, so fall through.
            if (cached.len() as i64) < DEFAULT_PAGE_SIZE && cached.len() as i64 <= page_size {
                let hidden = messages::hidden_message_ids(&state.db, &convo, me).await?;
                let mut ascending: Vec<StoredMessage> = cached
                    .into_iter()
                    .filter(|m| !hidden.contains(&m.id))
                    .collect();
                ascending.reverse();
                return Ok(ascending);
            }
        }
    }

    let rows = messages::get_conversation_page(&state.db, &convo, me, page, page_size).await?;
    let stored: Vec<StoredMessage> = rows
        .into_iter()
        .map(|row| row_to_stored(row, None, None))
        .collect();

    if page <= 1 && (stored.len() as i64) < page_size {
        // Prime only from an unfiltered view; a viewer with soft-deletions
        // would otherwise poison the shared entry for the other participant.
        let hidden = messages::hidden_message_ids(&state.db, &convo, me).await?;
        if hidden.is_empty() {
            let mut recent_first = stored.clone();
            recent_first.reverse();
            state.recent_cache.prime(&convo, recent_first).await;
        }
    }

    Ok(stored)
}

/// Conversation list for a user: most recent message and unread count per
/// thread, most recent first.
pub async fn conversations_for(
    state: &AppState,
    user_id: &str,
) -> Result<Vec<ConversationSummary>, ChatError> {
    let rows = messages::list_conversations_for(&state.db, user_id).await?;
    Ok(rows
        .into_iter()
        .map(|row| ConversationSummary {
            last_message: row_to_stored(row.last_message, None, None),
            unread_count: row.unread_count,
        })
        .collect())
}

/// Bulk mark-read; idempotent. Invalidates the conversation's cache entry
/// so stale unread flags don't linger.
pub async fn mark_read(
    state: &AppState,
    conversation_id: &str,
    reader_id: &str,
) -> Result<u64, ChatError> {
    let changed = messages::mark_conversation_read(&state.db, conversation_id, reader_id).await?;
    if changed > 0 {
        state.recent_cache.invalidate(conversation_id).await;
    }
    Ok(changed)
}

pub async fn unread_total(state: &AppState, user_id: &str) -> Result<i64, ChatError> {
    Ok(messages::unread_count(&state.db, user_id).await?)
}

/// Soft-delete for one party; flags the row purge-eligible once both
/// participants have hidden it. Returns that flag.
pub async fn hide_message(
    state: &AppState,
    message_id: &str,
    actor_id: &str,
) -> Result<bool, ChatError> {
    let message = messages::get_message(&state.db, message_id)
        .await?
        .ok_or(ChatError::NotFound)?;
    let purge_eligible = messages::soft_delete_message(&state.db, message_id, actor_id).await?;
    state.recent_cache.invalidate(&message.conversation_id).await;
    Ok(purge_eligible)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AppConfig;

    async fn test_state() -> AppState {
        let pool = tether_db::create_pool("sqlite::memory:", 1).await.expect("pool");
        tether_db::run_migrations(&pool).await.expect("migrations");
        AppState::new(pool, AppConfig::default())
    }

    fn outgoing(receiver: &str, content: &str) -> OutgoingMessage {
        OutgoingMessage {
            receiver_id: receiver.to_string(),
            content: content.to_string(),
            message_type: None,
            attachment: None,
        }
    }

    #[tokio::test]
    async fn send_persists_and_joins_display_data() {
        let state = test_state().await;
        users::upsert_user(&state.db, "alice", "Alice Chen", None, None)
            .await
            .unwrap();
        users::upsert_user(&state.db, "bob", "Bob Okafor", None, None)
            .await
            .unwrap();

        let stored = send_message(&state, "alice", outgoing("bob", "  Hi Bob  "))
            .await
            .expect("send");
        assert_eq!(stored.content, "Hi Bob");
        assert_eq!(stored.conversation_id, "alice_bob");
        assert_eq!(stored.sender_name.as_deref(), Some("Alice Chen"));
        assert_eq!(stored.receiver_name.as_deref(), Some("Bob Okafor"));
        assert!(!stored.is_read);

        // The send also lands in the look-aside cache.
        let cached = state.recent_cache.get("alice_bob").await.expect("cache hit");
        assert_eq!(cached[0].id, stored.id);
    }

    #[tokio::test]
    async fn invalid_sends_write_no_row() {
        let state = test_state().await;

        for bad in [
            outgoing("bob", "   "),
            outgoing("", "hello"),
            outgoing("alice", "hello"), // self-send
            OutgoingMessage {
                message_type: Some("carrier-pigeon".into()),
                ..outgoing("bob", "hello")
            },
        ] {
            assert!(matches!(
                send_message(&state, "alice", bad).await,
                Err(ChatError::Validation(_))
            ));
        }

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages")
            .fetch_one(&state.db)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn page_read_marks_and_unread_totals() {
        let state = test_state().await;
        send_message(&state, "alice", outgoing("bob", "one")).await.unwrap();
        send_message(&state, "bob", outgoing("alice", "two")).await.unwrap();
        send_message(&state, "alice", outgoing("bob", "three")).await.unwrap();

        let page = conversation_page(&state, "bob", "alice", 1, 50).await.unwrap();
        assert_eq!(
            page.iter().map(|m| m.content.as_str()).collect::<Vec<_>>(),
            vec!["one", "two", "three"]
        );

        assert_eq!(unread_total(&state, "bob").await.unwrap(), 2);
        let changed = mark_read(&state, "alice_bob", "bob").await.unwrap();
        assert_eq!(changed, 2);
        assert_eq!(unread_total(&state, "bob").await.unwrap(), 0);
        // Idempotent second pass.
        assert_eq!(mark_read(&state, "alice_bob", "bob").await.unwrap(), 0);
    }

    fn contents(page: &[StoredMessage]) -> Vec<&str> {
        page.iter().map(|m| m.content.as_str()).collect()
    }

    #[tokio::test]
    async fn cached_reads_respect_the_viewers_soft_deletions() {
        let state = test_state().await;
        let first = send_message(&state, "alice", outgoing("bob", "one")).await.unwrap();
        send_message(&state, "alice", outgoing("bob", "two")).await.unwrap();
        hide_message(&state, &first.id, "alice").await.unwrap();

        // Bob's read repopulates the shared cache with his unfiltered view.
        let bob_page = conversation_page(&state, "bob", "alice", 1, 50).await.unwrap();
        assert_eq!(contents(&bob_page), vec!["one", "two"]);
        assert!(state.recent_cache.get("alice_bob").await.is_some());

        // Alice's cache-served read must still exclude what she hid.
        let alice_page = conversation_page(&state, "alice", "bob", 1, 50).await.unwrap();
        assert_eq!(contents(&alice_page), vec!["two"]);

        // Later sends append to the shared entry; her view stays filtered.
        send_message(&state, "bob", outgoing("alice", "three")).await.unwrap();
        let alice_page = conversation_page(&state, "alice", "bob", 1, 50).await.unwrap();
        assert_eq!(contents(&alice_page), vec!["two", "three"]);
    }

    #[tokio::test]
    async fn deleters_read_never_hides_rows_from_the_other_viewer() {
        let state = test_state().await;
        let first = send_message(&state, "alice", outgoing("bob", "one")).await.unwrap();
        send_message(&state, "alice", outgoing("bob", "two")).await.unwrap();
        hide_message(&state, &first.id, "alice").await.unwrap();

        // Alice reads first: her filtered page must not prime the shared
        // cache and shadow a message bob never deleted.
        let alice_page = conversation_page(&state, "alice", "bob", 1, 50).await.unwrap();
        assert_eq!(contents(&alice_page), vec!["two"]);

        let bob_page = conversation_page(&state, "bob", "alice", 1, 50).await.unwrap();
        assert_eq!(contents(&bob_page), vec!["one", "two"]);
    }

    #[tokio::test]
    async fn hide_message_invalidates_cache_and_flags_purge() {
        let state = test_state().await;
        let stored = send_message(&state, "alice", outgoing("bob", "oops")).await.unwrap();
        assert!(state.recent_cache.get("alice_bob").await.is_some());

        assert!(!hide_message(&state, &stored.id, "alice").await.unwrap());
        assert!(state.recent_cache.get("alice_bob").await.is_none());
        assert!(hide_message(&state, &stored.id, "bob").await.unwrap());

        assert!(matches!(
            hide_message(&state, "no-such-message", "alice").await,
            Err(ChatError::NotFound)
        ));
    }
}
