use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::{bool_from_any_row, datetime_from_db_text, datetime_to_db_text, DbError, DbPool};

pub const DEFAULT_PAGE_SIZE: i64 = 50;

#[derive(Debug, Clone)]
pub struct MessageRow {
    /// Insertion sequence number; the stable tie-break when two rows share
    /// a creation timestamp.
    pub seq: i64,
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    pub message_type: String,
    /// Attachment descriptor as stored JSON text.
    pub attachment: Option<String>,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub purge_eligible: bool,
    pub created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> for MessageRow {
    fn from_row(row: &'r sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        let read_at_raw: Option<String> = row.try_get("read_at")?;
        let created_at_raw: String = row.try_get("created_at")?;
        Ok(Self {
            seq: row.try_get("seq")?,
            id: row.try_get("id")?,
            conversation_id: row.try_get("conversation_id")?,
            sender_id: row.try_get("sender_id")?,
            receiver_id: row.try_get("receiver_id")?,
            content: row.try_get("content")?,
            message_type: row.try_get("message_type")?,
            attachment: row.try_get("attachment")?,
            is_read: bool_from_any_row(row, "is_read")?,
            read_at: read_at_raw
                .as_deref()
                .map(datetime_from_db_text)
                .transpose()?,
            purge_eligible: bool_from_any_row(row, "purge_eligible")?,
            created_at: datetime_from_db_text(&created_at_raw)?,
        })
    }
}

/// One entry of a user's conversation list: the most recent message in the
/// thread plus how many messages are still unread for that user.
#[derive(Debug, Clone)]
pub struct ConversationSummaryRow {
    pub last_message: MessageRow,
    pub unread_count: i64,
}

impl<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> for ConversationSummaryRow {
    fn from_row(row: &'r sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            last_message: MessageRow::from_row(row)?,
            unread_count: row.try_get("unread_count")?,
        })
    }
}

const MESSAGE_COLUMNS: &str = "seq, id, conversation_id, sender_id, receiver_id, content, \
     message_type, attachment, is_read, read_at, purge_eligible, created_at";

/// Insert a message. `created_at` is assigned by the store (single
/// authoritative clock), not by the caller.
#[allow(clippy::too_many_arguments)]
pub async fn create_message(
    pool: &DbPool,
    id: &str,
    conversation_id: &str,
    sender_id: &str,
    receiver_id: &str,
    content: &str,
    message_type: &str,
    attachment_json: Option<&str>,
) -> Result<MessageRow, DbError> {
    let row = sqlx::query_as::<_, MessageRow>(&format!(
        "INSERT INTO messages (id, conversation_id, sender_id, receiver_id, content, message_type, attachment)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         RETURNING {MESSAGE_COLUMNS}",
    ))
    .bind(id)
    .bind(conversation_id)
    .bind(sender_id)
    .bind(receiver_id)
    .bind(content)
    .bind(message_type)
    .bind(attachment_json)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

pub async fn get_message(pool: &DbPool, id: &str) -> Result<Option<MessageRow>, DbError> {
    let row = sqlx::query_as::<_, MessageRow>(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1",
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// One page of a conversation, ascending by creation time (then insertion
/// order), excluding messages the viewer has soft-deleted. Pages are
/// 1-based.
pub async fn get_conversation_page(
    pool: &DbPool,
    conversation_id: &str,
    viewer_id: &str,
    page: i64,
    page_size: i64,
) -> Result<Vec<MessageRow>, DbError> {
    let page = page.max(1);
    let page_size = if page_size > 0 {
        page_size
    } else {
        DEFAULT_PAGE_SIZE
    };
    let offset = (page - 1) * page_size;

    let rows = sqlx::query_as::<_, MessageRow>(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages m
         WHERE m.conversation_id = $1
           AND NOT EXISTS (
               SELECT 1 FROM message_deletions d
               WHERE d.message_id = m.id AND d.user_id = $2
           )
         ORDER BY m.created_at ASC, m.seq ASC
         LIMIT $3 OFFSET $4",
    ))
    .bind(conversation_id)
    .bind(viewer_id)
    .bind(page_size)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// All of a user's conversations, one summary each, most recent first.
pub async fn list_conversations_for(
    pool: &DbPool,
    user_id: &str,
) -> Result<Vec<ConversationSummaryRow>, DbError> {
    let rows = sqlx::query_as::<_, ConversationSummaryRow>(&format!(
        "SELECT m.seq, m.id, m.conversation_id, m.sender_id, m.receiver_id, m.content, \
                m.message_type, m.attachment, m.is_read, m.read_at, m.purge_eligible, m.created_at,
                (SELECT COUNT(*) FROM messages u
                 WHERE u.conversation_id = m.conversation_id
                   AND u.receiver_id = $1
                   AND u.is_read = 0
                   AND NOT EXISTS (
                       SELECT 1 FROM message_deletions d
                       WHERE d.message_id = u.id AND d.user_id = $1
                   )) AS unread_count
         FROM messages m
         INNER JOIN (
             SELECT conversation_id, MAX(seq) AS last_seq
             FROM messages v
             WHERE (v.sender_id = $1 OR v.receiver_id = $1)
               AND NOT EXISTS (
                   SELECT 1 FROM message_deletions d
                   WHERE d.message_id = v.id AND d.user_id = $1
               )
             GROUP BY conversation_id
         ) latest ON latest.conversation_id = m.conversation_id
                 AND latest.last_seq = m.seq
         ORDER BY m.created_at DESC, m.seq DESC",
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Ids of the messages in a conversation that `viewer_id` has soft-deleted.
/// Used to filter viewer-agnostic caches down to the viewer's visibility.
pub async fn hidden_message_ids(
    pool: &DbPool,
    conversation_id: &str,
    viewer_id: &str,
) -> Result<Vec<String>, DbError> {
    let ids: Vec<String> = sqlx::query_scalar(
        "SELECT d.message_id FROM message_deletions d
         INNER JOIN messages m ON m.id = d.message_id
         WHERE m.conversation_id = $1 AND d.user_id = $2",
    )
    .bind(conversation_id)
    .bind(viewer_id)
    .fetch_all(pool)
    .await?;
    Ok(ids)
}

/// Mark every unread message addressed to `reader_id` in the conversation
/// as read. Bulk and idempotent; returns how many rows changed.
pub async fn mark_conversation_read(
    pool: &DbPool,
    conversation_id: &str,
    reader_id: &str,
) -> Result<u64, DbError> {
    let result = sqlx::query(
        "UPDATE messages SET is_read = 1, read_at = $3
         WHERE conversation_id = $1 AND receiver_id = $2 AND is_read = 0",
    )
    .bind(conversation_id)
    .bind(reader_id)
    .bind(datetime_to_db_text(Utc::now()))
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Total unread messages addressed to a user, across all conversations,
/// excluding anything they soft-deleted.
pub async fn unread_count(pool: &DbPool, user_id: &str) -> Result<i64, DbError> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM messages m
         WHERE m.receiver_id = $1
           AND m.is_read = 0
           AND NOT EXISTS (
               SELECT 1 FROM message_deletions d
               WHERE d.message_id = m.id AND d.user_id = $1
           )",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// Hide a message for `actor_id`. When both participants have hidden it,
/// the row is flagged eligible for hard deletion (an external reaper may
/// purge it; nothing is removed here). Returns the purge-eligible flag.
pub async fn soft_delete_message(
    pool: &DbPool,
    message_id: &str,
    actor_id: &str,
) -> Result<bool, DbError> {
    let message = get_message(pool, message_id).await?.ok_or(DbError::NotFound)?;
    if actor_id != message.sender_id && actor_id != message.receiver_id {
        return Err(DbError::NotFound);
    }

    sqlx::query(
        "INSERT INTO message_deletions (message_id, user_id)
         VALUES ($1, $2)
         ON CONFLICT (message_id, user_id) DO NOTHING",
    )
    .bind(message_id)
    .bind(actor_id)
    .execute(pool)
    .await?;

    let hidden_by: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM message_deletions WHERE message_id = $1")
            .bind(message_id)
            .fetch_one(pool)
            .await?;

    let both_hidden = hidden_by >= 2;
    if both_hidden && !message.purge_eligible {
        sqlx::query("UPDATE messages SET purge_eligible = 1 WHERE id = $1")
            .bind(message_id)
            .execute(pool)
            .await?;
    }
    Ok(both_hidden)
}
