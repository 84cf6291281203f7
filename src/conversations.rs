use crate::db::{conversation_from_row, now_millis, rewrite_sql, DbKind, CONVERSATION_COLUMNS};
use crate::error::InboxResult;
use crate::types::{Channel, Contact, Conversation};
use sqlx::AnyPool;
use tracing::{debug, info};
use uuid::Uuid;

pub async fn find_conversation_by_key(
    pool: &AnyPool,
    kind: DbKind,
    external_key: &str,
) -> InboxResult<Option<Conversation>> {
    let sql = format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE external_key = ?");
    let sql = rewrite_sql(&sql, kind);
    let row = sqlx::query(sql.as_ref())
        .bind(external_key)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(conversation_from_row).transpose()?)
}

pub async fn get_conversation_record(
    pool: &AnyPool,
    kind: DbKind,
    id: &str,
) -> InboxResult<Option<Conversation>> {
    let sql = format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?");
    let sql = rewrite_sql(&sql, kind);
    let row = sqlx::query(sql.as_ref()).bind(id).fetch_optional(pool).await?;
    Ok(row.as_ref().map(conversation_from_row).transpose()?)
}

/// Maps an external conversation key to its Conversation, creating an active
/// thread with zero unread for `contact` on first sight. Same conflict
/// discipline as contact resolution: the key's unique constraint decides the
/// winner, everyone else reads it back.
pub async fn resolve_conversation(
    pool: &AnyPool,
    kind: DbKind,
    channel: Channel,
    external_key: &str,
    contact: &Contact,
) -> InboxResult<Conversation> {
    if let Some(existing) = find_conversation_by_key(pool, kind, external_key).await? {
        return Ok(existing);
    }

    let sql = rewrite_sql(
        r#"INSERT INTO conversations (id, channel, external_key, contact_id, active, last_message_at, unread_count, created_at)
           VALUES (?, ?, ?, ?, ?, NULL, 0, ?)
           ON CONFLICT (external_key) DO NOTHING"#,
        kind,
    );
    let result = sqlx::query(sql.as_ref())
        .bind(Uuid::new_v4().to_string())
        .bind(channel.as_str())
        .bind(external_key)
        .bind(&contact.id)
        .bind(1_i64)
        .bind(now_millis())
        .execute(pool)
        .await?;

    if result.rows_affected() > 0 {
        info!(%channel, external_key, contact_id = %contact.id, "created conversation");
    } else {
        debug!(%channel, external_key, "conversation created concurrently, reading back");
    }

    find_conversation_by_key(pool, kind, external_key)
        .await?
        .ok_or_else(|| sqlx::Error::RowNotFound.into())
}
