use crate::db::{
    contact_from_row, conversation_from_row, message_from_row, millis_to_datetime, now_millis,
    rewrite_sql, DbKind, CONTACT_COLUMNS, CONVERSATION_COLUMNS, MESSAGE_COLUMNS,
};
use crate::error::{InboxError, InboxResult};
use crate::messages::load_attachments;
use crate::types::{
    Channel, Contact, ConversationDetail, ConversationSummary, DeliveryStatus, Message,
};
use sqlx::any::AnyRow;
use sqlx::{AnyConnection, AnyPool, Row};
use tracing::debug;

#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

impl Page {
    /// Clamps caller-supplied paging to `[1, max]` rows and a non-negative offset.
    pub fn bounded(limit: Option<i64>, offset: Option<i64>, max: i64) -> Self {
        let max = max.max(1);
        Self {
            limit: limit.unwrap_or(max).clamp(1, max),
            offset: offset.unwrap_or(0).max(0),
        }
    }
}

fn prefixed(columns: &str, alias: &str) -> String {
    columns
        .split(',')
        .map(|col| format!("{alias}.{}", col.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

async fn latest_message(
    conn: &mut AnyConnection,
    kind: DbKind,
    conversation_id: &str,
) -> InboxResult<Option<Message>> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = ? ORDER BY sent_at DESC, created_at DESC LIMIT 1"
    );
    let sql = rewrite_sql(&sql, kind);
    let row = sqlx::query(sql.as_ref())
        .bind(conversation_id)
        .fetch_optional(&mut *conn)
        .await?;
    let Some(row) = row else {
        return Ok(None);
    };
    let mut message = message_from_row(&row)?;
    message.attachments = load_attachments(conn, kind, &message.id).await?;
    Ok(Some(message))
}

/// Active conversations with at least one message, most recently active
/// first, each carrying its newest message as a preview.
pub async fn list_conversations(
    pool: &AnyPool,
    kind: DbKind,
    channel: Option<Channel>,
    page: Page,
) -> InboxResult<Vec<ConversationSummary>> {
    let channel_filter = if channel.is_some() { "AND c.channel = ?" } else { "" };
    let sql = format!(
        r#"SELECT {}, {}
           FROM conversations c
           JOIN contacts p ON p.id = c.contact_id
           WHERE c.active = 1
             AND EXISTS (SELECT 1 FROM messages m WHERE m.conversation_id = c.id)
             {channel_filter}
           ORDER BY c.last_message_at DESC, c.id ASC
           LIMIT ? OFFSET ?"#,
        prefixed(CONVERSATION_COLUMNS, "c"),
        contact_select("p"),
    );
    let sql = rewrite_sql(&sql, kind);
    let mut query = sqlx::query(sql.as_ref());
    if let Some(channel) = channel {
        query = query.bind(channel.as_str());
    }
    let mut conn = pool.acquire().await?;
    let rows = query
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&mut *conn)
        .await?;

    let mut result = Vec::with_capacity(rows.len());
    for row in rows {
        let conversation = conversation_from_row(&row)?;
        let contact = contact_from_aliased_row(&row, "p")?;
        let Some(last_message) = latest_message(&mut conn, kind, &conversation.id).await? else {
            continue;
        };
        result.push(ConversationSummary {
            conversation,
            contact,
            last_message,
        });
    }
    Ok(result)
}

/// Contact columns renamed `<alias>_<column>` so they do not collide with
/// the conversation columns in a joined row.
fn contact_select(alias: &str) -> String {
    CONTACT_COLUMNS
        .split(',')
        .map(|col| {
            let col = col.trim();
            format!("{alias}.{col} AS {alias}_{col}")
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn contact_from_aliased_row(row: &AnyRow, alias: &str) -> sqlx::Result<Contact> {
    let col = |name: &str| format!("{alias}_{name}");
    let channel: String = row.try_get(col("channel").as_str())?;
    Ok(Contact {
        id: row.try_get(col("id").as_str())?,
        channel: channel
            .parse()
            .map_err(|err: String| sqlx::Error::Decode(err.into()))?,
        external_id: row.try_get(col("external_id").as_str())?,
        display_name: row.try_get(col("display_name").as_str())?,
        phone_number: row.try_get(col("phone_number").as_str())?,
        active: row.try_get::<i64, _>(col("active").as_str())? != 0,
        created_at: millis_to_datetime(row.try_get(col("created_at").as_str())?),
    })
}

/// Messages across conversations, newest first.
pub async fn list_recent_messages(
    pool: &AnyPool,
    kind: DbKind,
    channel: Option<Channel>,
    page: Page,
) -> InboxResult<Vec<Message>> {
    let channel_filter = if channel.is_some() { "WHERE channel = ?" } else { "" };
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages {channel_filter} ORDER BY sent_at DESC, created_at DESC LIMIT ? OFFSET ?"
    );
    let sql = rewrite_sql(&sql, kind);
    let mut query = sqlx::query(sql.as_ref());
    if let Some(channel) = channel {
        query = query.bind(channel.as_str());
    }
    let mut conn = pool.acquire().await?;
    let rows = query
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&mut *conn)
        .await?;

    let mut messages = Vec::with_capacity(rows.len());
    for row in rows {
        let mut message = message_from_row(&row)?;
        message.attachments = load_attachments(&mut conn, kind, &message.id).await?;
        messages.push(message);
    }
    Ok(messages)
}

/// Returns the full thread ordered by `sent_at` and marks it read.
///
/// The counter resets to zero, unread inbound messages get `read_at = now` and
/// the thread is read back inside one transaction. Messages already read keep
/// their `read_at`.
pub async fn get_conversation(
    pool: &AnyPool,
    kind: DbKind,
    conversation_id: &str,
) -> InboxResult<ConversationDetail> {
    let mut tx = pool.begin().await?;

    // Resetting the counter first takes the conversation row lock, so a
    // concurrent ingest either commits before the mark below or waits for us.
    let sql = rewrite_sql("UPDATE conversations SET unread_count = 0 WHERE id = ?", kind);
    let updated = sqlx::query(sql.as_ref())
        .bind(conversation_id)
        .execute(&mut *tx)
        .await?;
    if updated.rows_affected() == 0 {
        tx.rollback().await?;
        return Err(InboxError::NotFound);
    }

    let sql = rewrite_sql(
        r#"UPDATE messages SET read_at = ?, status = ?
           WHERE conversation_id = ? AND direction = 'INBOUND' AND read_at IS NULL"#,
        kind,
    );
    let marked = sqlx::query(sql.as_ref())
        .bind(now_millis())
        .bind(DeliveryStatus::Read.as_str())
        .bind(conversation_id)
        .execute(&mut *tx)
        .await?;

    let sql = format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?");
    let sql = rewrite_sql(&sql, kind);
    let row = sqlx::query(sql.as_ref())
        .bind(conversation_id)
        .fetch_one(&mut *tx)
        .await?;
    let conversation = conversation_from_row(&row)?;

    let sql = format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE id = ?");
    let sql = rewrite_sql(&sql, kind);
    let row = sqlx::query(sql.as_ref())
        .bind(&conversation.contact_id)
        .fetch_one(&mut *tx)
        .await?;
    let contact = contact_from_row(&row)?;

    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = ? ORDER BY sent_at ASC, created_at ASC"
    );
    let sql = rewrite_sql(&sql, kind);
    let rows = sqlx::query(sql.as_ref())
        .bind(conversation_id)
        .fetch_all(&mut *tx)
        .await?;
    let mut messages = Vec::with_capacity(rows.len());
    for row in rows {
        let mut message = message_from_row(&row)?;
        message.attachments = load_attachments(&mut tx, kind, &message.id).await?;
        messages.push(message);
    }

    tx.commit().await?;

    debug!(
        conversation_id,
        marked_read = marked.rows_affected(),
        "conversation fetched"
    );

    Ok(ConversationDetail {
        conversation,
        contact,
        messages,
    })
}
