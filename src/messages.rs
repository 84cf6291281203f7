use crate::db::{
    attachment_from_row, datetime_to_millis, message_from_row, now_millis, rewrite_sql, DbKind,
    ATTACHMENT_COLUMNS, MESSAGE_COLUMNS,
};
use crate::error::InboxResult;
use crate::types::{
    Attachment, AttachmentDescriptor, CanonicalMessage, Channel, Conversation, DeliveryReceipt,
    DeliveryStatus, Direction, Message, MessageType,
};
use chrono::{DateTime, Utc};
use sqlx::{AnyConnection, AnyPool};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub enum IngestOutcome {
    Created(Message),
    AlreadyExists,
}

/// Everything needed to write one message row, independent of direction.
struct NewMessage<'a> {
    conversation: &'a Conversation,
    channel: Channel,
    provider_message_id: &'a str,
    direction: Direction,
    message_type: MessageType,
    status: DeliveryStatus,
    content: Option<&'a str>,
    sender_id: &'a str,
    sender_name: Option<&'a str>,
    recipient_id: &'a str,
    sent_at: DateTime<Utc>,
    attachments: &'a [AttachmentDescriptor],
}

/// Persists an inbound record exactly once per `(channel, provider_message_id)`.
///
/// The insert is guarded by the unique constraint itself, so two concurrent
/// redeliveries cannot both succeed; the loser reports `AlreadyExists` and
/// touches nothing. Message, attachments and the conversation's
/// `last_message_at`/`unread_count` change in one transaction.
pub async fn ingest_message(
    pool: &AnyPool,
    kind: DbKind,
    conversation: &Conversation,
    record: &CanonicalMessage,
) -> InboxResult<IngestOutcome> {
    let new = NewMessage {
        conversation,
        channel: record.channel,
        provider_message_id: &record.provider_message_id,
        direction: Direction::Inbound,
        message_type: record.message_type.clone(),
        status: DeliveryStatus::Received,
        content: record.text.as_deref(),
        sender_id: &record.sender_id,
        sender_name: record.sender_name.as_deref(),
        recipient_id: &record.recipient_id,
        sent_at: record.timestamp,
        attachments: &record.attachments,
    };
    store_message(pool, kind, new).await
}

/// Records a message the business sent through a channel's send path.
/// Outbound messages advance `last_message_at` but never the unread counter.
pub async fn record_outbound(
    pool: &AnyPool,
    kind: DbKind,
    conversation: &Conversation,
    provider_message_id: &str,
    sender_id: &str,
    recipient_id: &str,
    text: &str,
    sent_at: DateTime<Utc>,
) -> InboxResult<IngestOutcome> {
    let new = NewMessage {
        conversation,
        channel: conversation.channel,
        provider_message_id,
        direction: Direction::Outbound,
        message_type: MessageType::Text,
        status: DeliveryStatus::Sent,
        content: Some(text),
        sender_id,
        sender_name: None,
        recipient_id,
        sent_at,
        attachments: &[],
    };
    store_message(pool, kind, new).await
}

async fn store_message(
    pool: &AnyPool,
    kind: DbKind,
    new: NewMessage<'_>,
) -> InboxResult<IngestOutcome> {
    let mut tx = pool.begin().await?;

    let message_id = Uuid::new_v4().to_string();
    let sent_at = datetime_to_millis(new.sent_at);
    let sql = rewrite_sql(
        r#"INSERT INTO messages (
            id, provider_message_id, conversation_id, channel, direction, message_type, status,
            content, sender_id, sender_name, recipient_id, sent_at, delivered_at, read_at, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, NULL, ?)
        ON CONFLICT (channel, provider_message_id) DO NOTHING"#,
        kind,
    );
    let inserted = sqlx::query(sql.as_ref())
        .bind(&message_id)
        .bind(new.provider_message_id)
        .bind(&new.conversation.id)
        .bind(new.channel.as_str())
        .bind(new.direction.as_str())
        .bind(new.message_type.as_str())
        .bind(new.status.as_str())
        .bind(new.content)
        .bind(new.sender_id)
        .bind(new.sender_name)
        .bind(new.recipient_id)
        .bind(sent_at)
        .bind(now_millis())
        .execute(&mut *tx)
        .await?;

    if inserted.rows_affected() == 0 {
        tx.rollback().await?;
        debug!(
            channel = %new.channel,
            provider_message_id = new.provider_message_id,
            "duplicate delivery ignored"
        );
        return Ok(IngestOutcome::AlreadyExists);
    }

    let attachments = insert_attachments(&mut tx, kind, &message_id, new.attachments).await?;

    let unread_increment: i64 = match new.direction {
        Direction::Inbound => 1,
        Direction::Outbound => 0,
    };
    let sql = rewrite_sql(
        r#"UPDATE conversations SET
            last_message_at = CASE
                WHEN last_message_at IS NULL OR last_message_at < ? THEN ?
                ELSE last_message_at
            END,
            unread_count = unread_count + ?
           WHERE id = ?"#,
        kind,
    );
    sqlx::query(sql.as_ref())
        .bind(sent_at)
        .bind(sent_at)
        .bind(unread_increment)
        .bind(&new.conversation.id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    info!(
        channel = %new.channel,
        direction = new.direction.as_str(),
        conversation_id = %new.conversation.id,
        provider_message_id = new.provider_message_id,
        "stored message"
    );

    Ok(IngestOutcome::Created(Message {
        id: message_id,
        provider_message_id: new.provider_message_id.to_string(),
        conversation_id: new.conversation.id.clone(),
        channel: new.channel,
        direction: new.direction,
        message_type: new.message_type,
        status: new.status,
        content: new.content.map(str::to_string),
        sender_id: new.sender_id.to_string(),
        sender_name: new.sender_name.map(str::to_string),
        recipient_id: new.recipient_id.to_string(),
        sent_at: new.sent_at,
        delivered_at: None,
        read_at: None,
        attachments,
    }))
}

async fn insert_attachments(
    conn: &mut AnyConnection,
    kind: DbKind,
    message_id: &str,
    descriptors: &[AttachmentDescriptor],
) -> InboxResult<Vec<Attachment>> {
    let sql = rewrite_sql(
        r#"INSERT INTO attachments (id, message_id, position, kind, url, media_id, mime_type, filename)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        kind,
    );
    let mut stored = Vec::with_capacity(descriptors.len());
    for (position, descriptor) in descriptors.iter().enumerate() {
        let attachment = Attachment {
            id: Uuid::new_v4().to_string(),
            message_id: message_id.to_string(),
            position: position as i64,
            kind: descriptor.kind.clone(),
            url: descriptor.url.clone(),
            media_id: descriptor.media_id.clone(),
            mime_type: descriptor.mime_type.clone(),
            filename: descriptor.filename.clone(),
        };
        sqlx::query(sql.as_ref())
            .bind(&attachment.id)
            .bind(&attachment.message_id)
            .bind(attachment.position)
            .bind(&attachment.kind)
            .bind(attachment.url.as_deref())
            .bind(attachment.media_id.as_deref())
            .bind(attachment.mime_type.as_deref())
            .bind(attachment.filename.as_deref())
            .execute(&mut *conn)
            .await?;
        stored.push(attachment);
    }
    Ok(stored)
}

/// Advances a stored message's delivery state. Timestamps only move from
/// unset to set; a receipt never reverts an earlier one. Returns whether a
/// row changed.
pub async fn apply_receipt(
    pool: &AnyPool,
    kind: DbKind,
    receipt: &DeliveryReceipt,
) -> InboxResult<bool> {
    let at = datetime_to_millis(receipt.timestamp);
    let result = match receipt.status {
        DeliveryStatus::Delivered => {
            let sql = rewrite_sql(
                r#"UPDATE messages SET delivered_at = ?, status = ?
                   WHERE channel = ? AND provider_message_id = ? AND delivered_at IS NULL AND read_at IS NULL"#,
                kind,
            );
            sqlx::query(sql.as_ref())
                .bind(at)
                .bind(DeliveryStatus::Delivered.as_str())
                .bind(receipt.channel.as_str())
                .bind(&receipt.provider_message_id)
                .execute(pool)
                .await?
        }
        DeliveryStatus::Read => {
            let sql = rewrite_sql(
                r#"UPDATE messages SET read_at = ?, delivered_at = COALESCE(delivered_at, ?), status = ?
                   WHERE channel = ? AND provider_message_id = ? AND read_at IS NULL"#,
                kind,
            );
            sqlx::query(sql.as_ref())
                .bind(at)
                .bind(at)
                .bind(DeliveryStatus::Read.as_str())
                .bind(receipt.channel.as_str())
                .bind(&receipt.provider_message_id)
                .execute(pool)
                .await?
        }
        DeliveryStatus::Sent | DeliveryStatus::Received => return Ok(false),
    };
    Ok(result.rows_affected() > 0)
}

pub async fn get_message_by_provider_id(
    pool: &AnyPool,
    kind: DbKind,
    channel: Channel,
    provider_message_id: &str,
) -> InboxResult<Option<Message>> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE channel = ? AND provider_message_id = ?"
    );
    let sql = rewrite_sql(&sql, kind);
    let row = sqlx::query(sql.as_ref())
        .bind(channel.as_str())
        .bind(provider_message_id)
        .fetch_optional(pool)
        .await?;
    let Some(row) = row else {
        return Ok(None);
    };
    let mut message = message_from_row(&row)?;
    let mut conn = pool.acquire().await?;
    message.attachments = load_attachments(&mut conn, kind, &message.id).await?;
    Ok(Some(message))
}

pub async fn load_attachments(
    conn: &mut AnyConnection,
    kind: DbKind,
    message_id: &str,
) -> InboxResult<Vec<Attachment>> {
    let sql = format!(
        "SELECT {ATTACHMENT_COLUMNS} FROM attachments WHERE message_id = ? ORDER BY position ASC"
    );
    let sql = rewrite_sql(&sql, kind);
    let rows = sqlx::query(sql.as_ref())
        .bind(message_id)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows
        .iter()
        .map(attachment_from_row)
        .collect::<sqlx::Result<Vec<_>>>()?)
}
