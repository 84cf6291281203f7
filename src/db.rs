use crate::types::{
    Attachment, Channel, Contact, Conversation, DeliveryStatus, Direction, Message, MessageType,
};
use chrono::{DateTime, TimeZone, Utc};
use sqlx::any::AnyRow;
use sqlx::{AnyPool, Row};
use std::borrow::Cow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbKind {
    Sqlite,
    Postgres,
}

pub fn db_kind_from_url(url: &str) -> DbKind {
    let lower = url.to_lowercase();
    if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
        DbKind::Postgres
    } else {
        DbKind::Sqlite
    }
}

pub fn rewrite_sql<'a>(sql: &'a str, kind: DbKind) -> Cow<'a, str> {
    match kind {
        DbKind::Sqlite => Cow::Borrowed(sql),
        DbKind::Postgres => {
            let mut out = String::with_capacity(sql.len() + 8);
            let mut idx = 1;
            for ch in sql.chars() {
                if ch == '?' {
                    out.push('$');
                    out.push_str(&idx.to_string());
                    idx += 1;
                } else {
                    out.push(ch);
                }
            }
            Cow::Owned(out)
        }
    }
}

pub fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or_else(Utc::now)
}

pub fn datetime_to_millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub async fn init_db(pool: &AnyPool, kind: DbKind) -> sqlx::Result<()> {
    let stmts = [
        r#"CREATE TABLE IF NOT EXISTS contacts (
            id TEXT PRIMARY KEY,
            channel TEXT NOT NULL,
            external_id TEXT NOT NULL,
            display_name TEXT NOT NULL,
            phone_number TEXT,
            active BIGINT NOT NULL,
            created_at BIGINT NOT NULL,
            UNIQUE (channel, external_id)
        )"#,
        r#"CREATE TABLE IF NOT EXISTS conversations (
            id TEXT PRIMARY KEY,
            channel TEXT NOT NULL,
            external_key TEXT NOT NULL UNIQUE,
            contact_id TEXT NOT NULL REFERENCES contacts(id),
            active BIGINT NOT NULL,
            last_message_at BIGINT,
            unread_count BIGINT NOT NULL,
            created_at BIGINT NOT NULL
        )"#,
        r#"CREATE INDEX IF NOT EXISTS idx_conversations_recent ON conversations(active, last_message_at)"#,
        r#"CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            provider_message_id TEXT NOT NULL,
            conversation_id TEXT NOT NULL REFERENCES conversations(id),
            channel TEXT NOT NULL,
            direction TEXT NOT NULL,
            message_type TEXT NOT NULL,
            status TEXT NOT NULL,
            content TEXT,
            sender_id TEXT NOT NULL,
            sender_name TEXT,
            recipient_id TEXT NOT NULL,
            sent_at BIGINT NOT NULL,
            delivered_at BIGINT,
            read_at BIGINT,
            created_at BIGINT NOT NULL,
            UNIQUE (channel, provider_message_id)
        )"#,
        r#"CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id, sent_at)"#,
        r#"CREATE TABLE IF NOT EXISTS attachments (
            id TEXT PRIMARY KEY,
            message_id TEXT NOT NULL REFERENCES messages(id),
            position BIGINT NOT NULL,
            kind TEXT NOT NULL,
            url TEXT,
            media_id TEXT,
            mime_type TEXT,
            filename TEXT
        )"#,
        r#"CREATE INDEX IF NOT EXISTS idx_attachments_message ON attachments(message_id, position)"#,
    ];

    for stmt in stmts {
        let sql = rewrite_sql(stmt, kind);
        sqlx::query(sql.as_ref()).execute(pool).await?;
    }

    Ok(())
}

fn decode_channel(raw: String) -> sqlx::Result<Channel> {
    raw.parse::<Channel>()
        .map_err(|err| sqlx::Error::Decode(err.into()))
}

fn optional_time(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.map(millis_to_datetime)
}

pub const CONTACT_COLUMNS: &str =
    "id, channel, external_id, display_name, phone_number, active, created_at";

pub fn contact_from_row(row: &AnyRow) -> sqlx::Result<Contact> {
    Ok(Contact {
        id: row.try_get("id")?,
        channel: decode_channel(row.try_get("channel")?)?,
        external_id: row.try_get("external_id")?,
        display_name: row.try_get("display_name")?,
        phone_number: row.try_get("phone_number")?,
        active: row.try_get::<i64, _>("active")? != 0,
        created_at: millis_to_datetime(row.try_get("created_at")?),
    })
}

pub const CONVERSATION_COLUMNS: &str =
    "id, channel, external_key, contact_id, active, last_message_at, unread_count, created_at";

pub fn conversation_from_row(row: &AnyRow) -> sqlx::Result<Conversation> {
    Ok(Conversation {
        id: row.try_get("id")?,
        channel: decode_channel(row.try_get("channel")?)?,
        external_key: row.try_get("external_key")?,
        contact_id: row.try_get("contact_id")?,
        active: row.try_get::<i64, _>("active")? != 0,
        last_message_at: optional_time(row.try_get("last_message_at")?),
        unread_count: row.try_get("unread_count")?,
        created_at: millis_to_datetime(row.try_get("created_at")?),
    })
}

pub const MESSAGE_COLUMNS: &str = "id, provider_message_id, conversation_id, channel, direction, message_type, status, content, sender_id, sender_name, recipient_id, sent_at, delivered_at, read_at";

/// Decodes a message row; attachments are loaded separately.
pub fn message_from_row(row: &AnyRow) -> sqlx::Result<Message> {
    let direction: String = row.try_get("direction")?;
    let message_type: String = row.try_get("message_type")?;
    let status: String = row.try_get("status")?;
    Ok(Message {
        id: row.try_get("id")?,
        provider_message_id: row.try_get("provider_message_id")?,
        conversation_id: row.try_get("conversation_id")?,
        channel: decode_channel(row.try_get("channel")?)?,
        direction: Direction::parse(&direction),
        message_type: MessageType::from_kind(&message_type),
        status: DeliveryStatus::parse(&status).unwrap_or(DeliveryStatus::Received),
        content: row.try_get("content")?,
        sender_id: row.try_get("sender_id")?,
        sender_name: row.try_get("sender_name")?,
        recipient_id: row.try_get("recipient_id")?,
        sent_at: millis_to_datetime(row.try_get("sent_at")?),
        delivered_at: optional_time(row.try_get("delivered_at")?),
        read_at: optional_time(row.try_get("read_at")?),
        attachments: Vec::new(),
    })
}

pub const ATTACHMENT_COLUMNS: &str =
    "id, message_id, position, kind, url, media_id, mime_type, filename";

pub fn attachment_from_row(row: &AnyRow) -> sqlx::Result<Attachment> {
    Ok(Attachment {
        id: row.try_get("id")?,
        message_id: row.try_get("message_id")?,
        position: row.try_get("position")?,
        kind: row.try_get("kind")?,
        url: row.try_get("url")?,
        media_id: row.try_get("media_id")?,
        mime_type: row.try_get("mime_type")?,
        filename: row.try_get("filename")?,
    })
}

pub async fn count_rows(pool: &AnyPool, table: &str) -> sqlx::Result<i64> {
    let sql = format!("SELECT COUNT(1) FROM {table}");
    sqlx::query_scalar::<_, i64>(&sql).fetch_one(pool).await
}
