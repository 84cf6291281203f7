use crate::db::{contact_from_row, now_millis, rewrite_sql, DbKind, CONTACT_COLUMNS};
use crate::error::InboxResult;
use crate::types::{Channel, Contact};
use sqlx::AnyPool;
use tracing::{debug, info};
use uuid::Uuid;

pub async fn find_contact(
    pool: &AnyPool,
    kind: DbKind,
    channel: Channel,
    external_id: &str,
) -> InboxResult<Option<Contact>> {
    let sql = format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE channel = ? AND external_id = ?");
    let sql = rewrite_sql(&sql, kind);
    let row = sqlx::query(sql.as_ref())
        .bind(channel.as_str())
        .bind(external_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(contact_from_row).transpose()?)
}

pub async fn get_contact(pool: &AnyPool, kind: DbKind, id: &str) -> InboxResult<Option<Contact>> {
    let sql = format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE id = ?");
    let sql = rewrite_sql(&sql, kind);
    let row = sqlx::query(sql.as_ref()).bind(id).fetch_optional(pool).await?;
    Ok(row.as_ref().map(contact_from_row).transpose()?)
}

/// Maps `(channel, external_id)` to its Contact, creating it on first sight.
///
/// The display name is fixed at creation: later deliveries never rename an
/// existing contact. Concurrent first deliveries converge on one row through
/// the `(channel, external_id)` unique constraint; the losing insert is a
/// no-op and the winner's row is read back.
pub async fn resolve_contact(
    pool: &AnyPool,
    kind: DbKind,
    channel: Channel,
    external_id: &str,
    display_name_hint: Option<&str>,
) -> InboxResult<Contact> {
    if let Some(existing) = find_contact(pool, kind, channel, external_id).await? {
        return Ok(existing);
    }

    let display_name = display_name_hint
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| channel.placeholder_name(external_id));
    let phone_number = (channel == Channel::WhatsApp).then(|| external_id.to_string());

    let sql = rewrite_sql(
        r#"INSERT INTO contacts (id, channel, external_id, display_name, phone_number, active, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?)
           ON CONFLICT (channel, external_id) DO NOTHING"#,
        kind,
    );
    let result = sqlx::query(sql.as_ref())
        .bind(Uuid::new_v4().to_string())
        .bind(channel.as_str())
        .bind(external_id)
        .bind(&display_name)
        .bind(phone_number.as_deref())
        .bind(1_i64)
        .bind(now_millis())
        .execute(pool)
        .await?;

    if result.rows_affected() > 0 {
        info!(%channel, external_id, "created contact");
    } else {
        debug!(%channel, external_id, "contact created concurrently, reading back");
    }

    find_contact(pool, kind, channel, external_id)
        .await?
        .ok_or_else(|| sqlx::Error::RowNotFound.into())
}
