use crate::channels::ChannelAdapter;
use crate::contacts::resolve_contact;
use crate::conversations::resolve_conversation;
use crate::db::DbKind;
use crate::error::InboxResult;
use crate::messages::{apply_receipt, ingest_message, IngestOutcome};
use crate::types::Message;
use serde_json::Value;
use sqlx::AnyPool;
use tracing::debug;

#[derive(Debug, Clone)]
pub enum DeliveryOutcome {
    /// Nothing in the payload to persist.
    Ignored { receipts_applied: usize },
    Stored(Message),
    Duplicate,
}

/// Runs an already-authenticated payload through resolution and storage.
///
/// Receipts are applied first; then the payload's single message, if any, is
/// threaded: contact → conversation → idempotent insert.
pub async fn process_payload(
    pool: &AnyPool,
    kind: DbKind,
    adapter: &dyn ChannelAdapter,
    payload: &Value,
) -> InboxResult<DeliveryOutcome> {
    let mut receipts_applied = 0;
    for receipt in adapter.extract_receipts(payload) {
        if apply_receipt(pool, kind, &receipt).await? {
            receipts_applied += 1;
        }
    }

    let Some(record) = adapter.extract_message(payload) else {
        debug!(channel = %adapter.channel(), receipts_applied, "delivery carried no message");
        return Ok(DeliveryOutcome::Ignored { receipts_applied });
    };

    let contact = resolve_contact(
        pool,
        kind,
        record.channel,
        &record.sender_id,
        record.sender_name.as_deref(),
    )
    .await?;
    let conversation = resolve_conversation(
        pool,
        kind,
        record.channel,
        &record.conversation_key(),
        &contact,
    )
    .await?;

    match ingest_message(pool, kind, &conversation, &record).await? {
        IngestOutcome::Created(message) => Ok(DeliveryOutcome::Stored(message)),
        IngestOutcome::AlreadyExists => Ok(DeliveryOutcome::Duplicate),
    }
}
