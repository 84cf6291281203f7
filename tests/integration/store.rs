use channel_inbox::channels::{adapter_for, ChannelAdapter};
use channel_inbox::config::ChannelConfig;
use channel_inbox::contacts::resolve_contact;
use channel_inbox::conversations::resolve_conversation;
use channel_inbox::db::{self, count_rows, DbKind};
use channel_inbox::ingest::{process_payload, DeliveryOutcome};
use channel_inbox::messages::{
    apply_receipt, get_message_by_provider_id, ingest_message, record_outbound, IngestOutcome,
};
use channel_inbox::query::{get_conversation, list_conversations, list_recent_messages, Page};
use channel_inbox::types::{
    AttachmentDescriptor, CanonicalMessage, Channel, DeliveryReceipt, DeliveryStatus, Direction,
    MessageType,
};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};
use sqlx::AnyPool;
use std::sync::Arc;
use tempfile::TempDir;

const KIND: DbKind = DbKind::Sqlite;

async fn setup_pool() -> (AnyPool, TempDir) {
    sqlx::any::install_default_drivers();
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("inbox.db");
    let db_url = format!("sqlite://{}?mode=rwc", db_path.to_string_lossy());
    let pool = AnyPool::connect(&db_url).await.unwrap();
    db::init_db(&pool, KIND).await.unwrap();
    (pool, temp_dir)
}

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

fn inbound(channel: Channel, sender: &str, recipient: &str, id: &str, secs: i64) -> CanonicalMessage {
    CanonicalMessage {
        channel,
        sender_id: sender.to_string(),
        recipient_id: recipient.to_string(),
        sender_name: None,
        provider_message_id: id.to_string(),
        message_type: MessageType::Text,
        text: Some(format!("text of {id}")),
        attachments: vec![],
        timestamp: at(secs),
    }
}

async fn thread(pool: &AnyPool, record: &CanonicalMessage) -> channel_inbox::types::Conversation {
    let contact = resolve_contact(
        pool,
        KIND,
        record.channel,
        &record.sender_id,
        record.sender_name.as_deref(),
    )
    .await
    .unwrap();
    resolve_conversation(pool, KIND, record.channel, &record.conversation_key(), &contact)
        .await
        .unwrap()
}

async fn unread(pool: &AnyPool, conversation_id: &str) -> i64 {
    channel_inbox::conversations::get_conversation_record(pool, KIND, conversation_id)
        .await
        .unwrap()
        .unwrap()
        .unread_count
}

fn whatsapp_payload(from: &str, id: &str, timestamp: &str) -> Value {
    json!({
        "object": "whatsapp_business_account",
        "entry": [{"changes": [{"value": {
            "metadata": {"phone_number_id": "PN1"},
            "contacts": [{"profile": {"name": "Grace"}, "wa_id": from}],
            "messages": [{"from": from, "id": id, "timestamp": timestamp, "type": "text", "text": {"body": "hello"}}]
        }}]}]
    })
}

#[tokio::test]
async fn test_duplicate_delivery_stored_once() {
    let (pool, _dir) = setup_pool().await;
    let record = inbound(Channel::Messenger, "U1", "P1", "m_dup", 1_700_000_000);
    let conversation = thread(&pool, &record).await;

    let first = ingest_message(&pool, KIND, &conversation, &record).await.unwrap();
    assert!(matches!(first, IngestOutcome::Created(_)));
    let second = ingest_message(&pool, KIND, &conversation, &record).await.unwrap();
    assert!(matches!(second, IngestOutcome::AlreadyExists));

    assert_eq!(count_rows(&pool, "messages").await.unwrap(), 1);
    assert_eq!(unread(&pool, &conversation.id).await, 1);
}

#[tokio::test]
async fn test_first_delivery_reads_back_null_columns() {
    let (pool, _dir) = setup_pool().await;
    let adapter = adapter_for(Channel::Messenger, ChannelConfig::default());
    let payload = json!({
        "object": "page",
        "entry": [{"messaging": [{
            "sender": {"id": "U_new"}, "recipient": {"id": "P1"},
            "timestamp": 1_700_000_000_000_i64,
            "message": {"mid": "m_first", "text": "first contact"}
        }]}]
    });

    let outcome = process_payload(&pool, KIND, adapter.as_ref(), &payload).await.unwrap();
    let DeliveryOutcome::Stored(message) = outcome else {
        panic!("expected stored message");
    };
    assert!(message.delivered_at.is_none());
    assert!(message.read_at.is_none());
    assert!(message.sender_name.is_none());

    let contact = resolve_contact(&pool, KIND, Channel::Messenger, "U_new", None).await.unwrap();
    assert!(contact.phone_number.is_none());

    let fresh = thread(&pool, &inbound(Channel::Messenger, "U_other", "P1", "m_none", 1)).await;
    assert!(fresh.last_message_at.is_none());
    assert_eq!(fresh.unread_count, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicate_deliveries() {
    let (pool, _dir) = setup_pool().await;
    let record = inbound(Channel::Instagram, "IGU", "IGB", "ig_race", 1_700_000_000);
    let conversation = thread(&pool, &record).await;

    let mut handles = Vec::new();
    for _ in 0..6 {
        let pool = pool.clone();
        let conversation = conversation.clone();
        let record = record.clone();
        handles.push(tokio::spawn(async move {
            ingest_message(&pool, KIND, &conversation, &record).await.unwrap()
        }));
    }
    let outcomes = futures::future::join_all(handles).await;
    let created = outcomes
        .into_iter()
        .map(|res| res.unwrap())
        .filter(|outcome| matches!(outcome, IngestOutcome::Created(_)))
        .count();

    assert_eq!(created, 1);
    assert_eq!(count_rows(&pool, "messages").await.unwrap(), 1);
    assert_eq!(unread(&pool, &conversation.id).await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_contact_resolution_creates_one_row() {
    let (pool, _dir) = setup_pool().await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            resolve_contact(&pool, KIND, Channel::WhatsApp, "15550001", Some("Grace"))
                .await
                .unwrap()
        }));
    }
    let contacts: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|res| res.unwrap())
        .collect();

    assert_eq!(count_rows(&pool, "contacts").await.unwrap(), 1);
    assert!(contacts.iter().all(|c| c.id == contacts[0].id));
    assert_eq!(contacts[0].phone_number.as_deref(), Some("15550001"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_new_conversation_deliveries() {
    let (pool, _dir) = setup_pool().await;
    let mut cfg = ChannelConfig::for_channel(Channel::WhatsApp);
    cfg.enabled = true;
    let adapter: Arc<dyn ChannelAdapter> = adapter_for(Channel::WhatsApp, cfg);

    let mut handles = Vec::new();
    for i in 0..6 {
        let pool = pool.clone();
        let adapter = adapter.clone();
        let payload = whatsapp_payload("15557777", &format!("wamid.{i}"), "1700000000");
        handles.push(tokio::spawn(async move {
            process_payload(&pool, KIND, adapter.as_ref(), &payload).await.unwrap()
        }));
    }
    for res in futures::future::join_all(handles).await {
        assert!(matches!(res.unwrap(), DeliveryOutcome::Stored(_)));
    }

    assert_eq!(count_rows(&pool, "contacts").await.unwrap(), 1);
    assert_eq!(count_rows(&pool, "conversations").await.unwrap(), 1);
    assert_eq!(count_rows(&pool, "messages").await.unwrap(), 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_read_interleaved_with_ingest_keeps_counter_consistent() {
    let (pool, _dir) = setup_pool().await;
    let first = inbound(Channel::Messenger, "U5", "P5", "m_seed", 1_700_000_000);
    let conversation = thread(&pool, &first).await;
    ingest_message(&pool, KIND, &conversation, &first).await.unwrap();

    let mut ingests = Vec::new();
    let mut reads = Vec::new();
    for i in 0..8 {
        let pool_in = pool.clone();
        let conv = conversation.clone();
        let record = inbound(Channel::Messenger, "U5", "P5", &format!("m_{i}"), 1_700_000_001 + i);
        ingests.push(tokio::spawn(async move {
            ingest_message(&pool_in, KIND, &conv, &record).await.unwrap()
        }));
        let pool_read = pool.clone();
        let id = conversation.id.clone();
        reads.push(tokio::spawn(async move {
            get_conversation(&pool_read, KIND, &id).await.unwrap()
        }));
    }
    for res in futures::future::join_all(ingests).await {
        assert!(matches!(res.unwrap(), IngestOutcome::Created(_)));
    }
    for res in futures::future::join_all(reads).await {
        let detail = res.unwrap();
        assert_eq!(detail.conversation.unread_count, 0);
    }

    let still_unread: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM messages WHERE direction = 'INBOUND' AND read_at IS NULL",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(unread(&pool, &conversation.id).await, still_unread);
}

#[tokio::test]
async fn test_messages_listed_by_sent_at() {
    let (pool, _dir) = setup_pool().await;
    let base = inbound(Channel::Messenger, "U1", "P1", "m_base", 0);
    let conversation = thread(&pool, &base).await;

    for (id, secs) in [("m_3", 300), ("m_1", 100), ("m_2", 200)] {
        let record = inbound(Channel::Messenger, "U1", "P1", id, 1_700_000_000 + secs);
        ingest_message(&pool, KIND, &conversation, &record).await.unwrap();
    }

    let detail = get_conversation(&pool, KIND, &conversation.id).await.unwrap();
    let ids: Vec<_> = detail
        .messages
        .iter()
        .map(|m| m.provider_message_id.as_str())
        .collect();
    assert_eq!(ids, ["m_1", "m_2", "m_3"]);
    assert_eq!(
        detail.conversation.last_message_at,
        Some(at(1_700_000_300))
    );
}

#[tokio::test]
async fn test_older_redelivery_does_not_rewind_last_message_at() {
    let (pool, _dir) = setup_pool().await;
    let newer = inbound(Channel::Messenger, "U1", "P1", "m_new", 1_700_000_500);
    let conversation = thread(&pool, &newer).await;
    ingest_message(&pool, KIND, &conversation, &newer).await.unwrap();

    let older = inbound(Channel::Messenger, "U1", "P1", "m_old", 1_700_000_100);
    ingest_message(&pool, KIND, &conversation, &older).await.unwrap();

    let record = channel_inbox::conversations::get_conversation_record(&pool, KIND, &conversation.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.last_message_at, Some(at(1_700_000_500)));
    assert_eq!(record.unread_count, 2);
}

#[tokio::test]
async fn test_get_conversation_marks_read_idempotently() {
    let (pool, _dir) = setup_pool().await;
    let record = inbound(Channel::Instagram, "IGU", "IGB", "ig_1", 1_700_000_000);
    let conversation = thread(&pool, &record).await;
    ingest_message(&pool, KIND, &conversation, &record).await.unwrap();
    assert_eq!(unread(&pool, &conversation.id).await, 1);

    let first = get_conversation(&pool, KIND, &conversation.id).await.unwrap();
    assert_eq!(first.conversation.unread_count, 0);
    let read_at = first.messages[0].read_at;
    assert!(read_at.is_some());
    assert_eq!(first.messages[0].status, DeliveryStatus::Read);

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;

    let second = get_conversation(&pool, KIND, &conversation.id).await.unwrap();
    assert_eq!(second.conversation.unread_count, 0);
    assert_eq!(second.messages[0].read_at, read_at);
}

#[tokio::test]
async fn test_get_unknown_conversation_not_found() {
    let (pool, _dir) = setup_pool().await;
    let err = get_conversation(&pool, KIND, "missing").await.unwrap_err();
    assert!(matches!(err, channel_inbox::InboxError::NotFound));
}

#[tokio::test]
async fn test_whatsapp_seconds_stored_as_millis() {
    let (pool, _dir) = setup_pool().await;
    let mut cfg = ChannelConfig::for_channel(Channel::WhatsApp);
    cfg.enabled = true;
    let adapter = adapter_for(Channel::WhatsApp, cfg);

    let outcome = process_payload(
        &pool,
        KIND,
        adapter.as_ref(),
        &whatsapp_payload("15550002", "wamid.ts", "1700000000"),
    )
    .await
    .unwrap();
    let DeliveryOutcome::Stored(message) = outcome else {
        panic!("expected stored message");
    };

    let raw: i64 = sqlx::query_scalar("SELECT sent_at FROM messages WHERE id = ?")
        .bind(&message.id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(raw, 1_700_000_000_000);
    assert_eq!(message.sent_at.to_rfc3339(), "2023-11-14T22:13:20+00:00");
}

#[tokio::test]
async fn test_sender_with_two_recipients_gets_two_threads() {
    let (pool, _dir) = setup_pool().await;
    let to_r1 = inbound(Channel::Messenger, "U1", "R1", "m_r1", 1_700_000_000);
    let to_r2 = inbound(Channel::Messenger, "U1", "R2", "m_r2", 1_700_000_001);

    let c1 = thread(&pool, &to_r1).await;
    let c2 = thread(&pool, &to_r2).await;

    assert_ne!(c1.id, c2.id);
    assert_eq!(c1.contact_id, c2.contact_id);
    assert_eq!(count_rows(&pool, "contacts").await.unwrap(), 1);
    assert_eq!(count_rows(&pool, "conversations").await.unwrap(), 2);
}

#[tokio::test]
async fn test_display_name_fixed_at_first_contact() {
    let (pool, _dir) = setup_pool().await;
    let first = resolve_contact(&pool, KIND, Channel::Messenger, "U9", None).await.unwrap();
    assert_eq!(first.display_name, "Messenger User U9");
    assert!(first.phone_number.is_none());

    let again = resolve_contact(&pool, KIND, Channel::Messenger, "U9", Some("Real Name"))
        .await
        .unwrap();
    assert_eq!(again.id, first.id);
    assert_eq!(again.display_name, "Messenger User U9");
}

#[tokio::test]
async fn test_attachments_persisted_in_order() {
    let (pool, _dir) = setup_pool().await;
    let mut record = inbound(Channel::Messenger, "U1", "P1", "m_att", 1_700_000_000);
    record.text = None;
    record.attachments = vec![
        AttachmentDescriptor {
            kind: "image".to_string(),
            url: Some("https://cdn.example/a.jpg".to_string()),
            media_id: None,
            mime_type: None,
            filename: None,
        },
        AttachmentDescriptor {
            kind: "file".to_string(),
            url: Some("https://cdn.example/b.pdf".to_string()),
            media_id: None,
            mime_type: None,
            filename: Some("b.pdf".to_string()),
        },
    ];
    record.message_type = MessageType::from_attachments(&record.attachments);
    let conversation = thread(&pool, &record).await;
    ingest_message(&pool, KIND, &conversation, &record).await.unwrap();

    let stored = get_message_by_provider_id(&pool, KIND, Channel::Messenger, "m_att")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.message_type, MessageType::Image);
    assert_eq!(stored.attachments.len(), 2);
    assert_eq!(stored.attachments[0].position, 0);
    assert_eq!(stored.attachments[1].filename.as_deref(), Some("b.pdf"));
}

#[tokio::test]
async fn test_receipts_advance_monotonically() {
    let (pool, _dir) = setup_pool().await;
    let record = inbound(Channel::WhatsApp, "1555", "PN1", "wamid.r", 1_700_000_000);
    let conversation = thread(&pool, &record).await;
    ingest_message(&pool, KIND, &conversation, &record).await.unwrap();

    let receipt = |status, secs| DeliveryReceipt {
        channel: Channel::WhatsApp,
        provider_message_id: "wamid.r".to_string(),
        status,
        timestamp: at(secs),
    };

    assert!(apply_receipt(&pool, KIND, &receipt(DeliveryStatus::Read, 1_700_000_020)).await.unwrap());
    // A late "delivered" must not move the message backwards.
    assert!(!apply_receipt(&pool, KIND, &receipt(DeliveryStatus::Delivered, 1_700_000_010)).await.unwrap());
    assert!(!apply_receipt(&pool, KIND, &receipt(DeliveryStatus::Read, 1_700_000_030)).await.unwrap());

    let stored = get_message_by_provider_id(&pool, KIND, Channel::WhatsApp, "wamid.r")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, DeliveryStatus::Read);
    assert_eq!(stored.read_at, Some(at(1_700_000_020)));
    assert_eq!(stored.delivered_at, Some(at(1_700_000_020)));

    let unknown = DeliveryReceipt {
        provider_message_id: "wamid.unknown".to_string(),
        ..receipt(DeliveryStatus::Delivered, 1_700_000_040)
    };
    assert!(!apply_receipt(&pool, KIND, &unknown).await.unwrap());
    assert_eq!(count_rows(&pool, "messages").await.unwrap(), 1);
}

#[tokio::test]
async fn test_outbound_does_not_increment_unread() {
    let (pool, _dir) = setup_pool().await;
    let record = inbound(Channel::Messenger, "U1", "P1", "m_in", 1_700_000_000);
    let conversation = thread(&pool, &record).await;
    ingest_message(&pool, KIND, &conversation, &record).await.unwrap();

    let outcome = record_outbound(&pool, KIND, &conversation, "m_out", "P1", "U1", "reply", at(1_700_000_060))
        .await
        .unwrap();
    let IngestOutcome::Created(message) = outcome else {
        panic!("expected created outbound");
    };
    assert_eq!(message.direction, Direction::Outbound);
    assert_eq!(message.status, DeliveryStatus::Sent);

    let record = channel_inbox::conversations::get_conversation_record(&pool, KIND, &conversation.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.unread_count, 1);
    assert_eq!(record.last_message_at, Some(at(1_700_000_060)));

    // Reading the thread leaves the outbound message untouched.
    let detail = get_conversation(&pool, KIND, &conversation.id).await.unwrap();
    let outbound = detail.messages.iter().find(|m| m.provider_message_id == "m_out").unwrap();
    assert!(outbound.read_at.is_none());
    assert_eq!(outbound.status, DeliveryStatus::Sent);
}

#[tokio::test]
async fn test_listing_order_filter_and_empty_threads() {
    let (pool, _dir) = setup_pool().await;

    let older = inbound(Channel::Messenger, "U1", "P1", "m_older", 1_700_000_000);
    let newer = inbound(Channel::Instagram, "IGU", "IGB", "ig_newer", 1_700_000_900);
    for record in [&older, &newer] {
        let conversation = thread(&pool, record).await;
        ingest_message(&pool, KIND, &conversation, record).await.unwrap();
    }
    // Thread with no messages yet.
    thread(&pool, &inbound(Channel::Messenger, "U2", "P1", "unused", 0)).await;

    let page = Page::bounded(None, None, 100);
    let all = list_conversations(&pool, KIND, None, page).await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].last_message.provider_message_id, "ig_newer");
    assert_eq!(all[0].contact.external_id, "IGU");
    assert_eq!(all[1].last_message.provider_message_id, "m_older");

    let messenger = list_conversations(&pool, KIND, Some(Channel::Messenger), page)
        .await
        .unwrap();
    assert_eq!(messenger.len(), 1);
    assert_eq!(messenger[0].conversation.channel, Channel::Messenger);

    let limited = list_conversations(&pool, KIND, None, Page::bounded(Some(1), Some(1), 100))
        .await
        .unwrap();
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].last_message.provider_message_id, "m_older");

    let recent = list_recent_messages(&pool, KIND, None, page).await.unwrap();
    let ids: Vec<_> = recent.iter().map(|m| m.provider_message_id.as_str()).collect();
    assert_eq!(ids, ["ig_newer", "m_older"]);
    let ig_only = list_recent_messages(&pool, KIND, Some(Channel::Instagram), page)
        .await
        .unwrap();
    assert_eq!(ig_only.len(), 1);
}
