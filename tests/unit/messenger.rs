use channel_inbox::channels::messenger::{parse_messenger_event, MessengerAdapter};
use channel_inbox::channels::ChannelAdapter;
use channel_inbox::config::ChannelConfig;
use channel_inbox::types::{Channel, MessageType};
use serde_json::{json, Value};

fn messaging(event: Value) -> Value {
    json!({
        "object": "page",
        "entry": [{"id": "PAGE1", "time": 1700000000000_i64, "messaging": [event]}]
    })
}

#[test]
fn test_parse_text_event() {
    let payload = messaging(json!({
        "sender": {"id": "U1"},
        "recipient": {"id": "PAGE1"},
        "timestamp": 1700000000123_i64,
        "message": {"mid": "m_1", "text": "hi there"}
    }));
    let msg = parse_messenger_event(&payload).unwrap();
    assert_eq!(msg.channel, Channel::Messenger);
    assert_eq!(msg.sender_id, "U1");
    assert_eq!(msg.recipient_id, "PAGE1");
    assert_eq!(msg.provider_message_id, "m_1");
    assert_eq!(msg.text.as_deref(), Some("hi there"));
    assert_eq!(msg.message_type, MessageType::Text);
    assert!(msg.sender_name.is_none());
    assert_eq!(msg.conversation_key(), "messenger_U1_PAGE1");
}

#[test]
fn test_timestamp_is_millis_unscaled() {
    let payload = messaging(json!({
        "sender": {"id": "U1"},
        "recipient": {"id": "PAGE1"},
        "timestamp": 1700000000123_i64,
        "message": {"mid": "m_ts", "text": "x"}
    }));
    let msg = parse_messenger_event(&payload).unwrap();
    assert_eq!(msg.timestamp.timestamp_millis(), 1_700_000_000_123);
}

#[test]
fn test_attachment_type_from_first_attachment() {
    let payload = messaging(json!({
        "sender": {"id": "U1"},
        "recipient": {"id": "PAGE1"},
        "timestamp": 1700000000000_i64,
        "message": {"mid": "m_att", "attachments": [
            {"type": "video", "payload": {"url": "https://cdn.example/v.mp4"}},
            {"type": "image", "payload": {"url": "https://cdn.example/i.jpg"}}
        ]}
    }));
    let msg = parse_messenger_event(&payload).unwrap();
    assert_eq!(msg.message_type, MessageType::Video);
    assert!(msg.text.is_none());
    assert_eq!(msg.attachments.len(), 2);
    assert_eq!(msg.attachments[1].url.as_deref(), Some("https://cdn.example/i.jpg"));
}

#[test]
fn test_non_message_events_ignored() {
    let delivery = messaging(json!({
        "sender": {"id": "U1"},
        "recipient": {"id": "PAGE1"},
        "delivery": {"mids": ["m_1"], "watermark": 1700000000000_i64}
    }));
    assert!(parse_messenger_event(&delivery).is_none());

    let read = messaging(json!({
        "sender": {"id": "U1"},
        "recipient": {"id": "PAGE1"},
        "read": {"watermark": 1700000000000_i64}
    }));
    assert!(parse_messenger_event(&read).is_none());
}

#[test]
fn test_echo_ignored() {
    let payload = messaging(json!({
        "sender": {"id": "PAGE1"},
        "recipient": {"id": "U1"},
        "timestamp": 1700000000000_i64,
        "message": {"mid": "m_echo", "text": "our reply", "is_echo": true}
    }));
    assert!(parse_messenger_event(&payload).is_none());
}

#[test]
fn test_wrong_object_rejected() {
    let mut payload = messaging(json!({
        "sender": {"id": "U1"},
        "recipient": {"id": "PAGE1"},
        "timestamp": 1700000000000_i64,
        "message": {"mid": "m_1", "text": "hi"}
    }));
    payload["object"] = json!("instagram");
    assert!(parse_messenger_event(&payload).is_none());
}

#[test]
fn test_adapter_has_no_receipts() {
    let adapter = MessengerAdapter::new(ChannelConfig::for_channel(Channel::Messenger));
    assert_eq!(adapter.channel(), Channel::Messenger);
    let payload = messaging(json!({
        "sender": {"id": "U1"},
        "recipient": {"id": "PAGE1"},
        "read": {"watermark": 1700000000000_i64}
    }));
    assert!(adapter.extract_receipts(&payload).is_empty());
}
