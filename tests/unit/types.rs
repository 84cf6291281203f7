use channel_inbox::types::{
    AttachmentDescriptor, Channel, DeliveryStatus, Direction, MessageType,
};

fn descriptor(kind: &str) -> AttachmentDescriptor {
    AttachmentDescriptor {
        kind: kind.to_string(),
        url: None,
        media_id: None,
        mime_type: None,
        filename: None,
    }
}

#[test]
fn test_channel_round_trip_names() {
    for channel in Channel::ALL {
        assert_eq!(channel.as_str().parse::<Channel>().unwrap(), channel);
        assert_eq!(channel.to_string(), channel.as_str());
    }
    assert_eq!(" WhatsApp ".parse::<Channel>().unwrap(), Channel::WhatsApp);
    assert!("telegram".parse::<Channel>().is_err());
}

#[test]
fn test_channel_serde_lowercase() {
    assert_eq!(serde_json::to_string(&Channel::Instagram).unwrap(), "\"instagram\"");
    let parsed: Channel = serde_json::from_str("\"messenger\"").unwrap();
    assert_eq!(parsed, Channel::Messenger);
}

#[test]
fn test_conversation_keys() {
    assert_eq!(Channel::WhatsApp.conversation_key("1555", "PN1"), "whatsapp_1555");
    assert_eq!(Channel::Messenger.conversation_key("U1", "P1"), "messenger_U1_P1");
    assert_eq!(Channel::Instagram.conversation_key("U1", "B1"), "instagram_U1_B1");
}

#[test]
fn test_placeholder_names() {
    assert_eq!(Channel::Messenger.placeholder_name("U1"), "Messenger User U1");
    assert_eq!(Channel::WhatsApp.placeholder_name("1555"), "WhatsApp User 1555");
}

#[test]
fn test_message_type_from_kind() {
    assert_eq!(MessageType::from_kind("image"), MessageType::Image);
    assert_eq!(MessageType::from_kind("Video"), MessageType::Video);
    assert_eq!(MessageType::from_kind("audio"), MessageType::Audio);
    assert_eq!(MessageType::from_kind("file"), MessageType::File);
    assert_eq!(
        MessageType::from_kind("location"),
        MessageType::Other("LOCATION".to_string())
    );
}

#[test]
fn test_message_type_from_attachments() {
    assert_eq!(MessageType::from_attachments(&[]), MessageType::Text);
    assert_eq!(
        MessageType::from_attachments(&[descriptor("audio"), descriptor("image")]),
        MessageType::Audio
    );
}

#[test]
fn test_message_type_serializes_as_string() {
    assert_eq!(serde_json::to_string(&MessageType::File).unwrap(), "\"FILE\"");
    let other: MessageType = serde_json::from_str("\"share\"").unwrap();
    assert_eq!(other, MessageType::Other("SHARE".to_string()));
}

#[test]
fn test_direction_and_status_strings() {
    assert_eq!(Direction::Inbound.as_str(), "INBOUND");
    assert_eq!(Direction::parse("outbound"), Direction::Outbound);
    assert_eq!(DeliveryStatus::parse("delivered"), Some(DeliveryStatus::Delivered));
    assert_eq!(DeliveryStatus::parse("failed"), None);
    assert_eq!(DeliveryStatus::Read.as_str(), "READ");
}
