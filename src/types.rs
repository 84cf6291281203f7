use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    WhatsApp,
    Messenger,
    Instagram,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::WhatsApp, Channel::Messenger, Channel::Instagram];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::WhatsApp => "whatsapp",
            Channel::Messenger => "messenger",
            Channel::Instagram => "instagram",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Channel::WhatsApp => "WhatsApp",
            Channel::Messenger => "Messenger",
            Channel::Instagram => "Instagram",
        }
    }

    /// Phone-number channels thread one conversation per sender; social
    /// channels thread per (sender, business recipient) pair.
    pub fn conversation_key(&self, sender_id: &str, recipient_id: &str) -> String {
        match self {
            Channel::WhatsApp => format!("{}_{}", self.as_str(), sender_id),
            Channel::Messenger | Channel::Instagram => {
                format!("{}_{}_{}", self.as_str(), sender_id, recipient_id)
            }
        }
    }

    pub fn placeholder_name(&self, external_id: &str) -> String {
        format!("{} User {}", self.display_name(), external_id)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "whatsapp" => Ok(Channel::WhatsApp),
            "messenger" => Ok(Channel::Messenger),
            "instagram" => Ok(Channel::Instagram),
            other => Err(format!("unknown channel: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "INBOUND",
            Direction::Outbound => "OUTBOUND",
        }
    }

    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("OUTBOUND") {
            Direction::Outbound
        } else {
            Direction::Inbound
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageType {
    Text,
    Image,
    Video,
    Audio,
    File,
    Other(String),
}

impl MessageType {
    /// Upper-cases a provider's declared attachment kind into the canonical set.
    pub fn from_kind(kind: &str) -> Self {
        match kind.trim().to_uppercase().as_str() {
            "TEXT" => MessageType::Text,
            "IMAGE" => MessageType::Image,
            "VIDEO" => MessageType::Video,
            "AUDIO" => MessageType::Audio,
            "FILE" => MessageType::File,
            other => MessageType::Other(other.to_string()),
        }
    }

    pub fn from_attachments(attachments: &[AttachmentDescriptor]) -> Self {
        attachments
            .first()
            .map(|att| MessageType::from_kind(&att.kind))
            .unwrap_or(MessageType::Text)
    }

    pub fn as_str(&self) -> &str {
        match self {
            MessageType::Text => "TEXT",
            MessageType::Image => "IMAGE",
            MessageType::Video => "VIDEO",
            MessageType::Audio => "AUDIO",
            MessageType::File => "FILE",
            MessageType::Other(kind) => kind.as_str(),
        }
    }
}

impl Serialize for MessageType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MessageType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(MessageType::from_kind(&raw))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeliveryStatus {
    Received,
    Sent,
    Delivered,
    Read,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Received => "RECEIVED",
            DeliveryStatus::Sent => "SENT",
            DeliveryStatus::Delivered => "DELIVERED",
            DeliveryStatus::Read => "READ",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_uppercase().as_str() {
            "RECEIVED" => Some(DeliveryStatus::Received),
            "SENT" => Some(DeliveryStatus::Sent),
            "DELIVERED" => Some(DeliveryStatus::Delivered),
            "READ" => Some(DeliveryStatus::Read),
            _ => None,
        }
    }
}

/// Attachment as declared by the provider, before persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentDescriptor {
    pub kind: String,
    pub url: Option<String>,
    pub media_id: Option<String>,
    pub mime_type: Option<String>,
    pub filename: Option<String>,
}

/// Channel-agnostic shape every adapter normalizes an inbound event into.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalMessage {
    pub channel: Channel,
    pub sender_id: String,
    pub recipient_id: String,
    pub sender_name: Option<String>,
    pub provider_message_id: String,
    pub message_type: MessageType,
    pub text: Option<String>,
    pub attachments: Vec<AttachmentDescriptor>,
    pub timestamp: DateTime<Utc>,
}

impl CanonicalMessage {
    pub fn conversation_key(&self) -> String {
        self.channel
            .conversation_key(&self.sender_id, &self.recipient_id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryReceipt {
    pub channel: Channel,
    pub provider_message_id: String,
    pub status: DeliveryStatus,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    pub channel: Channel,
    pub external_id: String,
    pub display_name: String,
    pub phone_number: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub channel: Channel,
    pub external_key: String,
    pub contact_id: String,
    pub active: bool,
    pub last_message_at: Option<DateTime<Utc>>,
    pub unread_count: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub message_id: String,
    pub position: i64,
    pub kind: String,
    pub url: Option<String>,
    pub media_id: Option<String>,
    pub mime_type: Option<String>,
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub provider_message_id: String,
    pub conversation_id: String,
    pub channel: Channel,
    pub direction: Direction,
    pub message_type: MessageType,
    pub status: DeliveryStatus,
    pub content: Option<String>,
    pub sender_id: String,
    pub sender_name: Option<String>,
    pub recipient_id: String,
    pub sent_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub conversation: Conversation,
    pub contact: Contact,
    pub last_message: Message,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationDetail {
    pub conversation: Conversation,
    pub contact: Contact,
    pub messages: Vec<Message>,
}
