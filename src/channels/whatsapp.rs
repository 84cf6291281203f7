use super::{seconds_timestamp, str_field, ChannelAdapter};
use crate::config::ChannelConfig;
use crate::error::{InboxError, InboxResult};
use crate::types::{
    AttachmentDescriptor, CanonicalMessage, Channel, DeliveryReceipt, DeliveryStatus, MessageType,
};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

const MEDIA_TYPES: [&str; 5] = ["image", "video", "audio", "document", "sticker"];

pub struct WhatsAppAdapter {
    cfg: ChannelConfig,
}

impl WhatsAppAdapter {
    pub fn new(cfg: ChannelConfig) -> Self {
        Self { cfg }
    }
}

/// `entry[].changes[].value` objects of a WhatsApp Cloud API envelope.
fn change_values<'a>(payload: &'a Value) -> impl Iterator<Item = &'a Value> + 'a {
    payload
        .get("entry")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|entry| entry.get("changes").and_then(Value::as_array))
        .flatten()
        .filter_map(|change| change.get("value"))
}

fn profile_name(value: &Value, wa_id: &str) -> Option<String> {
    value
        .get("contacts")?
        .as_array()?
        .iter()
        .find(|contact| str_field(contact, "wa_id") == Some(wa_id))
        .and_then(|contact| contact.get("profile"))
        .and_then(|profile| str_field(profile, "name"))
        .filter(|name| !name.trim().is_empty())
        .map(str::to_string)
}

fn business_recipient(value: &Value) -> String {
    value
        .get("metadata")
        .and_then(|meta| {
            str_field(meta, "phone_number_id").or_else(|| str_field(meta, "display_phone_number"))
        })
        .unwrap_or_default()
        .to_string()
}

pub fn parse_whatsapp_message(payload: &Value) -> Option<CanonicalMessage> {
    for value in change_values(payload) {
        let Some(message) = value
            .get("messages")
            .and_then(Value::as_array)
            .and_then(|messages| messages.first())
        else {
            continue;
        };

        let from = str_field(message, "from")?;
        let id = str_field(message, "id")?;
        let kind = str_field(message, "type").unwrap_or("text");

        let (text, attachments) = if kind == "text" {
            let body = message
                .get("text")
                .and_then(|t| str_field(t, "body"))
                .map(str::to_string);
            (body, Vec::new())
        } else if MEDIA_TYPES.contains(&kind) {
            let media = message.get(kind);
            let declared = if kind == "document" { "file" } else { kind };
            let attachment = AttachmentDescriptor {
                kind: declared.to_string(),
                url: media.and_then(|m| str_field(m, "link")).map(str::to_string),
                media_id: media.and_then(|m| str_field(m, "id")).map(str::to_string),
                mime_type: media
                    .and_then(|m| str_field(m, "mime_type"))
                    .map(str::to_string),
                filename: media
                    .and_then(|m| str_field(m, "filename"))
                    .map(str::to_string),
            };
            let caption = media
                .and_then(|m| str_field(m, "caption"))
                .map(str::to_string);
            (caption, vec![attachment])
        } else {
            debug!(message_type = kind, provider_message_id = id, "skipping unsupported whatsapp message type");
            return None;
        };
        let Some(timestamp) = seconds_timestamp(message.get("timestamp")) else {
            debug!(provider_message_id = id, "skipping whatsapp message without a usable timestamp");
            return None;
        };

        return Some(CanonicalMessage {
            channel: Channel::WhatsApp,
            sender_id: from.to_string(),
            recipient_id: business_recipient(value),
            sender_name: profile_name(value, from),
            provider_message_id: id.to_string(),
            message_type: MessageType::from_attachments(&attachments),
            text,
            attachments,
            timestamp,
        });
    }
    None
}

pub fn parse_whatsapp_statuses(payload: &Value) -> Vec<DeliveryReceipt> {
    change_values(payload)
        .filter_map(|value| value.get("statuses").and_then(Value::as_array))
        .flatten()
        .filter_map(|status| {
            Some(DeliveryReceipt {
                channel: Channel::WhatsApp,
                provider_message_id: str_field(status, "id")?.to_string(),
                status: DeliveryStatus::parse(str_field(status, "status")?)?,
                timestamp: seconds_timestamp(status.get("timestamp"))?,
            })
        })
        .collect()
}

#[async_trait]
impl ChannelAdapter for WhatsAppAdapter {
    fn channel(&self) -> Channel {
        Channel::WhatsApp
    }

    fn config(&self) -> &ChannelConfig {
        &self.cfg
    }

    fn extract_message(&self, payload: &Value) -> Option<CanonicalMessage> {
        parse_whatsapp_message(payload)
    }

    fn extract_receipts(&self, payload: &Value) -> Vec<DeliveryReceipt> {
        parse_whatsapp_statuses(payload)
    }

    async fn send_text(&self, http: &Client, recipient_id: &str, text: &str) -> InboxResult<String> {
        let token = self
            .cfg
            .access_token
            .as_deref()
            .ok_or_else(|| InboxError::Provider("whatsapp access token missing".to_string()))?;
        let phone_number_id = self
            .cfg
            .business_id
            .as_deref()
            .ok_or_else(|| InboxError::Provider("whatsapp phone number id missing".to_string()))?;

        let payload = serde_json::json!({
            "messaging_product": "whatsapp",
            "to": recipient_id,
            "type": "text",
            "text": { "body": text },
        });
        let resp = http
            .post(format!("{}/{}/messages", self.cfg.api_base, phone_number_id))
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(InboxError::Provider(format!(
                "whatsapp send failed: {status} {body}"
            )));
        }

        let value: Value = resp.json().await?;
        value
            .get("messages")
            .and_then(Value::as_array)
            .and_then(|messages| messages.first())
            .and_then(|m| str_field(m, "id"))
            .map(str::to_string)
            .ok_or_else(|| InboxError::Provider("whatsapp send returned no message id".to_string()))
    }
}
