pub mod instagram;
pub mod messenger;
pub mod whatsapp;

use crate::config::{ChannelConfig, ChannelsConfig};
use crate::error::{InboxError, InboxResult};
use crate::signature::{tokens_match, verify_signature};
use crate::types::{
    AttachmentDescriptor, CanonicalMessage, Channel, DeliveryReceipt, MessageType,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// One implementation per external network. Handshake and signature checks
/// are shared defaults over the channel's credentials; payload extraction and
/// sending are channel specific.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    fn channel(&self) -> Channel;

    fn config(&self) -> &ChannelConfig;

    /// Returns the challenge to echo back when the subscription handshake is valid.
    fn verify_handshake(
        &self,
        mode: Option<&str>,
        token: Option<&str>,
        challenge: Option<&str>,
    ) -> Option<String> {
        let expected = self.config().verify_token.as_deref()?;
        if mode != Some("subscribe") || !tokens_match(expected, token?) {
            return None;
        }
        challenge.map(str::to_string)
    }

    fn verify_signature(&self, body: &[u8], header: Option<&str>) -> bool {
        let secret = self.config().app_secret.as_deref().unwrap_or_default();
        verify_signature(secret, body, header)
    }

    /// Zero or one message per delivery; `None` for receipts and other events.
    fn extract_message(&self, payload: &Value) -> Option<CanonicalMessage>;

    fn extract_receipts(&self, _payload: &Value) -> Vec<DeliveryReceipt> {
        Vec::new()
    }

    /// Sends a text message and returns the provider's message id.
    async fn send_text(&self, http: &Client, recipient_id: &str, text: &str)
        -> InboxResult<String>;
}

pub type AdapterRegistry = HashMap<Channel, Arc<dyn ChannelAdapter>>;

pub fn adapter_for(channel: Channel, cfg: ChannelConfig) -> Arc<dyn ChannelAdapter> {
    match channel {
        Channel::WhatsApp => Arc::new(whatsapp::WhatsAppAdapter::new(cfg)),
        Channel::Messenger => Arc::new(messenger::MessengerAdapter::new(cfg)),
        Channel::Instagram => Arc::new(instagram::InstagramAdapter::new(cfg)),
    }
}

/// Paths owned by the read surface; a webhook may not claim them.
const RESERVED_PATHS: [&str; 6] = [
    "/v1/health",
    "/v1/status",
    "/v1/conversations",
    "/v1/conversations/:id",
    "/v1/conversations/:id/messages",
    "/v1/messages",
];

/// Builds adapters for every enabled channel. A channel whose webhook path is
/// malformed or already taken is left disabled.
pub fn build_registry(channels: &ChannelsConfig) -> AdapterRegistry {
    let mut taken: HashSet<String> = RESERVED_PATHS.iter().map(|p| p.to_string()).collect();
    let mut registry = AdapterRegistry::new();
    for channel in Channel::ALL {
        let cfg = channels.get(channel);
        if !cfg.enabled {
            continue;
        }
        let path = cfg.route_path(channel);
        if !path.starts_with('/') {
            warn!(%channel, path, "webhook path must start with '/', channel disabled");
            continue;
        }
        if !taken.insert(path.clone()) {
            warn!(%channel, path, "webhook path already in use, channel disabled");
            continue;
        }
        registry.insert(channel, adapter_for(channel, cfg.clone()));
    }
    registry
}

pub(crate) fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

pub(crate) fn millis_timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    let ms = match value? {
        Value::Number(n) => n.as_i64()?,
        Value::String(s) => s.trim().parse::<i64>().ok()?,
        _ => return None,
    };
    DateTime::<Utc>::from_timestamp_millis(ms)
}

pub(crate) fn seconds_timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    let secs = match value? {
        Value::Number(n) => n.as_i64()?,
        Value::String(s) => s.trim().parse::<i64>().ok()?,
        _ => return None,
    };
    DateTime::<Utc>::from_timestamp_millis(secs.checked_mul(1000)?)
}

/// Parses the `entry[].messaging[]` shape shared by Messenger and Instagram.
/// Only the first event carrying a non-echo `message` is taken.
pub(crate) fn extract_messaging_message(
    channel: Channel,
    payload: &Value,
) -> Option<CanonicalMessage> {
    let events = payload
        .get("entry")?
        .as_array()?
        .iter()
        .filter_map(|entry| entry.get("messaging").and_then(Value::as_array))
        .flatten();

    for event in events {
        let Some(message) = event.get("message") else {
            continue;
        };
        if message.get("is_echo").and_then(Value::as_bool) == Some(true) {
            continue;
        }
        let Some(mid) = str_field(message, "mid") else {
            continue;
        };
        let Some(sender_id) = event.get("sender").and_then(|s| str_field(s, "id")) else {
            continue;
        };
        let Some(recipient_id) = event.get("recipient").and_then(|r| str_field(r, "id")) else {
            continue;
        };
        let Some(timestamp) = millis_timestamp(event.get("timestamp")) else {
            debug!(%channel, provider_message_id = mid, "skipping message without a usable timestamp");
            continue;
        };

        let attachments: Vec<AttachmentDescriptor> = message
            .get("attachments")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|att| {
                        let kind = str_field(att, "type")?;
                        let payload = att.get("payload");
                        Some(AttachmentDescriptor {
                            kind: kind.to_string(),
                            url: payload
                                .and_then(|p| str_field(p, "url"))
                                .map(str::to_string),
                            media_id: payload
                                .and_then(|p| str_field(p, "attachment_id"))
                                .map(str::to_string),
                            mime_type: None,
                            filename: payload
                                .and_then(|p| str_field(p, "title"))
                                .map(str::to_string),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        return Some(CanonicalMessage {
            channel,
            sender_id: sender_id.to_string(),
            recipient_id: recipient_id.to_string(),
            sender_name: None,
            provider_message_id: mid.to_string(),
            message_type: MessageType::from_attachments(&attachments),
            text: str_field(message, "text").map(str::to_string),
            attachments,
            timestamp,
        });
    }
    None
}

/// Graph API send shared by Messenger and Instagram; both answer with `message_id`.
pub(crate) async fn send_messaging_text(
    http: &Client,
    cfg: &ChannelConfig,
    channel: Channel,
    recipient_id: &str,
    text: &str,
) -> InboxResult<String> {
    let token = cfg
        .access_token
        .as_deref()
        .ok_or_else(|| InboxError::Provider(format!("{channel} access token missing")))?;
    let sender = cfg.business_id.as_deref().unwrap_or("me");
    let payload = serde_json::json!({
        "recipient": { "id": recipient_id },
        "message": { "text": text },
        "messaging_type": "RESPONSE",
    });
    let resp = http
        .post(format!("{}/{}/messages", cfg.api_base, sender))
        .bearer_auth(token)
        .json(&payload)
        .send()
        .await?;
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(InboxError::Provider(format!(
            "{channel} send failed: {status} {body}"
        )));
    }
    let value: Value = resp.json().await?;
    str_field(&value, "message_id")
        .map(str::to_string)
        .ok_or_else(|| InboxError::Provider(format!("{channel} send returned no message_id")))
}
