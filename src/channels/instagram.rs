use super::{extract_messaging_message, send_messaging_text, ChannelAdapter};
use crate::config::ChannelConfig;
use crate::error::InboxResult;
use crate::types::{CanonicalMessage, Channel};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

pub struct InstagramAdapter {
    cfg: ChannelConfig,
}

impl InstagramAdapter {
    pub fn new(cfg: ChannelConfig) -> Self {
        Self { cfg }
    }
}

pub fn parse_instagram_event(payload: &Value) -> Option<CanonicalMessage> {
    if payload.get("object").and_then(Value::as_str) != Some("instagram") {
        return None;
    }
    extract_messaging_message(Channel::Instagram, payload)
}

#[async_trait]
impl ChannelAdapter for InstagramAdapter {
    fn channel(&self) -> Channel {
        Channel::Instagram
    }

    fn config(&self) -> &ChannelConfig {
        &self.cfg
    }

    fn extract_message(&self, payload: &Value) -> Option<CanonicalMessage> {
        parse_instagram_event(payload)
    }

    async fn send_text(&self, http: &Client, recipient_id: &str, text: &str) -> InboxResult<String> {
        send_messaging_text(http, &self.cfg, Channel::Instagram, recipient_id, text).await
    }
}
