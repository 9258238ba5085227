//! Outbound WhatsApp Business Cloud API client.
//!
//! Credentials are resolved on every call: a `whatsapp_config` row saved
//! through the dashboard wins over the environment, so token rotation in the
//! dashboard takes effect without a restart.

use async_trait::async_trait;
use log::{debug, error};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

use crate::shared::config::WhatsAppSettings;
use crate::shared::models::{ButtonOption, WebhookLog};
use crate::store::DataStore;

/// Provider limit on reply buttons per interactive message.
pub const MAX_BUTTONS: usize = 3;
/// Provider limit on a reply button title, in characters.
pub const MAX_BUTTON_TITLE: usize = 20;

#[derive(Debug, Error)]
pub enum SendError {
    #[error("whatsapp credentials are not configured")]
    NotConfigured,
    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("whatsapp api returned {status}: {body}")]
    Api { status: u16, body: String },
}

/// Seam between the flow executor and the provider. Implementations return
/// the provider message id when the provider reports one.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_text(&self, to: &str, body: &str) -> Result<Option<String>, SendError>;

    async fn send_buttons(
        &self,
        to: &str,
        body: &str,
        options: &[ButtonOption],
    ) -> Result<Option<String>, SendError>;

    async fn send_image(
        &self,
        to: &str,
        link: &str,
        caption: Option<&str>,
    ) -> Result<Option<String>, SendError>;

    async fn mark_as_read(&self, message_id: &str) -> Result<(), SendError>;
}

pub struct WhatsAppClient {
    http: Client,
    store: Arc<dyn DataStore>,
    settings: WhatsAppSettings,
}

#[derive(Debug, Deserialize)]
struct GraphSendResponse {
    #[serde(default)]
    messages: Vec<GraphMessageId>,
}

#[derive(Debug, Deserialize)]
struct GraphMessageId {
    id: String,
}

impl WhatsAppClient {
    pub fn new(http: Client, store: Arc<dyn DataStore>, settings: WhatsAppSettings) -> Self {
        Self {
            http,
            store,
            settings,
        }
    }

    /// Dashboard-saved credentials first, environment second.
    async fn credentials(&self) -> Result<(String, String), SendError> {
        if let Ok(Some(config)) = self.store.whatsapp_config().await {
            if config.is_active && !config.access_token.is_empty() && !config.phone_number.is_empty()
            {
                return Ok((config.access_token, config.phone_number));
            }
        }
        if self.settings.access_token.is_empty() || self.settings.phone_number_id.is_empty() {
            return Err(SendError::NotConfigured);
        }
        Ok((
            self.settings.access_token.clone(),
            self.settings.phone_number_id.clone(),
        ))
    }

    async fn dispatch(&self, payload: serde_json::Value) -> Result<Option<String>, SendError> {
        let (access_token, phone_number_id) = self.credentials().await?;
        let url = format!(
            "{}/{}/messages",
            self.settings.graph_api_base.trim_end_matches('/'),
            phone_number_id
        );

        let response = self
            .http
            .post(&url)
            .bearer_auth(&access_token)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("WhatsApp API error {}: {}", status, body);
            self.log_call(&url, status.as_u16(), None).await;
            return Err(SendError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GraphSendResponse = response.json().await?;
        let provider_id = parsed.messages.into_iter().next().map(|m| m.id);
        self.log_call(&url, status.as_u16(), provider_id.as_deref())
            .await;
        Ok(provider_id)
    }

    async fn log_call(&self, url: &str, status: u16, provider_id: Option<&str>) {
        let response = provider_id.map(|id| json!({ "message_id": id }));
        let entry = WebhookLog::outgoing(url, status, response);
        if let Err(e) = self.store.insert_log(&entry).await {
            debug!("Failed to record outgoing call log: {}", e);
        }
    }
}

#[async_trait]
impl MessageSender for WhatsAppClient {
    async fn send_text(&self, to: &str, body: &str) -> Result<Option<String>, SendError> {
        self.dispatch(json!({
            "messaging_product": "whatsapp",
            "to": to,
            "type": "text",
            "text": { "body": body }
        }))
        .await
    }

    async fn send_buttons(
        &self,
        to: &str,
        body: &str,
        options: &[ButtonOption],
    ) -> Result<Option<String>, SendError> {
        if options.len() > MAX_BUTTONS {
            debug!(
                "Dropping {} button option(s) beyond the provider limit",
                options.len() - MAX_BUTTONS
            );
        }
        let buttons: Vec<_> = options
            .iter()
            .take(MAX_BUTTONS)
            .enumerate()
            .map(|(i, option)| {
                let title: String = option.text.chars().take(MAX_BUTTON_TITLE).collect();
                json!({
                    "type": "reply",
                    "reply": {
                        "id": option.id.clone().unwrap_or_else(|| format!("btn_{}", i)),
                        "title": title
                    }
                })
            })
            .collect();

        self.dispatch(json!({
            "messaging_product": "whatsapp",
            "to": to,
            "type": "interactive",
            "interactive": {
                "type": "button",
                "body": { "text": body },
                "action": { "buttons": buttons }
            }
        }))
        .await
    }

    async fn send_image(
        &self,
        to: &str,
        link: &str,
        caption: Option<&str>,
    ) -> Result<Option<String>, SendError> {
        self.dispatch(json!({
            "messaging_product": "whatsapp",
            "to": to,
            "type": "image",
            "image": {
                "link": link,
                "caption": caption.unwrap_or("")
            }
        }))
        .await
    }

    async fn mark_as_read(&self, message_id: &str) -> Result<(), SendError> {
        self.dispatch(json!({
            "messaging_product": "whatsapp",
            "status": "read",
            "message_id": message_id
        }))
        .await
        .map(|_| ())
    }
}
