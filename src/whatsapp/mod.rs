//! WhatsApp Business webhook endpoint.
//!
//! GET handles Meta's subscription verification, POST receives event
//! envelopes. Every inbound message is logged, counted against the daily
//! quota, persisted, and handed to the flow executor; per-message failures
//! are isolated so the endpoint keeps acknowledging the provider.

pub mod client;

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{TimeZone, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::flow::{FlowExecutor, InboundMessage};
use crate::shared::models::{Contact, ConversationState, MessageRecord, WebhookLog};
use crate::shared::state::AppState;
use crate::store;

#[derive(Debug, Deserialize)]
pub struct WebhookVerifyQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsAppWebhook {
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub entry: Vec<WhatsAppEntry>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsAppEntry {
    pub id: String,
    #[serde(default)]
    pub changes: Vec<WhatsAppChange>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsAppChange {
    #[serde(default)]
    pub field: String,
    pub value: WhatsAppValue,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsAppValue {
    #[serde(default)]
    pub messaging_product: String,
    #[serde(default)]
    pub metadata: WhatsAppMetadata,
    #[serde(default)]
    pub contacts: Vec<WhatsAppContact>,
    #[serde(default)]
    pub messages: Vec<WhatsAppMessage>,
    #[serde(default)]
    pub statuses: Vec<WhatsAppStatus>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct WhatsAppMetadata {
    pub display_phone_number: Option<String>,
    pub phone_number_id: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsAppContact {
    pub wa_id: String,
    pub profile: WhatsAppProfile,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsAppProfile {
    pub name: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsAppMessage {
    pub id: String,
    pub from: String,
    pub timestamp: String,
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub text: Option<WhatsAppText>,
    #[serde(default)]
    pub image: Option<WhatsAppMedia>,
    #[serde(default)]
    pub audio: Option<WhatsAppMedia>,
    #[serde(default)]
    pub video: Option<WhatsAppMedia>,
    #[serde(default)]
    pub document: Option<WhatsAppMedia>,
    #[serde(default)]
    pub interactive: Option<WhatsAppInteractive>,
    #[serde(default)]
    pub button: Option<WhatsAppButton>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsAppText {
    pub body: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsAppMedia {
    pub id: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub sha256: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsAppInteractive {
    #[serde(rename = "type")]
    pub interactive_type: String,
    #[serde(default)]
    pub button_reply: Option<WhatsAppButtonReply>,
    #[serde(default)]
    pub list_reply: Option<WhatsAppListReply>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsAppButtonReply {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsAppListReply {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsAppButton {
    pub payload: String,
    pub text: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WhatsAppStatus {
    pub id: String,
    pub status: String,
    pub timestamp: String,
    pub recipient_id: String,
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/webhook/whatsapp", get(verify_webhook))
        .route("/webhook/whatsapp", post(handle_webhook))
        .route("/api/whatsapp/send", post(send_message))
}

pub async fn verify_webhook(
    State(state): State<Arc<AppState>>,
    Query(params): Query<WebhookVerifyQuery>,
) -> impl IntoResponse {
    info!("WhatsApp webhook verification request received");
    record_log(
        &state,
        WebhookLog::webhook("GET", "/webhook/whatsapp", None, None),
    )
    .await;

    let mode = params.mode.unwrap_or_default();
    if mode != "subscribe" {
        warn!("Invalid webhook verification mode: {}", mode);
        return (
            StatusCode::BAD_REQUEST,
            "Invalid verification request".to_string(),
        );
    }

    let expected = verify_token(&state).await;
    if params.verify_token.as_deref() == Some(expected.as_str()) {
        info!("Webhook verification successful");
        (StatusCode::OK, params.challenge.unwrap_or_default())
    } else {
        warn!("Invalid verify token");
        (StatusCode::FORBIDDEN, "Invalid verify token".to_string())
    }
}

/// Dashboard-saved verify token first, environment fallback second.
async fn verify_token(state: &Arc<AppState>) -> String {
    if let Ok(Some(config)) = state.store.whatsapp_config().await {
        if !config.verify_token.is_empty() {
            return config.verify_token;
        }
    }
    state.config.whatsapp.verify_token.clone()
}

pub async fn handle_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    record_log(
        &state,
        WebhookLog::webhook(
            "POST",
            "/webhook/whatsapp",
            Some(headers_to_json(&headers)),
            serde_json::from_str(&body).ok(),
        ),
    )
    .await;

    let payload: WhatsAppWebhook = match serde_json::from_str(&body) {
        Ok(payload) => payload,
        Err(e) => {
            error!("Malformed webhook payload: {}", e);
            record_log(
                &state,
                WebhookLog::error(format!("malformed webhook payload: {}", e)),
            )
            .await;
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Internal server error" })),
            );
        }
    };

    for entry in payload.entry {
        for change in entry.changes {
            if change.field != "messages" {
                continue;
            }
            let contact = change.value.contacts.first();
            let contact_name = contact.map(|c| c.profile.name.clone());
            let contact_phone = contact.map(|c| c.wa_id.clone());

            for message in &change.value.messages {
                if let Err(e) = process_incoming_message(
                    &state,
                    message,
                    contact_name.clone(),
                    contact_phone.clone(),
                )
                .await
                {
                    error!("Failed to process WhatsApp message {}: {}", message.id, e);
                }
            }

            for status in &change.value.statuses {
                debug!(
                    "Message {} status: {} for {}",
                    status.id, status.status, status.recipient_id
                );
                if let Err(e) = state
                    .store
                    .update_message_status(&status.id, &status.status)
                    .await
                {
                    warn!("Failed to update status of {}: {}", status.id, e);
                }
            }
        }
    }

    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

async fn process_incoming_message(
    state: &Arc<AppState>,
    message: &WhatsAppMessage,
    contact_name: Option<String>,
    contact_phone: Option<String>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let phone = contact_phone.unwrap_or_else(|| message.from.clone());
    info!(
        "Processing WhatsApp message from {}: type={}",
        phone, message.message_type
    );

    store::bump_api_calls(state.store.as_ref()).await;

    let content = extract_message_content(message);
    let record = MessageRecord {
        id: format!("msg_{}", Uuid::new_v4()),
        from: phone.clone(),
        to: "bot".to_string(),
        content: content.clone(),
        kind: message.message_type.clone(),
        message_id: Some(message.id.clone()),
        status: "received".to_string(),
        timestamp: message_timestamp(&message.timestamp),
        flow_id: None,
        node_id: None,
    };
    state.store.insert_message(&record).await?;

    let contact = Contact {
        id: format!("contact_{}", phone),
        phone: phone.clone(),
        name: contact_name.clone(),
        current_flow: None,
        current_node: None,
        variables: None,
        last_interaction: Utc::now(),
        conversation_state: Some(ConversationState::Active),
    };
    state.store.upsert_contact(&contact).await?;

    if let Err(e) = state.sender.mark_as_read(&message.id).await {
        debug!("Failed to mark {} as read: {}", message.id, e);
    }

    if content.is_empty() {
        debug!("Empty message content, skipping flow execution");
        return Ok(());
    }

    let executor = FlowExecutor::new(state.store.clone(), state.sender.clone());
    let outcome = executor
        .handle_inbound(&InboundMessage {
            phone,
            name: contact_name,
            content,
            provider_id: message.id.clone(),
        })
        .await;
    debug!("Flow outcome for {}: {:?}", message.id, outcome);

    Ok(())
}

fn extract_message_content(message: &WhatsAppMessage) -> String {
    match message.message_type.as_str() {
        "text" => message
            .text
            .as_ref()
            .map(|t| t.body.clone())
            .unwrap_or_default(),
        "interactive" => {
            if let Some(interactive) = &message.interactive {
                match interactive.interactive_type.as_str() {
                    "button_reply" => interactive
                        .button_reply
                        .as_ref()
                        .map(|b| b.title.clone())
                        .unwrap_or_default(),
                    "list_reply" => interactive
                        .list_reply
                        .as_ref()
                        .map(|l| l.title.clone())
                        .unwrap_or_default(),
                    _ => String::new(),
                }
            } else {
                String::new()
            }
        }
        "button" => message
            .button
            .as_ref()
            .map(|b| b.text.clone())
            .unwrap_or_default(),
        _ => String::new(),
    }
}

/// The provider stamps messages with unix seconds as a string.
fn message_timestamp(raw: &str) -> chrono::DateTime<Utc> {
    raw.parse::<i64>()
        .ok()
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .unwrap_or_else(Utc::now)
}

fn headers_to_json(headers: &HeaderMap) -> serde_json::Value {
    let map: serde_json::Map<String, serde_json::Value> = headers
        .iter()
        .map(|(name, value)| {
            (
                name.to_string(),
                json!(value.to_str().unwrap_or_default()),
            )
        })
        .collect();
    serde_json::Value::Object(map)
}

async fn record_log(state: &Arc<AppState>, entry: WebhookLog) {
    if let Err(e) = state.store.insert_log(&entry).await {
        debug!("Failed to record webhook log: {}", e);
    }
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub to: String,
    pub message: String,
}

/// Manual send used by the dashboard's message panel.
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SendMessageRequest>,
) -> impl IntoResponse {
    info!("Sending WhatsApp message to {}", request.to);

    match state.sender.send_text(&request.to, &request.message).await {
        Ok(provider_id) => {
            let record = MessageRecord {
                id: format!("msg_{}", Uuid::new_v4()),
                from: "bot".to_string(),
                to: request.to.clone(),
                content: request.message.clone(),
                kind: "text".to_string(),
                message_id: provider_id,
                status: "sent".to_string(),
                timestamp: Utc::now(),
                flow_id: None,
                node_id: None,
            };
            if let Err(e) = state.store.insert_message(&record).await {
                error!("Failed to record manual message: {}", e);
            }
            store::bump_messages_sent(state.store.as_ref()).await;
            (
                StatusCode::OK,
                Json(json!({ "success": true, "message": "Message sent" })),
            )
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "success": false, "error": e.to_string() })),
        ),
    }
}
