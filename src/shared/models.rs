use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A conversation flow as authored in the dashboard: a node graph plus the
/// trigger keywords that select it for a fresh conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatFlow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub nodes: Vec<FlowNode>,
    #[serde(default)]
    pub edges: Vec<FlowEdge>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub trigger_keywords: Vec<String>,
}

impl ChatFlow {
    pub fn node(&self, id: &str) -> Option<&FlowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn first_node(&self) -> Option<&FlowNode> {
        self.nodes.first()
    }

    pub fn edges_from<'a>(&'a self, source: &'a str) -> impl Iterator<Item = &'a FlowEdge> {
        self.edges.iter().filter(move |e| e.source == source)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowNode {
    pub id: String,
    #[serde(flatten)]
    pub kind: NodeKind,
}

/// Node payloads keyed by the dashboard's `type` tag. The editor stores the
/// payload under a `data` key next to the tag, hence the adjacent tagging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum NodeKind {
    Text(TextData),
    Image(MediaData),
    Pdf(MediaData),
    Video(MediaData),
    Template(TemplateData),
    Buttons(ButtonsData),
    Condition(ConditionData),
    Webhook(WebhookData),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextData {
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaData {
    #[serde(rename = "fileUrl")]
    pub file_url: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateData {
    #[serde(rename = "templateId")]
    pub template_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ButtonsData {
    pub content: Option<String>,
    #[serde(default)]
    pub buttons: Vec<ButtonOption>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionData {
    pub condition: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookData {
    #[serde(rename = "webhookUrl")]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ButtonOption {
    pub id: Option<String>,
    pub text: String,
    pub value: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub condition: Option<String>,
}

/// A chat participant keyed by phone number. `current_flow`/`current_node`
/// are the contact's resume point; omitted fields stay untouched on upsert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_flow: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_node: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<serde_json::Value>,
    pub last_interaction: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_state: Option<ConversationState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationState {
    Active,
    Waiting,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub from: String,
    pub to: String,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub status: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Incoming,
    Outgoing,
    Error,
    Webhook,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookLog {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: LogKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
}

impl WebhookLog {
    fn base(kind: LogKind) -> Self {
        Self {
            id: format!("log_{}", uuid::Uuid::new_v4()),
            kind,
            method: None,
            url: None,
            headers: None,
            body: None,
            response: None,
            status_code: None,
            error_message: None,
            timestamp: Utc::now(),
            phone_number: None,
        }
    }

    pub fn webhook(
        method: &str,
        url: &str,
        headers: Option<serde_json::Value>,
        body: Option<serde_json::Value>,
    ) -> Self {
        Self {
            method: Some(method.to_string()),
            url: Some(url.to_string()),
            headers,
            body,
            ..Self::base(LogKind::Webhook)
        }
    }

    pub fn outgoing(url: &str, status_code: u16, response: Option<serde_json::Value>) -> Self {
        Self {
            method: Some("POST".to_string()),
            url: Some(url.to_string()),
            status_code: Some(status_code),
            response,
            ..Self::base(LogKind::Outgoing)
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            error_message: Some(message),
            ..Self::base(LogKind::Error)
        }
    }
}

/// Singleton daily counters against the provider's messaging limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaQuota {
    pub id: String,
    pub messages_sent_today: i64,
    pub messages_limit: i64,
    pub api_calls_today: i64,
    pub api_calls_limit: i64,
    pub last_reset: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
}

impl MetaQuota {
    pub fn default_row(now: DateTime<Utc>) -> Self {
        Self {
            id: "default".to_string(),
            messages_sent_today: 0,
            messages_limit: 1000,
            api_calls_today: 0,
            api_calls_limit: 100_000,
            last_reset: now,
            tier: Some("free".to_string()),
        }
    }

    fn roll(&mut self, now: DateTime<Utc>) {
        if self.last_reset.date_naive() != now.date_naive() {
            self.messages_sent_today = 0;
            self.api_calls_today = 0;
            self.last_reset = now;
        }
    }

    pub fn record_api_call(&mut self, now: DateTime<Utc>) {
        self.roll(now);
        self.api_calls_today += 1;
    }

    pub fn record_sent_message(&mut self, now: DateTime<Utc>) {
        self.roll(now);
        self.messages_sent_today += 1;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppConfigRow {
    pub id: String,
    #[serde(default)]
    pub phone_number: String,
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub verify_token: String,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub is_active: bool,
}
