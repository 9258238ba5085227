//! Data access for the hosted database backing the dashboard.
//!
//! Everything durable (flows, contacts, messages, logs, quota) lives in the
//! BaaS and is addressed over its REST interface. The trait exists so the
//! executor and the webhook handlers never build REST calls themselves, and
//! so tests can swap in an in-memory store.

mod memory;
mod supabase;

pub use memory::MemoryStore;
pub use supabase::SupabaseStore;

use async_trait::async_trait;
use chrono::Utc;
use log::warn;
use thiserror::Error;

use crate::shared::models::{
    ChatFlow, Contact, MessageRecord, MetaQuota, WebhookLog, WhatsAppConfigRow,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },
}

#[async_trait]
pub trait DataStore: Send + Sync {
    /// Flows with `is_active` set, in authored order.
    async fn active_flows(&self) -> Result<Vec<ChatFlow>, StoreError>;

    async fn contact_by_phone(&self, phone: &str) -> Result<Option<Contact>, StoreError>;

    /// Insert-or-merge by primary key; fields the contact leaves unset are
    /// not touched on an existing row.
    async fn upsert_contact(&self, contact: &Contact) -> Result<(), StoreError>;

    async fn set_contact_position(
        &self,
        phone: &str,
        flow_id: &str,
        node_id: &str,
    ) -> Result<(), StoreError>;

    async fn insert_message(&self, message: &MessageRecord) -> Result<(), StoreError>;

    /// Update the delivery status of the message with the given provider id.
    async fn update_message_status(&self, provider_id: &str, status: &str)
        -> Result<(), StoreError>;

    async fn whatsapp_config(&self) -> Result<Option<WhatsAppConfigRow>, StoreError>;

    async fn quota(&self) -> Result<Option<MetaQuota>, StoreError>;

    async fn put_quota(&self, quota: &MetaQuota) -> Result<(), StoreError>;

    async fn insert_log(&self, entry: &WebhookLog) -> Result<(), StoreError>;
}

/// Read-modify-write of the daily api-call counter. A fetch failure falls
/// back to a fresh default row rather than failing the request; concurrent
/// writers can under-count.
pub async fn bump_api_calls(store: &dyn DataStore) {
    let now = Utc::now();
    let mut quota = match store.quota().await {
        Ok(Some(quota)) => quota,
        Ok(None) => MetaQuota::default_row(now),
        Err(e) => {
            warn!("Failed to fetch quota, using defaults: {}", e);
            MetaQuota::default_row(now)
        }
    };
    quota.record_api_call(now);
    if let Err(e) = store.put_quota(&quota).await {
        warn!("Failed to update api-call quota: {}", e);
    }
}

/// Same contract as [`bump_api_calls`] for the sent-message counter.
pub async fn bump_messages_sent(store: &dyn DataStore) {
    let now = Utc::now();
    let mut quota = match store.quota().await {
        Ok(Some(quota)) => quota,
        Ok(None) => MetaQuota::default_row(now),
        Err(e) => {
            warn!("Failed to fetch quota, using defaults: {}", e);
            MetaQuota::default_row(now)
        }
    };
    quota.record_sent_message(now);
    if let Err(e) = store.put_quota(&quota).await {
        warn!("Failed to update message quota: {}", e);
    }
}
