use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use super::{DataStore, StoreError};
use crate::shared::models::{
    ChatFlow, Contact, MessageRecord, MetaQuota, WebhookLog, WhatsAppConfigRow,
};

/// In-memory [`DataStore`] used by tests and local experiments. Mirrors the
/// REST store's merge semantics for contact upserts.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    flows: Vec<ChatFlow>,
    contacts: HashMap<String, Contact>,
    messages: Vec<MessageRecord>,
    config: Option<WhatsAppConfigRow>,
    quota: Option<MetaQuota>,
    logs: Vec<WebhookLog>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_flow(&self, flow: ChatFlow) {
        self.inner.lock().unwrap().flows.push(flow);
    }

    pub fn put_config(&self, config: WhatsAppConfigRow) {
        self.inner.lock().unwrap().config = Some(config);
    }

    pub fn contact(&self, phone: &str) -> Option<Contact> {
        self.inner.lock().unwrap().contacts.get(phone).cloned()
    }

    pub fn messages(&self) -> Vec<MessageRecord> {
        self.inner.lock().unwrap().messages.clone()
    }

    pub fn logs(&self) -> Vec<WebhookLog> {
        self.inner.lock().unwrap().logs.clone()
    }

    pub fn quota_row(&self) -> Option<MetaQuota> {
        self.inner.lock().unwrap().quota.clone()
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn active_flows(&self) -> Result<Vec<ChatFlow>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.flows.iter().filter(|f| f.is_active).cloned().collect())
    }

    async fn contact_by_phone(&self, phone: &str) -> Result<Option<Contact>, StoreError> {
        Ok(self.contact(phone))
    }

    async fn upsert_contact(&self, contact: &Contact) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.contacts.get_mut(&contact.phone) {
            Some(existing) => {
                existing.last_interaction = contact.last_interaction;
                if contact.name.is_some() {
                    existing.name = contact.name.clone();
                }
                if contact.conversation_state.is_some() {
                    existing.conversation_state = contact.conversation_state;
                }
                if contact.current_flow.is_some() {
                    existing.current_flow = contact.current_flow.clone();
                }
                if contact.current_node.is_some() {
                    existing.current_node = contact.current_node.clone();
                }
            }
            None => {
                inner.contacts.insert(contact.phone.clone(), contact.clone());
            }
        }
        Ok(())
    }

    async fn set_contact_position(
        &self,
        phone: &str,
        flow_id: &str,
        node_id: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(contact) = inner.contacts.get_mut(phone) {
            contact.current_flow = Some(flow_id.to_string());
            contact.current_node = Some(node_id.to_string());
        }
        Ok(())
    }

    async fn insert_message(&self, message: &MessageRecord) -> Result<(), StoreError> {
        self.inner.lock().unwrap().messages.push(message.clone());
        Ok(())
    }

    async fn update_message_status(
        &self,
        provider_id: &str,
        status: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        for message in inner
            .messages
            .iter_mut()
            .filter(|m| m.message_id.as_deref() == Some(provider_id))
        {
            message.status = status.to_string();
        }
        Ok(())
    }

    async fn whatsapp_config(&self) -> Result<Option<WhatsAppConfigRow>, StoreError> {
        Ok(self.inner.lock().unwrap().config.clone())
    }

    async fn quota(&self) -> Result<Option<MetaQuota>, StoreError> {
        Ok(self.inner.lock().unwrap().quota.clone())
    }

    async fn put_quota(&self, quota: &MetaQuota) -> Result<(), StoreError> {
        self.inner.lock().unwrap().quota = Some(quota.clone());
        Ok(())
    }

    async fn insert_log(&self, entry: &WebhookLog) -> Result<(), StoreError> {
        self.inner.lock().unwrap().logs.push(entry.clone());
        Ok(())
    }
}
