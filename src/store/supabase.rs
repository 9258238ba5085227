use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{DataStore, StoreError};
use crate::shared::models::{
    ChatFlow, Contact, MessageRecord, MetaQuota, WebhookLog, WhatsAppConfigRow,
};

/// REST client for the hosted Postgres, speaking the PostgREST dialect the
/// dashboard already uses: `?column=eq.value` filters, upserts through
/// `Prefer: resolution=merge-duplicates`, `PATCH` for partial updates.
#[derive(Debug, Clone)]
pub struct SupabaseStore {
    http: Client,
    base_url: String,
    service_key: String,
}

impl SupabaseStore {
    pub fn new(http: Client, base_url: &str, service_key: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key: service_key.to_string(),
        }
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .bearer_auth(&self.service_key)
            .header("apikey", &self.service_key)
    }

    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<T>, StoreError> {
        let url = self.table_url(table);
        let response = self
            .authed(self.http.get(&url))
            .query(query)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(StoreError::Status {
                status: response.status().as_u16(),
                url,
            });
        }
        Ok(response.json().await?)
    }

    async fn select_one<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, &str)],
    ) -> Result<Option<T>, StoreError> {
        let mut rows = self.select(table, query).await?;
        if rows.is_empty() {
            Ok(None)
        } else {
            Ok(Some(rows.remove(0)))
        }
    }

    async fn insert<T: Serialize>(
        &self,
        table: &str,
        row: &T,
        upsert: bool,
    ) -> Result<(), StoreError> {
        let url = self.table_url(table);
        let mut builder = self.authed(self.http.post(&url)).json(row);
        if upsert {
            builder = builder.header("Prefer", "resolution=merge-duplicates");
        }
        let response = builder.send().await?;
        if !response.status().is_success() {
            return Err(StoreError::Status {
                status: response.status().as_u16(),
                url,
            });
        }
        Ok(())
    }

    async fn patch<T: Serialize>(
        &self,
        table: &str,
        filter: (&str, &str),
        patch: &T,
    ) -> Result<(), StoreError> {
        let url = self.table_url(table);
        let response = self
            .authed(self.http.patch(&url))
            .query(&[filter])
            .json(patch)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(StoreError::Status {
                status: response.status().as_u16(),
                url,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DataStore for SupabaseStore {
    async fn active_flows(&self) -> Result<Vec<ChatFlow>, StoreError> {
        self.select("flows", &[("select", "*"), ("is_active", "eq.true")])
            .await
    }

    async fn contact_by_phone(&self, phone: &str) -> Result<Option<Contact>, StoreError> {
        let filter = format!("eq.{}", phone);
        self.select_one("contacts", &[("select", "*"), ("phone", filter.as_str())])
            .await
    }

    async fn upsert_contact(&self, contact: &Contact) -> Result<(), StoreError> {
        self.insert("contacts", contact, true).await
    }

    async fn set_contact_position(
        &self,
        phone: &str,
        flow_id: &str,
        node_id: &str,
    ) -> Result<(), StoreError> {
        let filter = format!("eq.{}", phone);
        self.patch(
            "contacts",
            ("phone", filter.as_str()),
            &serde_json::json!({
                "current_flow": flow_id,
                "current_node": node_id,
            }),
        )
        .await
    }

    async fn insert_message(&self, message: &MessageRecord) -> Result<(), StoreError> {
        self.insert("messages", message, false).await
    }

    async fn update_message_status(
        &self,
        provider_id: &str,
        status: &str,
    ) -> Result<(), StoreError> {
        let filter = format!("eq.{}", provider_id);
        self.patch(
            "messages",
            ("message_id", filter.as_str()),
            &serde_json::json!({ "status": status }),
        )
        .await
    }

    async fn whatsapp_config(&self) -> Result<Option<WhatsAppConfigRow>, StoreError> {
        self.select_one("whatsapp_config", &[("select", "*"), ("id", "eq.default")])
            .await
    }

    async fn quota(&self) -> Result<Option<MetaQuota>, StoreError> {
        self.select_one("meta_quota", &[("select", "*"), ("id", "eq.default")])
            .await
    }

    async fn put_quota(&self, quota: &MetaQuota) -> Result<(), StoreError> {
        self.patch("meta_quota", ("id", "eq.default"), quota).await
    }

    async fn insert_log(&self, entry: &WebhookLog) -> Result<(), StoreError> {
        self.insert("webhook_logs", entry, false).await
    }
}
