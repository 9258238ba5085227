use anyhow::Context;
use std::env;

pub const DEFAULT_VERIFY_TOKEN: &str = "default_verify_token";
pub const DEFAULT_GRAPH_API_BASE: &str = "https://graph.facebook.com/v18.0";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub supabase: SupabaseConfig,
    pub whatsapp: WhatsAppSettings,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    pub url: String,
    pub service_role_key: String,
}

/// Environment-supplied WhatsApp credentials. These are the fallback; a
/// `whatsapp_config` row saved through the dashboard takes precedence at
/// send time.
#[derive(Debug, Clone)]
pub struct WhatsAppSettings {
    pub access_token: String,
    pub phone_number_id: String,
    pub verify_token: String,
    pub graph_api_base: String,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("SERVER_PORT")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(8080),
            },
            supabase: SupabaseConfig {
                url: env::var("SUPABASE_URL").context("SUPABASE_URL is not set")?,
                service_role_key: env::var("SUPABASE_SERVICE_ROLE_KEY")
                    .context("SUPABASE_SERVICE_ROLE_KEY is not set")?,
            },
            whatsapp: WhatsAppSettings {
                access_token: env::var("WHATSAPP_ACCESS_TOKEN").unwrap_or_default(),
                phone_number_id: env::var("WHATSAPP_PHONE_ID").unwrap_or_default(),
                verify_token: env::var("WHATSAPP_VERIFY_TOKEN")
                    .unwrap_or_else(|_| DEFAULT_VERIFY_TOKEN.to_string()),
                graph_api_base: env::var("GRAPH_API_BASE")
                    .unwrap_or_else(|_| DEFAULT_GRAPH_API_BASE.to_string()),
            },
        })
    }
}
