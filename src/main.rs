use anyhow::Context;
use dotenvy::dotenv;
use log::info;
use std::sync::Arc;

use parishbot::server::build_router;
use parishbot::shared::config::AppConfig;
use parishbot::shared::state::AppState;
use parishbot::store::{DataStore, SupabaseStore};
use parishbot::whatsapp::client::{MessageSender, WhatsAppClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = AppConfig::from_env()?;
    let http = reqwest::Client::new();

    let store: Arc<dyn DataStore> = Arc::new(SupabaseStore::new(
        http.clone(),
        &config.supabase.url,
        &config.supabase.service_role_key,
    ));
    let sender: Arc<dyn MessageSender> = Arc::new(WhatsAppClient::new(
        http,
        store.clone(),
        config.whatsapp.clone(),
    ));

    let state = Arc::new(AppState {
        config,
        store,
        sender,
    });

    let addr = format!(
        "{}:{}",
        state.config.server.host, state.config.server.port
    );
    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, build_router(state)).await?;

    Ok(())
}
