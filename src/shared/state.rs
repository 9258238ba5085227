use crate::shared::config::AppConfig;
use crate::store::DataStore;
use crate::whatsapp::client::MessageSender;
use std::sync::Arc;

pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn DataStore>,
    pub sender: Arc<dyn MessageSender>,
}
