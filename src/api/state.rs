use std::sync::Arc;

use crate::application::ChatService;
use crate::infrastructure::AppConfig;

#[derive(Clone)]
pub struct AppState {
    pub chat: Arc<ChatService>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(chat: Arc<ChatService>, config: AppConfig) -> Self {
        Self {
            chat,
            config: Arc::new(config),
        }
    }
}
