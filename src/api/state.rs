use std::sync::Arc;

use crate::core::AppConfig;
use crate::mail::MailTransport;

pub struct AppState {
    pub config: AppConfig,
    pub transport: Arc<dyn MailTransport>,
}

impl AppState {
    pub fn new(config: AppConfig, transport: Arc<dyn MailTransport>) -> Self {
        Self { config, transport }
    }
}
