use std::sync::Arc;

use crate::config::Config;
use crate::logs::LogStore;
use crate::upload::UploadLimits;

pub struct AppState {
    pub config: Config,
    pub logs: Arc<LogStore>,
}

impl AppState {
    pub fn new(config: Config, logs: Arc<LogStore>) -> Self {
        Self { config, logs }
    }

    pub fn upload_limits(&self) -> UploadLimits {
        UploadLimits {
            dir: self.config.upload_dir.clone(),
            max_bytes: self.config.max_upload_bytes,
        }
    }
}

pub type SharedState = Arc<AppState>;
