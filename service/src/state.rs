use std::sync::Arc;

use sqlx::PgPool;

use crate::config::Config;
use crate::notify::Notifier;
use crate::platform::ExecutionPlatform;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub platform: Arc<dyn ExecutionPlatform>,
    pub notifier: Arc<dyn Notifier>,
    pub config: Arc<Config>,
}
