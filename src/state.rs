use std::sync::Arc;

use crate::config::AppConfig;
use crate::store::{MemoryStore, MongoStore, UserStore};
use crate::users::services::UserService;

#[derive(Clone)]
pub struct AppState {
    pub users: UserService,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let store = MongoStore::connect(&config.database_url, &config.database_name).await?;

        Ok(Self::from_parts(Arc::new(store), config))
    }

    pub fn from_parts(store: Arc<dyn UserStore>, config: Arc<AppConfig>) -> Self {
        Self {
            users: UserService::new(store),
            config,
        }
    }

    pub fn fake() -> Self {
        let config = Arc::new(AppConfig {
            database_url: "mongodb://localhost:27017".into(),
            database_name: "userdir-test".into(),
        });

        Self::from_parts(Arc::new(MemoryStore::new()), config)
    }
}
