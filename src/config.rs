use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub database_name: String,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let database_name =
            std::env::var("DATABASE_NAME").unwrap_or_else(|_| "userdir".into());
        Ok(Self {
            database_url,
            database_name,
        })
    }
}
