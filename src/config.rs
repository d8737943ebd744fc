use std::path::PathBuf;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_hours: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub upload_dir: PathBuf,
    pub jwt: JwtConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let upload_dir = std::env::var("UPLOAD_DIR")
            .unwrap_or_else(|_| "uploads".into())
            .into();
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "learnhub".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "learnhub-users".into()),
            ttl_hours: std::env::var("JWT_TTL_HOURS")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(24),
        };
        Ok(Self {
            database_url,
            upload_dir,
            jwt,
        })
    }
}
