use secrecy::Secret;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,

    // Key material for the encrypted patient reference stored on each card
    pub card_encryption_key: Secret<String>,

    // Shared with the upstream gateway that signs staff identity headers
    pub identity_secret: Secret<String>,

    // External patient registry (falls back to the local patients table)
    pub patient_registry_url: Option<String>,
    pub patient_registry_token: Option<Secret<String>>,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Load .env file if it exists (for local development)
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            .add_source(config::Environment::default().separator("__"))
            .build()?;

        Ok(Self {
            database_url: config.get("database_url")?,
            host: config.get("host").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: config.get("port")?,

            card_encryption_key: Secret::new(config.get("card_encryption_key")?),
            identity_secret: Secret::new(config.get("identity_secret")?),

            patient_registry_url: config
                .get::<String>("patient_registry_url")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            patient_registry_token: config
                .get::<String>("patient_registry_token")
                .ok()
                .map(Secret::new),
        })
    }
}
