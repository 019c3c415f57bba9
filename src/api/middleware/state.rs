use std::sync::Arc;

use axum::extract::FromRef;
use secrecy::ExposeSecret;
use sqlx::PgPool;

use crate::config::Config;
use crate::services::{
    card_renderer::{CardRenderer, SvgCardSheetRenderer},
    encryption,
    patient_registry::{PatientRegistry, RegistryError},
};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub card_key: [u8; 32],
    pub registry: Arc<PatientRegistry>,
    pub renderer: Arc<dyn CardRenderer>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Result<Self, RegistryError> {
        let card_key = encryption::derive_key(config.card_encryption_key.expose_secret());
        let registry = PatientRegistry::from_config(&config)?;

        Ok(Self {
            pool,
            config,
            card_key,
            registry: Arc::new(registry),
            renderer: Arc::new(SvgCardSheetRenderer),
        })
    }

    /// Swaps the print renderer
    pub fn with_renderer(mut self, renderer: Arc<dyn CardRenderer>) -> Self {
        self.renderer = renderer;
        self
    }
}

impl FromRef<AppState> for PgPool {
    fn from_ref(state: &AppState) -> PgPool {
        state.pool.clone()
    }
}
