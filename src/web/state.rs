use std::{env, sync::Arc};

use anyhow::{Context, Result};
use sqlx::{PgPool, postgres::PgPoolOptions};

use crate::{config::JournalSettings, llm::LlmClient, web::auth::TokenVerifier};

#[derive(Clone)]
pub struct AppState {
    pool: PgPool,
    settings: Arc<JournalSettings>,
    llm: LlmClient,
    verifier: Arc<TokenVerifier>,
}

impl AppState {
    pub async fn new() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL env var is missing")?;

        let llm = LlmClient::from_env().context("failed to initialize generative client")?;
        let verifier = TokenVerifier::from_env().context("failed to initialize token verifier")?;

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&database_url)
            .await
            .context("failed to connect to Postgres")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run database migrations")?;

        JournalSettings::ensure_defaults(&pool)
            .await
            .context("failed to seed default journal settings")?;
        let settings = JournalSettings::load(&pool)
            .await
            .context("failed to load journal settings")?;

        Ok(Self {
            pool,
            settings: Arc::new(settings),
            llm,
            verifier: Arc::new(verifier),
        })
    }

    pub fn llm_client(&self) -> LlmClient {
        self.llm.clone()
    }

    pub fn pool_ref(&self) -> &PgPool {
        &self.pool
    }

    pub fn journal_settings(&self) -> &JournalSettings {
        &self.settings
    }

    pub fn verifier(&self) -> &TokenVerifier {
        &self.verifier
    }
}
