use sqlx::{postgres::PgPoolOptions, PgPool};
use std::sync::Arc;
use std::time::Duration;

use crate::services::encryption::CredentialCipher;

pub mod identity_queries;
pub mod memory;
pub mod queries;
pub mod store;

/// Initialize PostgreSQL connection pool
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

/// Postgres-backed job and identity store.
///
/// Job queries live in [`queries`], identity queries in [`identity_queries`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    cipher: Arc<CredentialCipher>,
}

impl PgStore {
    pub fn new(pool: PgPool, cipher: CredentialCipher) -> Self {
        Self {
            pool,
            cipher: Arc::new(cipher),
        }
    }
}
