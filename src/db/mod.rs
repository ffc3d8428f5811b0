mod columns;

pub use columns::{ColumnSet, Table};

use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::config::Config;

/// Database connection pool wrapper
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to PostgreSQL over the transport the configuration selects
    pub async fn connect(config: &Config) -> anyhow::Result<Self> {
        let options = config
            .database
            .connect_options(config.gcp.project_id.as_deref(), config.cloud_run)?;

        if config.cloud_run {
            tracing::info!("Cloud Run mode: connecting through the Cloud SQL proxy socket");
        } else {
            tracing::info!(
                "Local mode: connecting to {}:{}",
                options.get_host(),
                options.get_port()
            );
        }

        let pool = PgPoolOptions::new()
            .max_connections(config.database.max_connections)
            .min_connections(config.database.min_connections)
            .acquire_timeout(config.database.acquire_timeout())
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
