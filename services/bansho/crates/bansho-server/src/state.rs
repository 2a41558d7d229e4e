//! Shared application state: the Postgres pool backing the credential
//! store and audit log, and the Redis connection backing the rate
//! limiter.

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use bansho_common::schema::SCHEMA_STATEMENTS;

/// Shared state handed to every request handler. Cheap to clone: the
/// Postgres pool and the Redis connection are themselves `Clone`.
#[derive(Clone)]
pub struct AppState {
    pg: PgPool,
    redis: redis::aio::MultiplexedConnection,
}

impl AppState {
    /// Connect to Postgres and Redis, run schema bootstrap, and verify
    /// Redis connectivity with PING.
    pub async fn connect(database_url: &str, redis_url: &str) -> Result<Self> {
        let pg = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .context("failed to connect to Postgres")?;

        bootstrap_schema(&pg).await?;

        let client = redis::Client::open(redis_url).context("failed to create Redis client")?;
        let mut redis = client
            .get_multiplexed_async_connection()
            .await
            .context("failed to connect to Redis")?;

        redis::cmd("PING")
            .query_async::<String>(&mut redis)
            .await
            .context("Redis startup PING failed — is Redis reachable?")?;

        tracing::info!("Postgres and Redis connections ready");

        Ok(Self { pg, redis })
    }

    #[must_use]
    pub fn pg(&self) -> &PgPool {
        &self.pg
    }

    #[must_use]
    pub fn redis(&self) -> redis::aio::MultiplexedConnection {
        self.redis.clone()
    }
}

async fn bootstrap_schema(pg: &PgPool) -> Result<()> {
    for statement in SCHEMA_STATEMENTS {
        sqlx::query(statement)
            .execute(pg)
            .await
            .with_context(|| format!("schema bootstrap statement failed: {statement}"))?;
    }
    Ok(())
}
