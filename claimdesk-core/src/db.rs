use crate::config::DatabaseConfig;
use sqlx::{postgres::PgPoolOptions, PgPool};

pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await
}

pub async fn health_check(pool: &PgPool) -> Result<String, sqlx::Error> {
    let row: (String,) = sqlx::query_as("SELECT version()").fetch_one(pool).await?;
    Ok(row.0)
}

/// Apply the embedded schema migrations.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// Open the pool and apply migrations when the config asks for it.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, crate::ClaimdeskError> {
    let pool = create_pool(config).await?;
    if config.run_migrations {
        migrate(&pool).await?;
        tracing::info!("Database migrations applied");
    }
    Ok(pool)
}
