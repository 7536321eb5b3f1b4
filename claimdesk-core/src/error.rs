use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClaimdeskError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}
