use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use claimdesk_core::config::ClaimdeskConfig;
use claimdesk_core::{
    AssessmentBackend, HttpObjectStore, InMemoryObjectStore, LineReplyClient, LogReplySender,
    MemorySessionStore, ObjectStore, PgSessionStore, ReplySender, Secrets, SessionStore,
    VisionAssessmentClient,
};
use sqlx::PgPool;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use claimdesk_server::http::{start_http_server, HttpState};
use claimdesk_server::subsystems::{AdminService, Collaborators, Lifecycle, RandomCodes};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "claimdesk.toml")]
    config: String,

    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Load config
    let config = match ClaimdeskConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Init logging; RUST_LOG wins over service.log_level
    fmt()
        .with_env_filter(log_filter(
            std::env::var(EnvFilter::DEFAULT_ENV).ok(),
            &config.service.log_level,
        ))
        .init();

    let secrets = Secrets::from_env();
    tracing::debug!(?secrets, "Secrets loaded");

    // Connect to DB, or fall back to the in-memory store
    let pool = if config.database.url.trim().is_empty() {
        tracing::warn!("database.url is empty, sessions are kept in memory only");
        None
    } else {
        match claimdesk_core::db::connect(&config.database).await {
            Ok(p) => Some(p),
            Err(e) => {
                eprintln!("Failed to connect to database: {}", e);
                std::process::exit(1);
            }
        }
    };

    if args.health {
        match &pool {
            Some(pool) => match claimdesk_core::db::health_check(pool).await {
                Ok(v) => println!("✅ PostgreSQL connected: {}", v),
                Err(e) => {
                    println!("❌ PostgreSQL connection failed: {}", e);
                    std::process::exit(1);
                }
            },
            None => println!("⚠️  No database configured (in-memory store)"),
        }
        return Ok(());
    }

    let collaborators = build_collaborators(&config, &secrets, pool.clone())?;
    if secrets.channel_secret.is_empty() {
        tracing::warn!("LINE_CHANNEL_SECRET is not set, every webhook will be rejected");
    }
    if secrets.admin_token.is_none() {
        tracing::warn!("ADMIN_API_TOKEN is not set, admin routes are unauthenticated");
    }

    let lifecycle = Arc::new(Lifecycle::new(
        collaborators,
        &config,
        secrets.channel_secret.clone(),
    ));
    let admin = AdminService::new(lifecycle.clone(), config.admin.default_actor.clone());
    let state = Arc::new(HttpState {
        lifecycle,
        admin,
        config: config.clone(),
        pool,
        admin_token: secrets.admin_token.clone(),
    });

    // Shutdown channel
    let (tx, _) = broadcast::channel::<()>(1);

    let tx_ctrl = tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl+C, shutting down...");
            let _ = tx_ctrl.send(());
        }
    });

    tracing::info!("claimdesk server starting");
    start_http_server(state, tx.subscribe()).await?;

    Ok(())
}

fn log_filter(rust_log: Option<String>, log_level: &str) -> EnvFilter {
    if let Some(filter) = rust_log.and_then(|d| EnvFilter::try_new(d).ok()) {
        return filter;
    }
    EnvFilter::try_new(log_level).unwrap_or_else(|e| {
        eprintln!("Invalid service.log_level {:?} ({}), using info", log_level, e);
        EnvFilter::new("info")
    })
}

fn build_collaborators(
    config: &ClaimdeskConfig,
    secrets: &Secrets,
    pool: Option<PgPool>,
) -> anyhow::Result<Collaborators> {
    let store: Arc<dyn SessionStore> = match pool {
        Some(pool) => Arc::new(PgSessionStore::new(pool)),
        None => Arc::new(MemorySessionStore::new()),
    };

    let objects: Arc<dyn ObjectStore> = match config.storage.backend.as_str() {
        "memory" => Arc::new(InMemoryObjectStore::new()),
        "http" => Arc::new(
            HttpObjectStore::new(
                config.storage.base_url.clone(),
                secrets.storage_service_key.clone(),
            )
            .context("object storage client")?,
        ),
        other => anyhow::bail!("unknown storage backend: {}", other),
    };

    let assessor: Arc<dyn AssessmentBackend> = Arc::new(
        VisionAssessmentClient::new(&config.assessment, secrets.assessment_api_key.clone())
            .context("assessment client")?,
    );

    let replies: Arc<dyn ReplySender> = if config.webhook.send_replies {
        Arc::new(
            LineReplyClient::new(
                config.webhook.reply_base_url.clone(),
                secrets.channel_access_token.clone(),
            )
            .context("reply client")?,
        )
    } else {
        Arc::new(LogReplySender)
    };

    tracing::info!(
        store = store.name(),
        objects = objects.name(),
        assessor = assessor.name(),
        replies = replies.name(),
        "Collaborators ready"
    );

    Ok(Collaborators {
        store,
        assessor,
        objects,
        replies,
        codes: Arc::new(RandomCodes),
    })
}
