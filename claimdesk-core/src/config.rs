use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct ClaimdeskConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub assessment: AssessmentConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub redemption: RedemptionConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub admin: AdminConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// An empty `url` selects the in-memory store (local development only).
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

fn default_max_connections() -> u32 {
    5
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8780,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// `"http"` (storage bucket API) or `"memory"`
    pub backend: String,
    pub base_url: String,
    pub image_bucket: String,
    pub report_bucket: String,
    pub max_upload_bytes: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "http".to_string(),
            base_url: "http://127.0.0.1:54321/storage/v1".to_string(),
            image_bucket: "images".to_string(),
            report_bucket: "pdfs".to_string(),
            max_upload_bytes: 16 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AssessmentConfig {
    pub base_url: String,
    pub model: String,
    /// Upper bound for one whole assessment, retries included
    pub timeout_secs: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl Default for AssessmentConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
            timeout_secs: 90,
            max_retries: 2,
            retry_delay_ms: 1000,
        }
    }
}

impl AssessmentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebhookConfig {
    pub reply_base_url: String,
    pub send_replies: bool,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            reply_base_url: "https://api.line.me".to_string(),
            send_replies: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedemptionConfig {
    pub max_retries: i32,
    pub code_ttl_hours: i64,
    pub max_allocation_attempts: u32,
}

impl Default for RedemptionConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            code_ttl_hours: 24,
            max_allocation_attempts: 100,
        }
    }
}

impl RedemptionConfig {
    pub fn code_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.code_ttl_hours)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReportConfig {
    pub image_fetch_timeout_secs: u64,
    pub max_image_edge: u32,
    pub organization: String,
    pub brand: String,
    pub contact: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            image_fetch_timeout_secs: 10,
            max_image_edge: 800,
            organization: "Drone Koumuten Inc.".to_string(),
            brand: "Roof Leak Doctor".to_string(),
            contact: "https://lin.ee/LTMUhxy".to_string(),
        }
    }
}

impl ReportConfig {
    pub fn image_fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.image_fetch_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AdminConfig {
    /// Actor recorded in the edit history when the caller does not name one
    pub default_actor: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            default_actor: "admin".to_string(),
        }
    }
}

impl ClaimdeskConfig {
    /// Load from a TOML file, then apply `CLAIMDESK__SECTION__KEY` overrides.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("CLAIMDESK").separator("__"))
            .build()?;
        s.try_deserialize()
    }

    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;
        s.try_deserialize()
    }
}

/// Credentials that never live in the config file.
#[derive(Clone, Default)]
pub struct Secrets {
    pub channel_secret: String,
    pub channel_access_token: String,
    pub assessment_api_key: String,
    pub storage_service_key: String,
    pub admin_token: Option<String>,
}

impl Secrets {
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).unwrap_or_default();
        Self {
            channel_secret: var("LINE_CHANNEL_SECRET"),
            channel_access_token: var("LINE_CHANNEL_ACCESS_TOKEN"),
            assessment_api_key: var("OPENAI_API_KEY"),
            storage_service_key: var("STORAGE_SERVICE_KEY"),
            admin_token: std::env::var("ADMIN_API_TOKEN")
                .ok()
                .filter(|t| !t.trim().is_empty()),
        }
    }
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("channel_secret", &!self.channel_secret.is_empty())
            .field("channel_access_token", &!self.channel_access_token.is_empty())
            .field("assessment_api_key", &!self.assessment_api_key.is_empty())
            .field("storage_service_key", &!self.storage_service_key.is_empty())
            .field("admin_token", &self.admin_token.is_some())
            .finish()
    }
}
