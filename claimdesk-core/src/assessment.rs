//! Damage assessment collaborator.
//!
//! Provides an `AssessmentBackend` trait with the vision chat-completions
//! implementation used in production. The model is asked for a strict JSON
//! schema so the reply deserializes straight into [`AssessmentResult`], which
//! is then range-checked before anything is persisted.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

use crate::config::AssessmentConfig;
use crate::models::{AssessmentResult, ModelError};

// ============================================================================
// AssessmentBackend trait
// ============================================================================

#[async_trait]
pub trait AssessmentBackend: Send + Sync {
    /// Assess the ordered image references and return a validated result.
    async fn assess(&self, image_refs: &[String]) -> Result<AssessmentResult, AssessmentError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum AssessmentError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Missing content in assessment response")]
    EmptyResponse,

    #[error("Invalid assessment result: {0}")]
    InvalidResult(String),

    #[error("Missing API key")]
    MissingApiKey,

    #[error("All {attempts} retry attempts failed")]
    RetryExhausted { attempts: usize },
}

impl From<ModelError> for AssessmentError {
    fn from(e: ModelError) -> Self {
        AssessmentError::InvalidResult(e.to_string())
    }
}

// ============================================================================
// Prompt and response schema
// ============================================================================

const SYSTEM_PROMPT: &str = "You are an expert in roof and rain-leak damage assessment. \
Analyse the photographs and return an accurate assessment as JSON.";

const USER_PROMPT: &str = "Analyse the attached photographs of a building.\n\
If no building damage or leak traces are visible (pets, people, scenery, food or other \
unrelated images), return 0 for every number, \"none\" for insuranceLikelihood and \
\"not applicable\" for recommendedPlan, and use damageDescription to describe what the \
images show and ask for suitable photographs.\n\
Fields: damageLocations (areas needing repair), damageDescription (details), \
severityScore (integer 1-10, 0 when not applicable), estimatedCostMin and \
estimatedCostMax (repair cost range in yen), firstAidCost (temporary repair in yen), \
insuranceLikelihood (fire insurance coverage: high, medium, low or none), \
recommendedPlan (e.g. on-site survey, first aid, full repair).";

const SCHEMA_NAME: &str = "rain_leak_diagnosis";

fn response_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "damageLocations": { "type": "string" },
            "damageDescription": { "type": "string" },
            "severityScore": { "type": "integer" },
            "estimatedCostMin": { "type": "integer" },
            "estimatedCostMax": { "type": "integer" },
            "firstAidCost": { "type": "integer" },
            "insuranceLikelihood": {
                "type": "string",
                "enum": ["high", "medium", "low", "none"]
            },
            "recommendedPlan": { "type": "string" }
        },
        "required": [
            "damageLocations", "damageDescription", "severityScore",
            "estimatedCostMin", "estimatedCostMax", "firstAidCost",
            "insuranceLikelihood", "recommendedPlan"
        ],
        "additionalProperties": false
    })
}

// ============================================================================
// Chat-completions API structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Value>,
    response_format: Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: Option<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

// ============================================================================
// VisionAssessmentClient
// ============================================================================

#[derive(Debug, Clone)]
pub struct VisionAssessmentClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    max_retries: usize,
    retry_delay_ms: u64,
}

impl VisionAssessmentClient {
    pub fn new(config: &AssessmentConfig, api_key: String) -> Result<Self, AssessmentError> {
        Self::with_base_url(config, api_key, config.base_url.clone())
    }

    /// Create a client with a custom base URL (for testing / integration)
    pub fn with_base_url(
        config: &AssessmentConfig,
        api_key: String,
        base_url: String,
    ) -> Result<Self, AssessmentError> {
        if api_key.is_empty() {
            return Err(AssessmentError::MissingApiKey);
        }

        let client = Client::builder().timeout(config.timeout()).build()?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
            retry_delay_ms: config.retry_delay_ms,
        })
    }

    fn build_request<'a>(&'a self, image_refs: &[String]) -> ChatRequest<'a> {
        let mut content = vec![json!({ "type": "text", "text": USER_PROMPT })];
        content.extend(
            image_refs
                .iter()
                .map(|url| json!({ "type": "image_url", "image_url": { "url": url } })),
        );

        ChatRequest {
            model: &self.model,
            messages: vec![
                json!({ "role": "system", "content": SYSTEM_PROMPT }),
                json!({ "role": "user", "content": content }),
            ],
            response_format: json!({
                "type": "json_schema",
                "json_schema": {
                    "name": SCHEMA_NAME,
                    "strict": true,
                    "schema": response_schema()
                }
            }),
        }
    }

    async fn assess_once(&self, image_refs: &[String]) -> Result<AssessmentResult, AssessmentError> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = self.build_request(image_refs);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorResponse>(&error_body)
                .ok()
                .and_then(|e| e.error)
                .map(|e| e.message)
                .unwrap_or(error_body);

            tracing::error!(code = status.as_u16(), message = %message, "Assessment API error");

            return Err(AssessmentError::Api {
                code: status.as_u16(),
                message,
            });
        }

        let chat: ChatResponse = response.json().await?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(AssessmentError::EmptyResponse)?;

        let result: AssessmentResult = serde_json::from_str(&content)
            .map_err(|e| AssessmentError::InvalidResult(e.to_string()))?;
        result.validate()?;
        Ok(result)
    }
}

#[async_trait]
impl AssessmentBackend for VisionAssessmentClient {
    async fn assess(&self, image_refs: &[String]) -> Result<AssessmentResult, AssessmentError> {
        let retry_strategy = ExponentialBackoff::from_millis(self.retry_delay_ms)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.max_retries);

        let result = Retry::spawn(retry_strategy, || self.assess_once(image_refs)).await;

        match result {
            Ok(r) => Ok(r),
            Err(e) => {
                tracing::error!(
                    attempts = self.max_retries + 1,
                    error = %e,
                    "All assessment attempts failed"
                );
                Err(AssessmentError::RetryExhausted {
                    attempts: self.max_retries + 1,
                })
            }
        }
    }

    fn name(&self) -> &str {
        "vision"
    }
}

// ============================================================================
// TESTS
// ============================================================================
