//! Session lifecycle
//!
//! Submission runs assessment → code allocation + insert → render + upload →
//! customer sync. Only the first two steps can fail the submission; a failed
//! render leaves `report_ref` empty and redemption answers `Pending` until an
//! admin re-renders.
//!
//! The webhook side authenticates the body, de-duplicates events and hands
//! each text message to the [`Redeemer`].

use chrono::{DateTime, Utc};
use claimdesk_core::messaging::WebhookEnvelope;
use claimdesk_core::models::{AssessmentResult, Contact, Session, SessionDraft};
use claimdesk_core::report::REPORT_CONTENT_TYPE;
use claimdesk_core::{
    AssessmentBackend, ClaimdeskConfig, ObjectStore, ObjectStoreError, RenderError, ReplyMessage,
    ReplySender, ReportRenderer, SessionStore, StoreError,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use super::allocator::{AllocationError, ClaimCodeAllocator, CodeGenerator};
use super::redemption::{authenticate, Redeemer, SignatureError, SYSTEM_ERROR_TEXT};

/// Photos required per submission.
pub const REQUIRED_IMAGES: usize = 3;

// ============================================================================
// Errors
// ============================================================================

#[derive(Error, Debug)]
pub enum SubmissionError {
    #[error("{0}")]
    Validation(String),

    #[error("assessment unavailable: {0}")]
    AssessmentUnavailable(String),

    #[error(transparent)]
    Allocation(#[from] AllocationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("render failed: {0}")]
    Render(#[from] RenderError),

    #[error("report upload failed: {0}")]
    Upload(#[from] ObjectStoreError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

// ============================================================================
// Submission types
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubmissionRequest {
    pub customer_name: String,
    pub customer_phone: String,
    pub customer_email: Option<String>,
    pub image_urls: Vec<String>,
}

impl SubmissionRequest {
    /// Check every field before anything is sent or stored.
    pub fn validate(self) -> Result<(Contact, Vec<String>), SubmissionError> {
        let name = self.customer_name.trim();
        let phone = self.customer_phone.trim();
        if name.is_empty() || phone.is_empty() {
            return Err(SubmissionError::Validation(
                "customerName and customerPhone are required".to_string(),
            ));
        }

        let images: Vec<String> = self
            .image_urls
            .iter()
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .collect();
        if images.len() != REQUIRED_IMAGES || self.image_urls.len() != REQUIRED_IMAGES {
            return Err(SubmissionError::Validation(format!(
                "exactly {} images are required, got {}",
                REQUIRED_IMAGES,
                images.len()
            )));
        }

        let email = self
            .customer_email
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty());

        Ok((
            Contact {
                name: name.to_string(),
                phone: phone.to_string(),
                email,
            },
            images,
        ))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionReceipt {
    pub session_id: Uuid,
    pub claim_code: String,
    pub expires_at: DateTime<Utc>,
    pub result: AssessmentResult,
    pub report_ref: Option<String>,
}

/// What one webhook delivery did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WebhookSummary {
    pub redeemed: usize,
    pub ignored: usize,
    pub duplicates: usize,
    pub outcomes: Vec<&'static str>,
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Collaborator handles built once at startup.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn SessionStore>,
    pub assessor: Arc<dyn AssessmentBackend>,
    pub objects: Arc<dyn ObjectStore>,
    pub replies: Arc<dyn ReplySender>,
    pub codes: Arc<dyn CodeGenerator>,
}

pub struct Lifecycle {
    store: Arc<dyn SessionStore>,
    assessor: Arc<dyn AssessmentBackend>,
    objects: Arc<dyn ObjectStore>,
    replies: Arc<dyn ReplySender>,
    allocator: ClaimCodeAllocator,
    renderer: ReportRenderer,
    redeemer: Redeemer,
    channel_secret: String,
    report_bucket: String,
    assessment_timeout: Duration,
    code_ttl: chrono::Duration,
    max_retries: i32,
}

impl Lifecycle {
    pub fn new(collaborators: Collaborators, config: &ClaimdeskConfig, channel_secret: String) -> Self {
        let Collaborators {
            store,
            assessor,
            objects,
            replies,
            codes,
        } = collaborators;

        Self {
            allocator: ClaimCodeAllocator::new(
                store.clone(),
                codes,
                config.redemption.max_allocation_attempts,
            ),
            renderer: ReportRenderer::new(objects.clone(), &config.report),
            redeemer: Redeemer::new(store.clone()),
            store,
            assessor,
            objects,
            replies,
            channel_secret,
            report_bucket: config.storage.report_bucket.clone(),
            assessment_timeout: config.assessment.timeout(),
            code_ttl: config.redemption.code_ttl(),
            max_retries: config.redemption.max_retries,
        }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn objects(&self) -> &Arc<dyn ObjectStore> {
        &self.objects
    }

    pub async fn submit(
        &self,
        request: SubmissionRequest,
        now: DateTime<Utc>,
    ) -> Result<SubmissionReceipt, SubmissionError> {
        let (contact, image_refs) = request.validate()?;

        let result = match tokio::time::timeout(
            self.assessment_timeout,
            self.assessor.assess(&image_refs),
        )
        .await
        {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                tracing::error!(backend = self.assessor.name(), error = %e, "Assessment failed");
                return Err(SubmissionError::AssessmentUnavailable(e.to_string()));
            }
            Err(_) => {
                tracing::error!(
                    backend = self.assessor.name(),
                    timeout = ?self.assessment_timeout,
                    "Assessment timed out"
                );
                return Err(SubmissionError::AssessmentUnavailable(
                    "assessment timed out".to_string(),
                ));
            }
        };

        let draft = SessionDraft::new(
            contact,
            result,
            image_refs,
            now,
            self.code_ttl,
            self.max_retries,
        );
        let session = self.allocator.insert_with_code(draft, now).await?;

        let report_ref = match self.render_and_store(&session).await {
            Ok(reference) => Some(reference),
            Err(e) => {
                tracing::error!(session_id = %session.id, error = %e, "Report rendering failed");
                None
            }
        };

        if let Err(e) = self.store.upsert_customer(&session.contact, now).await {
            tracing::warn!(session_id = %session.id, error = %e, "Customer sync failed");
        }

        tracing::info!(
            session_id = %session.id,
            severity = session.result.severity_score,
            likelihood = %session.result.insurance_likelihood,
            rendered = report_ref.is_some(),
            "Submission complete"
        );

        Ok(SubmissionReceipt {
            session_id: session.id,
            claim_code: session.claim_code,
            expires_at: session.expires_at,
            result: session.result,
            report_ref,
        })
    }

    /// Render the report, upload it under its fixed name and record the ref.
    pub async fn render_and_store(&self, session: &Session) -> Result<String, ReportError> {
        let rendered = self.renderer.render(session).await?;
        let name = format!("{}/{}", self.report_bucket, session.report_object_name());
        let reference = self
            .objects
            .put(&name, rendered.bytes, REPORT_CONTENT_TYPE)
            .await?
            .into_string();
        self.store.set_report(session.id, &reference, Utc::now()).await?;
        Ok(reference)
    }

    /// Handle one signed webhook delivery.
    pub async fn handle_webhook(
        &self,
        body: &[u8],
        signature: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<WebhookSummary, SignatureError> {
        if let Err(e) = authenticate(&self.channel_secret, body, signature) {
            tracing::warn!(error = %e, "Webhook rejected");
            return Err(e);
        }

        let envelope: WebhookEnvelope = match serde_json::from_slice(body) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(error = %e, "Webhook body is not an event envelope");
                return Ok(WebhookSummary::default());
            }
        };

        let mut summary = WebhookSummary::default();
        for event in &envelope.events {
            let Some((reply_token, text)) = event.text_message() else {
                summary.ignored += 1;
                continue;
            };

            if let Some(event_id) = event.webhook_event_id.as_deref() {
                match self.store.record_event(event_id, now).await {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::warn!(event_id, "Duplicate webhook event skipped");
                        summary.duplicates += 1;
                        continue;
                    }
                    Err(e) => tracing::warn!(event_id, error = %e, "Could not record webhook event"),
                }
            }

            let messages = match self.redeemer.redeem(text, now).await {
                Ok(outcome) => {
                    summary.outcomes.push(outcome.kind());
                    outcome.reply_messages()
                }
                Err(e) => {
                    tracing::error!(error = %e, "Redemption failed");
                    summary.outcomes.push("error");
                    vec![ReplyMessage::text(SYSTEM_ERROR_TEXT)]
                }
            };
            summary.redeemed += 1;

            if let Err(e) = self.replies.reply(reply_token, &messages).await {
                tracing::warn!(sender = self.replies.name(), error = %e, "Reply failed");
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(images: usize) -> SubmissionRequest {
        SubmissionRequest {
            customer_name: " Sato ".to_string(),
            customer_phone: "09000001111".to_string(),
            customer_email: Some("  ".to_string()),
            image_urls: (0..images).map(|i| format!("https://img/{}.jpg", i)).collect(),
        }
    }

    #[test]
    fn test_validate_trims_and_drops_blank_email() {
        let (contact, images) = request(3).validate().unwrap();
        assert_eq!(contact.name, "Sato");
        assert_eq!(contact.email, None);
        assert_eq!(images.len(), 3);
    }

    #[test]
    fn test_validate_requires_three_images() {
        for n in [0, 2, 4] {
            let err = request(n).validate().unwrap_err();
            assert!(matches!(err, SubmissionError::Validation(_)), "{} images", n);
        }

        let mut blank = request(3);
        blank.image_urls[1] = " ".to_string();
        assert!(matches!(blank.validate(), Err(SubmissionError::Validation(_))));
    }

    #[test]
    fn test_validate_requires_name_and_phone() {
        let mut r = request(3);
        r.customer_phone = String::new();
        assert!(matches!(r.validate(), Err(SubmissionError::Validation(_))));

        let mut r = request(3);
        r.customer_name = "   ".to_string();
        assert!(matches!(r.validate(), Err(SubmissionError::Validation(_))));
    }
}
