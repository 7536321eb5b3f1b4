//! Claim-code redemption
//!
//! A text message on the messaging channel is treated as a redemption token:
//! 1. The webhook body must carry a valid HMAC-SHA256 signature (checked
//!    before anything else is touched)
//! 2. The token is trimmed and full-width digits are folded to ASCII
//! 3. Resolution: live session by exact code, else the newest live session
//!    whose phone matches the token
//! 4. Every resolved attempt is charged against the session's retry budget
//! 5. The outcome is turned into reply text; every rejection (`NotFound`,
//!    `Expired`, `RetryLimitExceeded`) shares one wording so callers cannot
//!    tell a wrong code from a used-up one

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use claimdesk_core::messaging::verify_signature;
use claimdesk_core::models::{format_yen, Session};
use claimdesk_core::{AttemptCharge, ReplyMessage, SessionStore, StoreError};
use std::sync::Arc;
use thiserror::Error;

/// Reply for every rejected token.
pub const NOT_FOUND_TEXT: &str = "We could not find a report for that claim code.\n\n\
Please check the 4-digit code shown when your assessment finished. \
Codes are valid for 24 hours and a limited number of uses, so it may have expired. \
Run a new assessment to receive a new code.";

pub const PENDING_TEXT: &str = "Your report is still being prepared.\n\n\
Please send your code again in a few minutes.";

pub const SYSTEM_ERROR_TEXT: &str = "Sorry, something went wrong on our side.\n\n\
Please try again later.";

// ============================================================================
// Signature
// ============================================================================

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing signature header")]
    Missing,

    #[error("signature mismatch")]
    Invalid,
}

impl SignatureError {
    pub fn status(&self) -> StatusCode {
        match self {
            SignatureError::Missing => StatusCode::BAD_REQUEST,
            SignatureError::Invalid => StatusCode::FORBIDDEN,
        }
    }
}

/// Check the raw webhook body against its signature header.
///
/// An unset channel secret rejects everything: an empty HMAC key would be
/// trivially forgeable.
pub fn authenticate(
    channel_secret: &str,
    body: &[u8],
    signature: Option<&str>,
) -> Result<(), SignatureError> {
    let signature = match signature.map(str::trim) {
        Some(s) if !s.is_empty() => s,
        _ => return Err(SignatureError::Missing),
    };
    if channel_secret.is_empty() || !verify_signature(channel_secret, body, signature) {
        return Err(SignatureError::Invalid);
    }
    Ok(())
}

// ============================================================================
// Token normalization
// ============================================================================

/// Trim and fold full-width digits (U+FF10..U+FF19) to ASCII.
pub fn normalize_token(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| match c {
            '０'..='９' => char::from_u32(c as u32 - 0xFF10 + '0' as u32).unwrap_or(c),
            _ => c,
        })
        .collect()
}

// ============================================================================
// Outcomes
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum RedemptionOutcome {
    Success {
        session: Session,
        summary: String,
        report_ref: String,
    },
    /// Resolved, but the report has not been rendered yet
    Pending { session: Session },
    NotFound,
    Expired,
    RetryLimitExceeded,
}

impl RedemptionOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            RedemptionOutcome::Success { .. } => "success",
            RedemptionOutcome::Pending { .. } => "pending",
            RedemptionOutcome::NotFound => "not_found",
            RedemptionOutcome::Expired => "expired",
            RedemptionOutcome::RetryLimitExceeded => "retry_limit_exceeded",
        }
    }

    pub fn reply_messages(&self) -> Vec<ReplyMessage> {
        match self {
            RedemptionOutcome::Success {
                summary,
                report_ref,
                ..
            } => vec![
                ReplyMessage::text(summary.clone()),
                ReplyMessage::text(format!("Report (PDF):\n{}", report_ref)),
            ],
            RedemptionOutcome::Pending { .. } => vec![ReplyMessage::text(PENDING_TEXT)],
            RedemptionOutcome::NotFound
            | RedemptionOutcome::Expired
            | RedemptionOutcome::RetryLimitExceeded => vec![ReplyMessage::text(NOT_FOUND_TEXT)],
        }
    }
}

/// Short reply text describing a session's result.
pub fn summarize(session: &Session) -> String {
    let result = &session.result;
    let mut text = format!(
        "[Assessment report]\n\nName: {}\nSeverity: {}/10\n",
        session.contact.name, result.severity_score
    );

    if result.is_not_applicable() {
        text.push_str(
            "\nNot applicable: no building damage or signs of a leak were found.\n\
             Please upload suitable photos and run the assessment again.",
        );
        return text;
    }

    text.push_str(&format!(
        "\nFirst-aid estimate: {}\nRepair estimate: {} – {}\nInsurance: likely applicable ({})\n\n\
         The full report is linked below.",
        format_yen(result.first_aid_cost),
        format_yen(result.estimated_cost_min),
        format_yen(result.estimated_cost_max),
        result.insurance_likelihood.label(),
    ));
    text
}

// ============================================================================
// Redeemer
// ============================================================================

#[derive(Clone)]
pub struct Redeemer {
    store: Arc<dyn SessionStore>,
}

impl Redeemer {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    async fn resolve(&self, token: &str, now: DateTime<Utc>) -> Result<Option<Session>, StoreError> {
        if let Some(session) = self.store.find_live_by_code(token, now).await? {
            return Ok(Some(session));
        }
        let session = self.store.find_live_by_phone(token, now).await?;
        if session.is_some() {
            tracing::debug!("Token resolved through phone fallback");
        }
        Ok(session)
    }

    /// Resolve and charge one redemption attempt.
    pub async fn redeem(&self, raw: &str, now: DateTime<Utc>) -> Result<RedemptionOutcome, StoreError> {
        let token = normalize_token(raw);
        if token.is_empty() {
            return Ok(RedemptionOutcome::NotFound);
        }

        let Some(mut session) = self.resolve(&token, now).await? else {
            tracing::info!("Redemption token did not resolve");
            return Ok(RedemptionOutcome::NotFound);
        };

        let charge = self.store.charge_attempt(session.id).await?;

        if session.is_expired(now) {
            self.store.deactivate(session.id, now).await?;
            tracing::info!(session_id = %session.id, "Redemption rejected: expired");
            return Ok(RedemptionOutcome::Expired);
        }

        match charge {
            AttemptCharge::LimitReached => {
                tracing::info!(session_id = %session.id, "Redemption rejected: retry limit");
                return Ok(RedemptionOutcome::RetryLimitExceeded);
            }
            AttemptCharge::Inactive => {
                tracing::info!(session_id = %session.id, "Redemption rejected: deactivated after lookup");
                return Ok(RedemptionOutcome::NotFound);
            }
            AttemptCharge::Charged { retry_count, active } => {
                session.retry_count = retry_count;
                session.active = active;
                if !active {
                    tracing::info!(session_id = %session.id, retry_count, "Session reached retry limit");
                }
            }
        }

        self.store.mark_accessed(session.id, now).await?;
        session.accessed_at = Some(now);

        let outcome = match session.report_ref.clone() {
            Some(report_ref) => {
                let summary = summarize(&session);
                RedemptionOutcome::Success {
                    session,
                    summary,
                    report_ref,
                }
            }
            None => RedemptionOutcome::Pending { session },
        };
        tracing::info!(outcome = outcome.kind(), "Redemption resolved");
        Ok(outcome)
    }
}
