use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::result::{normalize_result, AssessmentResult, ModelError, ResultColumns};

/// Workflow label given to new sessions on the admin side
pub const DEFAULT_ADMIN_STATUS: &str = "open";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
}

/// One submitted assessment and everything derived from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: Uuid,
    pub claim_code: String,
    pub contact: Contact,
    pub result: AssessmentResult,
    pub image_refs: Vec<String>,
    pub report_ref: Option<String>,
    /// Set when the result was edited after the report was rendered
    pub report_stale: bool,
    pub admin_status: String,
    pub retry_count: i32,
    pub max_retries: i32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub accessed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Redeemable right now: active and inside its validity window.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.active && !self.is_expired(now)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    pub fn report_object_name(&self) -> String {
        report_object_name(self.id)
    }
}

pub fn report_object_name(id: Uuid) -> String {
    format!("diagnosis_{}.pdf", id)
}

/// A session that has its result but no claim code yet.
#[derive(Debug, Clone)]
pub struct SessionDraft {
    pub id: Uuid,
    pub contact: Contact,
    pub result: AssessmentResult,
    pub image_refs: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub max_retries: i32,
}

impl SessionDraft {
    pub fn new(
        contact: Contact,
        result: AssessmentResult,
        image_refs: Vec<String>,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
        max_retries: i32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            contact,
            result,
            image_refs,
            created_at: now,
            expires_at: now + ttl,
            max_retries,
        }
    }

    pub fn with_code(self, claim_code: String) -> Session {
        Session {
            id: self.id,
            claim_code,
            contact: self.contact,
            result: self.result,
            image_refs: self.image_refs,
            report_ref: None,
            report_stale: false,
            admin_status: DEFAULT_ADMIN_STATUS.to_string(),
            retry_count: 0,
            max_retries: self.max_retries,
            active: true,
            created_at: self.created_at,
            expires_at: self.expires_at,
            accessed_at: None,
            updated_at: self.created_at,
        }
    }
}

/// Raw `diagnosis_sessions` row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SessionRow {
    pub id: Uuid,
    pub secret_code: String,
    pub customer_name: String,
    pub customer_phone: String,
    pub customer_email: Option<String>,
    pub damage_locations: Option<String>,
    pub damage_description: Option<String>,
    pub severity_score: Option<i32>,
    pub estimated_cost_min: Option<i64>,
    pub estimated_cost_max: Option<i64>,
    pub first_aid_cost: Option<i64>,
    pub insurance_likelihood: Option<String>,
    pub recommended_plan: Option<String>,
    pub diagnosis_result: Option<serde_json::Value>,
    pub image_urls: Vec<String>,
    pub pdf_url: Option<String>,
    pub report_stale: bool,
    pub admin_status: String,
    pub retry_count: i32,
    pub max_retries: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub accessed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<SessionRow> for Session {
    type Error = ModelError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        let columns = ResultColumns {
            damage_locations: row.damage_locations,
            damage_description: row.damage_description,
            severity_score: row.severity_score,
            estimated_cost_min: row.estimated_cost_min,
            estimated_cost_max: row.estimated_cost_max,
            first_aid_cost: row.first_aid_cost,
            insurance_likelihood: row.insurance_likelihood,
            recommended_plan: row.recommended_plan,
        };
        let result = normalize_result(columns, row.diagnosis_result.as_ref())?;

        Ok(Session {
            id: row.id,
            claim_code: row.secret_code,
            contact: Contact {
                name: row.customer_name,
                phone: row.customer_phone,
                email: row.customer_email.filter(|e| !e.is_empty()),
            },
            result,
            image_refs: row.image_urls,
            report_ref: row.pdf_url,
            report_stale: row.report_stale,
            admin_status: row.admin_status,
            retry_count: row.retry_count,
            max_retries: row.max_retries,
            active: row.is_active,
            created_at: row.created_at,
            expires_at: row.expires_at,
            accessed_at: row.accessed_at,
            updated_at: row.updated_at,
        })
    }
}
