//! Admin operations: session detail, audited edits, re-rendering,
//! deactivation, the dashboard aggregates and customer follow-up.

use chrono::{DateTime, Duration, Utc};
use claimdesk_core::models::{
    AuditedEdit, Customer, CustomerFollowUp, EditHistoryEntry, ModelError, ResultEdit, Session,
};
use claimdesk_core::{InsuranceLikelihood, SessionCounts, SessionStore, StoreError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use super::lifecycle::{Lifecycle, ReportError};

/// Sessions listed on the dashboard.
pub const RECENT_LIMIT: i64 = 20;

/// Customers listed by the customer overview.
pub const CUSTOMER_LIMIT: i64 = 200;

#[derive(Error, Debug)]
pub enum AdminError {
    #[error("session {0} not found")]
    NotFound(Uuid),

    #[error("customer {0} not found")]
    CustomerNotFound(Uuid),

    #[error("{0}")]
    Invalid(String),

    #[error(transparent)]
    Store(StoreError),

    #[error(transparent)]
    Report(#[from] ReportError),
}

impl From<StoreError> for AdminError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => AdminError::NotFound(id),
            StoreError::CustomerNotFound(id) => AdminError::CustomerNotFound(id),
            StoreError::Model(m) => AdminError::Invalid(m.to_string()),
            other => AdminError::Store(other),
        }
    }
}

impl From<ModelError> for AdminError {
    fn from(e: ModelError) -> Self {
        AdminError::Invalid(e.to_string())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditRequest {
    #[serde(flatten)]
    pub edit: ResultEdit,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub actor: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDetail {
    pub session: Session,
    pub history: Vec<EditHistoryEntry>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EditOutcome {
    pub session: Session,
    pub entry: EditHistoryEntry,
    /// True when the edit changed the result and the report was re-rendered
    pub rerendered: bool,
}

/// Condensed row for listings.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: Uuid,
    pub claim_code: String,
    pub customer_name: String,
    pub customer_phone: String,
    pub severity_score: u8,
    pub insurance_likelihood: InsuranceLikelihood,
    pub admin_status: String,
    pub active: bool,
    pub has_report: bool,
    pub report_stale: bool,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
}

impl From<&Session> for SessionSummary {
    fn from(s: &Session) -> Self {
        Self {
            id: s.id,
            claim_code: s.claim_code.clone(),
            customer_name: s.contact.name.clone(),
            customer_phone: s.contact.phone.clone(),
            severity_score: s.result.severity_score,
            insurance_likelihood: s.result.insurance_likelihood,
            admin_status: s.admin_status.clone(),
            active: s.active,
            has_report: s.report_ref.is_some(),
            report_stale: s.report_stale,
            retry_count: s.retry_count,
            created_at: s.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub last_24h: SessionCounts,
    pub last_7d: SessionCounts,
    pub recent: Vec<SessionSummary>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerListing {
    #[serde(flatten)]
    pub customer: Customer,
    pub session_count: usize,
}

/// A customer with every session submitted under their phone or email.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerDetail {
    pub customer: Customer,
    pub sessions: Vec<SessionSummary>,
}

#[derive(Clone)]
pub struct AdminService {
    store: Arc<dyn SessionStore>,
    lifecycle: Arc<Lifecycle>,
    default_actor: String,
}

impl AdminService {
    pub fn new(lifecycle: Arc<Lifecycle>, default_actor: String) -> Self {
        Self {
            store: lifecycle.store().clone(),
            lifecycle,
            default_actor,
        }
    }

    async fn session(&self, id: Uuid) -> Result<Session, AdminError> {
        self.store.get(id).await?.ok_or(AdminError::NotFound(id))
    }

    pub async fn detail(&self, id: Uuid) -> Result<SessionDetail, AdminError> {
        let session = self.session(id).await?;
        let history = self.store.edit_history(id).await?;
        Ok(SessionDetail { session, history })
    }

    /// Apply an audited edit. A result change re-renders the report; if that
    /// render fails the previous report stays in place, flagged stale.
    pub async fn edit(
        &self,
        id: Uuid,
        request: EditRequest,
        now: DateTime<Utc>,
    ) -> Result<EditOutcome, AdminError> {
        let actor = request
            .actor
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .unwrap_or(&self.default_actor);
        let audited = AuditedEdit::new(request.edit, actor, &request.reason)?;

        let (mut session, entry) = self.store.apply_edit(id, &audited, now).await?;
        tracing::info!(
            session_id = %id,
            actor = %entry.actor,
            fields = ?entry.next.as_object().map(|m| m.keys().cloned().collect::<Vec<_>>()),
            "Session edited"
        );

        let result_changed = entry
            .next
            .as_object()
            .is_some_and(|fields| fields.keys().any(|k| k != "admin_status"));

        let mut rerendered = false;
        if result_changed {
            match self.lifecycle.render_and_store(&session).await {
                Ok(reference) => {
                    session.report_ref = Some(reference);
                    session.report_stale = false;
                    rerendered = true;
                }
                Err(e) => {
                    tracing::error!(session_id = %id, error = %e, "Re-render after edit failed");
                }
            }
        }

        Ok(EditOutcome {
            session,
            entry,
            rerendered,
        })
    }

    pub async fn rerender(&self, id: Uuid) -> Result<String, AdminError> {
        let session = self.session(id).await?;
        let reference = self.lifecycle.render_and_store(&session).await?;
        tracing::info!(session_id = %id, "Report re-rendered");
        Ok(reference)
    }

    /// Returns false when the session was already inactive.
    pub async fn deactivate(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, AdminError> {
        self.session(id).await?;
        let changed = self.store.deactivate(id, now).await?;
        if changed {
            tracing::info!(session_id = %id, "Session deactivated");
        }
        Ok(changed)
    }

    pub async fn dashboard(&self, now: DateTime<Utc>) -> Result<Dashboard, AdminError> {
        let last_24h = self.store.count_since(now - Duration::hours(24), now).await?;
        let last_7d = self.store.count_since(now - Duration::days(7), now).await?;
        let recent = self
            .store
            .list_recent(RECENT_LIMIT)
            .await?
            .iter()
            .map(SessionSummary::from)
            .collect();
        Ok(Dashboard {
            last_24h,
            last_7d,
            recent,
        })
    }

    pub async fn sessions_for_contact(
        &self,
        phone: Option<&str>,
        email: Option<&str>,
    ) -> Result<Vec<SessionSummary>, AdminError> {
        let phone = phone.map(str::trim).filter(|p| !p.is_empty());
        let email = email.map(str::trim).filter(|e| !e.is_empty());
        if phone.is_none() && email.is_none() {
            return Err(AdminError::Invalid("phone or email is required".to_string()));
        }
        let sessions = self.store.list_by_contact(phone, email).await?;
        Ok(sessions.iter().map(SessionSummary::from).collect())
    }

    async fn customer_sessions(&self, customer: &Customer) -> Result<Vec<Session>, AdminError> {
        let phone = customer.phone.as_deref().filter(|p| !p.is_empty());
        let email = customer.email.as_deref().filter(|e| !e.is_empty());
        if phone.is_none() && email.is_none() {
            return Ok(Vec::new());
        }
        Ok(self.store.list_by_contact(phone, email).await?)
    }

    /// Customers newest first, each with the number of matching sessions.
    pub async fn customers(&self) -> Result<Vec<CustomerListing>, AdminError> {
        let customers = self.store.list_customers(CUSTOMER_LIMIT).await?;
        let mut listings = Vec::with_capacity(customers.len());
        for customer in customers {
            let session_count = self.customer_sessions(&customer).await?.len();
            listings.push(CustomerListing {
                customer,
                session_count,
            });
        }
        Ok(listings)
    }

    pub async fn customer(&self, id: Uuid) -> Result<CustomerDetail, AdminError> {
        let customer = self
            .store
            .get_customer(id)
            .await?
            .ok_or(AdminError::CustomerNotFound(id))?;
        let sessions = self
            .customer_sessions(&customer)
            .await?
            .iter()
            .map(SessionSummary::from)
            .collect();
        Ok(CustomerDetail { customer, sessions })
    }

    pub async fn update_customer(
        &self,
        id: Uuid,
        update: CustomerFollowUp,
        now: DateTime<Utc>,
    ) -> Result<Customer, AdminError> {
        let customer = self.store.update_customer_status(id, &update, now).await?;
        tracing::info!(
            customer_id = %id,
            follow_up_status = %customer.follow_up_status,
            "Customer follow-up updated"
        );
        Ok(customer)
    }
}
