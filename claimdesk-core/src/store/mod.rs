//! Session record store.
//!
//! The narrow interface every other component uses to reach persistent state:
//! - Live lookups by claim code and by phone (active and unexpired only)
//! - Atomic retry charging that deactivates at the limit
//! - Audited result edits with an append-only history
//! - Customer upserts, follow-up updates and webhook replay detection
//!
//! Two implementations: [`PgSessionStore`] backed by `sqlx`, and
//! [`MemorySessionStore`] for local runs and tests.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    AuditedEdit, Contact, Customer, CustomerFollowUp, EditHistoryEntry, ModelError, Session,
};

pub use memory::MemorySessionStore;
pub use postgres::PgSessionStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Another active session already holds this code
    #[error("claim code {0} is held by an active session")]
    CodeConflict(String),

    #[error("session {0} not found")]
    NotFound(Uuid),

    #[error("customer {0} not found")]
    CustomerNotFound(Uuid),

    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Outcome of charging one redemption attempt against a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptCharge {
    /// Counter moved; `active` is false when this attempt reached the limit
    Charged { retry_count: i32, active: bool },
    /// Counter was already at the limit; the session is now inactive
    LimitReached,
    /// Session was deactivated before the charge landed; nothing changed
    Inactive,
}

/// Aggregate counts for the admin dashboard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCounts {
    pub total: i64,
    pub live: i64,
    pub with_report: i64,
    pub redeemed: i64,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    fn name(&self) -> &'static str;

    /// True when an active, unexpired session holds `code`.
    async fn code_in_use(&self, code: &str, now: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Persist a new session. Expired holders of the same code that are
    /// still flagged active are superseded first; a live holder yields
    /// [`StoreError::CodeConflict`].
    async fn insert(&self, session: &Session, now: DateTime<Utc>) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Session>, StoreError>;

    async fn find_live_by_code(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, StoreError>;

    /// Most recently created live session for `phone`.
    async fn find_live_by_phone(
        &self,
        phone: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, StoreError>;

    /// Charge one attempt against an active session. An inactive session is
    /// never charged.
    async fn charge_attempt(&self, id: Uuid) -> Result<AttemptCharge, StoreError>;

    async fn mark_accessed(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Record a rendered report and clear the stale flag.
    async fn set_report(
        &self,
        id: Uuid,
        report_ref: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Returns false when the session was already inactive.
    async fn deactivate(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Apply an audited edit and append its history entry in one step. A
    /// result change on a session with a report marks that report stale.
    async fn apply_edit(
        &self,
        id: Uuid,
        edit: &AuditedEdit,
        at: DateTime<Utc>,
    ) -> Result<(Session, EditHistoryEntry), StoreError>;

    /// Newest first.
    async fn edit_history(&self, id: Uuid) -> Result<Vec<EditHistoryEntry>, StoreError>;

    async fn list_recent(&self, limit: i64) -> Result<Vec<Session>, StoreError>;

    /// Sessions whose phone or email matches, newest first.
    async fn list_by_contact(
        &self,
        phone: Option<&str>,
        email: Option<&str>,
    ) -> Result<Vec<Session>, StoreError>;

    async fn count_since(
        &self,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<SessionCounts, StoreError>;

    async fn upsert_customer(
        &self,
        contact: &Contact,
        now: DateTime<Utc>,
    ) -> Result<Customer, StoreError>;

    /// Newest first.
    async fn list_customers(&self, limit: i64) -> Result<Vec<Customer>, StoreError>;

    async fn get_customer(&self, id: Uuid) -> Result<Option<Customer>, StoreError>;

    /// Replace the follow-up fields of a customer.
    async fn update_customer_status(
        &self,
        id: Uuid,
        update: &CustomerFollowUp,
        at: DateTime<Utc>,
    ) -> Result<Customer, StoreError>;

    /// Returns false when the event id was seen before.
    async fn record_event(&self, event_id: &str, at: DateTime<Utc>) -> Result<bool, StoreError>;
}
