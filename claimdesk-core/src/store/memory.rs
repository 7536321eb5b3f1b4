//! In-memory session store. One mutex guards all state, so every operation is
//! linearizable.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{AttemptCharge, SessionCounts, SessionStore, StoreError};
use crate::models::{AuditedEdit, Contact, Customer, CustomerFollowUp, EditHistoryEntry, Session};

#[derive(Default)]
struct MemoryState {
    sessions: HashMap<Uuid, Session>,
    history: Vec<EditHistoryEntry>,
    customers: Vec<Customer>,
    events: HashSet<String>,
}

#[derive(Default)]
pub struct MemorySessionStore {
    state: Mutex<MemoryState>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first(mut sessions: Vec<Session>) -> Vec<Session> {
    sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    sessions
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn code_in_use(&self, code: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .sessions
            .values()
            .any(|s| s.claim_code == code && s.is_live(now)))
    }

    async fn insert(&self, session: &Session, now: DateTime<Utc>) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;

        let mut live_holder = false;
        for existing in state.sessions.values_mut() {
            if existing.claim_code != session.claim_code || !existing.active {
                continue;
            }
            if existing.is_expired(now) {
                existing.active = false;
                existing.updated_at = now;
            } else {
                live_holder = true;
            }
        }
        if live_holder && session.active {
            return Err(StoreError::CodeConflict(session.claim_code.clone()));
        }

        state.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Session>, StoreError> {
        Ok(self.state.lock().await.sessions.get(&id).cloned())
    }

    async fn find_live_by_code(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .sessions
            .values()
            .find(|s| s.claim_code == code && s.is_live(now))
            .cloned())
    }

    async fn find_live_by_phone(
        &self,
        phone: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .sessions
            .values()
            .filter(|s| s.contact.phone == phone && s.is_live(now))
            .max_by_key(|s| s.created_at)
            .cloned())
    }

    async fn charge_attempt(&self, id: Uuid) -> Result<AttemptCharge, StoreError> {
        let mut state = self.state.lock().await;
        let session = state.sessions.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        if session.retries_exhausted() {
            session.active = false;
            return Ok(AttemptCharge::LimitReached);
        }
        if !session.active {
            return Ok(AttemptCharge::Inactive);
        }
        session.retry_count += 1;
        session.active = session.retry_count < session.max_retries;
        Ok(AttemptCharge::Charged {
            retry_count: session.retry_count,
            active: session.active,
        })
    }

    async fn mark_accessed(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let session = state.sessions.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        session.accessed_at = Some(at);
        Ok(())
    }

    async fn set_report(
        &self,
        id: Uuid,
        report_ref: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let session = state.sessions.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        session.report_ref = Some(report_ref.to_string());
        session.report_stale = false;
        session.updated_at = at;
        Ok(())
    }

    async fn deactivate(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let session = state.sessions.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if !session.active {
            return Ok(false);
        }
        session.active = false;
        session.updated_at = at;
        Ok(true)
    }

    async fn apply_edit(
        &self,
        id: Uuid,
        edit: &AuditedEdit,
        at: DateTime<Utc>,
    ) -> Result<(Session, EditHistoryEntry), StoreError> {
        let mut state = self.state.lock().await;
        let session = state.sessions.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        let applied = edit.apply(session)?;
        if applied.result_changed && session.report_ref.is_some() {
            session.report_stale = true;
        }
        session.result = applied.result.clone();
        session.admin_status = applied.admin_status.clone();
        session.updated_at = at;
        let updated = session.clone();

        let entry = EditHistoryEntry::record(id, edit, &applied, at);
        state.history.push(entry.clone());
        Ok((updated, entry))
    }

    async fn edit_history(&self, id: Uuid) -> Result<Vec<EditHistoryEntry>, StoreError> {
        let state = self.state.lock().await;
        let mut entries: Vec<_> = state
            .history
            .iter()
            .filter(|e| e.session_id == id)
            .cloned()
            .collect();
        entries.reverse();
        Ok(entries)
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<Session>, StoreError> {
        let state = self.state.lock().await;
        let mut sessions = newest_first(state.sessions.values().cloned().collect());
        sessions.truncate(limit.max(0) as usize);
        Ok(sessions)
    }

    async fn list_by_contact(
        &self,
        phone: Option<&str>,
        email: Option<&str>,
    ) -> Result<Vec<Session>, StoreError> {
        if phone.is_none() && email.is_none() {
            return Ok(Vec::new());
        }
        let state = self.state.lock().await;
        let matched = state
            .sessions
            .values()
            .filter(|s| {
                phone.is_some_and(|p| s.contact.phone == p)
                    || email.is_some_and(|e| s.contact.email.as_deref() == Some(e))
            })
            .cloned()
            .collect();
        Ok(newest_first(matched))
    }

    async fn count_since(
        &self,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<SessionCounts, StoreError> {
        let state = self.state.lock().await;
        let mut counts = SessionCounts::default();
        for s in state.sessions.values().filter(|s| s.created_at >= since) {
            counts.total += 1;
            counts.live += s.is_live(now) as i64;
            counts.with_report += s.report_ref.is_some() as i64;
            counts.redeemed += s.accessed_at.is_some() as i64;
        }
        Ok(counts)
    }

    async fn upsert_customer(
        &self,
        contact: &Contact,
        now: DateTime<Utc>,
    ) -> Result<Customer, StoreError> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.customers.iter_mut().find(|c| c.matches(contact)) {
            existing.merge(contact, now);
            return Ok(existing.clone());
        }
        let customer = Customer::from_contact(contact, now);
        state.customers.push(customer.clone());
        Ok(customer)
    }

    async fn list_customers(&self, limit: i64) -> Result<Vec<Customer>, StoreError> {
        let state = self.state.lock().await;
        let mut customers = state.customers.clone();
        customers.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        customers.truncate(limit.max(0) as usize);
        Ok(customers)
    }

    async fn get_customer(&self, id: Uuid) -> Result<Option<Customer>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.customers.iter().find(|c| c.id == id).cloned())
    }

    async fn update_customer_status(
        &self,
        id: Uuid,
        update: &CustomerFollowUp,
        at: DateTime<Utc>,
    ) -> Result<Customer, StoreError> {
        let update = update.normalized()?;
        let mut state = self.state.lock().await;
        let customer = state
            .customers
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(StoreError::CustomerNotFound(id))?;
        customer.apply_follow_up(&update, at);
        Ok(customer.clone())
    }

    async fn record_event(&self, event_id: &str, _at: DateTime<Utc>) -> Result<bool, StoreError> {
        Ok(self.state.lock().await.events.insert(event_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::{sample_contact, sample_session};
    use crate::models::ResultEdit;
    use chrono::Duration;
    use std::sync::Arc;

    // ========================================================================
    // TEST 1: live holder blocks a second insert with the same code
    // ========================================================================
    #[tokio::test]
    async fn test_insert_rejects_live_code_holder() {
        let store = MemorySessionStore::new();
        let now = Utc::now();
        store.insert(&sample_session("1234"), now).await.unwrap();

        let err = store.insert(&sample_session("1234"), now).await.unwrap_err();
        assert!(matches!(err, StoreError::CodeConflict(code) if code == "1234"));
        assert!(store.code_in_use("1234", now).await.unwrap());
        assert!(!store.code_in_use("4321", now).await.unwrap());
    }

    // ========================================================================
    // TEST 2: expired holders are superseded and the code recycles
    // ========================================================================
    #[tokio::test]
    async fn test_insert_supersedes_expired_holder() {
        let store = MemorySessionStore::new();
        let now = Utc::now();
        let mut old = sample_session("0007");
        old.created_at = now - Duration::hours(30);
        old.expires_at = now - Duration::hours(6);
        store.insert(&old, now - Duration::hours(30)).await.unwrap();

        assert!(!store.code_in_use("0007", now).await.unwrap());
        let fresh = sample_session("0007");
        store.insert(&fresh, now).await.unwrap();

        assert!(!store.get(old.id).await.unwrap().unwrap().active);
        let live = store.find_live_by_code("0007", now).await.unwrap().unwrap();
        assert_eq!(live.id, fresh.id);
    }

    // ========================================================================
    // TEST 3: charging stops at max_retries and deactivates
    // ========================================================================
    #[tokio::test]
    async fn test_charge_attempt_deactivates_at_limit() {
        let store = MemorySessionStore::new();
        let session = sample_session("5555");
        store.insert(&session, Utc::now()).await.unwrap();

        for expected in 1..=4 {
            let charge = store.charge_attempt(session.id).await.unwrap();
            assert_eq!(
                charge,
                AttemptCharge::Charged { retry_count: expected, active: true }
            );
        }
        assert_eq!(
            store.charge_attempt(session.id).await.unwrap(),
            AttemptCharge::Charged { retry_count: 5, active: false }
        );
        assert_eq!(
            store.charge_attempt(session.id).await.unwrap(),
            AttemptCharge::LimitReached
        );
        let stored = store.get(session.id).await.unwrap().unwrap();
        assert_eq!(stored.retry_count, 5);
        assert!(!stored.active);
    }

    // ========================================================================
    // TEST 4: concurrent charges never pass the limit
    // ========================================================================
    #[tokio::test]
    async fn test_concurrent_charges_are_linearizable() {
        let store = Arc::new(MemorySessionStore::new());
        let session = sample_session("9090");
        store.insert(&session, Utc::now()).await.unwrap();

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.charge_attempt(session.id).await.unwrap() })
            })
            .collect();

        let mut charged = Vec::new();
        for handle in handles {
            if let AttemptCharge::Charged { retry_count, .. } = handle.await.unwrap() {
                charged.push(retry_count);
            }
        }
        charged.sort();
        assert_eq!(charged, vec![1, 2, 3, 4, 5]);
        assert_eq!(store.get(session.id).await.unwrap().unwrap().retry_count, 5);
    }

    // ========================================================================
    // TEST 5: phone fallback returns the newest live session
    // ========================================================================
    #[tokio::test]
    async fn test_find_live_by_phone_prefers_newest() {
        let store = MemorySessionStore::new();
        let now = Utc::now();
        let mut older = sample_session("1111");
        older.created_at = now - Duration::hours(2);
        let newer = sample_session("2222");
        store.insert(&older, now).await.unwrap();
        store.insert(&newer, now).await.unwrap();

        let found = store
            .find_live_by_phone(&sample_contact().phone, now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, newer.id);

        store.deactivate(newer.id, now).await.unwrap();
        let found = store
            .find_live_by_phone(&sample_contact().phone, now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, older.id);
    }

    // ========================================================================
    // TEST 6: edits append history and mark rendered reports stale
    // ========================================================================
    #[tokio::test]
    async fn test_apply_edit_appends_history_and_marks_stale() {
        let store = MemorySessionStore::new();
        let now = Utc::now();
        let session = sample_session("3030");
        store.insert(&session, now).await.unwrap();
        store.set_report(session.id, "memory://pdfs/x.pdf", now).await.unwrap();

        let edit = AuditedEdit::new(
            ResultEdit {
                estimated_cost_max: Some(400_000),
                ..Default::default()
            },
            "sato",
            "contractor quote",
        )
        .unwrap();
        let (updated, entry) = store.apply_edit(session.id, &edit, now).await.unwrap();

        assert_eq!(updated.result.estimated_cost_max, 400_000);
        assert!(updated.report_stale);
        assert_eq!(entry.actor, "sato");
        let history = store.edit_history(session.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].reason, "contractor quote");

        store.set_report(session.id, "memory://pdfs/x.pdf", now).await.unwrap();
        assert!(!store.get(session.id).await.unwrap().unwrap().report_stale);
    }

    // ========================================================================
    // TEST 7: contact listing, counts, customers and event replay
    // ========================================================================
    #[tokio::test]
    async fn test_contact_listing_counts_and_events() {
        let store = MemorySessionStore::new();
        let now = Utc::now();
        let a = sample_session("1000");
        let mut b = sample_session("2000");
        b.contact.phone = "08011112222".to_string();
        b.contact.email = None;
        store.insert(&a, now).await.unwrap();
        store.insert(&b, now).await.unwrap();
        store.mark_accessed(a.id, now).await.unwrap();

        let by_email = store
            .list_by_contact(None, Some("yamada@example.jp"))
            .await
            .unwrap();
        assert_eq!(by_email.len(), 1);
        let by_either = store
            .list_by_contact(Some("08011112222"), Some("yamada@example.jp"))
            .await
            .unwrap();
        assert_eq!(by_either.len(), 2);
        assert!(store.list_by_contact(None, None).await.unwrap().is_empty());

        let counts = store
            .count_since(now - Duration::days(1), now)
            .await
            .unwrap();
        assert_eq!(counts.total, 2);
        assert_eq!(counts.live, 2);
        assert_eq!(counts.redeemed, 1);

        let first = store.upsert_customer(&a.contact, now).await.unwrap();
        let second = store.upsert_customer(&a.contact, now).await.unwrap();
        assert_eq!(first.id, second.id);

        assert!(store.record_event("evt-1", now).await.unwrap());
        assert!(!store.record_event("evt-1", now).await.unwrap());
    }

    // ========================================================================
    // TEST 8: a session deactivated after lookup is not charged
    // ========================================================================
    #[tokio::test]
    async fn test_charge_after_deactivate_is_rejected() {
        let store = MemorySessionStore::new();
        let now = Utc::now();
        let session = sample_session("5555");
        store.insert(&session, now).await.unwrap();

        let found = store.find_live_by_code("5555", now).await.unwrap().unwrap();
        assert!(store.deactivate(found.id, now).await.unwrap());

        assert_eq!(
            store.charge_attempt(found.id).await.unwrap(),
            AttemptCharge::Inactive
        );
        let stored = store.get(found.id).await.unwrap().unwrap();
        assert_eq!(stored.retry_count, 0);
        assert!(!stored.active);
    }

    // ========================================================================
    // TEST 9: customers list newest first and take follow-up updates
    // ========================================================================
    #[tokio::test]
    async fn test_customer_listing_and_follow_up() {
        let store = MemorySessionStore::new();
        let now = Utc::now();
        let first = store
            .upsert_customer(&sample_contact(), now - Duration::hours(1))
            .await
            .unwrap();
        let mut other = sample_contact();
        other.phone = "08099990000".to_string();
        other.email = None;
        let second = store.upsert_customer(&other, now).await.unwrap();

        let listed = store.list_customers(10).await.unwrap();
        assert_eq!(
            listed.iter().map(|c| c.id).collect::<Vec<_>>(),
            vec![second.id, first.id]
        );
        assert_eq!(store.list_customers(1).await.unwrap().len(), 1);

        let update = CustomerFollowUp {
            status: "contacted".to_string(),
            next_action: Some("Call back".to_string()),
            next_action_date: None,
            notes: Some("Prefers mornings".to_string()),
        };
        let updated = store
            .update_customer_status(first.id, &update, now)
            .await
            .unwrap();
        assert_eq!(updated.follow_up_status, "contacted");
        assert_eq!(
            store.get_customer(first.id).await.unwrap().unwrap().notes.as_deref(),
            Some("Prefers mornings")
        );

        let missing = uuid::Uuid::new_v4();
        assert!(store.get_customer(missing).await.unwrap().is_none());
        assert!(matches!(
            store.update_customer_status(missing, &update, now).await,
            Err(StoreError::CustomerNotFound(id)) if id == missing
        ));
        let blank = CustomerFollowUp::default();
        assert!(matches!(
            store.update_customer_status(first.id, &blank, now).await,
            Err(StoreError::Model(_))
        ));
    }
}
