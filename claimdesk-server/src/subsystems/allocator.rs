//! Claim-code allocation
//!
//! Codes are 4 digits drawn uniformly from 0000–9999. A code may only be
//! handed out while no live session (active, unexpired) holds it:
//! - `code_in_use` is the cheap pre-check
//! - the store's insert is the authoritative guard; a `CodeConflict` there
//!   means another submission won the race, so the allocator draws again
//!
//! Both kinds of rejection count against the same attempt budget.

use chrono::{DateTime, Utc};
use claimdesk_core::models::{Session, SessionDraft};
use claimdesk_core::{SessionStore, StoreError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Number of distinct claim codes.
pub const CODE_SPACE: u16 = 10_000;

#[derive(Error, Debug)]
pub enum AllocationError {
    #[error("no free claim code after {attempts} attempts")]
    Exhausted { attempts: u32 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

// ============================================================================
// Code sources
// ============================================================================

pub trait CodeGenerator: Send + Sync {
    /// Next candidate in `0..CODE_SPACE`.
    fn next_code(&self) -> u16;
}

/// Thread-local RNG, used in production.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomCodes;

impl CodeGenerator for RandomCodes {
    fn next_code(&self) -> u16 {
        rand::rng().random_range(0..CODE_SPACE)
    }
}

/// Deterministic source for reproducible runs.
#[derive(Debug)]
pub struct SeededCodes {
    rng: Mutex<StdRng>,
}

impl SeededCodes {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl CodeGenerator for SeededCodes {
    fn next_code(&self) -> u16 {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        rng.random_range(0..CODE_SPACE)
    }
}

/// Replays a fixed list of codes, cycling when it runs out.
#[derive(Debug)]
pub struct ScriptedCodes {
    codes: Vec<u16>,
    cursor: Mutex<usize>,
}

impl ScriptedCodes {
    pub fn new(codes: Vec<u16>) -> Self {
        Self {
            codes,
            cursor: Mutex::new(0),
        }
    }
}

impl CodeGenerator for ScriptedCodes {
    fn next_code(&self) -> u16 {
        if self.codes.is_empty() {
            return 0;
        }
        let mut cursor = self.cursor.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let code = self.codes[*cursor % self.codes.len()];
        *cursor += 1;
        code % CODE_SPACE
    }
}

pub fn format_code(n: u16) -> String {
    format!("{:04}", n % CODE_SPACE)
}

// ============================================================================
// Allocator
// ============================================================================

#[derive(Clone)]
pub struct ClaimCodeAllocator {
    store: Arc<dyn SessionStore>,
    codes: Arc<dyn CodeGenerator>,
    max_attempts: u32,
}

impl ClaimCodeAllocator {
    pub fn new(
        store: Arc<dyn SessionStore>,
        codes: Arc<dyn CodeGenerator>,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            codes,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Allocate a code and persist the session under it as one step.
    pub async fn insert_with_code(
        &self,
        draft: SessionDraft,
        now: DateTime<Utc>,
    ) -> Result<Session, AllocationError> {
        for attempt in 1..=self.max_attempts {
            let code = format_code(self.codes.next_code());
            if self.store.code_in_use(&code, now).await? {
                tracing::debug!(code = %code, attempt, "Claim code in use, drawing again");
                continue;
            }

            let session = draft.clone().with_code(code);
            match self.store.insert(&session, now).await {
                Ok(()) => {
                    tracing::info!(
                        session_id = %session.id,
                        attempt,
                        "Claim code allocated"
                    );
                    return Ok(session);
                }
                Err(StoreError::CodeConflict(code)) => {
                    tracing::warn!(code = %code, attempt, "Claim code taken concurrently, drawing again");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(self.exhausted())
    }

    fn exhausted(&self) -> AllocationError {
        tracing::error!(
            attempts = self.max_attempts,
            store = self.store.name(),
            "Claim code allocation exhausted"
        );
        AllocationError::Exhausted {
            attempts: self.max_attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use claimdesk_core::models::{AssessmentResult, Contact, InsuranceLikelihood};
    use claimdesk_core::MemorySessionStore;
    use std::collections::HashSet;

    fn draft(now: DateTime<Utc>) -> SessionDraft {
        SessionDraft::new(
            Contact {
                name: "Tanaka".to_string(),
                phone: "08011112222".to_string(),
                email: None,
            },
            AssessmentResult {
                damage_locations: "Roof".to_string(),
                damage_description: "Cracked tiles".to_string(),
                severity_score: 5,
                estimated_cost_min: 100_000,
                estimated_cost_max: 200_000,
                first_aid_cost: 30_000,
                insurance_likelihood: InsuranceLikelihood::Medium,
                recommended_plan: "Replace tiles".to_string(),
            },
            vec!["a".into(), "b".into(), "c".into()],
            now,
            Duration::hours(24),
            5,
        )
    }

    #[test]
    fn test_format_code_zero_pads() {
        assert_eq!(format_code(0), "0000");
        assert_eq!(format_code(42), "0042");
        assert_eq!(format_code(9999), "9999");
    }

    #[test]
    fn test_seeded_codes_are_reproducible() {
        let a = SeededCodes::new(7);
        let b = SeededCodes::new(7);
        let left: Vec<u16> = (0..20).map(|_| a.next_code()).collect();
        let right: Vec<u16> = (0..20).map(|_| b.next_code()).collect();
        assert_eq!(left, right);
        assert!(left.iter().all(|c| *c < CODE_SPACE));
    }

    #[tokio::test]
    async fn test_taken_code_is_redrawn() {
        let now = Utc::now();
        let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
        let codes = Arc::new(ScriptedCodes::new(vec![1234, 1234, 5678]));
        let allocator = ClaimCodeAllocator::new(store.clone(), codes, 100);

        let first = allocator.insert_with_code(draft(now), now).await.unwrap();
        let second = allocator.insert_with_code(draft(now), now).await.unwrap();

        assert_eq!(first.claim_code, "1234");
        assert_eq!(second.claim_code, "5678");
    }

    #[tokio::test]
    async fn test_exhaustion_after_attempt_cap() {
        let now = Utc::now();
        let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
        let codes = Arc::new(ScriptedCodes::new(vec![7]));
        let allocator = ClaimCodeAllocator::new(store.clone(), codes, 100);

        allocator.insert_with_code(draft(now), now).await.unwrap();
        let err = allocator.insert_with_code(draft(now), now).await.unwrap_err();
        assert!(matches!(err, AllocationError::Exhausted { attempts: 100 }));

        // The exhausted submission left nothing behind
        assert_eq!(store.list_recent(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_expired_holder_releases_code() {
        let now = Utc::now();
        let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
        let codes = Arc::new(ScriptedCodes::new(vec![4321]));
        let allocator = ClaimCodeAllocator::new(store.clone(), codes, 3);

        let old = allocator
            .insert_with_code(draft(now - Duration::hours(25)), now - Duration::hours(25))
            .await
            .unwrap();
        let fresh = allocator.insert_with_code(draft(now), now).await.unwrap();

        assert_eq!(old.claim_code, fresh.claim_code);
        let old = store.get(old.id).await.unwrap().unwrap();
        assert!(!old.active, "expired holder is superseded");
        assert!(store.find_live_by_code("4321", now).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_concurrent_allocations_are_unique() {
        let now = Utc::now();
        let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
        // Small code space forces collisions between the tasks.
        let codes = Arc::new(ScriptedCodes::new((0..40).collect()));
        let allocator = ClaimCodeAllocator::new(store.clone(), codes, 100);

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let allocator = allocator.clone();
                tokio::spawn(async move { allocator.insert_with_code(draft(now), now).await })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            let session = handle.await.unwrap().unwrap();
            assert!(seen.insert(session.claim_code), "duplicate live code");
        }
        assert_eq!(seen.len(), 20);
    }
}
