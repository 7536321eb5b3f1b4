//! Audited admin edits.
//!
//! The result of a session only changes through an [`AuditedEdit`], which
//! cannot be built without an actor and a non-empty reason. Applying it yields
//! the before/after diff that is appended to the edit history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::result::{AssessmentResult, InsuranceLikelihood, ModelError};
use super::session::Session;

/// Partial update of a session's result and admin status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResultEdit {
    pub damage_locations: Option<String>,
    pub damage_description: Option<String>,
    pub severity_score: Option<u8>,
    pub estimated_cost_min: Option<u32>,
    pub estimated_cost_max: Option<u32>,
    pub first_aid_cost: Option<u32>,
    pub insurance_likelihood: Option<InsuranceLikelihood>,
    pub recommended_plan: Option<String>,
    pub admin_status: Option<String>,
}

impl ResultEdit {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone)]
pub struct AuditedEdit {
    edit: ResultEdit,
    actor: String,
    reason: String,
}

impl AuditedEdit {
    pub fn new(edit: ResultEdit, actor: &str, reason: &str) -> Result<Self, ModelError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ModelError::MissingReason);
        }
        if edit.is_empty() {
            return Err(ModelError::EmptyEdit);
        }
        let actor = match actor.trim() {
            "" => "admin",
            a => a,
        };
        Ok(Self {
            edit,
            actor: actor.to_string(),
            reason: reason.to_string(),
        })
    }

    pub fn edit(&self) -> &ResultEdit {
        &self.edit
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Compute the edited result and the diff of fields that actually change.
    pub fn apply(&self, session: &Session) -> Result<AppliedEdit, ModelError> {
        let mut result = session.result.clone();
        let mut admin_status = session.admin_status.clone();
        let mut previous = Map::new();
        let mut next = Map::new();

        let e = &self.edit;
        track(&mut previous, &mut next, "damage_locations", &mut result.damage_locations, &e.damage_locations);
        track(&mut previous, &mut next, "damage_description", &mut result.damage_description, &e.damage_description);
        track(&mut previous, &mut next, "severity_score", &mut result.severity_score, &e.severity_score);
        track(&mut previous, &mut next, "estimated_cost_min", &mut result.estimated_cost_min, &e.estimated_cost_min);
        track(&mut previous, &mut next, "estimated_cost_max", &mut result.estimated_cost_max, &e.estimated_cost_max);
        track(&mut previous, &mut next, "first_aid_cost", &mut result.first_aid_cost, &e.first_aid_cost);
        track(&mut previous, &mut next, "insurance_likelihood", &mut result.insurance_likelihood, &e.insurance_likelihood);
        track(&mut previous, &mut next, "recommended_plan", &mut result.recommended_plan, &e.recommended_plan);
        let result_changed = !next.is_empty();
        track(&mut previous, &mut next, "admin_status", &mut admin_status, &e.admin_status);

        if next.is_empty() {
            return Err(ModelError::EmptyEdit);
        }
        result.validate()?;

        Ok(AppliedEdit {
            result,
            admin_status,
            previous: Value::Object(previous),
            next: Value::Object(next),
            result_changed,
        })
    }
}

fn track<T>(
    previous: &mut Map<String, Value>,
    next: &mut Map<String, Value>,
    field: &str,
    current: &mut T,
    update: &Option<T>,
) where
    T: Clone + PartialEq + Serialize,
{
    let Some(new_value) = update else {
        return;
    };
    if current == new_value {
        return;
    }
    previous.insert(field.to_string(), serde_json::to_value(&*current).unwrap_or(Value::Null));
    next.insert(field.to_string(), serde_json::to_value(new_value).unwrap_or(Value::Null));
    *current = new_value.clone();
}

#[derive(Debug, Clone)]
pub struct AppliedEdit {
    pub result: AssessmentResult,
    pub admin_status: String,
    pub previous: Value,
    pub next: Value,
    /// False when only the admin status moved
    pub result_changed: bool,
}

/// Append-only `diagnosis_edit_history` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct EditHistoryEntry {
    pub id: Uuid,
    #[sqlx(rename = "diagnosis_session_id")]
    pub session_id: Uuid,
    #[sqlx(rename = "editor_name")]
    pub actor: String,
    #[sqlx(rename = "edit_reason")]
    pub reason: String,
    #[sqlx(rename = "previous_values")]
    pub previous: Value,
    #[sqlx(rename = "new_values")]
    pub next: Value,
    pub created_at: DateTime<Utc>,
}

impl EditHistoryEntry {
    pub fn record(session_id: Uuid, edit: &AuditedEdit, applied: &AppliedEdit, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            actor: edit.actor().to_string(),
            reason: edit.reason().to_string(),
            previous: applied.previous.clone(),
            next: applied.next.clone(),
            created_at: at,
        }
    }
}
