use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::result::ModelError;
use super::session::Contact;

/// Follow-up state of a customer that has not been contacted yet.
pub const DEFAULT_FOLLOW_UP_STATUS: &str = "new";

/// CRM-side customer record, matched on phone first and email second.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: Uuid,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub status: String,
    pub follow_up_status: String,
    pub next_action: Option<String>,
    pub next_action_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Admin update of a customer's follow-up fields. Blank optional fields
/// clear the stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CustomerFollowUp {
    pub status: String,
    pub next_action: Option<String>,
    pub next_action_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl CustomerFollowUp {
    /// Trimmed copy; the status is required.
    pub fn normalized(&self) -> Result<Self, ModelError> {
        let status = self.status.trim();
        if status.is_empty() {
            return Err(ModelError::MissingFollowUpStatus);
        }
        Ok(Self {
            status: status.to_string(),
            next_action: non_blank(&self.next_action),
            next_action_date: self.next_action_date,
            notes: non_blank(&self.notes),
        })
    }
}

impl Customer {
    pub fn from_contact(contact: &Contact, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: Some(contact.name.clone()),
            phone: Some(contact.phone.clone()),
            email: contact.email.clone(),
            status: super::session::DEFAULT_ADMIN_STATUS.to_string(),
            follow_up_status: DEFAULT_FOLLOW_UP_STATUS.to_string(),
            next_action: None,
            next_action_date: None,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn matches(&self, contact: &Contact) -> bool {
        if self.phone.as_deref() == Some(contact.phone.as_str()) {
            return true;
        }
        match (&self.email, &contact.email) {
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
            _ => false,
        }
    }

    /// Refresh contact details without clearing a known email.
    pub fn merge(&mut self, contact: &Contact, now: DateTime<Utc>) {
        self.name = Some(contact.name.clone());
        self.phone = Some(contact.phone.clone());
        if contact.email.is_some() {
            self.email = contact.email.clone();
        }
        self.updated_at = now;
    }

    /// Overwrite the follow-up fields with an already normalized update.
    pub fn apply_follow_up(&mut self, update: &CustomerFollowUp, now: DateTime<Utc>) {
        self.follow_up_status = update.status.clone();
        self.next_action = update.next_action.clone();
        self.next_action_date = update.next_action_date;
        self.notes = update.notes.clone();
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::sample_contact;

    #[test]
    fn test_matches_on_phone_or_email() {
        let now = Utc::now();
        let customer = Customer::from_contact(&sample_contact(), now);

        let mut other = sample_contact();
        other.phone = "08000000000".to_string();
        assert!(customer.matches(&other));

        other.email = Some("someone@else.jp".to_string());
        assert!(!customer.matches(&other));
    }

    #[test]
    fn test_merge_keeps_known_email() {
        let now = Utc::now();
        let mut customer = Customer::from_contact(&sample_contact(), now);
        let mut update = sample_contact();
        update.name = "Yamada Taro".to_string();
        update.email = None;

        customer.merge(&update, now);
        assert_eq!(customer.name.as_deref(), Some("Yamada Taro"));
        assert!(customer.email.is_some());
    }

    #[test]
    fn test_follow_up_requires_status_and_clears_blanks() {
        let update = CustomerFollowUp {
            status: "  ".to_string(),
            ..Default::default()
        };
        assert_eq!(update.normalized(), Err(ModelError::MissingFollowUpStatus));

        let now = Utc::now();
        let mut customer = Customer::from_contact(&sample_contact(), now);
        assert_eq!(customer.follow_up_status, DEFAULT_FOLLOW_UP_STATUS);
        customer.notes = Some("old note".to_string());

        let update = CustomerFollowUp {
            status: " called ".to_string(),
            next_action: Some("Site survey".to_string()),
            next_action_date: NaiveDate::from_ymd_opt(2026, 11, 2),
            notes: Some(" ".to_string()),
        }
        .normalized()
        .unwrap();
        customer.apply_follow_up(&update, now);

        assert_eq!(customer.follow_up_status, "called");
        assert_eq!(customer.next_action.as_deref(), Some("Site survey"));
        assert_eq!(customer.next_action_date, NaiveDate::from_ymd_opt(2026, 11, 2));
        assert_eq!(customer.notes, None);
    }
}
