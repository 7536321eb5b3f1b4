//! Structured assessment result.
//!
//! Two storage shapes exist: the current flattened columns (schema v2) and the
//! nested JSON document written by schema v1. Both are normalized here, at the
//! store boundary, into a single [`AssessmentResult`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const RESULT_SCHEMA_VERSION: u32 = 2;

/// Highest severity score; 0 means "not applicable"
pub const MAX_SEVERITY: u8 = 10;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("severity score {0} is outside 0..=10")]
    SeverityOutOfRange(i64),

    #[error("{field} must be a non-negative amount, got {value}")]
    InvalidAmount { field: &'static str, value: i64 },

    #[error("cost range is inverted: min {min} > max {max}")]
    CostRangeInverted { min: u32, max: u32 },

    #[error("unknown insurance likelihood: {0}")]
    UnknownLikelihood(String),

    #[error("stored session has no assessment result")]
    MissingResult,

    #[error("edit reason must not be empty")]
    MissingReason,

    #[error("edit changes nothing")]
    EmptyEdit,

    #[error("follow-up status must not be empty")]
    MissingFollowUpStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsuranceLikelihood {
    High,
    Medium,
    Low,
    #[default]
    None,
}

impl InsuranceLikelihood {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::None => "none",
        }
    }

    /// Human-facing label used by the report and the reply summary.
    pub fn label(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::None => "not applicable",
        }
    }

    /// `None` means the assessment found no actionable damage.
    pub fn is_applicable(&self) -> bool {
        !matches!(self, Self::None)
    }
}

impl fmt::Display for InsuranceLikelihood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InsuranceLikelihood {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            "none" | "" => Ok(Self::None),
            other => Err(ModelError::UnknownLikelihood(other.to_string())),
        }
    }
}

/// Output of the assessment collaborator. Amounts are in yen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentResult {
    pub damage_locations: String,
    pub damage_description: String,
    pub severity_score: u8,
    pub estimated_cost_min: u32,
    pub estimated_cost_max: u32,
    pub first_aid_cost: u32,
    pub insurance_likelihood: InsuranceLikelihood,
    pub recommended_plan: String,
}

impl AssessmentResult {
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.severity_score > MAX_SEVERITY {
            return Err(ModelError::SeverityOutOfRange(self.severity_score as i64));
        }
        if self.estimated_cost_min > self.estimated_cost_max {
            return Err(ModelError::CostRangeInverted {
                min: self.estimated_cost_min,
                max: self.estimated_cost_max,
            });
        }
        Ok(())
    }

    pub fn is_not_applicable(&self) -> bool {
        !self.insurance_likelihood.is_applicable()
    }
}

/// Flattened result columns as read from a session row (schema v2).
#[derive(Debug, Clone, Default)]
pub struct ResultColumns {
    pub damage_locations: Option<String>,
    pub damage_description: Option<String>,
    pub severity_score: Option<i32>,
    pub estimated_cost_min: Option<i64>,
    pub estimated_cost_max: Option<i64>,
    pub first_aid_cost: Option<i64>,
    pub insurance_likelihood: Option<String>,
    pub recommended_plan: Option<String>,
}

impl ResultColumns {
    fn is_empty(&self) -> bool {
        self.damage_locations.is_none()
            && self.damage_description.is_none()
            && self.severity_score.is_none()
            && self.estimated_cost_min.is_none()
            && self.estimated_cost_max.is_none()
            && self.first_aid_cost.is_none()
            && self.insurance_likelihood.is_none()
            && self.recommended_plan.is_none()
    }
}

/// Nested result document (schema v1).
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct LegacyResultV1 {
    repair_location: Option<String>,
    diagnosis_details: Option<String>,
    severity_score: Option<i64>,
    estimated_cost_min: Option<i64>,
    estimated_cost_max: Option<i64>,
    first_aid_cost: Option<i64>,
    insurance_likelihood: Option<String>,
    recommended_plan: Option<String>,
}

/// Merge both storage shapes into one validated result. Column values win;
/// the legacy document only fills gaps.
pub fn normalize_result(
    columns: ResultColumns,
    legacy: Option<&serde_json::Value>,
) -> Result<AssessmentResult, ModelError> {
    let legacy: Option<LegacyResultV1> =
        legacy.and_then(|v| serde_json::from_value(v.clone()).ok());

    if columns.is_empty() && legacy.is_none() {
        return Err(ModelError::MissingResult);
    }
    let legacy = legacy.unwrap_or_default();

    let text = |col: Option<String>, old: Option<String>| {
        col.filter(|s| !s.is_empty())
            .or(old)
            .unwrap_or_default()
    };

    let severity = columns
        .severity_score
        .map(i64::from)
        .or(legacy.severity_score)
        .unwrap_or(0);
    if !(0..=MAX_SEVERITY as i64).contains(&severity) {
        return Err(ModelError::SeverityOutOfRange(severity));
    }

    let likelihood = columns
        .insurance_likelihood
        .or(legacy.insurance_likelihood)
        .unwrap_or_default()
        .parse::<InsuranceLikelihood>()?;

    let result = AssessmentResult {
        damage_locations: text(columns.damage_locations, legacy.repair_location),
        damage_description: text(columns.damage_description, legacy.diagnosis_details),
        severity_score: severity as u8,
        estimated_cost_min: amount(
            "estimated_cost_min",
            columns.estimated_cost_min.or(legacy.estimated_cost_min),
        )?,
        estimated_cost_max: amount(
            "estimated_cost_max",
            columns.estimated_cost_max.or(legacy.estimated_cost_max),
        )?,
        first_aid_cost: amount(
            "first_aid_cost",
            columns.first_aid_cost.or(legacy.first_aid_cost),
        )?,
        insurance_likelihood: likelihood,
        recommended_plan: text(columns.recommended_plan, legacy.recommended_plan),
    };
    result.validate()?;
    Ok(result)
}

fn amount(field: &'static str, value: Option<i64>) -> Result<u32, ModelError> {
    let value = value.unwrap_or(0);
    u32::try_from(value).map_err(|_| ModelError::InvalidAmount { field, value })
}

/// Format an amount in yen with thousands separators, e.g. `¥150,000`.
pub fn format_yen(amount: u32) -> String {
    let digits = amount.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    out.push('¥');
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
