use chrono::NaiveDate;
use serde_json::json;
use thiserror::Error;

/// Reasons a makeup booking is refused. Surfaced verbatim to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EligibilityError {
    #[error("no makeup credit remaining")]
    NoCredit,

    #[error("target session unavailable: {0}")]
    SlotUnavailable(String),

    #[error("makeup must be booked at least {lead_days} day(s) ahead")]
    TooLate { lead_days: i64 },

    #[error("too close to the regular session on {0}")]
    AdjacentToRegularSession(NaiveDate),

    #[error("too close to the makeup session on {0}")]
    AdjacentToMakeup(NaiveDate),
}

impl EligibilityError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoCredit => "no_credit",
            Self::SlotUnavailable(_) => "slot_unavailable",
            Self::TooLate { .. } => "too_late",
            Self::AdjacentToRegularSession(_) => "adjacent_to_regular_session",
            Self::AdjacentToMakeup(_) => "adjacent_to_makeup",
        }
    }
}

#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct StoreError {
    pub code: &'static str,
    pub message: String,
}

impl StoreError {
    pub fn query(e: impl std::fmt::Display) -> Self {
        Self {
            code: "db_query_failed",
            message: e.to_string(),
        }
    }

    pub fn update(e: impl std::fmt::Display) -> Self {
        Self {
            code: "db_update_failed",
            message: e.to_string(),
        }
    }

    pub fn tx(e: impl std::fmt::Display) -> Self {
        Self {
            code: "db_tx_failed",
            message: e.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SchedError {
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error(transparent)]
    Eligibility(#[from] EligibilityError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SchedError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "bad_params",
            Self::NotFound(_) => "not_found",
            Self::Eligibility(e) => e.code(),
            Self::Store(e) => e.code,
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::Eligibility(EligibilityError::AdjacentToRegularSession(date))
            | Self::Eligibility(EligibilityError::AdjacentToMakeup(date)) => {
                Some(json!({ "conflictDate": date }))
            }
            Self::Eligibility(EligibilityError::TooLate { lead_days }) => {
                Some(json!({ "leadDays": lead_days }))
            }
            _ => None,
        }
    }
}

pub type SchedResult<T> = Result<T, SchedError>;
