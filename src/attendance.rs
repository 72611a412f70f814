use crate::model::AttendanceStatus;
use crate::policy::Policy;
use serde::{Deserialize, Serialize};

/// A status as the instructor selected it, including an explicit clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttendanceMark {
    Present,
    Absent,
    Excused,
    Unset,
}

impl AttendanceMark {
    pub fn status(self) -> Option<AttendanceStatus> {
        match self {
            Self::Present => Some(AttendanceStatus::Present),
            Self::Absent => Some(AttendanceStatus::Absent),
            Self::Excused => Some(AttendanceStatus::Excused),
            Self::Unset => None,
        }
    }

    pub fn from_status(status: Option<AttendanceStatus>) -> Self {
        match status {
            Some(AttendanceStatus::Present) => Self::Present,
            Some(AttendanceStatus::Absent) => Self::Absent,
            Some(AttendanceStatus::Excused) => Self::Excused,
            None => Self::Unset,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unset" => Some(Self::Unset),
            other => AttendanceStatus::parse(other).map(|st| Self::from_status(Some(st))),
        }
    }
}

/// Clicking the active status clears it; clicking another status selects it.
pub fn toggle(current: Option<AttendanceStatus>, clicked: AttendanceStatus) -> Option<AttendanceStatus> {
    if current == Some(clicked) {
        None
    } else {
        Some(clicked)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: Option<AttendanceStatus>,
    pub to: Option<AttendanceStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
    /// Leaving `excused` would take back a makeup credit the student already used.
    CreditSpent,
}

impl Refusal {
    pub fn code(self) -> &'static str {
        match self {
            Self::CreditSpent => "credit_spent",
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Self::CreditSpent => "the makeup credit from this excused session is already spent",
        }
    }
}

impl Transition {
    pub fn new(from: Option<AttendanceStatus>, to: Option<AttendanceStatus>) -> Self {
        Self { from, to }
    }

    pub fn is_change(&self) -> bool {
        self.from != self.to
    }

    pub fn grants_credit(&self) -> bool {
        self.to == Some(AttendanceStatus::Excused) && self.from != Some(AttendanceStatus::Excused)
    }

    pub fn retracts_credit(&self) -> bool {
        self.from == Some(AttendanceStatus::Excused) && self.to != Some(AttendanceStatus::Excused)
    }

    pub fn point_delta(&self, policy: &Policy) -> i64 {
        if !self.is_change() {
            return 0;
        }
        policy.points_for(self.to) - policy.points_for(self.from)
    }

    /// `credit_counted` is whether the excused session already contributes to
    /// the student's balance (its date is not in the future).
    pub fn check(&self, remaining_credits: i64, credit_counted: bool) -> Result<(), Refusal> {
        if self.retracts_credit() && credit_counted && remaining_credits < 1 {
            return Err(Refusal::CreditSpent);
        }
        Ok(())
    }
}

/// Points to apply for attendance when a session is committed.
///
/// Zero unless the instructor touched attendance and the result differs from
/// the authoritative status read at commit time.
pub fn attendance_adjustment(
    policy: &Policy,
    touched: Option<AttendanceMark>,
    authoritative: Option<AttendanceStatus>,
) -> i64 {
    match touched {
        Some(mark) => Transition::new(authoritative, mark.status()).point_delta(policy),
        None => 0,
    }
}
