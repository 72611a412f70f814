use crate::error::{EligibilityError, SchedError, SchedResult};
use crate::model::{
    AttendanceRecord, AttendanceStatus, Cancellation, MakeupRequest, MakeupStatus,
};
use crate::numbering::pick_enrollment;
use crate::policy::Policy;
use crate::schedule::{self, cancelled_dates, load_class};
use crate::staging::{EditCache, SessionKey};
use crate::store::Store;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::collections::HashSet;
use tracing::info;
use uuid::Uuid;

/// Makeup credits derived from attendance and bookings; never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditBalance {
    pub earned: i64,
    pub spent: i64,
}

impl CreditBalance {
    pub fn from_history(
        records: &[AttendanceRecord],
        makeups: &[MakeupRequest],
        today: NaiveDate,
    ) -> Self {
        let earned = records
            .iter()
            .filter(|r| r.status == AttendanceStatus::Excused && r.session_date <= today)
            .count() as i64;
        let spent = makeups
            .iter()
            .filter(|m| m.status == MakeupStatus::Approved)
            .count() as i64;
        Self { earned, spent }
    }

    /// Signed balance; negative only if history was edited behind the engine's back.
    pub fn raw(&self) -> i64 {
        self.earned - self.spent
    }

    pub fn remaining(&self) -> i64 {
        self.raw().max(0)
    }
}

pub fn credit_balance<S: Store>(
    store: &S,
    student_id: &str,
    today: NaiveDate,
) -> SchedResult<CreditBalance> {
    let records = store.attendance_for_student(student_id)?;
    let makeups = store.makeups_for_student(student_id)?;
    Ok(CreditBalance::from_history(&records, &makeups, today))
}

pub fn remaining_makeup_credits<S: Store>(
    store: &S,
    student_id: &str,
    today: NaiveDate,
) -> SchedResult<i64> {
    Ok(credit_balance(store, student_id, today)?.remaining())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancellationOutcome {
    pub cancellation: Cancellation,
    /// Students newly marked excused, i.e. who gained a credit.
    pub credited_students: Vec<String>,
    /// Makeups that had been booked into the cancelled session.
    pub released_makeups: Vec<String>,
}

/// Cancels one occurrence and compensates everyone enrolled in it.
///
/// Refused once present or absent has been recorded for the occurrence: it
/// took place, and its points are already in the ledger. Any staged edits
/// for the occurrence are dropped with the cancellation.
pub fn cancel_class<S: Store + EditCache>(
    store: &S,
    class_id: &str,
    date: NaiveDate,
    reason: &str,
) -> SchedResult<CancellationOutcome> {
    let class = load_class(store, class_id)?;
    if !schedule::is_scheduled_on(&class, date) {
        return Err(SchedError::validation("class has no session on that date"));
    }
    let cancellation = Cancellation {
        class_id: class_id.to_string(),
        date,
        reason: reason.trim().to_string(),
    };

    let outcome = store.atomically(|| -> SchedResult<CancellationOutcome> {
        if !store.create_cancellation(&cancellation)? {
            return Err(SchedError::validation("session is already cancelled"));
        }

        let existing = store.attendance_for_session(class_id, date)?;
        if let Some(held) = existing
            .iter()
            .find(|r| r.status != AttendanceStatus::Excused)
        {
            return Err(SchedError::validation(format!(
                "session already has attendance recorded ({} is {})",
                held.student_id,
                held.status.as_str()
            )));
        }
        store.discard_staged(&SessionKey::new(class_id, date))?;

        let mut credited = Vec::new();
        let mut seen = HashSet::new();
        for enrollment in store.enrollments_for_class(class_id)? {
            if !enrollment.covers(date) || !seen.insert(enrollment.student_id.clone()) {
                continue;
            }
            let current = existing
                .iter()
                .find(|r| r.student_id == enrollment.student_id);
            if current.is_some_and(|r| r.status == AttendanceStatus::Excused) {
                continue;
            }
            store.upsert_attendance(&AttendanceRecord {
                student_id: enrollment.student_id.clone(),
                class_id: class_id.to_string(),
                session_date: date,
                status: AttendanceStatus::Excused,
                is_makeup: false,
            })?;
            credited.push(enrollment.student_id);
        }

        let mut released = Vec::new();
        for m in store.makeups_into_session(class_id, date)? {
            if m.status == MakeupStatus::Approved {
                store.set_makeup_status(&m.id, MakeupStatus::Rejected)?;
                released.push(m.id);
            }
        }

        Ok(CancellationOutcome {
            cancellation: cancellation.clone(),
            credited_students: credited,
            released_makeups: released,
        })
    })?;

    info!(
        class_id,
        %date,
        credited = outcome.credited_students.len(),
        released = outcome.released_makeups.len(),
        "session cancelled"
    );
    Ok(outcome)
}

#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub student_id: String,
    pub new_class_id: String,
    pub new_session_date: NaiveDate,
    pub reason: String,
    pub enrollment_id: Option<String>,
    /// The excused session being redeemed; the earliest unredeemed one when absent.
    pub original: Option<(String, NaiveDate)>,
}

/// Everything the validator resolved for an acceptable booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingPlan {
    pub original_class_id: String,
    pub original_session_date: NaiveDate,
    pub enrollment_id: Option<String>,
    pub remaining_before: i64,
}

fn within(a: NaiveDate, b: NaiveDate, days: i64) -> bool {
    (a - b).num_days().abs() <= days
}

/// Runs the eligibility checks in order, returning the first failure.
pub fn validate_booking<S: Store>(
    store: &S,
    policy: &Policy,
    req: &BookingRequest,
    now: NaiveDateTime,
) -> SchedResult<BookingPlan> {
    let today = now.date();
    let target_day = req.new_session_date;

    if store.student_profiles(&[req.student_id.clone()])?.is_empty() {
        return Err(SchedError::NotFound("student"));
    }
    let target_class = load_class(store, &req.new_class_id)?;

    let records = store.attendance_for_student(&req.student_id)?;
    let makeups = store.makeups_for_student(&req.student_id)?;
    let balance = CreditBalance::from_history(&records, &makeups, today);
    if balance.raw() <= 0 {
        return Err(EligibilityError::NoCredit.into());
    }

    let cancelled = cancelled_dates(store, &target_class.id)?;
    if cancelled.contains(&target_day) {
        return Err(EligibilityError::SlotUnavailable("session is cancelled".into()).into());
    }
    let live = schedule::expand(&target_class, &cancelled, target_day, target_day);
    if live.is_empty() {
        return Err(EligibilityError::SlotUnavailable("no session on that date".into()).into());
    }
    if !live.iter().any(|o| o.starts_at() > now) {
        return Err(EligibilityError::SlotUnavailable("session already started".into()).into());
    }
    let enrolled_there = store
        .enrollments_for_class(&target_class.id)?
        .iter()
        .any(|e| e.student_id == req.student_id && e.covers(target_day));
    let already_booked = makeups.iter().any(|m| {
        m.status == MakeupStatus::Approved
            && m.new_class_id == target_class.id
            && m.new_session_date == target_day
    });
    if enrolled_there || already_booked {
        return Err(
            EligibilityError::SlotUnavailable("student already attends that session".into())
                .into(),
        );
    }
    if let Some(cap) = target_class.capacity {
        if schedule::seats_taken(store, &target_class.id, target_day)? >= cap {
            return Err(EligibilityError::SlotUnavailable("session is full".into()).into());
        }
    }

    if target_day < today + Duration::days(policy.makeup_lead_days) {
        return Err(EligibilityError::TooLate {
            lead_days: policy.makeup_lead_days,
        }
        .into());
    }

    let adj = policy.adjacency_days;
    let window_from = (target_day - Duration::days(adj)).max(today);
    let window_to = target_day + Duration::days(adj);
    let enrollments = store.enrollments_for_student(&req.student_id)?;
    let mut checked_classes = HashSet::new();
    for enrollment in &enrollments {
        if !checked_classes.insert(enrollment.class_id.clone()) {
            continue;
        }
        let Some(class) = store.class_definition(&enrollment.class_id)? else {
            continue;
        };
        let class_cancelled = cancelled_dates(store, &class.id)?;
        for occ in schedule::expand(&class, &class_cancelled, window_from, window_to) {
            let covered = enrollments
                .iter()
                .any(|e| e.class_id == class.id && e.covers(occ.date));
            if !covered {
                continue;
            }
            let excused = records.iter().any(|r| {
                r.class_id == class.id
                    && r.session_date == occ.date
                    && r.status == AttendanceStatus::Excused
            });
            if !excused {
                return Err(EligibilityError::AdjacentToRegularSession(occ.date).into());
            }
        }
    }

    if let Some(m) = makeups.iter().find(|m| {
        m.status == MakeupStatus::Approved && within(m.new_session_date, target_day, adj)
    }) {
        return Err(EligibilityError::AdjacentToMakeup(m.new_session_date).into());
    }

    let (original_class_id, original_session_date) =
        resolve_original(&records, &makeups, req.original.as_ref(), today)?;
    let enrollment_id = match &req.enrollment_id {
        Some(id) => {
            if !enrollments.iter().any(|e| &e.id == id) {
                return Err(SchedError::NotFound("enrollment"));
            }
            Some(id.clone())
        }
        None => pick_enrollment(
            &enrollments
                .iter()
                .filter(|e| e.class_id == original_class_id)
                .cloned()
                .collect::<Vec<_>>(),
            original_session_date,
        )
        .map(|e| e.id.clone()),
    };

    Ok(BookingPlan {
        original_class_id,
        original_session_date,
        enrollment_id,
        remaining_before: balance.raw(),
    })
}

fn resolve_original(
    records: &[AttendanceRecord],
    makeups: &[MakeupRequest],
    requested: Option<&(String, NaiveDate)>,
    today: NaiveDate,
) -> SchedResult<(String, NaiveDate)> {
    let redeemed = |r: &AttendanceRecord| {
        makeups.iter().any(|m| {
            m.status == MakeupStatus::Approved
                && m.original_class_id == r.class_id
                && m.original_session_date == r.session_date
        })
    };
    let candidates = records
        .iter()
        .filter(|r| r.status == AttendanceStatus::Excused && r.session_date <= today);

    match requested {
        Some((class_id, date)) => {
            let Some(rec) = records
                .iter()
                .find(|r| &r.class_id == class_id && r.session_date == *date)
            else {
                return Err(SchedError::validation("original session has no attendance record"));
            };
            if rec.status != AttendanceStatus::Excused {
                return Err(SchedError::validation("original session is not excused"));
            }
            if redeemed(rec) {
                return Err(SchedError::validation("original session is already made up"));
            }
            Ok((rec.class_id.clone(), rec.session_date))
        }
        None => {
            let mut open: Vec<&AttendanceRecord> = candidates.filter(|r| !redeemed(*r)).collect();
            open.sort_by_key(|r| r.session_date);
            // Balance is positive, so some excused session is unlinked unless
            // requests were linked by hand; fall back to the latest excused one.
            let pick = open.first().copied().or_else(|| {
                records
                    .iter()
                    .filter(|r| r.status == AttendanceStatus::Excused && r.session_date <= today)
                    .max_by_key(|r| r.session_date)
            });
            pick.map(|r| (r.class_id.clone(), r.session_date))
                .ok_or_else(|| EligibilityError::NoCredit.into())
        }
    }
}

/// Validates and records an auto-approved makeup.
///
/// Validation runs inside the write transaction, so two requests racing for
/// the last credit cannot both pass the credit check.
pub fn book_makeup<S: Store>(
    store: &S,
    policy: &Policy,
    req: &BookingRequest,
    now: NaiveDateTime,
) -> SchedResult<MakeupRequest> {
    let booked = store.atomically(|| -> SchedResult<MakeupRequest> {
        let plan = validate_booking(store, policy, req, now)?;
        let request = MakeupRequest {
            id: Uuid::new_v4().to_string(),
            student_id: req.student_id.clone(),
            enrollment_id: plan.enrollment_id,
            original_class_id: plan.original_class_id,
            original_session_date: plan.original_session_date,
            new_class_id: req.new_class_id.clone(),
            new_session_date: req.new_session_date,
            reason: req.reason.trim().to_string(),
            status: MakeupStatus::Approved,
        };
        store.create_makeup_request(&request)?;
        Ok(request)
    });
    match &booked {
        Ok(r) => info!(
            student_id = %r.student_id,
            class_id = %r.new_class_id,
            date = %r.new_session_date,
            "makeup booked"
        ),
        Err(e) => info!(student_id = %req.student_id, code = e.code(), "makeup refused"),
    }
    booked
}

/// Withdraws a makeup; its credit returns through the derived balance.
pub fn reject_makeup<S: Store>(store: &S, request_id: &str) -> SchedResult<MakeupRequest> {
    let Some(mut request) = store.makeup_request(request_id)? else {
        return Err(SchedError::NotFound("makeup request"));
    };
    if request.status == MakeupStatus::Rejected {
        return Ok(request);
    }
    store.set_makeup_status(&request.id, MakeupStatus::Rejected)?;
    request.status = MakeupStatus::Rejected;
    info!(request_id, student_id = %request.student_id, "makeup rejected");
    Ok(request)
}
