use crate::error::{SchedError, SchedResult};
use crate::model::{AttendanceStatus, ClassDefinition, MakeupStatus, SessionOccurrence};
use crate::store::Store;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashSet;

pub const MAX_WINDOW_DAYS: i64 = 400;

/// Expands the weekly templates of `class` over `[from, to]`, skipping cancelled dates.
pub fn expand(
    class: &ClassDefinition,
    cancelled: &HashSet<NaiveDate>,
    from: NaiveDate,
    to: NaiveDate,
) -> Vec<SessionOccurrence> {
    let mut out = Vec::new();
    if from > to {
        return out;
    }
    for date in from.iter_days().take_while(|d| *d <= to) {
        if cancelled.contains(&date) {
            continue;
        }
        for t in class.sessions.iter().filter(|t| t.matches(date)) {
            out.push(SessionOccurrence {
                class_id: class.id.clone(),
                date,
                start_time: t.start_time,
                end_time: t.end_time,
            });
        }
    }
    out.sort();
    out
}

/// True when some template falls on `date`, cancelled or not.
pub fn is_scheduled_on(class: &ClassDefinition, date: NaiveDate) -> bool {
    class.sessions.iter().any(|t| t.matches(date))
}

pub fn cancelled_dates<S: Store>(store: &S, class_id: &str) -> SchedResult<HashSet<NaiveDate>> {
    Ok(store
        .cancellations_for_class(class_id)?
        .into_iter()
        .map(|c| c.date)
        .collect())
}

pub fn load_class<S: Store>(store: &S, class_id: &str) -> SchedResult<ClassDefinition> {
    store
        .class_definition(class_id)?
        .ok_or(SchedError::NotFound("class"))
}

/// The live occurrences of a class on one date.
pub fn occurrences_on<S: Store>(
    store: &S,
    class: &ClassDefinition,
    date: NaiveDate,
) -> SchedResult<Vec<SessionOccurrence>> {
    let cancelled = cancelled_dates(store, &class.id)?;
    Ok(expand(class, &cancelled, date, date))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OccurrenceView {
    #[serde(flatten)]
    pub occurrence: SessionOccurrence,
    pub seats_taken: u32,
    pub capacity: Option<u32>,
    pub is_full: bool,
}

/// Enrolled students covering the date plus approved makeup guests. An
/// enrolled student already excused for the date gives up the seat; that
/// includes everyone who booked a makeup out of it.
pub fn seats_taken<S: Store>(store: &S, class_id: &str, date: NaiveDate) -> SchedResult<u32> {
    let excused: HashSet<String> = store
        .attendance_for_session(class_id, date)?
        .into_iter()
        .filter(|r| r.status == AttendanceStatus::Excused && !r.is_makeup)
        .map(|r| r.student_id)
        .collect();
    let enrolled = store
        .enrollments_for_class(class_id)?
        .iter()
        .filter(|e| e.covers(date) && !excused.contains(&e.student_id))
        .map(|e| e.student_id.as_str())
        .collect::<HashSet<_>>()
        .len();
    let guests = store
        .makeups_into_session(class_id, date)?
        .iter()
        .filter(|m| m.status == MakeupStatus::Approved)
        .count();
    Ok((enrolled + guests) as u32)
}

pub fn list_occurrences<S: Store>(
    store: &S,
    class_id: &str,
    from: NaiveDate,
    to: NaiveDate,
) -> SchedResult<Vec<OccurrenceView>> {
    if to < from {
        return Err(SchedError::validation("to must not be before from"));
    }
    if (to - from).num_days() > MAX_WINDOW_DAYS {
        return Err(SchedError::validation(format!(
            "window must be at most {} days",
            MAX_WINDOW_DAYS
        )));
    }
    let class = load_class(store, class_id)?;
    let cancelled = cancelled_dates(store, class_id)?;
    let mut out = Vec::new();
    for occurrence in expand(&class, &cancelled, from, to) {
        let taken = seats_taken(store, class_id, occurrence.date)?;
        out.push(OccurrenceView {
            occurrence,
            seats_taken: taken,
            capacity: class.capacity,
            is_full: class.capacity.map_or(false, |cap| taken >= cap),
        });
    }
    Ok(out)
}
