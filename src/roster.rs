use crate::error::{SchedError, SchedResult};
use crate::model::{AttendanceStatus, MakeupStatus};
use crate::schedule::{load_class, occurrences_on};
use crate::store::Store;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub student_id: String,
    pub name: String,
    pub status: Option<AttendanceStatus>,
    /// Attending through a makeup booking rather than an enrollment.
    pub is_makeup: bool,
    pub season_score: i64,
    pub gold: i64,
}

/// Students expected at one live occurrence: enrolled students whose
/// enrollment covers the date, then approved makeup guests.
pub fn session_roster<S: Store>(
    store: &S,
    class_id: &str,
    date: NaiveDate,
) -> SchedResult<Vec<RosterEntry>> {
    let class = load_class(store, class_id)?;
    if occurrences_on(store, &class, date)?.is_empty() {
        return Err(SchedError::validation("no live session on that date"));
    }

    let mut ids: Vec<String> = Vec::new();
    let mut guests: HashSet<String> = HashSet::new();
    let mut seen: HashSet<String> = HashSet::new();
    for e in store.enrollments_for_class(class_id)? {
        if e.covers(date) && seen.insert(e.student_id.clone()) {
            ids.push(e.student_id);
        }
    }
    for m in store.makeups_into_session(class_id, date)? {
        if m.status == MakeupStatus::Approved && seen.insert(m.student_id.clone()) {
            guests.insert(m.student_id.clone());
            ids.push(m.student_id);
        }
    }

    let statuses: HashMap<String, AttendanceStatus> = store
        .attendance_for_session(class_id, date)?
        .into_iter()
        .map(|r| (r.student_id, r.status))
        .collect();

    Ok(store
        .student_profiles(&ids)?
        .into_iter()
        .map(|p| RosterEntry {
            status: statuses.get(&p.id).copied(),
            is_makeup: guests.contains(&p.id),
            student_id: p.id,
            name: p.name,
            season_score: p.current_season_score,
            gold: p.gold,
        })
        .collect())
}
