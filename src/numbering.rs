use crate::error::SchedResult;
use crate::model::{AttendanceRecord, AttendanceStatus, Enrollment};
use crate::store::Store;
use chrono::NaiveDate;
use serde::{Serialize, Serializer};
use std::fmt;

/// What the calendar shows for a student's session: "3/4", "7", "Not yet", "Finished".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionLabel {
    Numbered { ordinal: u32, cycle: Option<u32> },
    NotYet,
    Finished,
}

impl SessionLabel {
    /// Numerator shown to the user. Equals the ordinal when there is no cycle.
    pub fn position(&self) -> Option<u32> {
        match *self {
            Self::Numbered {
                ordinal,
                cycle: Some(cycle),
            } => Some(cycle_position(ordinal, cycle)),
            Self::Numbered { ordinal, cycle: None } => Some(ordinal),
            _ => None,
        }
    }
}

impl fmt::Display for SessionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Numbered {
                ordinal,
                cycle: Some(cycle),
            } => write!(f, "{}/{}", cycle_position(ordinal, cycle), cycle),
            Self::Numbered { ordinal, cycle: None } => write!(f, "{}", ordinal),
            Self::NotYet => f.write_str("Not yet"),
            Self::Finished => f.write_str("Finished"),
        }
    }
}

impl Serialize for SessionLabel {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

/// Reduces an absolute ordinal into a cycle, showing `cycle` instead of 0.
pub fn cycle_position(ordinal: u32, cycle: u32) -> u32 {
    if cycle == 0 {
        return ordinal;
    }
    match ordinal % cycle {
        0 => cycle,
        r => r,
    }
}

fn counts_as_attended(r: &AttendanceRecord) -> bool {
    r.status == AttendanceStatus::Present
}

/// Absolute ordinal of the session on `date`: attendances strictly before it, plus one.
///
/// Absences and excused sessions do not advance the count. Input order does not matter.
pub fn ordinal_on(records: &[AttendanceRecord], date: NaiveDate) -> u32 {
    let before = records
        .iter()
        .filter(|r| counts_as_attended(r) && r.session_date < date)
        .count();
    before as u32 + 1
}

/// Displayed numerator for every attendance in chronological order.
pub fn numerators(records: &[AttendanceRecord], cycle: Option<u32>) -> Vec<u32> {
    let mut attended: Vec<&AttendanceRecord> =
        records.iter().filter(|r| counts_as_attended(r)).collect();
    attended.sort_by_key(|r| r.session_date);
    (1..=attended.len() as u32)
        .map(|ordinal| match cycle {
            Some(c) if c > 0 => cycle_position(ordinal, c),
            _ => ordinal,
        })
        .collect()
}

/// Label for `date` given the student's history. Never fails: missing
/// enrollment metadata degrades to a plain running count.
pub fn label_for(
    records: &[AttendanceRecord],
    enrollment: Option<&Enrollment>,
    date: NaiveDate,
) -> SessionLabel {
    let Some(enrollment) = enrollment else {
        return SessionLabel::Numbered {
            ordinal: ordinal_on(records, date),
            cycle: None,
        };
    };
    if date < enrollment.start_date {
        return SessionLabel::NotYet;
    }
    if enrollment.end_date.is_some_and(|end| date > end) {
        return SessionLabel::Finished;
    }

    // Makeup attendance in another class still counts toward this enrollment.
    let relevant: Vec<AttendanceRecord> = records
        .iter()
        .filter(|r| enrollment.covers(r.session_date))
        .filter(|r| r.class_id == enrollment.class_id || r.is_makeup)
        .cloned()
        .collect();
    let ordinal = ordinal_on(&relevant, date);
    if enrollment.total_sessions.is_some_and(|total| ordinal > total) {
        return SessionLabel::Finished;
    }
    SessionLabel::Numbered {
        ordinal,
        cycle: enrollment.cycle_length.filter(|c| *c > 0),
    }
}

/// Prefers the enrollment covering `date`, then the latest one already
/// started, then the earliest upcoming one.
pub fn pick_enrollment(enrollments: &[Enrollment], date: NaiveDate) -> Option<&Enrollment> {
    enrollments
        .iter()
        .filter(|e| e.covers(date))
        .max_by_key(|e| e.start_date)
        .or_else(|| {
            enrollments
                .iter()
                .filter(|e| e.start_date <= date)
                .max_by_key(|e| e.start_date)
        })
        .or_else(|| enrollments.iter().min_by_key(|e| e.start_date))
}

pub fn session_number_for<S: Store>(
    store: &S,
    student_id: &str,
    date: NaiveDate,
) -> SchedResult<SessionLabel> {
    let enrollments = store.enrollments_for_student(student_id)?;
    let records = store.attendance_for_student(student_id)?;
    Ok(label_for(&records, pick_enrollment(&enrollments, date), date))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fixtures::d;

    fn present(date: NaiveDate) -> AttendanceRecord {
        AttendanceRecord {
            student_id: "s1".into(),
            class_id: "c1".into(),
            session_date: date,
            status: AttendanceStatus::Present,
            is_makeup: false,
        }
    }

    fn weekly_history(n: usize) -> Vec<AttendanceRecord> {
        d("2026-09-07")
            .iter_weeks()
            .take(n)
            .map(present)
            .collect()
    }

    fn enrollment() -> Enrollment {
        Enrollment {
            id: "e1".into(),
            student_id: "s1".into(),
            class_id: "c1".into(),
            start_date: d("2026-09-01"),
            end_date: Some(d("2027-06-30")),
            cycle_length: Some(4),
            total_sessions: Some(12),
        }
    }

    #[test]
    fn ten_attendances_cycle_of_four() {
        let got = numerators(&weekly_history(10), Some(4));
        assert_eq!(got, vec![1, 2, 3, 4, 1, 2, 3, 4, 1, 2]);
    }

    #[test]
    fn fourth_shows_four_fifth_wraps() {
        let hist = weekly_history(5);
        let e = enrollment();
        assert_eq!(label_for(&hist, Some(&e), hist[3].session_date).to_string(), "4/4");
        assert_eq!(label_for(&hist, Some(&e), hist[4].session_date).to_string(), "1/4");
    }

    #[test]
    fn absences_do_not_advance_the_count() {
        let mut hist = weekly_history(3);
        hist[1].status = AttendanceStatus::Absent;
        let e = enrollment();
        assert_eq!(label_for(&hist, Some(&e), hist[2].session_date).to_string(), "2/4");
        assert_eq!(numerators(&hist, Some(4)), vec![1, 2]);
    }

    #[test]
    fn missing_enrollment_falls_back_to_plain_count() {
        let hist = weekly_history(6);
        let label = label_for(&hist, None, hist[5].session_date);
        assert_eq!(label.to_string(), "6");
        assert_eq!(label.position(), Some(6));
    }

    #[test]
    fn outside_enrollment_window() {
        let e = enrollment();
        assert_eq!(label_for(&[], Some(&e), d("2026-08-01")), SessionLabel::NotYet);
        assert_eq!(label_for(&[], Some(&e), d("2027-07-01")), SessionLabel::Finished);
    }

    #[test]
    fn beyond_total_sessions_is_finished() {
        let hist = weekly_history(12);
        let e = enrollment();
        let after_last = hist[11].session_date + chrono::Duration::days(7);
        assert_eq!(label_for(&hist, Some(&e), hist[11].session_date).to_string(), "4/4");
        assert_eq!(label_for(&hist, Some(&e), after_last), SessionLabel::Finished);
    }

    #[test]
    fn makeup_in_other_class_counts() {
        let mut hist = weekly_history(2);
        hist.push(AttendanceRecord {
            class_id: "c9".into(),
            is_makeup: true,
            ..present(d("2026-09-16"))
        });
        hist.push(AttendanceRecord {
            class_id: "c9".into(),
            ..present(d("2026-09-17"))
        });
        let e = enrollment();
        assert_eq!(label_for(&hist, Some(&e), d("2026-09-21")).to_string(), "4/4");
    }

    #[test]
    fn zero_cycle_is_treated_as_absent() {
        let mut e = enrollment();
        e.cycle_length = Some(0);
        let hist = weekly_history(5);
        assert_eq!(label_for(&hist, Some(&e), hist[4].session_date).to_string(), "5");
    }

    #[test]
    fn picks_covering_enrollment_first() {
        let old = Enrollment {
            id: "old".into(),
            start_date: d("2025-09-01"),
            end_date: Some(d("2026-06-30")),
            ..enrollment()
        };
        let current = enrollment();
        let all = vec![old, current];
        assert_eq!(pick_enrollment(&all, d("2026-10-01")).map(|e| e.id.as_str()), Some("e1"));
        assert_eq!(pick_enrollment(&all, d("2026-07-15")).map(|e| e.id.as_str()), Some("old"));
        assert_eq!(pick_enrollment(&all, d("2024-01-01")).map(|e| e.id.as_str()), Some("old"));
        assert!(pick_enrollment(&[], d("2026-10-01")).is_none());
    }
}
