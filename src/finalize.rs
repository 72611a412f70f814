use crate::attendance::{attendance_adjustment, Transition};
use crate::error::{SchedError, SchedResult};
use crate::makeup::credit_balance;
use crate::model::{AttendanceRecord, MakeupStatus, StudentProfile};
use crate::policy::Policy;
use crate::schedule::{load_class, occurrences_on};
use crate::staging::{EditCache, SessionKey};
use crate::store::Store;
use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Condvar, Mutex};
use tracing::{error, info, warn};

/// In-process mutual exclusion per session. Writers in other processes are
/// held off by the write transaction that finalize runs in.
#[derive(Default)]
pub struct SessionLocks {
    held: Mutex<HashSet<SessionKey>>,
    released: Condvar,
}

pub struct SessionGuard<'a> {
    locks: &'a SessionLocks,
    key: SessionKey,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks while another finalize holds the same key. Other keys are independent.
    pub fn acquire(&self, key: &SessionKey) -> SessionGuard<'_> {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        while held.contains(key) {
            held = self
                .released
                .wait(held)
                .unwrap_or_else(|e| e.into_inner());
        }
        held.insert(key.clone());
        SessionGuard {
            locks: self,
            key: key.clone(),
        }
    }

    pub fn is_held(&self, key: &SessionKey) -> bool {
        self.held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(key)
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        let mut held = self.locks.held.lock().unwrap_or_else(|e| e.into_inner());
        held.remove(&self.key);
        self.locks.released.notify_all();
    }
}

/// A student whose staged edits were not committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentConflict {
    pub student_id: String,
    pub reason: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeOutcome {
    pub updated_attendance: Vec<AttendanceRecord>,
    /// Students whose attendance went back to unset.
    pub cleared_attendance: Vec<String>,
    pub updated_profiles: Vec<StudentProfile>,
    pub point_ops: usize,
    pub gold_ops: usize,
    pub conflicts: Vec<StudentConflict>,
}

enum AttendanceWrite {
    Upsert(AttendanceRecord),
    Clear,
}

struct StudentPlan {
    student_id: String,
    points: i64,
    gold: i64,
    write: Option<AttendanceWrite>,
}

/// Commits the staged buffer of one session.
///
/// The buffer load, the attendance re-read, the diff and every write run in
/// one write transaction, so another process on the same workspace cannot
/// commit between the read and the write. Only statuses that differ from
/// the fresh read are written, and only touched attendance contributes
/// points. A store failure aborts everything and leaves the buffer as it was.
pub fn finalize_session<S: Store + EditCache>(
    store: &S,
    locks: &SessionLocks,
    policy: &Policy,
    key: &SessionKey,
    now: NaiveDateTime,
) -> SchedResult<FinalizeOutcome> {
    let _guard = locks.acquire(key);

    let committed = store.atomically(|| commit_staged(store, policy, key, now));
    let (mut outcome, affected) = match committed {
        Ok(v) => v,
        Err(e) => {
            error!(session = %key, code = e.code(), "finalize aborted: {}", e);
            return Err(e);
        }
    };
    if !affected.is_empty() {
        outcome.updated_profiles = store.student_profiles(&affected)?;
    }

    if !outcome.conflicts.is_empty() {
        warn!(
            session = %key,
            conflicts = outcome.conflicts.len(),
            "finalize skipped students"
        );
    }
    info!(
        session = %key,
        attendance_writes = outcome.updated_attendance.len() + outcome.cleared_attendance.len(),
        point_ops = outcome.point_ops,
        gold_ops = outcome.gold_ops,
        "session finalized"
    );
    Ok(outcome)
}

/// Body of the finalize transaction. Returns the outcome and the students
/// whose ledgers were planned.
fn commit_staged<S: Store + EditCache>(
    store: &S,
    policy: &Policy,
    key: &SessionKey,
    now: NaiveDateTime,
) -> SchedResult<(FinalizeOutcome, Vec<String>)> {
    let Some(mut edit) = store.load_staged(key)? else {
        return Ok((FinalizeOutcome::default(), Vec::new()));
    };
    if edit.is_empty() {
        store.discard_staged(key)?;
        return Ok((FinalizeOutcome::default(), Vec::new()));
    }

    let class = load_class(store, &key.class_id)?;
    if occurrences_on(store, &class, key.date)?.is_empty() {
        return Err(SchedError::validation("no live session on that date"));
    }

    let fresh: HashMap<String, AttendanceRecord> = store
        .attendance_for_session(&key.class_id, key.date)?
        .into_iter()
        .map(|r| (r.student_id.clone(), r))
        .collect();
    let guests: HashSet<String> = store
        .makeups_into_session(&key.class_id, key.date)?
        .into_iter()
        .filter(|m| m.status == MakeupStatus::Approved)
        .map(|m| m.student_id)
        .collect();
    let credit_counted = key.date <= now.date();

    let mut plans: Vec<StudentPlan> = Vec::new();
    let mut conflicts: Vec<StudentConflict> = Vec::new();

    for (student_id, entry) in edit.entries.iter_mut().filter(|(_, e)| e.is_touched()) {
        let authoritative = fresh.get(student_id).map(|r| r.status);
        let mut write = None;
        let mut adjustment = 0;

        if let Some(mark) = entry.attendance {
            let target = mark.status();
            if authoritative != entry.baseline_attendance && authoritative != target {
                conflicts.push(StudentConflict {
                    student_id: student_id.clone(),
                    reason: "attendance_changed",
                    message: format!(
                        "attendance changed from {} to {} since the session was opened",
                        status_label(entry.baseline_attendance),
                        status_label(authoritative)
                    ),
                });
                // A retry now means "apply my mark over what is there".
                entry.baseline_attendance = authoritative;
                continue;
            }
            let transition = Transition::new(authoritative, target);
            if transition.is_change() {
                if transition.retracts_credit() {
                    let balance = credit_balance(store, student_id, now.date())?;
                    if let Err(refusal) = transition.check(balance.raw(), credit_counted) {
                        conflicts.push(StudentConflict {
                            student_id: student_id.clone(),
                            reason: refusal.code(),
                            message: refusal.message().to_string(),
                        });
                        continue;
                    }
                }
                adjustment = attendance_adjustment(policy, entry.attendance, authoritative);
                write = Some(match target {
                    Some(status) => AttendanceWrite::Upsert(AttendanceRecord {
                        student_id: student_id.clone(),
                        class_id: key.class_id.clone(),
                        session_date: key.date,
                        status,
                        is_makeup: guests.contains(student_id),
                    }),
                    None => AttendanceWrite::Clear,
                });
            }
        }

        plans.push(StudentPlan {
            student_id: student_id.clone(),
            points: entry.points_delta() + adjustment,
            gold: entry.gold_delta(),
            write,
        });
    }

    let conflicted: HashSet<&str> = conflicts.iter().map(|c| c.student_id.as_str()).collect();
    edit.entries
        .retain(|student_id, _| conflicted.contains(student_id.as_str()));

    let mut out = FinalizeOutcome::default();
    for plan in &plans {
        if plan.points != 0 {
            store.add_points(&plan.student_id, plan.points)?;
            out.point_ops += 1;
        }
        if plan.gold != 0 {
            store.add_gold(&plan.student_id, plan.gold)?;
            out.gold_ops += 1;
        }
        match &plan.write {
            Some(AttendanceWrite::Upsert(record)) => {
                store.upsert_attendance(record)?;
                out.updated_attendance.push(record.clone());
            }
            Some(AttendanceWrite::Clear) => {
                store.clear_attendance(&plan.student_id, &key.class_id, key.date)?;
                out.cleared_attendance.push(plan.student_id.clone());
            }
            None => {}
        }
    }
    // Buffer bookkeeping shares the transaction so a retry can never
    // see committed entries again.
    if edit.entries.is_empty() {
        store.discard_staged(key)?;
    } else {
        store.save_staged(&edit)?;
    }
    out.conflicts = conflicts;

    let affected = plans.into_iter().map(|p| p.student_id).collect();
    Ok((out, affected))
}

fn status_label(status: Option<crate::model::AttendanceStatus>) -> &'static str {
    status.map_or("unset", |s| s.as_str())
}
