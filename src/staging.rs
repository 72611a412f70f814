use crate::attendance::{toggle, AttendanceMark};
use crate::error::{SchedError, SchedResult, StoreError};
use crate::model::AttendanceStatus;
use crate::roster::{session_roster, RosterEntry};
use crate::store::{SqliteStore, Store};
use chrono::NaiveDate;
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identifies one occurrence of one class.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionKey {
    pub class_id: String,
    pub date: NaiveDate,
}

impl SessionKey {
    pub fn new(class_id: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            class_id: class_id.into(),
            date,
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.class_id, self.date)
    }
}

/// Uncommitted edits for one student. A `Some` field means the instructor
/// touched it, even when the value is zero or `unset`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StagedEntry {
    /// Season score when the session was opened.
    pub baseline_score: i64,
    #[serde(default)]
    pub baseline_attendance: Option<AttendanceStatus>,
    /// New absolute season score as typed by the instructor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<i64>,
    /// Gold to add.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gold: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attendance: Option<AttendanceMark>,
}

impl StagedEntry {
    fn from_roster(r: &RosterEntry) -> Self {
        Self {
            baseline_score: r.season_score,
            baseline_attendance: r.status,
            ..Self::default()
        }
    }

    pub fn is_touched(&self) -> bool {
        self.score.is_some() || self.gold.is_some() || self.attendance.is_some()
    }

    pub fn points_delta(&self) -> i64 {
        self.score.map_or(0, |s| s - self.baseline_score)
    }

    pub fn gold_delta(&self) -> i64 {
        self.gold.unwrap_or(0)
    }

    /// Attendance as the instructor currently sees it.
    pub fn effective_attendance(&self) -> Option<AttendanceStatus> {
        match self.attendance {
            Some(mark) => mark.status(),
            None => self.baseline_attendance,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StagedEdit {
    pub class_id: String,
    pub session_date: NaiveDate,
    pub entries: BTreeMap<String, StagedEntry>,
}

impl StagedEdit {
    pub fn new(key: &SessionKey) -> Self {
        Self {
            class_id: key.class_id.clone(),
            session_date: key.date,
            entries: BTreeMap::new(),
        }
    }

    pub fn key(&self) -> SessionKey {
        SessionKey::new(self.class_id.clone(), self.session_date)
    }

    pub fn is_empty(&self) -> bool {
        !self.entries.values().any(StagedEntry::is_touched)
    }

    fn entry_mut(&mut self, student_id: &str) -> SchedResult<&mut StagedEntry> {
        self.entries
            .get_mut(student_id)
            .ok_or_else(|| SchedError::validation(format!("{} is not on this session", student_id)))
    }

    pub fn set_score(&mut self, student_id: &str, score: Option<i64>) -> SchedResult<()> {
        self.entry_mut(student_id)?.score = score;
        Ok(())
    }

    pub fn set_gold(&mut self, student_id: &str, gold: Option<i64>) -> SchedResult<()> {
        self.entry_mut(student_id)?.gold = gold;
        Ok(())
    }

    pub fn set_attendance(
        &mut self,
        student_id: &str,
        mark: Option<AttendanceMark>,
    ) -> SchedResult<()> {
        self.entry_mut(student_id)?.attendance = mark;
        Ok(())
    }

    /// A click on a status button; clicking the active one clears it.
    pub fn click(&mut self, student_id: &str, clicked: AttendanceStatus) -> SchedResult<AttendanceMark> {
        let entry = self.entry_mut(student_id)?;
        let next = AttendanceMark::from_status(toggle(entry.effective_attendance(), clicked));
        entry.attendance = Some(next);
        Ok(next)
    }

    /// Adds untouched entries for roster students the buffer does not know yet.
    fn absorb_roster(&mut self, roster: &[RosterEntry]) {
        for r in roster {
            self.entries
                .entry(r.student_id.clone())
                .or_insert_with(|| StagedEntry::from_roster(r));
        }
    }
}

/// Durable scratch space for staged edits, separate from authoritative data.
pub trait EditCache {
    fn load_staged(&self, key: &SessionKey) -> Result<Option<StagedEdit>, StoreError>;
    fn save_staged(&self, edit: &StagedEdit) -> Result<(), StoreError>;
    fn discard_staged(&self, key: &SessionKey) -> Result<(), StoreError>;
}

impl EditCache for SqliteStore<'_> {
    fn load_staged(&self, key: &SessionKey) -> Result<Option<StagedEdit>, StoreError> {
        let payload: Option<String> = self
            .conn()
            .query_row(
                "SELECT payload FROM staged_edits WHERE class_id = ? AND session_date = ?",
                (&key.class_id, key.date),
                |r| r.get(0),
            )
            .optional()
            .map_err(StoreError::query)?;
        match payload {
            Some(text) => serde_json::from_str(&text)
                .map(Some)
                .map_err(|e| StoreError::query(format!("staged edits for {} unreadable: {}", key, e))),
            None => Ok(None),
        }
    }

    fn save_staged(&self, edit: &StagedEdit) -> Result<(), StoreError> {
        let payload = serde_json::to_string(edit).map_err(StoreError::update)?;
        self.conn()
            .execute(
                "INSERT INTO staged_edits(class_id, session_date, payload, updated_at)
                 VALUES(?, ?, ?, datetime('now'))
                 ON CONFLICT(class_id, session_date) DO UPDATE SET
                   payload = excluded.payload,
                   updated_at = excluded.updated_at",
                (&edit.class_id, edit.session_date, payload),
            )
            .map_err(StoreError::update)?;
        Ok(())
    }

    fn discard_staged(&self, key: &SessionKey) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "DELETE FROM staged_edits WHERE class_id = ? AND session_date = ?",
                (&key.class_id, key.date),
            )
            .map_err(StoreError::update)?;
        Ok(())
    }
}

/// Opens the editor for one session, rehydrating any buffer left from before.
pub fn open_staged_edits<S: Store + EditCache>(store: &S, key: &SessionKey) -> SchedResult<StagedEdit> {
    let roster = session_roster(store, &key.class_id, key.date)?;
    let mut edit = store
        .load_staged(key)?
        .unwrap_or_else(|| StagedEdit::new(key));
    edit.absorb_roster(&roster);
    Ok(edit)
}

/// Persists the buffer, or drops it once nothing in it is touched.
pub fn save_staged_edits<C: EditCache>(cache: &C, edit: &StagedEdit) -> SchedResult<()> {
    if edit.is_empty() {
        cache.discard_staged(&edit.key())?;
    } else {
        cache.save_staged(edit)?;
    }
    Ok(())
}
