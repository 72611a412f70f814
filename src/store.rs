use crate::error::StoreError;
use crate::model::{
    AttendanceRecord, AttendanceStatus, Cancellation, ClassDefinition, Enrollment, MakeupRequest,
    MakeupStatus, SessionTemplate, StudentProfile,
};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, TransactionBehavior};

/// Authoritative school data, as seen by the scheduling engine.
///
/// Ledger writes (`add_points`, `add_gold`) are additive so that a retried
/// commit composes with concurrent edits instead of overwriting them.
pub trait Store {
    fn class_definition(&self, class_id: &str) -> Result<Option<ClassDefinition>, StoreError>;
    fn cancellations_for_class(&self, class_id: &str) -> Result<Vec<Cancellation>, StoreError>;
    fn enrollments_for_class(&self, class_id: &str) -> Result<Vec<Enrollment>, StoreError>;
    fn enrollments_for_student(&self, student_id: &str) -> Result<Vec<Enrollment>, StoreError>;
    fn attendance_for_session(
        &self,
        class_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<AttendanceRecord>, StoreError>;
    /// Sorted by session date ascending.
    fn attendance_for_student(&self, student_id: &str) -> Result<Vec<AttendanceRecord>, StoreError>;
    fn makeups_for_student(&self, student_id: &str) -> Result<Vec<MakeupRequest>, StoreError>;
    fn makeups_into_session(
        &self,
        class_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<MakeupRequest>, StoreError>;
    fn makeup_request(&self, id: &str) -> Result<Option<MakeupRequest>, StoreError>;
    /// Profiles in the order requested; unknown ids are skipped.
    fn student_profiles(&self, ids: &[String]) -> Result<Vec<StudentProfile>, StoreError>;

    fn upsert_attendance(&self, record: &AttendanceRecord) -> Result<(), StoreError>;
    fn clear_attendance(
        &self,
        student_id: &str,
        class_id: &str,
        date: NaiveDate,
    ) -> Result<(), StoreError>;
    fn add_points(&self, student_id: &str, points: i64) -> Result<(), StoreError>;
    fn add_gold(&self, student_id: &str, gold: i64) -> Result<(), StoreError>;
    /// Returns false when the class already has a cancellation for that date.
    fn create_cancellation(&self, cancellation: &Cancellation) -> Result<bool, StoreError>;
    fn create_makeup_request(&self, request: &MakeupRequest) -> Result<(), StoreError>;
    fn set_makeup_status(&self, id: &str, status: MakeupStatus) -> Result<(), StoreError>;

    /// Runs `f` so that either all of its writes land or none do.
    fn atomically<T, E, F>(&self, f: F) -> Result<T, E>
    where
        E: From<StoreError>,
        F: FnOnce() -> Result<T, E>;
}

pub struct SqliteStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn conn(&self) -> &Connection {
        self.conn
    }

    fn session_templates(&self, class_id: &str) -> Result<Vec<SessionTemplate>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT day_of_week, start_time, end_time
                 FROM class_sessions
                 WHERE class_id = ?
                 ORDER BY day_of_week, start_time",
            )
            .map_err(StoreError::query)?;
        stmt.query_map([class_id], |r| {
            Ok(SessionTemplate {
                day_of_week: r.get(0)?,
                start_time: r.get(1)?,
                end_time: r.get(2)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(StoreError::query)
    }

    fn enrollments_where(&self, column: &str, value: &str) -> Result<Vec<Enrollment>, StoreError> {
        let sql = format!(
            "SELECT id, student_id, class_id, start_date, end_date, cycle_length, total_sessions
             FROM enrollments
             WHERE {} = ?
             ORDER BY start_date, id",
            column
        );
        let mut stmt = self.conn.prepare(&sql).map_err(StoreError::query)?;
        stmt.query_map([value], |r| {
            Ok(Enrollment {
                id: r.get(0)?,
                student_id: r.get(1)?,
                class_id: r.get(2)?,
                start_date: r.get(3)?,
                end_date: r.get(4)?,
                cycle_length: r.get(5)?,
                total_sessions: r.get(6)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(StoreError::query)
    }

    fn makeups_where(
        &self,
        clause: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<MakeupRequest>, StoreError> {
        let sql = format!(
            "SELECT id, student_id, enrollment_id, original_class_id, original_session_date,
                    new_class_id, new_session_date, reason, status
             FROM makeup_requests
             WHERE {}
             ORDER BY new_session_date, created_at, id",
            clause
        );
        let mut stmt = self.conn.prepare(&sql).map_err(StoreError::query)?;
        stmt.query_map(params, makeup_from_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(StoreError::query)
    }
}

fn status_from_sql(raw: String) -> rusqlite::Result<AttendanceStatus> {
    AttendanceStatus::parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("unknown attendance status: {}", raw).into(),
        )
    })
}

fn attendance_from_row(r: &Row<'_>) -> rusqlite::Result<AttendanceRecord> {
    Ok(AttendanceRecord {
        student_id: r.get(0)?,
        class_id: r.get(1)?,
        session_date: r.get(2)?,
        status: status_from_sql(r.get(3)?)?,
        is_makeup: r.get::<_, i64>(4)? != 0,
    })
}

fn makeup_from_row(r: &Row<'_>) -> rusqlite::Result<MakeupRequest> {
    let raw_status: String = r.get(8)?;
    let status = MakeupStatus::parse(&raw_status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            8,
            rusqlite::types::Type::Text,
            format!("unknown makeup status: {}", raw_status).into(),
        )
    })?;
    Ok(MakeupRequest {
        id: r.get(0)?,
        student_id: r.get(1)?,
        enrollment_id: r.get(2)?,
        original_class_id: r.get(3)?,
        original_session_date: r.get(4)?,
        new_class_id: r.get(5)?,
        new_session_date: r.get(6)?,
        reason: r.get(7)?,
        status,
    })
}

impl Store for SqliteStore<'_> {
    fn class_definition(&self, class_id: &str) -> Result<Option<ClassDefinition>, StoreError> {
        let head = self
            .conn
            .query_row(
                "SELECT id, name, room, capacity FROM classes WHERE id = ?",
                [class_id],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, Option<String>>(2)?,
                        r.get::<_, Option<u32>>(3)?,
                    ))
                },
            )
            .optional()
            .map_err(StoreError::query)?;
        let Some((id, name, room, capacity)) = head else {
            return Ok(None);
        };
        let sessions = self.session_templates(&id)?;
        Ok(Some(ClassDefinition {
            id,
            name,
            room,
            capacity,
            sessions,
        }))
    }

    fn cancellations_for_class(&self, class_id: &str) -> Result<Vec<Cancellation>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT class_id, date, reason FROM cancellations WHERE class_id = ? ORDER BY date",
            )
            .map_err(StoreError::query)?;
        stmt.query_map([class_id], |r| {
            Ok(Cancellation {
                class_id: r.get(0)?,
                date: r.get(1)?,
                reason: r.get(2)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(StoreError::query)
    }

    fn enrollments_for_class(&self, class_id: &str) -> Result<Vec<Enrollment>, StoreError> {
        self.enrollments_where("class_id", class_id)
    }

    fn enrollments_for_student(&self, student_id: &str) -> Result<Vec<Enrollment>, StoreError> {
        self.enrollments_where("student_id", student_id)
    }

    fn attendance_for_session(
        &self,
        class_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<AttendanceRecord>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT student_id, class_id, session_date, status, is_makeup
                 FROM attendance
                 WHERE class_id = ? AND session_date = ?
                 ORDER BY student_id",
            )
            .map_err(StoreError::query)?;
        stmt.query_map((class_id, date), attendance_from_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(StoreError::query)
    }

    fn attendance_for_student(&self, student_id: &str) -> Result<Vec<AttendanceRecord>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT student_id, class_id, session_date, status, is_makeup
                 FROM attendance
                 WHERE student_id = ?
                 ORDER BY session_date, class_id",
            )
            .map_err(StoreError::query)?;
        stmt.query_map([student_id], attendance_from_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(StoreError::query)
    }

    fn makeups_for_student(&self, student_id: &str) -> Result<Vec<MakeupRequest>, StoreError> {
        self.makeups_where("student_id = ?", [student_id])
    }

    fn makeups_into_session(
        &self,
        class_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<MakeupRequest>, StoreError> {
        self.makeups_where("new_class_id = ? AND new_session_date = ?", (class_id, date))
    }

    fn makeup_request(&self, id: &str) -> Result<Option<MakeupRequest>, StoreError> {
        Ok(self.makeups_where("id = ?", [id])?.into_iter().next())
    }

    fn student_profiles(&self, ids: &[String]) -> Result<Vec<StudentProfile>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, name, current_season_score, gold, lifetime_score
                 FROM students WHERE id = ?",
            )
            .map_err(StoreError::query)?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let profile = stmt
                .query_row([id], |r| {
                    Ok(StudentProfile {
                        id: r.get(0)?,
                        name: r.get(1)?,
                        current_season_score: r.get(2)?,
                        gold: r.get(3)?,
                        lifetime_score: r.get(4)?,
                    })
                })
                .optional()
                .map_err(StoreError::query)?;
            out.extend(profile);
        }
        Ok(out)
    }

    fn upsert_attendance(&self, record: &AttendanceRecord) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO attendance(student_id, class_id, session_date, status, is_makeup, updated_at)
                 VALUES(?, ?, ?, ?, ?, datetime('now'))
                 ON CONFLICT(student_id, class_id, session_date) DO UPDATE SET
                   status = excluded.status,
                   is_makeup = excluded.is_makeup,
                   updated_at = excluded.updated_at",
                (
                    &record.student_id,
                    &record.class_id,
                    record.session_date,
                    record.status.as_str(),
                    record.is_makeup as i64,
                ),
            )
            .map_err(StoreError::update)?;
        Ok(())
    }

    fn clear_attendance(
        &self,
        student_id: &str,
        class_id: &str,
        date: NaiveDate,
    ) -> Result<(), StoreError> {
        self.conn
            .execute(
                "DELETE FROM attendance WHERE student_id = ? AND class_id = ? AND session_date = ?",
                (student_id, class_id, date),
            )
            .map_err(StoreError::update)?;
        Ok(())
    }

    fn add_points(&self, student_id: &str, points: i64) -> Result<(), StoreError> {
        let changed = self
            .conn
            .execute(
                "UPDATE students
                 SET current_season_score = current_season_score + ?1,
                     lifetime_score = lifetime_score + ?1
                 WHERE id = ?2",
                (points, student_id),
            )
            .map_err(StoreError::update)?;
        if changed != 1 {
            return Err(StoreError::update(format!("student {} not found", student_id)));
        }
        Ok(())
    }

    fn add_gold(&self, student_id: &str, gold: i64) -> Result<(), StoreError> {
        let changed = self
            .conn
            .execute(
                "UPDATE students SET gold = gold + ? WHERE id = ?",
                (gold, student_id),
            )
            .map_err(StoreError::update)?;
        if changed != 1 {
            return Err(StoreError::update(format!("student {} not found", student_id)));
        }
        Ok(())
    }

    fn create_cancellation(&self, cancellation: &Cancellation) -> Result<bool, StoreError> {
        let inserted = self
            .conn
            .execute(
                "INSERT INTO cancellations(class_id, date, reason) VALUES(?, ?, ?)
                 ON CONFLICT(class_id, date) DO NOTHING",
                (
                    &cancellation.class_id,
                    cancellation.date,
                    &cancellation.reason,
                ),
            )
            .map_err(StoreError::update)?;
        Ok(inserted == 1)
    }

    fn create_makeup_request(&self, request: &MakeupRequest) -> Result<(), StoreError> {
        self.conn
            .execute(
                "INSERT INTO makeup_requests(
                    id, student_id, enrollment_id, original_class_id, original_session_date,
                    new_class_id, new_session_date, reason, status)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    &request.id,
                    &request.student_id,
                    &request.enrollment_id,
                    &request.original_class_id,
                    request.original_session_date,
                    &request.new_class_id,
                    request.new_session_date,
                    &request.reason,
                    request.status.as_str(),
                ),
            )
            .map_err(StoreError::update)?;
        Ok(())
    }

    fn set_makeup_status(&self, id: &str, status: MakeupStatus) -> Result<(), StoreError> {
        self.conn
            .execute(
                "UPDATE makeup_requests SET status = ? WHERE id = ?",
                (status.as_str(), id),
            )
            .map_err(StoreError::update)?;
        Ok(())
    }

    fn atomically<T, E, F>(&self, f: F) -> Result<T, E>
    where
        E: From<StoreError>,
        F: FnOnce() -> Result<T, E>,
    {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)
            .map_err(StoreError::tx)?;
        // Dropping `tx` on the error path rolls back.
        let out = f()?;
        tx.commit().map_err(StoreError::tx)?;
        Ok(out)
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::db;

    #[test]
    fn class_definition_includes_templates() {
        let conn = db::open_in_memory().unwrap();
        insert_class(&conn, "c1", Some(8), &[(3, "16:00", "17:00"), (1, "09:00", "10:00")]);
        let store = SqliteStore::new(&conn);
        let class = store.class_definition("c1").unwrap().expect("class");
        assert_eq!(class.capacity, Some(8));
        assert_eq!(class.sessions.len(), 2);
        assert_eq!(class.sessions[0].day_of_week, 1);
        assert!(store.class_definition("missing").unwrap().is_none());
    }

    #[test]
    fn ledger_ops_are_additive() {
        let conn = db::open_in_memory().unwrap();
        insert_student(&conn, "s1", 40);
        let store = SqliteStore::new(&conn);
        store.add_points("s1", 100).unwrap();
        store.add_points("s1", -30).unwrap();
        store.add_gold("s1", 5).unwrap();
        let p = &store.student_profiles(&["s1".to_string()]).unwrap()[0];
        assert_eq!(p.current_season_score, 110);
        assert_eq!(p.lifetime_score, 70);
        assert_eq!(p.gold, 5);
        assert!(store.add_points("nobody", 1).is_err());
    }

    #[test]
    fn upsert_keeps_one_record_per_natural_key() {
        let conn = db::open_in_memory().unwrap();
        insert_class(&conn, "c1", None, &[(1, "09:00", "10:00")]);
        insert_student(&conn, "s1", 0);
        let store = SqliteStore::new(&conn);
        let mut rec = AttendanceRecord {
            student_id: "s1".into(),
            class_id: "c1".into(),
            session_date: d("2026-10-19"),
            status: AttendanceStatus::Present,
            is_makeup: false,
        };
        store.upsert_attendance(&rec).unwrap();
        rec.status = AttendanceStatus::Excused;
        store.upsert_attendance(&rec).unwrap();
        let rows = store.attendance_for_session("c1", d("2026-10-19")).unwrap();
        assert_eq!(rows, vec![rec]);
    }

    #[test]
    fn atomically_rolls_back_on_error() {
        let conn = db::open_in_memory().unwrap();
        insert_student(&conn, "s1", 0);
        let store = SqliteStore::new(&conn);
        let res: Result<(), StoreError> = store.atomically(|| {
            store.add_points("s1", 10)?;
            store.add_points("ghost", 10)
        });
        assert!(res.is_err());
        let p = &store.student_profiles(&["s1".to_string()]).unwrap()[0];
        assert_eq!(p.current_season_score, 0);
    }

    #[test]
    fn second_cancellation_for_same_date_is_refused() {
        let conn = db::open_in_memory().unwrap();
        insert_class(&conn, "c1", None, &[(1, "09:00", "10:00")]);
        let store = SqliteStore::new(&conn);
        let c = Cancellation {
            class_id: "c1".into(),
            date: d("2026-10-19"),
            reason: "holiday".into(),
        };
        assert!(store.create_cancellation(&c).unwrap());
        assert!(!store.create_cancellation(&c).unwrap());
        assert_eq!(store.cancellations_for_class("c1").unwrap().len(), 1);
    }
}
