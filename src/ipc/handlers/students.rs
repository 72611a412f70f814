use crate::error::SchedError;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    as_of, get_optional_date, get_optional_u32, get_required_date, get_required_str, to_result,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::makeup::remaining_makeup_credits;
use crate::model::Enrollment;
use crate::schedule::load_class;
use crate::store::{SqliteStore, Store};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn students_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let student_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, name) VALUES(?, ?)",
        (&student_id, &name),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "students" })),
    })?;
    Ok(json!({ "studentId": student_id, "name": name }))
}

fn students_enroll(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let store = SqliteStore::new(conn);
    let student_id = get_required_str(params, "studentId")?;
    let class_id = get_required_str(params, "classId")?;
    let start_date = get_required_date(params, "startDate")?;
    let end_date = get_optional_date(params, "endDate")?;
    let cycle_length = get_optional_u32(params, "cycleLength")?;
    let total_sessions = get_optional_u32(params, "totalSessions")?;

    if end_date.is_some_and(|end| end < start_date) {
        return Err(HandlerErr::bad_params("endDate must not be before startDate"));
    }
    if cycle_length == Some(0) {
        return Err(HandlerErr::bad_params("cycleLength must be at least 1"));
    }
    if store.student_profiles(&[student_id.clone()]).map_err(SchedError::from)?.is_empty() {
        return Err(SchedError::NotFound("student").into());
    }
    load_class(&store, &class_id)?;

    let enrollment = Enrollment {
        id: Uuid::new_v4().to_string(),
        student_id,
        class_id,
        start_date,
        end_date,
        cycle_length,
        total_sessions,
    };
    conn.execute(
        "INSERT INTO enrollments(id, student_id, class_id, start_date, end_date, cycle_length, total_sessions)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &enrollment.id,
            &enrollment.student_id,
            &enrollment.class_id,
            enrollment.start_date,
            enrollment.end_date,
            enrollment.cycle_length,
            enrollment.total_sessions,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "enrollments" })),
    })?;
    Ok(json!({ "enrollment": to_result(&enrollment)? }))
}

fn students_profile(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let store = SqliteStore::new(conn);
    let student_id = get_required_str(params, "studentId")?;
    let now = as_of(params)?;
    let Some(profile) = store
        .student_profiles(&[student_id.clone()])
        .map_err(SchedError::from)?
        .into_iter()
        .next()
    else {
        return Err(SchedError::NotFound("student").into());
    };
    let enrollments = store
        .enrollments_for_student(&student_id)
        .map_err(SchedError::from)?;
    let credits = remaining_makeup_credits(&store, &student_id, now.date())?;
    Ok(json!({
        "profile": to_result(&profile)?,
        "enrollments": to_result(&enrollments)?,
        "remainingMakeupCredits": credits,
    }))
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match students_create(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_students_enroll(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match students_enroll(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_students_profile(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match students_profile(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.create" => Some(handle_students_create(state, req)),
        "students.enroll" => Some(handle_students_enroll(state, req)),
        "students.profile" => Some(handle_students_profile(state, req)),
        _ => None,
    }
}
