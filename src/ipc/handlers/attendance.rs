use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_required_date, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::numbering::session_number_for;
use crate::store::SqliteStore;
use rusqlite::Connection;
use serde_json::json;

fn attendance_session_number(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let date = get_required_date(params, "date")?;
    let label = session_number_for(&SqliteStore::new(conn), &student_id, date)?;
    Ok(json!({
        "studentId": student_id,
        "date": date,
        "label": label,
        "position": label.position(),
    }))
}

fn handle_attendance_session_number(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match attendance_session_number(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.sessionNumber" => Some(handle_attendance_session_number(state, req)),
        _ => None,
    }
}
