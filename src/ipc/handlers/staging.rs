use crate::attendance::AttendanceMark;
use crate::error::SchedError;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_required_date, get_required_str, to_result, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::model::AttendanceStatus;
use crate::roster::session_roster;
use crate::staging::{open_staged_edits, save_staged_edits, EditCache, SessionKey, StagedEdit};
use crate::store::SqliteStore;
use rusqlite::Connection;
use serde_json::{json, Value};

fn session_key(params: &Value) -> Result<SessionKey, HandlerErr> {
    Ok(SessionKey::new(
        get_required_str(params, "classId")?,
        get_required_date(params, "date")?,
    ))
}

fn optional_i64(entry: &Value, key: &str, student_id: &str) -> Result<Option<i64>, HandlerErr> {
    match entry.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v.as_i64().map(Some).ok_or_else(|| {
            HandlerErr::bad_params(format!("{}.{} must be an integer", student_id, key))
        }),
    }
}

fn optional_mark(entry: &Value, student_id: &str) -> Result<Option<AttendanceMark>, HandlerErr> {
    match entry.get("attendance") {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_str()
            .and_then(AttendanceMark::parse)
            .map(Some)
            .ok_or_else(|| {
                HandlerErr::bad_params(format!(
                    "{}.attendance must be present, absent, excused or unset",
                    student_id
                ))
            }),
    }
}

fn edit_view(edit: &StagedEdit) -> Result<Value, HandlerErr> {
    Ok(json!({
        "edit": to_result(edit)?,
        "dirty": !edit.is_empty(),
    }))
}

fn staging_open(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let key = session_key(params)?;
    let store = SqliteStore::new(conn);
    let edit = open_staged_edits(&store, &key)?;
    let roster = session_roster(&store, &key.class_id, key.date)?;
    let mut view = edit_view(&edit)?;
    view["students"] = to_result(&roster)?;
    Ok(view)
}

/// Replaces the staged fields of every student named in `entries`.
fn staging_save(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let key = session_key(params)?;
    let Some(entries) = params.get("entries").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("entries must be an object"));
    };
    let store = SqliteStore::new(conn);
    let mut edit = open_staged_edits(&store, &key)?;
    for (student_id, entry) in entries {
        if !entry.is_object() {
            return Err(HandlerErr::bad_params(format!("{} must be an object", student_id)));
        }
        edit.set_score(student_id, optional_i64(entry, "score", student_id)?)?;
        edit.set_gold(student_id, optional_i64(entry, "gold", student_id)?)?;
        edit.set_attendance(student_id, optional_mark(entry, student_id)?)?;
    }
    save_staged_edits(&store, &edit)?;
    edit_view(&edit)
}

fn staging_mark(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let key = session_key(params)?;
    let student_id = get_required_str(params, "studentId")?;
    let status_raw = get_required_str(params, "status")?;
    let clicked = AttendanceStatus::parse(&status_raw)
        .ok_or_else(|| HandlerErr::bad_params("status must be present, absent or excused"))?;

    let store = SqliteStore::new(conn);
    let mut edit = open_staged_edits(&store, &key)?;
    let mark = edit.click(&student_id, clicked)?;
    save_staged_edits(&store, &edit)?;
    Ok(json!({
        "studentId": student_id,
        "attendance": mark,
        "dirty": !edit.is_empty(),
    }))
}

fn staging_discard(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let key = session_key(params)?;
    SqliteStore::new(conn)
        .discard_staged(&key)
        .map_err(SchedError::from)?;
    Ok(json!({ "ok": true }))
}

fn handle_staging_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match staging_open(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_staging_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match staging_save(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_staging_mark(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match staging_mark(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_staging_discard(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match staging_discard(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "staging.open" => Some(handle_staging_open(state, req)),
        "staging.save" => Some(handle_staging_save(state, req)),
        "staging.mark" => Some(handle_staging_mark(state, req)),
        "staging.discard" => Some(handle_staging_discard(state, req)),
        _ => None,
    }
}
