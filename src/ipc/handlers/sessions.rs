use crate::finalize::{finalize_session, SessionLocks};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    as_of, current_policy, get_optional_str, get_required_date, get_required_str,
    to_result, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::makeup::cancel_class;
use crate::roster::session_roster;
use crate::schedule::list_occurrences;
use crate::staging::SessionKey;
use crate::store::SqliteStore;
use rusqlite::Connection;
use serde_json::json;

fn session_key(params: &serde_json::Value) -> Result<SessionKey, HandlerErr> {
    Ok(SessionKey::new(
        get_required_str(params, "classId")?,
        get_required_date(params, "date")?,
    ))
}

fn sessions_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let from = get_required_date(params, "from")?;
    let to = get_required_date(params, "to")?;
    let occurrences = list_occurrences(&SqliteStore::new(conn), &class_id, from, to)?;
    Ok(json!({ "occurrences": to_result(&occurrences)? }))
}

fn sessions_cancel(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let key = session_key(params)?;
    let reason = get_optional_str(params, "reason").unwrap_or_default();
    let outcome = cancel_class(&SqliteStore::new(conn), &key.class_id, key.date, &reason)?;
    to_result(&outcome)
}

fn sessions_roster(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let key = session_key(params)?;
    let roster = session_roster(&SqliteStore::new(conn), &key.class_id, key.date)?;
    Ok(json!({ "students": to_result(&roster)? }))
}

fn sessions_finalize(
    conn: &Connection,
    locks: &SessionLocks,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let key = session_key(params)?;
    let now = as_of(params)?;
    let policy = current_policy(conn)?;
    let outcome = finalize_session(&SqliteStore::new(conn), locks, &policy, &key, now)?;
    to_result(&outcome)
}

fn handle_sessions_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match sessions_list(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_sessions_cancel(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match sessions_cancel(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_sessions_roster(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match sessions_roster(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_sessions_finalize(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match sessions_finalize(conn, &state.locks, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sessions.list" => Some(handle_sessions_list(state, req)),
        "sessions.cancel" => Some(handle_sessions_cancel(state, req)),
        "sessions.roster" => Some(handle_sessions_roster(state, req)),
        "sessions.finalize" => Some(handle_sessions_finalize(state, req)),
        _ => None,
    }
}
