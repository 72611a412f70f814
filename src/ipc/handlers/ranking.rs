use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{as_of, current_policy, get_string_list, to_result, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::ranking::{diff, ranking_snapshot, RankingSnapshot};
use crate::store::SqliteStore;
use rusqlite::Connection;
use serde_json::json;

fn snapshot_with_changes(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_ids = get_string_list(params, "studentIds")?;
    let now = as_of(params)?;
    let previous: Option<RankingSnapshot> = match params.get("previous") {
        None | Some(serde_json::Value::Null) => None,
        Some(v) => Some(
            serde_json::from_value(v.clone())
                .map_err(|e| HandlerErr::bad_params(format!("previous: {}", e)))?,
        ),
    };
    let policy = current_policy(conn)?;
    let snapshot = ranking_snapshot(&SqliteStore::new(conn), &student_ids, now)?;
    let changes = diff(previous.as_ref(), &snapshot, policy.rank_highlight_ms);
    Ok(json!({
        "snapshot": to_result(&snapshot)?,
        "changes": to_result(&changes)?,
    }))
}

fn handle_ranking_snapshot(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match snapshot_with_changes(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "ranking.snapshot" => Some(handle_ranking_snapshot(state, req)),
        _ => None,
    }
}
