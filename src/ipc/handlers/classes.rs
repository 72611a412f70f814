use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    get_optional_str, get_optional_u32, get_required_str, to_result, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::model::parse_time;
use crate::schedule::load_class;
use crate::store::SqliteStore;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn classes_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let ids: Vec<String> = conn
        .prepare("SELECT id FROM classes ORDER BY name, id")
        .and_then(|mut stmt| {
            stmt.query_map([], |r| r.get(0))
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        })
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;

    let store = SqliteStore::new(conn);
    let mut classes = Vec::with_capacity(ids.len());
    for id in ids {
        classes.push(load_class(&store, &id)?);
    }
    Ok(json!({ "classes": to_result(&classes)? }))
}

fn classes_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let room = get_optional_str(params, "room");
    let capacity = get_optional_u32(params, "capacity")?;
    if capacity == Some(0) {
        return Err(HandlerErr::bad_params("capacity must be at least 1"));
    }

    let class_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO classes(id, name, room, capacity) VALUES(?, ?, ?, ?)",
        (&class_id, &name, &room, capacity),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "classes" })),
    })?;

    Ok(json!({ "classId": class_id, "name": name, "room": room, "capacity": capacity }))
}

fn classes_add_session(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let day_of_week = params
        .get("dayOfWeek")
        .and_then(|v| v.as_u64())
        .filter(|d| *d <= 6)
        .ok_or_else(|| HandlerErr::bad_params("dayOfWeek must be 0 (Sunday) to 6"))?;
    let start = parse_time(&get_required_str(params, "startTime")?)
        .ok_or_else(|| HandlerErr::bad_params("startTime must be HH:MM"))?;
    let end = parse_time(&get_required_str(params, "endTime")?)
        .ok_or_else(|| HandlerErr::bad_params("endTime must be HH:MM"))?;
    if start >= end {
        return Err(HandlerErr::bad_params("startTime must be before endTime"));
    }

    let exists = conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [&class_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    if exists.is_none() {
        return Err(HandlerErr {
            code: "not_found",
            message: "class not found".to_string(),
            details: None,
        });
    }

    let session_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO class_sessions(id, class_id, day_of_week, start_time, end_time)
         VALUES(?, ?, ?, ?, ?)",
        (&session_id, &class_id, day_of_week, start, end),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "class_sessions" })),
    })?;

    let class = load_class(&SqliteStore::new(conn), &class_id)?;
    Ok(json!({ "sessionId": session_id, "class": to_result(&class)? }))
}

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "classes": [] }));
    };
    match classes_list(conn) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match classes_create(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_classes_add_session(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match classes_add_session(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(handle_classes_list(state, req)),
        "classes.create" => Some(handle_classes_create(state, req)),
        "classes.addSession" => Some(handle_classes_add_session(state, req)),
        _ => None,
    }
}
