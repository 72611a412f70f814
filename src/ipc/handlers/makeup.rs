use crate::error::SchedError;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    as_of, current_policy, get_optional_date, get_optional_str, get_required_date,
    get_required_str, to_result, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::makeup::{
    book_makeup, credit_balance, reject_makeup, validate_booking, BookingRequest,
};
use crate::store::{SqliteStore, Store};
use rusqlite::Connection;
use serde_json::json;

fn booking_request(params: &serde_json::Value) -> Result<BookingRequest, HandlerErr> {
    let original = match (
        get_optional_str(params, "originalClassId"),
        get_optional_date(params, "originalSessionDate")?,
    ) {
        (Some(class_id), Some(date)) => Some((class_id, date)),
        (None, None) => None,
        _ => {
            return Err(HandlerErr::bad_params(
                "originalClassId and originalSessionDate go together",
            ))
        }
    };
    Ok(BookingRequest {
        student_id: get_required_str(params, "studentId")?,
        new_class_id: get_required_str(params, "newClassId")?,
        new_session_date: get_required_date(params, "newSessionDate")?,
        reason: get_optional_str(params, "reason").unwrap_or_default(),
        enrollment_id: get_optional_str(params, "enrollmentId"),
        original,
    })
}

fn makeup_credits(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let today = as_of(params)?.date();
    let balance = credit_balance(&SqliteStore::new(conn), &student_id, today)?;
    Ok(json!({
        "studentId": student_id,
        "remaining": balance.remaining(),
        "earned": balance.earned,
        "spent": balance.spent,
    }))
}

fn makeup_validate(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let request = booking_request(params)?;
    let now = as_of(params)?;
    let policy = current_policy(conn)?;
    let plan = validate_booking(&SqliteStore::new(conn), &policy, &request, now)?;
    Ok(json!({
        "eligible": true,
        "originalClassId": plan.original_class_id,
        "originalSessionDate": plan.original_session_date,
        "enrollmentId": plan.enrollment_id,
        "remainingCredits": plan.remaining_before,
    }))
}

fn makeup_book(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let request = booking_request(params)?;
    let now = as_of(params)?;
    let policy = current_policy(conn)?;
    let store = SqliteStore::new(conn);
    let booked = book_makeup(&store, &policy, &request, now)?;
    let balance = credit_balance(&store, &request.student_id, now.date())?;
    Ok(json!({
        "request": to_result(&booked)?,
        "remainingCredits": balance.remaining(),
    }))
}

fn makeup_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let requests = SqliteStore::new(conn)
        .makeups_for_student(&student_id)
        .map_err(SchedError::from)?;
    Ok(json!({ "requests": to_result(&requests)? }))
}

fn makeup_reject(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let request_id = get_required_str(params, "requestId")?;
    let request = reject_makeup(&SqliteStore::new(conn), &request_id)?;
    Ok(json!({ "request": to_result(&request)? }))
}

fn handle_makeup_credits(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match makeup_credits(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_makeup_validate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match makeup_validate(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_makeup_book(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match makeup_book(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_makeup_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match makeup_list(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_makeup_reject(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match makeup_reject(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "makeup.credits" => Some(handle_makeup_credits(state, req)),
        "makeup.validate" => Some(handle_makeup_validate(state, req)),
        "makeup.book" => Some(handle_makeup_book(state, req)),
        "makeup.list" => Some(handle_makeup_list(state, req)),
        "makeup.reject" => Some(handle_makeup_reject(state, req)),
        _ => None,
    }
}
