use crate::ipc::error::{err, ok};
use crate::ipc::helpers::current_policy;
use crate::ipc::types::{AppState, Request};
use crate::policy::save_policy;
use serde_json::json;
use tracing::info;

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match current_policy(conn) {
        Ok(policy) => ok(&req.id, json!({ "attendance": policy.to_json() })),
        Err(e) => e.response(&req.id),
    }
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut policy = match current_policy(conn) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    if let Err(msg) = policy.merge_patch(patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = save_policy(conn, &policy) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    info!(fields = patch_obj.len(), "attendance policy updated");
    ok(&req.id, json!({ "attendance": policy.to_json() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
