use crate::ipc::error::{core_err, err, ok};
use crate::ipc::types::{AppState, Request};
use crate::notifications;
use serde_json::json;

fn handle_notifications_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(student_id) = req.str_param("studentId") else {
        return err(&req.id, "bad_params", "missing studentId", None);
    };
    let unread_only = req.bool_param("unreadOnly").unwrap_or(false);
    match notifications::list(conn, student_id, unread_only) {
        Ok(rows) => ok(&req.id, json!({ "notifications": rows })),
        Err(e) => core_err(&req.id, &e),
    }
}

fn handle_notifications_mark_read(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(notification_id) = req.str_param("notificationId") else {
        return err(&req.id, "bad_params", "missing notificationId", None);
    };
    match notifications::mark_read(conn, notification_id) {
        Ok(()) => ok(&req.id, json!({ "ok": true })),
        Err(e) => core_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "notifications.list" => Some(handle_notifications_list(state, req)),
        "notifications.markRead" => Some(handle_notifications_mark_read(state, req)),
        _ => None,
    }
}
