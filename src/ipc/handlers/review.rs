use crate::ipc::error::{core_err, err, ok, settings_err};
use crate::ipc::types::{AppState, Request};
use crate::review;
use crate::settings;
use serde_json::json;
use std::collections::HashMap;

fn handle_review_pending(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let course_id = req.str_param("courseId");
    let quiz_id = req.str_param("quizId");
    match review::pending_reviews(conn, course_id, quiz_id) {
        Ok(rows) => ok(&req.id, json!({ "attempts": rows })),
        Err(e) => core_err(&req.id, &e),
    }
}

fn handle_review_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(attempt_id) = req.str_param("attemptId") else {
        return err(&req.id, "bad_params", "missing attemptId", None);
    };
    let Some(reviewer_id) = req.str_param("reviewerId") else {
        return err(&req.id, "bad_params", "missing reviewerId", None);
    };
    let Some(raw) = req.params.get("decisions").filter(|v| v.is_object()) else {
        return err(&req.id, "bad_params", "decisions must be an object keyed by answerId", None);
    };
    let decisions: HashMap<String, bool> = match serde_json::from_value(raw.clone()) {
        Ok(d) => d,
        Err(_) => return err(&req.id, "bad_params", "decisions values must be boolean", None),
    };
    let learning = match settings::learning_settings(conn) {
        Ok(s) => s,
        Err(e) => return settings_err(&req.id, e),
    };

    match review::submit_review(conn, &learning, attempt_id, reviewer_id, &decisions) {
        Ok(outcome) => ok(&req.id, json!(outcome)),
        Err(e) => core_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "review.pending" => Some(handle_review_pending(state, req)),
        "review.submit" => Some(handle_review_submit(state, req)),
        _ => None,
    }
}
