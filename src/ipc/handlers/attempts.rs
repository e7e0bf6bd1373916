use crate::attempts;
use crate::grading::SubmittedAnswer;
use crate::ipc::error::{core_err, err, ok, settings_err};
use crate::ipc::types::{AppState, Request};
use crate::settings;
use serde_json::json;
use std::collections::HashMap;

fn parse_answers(req: &Request) -> Result<HashMap<String, SubmittedAnswer>, String> {
    let Some(raw) = req.params.get("answers") else {
        return Err("missing answers".to_string());
    };
    if !raw.is_object() {
        return Err("answers must be an object keyed by questionId".to_string());
    }
    serde_json::from_value(raw.clone())
        .map_err(|e| format!("answers must map to an option index or text: {}", e))
}

fn handle_attempts_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(quiz_id) = req.str_param("quizId") else {
        return err(&req.id, "bad_params", "missing quizId", None);
    };
    let Some(student_id) = req.str_param("studentId") else {
        return err(&req.id, "bad_params", "missing studentId", None);
    };
    let answers = match parse_answers(req) {
        Ok(a) => a,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };
    let learning = match settings::learning_settings(conn) {
        Ok(s) => s,
        Err(e) => return settings_err(&req.id, e),
    };

    match attempts::submit_attempt(conn, &learning, quiz_id, student_id, &answers) {
        Ok(outcome) => ok(&req.id, json!(outcome)),
        Err(e) => core_err(&req.id, &e),
    }
}

fn handle_attempts_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(quiz_id) = req.str_param("quizId") else {
        return err(&req.id, "bad_params", "missing quizId", None);
    };
    let Some(student_id) = req.str_param("studentId") else {
        return err(&req.id, "bad_params", "missing studentId", None);
    };
    let learning = match settings::learning_settings(conn) {
        Ok(s) => s,
        Err(e) => return settings_err(&req.id, e),
    };
    match attempts::list_attempts(conn, &learning, quiz_id, student_id) {
        Ok(history) => ok(&req.id, json!(history)),
        Err(e) => core_err(&req.id, &e),
    }
}

fn handle_attempts_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(attempt_id) = req.str_param("attemptId") else {
        return err(&req.id, "bad_params", "missing attemptId", None);
    };
    match attempts::open_attempt(conn, attempt_id) {
        Ok(v) => ok(&req.id, v),
        Err(e) => core_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attempts.submit" => Some(handle_attempts_submit(state, req)),
        "attempts.list" => Some(handle_attempts_list(state, req)),
        "attempts.open" => Some(handle_attempts_open(state, req)),
        _ => None,
    }
}
