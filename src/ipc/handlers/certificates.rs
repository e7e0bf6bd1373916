use crate::certificates;
use crate::completion;
use crate::ipc::error::{core_err, err, ok, settings_err};
use crate::ipc::types::{AppState, Request};
use crate::settings;
use serde_json::json;

fn handle_certificates_issue(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(student_id) = req.str_param("studentId") else {
        return err(&req.id, "bad_params", "missing studentId", None);
    };
    let Some(course_id) = req.str_param("courseId") else {
        return err(&req.id, "bad_params", "missing courseId", None);
    };
    let learning = match settings::learning_settings(conn) {
        Ok(s) => s,
        Err(e) => return settings_err(&req.id, e),
    };
    match completion::issue_for_enrollment(conn, &learning.certificate_prefix, student_id, course_id)
    {
        Ok(issued) => ok(
            &req.id,
            json!({ "certificate": issued.certificate, "created": issued.created }),
        ),
        Err(e) => core_err(&req.id, &e),
    }
}

fn handle_certificates_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(student_id) = req.str_param("studentId") else {
        return err(&req.id, "bad_params", "missing studentId", None);
    };
    let Some(course_id) = req.str_param("courseId") else {
        return err(&req.id, "bad_params", "missing courseId", None);
    };
    match certificates::load_certificate(conn, student_id, course_id) {
        Ok(cert) => ok(&req.id, json!({ "certificate": cert })),
        Err(e) => core_err(&req.id, &e),
    }
}

fn handle_certificates_verify(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(number) = req.str_param("certificateNumber") else {
        return err(&req.id, "bad_params", "missing certificateNumber", None);
    };
    let Some(code) = req.str_param("verificationCode") else {
        return err(&req.id, "bad_params", "missing verificationCode", None);
    };
    match certificates::verify(conn, number, code) {
        Ok(Some(cert)) => ok(&req.id, json!({ "valid": true, "certificate": cert })),
        Ok(None) => ok(&req.id, json!({ "valid": false })),
        Err(e) => core_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "certificates.issue" => Some(handle_certificates_issue(state, req)),
        "certificates.get" => Some(handle_certificates_get(state, req)),
        "certificates.verify" => Some(handle_certificates_verify(state, req)),
        _ => None,
    }
}
