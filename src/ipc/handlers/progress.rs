use crate::ipc::error::{core_err, err, ok, settings_err};
use crate::ipc::types::{AppState, Request};
use crate::progress;
use crate::settings;
use serde_json::json;

fn handle_record_video(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(student_id) = req.str_param("studentId") else {
        return err(&req.id, "bad_params", "missing studentId", None);
    };
    let Some(lesson_id) = req.str_param("lessonId") else {
        return err(&req.id, "bad_params", "missing lessonId", None);
    };
    let Some(watch_percent) = req.i64_param("watchPercent") else {
        return err(&req.id, "bad_params", "watchPercent must be an integer", None);
    };
    let learning = match settings::learning_settings(conn) {
        Ok(s) => s,
        Err(e) => return settings_err(&req.id, e),
    };
    match progress::record_video(conn, &learning, student_id, lesson_id, watch_percent) {
        Ok(update) => ok(&req.id, json!(update)),
        Err(e) => core_err(&req.id, &e),
    }
}

fn handle_complete_lesson(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(student_id) = req.str_param("studentId") else {
        return err(&req.id, "bad_params", "missing studentId", None);
    };
    let Some(lesson_id) = req.str_param("lessonId") else {
        return err(&req.id, "bad_params", "missing lessonId", None);
    };
    let learning = match settings::learning_settings(conn) {
        Ok(s) => s,
        Err(e) => return settings_err(&req.id, e),
    };
    match progress::complete_lesson(conn, &learning, student_id, lesson_id) {
        Ok(update) => ok(&req.id, json!(update)),
        Err(e) => core_err(&req.id, &e),
    }
}

fn handle_recompute(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    match progress::recompute_course_progress(conn, &learning, student_id, course_id) {
        Ok(p) => {
            let certificate = p.completion.as_ref().and_then(|c| c.certificate.clone());
            let warnings = p
                .completion
                .as_ref()
                .map(|c| c.warnings.clone())
                .unwrap_or_default();
            ok(
                &req.id,
                json!({
                    "progressPercent": p.progress_percent,
                    "computedPercent": p.computed_percent,
                    "completedLessons": p.completed_lessons,
                    "totalLessons": p.total_lessons,
                    "completed": p.completed,
                    "certificate": certificate,
                    "warnings": warnings,
                }),
            )
        }
        Err(e) => core_err(&req.id, &e),
    }
}

fn handle_progress_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(student_id) = req.str_param("studentId") else {
        return err(&req.id, "bad_params", "missing studentId", None);
    };
    let Some(course_id) = req.str_param("courseId") else {
        return err(&req.id, "bad_params", "missing courseId", None);
    };
    match progress::course_progress_view(conn, student_id, course_id) {
        Ok((enrollment, lessons)) => ok(
            &req.id,
            json!({
                "enrollment": enrollment,
                "lessons": lessons,
            }),
        ),
        Err(e) => core_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "progress.recordVideo" => Some(handle_record_video(state, req)),
        "progress.completeLesson" => Some(handle_complete_lesson(state, req)),
        "progress.recompute" => Some(handle_recompute(state, req)),
        "progress.get" => Some(handle_progress_get(state, req)),
        _ => None,
    }
}
