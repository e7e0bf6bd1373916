use crate::ipc::error::{core_err, err, ok};
use crate::ipc::types::{AppState, Request};
use crate::progress;
use crate::quiz::{self, QuestionBody};
use serde_json::json;

fn handle_courses_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(title) = req.str_param("title") else {
        return err(&req.id, "bad_params", "missing title", None);
    };
    match quiz::create_course(conn, title) {
        Ok(course_id) => ok(&req.id, json!({ "courseId": course_id, "title": title.trim() })),
        Err(e) => core_err(&req.id, &e),
    }
}

fn handle_lessons_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(course_id) = req.str_param("courseId") else {
        return err(&req.id, "bad_params", "missing courseId", None);
    };
    let Some(title) = req.str_param("title") else {
        return err(&req.id, "bad_params", "missing title", None);
    };
    let order_index = match req.params.get("orderIndex") {
        None | Some(serde_json::Value::Null) => None,
        Some(v) => match v.as_i64() {
            Some(n) => Some(n),
            None => return err(&req.id, "bad_params", "orderIndex must be an integer", None),
        },
    };
    let has_video = req.bool_param("hasVideo").unwrap_or(false);

    match quiz::create_lesson(conn, course_id, title, order_index, has_video) {
        Ok(lesson_id) => ok(&req.id, json!({ "lessonId": lesson_id })),
        Err(e) => core_err(&req.id, &e),
    }
}

fn handle_quizzes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(course_id) = req.str_param("courseId") else {
        return err(&req.id, "bad_params", "missing courseId", None);
    };
    let Some(title) = req.str_param("title") else {
        return err(&req.id, "bad_params", "missing title", None);
    };
    let Some(passing) = req.i64_param("passingScorePercent") else {
        return err(&req.id, "bad_params", "missing passingScorePercent", None);
    };
    let lesson_id = req.str_param("lessonId");

    match quiz::create_quiz(conn, course_id, lesson_id, title, passing) {
        Ok(quiz_id) => ok(&req.id, json!({ "quizId": quiz_id })),
        Err(e) => core_err(&req.id, &e),
    }
}

fn parse_question_body(req: &Request) -> Result<QuestionBody, String> {
    let kind = req.str_param("kind").ok_or("missing kind")?;
    match kind {
        "mcq" => {
            let options = req
                .params
                .get("options")
                .and_then(|v| v.as_array())
                .ok_or("mcq question needs an options array")?
                .iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .ok_or("options must be strings")?;
            let correct = req
                .i64_param("correctOptionIndex")
                .ok_or("mcq question needs correctOptionIndex")?;
            let correct_option_index =
                usize::try_from(correct).map_err(|_| "correctOptionIndex must be >= 0")?;
            Ok(QuestionBody::Mcq {
                options,
                correct_option_index,
            })
        }
        "qa" => {
            if req
                .params
                .get("options")
                .and_then(|v| v.as_array())
                .is_some_and(|a| !a.is_empty())
            {
                return Err("qa question must not have options".into());
            }
            Ok(QuestionBody::Qa {
                expected_answer: req
                    .str_param("expectedAnswer")
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string),
            })
        }
        _ => Err(format!("unknown question kind: {}", kind)),
    }
}

fn handle_questions_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(quiz_id) = req.str_param("quizId") else {
        return err(&req.id, "bad_params", "missing quizId", None);
    };
    let Some(prompt) = req.str_param("prompt") else {
        return err(&req.id, "bad_params", "missing prompt", None);
    };
    let body = match parse_question_body(req) {
        Ok(b) => b,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };
    let order_index = req.i64_param("orderIndex");

    match quiz::create_question(conn, quiz_id, prompt, order_index, &body) {
        Ok(question_id) => ok(&req.id, json!({ "questionId": question_id })),
        Err(e) => core_err(&req.id, &e),
    }
}

fn handle_quizzes_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(quiz_id) = req.str_param("quizId") else {
        return err(&req.id, "bad_params", "missing quizId", None);
    };
    let quiz = match quiz::load_quiz(conn, quiz_id) {
        Ok(q) => q,
        Err(e) => return core_err(&req.id, &e),
    };
    let questions = match quiz::load_questions(conn, quiz_id) {
        Ok(qs) => qs,
        Err(e) => return core_err(&req.id, &e),
    };
    let requires_review = questions.iter().any(|q| q.requires_review());
    let public: Vec<serde_json::Value> = questions.iter().map(|q| q.to_public_json()).collect();
    ok(
        &req.id,
        json!({
            "quiz": quiz,
            "questions": public,
            "requiresReview": requires_review,
        }),
    )
}

fn handle_enrollments_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(student_id) = req.str_param("studentId") else {
        return err(&req.id, "bad_params", "missing studentId", None);
    };
    let Some(course_id) = req.str_param("courseId") else {
        return err(&req.id, "bad_params", "missing courseId", None);
    };
    match progress::create_enrollment(conn, student_id, course_id) {
        Ok(enrollment) => ok(&req.id, json!({ "enrollment": enrollment })),
        Err(e) => core_err(&req.id, &e),
    }
}

fn handle_enrollments_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(student_id) = req.str_param("studentId") else {
        return err(&req.id, "bad_params", "missing studentId", None);
    };
    let Some(course_id) = req.str_param("courseId") else {
        return err(&req.id, "bad_params", "missing courseId", None);
    };
    match progress::load_enrollment(conn, student_id, course_id) {
        Ok(Some(enrollment)) => ok(&req.id, json!({ "enrollment": enrollment })),
        Ok(None) => err(
            &req.id,
            "not_found",
            "enrollment not found",
            Some(json!({ "entity": "enrollment" })),
        ),
        Err(e) => core_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "courses.create" => Some(handle_courses_create(state, req)),
        "lessons.create" => Some(handle_lessons_create(state, req)),
        "quizzes.create" => Some(handle_quizzes_create(state, req)),
        "quizzes.open" => Some(handle_quizzes_open(state, req)),
        "questions.create" => Some(handle_questions_create(state, req)),
        "enrollments.create" => Some(handle_enrollments_create(state, req)),
        "enrollments.get" => Some(handle_enrollments_get(state, req)),
        _ => None,
    }
}
