use rusqlite::Connection;
use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_coursed");
    let mut child = Command::new(exe)
        .env_remove("COURSED_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn coursed");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(value: &serde_json::Value) -> String {
    assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(false), "expected error: {}", value);
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

fn str_at<'a>(value: &'a serde_json::Value, key: &str) -> &'a str {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing {} in {}", key, value))
}

fn attempt_rows(workspace: &std::path::Path) -> (i64, i64) {
    let conn = Connection::open(workspace.join("coursed.sqlite3")).expect("open workspace db");
    let attempts: i64 = conn
        .query_row("SELECT COUNT(*) FROM attempts", [], |r| r.get(0))
        .expect("count attempts");
    let answers: i64 = conn
        .query_row("SELECT COUNT(*) FROM answers", [], |r| r.get(0))
        .expect("count answers");
    (attempts, answers)
}

#[test]
fn mcq_submission_scores_rounded_percent_and_validates_before_writing() {
    let workspace = temp_dir("coursed-submit-scoring");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let course = request_ok(&mut stdin, &mut reader, "2", "courses.create", json!({ "title": "Biology" }));
    let course_id = str_at(&course, "courseId").to_string();
    let quiz = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "quizzes.create",
        json!({ "courseId": course_id, "title": "Cells", "passingScorePercent": 70 }),
    );
    let quiz_id = str_at(&quiz, "quizId").to_string();

    let mut question_ids = Vec::new();
    for (i, correct) in [0, 1, 2, 0].into_iter().enumerate() {
        let q = request_ok(
            &mut stdin,
            &mut reader,
            &format!("q{}", i),
            "questions.create",
            json!({
                "quizId": quiz_id,
                "prompt": format!("Question {}", i + 1),
                "kind": "mcq",
                "options": ["a", "b", "c"],
                "correctOptionIndex": correct,
            }),
        );
        question_ids.push(str_at(&q, "questionId").to_string());
    }

    // Learner view hides the answer key.
    let opened = request_ok(&mut stdin, &mut reader, "4", "quizzes.open", json!({ "quizId": quiz_id }));
    let questions = opened["questions"].as_array().expect("questions");
    assert_eq!(questions.len(), 4);
    assert!(questions.iter().all(|q| q.get("correctOptionIndex").is_none()));
    assert_eq!(opened["requiresReview"], json!(false));

    // One question left unanswered.
    let incomplete = request(
        &mut stdin,
        &mut reader,
        "5",
        "attempts.submit",
        json!({
            "quizId": quiz_id,
            "studentId": "stu-1",
            "answers": { question_ids[0].clone(): 0, question_ids[1].clone(): 1, question_ids[2].clone(): 2 },
        }),
    );
    assert_eq!(error_code(&incomplete), "validation_failed");
    assert_eq!(
        incomplete["error"]["details"]["missingQuestionIds"],
        json!([question_ids[3].clone()])
    );

    let out_of_range = request(
        &mut stdin,
        &mut reader,
        "6",
        "attempts.submit",
        json!({
            "quizId": quiz_id,
            "studentId": "stu-1",
            "answers": {
                question_ids[0].clone(): 0,
                question_ids[1].clone(): 1,
                question_ids[2].clone(): 2,
                question_ids[3].clone(): 7,
            },
        }),
    );
    assert_eq!(error_code(&out_of_range), "validation_failed");

    let foreign = request(
        &mut stdin,
        &mut reader,
        "7",
        "attempts.submit",
        json!({
            "quizId": quiz_id,
            "studentId": "stu-1",
            "answers": {
                question_ids[0].clone(): 0,
                question_ids[1].clone(): 1,
                question_ids[2].clone(): 2,
                question_ids[3].clone(): 0,
                "not-a-question": 1,
            },
        }),
    );
    assert_eq!(error_code(&foreign), "validation_failed");

    let wrong_shape = request(
        &mut stdin,
        &mut reader,
        "8",
        "attempts.submit",
        json!({
            "quizId": quiz_id,
            "studentId": "stu-1",
            "answers": {
                question_ids[0].clone(): "a",
                question_ids[1].clone(): 1,
                question_ids[2].clone(): 2,
                question_ids[3].clone(): 0,
            },
        }),
    );
    assert_eq!(error_code(&wrong_shape), "validation_failed");

    let wrong_type = request(
        &mut stdin,
        &mut reader,
        "9",
        "attempts.submit",
        json!({ "quizId": quiz_id, "studentId": "stu-1", "answers": [0, 1, 2, 0] }),
    );
    assert_eq!(error_code(&wrong_type), "bad_params");

    assert_eq!(attempt_rows(&workspace), (0, 0), "rejected submissions must not write");

    let graded = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "attempts.submit",
        json!({
            "quizId": quiz_id,
            "studentId": "stu-1",
            "answers": {
                question_ids[0].clone(): 0,
                question_ids[1].clone(): 1,
                question_ids[2].clone(): 2,
                question_ids[3].clone(): 1,
            },
        }),
    );
    assert_eq!(graded["scorePercent"], json!(75));
    assert_eq!(graded["passed"], json!(true));
    assert_eq!(graded["status"], json!("auto_graded"));
    assert_eq!(graded["attemptNumber"], json!(1));
    assert_eq!(graded["attemptsRemaining"], json!(2));
    assert_eq!(graded["lessonCompleted"], json!(false));

    assert_eq!(attempt_rows(&workspace), (1, 4));
    let conn = Connection::open(workspace.join("coursed.sqlite3")).expect("open workspace db");
    let correct: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM answers WHERE is_correct = 1 AND requires_review = 0",
            [],
            |r| r.get(0),
        )
        .expect("count correct");
    assert_eq!(correct, 3);

    let history = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "attempts.list",
        json!({ "quizId": quiz_id, "studentId": "stu-1" }),
    );
    assert_eq!(history["attemptsUsed"], json!(1));
    assert_eq!(history["bestScorePercent"], json!(75));
}

#[test]
fn quiz_without_questions_is_degenerate() {
    let workspace = temp_dir("coursed-submit-degenerate");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let course = request_ok(&mut stdin, &mut reader, "2", "courses.create", json!({ "title": "Empty" }));
    let quiz = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "quizzes.create",
        json!({ "courseId": str_at(&course, "courseId"), "title": "Nothing", "passingScorePercent": 50 }),
    );

    let resp = request(
        &mut stdin,
        &mut reader,
        "4",
        "attempts.submit",
        json!({ "quizId": str_at(&quiz, "quizId"), "studentId": "stu-1", "answers": {} }),
    );
    assert_eq!(error_code(&resp), "degenerate_quiz");
    assert_eq!(attempt_rows(&workspace), (0, 0));

    let bad_passing = request(
        &mut stdin,
        &mut reader,
        "5",
        "quizzes.create",
        json!({ "courseId": str_at(&course, "courseId"), "title": "Too strict", "passingScorePercent": 101 }),
    );
    assert_eq!(error_code(&bad_passing), "validation_failed");

    let missing_quiz = request(
        &mut stdin,
        &mut reader,
        "6",
        "attempts.submit",
        json!({ "quizId": "nope", "studentId": "stu-1", "answers": {} }),
    );
    assert_eq!(error_code(&missing_quiz), "not_found");
}
