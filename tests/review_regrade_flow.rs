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

struct Fixture {
    course_id: String,
    lesson_id: String,
    quiz_id: String,
    mcq_ids: Vec<String>,
    qa_id: String,
}

fn build_course(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) -> Fixture {
    let course = request_ok(stdin, reader, "c1", "courses.create", json!({ "title": "Plants" }));
    let course_id = str_at(&course, "courseId").to_string();
    let lesson = request_ok(
        stdin,
        reader,
        "c2",
        "lessons.create",
        json!({ "courseId": course_id, "title": "Leaves" }),
    );
    let lesson_id = str_at(&lesson, "lessonId").to_string();
    request_ok(
        stdin,
        reader,
        "c3",
        "lessons.create",
        json!({ "courseId": course_id, "title": "Roots" }),
    );
    let quiz = request_ok(
        stdin,
        reader,
        "c4",
        "quizzes.create",
        json!({
            "courseId": course_id,
            "lessonId": lesson_id,
            "title": "Photosynthesis quiz",
            "passingScorePercent": 60,
        }),
    );
    let quiz_id = str_at(&quiz, "quizId").to_string();

    let mut mcq_ids = Vec::new();
    for i in 0..2 {
        let q = request_ok(
            stdin,
            reader,
            &format!("m{}", i),
            "questions.create",
            json!({
                "quizId": quiz_id,
                "prompt": format!("Pick {}", i),
                "kind": "mcq",
                "options": ["yes", "no"],
                "correctOptionIndex": 0,
            }),
        );
        mcq_ids.push(str_at(&q, "questionId").to_string());
    }
    let qa = request_ok(
        stdin,
        reader,
        "qa",
        "questions.create",
        json!({ "quizId": quiz_id, "prompt": "Explain photosynthesis", "kind": "qa" }),
    );
    let qa_id = str_at(&qa, "questionId").to_string();

    request_ok(
        stdin,
        reader,
        "c5",
        "enrollments.create",
        json!({ "studentId": "stu-1", "courseId": course_id }),
    );

    Fixture {
        course_id,
        lesson_id,
        quiz_id,
        mcq_ids,
        qa_id,
    }
}

fn answer_ids(opened: &serde_json::Value) -> (String, String) {
    let answers = opened["answers"].as_array().expect("answers");
    let qa = answers
        .iter()
        .find(|a| a["requiresReview"] == json!(true))
        .expect("qa answer");
    let mcq = answers
        .iter()
        .find(|a| a["requiresReview"] == json!(false))
        .expect("mcq answer");
    (
        str_at(qa, "answerId").to_string(),
        str_at(mcq, "answerId").to_string(),
    )
}

#[test]
fn review_finalizes_score_and_completes_lesson_idempotently() {
    let workspace = temp_dir("coursed-review-flow");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let f = build_course(&mut stdin, &mut reader);

    let submitted = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "attempts.submit",
        json!({
            "quizId": f.quiz_id,
            "studentId": "stu-1",
            "answers": {
                f.mcq_ids[0].clone(): 0,
                f.mcq_ids[1].clone(): 0,
                f.qa_id.clone(): "Plants turn light into sugar",
            },
        }),
    );
    assert_eq!(submitted["status"], json!("pending_review"));
    assert_eq!(submitted["scorePercent"], json!(67));
    assert_eq!(submitted["lessonCompleted"], json!(false));
    let attempt_id = str_at(&submitted, "attemptId").to_string();

    let db = Connection::open(workspace.join("coursed.sqlite3")).expect("open workspace db");
    let progress_rows: i64 = db
        .query_row("SELECT COUNT(*) FROM lesson_progress", [], |r| r.get(0))
        .expect("count lesson progress");
    assert_eq!(progress_rows, 0, "pending attempts change no progress");

    let pending = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "review.pending",
        json!({ "courseId": f.course_id }),
    );
    let rows = pending["attempts"].as_array().expect("attempts");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["pendingAnswers"], json!(1));
    assert_eq!(rows[0]["quizTitle"], json!("Photosynthesis quiz"));

    let opened = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "attempts.open",
        json!({ "attemptId": attempt_id }),
    );
    let (qa_answer, mcq_answer) = answer_ids(&opened);
    let qa_row = opened["answers"]
        .as_array()
        .expect("answers")
        .iter()
        .find(|a| a["answerId"] == json!(qa_answer))
        .cloned()
        .expect("qa row");
    assert_eq!(qa_row["isCorrect"], serde_json::Value::Null);

    let foreign = request(
        &mut stdin,
        &mut reader,
        "5",
        "review.submit",
        json!({ "attemptId": attempt_id, "reviewerId": "rev-1", "decisions": { "bogus": true } }),
    );
    assert_eq!(error_code(&foreign), "validation_failed");

    let decisions = json!({ qa_answer.clone(): true, mcq_answer.clone(): false });
    let reviewed = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "review.submit",
        json!({ "attemptId": attempt_id, "reviewerId": "rev-1", "decisions": decisions }),
    );
    assert_eq!(reviewed["scorePercent"], json!(100));
    assert_eq!(reviewed["passed"], json!(true));
    assert_eq!(reviewed["status"], json!("reviewed"));
    assert_eq!(reviewed["lessonCompleted"], json!(true));
    assert_eq!(reviewed["ignoredAnswerIds"], json!([mcq_answer.clone()]));
    assert_eq!(reviewed["courseProgress"]["progressPercent"], json!(50));

    let (status, reviewed_by): (String, Option<String>) = db
        .query_row(
            "SELECT status, reviewed_by FROM attempts WHERE id = ?",
            [&attempt_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .expect("attempt row");
    assert_eq!(status, "reviewed");
    assert_eq!(reviewed_by.as_deref(), Some("rev-1"));
    let mcq_correct: i64 = db
        .query_row("SELECT is_correct FROM answers WHERE id = ?", [&mcq_answer], |r| r.get(0))
        .expect("mcq answer");
    assert_eq!(mcq_correct, 1, "auto-graded answers keep their correctness");
    let (completed, quiz_passed): (i64, i64) = db
        .query_row(
            "SELECT is_completed, quiz_passed FROM lesson_progress WHERE student_id = 'stu-1' AND lesson_id = ?",
            [&f.lesson_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .expect("lesson progress");
    assert_eq!((completed, quiz_passed), (1, 1));

    // Same decisions again: same stored result, no duplicate rows.
    let again = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "review.submit",
        json!({ "attemptId": attempt_id, "reviewerId": "rev-1", "decisions": decisions }),
    );
    assert_eq!(again["scorePercent"], json!(100));
    assert_eq!(again["passed"], json!(true));
    assert_eq!(again["lessonCompleted"], json!(false), "lesson was already complete");
    assert!(again.get("courseProgress").is_none(), "{}", again);
    let progress_rows: i64 = db
        .query_row("SELECT COUNT(*) FROM lesson_progress", [], |r| r.get(0))
        .expect("count lesson progress");
    assert_eq!(progress_rows, 1);
    let enrollment_percent: i64 = db
        .query_row(
            "SELECT progress_percent FROM enrollments WHERE student_id = 'stu-1' AND course_id = ?",
            [&f.course_id],
            |r| r.get(0),
        )
        .expect("enrollment");
    assert_eq!(enrollment_percent, 50);

    let pending = request_ok(&mut stdin, &mut reader, "8", "review.pending", json!({}));
    assert_eq!(pending["attempts"].as_array().map(|a| a.len()), Some(0));

    let notes = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "notifications.list",
        json!({ "studentId": "stu-1" }),
    );
    let notes = notes["notifications"].as_array().expect("notifications").clone();
    assert_eq!(notes.len(), 2);
    assert!(notes
        .iter()
        .all(|n| n["message"].as_str().unwrap_or("").contains("Photosynthesis quiz")));
    assert_eq!(
        notes[0]["link"],
        json!(format!("/courses/{}/learn", f.course_id))
    );

    request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "notifications.markRead",
        json!({ "notificationId": str_at(&notes[0], "id") }),
    );
    let unread = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "notifications.list",
        json!({ "studentId": "stu-1", "unreadOnly": true }),
    );
    assert_eq!(unread["notifications"].as_array().map(|a| a.len()), Some(1));
}

#[test]
fn failed_review_leaves_progress_untouched() {
    let workspace = temp_dir("coursed-review-fail");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let f = build_course(&mut stdin, &mut reader);

    let submitted = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "attempts.submit",
        json!({
            "quizId": f.quiz_id,
            "studentId": "stu-1",
            "answers": {
                f.mcq_ids[0].clone(): 0,
                f.mcq_ids[1].clone(): 1,
                f.qa_id.clone(): "no idea",
            },
        }),
    );
    let attempt_id = str_at(&submitted, "attemptId").to_string();
    let opened = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "attempts.open",
        json!({ "attemptId": attempt_id }),
    );
    let (qa_answer, _) = answer_ids(&opened);

    let reviewed = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "review.submit",
        json!({ "attemptId": attempt_id, "reviewerId": "rev-2", "decisions": { qa_answer: false } }),
    );
    assert_eq!(reviewed["scorePercent"], json!(33));
    assert_eq!(reviewed["passed"], json!(false));
    assert_eq!(reviewed["lessonCompleted"], json!(false));

    let db = Connection::open(workspace.join("coursed.sqlite3")).expect("open workspace db");
    let progress_rows: i64 = db
        .query_row("SELECT COUNT(*) FROM lesson_progress", [], |r| r.get(0))
        .expect("count lesson progress");
    assert_eq!(progress_rows, 0);

    // A quiz with only auto-graded questions has nothing to review.
    let mcq_quiz = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "quizzes.create",
        json!({ "courseId": f.course_id, "title": "Quick check", "passingScorePercent": 50 }),
    );
    let mcq_quiz_id = str_at(&mcq_quiz, "quizId").to_string();
    let q = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "questions.create",
        json!({ "quizId": mcq_quiz_id, "prompt": "Green?", "kind": "mcq", "options": ["yes", "no"], "correctOptionIndex": 0 }),
    );
    let auto = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "attempts.submit",
        json!({ "quizId": mcq_quiz_id, "studentId": "stu-1", "answers": { str_at(&q, "questionId"): 0 } }),
    );
    assert_eq!(auto["status"], json!("auto_graded"));
    let nothing = request(
        &mut stdin,
        &mut reader,
        "8",
        "review.submit",
        json!({ "attemptId": str_at(&auto, "attemptId"), "reviewerId": "rev-2", "decisions": {} }),
    );
    assert_eq!(error_code(&nothing), "validation_failed");
}

#[test]
fn rereview_without_decisions_resets_the_qa_verdict() {
    let workspace = temp_dir("coursed-review-reset");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let f = build_course(&mut stdin, &mut reader);

    let submitted = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "attempts.submit",
        json!({
            "quizId": f.quiz_id,
            "studentId": "stu-1",
            "answers": {
                f.mcq_ids[0].clone(): 0,
                f.mcq_ids[1].clone(): 1,
                f.qa_id.clone(): "Chlorophyll absorbs light",
            },
        }),
    );
    let attempt_id = str_at(&submitted, "attemptId").to_string();
    let opened = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "attempts.open",
        json!({ "attemptId": attempt_id }),
    );
    let (qa_answer, _) = answer_ids(&opened);

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "review.submit",
        json!({ "attemptId": attempt_id, "reviewerId": "rev-1", "decisions": { qa_answer.clone(): true } }),
    );
    assert_eq!(first["scorePercent"], json!(67));
    assert_eq!(first["passed"], json!(true));
    assert_eq!(first["lessonCompleted"], json!(true));

    let db = Connection::open(workspace.join("coursed.sqlite3")).expect("open workspace db");
    let qa_correct: Option<i64> = db
        .query_row("SELECT is_correct FROM answers WHERE id = ?", [&qa_answer], |r| r.get(0))
        .expect("qa answer");
    assert_eq!(qa_correct, Some(1));

    let second = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "review.submit",
        json!({ "attemptId": attempt_id, "reviewerId": "rev-2", "decisions": {} }),
    );
    assert_eq!(second["scorePercent"], json!(33));
    assert_eq!(second["passed"], json!(false));
    assert_eq!(second["lessonCompleted"], json!(false));

    let qa_correct: Option<i64> = db
        .query_row("SELECT is_correct FROM answers WHERE id = ?", [&qa_answer], |r| r.get(0))
        .expect("qa answer");
    assert_eq!(qa_correct, None, "undecided answer goes back to unreviewed");
    let (score, passed, reviewed_by): (i64, i64, String) = db
        .query_row(
            "SELECT score_percent, passed, reviewed_by FROM attempts WHERE id = ?",
            [&attempt_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .expect("attempt row");
    assert_eq!((score, passed, reviewed_by.as_str()), (33, 0, "rev-2"));

    // Lesson completion already recorded is not undone by a lower re-review.
    let completed: i64 = db
        .query_row(
            "SELECT is_completed FROM lesson_progress WHERE student_id = 'stu-1' AND lesson_id = ?",
            [&f.lesson_id],
            |r| r.get(0),
        )
        .expect("lesson progress");
    assert_eq!(completed, 1);
}
