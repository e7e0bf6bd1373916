use crate::error::{CoreError, CoreResult};
use crate::grading::{self, AttemptStatus, SubmittedAnswer};
use crate::progress::{self, CourseProgress};
use crate::quiz::{self, now_rfc3339, QuestionBody};
use crate::settings::LearningSettings;
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Attempt {
    pub id: String,
    pub quiz_id: String,
    pub student_id: String,
    pub score_percent: i64,
    pub passed: bool,
    pub total_questions: i64,
    pub attempt_number: i64,
    pub status: String,
    pub completed_at: String,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<String>,
}

pub(crate) const ATTEMPT_COLUMNS: &str = "id, quiz_id, student_id, score_percent, passed, total_questions,
    attempt_number, status, completed_at, reviewed_by, reviewed_at";

pub(crate) fn row_to_attempt(r: &rusqlite::Row<'_>) -> rusqlite::Result<Attempt> {
    Ok(Attempt {
        id: r.get(0)?,
        quiz_id: r.get(1)?,
        student_id: r.get(2)?,
        score_percent: r.get(3)?,
        passed: r.get::<_, i64>(4)? != 0,
        total_questions: r.get(5)?,
        attempt_number: r.get(6)?,
        status: r.get(7)?,
        completed_at: r.get(8)?,
        reviewed_by: r.get(9)?,
        reviewed_at: r.get(10)?,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOutcome {
    pub attempt_id: String,
    pub attempt_number: i64,
    pub score_percent: i64,
    pub passed: bool,
    pub status: &'static str,
    pub max_attempts: i64,
    pub attempts_remaining: i64,
    pub lesson_completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub course_progress: Option<CourseProgress>,
    pub warnings: Vec<String>,
}

pub fn count_attempts(conn: &Connection, quiz_id: &str, student_id: &str) -> CoreResult<i64> {
    let n = conn.query_row(
        "SELECT COUNT(*) FROM attempts WHERE quiz_id = ? AND student_id = ?",
        (quiz_id, student_id),
        |r| r.get(0),
    )?;
    Ok(n)
}

pub fn check_attempt_limit(used: i64, max_attempts: i64) -> CoreResult<()> {
    if used >= max_attempts {
        return Err(CoreError::AttemptLimitExceeded {
            used,
            max: max_attempts,
        });
    }
    Ok(())
}

/// Records one submission. The limit check, attempt row and answer rows share one
/// write-locked transaction, so concurrent submissions cannot overshoot the limit and a
/// failure leaves nothing behind.
pub fn submit_attempt(
    conn: &Connection,
    settings: &LearningSettings,
    quiz_id: &str,
    student_id: &str,
    answers: &HashMap<String, SubmittedAnswer>,
) -> CoreResult<SubmitOutcome> {
    if student_id.trim().is_empty() {
        return Err(CoreError::validation("studentId must not be empty"));
    }
    let quiz = quiz::load_quiz(conn, quiz_id)?;

    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let used = count_attempts(&tx, quiz_id, student_id)?;
    check_attempt_limit(used, settings.max_attempts)?;

    let questions = quiz::load_questions(&tx, quiz_id)?;
    let graded = grading::grade_submission(&questions, answers, quiz.passing_score_percent)?;

    let attempt_id = Uuid::new_v4().to_string();
    let attempt_number = used + 1;
    tx.execute(
        "INSERT INTO attempts(id, quiz_id, student_id, score_percent, passed, total_questions, attempt_number, status, completed_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &attempt_id,
            quiz_id,
            student_id,
            graded.score_percent,
            graded.passed as i64,
            graded.total_questions as i64,
            attempt_number,
            graded.status.as_str(),
            now_rfc3339(),
        ),
    )?;
    {
        let mut insert_answer = tx.prepare(
            "INSERT INTO answers(id, attempt_id, question_id, selected_option_index, answer_text, is_correct, requires_review)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
        )?;
        for a in &graded.answers {
            insert_answer.execute((
                Uuid::new_v4().to_string(),
                &attempt_id,
                &a.question_id,
                a.selected_option_index,
                a.answer_text.as_deref(),
                a.is_correct.map(|v| v as i64),
                a.requires_review as i64,
            ))?;
        }
    }
    tx.commit()?;

    info!(
        quiz_id,
        student_id,
        attempt_number,
        score = graded.score_percent,
        passed = graded.passed,
        status = graded.status.as_str(),
        "attempt recorded"
    );

    let mut lesson_completed = false;
    let mut course_progress = None;
    let mut warnings = Vec::new();
    if graded.status == AttemptStatus::AutoGraded && graded.passed {
        if let Some(lesson_id) = quiz.lesson_id.as_deref() {
            match progress::record_quiz_pass(conn, settings, student_id, lesson_id) {
                Ok(false) => {}
                Ok(true) => {
                    lesson_completed = true;
                    let (p, w) = progress::propagate_lesson_completion(
                        conn,
                        settings,
                        student_id,
                        &quiz.course_id,
                    );
                    course_progress = p;
                    warnings.extend(w);
                }
                Err(e) => {
                    warn!(quiz_id, student_id, lesson_id, error = %e, "lesson progress not updated after pass");
                    warnings.push(e.to_string());
                }
            }
        }
    }

    Ok(SubmitOutcome {
        attempt_id,
        attempt_number,
        score_percent: graded.score_percent,
        passed: graded.passed,
        status: graded.status.as_str(),
        max_attempts: settings.max_attempts,
        attempts_remaining: (settings.max_attempts - attempt_number).max(0),
        lesson_completed,
        course_progress,
        warnings,
    })
}

pub fn load_attempt(conn: &Connection, attempt_id: &str) -> CoreResult<Attempt> {
    let sql = format!("SELECT {} FROM attempts WHERE id = ?", ATTEMPT_COLUMNS);
    conn.query_row(&sql, [attempt_id], row_to_attempt)
        .optional()?
        .ok_or(CoreError::NotFound("attempt"))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptHistory {
    pub attempts: Vec<Attempt>,
    pub max_attempts: i64,
    pub attempts_used: i64,
    pub attempts_remaining: i64,
    pub best_score_percent: Option<i64>,
}

pub fn list_attempts(
    conn: &Connection,
    settings: &LearningSettings,
    quiz_id: &str,
    student_id: &str,
) -> CoreResult<AttemptHistory> {
    quiz::load_quiz(conn, quiz_id)?;
    let sql = format!(
        "SELECT {} FROM attempts WHERE quiz_id = ? AND student_id = ? ORDER BY attempt_number DESC",
        ATTEMPT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let attempts = stmt
        .query_map((quiz_id, student_id), row_to_attempt)?
        .collect::<Result<Vec<_>, _>>()?;
    let used = attempts.len() as i64;
    let best_score_percent = attempts.iter().map(|a| a.score_percent).max();
    Ok(AttemptHistory {
        attempts,
        max_attempts: settings.max_attempts,
        attempts_used: used,
        attempts_remaining: (settings.max_attempts - used).max(0),
        best_score_percent,
    })
}

/// Reviewer view of one attempt: every answer next to its question and answer key.
pub fn open_attempt(conn: &Connection, attempt_id: &str) -> CoreResult<serde_json::Value> {
    let attempt = load_attempt(conn, attempt_id)?;
    let quiz = quiz::load_quiz(conn, &attempt.quiz_id)?;
    let questions: HashMap<String, quiz::Question> = quiz::load_questions(conn, &quiz.id)?
        .into_iter()
        .map(|q| (q.id.clone(), q))
        .collect();

    let mut stmt = conn.prepare(
        "SELECT a.id, a.question_id, a.selected_option_index, a.answer_text, a.is_correct, a.requires_review
         FROM answers a
         JOIN questions q ON q.id = a.question_id
         WHERE a.attempt_id = ?
         ORDER BY q.order_index, q.rowid",
    )?;
    let rows = stmt
        .query_map([attempt_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, Option<i64>>(2)?,
                r.get::<_, Option<String>>(3)?,
                r.get::<_, Option<i64>>(4)?,
                r.get::<_, i64>(5)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let answers: Vec<serde_json::Value> = rows
        .into_iter()
        .map(|(id, question_id, selected, text, is_correct, requires_review)| {
            let q = questions.get(&question_id);
            let (options, correct_index, expected) = match q.map(|q| &q.body) {
                Some(QuestionBody::Mcq {
                    options,
                    correct_option_index,
                }) => (options.clone(), Some(*correct_option_index), None),
                Some(QuestionBody::Qa { expected_answer }) => {
                    (Vec::new(), None, expected_answer.clone())
                }
                None => (Vec::new(), None, None),
            };
            json!({
                "answerId": id,
                "questionId": question_id,
                "prompt": q.map(|q| q.prompt.clone()),
                "kind": q.map(|q| q.kind()),
                "options": options,
                "correctOptionIndex": correct_index,
                "expectedAnswer": expected,
                "selectedOptionIndex": selected,
                "answerText": text,
                "isCorrect": is_correct.map(|v| v != 0),
                "requiresReview": requires_review != 0,
            })
        })
        .collect();

    Ok(json!({
        "attempt": attempt,
        "quiz": quiz,
        "answers": answers,
    }))
}
