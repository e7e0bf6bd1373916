use crate::attempts::{self, Attempt, ATTEMPT_COLUMNS};
use crate::error::{CoreError, CoreResult};
use crate::grading::{self, AttemptStatus, ReviewRecord};
use crate::notifications;
use crate::progress::{self, CourseProgress};
use crate::quiz::{self, now_rfc3339};
use crate::settings::LearningSettings;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingReview {
    pub attempt: Attempt,
    pub quiz_title: String,
    pub course_id: String,
    pub pending_answers: i64,
}

/// Attempts waiting on a reviewer, oldest first.
pub fn pending_reviews(
    conn: &Connection,
    course_id: Option<&str>,
    quiz_id: Option<&str>,
) -> CoreResult<Vec<PendingReview>> {
    let cols = ATTEMPT_COLUMNS
        .split(',')
        .map(|c| format!("a.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT {cols}, z.title, z.course_id,
           (SELECT COUNT(*) FROM answers x WHERE x.attempt_id = a.id AND x.requires_review = 1)
         FROM attempts a
         JOIN quizzes z ON z.id = a.quiz_id
         WHERE a.status = ?
           AND (?2 IS NULL OR z.course_id = ?2)
           AND (?3 IS NULL OR a.quiz_id = ?3)
         ORDER BY a.completed_at, a.rowid"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            (AttemptStatus::PendingReview.as_str(), course_id, quiz_id),
            |r| {
                Ok(PendingReview {
                    attempt: attempts::row_to_attempt(r)?,
                    quiz_title: r.get(11)?,
                    course_id: r.get(12)?,
                    pending_answers: r.get(13)?,
                })
            },
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewOutcome {
    pub attempt_id: String,
    pub score_percent: i64,
    pub passed: bool,
    pub status: &'static str,
    pub lesson_completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub course_progress: Option<CourseProgress>,
    pub ignored_answer_ids: Vec<String>,
    pub warnings: Vec<String>,
}

fn load_review_records(conn: &Connection, attempt_id: &str) -> CoreResult<Vec<ReviewRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, requires_review, is_correct FROM answers WHERE attempt_id = ? ORDER BY rowid",
    )?;
    let rows = stmt
        .query_map([attempt_id], |r| {
            Ok(ReviewRecord {
                answer_id: r.get(0)?,
                requires_review: r.get::<_, i64>(1)? != 0,
                is_correct: r.get::<_, Option<i64>>(2)?.map(|v| v != 0),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Applies a reviewer's QA decisions and finalizes the attempt.
///
/// Answer updates, the attempt row and the lesson's quiz gate commit together. QA answers
/// left undecided this time go back to unreviewed (`is_correct` null) and score as incorrect.
/// Course aggregation and the learner notification run afterwards and only produce warnings.
/// Submitting the same decisions again yields the same stored result.
pub fn submit_review(
    conn: &Connection,
    settings: &LearningSettings,
    attempt_id: &str,
    reviewer_id: &str,
    decisions: &HashMap<String, bool>,
) -> CoreResult<ReviewOutcome> {
    if reviewer_id.trim().is_empty() {
        return Err(CoreError::validation("reviewerId must not be empty"));
    }
    let attempt = attempts::load_attempt(conn, attempt_id)?;
    if AttemptStatus::parse(&attempt.status) == Some(AttemptStatus::Reviewed) {
        info!(attempt_id, previous_reviewer = ?attempt.reviewed_by, "attempt is being re-reviewed");
    }
    let quiz = quiz::load_quiz(conn, &attempt.quiz_id)?;
    let records = load_review_records(conn, attempt_id)?;
    if !records.iter().any(|r| r.requires_review) {
        return Err(CoreError::validation(
            "attempt has no answers that require review",
        ));
    }

    let outcome = grading::regrade(
        &records,
        decisions,
        attempt.total_questions.max(0) as usize,
        quiz.passing_score_percent,
    )?;
    if !outcome.ignored_answer_ids.is_empty() {
        debug!(attempt_id, ignored = ?outcome.ignored_answer_ids, "decisions for auto-graded answers ignored");
    }

    let tx = conn.unchecked_transaction()?;
    {
        let mut update_answer =
            tx.prepare("UPDATE answers SET is_correct = ? WHERE id = ? AND attempt_id = ?")?;
        for (answer_id, correct) in &outcome.qa_updates {
            update_answer.execute((correct.map(|v| v as i64), answer_id, attempt_id))?;
        }
    }
    tx.execute(
        "UPDATE attempts
         SET score_percent = ?, passed = ?, status = ?, reviewed_by = ?, reviewed_at = ?
         WHERE id = ?",
        (
            outcome.score_percent,
            outcome.passed as i64,
            AttemptStatus::Reviewed.as_str(),
            reviewer_id,
            now_rfc3339(),
            attempt_id,
        ),
    )?;
    let mut lesson_completed = false;
    if let Some(lesson_id) = quiz.lesson_id.as_deref().filter(|_| outcome.passed) {
        lesson_completed =
            progress::record_quiz_pass(&tx, settings, &attempt.student_id, lesson_id)?;
    }
    tx.commit()?;

    info!(
        attempt_id,
        reviewer_id,
        auto_correct = outcome.auto_correct_count,
        qa_correct = outcome.qa_marked_correct_count,
        score = outcome.score_percent,
        passed = outcome.passed,
        "attempt reviewed"
    );

    let mut warnings = Vec::new();
    let mut course_progress = None;
    if lesson_completed {
        let (p, w) =
            progress::propagate_lesson_completion(conn, settings, &attempt.student_id, &quiz.course_id);
        course_progress = p;
        warnings.extend(w);
    }

    if settings.notify_on_review {
        let verdict = if outcome.passed { "passed" } else { "did not pass" };
        let message = format!(
            "Your attempt on \"{}\" was reviewed: {}% ({}).",
            quiz.title, outcome.score_percent, verdict
        );
        if let Err(w) = notifications::enqueue_best_effort(
            conn,
            &attempt.student_id,
            "Quiz reviewed",
            &message,
            Some(&notifications::course_link(&quiz.course_id)),
        ) {
            warnings.push(w);
        }
    }
    if !warnings.is_empty() {
        warn!(attempt_id, count = warnings.len(), "review finished with warnings");
    }

    Ok(ReviewOutcome {
        attempt_id: attempt_id.to_string(),
        score_percent: outcome.score_percent,
        passed: outcome.passed,
        status: AttemptStatus::Reviewed.as_str(),
        lesson_completed,
        course_progress,
        ignored_answer_ids: outcome.ignored_answer_ids,
        warnings,
    })
}
