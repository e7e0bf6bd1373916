use crate::completion::{self, CompletionOutcome};
use crate::error::{CoreError, CoreResult};
use crate::grading::{percent_of, AttemptStatus};
use crate::quiz::{self, now_rfc3339, Lesson};
use crate::settings::LearningSettings;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    pub id: String,
    pub student_id: String,
    pub course_id: String,
    pub progress_percent: i64,
    pub enrolled_at: String,
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonProgress {
    pub is_completed: bool,
    pub completed_at: Option<String>,
    pub video_watch_progress_percent: i64,
    pub quiz_passed: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseProgress {
    pub progress_percent: i64,
    pub computed_percent: i64,
    pub completed_lessons: usize,
    pub total_lessons: usize,
    pub completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion: Option<CompletionOutcome>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonUpdate {
    pub lesson_id: String,
    pub progress: LessonProgress,
    pub lesson_completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub course_progress: Option<CourseProgress>,
    pub warnings: Vec<String>,
}

/// Quizzes attached to a lesson and how many of them the learner has passed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuizGate {
    pub total: i64,
    pub passed: i64,
}

impl QuizGate {
    pub fn is_met(&self) -> bool {
        self.passed >= self.total
    }
}

/// Names the completion gates a lesson has not met yet.
pub fn unmet_gates(
    lesson: &Lesson,
    quizzes: QuizGate,
    progress: &LessonProgress,
    video_threshold: i64,
) -> Vec<&'static str> {
    let mut unmet = Vec::new();
    if lesson.has_video && progress.video_watch_progress_percent < video_threshold {
        unmet.push("video");
    }
    if !quizzes.is_met() {
        unmet.push("quiz");
    }
    unmet
}

pub fn create_enrollment(conn: &Connection, student_id: &str, course_id: &str) -> CoreResult<Enrollment> {
    if student_id.trim().is_empty() {
        return Err(CoreError::validation("studentId must not be empty"));
    }
    if !quiz::course_exists(conn, course_id)? {
        return Err(CoreError::NotFound("course"));
    }
    conn.execute(
        "INSERT INTO enrollments(id, student_id, course_id, progress_percent, enrolled_at)
         VALUES(?, ?, ?, 0, ?)
         ON CONFLICT(student_id, course_id) DO NOTHING",
        (Uuid::new_v4().to_string(), student_id, course_id, now_rfc3339()),
    )?;
    load_enrollment(conn, student_id, course_id)?.ok_or(CoreError::NotFound("enrollment"))
}

pub fn load_enrollment(
    conn: &Connection,
    student_id: &str,
    course_id: &str,
) -> CoreResult<Option<Enrollment>> {
    let row = conn
        .query_row(
            "SELECT id, student_id, course_id, progress_percent, enrolled_at, completed_at
             FROM enrollments
             WHERE student_id = ? AND course_id = ?",
            (student_id, course_id),
            |r| {
                Ok(Enrollment {
                    id: r.get(0)?,
                    student_id: r.get(1)?,
                    course_id: r.get(2)?,
                    progress_percent: r.get(3)?,
                    enrolled_at: r.get(4)?,
                    completed_at: r.get(5)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

pub fn load_lesson_progress(
    conn: &Connection,
    student_id: &str,
    lesson_id: &str,
) -> CoreResult<Option<LessonProgress>> {
    let row = conn
        .query_row(
            "SELECT is_completed, completed_at, video_watch_progress_percent, quiz_passed
             FROM lesson_progress
             WHERE student_id = ? AND lesson_id = ?",
            (student_id, lesson_id),
            |r| {
                Ok(LessonProgress {
                    is_completed: r.get::<_, i64>(0)? != 0,
                    completed_at: r.get(1)?,
                    video_watch_progress_percent: r.get(2)?,
                    quiz_passed: r.get::<_, i64>(3)? != 0,
                })
            },
        )
        .optional()?;
    Ok(row)
}

/// A quiz counts as passed once any of the learner's attempts on it passed. Attempts still
/// waiting on a reviewer only carry a provisional score and do not count.
fn quiz_gate(conn: &Connection, student_id: &str, lesson_id: &str) -> CoreResult<QuizGate> {
    let gate = conn.query_row(
        "SELECT COUNT(*),
                COALESCE(SUM(EXISTS(
                  SELECT 1 FROM attempts a
                  WHERE a.quiz_id = z.id AND a.student_id = ?1
                    AND a.passed = 1 AND a.status <> ?3
                )), 0)
         FROM quizzes z
         WHERE z.lesson_id = ?2",
        (student_id, lesson_id, AttemptStatus::PendingReview.as_str()),
        |r| {
            Ok(QuizGate {
                total: r.get(0)?,
                passed: r.get(1)?,
            })
        },
    )?;
    Ok(gate)
}

/// Called after a passing attempt on one of the lesson's quizzes is stored. Refreshes
/// `quiz_passed` from the attempts and completes the lesson only when every gate is met.
/// Returns whether this call completed the lesson.
pub fn record_quiz_pass(
    conn: &Connection,
    settings: &LearningSettings,
    student_id: &str,
    lesson_id: &str,
) -> CoreResult<bool> {
    let lesson = quiz::load_lesson(conn, lesson_id)?;
    let gate = quiz_gate(conn, student_id, lesson_id)?;
    conn.execute(
        "INSERT INTO lesson_progress(student_id, lesson_id, quiz_passed, updated_at)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(student_id, lesson_id) DO UPDATE SET
           quiz_passed = excluded.quiz_passed,
           updated_at = excluded.updated_at",
        (student_id, lesson_id, gate.is_met() as i64, now_rfc3339()),
    )?;

    let progress = load_lesson_progress(conn, student_id, lesson_id)?.unwrap_or_default();
    if progress.is_completed {
        return Ok(false);
    }
    let unmet = unmet_gates(&lesson, gate, &progress, settings.video_completion_threshold);
    if !unmet.is_empty() {
        debug!(student_id, lesson_id, ?unmet, "quiz passed; lesson still has open gates");
        return Ok(false);
    }
    mark_lesson_completed(conn, student_id, lesson_id)
}

fn mark_lesson_completed(conn: &Connection, student_id: &str, lesson_id: &str) -> CoreResult<bool> {
    let now = now_rfc3339();
    let changed = conn.execute(
        "INSERT INTO lesson_progress(student_id, lesson_id, is_completed, completed_at, updated_at)
         VALUES(?, ?, 1, ?, ?)
         ON CONFLICT(student_id, lesson_id) DO UPDATE SET
           is_completed = 1,
           completed_at = COALESCE(lesson_progress.completed_at, excluded.completed_at),
           updated_at = excluded.updated_at
         WHERE lesson_progress.is_completed = 0",
        (student_id, lesson_id, &now, &now),
    )?;
    Ok(changed > 0)
}

/// Progress Aggregator: recompute the course percentage from lesson completion, merge it
/// monotonically into the enrollment, and hand off to the completion dispatcher at 100.
pub fn recompute_course_progress(
    conn: &Connection,
    settings: &LearningSettings,
    student_id: &str,
    course_id: &str,
) -> CoreResult<CourseProgress> {
    if load_enrollment(conn, student_id, course_id)?.is_none() {
        return Err(CoreError::NotFound("enrollment"));
    }

    let total_lessons: i64 = conn.query_row(
        "SELECT COUNT(*) FROM lessons WHERE course_id = ?",
        [course_id],
        |r| r.get(0),
    )?;
    let completed_lessons: i64 = conn.query_row(
        "SELECT COUNT(*)
         FROM lessons l
         JOIN lesson_progress lp ON lp.lesson_id = l.id AND lp.student_id = ?
         WHERE l.course_id = ? AND lp.is_completed = 1",
        (student_id, course_id),
        |r| r.get(0),
    )?;
    let total_lessons = total_lessons.max(0) as usize;
    let completed_lessons = completed_lessons.max(0) as usize;
    let computed_percent = percent_of(completed_lessons, total_lessons);

    // Monotonic merge in one statement; a stale recomputation never lowers the stored value.
    conn.execute(
        "UPDATE enrollments
         SET progress_percent = MAX(progress_percent, ?)
         WHERE student_id = ? AND course_id = ?",
        (computed_percent, student_id, course_id),
    )?;
    let progress_percent: i64 = conn.query_row(
        "SELECT progress_percent FROM enrollments WHERE student_id = ? AND course_id = ?",
        (student_id, course_id),
        |r| r.get(0),
    )?;

    let completion = if progress_percent >= 100 {
        Some(completion::dispatch(
            conn,
            &settings.certificate_prefix,
            student_id,
            course_id,
        )?)
    } else {
        None
    };

    Ok(CourseProgress {
        progress_percent,
        computed_percent,
        completed_lessons,
        total_lessons,
        completed: completion
            .as_ref()
            .map(|c| c.completed_at.is_some())
            .unwrap_or(false),
        completion,
    })
}

/// Follow-up after a lesson completes. Any failure is reported as a warning because the
/// lesson state that triggered it is already committed.
pub fn propagate_lesson_completion(
    conn: &Connection,
    settings: &LearningSettings,
    student_id: &str,
    course_id: &str,
) -> (Option<CourseProgress>, Vec<String>) {
    match recompute_course_progress(conn, settings, student_id, course_id) {
        Ok(p) => {
            let warnings = p
                .completion
                .as_ref()
                .map(|c| c.warnings.clone())
                .unwrap_or_default();
            (Some(p), warnings)
        }
        Err(CoreError::NotFound(entity)) => {
            warn!(student_id, course_id, entity, "no enrollment; course progress not updated");
            (None, vec![format!("{} not found; course progress not updated", entity)])
        }
        Err(e) => {
            warn!(student_id, course_id, error = %e, "course progress recomputation failed");
            (None, vec![e.to_string()])
        }
    }
}

fn finish_lesson_update(
    conn: &Connection,
    settings: &LearningSettings,
    student_id: &str,
    lesson: &Lesson,
    lesson_completed: bool,
) -> CoreResult<LessonUpdate> {
    let (course_progress, warnings) = if lesson_completed {
        info!(student_id, lesson_id = %lesson.id, "lesson completed");
        propagate_lesson_completion(conn, settings, student_id, &lesson.course_id)
    } else {
        (None, Vec::new())
    };
    let progress = load_lesson_progress(conn, student_id, &lesson.id)?.unwrap_or_default();
    Ok(LessonUpdate {
        lesson_id: lesson.id.clone(),
        progress,
        lesson_completed,
        course_progress,
        warnings,
    })
}

/// Stores the highest watch percentage seen and completes the lesson once every gate is met.
pub fn record_video(
    conn: &Connection,
    settings: &LearningSettings,
    student_id: &str,
    lesson_id: &str,
    watch_percent: i64,
) -> CoreResult<LessonUpdate> {
    if !(0..=100).contains(&watch_percent) {
        return Err(CoreError::validation_with(
            "watchPercent must be in 0..=100",
            json!({ "watchPercent": watch_percent }),
        ));
    }
    let lesson = quiz::load_lesson(conn, lesson_id)?;
    conn.execute(
        "INSERT INTO lesson_progress(student_id, lesson_id, video_watch_progress_percent, updated_at)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(student_id, lesson_id) DO UPDATE SET
           video_watch_progress_percent = MAX(lesson_progress.video_watch_progress_percent, excluded.video_watch_progress_percent),
           updated_at = excluded.updated_at",
        (student_id, lesson_id, watch_percent, now_rfc3339()),
    )?;

    let progress = load_lesson_progress(conn, student_id, lesson_id)?.unwrap_or_default();
    let mut completed_now = false;
    if !progress.is_completed {
        let gate = quiz_gate(conn, student_id, lesson_id)?;
        if unmet_gates(&lesson, gate, &progress, settings.video_completion_threshold).is_empty() {
            completed_now = mark_lesson_completed(conn, student_id, lesson_id)?;
        }
    }
    finish_lesson_update(conn, settings, student_id, &lesson, completed_now)
}

/// Explicit completion request; rejected while any gate is unmet. Idempotent.
pub fn complete_lesson(
    conn: &Connection,
    settings: &LearningSettings,
    student_id: &str,
    lesson_id: &str,
) -> CoreResult<LessonUpdate> {
    let lesson = quiz::load_lesson(conn, lesson_id)?;
    let progress = load_lesson_progress(conn, student_id, lesson_id)?.unwrap_or_default();
    if progress.is_completed {
        return finish_lesson_update(conn, settings, student_id, &lesson, false);
    }
    let gate = quiz_gate(conn, student_id, lesson_id)?;
    let unmet = unmet_gates(&lesson, gate, &progress, settings.video_completion_threshold);
    if !unmet.is_empty() {
        return Err(CoreError::validation_with(
            "lesson is not eligible for completion yet",
            json!({
                "unmetGates": unmet,
                "videoWatchProgressPercent": progress.video_watch_progress_percent,
                "videoCompletionThreshold": settings.video_completion_threshold,
            }),
        ));
    }
    let completed_now = mark_lesson_completed(conn, student_id, lesson_id)?;
    finish_lesson_update(conn, settings, student_id, &lesson, completed_now)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonProgressView {
    pub lesson_id: String,
    pub title: String,
    pub order_index: i64,
    pub has_video: bool,
    pub progress: LessonProgress,
}

pub fn course_progress_view(
    conn: &Connection,
    student_id: &str,
    course_id: &str,
) -> CoreResult<(Enrollment, Vec<LessonProgressView>)> {
    let enrollment =
        load_enrollment(conn, student_id, course_id)?.ok_or(CoreError::NotFound("enrollment"))?;
    let mut out = Vec::new();
    for lesson in quiz::load_course_lessons(conn, course_id)? {
        let progress = load_lesson_progress(conn, student_id, &lesson.id)?.unwrap_or_default();
        out.push(LessonProgressView {
            lesson_id: lesson.id,
            title: lesson.title,
            order_index: lesson.order_index,
            has_video: lesson.has_video,
            progress,
        });
    }
    Ok((enrollment, out))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lesson(has_video: bool) -> Lesson {
        Lesson {
            id: "l1".into(),
            course_id: "c1".into(),
            title: "Intro".into(),
            order_index: 0,
            has_video,
        }
    }

    #[test]
    fn gates_cover_video_threshold_and_quiz() {
        let mut p = LessonProgress {
            video_watch_progress_percent: 89,
            ..Default::default()
        };
        let one_open = QuizGate { total: 1, passed: 0 };
        assert_eq!(unmet_gates(&lesson(true), one_open, &p, 90), vec!["video", "quiz"]);
        p.video_watch_progress_percent = 90;
        assert_eq!(unmet_gates(&lesson(true), one_open, &p, 90), vec!["quiz"]);
        let all_passed = QuizGate { total: 1, passed: 1 };
        assert!(unmet_gates(&lesson(true), all_passed, &p, 90).is_empty());
        assert!(unmet_gates(&lesson(false), QuizGate::default(), &LessonProgress::default(), 90).is_empty());
    }

    #[test]
    fn quiz_gate_needs_every_quiz_passed() {
        let half = QuizGate { total: 2, passed: 1 };
        assert_eq!(unmet_gates(&lesson(false), half, &LessonProgress::default(), 90), vec!["quiz"]);
        // A passed quiz flag on the row does not stand in for the other quiz.
        let p = LessonProgress {
            quiz_passed: true,
            ..Default::default()
        };
        assert_eq!(unmet_gates(&lesson(false), half, &p, 90), vec!["quiz"]);
    }
}
