use crate::error::{CoreError, CoreResult};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuestionBody {
    Mcq {
        options: Vec<String>,
        #[serde(rename = "correctOptionIndex")]
        correct_option_index: usize,
    },
    Qa {
        #[serde(rename = "expectedAnswer")]
        expected_answer: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    pub prompt: String,
    pub order_index: i64,
    #[serde(flatten)]
    pub body: QuestionBody,
}

impl Question {
    pub fn kind(&self) -> &'static str {
        match self.body {
            QuestionBody::Mcq { .. } => "mcq",
            QuestionBody::Qa { .. } => "qa",
        }
    }

    pub fn requires_review(&self) -> bool {
        matches!(self.body, QuestionBody::Qa { .. })
    }

    /// Learner-facing shape: the answer key never leaves the daemon before grading.
    pub fn to_public_json(&self) -> serde_json::Value {
        let options: &[String] = match &self.body {
            QuestionBody::Mcq { options, .. } => options,
            QuestionBody::Qa { .. } => &[],
        };
        json!({
            "id": self.id,
            "prompt": self.prompt,
            "orderIndex": self.order_index,
            "kind": self.kind(),
            "options": options,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Quiz {
    pub id: String,
    pub course_id: String,
    pub lesson_id: Option<String>,
    pub title: String,
    pub passing_score_percent: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    pub id: String,
    pub course_id: String,
    pub title: String,
    pub order_index: i64,
    pub has_video: bool,
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

pub fn load_quiz(conn: &Connection, quiz_id: &str) -> CoreResult<Quiz> {
    conn.query_row(
        "SELECT id, course_id, lesson_id, title, passing_score_percent
         FROM quizzes WHERE id = ?",
        [quiz_id],
        |r| {
            Ok(Quiz {
                id: r.get(0)?,
                course_id: r.get(1)?,
                lesson_id: r.get(2)?,
                title: r.get(3)?,
                passing_score_percent: r.get(4)?,
            })
        },
    )
    .optional()?
    .ok_or(CoreError::NotFound("quiz"))
}

pub fn load_lesson(conn: &Connection, lesson_id: &str) -> CoreResult<Lesson> {
    conn.query_row(
        "SELECT id, course_id, title, order_index, has_video FROM lessons WHERE id = ?",
        [lesson_id],
        |r| {
            Ok(Lesson {
                id: r.get(0)?,
                course_id: r.get(1)?,
                title: r.get(2)?,
                order_index: r.get(3)?,
                has_video: r.get::<_, i64>(4)? != 0,
            })
        },
    )
    .optional()?
    .ok_or(CoreError::NotFound("lesson"))
}

pub fn load_course_lessons(conn: &Connection, course_id: &str) -> CoreResult<Vec<Lesson>> {
    let mut stmt = conn.prepare(
        "SELECT id, course_id, title, order_index, has_video
         FROM lessons
         WHERE course_id = ?
         ORDER BY order_index, rowid",
    )?;
    let lessons = stmt
        .query_map([course_id], |r| {
            Ok(Lesson {
                id: r.get(0)?,
                course_id: r.get(1)?,
                title: r.get(2)?,
                order_index: r.get(3)?,
                has_video: r.get::<_, i64>(4)? != 0,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(lessons)
}

pub fn course_exists(conn: &Connection, course_id: &str) -> CoreResult<bool> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM courses WHERE id = ?", [course_id], |r| r.get(0))
        .optional()?;
    Ok(found.is_some())
}

pub fn load_questions(conn: &Connection, quiz_id: &str) -> CoreResult<Vec<Question>> {
    let mut stmt = conn.prepare(
        "SELECT id, prompt, kind, options_json, correct_option_index, expected_answer, order_index
         FROM questions
         WHERE quiz_id = ?
         ORDER BY order_index, rowid",
    )?;
    let rows = stmt
        .query_map([quiz_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, Option<i64>>(4)?,
                r.get::<_, Option<String>>(5)?,
                r.get::<_, i64>(6)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = Vec::with_capacity(rows.len());
    for (id, prompt, kind, options_json, correct, expected, order_index) in rows {
        let body = question_body_from_row(&kind, &options_json, correct, expected).ok_or_else(
            || CoreError::validation_with("stored question is malformed", json!({ "questionId": id })),
        )?;
        out.push(Question {
            id,
            prompt,
            order_index,
            body,
        });
    }
    Ok(out)
}

fn question_body_from_row(
    kind: &str,
    options_json: &str,
    correct: Option<i64>,
    expected: Option<String>,
) -> Option<QuestionBody> {
    match kind {
        "mcq" => {
            let options: Vec<String> = serde_json::from_str(options_json).ok()?;
            let idx = usize::try_from(correct?).ok()?;
            if idx >= options.len() {
                return None;
            }
            Some(QuestionBody::Mcq {
                options,
                correct_option_index: idx,
            })
        }
        "qa" => Some(QuestionBody::Qa {
            expected_answer: expected,
        }),
        _ => None,
    }
}

pub fn validate_question_body(body: &QuestionBody) -> CoreResult<()> {
    match body {
        QuestionBody::Mcq {
            options,
            correct_option_index,
        } => {
            if options.is_empty() {
                return Err(CoreError::validation("multiple-choice question needs at least one option"));
            }
            if options.iter().any(|o| o.trim().is_empty()) {
                return Err(CoreError::validation("options must not be blank"));
            }
            if *correct_option_index >= options.len() {
                return Err(CoreError::validation_with(
                    "correctOptionIndex is out of range",
                    json!({ "correctOptionIndex": correct_option_index, "optionCount": options.len() }),
                ));
            }
            Ok(())
        }
        QuestionBody::Qa { .. } => Ok(()),
    }
}

pub fn create_course(conn: &Connection, title: &str) -> CoreResult<String> {
    let title = title.trim();
    if title.is_empty() {
        return Err(CoreError::validation("title must not be empty"));
    }
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO courses(id, title, created_at) VALUES(?, ?, ?)",
        (&id, title, now_rfc3339()),
    )?;
    Ok(id)
}

pub fn create_lesson(
    conn: &Connection,
    course_id: &str,
    title: &str,
    order_index: Option<i64>,
    has_video: bool,
) -> CoreResult<String> {
    if !course_exists(conn, course_id)? {
        return Err(CoreError::NotFound("course"));
    }
    let title = title.trim();
    if title.is_empty() {
        return Err(CoreError::validation("title must not be empty"));
    }
    let order_index = match order_index {
        Some(v) => v,
        None => conn.query_row(
            "SELECT COALESCE(MAX(order_index) + 1, 0) FROM lessons WHERE course_id = ?",
            [course_id],
            |r| r.get(0),
        )?,
    };
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO lessons(id, course_id, title, order_index, has_video) VALUES(?, ?, ?, ?, ?)",
        (&id, course_id, title, order_index, has_video as i64),
    )?;
    Ok(id)
}

pub fn create_quiz(
    conn: &Connection,
    course_id: &str,
    lesson_id: Option<&str>,
    title: &str,
    passing_score_percent: i64,
) -> CoreResult<String> {
    if !(0..=100).contains(&passing_score_percent) {
        return Err(CoreError::validation_with(
            "passingScorePercent must be in 0..=100",
            json!({ "passingScorePercent": passing_score_percent }),
        ));
    }
    if !course_exists(conn, course_id)? {
        return Err(CoreError::NotFound("course"));
    }
    if let Some(lesson_id) = lesson_id {
        let lesson = load_lesson(conn, lesson_id)?;
        if lesson.course_id != course_id {
            return Err(CoreError::validation("lesson belongs to a different course"));
        }
    }
    let title = title.trim();
    if title.is_empty() {
        return Err(CoreError::validation("title must not be empty"));
    }
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO quizzes(id, course_id, lesson_id, title, passing_score_percent)
         VALUES(?, ?, ?, ?, ?)",
        (&id, course_id, lesson_id, title, passing_score_percent),
    )?;
    Ok(id)
}

pub fn create_question(
    conn: &Connection,
    quiz_id: &str,
    prompt: &str,
    order_index: Option<i64>,
    body: &QuestionBody,
) -> CoreResult<String> {
    load_quiz(conn, quiz_id)?;
    let prompt = prompt.trim();
    if prompt.is_empty() {
        return Err(CoreError::validation("prompt must not be empty"));
    }
    validate_question_body(body)?;

    let order_index = match order_index {
        Some(v) => v,
        None => conn.query_row(
            "SELECT COALESCE(MAX(order_index) + 1, 0) FROM questions WHERE quiz_id = ?",
            [quiz_id],
            |r| r.get(0),
        )?,
    };
    let (kind, options_json, correct, expected): (&str, String, Option<i64>, Option<&str>) =
        match body {
            QuestionBody::Mcq {
                options,
                correct_option_index,
            } => (
                "mcq",
                serde_json::to_string(options).map_err(|e| CoreError::validation(e.to_string()))?,
                Some(*correct_option_index as i64),
                None,
            ),
            QuestionBody::Qa { expected_answer } => {
                ("qa", "[]".to_string(), None, expected_answer.as_deref())
            }
        };

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO questions(id, quiz_id, prompt, kind, options_json, correct_option_index, expected_answer, order_index)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (&id, quiz_id, prompt, kind, options_json, correct, expected, order_index),
    )?;
    Ok(id)
}
