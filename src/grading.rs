use crate::error::{CoreError, CoreResult};
use crate::quiz::{Question, QuestionBody};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptStatus {
    AutoGraded,
    PendingReview,
    Reviewed,
}

impl AttemptStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AutoGraded => "auto_graded",
            Self::PendingReview => "pending_review",
            Self::Reviewed => "reviewed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "auto_graded" => Some(Self::AutoGraded),
            "pending_review" => Some(Self::PendingReview),
            "reviewed" => Some(Self::Reviewed),
            _ => None,
        }
    }
}

/// A learner's raw answer as it arrives on the wire: an option index or free text.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum SubmittedAnswer {
    Choice(i64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct GradedAnswer {
    pub question_id: String,
    pub selected_option_index: Option<i64>,
    pub answer_text: Option<String>,
    /// Counted toward the provisional score; for QA this is only the string-match hint.
    pub provisional_correct: bool,
    /// What gets persisted: set for MCQ, always `None` for QA until a reviewer decides.
    pub is_correct: Option<bool>,
    pub requires_review: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GradedSubmission {
    pub answers: Vec<GradedAnswer>,
    pub correct_count: usize,
    pub total_questions: usize,
    pub score_percent: i64,
    pub passed: bool,
    pub status: AttemptStatus,
}

/// `round(100 * part / total)` with halves rounded up; 0 for an empty denominator.
pub fn percent_of(part: usize, total: usize) -> i64 {
    if total == 0 {
        return 0;
    }
    ((200 * part + total) / (2 * total)) as i64
}

pub fn is_passing(score_percent: i64, passing_score_percent: i64) -> bool {
    score_percent >= passing_score_percent
}

/// Case-insensitive comparison of trimmed text.
pub fn answers_match(given: &str, expected: &str) -> bool {
    given.trim().to_lowercase() == expected.trim().to_lowercase()
}

fn grade_one(question: &Question, answer: &SubmittedAnswer) -> CoreResult<GradedAnswer> {
    match (&question.body, answer) {
        (
            QuestionBody::Mcq {
                options,
                correct_option_index,
            },
            SubmittedAnswer::Choice(idx),
        ) => {
            if *idx < 0 || (*idx as usize) >= options.len() {
                return Err(CoreError::validation_with(
                    "selected option is out of range",
                    json!({ "questionId": question.id, "selectedOptionIndex": idx }),
                ));
            }
            let correct = *idx as usize == *correct_option_index;
            Ok(GradedAnswer {
                question_id: question.id.clone(),
                selected_option_index: Some(*idx),
                answer_text: None,
                provisional_correct: correct,
                is_correct: Some(correct),
                requires_review: false,
            })
        }
        (QuestionBody::Qa { expected_answer }, SubmittedAnswer::Text(text)) => {
            if text.trim().is_empty() {
                return Err(CoreError::validation_with(
                    "answer must not be blank",
                    json!({ "questionId": question.id }),
                ));
            }
            let hint = expected_answer
                .as_deref()
                .map(|e| answers_match(text, e))
                .unwrap_or(false);
            Ok(GradedAnswer {
                question_id: question.id.clone(),
                selected_option_index: None,
                answer_text: Some(text.clone()),
                provisional_correct: hint,
                is_correct: None,
                requires_review: true,
            })
        }
        _ => Err(CoreError::validation_with(
            "answer shape does not match question kind",
            json!({ "questionId": question.id, "kind": question.kind() }),
        )),
    }
}

/// Grades a full submission. Every question must be answered and no foreign ids may appear.
pub fn grade_submission(
    questions: &[Question],
    answers: &HashMap<String, SubmittedAnswer>,
    passing_score_percent: i64,
) -> CoreResult<GradedSubmission> {
    if questions.is_empty() {
        return Err(CoreError::DegenerateQuiz);
    }

    let mut unknown: Vec<&str> = answers
        .keys()
        .filter(|id| !questions.iter().any(|q| &q.id == *id))
        .map(String::as_str)
        .collect();
    if !unknown.is_empty() {
        unknown.sort_unstable();
        return Err(CoreError::validation_with(
            "answers reference questions outside this quiz",
            json!({ "questionIds": unknown }),
        ));
    }

    let missing: Vec<&str> = questions
        .iter()
        .filter(|q| !answers.contains_key(&q.id))
        .map(|q| q.id.as_str())
        .collect();
    if !missing.is_empty() {
        return Err(CoreError::validation_with(
            "every question must be answered before submitting",
            json!({ "missingQuestionIds": missing }),
        ));
    }

    let mut graded = Vec::with_capacity(questions.len());
    for q in questions {
        // Presence was checked above.
        let Some(answer) = answers.get(&q.id) else {
            continue;
        };
        graded.push(grade_one(q, answer)?);
    }

    let correct_count = graded.iter().filter(|a| a.provisional_correct).count();
    let total_questions = questions.len();
    let score_percent = percent_of(correct_count, total_questions);
    let status = if graded.iter().any(|a| a.requires_review) {
        AttemptStatus::PendingReview
    } else {
        AttemptStatus::AutoGraded
    };

    Ok(GradedSubmission {
        answers: graded,
        correct_count,
        total_questions,
        score_percent,
        passed: is_passing(score_percent, passing_score_percent),
        status,
    })
}

/// One stored answer as seen by the review step.
#[derive(Debug, Clone)]
pub struct ReviewRecord {
    pub answer_id: String,
    pub requires_review: bool,
    pub is_correct: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegradeOutcome {
    pub auto_correct_count: usize,
    pub qa_marked_correct_count: usize,
    pub score_percent: i64,
    pub passed: bool,
    /// New `is_correct` for every QA answer; `None` clears a decision from an earlier review.
    pub qa_updates: Vec<(String, Option<bool>)>,
    pub ignored_answer_ids: Vec<String>,
}

/// Recomputes the final score from auto-graded correctness plus this session's QA decisions.
pub fn regrade(
    records: &[ReviewRecord],
    decisions: &HashMap<String, bool>,
    total_questions: usize,
    passing_score_percent: i64,
) -> CoreResult<RegradeOutcome> {
    if total_questions == 0 {
        return Err(CoreError::DegenerateQuiz);
    }
    let mut foreign: Vec<&str> = decisions
        .keys()
        .filter(|id| !records.iter().any(|r| &r.answer_id == *id))
        .map(String::as_str)
        .collect();
    if !foreign.is_empty() {
        foreign.sort_unstable();
        return Err(CoreError::validation_with(
            "decisions reference answers outside this attempt",
            json!({ "answerIds": foreign }),
        ));
    }

    let auto_correct_count = records
        .iter()
        .filter(|r| !r.requires_review && r.is_correct == Some(true))
        .count();

    let mut qa_updates = Vec::new();
    let mut ignored_answer_ids = Vec::new();
    for r in records {
        match decisions.get(&r.answer_id) {
            Some(v) if r.requires_review => qa_updates.push((r.answer_id.clone(), Some(*v))),
            Some(_) => ignored_answer_ids.push(r.answer_id.clone()),
            None if r.requires_review => qa_updates.push((r.answer_id.clone(), None)),
            None => {}
        }
    }
    let qa_marked_correct_count = qa_updates
        .iter()
        .filter(|(_, v)| *v == Some(true))
        .count();

    let score_percent = percent_of(auto_correct_count + qa_marked_correct_count, total_questions);
    Ok(RegradeOutcome {
        auto_correct_count,
        qa_marked_correct_count,
        score_percent,
        passed: is_passing(score_percent, passing_score_percent),
        qa_updates,
        ignored_answer_ids,
    })
}
