use crate::certificates::{self, Certificate};
use crate::error::{CoreError, CoreResult};
use crate::quiz::now_rfc3339;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionOutcome {
    /// True only for the call that flipped `completed_at` from null.
    pub newly_completed: bool,
    pub completed_at: Option<String>,
    pub certificate: Option<Certificate>,
    pub warnings: Vec<String>,
}

/// Runs when an enrollment's progress is at 100.
///
/// Completion is recorded first and is never undone; certificate issuance follows as a
/// soft step. A missing certificate from an earlier soft failure is issued here as well.
pub fn dispatch(
    conn: &Connection,
    certificate_prefix: &str,
    student_id: &str,
    course_id: &str,
) -> CoreResult<CompletionOutcome> {
    let changed = conn.execute(
        "UPDATE enrollments
         SET completed_at = ?
         WHERE student_id = ? AND course_id = ? AND completed_at IS NULL AND progress_percent >= 100",
        (now_rfc3339(), student_id, course_id),
    )?;
    let newly_completed = changed > 0;
    if newly_completed {
        info!(student_id, course_id, "course completed");
    }

    let completed_at: Option<String> = conn.query_row(
        "SELECT completed_at FROM enrollments WHERE student_id = ? AND course_id = ?",
        (student_id, course_id),
        |r| r.get(0),
    )?;
    if completed_at.is_none() {
        return Ok(CompletionOutcome {
            newly_completed: false,
            completed_at,
            certificate: None,
            warnings: Vec::new(),
        });
    }

    let (certificate, warnings) =
        certificates::issue_after_completion(conn, certificate_prefix, student_id, course_id);
    Ok(CompletionOutcome {
        newly_completed,
        completed_at,
        certificate,
        warnings,
    })
}

/// Explicit issue request. Only a completed enrollment qualifies; an existing certificate is
/// returned unchanged.
pub fn issue_for_enrollment(
    conn: &Connection,
    certificate_prefix: &str,
    student_id: &str,
    course_id: &str,
) -> CoreResult<certificates::IssuedCertificate> {
    let completed_at: Option<Option<String>> = conn
        .query_row(
            "SELECT completed_at FROM enrollments WHERE student_id = ? AND course_id = ?",
            (student_id, course_id),
            |r| r.get(0),
        )
        .optional()?;
    match completed_at {
        None => Err(CoreError::NotFound("enrollment")),
        Some(None) => Err(CoreError::validation(
            "course is not completed; no certificate can be issued",
        )),
        Some(Some(_)) => certificates::issue_certificate(conn, certificate_prefix, student_id, course_id),
    }
}
