use crate::error::{CoreError, CoreResult};
use crate::notifications;
use crate::quiz::now_rfc3339;
use chrono::{Datelike, Utc};
use rand::Rng;
use rusqlite::{Connection, ErrorCode, OptionalExtension};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

const ISSUE_MAX_TRIES: usize = 3;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    pub id: String,
    pub student_id: String,
    pub course_id: String,
    pub certificate_number: String,
    pub verification_code: String,
    pub issued_at: String,
}

pub trait CertificateNumberGenerator {
    fn name(&self) -> &'static str;
    fn next_number(&self, conn: &Connection, prefix: &str, year: i32) -> CoreResult<String>;
}

/// Per-year monotonic counter kept in the workspace database.
pub struct SequenceNumberGenerator;

impl CertificateNumberGenerator for SequenceNumberGenerator {
    fn name(&self) -> &'static str {
        "sequence"
    }

    fn next_number(&self, conn: &Connection, prefix: &str, year: i32) -> CoreResult<String> {
        let value: i64 = conn.query_row(
            "INSERT INTO certificate_sequences(year, last_value) VALUES(?, 1)
             ON CONFLICT(year) DO UPDATE SET last_value = last_value + 1
             RETURNING last_value",
            [year],
            |r| r.get(0),
        )?;
        Ok(format_number(prefix, year, value))
    }
}

/// Degraded mode: six random digits. Collisions surface as a unique violation and are retried.
pub struct RandomNumberGenerator;

impl CertificateNumberGenerator for RandomNumberGenerator {
    fn name(&self) -> &'static str {
        "random"
    }

    fn next_number(&self, _conn: &Connection, prefix: &str, year: i32) -> CoreResult<String> {
        let value: i64 = rand::rng().random_range(0..1_000_000);
        Ok(format_number(prefix, year, value))
    }
}

pub fn format_number(prefix: &str, year: i32, value: i64) -> String {
    format!("{}-{}-{:06}", prefix, year, value)
}

pub fn verification_code(certificate_number: &str, student_id: &str, course_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}|{}|{}", certificate_number, student_id, course_id));
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

fn next_number_with_fallback(
    conn: &Connection,
    generators: &[&dyn CertificateNumberGenerator],
    prefix: &str,
    year: i32,
) -> CoreResult<String> {
    let mut last_err = CoreError::NonFatalSideEffect("no certificate number generator".into());
    for (i, g) in generators.iter().enumerate() {
        match g.next_number(conn, prefix, year) {
            Ok(n) => {
                if i > 0 {
                    warn!(generator = g.name(), number = %n, "certificate number from fallback generator");
                }
                return Ok(n);
            }
            Err(e) => {
                warn!(generator = g.name(), error = %e, "certificate number generator failed");
                last_err = e;
            }
        }
    }
    Err(last_err)
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::ConstraintViolation)
}

pub fn load_certificate(
    conn: &Connection,
    student_id: &str,
    course_id: &str,
) -> CoreResult<Option<Certificate>> {
    let row = conn
        .query_row(
            "SELECT id, student_id, course_id, certificate_number, verification_code, issued_at
             FROM certificates
             WHERE student_id = ? AND course_id = ?",
            (student_id, course_id),
            row_to_certificate,
        )
        .optional()?;
    Ok(row)
}

fn row_to_certificate(r: &rusqlite::Row<'_>) -> rusqlite::Result<Certificate> {
    Ok(Certificate {
        id: r.get(0)?,
        student_id: r.get(1)?,
        course_id: r.get(2)?,
        certificate_number: r.get(3)?,
        verification_code: r.get(4)?,
        issued_at: r.get(5)?,
    })
}

#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    pub certificate: Certificate,
    pub created: bool,
}

/// Idempotent upsert keyed by (student, course); an existing certificate is returned untouched.
pub fn issue_certificate(
    conn: &Connection,
    prefix: &str,
    student_id: &str,
    course_id: &str,
) -> CoreResult<IssuedCertificate> {
    if let Some(existing) = load_certificate(conn, student_id, course_id)? {
        return Ok(IssuedCertificate {
            certificate: existing,
            created: false,
        });
    }

    let year = Utc::now().year();
    let generators: [&dyn CertificateNumberGenerator; 2] =
        [&SequenceNumberGenerator, &RandomNumberGenerator];

    for _ in 0..ISSUE_MAX_TRIES {
        let number = next_number_with_fallback(conn, &generators, prefix, year)?;
        let code = verification_code(&number, student_id, course_id);
        let inserted = conn.execute(
            "INSERT INTO certificates(id, student_id, course_id, certificate_number, verification_code, issued_at)
             VALUES(?, ?, ?, ?, ?, ?)
             ON CONFLICT(student_id, course_id) DO NOTHING",
            (
                Uuid::new_v4().to_string(),
                student_id,
                course_id,
                &number,
                &code,
                now_rfc3339(),
            ),
        );
        match inserted {
            Ok(_) => {
                let Some(cert) = load_certificate(conn, student_id, course_id)? else {
                    return Err(CoreError::NonFatalSideEffect(
                        "certificate vanished after insert".into(),
                    ));
                };
                let created = cert.certificate_number == number;
                if created {
                    info!(student_id, course_id, number = %number, "certificate issued");
                }
                return Ok(IssuedCertificate {
                    certificate: cert,
                    created,
                });
            }
            Err(e) if is_unique_violation(&e) => {
                warn!(number = %number, "certificate number collision, retrying");
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(CoreError::NonFatalSideEffect(
        "could not allocate a unique certificate number".into(),
    ))
}

/// Issues the certificate for a completed enrollment and tells the learner about it.
/// Every failure here is soft: the caller gets a warning, never an error.
pub fn issue_after_completion(
    conn: &Connection,
    prefix: &str,
    student_id: &str,
    course_id: &str,
) -> (Option<Certificate>, Vec<String>) {
    let mut warnings = Vec::new();
    match issue_certificate(conn, prefix, student_id, course_id) {
        Ok(issued) => {
            if issued.created {
                let message = format!(
                    "Congratulations! Your certificate {} is ready.",
                    issued.certificate.certificate_number
                );
                if let Err(w) = notifications::enqueue_best_effort(
                    conn,
                    student_id,
                    "Certificate issued",
                    &message,
                    Some(&notifications::course_link(course_id)),
                ) {
                    warnings.push(w);
                }
            }
            (Some(issued.certificate), warnings)
        }
        Err(e) => {
            let e = match e {
                CoreError::NonFatalSideEffect(_) => e,
                other => CoreError::NonFatalSideEffect(format!("certificate: {}", other)),
            };
            warn!(student_id, course_id, error = %e, "certificate issuance failed; enrollment stays completed");
            warnings.push(e.to_string());
            (None, warnings)
        }
    }
}

pub fn verify(
    conn: &Connection,
    certificate_number: &str,
    code: &str,
) -> CoreResult<Option<Certificate>> {
    let cert = conn
        .query_row(
            "SELECT id, student_id, course_id, certificate_number, verification_code, issued_at
             FROM certificates
             WHERE certificate_number = ?",
            [certificate_number.trim()],
            row_to_certificate,
        )
        .optional()?;
    Ok(cert.filter(|c| c.verification_code.eq_ignore_ascii_case(code.trim())))
}
