use crate::error::{CoreError, CoreResult};
use crate::quiz::now_rfc3339;
use rusqlite::Connection;
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub student_id: String,
    pub title: String,
    pub message: String,
    pub link: Option<String>,
    pub is_read: bool,
    pub created_at: String,
}

pub fn course_link(course_id: &str) -> String {
    format!("/courses/{}/learn", course_id)
}

pub fn enqueue(
    conn: &Connection,
    student_id: &str,
    title: &str,
    message: &str,
    link: Option<&str>,
) -> CoreResult<String> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO notifications(id, student_id, title, message, link, is_read, created_at)
         VALUES(?, ?, ?, ?, ?, 0, ?)",
        (&id, student_id, title, message, link, now_rfc3339()),
    )?;
    Ok(id)
}

/// Fire-and-forget: a failed insert is logged and returned as a warning string.
pub fn enqueue_best_effort(
    conn: &Connection,
    student_id: &str,
    title: &str,
    message: &str,
    link: Option<&str>,
) -> Result<String, String> {
    enqueue(conn, student_id, title, message, link).map_err(|e| {
        let e = CoreError::NonFatalSideEffect(format!("notification: {}", e));
        warn!(student_id, error = %e, "notification not enqueued");
        e.to_string()
    })
}

pub fn list(
    conn: &Connection,
    student_id: &str,
    unread_only: bool,
) -> CoreResult<Vec<Notification>> {
    let mut stmt = conn.prepare(
        "SELECT id, student_id, title, message, link, is_read, created_at
         FROM notifications
         WHERE student_id = ? AND (? = 0 OR is_read = 0)
         ORDER BY created_at DESC, rowid DESC",
    )?;
    let rows = stmt
        .query_map((student_id, unread_only as i64), |r| {
            Ok(Notification {
                id: r.get(0)?,
                student_id: r.get(1)?,
                title: r.get(2)?,
                message: r.get(3)?,
                link: r.get(4)?,
                is_read: r.get::<_, i64>(5)? != 0,
                created_at: r.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn mark_read(conn: &Connection, notification_id: &str) -> CoreResult<()> {
    let changed = conn.execute(
        "UPDATE notifications SET is_read = 1 WHERE id = ?",
        [notification_id],
    )?;
    if changed == 0 {
        return Err(CoreError::NotFound("notification"));
    }
    Ok(())
}
