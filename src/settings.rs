use crate::db;
use rusqlite::Connection;
use serde_json::{json, Map, Value};

pub const DEFAULT_MAX_ATTEMPTS: i64 = 3;
pub const DEFAULT_VIDEO_COMPLETION_THRESHOLD: i64 = 90;
pub const DEFAULT_CERTIFICATE_PREFIX: &str = "CERT";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetupSection {
    Learning,
}

impl SetupSection {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "learning" => Some(Self::Learning),
            _ => None,
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            Self::Learning => "setup.learning",
        }
    }

    pub fn all() -> &'static [SetupSection] {
        &[Self::Learning]
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Learning => "learning",
        }
    }
}

/// Typed view of the `learning` section used by the grading and progress code.
#[derive(Debug, Clone, PartialEq)]
pub struct LearningSettings {
    pub max_attempts: i64,
    pub video_completion_threshold: i64,
    pub certificate_prefix: String,
    pub notify_on_review: bool,
}

impl Default for LearningSettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            video_completion_threshold: DEFAULT_VIDEO_COMPLETION_THRESHOLD,
            certificate_prefix: DEFAULT_CERTIFICATE_PREFIX.to_string(),
            notify_on_review: true,
        }
    }
}

pub fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Learning => json!({
            "maxAttempts": DEFAULT_MAX_ATTEMPTS,
            "videoCompletionThreshold": DEFAULT_VIDEO_COMPLETION_THRESHOLD,
            "certificatePrefix": DEFAULT_CERTIFICATE_PREFIX,
            "notifyOnReview": true
        }),
    }
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_certificate_prefix(v: &Value, key: &str) -> Result<String, String> {
    let s = v
        .as_str()
        .ok_or_else(|| format!("{} must be string", key))?
        .trim()
        .to_ascii_uppercase();
    if s.len() < 2 || s.len() > 12 || !s.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(format!("{} must be 2..=12 letters or digits", key));
    }
    Ok(s)
}

pub fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            SetupSection::Learning => match k.as_str() {
                "maxAttempts" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 20)?));
                }
                "videoCompletionThreshold" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 100)?));
                }
                "certificatePrefix" => {
                    obj.insert(k.clone(), Value::String(parse_certificate_prefix(v, k)?));
                }
                "notifyOnReview" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown learning field: {}", k)),
            },
        }
    }
    Ok(())
}

pub fn load_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Best-effort apply: a bad historical value must not block grading.
            let _ = merge_section_patch(section, &mut current, saved_obj);
        }
    }
    Ok(current)
}

pub fn update_section(
    conn: &Connection,
    section: SetupSection,
    patch: &Map<String, Value>,
) -> anyhow::Result<Result<Value, String>> {
    let mut current = load_section(conn, section)?;
    if let Err(msg) = merge_section_patch(section, &mut current, patch) {
        return Ok(Err(msg));
    }
    db::settings_set_json(conn, section.key(), &current)?;
    Ok(Ok(current))
}

pub fn learning_settings(conn: &Connection) -> anyhow::Result<LearningSettings> {
    let v = load_section(conn, SetupSection::Learning)?;
    let defaults = LearningSettings::default();
    Ok(LearningSettings {
        max_attempts: v
            .get("maxAttempts")
            .and_then(Value::as_i64)
            .unwrap_or(defaults.max_attempts),
        video_completion_threshold: v
            .get("videoCompletionThreshold")
            .and_then(Value::as_i64)
            .unwrap_or(defaults.video_completion_threshold),
        certificate_prefix: v
            .get("certificatePrefix")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or(defaults.certificate_prefix),
        notify_on_review: v
            .get("notifyOnReview")
            .and_then(Value::as_bool)
            .unwrap_or(defaults.notify_on_review),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_validates_ranges_and_unknown_fields() {
        let mut current = default_section(SetupSection::Learning);
        let bad = json!({ "maxAttempts": 0 });
        assert!(merge_section_patch(
            SetupSection::Learning,
            &mut current,
            bad.as_object().expect("object")
        )
        .is_err());

        let unknown = json!({ "colour": "blue" });
        assert_eq!(
            merge_section_patch(
                SetupSection::Learning,
                &mut current,
                unknown.as_object().expect("object")
            ),
            Err("unknown learning field: colour".to_string())
        );

        let good = json!({ "maxAttempts": 5, "certificatePrefix": "acad" });
        merge_section_patch(
            SetupSection::Learning,
            &mut current,
            good.as_object().expect("object"),
        )
        .expect("merge");
        assert_eq!(current["maxAttempts"], 5);
        assert_eq!(current["certificatePrefix"], "ACAD");
    }

    #[test]
    fn defaults_match_typed_settings() {
        let v = default_section(SetupSection::Learning);
        let d = LearningSettings::default();
        assert_eq!(v["maxAttempts"].as_i64(), Some(d.max_attempts));
        assert_eq!(
            v["videoCompletionThreshold"].as_i64(),
            Some(d.video_completion_threshold)
        );
        assert_eq!(v["certificatePrefix"].as_str(), Some(d.certificate_prefix.as_str()));
    }
}
