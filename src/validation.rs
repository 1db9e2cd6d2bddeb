use crate::errors::{AppError, AppResult};
use once_cell::sync::Lazy;
use regex::Regex;

pub const MAX_NAME_CHARS: usize = 200;
pub const MAX_RECURRENCE_DAYS: u32 = 366;

static LINK_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?i)https?://[^\s/$.?#][^\s]*$").expect("valid link regex"));

pub fn normalize_name(raw: &str) -> AppResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation("task name must not be empty".to_string()));
    }
    if trimmed.chars().count() > MAX_NAME_CHARS {
        return Err(AppError::Validation(format!(
            "task name exceeds {} characters",
            MAX_NAME_CHARS
        )));
    }
    Ok(trimmed.to_string())
}

/// Blank links clear the field.
pub fn normalize_link(raw: Option<&str>) -> AppResult<Option<String>> {
    let Some(raw) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(None);
    };
    if !LINK_PATTERN.is_match(raw) {
        return Err(AppError::Validation(format!("malformed link '{}'", raw)));
    }
    Ok(Some(raw.to_string()))
}

pub fn check_recurrence(days: Option<u32>) -> AppResult<Option<u32>> {
    match days {
        Some(0) => Err(AppError::Validation(
            "recurrence interval must be at least one day".to_string(),
        )),
        Some(days) if days > MAX_RECURRENCE_DAYS => Err(AppError::Validation(format!(
            "recurrence interval exceeds {} days",
            MAX_RECURRENCE_DAYS
        ))),
        other => Ok(other),
    }
}
