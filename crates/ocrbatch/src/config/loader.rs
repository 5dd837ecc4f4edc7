use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::config::schema::{SearchSettings, Settings, DEFAULT_SEARCH_INDEX, MAX_STUCK_MINUTES};
use crate::db::default_database_path;
use crate::error::ConfigError;

pub const DB_PATH: &str = "OCRBATCH_DB_PATH";
pub const ROOT: &str = "OCRBATCH_ROOT";
pub const OUTPUT_DIR: &str = "OCRBATCH_OUTPUT_DIR";
pub const OCR_LANG: &str = "OCR_LANG";
pub const OCR_SOFT_TIMEOUT: &str = "OCR_SOFT_TIMEOUT";
pub const OCR_HARD_TIMEOUT: &str = "OCR_HARD_TIMEOUT";
pub const OCR_EXTRACT_TIMEOUT: &str = "OCR_EXTRACT_TIMEOUT";
pub const STUCK_MINUTES: &str = "OCRBATCH_STUCK_MINUTES";
pub const WORKERS: &str = "OCRBATCH_WORKERS";
pub const QUEUE_CAPACITY: &str = "OCRBATCH_QUEUE_CAPACITY";
pub const TASK_MAX_RETRIES: &str = "TASK_MAX_RETRIES";
pub const TASK_RETRY_DELAY: &str = "TASK_RETRY_DELAY";
pub const OPENSEARCH_URL: &str = "OPENSEARCH_URL";
pub const OPENSEARCH_INDEX: &str = "OPENSEARCH_INDEX";

/// Loads settings from the process environment.
pub fn load_settings() -> Result<Settings, ConfigError> {
    load_settings_from(|key| std::env::var(key).ok())
}

/// Loads settings from an arbitrary key lookup. Blank values count as unset.
pub fn load_settings_from<F>(lookup: F) -> Result<Settings, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| {
        lookup(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    let database_path = match get(DB_PATH) {
        Some(p) => PathBuf::from(p),
        None => default_database_path().ok_or(ConfigError::NoDefaultDatabasePath)?,
    };

    let mut settings = Settings::with_database(database_path);
    settings.root = get(ROOT).map(PathBuf::from);
    settings.output_dir_name = get(OUTPUT_DIR);

    if let Some(lang) = get(OCR_LANG) {
        settings.ocr.language = lang;
    }
    if let Some(v) = get(OCR_SOFT_TIMEOUT) {
        settings.ocr.soft_timeout = Duration::from_secs(parse(OCR_SOFT_TIMEOUT, &v)?);
    }
    if let Some(v) = get(OCR_HARD_TIMEOUT) {
        settings.ocr.hard_timeout = Duration::from_secs(parse(OCR_HARD_TIMEOUT, &v)?);
    }
    if let Some(v) = get(OCR_EXTRACT_TIMEOUT) {
        settings.ocr.extract_timeout = Duration::from_secs(parse(OCR_EXTRACT_TIMEOUT, &v)?);
    }
    if let Some(v) = get(STUCK_MINUTES) {
        settings.stuck_minutes = parse(STUCK_MINUTES, &v)?;
    }
    if let Some(v) = get(WORKERS) {
        settings.workers = parse(WORKERS, &v)?;
        settings.queue_capacity = settings.workers.saturating_mul(2);
    }
    if let Some(v) = get(QUEUE_CAPACITY) {
        settings.queue_capacity = parse(QUEUE_CAPACITY, &v)?;
    }
    if let Some(v) = get(TASK_MAX_RETRIES) {
        settings.retry.max_retries = parse(TASK_MAX_RETRIES, &v)?;
    }
    if let Some(v) = get(TASK_RETRY_DELAY) {
        settings.retry.base_delay = Duration::from_secs(parse(TASK_RETRY_DELAY, &v)?);
    }
    settings.search = get(OPENSEARCH_URL).map(|url| SearchSettings {
        url: url.trim_end_matches('/').to_string(),
        index: get(OPENSEARCH_INDEX).unwrap_or_else(|| DEFAULT_SEARCH_INDEX.to_string()),
    });

    validate_settings(&settings)?;
    Ok(settings)
}

fn parse<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

/// Checks cross-field constraints. Called by the loaders and again by the
/// CLI after flag overrides are applied.
pub fn validate_settings(settings: &Settings) -> Result<(), ConfigError> {
    let ocr = &settings.ocr;
    if ocr.soft_timeout.is_zero() {
        return Err(ConfigError::Validation {
            message: format!("{} must be greater than zero", OCR_SOFT_TIMEOUT),
        });
    }
    if ocr.hard_timeout < ocr.soft_timeout {
        return Err(ConfigError::Validation {
            message: format!(
                "{} ({}s) must not be shorter than {} ({}s)",
                OCR_HARD_TIMEOUT,
                ocr.hard_timeout.as_secs(),
                OCR_SOFT_TIMEOUT,
                ocr.soft_timeout.as_secs()
            ),
        });
    }
    if ocr.extract_timeout.is_zero() {
        return Err(ConfigError::Validation {
            message: format!("{} must be greater than zero", OCR_EXTRACT_TIMEOUT),
        });
    }
    if ocr.language.is_empty()
        || !ocr
            .language
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '+')
    {
        return Err(ConfigError::InvalidValue {
            key: OCR_LANG,
            value: ocr.language.clone(),
            reason: "expected language codes such as 'spa' or 'spa+eng'".to_string(),
        });
    }
    if settings.stuck_minutes == 0 || settings.stuck_minutes > MAX_STUCK_MINUTES {
        return Err(ConfigError::InvalidValue {
            key: STUCK_MINUTES,
            value: settings.stuck_minutes.to_string(),
            reason: format!("must be between 1 and {}", MAX_STUCK_MINUTES),
        });
    }
    if settings.workers == 0 {
        return Err(ConfigError::Validation {
            message: format!("{} must be at least 1", WORKERS),
        });
    }
    if settings.queue_capacity == 0 {
        return Err(ConfigError::Validation {
            message: format!("{} must be at least 1", QUEUE_CAPACITY),
        });
    }
    if let Some(name) = &settings.output_dir_name {
        if name.contains('/') || name.contains('\\') || name == "." || name == ".." {
            return Err(ConfigError::InvalidValue {
                key: OUTPUT_DIR,
                value: name.clone(),
                reason: "must be a single directory name".to_string(),
            });
        }
    }
    if let Some(search) = &settings.search {
        if !(search.url.starts_with("http://") || search.url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                key: OPENSEARCH_URL,
                value: search.url.clone(),
                reason: "must start with http:// or https://".to_string(),
            });
        }
    }
    Ok(())
}
