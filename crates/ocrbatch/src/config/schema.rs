use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Runtime settings, built once and handed to each component.
#[derive(Debug, Clone, Serialize)]
pub struct Settings {
    pub database_path: PathBuf,
    pub root: Option<PathBuf>,
    /// Name of the output directory created next to the root. `None`
    /// means `<root name>_ocr`.
    pub output_dir_name: Option<String>,
    pub ocr: OcrSettings,
    pub stuck_minutes: u64,
    pub workers: usize,
    pub queue_capacity: usize,
    pub retry: RetrySettings,
    pub search: Option<SearchSettings>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OcrSettings {
    pub language: String,
    /// Limit on the OCR subprocess.
    pub soft_timeout: Duration,
    /// Limit on the whole attempt, OCR and extraction included.
    pub hard_timeout: Duration,
    pub extract_timeout: Duration,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            language: DEFAULT_LANGUAGE.to_string(),
            soft_timeout: Duration::from_secs(DEFAULT_SOFT_TIMEOUT_SECS),
            hard_timeout: Duration::from_secs(DEFAULT_HARD_TIMEOUT_SECS),
            extract_timeout: Duration::from_secs(DEFAULT_EXTRACT_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchSettings {
    pub url: String,
    pub index: String,
}

pub const DEFAULT_LANGUAGE: &str = "spa";
pub const DEFAULT_SOFT_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_HARD_TIMEOUT_SECS: u64 = 900;
pub const DEFAULT_EXTRACT_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_STUCK_MINUTES: u64 = 30;
/// One year.
pub const MAX_STUCK_MINUTES: u64 = 525_600;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 60;
pub const DEFAULT_SEARCH_INDEX: &str = "ocr_documents";

impl Settings {
    /// Settings with every default applied and the given catalog path.
    pub fn with_database(database_path: PathBuf) -> Self {
        let workers = num_cpus::get().max(1);
        Self {
            database_path,
            root: None,
            output_dir_name: None,
            ocr: OcrSettings::default(),
            stuck_minutes: DEFAULT_STUCK_MINUTES,
            workers,
            queue_capacity: workers * 2,
            retry: RetrySettings::default(),
            search: None,
        }
    }

    /// Output directory name for `root`: the configured name, or the
    /// root's own name with an `_ocr` suffix.
    pub fn output_dir_name_for(&self, root: &Path) -> String {
        match &self.output_dir_name {
            Some(name) => name.clone(),
            None => {
                let base = root
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("documents");
                format!("{}_ocr", base)
            }
        }
    }

    pub fn stuck_threshold(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.stuck_minutes.min(MAX_STUCK_MINUTES) as i64)
    }
}
