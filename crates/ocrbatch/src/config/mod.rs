pub mod loader;
pub mod schema;

pub use loader::{load_settings, load_settings_from, validate_settings};
pub use schema::{OcrSettings, RetrySettings, SearchSettings, Settings};
