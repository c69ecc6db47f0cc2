use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub event_log_path: PathBuf,
    pub quiz_catalog_path: Option<PathBuf>,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let event_log_path = non_empty("EVENT_LOG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("events.json"));
        let quiz_catalog_path = non_empty("QUIZ_CATALOG_PATH").map(PathBuf::from);
        let log_format = match non_empty("LOG_FORMAT").as_deref() {
            Some("pretty") => LogFormat::Pretty,
            _ => LogFormat::Json,
        };

        Self {
            event_log_path,
            quiz_catalog_path,
            log_format,
        }
    }
}
