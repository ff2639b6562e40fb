use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use tagcheck_core::{CrawlBounds, EcidScope, ValidatorSettings};
use thiserror::Error;

/// URL patterns the capture proxy records by default.
pub const DEFAULT_CAPTURE_PATTERNS: &[&str] = &[
    r"https://.*\.adobedc\.net/.*",
    r"https://.*\.omtrdc\.net/.*",
    r"https://www\.adobe\.com/experienceedge/",
    r"marketingtech.*launch-",
];

const DEFAULT_ALLOWED_ORIGINS: &str = "http://localhost:3000,http://localhost:5173";

#[derive(Debug, Error)]
pub enum ConfigError {
    /// Neither a crawl command nor a replay dataset was configured
    #[error("set CRAWLER_COMMAND or DATASET_PATH to choose a crawl subsystem")]
    NoCrawler,
}

/// Where runs get their captured traffic from.
#[derive(Debug, Clone, PartialEq)]
pub enum CrawlerSource {
    /// External crawl command, invoked once per run
    Command(String),
    /// Pre-captured dataset replayed for every run
    Replay(PathBuf),
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub crawler_command: Option<String>,
    pub dataset_path: Option<PathBuf>,
    pub validator_settings: ValidatorSettings,
    pub default_bounds: CrawlBounds,
    pub allowed_origins: Vec<String>,
    pub capture_patterns: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let defaults = ValidatorSettings::default();
        let bounds = CrawlBounds::default();

        Ok(Self {
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            crawler_command: non_empty("CRAWLER_COMMAND"),
            dataset_path: non_empty("DATASET_PATH").map(PathBuf::from),
            validator_settings: ValidatorSettings {
                duplicate_window_secs: parsed(
                    "DUPLICATE_WINDOW_SECS",
                    defaults.duplicate_window_secs,
                )
                .context("DUPLICATE_WINDOW_SECS must be a number of seconds")?,
                payload_limit_kb: parsed("PAYLOAD_LIMIT_KB", defaults.payload_limit_kb)
                    .context("PAYLOAD_LIMIT_KB must be a number")?,
                ecid_scope: match non_empty("ECID_SCOPE") {
                    Some(raw) => EcidScope::from_str(&raw).context("ECID_SCOPE is invalid")?,
                    None => defaults.ecid_scope,
                },
            },
            default_bounds: CrawlBounds {
                max_pages: parsed("DEFAULT_MAX_PAGES", bounds.max_pages)
                    .context("DEFAULT_MAX_PAGES must be a positive integer")?,
                max_depth: parsed("DEFAULT_MAX_DEPTH", bounds.max_depth)
                    .context("DEFAULT_MAX_DEPTH must be an integer")?,
                settle_delay_secs: parsed("DEFAULT_SETTLE_DELAY_SECS", bounds.settle_delay_secs)
                    .context("DEFAULT_SETTLE_DELAY_SECS must be a number of seconds")?,
            },
            allowed_origins: split_list(
                &env::var("ALLOWED_ORIGINS")
                    .unwrap_or_else(|_| DEFAULT_ALLOWED_ORIGINS.to_string()),
            ),
            capture_patterns: match non_empty("CAPTURE_PATTERNS") {
                Some(raw) => split_list(&raw),
                None => DEFAULT_CAPTURE_PATTERNS.iter().map(|p| p.to_string()).collect(),
            },
        })
    }

    /// Pick the crawl subsystem. A command wins over a replay dataset.
    pub fn crawler_source(&self) -> Result<CrawlerSource, ConfigError> {
        match (&self.crawler_command, &self.dataset_path) {
            (Some(command), _) => Ok(CrawlerSource::Command(command.clone())),
            (None, Some(path)) => Ok(CrawlerSource::Replay(path.clone())),
            (None, None) => Err(ConfigError::NoCrawler),
        }
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match non_empty(key) {
        Some(raw) => Ok(raw.trim().parse()?),
        None => Ok(default),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            port: 8080,
            crawler_command: None,
            dataset_path: None,
            validator_settings: ValidatorSettings::default(),
            default_bounds: CrawlBounds::default(),
            allowed_origins: vec![],
            capture_patterns: vec![],
        }
    }

    #[test]
    fn command_wins_over_replay() {
        let mut config = config();
        config.crawler_command = Some("crawl".into());
        config.dataset_path = Some(PathBuf::from("capture.json"));
        assert_eq!(
            config.crawler_source().unwrap(),
            CrawlerSource::Command("crawl".into())
        );

        config.crawler_command = None;
        assert_eq!(
            config.crawler_source().unwrap(),
            CrawlerSource::Replay(PathBuf::from("capture.json"))
        );
    }

    #[test]
    fn no_crawler_is_an_error() {
        assert!(matches!(
            config().crawler_source(),
            Err(ConfigError::NoCrawler)
        ));
    }

    #[test]
    fn lists_are_trimmed() {
        assert_eq!(
            split_list(" http://a , ,http://b"),
            vec!["http://a".to_string(), "http://b".to_string()]
        );
    }

    #[test]
    fn default_patterns_cover_tracking_endpoints() {
        assert_eq!(DEFAULT_CAPTURE_PATTERNS.len(), 4);
        assert!(DEFAULT_CAPTURE_PATTERNS.iter().any(|p| p.contains("omtrdc")));
    }
}
