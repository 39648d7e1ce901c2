use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_API_URL: &str = "http://localhost:3000";

/// Runtime configuration, read from the environment (and `.env` if present).
#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub data_dir: PathBuf,
    pub log_level: String,
    pub http_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let api_url = std::env::var("TURBO_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());

        let data_dir = match std::env::var("TURBO_DATA_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => default_data_dir(),
        };

        let timeout_secs = std::env::var("TURBO_HTTP_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse::<u64>()
            .context("TURBO_HTTP_TIMEOUT_SECS must be a whole number of seconds")?;

        Ok(Config {
            api_url: normalize_base_url(&api_url),
            data_dir,
            log_level: std::env::var("TURBO_LOG").unwrap_or_else(|_| "info".to_string()),
            http_timeout: Duration::from_secs(timeout_secs),
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("turbo.db")
    }
}

fn default_data_dir() -> PathBuf {
    // XDG data directory, or the current directory as a fallback
    match directories::ProjectDirs::from("", "", "turbo") {
        Some(proj_dirs) => proj_dirs.data_dir().to_path_buf(),
        None => PathBuf::from("."),
    }
}

fn normalize_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_base_url_strips_trailing_slashes() {
        assert_eq!(normalize_base_url("https://api.example.com/"), "https://api.example.com");
        assert_eq!(normalize_base_url("https://api.example.com//"), "https://api.example.com");
        assert_eq!(normalize_base_url(" http://localhost:3000 "), "http://localhost:3000");
    }

    #[test]
    fn test_database_path_lives_in_data_dir() {
        let config = Config {
            api_url: DEFAULT_API_URL.to_string(),
            data_dir: PathBuf::from("/tmp/turbo-data"),
            log_level: "info".to_string(),
            http_timeout: Duration::from_secs(30),
        };
        assert_eq!(config.database_path(), PathBuf::from("/tmp/turbo-data/turbo.db"));
    }
}
