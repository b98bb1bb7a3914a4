//! Application configuration
//!
//! Layered: an optional `paperdb.toml` file, `PAPER_DB_*` environment
//! overrides, and CLI flags on top (CLI > env > file). Only serve/export
//! concerns live here; everything else is per-command CLI arguments.

use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Base URL used in dev mode when none is configured; SPA dev servers proxy
/// this prefix to the static tree.
pub const DEV_STATIC_BASE_URL: &str = "/static";

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub static_base_url: Option<String>,
    pub static_mode: StaticMode,
    pub static_export_dir: Option<String>,
    pub allowed_origins: Vec<String>,
}

impl AppConfig {
    /// Load configuration from disk and environment.
    pub fn load() -> Result<Self> {
        let config_path = env::var("PAPER_DB_CONFIG").unwrap_or_else(|_| "paperdb.toml".to_string());

        let mut builder = config::Config::builder();
        if Path::new(&config_path).exists() {
            builder = builder.add_source(config::File::from(PathBuf::from(&config_path)));
        }
        let settings = builder.build()?;
        let mut config: Self = settings.try_deserialize()?;

        if let Ok(url) = env::var("PAPER_DB_STATIC_BASE_URL") {
            if !url.trim().is_empty() {
                config.static_base_url = Some(url.trim().to_string());
            }
        }
        if let Ok(mode) = env::var("PAPER_DB_STATIC_MODE") {
            config.static_mode = mode.parse().context("invalid PAPER_DB_STATIC_MODE")?;
        }
        if let Ok(dir) = env::var("PAPER_DB_STATIC_EXPORT_DIR") {
            if !dir.trim().is_empty() {
                config.static_export_dir = Some(dir.trim().to_string());
            }
        }
        if let Ok(origins) = env::var("PAPER_DB_ALLOWED_ORIGINS") {
            let parsed: Vec<String> = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_string)
                .collect();
            if !parsed.is_empty() {
                config.allowed_origins = parsed;
            }
        }
        Ok(config)
    }

    /// Apply CLI-level overrides (highest precedence).
    pub fn apply_cli(
        &mut self,
        static_base_url: Option<String>,
        static_mode: Option<StaticMode>,
        static_export_dir: Option<PathBuf>,
        allowed_origins: Vec<String>,
    ) {
        if let Some(url) = static_base_url {
            self.static_base_url = Some(url);
        }
        if let Some(mode) = static_mode {
            self.static_mode = mode;
        }
        if let Some(dir) = static_export_dir {
            self.static_export_dir = Some(dir.display().to_string());
        }
        if !allowed_origins.is_empty() {
            self.allowed_origins = allowed_origins;
        }
    }

    /// The base URL for asset links. Dev mode tolerates a missing value and
    /// falls back to a relative prefix; prod refuses to run without one.
    pub fn resolved_static_base_url(&self) -> Result<String> {
        match (&self.static_base_url, self.static_mode) {
            (Some(url), _) => Ok(url.trim_end_matches('/').to_string()),
            (None, StaticMode::Dev) => Ok(DEV_STATIC_BASE_URL.to_string()),
            (None, StaticMode::Prod) => {
                bail!("static_base_url is required in prod static mode")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StaticMode {
    #[default]
    Dev,
    Prod,
}

impl FromStr for StaticMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dev" => Ok(StaticMode::Dev),
            "prod" => Ok(StaticMode::Prod),
            other => anyhow::bail!("unsupported static mode: {}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dev_mode_falls_back() {
        let config = AppConfig::default();
        assert_eq!(config.resolved_static_base_url().unwrap(), "/static");
    }

    #[test]
    fn test_prod_requires_base_url() {
        let config = AppConfig {
            static_mode: StaticMode::Prod,
            ..Default::default()
        };
        assert!(config.resolved_static_base_url().is_err());
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let config = AppConfig {
            static_base_url: Some("https://cdn.example.com/papers/".to_string()),
            ..Default::default()
        };
        assert_eq!(
            config.resolved_static_base_url().unwrap(),
            "https://cdn.example.com/papers"
        );
    }
}
