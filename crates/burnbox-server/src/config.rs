use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;

use crate::auth::StaticTokens;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_RETENTION_DAYS: u64 = 7;
const SECS_PER_DAY: u64 = 86_400;

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: Option<PathBuf>,
    pub cors_origins: Option<String>,
    /// Inline `owner:token` pairs ($BURNBOX_TOKENS).
    pub tokens: Option<String>,
    /// File with one `owner:token` pair per line ($BURNBOX_TOKENS_FILE).
    pub tokens_file: Option<PathBuf>,
    /// Days an expired row is kept before the sweep deletes it. `0` disables the sweep.
    pub retention_days: u64,
    pub sweep_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("BURNBOX_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: std::env::var("BURNBOX_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_PORT),
            data_dir: std::env::var("BURNBOX_DATA_DIR").ok().map(PathBuf::from),
            cors_origins: std::env::var("BURNBOX_CORS_ORIGINS").ok(),
            tokens: std::env::var("BURNBOX_TOKENS").ok(),
            tokens_file: std::env::var("BURNBOX_TOKENS_FILE").ok().map(PathBuf::from),
            retention_days: std::env::var("BURNBOX_RETENTION_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_RETENTION_DAYS),
            sweep_interval: Duration::from_secs(300),
        }
    }
}

impl ServerConfig {
    /// Retention window in seconds. Fails when the day count does not fit.
    pub fn retention_secs(&self) -> Result<i64> {
        self.retention_days
            .checked_mul(SECS_PER_DAY)
            .and_then(|secs| i64::try_from(secs).ok())
            .with_context(|| {
                format!(
                    "BURNBOX_RETENTION_DAYS={} is too large",
                    self.retention_days
                )
            })
    }

    /// Build the token table. The file wins when both sources are set.
    pub fn load_tokens(&self) -> Result<StaticTokens> {
        let tokens = match (&self.tokens_file, &self.tokens) {
            (Some(path), inline) => {
                if inline.is_some() {
                    tracing::warn!("both BURNBOX_TOKENS and BURNBOX_TOKENS_FILE are set; using file");
                }
                StaticTokens::from_file(path)?
            }
            (None, Some(inline)) => StaticTokens::parse(inline).context("parse BURNBOX_TOKENS")?,
            (None, None) => StaticTokens::default(),
        };
        if tokens.is_empty() {
            tracing::warn!("no owner tokens configured; only anonymous reads will succeed");
        }
        Ok(tokens)
    }
}

/// Resolve (and create) the directory holding `burnbox.db`.
///
/// Priority:
/// 1. explicit `data_dir` from config
/// 2. Platform-specific app data dir (`~/.local/share/burnbox/`, etc.)
pub fn resolve_data_dir(data_dir: Option<&Path>) -> Result<PathBuf> {
    let path = match data_dir {
        Some(d) => d.to_path_buf(),
        None => ProjectDirs::from("", "", "burnbox")
            .context("could not determine platform data directory")?
            .data_dir()
            .to_owned(),
    };
    std::fs::create_dir_all(&path)
        .with_context(|| format!("create data dir: {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::IdentityProvider;

    fn config() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            data_dir: None,
            cors_origins: None,
            tokens: None,
            tokens_file: None,
            retention_days: 2,
            sweep_interval: Duration::from_secs(1),
        }
    }

    #[test]
    fn tokens_file_takes_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens");
        std::fs::write(&path, "alice:from-file\n").unwrap();

        let cfg = ServerConfig {
            tokens: Some("bob:inline".into()),
            tokens_file: Some(path),
            ..config()
        };
        let tokens = cfg.load_tokens().unwrap();
        assert!(tokens.resolve("from-file").is_some());
        assert!(tokens.resolve("inline").is_none());
    }

    #[test]
    fn inline_tokens_used_without_file() {
        let cfg = ServerConfig {
            tokens: Some("bob:inline".into()),
            ..config()
        };
        assert_eq!(cfg.load_tokens().unwrap().len(), 1);
        assert!(config().load_tokens().unwrap().is_empty());
    }

    #[test]
    fn retention_in_seconds() {
        assert_eq!(config().retention_secs().unwrap(), 2 * 86400);
    }

    #[test]
    fn oversized_retention_is_rejected() {
        for days in [106_751_991_167_301, u64::MAX / SECS_PER_DAY + 1, u64::MAX] {
            let cfg = ServerConfig {
                retention_days: days,
                ..config()
            };
            assert!(cfg.retention_secs().is_err(), "{days} days accepted");
        }

        // Largest day count whose seconds still fit in an i64.
        let cfg = ServerConfig {
            retention_days: i64::MAX as u64 / SECS_PER_DAY,
            ..config()
        };
        assert!(cfg.retention_secs().unwrap() > 0);
    }

    #[test]
    fn explicit_data_dir_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let resolved = resolve_data_dir(Some(&nested)).unwrap();
        assert_eq!(resolved, nested);
        assert!(nested.is_dir());
    }
}
