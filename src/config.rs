// src/config.rs

//! Environment-driven configuration
//!
//! A single frozen [`Config`] is built from the environment at startup and
//! passed by reference; there is no later reconfiguration. Invalid values
//! fail fast with a config error and a nonzero exit.

use crate::error::{Error, Result};
use bytesize::ByteSize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Name of the hidden state directory inside the working copy
pub const STATE_DIR: &str = ".notion-sync";

/// Default cap on downloaded asset size
const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Log output format selected by `NTN_LOG_FORMAT`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Notion integration token (`NOTION_TOKEN`); absent until a command
    /// actually needs the remote
    pub token: Option<String>,
    /// Working-copy path (`NTN_DIR`)
    pub dir: PathBuf,
    pub log_format: LogFormat,
    /// Block recursion cap, 0 = unlimited (`NTN_BLOCK_DEPTH`)
    pub block_depth: u32,
    /// Sleep between queue entries (`NTN_QUEUE_DELAY`)
    pub queue_delay: Duration,
    /// Asset size cap in bytes (`NTN_MAX_FILE_SIZE`)
    pub max_file_size: u64,
    /// Auto-commit after sync passes (`NTN_COMMIT`)
    pub commit: bool,
    /// Periodic commit interval; nonzero implies `commit` (`NTN_COMMIT_PERIOD`)
    pub commit_period: Duration,
    /// Push after commit; defaults to true iff a remote URL is set (`NTN_PUSH`)
    pub push: bool,
    pub git_url: Option<String>,
    pub git_pass: Option<String>,
    pub git_branch: String,
    pub git_user: String,
    pub git_email: String,
    pub webhook_port: u16,
    pub webhook_path: String,
    pub webhook_secret: Option<String>,
    /// Drain the queue automatically when a webhook arrives
    pub webhook_auto_sync: bool,
    /// Delay between webhook receipt and drain start
    pub webhook_sync_delay: Duration,
}

impl Config {
    /// Build the frozen configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        let token = env::var("NOTION_TOKEN").ok().filter(|t| !t.is_empty());
        let dir = PathBuf::from(env::var("NTN_DIR").unwrap_or_else(|_| ".".to_string()));

        let log_format = match env::var("NTN_LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        let block_depth = parse_u32("NTN_BLOCK_DEPTH", 0)?;
        let queue_delay = parse_duration("NTN_QUEUE_DELAY", Duration::ZERO)?;
        let max_file_size = parse_size("NTN_MAX_FILE_SIZE", DEFAULT_MAX_FILE_SIZE)?;
        let commit_period = parse_duration("NTN_COMMIT_PERIOD", Duration::ZERO)?;
        // A periodic commit interval only makes sense with committing on
        let commit = parse_bool("NTN_COMMIT", false)? || !commit_period.is_zero();

        let git_url = env::var("NTN_GIT_URL").ok().filter(|u| !u.is_empty());
        let push = match env::var("NTN_PUSH") {
            Ok(v) => parse_bool_value("NTN_PUSH", &v)?,
            Err(_) => git_url.is_some(),
        };

        let webhook_port = parse_u32("NTN_WEBHOOK_PORT", 8080)? as u16;

        Ok(Config {
            token,
            dir,
            log_format,
            block_depth,
            queue_delay,
            max_file_size,
            commit,
            commit_period,
            push,
            git_url,
            git_pass: env::var("NTN_GIT_PASS").ok().filter(|p| !p.is_empty()),
            git_branch: env::var("NTN_GIT_BRANCH").unwrap_or_else(|_| "main".to_string()),
            git_user: env::var("NTN_GIT_USER").unwrap_or_else(|_| "ntnsync".to_string()),
            git_email: env::var("NTN_GIT_EMAIL")
                .unwrap_or_else(|_| "ntnsync@localhost".to_string()),
            webhook_port,
            webhook_path: env::var("NTN_WEBHOOK_PATH").unwrap_or_else(|_| "/webhook".to_string()),
            webhook_secret: env::var("NTN_WEBHOOK_SECRET").ok().filter(|s| !s.is_empty()),
            webhook_auto_sync: parse_bool("NTN_WEBHOOK_AUTO_SYNC", true)?,
            webhook_sync_delay: parse_duration("NTN_WEBHOOK_SYNC_DELAY", Duration::ZERO)?,
        })
    }

    /// The Notion credential, required by commands that reach the remote.
    pub fn token(&self) -> Result<&str> {
        self.token
            .as_deref()
            .ok_or_else(|| Error::Config("NOTION_TOKEN is not set".to_string()))
    }

    /// `<dir>/.notion-sync`
    pub fn state_dir(&self) -> PathBuf {
        self.dir.join(STATE_DIR)
    }

    /// `<dir>/.notion-sync/ids`
    pub fn ids_dir(&self) -> PathBuf {
        self.state_dir().join("ids")
    }

    /// `<dir>/.notion-sync/queue`
    pub fn queue_dir(&self) -> PathBuf {
        self.state_dir().join("queue")
    }

    /// `<dir>/root.md`
    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join("root.md")
    }
}

impl Default for Config {
    /// Defaults mirroring an empty environment, used by tests.
    fn default() -> Self {
        Config {
            token: None,
            dir: PathBuf::from("."),
            log_format: LogFormat::Text,
            block_depth: 0,
            queue_delay: Duration::ZERO,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            commit: false,
            commit_period: Duration::ZERO,
            push: false,
            git_url: None,
            git_pass: None,
            git_branch: "main".to_string(),
            git_user: "ntnsync".to_string(),
            git_email: "ntnsync@localhost".to_string(),
            webhook_port: 8080,
            webhook_path: "/webhook".to_string(),
            webhook_secret: None,
            webhook_auto_sync: true,
            webhook_sync_delay: Duration::ZERO,
        }
    }
}

fn parse_u32(name: &str, default: u32) -> Result<u32> {
    match env::var(name) {
        Ok(v) => v
            .parse::<u32>()
            .map_err(|_| Error::Config(format!("{name}: invalid integer {v:?}"))),
        Err(_) => Ok(default),
    }
}

fn parse_bool(name: &str, default: bool) -> Result<bool> {
    match env::var(name) {
        Ok(v) => parse_bool_value(name, &v),
        Err(_) => Ok(default),
    }
}

fn parse_bool_value(name: &str, v: &str) -> Result<bool> {
    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(Error::Config(format!("{name}: invalid boolean {v:?}"))),
    }
}

fn parse_duration(name: &str, default: Duration) -> Result<Duration> {
    match env::var(name) {
        Ok(v) => humantime::parse_duration(&v)
            .map_err(|e| Error::Config(format!("{name}: invalid duration {v:?}: {e}"))),
        Err(_) => Ok(default),
    }
}

fn parse_size(name: &str, default: u64) -> Result<u64> {
    match env::var(name) {
        Ok(v) => v
            .parse::<ByteSize>()
            .map(|b| b.as_u64())
            .map_err(|e| Error::Config(format!("{name}: invalid size {v:?}: {e}"))),
        Err(_) => Ok(default),
    }
}

/// Parse a `--since`-style duration from the CLI (`30d`, `12h`, ...).
pub fn parse_since(value: &str) -> Result<Duration> {
    humantime::parse_duration(value)
        .map_err(|e| Error::Config(format!("invalid duration {value:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bool_values() {
        assert!(parse_bool_value("X", "1").unwrap());
        assert!(parse_bool_value("X", "TRUE").unwrap());
        assert!(!parse_bool_value("X", "0").unwrap());
        assert!(!parse_bool_value("X", "").unwrap());
        assert!(parse_bool_value("X", "maybe").is_err());
    }

    #[test]
    fn test_since_parsing() {
        assert_eq!(
            parse_since("30d").unwrap(),
            Duration::from_secs(30 * 24 * 3600)
        );
        assert_eq!(parse_since("90s").unwrap(), Duration::from_secs(90));
        assert!(parse_since("soon").is_err());
    }

    #[test]
    fn test_state_paths() {
        let config = Config {
            dir: PathBuf::from("/work"),
            ..Config::default()
        };
        assert_eq!(config.state_dir(), PathBuf::from("/work/.notion-sync"));
        assert_eq!(config.ids_dir(), PathBuf::from("/work/.notion-sync/ids"));
        assert_eq!(
            config.queue_dir(),
            PathBuf::from("/work/.notion-sync/queue")
        );
        assert_eq!(config.manifest_path(), PathBuf::from("/work/root.md"));
    }
}
