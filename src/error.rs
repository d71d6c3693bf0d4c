// src/error.rs

//! Crate-wide error type for the sync engine
//!
//! The queue processor decides retry-vs-drop by error kind, never by
//! unwinding: [`Error::is_transient`] keeps an id queued for another pass,
//! [`Error::is_permanent_remote`] drops it.

use thiserror::Error;

/// Result alias used throughout the library modules
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Typed Notion API error with the remote status, machine code, and message
    #[error("notion api error (status {status}, code {code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    /// The object queried as a page turned out to be a database
    #[error("object {0} is a database, not a page")]
    DatabaseIsNotPage(String),

    /// The object queried as a page/database turned out to be a block
    #[error("object {0} is a block, not a page")]
    ObjectIsBlock(String),

    /// A local file or record that was expected to exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Ancestry traversal revisited an id
    #[error("cycle detected in parent chain at {0}")]
    Cycle(String),

    /// Block→object ancestor resolution exceeded its depth bound
    #[error("parent resolution exceeded {0} hops")]
    ResolutionDepthExceeded(usize),

    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration, fails fast at startup
    #[error("config error: {0}")]
    Config(String),

    /// Malformed root manifest row
    #[error("manifest error: {0}")]
    Manifest(String),

    /// Queue entry could not be stored or parsed
    #[error("queue error: {0}")]
    Queue(String),

    /// Asset download failure (logged, page is still written)
    #[error("download error: {0}")]
    Download(String),
}

impl Error {
    /// True when retrying the same operation later may succeed.
    ///
    /// Matches the remote statuses the client already retries internally;
    /// if one still surfaces here the queue keeps the id for the next pass.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Api { status, code, .. } => {
                matches!(*status, 409 | 429 | 500 | 502 | 503) || code == "rate_limited"
            }
            Error::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// True when the remote has rejected the object for good: bad token,
    /// not shared with the integration, deleted, or the wrong kind.
    pub fn is_permanent_remote(&self) -> bool {
        match self {
            Error::Api { status, code, .. } => {
                matches!(*status, 401 | 403 | 404)
                    || (*status == 400 && code == "validation_error")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(status: u16, code: &str) -> Error {
        Error::Api {
            status,
            code: code.to_string(),
            message: String::new(),
        }
    }

    #[test]
    fn test_transient_statuses() {
        for status in [409, 429, 500, 502, 503] {
            assert!(api(status, "x").is_transient(), "status {status}");
        }
        assert!(!api(404, "object_not_found").is_transient());
        assert!(!api(400, "validation_error").is_transient());
    }

    #[test]
    fn test_permanent_statuses() {
        for status in [401, 403, 404] {
            assert!(api(status, "x").is_permanent_remote(), "status {status}");
        }
        assert!(api(400, "validation_error").is_permanent_remote());
        assert!(!api(400, "bad_json").is_permanent_remote());
        assert!(!api(503, "service_unavailable").is_permanent_remote());
    }

    #[test]
    fn test_cycle_is_neither() {
        let e = Error::Cycle("abc".to_string());
        assert!(!e.is_transient());
        assert!(!e.is_permanent_remote());
    }
}
