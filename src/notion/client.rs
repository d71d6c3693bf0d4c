// src/notion/client.rs

//! Blocking HTTP client for the Notion API
//!
//! Owns bearer auth, rate-limit backoff, and bounded retry for transient
//! statuses. Remote errors surface as typed `Error::Api { status, code,
//! message }`; the two shape mismatches the engine branches on (page is
//! actually a database / a block) are normalized into their dedicated
//! variants here so nothing above the client string-matches.

use crate::error::{Error, Result};
use crate::notion::{Block, BlockChildren, Database, NotionApi, Page, User};
use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

const BASE_URL: &str = "https://api.notion.com/v1";
const NOTION_VERSION: &str = "2022-06-28";

/// Default timeout for HTTP requests (30 seconds)
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum retry attempts for transient failures
const MAX_RETRIES: u32 = 3;

/// Base retry delay, doubled per attempt
const RETRY_DELAY_MS: u64 = 1000;

/// Page size used for every paginated endpoint
const PAGE_SIZE: u32 = 100;

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct PaginatedPages {
    #[serde(default)]
    results: Vec<Page>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    next_cursor: Option<String>,
}

pub struct NotionClient {
    http: Client,
    token: String,
}

impl NotionClient {
    pub fn new(token: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(Error::Http)?;
        Ok(NotionClient {
            http,
            token: token.to_string(),
        })
    }

    /// Issue a request with bounded retry on transient statuses. Rate
    /// limits honor `Retry-After`; everything else backs off exponentially.
    fn request(&self, method: reqwest::Method, path: &str, body: Option<Value>) -> Result<Value> {
        let url = format!("{BASE_URL}{path}");
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let mut req = self
                .http
                .request(method.clone(), &url)
                .bearer_auth(&self.token)
                .header("Notion-Version", NOTION_VERSION);
            if let Some(body) = &body {
                req = req.json(body);
            }

            let response = match req.send() {
                Ok(r) => r,
                Err(e) if attempt < MAX_RETRIES && (e.is_timeout() || e.is_connect()) => {
                    warn!(%url, attempt, error = %e, "request failed, retrying");
                    std::thread::sleep(backoff(attempt));
                    continue;
                }
                Err(e) => return Err(Error::Http(e)),
            };

            let status = response.status();
            if status.is_success() {
                return Ok(response.json()?);
            }

            if is_retryable(status) && attempt < MAX_RETRIES {
                let delay = retry_after(&response).unwrap_or_else(|| backoff(attempt));
                warn!(%url, status = status.as_u16(), attempt, "transient status, retrying");
                std::thread::sleep(delay);
                continue;
            }

            let body: ApiErrorBody = response.json().unwrap_or(ApiErrorBody {
                code: String::new(),
                message: String::new(),
            });
            debug!(%url, status = status.as_u16(), code = %body.code, "api error");
            return Err(Error::Api {
                status: status.as_u16(),
                code: body.code,
                message: body.message,
            });
        }
    }

    fn get(&self, path: &str) -> Result<Value> {
        self.request(reqwest::Method::GET, path, None)
    }

    fn post(&self, path: &str, body: Value) -> Result<Value> {
        self.request(reqwest::Method::POST, path, Some(body))
    }
}

impl NotionApi for NotionClient {
    fn get_page(&self, id: &str) -> Result<Page> {
        match self.get(&format!("/pages/{id}")) {
            Ok(value) => Ok(serde_json::from_value(value)?),
            Err(e) => Err(classify_shape_mismatch(e, id)),
        }
    }

    fn get_database(&self, id: &str) -> Result<Database> {
        let value = self.get(&format!("/databases/{id}"))?;
        Ok(serde_json::from_value(value)?)
    }

    fn query_database(&self, id: &str) -> Result<Vec<Page>> {
        let mut rows = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut body = json!({ "page_size": PAGE_SIZE });
            if let Some(cursor) = &cursor {
                body["start_cursor"] = json!(cursor);
            }
            let value = self.post(&format!("/databases/{id}/query"), body)?;
            let page: PaginatedPages = serde_json::from_value(value)?;
            rows.extend(page.results);
            if !page.has_more {
                return Ok(rows);
            }
            cursor = page.next_cursor;
        }
    }

    fn get_block(&self, id: &str) -> Result<Block> {
        let value = self.get(&format!("/blocks/{id}"))?;
        Ok(serde_json::from_value(value)?)
    }

    fn get_block_children(&self, id: &str, cursor: Option<&str>) -> Result<BlockChildren> {
        let mut path = format!("/blocks/{id}/children?page_size={PAGE_SIZE}");
        if let Some(cursor) = cursor {
            path.push_str(&format!("&start_cursor={cursor}"));
        }
        let value = self.get(&path)?;
        Ok(serde_json::from_value(value)?)
    }

    fn get_user(&self, id: &str) -> Result<User> {
        let value = self.get(&format!("/users/{id}"))?;
        Ok(serde_json::from_value(value)?)
    }

    fn search_all_pages_with_stop(
        &self,
        should_stop: &mut dyn FnMut(&Page) -> bool,
    ) -> Result<Vec<Page>> {
        let mut pages = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut body = json!({
                "filter": { "property": "object", "value": "page" },
                "sort": { "direction": "descending", "timestamp": "last_edited_time" },
                "page_size": PAGE_SIZE,
            });
            if let Some(cursor) = &cursor {
                body["start_cursor"] = json!(cursor);
            }
            let value = self.post("/search", body)?;
            let batch: PaginatedPages = serde_json::from_value(value)?;
            for page in batch.results {
                if should_stop(&page) {
                    return Ok(pages);
                }
                pages.push(page);
            }
            if !batch.has_more {
                return Ok(pages);
            }
            cursor = batch.next_cursor;
        }
    }
}

/// Map the remote's "wrong kind" validation errors onto their typed
/// variants. The discrimination is by message substring; the API has no
/// machine-readable signal for it.
fn classify_shape_mismatch(err: Error, id: &str) -> Error {
    if let Error::Api {
        status: 400,
        code,
        message,
    } = &err
        && code == "validation_error"
    {
        if message.contains("is a database") {
            return Error::DatabaseIsNotPage(id.to_string());
        }
        if message.contains("is a block") {
            return Error::ObjectIsBlock(id.to_string());
        }
    }
    err
}

fn is_retryable(status: StatusCode) -> bool {
    matches!(status.as_u16(), 409 | 429 | 500 | 502 | 503)
}

fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(RETRY_DELAY_MS * 2u64.saturating_pow(attempt - 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_database_mismatch() {
        let err = Error::Api {
            status: 400,
            code: "validation_error".to_string(),
            message: "abc is a database, not a page.".to_string(),
        };
        match classify_shape_mismatch(err, "abc") {
            Error::DatabaseIsNotPage(id) => assert_eq!(id, "abc"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_classify_block_mismatch() {
        let err = Error::Api {
            status: 400,
            code: "validation_error".to_string(),
            message: "abc is a block, not a page.".to_string(),
        };
        assert!(matches!(
            classify_shape_mismatch(err, "abc"),
            Error::ObjectIsBlock(_)
        ));
    }

    #[test]
    fn test_classify_leaves_other_errors() {
        let err = Error::Api {
            status: 404,
            code: "object_not_found".to_string(),
            message: "gone".to_string(),
        };
        assert!(matches!(
            classify_shape_mismatch(err, "abc"),
            Error::Api { status: 404, .. }
        ));
    }

    #[test]
    fn test_backoff_doubles() {
        assert_eq!(backoff(1), Duration::from_millis(1000));
        assert_eq!(backoff(2), Duration::from_millis(2000));
        assert_eq!(backoff(3), Duration::from_millis(4000));
    }
}
