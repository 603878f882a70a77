//! Archiving policy and request audit
//!
//! A URL may be archived when it contains one of the allow-listed patterns,
//! compared case-insensitively. Patterns come from an external policy source
//! (the `subprimers` collection in production, a static list in dev mode).

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

use crate::store::StoreError;

/// Source of the archiving allow-list
#[async_trait::async_trait]
pub trait UrlPolicy: Send + Sync {
    /// Whether `url` matches at least one allow-listed pattern
    async fn allows(&self, url: &str) -> Result<bool, StoreError>;
}

/// Match a URL against a set of patterns
pub fn matches_any<I, S>(url: &str, patterns: I) -> bool
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let url = url.to_lowercase();
    patterns.into_iter().any(|p| {
        let p = p.as_ref().trim();
        !p.is_empty() && url.contains(&p.to_lowercase())
    })
}

/// Static allow-list
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    patterns: Vec<String>,
}

impl AllowList {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

#[async_trait::async_trait]
impl UrlPolicy for AllowList {
    async fn allows(&self, url: &str) -> Result<bool, StoreError> {
        Ok(matches_any(url, &self.patterns))
    }
}

/// Audit row noting that an archive was requested
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveRequest {
    pub created: DateTime<Utc>,
    pub url: String,
    pub user_id: String,
}

impl ArchiveRequest {
    pub fn new(url: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            created: Utc::now().trunc_subsecs(0),
            url: url.into(),
            user_id: user_id.into(),
        }
    }
}

/// Append-only log of archive requests
#[async_trait::async_trait]
pub trait ArchiveRequestLog: Send + Sync {
    async fn record(&self, request: &ArchiveRequest) -> Result<(), StoreError>;
}

/// Archive request log held in process memory
#[derive(Default)]
pub struct MemoryArchiveLog {
    requests: Mutex<Vec<ArchiveRequest>>,
}

impl MemoryArchiveLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<ArchiveRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl ArchiveRequestLog for MemoryArchiveLog {
    async fn record(&self, request: &ArchiveRequest) -> Result<(), StoreError> {
        self.requests
            .lock()
            .map_err(|_| StoreError::Backend("archive log lock poisoned".to_string()))?
            .push(request.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_allow_list_matches_contained_pattern() {
        let policy = AllowList::new(["example.com"]);
        assert!(policy.allows("http://example.com/x").await.unwrap());
        assert!(policy.allows("https://www.EXAMPLE.com/a/b").await.unwrap());
        assert!(!policy.allows("http://evil.test/x").await.unwrap());
    }

    #[test]
    fn test_empty_patterns_never_match() {
        assert!(!matches_any("http://example.com", ["", "  "]));
        assert!(!matches_any("http://example.com", Vec::<String>::new()));
    }

    #[tokio::test]
    async fn test_memory_archive_log() {
        let log = MemoryArchiveLog::new();
        log.record(&ArchiveRequest::new("http://example.com", ""))
            .await
            .unwrap();
        let requests = log.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].url, "http://example.com");
        assert_eq!(requests[0].created.timestamp_subsec_nanos(), 0);
    }
}
