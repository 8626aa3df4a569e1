//! Metadata lookup: query/record types shared by the moly.hu source.

pub mod extract;
pub mod matching;
pub mod moly;
pub mod rank;
pub mod worker;

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::LookupError;

pub const DEFAULT_BASE_URL: &str = "https://moly.hu";

/// Identifier scheme under which the site's own book id is stored.
pub const SITE_ID_KEY: &str = "moly_hu";
pub const ISBN_KEY: &str = "isbn";

/// Producer half of the result sink shared by all detail workers.
pub type ResultSink = mpsc::UnboundedSender<MetadataRecord>;
pub type ResultReceiver = mpsc::UnboundedReceiver<MetadataRecord>;

pub fn result_sink() -> (ResultSink, ResultReceiver) {
    mpsc::unbounded_channel()
}

/// Take everything currently queued without waiting.
pub fn drain_sink(rx: &mut ResultReceiver) -> Vec<MetadataRecord> {
    let mut out = Vec::new();
    while let Ok(record) = rx.try_recv() {
        out.push(record);
    }
    out
}

pub trait MetadataSource: Send + Sync {
    fn name(&self) -> &str;

    #[allow(async_fn_in_trait)]
    async fn identify(
        &self,
        query: &Query,
        sink: &ResultSink,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<IdentifyStatus, LookupError>;

    #[allow(async_fn_in_trait)]
    async fn resolve_cover_urls(
        &self,
        query: &Query,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Vec<String>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub identifiers: BTreeMap<String, String>,
}

impl Query {
    pub fn new(title: Option<&str>, authors: &[&str]) -> Self {
        Self {
            title: title.map(String::from),
            authors: authors.iter().map(|a| a.to_string()).collect(),
            identifiers: BTreeMap::new(),
        }
    }

    pub fn with_identifier(mut self, scheme: &str, value: &str) -> Self {
        self.identifiers.insert(scheme.to_string(), value.to_string());
        self
    }

    pub fn site_id(&self) -> Option<&str> {
        self.identifiers
            .get(SITE_ID_KEY)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    }

    pub fn isbn(&self) -> Option<&str> {
        self.identifiers.get(ISBN_KEY).map(String::as_str)
    }

    pub fn has_title(&self) -> bool {
        self.title.as_deref().is_some_and(|t| !t.trim().is_empty())
    }

    pub fn has_authors(&self) -> bool {
        self.authors.iter().any(|a| !a.trim().is_empty())
    }

    /// Same title and authors, no identifiers.
    pub fn without_identifiers(&self) -> Self {
        Self {
            title: self.title.clone(),
            authors: self.authors.clone(),
            identifiers: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series {
    pub name: String,
    pub index: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetadataRecord {
    pub title: String,
    pub authors: Vec<String>,
    pub site_id: String,
    pub isbn: Option<String>,
    pub series: Option<Series>,
    pub comments: Option<String>,
    pub publisher: Option<String>,
    pub pubdate: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
    pub languages: Vec<String>,
    pub rating: Option<f64>,
    pub cover_urls: Vec<String>,
    pub relevance: usize,
}

impl MetadataRecord {
    pub fn new(title: String, authors: Vec<String>, site_id: String, relevance: usize) -> Self {
        Self {
            title,
            authors,
            site_id,
            isbn: None,
            series: None,
            comments: None,
            publisher: None,
            pubdate: None,
            tags: Vec::new(),
            languages: Vec::new(),
            rating: None,
            cover_urls: Vec::new(),
            relevance,
        }
    }

    pub fn identifiers(&self) -> BTreeMap<String, String> {
        let mut ids = BTreeMap::new();
        ids.insert(SITE_ID_KEY.to_string(), self.site_id.clone());
        if let Some(isbn) = &self.isbn {
            ids.insert(ISBN_KEY.to_string(), isbn.clone());
        }
        ids
    }
}

/// How an identify call ended. Errors are reserved for failures of the
/// search request itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifyStatus {
    /// Every spawned worker finished; some may not have produced a record.
    Completed { workers: usize, emitted: usize },
    NoMatches,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct LookupOptions {
    /// Maximum number of search results turned into detail workers.
    pub max_books: usize,
    /// Maximum number of cover URLs kept per book.
    pub max_covers: usize,
    pub timeout: Duration,
    pub base_url: String,
    /// Delay between consecutive worker starts.
    pub stagger: Duration,
}

impl Default for LookupOptions {
    fn default() -> Self {
        Self {
            max_books: 3,
            max_covers: 5,
            timeout: Duration::from_secs(30),
            base_url: DEFAULT_BASE_URL.to_string(),
            stagger: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoverImage {
    pub url: String,
    pub data: Vec<u8>,
    pub media_type: String,
}
