//! Detail worker: fetches one candidate book page and publishes its record.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use scraper::Html;
use tracing::{debug, error, info, warn};

use crate::cache::MetadataCache;
use crate::clean::MetadataCleaner;
use crate::error::LookupError;
use crate::isbn::check_isbn;
use crate::lookup::extract::{parse_authors, parse_site_id, parse_title, ExtractContext, OPTIONAL_RULES};
use crate::lookup::{MetadataRecord, ResultSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerOutcome {
    Emitted,
    Skipped,
}

/// GET `url` and return its trimmed body. Non-2xx statuses and empty bodies
/// are errors.
pub(crate) async fn fetch_page(client: &Client, url: &str, timeout: Duration) -> Result<String, LookupError> {
    let response = client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| LookupError::from_reqwest(url, e))?;
    let body = response
        .text()
        .await
        .map_err(|e| LookupError::from_reqwest(url, e))?;
    let body = body.trim();
    if body.is_empty() {
        return Err(LookupError::EmptyResponse { url: url.to_string() });
    }
    Ok(body.to_string())
}

pub struct DetailWorker {
    pub url: String,
    pub relevance: usize,
    pub client: Client,
    pub timeout: Duration,
    pub base_url: String,
    pub max_covers: usize,
    pub cache: Arc<dyn MetadataCache>,
    pub cleaner: Arc<dyn MetadataCleaner>,
    pub sink: ResultSink,
}

impl DetailWorker {
    pub async fn run(self) -> WorkerOutcome {
        let body = match fetch_page(&self.client, &self.url, self.timeout).await {
            Ok(body) => body,
            Err(e) => {
                match &e {
                    e if e.is_not_found() => error!("URL malformed: {}", self.url),
                    LookupError::Timeout { .. } => error!("Moly.hu timed out. Try again later. ({})", self.url),
                    LookupError::EmptyResponse { .. } => error!("Failed to get raw result for {}", self.url),
                    _ => error!("Failed to make details query {}: {}", self.url, e),
                }
                return WorkerOutcome::Skipped;
            }
        };

        let Some(record) = self.parse_details(&body) else {
            return WorkerOutcome::Skipped;
        };
        if self.sink.send(record).is_err() {
            warn!("Result sink closed before {} was delivered", self.url);
            return WorkerOutcome::Skipped;
        }
        WorkerOutcome::Emitted
    }

    /// Build the record for a fetched page. Returns `None` when a required
    /// field is missing.
    pub fn parse_details(&self, body: &str) -> Option<MetadataRecord> {
        let document = Html::parse_document(body);

        let site_id = parse_site_id(&self.url);
        debug!("Parsed moly.hu identifier: {:?}", site_id);
        let title = parse_title(&document).unwrap_or_else(|e| {
            error!("Error parsing title for url {}: {}", self.url, e);
            None
        });
        let authors = parse_authors(&document).unwrap_or_else(|e| {
            error!("Error parsing authors for url {}: {}", self.url, e);
            Vec::new()
        });

        let (Some(title), Some(site_id)) = (title.clone(), site_id.clone()) else {
            error!(
                "Could not find title/authors/moly.hu id for {} (id: {:?}, title: {:?}, authors: {:?})",
                self.url, site_id, title, authors
            );
            return None;
        };
        if authors.is_empty() {
            error!("Could not find authors for {} (id: {}, title: {})", self.url, site_id, title);
            return None;
        }

        let mut record = MetadataRecord::new(title, authors, site_id, self.relevance);
        let ctx = ExtractContext {
            base_url: &self.base_url,
            max_covers: self.max_covers,
        };
        for (name, rule) in OPTIONAL_RULES {
            match rule(&document, &ctx) {
                Ok(Some(field)) => {
                    debug!("Parsed {}: {:?}", name, field);
                    field.apply(&mut record);
                }
                Ok(None) => debug!("No {} on {}", name, self.url),
                Err(e) => warn!("Error parsing {} for url {}: {}", name, self.url, e),
            }
        }

        if !record.cover_urls.is_empty() {
            self.cache.put_cover_urls(&record.site_id, record.cover_urls.clone());
        }
        if let Some(isbn) = record.isbn.as_deref().and_then(check_isbn) {
            self.cache.put_isbn_site_id(&isbn, &record.site_id);
        }

        self.cleaner.clean(&mut record);
        info!("Parsed {} ({}) from {}", record.title, record.site_id, self.url);
        Some(record)
    }
}
