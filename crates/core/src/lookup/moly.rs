//! moly.hu metadata source: search, fan-out to detail workers, cover lookup.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use scraper::Html;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::{JsonFileCache, MemoryCache, MetadataCache};
use crate::clean::{DefaultCleaner, MetadataCleaner};
use crate::config::{lookup_options_from_config, AppConfig};
use crate::error::{LookupError, MetadataError};
use crate::isbn::check_isbn;
use crate::lookup::matching::{filter_candidates, parse_search_rows, Candidate};
use crate::lookup::rank::sort_by_relevance;
use crate::lookup::worker::{fetch_page, DetailWorker, WorkerOutcome};
use crate::lookup::{
    drain_sink, result_sink, CoverImage, IdentifyStatus, LookupOptions, MetadataSource, Query, ResultSink,
    ISBN_KEY, SITE_ID_KEY,
};

const SEARCH_PATH: &str = "/kereses?q=";
const BOOK_PATH: &str = "/konyvek/";
const USER_AGENT: &str = concat!("moly-metadata/", env!("CARGO_PKG_VERSION"));

pub struct MolySource {
    client: Client,
    options: LookupOptions,
    cache: Arc<dyn MetadataCache>,
    cleaner: Arc<dyn MetadataCleaner>,
}

impl MolySource {
    /// Source with an in-memory cache and the default cleaner.
    pub fn new(options: LookupOptions) -> Result<Self, LookupError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| LookupError::Network(e.to_string()))?;
        Ok(Self {
            client,
            options,
            cache: Arc::new(MemoryCache::new()),
            cleaner: Arc::new(DefaultCleaner),
        })
    }

    /// Source built from `cfg`, backed by the configured JSON cache file.
    /// The cache handle is returned too so the caller can save it later.
    pub fn from_config(cfg: &AppConfig) -> Result<(Self, Option<Arc<JsonFileCache>>), MetadataError> {
        let source = Self::new(lookup_options_from_config(&cfg.lookup))?;
        let Some(path) = cfg.cache.resolved_path() else {
            return Ok((source, None));
        };
        let cache = Arc::new(JsonFileCache::load(&path)?);
        let shared: Arc<dyn MetadataCache> = cache.clone();
        Ok((source.with_cache(shared), Some(cache)))
    }

    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn MetadataCache>) -> Self {
        self.cache = cache;
        self
    }

    #[must_use]
    pub fn with_cleaner(mut self, cleaner: Arc<dyn MetadataCleaner>) -> Self {
        self.cleaner = cleaner;
        self
    }

    pub fn options(&self) -> &LookupOptions {
        &self.options
    }

    pub fn cache(&self) -> &Arc<dyn MetadataCache> {
        &self.cache
    }

    /// `None` when the query has neither title nor author.
    pub fn search_url(&self, query: &Query) -> Option<String> {
        if !query.has_title() && !query.has_authors() {
            return None;
        }
        let author = query
            .authors
            .first()
            .map(|a| urlencoding::encode(a).into_owned())
            .unwrap_or_default();
        let title = query
            .title
            .as_deref()
            .map(|t| urlencoding::encode(t).into_owned())
            .unwrap_or_default();
        Some(format!("{}{}{}+{}", self.options.base_url, SEARCH_PATH, author, title))
    }

    pub fn book_url(&self, site_id: &str) -> String {
        format!("{}{}{}", self.options.base_url, BOOK_PATH, site_id)
    }

    /// Run a lookup, sending one record per matching book to `sink`.
    ///
    /// When nothing matches and the query carried identifiers together with a
    /// title and authors, the lookup is repeated once without identifiers.
    /// Only a failed search request is reported as an error; an empty result
    /// is [`IdentifyStatus::NoMatches`].
    pub async fn identify(
        &self,
        query: &Query,
        sink: &ResultSink,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<IdentifyStatus, LookupError> {
        let mut current = query.clone();
        let mut allow_retry = true;
        loop {
            info!("Title: {:?} Authors: {:?}", current.title, current.authors);
            if cancel.is_cancelled() {
                return Ok(IdentifyStatus::Cancelled);
            }
            let direct = current.site_id().is_some();

            let candidates = match self.find_candidates(&current, timeout).await {
                Ok(c) => c,
                Err(LookupError::NoMatch) => Vec::new(),
                Err(e @ (LookupError::InsufficientQuery | LookupError::EmptyResponse { .. })) => {
                    error!("{}", e);
                    return Ok(IdentifyStatus::NoMatches);
                }
                Err(e) => {
                    error!("Failed to make identify query: {}", e);
                    return Err(e);
                }
            };
            if cancel.is_cancelled() {
                return Ok(IdentifyStatus::Cancelled);
            }

            let status = if candidates.is_empty() {
                None
            } else {
                Some(self.collect(candidates, sink, timeout, cancel).await)
            };
            match status {
                Some(IdentifyStatus::Cancelled) => return Ok(IdentifyStatus::Cancelled),
                Some(s @ IdentifyStatus::Completed { emitted, .. }) if emitted > 0 || !direct => return Ok(s),
                _ => {}
            }

            // Nothing found, or the direct identifier led nowhere.
            if allow_retry && !current.identifiers.is_empty() && current.has_title() && current.has_authors() {
                info!("No matches found with identifiers, retrying using only title and authors");
                current = current.without_identifiers();
                allow_retry = false;
                continue;
            }
            if let Some(s) = status {
                return Ok(s);
            }
            error!("{} (title: {:?}, authors: {:?})", LookupError::NoMatch, current.title, current.authors);
            return Ok(IdentifyStatus::NoMatches);
        }
    }

    async fn find_candidates(&self, query: &Query, timeout: Duration) -> Result<Vec<Candidate>, LookupError> {
        if let Some(site_id) = query.site_id() {
            return Ok(vec![Candidate {
                url: self.book_url(site_id),
                title: query.title.clone().unwrap_or_default(),
                author: query.authors.first().cloned().unwrap_or_default(),
                relevance: 0,
            }]);
        }

        let url = self.search_url(query).ok_or(LookupError::InsufficientQuery)?;
        info!("Querying: {}", url);
        let body = fetch_page(&self.client, &url, timeout).await?;
        let rows = {
            let document = Html::parse_document(&body);
            parse_search_rows(&document)
        };
        info!("Found {} possible books (max: {})", rows.len(), self.options.max_books);

        let candidates = filter_candidates(
            &rows,
            query.title.as_deref(),
            &query.authors,
            self.options.max_books,
            &self.options.base_url,
        );
        if candidates.is_empty() {
            return Err(LookupError::NoMatch);
        }
        Ok(candidates)
    }

    /// Spawn one worker per candidate and wait for all of them, or for
    /// cancellation. Workers still running at cancellation are aborted.
    async fn collect(
        &self,
        candidates: Vec<Candidate>,
        sink: &ResultSink,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> IdentifyStatus {
        let workers = candidates.len();
        let mut tasks = JoinSet::new();
        for (i, candidate) in candidates.into_iter().enumerate() {
            if i > 0 {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        info!("Lookup cancelled while starting workers");
                        return IdentifyStatus::Cancelled;
                    }
                    _ = tokio::time::sleep(self.options.stagger) => {}
                }
            }
            debug!("Starting worker {} for {}", candidate.relevance, candidate.url);
            let worker = DetailWorker {
                url: candidate.url,
                relevance: candidate.relevance,
                client: self.client.clone(),
                timeout,
                base_url: self.options.base_url.clone(),
                max_covers: self.options.max_covers,
                cache: Arc::clone(&self.cache),
                cleaner: Arc::clone(&self.cleaner),
                sink: sink.clone(),
            };
            tasks.spawn(worker.run());
        }

        let mut emitted = 0;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Lookup cancelled, abandoning {} running workers", tasks.len());
                    return IdentifyStatus::Cancelled;
                }
                joined = tasks.join_next() => match joined {
                    None => break,
                    Some(Ok(WorkerOutcome::Emitted)) => emitted += 1,
                    Some(Ok(WorkerOutcome::Skipped)) => {}
                    Some(Err(e)) => error!("Detail worker failed: {}", e),
                },
            }
        }
        IdentifyStatus::Completed { workers, emitted }
    }

    /// Cover URLs cached for these identifiers, looking the site id up by
    /// ISBN when it is not given directly.
    pub fn cached_cover_urls(&self, identifiers: &BTreeMap<String, String>) -> Option<Vec<String>> {
        let site_id = match identifiers.get(SITE_ID_KEY) {
            Some(id) => id.clone(),
            None => {
                let isbn = identifiers.get(ISBN_KEY).and_then(|i| check_isbn(i))?;
                self.cache.isbn_to_site_id(&isbn)?
            }
        };
        self.cache.cover_urls(&site_id)
    }

    /// Cover URLs for the best matching book, from cache when possible.
    /// Empty when nothing is found or the lookup is cancelled.
    pub async fn resolve_cover_urls(
        &self,
        query: &Query,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Vec<String> {
        if let Some(urls) = self.cached_cover_urls(&query.identifiers) {
            debug!("Using cached cover URLs");
            return urls;
        }

        info!("No cached cover found, running identify");
        let (tx, mut rx) = result_sink();
        if let Err(e) = self.identify(query, &tx, timeout, cancel).await {
            warn!("Identify for cover failed: {}", e);
        }
        if cancel.is_cancelled() {
            return Vec::new();
        }
        drop(tx);

        let results = sort_by_relevance(drain_sink(&mut rx), query);
        for record in &results {
            if let Some(urls) = self.cached_cover_urls(&record.identifiers()) {
                return urls;
            }
        }
        info!("No cover found");
        Vec::new()
    }

    /// Download cover images for the query. With `get_best_cover` only the
    /// first usable image is returned. Queries without a title yield nothing.
    pub async fn download_covers(
        &self,
        query: &Query,
        timeout: Duration,
        get_best_cover: bool,
        cancel: &CancellationToken,
    ) -> Vec<CoverImage> {
        if !query.has_title() {
            return Vec::new();
        }
        let urls = self.resolve_cover_urls(query, timeout, cancel).await;
        let limit = if get_best_cover { 1 } else { urls.len() };

        let mut covers = Vec::new();
        for url in urls {
            if covers.len() >= limit || cancel.is_cancelled() {
                break;
            }
            match self.fetch_cover(&url, timeout).await {
                Ok(cover) => covers.push(cover),
                Err(e) => warn!("Failed to download cover {}: {}", url, e),
            }
        }
        covers
    }

    async fn fetch_cover(&self, url: &str, timeout: Duration) -> Result<CoverImage, LookupError> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| LookupError::from_reqwest(url, e))?;
        let data = response
            .bytes()
            .await
            .map_err(|e| LookupError::from_reqwest(url, e))?;
        let format = image::guess_format(&data).map_err(|e| LookupError::Parse {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        Ok(CoverImage {
            url: url.to_string(),
            data: data.to_vec(),
            media_type: format.to_mime_type().to_string(),
        })
    }
}

impl MetadataSource for MolySource {
    fn name(&self) -> &str {
        "moly_hu"
    }

    async fn identify(
        &self,
        query: &Query,
        sink: &ResultSink,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<IdentifyStatus, LookupError> {
        MolySource::identify(self, query, sink, timeout, cancel).await
    }

    async fn resolve_cover_urls(&self, query: &Query, timeout: Duration, cancel: &CancellationToken) -> Vec<String> {
        MolySource::resolve_cover_urls(self, query, timeout, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;

    fn source() -> MolySource {
        MolySource::new(LookupOptions::default()).unwrap()
    }

    #[test]
    fn search_url_encodes_author_and_title() {
        let q = Query::new(Some("Nemo kapitány"), &["Jules Verne"]);
        assert_eq!(
            source().search_url(&q).as_deref(),
            Some("https://moly.hu/kereses?q=Jules%20Verne+Nemo%20kapit%C3%A1ny")
        );
    }

    #[test]
    fn search_url_with_title_only() {
        let q = Query::new(Some("Winnetou"), &[]);
        assert_eq!(source().search_url(&q).as_deref(), Some("https://moly.hu/kereses?q=+Winnetou"));
        assert_eq!(source().search_url(&Query::default()), None);
    }

    #[test]
    fn cached_cover_lookup_via_isbn() {
        let s = source();
        s.cache().put_cover_urls("nemo", vec!["https://moly.hu/c.jpg".into()]);
        s.cache().put_isbn_site_id("9780306406157", "nemo");

        let by_isbn = Query::default().with_identifier(ISBN_KEY, "978-0-306-40615-7");
        assert_eq!(
            s.cached_cover_urls(&by_isbn.identifiers),
            Some(vec!["https://moly.hu/c.jpg".to_string()])
        );
        let bad_isbn = Query::default().with_identifier(ISBN_KEY, "9780306406158");
        assert_eq!(s.cached_cover_urls(&bad_isbn.identifiers), None);
        let by_id = Query::default().with_identifier(SITE_ID_KEY, "nemo");
        assert!(s.cached_cover_urls(&by_id.identifiers).is_some());
    }

    #[tokio::test]
    async fn cancelled_before_start_does_no_work() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (tx, mut rx) = result_sink();
        let status = source()
            .identify(&Query::new(Some("X"), &["Y"]), &tx, Duration::from_secs(1), &cancel)
            .await
            .unwrap();
        assert_eq!(status, IdentifyStatus::Cancelled);
        assert!(drain_sink(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn empty_query_is_no_match() {
        let (tx, _rx) = result_sink();
        let status = source()
            .identify(&Query::default(), &tx, Duration::from_secs(1), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(status, IdentifyStatus::NoMatches);
    }

    fn config_with_cache(path: &std::path::Path) -> AppConfig {
        AppConfig {
            cache: CacheConfig {
                path: Some(path.display().to_string()),
            },
            ..AppConfig::default()
        }
    }

    #[test]
    fn from_config_opens_the_cache_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, r#"{"covers":{"nemo":["https://moly.hu/c.jpg"]}}"#).unwrap();

        let (s, cache) = MolySource::from_config(&config_with_cache(&path)).unwrap();
        assert_eq!(cache.unwrap().path(), path.as_path());
        let by_id = Query::default().with_identifier(SITE_ID_KEY, "nemo");
        assert_eq!(
            s.cached_cover_urls(&by_id.identifiers),
            Some(vec!["https://moly.hu/c.jpg".to_string()])
        );
    }

    #[test]
    fn from_config_reports_a_malformed_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, "not json").unwrap();

        let err = MolySource::from_config(&config_with_cache(&path)).err().unwrap();
        assert!(matches!(err, MetadataError::Cache(_)), "{err}");
    }
}
