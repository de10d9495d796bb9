//! Typed HTTP wrapper around the manager's v3 API.
//!
//! One pooled `reqwest` client carries the API-key header on every request.
//! Read endpoints go through the shared [`TtlCache`] (read-through, keyed per
//! endpoint); mutating endpoints invalidate every key they can affect.
//! Transient failures are retried with exponential backoff before surfacing.
//!
//! The client tolerates extra and missing non-essential fields in responses,
//! but refuses to issue a mutation when a required identifier is absent.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::cache::TtlCache;
use crate::metrics::Metrics;
use crate::types::{
    CustomFormat, CustomFormatRef, DownloadId, Episode, EpisodeFile, EpisodeId, HistoryEvent,
    Page, QualityProfile, QualityProfileId, QueueItem, QueueItemId, Series, SeriesId,
};

use super::error::SonarrError;
use super::retry::{retry_with_backoff, RetryConfig};

const QUEUE_KEY: &str = "queue";
const CUSTOM_FORMATS_KEY: &str = "custom_formats";
const QUALITY_PROFILES_KEY: &str = "quality_profiles";

const QUEUE_TTL: Duration = Duration::from_secs(60);
const CATALOG_TTL: Duration = Duration::from_secs(300);
const HISTORY_TTL: Duration = Duration::from_secs(30);
const EPISODE_FILE_TTL: Duration = Duration::from_secs(60);

/// Upper bound on queue pages read in one snapshot; the manager serves 1000
/// records per page, so this is far beyond any real queue.
const MAX_QUEUE_PAGES: u32 = 50;

fn series_key(id: SeriesId) -> String {
    format!("series_by_id/{id}")
}

fn history_key(id: EpisodeId) -> String {
    format!("history/episode/{id}")
}

fn episode_file_key(id: EpisodeId) -> String {
    format!("episode_file/{id}")
}

/// Connection and paging parameters for the client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the manager, without the `/api/v3` suffix.
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
    /// Max idle pooled connections per host.
    pub pool_size: usize,
    pub retry: RetryConfig,
    /// History page size; newest-first pages are read until exhausted.
    pub history_page_size: u32,
    /// How many history pages to read at most.
    pub history_pages: u32,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        ClientConfig {
            base_url: base_url.into(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(30),
            pool_size: 20,
            retry: RetryConfig::DEFAULT,
            history_page_size: 50,
            history_pages: 2,
        }
    }
}

/// Response of `GET /system/status`, used as a connectivity probe.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    #[serde(default)]
    pub version: Option<String>,
}

/// Everything needed to trigger a manual import of a finished download.
#[derive(Debug, Clone)]
pub struct ManualImport {
    pub download_id: DownloadId,
    pub episode_id: EpisodeId,
    /// Folder the download client wrote the release to.
    pub path: String,
    /// The release's quality object, passed through verbatim.
    pub quality: Option<serde_json::Value>,
    /// Formats recorded on the grab event.
    pub custom_formats: Vec<CustomFormatRef>,
    pub quality_profile_id: QualityProfileId,
}

/// Typed client for the manager's HTTP API.
///
/// Cheap to share: hold it in an `Arc` and call from any task.
pub struct SonarrClient {
    http: reqwest::Client,
    base_url: String,
    retry: RetryConfig,
    history_page_size: u32,
    history_pages: u32,
    cache: Arc<TtlCache>,
    metrics: Arc<Metrics>,
}

impl SonarrClient {
    pub fn new(config: ClientConfig, cache: Arc<TtlCache>, metrics: Arc<Metrics>) -> Self {
        let mut headers = reqwest::header::HeaderMap::new();
        let mut api_key = reqwest::header::HeaderValue::from_str(&config.api_key)
            .expect("API key contains invalid header characters");
        api_key.set_sensitive(true);
        headers.insert("X-Api-Key", api_key);

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(config.pool_size)
            .default_headers(headers)
            .build()
            .expect("failed to build HTTP client");

        SonarrClient {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            retry: config.retry,
            history_page_size: config.history_page_size,
            history_pages: config.history_pages,
            cache,
            metrics,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v3{}", self.base_url, path)
    }

    // ─── Request plumbing ─────────────────────────────────────────────────

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, SonarrError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs);

        // The manager wraps errors as {"message": "..."}; fall back to the
        // raw body when it does not.
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
            .unwrap_or(body);

        Err(SonarrError::from_status(status.as_u16(), message, retry_after))
    }

    async fn get_once<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, SonarrError> {
        self.metrics.record_api_request();
        let response = self
            .http
            .get(self.url(path))
            .query(query)
            .send()
            .await
            .map_err(SonarrError::from_request)?;
        let response = Self::check_status(response).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| SonarrError::Malformed(e.to_string()))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        label: &str,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, SonarrError> {
        retry_with_backoff(self.retry, label, || self.get_once(path, query)).await
    }

    async fn delete_once(&self, path: &str, query: &[(&str, String)]) -> Result<(), SonarrError> {
        self.metrics.record_api_request();
        let response = self
            .http
            .delete(self.url(path))
            .query(query)
            .send()
            .await
            .map_err(SonarrError::from_request)?;
        Self::check_status(response).await.map(|_| ())
    }

    async fn post_once(&self, path: &str, body: &serde_json::Value) -> Result<(), SonarrError> {
        self.metrics.record_api_request();
        let response = self
            .http
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(SonarrError::from_request)?;
        Self::check_status(response).await.map(|_| ())
    }

    // ─── Read endpoints ───────────────────────────────────────────────────

    /// Probes connectivity and authentication.
    pub async fn system_status(&self) -> Result<SystemStatus, SonarrError> {
        self.get_json("system_status", "/system/status", &[]).await
    }

    /// The full queue snapshot, all pages concatenated. Cached for 60 s.
    pub async fn queue(&self) -> Result<Arc<Vec<QueueItem>>, SonarrError> {
        if let Some(cached) = self.cache.get::<Vec<QueueItem>>(QUEUE_KEY) {
            return Ok(cached);
        }

        let mut items: Vec<QueueItem> = Vec::new();
        for page_number in 1..=MAX_QUEUE_PAGES {
            let query = [
                ("page", page_number.to_string()),
                ("pageSize", "1000".to_string()),
                ("includeUnknownSeriesItems", "true".to_string()),
                ("includeSeries", "true".to_string()),
                ("includeEpisode", "true".to_string()),
            ];
            let page: Page<QueueItem> = self.get_json("queue", "/queue", &query).await?;
            let fetched = page.records.len();
            items.extend(page.records);

            let exhausted = fetched < page.page_size.max(1) as usize
                || items.len() as u64 >= page.total_records;
            if exhausted {
                break;
            }
        }

        let items = Arc::new(items);
        self.cache
            .put_arc(QUEUE_KEY, Arc::clone(&items), Some(QUEUE_TTL));
        Ok(items)
    }

    /// Drops the cached queue snapshot so the next read is fresh.
    pub fn invalidate_queue(&self) {
        self.cache.invalidate(QUEUE_KEY);
    }

    /// Drops every cached view touching one episode (plus the queue).
    pub fn invalidate_episode(&self, episode: EpisodeId) {
        self.cache.invalidate(QUEUE_KEY);
        self.cache.invalidate(&history_key(episode));
        self.cache.invalidate(&episode_file_key(episode));
    }

    /// Recent history for an episode, newest first. Cached for 30 s.
    pub async fn history_for_episode(
        &self,
        episode: EpisodeId,
    ) -> Result<Arc<Vec<HistoryEvent>>, SonarrError> {
        let key = history_key(episode);
        if let Some(cached) = self.cache.get::<Vec<HistoryEvent>>(&key) {
            return Ok(cached);
        }

        let mut events: Vec<HistoryEvent> = Vec::new();
        for page_number in 1..=self.history_pages {
            let query = [
                ("page", page_number.to_string()),
                ("pageSize", self.history_page_size.to_string()),
                ("episodeId", episode.to_string()),
                ("sortKey", "date".to_string()),
                ("sortDirection", "descending".to_string()),
            ];
            let page: Page<HistoryEvent> = self.get_json("history", "/history", &query).await?;
            let fetched = page.records.len();
            events.extend(page.records);
            if fetched < self.history_page_size as usize {
                break;
            }
        }

        let events = Arc::new(events);
        self.cache.put_arc(key, Arc::clone(&events), Some(HISTORY_TTL));
        Ok(events)
    }

    /// The currently-imported file for an episode, if any. Cached for 60 s.
    ///
    /// Resolution is two-step (`/episode/{id}` then `/episodefile/{fileId}`);
    /// a 404 anywhere along the way is a clean "no current file".
    pub async fn episode_file(
        &self,
        episode: EpisodeId,
    ) -> Result<Option<Arc<EpisodeFile>>, SonarrError> {
        let key = episode_file_key(episode);
        if let Some(cached) = self.cache.get::<Option<Arc<EpisodeFile>>>(&key) {
            return Ok((*cached).clone());
        }

        let resolved = self.resolve_episode_file(episode).await?;
        self.cache
            .put(key, resolved.clone(), Some(EPISODE_FILE_TTL));
        Ok(resolved)
    }

    async fn resolve_episode_file(
        &self,
        episode: EpisodeId,
    ) -> Result<Option<Arc<EpisodeFile>>, SonarrError> {
        let path = format!("/episode/{episode}");
        let detail: Episode = match self.get_json("episode", &path, &[]).await {
            Ok(detail) => detail,
            Err(SonarrError::NotFound(_)) => return Ok(None),
            Err(err) => return Err(err),
        };

        let file_id = match (detail.has_file, detail.episode_file_id) {
            (true, Some(id)) => id,
            _ => return Ok(None),
        };

        let path = format!("/episodefile/{file_id}");
        match self.get_json::<EpisodeFile>("episode_file", &path, &[]).await {
            Ok(file) => Ok(Some(Arc::new(file))),
            Err(SonarrError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// The custom-format catalog. Changes rarely; cached for 300 s.
    pub async fn custom_formats(&self) -> Result<Arc<Vec<CustomFormat>>, SonarrError> {
        if let Some(cached) = self.cache.get::<Vec<CustomFormat>>(CUSTOM_FORMATS_KEY) {
            return Ok(cached);
        }
        let formats: Vec<CustomFormat> =
            self.get_json("custom_formats", "/customformat", &[]).await?;
        let formats = Arc::new(formats);
        self.cache
            .put_arc(CUSTOM_FORMATS_KEY, Arc::clone(&formats), Some(CATALOG_TTL));
        Ok(formats)
    }

    /// All quality profiles. Cached for 300 s.
    pub async fn quality_profiles(&self) -> Result<Arc<Vec<QualityProfile>>, SonarrError> {
        if let Some(cached) = self.cache.get::<Vec<QualityProfile>>(QUALITY_PROFILES_KEY) {
            return Ok(cached);
        }
        let profiles: Vec<QualityProfile> = self
            .get_json("quality_profiles", "/qualityprofile", &[])
            .await?;
        let profiles = Arc::new(profiles);
        self.cache.put_arc(
            QUALITY_PROFILES_KEY,
            Arc::clone(&profiles),
            Some(CATALOG_TTL),
        );
        Ok(profiles)
    }

    /// Series detail (profile linkage). Cached for 300 s.
    pub async fn series(&self, id: SeriesId) -> Result<Arc<Series>, SonarrError> {
        let key = series_key(id);
        if let Some(cached) = self.cache.get::<Series>(&key) {
            return Ok(cached);
        }
        let path = format!("/series/{id}");
        let series: Series = self.get_json("series", &path, &[]).await?;
        let series = Arc::new(series);
        self.cache.put_arc(key, Arc::clone(&series), Some(CATALOG_TTL));
        Ok(series)
    }

    // ─── Score computation ────────────────────────────────────────────────

    /// The series' quality profile, resolved through the catalog.
    pub async fn profile_for_series(
        &self,
        series: SeriesId,
    ) -> Result<Option<QualityProfile>, SonarrError> {
        let detail = self.series(series).await?;
        let Some(profile_id) = detail.quality_profile_id else {
            return Ok(None);
        };
        let profiles = self.quality_profiles().await?;
        Ok(profiles.iter().find(|p| p.id == profile_id).cloned())
    }

    /// Map from custom-format ID to its configured score for a series.
    pub async fn format_scores_for_series(
        &self,
        series: SeriesId,
    ) -> Result<HashMap<u64, i64>, SonarrError> {
        let Some(profile) = self.profile_for_series(series).await? else {
            return Ok(HashMap::new());
        };
        Ok(profile
            .format_items
            .iter()
            .map(|item| (item.format, item.score))
            .collect())
    }

    /// Sums configured scores for the given formats; formats the profile does
    /// not know contribute zero.
    pub async fn compute_score(
        &self,
        formats: &[CustomFormatRef],
        series: SeriesId,
    ) -> Result<i64, SonarrError> {
        if formats.is_empty() {
            return Ok(0);
        }
        let scores = self.format_scores_for_series(series).await?;
        Ok(formats
            .iter()
            .filter_map(|cf| cf.id)
            .filter_map(|id| scores.get(&id))
            .sum())
    }

    /// The score a history event carried, computing it from the event's
    /// formats when the manager did not include one.
    pub async fn score_for_event(
        &self,
        event: &HistoryEvent,
        series: Option<SeriesId>,
    ) -> Result<i64, SonarrError> {
        if let Some(score) = event.custom_format_score {
            return Ok(score);
        }
        match series {
            Some(series) if !event.custom_formats.is_empty() => {
                self.compute_score(&event.custom_formats, series).await
            }
            _ => Ok(0),
        }
    }

    // ─── Mutations ────────────────────────────────────────────────────────

    /// Removes a queue item, optionally blocklisting the release.
    ///
    /// The item is always removed from the download client too. An item that
    /// is already gone (404/409) counts as success. Invalidates the queue
    /// snapshot and, when known, the episode's cached views.
    pub async fn remove_queue_item(
        &self,
        id: QueueItemId,
        block_release: bool,
        episode: Option<EpisodeId>,
    ) -> Result<(), SonarrError> {
        let path = format!("/queue/{id}");
        let query = [
            ("removeFromClient", "true".to_string()),
            ("blocklist", block_release.to_string()),
        ];
        let result = retry_with_backoff(self.retry, "remove_queue_item", || {
            self.delete_once(&path, &query)
        })
        .await;

        match result {
            Ok(()) => {}
            Err(SonarrError::NotFound(_)) | Err(SonarrError::Conflict) => {
                debug!(queue_id = %id, "queue item already gone, treating removal as success");
            }
            Err(err) => return Err(err),
        }

        match episode {
            Some(episode) => self.invalidate_episode(episode),
            None => self.invalidate_queue(),
        }
        Ok(())
    }

    /// Triggers a manual import of a finished download.
    ///
    /// Refuses to run when the output path is empty or the download ID is
    /// blank; both are required to target the right release.
    pub async fn force_import(&self, import: &ManualImport) -> Result<(), SonarrError> {
        if import.path.is_empty() {
            return Err(SonarrError::MissingIdentifier("outputPath"));
        }
        if import.download_id.as_str().is_empty() {
            return Err(SonarrError::MissingIdentifier("downloadId"));
        }

        let body = json!({
            "name": "ManualImport",
            "files": [{
                "path": import.path,
                "episodeIds": [import.episode_id],
                "quality": import.quality,
                "customFormats": import.custom_formats,
                "qualityProfileId": import.quality_profile_id,
            }],
        });

        retry_with_backoff(self.retry, "force_import", || {
            self.post_once("/command", &body)
        })
        .await?;

        self.invalidate_episode(import.episode_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Query;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{delete, get, post};
    use axum::{Json, Router};
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    async fn spawn_manager(router: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    fn test_client(addr: SocketAddr, cache: Arc<TtlCache>) -> SonarrClient {
        let mut config = ClientConfig::new(format!("http://{addr}"), "test-key");
        config.retry = RetryConfig::new(2, Duration::from_millis(1), Duration::from_millis(4), 2.0);
        SonarrClient::new(config, cache, Arc::new(Metrics::new()))
    }

    fn fresh_cache() -> Arc<TtlCache> {
        Arc::new(TtlCache::new(Duration::from_secs(300)))
    }

    fn queue_page(records: serde_json::Value, total: u64) -> serde_json::Value {
        json!({
            "page": 1,
            "pageSize": 1000,
            "totalRecords": total,
            "records": records,
        })
    }

    #[tokio::test]
    async fn queue_retries_through_503_and_succeeds() {
        // Scenario: the manager returns 503 twice, then a valid queue.
        let calls = Arc::new(AtomicU32::new(0));
        let calls_handler = Arc::clone(&calls);

        let router = Router::new().route(
            "/api/v3/queue",
            get(move || {
                let calls = Arc::clone(&calls_handler);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"message": "down"})))
                    } else {
                        (
                            StatusCode::OK,
                            Json(queue_page(json!([{"id": 1, "downloadId": "D1"}]), 1)),
                        )
                    }
                }
            }),
        );

        let addr = spawn_manager(router).await;
        let client = test_client(addr, fresh_cache());

        let queue = client.queue().await.unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn queue_gives_up_after_three_failed_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_handler = Arc::clone(&calls);

        let router = Router::new().route(
            "/api/v3/queue",
            get(move || {
                calls_handler.fetch_add(1, Ordering::SeqCst);
                async { StatusCode::SERVICE_UNAVAILABLE }
            }),
        );

        let addr = spawn_manager(router).await;
        let client = test_client(addr, fresh_cache());

        let result = client.queue().await;
        assert!(matches!(result, Err(SonarrError::Transient { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unauthorized_fails_without_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_handler = Arc::clone(&calls);

        let router = Router::new().route(
            "/api/v3/queue",
            get(move || {
                calls_handler.fetch_add(1, Ordering::SeqCst);
                async { StatusCode::UNAUTHORIZED }
            }),
        );

        let addr = spawn_manager(router).await;
        let client = test_client(addr, fresh_cache());

        let result = client.queue().await;
        assert!(matches!(result, Err(SonarrError::Unauthorized)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn requests_carry_the_api_key_header() {
        let router = Router::new().route(
            "/api/v3/system/status",
            get(|headers: HeaderMap| async move {
                if headers.get("X-Api-Key").map(|v| v.as_bytes()) == Some(b"test-key") {
                    (StatusCode::OK, Json(json!({"version": "4.0.0"})))
                } else {
                    (StatusCode::UNAUTHORIZED, Json(json!({})))
                }
            }),
        );

        let addr = spawn_manager(router).await;
        let client = test_client(addr, fresh_cache());

        let status = client.system_status().await.unwrap();
        assert_eq!(status.version.as_deref(), Some("4.0.0"));
    }

    #[tokio::test]
    async fn queue_concatenates_all_pages() {
        #[derive(Deserialize)]
        struct PageQuery {
            page: u32,
        }

        let router = Router::new().route(
            "/api/v3/queue",
            get(|Query(q): Query<PageQuery>| async move {
                let body = match q.page {
                    1 => json!({
                        "page": 1, "pageSize": 2, "totalRecords": 3,
                        "records": [{"id": 1}, {"id": 2}],
                    }),
                    _ => json!({
                        "page": 2, "pageSize": 2, "totalRecords": 3,
                        "records": [{"id": 3}],
                    }),
                };
                Json(body)
            }),
        );

        let addr = spawn_manager(router).await;
        let client = test_client(addr, fresh_cache());

        let queue = client.queue().await.unwrap();
        assert_eq!(queue.len(), 3);
        assert_eq!(queue[2].id, QueueItemId(3));
    }

    #[tokio::test]
    async fn queue_is_served_from_cache_within_ttl() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_handler = Arc::clone(&calls);

        let router = Router::new().route(
            "/api/v3/queue",
            get(move || {
                calls_handler.fetch_add(1, Ordering::SeqCst);
                async { Json(queue_page(json!([{"id": 1}]), 1)) }
            }),
        );

        let addr = spawn_manager(router).await;
        let client = test_client(addr, fresh_cache());

        client.queue().await.unwrap();
        client.queue().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        client.invalidate_queue();
        client.queue().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn episode_file_resolves_through_episode_detail() {
        let router = Router::new()
            .route(
                "/api/v3/episode/42",
                get(|| async {
                    Json(json!({"id": 42, "hasFile": true, "episodeFileId": 7}))
                }),
            )
            .route(
                "/api/v3/episodefile/7",
                get(|| async {
                    Json(json!({
                        "id": 7,
                        "episodeId": 42,
                        "customFormatScore": 2160,
                        "customFormats": [{"id": 1, "name": "A"}],
                    }))
                }),
            );

        let addr = spawn_manager(router).await;
        let client = test_client(addr, fresh_cache());

        let file = client.episode_file(EpisodeId(42)).await.unwrap().unwrap();
        assert_eq!(file.custom_format_score, Some(2160));
    }

    #[tokio::test]
    async fn episode_without_file_resolves_to_none() {
        let router = Router::new().route(
            "/api/v3/episode/42",
            get(|| async { Json(json!({"id": 42, "hasFile": false})) }),
        );

        let addr = spawn_manager(router).await;
        let client = test_client(addr, fresh_cache());

        assert!(client.episode_file(EpisodeId(42)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_episode_is_not_an_error() {
        let router = Router::new().route(
            "/api/v3/episode/42",
            get(|| async { StatusCode::NOT_FOUND }),
        );

        let addr = spawn_manager(router).await;
        let client = test_client(addr, fresh_cache());

        assert!(client.episode_file(EpisodeId(42)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn removal_of_vanished_item_counts_as_success() {
        let router = Router::new().route(
            "/api/v3/queue/9",
            delete(|| async { StatusCode::NOT_FOUND }),
        );

        let addr = spawn_manager(router).await;
        let cache = fresh_cache();
        cache.put(QUEUE_KEY, Vec::<QueueItem>::new(), None);
        let client = test_client(addr, Arc::clone(&cache));

        client
            .remove_queue_item(QueueItemId(9), true, Some(EpisodeId(42)))
            .await
            .unwrap();

        // The stale queue snapshot must be gone after a mutation.
        assert!(cache.get::<Vec<QueueItem>>(QUEUE_KEY).is_none());
    }

    #[tokio::test]
    async fn removal_sends_blocklist_flag() {
        #[derive(Deserialize)]
        struct RemoveQuery {
            blocklist: bool,
            #[serde(rename = "removeFromClient")]
            remove_from_client: bool,
        }

        let seen = Arc::new(Mutex::new(None));
        let seen_handler = Arc::clone(&seen);

        let router = Router::new().route(
            "/api/v3/queue/9",
            delete(move |Query(q): Query<RemoveQuery>| {
                *seen_handler.lock().unwrap() = Some((q.blocklist, q.remove_from_client));
                async { StatusCode::OK }
            }),
        );

        let addr = spawn_manager(router).await;
        let client = test_client(addr, fresh_cache());

        client
            .remove_queue_item(QueueItemId(9), true, None)
            .await
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), Some((true, true)));
    }

    #[tokio::test]
    async fn force_import_posts_a_manual_import_command() {
        let seen = Arc::new(Mutex::new(None));
        let seen_handler = Arc::clone(&seen);

        let router = Router::new().route(
            "/api/v3/command",
            post(move |Json(body): Json<serde_json::Value>| {
                *seen_handler.lock().unwrap() = Some(body);
                async { (StatusCode::CREATED, Json(json!({"id": 1}))) }
            }),
        );

        let addr = spawn_manager(router).await;
        let cache = fresh_cache();
        cache.put(QUEUE_KEY, Vec::<QueueItem>::new(), None);
        let client = test_client(addr, Arc::clone(&cache));

        client
            .force_import(&ManualImport {
                download_id: DownloadId::new("D1"),
                episode_id: EpisodeId(42),
                path: "/downloads/release".into(),
                quality: Some(json!({"quality": {"id": 6}})),
                custom_formats: vec![CustomFormatRef {
                    id: Some(3),
                    name: "C".into(),
                }],
                quality_profile_id: QualityProfileId(5),
            })
            .await
            .unwrap();

        let body = seen.lock().unwrap().clone().unwrap();
        assert_eq!(body["name"], "ManualImport");
        assert_eq!(body["files"][0]["path"], "/downloads/release");
        assert_eq!(body["files"][0]["episodeIds"], json!([42]));
        assert_eq!(body["files"][0]["qualityProfileId"], 5);
        assert!(cache.get::<Vec<QueueItem>>(QUEUE_KEY).is_none());
    }

    #[tokio::test]
    async fn force_import_refuses_without_a_path() {
        // No route registered: the call must fail before any HTTP happens.
        let addr = spawn_manager(Router::new()).await;
        let client = test_client(addr, fresh_cache());

        let result = client
            .force_import(&ManualImport {
                download_id: DownloadId::new("D1"),
                episode_id: EpisodeId(42),
                path: String::new(),
                quality: None,
                custom_formats: vec![],
                quality_profile_id: QualityProfileId(5),
            })
            .await;

        assert!(matches!(
            result,
            Err(SonarrError::MissingIdentifier("outputPath"))
        ));
    }

    #[tokio::test]
    async fn compute_score_sums_profile_scores_and_ignores_unknown() {
        let router = Router::new()
            .route(
                "/api/v3/series/98",
                get(|| async {
                    Json(json!({"id": 98, "title": "Example", "qualityProfileId": 5}))
                }),
            )
            .route(
                "/api/v3/qualityprofile",
                get(|| async {
                    Json(json!([{
                        "id": 5,
                        "name": "HD",
                        "formatItems": [
                            {"format": 1, "name": "A", "score": 100},
                            {"format": 2, "name": "B", "score": 50},
                        ],
                    }]))
                }),
            );

        let addr = spawn_manager(router).await;
        let client = test_client(addr, fresh_cache());

        let formats = vec![
            CustomFormatRef { id: Some(1), name: "A".into() },
            CustomFormatRef { id: Some(9), name: "unknown".into() },
            CustomFormatRef { id: None, name: "nameless".into() },
        ];
        let score = client.compute_score(&formats, SeriesId(98)).await.unwrap();
        assert_eq!(score, 100);
    }

    #[tokio::test]
    async fn score_for_event_prefers_the_recorded_score() {
        // No routes: a recorded score must short-circuit any catalog lookup.
        let addr = spawn_manager(Router::new()).await;
        let client = test_client(addr, fresh_cache());

        let event: HistoryEvent = serde_json::from_value(json!({
            "eventType": "grabbed",
            "date": "2026-07-30T18:04:11Z",
            "customFormatScore": 3161,
            "customFormats": [{"id": 1, "name": "A"}],
        }))
        .unwrap();

        let score = client
            .score_for_event(&event, Some(SeriesId(98)))
            .await
            .unwrap();
        assert_eq!(score, 3161);
    }

    #[tokio::test]
    async fn history_is_fetched_newest_first_and_cached() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_handler = Arc::clone(&calls);

        #[derive(Deserialize)]
        struct HistoryQuery {
            #[serde(rename = "episodeId")]
            episode_id: u64,
            #[serde(rename = "sortDirection")]
            sort_direction: String,
        }

        let router = Router::new().route(
            "/api/v3/history",
            get(move |Query(q): Query<HistoryQuery>| {
                calls_handler.fetch_add(1, Ordering::SeqCst);
                async move {
                    assert_eq!(q.episode_id, 42);
                    assert_eq!(q.sort_direction, "descending");
                    Json(json!({
                        "page": 1, "pageSize": 50, "totalRecords": 1,
                        "records": [{
                            "eventType": "grabbed",
                            "date": "2026-07-30T18:04:11Z",
                            "downloadId": "D1",
                        }],
                    }))
                }
            }),
        );

        let addr = spawn_manager(router).await;
        let client = test_client(addr, fresh_cache());

        let history = client.history_for_episode(EpisodeId(42)).await.unwrap();
        assert_eq!(history.len(), 1);
        client.history_for_episode(EpisodeId(42)).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
