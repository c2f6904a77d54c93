//! Title search against a TMDB-compatible `/search/movie` endpoint.
//!
//! Requests pass through a sliding-window rate limiter and a small TTL cache
//! keyed by the normalized query, so retyping the same title does not cost a
//! request.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use party_core::{MediaType, QueueCandidate};
use serde::Deserialize;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://api.themoviedb.org/3";
const POSTER_BASE_URL: &str = "https://image.tmdb.org/t/p/w342";

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    /// Requests allowed per `window`.
    pub max_requests: usize,
    pub window: Duration,
    pub cache_ttl: Duration,
    pub cache_capacity: usize,
    pub timeout: Duration,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            max_requests: 40,
            window: Duration::from_secs(10),
            cache_ttl: Duration::from_secs(5 * 60),
            cache_capacity: 100,
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("search rate limited, retry in {retry_after:?}")]
    RateLimited { retry_after: Duration },
    #[error("search API key rejected")]
    Unauthorized,
    #[error("search API returned status {0}")]
    Status(u16),
    #[error("search request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("malformed search response: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Sliding-window limiter: at most `max` acquisitions in any `window`.
#[derive(Debug)]
pub struct RateLimiter {
    max: usize,
    window: Duration,
    sent: VecDeque<Instant>,
}

impl RateLimiter {
    pub fn new(max: usize, window: Duration) -> Self {
        Self {
            max,
            window,
            sent: VecDeque::new(),
        }
    }

    /// Take a slot, or return how long until one frees up.
    pub fn try_acquire(&mut self, now: Instant) -> Result<(), Duration> {
        while let Some(&t) = self.sent.front() {
            if now.saturating_duration_since(t) >= self.window {
                self.sent.pop_front();
            } else {
                break;
            }
        }
        if self.sent.len() < self.max {
            self.sent.push_back(now);
            return Ok(());
        }
        Err(self
            .sent
            .front()
            .map(|t| self.window.saturating_sub(now.saturating_duration_since(*t)))
            .unwrap_or(self.window))
    }
}

/// Bounded TTL cache. When full, the oldest entry is evicted.
#[derive(Debug)]
pub struct ResponseCache {
    ttl: Duration,
    capacity: usize,
    entries: HashMap<String, (Instant, Vec<QueueCandidate>)>,
}

impl ResponseCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity,
            entries: HashMap::new(),
        }
    }

    pub fn get(&mut self, key: &str, now: Instant) -> Option<Vec<QueueCandidate>> {
        let fresh = match self.entries.get(key) {
            Some((at, _)) => now.saturating_duration_since(*at) < self.ttl,
            None => return None,
        };
        if !fresh {
            self.entries.remove(key);
            return None;
        }
        self.entries.get(key).map(|(_, v)| v.clone())
    }

    pub fn insert(&mut self, key: String, value: Vec<QueueCandidate>, now: Instant) {
        if self.capacity == 0 {
            return;
        }
        let ttl = self.ttl;
        self.entries
            .retain(|_, (at, _)| now.saturating_duration_since(*at) < ttl);
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&key) {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, (at, _))| *at)
                .map(|(k, _)| k.clone());
            if let Some(k) = oldest {
                self.entries.remove(&k);
            }
        }
        self.entries.insert(key, (now, value));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Cache key: lowercase, whitespace collapsed.
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Deserialize)]
struct SearchResult {
    id: u64,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    poster_path: Option<String>,
    #[serde(default)]
    release_date: Option<String>,
}

/// Map a `/search/movie` response body to queue candidates. Untitled entries are skipped.
pub fn parse_results(body: &str) -> Result<Vec<QueueCandidate>, serde_json::Error> {
    let resp: SearchResponse = serde_json::from_str(body)?;
    Ok(resp
        .results
        .into_iter()
        .filter_map(|r| {
            let title = r.title.filter(|t| !t.trim().is_empty())?;
            Some(QueueCandidate {
                tmdb_id: r.id,
                media_type: MediaType::Movie,
                title,
                poster: r.poster_path.map(|p| format!("{}{}", POSTER_BASE_URL, p)),
                year: r
                    .release_date
                    .as_deref()
                    .and_then(|d| d.get(..4))
                    .and_then(|y| y.parse().ok()),
            })
        })
        .collect())
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct MovieSearch {
    client: reqwest::Client,
    config: SearchConfig,
    limiter: Mutex<RateLimiter>,
    cache: Mutex<ResponseCache>,
}

impl MovieSearch {
    pub fn new(config: SearchConfig) -> Result<Self, SearchError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            limiter: Mutex::new(RateLimiter::new(config.max_requests, config.window)),
            cache: Mutex::new(ResponseCache::new(config.cache_ttl, config.cache_capacity)),
            config,
        })
    }

    /// Search movies by title. Blank queries return nothing without a request.
    pub async fn search(&self, query: &str) -> Result<Vec<QueueCandidate>, SearchError> {
        let key = normalize_query(query);
        if key.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(hit) = lock(&self.cache).get(&key, Instant::now()) {
            debug!(query = %key, results = hit.len(), "search cache hit");
            return Ok(hit);
        }
        lock(&self.limiter)
            .try_acquire(Instant::now())
            .map_err(|retry_after| SearchError::RateLimited { retry_after })?;

        let url = format!("{}/search/movie", self.config.base_url.trim_end_matches('/'));
        let mut req = self
            .client
            .get(url)
            .query(&[("query", query.trim()), ("include_adult", "false")]);
        if let Some(key) = &self.config.api_key {
            req = req.query(&[("api_key", key.as_str())]);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(SearchError::Unauthorized);
        }
        if !status.is_success() {
            return Err(SearchError::Status(status.as_u16()));
        }
        let body = resp.text().await?;
        let results = parse_results(&body)?;
        debug!(query = %key, results = results.len(), "search completed");
        lock(&self.cache).insert(key, results.clone(), Instant::now());
        Ok(results)
    }
}
