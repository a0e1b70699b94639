use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{join_all, BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::cache::{self, CacheStore, SharedCache};
use crate::config::FetchSettings;
use crate::error::{FetchError, FetchResult};
use crate::hn_client::HnApi;
use crate::models::{Comment, CommentThread, Story};

pub const ALL_STORIES_KEY: &str = "all-stories";

pub fn comments_key(story_id: u64) -> String {
    format!("comments-{}", story_id)
}

/// Sits between the routes and the upstream API: checks the cache, fetches
/// on a miss, stores the result and falls back to stale data on failure.
#[derive(Clone)]
pub struct Fetcher {
    api: Arc<dyn HnApi>,
    cache: SharedCache,
    settings: Arc<FetchSettings>,
    // Caps in-flight item requests across every batch and comment tree
    limiter: Arc<Semaphore>,
}

impl Fetcher {
    pub fn new(api: Arc<dyn HnApi>, cache: SharedCache, settings: FetchSettings) -> Self {
        let permits = settings.max_concurrent_requests.max(1);
        Self {
            api,
            cache,
            settings: Arc::new(settings),
            limiter: Arc::new(Semaphore::new(permits)),
        }
    }

    /// Builds a fetcher with its own empty cache sized from `settings`.
    pub fn with_fresh_cache(api: Arc<dyn HnApi>, settings: FetchSettings) -> Self {
        let cache = CacheStore::new(settings.max_cache_entries, settings.cache_ttl).shared();
        Self::new(api, cache, settings)
    }

    pub fn cache(&self) -> &SharedCache {
        &self.cache
    }

    pub fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    /// Ranked top stories. Never fails: on upstream trouble this returns the
    /// last cached list (however old) or an empty one.
    pub async fn all_stories(&self) -> Vec<Story> {
        if let Some(stories) = self.cached::<Vec<Story>>(ALL_STORIES_KEY, true) {
            debug!(count = stories.len(), "cache hit for all stories");
            return stories;
        }
        self.refresh_stories().await
    }

    /// Like [`all_stories`](Self::all_stories) but skips the freshness
    /// check, so the list is refetched even while the cached one is fresh.
    pub async fn refresh_stories(&self) -> Vec<Story> {
        info!("fetching fresh stories");
        match self.fetch_fresh_stories().await {
            Ok(stories) => {
                info!(count = stories.len(), "fetched valid stories");
                self.store(ALL_STORIES_KEY, &stories);
                stories
            }
            Err(err) => {
                error!(error = %err, "error fetching stories");
                match self.cached::<Vec<Story>>(ALL_STORIES_KEY, false) {
                    Some(stale) => {
                        warn!(count = stale.len(), "returning stale cached stories");
                        stale
                    }
                    None => Vec::new(),
                }
            }
        }
    }

    async fn fetch_fresh_stories(&self) -> FetchResult<Vec<Story>> {
        let settings = &self.settings;
        let ids = deadline("top stories", settings.list_timeout, self.api.top_story_ids()).await?;
        let ids = &ids[..ids.len().min(settings.max_stories)];

        let mut stories = Vec::with_capacity(ids.len());
        for (n, batch) in ids.chunks(settings.batch_size.max(1)).enumerate() {
            if n > 0 {
                tokio::time::sleep(settings.batch_pause).await;
            }
            let results = join_all(batch.iter().map(|&id| self.story_or_none(id))).await;
            stories.extend(results.into_iter().flatten());
        }

        stories.retain(|story| story.title.as_deref().is_some_and(|t| !t.is_empty()));
        Ok(stories)
    }

    // A failed item inside a batch is dropped; it never fails the batch
    async fn story_or_none(&self, id: u64) -> Option<Story> {
        let result = self
            .fetch_item(id, self.settings.item_timeout)
            .await
            .and_then(|raw| match raw {
                Some(raw) => Ok(Some(serde_json::from_value::<Story>(raw)?)),
                None => Ok(None),
            });

        match result {
            Ok(story) => story,
            Err(err) => {
                warn!(story_id = id, error = %err, "failed to fetch story");
                None
            }
        }
    }

    /// A story with its whole comment tree. Falls back to a stale cached
    /// thread when the story itself can't be fetched; without one the
    /// error is returned.
    pub async fn comments_for_story(&self, story_id: u64) -> FetchResult<CommentThread> {
        if let Some(thread) = self.cached::<CommentThread>(&comments_key(story_id), true) {
            debug!(story_id, "cache hit for comments");
            return Ok(thread);
        }
        self.refresh_comments(story_id).await
    }

    /// Refetches a thread regardless of the cached copy's age. The stale
    /// fallback still applies.
    pub async fn refresh_comments(&self, story_id: u64) -> FetchResult<CommentThread> {
        let key = comments_key(story_id);
        info!(story_id, "fetching fresh comments");
        match self.fetch_fresh_thread(story_id).await {
            Ok(thread) => {
                self.store(&key, &thread);
                Ok(thread)
            }
            Err(err) => {
                error!(story_id, error = %err, "error fetching comments");
                match self.cached::<CommentThread>(&key, false) {
                    Some(stale) => {
                        warn!(story_id, "returning stale cached comments");
                        Ok(stale)
                    }
                    None => Err(err),
                }
            }
        }
    }

    async fn fetch_fresh_thread(&self, story_id: u64) -> FetchResult<CommentThread> {
        let raw = self
            .fetch_item(story_id, self.settings.story_timeout)
            .await?
            .ok_or(FetchError::NotFound(story_id))?;
        let story: Story = serde_json::from_value(raw)?;

        if story.kids.is_empty() {
            return Ok(CommentThread {
                story,
                comments: Vec::new(),
            });
        }

        let comments = self.resolve_comments(&story.kids).await;
        debug!(
            story_id,
            top_level = comments.len(),
            total = Comment::count_total(&comments),
            "resolved comment tree"
        );
        Ok(CommentThread { story, comments })
    }

    /// Resolves every id concurrently, keeps their order and drops the ones
    /// that failed.
    async fn resolve_comments(&self, ids: &[u64]) -> Vec<Comment> {
        join_all(ids.iter().map(|&id| self.resolve_comment(id)))
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    fn resolve_comment(&self, id: u64) -> BoxFuture<'_, Option<Comment>> {
        async move {
            let mut comment = match self.fetch_comment(id).await {
                Ok(comment) => comment,
                Err(err) => {
                    warn!(comment_id = id, error = %err, "failed to fetch comment");
                    return None;
                }
            };

            if !comment.kids.is_empty() {
                comment.children = self.resolve_comments(&comment.kids).await;
            }
            Some(comment)
        }
        .boxed()
    }

    async fn fetch_comment(&self, id: u64) -> FetchResult<Comment> {
        let raw = self
            .fetch_item(id, self.settings.item_timeout)
            .await?
            .ok_or(FetchError::NotFound(id))?;
        Ok(serde_json::from_value(raw)?)
    }

    // The permit is held for the request only, never while children resolve.
    // Waiting for it is bounded by `permit_wait`, the request by `limit`.
    async fn fetch_item(&self, id: u64, limit: Duration) -> FetchResult<Option<Value>> {
        let wait = self.settings.permit_wait;
        let _permit = match tokio::time::timeout(wait, self.limiter.acquire()).await {
            Ok(permit) => permit.ok(),
            Err(_) => {
                return Err(FetchError::Timeout {
                    what: format!("permit for item {}", id),
                    after: wait,
                })
            }
        };
        deadline(format!("item {}", id), limit, self.api.item(id)).await
    }

    /// One warming pass: refetches the story list, then the comment trees
    /// of the popular stories, whether or not the cached copies are still
    /// fresh. Returns how many threads were cached.
    pub async fn warm(&self) -> usize {
        let stories = self.refresh_stories().await;
        info!(count = stories.len(), "stories cache refreshed");
        self.precache_from(&stories).await
    }

    async fn precache_from(&self, stories: &[Story]) -> usize {
        let popular = popular_stories(
            stories,
            self.settings.precache_window,
            self.settings.precache_top,
            now_unix(),
        );
        info!(count = popular.len(), "pre-caching comments for popular stories");

        let mut cached = 0;
        for story in popular {
            match self.refresh_comments(story.id).await {
                Ok(_) => cached += 1,
                Err(err) => {
                    warn!(story_id = story.id, error = %err, "failed to pre-cache comments");
                }
            }
            tokio::time::sleep(self.settings.precache_pause).await;
        }

        info!(cached, "pre-caching completed");
        cached
    }

    fn cached<T: DeserializeOwned>(&self, key: &str, fresh_only: bool) -> Option<T> {
        let entry = {
            let store = cache::lock(&self.cache);
            if fresh_only {
                store.get_fresh(key)
            } else {
                store.get(key)
            }
        }?;

        match <T as Deserialize>::deserialize(entry.data.as_ref()) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(key, error = %err, "ignoring undecodable cache entry");
                None
            }
        }
    }

    fn store<T: Serialize>(&self, key: &str, value: &T) {
        match serde_json::to_value(value) {
            Ok(data) => cache::lock(&self.cache).put(key, data),
            Err(err) => warn!(key, error = %err, "could not cache value"),
        }
    }
}

async fn deadline<T>(
    what: impl Into<String>,
    after: Duration,
    request: impl Future<Output = FetchResult<T>>,
) -> FetchResult<T> {
    match tokio::time::timeout(after, request).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Timeout {
            what: what.into(),
            after,
        }),
    }
}

pub fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Stories published within `window` of `now`, original order kept.
pub fn published_within(stories: &[Story], window: Duration, now: i64) -> Vec<Story> {
    let cutoff = now - window.as_secs() as i64;
    stories
        .iter()
        .filter(|story| story.time > cutoff)
        .cloned()
        .collect()
}

/// The `top` best scored stories published within `window`.
pub fn popular_stories(stories: &[Story], window: Duration, top: usize, now: i64) -> Vec<Story> {
    let mut recent = published_within(stories, window, now);
    recent.sort_by(|a, b| b.score.cmp(&a.score));
    recent.truncate(top);
    recent
}
