use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::info;

use crate::fetcher::Fetcher;

/// Keeps the cache warm: one pass shortly after startup, then one every
/// refresh interval so the story list is refreshed before it goes stale.
/// The returned handle is aborted on shutdown.
pub fn spawn(fetcher: Fetcher) -> JoinHandle<()> {
    tokio::spawn(run(fetcher))
}

async fn run(fetcher: Fetcher) {
    let settings = fetcher.settings().clone();
    let interval = settings.refresh_interval();

    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    time::sleep(settings.startup_delay).await;
    let cached = fetcher.warm().await;
    info!(cached, "initial cache warming completed");

    loop {
        ticker.tick().await;
        info!("refreshing stories cache");
        let cached = fetcher.warm().await;
        info!(cached, next_in = ?interval, "cache refresh finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FetchSettings;
    use crate::error::{FetchError, FetchResult};
    use crate::hn_client::HnApi;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Ranks a single story. Optionally the first ranking call fails, and
    /// every item takes `latency` to arrive.
    struct CountingHn {
        ranking_calls: AtomicUsize,
        fail_first: bool,
        latency: Duration,
    }

    impl CountingHn {
        fn new(fail_first: bool, latency: Duration) -> Arc<Self> {
            Arc::new(Self {
                ranking_calls: AtomicUsize::new(0),
                fail_first,
                latency,
            })
        }
    }

    #[async_trait]
    impl HnApi for CountingHn {
        async fn top_story_ids(&self) -> FetchResult<Vec<u64>> {
            let n = self.ranking_calls.fetch_add(1, Ordering::SeqCst);
            if n == 0 && self.fail_first {
                Err(FetchError::NotFound(0))
            } else {
                Ok(vec![1])
            }
        }

        async fn item(&self, id: u64) -> FetchResult<Option<Value>> {
            time::sleep(self.latency).await;
            Ok(Some(json!({
                "id": id,
                "title": "warm",
                "score": 1,
                "time": crate::fetcher::now_unix(),
                "kids": []
            })))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn warms_after_startup_and_every_interval() {
        let api = CountingHn::new(true, Duration::ZERO);
        let fetcher = Fetcher::with_fresh_cache(api.clone(), FetchSettings::default());
        let handle = spawn(fetcher.clone());

        time::sleep(Duration::from_millis(500)).await;
        assert_eq!(api.ranking_calls.load(Ordering::SeqCst), 0);

        // first warm fails upstream, the task keeps going
        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(api.ranking_calls.load(Ordering::SeqCst), 1);
        assert!(crate::cache::lock(fetcher.cache()).is_empty());

        time::sleep(Duration::from_secs(300)).await;
        assert_eq!(api.ranking_calls.load(Ordering::SeqCst), 2);
        {
            let store = crate::cache::lock(fetcher.cache());
            assert!(store.get("all-stories").is_some());
            assert!(store.get("comments-1").is_some());
        }

        assert!(!handle.is_finished());
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_pass_refreshes_entries_that_are_still_fresh() {
        let api = CountingHn::new(false, Duration::from_secs(2));
        let fetcher = Fetcher::with_fresh_cache(api.clone(), FetchSettings::default());
        let handle = spawn(fetcher.clone());

        // startup entries are written by t=5s and expire by t=305s
        time::sleep(Duration::from_secs(310)).await;
        assert_eq!(api.ranking_calls.load(Ordering::SeqCst), 2);
        {
            let store = crate::cache::lock(fetcher.cache());
            assert!(store.get_fresh("all-stories").is_some());
            assert!(store.get_fresh("comments-1").is_some());
        }

        handle.abort();
    }
}
