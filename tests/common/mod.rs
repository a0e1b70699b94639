use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use hn_cache_proxy::config::FetchSettings;
use hn_cache_proxy::error::{FetchError, FetchResult};
use hn_cache_proxy::fetcher::{now_unix, Fetcher};
use hn_cache_proxy::hn_client::HnApi;
use hn_cache_proxy::server;

/// In-memory stand-in for the Firebase API.
#[derive(Default)]
pub struct FakeHn {
    ids: Mutex<Option<Vec<u64>>>,
    items: Mutex<HashMap<u64, Value>>,
    broken: Mutex<HashSet<u64>>,
}

#[allow(dead_code)]
impl FakeHn {
    pub fn with_ranking(self, ids: &[u64]) -> Self {
        *self.ids.lock().unwrap() = Some(ids.to_vec());
        self
    }

    pub fn with_item(self, item: Value) -> Self {
        let id = item["id"].as_u64().expect("items need an id");
        self.items.lock().unwrap().insert(id, item);
        self
    }

    pub fn break_item(&self, id: u64) {
        self.broken.lock().unwrap().insert(id);
    }
}

#[async_trait]
impl HnApi for FakeHn {
    async fn top_story_ids(&self) -> FetchResult<Vec<u64>> {
        self.ids.lock().unwrap().clone().ok_or(FetchError::Status {
            status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
            url: "fake://topstories.json".into(),
        })
    }

    async fn item(&self, id: u64) -> FetchResult<Option<Value>> {
        if self.broken.lock().unwrap().contains(&id) {
            return Err(FetchError::Status {
                status: reqwest::StatusCode::BAD_GATEWAY,
                url: format!("fake://item/{}.json", id),
            });
        }
        Ok(self.items.lock().unwrap().get(&id).cloned())
    }
}

#[allow(dead_code)]
pub fn story(id: u64, title: &str, hours_old: i64, kids: &[u64]) -> Value {
    json!({
        "id": id,
        "type": "story",
        "by": "alice",
        "title": title,
        "url": format!("https://example.com/{}", id),
        "score": 100,
        "time": now_unix() - hours_old * 3600,
        "kids": kids,
        "descendants": kids.len(),
    })
}

#[allow(dead_code)]
pub fn comment(id: u64, text: &str, kids: &[u64]) -> Value {
    json!({
        "id": id,
        "type": "comment",
        "by": "bob",
        "text": text,
        "time": now_unix() - 60,
        "kids": kids,
    })
}

/// Starts the real router on an ephemeral port and returns its base url.
pub async fn spawn_app(api: FakeHn) -> (String, Fetcher) {
    let fetcher = Fetcher::with_fresh_cache(std::sync::Arc::new(api), FetchSettings::default());
    let app = server::router(fetcher.clone(), "public");

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server::serve(listener, app, std::future::pending()));

    (format!("http://{}", addr), fetcher)
}
