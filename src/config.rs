use std::env;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::cache::{DEFAULT_MAX_ENTRIES, DEFAULT_TTL};

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_API_BASE_URL: &str = "https://hacker-news.firebaseio.com/v0";

/// Process-level settings read from the environment (and `.env` if present).
#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub api_base_url: String,
    pub fetch: FetchSettings,
}

/// Tunables for fetching, caching and warming. These are fixed by default;
/// tests shrink them.
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub cache_ttl: Duration,
    pub max_cache_entries: usize,
    pub max_stories: usize,
    pub batch_size: usize,
    pub batch_pause: Duration,
    pub list_timeout: Duration,
    pub story_timeout: Duration,
    pub item_timeout: Duration,
    pub max_concurrent_requests: usize,
    pub permit_wait: Duration,
    // The index page and the pre-cache pass use separate windows
    pub recent_window: Duration,
    pub precache_window: Duration,
    pub precache_top: usize,
    pub precache_pause: Duration,
    pub startup_delay: Duration,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_TTL,
            max_cache_entries: DEFAULT_MAX_ENTRIES,
            max_stories: 1000,
            batch_size: 20,
            batch_pause: Duration::from_millis(100),
            list_timeout: Duration::from_secs(10),
            story_timeout: Duration::from_secs(10),
            item_timeout: Duration::from_secs(5),
            max_concurrent_requests: 32,
            permit_wait: Duration::from_secs(30),
            recent_window: days(7),
            precache_window: days(3),
            precache_top: 20,
            precache_pause: Duration::from_millis(200),
            startup_delay: Duration::from_secs(1),
        }
    }
}

impl FetchSettings {
    pub fn refresh_interval(&self) -> Duration {
        self.cache_ttl
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let port = match lookup("PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .with_context(|| format!("PORT must be a port number, got {:?}", raw))?,
            None => DEFAULT_PORT,
        };

        let api_base_url = lookup("HN_API_BASE_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());

        Ok(Self {
            port,
            api_base_url,
            fetch: FetchSettings::default(),
        })
    }
}

fn days(n: u64) -> Duration {
    Duration::from_secs(n * 24 * 60 * 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_env_is_empty() {
        let s = settings(&[]).unwrap();
        assert_eq!(s.port, 3000);
        assert_eq!(s.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(s.fetch.cache_ttl, Duration::from_millis(300_000));
        assert_eq!(s.fetch.max_cache_entries, 1000);
        assert_eq!(s.fetch.refresh_interval(), s.fetch.cache_ttl);
        assert_ne!(s.fetch.recent_window, s.fetch.precache_window);
    }

    #[test]
    fn reads_port_and_base_url() {
        let s = settings(&[("PORT", "8080"), ("HN_API_BASE_URL", "http://localhost:9000/v0/")]).unwrap();
        assert_eq!(s.port, 8080);
        assert_eq!(s.api_base_url, "http://localhost:9000/v0");
    }

    #[test]
    fn rejects_garbage_port() {
        let err = settings(&[("PORT", "eighty")]).unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }
}
