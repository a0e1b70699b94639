use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A story as returned by the item endpoint. Fields we don't look at are
/// carried through untouched so the views can use them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Story {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub time: i64,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub kids: Vec<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Story {
    pub fn url(&self) -> Option<&str> {
        self.extra.get("url").and_then(Value::as_str)
    }

    pub fn by(&self) -> Option<&str> {
        self.extra.get("by").and_then(Value::as_str)
    }

    pub fn descendants(&self) -> i64 {
        self.extra
            .get("descendants")
            .and_then(Value::as_i64)
            .unwrap_or(self.kids.len() as i64)
    }

    pub fn text(&self) -> Option<&str> {
        self.extra.get("text").and_then(Value::as_str)
    }

    // Host part of the url, without a leading "www."
    pub fn domain(&self) -> Option<&str> {
        let url = self.url()?;
        let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
        let host = rest.split(['/', '?', '#']).next()?;
        let host = host.strip_prefix("www.").unwrap_or(host);
        if host.is_empty() {
            None
        } else {
            Some(host)
        }
    }
}

/// A comment with its resolved replies. `children` is filled in by the
/// fetcher; upstream only knows about `kids`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Comment {
    pub id: u64,
    #[serde(default)]
    pub kids: Vec<u64>,
    #[serde(default)]
    pub children: Vec<Comment>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Comment {
    pub fn by(&self) -> Option<&str> {
        self.extra.get("by").and_then(Value::as_str)
    }

    pub fn text(&self) -> Option<&str> {
        self.extra.get("text").and_then(Value::as_str)
    }

    pub fn time(&self) -> i64 {
        self.extra.get("time").and_then(Value::as_i64).unwrap_or(0)
    }

    pub fn is_deleted(&self) -> bool {
        let flag = |name: &str| self.extra.get(name).and_then(Value::as_bool).unwrap_or(false);
        flag("deleted") || flag("dead")
    }

    pub fn count_total(comments: &[Comment]) -> usize {
        comments
            .iter()
            .map(|c| 1 + Self::count_total(&c.children))
            .sum()
    }
}

/// What gets cached under `comments-<id>`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommentThread {
    pub story: Story,
    pub comments: Vec<Comment>,
}

/// Renders a unix timestamp the way the HN front page does ("3 hours ago").
pub fn time_ago(unix_secs: i64, now_secs: i64) -> String {
    let elapsed = (now_secs - unix_secs).max(0);
    let (amount, unit) = match elapsed {
        s if s < 60 => return "just now".to_string(),
        s if s < 3600 => (s / 60, "minute"),
        s if s < 86_400 => (s / 3600, "hour"),
        s => (s / 86_400, "day"),
    };
    if amount == 1 {
        format!("1 {} ago", unit)
    } else {
        format!("{} {}s ago", amount, unit)
    }
}
