use std::fmt::Write as _;

use html_escape::{encode_double_quoted_attribute, encode_text};
use lazy_static::lazy_static;
use regex::{Captures, Regex};

use crate::models::{time_ago, Comment, CommentThread, Story};

pub const DEFAULT_FILTER: &str = "top-20";
const FILTERS: &[(&str, &str)] = &[
    ("top-10", "Top 10"),
    ("top-20", "Top 20"),
    ("top-50", "Top 50"),
    ("all", "All"),
];

lazy_static! {
    static ref TAG: Regex = Regex::new(r"<(/?)([a-zA-Z][a-zA-Z0-9]*)([^<>]*)>").unwrap();
    static ref HREF: Regex = Regex::new(r#"href\s*=\s*"([^"]*)""#).unwrap();
}

fn page(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{title}</title>
<link rel="stylesheet" href="/static/styles.css">
</head>
<body>
<header><a class="brand" href="/">HN Top Stories</a></header>
<main>
{body}
</main>
</body>
</html>
"#,
        title = encode_text(title),
        body = body,
    )
}

/// Front page. `filter` is handed to the page as-is (escaped) and the inline
/// script applies it to the list.
pub fn render_index(stories: &[Story], filter: &str, now: i64) -> String {
    let mut body = String::new();

    body.push_str(r#"<nav class="filters">"#);
    for (value, label) in FILTERS {
        let class = if *value == filter { "filter active" } else { "filter" };
        let _ = write!(
            body,
            r#"<a class="{}" href="/?filter={}">{}</a>"#,
            class,
            urlencoding::encode(value),
            label
        );
    }
    body.push_str("</nav>\n");

    let _ = writeln!(
        body,
        r#"<ol id="stories" data-filter="{}">"#,
        encode_double_quoted_attribute(filter)
    );
    for story in stories {
        story_item(&mut body, story, now);
    }
    body.push_str("</ol>\n");

    if stories.is_empty() {
        body.push_str(r#"<p class="empty">No stories available right now. Try again in a minute.</p>"#);
    }

    let _ = writeln!(
        body,
        r#"<script id="all-stories" type="application/json">{}</script>"#,
        embed_json(stories)
    );
    body.push_str(FILTER_SCRIPT);

    page("Hacker News Top Stories", &body)
}

fn story_item(out: &mut String, story: &Story, now: i64) {
    let title = story.title.as_deref().unwrap_or_default();
    let link = story
        .url()
        .filter(|url| is_http_url(url))
        .map(str::to_string)
        .unwrap_or_else(|| format!("/comments/{}", story.id));

    let _ = write!(
        out,
        r#"<li class="story" data-score="{score}"><a class="title" href="{link}">{title}</a>"#,
        score = story.score,
        link = encode_double_quoted_attribute(&link),
        title = encode_text(title),
    );
    if let Some(domain) = story.domain() {
        let _ = write!(out, r#" <span class="domain">({})</span>"#, encode_text(domain));
    }
    let _ = writeln!(
        out,
        r#"<div class="meta">{score} points by {by} {ago} | <a href="/comments/{id}">{comments} comments</a></div></li>"#,
        score = story.score,
        by = encode_text(story.by().unwrap_or("unknown")),
        ago = time_ago(story.time, now),
        id = story.id,
        comments = story.descendants(),
    );
}

const FILTER_SCRIPT: &str = r#"<script>
(function () {
  var list = document.getElementById('stories');
  var m = /^top-(\d+)$/.exec(list.dataset.filter || '');
  if (!m) return;
  var limit = parseInt(m[1], 10);
  Array.prototype.forEach.call(list.children, function (li, i) {
    if (i >= limit) li.hidden = true;
  });
})();
</script>
"#;

// Keeps the JSON inert inside a <script> block
fn embed_json(stories: &[Story]) -> String {
    serde_json::to_string(stories)
        .unwrap_or_else(|_| "[]".to_string())
        .replace('<', "\\u003c")
        .replace('>', "\\u003e")
        .replace('&', "\\u0026")
}

pub fn render_comments(thread: &CommentThread, now: i64) -> String {
    let story = &thread.story;
    let title = story.title.as_deref().unwrap_or("Untitled");
    let mut body = String::new();

    let _ = write!(body, r#"<article class="story" id="story-{}">"#, story.id);
    match story.url().filter(|url| is_http_url(url)) {
        Some(url) => {
            let _ = write!(
                body,
                r#"<h1><a href="{}">{}</a></h1>"#,
                encode_double_quoted_attribute(url),
                encode_text(title)
            );
        }
        None => {
            let _ = write!(body, "<h1>{}</h1>", encode_text(title));
        }
    }
    let _ = write!(
        body,
        r#"<div class="meta">{} points by {} {} | {} comments</div>"#,
        story.score,
        encode_text(story.by().unwrap_or("unknown")),
        time_ago(story.time, now),
        Comment::count_total(&thread.comments),
    );
    if let Some(text) = story.text() {
        let _ = write!(body, r#"<div class="text">{}</div>"#, sanitize_comment(text));
    }
    body.push_str("</article>\n");

    if thread.comments.is_empty() {
        body.push_str(r#"<p class="empty">No comments yet.</p>"#);
    } else {
        body.push_str(r#"<ul class="comments">"#);
        for comment in &thread.comments {
            comment_item(&mut body, comment, now);
        }
        body.push_str("</ul>\n");
    }

    page(title, &body)
}

fn comment_item(out: &mut String, comment: &Comment, now: i64) {
    let _ = write!(out, r#"<li class="comment" id="c{}">"#, comment.id);
    if comment.is_deleted() {
        out.push_str(r#"<div class="meta">[deleted]</div>"#);
    } else {
        let _ = write!(
            out,
            r#"<div class="meta">{} {}</div><div class="text">{}</div>"#,
            encode_text(comment.by().unwrap_or("unknown")),
            time_ago(comment.time(), now),
            sanitize_comment(comment.text().unwrap_or_default()),
        );
    }
    if !comment.children.is_empty() {
        out.push_str(r#"<ul class="replies">"#);
        for child in &comment.children {
            comment_item(out, child, now);
        }
        out.push_str("</ul>");
    }
    out.push_str("</li>\n");
}

pub fn render_error(error: &str, message: &str) -> String {
    let body = format!(
        r#"<section class="error"><h1>{}</h1><p>{}</p><p><a href="/">Back to stories</a></p></section>"#,
        encode_text(error),
        encode_text(message)
    );
    page(error, &body)
}

fn is_http_url(url: &str) -> bool {
    let lower = url.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Upstream comment bodies are HTML. Only the handful of tags HN itself
/// emits survive (links only with an http(s) target); everything else,
/// text included, is re-escaped.
pub fn sanitize_comment(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut last = 0;

    for caps in TAG.captures_iter(html) {
        let Some(whole) = caps.get(0) else { continue };
        push_text(&mut out, &html[last..whole.start()]);
        match allowed_tag(&caps) {
            Some(tag) => out.push_str(&tag),
            None => push_text(&mut out, whole.as_str()),
        }
        last = whole.end();
    }
    push_text(&mut out, &html[last..]);
    out
}

fn push_text(out: &mut String, text: &str) {
    let decoded = html_escape::decode_html_entities(text);
    out.push_str(&encode_text(&decoded));
}

fn allowed_tag(caps: &Captures<'_>) -> Option<String> {
    let closing = !caps[1].is_empty();
    let name = caps[2].to_ascii_lowercase();

    match (name.as_str(), closing) {
        ("p" | "i" | "pre" | "code", false) => Some(format!("<{}>", name)),
        ("i" | "pre" | "code" | "a", true) => Some(format!("</{}>", name)),
        ("p", true) => Some(String::new()),
        ("a", false) => {
            let href = HREF.captures(&caps[3])?;
            let href = html_escape::decode_html_entities(&href[1]).into_owned();
            if !is_http_url(&href) {
                return None;
            }
            Some(format!(
                r#"<a href="{}" rel="nofollow noopener">"#,
                encode_double_quoted_attribute(&href)
            ))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn story(value: serde_json::Value) -> Story {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn keeps_hn_markup() {
        let text = r#"I&#x27;d say <i>yes</i>.<p>See <a href="https:&#x2F;&#x2F;example.com&#x2F;a?b=1&amp;c=2" rel="nofollow">this</a><p><pre><code>  x &lt; y</code></pre>"#;
        let clean = sanitize_comment(text);
        assert_eq!(
            clean,
            "I'd say <i>yes</i>.<p>See <a href=\"https://example.com/a?b=1&amp;c=2\" rel=\"nofollow noopener\">this</a><p><pre><code>  x &lt; y</code></pre>"
        );
    }

    #[test]
    fn escapes_everything_else() {
        let clean = sanitize_comment(r#"<script>alert(1)</script><img src=x onerror=alert(1)>"#);
        assert!(!clean.contains("<script"));
        assert!(!clean.contains("<img"));
        assert!(clean.contains("&lt;script&gt;"));
    }

    #[test]
    fn drops_non_http_links() {
        let clean = sanitize_comment(r#"<a href="javascript:alert(1)">x</a>"#);
        assert!(!clean.contains("<a href"));
    }

    #[test]
    fn index_escapes_filter_and_titles() {
        let stories = vec![story(json!({
            "id": 1, "title": "<b>Bold</b> & more", "time": 100, "score": 5,
            "by": "alice", "url": "https://www.example.com/x"
        }))];
        let html = render_index(&stories, r#""><script>x</script>"#, 200);

        assert!(html.contains("&lt;b&gt;Bold&lt;/b&gt; &amp; more"));
        assert!(html.contains(r#"data-filter="&quot;"#));
        assert!(!html.contains("<script>x</script>"));
        assert!(html.contains("(example.com)"));
        assert!(!html.contains("<b>Bold"));
    }

    #[test]
    fn embedded_json_cannot_close_the_script() {
        let stories = vec![story(json!({"id": 1, "title": "</script><script>alert(1)</script>"}))];
        let json = embed_json(&stories);
        assert!(!json.contains("</script>"));
        let decoded: Vec<Story> = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded[0].title.as_deref(), Some("</script><script>alert(1)</script>"));
    }

    #[test]
    fn comments_page_nests_replies() {
        let thread = CommentThread {
            story: story(json!({"id": 1, "title": "Ask HN", "text": "Question?", "kids": [2]})),
            comments: vec![Comment {
                id: 2,
                kids: vec![3],
                children: vec![serde_json::from_value(json!({"id": 3, "deleted": true})).unwrap()],
                extra: json!({"by": "bob", "text": "answer", "time": 0})
                    .as_object()
                    .cloned()
                    .unwrap(),
            }],
        };
        let html = render_comments(&thread, 0);

        assert!(html.contains("<h1>Ask HN</h1>"));
        assert!(html.contains(r#"<li class="comment" id="c2">"#));
        assert!(html.contains(r#"<ul class="replies"><li class="comment" id="c3"><div class="meta">[deleted]</div>"#));
        assert!(html.contains("2 comments"));
    }

    #[test]
    fn error_page_is_escaped() {
        let html = render_error("Story not found", "<nope>");
        assert!(html.contains("<h1>Story not found</h1>"));
        assert!(html.contains("&lt;nope&gt;"));
    }
}
