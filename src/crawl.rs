//! Web scraping with readable-content extraction.
//!
//! Fetches pages with retry and exponential back-off, strips boilerplate
//! (nav, sidebars, ads) via tag and class heuristics, keeps heading
//! hierarchy as inline `[H2]`-style markers, and optionally follows
//! same-domain links breadth-first up to a page limit.

use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use scraper::{ElementRef, Html, Node, Selector};
use url::Url;

use crate::chunk::chunk_text;

const FETCH_TIMEOUT: Duration = Duration::from_secs(20);
const MAX_RETRIES: u32 = 3;

/// Tags that are almost never useful content.
const NOISE_TAGS: &[&str] = &[
    "script", "style", "nav", "footer", "header", "aside", "form", "button", "iframe",
    "noscript", "svg", "figure", "figcaption", "menu", "menuitem",
];

static NOISE_CLASSES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        "(?i)sidebar|widget|breadcrumb|pagination|comment|share|social|\
         advertisement|ad-|related|newsletter|popup|modal|cookie|banner",
    )
    .expect("noise class pattern is valid")
});

/// Link targets that are media or assets, not pages.
const SKIP_EXTENSIONS: &[&str] = &[
    ".png", ".jpg", ".jpeg", ".gif", ".svg", ".css", ".js", ".pdf",
];

/// Scrape `url` and return overlapping text chunks of its readable content.
///
/// With `follow_links`, same-domain links found on each page are crawled
/// breadth-first until `max_pages` pages have been visited. Fetch failures
/// on individual pages are logged and skipped.
pub async fn fetch_and_chunk(
    url: &str,
    chunk_size: usize,
    overlap: usize,
    follow_links: bool,
    max_pages: usize,
) -> Result<Vec<String>> {
    let client = build_client()?;

    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: Vec<String> = vec![url.to_string()];
    let mut all_chunks = Vec::new();

    while !queue.is_empty() && visited.len() < max_pages {
        let current = queue.remove(0);
        if !visited.insert(normalize_url(&current)) {
            continue;
        }

        let html = match fetch_html(&client, &current).await {
            Ok(html) => html,
            Err(e) => {
                tracing::warn!(url = %current, error = %e, "fetch failed, skipping page");
                continue;
            }
        };

        // Html is not Send; parse it in a scope with no await points
        let (text, links) = {
            let doc = Html::parse_document(&html);
            let links = if follow_links {
                match Url::parse(&current) {
                    Ok(base) => extract_links(&doc, &base),
                    Err(_) => Vec::new(),
                }
            } else {
                Vec::new()
            };
            (extract_content(&doc), links)
        };

        for link in links {
            if !visited.contains(&normalize_url(&link)) {
                queue.push(link);
            }
        }

        if text.trim().is_empty() {
            continue;
        }
        all_chunks.extend(chunk_text(&text, chunk_size, overlap, true));
    }

    tracing::info!(
        pages = visited.len(),
        chunks = all_chunks.len(),
        url,
        "crawl complete"
    );
    Ok(all_chunks)
}

fn build_client() -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_static(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
             (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
        ),
    );
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));

    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(FETCH_TIMEOUT)
        .build()
        .context("failed to build HTTP client")
}

/// GET with exponential back-off on transient errors (429 and 5xx).
async fn fetch_html(client: &reqwest::Client, url: &str) -> Result<String> {
    let mut last_error = None;

    for attempt in 1..=MAX_RETRIES {
        match client.get(url).send().await {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    return resp.text().await.context("failed to read response body");
                }
                let retryable = status.as_u16() == 429 || status.is_server_error();
                if retryable && attempt < MAX_RETRIES {
                    let wait = Duration::from_secs(1 << attempt);
                    tracing::warn!(url, %status, ?wait, "transient HTTP error, retrying");
                    tokio::time::sleep(wait).await;
                    last_error = Some(anyhow::anyhow!("HTTP {status} for {url}"));
                    continue;
                }
                anyhow::bail!("HTTP {status} for {url}");
            }
            Err(e) => {
                if attempt < MAX_RETRIES {
                    tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                    last_error = Some(e.into());
                    continue;
                }
                return Err(anyhow::Error::from(e).context(format!("request failed for {url}")));
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("request failed for {url}")))
}

/// Extract readable text: prefer `<article>` or `<main>`, fall back to
/// `<body>`. Headings become inline `[H1]`-style markers; consecutive
/// duplicate lines are collapsed.
fn extract_content(doc: &Html) -> String {
    let container = ["article", "main", "body"]
        .iter()
        .filter_map(|tag| {
            let selector = Selector::parse(tag).ok()?;
            doc.select(&selector).next()
        })
        .next();

    let Some(container) = container else {
        return String::new();
    };

    let mut lines = Vec::new();
    collect_lines(container, &mut lines);

    let mut deduped: Vec<String> = Vec::with_capacity(lines.len());
    for line in lines {
        if deduped.last().map(|l| l.as_str()) != Some(line.as_str()) {
            deduped.push(line);
        }
    }
    deduped.join("\n")
}

fn collect_lines(element: ElementRef<'_>, lines: &mut Vec<String>) {
    for child in element.children() {
        if let Some(child_element) = ElementRef::wrap(child) {
            let el = child_element.value();
            let name = el.name();
            if NOISE_TAGS.contains(&name) || is_noisy_element(el) {
                continue;
            }
            if matches!(name, "h1" | "h2" | "h3" | "h4" | "h5" | "h6") {
                let text = child_element
                    .text()
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .collect::<Vec<_>>()
                    .join(" ");
                if !text.is_empty() {
                    lines.push(format!("\n[{}] {}\n", name.to_uppercase(), text));
                }
                continue;
            }
            collect_lines(child_element, lines);
        } else if let Node::Text(text) = child.value() {
            let trimmed = text.trim();
            if trimmed.len() > 1 {
                lines.push(trimmed.to_string());
            }
        }
    }
}

fn is_noisy_element(el: &scraper::node::Element) -> bool {
    let classes = el.attr("class").unwrap_or("");
    let id = el.attr("id").unwrap_or("");
    NOISE_CLASSES.is_match(classes) || NOISE_CLASSES.is_match(id)
}

/// All same-domain http(s) links on the page, skipping asset URLs.
fn extract_links(doc: &Html, base: &Url) -> Vec<String> {
    let selector = match Selector::parse("a[href]") {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };

    doc.select(&selector)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| base.join(href).ok())
        .filter(|link| {
            matches!(link.scheme(), "http" | "https")
                && link.host_str() == base.host_str()
                && !SKIP_EXTENSIONS
                    .iter()
                    .any(|ext| link.path().to_lowercase().ends_with(ext))
        })
        .map(String::from)
        .collect()
}

/// Strip fragment and trailing slash so near-identical URLs dedup together.
fn normalize_url(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => {
            let host = parsed.host_str().unwrap_or_default();
            let path = parsed.path().trim_end_matches('/');
            format!("{}://{}{}", parsed.scheme(), host, path)
        }
        Err(_) => url.to_string(),
    }
}
