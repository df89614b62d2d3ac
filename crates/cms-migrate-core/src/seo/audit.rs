//! On-page SEO audit of rendered HTML.

use crate::network::{HttpRequest, ResilientClient};
use crate::validation::plain_text;
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

static TITLE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap());
static META: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<meta\b[^>]*>").unwrap());
static H1: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<h1\b[^>]*>(.*?)</h1>").unwrap());
static IMG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<img\b[^>]*>").unwrap());
static ANCHOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?is)<a\b[^>]*?\bhref\s*=\s*["']([^"']*)["']"#).unwrap());

static NAME_ATTR: LazyLock<Regex> = LazyLock::new(|| attribute_pattern("name"));
static CONTENT_ATTR: LazyLock<Regex> = LazyLock::new(|| attribute_pattern("content"));
static ALT_ATTR: LazyLock<Regex> = LazyLock::new(|| attribute_pattern("alt"));

fn attribute_pattern(name: &str) -> Regex {
    Regex::new(&format!(r#"(?is)\b{name}\s*=\s*["']([^"']*)["']"#)).unwrap()
}

fn attribute(tag: &str, pattern: &Regex) -> Option<String> {
    pattern.captures(tag).map(|caps| caps[1].trim().to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditLevel {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditFinding {
    pub level: AuditLevel,
    pub message: String,
    pub penalty: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageAudit {
    pub url: String,
    pub title: Option<String>,
    pub meta_description: Option<String>,
    pub h1: Vec<String>,
    pub images: usize,
    pub images_with_alt: usize,
    pub internal_links: usize,
    pub external_links: usize,
    pub findings: Vec<AuditFinding>,
    pub score: u32,
}

/// Extract on-page signals from `html` and score them out of 100.
pub fn audit_html(url: &str, html: &str) -> PageAudit {
    let title = TITLE
        .captures(html)
        .map(|caps| plain_text(&caps[1]))
        .filter(|t| !t.is_empty());

    let meta_description = META
        .find_iter(html)
        .map(|m| m.as_str())
        .find(|tag| attribute(tag, &NAME_ATTR).is_some_and(|n| n.eq_ignore_ascii_case("description")))
        .and_then(|tag| attribute(tag, &CONTENT_ATTR))
        .filter(|d| !d.is_empty());

    let h1: Vec<String> = H1.captures_iter(html).map(|caps| plain_text(&caps[1])).collect();

    let images: Vec<&str> = IMG.find_iter(html).map(|m| m.as_str()).collect();
    let images_with_alt = images
        .iter()
        .filter(|tag| attribute(tag, &ALT_ATTR).is_some_and(|alt| !alt.is_empty()))
        .count();

    let page = Url::parse(url).ok();
    let (mut internal_links, mut external_links) = (0, 0);
    for caps in ANCHOR.captures_iter(html) {
        let href = caps[1].trim();
        if href.is_empty() || href.starts_with('#') || has_non_web_scheme(href) {
            continue;
        }
        let resolved = match &page {
            Some(base) => base.join(href).ok(),
            None => Url::parse(href).ok(),
        };
        let internal = match (&page, &resolved) {
            (Some(base), Some(link)) => base.host_str() == link.host_str(),
            (None, None) => true,
            _ => false,
        };
        if internal {
            internal_links += 1;
        } else {
            external_links += 1;
        }
    }

    let mut findings = Vec::new();
    let mut finding = |level, penalty, message: String| {
        findings.push(AuditFinding { level, message, penalty });
    };

    match &title {
        None => finding(AuditLevel::Error, 20, "missing <title>".into()),
        Some(t) => {
            let len = t.chars().count();
            if !(30..=60).contains(&len) {
                finding(AuditLevel::Warning, 10, format!("title is {len} characters (30-60 recommended)"));
            }
        }
    }

    match &meta_description {
        None => finding(AuditLevel::Error, 15, "missing meta description".into()),
        Some(d) => {
            let len = d.chars().count();
            if !(120..=160).contains(&len) {
                finding(
                    AuditLevel::Warning,
                    8,
                    format!("meta description is {len} characters (120-160 recommended)"),
                );
            }
        }
    }

    match h1.len() {
        0 => finding(AuditLevel::Error, 15, "no <h1> heading".into()),
        1 => {}
        n => finding(AuditLevel::Warning, 5, format!("{n} <h1> headings (one recommended)")),
    }

    let missing_alt = images.len() - images_with_alt;
    if missing_alt > 0 {
        let penalty = (missing_alt as u32 * 2).min(10);
        finding(AuditLevel::Warning, penalty, format!("{missing_alt} images without alt text"));
    }

    if internal_links < 2 {
        finding(AuditLevel::Info, 5, format!("only {internal_links} internal links"));
    }

    let penalty: u32 = findings.iter().map(|f| f.penalty).sum();
    PageAudit {
        url: url.to_string(),
        title,
        meta_description,
        h1,
        images: images.len(),
        images_with_alt,
        internal_links,
        external_links,
        findings,
        score: 100u32.saturating_sub(penalty),
    }
}

fn has_non_web_scheme(href: &str) -> bool {
    let lower = href.to_ascii_lowercase();
    ["mailto:", "tel:", "javascript:", "data:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditFailure {
    pub url: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SiteAudit {
    pub pages: Vec<PageAudit>,
    pub failures: Vec<AuditFailure>,
    pub average_score: f64,
}

/// Fetch and audit at most `limit` pages, pausing `delay` between requests.
pub async fn audit_site(client: &ResilientClient, urls: &[String], limit: usize, delay: Duration) -> SiteAudit {
    let mut audit = SiteAudit::default();
    let selected = &urls[..urls.len().min(limit)];

    for (index, url) in selected.iter().enumerate() {
        if index > 0 && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match client.call(HttpRequest::get(url.clone())).await {
            Ok(response) => {
                let page = audit_html(url, &response.text());
                info!("Audited {} (score {})", url, page.score);
                audit.pages.push(page);
            }
            Err(e) => {
                warn!("Audit fetch failed for {}: {}", url, e);
                audit.failures.push(AuditFailure {
                    url: url.clone(),
                    message: e.to_string(),
                });
            }
        }
    }

    if !audit.pages.is_empty() {
        let total: u32 = audit.pages.iter().map(|p| p.score).sum();
        audit.average_score = f64::from(total) / audit.pages.len() as f64;
    }
    audit
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::testing::ScriptedTransport;
    use crate::network::{Auth, RetryPolicy};
    use std::sync::Arc;

    const GOOD_PAGE: &str = r#"<html><head>
<title>Flexible busbar installation guide for engineers</title>
<meta content="A practical guide to installing flexible busbars in switchgear, covering torque values, bending radius limits and insulation checks." name="description">
</head><body>
<h1>Installation guide</h1>
<img src="/a.jpg" alt="Busbar">
<a href="/en/products">Products</a>
<a href="https://www.example.com/en/contact">Contact</a>
<a href="https://partner.example.org/">Partner</a>
<a href="mailto:sales@example.com">Mail</a>
</body></html>"#;

    #[test]
    fn test_well_formed_page_scores_full() {
        let audit = audit_html("https://www.example.com/en/articles/guide", GOOD_PAGE);

        assert_eq!(audit.title.as_deref(), Some("Flexible busbar installation guide for engineers"));
        assert!(audit.meta_description.is_some());
        assert_eq!(audit.h1, ["Installation guide"]);
        assert_eq!(audit.internal_links, 2);
        assert_eq!(audit.external_links, 1);
        assert!(audit.findings.is_empty(), "{:?}", audit.findings);
        assert_eq!(audit.score, 100);
    }

    #[test]
    fn test_penalties_accumulate() {
        let html = r#"<h1>A</h1><h1>B</h1><img src="1"><img src="2" alt=""><img src="3"><img src="4"><img src="5"><img src="6">"#;
        let audit = audit_html("https://www.example.com/x", html);

        // title 20, description 15, two h1 5, alt capped 10, links 5
        assert_eq!(audit.score, 45);
        assert_eq!(audit.images, 6);
        assert_eq!(audit.images_with_alt, 0);
        assert_eq!(audit.findings.last().map(|f| f.level), Some(AuditLevel::Info));
    }

    #[test]
    fn test_attribute_lookup() {
        let meta = r#"<META CONTENT=' Great page ' Name="Description">"#;
        assert_eq!(attribute(meta, &NAME_ATTR).as_deref(), Some("Description"));
        assert_eq!(attribute(meta, &CONTENT_ATTR).as_deref(), Some("Great page"));
        assert_eq!(attribute(r#"<img src="/a.jpg">"#, &ALT_ATTR), None);
        assert_eq!(attribute(r#"<img alt='Logo' src="/a.jpg">"#, &ALT_ATTR).as_deref(), Some("Logo"));
    }

    #[test]
    fn test_short_title_is_warning() {
        let html = "<title>Home</title>";
        let audit = audit_html("https://www.example.com/", html);
        assert_eq!(audit.findings[0].level, AuditLevel::Warning);
        assert_eq!(audit.findings[0].penalty, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_site_audit_respects_limit_and_records_failures() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_status(200, GOOD_PAGE);
        transport.push_status(404, "missing");
        let client = ResilientClient::with_transport(transport.clone(), Auth::None).with_policy(RetryPolicy::none());
        let urls: Vec<String> = (1..=5).map(|i| format!("https://www.example.com/p{i}")).collect();

        let started = tokio::time::Instant::now();
        let audit = audit_site(&client, &urls, 2, Duration::from_secs(1)).await;

        assert_eq!(transport.request_count(), 2);
        assert_eq!(audit.pages.len(), 1);
        assert_eq!(audit.failures.len(), 1);
        assert_eq!(audit.failures[0].url, "https://www.example.com/p2");
        assert_eq!(audit.average_score, 100.0);
        assert_eq!(started.elapsed(), Duration::from_secs(1));
    }
}
