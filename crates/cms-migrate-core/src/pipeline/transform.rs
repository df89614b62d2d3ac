//! Source-to-target schema mapping.

use crate::cms::absolute_url;
use crate::record::{Block, Body, CoverSlot, SourceRecord, TargetRecord};
use crate::{MigrateError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::LazyLock;

const SIDECAR_MARKER: &str = "<!-- Metadata -->";

static SIDECAR_ENTRY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<p><strong>(.*?):</strong> (.*?)</p>").unwrap());

/// Maps [`SourceRecord`]s into [`TargetRecord`]s.
#[derive(Debug, Clone)]
pub struct SchemaTransformer {
    source_base_url: String,
}

impl SchemaTransformer {
    /// `source_base_url` resolves relative media paths inside bodies.
    pub fn new(source_base_url: impl Into<String>) -> Self {
        Self {
            source_base_url: source_base_url.into(),
        }
    }

    /// Transform one record. Pure: the same input always yields the same output.
    pub fn transform(&self, record: &SourceRecord) -> Result<TargetRecord> {
        let title = record.title.trim();
        if title.is_empty() {
            return Err(MigrateError::Transform {
                record_id: record.id,
                field: "title".into(),
            });
        }

        let published_at = [&record.published_at, &record.created_at]
            .into_iter()
            .flatten()
            .find_map(|raw| normalize_date(raw))
            .ok_or_else(|| MigrateError::Transform {
                record_id: record.id,
                field: "published_at".into(),
            })?;

        let slug = expected_slug(record);

        let mut content = flatten_body(&record.body, &self.source_base_url);
        if let Some(sidecar) = render_metadata_sidecar(&record.metadata) {
            content.push_str(&sidecar);
        }

        Ok(TargetRecord {
            id: None,
            external_id: Some(record.id),
            title: title.to_string(),
            slug,
            content,
            excerpt: record.excerpt.trim().to_string(),
            published_at: Some(published_at),
            modified_at: record.modified_at.as_deref().and_then(normalize_date),
            locale: record.locale.clone(),
            cover: match &record.cover {
                Some(asset) => CoverSlot::Pending(asset.clone()),
                None => CoverSlot::None,
            },
            categories: record.taxonomy.iter().map(|t| t.name.clone()).collect(),
            category_ids: Vec::new(),
        })
    }
}

/// Slug the target will carry: the source slug, else one derived from the
/// title, else `article-{id}`.
pub fn expected_slug(record: &SourceRecord) -> String {
    match record.slug.trim() {
        "" => {
            let derived = slugify(record.title.trim());
            if derived.is_empty() {
                format!("article-{}", record.id)
            } else {
                derived
            }
        }
        slug => slug.to_string(),
    }
}

/// Render a body to a single HTML string.
pub fn flatten_body(body: &Body, base_url: &str) -> String {
    match body {
        Body::Html(html) => html.clone(),
        Body::Blocks(blocks) => blocks
            .iter()
            .map(|block| match block {
                Block::RichText { html } => html.clone(),
                Block::Media { url, alt } => format!(
                    "<img src=\"{}\" alt=\"{}\" />",
                    escape_html(&absolute_url(base_url, url)),
                    escape_html(alt)
                ),
                Block::Quote { text, attribution } => match attribution {
                    Some(who) => format!(
                        "<blockquote><p>{}</p><cite>{}</cite></blockquote>",
                        text,
                        escape_html(who)
                    ),
                    None => format!("<blockquote><p>{}</p></blockquote>", text),
                },
            })
            .filter(|html| !html.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

/// Parse any accepted date layout into UTC.
///
/// Accepts RFC 3339, `YYYY-MM-DDTHH:MM:SS`, `YYYY-MM-DD HH:MM:SS` (both with
/// optional fractional seconds, read as UTC) and `YYYY-MM-DD`.
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for layout in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, layout) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Normalize a date to RFC 3339 UTC with second precision.
pub fn normalize_date(raw: &str) -> Option<String> {
    parse_date(raw).map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// Lower-case, hyphen-separated slug. Non-ASCII letters are kept.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;
    for ch in text.chars() {
        if ch.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(ch.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

/// Render string and number metadata as an HTML block, or `None` if empty.
pub fn render_metadata_sidecar(metadata: &BTreeMap<String, Value>) -> Option<String> {
    let entries: Vec<String> = metadata
        .iter()
        .filter_map(|(key, value)| {
            let text = match value {
                Value::String(s) if !s.trim().is_empty() => s.clone(),
                Value::Number(n) => n.to_string(),
                _ => return None,
            };
            Some(format!(
                "\n<p><strong>{}:</strong> {}</p>",
                escape_html(key),
                escape_html(&text)
            ))
        })
        .collect();

    if entries.is_empty() {
        return None;
    }

    Some(format!(
        "\n\n{SIDECAR_MARKER}\n<div class=\"project-metadata\">{}\n</div>",
        entries.concat()
    ))
}

/// Split content into its body and the sidecar entries, if any.
pub fn parse_metadata_sidecar(content: &str) -> (String, BTreeMap<String, String>) {
    let Some(index) = content.find(SIDECAR_MARKER) else {
        return (content.to_string(), BTreeMap::new());
    };

    let body = content[..index].trim_end().to_string();
    let entries = SIDECAR_ENTRY
        .captures_iter(&content[index..])
        .map(|caps| (unescape_html(&caps[1]), unescape_html(&caps[2])))
        .collect();
    (body, entries)
}

pub(crate) fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn unescape_html(text: &str) -> String {
    text.replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{MediaAsset, SourceSchema, TaxonomyRef};
    use serde_json::json;

    fn record() -> SourceRecord {
        let mut record = SourceRecord::new(9, SourceSchema::StrapiArticle, "  Hello, World!  ");
        record.published_at = Some("2024-05-01T08:15:30.123Z".into());
        record.body = Body::Blocks(vec![
            Block::RichText { html: "<p>Intro</p>".into() },
            Block::Media { url: "/uploads/a.png".into(), alt: "A \"quoted\"".into() },
            Block::Quote { text: "Ship it".into(), attribution: Some("Ada".into()) },
        ]);
        record.cover = Some(MediaAsset::new("http://cms/uploads/c.jpg", "c.jpg", ""));
        record.taxonomy = vec![TaxonomyRef { id: Some(1), name: "News".into(), slug: None }];
        record.metadata = BTreeMap::from([
            ("client".to_string(), json!("Acme & Co")),
            ("year".to_string(), json!(2023)),
            ("featured".to_string(), json!(true)),
        ]);
        record
    }

    #[test]
    fn test_transform_maps_fields() {
        let transformer = SchemaTransformer::new("http://cms");
        let target = transformer.transform(&record()).unwrap();

        assert_eq!(target.external_id, Some(9));
        assert_eq!(target.title, "Hello, World!");
        assert_eq!(target.slug, "hello-world");
        assert_eq!(target.published_at.as_deref(), Some("2024-05-01T08:15:30Z"));
        assert!(target
            .content
            .starts_with("<p>Intro</p>\n<img src=\"http://cms/uploads/a.png\" alt=\"A &quot;quoted&quot;\" />"));
        assert!(target
            .content
            .contains("<blockquote><p>Ship it</p><cite>Ada</cite></blockquote>"));
        assert!(matches!(target.cover, CoverSlot::Pending(ref a) if a.file_name == "c.jpg"));
        assert_eq!(target.categories, vec!["News".to_string()]);
    }

    #[test]
    fn test_transform_is_deterministic() {
        let transformer = SchemaTransformer::new("http://cms");
        let source = record();
        assert_eq!(
            transformer.transform(&source).unwrap(),
            transformer.transform(&source).unwrap()
        );
    }

    #[test]
    fn test_missing_title_or_date_is_transform_error() {
        let transformer = SchemaTransformer::new("http://cms");

        let mut untitled = record();
        untitled.title = "   ".into();
        match transformer.transform(&untitled).unwrap_err() {
            MigrateError::Transform { record_id, field } => {
                assert_eq!(record_id, 9);
                assert_eq!(field, "title");
            }
            other => panic!("unexpected error {other:?}"),
        }

        let mut undated = record();
        undated.published_at = Some("yesterday".into());
        undated.created_at = None;
        assert!(matches!(
            transformer.transform(&undated),
            Err(MigrateError::Transform { ref field, .. }) if field == "published_at"
        ));
    }

    #[test]
    fn test_created_at_fallback() {
        let transformer = SchemaTransformer::new("http://cms");
        let mut source = record();
        source.published_at = None;
        source.created_at = Some("2023-12-31".into());
        let target = transformer.transform(&source).unwrap();
        assert_eq!(target.published_at.as_deref(), Some("2023-12-31T00:00:00Z"));
    }

    #[test]
    fn test_accepted_date_layouts() {
        assert_eq!(
            normalize_date("2024-01-02T03:04:05+08:00").as_deref(),
            Some("2024-01-01T19:04:05Z")
        );
        assert_eq!(
            normalize_date("2024-01-02T03:04:05").as_deref(),
            Some("2024-01-02T03:04:05Z")
        );
        assert_eq!(
            normalize_date("2024-01-02 03:04:05").as_deref(),
            Some("2024-01-02T03:04:05Z")
        );
        assert_eq!(normalize_date("2024-01-02").as_deref(), Some("2024-01-02T00:00:00Z"));
        assert_eq!(normalize_date("02/01/2024"), None);
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("  Rust & WebAssembly: 2024 "), "rust-webassembly-2024");
        assert_eq!(slugify("---"), "");
        assert_eq!(slugify("迁移 指南"), "迁移-指南");
    }

    #[test]
    fn test_symbol_only_title_gets_id_slug() {
        let transformer = SchemaTransformer::new("http://cms");
        let mut source = record();
        source.title = "!!!".into();
        assert_eq!(transformer.transform(&source).unwrap().slug, "article-9");
    }

    #[test]
    fn test_metadata_sidecar_parses_back() {
        let source = record();
        let sidecar = render_metadata_sidecar(&source.metadata).unwrap();
        assert!(sidecar.starts_with("\n\n<!-- Metadata -->\n<div class=\"project-metadata\">"));
        assert!(sidecar.ends_with("\n</div>"));

        let content = format!("<p>Body</p>{sidecar}");
        let (body, entries) = parse_metadata_sidecar(&content);

        assert_eq!(body, "<p>Body</p>");
        assert_eq!(entries.get("client").map(String::as_str), Some("Acme & Co"));
        assert_eq!(entries.get("year").map(String::as_str), Some("2023"));
        assert!(!entries.contains_key("featured"));
    }

    #[test]
    fn test_empty_metadata_has_no_sidecar() {
        assert_eq!(render_metadata_sidecar(&BTreeMap::new()), None);
        let (body, entries) = parse_metadata_sidecar("<p>plain</p>");
        assert_eq!(body, "<p>plain</p>");
        assert!(entries.is_empty());
    }
}
