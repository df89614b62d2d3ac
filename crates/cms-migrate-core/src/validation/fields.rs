//! Field accessor table used by the equivalence checks.

use crate::pipeline::{expected_slug, parse_date, parse_metadata_sidecar};
use crate::record::{SourceRecord, TargetRecord};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::LazyLock;

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());
static IMG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<img\b[^>]*>").unwrap());

/// Group a field belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckCategory {
    Content,
    Media,
    Metadata,
}

impl CheckCategory {
    pub const ALL: [CheckCategory; 3] = [CheckCategory::Content, CheckCategory::Media, CheckCategory::Metadata];

    pub fn as_str(&self) -> &'static str {
        match self {
            CheckCategory::Content => "content",
            CheckCategory::Media => "media",
            CheckCategory::Metadata => "metadata",
        }
    }
}

/// A comparable value read from one side.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Count(usize),
    Date(DateTime<Utc>),
    Present(bool),
    Id(u64),
}

impl FieldValue {
    pub fn display(&self) -> String {
        match self {
            FieldValue::Text(text) => text.clone(),
            FieldValue::Count(n) => n.to_string(),
            FieldValue::Date(date) => date.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            FieldValue::Present(present) => present.to_string(),
            FieldValue::Id(id) => id.to_string(),
        }
    }
}

/// How the two sides of a field are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// Mismatch is an error.
    Exact,
    /// Compared only when both sides are non-empty; mismatch is a warning.
    WhenBothPresent,
    /// Relative difference above the length tolerance is a warning.
    LengthTolerance,
    /// Difference above the day tolerance is a warning.
    DateTolerance,
    /// Skipped when the target has no value; mismatch is an error.
    TargetOptional,
    /// Missing or different target value is an error.
    BackReference,
    /// Source-only is an error, target-only is a warning.
    Presence,
    /// Any difference is a warning.
    CountMatch,
}

/// Source side with derived values computed once.
pub struct SourceView<'a> {
    pub record: &'a SourceRecord,
    pub content: String,
    pub locale: String,
    /// Slug after the same derivation the transformer applies.
    pub slug: String,
}

impl<'a> SourceView<'a> {
    pub fn new(record: &'a SourceRecord, content: String, default_locale: &str) -> Self {
        let locale = record
            .locale
            .clone()
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| default_locale.to_string());
        Self {
            record,
            content,
            locale,
            slug: expected_slug(record),
        }
    }
}

/// Target side with the metadata sidecar removed from the body.
pub struct TargetView<'a> {
    pub record: &'a TargetRecord,
    pub body: String,
}

impl<'a> TargetView<'a> {
    pub fn new(record: &'a TargetRecord) -> Self {
        let (body, _) = parse_metadata_sidecar(&record.content);
        Self { record, body }
    }
}

pub type SourceAccessor = fn(&SourceView<'_>) -> Option<FieldValue>;
pub type TargetAccessor = fn(&TargetView<'_>) -> Option<FieldValue>;

pub struct FieldAccessor {
    pub field: &'static str,
    pub category: CheckCategory,
    pub comparison: Comparison,
    pub source: SourceAccessor,
    pub target: TargetAccessor,
}

pub static FIELDS: &[FieldAccessor] = &[
    FieldAccessor {
        field: "title",
        category: CheckCategory::Content,
        comparison: Comparison::Exact,
        source: |s| Some(FieldValue::Text(plain_text(&s.record.title))),
        target: |t| Some(FieldValue::Text(plain_text(&t.record.title))),
    },
    FieldAccessor {
        field: "excerpt",
        category: CheckCategory::Content,
        comparison: Comparison::WhenBothPresent,
        source: |s| non_empty(plain_text(&s.record.excerpt)),
        target: |t| non_empty(plain_text(&t.record.excerpt)),
    },
    FieldAccessor {
        field: "slug",
        category: CheckCategory::Content,
        comparison: Comparison::Exact,
        source: |s| Some(FieldValue::Text(plain_text(&s.slug))),
        target: |t| Some(FieldValue::Text(plain_text(&t.record.slug))),
    },
    FieldAccessor {
        field: "content_length",
        category: CheckCategory::Content,
        comparison: Comparison::LengthTolerance,
        source: |s| Some(FieldValue::Count(text_length(&s.content))),
        target: |t| Some(FieldValue::Count(text_length(&t.body))),
    },
    FieldAccessor {
        field: "cover",
        category: CheckCategory::Media,
        comparison: Comparison::Presence,
        source: |s| Some(FieldValue::Present(s.record.cover.is_some())),
        target: |t| Some(FieldValue::Present(t.record.cover.is_present())),
    },
    FieldAccessor {
        field: "content_images",
        category: CheckCategory::Media,
        comparison: Comparison::CountMatch,
        source: |s| Some(FieldValue::Count(image_count(&s.content))),
        target: |t| Some(FieldValue::Count(image_count(&t.body))),
    },
    FieldAccessor {
        field: "published_at",
        category: CheckCategory::Metadata,
        comparison: Comparison::DateTolerance,
        source: |s| {
            [&s.record.published_at, &s.record.created_at]
                .into_iter()
                .flatten()
                .find_map(|raw| parse_date(raw))
                .map(FieldValue::Date)
        },
        target: |t| t.record.published_at.as_deref().and_then(parse_date).map(FieldValue::Date),
    },
    FieldAccessor {
        field: "locale",
        category: CheckCategory::Metadata,
        comparison: Comparison::TargetOptional,
        source: |s| Some(FieldValue::Text(s.locale.clone())),
        target: |t| {
            t.record
                .locale
                .as_deref()
                .filter(|l| !l.trim().is_empty())
                .map(|l| FieldValue::Text(l.to_string()))
        },
    },
    FieldAccessor {
        field: "external_id",
        category: CheckCategory::Metadata,
        comparison: Comparison::BackReference,
        source: |s| Some(FieldValue::Id(s.record.id)),
        target: |t| t.record.external_id.map(FieldValue::Id),
    },
];

/// Accessors for one category, in table order.
pub fn fields_for(category: CheckCategory) -> impl Iterator<Item = &'static FieldAccessor> {
    FIELDS.iter().filter(move |f| f.category == category)
}

/// Strip tags, decode the common entities and trim.
pub fn plain_text(html: &str) -> String {
    let stripped = TAG.replace_all(html, "");
    stripped
        .replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&#039;", "'")
        .replace("&#39;", "'")
        .replace("&#8217;", "\u{2019}")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
        .trim()
        .to_string()
}

/// Visible text length in characters.
pub fn text_length(html: &str) -> usize {
    plain_text(html).chars().count()
}

pub fn image_count(html: &str) -> usize {
    IMG.find_iter(html).count()
}

fn non_empty(text: String) -> Option<FieldValue> {
    (!text.is_empty()).then_some(FieldValue::Text(text))
}
