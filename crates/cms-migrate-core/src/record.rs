//! Content records moving between the two systems.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which source schema a record was resolved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceSchema {
    WordPressPost,
    StrapiArticle,
}

/// A remote media file, optionally already uploaded to the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaAsset {
    pub remote_url: String,
    pub file_name: String,
    pub alt_text: String,
    pub target_handle: Option<AssetHandle>,
}

impl MediaAsset {
    pub fn new(remote_url: impl Into<String>, file_name: impl Into<String>, alt_text: impl Into<String>) -> Self {
        Self {
            remote_url: remote_url.into(),
            file_name: file_name.into(),
            alt_text: alt_text.into(),
            target_handle: None,
        }
    }
}

/// Target-assigned identity of an uploaded asset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetHandle {
    pub id: u64,
    pub url: String,
}

/// A structured body segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    RichText { html: String },
    Media { url: String, alt: String },
    Quote { text: String, attribution: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Body {
    Html(String),
    Blocks(Vec<Block>),
}

impl Default for Body {
    fn default() -> Self {
        Body::Html(String::new())
    }
}

/// Category reference as the source knows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonomyRef {
    pub id: Option<u64>,
    pub name: String,
    pub slug: Option<String>,
}

/// One content item fetched from the source system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub id: u64,
    pub schema: SourceSchema,
    pub title: String,
    pub slug: String,
    pub body: Body,
    pub excerpt: String,
    pub published_at: Option<String>,
    pub created_at: Option<String>,
    pub modified_at: Option<String>,
    pub locale: Option<String>,
    pub cover: Option<MediaAsset>,
    pub taxonomy: Vec<TaxonomyRef>,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl SourceRecord {
    /// Minimal record for the given schema; remaining fields are empty.
    pub fn new(id: u64, schema: SourceSchema, title: impl Into<String>) -> Self {
        Self {
            id,
            schema,
            title: title.into(),
            slug: String::new(),
            body: Body::default(),
            excerpt: String::new(),
            published_at: None,
            created_at: None,
            modified_at: None,
            locale: None,
            cover: None,
            taxonomy: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }
}

/// Cover image state of a target record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CoverSlot {
    #[default]
    None,
    /// Awaiting upload during the media stage.
    Pending(MediaAsset),
    Resolved(AssetHandle),
}

impl CoverSlot {
    pub fn is_present(&self) -> bool {
        !matches!(self, CoverSlot::None)
    }

    pub fn handle(&self) -> Option<&AssetHandle> {
        match self {
            CoverSlot::Resolved(handle) => Some(handle),
            _ => None,
        }
    }
}

/// A content item in the target schema.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TargetRecord {
    /// Target-assigned id, known once written or read back.
    pub id: Option<u64>,
    /// Back-reference to [`SourceRecord::id`].
    pub external_id: Option<u64>,
    pub title: String,
    pub slug: String,
    pub content: String,
    pub excerpt: String,
    pub published_at: Option<String>,
    pub modified_at: Option<String>,
    pub locale: Option<String>,
    pub cover: CoverSlot,
    pub categories: Vec<String>,
    pub category_ids: Vec<u64>,
}

/// Lifecycle of a record through one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum RecordState {
    Pending,
    Fetched,
    Transformed,
    MediaResolved,
    Written,
    Verified(f64),
    Failed(String),
}

impl RecordState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RecordState::Verified(_) | RecordState::Failed(_))
    }

    /// Whether moving from `self` to `next` is a legal step.
    pub fn can_transition_to(&self, next: &RecordState) -> bool {
        use RecordState::*;
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (_, Failed(_)) => true,
            (Pending, Fetched)
            | (Fetched, Transformed)
            | (Transformed, MediaResolved)
            | (MediaResolved, Written)
            | (Written, Verified(_)) => true,
            _ => false,
        }
    }

    /// Advance to `next`, or fail the record if the step is illegal.
    pub fn advance(self, next: RecordState) -> RecordState {
        if self.can_transition_to(&next) {
            next
        } else {
            RecordState::Failed(format!("illegal transition {:?} -> {:?}", self, next))
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RecordState::Pending => "pending",
            RecordState::Fetched => "fetched",
            RecordState::Transformed => "transformed",
            RecordState::MediaResolved => "media_resolved",
            RecordState::Written => "written",
            RecordState::Verified(_) => "verified",
            RecordState::Failed(_) => "failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        let state = RecordState::Pending
            .advance(RecordState::Fetched)
            .advance(RecordState::Transformed)
            .advance(RecordState::MediaResolved)
            .advance(RecordState::Written)
            .advance(RecordState::Verified(100.0));
        assert_eq!(state, RecordState::Verified(100.0));
    }

    #[test]
    fn test_failed_reachable_from_any_non_terminal() {
        for state in [
            RecordState::Pending,
            RecordState::Fetched,
            RecordState::Transformed,
            RecordState::MediaResolved,
            RecordState::Written,
        ] {
            assert!(state.can_transition_to(&RecordState::Failed("x".into())));
        }
        assert!(!RecordState::Verified(50.0).can_transition_to(&RecordState::Failed("x".into())));
        assert!(!RecordState::Failed("a".into()).can_transition_to(&RecordState::Failed("b".into())));
    }

    #[test]
    fn test_skipping_a_stage_fails_the_record() {
        let state = RecordState::Fetched.advance(RecordState::Written);
        assert!(matches!(state, RecordState::Failed(_)));
    }
}
