//! CMS adapters behind narrow traits.
//!
//! The pipeline only sees [`RecordSource`], [`RecordSink`] and
//! [`MigratedReader`]. [`CmsClient`] implements all three for both the
//! WordPress-style and Strapi-style REST APIs.

pub mod strapi;
pub mod wordpress;

use crate::config::CmsSettings;
use crate::network::{MultipartFile, ResilientClient, RetryPolicy};
use crate::record::{AssetHandle, SourceRecord, TargetRecord};
use crate::{MigrateError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

pub use strapi::StrapiArticle;
pub use wordpress::WordPressPost;

/// Supported CMS flavors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmsKind {
    WordPress,
    Strapi,
}

impl CmsKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CmsKind::WordPress => "wordpress",
            CmsKind::Strapi => "strapi",
        }
    }
}

impl std::fmt::Display for CmsKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CmsKind {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wordpress" | "wp" => Ok(CmsKind::WordPress),
            "strapi" => Ok(CmsKind::Strapi),
            other => Err(MigrateError::config(format!(
                "Unknown CMS kind '{other}' (expected wordpress or strapi)"
            ))),
        }
    }
}

/// One page of a listing endpoint.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Explicit continuation signal, when the API provides one.
    pub has_more: Option<bool>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, has_more: Option<bool>) -> Self {
        Self { items, has_more }
    }

    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            has_more: Some(false),
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            has_more: self.has_more,
        }
    }
}

/// A raw source document, resolved from the wire once at ingestion.
#[derive(Debug, Clone)]
pub enum SourceDocument {
    WordPressPost(WordPressPost),
    StrapiArticle(StrapiArticle),
}

impl SourceDocument {
    /// Convert into the neutral record shape. Relative asset URLs are
    /// resolved against `base_url`.
    pub fn into_record(self, base_url: &str) -> SourceRecord {
        match self {
            SourceDocument::WordPressPost(post) => post.into_source_record(base_url),
            SourceDocument::StrapiArticle(article) => article.into_source_record(base_url),
        }
    }
}

/// Paged access to source records.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Fetch one page (1-indexed).
    async fn fetch_page(&self, page: u32, page_size: u32) -> Result<Page<SourceRecord>>;
}

/// Paged access to records already present in the target.
#[async_trait]
pub trait MigratedReader: Send + Sync {
    async fn fetch_migrated_page(&self, page: u32, page_size: u32) -> Result<Page<TargetRecord>>;
}

/// Write access to the target.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Upload a local file to the media library.
    async fn upload_media(&self, path: &Path, file_name: &str, alt_text: &str) -> Result<AssetHandle>;

    /// Create a record, returning its target id.
    async fn write_record(&self, record: &TargetRecord) -> Result<u64>;

    /// Look up a category by name, creating it if absent.
    async fn resolve_category(&self, name: &str) -> Result<u64>;
}

/// REST client for one CMS instance.
#[derive(Clone)]
pub struct CmsClient {
    kind: CmsKind,
    base_url: String,
    client: ResilientClient,
}

impl CmsClient {
    pub fn new(kind: CmsKind, base_url: impl Into<String>, client: ResilientClient) -> Self {
        Self {
            kind,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Build a reqwest-backed client from connection settings.
    pub fn from_settings(settings: &CmsSettings, timeout: Duration, max_retries: u32) -> Result<Self> {
        let client = ResilientClient::new(settings.auth.clone())?
            .with_timeout(timeout)
            .with_policy(RetryPolicy::default().with_max_retries(max_retries));
        Ok(Self::new(settings.kind, settings.base_url.clone(), client))
    }

    pub fn kind(&self) -> CmsKind {
        self.kind
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn client(&self) -> &ResilientClient {
        &self.client
    }

    /// Fetch one page of raw source documents.
    pub async fn fetch_documents(&self, page: u32, page_size: u32) -> Result<Page<SourceDocument>> {
        match self.kind {
            CmsKind::WordPress => {
                let page = self.fetch_wordpress_posts(page, page_size).await?;
                Ok(page.map(SourceDocument::WordPressPost))
            }
            CmsKind::Strapi => {
                let response = self
                    .client
                    .call(strapi::articles_request(&self.base_url, page, page_size))
                    .await?;
                let (articles, has_more) = strapi::parse_articles(&response, page)?;
                Ok(Page::new(
                    articles.into_iter().map(SourceDocument::StrapiArticle).collect(),
                    has_more,
                ))
            }
        }
    }

    async fn fetch_wordpress_posts(&self, page: u32, page_size: u32) -> Result<Page<WordPressPost>> {
        let request = wordpress::posts_request(&self.base_url, page, page_size);
        let response = match self.client.call(request).await {
            Ok(response) => response,
            // WordPress answers 400 for a page past the end.
            Err(MigrateError::HttpStatus { status: 400, .. }) if page > 1 => {
                debug!("WordPress page {} is past the end", page);
                return Ok(Page::empty());
            }
            Err(e) => return Err(e),
        };
        let posts = wordpress::parse_posts(&response)?;
        let has_more = wordpress::total_pages(&response).map(|total| page < total);
        Ok(Page::new(posts, has_more))
    }

    async fn lookup_category(&self, slug: &str) -> Result<Option<u64>> {
        let request = match self.kind {
            CmsKind::WordPress => wordpress::category_lookup_request(&self.base_url, slug),
            CmsKind::Strapi => strapi::category_lookup_request(&self.base_url, slug),
        };
        let response = self.client.call(request).await?;
        match self.kind {
            CmsKind::WordPress => wordpress::parse_category_lookup(&response),
            CmsKind::Strapi => strapi::parse_category_lookup(&response),
        }
    }
}

#[async_trait]
impl RecordSource for CmsClient {
    async fn fetch_page(&self, page: u32, page_size: u32) -> Result<Page<SourceRecord>> {
        let documents = self.fetch_documents(page, page_size).await?;
        let base_url = self.base_url.clone();
        Ok(documents.map(|doc| doc.into_record(&base_url)))
    }
}

#[async_trait]
impl MigratedReader for CmsClient {
    async fn fetch_migrated_page(&self, page: u32, page_size: u32) -> Result<Page<TargetRecord>> {
        match self.kind {
            CmsKind::WordPress => {
                let posts = self.fetch_wordpress_posts(page, page_size).await?;
                Ok(posts.map(WordPressPost::into_target_record))
            }
            CmsKind::Strapi => {
                let response = self
                    .client
                    .call(strapi::articles_request(&self.base_url, page, page_size))
                    .await?;
                let (articles, has_more) = strapi::parse_articles(&response, page)?;
                let base_url = self.base_url.clone();
                Ok(Page::new(
                    articles
                        .into_iter()
                        .map(|a| a.into_target_record(&base_url))
                        .collect(),
                    has_more,
                ))
            }
        }
    }
}

#[async_trait]
impl RecordSink for CmsClient {
    async fn upload_media(&self, path: &Path, file_name: &str, alt_text: &str) -> Result<AssetHandle> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| MigrateError::io_with_path(e, path))?;
        let file = MultipartFile {
            field: match self.kind {
                CmsKind::WordPress => "file".to_string(),
                CmsKind::Strapi => "files".to_string(),
            },
            file_name: file_name.to_string(),
            mime: guess_mime(file_name).to_string(),
            bytes: Bytes::from(bytes),
        };

        let handle = match self.kind {
            CmsKind::WordPress => {
                let response = self
                    .client
                    .call(wordpress::media_request(&self.base_url, file, alt_text))
                    .await?;
                wordpress::parse_media(&response)?
            }
            CmsKind::Strapi => {
                let response = self
                    .client
                    .call(strapi::upload_request(&self.base_url, file, alt_text))
                    .await?;
                strapi::parse_upload(&response, &self.base_url)?
            }
        };

        debug!("Uploaded {} as asset {}", file_name, handle.id);
        Ok(handle)
    }

    async fn write_record(&self, record: &TargetRecord) -> Result<u64> {
        let id = match self.kind {
            CmsKind::WordPress => {
                let response = self
                    .client
                    .call(wordpress::create_post_request(&self.base_url, record))
                    .await?;
                wordpress::parse_created_id(&response)?
            }
            CmsKind::Strapi => {
                let response = self
                    .client
                    .call(strapi::create_article_request(&self.base_url, record))
                    .await?;
                strapi::parse_created_id(&response)?
            }
        };
        Ok(id)
    }

    async fn resolve_category(&self, name: &str) -> Result<u64> {
        let slug = crate::pipeline::slugify(name);
        if let Some(id) = self.lookup_category(&slug).await? {
            return Ok(id);
        }

        let request = match self.kind {
            CmsKind::WordPress => wordpress::category_create_request(&self.base_url, name, &slug),
            CmsKind::Strapi => strapi::category_create_request(&self.base_url, name, &slug),
        };
        match self.client.call(request).await {
            Ok(response) => {
                let id = match self.kind {
                    CmsKind::WordPress => wordpress::parse_created_id(&response)?,
                    CmsKind::Strapi => strapi::parse_created_id(&response)?,
                };
                info!("Created category '{}' ({})", name, id);
                Ok(id)
            }
            // Lost a creation race; the category exists now.
            Err(MigrateError::HttpStatus { status: 400, .. }) => self
                .lookup_category(&slug)
                .await?
                .ok_or_else(|| MigrateError::Other(format!("Failed to create category '{name}'"))),
            Err(e) => Err(e),
        }
    }
}

/// Resolve a possibly relative asset URL against a base URL.
///
/// The base is treated as a directory, so a path prefix on it is kept for
/// relative inputs. Unparseable inputs are returned unchanged.
pub fn absolute_url(base_url: &str, url: &str) -> String {
    if url.is_empty() {
        return String::new();
    }
    let base = if base_url.ends_with('/') {
        base_url.to_string()
    } else {
        format!("{base_url}/")
    };
    match Url::parse(&base).and_then(|base| base.join(url)) {
        Ok(joined) => joined.to_string(),
        Err(_) => url.to_string(),
    }
}

/// Last path segment of a URL, without query string.
pub fn file_name_from_url(url: &str) -> String {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or_default().to_string(),
    };
    path.rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or("asset")
        .to_string()
}

fn guess_mime(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "avif" => "image/avif",
        "pdf" => "application/pdf",
        "mp4" => "video/mp4",
        _ => "application/octet-stream",
    }
}
