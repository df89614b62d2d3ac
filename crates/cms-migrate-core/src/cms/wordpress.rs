//! WordPress REST API (`/wp-json/wp/v2`) shapes and requests.

use crate::cms::{absolute_url, file_name_from_url};
use crate::network::{HttpRequest, HttpResponse, MultipartFile};
use crate::record::{
    AssetHandle, Body, CoverSlot, MediaAsset, SourceRecord, SourceSchema, TargetRecord, TaxonomyRef,
};
use crate::{MigrateError, Result};
use serde::Deserialize;
use serde_json::{json, Map, Value};

const API_PREFIX: &str = "/wp-json/wp/v2";

/// Meta keys that carry the back-reference to the source record.
const BACK_REFERENCE_KEYS: [&str; 2] = ["strapi_id", "external_id"];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Rendered {
    #[serde(default)]
    pub rendered: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WpMedia {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub source_url: String,
    #[serde(default)]
    pub alt_text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WpTerm {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub taxonomy: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WpEmbedded {
    #[serde(rename = "wp:featuredmedia", default)]
    pub featured_media: Vec<WpMedia>,
    #[serde(rename = "wp:term", default)]
    pub terms: Vec<Vec<WpTerm>>,
}

/// A post as returned by `GET /wp-json/wp/v2/posts?_embed=1`.
#[derive(Debug, Clone, Deserialize)]
pub struct WordPressPost {
    pub id: u64,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub date_gmt: Option<String>,
    #[serde(default)]
    pub modified: Option<String>,
    #[serde(default)]
    pub modified_gmt: Option<String>,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub title: Rendered,
    #[serde(default)]
    pub content: Rendered,
    #[serde(default)]
    pub excerpt: Rendered,
    #[serde(default)]
    pub featured_media: u64,
    #[serde(default)]
    pub categories: Vec<u64>,
    /// An object, or `[]` when the post has no registered meta.
    #[serde(default)]
    pub meta: Value,
    #[serde(rename = "_embedded", default)]
    pub embedded: Option<WpEmbedded>,
}

impl WordPressPost {
    fn meta_object(&self) -> Option<&Map<String, Value>> {
        self.meta.as_object()
    }

    fn meta_str(&self, key: &str) -> Option<String> {
        self.meta_object()
            .and_then(|m| m.get(key))
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    /// Back-reference stored in post meta, as number or numeric string.
    pub fn back_reference(&self) -> Option<u64> {
        let meta = self.meta_object()?;
        BACK_REFERENCE_KEYS
            .iter()
            .filter_map(|key| meta.get(*key))
            .find_map(|value| match value {
                Value::Number(n) => n.as_u64(),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            })
    }

    fn featured(&self) -> Option<&WpMedia> {
        if self.featured_media == 0 {
            return None;
        }
        self.embedded
            .as_ref()
            .and_then(|e| e.featured_media.first())
            .filter(|m| !m.source_url.is_empty())
    }

    fn category_terms(&self) -> Vec<TaxonomyRef> {
        let embedded: Vec<&WpTerm> = self
            .embedded
            .as_ref()
            .map(|e| {
                e.terms
                    .iter()
                    .flatten()
                    .filter(|t| t.taxonomy.is_empty() || t.taxonomy == "category")
                    .collect()
            })
            .unwrap_or_default();

        if embedded.is_empty() {
            self.categories
                .iter()
                .map(|id| TaxonomyRef {
                    id: Some(*id),
                    name: id.to_string(),
                    slug: None,
                })
                .collect()
        } else {
            embedded
                .into_iter()
                .map(|t| TaxonomyRef {
                    id: Some(t.id),
                    name: t.name.clone(),
                    slug: Some(t.slug.clone()),
                })
                .collect()
        }
    }

    fn published(&self) -> Option<String> {
        self.date_gmt.clone().or_else(|| self.date.clone())
    }

    fn last_modified(&self) -> Option<String> {
        self.modified_gmt.clone().or_else(|| self.modified.clone())
    }

    pub fn into_source_record(self, base_url: &str) -> SourceRecord {
        let cover = self.featured().map(|media| {
            let url = absolute_url(base_url, &media.source_url);
            MediaAsset::new(url.clone(), file_name_from_url(&url), media.alt_text.clone())
        });

        let metadata = self
            .meta_object()
            .map(|meta| {
                meta.iter()
                    .filter(|(k, _)| k.as_str() != "locale" && !BACK_REFERENCE_KEYS.contains(&k.as_str()))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default();

        SourceRecord {
            id: self.id,
            schema: SourceSchema::WordPressPost,
            title: self.title.rendered.clone(),
            slug: self.slug.clone(),
            body: Body::Html(self.content.rendered.clone()),
            excerpt: self.excerpt.rendered.clone(),
            published_at: self.published(),
            created_at: self.date.clone(),
            modified_at: self.last_modified(),
            locale: self.meta_str("locale"),
            cover,
            taxonomy: self.category_terms(),
            metadata,
        }
    }

    pub fn into_target_record(self) -> TargetRecord {
        let cover = if self.featured_media > 0 {
            CoverSlot::Resolved(AssetHandle {
                id: self.featured_media,
                url: self.featured().map(|m| m.source_url.clone()).unwrap_or_default(),
            })
        } else {
            CoverSlot::None
        };

        TargetRecord {
            id: Some(self.id),
            external_id: self.back_reference(),
            title: self.title.rendered.clone(),
            slug: self.slug.clone(),
            content: self.content.rendered.clone(),
            excerpt: self.excerpt.rendered.clone(),
            published_at: self.published(),
            modified_at: self.last_modified(),
            locale: self.meta_str("locale"),
            cover,
            categories: self.category_terms().into_iter().map(|t| t.name).collect(),
            category_ids: self.categories.clone(),
        }
    }
}

pub fn posts_request(base_url: &str, page: u32, per_page: u32) -> HttpRequest {
    HttpRequest::get(format!("{base_url}{API_PREFIX}/posts"))
        .query("page", page)
        .query("per_page", per_page)
        .query("_embed", 1)
}

/// Page count from the `X-WP-TotalPages` header.
pub fn total_pages(response: &HttpResponse) -> Option<u32> {
    response
        .header("x-wp-totalpages")
        .and_then(|v| v.trim().parse().ok())
}

pub fn parse_posts(response: &HttpResponse) -> Result<Vec<WordPressPost>> {
    response.json()
}

pub fn create_post_request(base_url: &str, record: &TargetRecord) -> HttpRequest {
    let mut meta = Map::new();
    if let Some(locale) = &record.locale {
        meta.insert("locale".into(), json!(locale));
    }
    if let Some(external_id) = record.external_id {
        meta.insert("strapi_id".into(), json!(external_id.to_string()));
    }

    let mut body = json!({
        "title": record.title,
        "content": record.content,
        "excerpt": record.excerpt,
        "slug": record.slug,
        "status": "publish",
        "categories": record.category_ids,
        "meta": meta,
    });
    if let Some(date) = &record.published_at {
        body["date_gmt"] = json!(date);
    }
    if let Some(handle) = record.cover.handle() {
        body["featured_media"] = json!(handle.id);
    }

    HttpRequest::post(format!("{base_url}{API_PREFIX}/posts")).json(body)
}

pub fn media_request(base_url: &str, file: MultipartFile, alt_text: &str) -> HttpRequest {
    let mut request = HttpRequest::post(format!("{base_url}{API_PREFIX}/media")).multipart(file);
    if !alt_text.is_empty() {
        request = request.query("alt_text", alt_text);
    }
    request
}

pub fn parse_media(response: &HttpResponse) -> Result<AssetHandle> {
    let media: WpMedia = response.json()?;
    if media.id == 0 {
        return Err(MigrateError::Decode {
            url: response.url.clone(),
            message: "media response has no id".into(),
        });
    }
    Ok(AssetHandle {
        id: media.id,
        url: media.source_url,
    })
}

pub fn parse_created_id(response: &HttpResponse) -> Result<u64> {
    let value: Value = response.json()?;
    value
        .get("id")
        .and_then(Value::as_u64)
        .ok_or_else(|| MigrateError::Decode {
            url: response.url.clone(),
            message: "create response has no id".into(),
        })
}

pub fn category_lookup_request(base_url: &str, slug: &str) -> HttpRequest {
    HttpRequest::get(format!("{base_url}{API_PREFIX}/categories")).query("slug", slug)
}

pub fn parse_category_lookup(response: &HttpResponse) -> Result<Option<u64>> {
    let terms: Vec<WpTerm> = response.json()?;
    Ok(terms.first().map(|t| t.id))
}

pub fn category_create_request(base_url: &str, name: &str, slug: &str) -> HttpRequest {
    HttpRequest::post(format!("{base_url}{API_PREFIX}/categories"))
        .json(json!({ "name": name, "slug": slug }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn response(body: Value, headers: Vec<(&str, &str)>) -> HttpResponse {
        HttpResponse {
            url: "http://wp/wp-json/wp/v2/posts".into(),
            status: 200,
            headers: headers
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body: Bytes::from(body.to_string()),
        }
    }

    fn sample_post() -> Value {
        json!({
            "id": 42,
            "date": "2024-03-01T18:30:00",
            "date_gmt": "2024-03-01T10:30:00",
            "modified_gmt": "2024-03-02T08:00:00",
            "slug": "hello-world",
            "title": {"rendered": "Hello World"},
            "content": {"rendered": "<p>Body</p>"},
            "excerpt": {"rendered": "<p>Short</p>"},
            "featured_media": 7,
            "categories": [3],
            "meta": {"locale": "en", "strapi_id": "12", "client": "Acme"},
            "_embedded": {
                "wp:featuredmedia": [{"id": 7, "source_url": "/wp-content/uploads/cover.jpg", "alt_text": "Cover"}],
                "wp:term": [[{"id": 3, "name": "News", "slug": "news", "taxonomy": "category"}],
                            [{"id": 9, "name": "rust", "slug": "rust", "taxonomy": "post_tag"}]]
            }
        })
    }

    #[test]
    fn test_post_resolves_into_source_record() {
        let posts = parse_posts(&response(json!([sample_post()]), vec![])).unwrap();
        let record = posts.into_iter().next().unwrap().into_source_record("http://wp");

        assert_eq!(record.schema, SourceSchema::WordPressPost);
        assert_eq!(record.published_at.as_deref(), Some("2024-03-01T10:30:00"));
        assert_eq!(record.locale.as_deref(), Some("en"));
        let cover = record.cover.unwrap();
        assert_eq!(cover.remote_url, "http://wp/wp-content/uploads/cover.jpg");
        assert_eq!(cover.file_name, "cover.jpg");
        assert_eq!(record.taxonomy.len(), 1);
        assert_eq!(record.taxonomy[0].name, "News");
        assert_eq!(record.metadata.get("client"), Some(&json!("Acme")));
        assert!(!record.metadata.contains_key("strapi_id"));
    }

    #[test]
    fn test_post_resolves_into_target_record() {
        let post: WordPressPost = serde_json::from_value(sample_post()).unwrap();
        let target = post.into_target_record();

        assert_eq!(target.id, Some(42));
        assert_eq!(target.external_id, Some(12));
        assert_eq!(target.cover.handle().map(|h| h.id), Some(7));
        assert_eq!(target.categories, vec!["News".to_string()]);
    }

    #[test]
    fn test_empty_meta_array_is_tolerated() {
        let post: WordPressPost = serde_json::from_value(json!({
            "id": 1,
            "title": {"rendered": "T"},
            "meta": []
        }))
        .unwrap();
        assert_eq!(post.back_reference(), None);
        let record = post.into_source_record("http://wp");
        assert!(record.metadata.is_empty());
        assert!(record.cover.is_none());
    }

    #[test]
    fn test_total_pages_header() {
        let resp = response(json!([]), vec![("x-wp-totalpages", "4")]);
        assert_eq!(total_pages(&resp), Some(4));
        assert_eq!(total_pages(&response(json!([]), vec![])), None);
    }

    #[test]
    fn test_create_post_payload() {
        let record = TargetRecord {
            external_id: Some(12),
            title: "T".into(),
            slug: "t".into(),
            published_at: Some("2024-01-01T00:00:00Z".into()),
            locale: Some("zh-CN".into()),
            cover: CoverSlot::Resolved(AssetHandle { id: 5, url: "u".into() }),
            category_ids: vec![2],
            ..TargetRecord::default()
        };

        let request = create_post_request("http://wp", &record);
        assert_eq!(request.url, "http://wp/wp-json/wp/v2/posts");
        match request.body {
            crate::network::RequestBody::Json(body) => {
                assert_eq!(body["meta"]["strapi_id"], "12");
                assert_eq!(body["meta"]["locale"], "zh-CN");
                assert_eq!(body["featured_media"], 5);
                assert_eq!(body["status"], "publish");
                assert_eq!(body["categories"], json!([2]));
            }
            other => panic!("unexpected body {other:?}"),
        }
    }
}
