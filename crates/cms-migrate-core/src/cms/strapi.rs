//! Strapi REST API shapes and requests.
//!
//! Both the v4 layout (`{id, attributes}` entries, relations wrapped in
//! `{data}`) and the flat v5 documents are accepted; entries are normalized
//! to the flat layout before typed decoding.

use crate::cms::{absolute_url, file_name_from_url};
use crate::network::{HttpRequest, HttpResponse, MultipartFile};
use crate::pipeline::{escape_html, flatten_body};
use crate::record::{
    AssetHandle, Block, Body, CoverSlot, MediaAsset, SourceRecord, SourceSchema, TargetRecord,
    TaxonomyRef,
};
use crate::{MigrateError, Result};
use serde::{Deserialize, Deserializer};
use serde_json::{json, Map, Value};
use tracing::debug;

/// Fields Strapi adds to every entry that are not content metadata.
const SYSTEM_FIELDS: [&str; 4] = ["createdBy", "updatedBy", "localizations", "seo"];

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrapiMedia {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub alternative_text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StrapiCategory {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub slug: Option<String>,
}

/// An article entry after normalization to the flat layout.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrapiArticle {
    pub id: u64,
    #[serde(default)]
    pub document_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Rich text as a string, or blocks-editor nodes.
    #[serde(default)]
    pub content: Option<Value>,
    /// Dynamic-zone components.
    #[serde(default, deserialize_with = "null_as_default")]
    pub blocks: Vec<Value>,
    #[serde(default)]
    pub cover: Option<StrapiMedia>,
    #[serde(default)]
    pub category: Option<StrapiCategory>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub categories: Vec<StrapiCategory>,
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default, rename = "external_id")]
    pub external_id: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StrapiArticle {
    /// Decode one entry in either API layout.
    pub fn from_entry(entry: Value, url: &str) -> Result<Self> {
        serde_json::from_value(normalize(entry)).map_err(|e| MigrateError::Decode {
            url: url.to_string(),
            message: format!("invalid article entry: {}", e),
        })
    }

    pub fn back_reference(&self) -> Option<u64> {
        match self.external_id.as_ref()? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn body(&self, base_url: &str) -> Body {
        let blocks: Vec<Block> = self.blocks.iter().flat_map(convert_block).collect();
        if !blocks.is_empty() {
            return Body::Blocks(blocks);
        }
        match &self.content {
            Some(Value::String(html)) => Body::Html(html.clone()),
            Some(Value::Array(nodes)) => Body::Html(render_rich_text(nodes, base_url)),
            _ => Body::Html(String::new()),
        }
    }

    fn taxonomy(&self) -> Vec<TaxonomyRef> {
        self.category
            .iter()
            .chain(self.categories.iter())
            .filter(|c| !c.name.is_empty())
            .map(|c| TaxonomyRef {
                id: c.id,
                name: c.name.clone(),
                slug: c.slug.clone(),
            })
            .collect()
    }

    pub fn into_source_record(self, base_url: &str) -> SourceRecord {
        let cover = self
            .cover
            .as_ref()
            .filter(|m| !m.url.is_empty())
            .map(|media| {
                let url = absolute_url(base_url, &media.url);
                let file_name = media
                    .name
                    .clone()
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| file_name_from_url(&url));
                MediaAsset::new(url, file_name, media.alternative_text.clone().unwrap_or_default())
            });

        let metadata = self
            .extra
            .iter()
            .filter(|(k, _)| !SYSTEM_FIELDS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        SourceRecord {
            id: self.id,
            schema: SourceSchema::StrapiArticle,
            title: self.title.clone().unwrap_or_default(),
            slug: self.slug.clone().unwrap_or_default(),
            body: self.body(base_url),
            excerpt: self.description.clone().unwrap_or_default(),
            published_at: self.published_at.clone(),
            created_at: self.created_at.clone(),
            modified_at: self.updated_at.clone(),
            locale: self.locale.clone(),
            cover,
            taxonomy: self.taxonomy(),
            metadata,
        }
    }

    pub fn into_target_record(self, base_url: &str) -> TargetRecord {
        let cover = match &self.cover {
            Some(media) if media.id.is_some() || !media.url.is_empty() => {
                CoverSlot::Resolved(AssetHandle {
                    id: media.id.unwrap_or_default(),
                    url: absolute_url(base_url, &media.url),
                })
            }
            _ => CoverSlot::None,
        };

        let taxonomy = self.taxonomy();
        TargetRecord {
            id: Some(self.id),
            external_id: self.back_reference(),
            title: self.title.clone().unwrap_or_default(),
            slug: self.slug.clone().unwrap_or_default(),
            content: flatten_body(&self.body(base_url), base_url),
            excerpt: self.description.clone().unwrap_or_default(),
            published_at: self.published_at.clone(),
            modified_at: self.updated_at.clone(),
            locale: self.locale.clone(),
            cover,
            category_ids: taxonomy.iter().filter_map(|t| t.id).collect(),
            categories: taxonomy.into_iter().map(|t| t.name).collect(),
        }
    }
}

/// Flatten v4 `{id, attributes}` entries and `{data}` relation wrappers.
pub fn normalize(value: Value) -> Value {
    match value {
        Value::Object(mut map) => {
            if let Some(Value::Object(attributes)) = map.remove("attributes") {
                let mut flat = Map::new();
                if let Some(id) = map.remove("id") {
                    flat.insert("id".into(), id);
                }
                flat.extend(attributes);
                return normalize(Value::Object(flat));
            }
            if map.contains_key("data") && map.keys().all(|k| k == "data" || k == "meta") {
                return normalize(map.remove("data").unwrap_or(Value::Null));
            }
            Value::Object(map.into_iter().map(|(k, v)| (k, normalize(v))).collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(normalize).collect()),
        other => other,
    }
}

fn media_block(file: &Value) -> Option<Block> {
    let url = file.get("url")?.as_str()?.to_string();
    let alt = file
        .get("alternativeText")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Some(Block::Media { url, alt })
}

fn convert_block(block: &Value) -> Vec<Block> {
    let component = block.get("__component").and_then(Value::as_str).unwrap_or_default();
    match component {
        "shared.rich-text" => block
            .get("body")
            .and_then(Value::as_str)
            .map(|body| vec![Block::RichText { html: body.to_string() }])
            .unwrap_or_default(),
        "shared.media" => block.get("file").and_then(media_block).into_iter().collect(),
        "shared.slider" => block
            .get("files")
            .and_then(Value::as_array)
            .map(|files| files.iter().filter_map(media_block).collect())
            .unwrap_or_default(),
        "shared.quote" => {
            let text = block.get("body").and_then(Value::as_str).unwrap_or_default();
            let attribution = block
                .get("title")
                .and_then(Value::as_str)
                .filter(|t| !t.is_empty())
                .map(str::to_string);
            vec![Block::Quote {
                text: text.to_string(),
                attribution,
            }]
        }
        other => {
            debug!("Skipping unsupported block component '{}'", other);
            Vec::new()
        }
    }
}

/// Render blocks-editor nodes (`paragraph`, `heading`, `list`, ...) to HTML.
///
/// Text and attribute values are escaped; image sources are resolved
/// against `base_url`.
pub fn render_rich_text(nodes: &[Value], base_url: &str) -> String {
    nodes.iter().map(|node| render_node(node, base_url)).collect()
}

fn render_node(node: &Value, base_url: &str) -> String {
    let children = || {
        node.get("children")
            .and_then(Value::as_array)
            .map(|children| render_rich_text(children, base_url))
            .unwrap_or_default()
    };

    let kind = node.get("type").and_then(Value::as_str).unwrap_or_default();
    match kind {
        "text" => {
            let mut text = escape_html(node.get("text").and_then(Value::as_str).unwrap_or_default());
            for (flag, tag) in [("bold", "strong"), ("italic", "em"), ("underline", "u"), ("code", "code")] {
                if node.get(flag).and_then(Value::as_bool).unwrap_or(false) {
                    text = format!("<{tag}>{text}</{tag}>");
                }
            }
            text
        }
        "paragraph" => format!("<p>{}</p>", children()),
        "heading" => {
            let level = node.get("level").and_then(Value::as_u64).unwrap_or(2).clamp(1, 6);
            format!("<h{level}>{}</h{level}>", children())
        }
        "quote" => format!("<blockquote>{}</blockquote>", children()),
        "code" => format!("<pre><code>{}</code></pre>", children()),
        "list" => {
            let tag = match node.get("format").and_then(Value::as_str) {
                Some("ordered") => "ol",
                _ => "ul",
            };
            format!("<{tag}>{}</{tag}>", children())
        }
        "list-item" => format!("<li>{}</li>", children()),
        "link" => {
            let href = node.get("url").and_then(Value::as_str).unwrap_or_default();
            format!("<a href=\"{}\">{}</a>", escape_html(href), children())
        }
        "image" => {
            let image = node.get("image").unwrap_or(&Value::Null);
            let src = image.get("url").and_then(Value::as_str).unwrap_or_default();
            let alt = image
                .get("alternativeText")
                .and_then(Value::as_str)
                .unwrap_or_default();
            format!(
                "<img src=\"{}\" alt=\"{}\" />",
                escape_html(&absolute_url(base_url, src)),
                escape_html(alt)
            )
        }
        _ => children(),
    }
}

pub fn articles_request(base_url: &str, page: u32, page_size: u32) -> HttpRequest {
    HttpRequest::get(format!("{base_url}/api/articles"))
        .query("pagination[page]", page)
        .query("pagination[pageSize]", page_size)
        .query("populate", "*")
}

/// Decode an article listing and its `pageCount` continuation signal.
pub fn parse_articles(response: &HttpResponse, page: u32) -> Result<(Vec<StrapiArticle>, Option<bool>)> {
    let mut value: Value = response.json()?;
    let entries = match value.get_mut("data").map(Value::take) {
        Some(Value::Array(entries)) => entries,
        Some(Value::Null) | None => Vec::new(),
        Some(_) => {
            return Err(MigrateError::Decode {
                url: response.url.clone(),
                message: "expected `data` to be an array".into(),
            })
        }
    };

    let articles = entries
        .into_iter()
        .map(|entry| StrapiArticle::from_entry(entry, &response.url))
        .collect::<Result<Vec<_>>>()?;

    let page_count = value
        .pointer("/meta/pagination/pageCount")
        .and_then(Value::as_u64);
    Ok((articles, page_count.map(|count| u64::from(page) < count)))
}

pub fn create_article_request(base_url: &str, record: &TargetRecord) -> HttpRequest {
    let mut data = json!({
        "title": record.title,
        "slug": record.slug,
        "description": record.excerpt,
        "content": record.content,
    });
    if let Some(date) = &record.published_at {
        data["publishedAt"] = json!(date);
    }
    if let Some(locale) = &record.locale {
        data["locale"] = json!(locale);
    }
    if let Some(external_id) = record.external_id {
        data["external_id"] = json!(external_id);
    }
    if let Some(handle) = record.cover.handle() {
        data["cover"] = json!(handle.id);
    }
    if !record.category_ids.is_empty() {
        data["categories"] = json!(record.category_ids);
    }

    HttpRequest::post(format!("{base_url}/api/articles")).json(json!({ "data": data }))
}

pub fn upload_request(base_url: &str, file: MultipartFile, alt_text: &str) -> HttpRequest {
    let mut request = HttpRequest::post(format!("{base_url}/api/upload")).multipart(file);
    if !alt_text.is_empty() {
        request = request.query("fileInfo", json!({ "alternativeText": alt_text }).to_string());
    }
    request
}

pub fn parse_upload(response: &HttpResponse, base_url: &str) -> Result<AssetHandle> {
    let files: Vec<StrapiMedia> = response.json()?;
    files
        .into_iter()
        .find_map(|file| {
            file.id.map(|id| AssetHandle {
                id,
                url: absolute_url(base_url, &file.url),
            })
        })
        .ok_or_else(|| MigrateError::Decode {
            url: response.url.clone(),
            message: "upload response has no file id".into(),
        })
}

pub fn parse_created_id(response: &HttpResponse) -> Result<u64> {
    let value: Value = response.json()?;
    value
        .pointer("/data/id")
        .or_else(|| value.get("id"))
        .and_then(Value::as_u64)
        .ok_or_else(|| MigrateError::Decode {
            url: response.url.clone(),
            message: "create response has no id".into(),
        })
}

pub fn category_lookup_request(base_url: &str, slug: &str) -> HttpRequest {
    HttpRequest::get(format!("{base_url}/api/categories")).query("filters[slug][$eq]", slug)
}

pub fn parse_category_lookup(response: &HttpResponse) -> Result<Option<u64>> {
    let value: Value = response.json()?;
    Ok(value
        .get("data")
        .and_then(Value::as_array)
        .and_then(|entries| entries.first())
        .and_then(|entry| entry.get("id"))
        .and_then(Value::as_u64))
}

pub fn category_create_request(base_url: &str, name: &str, slug: &str) -> HttpRequest {
    HttpRequest::post(format!("{base_url}/api/categories"))
        .json(json!({ "data": { "name": name, "slug": slug } }))
}
