//! In-process mock CMS serving a WordPress source and a Strapi target.

#![allow(dead_code)]

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Default)]
pub struct MockState {
    pub wp_posts: Vec<Value>,
    pub articles: Vec<Value>,
    pub categories: Vec<Value>,
    pub uploads: usize,
    pub media_downloads: usize,
    pub post_page_requests: usize,
    pub category_creates: usize,
    pub health_status: Option<u16>,
}

pub type Shared = Arc<Mutex<MockState>>;

pub struct MockCms {
    pub base_url: String,
    pub state: Shared,
}

impl MockCms {
    pub async fn start() -> Self {
        let state: Shared = Arc::new(Mutex::new(MockState::default()));
        let app = Router::new()
            .route("/wp-json/wp/v2/posts", get(wp_posts))
            .route("/uploads/:name", get(media_file))
            .route("/api/health", get(health))
            .route("/api/articles", get(strapi_articles).post(create_article))
            .route("/api/upload", axum::routing::post(upload))
            .route("/api/categories", get(find_category).post(create_category))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
        }
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// A WordPress post as `/posts?_embed=1` returns it.
    pub fn wp_post(&self, id: u64, title: &str, cover: Option<&str>) -> Value {
        let mut post = json!({
            "id": id,
            "date": format!("2024-01-{:02}T08:00:00", id),
            "date_gmt": format!("2024-01-{:02}T08:00:00", id),
            "modified_gmt": format!("2024-02-{:02}T09:30:00", id),
            "slug": format!("post-{id}"),
            "title": { "rendered": title },
            "content": { "rendered": format!("<p>Body of post {id}</p>") },
            "excerpt": { "rendered": format!("<p>Summary {id}</p>\n") },
            "featured_media": 0,
            "categories": [3],
            "meta": { "locale": "en" },
            "_embedded": {
                "wp:term": [[{ "id": 3, "name": "News", "slug": "news", "taxonomy": "category" }]]
            }
        });
        if let Some(file) = cover {
            post["featured_media"] = json!(10);
            post["_embedded"]["wp:featuredmedia"] = json!([{
                "id": 10,
                "source_url": format!("{}/uploads/{file}", self.base_url),
                "alt_text": "cover"
            }]);
        }
        post
    }
}

fn param(query: &HashMap<String, String>, key: &str, default: usize) -> usize {
    query.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

async fn wp_posts(State(state): State<Shared>, Query(query): Query<HashMap<String, String>>) -> Response {
    let mut state = state.lock().unwrap();
    state.post_page_requests += 1;
    let page = param(&query, "page", 1);
    let per_page = param(&query, "per_page", 10).max(1);
    let total = state.wp_posts.len();
    let total_pages = total.div_ceil(per_page).max(1);

    if page > total_pages {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "code": "rest_post_invalid_page_number" })),
        )
            .into_response();
    }

    let items: Vec<Value> = state
        .wp_posts
        .iter()
        .skip((page - 1) * per_page)
        .take(per_page)
        .cloned()
        .collect();
    (
        [
            ("X-WP-Total", total.to_string()),
            ("X-WP-TotalPages", total_pages.to_string()),
        ],
        Json(items),
    )
        .into_response()
}

async fn media_file(State(state): State<Shared>) -> &'static str {
    state.lock().unwrap().media_downloads += 1;
    "fake-jpeg-bytes"
}

async fn health(State(state): State<Shared>) -> StatusCode {
    let status = state.lock().unwrap().health_status.unwrap_or(204);
    StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

async fn strapi_articles(State(state): State<Shared>, Query(query): Query<HashMap<String, String>>) -> Json<Value> {
    let state = state.lock().unwrap();
    let page = param(&query, "pagination[page]", 1).max(1);
    let page_size = param(&query, "pagination[pageSize]", 25).max(1);
    let total = state.articles.len();
    let data: Vec<Value> = state
        .articles
        .iter()
        .skip((page - 1) * page_size)
        .take(page_size)
        .cloned()
        .collect();
    Json(json!({
        "data": data,
        "meta": { "pagination": {
            "page": page,
            "pageSize": page_size,
            "pageCount": total.div_ceil(page_size),
            "total": total
        }}
    }))
}

async fn create_article(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    let mut state = state.lock().unwrap();
    let Some(mut entry) = body.get("data").cloned() else {
        return (StatusCode::BAD_REQUEST, "missing data").into_response();
    };
    let id = state.articles.len() as u64 + 1;
    entry["id"] = json!(id);
    entry["documentId"] = json!(format!("doc-{id}"));

    if let Some(cover_id) = entry.get("cover").and_then(Value::as_u64) {
        entry["cover"] = json!({ "id": cover_id, "url": format!("/uploads/migrated-{cover_id}.jpg") });
    }
    let category_ids: Vec<u64> = entry
        .get("categories")
        .and_then(Value::as_array)
        .map(|ids| ids.iter().filter_map(Value::as_u64).collect())
        .unwrap_or_default();
    entry["categories"] = json!(state
        .categories
        .iter()
        .filter(|c| c["id"].as_u64().is_some_and(|id| category_ids.contains(&id)))
        .cloned()
        .collect::<Vec<_>>());

    state.articles.push(entry);
    Json(json!({ "data": { "id": id, "documentId": format!("doc-{id}") } })).into_response()
}

async fn upload(State(state): State<Shared>, body: Bytes) -> Response {
    if body.is_empty() {
        return (StatusCode::BAD_REQUEST, "empty upload").into_response();
    }
    let mut state = state.lock().unwrap();
    state.uploads += 1;
    let id = 500 + state.uploads as u64;
    Json(json!([{ "id": id, "url": format!("/uploads/migrated-{id}.jpg"), "name": "cover.jpg" }])).into_response()
}

async fn find_category(State(state): State<Shared>, Query(query): Query<HashMap<String, String>>) -> Json<Value> {
    let state = state.lock().unwrap();
    let slug = query.get("filters[slug][$eq]").cloned().unwrap_or_default();
    let data: Vec<Value> = state
        .categories
        .iter()
        .filter(|c| c["slug"] == json!(slug))
        .cloned()
        .collect();
    Json(json!({ "data": data }))
}

async fn create_category(State(state): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    let mut state = state.lock().unwrap();
    state.category_creates += 1;
    let id = state.categories.len() as u64 + 1;
    let category = json!({
        "id": id,
        "name": body["data"]["name"].clone(),
        "slug": body["data"]["slug"].clone()
    });
    state.categories.push(category);
    Json(json!({ "data": { "id": id } }))
}
