//! Migration pipeline: fetch, transform, media, orchestration.

mod fetch;
mod media;
mod orchestrator;
mod transform;

pub use fetch::{fetch_all, fetch_all_migrated, fetch_all_pages};
pub use media::{DedupEntry, DedupStore, InMemoryDedupStore, MediaMigrator};
pub use orchestrator::{BatchOrchestrator, OrchestratorOptions};
pub use transform::{
    expected_slug, flatten_body, normalize_date, parse_date, parse_metadata_sidecar, render_metadata_sidecar, slugify,
    SchemaTransformer,
};
pub(crate) use transform::escape_html;
