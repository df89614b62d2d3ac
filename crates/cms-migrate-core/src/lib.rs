//! CMS Migrate Core - headless library for moving content between CMS APIs.
//!
//! Fetches records from a WordPress-style or Strapi-style source, transforms
//! them into the target schema, re-hosts cover images, writes them in
//! concurrent batches and verifies the result. SEO helpers produce redirect
//! rules, a sitemap and an on-page audit for the new site.
//!
//! # Example
//!
//! ```rust,ignore
//! use cms_migrate_core::cms::CmsClient;
//! use cms_migrate_core::config::PipelineConfig;
//! use cms_migrate_core::pipeline::{fetch_all, BatchOrchestrator, InMemoryDedupStore, SchemaTransformer};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> cms_migrate_core::Result<()> {
//!     let config = PipelineConfig::from_env()?;
//!     let source = CmsClient::from_settings(&config.source, config.http_timeout, config.max_retries)?;
//!     let target = CmsClient::from_settings(&config.target, config.http_timeout, config.max_retries)?;
//!
//!     let records = fetch_all(&source, config.page_size).await?;
//!     let orchestrator = BatchOrchestrator::new(
//!         SchemaTransformer::new(source.base_url()),
//!         Arc::new(target),
//!         (&config).into(),
//!     );
//!     let report = orchestrator.run(records, &mut InMemoryDedupStore::new()).await;
//!     println!("{} migrated, {} failed", report.migrated_articles, report.failed_articles);
//!     Ok(())
//! }
//! ```

pub mod cms;
pub mod config;
pub mod error;
pub mod network;
pub mod persist;
pub mod pipeline;
pub mod record;
pub mod report;
pub mod seo;
pub mod validation;

pub use cms::{CmsClient, CmsKind, MigratedReader, Page, RecordSink, RecordSource, SourceDocument};
pub use config::{CmsSettings, MigrationDefaults, NetworkConfig, PipelineConfig, ValidationToggles};
pub use error::{MigrateError, Result};
pub use network::{HealthMonitor, HealthReport, HealthStatus, ResilientClient, RetryPolicy, ServiceEndpoint};
pub use pipeline::{BatchOrchestrator, DedupStore, InMemoryDedupStore, MediaMigrator, SchemaTransformer};
pub use record::{RecordState, SourceRecord, TargetRecord};
pub use report::{EnglishLabels, Labels, MigrationReport};
pub use seo::{RedirectGenerator, UrlMapping};
pub use validation::{ComparisonReport, EquivalenceValidator, Severity, ValidationIssue, ValidationResult};
