//! Batched end-to-end migration.
//!
//! Each batch runs three stages: transform every record, migrate the
//! distinct cover images not seen before, then write every record. Stage
//! handlers return their own outcome; the report, the dedup store and the
//! category cache are only touched here, after each stage joins.

use crate::cms::RecordSink;
use crate::config::{MigrationDefaults, PipelineConfig};
use crate::pipeline::media::{DedupEntry, DedupStore, MediaMigrator};
use crate::pipeline::transform::SchemaTransformer;
use crate::record::{CoverSlot, MediaAsset, RecordState, SourceRecord, TargetRecord};
use crate::report::{ErrorEntry, MediaStats, MigrationReport, RecordSummary, Stage};
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Knobs for one orchestrated run.
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub batch_size: usize,
    pub inter_batch_delay: Duration,
    pub dry_run: bool,
    pub download_images: bool,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            batch_size: MigrationDefaults::BATCH_SIZE,
            inter_batch_delay: MigrationDefaults::INTER_BATCH_DELAY,
            dry_run: false,
            download_images: true,
        }
    }
}

impl From<&PipelineConfig> for OrchestratorOptions {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            inter_batch_delay: config.inter_batch_delay,
            dry_run: config.dry_run,
            download_images: config.download_images,
        }
    }
}

/// A record moving through the stages of one batch.
struct InFlight {
    source_id: u64,
    state: RecordState,
    target: Option<TargetRecord>,
    target_id: Option<u64>,
    errors: Vec<ErrorEntry>,
}

impl InFlight {
    fn fail(&mut self, stage: Stage, message: String) {
        warn!("Record {} failed at {}: {}", self.source_id, stage.as_str(), message);
        self.state = std::mem::replace(&mut self.state, RecordState::Pending)
            .advance(RecordState::Failed(message.clone()));
        self.errors.push(ErrorEntry::new(self.source_id, stage, message));
    }

    fn advance(&mut self, next: RecordState) {
        self.state = std::mem::replace(&mut self.state, RecordState::Pending).advance(next);
    }
}

/// Drives records through transform, media and write in batches.
pub struct BatchOrchestrator {
    transformer: SchemaTransformer,
    sink: Arc<dyn RecordSink>,
    media: Option<MediaMigrator>,
    options: OrchestratorOptions,
}

impl BatchOrchestrator {
    pub fn new(transformer: SchemaTransformer, sink: Arc<dyn RecordSink>, options: OrchestratorOptions) -> Self {
        Self {
            transformer,
            sink,
            media: None,
            options,
        }
    }

    /// Enable cover image migration.
    pub fn with_media(mut self, media: MediaMigrator) -> Self {
        self.media = Some(media);
        self
    }

    pub fn options(&self) -> &OrchestratorOptions {
        &self.options
    }

    /// Migrate all records, returning the finished report.
    pub async fn run(&self, records: Vec<SourceRecord>, dedup: &mut dyn DedupStore) -> MigrationReport {
        let mut report = MigrationReport::start(records.len(), self.options.dry_run);
        let batch_size = self.options.batch_size.max(1);
        let batch_count = records.len().div_ceil(batch_size);
        let mut categories: HashMap<String, u64> = HashMap::new();

        if self.options.dry_run {
            info!("Dry run: no media uploads or record writes will be performed");
        }

        for (index, batch) in records.chunks(batch_size).enumerate() {
            info!(
                "Processing batch {}/{} ({} records)",
                index + 1,
                batch_count,
                batch.len()
            );

            let mut flights = self.transform_batch(batch);
            self.resolve_media(&mut flights, dedup, &mut report.media).await;
            self.resolve_categories(&mut flights, &mut categories).await;
            self.write_batch(&mut flights).await;

            for flight in flights {
                match flight.state {
                    RecordState::Written => report.migrated_articles += 1,
                    RecordState::Failed(_) => report.failed_articles += 1,
                    ref other => debug!("Record {} ended batch in state {}", flight.source_id, other.label()),
                }
                report.errors.extend(flight.errors);
                report.records.push(RecordSummary {
                    source_id: flight.source_id,
                    target_id: flight.target_id,
                    state: flight.state,
                });
            }
            report.batches_executed += 1;

            if index + 1 < batch_count && !self.options.inter_batch_delay.is_zero() {
                debug!("Cooling down for {:?}", self.options.inter_batch_delay);
                tokio::time::sleep(self.options.inter_batch_delay).await;
            }
        }

        report.finish();
        info!(
            "Migration finished: {}/{} migrated, {} failed, {} batches",
            report.migrated_articles, report.total_articles, report.failed_articles, report.batches_executed
        );
        report
    }

    fn transform_batch(&self, batch: &[SourceRecord]) -> Vec<InFlight> {
        batch
            .iter()
            .map(|record| {
                let mut flight = InFlight {
                    source_id: record.id,
                    state: RecordState::Pending.advance(RecordState::Fetched),
                    target: None,
                    target_id: None,
                    errors: Vec::new(),
                };
                match self.transformer.transform(record) {
                    Ok(target) => {
                        flight.target = Some(target);
                        flight.advance(RecordState::Transformed);
                    }
                    Err(e) => flight.fail(Stage::Transform, e.to_string()),
                }
                flight
            })
            .collect()
    }

    async fn resolve_media(&self, flights: &mut [InFlight], dedup: &mut dyn DedupStore, stats: &mut MediaStats) {
        let migrator = match &self.media {
            Some(media) if self.options.download_images && !self.options.dry_run => Some(media),
            _ => None,
        };

        let mut seen = HashSet::new();
        let pending: Vec<MediaAsset> = flights
            .iter()
            .filter_map(|f| match f.target.as_ref().map(|t| &t.cover) {
                Some(CoverSlot::Pending(asset)) => Some(asset.clone()),
                _ => None,
            })
            .filter(|asset| dedup.lookup(&asset.remote_url).is_none())
            .filter(|asset| seen.insert(asset.remote_url.clone()))
            .collect();

        let mut fresh = HashSet::new();
        if let Some(migrator) = migrator {
            if !pending.is_empty() {
                debug!("Migrating {} distinct cover images", pending.len());
                let results = join_all(pending.iter().map(|asset| migrator.migrate(asset))).await;
                for (asset, result) in pending.iter().zip(results) {
                    let entry = match result {
                        Ok(handle) => {
                            fresh.insert(asset.remote_url.clone());
                            DedupEntry::Uploaded(handle)
                        }
                        Err(e) => DedupEntry::Failed(e.to_string()),
                    };
                    dedup.record(&asset.remote_url, entry);
                }
            }
        }

        for flight in flights.iter_mut() {
            if flight.state != RecordState::Transformed {
                continue;
            }
            let Some(target) = flight.target.as_mut() else {
                continue;
            };

            if let CoverSlot::Pending(asset) = std::mem::take(&mut target.cover) {
                stats.total += 1;
                match migrator.and_then(|_| dedup.lookup(&asset.remote_url)) {
                    Some(DedupEntry::Uploaded(handle)) => {
                        if fresh.remove(&asset.remote_url) {
                            stats.migrated += 1;
                        } else {
                            stats.deduplicated += 1;
                        }
                        target.cover = CoverSlot::Resolved(handle);
                    }
                    Some(DedupEntry::Failed(reason)) => {
                        stats.failed += 1;
                        warn!("Record {} continues without cover: {}", flight.source_id, reason);
                        flight
                            .errors
                            .push(ErrorEntry::new(flight.source_id, Stage::Media, reason));
                    }
                    None => {
                        stats.skipped += 1;
                        if self.options.dry_run {
                            info!("[dry-run] Would migrate cover {}", asset.remote_url);
                        }
                    }
                }
            }
            flight.advance(RecordState::MediaResolved);
        }
    }

    async fn resolve_categories(&self, flights: &mut [InFlight], cache: &mut HashMap<String, u64>) {
        if self.options.dry_run {
            return;
        }

        let mut failures: HashMap<String, String> = HashMap::new();
        let mut wanted: Vec<String> = Vec::new();
        for flight in flights.iter() {
            if let Some(target) = &flight.target {
                for name in &target.categories {
                    if !cache.contains_key(name) && !wanted.contains(name) {
                        wanted.push(name.clone());
                    }
                }
            }
        }

        // Sequential so two records never race to create the same category.
        for name in wanted {
            match self.sink.resolve_category(&name).await {
                Ok(id) => {
                    cache.insert(name, id);
                }
                Err(e) => {
                    failures.insert(name, e.to_string());
                }
            }
        }

        for flight in flights.iter_mut() {
            if flight.state != RecordState::MediaResolved {
                continue;
            }
            let Some(target) = flight.target.as_mut() else {
                continue;
            };
            target.category_ids = target
                .categories
                .iter()
                .filter_map(|name| cache.get(name).copied())
                .collect();
            for name in &target.categories {
                if let Some(reason) = failures.get(name) {
                    flight.errors.push(ErrorEntry::new(
                        flight.source_id,
                        Stage::Taxonomy,
                        format!("category '{name}' unresolved: {reason}"),
                    ));
                }
            }
        }
    }

    async fn write_batch(&self, flights: &mut [InFlight]) {
        let dry_run = self.options.dry_run;
        let sink = &self.sink;

        let results = join_all(flights.iter().map(|flight| async move {
            let target = match (&flight.state, &flight.target) {
                (RecordState::MediaResolved, Some(target)) => target,
                _ => return None,
            };
            if dry_run {
                info!(
                    "[dry-run] Would write record {} as '{}' ({})",
                    flight.source_id, target.title, target.slug
                );
                return Some(Ok(None));
            }
            Some(sink.write_record(target).await.map(Some))
        }))
        .await;

        for (flight, result) in flights.iter_mut().zip(results) {
            match result {
                Some(Ok(target_id)) => {
                    flight.target_id = target_id;
                    flight.advance(RecordState::Written);
                }
                Some(Err(e)) => flight.fail(Stage::Write, e.to_string()),
                None => {}
            }
        }
    }
}
