//! Subcommand implementations.

use anyhow::{bail, Context as _, Result};
use cms_migrate_core::cms::CmsClient;
use cms_migrate_core::config::{MigrationDefaults, PipelineConfig};
use cms_migrate_core::network::{HealthMonitor, HealthReport, HealthStatus, RetryPolicy, ServiceEndpoint};
use cms_migrate_core::persist::{text_companion, write_json_atomic, write_text_atomic};
use cms_migrate_core::pipeline::{
    fetch_all, fetch_all_migrated, BatchOrchestrator, InMemoryDedupStore, MediaMigrator, OrchestratorOptions,
    SchemaTransformer,
};
use cms_migrate_core::record::SourceRecord;
use cms_migrate_core::report::{render_comparison_text, render_migration_text, EnglishLabels, MigrationReport};
use cms_migrate_core::seo::{audit_site, RedirectGenerator, SiteAudit};
use cms_migrate_core::validation::{ComparisonReport, EquivalenceValidator};
use cms_migrate_core::NetworkConfig;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// How a command finished when it did not abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Outcome {
    Clean,
    /// Some records failed or validation found errors.
    RecordFailures,
}

/// Connected clients for one invocation.
pub struct Context {
    pub config: PipelineConfig,
    pub source: CmsClient,
    pub target: Arc<CmsClient>,
}

impl Context {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let source = CmsClient::from_settings(&config.source, config.http_timeout, config.max_retries)
            .context("Failed to build source client")?;
        let target = CmsClient::from_settings(&config.target, config.http_timeout, config.max_retries)
            .context("Failed to build target client")?;
        Ok(Self {
            config,
            source,
            target: Arc::new(target),
        })
    }

    fn monitor(&self) -> HealthMonitor {
        let mut endpoints = ServiceEndpoint::defaults_for(self.source.kind(), self.source.base_url());
        endpoints.extend(ServiceEndpoint::defaults_for(self.target.kind(), self.target.base_url()));
        HealthMonitor::new(self.target.client().clone(), endpoints)
    }
}

fn log_health(report: &HealthReport) {
    for endpoint in &report.endpoints {
        let status = endpoint.http_status.map(|s| s.to_string()).unwrap_or_else(|| "-".into());
        match endpoint.status {
            HealthStatus::Healthy => info!(
                "{}: {} (HTTP {}, {} ms)",
                endpoint.name, endpoint.status, status, endpoint.response_time_ms
            ),
            _ => warn!(
                "{}: {} (HTTP {}, {})",
                endpoint.name,
                endpoint.status,
                status,
                endpoint.error.as_deref().unwrap_or("unexpected status")
            ),
        }
    }
}

/// One health check; fails when any endpoint is unhealthy.
pub async fn health(ctx: &Context) -> Result<Outcome> {
    let report = ctx.monitor().check_now().await;
    log_health(&report);
    println!(
        "overall: {} ({} healthy, {} degraded, {} unhealthy)",
        report.overall, report.summary.healthy, report.summary.degraded, report.summary.unhealthy
    );
    if report.overall == HealthStatus::Unhealthy {
        bail!("Services are unhealthy");
    }
    Ok(Outcome::Clean)
}

/// Keep checking until interrupted.
pub async fn watch_health(ctx: &Context, interval: Duration) -> Result<Outcome> {
    let monitor = Arc::new(ctx.monitor().with_interval(interval));
    monitor.on_check(|report| {
        log_health(report);
        Ok(())
    });
    monitor.start();
    info!("Watching service health every {:?}; press Ctrl+C to stop", interval);

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;
    monitor.stop();
    info!("Health watch stopped");
    Ok(Outcome::Clean)
}

async fn fetch_sources(ctx: &Context) -> Result<Vec<SourceRecord>> {
    fetch_all(&ctx.source, ctx.config.page_size)
        .await
        .with_context(|| format!("Failed to fetch records from {}", ctx.source.base_url()))
}

fn write_report<T: serde::Serialize>(path: &Path, data: &T, text: &str) -> Result<()> {
    write_json_atomic(path, data).with_context(|| format!("Failed to write {}", path.display()))?;
    let text_path = text_companion(path);
    write_text_atomic(&text_path, text).with_context(|| format!("Failed to write {}", text_path.display()))?;
    info!("Report written to {} and {}", path.display(), text_path.display());
    Ok(())
}

/// Fetch, migrate and persist the migration report.
pub async fn migrate(ctx: &Context, report_path: &Path) -> Result<(MigrationReport, Vec<SourceRecord>)> {
    let records = fetch_sources(ctx).await?;

    let options = OrchestratorOptions::from(&ctx.config);
    let mut orchestrator = BatchOrchestrator::new(
        SchemaTransformer::new(ctx.source.base_url()),
        ctx.target.clone(),
        options,
    );
    if ctx.config.download_images {
        let downloader = ctx
            .source
            .client()
            .clone()
            .with_timeout(NetworkConfig::MEDIA_DOWNLOAD_TIMEOUT);
        orchestrator = orchestrator.with_media(MediaMigrator::new(
            downloader,
            ctx.target.clone(),
            ctx.config.scratch_dir.clone(),
        ));
    }

    let mut dedup = InMemoryDedupStore::new();
    let report = orchestrator.run(records.clone(), &mut dedup).await;

    let text = render_migration_text(&report, &EnglishLabels);
    write_report(report_path, &report, &text)?;
    print!("{text}");

    for entry in &report.errors {
        error!("Record {} failed at {}: {}", entry.record_id, entry.stage.as_str(), entry.message);
    }
    Ok((report, records))
}

/// Compare source and target, persisting the comparison report.
pub async fn validate(
    ctx: &Context,
    sources: Option<Vec<SourceRecord>>,
    report_path: &Path,
) -> Result<ComparisonReport> {
    let sources = match sources {
        Some(sources) => sources,
        None => fetch_sources(ctx).await?,
    };
    let targets = fetch_all_migrated(ctx.target.as_ref(), ctx.config.page_size)
        .await
        .with_context(|| format!("Failed to list migrated records from {}", ctx.target.base_url()))?;

    let validator = EquivalenceValidator::new(ctx.source.base_url()).with_toggles(ctx.config.validation);
    let report = validator.validate_run(&sources, &targets);

    let text = render_comparison_text(&report, &EnglishLabels);
    write_report(report_path, &report, &text)?;
    print!("{text}");
    Ok(report)
}

fn generator(ctx: &Context) -> RedirectGenerator {
    RedirectGenerator::new(
        ctx.config.public_source_base_url.clone(),
        ctx.config.public_target_base_url.clone(),
    )
}

/// Write redirect rules and a sitemap for the migrated records.
pub async fn redirects(ctx: &Context, out_dir: &Path) -> Result<usize> {
    let targets = fetch_all_migrated(ctx.target.as_ref(), ctx.config.page_size)
        .await
        .context("Failed to list migrated records")?;
    let generator = generator(ctx);
    let mappings = generator.build_mappings(&targets);

    let redirects_path = out_dir.join("redirects.conf");
    write_text_atomic(&redirects_path, &generator.emit_redirects(&mappings))?;
    let sitemap_path = out_dir.join("sitemap.xml");
    let today = chrono::Utc::now().date_naive();
    write_text_atomic(&sitemap_path, &generator.emit_sitemap(&targets, today))?;
    write_json_atomic(&out_dir.join("url-mappings.json"), &mappings)?;

    println!(
        "{} redirects -> {}, sitemap -> {}",
        mappings.len(),
        redirects_path.display(),
        sitemap_path.display()
    );
    Ok(mappings.len())
}

/// Audit up to `limit` migrated pages on the public site.
pub async fn audit(ctx: &Context, limit: usize, delay: Duration, report_path: &Path) -> Result<SiteAudit> {
    let targets = fetch_all_migrated(ctx.target.as_ref(), ctx.config.page_size)
        .await
        .context("Failed to list migrated records")?;
    let urls: Vec<String> = generator(ctx)
        .build_mappings(&targets)
        .into_iter()
        .map(|m| m.new_url)
        .collect();

    let page_client = ctx.target.client().clone().with_policy(RetryPolicy::none());
    let audit = audit_site(&page_client, &urls, limit, delay).await;
    write_json_atomic(report_path, &audit)?;

    for page in &audit.pages {
        println!("{:>3}  {}", page.score, page.url);
        for finding in &page.findings {
            println!("       - {}", finding.message);
        }
    }
    println!(
        "average score {:.1} over {} pages ({} unreachable)",
        audit.average_score,
        audit.pages.len(),
        audit.failures.len()
    );
    Ok(audit)
}

/// Abort before migrating if either side is unhealthy.
pub async fn preflight(ctx: &Context) -> Result<()> {
    let report = ctx.monitor().check_now().await;
    log_health(&report);
    if report.overall == HealthStatus::Unhealthy {
        bail!(
            "Pre-flight health check failed: {} of {} endpoints unhealthy",
            report.summary.unhealthy,
            report.summary.total
        );
    }
    Ok(())
}

/// Default artifact locations under `dir`.
pub struct ArtifactPaths {
    pub migration: PathBuf,
    pub validation: PathBuf,
    pub audit: PathBuf,
}

impl ArtifactPaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            migration: dir.join("migration-report.json"),
            validation: dir.join("validation-report.json"),
            audit: dir.join("seo-audit.json"),
        }
    }
}

pub fn default_audit_limit() -> usize {
    MigrationDefaults::AUDIT_PAGE_LIMIT
}

pub fn audit_delay(delay_ms: Option<u64>) -> Duration {
    delay_ms.map(Duration::from_millis).unwrap_or(MigrationDefaults::AUDIT_DELAY)
}

pub fn migration_outcome(report: &MigrationReport) -> Outcome {
    if report.has_failures() {
        Outcome::RecordFailures
    } else {
        Outcome::Clean
    }
}

pub fn validation_outcome(report: &ComparisonReport) -> Outcome {
    if report.has_errors() {
        Outcome::RecordFailures
    } else {
        Outcome::Clean
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cms_migrate_core::validation::ValidationIssue;
    use cms_migrate_core::validation::Severity;

    #[test]
    fn test_outcomes() {
        let mut report = MigrationReport::start(2, false);
        assert_eq!(migration_outcome(&report), Outcome::Clean);
        report.failed_articles = 1;
        assert_eq!(migration_outcome(&report), Outcome::RecordFailures);
        assert!(Outcome::RecordFailures > Outcome::Clean);
    }

    #[test]
    fn test_warnings_do_not_fail_validation() {
        let mut report = EquivalenceValidator::new("http://src").validate_run(&[], &[]);
        report.content.issues.push(ValidationIssue {
            severity: Severity::Warning,
            record_id: 1,
            field: "content_length".into(),
            source_value: None,
            target_value: None,
            message: "content length differs".into(),
        });
        assert_eq!(validation_outcome(&report), Outcome::Clean);

        report.metadata.issues.push(ValidationIssue {
            severity: Severity::Error,
            record_id: 1,
            field: "locale".into(),
            source_value: None,
            target_value: None,
            message: "locale mismatch".into(),
        });
        assert_eq!(validation_outcome(&report), Outcome::RecordFailures);
    }

    #[test]
    fn test_artifact_paths() {
        let paths = ArtifactPaths::in_dir(Path::new("out"));
        assert_eq!(paths.validation, PathBuf::from("out/validation-report.json"));
        assert_eq!(text_companion(&paths.migration), PathBuf::from("out/migration-report.txt"));
    }
}
