//! Run reports and their human-readable rendering.

use crate::record::RecordState;
use crate::validation::{ComparisonReport, Severity, ValidationResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write as _;
use uuid::Uuid;

/// Pipeline stage a record error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Transform,
    Media,
    Taxonomy,
    Write,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Transform => "transform",
            Stage::Media => "media",
            Stage::Taxonomy => "taxonomy",
            Stage::Write => "write",
        }
    }
}

/// One record-level failure.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEntry {
    pub record_id: u64,
    pub stage: Stage,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ErrorEntry {
    pub fn new(record_id: u64, stage: Stage, message: impl Into<String>) -> Self {
        Self {
            record_id,
            stage,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Cover media counters, one unit per record cover reference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MediaStats {
    pub total: usize,
    /// Freshly uploaded during this run.
    pub migrated: usize,
    pub failed: usize,
    /// Satisfied by an earlier upload of the same URL.
    pub deduplicated: usize,
    /// Not attempted (downloads disabled or dry run).
    pub skipped: usize,
}

/// Final state of one record in a migration run.
#[derive(Debug, Clone, Serialize)]
pub struct RecordSummary {
    pub source_id: u64,
    pub target_id: Option<u64>,
    pub state: RecordState,
}

/// Aggregate outcome of a migration run.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub run_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub total_articles: usize,
    pub migrated_articles: usize,
    pub failed_articles: usize,
    pub batches_executed: usize,
    pub dry_run: bool,
    pub success_rate: f64,
    pub media: MediaStats,
    pub errors: Vec<ErrorEntry>,
    pub records: Vec<RecordSummary>,
}

impl MigrationReport {
    pub fn start(total_articles: usize, dry_run: bool) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            start_time: Utc::now(),
            end_time: None,
            total_articles,
            migrated_articles: 0,
            failed_articles: 0,
            batches_executed: 0,
            dry_run,
            success_rate: 0.0,
            media: MediaStats::default(),
            errors: Vec::new(),
            records: Vec::new(),
        }
    }

    /// Stamp the end time and compute the success rate.
    pub fn finish(&mut self) {
        self.end_time = Some(Utc::now());
        self.success_rate = if self.total_articles == 0 {
            0.0
        } else {
            self.migrated_articles as f64 / self.total_articles as f64 * 100.0
        };
    }

    pub fn has_failures(&self) -> bool {
        self.failed_articles > 0
    }

    pub fn duration_secs(&self) -> Option<f64> {
        self.end_time
            .map(|end| (end - self.start_time).num_milliseconds() as f64 / 1000.0)
    }
}

/// Keys for report text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Label {
    MigrationTitle,
    ComparisonTitle,
    RunId,
    StartTime,
    EndTime,
    Duration,
    DryRun,
    TotalArticles,
    Migrated,
    Failed,
    SuccessRate,
    Batches,
    MediaFiles,
    Deduplicated,
    Skipped,
    Errors,
    SourceArticles,
    TargetArticles,
    MatchedArticles,
    ContentCheck,
    MediaCheck,
    MetadataCheck,
    Checked,
    Passed,
    Warnings,
    OverallScore,
    Recommendations,
    Issues,
    Orphans,
    Error,
    Warning,
}

/// Lookup table for report strings.
pub trait Labels {
    fn text(&self, label: Label) -> &str;
}

/// Default English strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnglishLabels;

impl Labels for EnglishLabels {
    fn text(&self, label: Label) -> &str {
        match label {
            Label::MigrationTitle => "Migration Report",
            Label::ComparisonTitle => "Migration Validation Report",
            Label::RunId => "Run",
            Label::StartTime => "Started",
            Label::EndTime => "Finished",
            Label::Duration => "Duration (s)",
            Label::DryRun => "Dry run",
            Label::TotalArticles => "Total articles",
            Label::Migrated => "Migrated",
            Label::Failed => "Failed",
            Label::SuccessRate => "Success rate",
            Label::Batches => "Batches",
            Label::MediaFiles => "Media files",
            Label::Deduplicated => "Deduplicated",
            Label::Skipped => "Skipped",
            Label::Errors => "Errors",
            Label::SourceArticles => "Source articles",
            Label::TargetArticles => "Target articles",
            Label::MatchedArticles => "Matched articles",
            Label::ContentCheck => "Content",
            Label::MediaCheck => "Media",
            Label::MetadataCheck => "Metadata",
            Label::Checked => "checked",
            Label::Passed => "passed",
            Label::Warnings => "warnings",
            Label::OverallScore => "Overall score",
            Label::Recommendations => "Recommendations",
            Label::Issues => "Issues",
            Label::Orphans => "Orphaned target records",
            Label::Error => "ERROR",
            Label::Warning => "WARNING",
        }
    }
}

fn rule(out: &mut String, title: &str) {
    let _ = writeln!(out, "{title}");
    let _ = writeln!(out, "{}", "=".repeat(title.chars().count().max(20)));
}

fn timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Render a migration report as plain text.
pub fn render_migration_text(report: &MigrationReport, labels: &dyn Labels) -> String {
    let l = |label| labels.text(label);
    let mut out = String::new();

    rule(&mut out, l(Label::MigrationTitle));
    let _ = writeln!(out, "{}: {}", l(Label::RunId), report.run_id);
    let _ = writeln!(out, "{}: {}", l(Label::StartTime), timestamp(&report.start_time));
    if let Some(end) = &report.end_time {
        let _ = writeln!(out, "{}: {}", l(Label::EndTime), timestamp(end));
    }
    if let Some(secs) = report.duration_secs() {
        let _ = writeln!(out, "{}: {:.1}", l(Label::Duration), secs);
    }
    if report.dry_run {
        let _ = writeln!(out, "{}: true", l(Label::DryRun));
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "{}: {}", l(Label::TotalArticles), report.total_articles);
    let _ = writeln!(out, "{}: {}", l(Label::Migrated), report.migrated_articles);
    let _ = writeln!(out, "{}: {}", l(Label::Failed), report.failed_articles);
    let _ = writeln!(out, "{}: {:.1}%", l(Label::SuccessRate), report.success_rate);
    let _ = writeln!(out, "{}: {}", l(Label::Batches), report.batches_executed);
    let _ = writeln!(
        out,
        "{}: {} ({} {}, {} {}, {} {}, {} {})",
        l(Label::MediaFiles),
        report.media.total,
        report.media.migrated,
        l(Label::Migrated),
        report.media.failed,
        l(Label::Failed),
        report.media.deduplicated,
        l(Label::Deduplicated),
        report.media.skipped,
        l(Label::Skipped),
    );

    if !report.errors.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "{} ({}):", l(Label::Errors), report.errors.len());
        for entry in &report.errors {
            let _ = writeln!(
                out,
                "  - [{}] #{} {}: {}",
                timestamp(&entry.timestamp),
                entry.record_id,
                entry.stage.as_str(),
                entry.message
            );
        }
    }

    out
}

fn render_result(out: &mut String, title: &str, result: &ValidationResult, labels: &dyn Labels) {
    let _ = writeln!(
        out,
        "{}: {} {}, {} {}, {} {}, {} {}",
        title,
        result.total_checked,
        labels.text(Label::Checked),
        result.passed,
        labels.text(Label::Passed),
        result.failed,
        labels.text(Label::Failed).to_lowercase(),
        result.warnings,
        labels.text(Label::Warnings),
    );
}

/// Render a comparison report as plain text.
pub fn render_comparison_text(report: &ComparisonReport, labels: &dyn Labels) -> String {
    let l = |label| labels.text(label);
    let mut out = String::new();

    rule(&mut out, l(Label::ComparisonTitle));
    let _ = writeln!(out, "{}: {}", l(Label::StartTime), timestamp(&report.start_time));
    if let Some(end) = &report.end_time {
        let _ = writeln!(out, "{}: {}", l(Label::EndTime), timestamp(end));
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "{}: {}", l(Label::SourceArticles), report.source_articles);
    let _ = writeln!(out, "{}: {}", l(Label::TargetArticles), report.target_articles);
    let _ = writeln!(out, "{}: {}", l(Label::MatchedArticles), report.matched_articles);
    let _ = writeln!(out);
    render_result(&mut out, l(Label::ContentCheck), &report.content, labels);
    render_result(&mut out, l(Label::MediaCheck), &report.media, labels);
    render_result(&mut out, l(Label::MetadataCheck), &report.metadata, labels);
    let _ = writeln!(out);
    let _ = writeln!(out, "{}: {:.1}%", l(Label::OverallScore), report.summary.overall_score);

    let _ = writeln!(out);
    let _ = writeln!(out, "{}:", l(Label::Recommendations));
    for recommendation in &report.summary.recommendations {
        let _ = writeln!(out, "  - {recommendation}");
    }

    let issues: Vec<_> = report.all_issues().collect();
    if !issues.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "{} ({}):", l(Label::Issues), issues.len());
        for issue in issues {
            let severity = match issue.severity {
                Severity::Error => l(Label::Error),
                Severity::Warning => l(Label::Warning),
            };
            let _ = writeln!(
                out,
                "  - {} #{} {}: {}",
                severity, issue.record_id, issue.field, issue.message
            );
        }
    }

    if !report.orphaned_targets.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "{} ({}):", l(Label::Orphans), report.orphaned_targets.len());
        for orphan in &report.orphaned_targets {
            let _ = writeln!(
                out,
                "  - {} (target {}, external_id {})",
                orphan.title,
                orphan.target_id.map(|id| id.to_string()).unwrap_or_else(|| "-".into()),
                orphan.external_id.map(|id| id.to_string()).unwrap_or_else(|| "-".into()),
            );
        }
    }

    out
}
