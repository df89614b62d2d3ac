//! Source/target equivalence checks.
//!
//! Each matched record is checked once per enabled category. A category
//! check passes when it raises no issue and fails when it raises at least
//! one error; warnings are counted separately.

mod fields;

pub use fields::{image_count, plain_text, text_length, CheckCategory, FieldValue};

use crate::config::{MigrationDefaults, ValidationToggles};
use crate::pipeline::flatten_body;
use crate::record::{RecordState, SourceRecord, TargetRecord};
use crate::MigrateError;
use chrono::{DateTime, Utc};
use fields::{fields_for, Comparison, FieldAccessor, SourceView, TargetView};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub record_id: u64,
    pub field: String,
    pub source_value: Option<String>,
    pub target_value: Option<String>,
    pub message: String,
}

/// Aggregated outcome of one category of checks.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationResult {
    pub total_checked: usize,
    pub passed: usize,
    pub failed: usize,
    pub warnings: usize,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    fn from_issues(issues: Vec<ValidationIssue>) -> Self {
        let errors = issues.iter().filter(|i| i.severity == Severity::Error).count();
        Self {
            total_checked: 1,
            passed: usize::from(issues.is_empty()),
            failed: usize::from(errors > 0),
            warnings: issues.len() - errors,
            issues,
        }
    }

    pub fn merge(&mut self, other: ValidationResult) {
        self.total_checked += other.total_checked;
        self.passed += other.passed;
        self.failed += other.failed;
        self.warnings += other.warnings;
        self.issues.extend(other.issues);
    }

    pub fn error_count(&self) -> usize {
        self.issues.iter().filter(|i| i.severity == Severity::Error).count()
    }
}

/// Target record with no counterpart in the source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrphanTarget {
    pub target_id: Option<u64>,
    pub external_id: Option<u64>,
    pub title: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ComparisonSummary {
    pub overall_score: f64,
    pub recommendations: Vec<String>,
}

/// Final state of one source record after validation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordVerdict {
    pub source_id: u64,
    pub target_id: Option<u64>,
    pub state: RecordState,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComparisonReport {
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub source_articles: usize,
    pub target_articles: usize,
    pub matched_articles: usize,
    pub content: ValidationResult,
    pub media: ValidationResult,
    pub metadata: ValidationResult,
    pub orphaned_targets: Vec<OrphanTarget>,
    pub summary: ComparisonSummary,
    pub verdicts: Vec<RecordVerdict>,
}

impl ComparisonReport {
    fn start(source_articles: usize, target_articles: usize) -> Self {
        Self {
            start_time: Utc::now(),
            end_time: None,
            source_articles,
            target_articles,
            matched_articles: 0,
            content: ValidationResult::default(),
            media: ValidationResult::default(),
            metadata: ValidationResult::default(),
            orphaned_targets: Vec::new(),
            summary: ComparisonSummary::default(),
            verdicts: Vec::new(),
        }
    }

    pub fn result(&self, category: CheckCategory) -> &ValidationResult {
        match category {
            CheckCategory::Content => &self.content,
            CheckCategory::Media => &self.media,
            CheckCategory::Metadata => &self.metadata,
        }
    }

    fn result_mut(&mut self, category: CheckCategory) -> &mut ValidationResult {
        match category {
            CheckCategory::Content => &mut self.content,
            CheckCategory::Media => &mut self.media,
            CheckCategory::Metadata => &mut self.metadata,
        }
    }

    pub fn all_issues(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.content
            .issues
            .iter()
            .chain(&self.media.issues)
            .chain(&self.metadata.issues)
    }

    /// Whether any error-severity issue was found. Warnings never count.
    pub fn has_errors(&self) -> bool {
        self.all_issues().any(|i| i.severity == Severity::Error)
    }
}

/// Compares source records with what landed in the target.
#[derive(Debug, Clone)]
pub struct EquivalenceValidator {
    toggles: ValidationToggles,
    length_tolerance: f64,
    date_tolerance_days: i64,
    default_locale: String,
    source_base_url: String,
}

impl EquivalenceValidator {
    pub fn new(source_base_url: impl Into<String>) -> Self {
        Self {
            toggles: ValidationToggles::default(),
            length_tolerance: MigrationDefaults::LENGTH_TOLERANCE,
            date_tolerance_days: MigrationDefaults::DATE_TOLERANCE_DAYS,
            default_locale: MigrationDefaults::DEFAULT_LOCALE.to_string(),
            source_base_url: source_base_url.into(),
        }
    }

    pub fn with_toggles(mut self, toggles: ValidationToggles) -> Self {
        self.toggles = toggles;
        self
    }

    pub fn with_length_tolerance(mut self, tolerance: f64) -> Self {
        self.length_tolerance = tolerance;
        self
    }

    pub fn with_date_tolerance_days(mut self, days: i64) -> Self {
        self.date_tolerance_days = days;
        self
    }

    pub fn with_default_locale(mut self, locale: impl Into<String>) -> Self {
        self.default_locale = locale.into();
        self
    }

    fn enabled(&self) -> Vec<CheckCategory> {
        CheckCategory::ALL
            .into_iter()
            .filter(|c| match c {
                CheckCategory::Content => self.toggles.check_content,
                CheckCategory::Media => self.toggles.check_media,
                CheckCategory::Metadata => self.toggles.check_metadata,
            })
            .collect()
    }

    fn source_view<'a>(&self, source: &'a SourceRecord) -> SourceView<'a> {
        SourceView::new(
            source,
            flatten_body(&source.body, &self.source_base_url),
            &self.default_locale,
        )
    }

    /// Check one source/target pair across every enabled category.
    pub fn compare(&self, source: &SourceRecord, target: &TargetRecord) -> ValidationResult {
        let source_view = self.source_view(source);
        let target_view = TargetView::new(target);
        let mut result = ValidationResult::default();
        for category in self.enabled() {
            result.merge(self.check_category(category, &source_view, &target_view));
        }
        result
    }

    fn check_category(
        &self,
        category: CheckCategory,
        source: &SourceView<'_>,
        target: &TargetView<'_>,
    ) -> ValidationResult {
        let issues = fields_for(category)
            .filter_map(|accessor| self.evaluate(accessor, source, target))
            .collect();
        ValidationResult::from_issues(issues)
    }

    fn evaluate(
        &self,
        accessor: &FieldAccessor,
        source: &SourceView<'_>,
        target: &TargetView<'_>,
    ) -> Option<ValidationIssue> {
        let left = (accessor.source)(source);
        let right = (accessor.target)(target);

        let (severity, message) = match (accessor.comparison, &left, &right) {
            (Comparison::Exact, l, r) if l != r => (Severity::Error, format!("{} mismatch", accessor.field)),
            (Comparison::WhenBothPresent, Some(l), Some(r)) if l != r => {
                (Severity::Warning, format!("{} differs", accessor.field))
            }
            (Comparison::LengthTolerance, Some(FieldValue::Count(a)), Some(FieldValue::Count(b))) => {
                let longest = (*a).max(*b);
                if longest == 0 {
                    return None;
                }
                let ratio = a.abs_diff(*b) as f64 / longest as f64;
                if ratio <= self.length_tolerance {
                    return None;
                }
                (Severity::Warning, format!("content length differs by {:.1}%", ratio * 100.0))
            }
            (Comparison::DateTolerance, Some(FieldValue::Date(a)), Some(FieldValue::Date(b))) => {
                let diff = (*a - *b).abs();
                if diff <= chrono::Duration::days(self.date_tolerance_days) {
                    return None;
                }
                let days = diff.num_seconds() as f64 / 86_400.0;
                (Severity::Warning, format!("publication date differs by {days:.1} days"))
            }
            (Comparison::TargetOptional, l, Some(r)) if l.as_ref() != Some(r) => {
                (Severity::Error, format!("{} mismatch", accessor.field))
            }
            (Comparison::BackReference, l, r) if l != r => {
                let message = match r {
                    None => format!("{} not stored on target", accessor.field),
                    Some(_) => format!("{} points at another record", accessor.field),
                };
                (Severity::Error, message)
            }
            (Comparison::Presence, Some(FieldValue::Present(true)), Some(FieldValue::Present(false))) => {
                (Severity::Error, format!("{} present in source but missing in target", accessor.field))
            }
            (Comparison::Presence, Some(FieldValue::Present(false)), Some(FieldValue::Present(true))) => {
                (Severity::Warning, format!("{} present in target but not in source", accessor.field))
            }
            (Comparison::CountMatch, Some(l), Some(r)) if l != r => {
                (Severity::Warning, format!("{} count differs", accessor.field))
            }
            _ => return None,
        };

        Some(ValidationIssue {
            severity,
            record_id: source.record.id,
            field: accessor.field.to_string(),
            source_value: left.map(|v| v.display()),
            target_value: right.map(|v| v.display()),
            message,
        })
    }

    /// Correlate both record sets and check every source record.
    pub fn validate_run(&self, sources: &[SourceRecord], targets: &[TargetRecord]) -> ComparisonReport {
        let mut report = ComparisonReport::start(sources.len(), targets.len());
        let enabled = self.enabled();

        let mut by_title: HashMap<String, &TargetRecord> = HashMap::new();
        let mut by_reference: HashMap<u64, &TargetRecord> = HashMap::new();
        for target in targets {
            by_title.entry(title_key(&target.title)).or_insert(target);
            if let Some(id) = target.external_id {
                by_reference.entry(id).or_insert(target);
            }
        }

        for source in sources {
            let by_title_match = by_title.get(&title_key(&source.title)).copied();
            let by_reference_match = by_reference.get(&source.id).copied();

            let (content_target, metadata_target) =
                match (by_title_match.or(by_reference_match), by_reference_match.or(by_title_match)) {
                    (Some(c), Some(m)) => (c, m),
                    _ => {
                        let missing = MigrateError::Existence {
                            record_id: source.id,
                            present_in: "source".into(),
                            missing_in: "target".into(),
                        };
                        warn!("{}", missing);
                        if let Some(first) = enabled.first() {
                            report.result_mut(*first).merge(ValidationResult::from_issues(vec![
                                ValidationIssue {
                                    severity: Severity::Error,
                                    record_id: source.id,
                                    field: "existence".into(),
                                    source_value: Some(source.title.clone()),
                                    target_value: None,
                                    message: missing.to_string(),
                                },
                            ]));
                        }
                        report.verdicts.push(RecordVerdict {
                            source_id: source.id,
                            target_id: None,
                            state: RecordState::Failed("missing in target".into()),
                        });
                        continue;
                    }
                };
            report.matched_articles += 1;

            let source_view = self.source_view(source);
            let mut record_checks = ValidationResult::default();
            for category in &enabled {
                let target = match category {
                    CheckCategory::Metadata => metadata_target,
                    _ => content_target,
                };
                let result = self.check_category(*category, &source_view, &TargetView::new(target));
                record_checks.merge(result.clone());
                report.result_mut(*category).merge(result);
            }

            report.verdicts.push(RecordVerdict {
                source_id: source.id,
                target_id: metadata_target.id,
                state: verdict_state(&record_checks),
            });
        }

        let known: HashSet<u64> = sources.iter().map(|s| s.id).collect();
        report.orphaned_targets = targets
            .iter()
            .filter(|t| !matches!(t.external_id, Some(id) if known.contains(&id)))
            .map(|t| OrphanTarget {
                target_id: t.id,
                external_id: t.external_id,
                title: t.title.clone(),
            })
            .collect();
        if !report.orphaned_targets.is_empty() {
            warn!(
                "{} target records have no matching source record",
                report.orphaned_targets.len()
            );
        }

        report.summary = summarize(&report);
        report.end_time = Some(Utc::now());
        info!(
            "Validation finished: {}/{} matched, score {:.1}%",
            report.matched_articles, report.source_articles, report.summary.overall_score
        );
        report
    }
}

fn title_key(title: &str) -> String {
    plain_text(title).to_lowercase()
}

fn verdict_state(checks: &ValidationResult) -> RecordState {
    let errors = checks.error_count();
    if errors > 0 {
        return RecordState::Written.advance(RecordState::Failed(format!("{errors} validation errors")));
    }
    let score = if checks.total_checked == 0 {
        100.0
    } else {
        checks.passed as f64 / checks.total_checked as f64 * 100.0
    };
    RecordState::Written.advance(RecordState::Verified(score))
}

fn summarize(report: &ComparisonReport) -> ComparisonSummary {
    let results = [&report.content, &report.media, &report.metadata];
    let total: usize = results.iter().map(|r| r.total_checked).sum();
    let passed: usize = results.iter().map(|r| r.passed).sum();
    let overall_score = if total == 0 {
        0.0
    } else {
        passed as f64 / total as f64 * 100.0
    };

    let mut recommendations = Vec::new();
    if report.content.failed > 0 {
        recommendations.push("Fix content mismatches, especially titles and slugs".to_string());
    }
    if report.media.failed > 0 {
        recommendations.push("Check media migration and make sure cover images are set".to_string());
    }
    if report.metadata.failed > 0 {
        recommendations.push("Verify metadata: back-references and locale settings".to_string());
    }
    if report.source_articles != report.matched_articles {
        recommendations.push(format!(
            "Review {} unmatched source records; they may need to be migrated again",
            report.source_articles - report.matched_articles.min(report.source_articles)
        ));
    }
    if !report.orphaned_targets.is_empty() {
        recommendations.push(format!(
            "Review {} target records without a source counterpart",
            report.orphaned_targets.len()
        ));
    }
    if recommendations.is_empty() {
        recommendations.push("Migration quality is good; proceed with final functional testing".to_string());
    }

    ComparisonSummary {
        overall_score,
        recommendations,
    }
}
