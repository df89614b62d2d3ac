//! Centralized configuration for the migration pipeline.
//!
//! Constants follow the associated-const style; runtime settings are read
//! from the environment into a [`PipelineConfig`].

use crate::cms::CmsKind;
use crate::network::Auth;
use crate::{MigrateError, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Network-related configuration.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
    pub const MEDIA_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);
    pub const MAX_RETRIES: u32 = 3;
    pub const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);
    pub const RETRY_MAX_DELAY: Duration = Duration::from_secs(10);
    pub const RETRY_BACKOFF_FACTOR: f64 = 2.0;
    pub const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);
    pub const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(3);
    pub const HEALTH_PROBE_RETRIES: u32 = 2;
    pub const USER_AGENT: &'static str = "cms-migrate/0.1";
}

/// Defaults for migration and validation runs.
pub struct MigrationDefaults;

impl MigrationDefaults {
    pub const BATCH_SIZE: usize = 10;
    pub const INTER_BATCH_DELAY: Duration = Duration::from_millis(1000);
    pub const PAGE_SIZE: u32 = 25;
    pub const LENGTH_TOLERANCE: f64 = 0.2;
    pub const DATE_TOLERANCE_DAYS: i64 = 1;
    pub const DEFAULT_LOCALE: &'static str = "zh-CN";
    pub const SCRATCH_DIR_NAME: &'static str = "temp-migration";
    pub const AUDIT_PAGE_LIMIT: usize = 10;
    pub const AUDIT_DELAY: Duration = Duration::from_millis(1000);
}

/// Connection settings for one CMS.
#[derive(Debug, Clone)]
pub struct CmsSettings {
    pub kind: CmsKind,
    pub base_url: String,
    pub auth: Auth,
}

/// Which validation categories run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationToggles {
    pub check_content: bool,
    pub check_media: bool,
    pub check_metadata: bool,
}

impl Default for ValidationToggles {
    fn default() -> Self {
        Self {
            check_content: true,
            check_media: true,
            check_metadata: true,
        }
    }
}

/// Full runtime configuration for a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub source: CmsSettings,
    pub target: CmsSettings,
    pub batch_size: usize,
    pub inter_batch_delay: Duration,
    pub page_size: u32,
    pub download_images: bool,
    pub dry_run: bool,
    pub validation: ValidationToggles,
    pub scratch_dir: PathBuf,
    pub http_timeout: Duration,
    pub max_retries: u32,
    /// Public site base for the old URLs (redirect sources).
    pub public_source_base_url: String,
    /// Public site base for the new URLs (redirect targets, sitemap).
    pub public_target_base_url: String,
}

impl PipelineConfig {
    /// Build configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let source = cms_settings(&get, "SOURCE", CmsKind::WordPress)?;
        let target = cms_settings(&get, "TARGET", CmsKind::Strapi)?;

        let batch_size: usize = parse_or(&get, "MIGRATION_BATCH_SIZE", MigrationDefaults::BATCH_SIZE)?;
        if batch_size == 0 {
            return Err(MigrateError::config("MIGRATION_BATCH_SIZE must be at least 1"));
        }
        let page_size: u32 = parse_or(&get, "MIGRATION_PAGE_SIZE", MigrationDefaults::PAGE_SIZE)?;
        if page_size == 0 {
            return Err(MigrateError::config("MIGRATION_PAGE_SIZE must be at least 1"));
        }

        let delay_ms: u64 = parse_or(
            &get,
            "MIGRATION_BATCH_DELAY_MS",
            MigrationDefaults::INTER_BATCH_DELAY.as_millis() as u64,
        )?;
        let timeout_secs: u64 = parse_or(
            &get,
            "HTTP_TIMEOUT_SECS",
            NetworkConfig::REQUEST_TIMEOUT.as_secs(),
        )?;

        let scratch_dir = get("MIGRATION_SCRATCH_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join(MigrationDefaults::SCRATCH_DIR_NAME));

        let public_source_base_url =
            get("PUBLIC_SOURCE_BASE_URL").unwrap_or_else(|| source.base_url.clone());
        let public_target_base_url =
            get("PUBLIC_TARGET_BASE_URL").unwrap_or_else(|| target.base_url.clone());

        Ok(Self {
            batch_size,
            inter_batch_delay: Duration::from_millis(delay_ms),
            page_size,
            download_images: parse_bool_or(&get, "MIGRATION_DOWNLOAD_IMAGES", true)?,
            dry_run: parse_bool_or(&get, "MIGRATION_DRY_RUN", false)?,
            validation: ValidationToggles {
                check_content: parse_bool_or(&get, "VALIDATE_CHECK_CONTENT", true)?,
                check_media: parse_bool_or(&get, "VALIDATE_CHECK_MEDIA", true)?,
                check_metadata: parse_bool_or(&get, "VALIDATE_CHECK_METADATA", true)?,
            },
            scratch_dir,
            http_timeout: Duration::from_secs(timeout_secs),
            max_retries: parse_or(&get, "HTTP_MAX_RETRIES", NetworkConfig::MAX_RETRIES)?,
            public_source_base_url: trim_base(&public_source_base_url),
            public_target_base_url: trim_base(&public_target_base_url),
            source,
            target,
        })
    }
}

fn cms_settings(
    get: &impl Fn(&str) -> Option<String>,
    prefix: &str,
    default_kind: CmsKind,
) -> Result<CmsSettings> {
    let kind = match get(&format!("{prefix}_KIND")) {
        Some(raw) => CmsKind::from_str(&raw)?,
        None => default_kind,
    };

    let url_key = format!("{prefix}_URL");
    let base_url = get(&url_key)
        .ok_or_else(|| MigrateError::config(format!("{url_key} is required")))?;
    url::Url::parse(&base_url).map_err(|e| MigrateError::Url {
        url: base_url.clone(),
        message: e.to_string(),
    })?;

    let auth = match (
        get(&format!("{prefix}_TOKEN")),
        get(&format!("{prefix}_USERNAME")),
        get(&format!("{prefix}_PASSWORD")),
    ) {
        (Some(token), _, _) => Auth::Bearer(token),
        (None, Some(username), Some(password)) => Auth::Basic { username, password },
        (None, Some(_), None) => {
            return Err(MigrateError::config(format!(
                "{prefix}_USERNAME is set without {prefix}_PASSWORD"
            )))
        }
        _ => Auth::None,
    };

    Ok(CmsSettings {
        kind,
        base_url: trim_base(&base_url),
        auth,
    })
}

fn trim_base(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

fn parse_or<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T> {
    match get(key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|_| MigrateError::config(format!("{key} has invalid value '{raw}'"))),
        None => Ok(default),
    }
}

fn parse_bool_or(get: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> Result<bool> {
    match get(key) {
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(MigrateError::config(format!(
                "{key} must be a boolean, got '{raw}'"
            ))),
        },
        None => Ok(default),
    }
}
