//! cms-migrate: move articles from a WordPress or Strapi source into a Strapi target.
//!
//! Configuration comes from the environment (optionally a `.env` file);
//! command-line flags override individual settings.

mod commands;
mod logging;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use cms_migrate_core::config::PipelineConfig;
use commands::{ArtifactPaths, Context, Outcome};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "cms-migrate")]
#[command(about = "Migrate, verify and redirect CMS content", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Also append log lines to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Load environment variables from this file instead of ./.env
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    /// Directory for reports and generated artifacts
    #[arg(long, global = true, default_value = ".")]
    out_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Probe source and target endpoints
    Health {
        /// Keep probing until Ctrl+C
        #[arg(long)]
        watch: bool,

        /// Seconds between probes in watch mode
        #[arg(long, default_value_t = 30)]
        interval: u64,
    },
    /// Migrate every source record into the target
    Migrate {
        #[command(flatten)]
        run: RunArgs,
    },
    /// Compare source records with what the target holds
    Validate,
    /// Write redirect rules and a sitemap for migrated records
    Redirects,
    /// Audit on-page SEO of migrated pages on the public site
    Audit {
        /// Maximum number of pages to fetch
        #[arg(long)]
        limit: Option<usize>,

        /// Pause between page fetches, in milliseconds
        #[arg(long)]
        delay_ms: Option<u64>,
    },
    /// Health check, migrate, validate and generate redirects in one go
    Run {
        #[command(flatten)]
        run: RunArgs,
    },
}

#[derive(clap::Args, Debug, Clone, Default)]
struct RunArgs {
    /// Transform and report without writing to the target
    #[arg(long)]
    dry_run: bool,

    /// Records per concurrent batch
    #[arg(long)]
    batch_size: Option<usize>,

    /// Leave cover images unset instead of re-hosting them
    #[arg(long)]
    no_images: bool,

    /// Skip the pre-flight health check
    #[arg(long)]
    skip_health: bool,
}

impl RunArgs {
    fn apply(&self, config: &mut PipelineConfig) {
        if self.dry_run {
            config.dry_run = true;
        }
        if let Some(size) = self.batch_size {
            config.batch_size = size.max(1);
        }
        if self.no_images {
            config.download_images = false;
        }
    }
}

fn load_env(path: Option<&PathBuf>) -> Result<()> {
    match path {
        Some(path) => {
            dotenvy::from_path(path).with_context(|| format!("Failed to load {}", path.display()))?;
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }
    Ok(())
}

async fn execute(cli: Cli) -> Result<Outcome> {
    let mut config = PipelineConfig::from_env().context("Invalid configuration")?;
    if let Command::Migrate { run } | Command::Run { run } = &cli.command {
        run.apply(&mut config);
    }
    std::fs::create_dir_all(&cli.out_dir)
        .with_context(|| format!("Failed to create {}", cli.out_dir.display()))?;
    let paths = ArtifactPaths::in_dir(&cli.out_dir);
    let ctx = Context::new(config)?;

    match &cli.command {
        Command::Health { watch: true, interval } => {
            commands::watch_health(&ctx, Duration::from_secs((*interval).max(1))).await
        }
        Command::Health { watch: false, .. } => commands::health(&ctx).await,
        Command::Migrate { run } => {
            if !run.skip_health {
                commands::preflight(&ctx).await?;
            }
            let (report, _) = commands::migrate(&ctx, &paths.migration).await?;
            Ok(commands::migration_outcome(&report))
        }
        Command::Validate => {
            let report = commands::validate(&ctx, None, &paths.validation).await?;
            Ok(commands::validation_outcome(&report))
        }
        Command::Redirects => {
            commands::redirects(&ctx, &cli.out_dir).await?;
            Ok(Outcome::Clean)
        }
        Command::Audit { limit, delay_ms } => {
            let limit = limit.unwrap_or_else(commands::default_audit_limit);
            commands::audit(&ctx, limit, commands::audit_delay(*delay_ms), &paths.audit).await?;
            Ok(Outcome::Clean)
        }
        Command::Run { run } => {
            if !run.skip_health {
                commands::preflight(&ctx).await?;
            }
            let (report, sources) = commands::migrate(&ctx, &paths.migration).await?;
            let migration = commands::migration_outcome(&report);
            if ctx.config.dry_run {
                info!("Dry run: skipping validation and redirect generation");
                return Ok(migration);
            }
            let comparison = commands::validate(&ctx, Some(sources), &paths.validation).await?;
            commands::redirects(&ctx, &cli.out_dir).await?;
            Ok(migration.max(commands::validation_outcome(&comparison)))
        }
    }
}

fn exit_code(result: &Result<Outcome>) -> u8 {
    match result {
        Ok(Outcome::Clean) => 0,
        Ok(Outcome::RecordFailures) => 1,
        Err(_) => 2,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = load_env(cli.env_file.as_ref()) {
        eprintln!("{e:#}");
        return ExitCode::from(2);
    }
    if let Err(e) = logging::init(cli.debug, cli.log_file.as_deref()) {
        eprintln!("{e:#}");
        return ExitCode::from(2);
    }

    info!("cms-migrate v{}", env!("CARGO_PKG_VERSION"));
    let result = execute(cli).await;
    if let Err(e) = &result {
        error!("{e:#}");
    }
    ExitCode::from(exit_code(&result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cms_migrate_core::config::MigrationDefaults;

    #[test]
    fn test_parse_migrate_flags() {
        let cli = Cli::try_parse_from([
            "cms-migrate",
            "--debug",
            "migrate",
            "--dry-run",
            "--batch-size",
            "5",
            "--no-images",
        ])
        .unwrap();
        assert!(cli.debug);
        let Command::Migrate { run } = cli.command else {
            panic!("expected migrate");
        };
        assert!(run.dry_run);
        assert!(run.no_images);
        assert!(!run.skip_health);
        assert_eq!(run.batch_size, Some(5));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["cms-migrate", "validate", "--out-dir", "reports"]).unwrap();
        assert_eq!(cli.out_dir, PathBuf::from("reports"));
        assert!(matches!(cli.command, Command::Validate));
    }

    #[test]
    fn test_health_defaults() {
        let cli = Cli::try_parse_from(["cms-migrate", "health"]).unwrap();
        assert!(matches!(cli.command, Command::Health { watch: false, interval: 30 }));
    }

    #[test]
    fn test_run_args_override_config() {
        let mut config = PipelineConfig::from_lookup(|key| match key {
            "SOURCE_URL" => Some("https://old.example.com".into()),
            "TARGET_URL" => Some("https://cms.example.com".into()),
            _ => None,
        })
        .unwrap();
        let run = RunArgs {
            dry_run: true,
            batch_size: Some(0),
            no_images: true,
            skip_health: false,
        };
        run.apply(&mut config);
        assert!(config.dry_run);
        assert!(!config.download_images);
        assert_eq!(config.batch_size, 1);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(&Ok(Outcome::Clean)), 0);
        assert_eq!(exit_code(&Ok(Outcome::RecordFailures)), 1);
        assert_eq!(exit_code(&Err(anyhow::anyhow!("boom"))), 2);
    }

    #[test]
    fn test_audit_defaults_come_from_config() {
        let cli = Cli::try_parse_from(["cms-migrate", "audit"]).unwrap();
        let Command::Audit { limit, delay_ms } = cli.command else {
            panic!("expected audit");
        };
        assert_eq!(limit, None);
        assert_eq!(commands::audit_delay(delay_ms), MigrationDefaults::AUDIT_DELAY);

        let cli = Cli::try_parse_from(["cms-migrate", "audit", "--delay-ms", "250"]).unwrap();
        let Command::Audit { delay_ms, .. } = cli.command else {
            panic!("expected audit");
        };
        assert_eq!(commands::audit_delay(delay_ms), Duration::from_millis(250));
    }

    #[test]
    fn test_unknown_subcommand_rejected() {
        assert!(Cli::try_parse_from(["cms-migrate", "publish"]).is_err());
    }
}
