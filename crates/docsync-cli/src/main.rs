use clap::{Parser, Subcommand};
use docsync_core::config::{BackupSettings, DefaultSettings, RegistrySettings, Settings};
use docsync_core::logging::{console_level, init_logging};
use docsync_core::DEFAULT_DATA_DIR;
use docsync_updater::{run_batch, DocumentUpdater, Manifest, UpdateOptions};
use merge_engine::{parse_sections, ConflictHandling, StrategyChoice};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncReadExt;

#[derive(Parser)]
#[command(
    name = "docsync",
    about = "Merge generated documentation into hand-maintained documents"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Project root that document paths are relative to
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Data directory for the registry, settings and logs (relative to the root)
    #[arg(long, global = true, default_value = DEFAULT_DATA_DIR)]
    data_dir: PathBuf,

    /// Print JSON instead of a markdown report
    #[arg(long, global = true)]
    json: bool,

    /// Show debug logs on the console
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge generated content into a document (created if absent)
    Update {
        /// Document path
        path: PathBuf,
        /// File holding the generated content; stdin when omitted
        #[arg(long)]
        from: Option<PathBuf>,
        /// auto, append, merge, replace, version or smart
        #[arg(long)]
        strategy: Option<StrategyChoice>,
        /// smart, keep-existing, take-candidate or mark
        #[arg(long)]
        conflict_handling: Option<ConflictHandling>,
        /// Skip the snapshot of the previous content
        #[arg(long)]
        no_backup: bool,
        /// Snapshots kept per document (0 keeps all)
        #[arg(long)]
        max_versions: Option<usize>,
        /// Report what would change without writing anything
        #[arg(long)]
        dry_run: bool,
        /// Source file this document is generated from (repeatable)
        #[arg(long = "dep")]
        deps: Vec<String>,
        /// Section expected in the document, for completeness scoring (repeatable)
        #[arg(long = "expect")]
        expected: Vec<String>,
    },
    /// Update every document listed in a JSON manifest
    Batch {
        /// Manifest file: {"jobs": [{"path": ..., "candidateFile": ...}]}
        manifest: PathBuf,
        #[arg(long)]
        dry_run: bool,
    },
    /// Report whether documents are outdated (all tracked documents by default)
    Check { path: Option<PathBuf> },
    /// Check marker balance and leftover conflict blocks
    Validate {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// List the sections of a document
    Sections { path: PathBuf },
    /// Show the registry record and version history of a document
    History { path: PathBuf },
    /// Accept the current on-disk content after a manual edit
    Acknowledge { path: PathBuf },
    /// Mark a section as manually edited so regeneration keeps it
    Protect {
        path: PathBuf,
        /// Heading text of the section
        heading: String,
        #[arg(long)]
        author: Option<String>,
    },
    /// Run interactive setup wizard
    Setup,
}

fn data_dir(cli: &Cli) -> PathBuf {
    cli.root.join(&cli.data_dir)
}

fn settings_path(cli: &Cli) -> PathBuf {
    data_dir(cli).join("settings.json")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Setup = cli.command {
        return cmd_setup(&cli).await;
    }

    let settings = Settings::load_or_default(&settings_path(&cli))?;
    let _guard = init_logging(&data_dir(&cli).join("logs"), console_level(cli.verbose))?;
    let updater = DocumentUpdater::open(&cli.root, &cli.data_dir, &settings).await?;

    match &cli.command {
        Commands::Update {
            path,
            from,
            strategy,
            conflict_handling,
            no_backup,
            max_versions,
            dry_run,
            deps,
            expected,
        } => {
            let mut options = UpdateOptions::from_settings(&settings);
            if let Some(strategy) = strategy {
                options.strategy = *strategy;
            }
            if let Some(handling) = conflict_handling {
                options.conflict_handling = *handling;
            }
            if *no_backup {
                options.backup_original = false;
            }
            if let Some(max) = max_versions {
                options.max_versions = *max;
            }
            if !deps.is_empty() {
                options.dependencies = Some(deps.clone());
            }
            options.expected_sections = expected.clone();
            options.dry_run = *dry_run;
            cmd_update(&cli, &updater, path, from.as_deref(), &options).await
        }
        Commands::Batch { manifest, dry_run } => {
            let mut defaults = UpdateOptions::from_settings(&settings);
            defaults.dry_run = *dry_run;
            cmd_batch(&cli, updater, manifest, &defaults).await
        }
        Commands::Check { path } => cmd_check(&cli, &updater, path.as_deref()).await,
        Commands::Validate { paths } => cmd_validate(&cli, &updater, paths).await,
        Commands::Sections { path } => cmd_sections(&cli, path).await,
        Commands::History { path } => cmd_history(&cli, &updater, path).await,
        Commands::Acknowledge { path } => {
            let record = updater.acknowledge(path).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                println!("Acknowledged {} (version {})", record.path, record.version);
            }
            Ok(())
        }
        Commands::Protect {
            path,
            heading,
            author,
        } => {
            let record = updater.protect(path, heading, author.as_deref()).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                println!(
                    "Section '{}' of {} is protected (version {})",
                    heading.trim(),
                    record.path,
                    record.version
                );
            }
            Ok(())
        }
        Commands::Setup => Ok(()),
    }
}

async fn cmd_update(
    cli: &Cli,
    updater: &DocumentUpdater,
    path: &Path,
    from: Option<&Path>,
    options: &UpdateOptions,
) -> anyhow::Result<()> {
    let candidate = match from {
        Some(file) => tokio::fs::read_to_string(file).await?,
        None => {
            let mut buf = String::new();
            tokio::io::stdin().read_to_string(&mut buf).await?;
            buf
        }
    };

    let report = updater.update(path, &candidate, options).await?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.render_markdown());
    }
    if report.needs_review() {
        eprintln!(
            "{} conflict(s) in {} need manual review",
            report.unresolved_conflicts.len(),
            report.file_path
        );
    }
    Ok(())
}

async fn cmd_batch(
    cli: &Cli,
    updater: DocumentUpdater,
    manifest_path: &Path,
    defaults: &UpdateOptions,
) -> anyhow::Result<()> {
    let manifest = Manifest::load(manifest_path).await?;
    let base = manifest_path.parent().unwrap_or(Path::new("."));

    let mut jobs = Vec::new();
    let mut unreadable = Vec::new();
    for job in manifest.into_jobs(base, defaults).await {
        match job {
            Ok(job) => jobs.push(job),
            Err((path, error)) => {
                tracing::error!(path = %path.display(), error = %error, "skipping batch job");
                unreadable.push(docsync_updater::BatchItem {
                    path: path.display().to_string(),
                    report: None,
                    error: Some(error),
                });
            }
        }
    }

    let mut report = run_batch(Arc::new(updater), jobs).await;
    report.items.extend(unreadable);

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.render_markdown());
    }
    if report.failed() > 0 {
        std::process::exit(1);
    }
    Ok(())
}

async fn cmd_check(cli: &Cli, updater: &DocumentUpdater, path: Option<&Path>) -> anyhow::Result<()> {
    let statuses = match path {
        Some(path) => {
            let key = path.to_string_lossy().replace('\\', "/");
            vec![(key, updater.check_outdated(path).await)]
        }
        None => updater.check_all().await,
    };

    if cli.json {
        let value: serde_json::Map<String, serde_json::Value> = statuses
            .iter()
            .map(|(key, status)| serde_json::to_value(status).map(|v| (key.clone(), v)))
            .collect::<Result<_, _>>()?;
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else if statuses.is_empty() {
        println!("No tracked documents");
    } else {
        for (key, status) in &statuses {
            let reason = status
                .reason
                .as_ref()
                .map_or_else(|| "up to date".to_string(), |r| r.to_string());
            println!("{key}: {reason}");
        }
    }

    if statuses.iter().any(|(_, s)| s.outdated) {
        std::process::exit(1);
    }
    Ok(())
}

async fn cmd_validate(cli: &Cli, updater: &DocumentUpdater, paths: &[PathBuf]) -> anyhow::Result<()> {
    let mut results = Vec::with_capacity(paths.len());
    for path in paths {
        results.push(updater.validate(path).await?);
    }

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        for result in &results {
            if result.valid && !result.unresolved_conflict_blocks {
                println!("{}: ok", result.path);
                continue;
            }
            println!("{}:", result.path);
            for issue in &result.marker_issues {
                println!("  - {issue}");
            }
            if result.unresolved_conflict_blocks {
                println!("  - unresolved conflict block");
            }
        }
    }

    if results
        .iter()
        .any(|r| !r.valid || r.unresolved_conflict_blocks)
    {
        std::process::exit(1);
    }
    Ok(())
}

async fn cmd_sections(cli: &Cli, path: &Path) -> anyhow::Result<()> {
    let content = tokio::fs::read_to_string(cli.root.join(path)).await?;
    let sections = parse_sections(&content);

    if cli.json {
        let value: Vec<serde_json::Value> = sections
            .iter()
            .map(|s| {
                serde_json::json!({
                    "key": s.key,
                    "level": s.level,
                    "words": s.word_count(),
                    "manualEdit": merge_engine::markers::has_manual_edit(&s.raw),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    for section in sections.iter() {
        let indent = "  ".repeat(section.level.saturating_sub(1) as usize);
        let protected = if merge_engine::markers::has_manual_edit(&section.raw) {
            " [manual]"
        } else {
            ""
        };
        println!(
            "{indent}{} ({} words){protected}",
            section.key,
            section.word_count()
        );
    }
    for key in sections.duplicates() {
        eprintln!("warning: duplicate heading '{key}'; the later section is used");
    }
    Ok(())
}

async fn cmd_history(cli: &Cli, updater: &DocumentUpdater, path: &Path) -> anyhow::Result<()> {
    let Some(record) = updater.record(path).await else {
        eprintln!("{} is not tracked", path.display());
        std::process::exit(1);
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    println!("{}", record.path);
    println!("  Version: {}", record.version);
    println!("  Hash: {}", record.content_hash);
    println!("  Updated: {}", record.updated_at.to_rfc3339());
    println!("  Completeness: {}", record.completeness_score);
    println!("  Freshness: {}", record.freshness_score);
    if !record.dependencies.is_empty() {
        println!("  Dependencies: {}", record.dependencies.join(", "));
    }
    println!();
    for entry in record.history.iter().rev() {
        let strategy = entry.strategy.map(|s| s.to_string()).unwrap_or_else(|| "-".into());
        println!(
            "  v{} {} {} {} +{} -{} ~{}",
            entry.version,
            entry.timestamp.to_rfc3339(),
            entry.trigger.as_str(),
            strategy,
            entry.lines_added,
            entry.lines_deleted,
            entry.lines_changed
        );
    }
    Ok(())
}

async fn cmd_setup(cli: &Cli) -> anyhow::Result<()> {
    let dir = data_dir(cli);
    std::fs::create_dir_all(&dir)?;
    let current = Settings::load_or_default(&settings_path(cli))?;

    println!();
    println!("docsync - Setup Wizard");
    println!("======================");
    println!();

    let strategies = ["auto", "merge", "append", "replace", "version", "smart"];
    let strategy_idx = dialoguer::Select::new()
        .with_prompt("Default merge strategy")
        .items(&strategies)
        .default(0)
        .interact()?;

    let handlings = ["smart", "keep-existing", "take-candidate", "mark"];
    let handling_idx = dialoguer::Select::new()
        .with_prompt("How should conflicting sections be settled?")
        .items(&handlings)
        .default(0)
        .interact()?;

    println!();
    let backups_enabled = dialoguer::Confirm::new()
        .with_prompt("Snapshot documents before overwriting them?")
        .default(true)
        .interact()?;

    let max_versions: usize = if backups_enabled {
        dialoguer::Input::new()
            .with_prompt("Snapshots kept per document (0 keeps all)")
            .default(current.backups.max_versions)
            .interact_text()?
    } else {
        current.backups.max_versions
    };

    println!();
    let stale_after_days: i64 = dialoguer::Input::new()
        .with_prompt("Days before a document counts as stale")
        .default(current.registry.stale_after_days)
        .interact_text()?;

    let preserve_metadata = dialoguer::Confirm::new()
        .with_prompt("Keep front matter when a document is replaced?")
        .default(true)
        .interact()?;

    let settings = Settings {
        engine: current.engine,
        registry: RegistrySettings {
            stale_after_days,
            ..current.registry
        },
        backups: BackupSettings {
            enabled: backups_enabled,
            max_versions,
            directory: current.backups.directory,
        },
        defaults: DefaultSettings {
            strategy: strategies[strategy_idx].parse::<StrategyChoice>()?,
            conflict_handling: handlings[handling_idx]
                .parse::<ConflictHandling>()
                .map_err(anyhow::Error::msg)?,
            preserve_metadata,
        },
    };

    settings.save(&settings_path(cli))?;

    println!();
    println!("Configuration saved to {}", settings_path(cli).display());
    println!();
    println!("Update a document with: docsync update docs/api.md --from generated.md");
    println!();

    Ok(())
}
