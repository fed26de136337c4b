use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use file_system::{ChangeCategories, FileSystemCollector};
use pipeline::{CollectOptions, CollectorStatus, MonitorSession};
use run_store::{ComparisonStatus, Db, RunRecord};
use surface_core::{Collector, Filter, RunType};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

mod config;

use config::Config;

const LATEST: &str = "latest";

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Category {
    Creation,
    Deletion,
    Rename,
    Attributes,
    Content,
}

#[derive(Debug, Parser)]
#[command(name = "surface", version, about = "Attack surface snapshots, diffs and file monitoring")]
struct Cli {
    /// Optional config file (YAML). If omitted, loads ./surface.yaml if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// SQLite database path (default: surface.sqlite)
    #[arg(long, global = true)]
    database: Option<PathBuf>,
    /// Debug level logging unless SURFACE_LOG is set
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,
    /// Log as JSON lines on stderr
    #[arg(long, global = true, default_value_t = false)]
    log_json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Args)]
struct CollectArgs {
    /// Run id (default: current UTC time, RFC 3339)
    #[arg(long)]
    run_id: Option<String>,
    /// Replace an existing run with the same id
    #[arg(long, default_value_t = false)]
    overwrite: bool,
    /// Run the same collectors as this earlier run
    #[arg(long)]
    match_run_id: Option<String>,
    /// Filter document (JSON). Missing file means no filtering.
    #[arg(long)]
    filters: Option<PathBuf>,
    /// Roots for the file system collector
    #[arg(long, num_args = 1..)]
    directories: Vec<PathBuf>,
    /// SHA-256 file contents
    #[arg(long, default_value_t = false)]
    hash: bool,
    #[arg(long, short = 'f', default_value_t = false)]
    file_system: bool,
    #[arg(long, short = 'p', default_value_t = false)]
    ports: bool,
    #[arg(long, short = 'u', default_value_t = false)]
    users: bool,
    #[arg(long, short = 's', default_value_t = false)]
    services: bool,
    #[arg(long, short = 'r', default_value_t = false)]
    registry: bool,
    #[arg(long, short = 'c', default_value_t = false)]
    certificates: bool,
    /// Every collector (the default when none is named)
    #[arg(long, short = 'a', default_value_t = false)]
    all: bool,
}

impl CollectArgs {
    fn any_selected(&self) -> bool {
        self.file_system || self.ports || self.users || self.services || self.registry || self.certificates
    }

    fn wants(&self, flag: bool) -> bool {
        self.all || flag || !self.any_selected()
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print version information
    Version,
    /// Snapshot the selected resource kinds into a new run
    Collect(CollectArgs),
    /// Compare two collect runs (defaults to the two most recent)
    Compare {
        #[arg(long, requires = "compare_run_id")]
        base_run_id: Option<String>,
        #[arg(long, requires = "base_run_id")]
        compare_run_id: Option<String>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Watch directories and record file changes as a monitor run
    Monitor {
        #[arg(long)]
        run_id: Option<String>,
        #[arg(long, default_value_t = false)]
        overwrite: bool,
        #[arg(long)]
        filters: Option<PathBuf>,
        #[arg(long, num_args = 1..)]
        directories: Vec<PathBuf>,
        /// Stop after this many seconds (default: until Ctrl-C)
        #[arg(long)]
        duration: Option<u64>,
        /// Re-stat changed paths for size, permissions and owner
        #[arg(long, default_value_t = false)]
        interrogate: bool,
        /// Change categories to ignore
        #[arg(long, value_enum)]
        skip: Vec<Category>,
    },
    /// Export a comparison as JSON, comparing first if needed
    ExportCollect {
        /// Base run id or "latest"
        #[arg(long, default_value = LATEST)]
        base_run_id: String,
        #[arg(long, default_value = LATEST)]
        compare_run_id: String,
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
    /// Export the events of a monitor run as JSON
    ExportMonitor {
        /// Monitor run id or "latest"
        #[arg(long, default_value = LATEST)]
        run_id: String,
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
    /// Inspect or maintain the database
    Config {
        #[arg(long, default_value_t = false, conflicts_with_all = ["delete_run", "reset_database"])]
        list_runs: bool,
        #[arg(long, conflicts_with = "reset_database")]
        delete_run: Option<String>,
        #[arg(long, default_value_t = false)]
        reset_database: bool,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

fn init_logging(verbose: bool, json: bool) {
    let filter = EnvFilter::try_from_env("SURFACE_LOG")
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr)).init();
    } else {
        registry.with(fmt::layer().compact().with_writer(std::io::stderr)).init();
    }
}

fn open_db(cli: &Cli, cfg: &Config) -> Result<Db> {
    let path = cli.database.clone().unwrap_or_else(|| cfg.database());
    Db::open_or_create(&path).with_context(|| format!("opening database {}", path.display()))
}

fn load_filter(flag: Option<&Path>, cfg: &Config) -> Result<Filter> {
    let path = flag.map(Path::to_path_buf).unwrap_or_else(|| cfg.filters());
    Filter::load(&path).with_context(|| format!("loading filters from {}", path.display()))
}

fn build_collectors(args: &CollectArgs, cfg: &Config) -> Result<Vec<Box<dyn Collector>>> {
    let collect_cfg = cfg.collect.clone().unwrap_or_default();
    let mut collectors: Vec<Box<dyn Collector>> = Vec::new();

    if args.wants(args.file_system) {
        let roots = if !args.directories.is_empty() {
            args.directories.clone()
        } else {
            collect_cfg.directories.clone().unwrap_or_else(FileSystemCollector::default_roots)
        };
        let mut fs = FileSystemCollector::new(roots).with_hashing(args.hash || collect_cfg.hash.unwrap_or(false));
        if let Some(workers) = collect_cfg.workers {
            fs = fs.with_workers(workers);
        }
        collectors.push(Box::new(fs));
    }
    if args.wants(args.ports) {
        #[cfg(feature = "ports")]
        collectors.push(Box::new(open_ports::OpenPortsCollector::new()));
        #[cfg(not(feature = "ports"))]
        warn!("built without the ports feature");
    }
    if args.wants(args.users) {
        #[cfg(feature = "users")]
        collectors.push(Box::new(user_accounts::UserAccountsCollector::new()));
        #[cfg(not(feature = "users"))]
        warn!("built without the users feature");
    }
    if args.wants(args.services) {
        #[cfg(feature = "services")]
        collectors.push(Box::new(services::ServicesCollector::new()));
        #[cfg(not(feature = "services"))]
        warn!("built without the services feature");
    }
    if args.wants(args.registry) {
        #[cfg(feature = "registry")]
        collectors.push(Box::new(match collect_cfg.registry_keys.clone() {
            Some(keys) => registry::RegistryCollector::new(keys),
            None => registry::RegistryCollector::default(),
        }));
        #[cfg(not(feature = "registry"))]
        warn!("built without the registry feature");
    }
    if args.wants(args.certificates) {
        #[cfg(feature = "certs")]
        collectors.push(Box::new(certificates::CertificatesCollector::default()));
        #[cfg(not(feature = "certs"))]
        warn!("built without the certs feature");
    }
    if collectors.is_empty() {
        bail!("no collectors available for the requested kinds");
    }
    Ok(collectors)
}

fn format_ms(ms: i64) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(ms as i128 * 1_000_000)
        .ok()
        .and_then(|t| t.format(&Rfc3339).ok())
        .unwrap_or_else(|| ms.to_string())
}

fn print_runs(runs: &[RunRecord], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(runs)?),
        OutputFormat::Text => {
            for r in runs {
                let kinds: Vec<&str> = r.meta.kinds.iter().map(|k| k.as_str()).collect();
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    r.meta.run_id,
                    r.meta.run_type.as_str(),
                    format_ms(r.meta.timestamp),
                    if r.is_finished() { "finished" } else { "incomplete" },
                    kinds.join(","),
                );
            }
        }
    }
    Ok(())
}

/// Resolves each side of a comparison on its own. `latest` (or an absent id)
/// on the compare side is the newest collect run; on the base side it is the
/// newest collect run older than, or other than, the compare run.
fn resolve_pair(db: &Db, base: Option<String>, compare: Option<String>) -> Result<(String, String)> {
    let explicit = |id: Option<String>| id.filter(|id| id != LATEST);
    let (base, compare) = match (explicit(base), explicit(compare)) {
        (Some(b), Some(c)) => (b, c),
        (None, None) => pipeline::resolve_latest_pair(db)?,
        (Some(b), None) => (b, pipeline::resolve_latest(db, RunType::Collect)?),
        (None, Some(c)) => {
            let b = db
                .latest_run_ids(2, RunType::Collect)?
                .into_iter()
                .find(|id| *id != c)
                .with_context(|| format!("no collect run other than {c} to compare against"))?;
            (b, c)
        }
    };
    if base == compare {
        bail!("base and compare both resolve to run {base}");
    }
    Ok((base, compare))
}

/// Compares the pair first when needed, then writes the export files.
/// Returns false when any comparator of that implicit compare failed.
fn export_collect(db: &mut Db, base: &str, compare: &str, out_dir: &Path) -> Result<bool> {
    let mut ok = true;
    if db.comparison_status(base, compare)? != Some(ComparisonStatus::Completed) {
        info!(base = %base, compare = %compare, "not compared yet, comparing first");
        let report = pipeline::run_compare(db, base, compare)?;
        if !report.success() {
            warn!(failures = report.failures.len(), "some comparators failed");
        }
        ok = report.success();
    }
    for path in pipeline::export_comparison(db, base, compare, out_dir)? {
        println!("{}", path.display());
    }
    Ok(ok)
}

/// Raises `stop` on Ctrl-C from a helper thread running its own runtime.
fn stop_on_ctrl_c(stop: Arc<AtomicBool>) -> Result<()> {
    let rt = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    std::thread::spawn(move || {
        rt.block_on(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, stopping monitors");
                stop.store(true, Ordering::SeqCst);
            }
        });
    });
    Ok(())
}

fn exit(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let cfg = config::load_config(cli.config.as_deref())?;
    let json_logs = cli.log_json || cfg.log_format.as_deref() == Some("json");
    init_logging(cli.verbose, json_logs);

    match &cli.command {
        Commands::Version => {
            println!("surface {}", surface_core::version());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Collect(args) => {
            let mut db = open_db(&cli, &cfg)?;
            let filter = load_filter(args.filters.as_deref(), &cfg)?;
            let collectors = build_collectors(args, &cfg)?;
            let opts = CollectOptions {
                run_id: args.run_id.clone(),
                overwrite: args.overwrite,
                match_run_id: args.match_run_id.clone(),
            };
            let report = pipeline::run_collect(&mut db, &collectors, &filter, &opts)?;
            for o in &report.outcomes {
                match &o.status {
                    CollectorStatus::Completed { stats } => println!(
                        "{:<14} {:>8} collected {:>6} filtered {:>6} duplicates ({:.1?})",
                        o.name, stats.collected, stats.filtered, stats.duplicates, o.elapsed
                    ),
                    CollectorStatus::Skipped => println!("{:<14} skipped (unsupported platform)", o.name),
                    CollectorStatus::Failed(reason) => println!("{:<14} FAILED: {reason}", o.name),
                }
            }
            println!("run {} complete, {} records", report.run_id, report.collected());
            Ok(exit(report.success()))
        }
        Commands::Compare { base_run_id, compare_run_id, format } => {
            let mut db = open_db(&cli, &cfg)?;
            let (base, compare) = resolve_pair(&db, base_run_id.clone(), compare_run_id.clone())?;
            let report = pipeline::run_compare(&mut db, &base, &compare)?;
            match format {
                OutputFormat::Json => {
                    let counts: serde_json::Map<String, serde_json::Value> = report
                        .results
                        .iter()
                        .map(|r| {
                            (
                                r.kind.as_str().to_string(),
                                serde_json::json!({
                                    "Added": r.added.len(),
                                    "Removed": r.removed.len(),
                                    "Modified": r.modified.len(),
                                    "Skipped": r.skipped,
                                }),
                            )
                        })
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&serde_json::json!({
                        "BaseRunId": report.base_run_id,
                        "CompareRunId": report.compare_run_id,
                        "Counts": counts,
                    }))?);
                }
                OutputFormat::Text => {
                    println!("{} -> {}", report.base_run_id, report.compare_run_id);
                    for r in &report.results {
                        println!(
                            "{:<12} +{} -{} ~{}{}",
                            r.kind.as_str(),
                            r.added.len(),
                            r.removed.len(),
                            r.modified.len(),
                            if r.skipped > 0 { format!(" ({} undecodable)", r.skipped) } else { String::new() },
                        );
                    }
                }
            }
            for (kind, reason) in &report.failures {
                eprintln!("{kind}: {reason}");
            }
            Ok(exit(report.success()))
        }
        Commands::Monitor { run_id, overwrite, filters, directories, duration, interrogate, skip } => {
            let mut db = open_db(&cli, &cfg)?;
            let filter = Arc::new(load_filter(filters.as_deref(), &cfg)?);
            let monitor_cfg = cfg.monitor.clone().unwrap_or_default();
            let roots = if !directories.is_empty() {
                directories.clone()
            } else {
                monitor_cfg.directories.clone().unwrap_or_else(FileSystemCollector::default_roots)
            };
            let mut categories = ChangeCategories::ALL;
            for c in skip {
                match c {
                    Category::Creation => categories.creation = false,
                    Category::Deletion => categories.deletion = false,
                    Category::Rename => categories.rename = false,
                    Category::Attributes => categories.attributes = false,
                    Category::Content => categories.content = false,
                }
            }
            let session = MonitorSession {
                run_id: run_id.clone(),
                overwrite: *overwrite,
                roots,
                categories,
                interrogate: *interrogate || monitor_cfg.interrogate.unwrap_or(false),
                duration: duration.or(monitor_cfg.duration_secs).map(Duration::from_secs),
            };
            let stop = Arc::new(AtomicBool::new(false));
            stop_on_ctrl_c(Arc::clone(&stop))?;
            let report = pipeline::run_monitor(&mut db, filter, &session, &stop)?;
            println!("monitor run {} recorded {} events", report.run_id, report.events);
            Ok(exit(report.failed == 0))
        }
        Commands::ExportCollect { base_run_id, compare_run_id, out_dir } => {
            let mut db = open_db(&cli, &cfg)?;
            let (base, compare) = resolve_pair(&db, Some(base_run_id.clone()), Some(compare_run_id.clone()))?;
            Ok(exit(export_collect(&mut db, &base, &compare, out_dir)?))
        }
        Commands::ExportMonitor { run_id, out_dir } => {
            let db = open_db(&cli, &cfg)?;
            let run_id =
                if run_id == LATEST { pipeline::resolve_latest(&db, RunType::Monitor)? } else { run_id.clone() };
            let path = pipeline::export_monitor(&db, &run_id, out_dir)?;
            println!("{}", path.display());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config { list_runs, delete_run, reset_database, format } => {
            let mut db = open_db(&cli, &cfg)?;
            if let Some(id) = delete_run {
                db.delete_run(id)?;
                println!("deleted run {id}");
            } else if *reset_database {
                db.reset()?;
                println!("database reset");
            } else if *list_runs {
                print_runs(&db.list_runs(None)?, *format)?;
            } else {
                bail!("config needs one of --list-runs, --delete-run or --reset-database");
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
