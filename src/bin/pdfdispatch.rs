//! CLI binary for pdf-dispatch.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `PreparationConfig`, loads assignment files and prints results.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use pdf_dispatch::{
    CancelSignal, Inventory, LogLevel, MemberAssignment, MemberPreparation, ModifyPermission,
    Package, PackageProcessor, Pipeline, PreparationConfig, PreparationProgressCallback,
    PreparationStats, ProgressCallback, ReviewerAssignment, ReviewerPreparation, Toolkit,
};
use serde::de::DeserializeOwned;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar for the whole run, one line per file.
struct CliProgressCallback {
    bar: ProgressBar,
    verbose: bool,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new(verbose: bool) -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(spinner_style);
        bar.set_prefix("Scanning");
        bar.set_message("source folder…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            verbose,
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} files  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Preparing");
        self.bar.reset_eta();
    }
}

impl PreparationProgressCallback for CliProgressCallback {
    fn on_run_start(&self, recipients: usize, files: usize) {
        self.activate_bar(files);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Preparing {files} file(s) for {recipients} recipient(s)…"))
        ));
    }

    fn on_file_start(&self, recipient: &str, relative_path: &str) {
        self.bar.set_message(format!("{recipient}: {relative_path}"));
    }

    fn on_file_complete(
        &self,
        recipient: &str,
        relative_path: &str,
        output_path: &Path,
        _password: Option<&str>,
    ) {
        self.bar.println(format!(
            "  {} {:<24} {}  {}",
            green("✓"),
            recipient,
            relative_path,
            dim(&output_path.display().to_string()),
        ));
        self.bar.inc(1);
    }

    fn on_file_error(&self, recipient: &str, relative_path: &str, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);

        // Truncate very long error messages to keep output tidy.
        let msg = if error.chars().count() > 80 {
            let short: String = error.chars().take(79).collect();
            format!("{short}\u{2026}")
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} {:<24} {}  {}",
            red("✗"),
            recipient,
            relative_path,
            red(&msg),
        ));
        self.bar.inc(1);
    }

    fn on_log(&self, level: LogLevel, line: &str) {
        match level {
            LogLevel::Info if self.verbose => self.bar.println(dim(line)),
            LogLevel::Info => {}
            LogLevel::Warn => self.bar.println(format!("  {} {}", yellow("!"), line)),
            LogLevel::Error => {}
        }
    }

    fn on_run_complete(&self, stats: &PreparationStats) {
        self.bar.finish_and_clear();
        let failed = self.errors.load(Ordering::SeqCst);
        if failed == 0 {
            eprintln!(
                "{} {} file(s) prepared for {} recipient(s)",
                green("✔"),
                bold(&stats.processed_files.to_string()),
                stats.processed_recipients
            );
        } else {
            eprintln!(
                "{} {} file(s) prepared  ({} missing, {} failed)",
                if stats.processed_files == 0 {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&stats.processed_files.to_string()),
                red(&stats.missing_files.len().to_string()),
                red(&stats.failed_files.len().to_string()),
            );
        }
    }
}

/// Plain stderr log for `--no-progress`.
struct LineLogCallback {
    verbose: bool,
}

impl PreparationProgressCallback for LineLogCallback {
    fn on_log(&self, level: LogLevel, line: &str) {
        match level {
            LogLevel::Info if !self.verbose => {}
            LogLevel::Info => eprintln!("{line}"),
            LogLevel::Warn => eprintln!("warning: {line}"),
            LogLevel::Error => eprintln!("error: {line}"),
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Explicit packages: [{"recipient": "Jean Dupont", "files": ["board/minutes.pdf"]}]
  pdfdispatch packages packages.json --source ./pack --output ./out

  # Reviewer assignments: [{"file": "board/minutes.pdf", "reviewers": ["Ann Lee"]}]
  pdfdispatch reviewers reviews.json --source ./pack --output ./out --collection review

  # Member assignments: [{"member": "Ann Lee", "references": ["Jean Dupont"]}]
  pdfdispatch members members.json --source ./cvs --output ./out

  # Lock documents entirely and keep a JSON report with the owner passwords
  pdfdispatch packages packages.json -s ./pack -o ./out --modify none --json > report.json

  # Which qpdf will be used?
  pdfdispatch locate

OUTPUT LAYOUT:
  <output>/<recipient>/[<collection>/]<relative dir>/<file>.pdf

  Recipient and collection names keep only A-Z a-z 0-9 . _ -; every other
  character becomes '_'.

ENVIRONMENT VARIABLES:
  PDFDISPATCH_QPDF        Path to the qpdf executable (skips PATH search)
  PDFDISPATCH_RESOURCES   Extra root searched for a bundled qpdf/<platform>/ binary
  RUST_LOG                Override the log filter (e.g. pdf_dispatch=debug)
"#;

/// Prepare watermarked, redacted, encrypted per-recipient PDF copies.
#[derive(Parser, Debug)]
#[command(
    name = "pdfdispatch",
    version,
    about = "Prepare watermarked, redacted, encrypted per-recipient PDF copies",
    long_about = "Prepare per-recipient copies of a folder of PDF documents. Each copy has \
sensitive identifiers masked, a diagonal watermark with the recipient's name on every page, \
scrubbed metadata, and AES-256 restrictions (no printing, no extraction). Requires qpdf.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PDFDISPATCH_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "PDFDISPATCH_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Prepare explicit recipient packages from a JSON file.
    Packages(RunArgs),
    /// Prepare from file → reviewers assignments.
    Reviewers(RunArgs),
    /// Prepare from member → person-name references.
    Members(RunArgs),
    /// Show which qpdf executable would be used.
    Locate {
        /// Explicit qpdf executable to check.
        #[arg(long, env = "PDFDISPATCH_QPDF")]
        qpdf: Option<PathBuf>,

        /// Output structured JSON.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// JSON assignment file.
    input: PathBuf,

    /// Source folder scanned recursively for .pdf files.
    #[arg(short, long, env = "PDFDISPATCH_SOURCE")]
    source: PathBuf,

    /// Output folder; one sub-folder per recipient.
    #[arg(short, long, env = "PDFDISPATCH_OUTPUT")]
    output: PathBuf,

    /// qpdf executable. Default: resolved from PATH or the bundled copy.
    #[arg(long, env = "PDFDISPATCH_QPDF")]
    qpdf: Option<PathBuf>,

    /// Redaction regex matched against raw PDF bytes.
    #[arg(long, env = "PDFDISPATCH_PATTERN")]
    pattern: Option<String>,

    /// Split-token regex (one capture group per masked field).
    #[arg(long, env = "PDFDISPATCH_SPLIT_PATTERN")]
    split_pattern: Option<String>,

    /// Skip the redaction stage.
    #[arg(long, env = "PDFDISPATCH_NO_REDACT")]
    no_redact: bool,

    /// Modification rights kept in the encrypted copy.
    #[arg(long, env = "PDFDISPATCH_MODIFY", value_enum, default_value = "annotate")]
    modify: ModifyArg,

    /// Collection sub-folder created inside each recipient folder.
    #[arg(long, env = "PDFDISPATCH_COLLECTION")]
    collection: Option<String>,

    /// Folder for recipients whose name has no usable characters.
    #[arg(long, env = "PDFDISPATCH_DEFAULT_FOLDER", default_value = "recipient")]
    default_folder: String,

    /// Owner-password length (minimum 12).
    #[arg(long, env = "PDFDISPATCH_PASSWORD_LENGTH", default_value_t = 24)]
    password_length: usize,

    /// Directory for intermediate files.
    #[arg(long, env = "PDFDISPATCH_TEMP_DIR")]
    temp_dir: Option<PathBuf>,

    /// Print the run report (including owner passwords) as JSON on stdout.
    #[arg(long, env = "PDFDISPATCH_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDFDISPATCH_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum ModifyArg {
    Annotate,
    None,
}

impl From<ModifyArg> for ModifyPermission {
    fn from(v: ModifyArg) -> Self {
        match v {
            ModifyArg::Annotate => ModifyPermission::Annotate,
            ModifyArg::None => ModifyPermission::None,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active;
    // the bar provides all the feedback that matters to the user.
    let show_progress = match cli.command {
        Command::Packages(ref a) | Command::Reviewers(ref a) | Command::Members(ref a) => {
            !cli.quiet && !a.no_progress && !a.json
        }
        Command::Locate { .. } => false,
    };
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Locate { ref qpdf, json } => locate(qpdf.as_deref(), json).await,
        Command::Packages(ref args) => {
            let packages: Vec<Package> = load_json(&args.input).await?;
            run(&cli, args, show_progress, Job::Packages(packages)).await
        }
        Command::Reviewers(ref args) => {
            let assignments: Vec<ReviewerAssignment> = load_json(&args.input).await?;
            run(&cli, args, show_progress, Job::Reviewers(assignments)).await
        }
        Command::Members(ref args) => {
            let assignments: Vec<MemberAssignment> = load_json(&args.input).await?;
            run(&cli, args, show_progress, Job::Members(assignments)).await
        }
    }
}

enum Job {
    Packages(Vec<Package>),
    Reviewers(Vec<ReviewerAssignment>),
    Members(Vec<MemberAssignment>),
}

async fn run(cli: &Cli, args: &RunArgs, show_progress: bool, job: Job) -> Result<()> {
    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new(cli.verbose) as ProgressCallback)
    } else if !cli.quiet {
        Some(Arc::new(LineLogCallback {
            verbose: cli.verbose,
        }) as ProgressCallback)
    } else {
        None
    };
    let config = build_config(args, progress)?;

    // Ctrl-C flips the signal; the run stops at the next checkpoint.
    let cancel = CancelSignal::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("{}", yellow("Cancelling…"));
                cancel.cancel();
            }
        });
    }

    let inventory = Inventory::scan(&args.source, &cancel)
        .await
        .with_context(|| format!("Failed to scan {}", args.source.display()))?;

    let toolkit = Arc::new(Toolkit::from_config(&config));
    let pipeline = Arc::new(Pipeline::standard(toolkit, &config));

    let outcome = match job {
        Job::Packages(packages) => {
            PackageProcessor::new(pipeline.clone(), config)
                .prepare(&packages, &inventory, &args.output, &cancel)
                .await
        }
        Job::Reviewers(assignments) => {
            ReviewerPreparation::new(pipeline.clone(), config)
                .prepare(&assignments, &inventory, &args.output, &cancel)
                .await
        }
        Job::Members(assignments) => {
            MemberPreparation::new(pipeline.clone(), config)
                .prepare(&assignments, &inventory, &args.output, &cancel)
                .await
        }
    };
    pipeline.dispose().await;

    let stats = outcome.context("Preparation failed")?;

    if args.json {
        let json = serde_json::to_string_pretty(&stats).context("Failed to serialise report")?;
        println!("{json}");
    } else if !cli.quiet && !show_progress {
        eprintln!(
            "Prepared {} file(s) for {}/{} recipient(s)",
            stats.processed_files, stats.processed_recipients, stats.requested_recipients
        );
        if !stats.missing_files.is_empty() {
            eprintln!("  {} missing: {}", stats.missing_files.len(), stats.missing_files.join(", "));
        }
        if !stats.failed_files.is_empty() {
            eprintln!("  {} failed", stats.failed_files.len());
        }
    }

    if !stats.failed_files.is_empty() {
        anyhow::bail!("{} file(s) failed", stats.failed_files.len());
    }
    Ok(())
}

/// Map CLI args to `PreparationConfig`.
fn build_config(args: &RunArgs, progress: Option<ProgressCallback>) -> Result<PreparationConfig> {
    let mut builder = PreparationConfig::builder()
        .redaction_enabled(!args.no_redact)
        .modify_permission(args.modify.clone().into())
        .default_folder(args.default_folder.clone())
        .password_length(args.password_length);

    if let Some(ref path) = args.qpdf {
        builder = builder.toolkit_path(path);
    }
    if let Some(ref pattern) = args.pattern {
        builder = builder.redaction_pattern(pattern.clone());
    }
    if let Some(ref pattern) = args.split_pattern {
        builder = builder.split_token_pattern(pattern.clone());
    }
    if let Some(ref collection) = args.collection {
        builder = builder.collection(collection.clone());
    }
    if let Some(ref dir) = args.temp_dir {
        builder = builder.temp_dir(dir);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

async fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid JSON in {}", path.display()))
}

async fn locate(explicit: Option<&Path>, json: bool) -> Result<()> {
    let (path, source) = match explicit {
        Some(path) => (path.to_path_buf(), "explicit".to_string()),
        None => {
            let resolution = qpdf_locate::resolve_cached();
            (resolution.path, format!("{:?}", resolution.source))
        }
    };

    let probe = path.clone();
    let version = tokio::task::spawn_blocking(move || qpdf_locate::probe_version(&probe))
        .await
        .context("Version probe panicked")?;

    if json {
        let report = serde_json::json!({
            "path": path,
            "source": source,
            "version": version.as_ref().ok(),
            "error": version.as_ref().err().map(|e| e.to_string()),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise report")?
        );
    } else {
        println!("qpdf:     {}", path.display());
        println!("Source:   {source}");
        match version {
            Ok(ref v) => println!("Version:  {v}"),
            Err(ref e) => println!("Version:  {}", red(&e.to_string())),
        }
    }

    version.map(|_| ()).context("qpdf is not usable")
}
