//! CLI binary for scan2md.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ConversionConfig`, renders progress, and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use scan2md::{convert_batch, BatchProgressCallback, ConversionConfig};
use std::path::PathBuf;
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

/// Terminal progress callback: one bar that walks through the pipeline
/// phases, with per-file log lines printed above it. Works correctly when
/// uploads and materializations complete out of order.
struct CliProgressCallback {
    bar: ProgressBar,
    uploads_done: AtomicUsize,
    failures: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        bar.set_style(style);
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            uploads_done: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        })
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_files: usize) {
        self.bar.set_prefix("Uploading");
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Converting {total_files} file(s)…"))
        ));
    }

    fn on_upload_complete(&self, file_name: &str, ok: bool) {
        let done = self.uploads_done.fetch_add(1, Ordering::SeqCst) + 1;
        let mark = if ok { green("✓") } else { red("✗") };
        self.bar.println(format!("  {mark} upload {file_name}"));
        self.bar.set_message(format!("{done} uploaded"));
    }

    fn on_poll(&self, done: usize, total: usize, elapsed_secs: u64) {
        self.bar.set_prefix("Extracting");
        self.bar
            .set_message(format!("{done}/{total} done  {}", dim(&format!("{elapsed_secs}s"))));
    }

    fn on_file_materialized(&self, file_name: &str, images_extracted: usize, degraded: bool) {
        self.bar.set_prefix("Downloading");
        if degraded {
            self.failures.fetch_add(1, Ordering::SeqCst);
            self.bar
                .println(format!("  {} {file_name}", red("✗")));
        } else {
            self.bar.println(format!(
                "  {} {file_name}  {}",
                green("✓"),
                dim(&format!("{images_extracted} image(s)"))
            ));
        }
    }

    fn on_batch_complete(&self, completed: usize, failed: usize) {
        self.bar.finish_and_clear();
        if failed == 0 {
            eprintln!(
                "{} {} file(s) converted successfully",
                green("✔"),
                bold(&completed.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} file(s) converted  ({} degraded to placeholders)",
                cyan("⚠"),
                bold(&completed.to_string()),
                completed + failed,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert a directory of scanned pages (output lands next to it)
  scan2md ./downloaded_images

  # Name the output and put it somewhere specific
  scan2md ./pages -o ./output -n chapter-3

  # English documents, tables only, wider upload pool
  scan2md ./pages --language en --no-formula --concurrency 8

  # Patient mode for big batches
  scan2md ./pages --max-wait 900 --poll-interval 5

ENVIRONMENT VARIABLES:
  MINERU_API_TOKEN   Bearer token for the extraction API (required)
  RUST_LOG           Log filter, e.g. RUST_LOG=scan2md=debug

OUTPUT LAYOUT:
  <output>/<name>/<name>.md      merged Markdown, sections in page order
  <output>/<name>/images/        extracted images, index-prefixed
  <output>.zip                   the whole result tree, packaged

Files that fail remotely appear as <!-- ... --> comments in the merged
document instead of aborting the batch."#;

/// Convert batches of scanned pages to merged Markdown via a remote
/// OCR/layout service.
#[derive(Parser, Debug)]
#[command(
    name = "scan2md",
    version,
    about = "Batch-convert scanned document pages to merged Markdown",
    after_help = AFTER_HELP
)]
struct Cli {
    /// Directory of source page images (jpg, jpeg, png, webp, pdf)
    image_dir: PathBuf,

    /// Output directory; defaults to the parent of IMAGE_DIR
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output folder and Markdown file name
    #[arg(short = 'n', long, default_value = "converted")]
    name: String,

    /// API bearer token; falls back to MINERU_API_TOKEN
    #[arg(long, env = "MINERU_API_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Base URL of the extraction API
    #[arg(long, default_value = "https://mineru.net/api/v4")]
    base_url: String,

    /// Document language hint
    #[arg(long, default_value = "ch")]
    language: String,

    /// Layout-recognition model
    #[arg(long, default_value = "doclayout_yolo")]
    layout_model: String,

    /// Disable formula recognition
    #[arg(long)]
    no_formula: bool,

    /// Disable table recognition
    #[arg(long)]
    no_table: bool,

    /// Worker-pool size for uploads and downloads
    #[arg(long, default_value_t = 5)]
    concurrency: usize,

    /// Poll deadline in seconds
    #[arg(long, default_value_t = 300)]
    max_wait: u64,

    /// Seconds between status polls
    #[arg(long, default_value_t = 3)]
    poll_interval: u64,

    /// Skip the startup sweep of orphaned workspaces
    #[arg(long)]
    no_sweep: bool,

    /// Quiet mode: no progress bar, errors only
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(if cli.quiet { "warn" } else { "scan2md=info" })),
        )
        .with_target(false)
        .init();

    // Deterministic workspace teardown on interrupt; the registry sweep at
    // the end of main covers the normal path.
    ctrlc::set_handler(|| {
        let removed = scan2md::workspace::registry().shutdown();
        if removed > 0 {
            eprintln!("Interrupted: removed {removed} workspace(s)");
        }
        std::process::exit(130);
    })
    .context("failed to install interrupt handler")?;

    if !cli.no_sweep {
        let age = Duration::from_secs(24 * 3600);
        let swept = scan2md::sweep_orphans(&std::env::current_dir()?, age);
        if swept > 0 {
            eprintln!("{}", dim(&format!("Swept {swept} orphaned workspace(s)")));
        }
    }

    let mut builder = ConversionConfig::builder()
        .base_url(cli.base_url)
        .language(cli.language)
        .layout_model(cli.layout_model)
        .enable_formula(!cli.no_formula)
        .enable_table(!cli.no_table)
        .concurrency(cli.concurrency)
        .poll_max_wait_secs(cli.max_wait)
        .poll_interval_secs(cli.poll_interval);

    if let Some(token) = cli.token {
        builder = builder.api_token(token);
    }
    if !cli.quiet {
        builder = builder.progress_callback(CliProgressCallback::new());
    }

    let config = builder.build().context("invalid configuration")?;

    let result = convert_batch(
        &cli.image_dir,
        cli.output.as_deref(),
        Some(&cli.name),
        &config,
    )
    .await
    .context("batch conversion failed")?;

    println!();
    println!("{}", bold("Result"));
    println!("  markdown  {}", result.markdown_path.display());
    if result.image_count > 0 {
        println!(
            "  images    {}  ({} file(s))",
            result.images_dir.display(),
            result.image_count
        );
    }
    println!("  archive   {}", result.archive_path.display());
    println!(
        "  {}",
        dim(&format!(
            "{}/{} files, {:.1}s",
            result.stats.completed_files,
            result.stats.total_files,
            result.stats.total_duration_ms as f64 / 1000.0
        ))
    );

    // Nothing should be live here; this is the deterministic shutdown hook.
    scan2md::workspace::registry().shutdown();

    Ok(())
}
