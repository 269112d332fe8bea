//! CLI binary for konvrt.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ConversionConfig`, runs every input through one orchestrator and prints
//! where each converted file landed.

use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use konvrt::{
    convert_stream_with_cancel, ConversionConfig, ConversionRequest, ConvertError, DocumentFormat,
    ErrorKind, JobProgressCallback, Orchestrator, ProgressCallback, Stage,
};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Renders one bar for the whole batch plus a log line per finished job.
/// Jobs finish out of order, so lines are keyed by the short job id.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new(total: usize) -> Arc<Self> {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} jobs  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        let bar = ProgressBar::new(total as u64);
        bar.set_style(style);
        bar.set_prefix("Converting");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self { bar })
    }

    /// Inputs rejected before admission never get a job id.
    fn report_rejected(&self, input: &Path, error: &ConvertError) {
        self.bar
            .println(format!("  {} {}  {}", red("✗"), input.display(), red(&error.to_string())));
        self.bar.inc(1);
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

fn short(id: Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}

impl JobProgressCallback for CliProgressCallback {
    fn on_job_queued(&self, job_id: Uuid, queue_depth: usize) {
        if queue_depth > 0 {
            self.bar
                .set_message(format!("{} queued behind {queue_depth}", short(job_id)));
        }
    }

    fn on_stage_poll(&self, job_id: Uuid, stage: Stage, attempt: u32, max: u32, status: &str) {
        self.bar.set_message(format!(
            "{} {stage} {attempt}/{max} ({status})",
            short(job_id)
        ));
    }

    fn on_job_complete(&self, job_id: Uuid, output: &Path) {
        self.bar.println(format!(
            "  {} {}  {}",
            green("✓"),
            dim(&short(job_id)),
            output.display()
        ));
        self.bar.inc(1);
    }

    fn on_job_failed(&self, job_id: Uuid, kind: ErrorKind, detail: &str) {
        let msg = if detail.chars().count() > 80 {
            format!("{}\u{2026}", detail.chars().take(79).collect::<String>())
        } else {
            detail.to_string()
        };
        self.bar.println(format!(
            "  {} {}  {}  {}",
            red("✗"),
            dim(&short(job_id)),
            bold(kind.as_str()),
            red(&msg)
        ));
        self.bar.inc(1);
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # PDF to Word (source format from the extension)
  konvrt report.pdf --to docx

  # Several files, at most 3 remote jobs at a time
  konvrt *.pdf --to docx --max-concurrent 3 --output-dir converted/

  # Plain text to PDF with a longer conversion budget
  konvrt notes.txt --to pdf --conversion-attempts 90

  # Machine-readable results, one JSON object per line
  konvrt a.pdf b.pdf --to docx --json

ENVIRONMENT VARIABLES:
  KONVRT_API_KEY   Bearer credential for the conversion provider (required)
  KONVRT_API_URL   Provider API root (default: https://api.cloudconvert.com/v2)
  RUST_LOG         Overrides the log filter, e.g. RUST_LOG=konvrt=debug
"#;

/// Convert documents through a remote conversion provider.
#[derive(Parser, Debug)]
#[command(
    name = "konvrt",
    version,
    about = "Convert documents through a remote conversion provider",
    long_about = "Convert PDF, DOCX, ODT and plain-text documents through a hosted conversion \
API. Inputs are validated locally, then queued so that no more than --max-concurrent remote \
jobs run at once.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local files to convert.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Target format: pdf, docx, odt, txt.
    #[arg(short, long, value_parser = parse_format)]
    to: DocumentFormat,

    /// Source format. Inferred from each file's extension when omitted.
    #[arg(long, value_parser = parse_format)]
    from: Option<DocumentFormat>,

    /// Directory converted files are written to.
    #[arg(short, long, env = "KONVRT_OUTPUT_DIR", default_value = "outputs")]
    output_dir: PathBuf,

    /// Remote jobs allowed in flight at once.
    #[arg(short = 'j', long, env = "KONVRT_MAX_CONCURRENT", default_value_t = 2,
          value_parser = clap::value_parser!(u64).range(1..))]
    max_concurrent: u64,

    /// Delay between status checks, in milliseconds.
    #[arg(long, env = "KONVRT_POLL_INTERVAL_MS", default_value_t = 1000)]
    poll_interval_ms: u64,

    /// Status checks spent waiting for the upload target.
    #[arg(long, env = "KONVRT_UPLOAD_ATTEMPTS", default_value_t = 10)]
    upload_attempts: u32,

    /// Status checks spent waiting for the conversion.
    #[arg(long, env = "KONVRT_CONVERSION_ATTEMPTS", default_value_t = 30)]
    conversion_attempts: u32,

    /// Provider API root.
    #[arg(long, env = "KONVRT_API_URL")]
    api_url: Option<String>,

    /// Bearer credential for the provider.
    #[arg(long, env = "KONVRT_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Provider-side conversion engine; "none" lets the provider choose.
    #[arg(long, env = "KONVRT_ENGINE", default_value = "libreoffice")]
    engine: String,

    /// Per-request HTTP timeout in seconds.
    #[arg(long, env = "KONVRT_REQUEST_TIMEOUT", default_value_t = 60)]
    request_timeout: u64,

    /// Print one JSON object per finished job on stdout.
    #[arg(long, env = "KONVRT_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "KONVRT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "KONVRT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "KONVRT_QUIET")]
    quiet: bool,
}

fn parse_format(s: &str) -> std::result::Result<DocumentFormat, String> {
    s.parse::<DocumentFormat>().map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level library logs.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
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

    // ── Build requests ───────────────────────────────────────────────────
    let requests = cli
        .inputs
        .iter()
        .map(|path| match cli.from {
            Some(source) => Ok(ConversionRequest::new(path, source, cli.to)),
            None => ConversionRequest::from_path(path, cli.to)
                .with_context(|| format!("Cannot infer the format of {}", path.display())),
        })
        .collect::<Result<Vec<_>>>()?;
    let total = requests.len();

    // ── Build config ─────────────────────────────────────────────────────
    let progress = show_progress.then(|| CliProgressCallback::new(total));
    let config = build_config(
        &cli,
        progress.clone().map(|cb| cb as Arc<dyn JobProgressCallback>),
    )?;
    let orchestrator = Orchestrator::new(config).context("Failed to set up the provider client")?;

    // ── Ctrl-C stops queued and polling jobs ─────────────────────────────
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    // ── Run conversions ──────────────────────────────────────────────────
    let mut results = convert_stream_with_cancel(&orchestrator, requests, cancel);
    let mut failed = 0usize;

    while let Some((idx, result)) = results.next().await {
        let input = &cli.inputs[idx];
        match result {
            Ok(output) => {
                if cli.json {
                    let line =
                        serde_json::to_string(&output).context("Failed to serialise output")?;
                    println!("{line}");
                } else if !show_progress && !cli.quiet {
                    eprintln!(
                        "{} {} → {}  {}",
                        green("✔"),
                        input.display(),
                        bold(&output.path.display().to_string()),
                        dim(&format!("{}ms", output.stats.total_ms)),
                    );
                }
            }
            Err(e) => {
                failed += 1;
                if cli.json {
                    let line = serde_json::json!({
                        "input": input,
                        "error": { "kind": e.kind(), "detail": e.to_string() },
                    });
                    println!("{line}");
                } else if let Some(ref cb) = progress {
                    if e.is_client_error() {
                        cb.report_rejected(input, &e);
                    }
                } else {
                    eprintln!("{} {}: {}", red("✘"), input.display(), e);
                }
            }
        }
    }

    if let Some(ref cb) = progress {
        cb.finish();
    }
    if !cli.quiet && !cli.json {
        eprintln!(
            "{} {}/{} converted  →  {}",
            if failed == 0 { green("✔") } else { red("✘") },
            total - failed,
            total,
            bold(&cli.output_dir.display().to_string()),
        );
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {total} conversions failed");
    }
    Ok(())
}

/// Map CLI args to `ConversionConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ConversionConfig> {
    let engine = match cli.engine.trim() {
        "" | "none" => None,
        name => Some(name.to_string()),
    };

    let mut builder = ConversionConfig::builder()
        .max_concurrent_jobs(cli.max_concurrent as usize)
        .poll_interval_ms(cli.poll_interval_ms)
        .upload_ready_attempts(cli.upload_attempts)
        .conversion_attempts(cli.conversion_attempts)
        .engine(engine)
        .output_dir(&cli.output_dir)
        .request_timeout_secs(cli.request_timeout);

    if let Some(ref url) = cli.api_url {
        builder = builder.api_base_url(url);
    }
    if let Some(ref key) = cli.api_key {
        builder = builder.api_key(key);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
