//! CLI binary for edgequake-pdfocr.
//!
//! A thin shim over the library crate. `pipeline` is the isolated unit of
//! work the orchestrator spawns; `run` is the orchestrator itself.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use edgequake_pdfocr::{
    convert, inspect, run_document, PageProgressCallback, PipelineConfig, PipelineConfigBuilder,
    PrepStrategy, ProgressCallback, RunOptions, RunStatus, WorkerCommand,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

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

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Progress bar on stderr plus one log line per page.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Rendering");
        bar.set_message("Rasterising pages…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn elapsed_secs(&self, page_num: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&page_num))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl PageProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total_pages: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total_pages as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("OCR");
        self.bar.reset_eta();
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Recognising {total_pages} pages…"))
        ));
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(page_num, Instant::now());
        }
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_complete(&self, page_num: usize, total: usize, text_len: usize) {
        let secs = self.elapsed_secs(page_num);
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<8}  {}",
            green("✓"),
            page_num,
            total,
            dim(&format!("{text_len:>5} bytes")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, total: usize, error: &str) {
        let secs = self.elapsed_secs(page_num);
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page_num,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, total_pages: usize, success_count: usize) {
        self.bar.finish_and_clear();
        let failed = self.errors.load(Ordering::SeqCst);
        if failed == 0 {
            eprintln!(
                "{} {} pages recognised",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} pages recognised  ({} with placeholders)",
                if failed == total_pages {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&success_count.to_string()),
                total_pages,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # OCR a Korean/Chinese scan end to end, print the run result as JSON
  pdfocr run scan.pdf --out-root outputs

  # English only, Otsu binarisation, deskew, keep page images and overlays
  pdfocr run scan.pdf --langs eng --prep otsu --deskew --keep-extra

  # Run just the page pipeline (what `run` spawns)
  pdfocr pipeline scan.pdf --out-root outputs --out-name report

  # Page count and PDF metadata, no OCR
  pdfocr inspect scan.pdf

PREPROCESSING STRATEGIES:
  none, adaptive (default), otsu, clahe_adaptive, morph_open_adaptive, morph_close_otsu

ENVIRONMENT VARIABLES:
  PDFOCR_TESSERACT   Tesseract executable (default: tesseract on PATH)
  TESSDATA_PREFIX    Tesseract language data directory
  PDFIUM_LIB_PATH    pdfium shared library, or the directory containing it
  PDFOCR_FONT        TrueType font for overlay labels
  RUST_LOG           Log filter (overrides --verbose / --quiet)
"#;

/// OCR scanned PDFs with Tesseract into ordered text and layout JSON.
#[derive(Parser, Debug)]
#[command(
    name = "pdfocr",
    version,
    about = "OCR scanned PDFs with Tesseract into ordered text and layout JSON",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PDFOCR_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "PDFOCR_QUIET")]
    quiet: bool,

    /// Disable the progress bar.
    #[arg(long, global = true, env = "PDFOCR_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the page pipeline for one PDF and announce its run directory.
    Pipeline {
        /// PDF file to OCR.
        pdf: PathBuf,

        #[command(flatten)]
        ocr: OcrArgs,

        /// Directory under which the run directory is created.
        #[arg(long, default_value = ".")]
        out_root: PathBuf,

        /// Requested run directory name (a random suffix is added on collision).
        #[arg(long)]
        out_name: Option<String>,

        /// Suffix for the timestamped default run directory name.
        #[arg(long)]
        tag: Option<String>,

        /// Print the per-page outcome summary as JSON on stdout.
        #[arg(long)]
        json: bool,
    },

    /// Run the pipeline in a child process, then merge its output.
    Run {
        /// PDF file to OCR.
        pdf: PathBuf,

        #[command(flatten)]
        ocr: OcrArgs,

        /// Directory under which run directories are created.
        #[arg(long, env = "PDFOCR_OUT_ROOT", default_value = ".")]
        out_root: PathBuf,

        /// Keep page images, per-page PDFs and overlays after merging.
        #[arg(long)]
        keep_extra: bool,

        /// Kill the pipeline after this many seconds.
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Print PDF metadata without running OCR.
    Inspect {
        /// PDF file to inspect.
        pdf: PathBuf,

        /// pdfium shared library, or the directory containing it.
        #[arg(long = "pdfium-lib", env = "PDFIUM_LIB_PATH")]
        pdfium_lib: Option<PathBuf>,

        /// Print metadata as JSON.
        #[arg(long)]
        json: bool,
    },
}

/// Recognition settings shared by `pipeline` and `run`.
#[derive(Args, Debug, Clone)]
struct OcrArgs {
    /// Rendering DPI (72–600).
    #[arg(long, env = "PDFOCR_DPI", default_value_t = 300,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Preprocessing strategy.
    #[arg(long, env = "PDFOCR_PREP", default_value = "adaptive")]
    prep: PrepStrategy,

    /// Tesseract language set, `+`-separated.
    #[arg(long, env = "PDFOCR_LANGS", default_value = "kor+chi_tra+eng")]
    langs: String,

    /// Page-segmentation mode (0–13).
    #[arg(long, default_value_t = 6, value_parser = clap::value_parser!(u8).range(0..=13))]
    psm: u8,

    /// OCR-engine mode (0–3).
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=3))]
    oem: Option<u8>,

    /// Process at most this many pages (0 = all).
    #[arg(long, default_value_t = 0)]
    max_pages: usize,

    /// Minimum confidence for overlay boxes.
    #[arg(long, default_value_t = 50, allow_negative_numbers = true)]
    min_conf: i32,

    /// Overlay line and label scale.
    #[arg(long, default_value_t = 1.0)]
    vis_scale: f32,

    /// Straighten pages before OCR.
    #[arg(long)]
    deskew: bool,

    /// Remove table rules before OCR.
    #[arg(long)]
    table_clean: bool,

    /// Only recognise these characters.
    #[arg(long)]
    whitelist: Option<String>,

    /// Never recognise these characters.
    #[arg(long)]
    blacklist: Option<String>,

    /// Re-OCR the top band of each page to fix the header line.
    #[arg(long)]
    header_fix: bool,

    /// Header band height as a fraction of the page.
    #[arg(long, default_value_t = 0.12)]
    header_ratio: f32,

    /// Tesseract executable.
    #[arg(long, env = "PDFOCR_TESSERACT", default_value = "tesseract")]
    tesseract: PathBuf,

    /// Tesseract language data directory.
    #[arg(long, env = "TESSDATA_PREFIX")]
    tessdata_dir: Option<PathBuf>,

    /// pdfium shared library, or the directory containing it.
    #[arg(long = "pdfium-lib", env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// TrueType font for overlay labels.
    #[arg(long, env = "PDFOCR_FONT")]
    font: Option<PathBuf>,
}

impl OcrArgs {
    fn builder(&self) -> PipelineConfigBuilder {
        let mut b = PipelineConfig::builder()
            .dpi(self.dpi)
            .prep(self.prep)
            .langs(self.langs.clone())
            .psm(self.psm)
            .max_pages(self.max_pages)
            .min_conf(self.min_conf)
            .vis_scale(self.vis_scale)
            .deskew(self.deskew)
            .table_clean(self.table_clean)
            .header_fix(self.header_fix)
            .header_ratio(self.header_ratio)
            .tesseract_command(self.tesseract.clone());
        if let Some(oem) = self.oem {
            b = b.oem(oem);
        }
        if let Some(w) = self.whitelist.as_ref().filter(|w| !w.trim().is_empty()) {
            b = b.whitelist(w.clone());
        }
        if let Some(bl) = self.blacklist.as_ref().filter(|b| !b.trim().is_empty()) {
            b = b.blacklist(bl.clone());
        }
        if let Some(ref dir) = self.tessdata_dir {
            b = b.tessdata_dir(dir.clone());
        }
        if let Some(ref lib) = self.pdfium_lib {
            b = b.pdfium_lib_path(lib.clone());
        }
        if let Some(ref font) = self.font {
            b = b.font_path(font.clone());
        }
        b
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Logs go to stderr; stdout carries the sentinel and JSON results.
    let wants_json = match &cli.command {
        Command::Pipeline { json, .. } | Command::Inspect { json, .. } => *json,
        Command::Run { .. } => true,
    };
    let show_progress = !cli.quiet && !cli.no_progress && !wants_json;
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
        Command::Pipeline {
            pdf,
            ocr,
            out_root,
            out_name,
            tag,
            json,
        } => {
            let mut builder = ocr.builder().out_root(out_root);
            if let Some(name) = out_name.filter(|n| !n.trim().is_empty()) {
                builder = builder.out_name(name);
            }
            if let Some(tag) = tag.filter(|t| !t.trim().is_empty()) {
                builder = builder.tag(tag);
            }
            if show_progress {
                let cb: ProgressCallback = CliProgressCallback::new();
                builder = builder.progress_callback(cb);
            }
            let config = builder.build().context("Invalid configuration")?;

            let output = convert(&pdf, &config)
                .await
                .with_context(|| format!("OCR pipeline failed for {}", pdf.display()))?;

            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&output).context("Failed to serialise output")?
                );
            } else if !cli.quiet && !show_progress {
                eprintln!(
                    "Recognised {}/{} pages ({} empty, {} failed) in {}ms",
                    output.stats.ok_pages + output.stats.empty_pages,
                    output.stats.total_pages,
                    output.stats.empty_pages,
                    output.stats.failed_pages,
                    output.stats.total_duration_ms
                );
            }
        }

        Command::Run {
            pdf,
            ocr,
            out_root,
            keep_extra,
            timeout,
        } => {
            let config = ocr.builder().build().context("Invalid configuration")?;
            let options = RunOptions {
                out_root,
                worker: WorkerCommand::default(),
                keep_extra,
                timeout: timeout.map(Duration::from_secs),
                pdfium_lib_path: ocr.pdfium_lib.clone(),
            };

            let spinner = (!cli.quiet && !cli.no_progress).then(|| {
                let bar = ProgressBar::new_spinner();
                bar.set_style(
                    ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed}")
                        .unwrap_or_else(|_| ProgressStyle::default_spinner())
                        .tick_strings(TICKS),
                );
                bar.set_prefix("OCR");
                bar.set_message(pdf.display().to_string());
                bar.enable_steady_tick(Duration::from_millis(80));
                bar
            });

            let result = run_document(&pdf, &config, &options).await;
            if let Some(bar) = spinner {
                bar.finish_and_clear();
            }
            let result = result.with_context(|| format!("OCR run failed for {}", pdf.display()))?;

            println!(
                "{}",
                serde_json::to_string_pretty(&result).context("Failed to serialise run result")?
            );
            if !cli.quiet {
                let mark = match result.status {
                    RunStatus::Complete => green("✔"),
                    RunStatus::Degraded => cyan("⚠"),
                };
                eprintln!(
                    "{}  {}  →  {}",
                    mark,
                    bold(&result.id),
                    dim(&result.merged_txt.display().to_string())
                );
            }
        }

        Command::Inspect {
            pdf,
            pdfium_lib,
            json,
        } => {
            let meta = inspect(&pdf, pdfium_lib.as_deref())
                .await
                .context("Failed to inspect PDF")?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&meta).context("Failed to serialise metadata")?
                );
            } else {
                println!("File:         {}", pdf.display());
                if let Some(ref t) = meta.title {
                    println!("Title:        {}", t);
                }
                if let Some(ref a) = meta.author {
                    println!("Author:       {}", a);
                }
                println!("Pages:        {}", meta.page_count);
                println!("PDF Version:  {}", meta.pdf_version);
                if let Some(ref p) = meta.producer {
                    println!("Producer:     {}", p);
                }
            }
        }
    }

    Ok(())
}
