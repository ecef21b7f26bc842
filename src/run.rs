//! Run orchestration: execute the page pipeline in a child process, find its
//! run directory, and merge the results.
//!
//! ```text
//! run_document ──▶ spawn `pdfocr pipeline <pdf> --out-name out_tesseract_<stem>_<hex> …`
//!                    │  wait (optionally with a timeout)
//!                    ▼
//!              exit != 0 ─────────▶ RunProcessFailed { tail: last 50 lines }
//!                    │ exit == 0
//!                    ▼
//!              last `__OUTDIR__=` line (or the predicted path)
//!                    ▼
//!              merge text / JSON / PDF / meta, then cleanup
//! ```
//!
//! The child process is the isolation boundary: a crash or runaway OCR run
//! cannot touch the orchestrator's state, and nothing is merged unless the
//! child exited successfully.

use crate::config::{PipelineConfig, PrepStrategy};
use crate::error::PdfOcrError;
use crate::layout::{requested_run_name, RunLayout};
use crate::merge::{merge_run, page_summaries, MergeRequest};
use crate::output::{PageStatus, RunResult, RunStatus};
use crate::pipeline::input;
use crate::sentinel;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Lines of combined worker output kept in [`PdfOcrError::RunProcessFailed`].
pub const FAILURE_TAIL_LINES: usize = 50;

/// The program (and leading arguments) that runs one pipeline.
///
/// The orchestrator appends the PDF path and the flags from
/// [`PipelineConfig::worker_args`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }
}

impl Default for WorkerCommand {
    /// `pdfocr pipeline`, with `pdfocr` found by [`locate_worker`].
    fn default() -> Self {
        let program = match std::env::current_exe() {
            Ok(exe) => locate_worker(&exe),
            Err(_) => PathBuf::from(WORKER_BIN),
        };
        Self::new(program).arg("pipeline")
    }
}

/// File stem of the CLI binary that runs `pipeline`.
pub const WORKER_BIN: &str = "pdfocr";

/// Find the `pdfocr` executable for a process running as `exe`.
///
/// 1. `exe` itself when it is `pdfocr`
/// 2. `pdfocr` in the same directory, then in the parent directory
///    (test and example binaries live one level below in cargo's target dir)
/// 3. bare `pdfocr`, resolved through `PATH` at spawn time
pub fn locate_worker(exe: &Path) -> PathBuf {
    if exe.file_stem().is_some_and(|s| s == WORKER_BIN) {
        return exe.to_path_buf();
    }
    let file_name = format!("{}{}", WORKER_BIN, std::env::consts::EXE_SUFFIX);
    exe.ancestors()
        .skip(1)
        .take(2)
        .map(|dir| dir.join(&file_name))
        .find(|candidate| candidate.is_file())
        .unwrap_or_else(|| PathBuf::from(WORKER_BIN))
}

/// Orchestrator settings.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Directory under which run directories are created. Default: `.`.
    pub out_root: PathBuf,
    pub worker: WorkerCommand,
    /// Keep page images, per-page PDFs and overlays after merging. Default: false.
    pub keep_extra: bool,
    /// Kill the worker after this long. Default: wait indefinitely.
    pub timeout: Option<Duration>,
    /// pdfium library used by the PDF merge and forwarded to the worker.
    pub pdfium_lib_path: Option<PathBuf>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            out_root: PathBuf::from("."),
            worker: WorkerCommand::default(),
            keep_extra: false,
            timeout: None,
            pdfium_lib_path: None,
        }
    }
}

/// Run the OCR pipeline on `pdf` as an isolated child process and merge its output.
///
/// `config` supplies the pipeline settings; its output location fields are
/// replaced by `options.out_root` and a generated run name.
///
/// # Errors
/// - input validation failures ([`PdfOcrError::FileNotFound`], [`PdfOcrError::NotAPdf`], …)
/// - [`PdfOcrError::RunSpawnFailed`] if the worker cannot be started
/// - [`PdfOcrError::RunProcessFailed`] if it exits unsuccessfully
/// - [`PdfOcrError::RunTimedOut`] if it outlives `options.timeout`
///
/// Merge and cleanup problems are reported in [`RunResult::artifacts`] and
/// failed pages in [`RunResult::pages`], not as errors. Either makes the run
/// [`RunStatus::Degraded`].
pub async fn run_document(
    pdf: impl AsRef<Path>,
    config: &PipelineConfig,
    options: &RunOptions,
) -> Result<RunResult, PdfOcrError> {
    let pdf_path = input::resolve_local(pdf.as_ref())?;

    std::fs::create_dir_all(&options.out_root).map_err(|e| PdfOcrError::OutputDirFailed {
        path: options.out_root.clone(),
        source: e,
    })?;
    let out_root = options
        .out_root
        .canonicalize()
        .map_err(|e| PdfOcrError::OutputDirFailed {
            path: options.out_root.clone(),
            source: e,
        })?;

    let run_name = requested_run_name(&pdf_path);
    let predicted = out_root.join(&run_name);

    let mut worker_config = config.clone();
    worker_config.out_root = out_root.clone();
    worker_config.out_name = Some(run_name);
    worker_config.tag = None;
    worker_config.progress_callback = None;
    if options.pdfium_lib_path.is_some() {
        worker_config.pdfium_lib_path = options.pdfium_lib_path.clone();
    }

    let lines = execute(&options.worker, &pdf_path, &worker_config, options.timeout).await?;

    let out_dir = sentinel::resolve_out_dir(lines.iter().map(String::as_str), &predicted);
    debug!("Run directory: {}", out_dir.display());
    let layout = RunLayout::at(out_dir);

    let merge_layout = layout.clone();
    let source = pdf_path.clone();
    let keep_extra = options.keep_extra;
    let lib = options.pdfium_lib_path.clone();
    let (pages, artifacts) = tokio::task::spawn_blocking(move || {
        let pages = page_summaries(&merge_layout);
        let artifacts = merge_run(&MergeRequest {
            layout: &merge_layout,
            source_pdf: &source,
            keep_extra,
            pdfium_lib_path: lib.as_deref(),
        });
        (pages, artifacts)
    })
    .await
    .map_err(|e| PdfOcrError::Internal(format!("Merge task panicked: {}", e)))?;

    let failed_pages = pages
        .iter()
        .filter(|p| p.status == PageStatus::Error)
        .count();
    if failed_pages > 0 {
        warn!("{} of {} pages failed", failed_pages, pages.len());
    }
    let artifacts_clean = [
        &artifacts.text,
        &artifacts.json,
        &artifacts.pdf,
        &artifacts.meta,
    ]
    .iter()
    .all(|a| a.is_clean());
    let status = if artifacts_clean && failed_pages == 0 {
        RunStatus::Complete
    } else {
        RunStatus::Degraded
    };
    info!("Run {} finished ({:?})", layout.id(), status);

    Ok(RunResult {
        id: layout.id(),
        merged_txt: layout.merged_txt(),
        merged_json: layout.merged_json(),
        merged_pdf: layout.merged_pdf(),
        out_dir: layout.root,
        pages_dir: layout.pages_dir,
        txt_dir: layout.txt_dir,
        vis_dir: layout.vis_dir,
        json_dir: layout.json_dir,
        status,
        failed_pages,
        pages,
        artifacts,
    })
}

/// The five-parameter form used by service callers.
///
/// The worker is the `pdfocr` binary located by [`locate_worker`]; use
/// [`run_document`] with an explicit [`WorkerCommand`] to run anything else.
pub async fn run_ocr(
    pdf: impl AsRef<Path>,
    out_root: impl Into<PathBuf>,
    dpi: u32,
    prep: PrepStrategy,
    langs: &str,
    psm: u8,
) -> Result<RunResult, PdfOcrError> {
    let config = PipelineConfig::builder()
        .dpi(dpi)
        .prep(prep)
        .langs(langs)
        .psm(psm)
        .build()?;
    let options = RunOptions {
        out_root: out_root.into(),
        ..RunOptions::default()
    };
    run_document(pdf, &config, &options).await
}

/// Spawn the worker, wait for it, and return its stdout lines followed by its stderr lines.
async fn execute(
    worker: &WorkerCommand,
    pdf: &Path,
    config: &PipelineConfig,
    timeout: Option<Duration>,
) -> Result<Vec<String>, PdfOcrError> {
    let mut cmd = Command::new(&worker.program);
    cmd.args(&worker.args)
        .arg(pdf)
        .args(config.worker_args())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    debug!("Spawning {:?}", cmd.as_std());

    let child = cmd.spawn().map_err(|source| PdfOcrError::RunSpawnFailed {
        program: worker.program.clone(),
        source,
    })?;

    let waited = match timeout {
        // Dropping the pending future drops the child, which kills it.
        Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
            .await
            .map_err(|_| {
                warn!("Pipeline exceeded {}s, killed", limit.as_secs());
                PdfOcrError::RunTimedOut {
                    secs: limit.as_secs(),
                }
            })?,
        None => child.wait_with_output().await,
    };
    let output = waited.map_err(|e| PdfOcrError::Internal(format!("waiting for pipeline: {}", e)))?;

    let lines: Vec<String> = String::from_utf8_lossy(&output.stdout)
        .lines()
        .chain(String::from_utf8_lossy(&output.stderr).lines())
        .map(str::to_string)
        .collect();

    if !output.status.success() {
        return Err(PdfOcrError::RunProcessFailed {
            code: output.status.code(),
            tail: failure_tail(&lines),
        });
    }
    Ok(lines)
}

/// Last [`FAILURE_TAIL_LINES`] lines, newline-joined.
pub fn failure_tail(lines: &[String]) -> String {
    let start = lines.len().saturating_sub(FAILURE_TAIL_LINES);
    lines[start..].join("\n")
}
