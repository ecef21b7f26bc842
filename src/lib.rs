//! # edgequake-pdfocr
//!
//! Turn scanned or printed PDFs into ordered text and per-token layout JSON
//! with Tesseract, one page at a time, and merge the pages into document-level
//! artifacts.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input       validate the local file (%PDF magic)
//!  ├─ 2. Render      rasterise pages via pdfium (spawn_blocking) → pages/page_NNN.png
//!  ├─ 3. Preprocess  binarise (6 strategies), optional deskew and table-rule removal
//!  ├─ 4. OCR         Tesseract TSV → tokens → lines (CJK-aware joining)
//!  ├─ 5. Header fix  optional re-OCR of the top band
//!  ├─ 6. Persist     ocr_txt/page_NNN.txt, json/page_NNN.json, vis/page_NNN.png
//!  └─ 7. Merge       merged.txt, merged.json, merged.pdf, meta.json, cleanup
//! ```
//!
//! Steps 1–6 are the *pipeline* ([`convert`]), normally run as a child
//! process (`pdfocr pipeline`). Step 7 belongs to the *orchestrator*
//! ([`run_document`]), which spawns that child, discovers its run directory
//! from the `__OUTDIR__=` line and merges only after a successful exit.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdfocr::{run_document, PipelineConfig, PrepStrategy, RunOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder()
//!         .dpi(300)
//!         .prep(PrepStrategy::Adaptive)
//!         .langs("kor+eng")
//!         .build()?;
//!     let options = RunOptions {
//!         out_root: "outputs".into(),
//!         ..RunOptions::default()
//!     };
//!     let result = run_document("scan.pdf", &config, &options).await?;
//!     println!("{}", result.read_merged_text());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdfocr` binary (clap + indicatif + anyhow + tracing-subscriber) |
//!
//! ## External programs
//!
//! OCR needs the `tesseract` executable and the requested language packs
//! (`kor`, `chi_tra`, `eng` by default). Rendering needs the pdfium shared
//! library; point [`PipelineConfig::pdfium_lib_path`] at it or install it
//! system-wide.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod layout;
pub mod merge;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod run;
pub mod sentinel;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{PipelineConfig, PipelineConfigBuilder, PrepStrategy, TesseractConfig};
pub use convert::{convert, convert_sync, convert_with_engine, inspect};
pub use error::{OcrError, PageError, PdfOcrError};
pub use layout::RunLayout;
pub use output::{
    ArtifactOutcome, BoundingBox, ConversionOutput, ConversionStats, DocumentMetadata,
    MergeReport, OcrToken, PageOutcome, PageStatus, PageSummary, RunResult, RunStatus,
};
pub use pipeline::ocr::{OcrEngine, OcrParams, TesseractCli};
pub use progress::{NoopProgressCallback, PageProgressCallback, ProgressCallback};
pub use run::{locate_worker, run_document, run_ocr, RunOptions, WorkerCommand};
