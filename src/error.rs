//! Error types for the edgequake-pdfocr library.
//!
//! Three error types for three scopes:
//!
//! * [`PdfOcrError`] is **fatal**: the run cannot proceed at all (missing or
//!   unopenable PDF, pdfium unavailable, the isolated worker process exited
//!   non-zero). Returned as `Err(PdfOcrError)` from the top-level entry points.
//!
//! * [`PageError`] is **non-fatal**: one page failed somewhere between render
//!   and persist. The page gets placeholder artifacts and the run continues;
//!   the error is kept in [`crate::output::PageOutcome`].
//!
//! * [`OcrError`] covers failures at the OCR engine boundary. Always folded into a
//!   [`PageError`] by the page pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-pdfocr library.
#[derive(Debug, Error)]
pub enum PdfOcrError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// The document cannot be opened at all.
    #[error("PDF '{path}' could not be opened: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Install libpdfium system-wide, or point PDFIUM_LIB_PATH (--pdfium-lib)\n\
at the library file or the directory containing it.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Output errors ─────────────────────────────────────────────────────
    /// The run directory (or one of its subdirectories) could not be created.
    #[error("Failed to create output directory '{path}': {source}")]
    OutputDirFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Run process errors ────────────────────────────────────────────────
    /// The isolated pipeline process could not be started.
    #[error("Failed to start pipeline process '{program}': {source}")]
    RunSpawnFailed {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The isolated pipeline process exited with a non-zero status.
    ///
    /// `tail` holds at most the last 50 lines of its combined output.
    #[error("OCR pipeline failed (exit={})\n---- tail ----\n{tail}", code.map_or_else(|| "signal".to_string(), |c| c.to_string()))]
    RunProcessFailed { code: Option<i32>, tail: String },

    /// The pipeline process exceeded the configured run timeout and was killed.
    #[error("OCR pipeline timed out after {secs}s and was killed")]
    RunTimedOut { secs: u64 },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single page.
///
/// The page pipeline writes placeholder artifacts for the page and moves on.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// The page image was never rendered, or the rendered file is unreadable.
    #[error("Page {page}: rasterisation failed: {detail}")]
    RenderFailed { page: usize, detail: String },

    /// Preprocessing could not produce an image.
    #[error("Page {page}: preprocessing failed: {detail}")]
    PreprocessFailed { page: usize, detail: String },

    /// The OCR engine failed.
    #[error("Page {page}: OCR failed: {detail}")]
    OcrFailed { page: usize, detail: String },

    /// The header re-OCR pass failed.
    #[error("Page {page}: header correction failed: {detail}")]
    HeaderFixFailed { page: usize, detail: String },

    /// The visualisation overlay could not be written.
    #[error("Page {page}: visualisation failed: {detail}")]
    VisualizeFailed { page: usize, detail: String },

    /// Text or JSON for the page could not be written.
    #[error("Page {page}: writing artifacts failed: {detail}")]
    PersistFailed { page: usize, detail: String },

    /// The page task panicked.
    #[error("Page {page}: processing panicked: {detail}")]
    Panicked { page: usize, detail: String },
}

impl PageError {
    /// 1-indexed page number the error belongs to.
    pub fn page(&self) -> usize {
        match self {
            PageError::RenderFailed { page, .. }
            | PageError::PreprocessFailed { page, .. }
            | PageError::OcrFailed { page, .. }
            | PageError::HeaderFixFailed { page, .. }
            | PageError::VisualizeFailed { page, .. }
            | PageError::PersistFailed { page, .. }
            | PageError::Panicked { page, .. } => *page,
        }
    }
}

/// Errors at the OCR engine boundary.
#[derive(Debug, Error)]
pub enum OcrError {
    /// The engine executable could not be started.
    #[error("failed to start OCR engine '{command}': {source}")]
    Spawn {
        command: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The engine ran but reported failure.
    #[error("OCR engine exited with status {code:?}: {stderr}")]
    EngineFailed { code: Option<i32>, stderr: String },

    /// The engine output could not be parsed into tokens.
    #[error("malformed OCR output at line {line}: {detail}")]
    Parse { line: usize, detail: String },

    /// Writing the temporary input image failed.
    #[error("failed to stage OCR input image: {0}")]
    Stage(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_process_failed_display_includes_code_and_tail() {
        let e = PdfOcrError::RunProcessFailed {
            code: Some(2),
            tail: "line a\nline b".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("exit=2"), "got: {msg}");
        assert!(msg.contains("line b"), "got: {msg}");
    }

    #[test]
    fn run_process_failed_display_without_code() {
        let e = PdfOcrError::RunProcessFailed {
            code: None,
            tail: String::new(),
        };
        assert!(e.to_string().contains("exit=signal"));
    }

    #[test]
    fn page_error_reports_its_page() {
        let e = PageError::OcrFailed {
            page: 7,
            detail: "boom".into(),
        };
        assert_eq!(e.page(), 7);
        assert!(e.to_string().starts_with("Page 7"));
    }

    #[test]
    fn page_error_serialises() {
        let e = PageError::RenderFailed {
            page: 1,
            detail: "bad xref".into(),
        };
        let json = serde_json::to_string(&e).unwrap();
        assert!(json.contains("RenderFailed"));
    }
}
