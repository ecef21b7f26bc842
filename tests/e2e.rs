//! End-to-end integration tests for edgequake-pdfocr.
//!
//! These tests use real scans in `./test_cases/` and need the pdfium library
//! plus a `tesseract` install with the `eng` language pack. They are gated
//! behind the `E2E_ENABLED` environment variable so they do not run in CI
//! unless explicitly requested.
//!
//! Run with:
//!   E2E_ENABLED=1 PDFIUM_LIB_PATH=. cargo test --test e2e -- --nocapture
//!
//! Expected fixtures:
//!   test_cases/two_page_scan.pdf   two pages, readable English text on each

use edgequake_pdfocr::{
    convert, inspect, run_document, PageStatus, PdfOcrError, PipelineConfig, PrepStrategy,
    RunOptions, RunStatus,
};
use std::path::PathBuf;

// ── Test helpers ─────────────────────────────────────────────────────────────

fn test_cases_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("test_cases")
}

fn pdfium_lib() -> Option<PathBuf> {
    std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from)
}

fn eng_config(out_root: &std::path::Path) -> PipelineConfig {
    let mut b = PipelineConfig::builder()
        .dpi(200)
        .prep(PrepStrategy::Adaptive)
        .langs("eng")
        .out_root(out_root);
    if let Some(lib) = pdfium_lib() {
        b = b.pdfium_lib_path(lib);
    }
    b.build().expect("valid e2e config")
}

/// Skip this test if E2E_ENABLED is not set *or* no PDF file at `path`.
macro_rules! e2e_skip_unless_ready {
    ($path:expr) => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP: set E2E_ENABLED=1 to run e2e tests");
            return;
        }
        let p: PathBuf = $path;
        if !p.exists() {
            println!("SKIP: test file not found: {}", p.display());
            return;
        }
        p
    }};
}

fn page_text(dir: &std::path::Path, page: usize) -> String {
    std::fs::read_to_string(dir.join(format!("page_{page:03}.txt"))).unwrap_or_default()
}

// ── Inspect ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_inspect_two_page_scan() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("two_page_scan.pdf"));

    let meta = inspect(&path, pdfium_lib().as_deref())
        .await
        .expect("inspect() should succeed");

    assert_eq!(meta.page_count, 2);
    assert!(!meta.pdf_version.is_empty());
    println!("Metadata: {:?}", meta);
}

#[tokio::test]
async fn test_inspect_nonexistent() {
    if std::env::var("E2E_ENABLED").is_err() {
        println!("SKIP: set E2E_ENABLED=1 to run e2e tests");
        return;
    }
    let err = inspect("/nonexistent/scan.pdf", pdfium_lib().as_deref())
        .await
        .unwrap_err();
    assert!(matches!(err, PdfOcrError::FileNotFound { .. }), "{err}");
}

// ── Pipeline (in-process) ────────────────────────────────────────────────────

#[tokio::test]
async fn test_convert_two_page_scan() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("two_page_scan.pdf"));
    let tmp = tempfile::tempdir().unwrap();
    let config = eng_config(tmp.path());

    let output = convert(&path, &config).await.expect("convert() should succeed");

    assert_eq!(output.stats.total_pages, 2);
    assert_eq!(output.stats.failed_pages, 0, "{:#?}", output.pages);
    let dir = &output.out_dir;
    for page in 1..=2 {
        assert!(dir.join(format!("pages/page_{page:03}.png")).is_file());
        assert!(dir.join(format!("ocr_txt/page_{page:03}.txt")).is_file());
        assert!(dir.join(format!("json/page_{page:03}.json")).is_file());
    }
    for outcome in &output.pages {
        assert!(matches!(outcome.status, PageStatus::Ok | PageStatus::Empty));
    }
    println!("Stats: {:?}", output.stats);
}

#[tokio::test]
async fn test_convert_max_pages_limits_work() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("two_page_scan.pdf"));
    let tmp = tempfile::tempdir().unwrap();
    let mut config = eng_config(tmp.path());
    config.max_pages = Some(1);

    let output = convert(&path, &config).await.expect("convert() should succeed");

    assert_eq!(output.stats.total_pages, 1);
    assert!(!output.out_dir.join("ocr_txt/page_002.txt").exists());
}

// ── Orchestrated run (child process) ─────────────────────────────────────────

#[cfg(feature = "cli")]
#[tokio::test]
async fn test_run_document_merges_pages_in_order() {
    use edgequake_pdfocr::WorkerCommand;

    let path = e2e_skip_unless_ready!(test_cases_dir().join("two_page_scan.pdf"));
    let tmp = tempfile::tempdir().unwrap();
    let config = eng_config(tmp.path());
    let options = RunOptions {
        out_root: tmp.path().to_path_buf(),
        worker: WorkerCommand::new(env!("CARGO_BIN_EXE_pdfocr")).arg("pipeline"),
        pdfium_lib_path: pdfium_lib(),
        ..RunOptions::default()
    };

    let result = run_document(&path, &config, &options)
        .await
        .expect("run_document() should succeed");

    assert!(result.id.starts_with("out_tesseract_two_page_scan_"), "{}", result.id);
    assert_eq!(result.status, RunStatus::Complete, "{:?}", result.artifacts);

    let expected = format!(
        "{}\n\n{}",
        page_text(&result.txt_dir, 1),
        page_text(&result.txt_dir, 2)
    );
    assert_eq!(std::fs::read_to_string(&result.merged_txt).unwrap(), expected);
    assert!(result.merged_json.is_file());
    assert!(result.merged_pdf.is_file());
    assert!(!result.pages_dir.exists());
    println!("Merged text:\n{}", result.read_merged_text());
}
