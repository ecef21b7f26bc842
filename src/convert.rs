//! The pipeline entry points: one document in, one populated run directory out.
//!
//! This is the isolated unit of work that `pdfocr pipeline` runs in a child
//! process. It announces its run directory on stdout (the `__OUTDIR__=`
//! sentinel) before touching any page, then renders and processes pages
//! one after another. A page failure never aborts the run; only problems
//! with the document as a whole (missing file, not a PDF, pdfium cannot
//! open it, output directory cannot be created) are returned as errors.

use crate::config::PipelineConfig;
use crate::error::{PageError, PdfOcrError};
use crate::layout::RunLayout;
use crate::output::{ConversionOutput, ConversionStats, DocumentMetadata, PageOutcome, PageStatus};
use crate::pipeline::input;
use crate::pipeline::ocr::{OcrEngine, OcrParams, TesseractCli};
use crate::pipeline::page::{failed_outcome, process_page, write_placeholder, PageContext};
use crate::pipeline::preprocess::Preprocessor;
use crate::pipeline::render::{self, RenderedPage};
use crate::pipeline::visualize::{load_font, Visualizer};
use crate::progress::PageProgressCallback;
use crate::sentinel;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Run the page pipeline over `pdf` with the Tesseract CLI described by
/// `config.tesseract`.
///
/// # Returns
/// `Ok(ConversionOutput)` once every page has been attempted, even if some
/// pages failed (check `output.stats.failed_pages`).
///
/// # Errors
/// Only document-level failures: the file is missing, unreadable or not a
/// PDF, pdfium cannot be bound or cannot open the document, or the run
/// directory cannot be created.
pub async fn convert(
    pdf: impl AsRef<Path>,
    config: &PipelineConfig,
) -> Result<ConversionOutput, PdfOcrError> {
    let engine: Arc<dyn OcrEngine> = Arc::new(TesseractCli::from(&config.tesseract));
    convert_with_engine(pdf, config, engine).await
}

/// Same as [`convert`] with a caller-supplied OCR engine.
pub async fn convert_with_engine(
    pdf: impl AsRef<Path>,
    config: &PipelineConfig,
    engine: Arc<dyn OcrEngine>,
) -> Result<ConversionOutput, PdfOcrError> {
    let total_start = Instant::now();
    let pdf_path = input::resolve_local(pdf.as_ref())?;

    let layout = RunLayout::create(
        &config.out_root,
        config.out_name.as_deref(),
        config.tag.as_deref(),
    )?;
    sentinel::emit(&layout.root)
        .map_err(|e| PdfOcrError::Internal(format!("Cannot write run sentinel: {}", e)))?;

    info!("PDF     : {}", pdf_path.display());
    info!(
        "LANGS   : {}, PSM={}, OEM={:?}",
        config.langs, config.psm, config.oem
    );
    info!(
        "PREP    : {}, DESKEW={}, TABLE_CLEAN={}, HEADER_FIX={}",
        config.prep, config.deskew, config.table_clean, config.header_fix
    );

    // ── Rasterise ────────────────────────────────────────────────────────
    let render_start = Instant::now();
    let rendered = render::render_pages(
        &pdf_path,
        &layout,
        config.dpi,
        config.max_pages,
        config.pdfium_lib_path.as_deref(),
    )
    .await?;
    let render_duration_ms = render_start.elapsed().as_millis() as u64;
    info!("Rendered {} pages in {}ms", rendered.len(), render_duration_ms);

    // ── Page pipeline ────────────────────────────────────────────────────
    let visualizer = Visualizer::new(
        config.min_conf,
        config.vis_scale,
        load_font(config.font_path.as_deref()),
    );
    if !visualizer.has_font() {
        warn!("No usable font found, overlay labels are skipped");
    }
    let ctx = Arc::new(PageContext {
        layout: layout.clone(),
        preprocessor: Preprocessor::new(config.prep, config.deskew, config.table_clean),
        params: OcrParams::from_config(config),
        engine,
        header_ratio: config.header_fix.then_some(config.header_ratio),
        visualizer,
    });

    let ocr_start = Instant::now();
    let pages = run_pages(ctx, rendered, config.progress_callback.as_deref()).await;
    let ocr_duration_ms = ocr_start.elapsed().as_millis() as u64;

    let count = |s: PageStatus| pages.iter().filter(|p| p.status == s).count();
    let stats = ConversionStats {
        total_pages: pages.len(),
        ok_pages: count(PageStatus::Ok),
        empty_pages: count(PageStatus::Empty),
        failed_pages: count(PageStatus::Error),
        render_duration_ms,
        ocr_duration_ms,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };
    info!(
        "Done: {} pages ({} ok, {} empty, {} failed) in {}ms → {}",
        stats.total_pages,
        stats.ok_pages,
        stats.empty_pages,
        stats.failed_pages,
        stats.total_duration_ms,
        layout.root.display()
    );

    Ok(ConversionOutput {
        out_dir: layout.root,
        pages,
        stats,
    })
}

/// Process rendered pages in order, each on a blocking worker thread.
///
/// A panic inside one page becomes [`PageError::Panicked`] for that page.
pub(crate) async fn run_pages(
    ctx: Arc<PageContext>,
    rendered: Vec<RenderedPage>,
    callback: Option<&dyn PageProgressCallback>,
) -> Vec<PageOutcome> {
    let total = rendered.len();
    if let Some(cb) = callback {
        cb.on_run_start(total);
    }

    let mut outcomes = Vec::with_capacity(total);
    for RenderedPage { page_num, image } in rendered {
        if let Some(cb) = callback {
            cb.on_page_start(page_num, total);
        }
        let started = Instant::now();
        let task_ctx = Arc::clone(&ctx);
        let outcome = match tokio::task::spawn_blocking(move || {
            process_page(&task_ctx, page_num, image)
        })
        .await
        {
            Ok(outcome) => outcome,
            Err(join_err) => {
                let err = PageError::Panicked {
                    page: page_num,
                    detail: join_err.to_string(),
                };
                warn!("{}", err);
                write_placeholder(&ctx.layout, page_num, &err);
                failed_outcome(page_num, err, started.elapsed().as_millis() as u64)
            }
        };

        if let Some(cb) = callback {
            match &outcome.error {
                None => cb.on_page_complete(page_num, total, outcome.text_len),
                Some(e) => cb.on_page_error(page_num, total, &e.to_string()),
            }
        }
        outcomes.push(outcome);
    }

    if let Some(cb) = callback {
        let succeeded = outcomes.iter().filter(|o| o.error.is_none()).count();
        cb.on_run_complete(total, succeeded);
    }
    outcomes
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    pdf: impl AsRef<Path>,
    config: &PipelineConfig,
) -> Result<ConversionOutput, PdfOcrError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| PdfOcrError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert(pdf, config))
}

/// Read PDF metadata without running OCR.
pub async fn inspect(
    pdf: impl AsRef<Path>,
    pdfium_lib_path: Option<&Path>,
) -> Result<DocumentMetadata, PdfOcrError> {
    let pdf_path = input::resolve_local(pdf.as_ref())?;
    render::extract_metadata(&pdf_path, pdfium_lib_path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PrepStrategy;
    use crate::error::OcrError;
    use crate::output::OcrToken;
    use crate::pipeline::ocr::tests::{tok, ScriptedEngine};
    use image::{GrayImage, Rgb, RgbImage};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl PageProgressCallback for Recorder {
        fn on_run_start(&self, total: usize) {
            self.events.lock().unwrap().push(format!("start {total}"));
        }
        fn on_page_start(&self, page: usize, _total: usize) {
            self.events.lock().unwrap().push(format!("page {page}"));
        }
        fn on_page_complete(&self, page: usize, _total: usize, _len: usize) {
            self.events.lock().unwrap().push(format!("ok {page}"));
        }
        fn on_page_error(&self, page: usize, _total: usize, _err: &str) {
            self.events.lock().unwrap().push(format!("err {page}"));
        }
        fn on_run_complete(&self, total: usize, ok: usize) {
            self.events.lock().unwrap().push(format!("done {ok}/{total}"));
        }
    }

    fn context(root: &Path, engine: Arc<dyn OcrEngine>) -> Arc<PageContext> {
        Arc::new(PageContext {
            layout: RunLayout::create(root, Some("run"), None).unwrap(),
            preprocessor: Preprocessor::new(PrepStrategy::None, false, false),
            params: OcrParams::from_config(&PipelineConfig::default()),
            engine,
            header_ratio: None,
            visualizer: Visualizer::new(50, 1.0, None),
        })
    }

    fn rendered(ctx: &PageContext, page_num: usize) -> RenderedPage {
        let path = ctx.layout.page_image(page_num);
        RgbImage::from_pixel(40, 40, Rgb([255, 255, 255]))
            .save(&path)
            .unwrap();
        RenderedPage {
            page_num,
            image: Ok(path),
        }
    }

    #[tokio::test]
    async fn one_bad_page_does_not_stop_the_rest() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path(), Arc::new(ScriptedEngine::new(vec![tok("text", 0, (1, 1, 1))])));
        let pages = vec![
            rendered(&ctx, 1),
            RenderedPage {
                page_num: 2,
                image: Err(PageError::RenderFailed {
                    page: 2,
                    detail: "broken content stream".into(),
                }),
            },
            rendered(&ctx, 3),
        ];
        let recorder = Recorder::default();

        let outcomes = run_pages(ctx.clone(), pages, Some(&recorder as &dyn PageProgressCallback)).await;

        let statuses: Vec<PageStatus> = outcomes.iter().map(|o| o.status).collect();
        assert_eq!(statuses, vec![PageStatus::Ok, PageStatus::Error, PageStatus::Ok]);
        for n in 1..=3 {
            assert!(ctx.layout.page_text(n).is_file(), "page {n} text missing");
            assert!(ctx.layout.page_json(n).is_file(), "page {n} json missing");
        }
        assert_eq!(
            *recorder.events.lock().unwrap(),
            vec!["start 3", "page 1", "ok 1", "page 2", "err 2", "page 3", "ok 3", "done 2/3"]
        );
    }

    struct PanickingEngine;

    impl OcrEngine for PanickingEngine {
        fn recognize(&self, _: &GrayImage, _: &OcrParams) -> Result<Vec<OcrToken>, OcrError> {
            panic!("engine blew up");
        }
    }

    #[tokio::test]
    async fn panicking_page_gets_placeholders() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path(), Arc::new(PanickingEngine));
        let pages = vec![rendered(&ctx, 1)];

        let outcomes = run_pages(ctx.clone(), pages, None).await;

        assert!(matches!(outcomes[0].error, Some(PageError::Panicked { page: 1, .. })));
        assert_eq!(std::fs::read_to_string(ctx.layout.page_text(1)).unwrap(), "");
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(ctx.layout.page_json(1)).unwrap()).unwrap();
        assert_eq!(json["status"], "error");
    }

    #[tokio::test]
    async fn missing_input_fails_before_creating_a_run() {
        let tmp = tempfile::tempdir().unwrap();
        let config = PipelineConfig::builder()
            .out_root(tmp.path())
            .build()
            .unwrap();
        let err = convert(tmp.path().join("missing.pdf"), &config).await.unwrap_err();
        assert!(matches!(err, PdfOcrError::FileNotFound { .. }));
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }
}
