//! One page through the pipeline, with fault containment.
//!
//! ```text
//! Rendered ─▶ Preprocessed ─▶ Extracted ─▶ (HeaderFixed) ─▶ Persisted
//!     └──────────────┴──────────────┴───────────┴───────────────▶ Failed
//! ```
//!
//! A failure at any step leaves placeholder artifacts for the page (an
//! empty text file and `{"page", "status": "error", "error"}` JSON) and
//! never propagates. The overlay is drawn after persisting; if it cannot be
//! written the page keeps its status and the problem is recorded as a
//! warning.

use crate::error::PageError;
use crate::layout::RunLayout;
use crate::output::{OcrToken, PageJson, PageOutcome, PagePlaceholder, PageStatus};
use crate::pipeline::header::correct_header;
use crate::pipeline::ocr::{extract, OcrEngine, OcrPage, OcrParams};
use crate::pipeline::preprocess::Preprocessor;
use crate::pipeline::visualize::Visualizer;
use image::DynamicImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Everything a page needs, shared by all pages of a run.
pub struct PageContext {
    pub layout: RunLayout,
    pub preprocessor: Preprocessor,
    pub params: OcrParams,
    pub engine: Arc<dyn OcrEngine>,
    /// Header band ratio when header correction is on.
    pub header_ratio: Option<f32>,
    pub visualizer: Visualizer,
}

/// A page that made it to `Extracted` (or `HeaderFixed`).
struct Recognized {
    original: DynamicImage,
    tokens: Vec<OcrToken>,
    ocr: OcrPage,
}

/// Run `page_num` through every stage. Always returns an outcome.
pub fn process_page(
    ctx: &PageContext,
    page_num: usize,
    image: Result<PathBuf, PageError>,
) -> PageOutcome {
    let started = Instant::now();

    let result = image
        .and_then(|path| recognize(ctx, page_num, &path))
        .and_then(|rec| persist(ctx, page_num, &rec).map(|status| (rec, status)));

    match result {
        Ok((rec, status)) => {
            let mut warnings = Vec::new();
            let vis_path = ctx.layout.page_vis(page_num);
            if let Err(e) = ctx.visualizer.save(&rec.original, &rec.tokens, &vis_path) {
                warn!("Page {}: overlay not written: {}", page_num, e);
                warnings.push(PageError::VisualizeFailed {
                    page: page_num,
                    detail: e.to_string(),
                });
            }
            debug!(
                page = page_num,
                lines = rec.ocr.lines.len(),
                status = ?status,
                "Page done"
            );
            PageOutcome {
                page_num,
                status,
                num_lines: rec.ocr.lines.len(),
                text_len: rec.ocr.text.len(),
                error: None,
                warnings,
                duration_ms: started.elapsed().as_millis() as u64,
            }
        }
        Err(err) => {
            warn!("{}", err);
            write_placeholder(&ctx.layout, page_num, &err);
            failed_outcome(page_num, err, started.elapsed().as_millis() as u64)
        }
    }
}

/// Outcome for a page that never produced text.
pub fn failed_outcome(page_num: usize, err: PageError, duration_ms: u64) -> PageOutcome {
    PageOutcome {
        page_num,
        status: PageStatus::Error,
        num_lines: 0,
        text_len: 0,
        error: Some(err),
        warnings: Vec::new(),
        duration_ms,
    }
}

fn recognize(ctx: &PageContext, page_num: usize, path: &Path) -> Result<Recognized, PageError> {
    let original = image::open(path).map_err(|e| PageError::RenderFailed {
        page: page_num,
        detail: format!("{}: {}", path.display(), e),
    })?;

    if original.width() == 0 || original.height() == 0 {
        return Err(PageError::PreprocessFailed {
            page: page_num,
            detail: "page image has no pixels".to_string(),
        });
    }
    let prepared = ctx.preprocessor.apply(&original);

    let (tokens, mut ocr) =
        extract(ctx.engine.as_ref(), &prepared, &ctx.params).map_err(|e| PageError::OcrFailed {
            page: page_num,
            detail: e.to_string(),
        })?;

    if let Some(ratio) = ctx.header_ratio {
        ocr.text = correct_header(ctx.engine.as_ref(), &original, &ocr.text, ratio).map_err(
            |e| PageError::HeaderFixFailed {
                page: page_num,
                detail: e.to_string(),
            },
        )?;
    }

    Ok(Recognized {
        original,
        tokens,
        ocr,
    })
}

fn persist(ctx: &PageContext, page_num: usize, rec: &Recognized) -> Result<PageStatus, PageError> {
    let status = if rec.ocr.is_empty() {
        PageStatus::Empty
    } else {
        PageStatus::Ok
    };
    let json = PageJson {
        page: page_num,
        status,
        num_lines: rec.ocr.lines.len(),
        lines: rec.ocr.lines.clone(),
    };
    let persist_err = |detail: String| PageError::PersistFailed {
        page: page_num,
        detail,
    };

    std::fs::write(ctx.layout.page_text(page_num), &rec.ocr.text)
        .map_err(|e| persist_err(e.to_string()))?;
    let body = serde_json::to_string_pretty(&json).map_err(|e| persist_err(e.to_string()))?;
    std::fs::write(ctx.layout.page_json(page_num), body).map_err(|e| persist_err(e.to_string()))?;
    Ok(status)
}

/// Best effort: an empty text file and an error JSON for `page_num`.
pub fn write_placeholder(layout: &RunLayout, page_num: usize, err: &PageError) {
    if let Err(e) = std::fs::write(layout.page_text(page_num), "") {
        warn!("Page {}: placeholder text not written: {}", page_num, e);
    }
    let body = match serde_json::to_string_pretty(&PagePlaceholder::new(page_num, err)) {
        Ok(b) => b,
        Err(e) => {
            warn!("Page {}: placeholder JSON not encoded: {}", page_num, e);
            return;
        }
    };
    if let Err(e) = std::fs::write(layout.page_json(page_num), body) {
        warn!("Page {}: placeholder JSON not written: {}", page_num, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PipelineConfig, PrepStrategy};
    use crate::error::OcrError;
    use crate::pipeline::ocr::tests::{tok, ScriptedEngine};
    use image::{GrayImage, Rgb, RgbImage};
    use std::sync::Mutex;

    fn context(root: &Path, engine: Arc<dyn OcrEngine>, header_ratio: Option<f32>) -> PageContext {
        let layout = RunLayout::create(root, Some("run"), None).unwrap();
        PageContext {
            layout,
            preprocessor: Preprocessor::new(PrepStrategy::None, false, false),
            params: OcrParams::from_config(&PipelineConfig::default()),
            engine,
            header_ratio,
            visualizer: Visualizer::new(50, 1.0, None),
        }
    }

    fn page_png(ctx: &PageContext, page: usize) -> PathBuf {
        let path = ctx.layout.page_image(page);
        RgbImage::from_pixel(120, 200, Rgb([255, 255, 255]))
            .save(&path)
            .unwrap();
        path
    }

    fn read_json(path: PathBuf) -> serde_json::Value {
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    #[test]
    fn recognised_page_persists_text_json_and_overlay() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = Arc::new(ScriptedEngine::new(vec![
            tok("세계", 60, (1, 1, 1)),
            tok("안녕", 10, (1, 1, 1)),
            tok("둘째", 10, (1, 1, 2)),
        ]));
        let ctx = context(tmp.path(), engine, None);
        let img = page_png(&ctx, 1);

        let outcome = process_page(&ctx, 1, Ok(img));

        assert_eq!(outcome.status, PageStatus::Ok);
        assert_eq!(outcome.num_lines, 2);
        assert!(outcome.warnings.is_empty());
        let text = std::fs::read_to_string(ctx.layout.page_text(1)).unwrap();
        assert_eq!(text, "안녕세계\n둘째");
        let json = read_json(ctx.layout.page_json(1));
        assert_eq!(json["status"], "ok");
        assert_eq!(json["num_lines"], 2);
        assert_eq!(json["lines"][0]["tokens"][0]["box"], serde_json::json!([10, 10, 20, 12]));
        assert!(ctx.layout.page_vis(1).is_file());
    }

    #[test]
    fn page_without_tokens_is_empty_not_failed() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path(), Arc::new(ScriptedEngine::new(vec![tok("  ", 0, (1, 1, 1))])), None);
        let img = page_png(&ctx, 2);

        let outcome = process_page(&ctx, 2, Ok(img));

        assert_eq!(outcome.status, PageStatus::Empty);
        assert_eq!(std::fs::read_to_string(ctx.layout.page_text(2)).unwrap(), "");
        assert_eq!(read_json(ctx.layout.page_json(2))["status"], "empty");
    }

    #[test]
    fn render_failure_writes_placeholders() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path(), Arc::new(ScriptedEngine::new(vec![])), None);
        let err = PageError::RenderFailed {
            page: 3,
            detail: "bad stream".into(),
        };

        let outcome = process_page(&ctx, 3, Err(err));

        assert_eq!(outcome.status, PageStatus::Error);
        assert!(matches!(outcome.error, Some(PageError::RenderFailed { page: 3, .. })));
        assert_eq!(std::fs::read_to_string(ctx.layout.page_text(3)).unwrap(), "");
        let json = read_json(ctx.layout.page_json(3));
        assert_eq!(json["status"], "error");
        assert!(json["error"].as_str().unwrap().contains("bad stream"));
    }

    #[test]
    fn unreadable_image_is_a_render_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path(), Arc::new(ScriptedEngine::new(vec![])), None);
        let bogus = ctx.layout.page_image(1);
        std::fs::write(&bogus, b"not a png").unwrap();

        let outcome = process_page(&ctx, 1, Ok(bogus));

        assert!(matches!(outcome.error, Some(PageError::RenderFailed { .. })));
        assert!(ctx.layout.page_json(1).is_file());
    }

    struct FailingEngine;

    impl OcrEngine for FailingEngine {
        fn recognize(&self, _: &GrayImage, _: &OcrParams) -> Result<Vec<OcrToken>, OcrError> {
            Err(OcrError::EngineFailed {
                code: Some(1),
                stderr: "Failed loading language 'kor'".into(),
            })
        }
    }

    #[test]
    fn engine_failure_is_contained_to_the_page() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path(), Arc::new(FailingEngine), None);
        let img = page_png(&ctx, 1);

        let outcome = process_page(&ctx, 1, Ok(img));

        assert!(matches!(outcome.error, Some(PageError::OcrFailed { page: 1, .. })));
        let json = read_json(ctx.layout.page_json(1));
        assert!(json["error"].as_str().unwrap().contains("kor"));
    }

    /// Succeeds on the full page, fails on the header band.
    struct HeaderFailingEngine {
        calls: Mutex<usize>,
    }

    impl OcrEngine for HeaderFailingEngine {
        fn recognize(&self, _: &GrayImage, _: &OcrParams) -> Result<Vec<OcrToken>, OcrError> {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            if *calls == 1 {
                Ok(vec![tok("body", 0, (1, 1, 1))])
            } else {
                Err(OcrError::Stage("disk full".into()))
            }
        }
    }

    #[test]
    fn header_failure_fails_the_page() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = Arc::new(HeaderFailingEngine {
            calls: Mutex::new(0),
        });
        let ctx = context(tmp.path(), engine, Some(0.12));
        let img = page_png(&ctx, 1);

        let outcome = process_page(&ctx, 1, Ok(img));

        assert!(matches!(outcome.error, Some(PageError::HeaderFixFailed { .. })));
        assert_eq!(std::fs::read_to_string(ctx.layout.page_text(1)).unwrap(), "");
    }

    #[test]
    fn header_fix_rewrites_text_but_not_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = Arc::new(ScriptedEngine::new(vec![tok("[3].", 0, (1, 1, 1))]));
        let ctx = context(tmp.path(), engine.clone(), Some(0.12));
        let img = page_png(&ctx, 1);

        let outcome = process_page(&ctx, 1, Ok(img));

        assert_eq!(outcome.status, PageStatus::Ok);
        // same scripted tokens for the header pass: "[3]." replaced by "[3]."
        assert_eq!(std::fs::read_to_string(ctx.layout.page_text(1)).unwrap(), "[3].");
        let calls = engine.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].psm, 7);
    }

    #[test]
    fn overlay_failure_is_only_a_warning() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(tmp.path(), Arc::new(ScriptedEngine::new(vec![tok("x", 0, (1, 1, 1))])), None);
        let img = page_png(&ctx, 1);
        std::fs::remove_dir_all(&ctx.layout.vis_dir).unwrap();

        let outcome = process_page(&ctx, 1, Ok(img));

        assert_eq!(outcome.status, PageStatus::Ok);
        assert!(matches!(outcome.warnings.as_slice(), [PageError::VisualizeFailed { page: 1, .. }]));
        assert_eq!(std::fs::read_to_string(ctx.layout.page_text(1)).unwrap(), "x");
    }
}
