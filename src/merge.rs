//! Run-level merge and cleanup.
//!
//! Runs once, after the worker has exited successfully. Each artifact is
//! attempted independently and its outcome recorded; nothing here returns
//! an error.
//!
//! | artifact            | rule                                                       |
//! |---------------------|------------------------------------------------------------|
//! | `ocr_txt/merged.txt`| page texts in file-name order, joined by a blank line       |
//! | `json/merged.json`  | list roots extend the array, object roots are appended     |
//! | `merged.pdf`        | `pages_pdf/*.pdf` merged in order, else a copy of the source |
//! | `meta.json`         | `{"sourcePdf": <path>}`                                    |

use crate::layout::{RunLayout, MERGED_JSON, MERGED_TXT};
use crate::output::{ArtifactOutcome, MergeReport, PageSummary};
use crate::pipeline::render::bind_pdfium;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Inputs to [`merge_run`].
#[derive(Debug, Clone)]
pub struct MergeRequest<'a> {
    pub layout: &'a RunLayout,
    pub source_pdf: &'a Path,
    /// Keep `pages/`, `pages_pdf/` and `vis/` after merging.
    pub keep_extra: bool,
    pub pdfium_lib_path: Option<&'a Path>,
}

/// Write every merged artifact, then prune intermediates.
pub fn merge_run(req: &MergeRequest<'_>) -> MergeReport {
    let layout = req.layout;
    let report = MergeReport {
        meta: record(write_meta(layout, req.source_pdf), "meta.json"),
        text: record(merge_text(layout), "merged.txt"),
        json: record(merge_json(layout), "merged.json"),
        pdf: merge_pdf(layout, req.source_pdf, req.pdfium_lib_path),
        cleanup: if req.keep_extra {
            ArtifactOutcome::Skipped
        } else {
            cleanup(layout)
        },
    };
    info!(
        "Merged {}: text={:?} json={:?} pdf={:?}",
        layout.id(),
        report.text,
        report.json,
        report.pdf
    );
    report
}

fn record(result: Result<(), String>, what: &str) -> ArtifactOutcome {
    match result {
        Ok(()) => ArtifactOutcome::Written,
        Err(reason) => {
            warn!("{} not written: {}", what, reason);
            ArtifactOutcome::Failed { reason }
        }
    }
}

/// Files in `dir` with extension `ext`, sorted by file name, skipping `exclude`.
fn sorted_files(dir: &Path, ext: &str, exclude: Option<&str>) -> Result<Vec<PathBuf>, String> {
    let entries = std::fs::read_dir(dir).map_err(|e| format!("{}: {}", dir.display(), e))?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .filter(|p| p.extension().is_some_and(|x| x == ext))
        .filter(|p| exclude.map_or(true, |name| p.file_name().is_some_and(|f| f != name)))
        .collect();
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Status of every page the worker wrote, read from `json/page_NNN.json`.
///
/// Files that cannot be read or do not carry a page status are skipped.
pub fn page_summaries(layout: &RunLayout) -> Vec<PageSummary> {
    let files = match sorted_files(&layout.json_dir, "json", Some(MERGED_JSON)) {
        Ok(files) => files,
        Err(e) => {
            warn!("Cannot list page JSON: {}", e);
            return Vec::new();
        }
    };
    let mut pages: Vec<PageSummary> = files
        .iter()
        .filter_map(|f| {
            let raw = std::fs::read_to_string(f).ok()?;
            match serde_json::from_str::<PageSummary>(&raw) {
                Ok(summary) => Some(summary),
                Err(e) => {
                    debug!("No page status in {}: {}", f.display(), e);
                    None
                }
            }
        })
        .collect();
    pages.sort_by_key(|p| p.page);
    pages
}

fn write_meta(layout: &RunLayout, source_pdf: &Path) -> Result<(), String> {
    let meta = serde_json::json!({ "sourcePdf": source_pdf.display().to_string() });
    let body = serde_json::to_string_pretty(&meta).map_err(|e| e.to_string())?;
    std::fs::write(layout.meta(), body).map_err(|e| e.to_string())
}

/// Concatenate per-page texts in file-name order with `"\n\n"` between them.
pub fn merge_text(layout: &RunLayout) -> Result<(), String> {
    let files = sorted_files(&layout.txt_dir, "txt", Some(MERGED_TXT))?;
    let mut parts = Vec::with_capacity(files.len());
    for f in &files {
        parts.push(std::fs::read_to_string(f).map_err(|e| format!("{}: {}", f.display(), e))?);
    }
    debug!("Merging {} text files", files.len());
    std::fs::write(layout.merged_txt(), parts.join("\n\n")).map_err(|e| e.to_string())
}

/// Flatten per-page JSON documents into one array. Malformed files are skipped.
pub fn merge_json(layout: &RunLayout) -> Result<(), String> {
    let files = sorted_files(&layout.json_dir, "json", Some(MERGED_JSON))?;
    let mut merged: Vec<Value> = Vec::new();
    for f in &files {
        let parsed = std::fs::read_to_string(f)
            .map_err(|e| e.to_string())
            .and_then(|raw| serde_json::from_str::<Value>(&raw).map_err(|e| e.to_string()));
        match parsed {
            Ok(Value::Array(items)) => merged.extend(items),
            Ok(other) => merged.push(other),
            Err(e) => debug!("Skipping {}: {}", f.display(), e),
        }
    }
    let body = serde_json::to_string_pretty(&Value::Array(merged)).map_err(|e| e.to_string())?;
    std::fs::write(layout.merged_json(), body).map_err(|e| e.to_string())
}

/// Merge `pages_pdf/*.pdf`, or copy the source PDF when there are none.
///
/// If pdfium fails the source is copied instead ([`ArtifactOutcome::FellBack`]);
/// if that copy fails too the artifact is [`ArtifactOutcome::Failed`].
pub fn merge_pdf(layout: &RunLayout, source_pdf: &Path, lib_path: Option<&Path>) -> ArtifactOutcome {
    let dest = layout.merged_pdf();
    let parts = if layout.pages_pdf_dir.is_dir() {
        sorted_files(&layout.pages_pdf_dir, "pdf", None).unwrap_or_default()
    } else {
        Vec::new()
    };

    if parts.is_empty() {
        return match std::fs::copy(source_pdf, &dest) {
            Ok(_) => ArtifactOutcome::Written,
            Err(e) => record(Err(format!("copying source PDF: {}", e)), "merged.pdf"),
        };
    }

    match merge_with_pdfium(&parts, &dest, lib_path) {
        Ok(()) => ArtifactOutcome::Written,
        Err(merge_err) => {
            warn!("PDF merge failed, copying source instead: {}", merge_err);
            match std::fs::copy(source_pdf, &dest) {
                Ok(_) => ArtifactOutcome::FellBack { reason: merge_err },
                Err(copy_err) => {
                    warn!("Fallback copy of source PDF failed: {}", copy_err);
                    ArtifactOutcome::Failed {
                        reason: format!("{}; fallback copy: {}", merge_err, copy_err),
                    }
                }
            }
        }
    }
}

fn merge_with_pdfium(parts: &[PathBuf], dest: &Path, lib_path: Option<&Path>) -> Result<(), String> {
    let pdfium = bind_pdfium(lib_path).map_err(|e| e.to_string())?;
    let mut merged = pdfium.create_new_pdf().map_err(|e| format!("{:?}", e))?;
    for part in parts {
        let doc = pdfium
            .load_pdf_from_file(part, None)
            .map_err(|e| format!("{}: {:?}", part.display(), e))?;
        merged
            .pages_mut()
            .append(&doc)
            .map_err(|e| format!("{}: {:?}", part.display(), e))?;
    }
    merged.save_to_file(dest).map_err(|e| format!("{:?}", e))
}

/// Remove `pages/`, `pages_pdf/` and `vis/`. Per-page text and JSON stay.
pub fn cleanup(layout: &RunLayout) -> ArtifactOutcome {
    let mut problems = Vec::new();
    for dir in [&layout.pages_dir, &layout.pages_pdf_dir, &layout.vis_dir] {
        if !dir.exists() {
            continue;
        }
        if let Err(e) = std::fs::remove_dir_all(dir) {
            warn!("Cleanup of {} failed: {}", dir.display(), e);
            problems.push(format!("{}: {}", dir.display(), e));
        }
    }
    if problems.is_empty() {
        ArtifactOutcome::Written
    } else {
        ArtifactOutcome::Failed {
            reason: problems.join("; "),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::PageStatus;

    fn run_dir(root: &Path) -> RunLayout {
        let layout = RunLayout::create(root, Some("run"), None).unwrap();
        std::fs::create_dir_all(&layout.pages_pdf_dir).unwrap();
        layout
    }

    fn source(root: &Path) -> PathBuf {
        let p = root.join("source.pdf");
        std::fs::write(&p, b"%PDF-1.4\n%fake\n").unwrap();
        p
    }

    #[test]
    fn text_merge_sorts_by_file_name_and_skips_previous_merge() {
        let tmp = tempfile::tempdir().unwrap();
        let l = run_dir(tmp.path());
        std::fs::write(l.page_text(2), "second").unwrap();
        std::fs::write(l.page_text(1), "first").unwrap();
        std::fs::write(l.page_text(10), "tenth").unwrap();
        std::fs::write(l.merged_txt(), "stale").unwrap();

        merge_text(&l).unwrap();

        assert_eq!(
            std::fs::read_to_string(l.merged_txt()).unwrap(),
            "first\n\nsecond\n\ntenth"
        );
    }

    #[test]
    fn empty_pages_still_contribute_a_separator() {
        let tmp = tempfile::tempdir().unwrap();
        let l = run_dir(tmp.path());
        std::fs::write(l.page_text(1), "a").unwrap();
        std::fs::write(l.page_text(2), "").unwrap();
        std::fs::write(l.page_text(3), "c").unwrap();

        merge_text(&l).unwrap();

        assert_eq!(std::fs::read_to_string(l.merged_txt()).unwrap(), "a\n\n\n\nc");
    }

    #[test]
    fn json_merge_extends_lists_appends_objects_skips_garbage() {
        let tmp = tempfile::tempdir().unwrap();
        let l = run_dir(tmp.path());
        std::fs::write(l.page_json(1), r#"{"page": 1}"#).unwrap();
        std::fs::write(l.page_json(2), r#"[{"page": 2}, {"page": 3}]"#).unwrap();
        std::fs::write(l.page_json(3), "{not json").unwrap();
        std::fs::write(l.page_json(4), r#"{"page": 4, "error": "boom"}"#).unwrap();

        merge_json(&l).unwrap();

        let merged: Value =
            serde_json::from_str(&std::fs::read_to_string(l.merged_json()).unwrap()).unwrap();
        let pages: Vec<i64> = merged
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v["page"].as_i64().unwrap())
            .collect();
        assert_eq!(pages, vec![1, 2, 3, 4]);
    }

    #[test]
    fn page_summaries_collect_statuses_in_page_order() {
        let tmp = tempfile::tempdir().unwrap();
        let l = run_dir(tmp.path());
        std::fs::write(
            l.page_json(2),
            r#"{"page": 2, "status": "error", "error": "Page 2: OCR failed: exit 1"}"#,
        )
        .unwrap();
        std::fs::write(
            l.page_json(1),
            r#"{"page": 1, "status": "ok", "num_lines": 0, "lines": []}"#,
        )
        .unwrap();
        std::fs::write(l.page_json(3), "{truncated").unwrap();
        std::fs::write(l.merged_json(), r#"[{"page": 9, "status": "ok"}]"#).unwrap();

        let pages = page_summaries(&l);

        assert_eq!(pages.len(), 2);
        assert_eq!((pages[0].page, pages[0].status), (1, PageStatus::Ok));
        assert_eq!(pages[1].status, PageStatus::Error);
        assert_eq!(pages[1].error.as_deref(), Some("Page 2: OCR failed: exit 1"));
    }

    #[test]
    fn pdf_without_page_pdfs_is_a_copy_of_the_source() {
        let tmp = tempfile::tempdir().unwrap();
        let l = run_dir(tmp.path());
        let src = source(tmp.path());

        let outcome = merge_pdf(&l, &src, None);

        assert_eq!(outcome, ArtifactOutcome::Written);
        assert_eq!(std::fs::read(l.merged_pdf()).unwrap(), std::fs::read(&src).unwrap());
    }

    #[test]
    fn missing_source_pdf_is_a_failed_artifact() {
        let tmp = tempfile::tempdir().unwrap();
        let l = run_dir(tmp.path());
        let outcome = merge_pdf(&l, &tmp.path().join("gone.pdf"), None);
        assert!(matches!(outcome, ArtifactOutcome::Failed { .. }));
    }

    #[test]
    fn unmergeable_page_pdfs_fall_back_to_source_copy() {
        let tmp = tempfile::tempdir().unwrap();
        let l = run_dir(tmp.path());
        let src = source(tmp.path());
        std::fs::write(l.pages_pdf_dir.join("page_001.pdf"), b"garbage").unwrap();

        // Either pdfium is missing or it rejects the file; both take the fallback.
        let outcome = merge_pdf(&l, &src, Some(Path::new("/nonexistent/libpdfium.so")));

        assert!(matches!(outcome, ArtifactOutcome::FellBack { .. }), "{outcome:?}");
        assert_eq!(std::fs::read(l.merged_pdf()).unwrap(), std::fs::read(&src).unwrap());
    }

    #[test]
    fn cleanup_keeps_text_and_json() {
        let tmp = tempfile::tempdir().unwrap();
        let l = run_dir(tmp.path());
        std::fs::write(l.page_image(1), b"png").unwrap();
        std::fs::write(l.page_text(1), "x").unwrap();
        std::fs::write(l.page_json(1), "{}").unwrap();

        assert_eq!(cleanup(&l), ArtifactOutcome::Written);

        assert!(!l.pages_dir.exists());
        assert!(!l.pages_pdf_dir.exists());
        assert!(!l.vis_dir.exists());
        assert!(l.page_text(1).is_file());
        assert!(l.page_json(1).is_file());
    }

    #[test]
    fn merge_run_writes_everything_and_honours_keep_extra() {
        let tmp = tempfile::tempdir().unwrap();
        let l = run_dir(tmp.path());
        let src = source(tmp.path());
        std::fs::write(l.page_text(1), "hello").unwrap();
        std::fs::write(l.page_json(1), r#"{"page": 1}"#).unwrap();

        let report = merge_run(&MergeRequest {
            layout: &l,
            source_pdf: &src,
            keep_extra: true,
            pdfium_lib_path: None,
        });

        assert_eq!(report.text, ArtifactOutcome::Written);
        assert_eq!(report.json, ArtifactOutcome::Written);
        assert_eq!(report.pdf, ArtifactOutcome::Written);
        assert_eq!(report.cleanup, ArtifactOutcome::Skipped);
        assert!(l.pages_dir.is_dir());
        let meta: Value = serde_json::from_str(&std::fs::read_to_string(l.meta()).unwrap()).unwrap();
        assert_eq!(meta["sourcePdf"], src.display().to_string());
    }
}
