//! Output types: OCR tokens, per-page JSON, page outcomes and run results.

use crate::error::PageError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ── Tokens and lines ─────────────────────────────────────────────────────

/// Axis-aligned box in page-image pixels. Serialises as `[left, top, width, height]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "[i32; 4]", into = "[i32; 4]")]
pub struct BoundingBox {
    pub left: i32,
    pub top: i32,
    pub width: i32,
    pub height: i32,
}

impl From<[i32; 4]> for BoundingBox {
    fn from([left, top, width, height]: [i32; 4]) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }
}

impl From<BoundingBox> for [i32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.left, b.top, b.width, b.height]
    }
}

/// Line-grouping key: `(block, paragraph, line)` as reported by the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LineKey {
    pub block: u32,
    pub paragraph: u32,
    pub line: u32,
}

/// One recognised word with its position in the page hierarchy.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrToken {
    pub text: String,
    /// 0–100, or `None` when the engine reports no confidence.
    pub conf: Option<f32>,
    pub bbox: BoundingBox,
    pub key: LineKey,
}

/// Token as written to per-page JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub text: String,
    pub conf: Option<f32>,
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
}

impl From<&OcrToken> for TokenRecord {
    fn from(t: &OcrToken) -> Self {
        Self {
            text: t.text.clone(),
            conf: t.conf,
            bbox: t.bbox,
        }
    }
}

/// A reconstructed line and its tokens in left-to-right order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextLine {
    pub line_text: String,
    pub tokens: Vec<TokenRecord>,
}

// ── Per-page artifacts ───────────────────────────────────────────────────

/// Final state of one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageStatus {
    /// Text and layout extracted.
    Ok,
    /// The engine ran but found no text.
    Empty,
    /// Placeholder artifacts were written.
    Error,
}

/// Contents of `json/page_NNN.json` for a processed page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageJson {
    pub page: usize,
    pub status: PageStatus,
    pub num_lines: usize,
    pub lines: Vec<TextLine>,
}

/// Contents of `json/page_NNN.json` for a failed page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PagePlaceholder {
    pub page: usize,
    pub status: PageStatus,
    pub error: String,
}

impl PagePlaceholder {
    pub fn new(page: usize, error: &PageError) -> Self {
        Self {
            page,
            status: PageStatus::Error,
            error: error.to_string(),
        }
    }
}

/// Result of one page passing through the page pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageOutcome {
    /// 1-indexed page number.
    pub page_num: usize,
    pub status: PageStatus,
    /// Number of reconstructed lines.
    pub num_lines: usize,
    /// Byte length of the final page text.
    pub text_len: usize,
    /// Set when `status` is [`PageStatus::Error`].
    pub error: Option<PageError>,
    /// Overlay problems on an otherwise good page.
    pub warnings: Vec<PageError>,
    pub duration_ms: u64,
}

/// Document information reported by `pdfocr inspect`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub producer: Option<String>,
    pub page_count: usize,
    pub pdf_version: String,
}

/// Page counters and timings for one pipeline run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversionStats {
    pub total_pages: usize,
    pub ok_pages: usize,
    pub empty_pages: usize,
    pub failed_pages: usize,
    pub render_duration_ms: u64,
    pub ocr_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// What one pipeline run (the isolated unit of work) produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionOutput {
    /// Canonical run directory.
    pub out_dir: PathBuf,
    pub pages: Vec<PageOutcome>,
    pub stats: ConversionStats,
}

// ── Run-level results ────────────────────────────────────────────────────

/// What happened to one merged artifact or to the cleanup step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum ArtifactOutcome {
    Written,
    /// The preferred path failed and a fallback produced the artifact.
    FellBack { reason: String },
    Failed { reason: String },
    /// The step was not requested (e.g. cleanup with `keep_extra`).
    Skipped,
}

impl ArtifactOutcome {
    pub fn is_clean(&self) -> bool {
        matches!(self, ArtifactOutcome::Written | ArtifactOutcome::Skipped)
    }
}

/// Per-artifact outcomes of the merge and cleanup phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeReport {
    pub text: ArtifactOutcome,
    pub json: ArtifactOutcome,
    pub pdf: ArtifactOutcome,
    pub meta: ArtifactOutcome,
    pub cleanup: ArtifactOutcome,
}

/// Overall run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Complete,
    /// At least one page failed, or a merged artifact fell back or failed.
    Degraded,
}

/// A page's final state as read back from `json/page_NNN.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSummary {
    pub page: usize,
    pub status: PageStatus,
    /// Placeholder error message for failed pages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Locations of everything a successful run produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    /// Run id: the run directory's file name.
    pub id: String,
    pub out_dir: PathBuf,
    pub pages_dir: PathBuf,
    pub txt_dir: PathBuf,
    pub vis_dir: PathBuf,
    pub json_dir: PathBuf,
    pub merged_txt: PathBuf,
    pub merged_json: PathBuf,
    pub merged_pdf: PathBuf,
    pub status: RunStatus,
    /// Pages with [`PageStatus::Error`].
    pub failed_pages: usize,
    /// Every page the worker wrote, in page order.
    pub pages: Vec<PageSummary>,
    pub artifacts: MergeReport,
}

impl RunResult {
    /// Merged text, falling back to text rebuilt from the merged JSON.
    ///
    /// Each JSON entry contributes its `text` or `ocr_text` field, or else its
    /// `lines[].line_text` joined by newlines. Entries are joined by a blank
    /// line. Returns an empty string if neither artifact yields text.
    pub fn read_merged_text(&self) -> String {
        let text = std::fs::read_to_string(&self.merged_txt).unwrap_or_default();
        if !text.trim().is_empty() {
            return text;
        }
        text_from_merged_json(&self.merged_json).unwrap_or_default()
    }
}

fn text_from_merged_json(path: &Path) -> Option<String> {
    let raw = std::fs::read_to_string(path).ok()?;
    let value: serde_json::Value = serde_json::from_str(&raw).ok()?;
    let parts: Vec<String> = value
        .as_array()?
        .iter()
        .filter_map(entry_text)
        .filter(|t| !t.trim().is_empty())
        .collect();
    Some(parts.join("\n\n").trim().to_string())
}

fn entry_text(entry: &serde_json::Value) -> Option<String> {
    for key in ["text", "ocr_text"] {
        if let Some(t) = entry.get(key).and_then(|t| t.as_str()).filter(|t| !t.is_empty()) {
            return Some(t.to_string());
        }
    }
    let lines: Vec<&str> = entry
        .get("lines")?
        .as_array()?
        .iter()
        .filter_map(|l| l.get("line_text").and_then(|t| t.as_str()))
        .collect();
    Some(lines.join("\n"))
}
