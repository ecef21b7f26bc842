//! Run directory layout and naming.
//!
//! ```text
//! <out_root>/<run id>/
//! ├── pages/        page_001.png …   (removed by cleanup)
//! ├── pages_pdf/    optional per-page PDFs (removed by cleanup)
//! ├── vis/          page_001.png …   (removed by cleanup)
//! ├── ocr_txt/      page_001.txt … merged.txt
//! ├── json/         page_001.json … merged.json
//! ├── merged.pdf
//! └── meta.json
//! ```

use crate::error::PdfOcrError;
use std::path::{Path, PathBuf};
use tracing::debug;

const PAGES_DIR: &str = "pages";
const PAGES_PDF_DIR: &str = "pages_pdf";
const TXT_DIR: &str = "ocr_txt";
const JSON_DIR: &str = "json";
const VIS_DIR: &str = "vis";

pub const MERGED_TXT: &str = "merged.txt";
pub const MERGED_JSON: &str = "merged.json";
pub const MERGED_PDF: &str = "merged.pdf";
pub const META_JSON: &str = "meta.json";

/// Paths of one run directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLayout {
    pub root: PathBuf,
    pub pages_dir: PathBuf,
    pub pages_pdf_dir: PathBuf,
    pub txt_dir: PathBuf,
    pub json_dir: PathBuf,
    pub vis_dir: PathBuf,
}

impl RunLayout {
    /// Describe the layout under an existing (or predicted) run root. Touches nothing on disk.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            pages_dir: root.join(PAGES_DIR),
            pages_pdf_dir: root.join(PAGES_PDF_DIR),
            txt_dir: root.join(TXT_DIR),
            json_dir: root.join(JSON_DIR),
            vis_dir: root.join(VIS_DIR),
            root,
        }
    }

    /// Create a fresh run directory under `out_root`.
    ///
    /// A requested `name` is used verbatim unless that directory already
    /// exists, in which case `_<8 hex>` is appended. Without a name the
    /// directory is `out_tesseract_<YYYYmmdd_HHMMSS>[_<tag>]`, with the same
    /// collision rule. The returned root is canonical.
    pub fn create(
        out_root: &Path,
        name: Option<&str>,
        tag: Option<&str>,
    ) -> Result<Self, PdfOcrError> {
        std::fs::create_dir_all(out_root).map_err(|e| PdfOcrError::OutputDirFailed {
            path: out_root.to_path_buf(),
            source: e,
        })?;

        let base = match name {
            Some(n) => n.to_string(),
            None => timestamped_name(tag),
        };

        let mut candidate = out_root.join(&base);
        let root = loop {
            match std::fs::create_dir(&candidate) {
                Ok(()) => break candidate,
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    let renamed = format!("{}_{}", base, short_id());
                    debug!("Run directory {} exists, trying {}", candidate.display(), renamed);
                    candidate = out_root.join(renamed);
                }
                Err(e) => {
                    return Err(PdfOcrError::OutputDirFailed {
                        path: candidate,
                        source: e,
                    })
                }
            }
        };

        let root = root.canonicalize().map_err(|e| PdfOcrError::OutputDirFailed {
            path: root.clone(),
            source: e,
        })?;
        let layout = Self::at(root);
        for dir in [
            &layout.pages_dir,
            &layout.txt_dir,
            &layout.json_dir,
            &layout.vis_dir,
        ] {
            std::fs::create_dir_all(dir).map_err(|e| PdfOcrError::OutputDirFailed {
                path: dir.clone(),
                source: e,
            })?;
        }
        Ok(layout)
    }

    /// Run id: the run directory's file name.
    pub fn id(&self) -> String {
        self.root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn page_image(&self, page: usize) -> PathBuf {
        self.pages_dir.join(page_file(page, "png"))
    }

    pub fn page_text(&self, page: usize) -> PathBuf {
        self.txt_dir.join(page_file(page, "txt"))
    }

    pub fn page_json(&self, page: usize) -> PathBuf {
        self.json_dir.join(page_file(page, "json"))
    }

    pub fn page_vis(&self, page: usize) -> PathBuf {
        self.vis_dir.join(page_file(page, "png"))
    }

    pub fn merged_txt(&self) -> PathBuf {
        self.txt_dir.join(MERGED_TXT)
    }

    pub fn merged_json(&self) -> PathBuf {
        self.json_dir.join(MERGED_JSON)
    }

    pub fn merged_pdf(&self) -> PathBuf {
        self.root.join(MERGED_PDF)
    }

    pub fn meta(&self) -> PathBuf {
        self.root.join(META_JSON)
    }
}

/// `page_007.txt` style file name.
pub fn page_file(page: usize, ext: &str) -> String {
    format!("page_{:03}.{}", page, ext)
}

/// Name the orchestrator requests for a document: `out_tesseract_<stem>_<8 hex>`.
pub fn requested_run_name(pdf: &Path) -> String {
    let stem = pdf
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    format!("out_tesseract_{}_{}", stem, short_id())
}

fn timestamped_name(tag: Option<&str>) -> String {
    let ts = chrono::Local::now().format("%Y%m%d_%H%M%S");
    match tag {
        Some(t) if !t.is_empty() => format!("out_tesseract_{}_{}", ts, t),
        _ => format!("out_tesseract_{}", ts),
    }
}

/// First 8 lowercase hex digits of a random UUID.
fn short_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}
