//! Configuration types for the page OCR pipeline.
//!
//! Every knob of a run lives in [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`]. The same struct drives the in-process
//! [`crate::convert`] entry point and, through
//! [`PipelineConfig::worker_args`], the isolated `pdfocr pipeline` child
//! process spawned by the run orchestrator.
//!
//! External tool locations (the `tesseract` executable, its tessdata
//! directory, the pdfium shared library) are plain fields here. Nothing in
//! the library reads them from process-wide state.

use crate::error::PdfOcrError;
use crate::progress::PageProgressCallback;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// Configuration for one OCR pipeline run over a single document.
///
/// Built via [`PipelineConfig::builder()`] or using
/// [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_pdfocr::{PipelineConfig, PrepStrategy};
///
/// let config = PipelineConfig::builder()
///     .dpi(300)
///     .prep(PrepStrategy::Otsu)
///     .langs("kor+eng")
///     .psm(6)
///     .build()
///     .unwrap();
/// assert_eq!(config.psm, 6);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Rendering DPI used when rasterising each PDF page. Range: 72–600. Default: 300.
    ///
    /// Tesseract is trained on glyphs roughly 20–30 px tall; 300 DPI puts
    /// ordinary body text in that band. Lower values lose small print, higher
    /// values mostly cost memory.
    pub dpi: u32,

    /// Binarisation / cleanup strategy applied before OCR. Default: [`PrepStrategy::Adaptive`].
    pub prep: PrepStrategy,

    /// Tesseract language set, `+`-separated. Default: `kor+chi_tra+eng`.
    ///
    /// If this contains `kor`, `chi` or `jpn` (any case), reconstructed lines
    /// join tokens with no separator.
    pub langs: String,

    /// Page-segmentation mode. Range: 0–13. Default: 6 (single uniform block).
    pub psm: u8,

    /// OCR-engine mode. Range: 0–3. Default: engine default.
    pub oem: Option<u8>,

    /// Render at most this many pages. Default: all pages.
    pub max_pages: Option<usize>,

    /// Tokens below this confidence are not drawn on the QA overlay. Default: 50.
    pub min_conf: i32,

    /// Thickness and label scale of the QA overlay. Default: 1.0.
    pub vis_scale: f32,

    /// Straighten each page using the median angle of near-horizontal lines. Default: false.
    pub deskew: bool,

    /// Remove long horizontal and vertical rules (table borders) after binarisation. Default: false.
    pub table_clean: bool,

    /// Restrict recognition to these characters.
    pub whitelist: Option<String>,

    /// Never recognise these characters.
    pub blacklist: Option<String>,

    /// Re-OCR the top band of every page and splice the result into the first line. Default: false.
    pub header_fix: bool,

    /// Height of the header band as a fraction of page height. Default: 0.12.
    pub header_ratio: f32,

    /// Where the Tesseract executable and its language data live.
    pub tesseract: TesseractConfig,

    /// Path to the pdfium shared library, or a directory containing it.
    /// `None` binds to the system library.
    pub pdfium_lib_path: Option<PathBuf>,

    /// TrueType font used for overlay labels. `None` searches common system
    /// locations; if nothing is found only boxes are drawn.
    pub font_path: Option<PathBuf>,

    /// Directory under which the run directory is created. Default: `.`.
    pub out_root: PathBuf,

    /// Requested run directory name. A random suffix is appended on collision.
    pub out_name: Option<String>,

    /// Suffix for the timestamped default run directory name.
    pub tag: Option<String>,

    /// Per-page progress events.
    pub progress_callback: Option<Arc<dyn PageProgressCallback>>,
}

/// Location of the Tesseract executable and language data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TesseractConfig {
    /// Executable name or path. Default: `tesseract` (resolved on `PATH`).
    pub command: PathBuf,
    /// Passed as `--tessdata-dir` when set.
    pub tessdata_dir: Option<PathBuf>,
}

impl Default for TesseractConfig {
    fn default() -> Self {
        Self {
            command: PathBuf::from("tesseract"),
            tessdata_dir: None,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dpi: 300,
            prep: PrepStrategy::default(),
            langs: "kor+chi_tra+eng".to_string(),
            psm: 6,
            oem: None,
            max_pages: None,
            min_conf: 50,
            vis_scale: 1.0,
            deskew: false,
            table_clean: false,
            whitelist: None,
            blacklist: None,
            header_fix: false,
            header_ratio: 0.12,
            tesseract: TesseractConfig::default(),
            pdfium_lib_path: None,
            font_path: None,
            out_root: PathBuf::from("."),
            out_name: None,
            tag: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("dpi", &self.dpi)
            .field("prep", &self.prep)
            .field("langs", &self.langs)
            .field("psm", &self.psm)
            .field("oem", &self.oem)
            .field("max_pages", &self.max_pages)
            .field("min_conf", &self.min_conf)
            .field("vis_scale", &self.vis_scale)
            .field("deskew", &self.deskew)
            .field("table_clean", &self.table_clean)
            .field("whitelist", &self.whitelist)
            .field("blacklist", &self.blacklist)
            .field("header_fix", &self.header_fix)
            .field("header_ratio", &self.header_ratio)
            .field("tesseract", &self.tesseract)
            .field("pdfium_lib_path", &self.pdfium_lib_path)
            .field("out_root", &self.out_root)
            .field("out_name", &self.out_name)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn PageProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Render this configuration as `pdfocr pipeline` flags.
    ///
    /// The document path is not included; the caller appends it. The
    /// progress callback cannot cross a process boundary and is dropped.
    pub fn worker_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        let mut flag = |name: &str, value: OsString| {
            args.push(OsString::from(name));
            args.push(value);
        };

        flag("--dpi", self.dpi.to_string().into());
        flag("--prep", self.prep.to_string().into());
        flag("--langs", self.langs.clone().into());
        flag("--psm", self.psm.to_string().into());
        if let Some(oem) = self.oem {
            flag("--oem", oem.to_string().into());
        }
        if let Some(n) = self.max_pages {
            flag("--max-pages", n.to_string().into());
        }
        flag("--out-root", self.out_root.clone().into_os_string());
        if let Some(ref name) = self.out_name {
            flag("--out-name", name.clone().into());
        }
        if let Some(ref tag) = self.tag {
            flag("--tag", tag.clone().into());
        }
        flag("--min-conf", self.min_conf.to_string().into());
        flag("--vis-scale", self.vis_scale.to_string().into());
        if let Some(ref w) = self.whitelist {
            flag("--whitelist", w.clone().into());
        }
        if let Some(ref b) = self.blacklist {
            flag("--blacklist", b.clone().into());
        }
        flag("--header-ratio", self.header_ratio.to_string().into());
        flag("--tesseract", self.tesseract.command.clone().into_os_string());
        if let Some(ref dir) = self.tesseract.tessdata_dir {
            flag("--tessdata-dir", dir.clone().into_os_string());
        }
        if let Some(ref lib) = self.pdfium_lib_path {
            flag("--pdfium-lib", lib.clone().into_os_string());
        }
        if let Some(ref font) = self.font_path {
            flag("--font", font.clone().into_os_string());
        }

        for (enabled, name) in [
            (self.deskew, "--deskew"),
            (self.table_clean, "--table-clean"),
            (self.header_fix, "--header-fix"),
        ] {
            if enabled {
                args.push(OsString::from(name));
            }
        }
        args
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 600);
        self
    }

    pub fn prep(mut self, prep: PrepStrategy) -> Self {
        self.config.prep = prep;
        self
    }

    pub fn langs(mut self, langs: impl Into<String>) -> Self {
        self.config.langs = langs.into();
        self
    }

    pub fn psm(mut self, psm: u8) -> Self {
        self.config.psm = psm.min(13);
        self
    }

    pub fn oem(mut self, oem: u8) -> Self {
        self.config.oem = Some(oem.min(3));
        self
    }

    /// `0` means no cap.
    pub fn max_pages(mut self, n: usize) -> Self {
        self.config.max_pages = (n > 0).then_some(n);
        self
    }

    pub fn min_conf(mut self, conf: i32) -> Self {
        self.config.min_conf = conf.clamp(-1, 100);
        self
    }

    pub fn vis_scale(mut self, scale: f32) -> Self {
        self.config.vis_scale = scale.clamp(0.1, 10.0);
        self
    }

    pub fn deskew(mut self, v: bool) -> Self {
        self.config.deskew = v;
        self
    }

    pub fn table_clean(mut self, v: bool) -> Self {
        self.config.table_clean = v;
        self
    }

    pub fn whitelist(mut self, chars: impl Into<String>) -> Self {
        self.config.whitelist = Some(chars.into());
        self
    }

    pub fn blacklist(mut self, chars: impl Into<String>) -> Self {
        self.config.blacklist = Some(chars.into());
        self
    }

    pub fn header_fix(mut self, v: bool) -> Self {
        self.config.header_fix = v;
        self
    }

    pub fn header_ratio(mut self, ratio: f32) -> Self {
        self.config.header_ratio = ratio;
        self
    }

    pub fn tesseract_command(mut self, command: impl Into<PathBuf>) -> Self {
        self.config.tesseract.command = command.into();
        self
    }

    pub fn tessdata_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.tesseract.tessdata_dir = Some(dir.into());
        self
    }

    pub fn pdfium_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(path.into());
        self
    }

    pub fn font_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.font_path = Some(path.into());
        self
    }

    pub fn out_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.out_root = root.into();
        self
    }

    pub fn out_name(mut self, name: impl Into<String>) -> Self {
        self.config.out_name = Some(name.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.config.tag = Some(tag.into());
        self
    }

    pub fn progress_callback(mut self, cb: Arc<dyn PageProgressCallback>) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PdfOcrError> {
        let c = &self.config;
        if c.langs.trim().is_empty() {
            return Err(PdfOcrError::InvalidConfig(
                "Language set must not be empty".into(),
            ));
        }
        if !(c.header_ratio > 0.0 && c.header_ratio <= 1.0) {
            return Err(PdfOcrError::InvalidConfig(format!(
                "Header ratio must be in (0, 1], got {}",
                c.header_ratio
            )));
        }
        if let Some(ref name) = c.out_name {
            if name.is_empty() || name.contains(['/', '\\']) {
                return Err(PdfOcrError::InvalidConfig(format!(
                    "Output name must be a single path component, got {name:?}"
                )));
            }
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Page image preprocessing strategy.
///
/// | Name | Steps |
/// |------|-------|
/// | `none` | grayscale only |
/// | `adaptive` | 3×3 blur, adaptive Gaussian threshold (31, C=5) |
/// | `otsu` | 5×5 blur, global Otsu threshold |
/// | `clahe_adaptive` | CLAHE, 3×3 blur, adaptive Gaussian threshold (31, C=3) |
/// | `morph_open_adaptive` | adaptive mean threshold (31, C=10), 2×2 opening |
/// | `morph_close_otsu` | Otsu threshold, 2×2 closing |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrepStrategy {
    None,
    #[default]
    Adaptive,
    Otsu,
    ClaheAdaptive,
    MorphOpenAdaptive,
    MorphCloseOtsu,
}

impl PrepStrategy {
    /// All strategies, in documentation order.
    pub const ALL: [PrepStrategy; 6] = [
        PrepStrategy::None,
        PrepStrategy::Adaptive,
        PrepStrategy::Otsu,
        PrepStrategy::ClaheAdaptive,
        PrepStrategy::MorphOpenAdaptive,
        PrepStrategy::MorphCloseOtsu,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PrepStrategy::None => "none",
            PrepStrategy::Adaptive => "adaptive",
            PrepStrategy::Otsu => "otsu",
            PrepStrategy::ClaheAdaptive => "clahe_adaptive",
            PrepStrategy::MorphOpenAdaptive => "morph_open_adaptive",
            PrepStrategy::MorphCloseOtsu => "morph_close_otsu",
        }
    }
}

impl fmt::Display for PrepStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrepStrategy {
    type Err = PdfOcrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PrepStrategy::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| {
                let names: Vec<&str> = PrepStrategy::ALL.iter().map(|p| p.as_str()).collect();
                PdfOcrError::InvalidConfig(format!(
                    "Unknown preprocessing strategy '{s}' (expected one of: {})",
                    names.join(", ")
                ))
            })
    }
}
