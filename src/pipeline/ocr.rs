//! OCR extraction: run the engine, convert its TSV rows into typed tokens at
//! the boundary, and rebuild ordered lines from them.
//!
//! ## Line reconstruction
//!
//! 1. Drop tokens whose trimmed text is empty.
//! 2. Group by `(block, paragraph, line)`, keeping groups in the order their
//!    key was first seen. Spatial position does not reorder groups.
//! 3. Stable-sort each group by the token's left edge.
//! 4. Join tokens with no separator when the language set mentions `kor`,
//!    `chi` or `jpn` (any case), otherwise with one space.
//!
//! The page text is the reconstructed lines joined with `\n`.

use crate::config::{PipelineConfig, TesseractConfig};
use crate::error::OcrError;
use crate::output::{BoundingBox, LineKey, OcrToken, TextLine, TokenRecord};
use image::{GrayImage, ImageFormat};
use std::collections::HashMap;
use std::ffi::OsString;
use std::process::Command;
use tracing::debug;

/// Recognition settings for one engine call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcrParams {
    pub langs: String,
    pub psm: u8,
    pub oem: Option<u8>,
    pub whitelist: Option<String>,
    pub blacklist: Option<String>,
}

impl OcrParams {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            langs: config.langs.clone(),
            psm: config.psm,
            oem: config.oem,
            whitelist: config.whitelist.clone(),
            blacklist: config.blacklist.clone(),
        }
    }
}

/// Something that turns an image into a flat token stream.
///
/// Tokens come back in engine order, including rows with empty text.
pub trait OcrEngine: Send + Sync {
    fn recognize(&self, image: &GrayImage, params: &OcrParams) -> Result<Vec<OcrToken>, OcrError>;
}

// ── Tesseract CLI ────────────────────────────────────────────────────────

/// Runs the `tesseract` executable with TSV output.
#[derive(Debug, Clone)]
pub struct TesseractCli {
    config: TesseractConfig,
}

impl TesseractCli {
    pub fn new(config: TesseractConfig) -> Self {
        Self { config }
    }

    /// Command-line arguments for recognising `input`, writing TSV to stdout.
    pub fn args(&self, input: &std::path::Path, params: &OcrParams) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            input.as_os_str().to_owned(),
            "stdout".into(),
            "-l".into(),
            params.langs.clone().into(),
            "--psm".into(),
            params.psm.to_string().into(),
        ];
        if let Some(oem) = params.oem {
            args.push("--oem".into());
            args.push(oem.to_string().into());
        }
        if let Some(ref dir) = self.config.tessdata_dir {
            args.push("--tessdata-dir".into());
            args.push(dir.as_os_str().to_owned());
        }
        args.push("-c".into());
        args.push("preserve_interword_spaces=1".into());
        if let Some(w) = params.whitelist.as_ref().filter(|w| !w.is_empty()) {
            args.push("-c".into());
            args.push(format!("tessedit_char_whitelist={w}").into());
        }
        if let Some(b) = params.blacklist.as_ref().filter(|b| !b.is_empty()) {
            args.push("-c".into());
            args.push(format!("tessedit_char_blacklist={b}").into());
        }
        args.push("tsv".into());
        args
    }
}

impl OcrEngine for TesseractCli {
    fn recognize(&self, image: &GrayImage, params: &OcrParams) -> Result<Vec<OcrToken>, OcrError> {
        let staged = tempfile::Builder::new()
            .prefix("pdfocr-")
            .suffix(".png")
            .tempfile()
            .map_err(|e| OcrError::Stage(e.to_string()))?;
        image
            .save_with_format(staged.path(), ImageFormat::Png)
            .map_err(|e| OcrError::Stage(e.to_string()))?;

        let output = Command::new(&self.config.command)
            .args(self.args(staged.path(), params))
            .output()
            .map_err(|source| OcrError::Spawn {
                command: self.config.command.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(OcrError::EngineFailed {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let tsv = String::from_utf8_lossy(&output.stdout);
        let tokens = parse_tsv(&tsv)?;
        debug!(
            rows = tokens.len(),
            langs = %params.langs,
            psm = params.psm,
            "Tesseract finished"
        );
        Ok(tokens)
    }
}

impl From<&TesseractConfig> for TesseractCli {
    fn from(config: &TesseractConfig) -> Self {
        Self::new(config.clone())
    }
}

// ── TSV boundary ─────────────────────────────────────────────────────────

struct Columns {
    block: Option<usize>,
    par: Option<usize>,
    line: Option<usize>,
    left: usize,
    top: usize,
    width: usize,
    height: usize,
    conf: usize,
    text: usize,
}

impl Columns {
    fn from_header(header: &str) -> Result<Self, OcrError> {
        let names: Vec<&str> = header.split('\t').map(str::trim).collect();
        let find = |name: &str| names.iter().position(|n| *n == name);
        let require = |name: &str| {
            find(name).ok_or_else(|| OcrError::Parse {
                line: 1,
                detail: format!("missing column '{name}'"),
            })
        };
        Ok(Self {
            block: find("block_num"),
            par: find("par_num"),
            line: find("line_num"),
            left: require("left")?,
            top: require("top")?,
            width: require("width")?,
            height: require("height")?,
            conf: require("conf")?,
            text: require("text")?,
        })
    }
}

/// Convert Tesseract TSV output into tokens, one per data row.
///
/// A confidence of `-1` (or anything unparseable) becomes `None`. Missing
/// hierarchy columns default to 0.
pub fn parse_tsv(tsv: &str) -> Result<Vec<OcrToken>, OcrError> {
    let mut lines = tsv.lines().enumerate();
    let Some((_, header)) = lines.find(|(_, l)| !l.trim().is_empty()) else {
        return Ok(Vec::new());
    };
    let cols = Columns::from_header(header)?;

    let mut tokens = Vec::new();
    for (idx, row) in lines {
        if row.trim().is_empty() {
            continue;
        }
        let line_no = idx + 1;
        let fields: Vec<&str> = row.split('\t').collect();
        let int = |col: usize| -> Result<i32, OcrError> {
            fields
                .get(col)
                .ok_or_else(|| OcrError::Parse {
                    line: line_no,
                    detail: format!("expected at least {} fields, got {}", col + 1, fields.len()),
                })?
                .trim()
                .parse::<i32>()
                .map_err(|e| OcrError::Parse {
                    line: line_no,
                    detail: e.to_string(),
                })
        };
        let index = |col: Option<usize>| -> Result<u32, OcrError> {
            match col {
                Some(c) => Ok(int(c)?.max(0) as u32),
                None => Ok(0),
            }
        };

        tokens.push(OcrToken {
            text: fields.get(cols.text).copied().unwrap_or_default().to_string(),
            conf: parse_conf(fields.get(cols.conf).copied().unwrap_or_default()),
            bbox: BoundingBox {
                left: int(cols.left)?,
                top: int(cols.top)?,
                width: int(cols.width)?,
                height: int(cols.height)?,
            },
            key: LineKey {
                block: index(cols.block)?,
                paragraph: index(cols.par)?,
                line: index(cols.line)?,
            },
        });
    }
    Ok(tokens)
}

fn parse_conf(raw: &str) -> Option<f32> {
    raw.trim().parse::<f32>().ok().filter(|c| *c >= 0.0)
}

// ── Line reconstruction ──────────────────────────────────────────────────

/// Whether the language set calls for space-free joining.
pub fn is_cjk(langs: &str) -> bool {
    let lower = langs.to_lowercase();
    ["kor", "chi", "jpn"].iter().any(|k| lower.contains(k))
}

/// Non-empty tokens grouped by line key, groups in first-seen order and
/// tokens sorted by left edge. Token text is trimmed.
pub fn group_lines(tokens: &[OcrToken]) -> Vec<(LineKey, Vec<OcrToken>)> {
    let mut order: HashMap<LineKey, usize> = HashMap::new();
    let mut groups: Vec<(LineKey, Vec<OcrToken>)> = Vec::new();

    for t in tokens {
        let text = t.text.trim();
        if text.is_empty() {
            continue;
        }
        let slot = *order.entry(t.key).or_insert_with(|| {
            groups.push((t.key, Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(OcrToken {
            text: text.to_string(),
            ..t.clone()
        });
    }

    for (_, line) in &mut groups {
        line.sort_by_key(|t| t.bbox.left);
    }
    groups
}

/// Reconstructed text and line structure of one OCR pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OcrPage {
    pub text: String,
    pub lines: Vec<TextLine>,
}

impl OcrPage {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Rebuild ordered lines and page text from a raw token stream.
pub fn reconstruct(tokens: &[OcrToken], langs: &str) -> OcrPage {
    let sep = if is_cjk(langs) { "" } else { " " };
    let lines: Vec<TextLine> = group_lines(tokens)
        .into_iter()
        .map(|(_, toks)| TextLine {
            line_text: toks
                .iter()
                .map(|t| t.text.as_str())
                .collect::<Vec<_>>()
                .join(sep),
            tokens: toks.iter().map(TokenRecord::from).collect(),
        })
        .collect();
    let text = lines
        .iter()
        .map(|l| l.line_text.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    OcrPage { text, lines }
}

/// Run `engine` over `image` and reconstruct the result.
///
/// Returns the raw tokens as well; the visualiser draws from those.
pub fn extract(
    engine: &dyn OcrEngine,
    image: &GrayImage,
    params: &OcrParams,
) -> Result<(Vec<OcrToken>, OcrPage), OcrError> {
    let tokens = engine.recognize(image, params)?;
    let page = reconstruct(&tokens, &params.langs);
    Ok((tokens, page))
}
