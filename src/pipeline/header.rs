//! Header correction: re-OCR the top band of a page with a stricter setup
//! and splice the result over a garbled first line.
//!
//! Running headers on scanned Korean/Chinese documents are often set in a
//! larger or decorative face that the full-page pass reads as a bracketed
//! numeral or a few stray glyphs. A single-line pass (PSM 7) over just the
//! header band, with digits blacklisted, does much better.

use crate::config::PrepStrategy;
use crate::error::OcrError;
use crate::pipeline::ocr::{extract, OcrEngine, OcrParams};
use crate::pipeline::preprocess::Preprocessor;
use image::DynamicImage;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

pub const HEADER_LANGS: &str = "kor+chi_tra";
pub const HEADER_PSM: u8 = 7;
pub const HEADER_OEM: u8 = 1;
pub const HEADER_BLACKLIST: &str = "0123456789";
const MIN_HEADER_HEIGHT: u32 = 10;

/// A first line like `[3]`, `[ 12 ].` that stands in for a misread header.
static BRACKET_NUMERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\[\s*\d{1,2}\s*\]\.?").expect("valid header regex"));

/// Engine settings for the header pass.
pub fn header_params() -> OcrParams {
    OcrParams {
        langs: HEADER_LANGS.to_string(),
        psm: HEADER_PSM,
        oem: Some(HEADER_OEM),
        whitelist: None,
        blacklist: Some(HEADER_BLACKLIST.to_string()),
    }
}

/// Height of the header band: `max(10, floor(height * ratio))`, never taller than the page.
pub fn crop_height(height: u32, ratio: f32) -> u32 {
    ((height as f32 * ratio) as u32)
        .max(MIN_HEADER_HEIGHT)
        .min(height)
}

/// Re-OCR the header band of `page` and splice it into `base_text`.
pub fn correct_header(
    engine: &dyn OcrEngine,
    page: &DynamicImage,
    base_text: &str,
    ratio: f32,
) -> Result<String, OcrError> {
    let band = crop_height(page.height(), ratio);
    let crop = page.crop_imm(0, 0, page.width(), band);
    let prepared = Preprocessor::new(PrepStrategy::Otsu, false, false).apply(&crop);
    let (_, header) = extract(engine, &prepared, &header_params())?;
    debug!(band, header = %header.text, "Header pass finished");
    Ok(splice_header(base_text, &header.text))
}

/// Combine corrected header text with the page text.
///
/// Blank lines of `base_text` are dropped. If nothing remains, the header
/// text is returned as is. A first line that looks like a bracketed numeral
/// or has at most four characters is replaced by the header; otherwise the
/// header is prepended as a new first line.
pub fn splice_header(base_text: &str, header_text: &str) -> String {
    let mut lines: Vec<&str> = base_text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .collect();
    let Some(first) = lines.first() else {
        return header_text.to_string();
    };

    let header = header_text.trim();
    if BRACKET_NUMERAL.is_match(first) || first.chars().count() <= 4 {
        lines[0] = header;
        return lines.join("\n");
    }
    format!("{}\n{}", header, lines.join("\n")).trim().to_string()
}
