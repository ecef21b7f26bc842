//! QA overlay: token boxes and short labels drawn over the page image.
//!
//! The overlay is for inspection only. Nothing downstream reads it.

use crate::output::OcrToken;
use ab_glyph::FontVec;
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::Path;
use tracing::{debug, warn};

const BOX_COLOR: Rgb<u8> = Rgb([0, 200, 0]);
const OUTLINE_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
const LABEL_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const LABEL_CHARS: usize = 30;
const LABEL_GAP: i32 = 5;
const LABEL_BASE_PX: f32 = 30.0;

const SYSTEM_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/noto/NotoSansCJK-Regular.ttc",
    "/System/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// Load `path`, or the first usable system font when `path` is `None`.
pub fn load_font(path: Option<&Path>) -> Option<FontVec> {
    if let Some(p) = path {
        return match std::fs::read(p).map(FontVec::try_from_vec) {
            Ok(Ok(font)) => Some(font),
            Ok(Err(e)) => {
                warn!("Font {} is not usable: {}", p.display(), e);
                None
            }
            Err(e) => {
                warn!("Cannot read font {}: {}", p.display(), e);
                None
            }
        };
    }
    SYSTEM_FONTS.iter().find_map(|p| {
        let data = std::fs::read(p).ok()?;
        let font = FontVec::try_from_vec(data).ok()?;
        debug!("Using system font {}", p);
        Some(font)
    })
}

pub struct Visualizer {
    min_conf: i32,
    scale: f32,
    font: Option<FontVec>,
}

impl Visualizer {
    pub fn new(min_conf: i32, scale: f32, font: Option<FontVec>) -> Self {
        Self {
            min_conf,
            scale,
            font,
        }
    }

    /// Whether labels can be drawn, not just boxes.
    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    fn thickness(&self) -> i32 {
        ((2.0 * self.scale) as i32).max(1)
    }

    fn label_px(&self) -> f32 {
        (0.7 * self.scale).max(0.4) * LABEL_BASE_PX
    }

    /// Whether a token makes it onto the overlay.
    pub fn accepts(&self, token: &OcrToken) -> bool {
        matches!(token.conf, Some(c) if c.trunc() as i32 >= self.min_conf) && !token.text.trim().is_empty()
    }

    /// Annotated copy of `page`.
    pub fn draw(&self, page: &DynamicImage, tokens: &[OcrToken]) -> RgbImage {
        let mut canvas = page.to_rgb8();
        let thickness = self.thickness();
        let px = self.label_px();
        let mut drawn = 0usize;

        for token in tokens.iter().filter(|t| self.accepts(t)) {
            let b = token.bbox;
            if b.width <= 0 || b.height <= 0 {
                continue;
            }
            for i in 0..thickness {
                let rect = Rect::at(b.left + i, b.top + i).of_size(
                    (b.width - 2 * i).max(1) as u32,
                    (b.height - 2 * i).max(1) as u32,
                );
                draw_hollow_rect_mut(&mut canvas, rect, BOX_COLOR);
            }

            if let Some(ref font) = self.font {
                let label: String = token.text.trim().chars().take(LABEL_CHARS).collect();
                let x = b.left;
                let y = ((b.top - LABEL_GAP).max(0) as f32 - px).max(0.0) as i32;
                // outline first, then the fill on top
                let r = thickness;
                for (dx, dy) in [(-r, 0), (r, 0), (0, -r), (0, r), (-r, -r), (r, r), (-r, r), (r, -r)] {
                    draw_text_mut(&mut canvas, OUTLINE_COLOR, x + dx, y + dy, px, font, &label);
                }
                draw_text_mut(&mut canvas, LABEL_COLOR, x, y, px, font, &label);
            }
            drawn += 1;
        }
        debug!(drawn, total = tokens.len(), "Overlay drawn");
        canvas
    }

    /// Draw and write the overlay as PNG.
    pub fn save(
        &self,
        page: &DynamicImage,
        tokens: &[OcrToken],
        dest: &Path,
    ) -> Result<(), image::ImageError> {
        self.draw(page, tokens).save(dest)
    }
}

impl std::fmt::Debug for Visualizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Visualizer")
            .field("min_conf", &self.min_conf)
            .field("scale", &self.scale)
            .field("font", &self.font.is_some())
            .finish()
    }
}
