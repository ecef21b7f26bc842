//! Page image preprocessing: grayscale, optional deskew, binarisation and
//! optional table-line removal.
//!
//! Every strategy starts from an 8-bit grayscale copy of the page. Outputs of
//! the thresholding strategies contain only `0` (ink) and `255` (paper).
//!
//! Blur, Otsu, Canny, Hough, rotation, integral images and morphology come
//! from `imageproc`. CLAHE and the Gaussian-weighted adaptive threshold are
//! implemented here.

use crate::config::PrepStrategy;
use image::{DynamicImage, GrayImage, Luma};
use imageproc::contrast::otsu_level;
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use imageproc::definitions::Image;
use imageproc::hough::{detect_lines, LineDetectionOptions, PolarLine};
use imageproc::integral_image::{integral_image, sum_image_pixels};
use imageproc::morphology::{grayscale_close, grayscale_open, Mask};
use tracing::{debug, instrument};

/// σ matching a 3×3 Gaussian kernel.
const BLUR_3X3_SIGMA: f32 = 0.8;
/// σ matching a 5×5 Gaussian kernel.
const BLUR_5X5_SIGMA: f32 = 1.1;
/// σ of the weighting window for a 31-pixel adaptive Gaussian block.
const ADAPTIVE_BLOCK_SIGMA: f32 = 5.0;
const ADAPTIVE_BLOCK: u32 = 31;

const CLAHE_CLIP_LIMIT: f32 = 2.0;
const CLAHE_GRID: u32 = 8;

/// Length of the structuring element that isolates table rules.
const TABLE_LINE_KERNEL: u32 = 40;
/// Largest side `Mask::from_image` accepts.
const MAX_KERNEL: u32 = 255;

const DESKEW_CANNY_LOW: f32 = 50.0;
const DESKEW_CANNY_HIGH: f32 = 150.0;
const DESKEW_VOTES: u32 = 100;
const DESKEW_MAX_ANGLE: f32 = 45.0;

const WHITE: u8 = 255;
const BLACK: u8 = 0;

/// A configured preprocessing pass.
#[derive(Debug, Clone, Copy)]
pub struct Preprocessor {
    pub strategy: PrepStrategy,
    pub deskew: bool,
    pub table_clean: bool,
}

impl Preprocessor {
    pub fn new(strategy: PrepStrategy, deskew: bool, table_clean: bool) -> Self {
        Self {
            strategy,
            deskew,
            table_clean,
        }
    }

    /// Run the configured pass over `image`.
    #[instrument(skip_all, fields(strategy = %self.strategy, deskew = self.deskew, table_clean = self.table_clean))]
    pub fn apply(&self, image: &DynamicImage) -> GrayImage {
        let mut gray = image.to_luma8();
        if self.deskew {
            gray = deskew(&gray);
        }

        let processed = match self.strategy {
            PrepStrategy::None => gray,
            PrepStrategy::Adaptive => {
                let g = gaussian_blur_f32(&gray, BLUR_3X3_SIGMA);
                adaptive_gaussian_threshold(&g, 5)
            }
            PrepStrategy::Otsu => {
                let g = gaussian_blur_f32(&gray, BLUR_5X5_SIGMA);
                otsu_binarize(&g)
            }
            PrepStrategy::ClaheAdaptive => {
                let g = clahe(&gray, CLAHE_CLIP_LIMIT, CLAHE_GRID);
                let g = gaussian_blur_f32(&g, BLUR_3X3_SIGMA);
                adaptive_gaussian_threshold(&g, 3)
            }
            PrepStrategy::MorphOpenAdaptive => {
                let g = gaussian_blur_f32(&gray, BLUR_3X3_SIGMA);
                let bw = adaptive_mean_threshold(&g, ADAPTIVE_BLOCK, 10);
                open(&bw, 2, 2)
            }
            PrepStrategy::MorphCloseOtsu => {
                let g = gaussian_blur_f32(&gray, BLUR_3X3_SIGMA);
                let bw = otsu_binarize(&g);
                close(&bw, 2, 2)
            }
        };

        if self.table_clean {
            remove_table_lines(&processed)
        } else {
            processed
        }
    }
}

// ── Deskew ───────────────────────────────────────────────────────────────

/// Straighten `gray` by the median angle of its near-horizontal lines.
///
/// Returns an unmodified copy when no line within ±45° is found.
pub fn deskew(gray: &GrayImage) -> GrayImage {
    let edges = canny(gray, DESKEW_CANNY_LOW, DESKEW_CANNY_HIGH);
    let lines = detect_lines(
        &edges,
        LineDetectionOptions {
            vote_threshold: DESKEW_VOTES,
            suppression_radius: 8,
        },
    );
    let mut angles = near_horizontal_angles(&lines);
    let Some(med) = median(&mut angles) else {
        debug!(lines = lines.len(), "Deskew: no near-horizontal lines, image unchanged");
        return gray.clone();
    };

    debug!(lines = angles.len(), angle = med, "Deskew: rotating");
    rotate_about_center(
        gray,
        (-med).to_radians(),
        Interpolation::Bilinear,
        Luma([WHITE]),
    )
}

/// Direction of each detected line in degrees (0 = horizontal, positive =
/// descending to the right), keeping only those strictly within ±45°.
fn near_horizontal_angles(lines: &[PolarLine]) -> Vec<f32> {
    lines
        .iter()
        .map(|l| l.angle_in_degrees as f32 - 90.0)
        .filter(|a| a.abs() < DESKEW_MAX_ANGLE)
        .collect()
}

/// Median, averaging the middle pair for even lengths.
fn median(values: &mut [f32]) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    })
}

// ── Thresholding ─────────────────────────────────────────────────────────

/// Global Otsu threshold: paper (above the level) becomes white.
pub fn otsu_binarize(gray: &GrayImage) -> GrayImage {
    let level = otsu_level(gray);
    debug!(level, "Otsu level");
    map_pixels(gray, |v| if v > level { WHITE } else { BLACK })
}

/// Adaptive threshold against a Gaussian-weighted local mean over a
/// 31-pixel block, minus `c`.
pub fn adaptive_gaussian_threshold(gray: &GrayImage, c: i32) -> GrayImage {
    let local = gaussian_blur_f32(gray, ADAPTIVE_BLOCK_SIGMA);
    let mut out = GrayImage::new(gray.width(), gray.height());
    for (x, y, p) in gray.enumerate_pixels() {
        let threshold = local.get_pixel(x, y)[0] as i32 - c;
        out.put_pixel(x, y, Luma([if p[0] as i32 > threshold { WHITE } else { BLACK }]));
    }
    out
}

/// Adaptive threshold against the plain mean of a `block`×`block` window
/// (clipped at the borders), minus `c`.
pub fn adaptive_mean_threshold(gray: &GrayImage, block: u32, c: i32) -> GrayImage {
    let (w, h) = gray.dimensions();
    let integral: Image<Luma<u64>> = integral_image(gray);
    let radius = block / 2;
    let mut out = GrayImage::new(w, h);

    for y in 0..h {
        let y0 = y.saturating_sub(radius);
        let y1 = (y + radius).min(h - 1);
        for x in 0..w {
            let x0 = x.saturating_sub(radius);
            let x1 = (x + radius).min(w - 1);
            let area = ((x1 - x0 + 1) * (y1 - y0 + 1)) as f64;
            let [sum] = sum_image_pixels(&integral, x0, y0, x1, y1);
            let threshold = sum as f64 / area - c as f64;
            let v = gray.get_pixel(x, y)[0] as f64;
            out.put_pixel(x, y, Luma([if v > threshold { WHITE } else { BLACK }]));
        }
    }
    out
}

// ── CLAHE ────────────────────────────────────────────────────────────────

/// Contrast-limited adaptive histogram equalisation on a `grid`×`grid` tile layout.
///
/// Each tile's histogram is clipped at `clip_limit` times the mean bin height,
/// the excess redistributed over all bins, and the resulting mappings are
/// bilinearly interpolated between tile centres.
pub fn clahe(gray: &GrayImage, clip_limit: f32, grid: u32) -> GrayImage {
    let (w, h) = gray.dimensions();
    if w == 0 || h == 0 {
        return gray.clone();
    }
    let tile_w = w.div_ceil(grid.min(w)).max(1);
    let tile_h = h.div_ceil(grid.min(h)).max(1);
    let tiles_x = w.div_ceil(tile_w);
    let tiles_y = h.div_ceil(tile_h);

    let mut luts = vec![[0u8; 256]; (tiles_x * tiles_y) as usize];
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = (x0 + tile_w).min(w);
            let y1 = (y0 + tile_h).min(h);
            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[gray.get_pixel(x, y)[0] as usize] += 1;
                }
            }
            let area = (x1 - x0) * (y1 - y0);
            luts[(ty * tiles_x + tx) as usize] = clipped_equalisation(&mut hist, area, clip_limit);
        }
    }

    let lut_at = |tx: u32, ty: u32| &luts[(ty * tiles_x + tx) as usize];
    let mut out = GrayImage::new(w, h);
    for (x, y, p) in gray.enumerate_pixels() {
        let v = p[0] as usize;
        let (tx0, tx1, ax) = tile_neighbours(x, tile_w, tiles_x);
        let (ty0, ty1, ay) = tile_neighbours(y, tile_h, tiles_y);
        let top = lut_at(tx0, ty0)[v] as f32 * (1.0 - ax) + lut_at(tx1, ty0)[v] as f32 * ax;
        let bottom = lut_at(tx0, ty1)[v] as f32 * (1.0 - ax) + lut_at(tx1, ty1)[v] as f32 * ax;
        let value = top * (1.0 - ay) + bottom * ay;
        out.put_pixel(x, y, Luma([value.round().clamp(0.0, 255.0) as u8]));
    }
    out
}

fn clipped_equalisation(hist: &mut [u32; 256], area: u32, clip_limit: f32) -> [u8; 256] {
    let limit = ((clip_limit * area as f32 / 256.0) as u32).max(1);
    let mut excess = 0u32;
    for bin in hist.iter_mut() {
        if *bin > limit {
            excess += *bin - limit;
            *bin = limit;
        }
    }
    let share = excess / 256;
    let residual = (excess % 256) as usize;
    for bin in hist.iter_mut() {
        *bin += share;
    }
    if residual > 0 {
        let step = (256 / residual).max(1);
        for bin in hist.iter_mut().step_by(step).take(residual) {
            *bin += 1;
        }
    }

    let scale = 255.0 / area.max(1) as f32;
    let mut lut = [0u8; 256];
    let mut cumulative = 0u32;
    for (i, bin) in hist.iter().enumerate() {
        cumulative += bin;
        lut[i] = (cumulative as f32 * scale).round().min(255.0) as u8;
    }
    lut
}

/// The two tiles whose centres bracket `pos`, and the weight of the second.
fn tile_neighbours(pos: u32, tile: u32, tiles: u32) -> (u32, u32, f32) {
    let f = (pos as f32 + 0.5) / tile as f32 - 0.5;
    if f <= 0.0 {
        return (0, 0, 0.0);
    }
    let t0 = (f.floor() as u32).min(tiles - 1);
    let t1 = (t0 + 1).min(tiles - 1);
    (t0, t1, if t0 == t1 { 0.0 } else { f - t0 as f32 })
}

// ── Binary morphology ────────────────────────────────────────────────────

/// A solid `kw`×`kh` rectangle anchored at its centre (`k / 2`).
fn rect_mask(kw: u32, kh: u32) -> Mask {
    let kw = kw.clamp(1, MAX_KERNEL);
    let kh = kh.clamp(1, MAX_KERNEL);
    Mask::from_image(
        &GrayImage::from_pixel(kw, kh, Luma([WHITE])),
        (kw / 2) as u8,
        (kh / 2) as u8,
    )
}

/// Erosion followed by dilation with a `kw`×`kh` rectangle.
pub fn open(bw: &GrayImage, kw: u32, kh: u32) -> GrayImage {
    grayscale_open(bw, &rect_mask(kw, kh))
}

/// Dilation followed by erosion with a `kw`×`kh` rectangle.
pub fn close(bw: &GrayImage, kw: u32, kh: u32) -> GrayImage {
    grayscale_close(bw, &rect_mask(kw, kh))
}

// ── Table lines ──────────────────────────────────────────────────────────

/// Erase long horizontal and vertical rules, keeping everything else.
pub fn remove_table_lines(gray: &GrayImage) -> GrayImage {
    let level = otsu_level(gray);
    // ink becomes white so that morphology sees it as foreground
    let inv = map_pixels(gray, |v| if v > level { BLACK } else { WHITE });
    let h_lines = open(&inv, TABLE_LINE_KERNEL, 1);
    let v_lines = open(&inv, 1, TABLE_LINE_KERNEL);

    let mut out = GrayImage::new(gray.width(), gray.height());
    for (x, y, p) in inv.enumerate_pixels() {
        let is_line = h_lines.get_pixel(x, y)[0] == WHITE || v_lines.get_pixel(x, y)[0] == WHITE;
        let ink = p[0] == WHITE && !is_line;
        out.put_pixel(x, y, Luma([if ink { BLACK } else { WHITE }]));
    }
    out
}

fn map_pixels(gray: &GrayImage, f: impl Fn(u8) -> u8) -> GrayImage {
    let mut out = gray.clone();
    for p in out.pixels_mut() {
        p[0] = f(p[0]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn blank(w: u32, h: u32, v: u8) -> GrayImage {
        GrayImage::from_pixel(w, h, Luma([v]))
    }

    fn fill(img: &mut GrayImage, x0: u32, y0: u32, w: u32, h: u32, v: u8) {
        for y in y0..y0 + h {
            for x in x0..x0 + w {
                img.put_pixel(x, y, Luma([v]));
            }
        }
    }

    /// White page with a few dark "words".
    fn text_like_page() -> DynamicImage {
        let mut g = blank(120, 80, 235);
        fill(&mut g, 10, 10, 30, 8, 20);
        fill(&mut g, 50, 10, 40, 8, 25);
        fill(&mut g, 10, 40, 70, 8, 30);
        DynamicImage::ImageLuma8(g)
    }

    fn is_binary(img: &GrayImage) -> bool {
        img.pixels().all(|p| p[0] == WHITE || p[0] == BLACK)
    }

    #[test]
    fn none_strategy_only_converts_to_grayscale() {
        let rgb = RgbImage::from_pixel(7, 5, image::Rgb([10, 200, 30]));
        let img = DynamicImage::ImageRgb8(rgb.clone());
        let out = Preprocessor::new(PrepStrategy::None, false, false).apply(&img);
        assert_eq!(out, DynamicImage::ImageRgb8(rgb).to_luma8());
    }

    #[test]
    fn thresholding_strategies_are_binary_and_keep_ink() {
        let img = text_like_page();
        for strategy in PrepStrategy::ALL.into_iter().filter(|s| *s != PrepStrategy::None) {
            let out = Preprocessor::new(strategy, false, false).apply(&img);
            assert_eq!(out.dimensions(), (120, 80), "{strategy}");
            assert!(is_binary(&out), "{strategy} produced grey pixels");
            // centre of the first word is ink, far corner is paper
            assert_eq!(out.get_pixel(25, 14)[0], BLACK, "{strategy}");
            assert_eq!(out.get_pixel(115, 75)[0], WHITE, "{strategy}");
        }
    }

    #[test]
    fn deskew_without_lines_returns_unmodified_image() {
        let g = blank(64, 48, 255);
        assert_eq!(deskew(&g), g);
    }

    #[test]
    fn polar_angles_map_to_line_directions() {
        let lines = [
            PolarLine { r: 10.0, angle_in_degrees: 90 },
            PolarLine { r: 10.0, angle_in_degrees: 100 },
            PolarLine { r: 10.0, angle_in_degrees: 88 },
            PolarLine { r: 10.0, angle_in_degrees: 0 },
            PolarLine { r: 10.0, angle_in_degrees: 135 },
        ];
        assert_eq!(near_horizontal_angles(&lines), vec![0.0, 10.0, -2.0]);
    }

    #[test]
    fn median_handles_odd_and_even_lengths() {
        assert_eq!(median(&mut []), None);
        assert_eq!(median(&mut [3.0, -1.0, 2.0]), Some(2.0));
        assert_eq!(median(&mut [4.0, 1.0, 2.0, 3.0]), Some(2.5));
    }

    #[test]
    fn otsu_splits_two_levels() {
        let mut g = blank(10, 10, 200);
        fill(&mut g, 0, 0, 5, 10, 40);
        let out = otsu_binarize(&g);
        assert_eq!(out.get_pixel(1, 1)[0], BLACK);
        assert_eq!(out.get_pixel(8, 8)[0], WHITE);
    }

    #[test]
    fn adaptive_mean_ignores_uniform_illumination_shift() {
        // a dark dot on a mid-grey background is still ink
        let mut g = blank(40, 40, 120);
        fill(&mut g, 18, 18, 3, 3, 60);
        let out = adaptive_mean_threshold(&g, 31, 10);
        assert_eq!(out.get_pixel(19, 19)[0], BLACK);
        assert_eq!(out.get_pixel(2, 2)[0], WHITE);
    }

    #[test]
    fn clahe_keeps_constant_image_constant() {
        let g = blank(32, 16, 90);
        let out = clahe(&g, CLAHE_CLIP_LIMIT, CLAHE_GRID);
        assert_eq!(out.dimensions(), (32, 16));
        let first = out.get_pixel(0, 0)[0];
        assert!(out.pixels().all(|p| p[0] == first));
    }

    #[test]
    fn clahe_preserves_region_ordering() {
        let mut g = blank(64, 64, 100);
        fill(&mut g, 0, 0, 64, 32, 110);
        let out = clahe(&g, CLAHE_CLIP_LIMIT, CLAHE_GRID);
        let top = out.get_pixel(5, 5)[0] as i32;
        let bottom = out.get_pixel(5, 60)[0] as i32;
        assert!(top > bottom, "top={top} bottom={bottom}");
    }

    #[test]
    fn long_horizontal_opening_keeps_only_wide_runs() {
        let mut g = blank(60, 10, BLACK);
        fill(&mut g, 5, 2, 45, 1, WHITE); // a rule
        fill(&mut g, 10, 6, 8, 2, WHITE); // a glyph
        let out = open(&g, TABLE_LINE_KERNEL, 1);
        assert_eq!(out.get_pixel(5, 2)[0], WHITE);
        assert_eq!(out.get_pixel(49, 2)[0], WHITE);
        assert_eq!(out.get_pixel(12, 6)[0], BLACK);
    }

    #[test]
    fn opening_removes_specks_closing_fills_pinholes() {
        let mut g = blank(12, 12, BLACK);
        fill(&mut g, 2, 2, 6, 6, WHITE);
        g.put_pixel(10, 10, Luma([WHITE]));
        g.put_pixel(4, 4, Luma([BLACK]));

        let opened = open(&g, 2, 2);
        assert_eq!(opened.get_pixel(10, 10)[0], BLACK);

        let closed = close(&g, 2, 2);
        assert_eq!(closed.get_pixel(4, 4)[0], WHITE);
    }

    #[test]
    fn table_lines_are_removed_but_glyphs_survive() {
        let mut g = blank(100, 100, WHITE);
        fill(&mut g, 5, 50, 90, 2, BLACK); // horizontal rule
        fill(&mut g, 80, 5, 2, 40, BLACK); // vertical rule
        fill(&mut g, 20, 20, 5, 5, BLACK); // glyph
        let out = remove_table_lines(&g);
        assert_eq!(out.get_pixel(50, 50)[0], WHITE);
        assert_eq!(out.get_pixel(80, 25)[0], WHITE);
        assert_eq!(out.get_pixel(22, 22)[0], BLACK);
    }
}
