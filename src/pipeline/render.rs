//! PDF rasterisation: render pages to PNG files via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which is CPU-bound
//! and not async-aware. `tokio::task::spawn_blocking` keeps rendering off the
//! Tokio worker threads.
//!
//! A document that cannot be opened is fatal ([`PdfOcrError::CorruptPdf`]).
//! A single page that fails to render or save is recorded as a
//! [`PageError::RenderFailed`] and the remaining pages still render.

use crate::error::{PageError, PdfOcrError};
use crate::layout::RunLayout;
use crate::output::DocumentMetadata;
use image::ImageFormat;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Points per inch in PDF user space.
const PDF_POINTS_PER_INCH: f32 = 72.0;

/// One rasterised page: the PNG under `pages/`, or why there is none.
#[derive(Debug)]
pub struct RenderedPage {
    /// 1-indexed page number.
    pub page_num: usize,
    pub image: Result<PathBuf, PageError>,
}

/// Bind to pdfium, either at an explicit location or from the system.
///
/// `lib_path` may name the library file itself or the directory that
/// contains it (the platform-specific file name is filled in).
pub fn bind_pdfium(lib_path: Option<&Path>) -> Result<Pdfium, PdfOcrError> {
    let bindings = match lib_path {
        Some(p) if p.is_dir() => {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(p))
        }
        Some(p) => Pdfium::bind_to_library(p),
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| PdfOcrError::PdfiumBindingFailed(format!("{e:?}")))?;
    Ok(Pdfium::new(bindings))
}

/// Render up to `max_pages` pages of `pdf_path` at `dpi` into `layout.pages_dir`.
pub async fn render_pages(
    pdf_path: &Path,
    layout: &RunLayout,
    dpi: u32,
    max_pages: Option<usize>,
    lib_path: Option<&Path>,
) -> Result<Vec<RenderedPage>, PdfOcrError> {
    let path = pdf_path.to_path_buf();
    let layout = layout.clone();
    let lib = lib_path.map(Path::to_path_buf);

    tokio::task::spawn_blocking(move || {
        render_pages_blocking(&path, &layout, dpi, max_pages, lib.as_deref())
    })
    .await
    .map_err(|e| PdfOcrError::Internal(format!("Render task panicked: {}", e)))?
}

fn render_pages_blocking(
    pdf_path: &Path,
    layout: &RunLayout,
    dpi: u32,
    max_pages: Option<usize>,
    lib_path: Option<&Path>,
) -> Result<Vec<RenderedPage>, PdfOcrError> {
    let pdfium = bind_pdfium(lib_path)?;
    let document = pdfium
        .load_pdf_from_file(pdf_path, None)
        .map_err(|e| PdfOcrError::CorruptPdf {
            path: pdf_path.to_path_buf(),
            detail: format!("{:?}", e),
        })?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    let count = max_pages.map_or(total_pages, |cap| cap.min(total_pages));
    let zoom = dpi as f32 / PDF_POINTS_PER_INCH;
    info!(
        total_pages,
        rendering = count,
        dpi,
        "PDF loaded, rendering at zoom {:.3}",
        zoom
    );

    let render_config = PdfRenderConfig::new().scale_page_by_factor(zoom);
    let mut results = Vec::with_capacity(count);

    for idx in 0..count {
        let page_num = idx + 1;
        let dest = layout.page_image(page_num);
        let rendered = render_one(&pages, idx, &render_config, &dest);
        let image = match rendered {
            Ok(()) => Ok(dest),
            Err(detail) => {
                warn!(page = page_num, "Rasterisation failed: {}", detail);
                Err(PageError::RenderFailed { page: page_num, detail })
            }
        };
        results.push(RenderedPage { page_num, image });
    }

    Ok(results)
}

fn render_one(
    pages: &PdfPages<'_>,
    idx: usize,
    render_config: &PdfRenderConfig,
    dest: &Path,
) -> Result<(), String> {
    let page = pages.get(idx as u16).map_err(|e| format!("{:?}", e))?;
    let bitmap = page
        .render_with_config(render_config)
        .map_err(|e| format!("{:?}", e))?;
    let image = bitmap.as_image();
    debug!(
        page = idx + 1,
        "Rendered page → {}x{} px",
        image.width(),
        image.height()
    );
    image
        .save_with_format(dest, ImageFormat::Png)
        .map_err(|e| format!("saving {}: {}", dest.display(), e))
}

/// Read document information without rendering anything.
pub async fn extract_metadata(
    pdf_path: &Path,
    lib_path: Option<&Path>,
) -> Result<DocumentMetadata, PdfOcrError> {
    let path = pdf_path.to_path_buf();
    let lib = lib_path.map(Path::to_path_buf);

    tokio::task::spawn_blocking(move || extract_metadata_blocking(&path, lib.as_deref()))
        .await
        .map_err(|e| PdfOcrError::Internal(format!("Metadata task panicked: {}", e)))?
}

fn extract_metadata_blocking(
    pdf_path: &Path,
    lib_path: Option<&Path>,
) -> Result<DocumentMetadata, PdfOcrError> {
    let pdfium = bind_pdfium(lib_path)?;
    let document = pdfium
        .load_pdf_from_file(pdf_path, None)
        .map_err(|e| PdfOcrError::CorruptPdf {
            path: pdf_path.to_path_buf(),
            detail: format!("{:?}", e),
        })?;

    let metadata = document.metadata();
    let get_meta = |tag: PdfDocumentMetadataTagType| -> Option<String> {
        metadata
            .get(tag)
            .map(|t| t.value().to_string())
            .filter(|v| !v.is_empty())
    };

    Ok(DocumentMetadata {
        title: get_meta(PdfDocumentMetadataTagType::Title),
        author: get_meta(PdfDocumentMetadataTagType::Author),
        producer: get_meta(PdfDocumentMetadataTagType::Producer),
        page_count: document.pages().len() as usize,
        pdf_version: format!("{:?}", document.version()),
    })
}
