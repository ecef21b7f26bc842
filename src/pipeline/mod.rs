//! Pipeline stages for PDF-to-text OCR.
//!
//! Each submodule implements one transformation step; [`page`] sequences
//! them for a single page and contains its failures.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ preprocess ──▶ ocr ──▶ header ──▶ page (persist) ──▶ visualize
//! (path)    (pdfium)   (binarise)     (TSV)   (re-OCR)   (txt + json)       (QA png)
//! ```
//!
//! 1. [`input`]      check the user-supplied path is a readable PDF
//! 2. [`render`]     rasterise pages; runs in `spawn_blocking` because pdfium
//!    is not async-safe
//! 3. [`preprocess`] grayscale, binarise, optional deskew and table-rule removal
//! 4. [`ocr`]        engine call and line reconstruction
//! 5. [`header`]     optional header-band correction
//! 6. [`visualize`]  token boxes over the original page

pub mod header;
pub mod input;
pub mod ocr;
pub mod page;
pub mod preprocess;
pub mod render;
pub mod visualize;
