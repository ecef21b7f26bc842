//! Input validation: make sure a user-supplied path is a readable PDF.
//!
//! Both the orchestrator and the in-process pipeline call this before doing
//! anything expensive, so a typo or a renamed `.docx` fails fast with a
//! meaningful error instead of surfacing as a pdfium crash inside the child
//! process.

use crate::error::PdfOcrError;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Validate a local PDF path: it must exist, be readable, and start with `%PDF`.
///
/// Returns the absolute path.
pub fn resolve_local(path: &Path) -> Result<PathBuf, PdfOcrError> {
    if !path.exists() {
        return Err(PdfOcrError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    match std::fs::File::open(path) {
        Ok(mut f) => {
            let mut magic = [0u8; 4];
            if f.read_exact(&mut magic).is_ok() && &magic != b"%PDF" {
                return Err(PdfOcrError::NotAPdf {
                    path: path.to_path_buf(),
                    magic,
                });
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(PdfOcrError::PermissionDenied {
                path: path.to_path_buf(),
            });
        }
        Err(_) => {
            return Err(PdfOcrError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
    }

    let abs = std::path::absolute(path).map_err(|e| PdfOcrError::Internal(e.to_string()))?;
    debug!("Resolved local PDF: {}", abs.display());
    Ok(abs)
}
