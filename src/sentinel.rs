//! The `__OUTDIR__=<path>` line that tells the orchestrator where a run went.
//!
//! The worker prints it on stdout once its run directory exists. The
//! orchestrator scans the worker's combined output and takes the **last**
//! match; anything that is not an existing directory is ignored and the
//! predicted path is used instead.

use once_cell::sync::Lazy;
use regex::Regex;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const SENTINEL_PREFIX: &str = "__OUTDIR__=";

static SENTINEL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"__OUTDIR__=(.+)$").expect("valid sentinel regex"));

/// `__OUTDIR__=<path>`
pub fn sentinel_line(dir: &Path) -> String {
    format!("{}{}", SENTINEL_PREFIX, dir.display())
}

/// Announce the run directory on stdout and flush.
pub fn emit(dir: &Path) -> std::io::Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    writeln!(out, "[INFO] OUTDIR  : {}", dir.display())?;
    writeln!(out, "{}", sentinel_line(dir))?;
    out.flush()
}

/// Last sentinel path in `lines`, if any.
pub fn find_out_dir<'a>(lines: impl IntoIterator<Item = &'a str>) -> Option<PathBuf> {
    lines
        .into_iter()
        .filter_map(|line| {
            SENTINEL_RE
                .captures(line.trim_end_matches('\r'))
                .map(|c| PathBuf::from(&c[1]))
        })
        .last()
}

/// The discovered directory if it exists, otherwise `predicted`.
pub fn resolve_out_dir<'a>(
    lines: impl IntoIterator<Item = &'a str>,
    predicted: &Path,
) -> PathBuf {
    match find_out_dir(lines) {
        Some(dir) if dir.is_dir() => dir,
        _ => predicted.to_path_buf(),
    }
}
