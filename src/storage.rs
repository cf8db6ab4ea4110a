//! Atomic file writes for durable records.
//!
//! Progress records, metadata records, and output text are all overwritten in
//! place on every transition, while the HTTP API may be reading them
//! concurrently. Writing to a temporary sibling and renaming it over the
//! target means a reader sees either the old complete file or the new
//! complete file, never a half-written one. Rename is atomic on POSIX as long
//! as source and target share a filesystem, which holds here because the
//! sibling lives next to the target.

use std::path::{Path, PathBuf};

/// Write `contents` to `path` atomically (temp sibling + rename).
///
/// The caller maps the `io::Error` to its own domain variant so the message
/// names the record that failed, not this helper.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), std::io::Error> {
    let tmp = tmp_sibling(path);
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await
}

/// `foo.json` → `foo.json.tmp`. Only one writer exists per job (the worker),
/// so the fixed sibling name cannot collide.
fn tmp_sibling(path: &Path) -> PathBuf {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => path.with_extension(format!("{ext}.tmp")),
        None => path.with_extension("tmp"),
    }
}
