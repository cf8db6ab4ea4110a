//! Result packaging.
//!
//! One flat zip per job: `<stem>.md`, the metadata record, and every file in
//! the image directory under `images/`. Zip writing is blocking work, so it
//! runs on the blocking pool; the archive lands via a temp file + rename so
//! a concurrent download never reads a partial file at the final name.

use crate::config::ServiceConfig;
use crate::error::BookmillError;
use std::fs::File;
use std::io::{Seek, Write};
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Where the archive for `stem` lives inside a job directory.
pub fn archive_path(job_dir: &Path, stem: &str) -> PathBuf {
    job_dir.join(format!("{stem}_result.zip"))
}

/// Build (or rebuild) the archive for a converted job.
///
/// `entry_stem` names both the archive file (`<stem>_result.zip`) and its
/// text entry (`<stem>.md`). A missing metadata record or image directory is
/// tolerated; a missing output text is not.
pub async fn build_result_archive(
    config: &ServiceConfig,
    job_dir: &Path,
    output_file: &Path,
    entry_stem: &str,
    job_id: &str,
) -> Result<PathBuf, BookmillError> {
    let dest = archive_path(job_dir, entry_stem);
    let params = BuildParams {
        job_dir: job_dir.to_path_buf(),
        output_file: output_file.to_path_buf(),
        metadata_path: job_dir.join(&config.metadata_filename),
        metadata_entry: config.metadata_filename.clone(),
        image_dir: job_dir.join(&config.image_dir_name),
        image_entry_prefix: config.image_dir_name.clone(),
        text_entry: format!("{entry_stem}.md"),
        dest: dest.clone(),
        job_id: job_id.to_string(),
    };

    tokio::task::spawn_blocking(move || build_blocking(params))
        .await
        .map_err(|e| BookmillError::Archive {
            job_id: job_id.to_string(),
            detail: format!("archive task: {e}"),
        })??;
    Ok(dest)
}

struct BuildParams {
    job_dir: PathBuf,
    output_file: PathBuf,
    metadata_path: PathBuf,
    metadata_entry: String,
    image_dir: PathBuf,
    image_entry_prefix: String,
    text_entry: String,
    dest: PathBuf,
    job_id: String,
}

fn build_blocking(p: BuildParams) -> Result<(), BookmillError> {
    let fail = |detail: String| BookmillError::Archive {
        job_id: p.job_id.clone(),
        detail,
    };

    let tmp = tempfile::NamedTempFile::new_in(&p.job_dir)
        .map_err(|e| fail(format!("temp file: {e}")))?;
    let mut zip = ZipWriter::new(tmp);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    add_file(&mut zip, &p.output_file, &p.text_entry, options).map_err(&fail)?;

    if p.metadata_path.is_file() {
        add_file(&mut zip, &p.metadata_path, &p.metadata_entry, options).map_err(&fail)?;
    }

    if p.image_dir.is_dir() {
        let entries =
            std::fs::read_dir(&p.image_dir).map_err(|e| fail(format!("read image dir: {e}")))?;
        for entry in entries {
            let entry = entry.map_err(|e| fail(format!("read image dir: {e}")))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let entry_name = format!("{}/{}", p.image_entry_prefix, name);
            add_file(&mut zip, &path, &entry_name, options).map_err(&fail)?;
        }
    }

    let tmp = zip.finish().map_err(|e| fail(format!("finalize: {e}")))?;
    tmp.persist(&p.dest).map_err(|e| fail(format!("persist: {e}")))?;
    Ok(())
}

fn add_file<W: Write + Seek>(
    zip: &mut ZipWriter<W>,
    path: &Path,
    entry: &str,
    options: SimpleFileOptions,
) -> Result<(), String> {
    zip.start_file(entry, options)
        .map_err(|e| format!("entry '{entry}': {e}"))?;
    let mut file = File::open(path).map_err(|e| format!("open '{}': {e}", path.display()))?;
    std::io::copy(&mut file, zip).map_err(|e| format!("write '{entry}': {e}"))?;
    Ok(())
}
