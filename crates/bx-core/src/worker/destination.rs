//! Resolves a task's `Destination` (or upload source) to a real filesystem
//! path.

use crate::task::{BaseDirectory, Destination};
use crate::url_model;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Maps the platform-neutral `BaseDirectory` enum to a directory under the
/// XDG state/home tree, standing in for the application-support/temporary/
/// documents/external-storage directories the source ecosystem names.
pub fn resolve_base_directory(base: BaseDirectory) -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("bx")?;
    let path = match base {
        BaseDirectory::ApplicationSupport => xdg_dirs.get_data_home().join("bx"),
        BaseDirectory::Temporary => xdg_dirs.get_cache_home().join("bx").join("tmp"),
        BaseDirectory::Documents => dirs_documents_fallback(),
        BaseDirectory::ExternalStorage => xdg_dirs.get_data_home().join("bx").join("external"),
    };
    std::fs::create_dir_all(&path)
        .with_context(|| format!("create base directory: {}", path.display()))?;
    Ok(path)
}

fn dirs_documents_fallback() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Documents")
}

/// Final (non-suggested) destination path for a download, resolving the
/// `"suggest"` filename sentinel against `content_disposition`/`url`,
/// with `" (n)"` uniqueness suffixing.
pub fn resolve_download_path(
    destination: &Destination,
    url: &str,
    content_disposition: Option<&str>,
    request_unique: bool,
) -> Result<PathBuf> {
    let base = resolve_base_directory(destination.base_directory)?;
    let dir = if destination.sub_directory.is_empty() {
        base
    } else {
        base.join(&destination.sub_directory)
    };
    std::fs::create_dir_all(&dir).with_context(|| format!("create directory: {}", dir.display()))?;

    let filename = if destination.wants_suggested_filename() {
        url_model::derive_filename(url, content_disposition)
    } else {
        destination.filename.clone()
    };

    let filename = if request_unique {
        url_model::make_unique_filename(&dir, &filename)
    } else {
        filename
    };

    Ok(dir.join(filename))
}

/// Resolves an upload's source file path to an absolute path, verifying it
/// exists: a missing source file is a non-retryable filesystem error.
pub fn resolve_upload_source(path_str: &str) -> Result<PathBuf> {
    let path = Path::new(path_str);
    if !path.is_file() {
        anyhow::bail!("source file does not exist: {}", path.display());
    }
    Ok(path.to_path_buf())
}
