use std::path::{Path, PathBuf};

use thiserror::Error;

/// Audio extensions picked up by directory discovery (lowercase, without dots).
pub const SUPPORTED_AUDIO_EXTENSIONS: [&str; 6] = ["mp3", "wav", "flac", "ogg", "aif", "aiff"];

/// Errors that can occur while listing an input directory.
#[derive(Debug, Error)]
pub enum ScanError {
    /// The provided root path is not a directory.
    #[error("Input root is not a directory: {0}")]
    InvalidRoot(PathBuf),
    /// Failed to read the directory or one of its entries.
    #[error("Failed to read {path}: {source}")]
    Io {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },
}

/// Return true if the path has a supported audio extension.
pub fn is_supported_audio(path: &Path) -> bool {
    let Some(ext) = path.extension().and_then(|ext| ext.to_str()) else {
        return false;
    };
    SUPPORTED_AUDIO_EXTENSIONS
        .iter()
        .any(|supported| ext.eq_ignore_ascii_case(supported))
}

/// List audio files directly inside `root`, sorted by path.
///
/// Subdirectories are not visited. `limit` keeps only the first N files of
/// the sorted listing.
pub fn discover_audio_files(root: &Path, limit: Option<usize>) -> Result<Vec<PathBuf>, ScanError> {
    if !root.is_dir() {
        return Err(ScanError::InvalidRoot(root.to_path_buf()));
    }
    let entries = std::fs::read_dir(root).map_err(|source| ScanError::Io {
        path: root.to_path_buf(),
        source,
    })?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| ScanError::Io {
            path: root.to_path_buf(),
            source,
        })?;
        let file_type = entry.file_type().map_err(|source| ScanError::Io {
            path: entry.path(),
            source,
        })?;
        let path = entry.path();
        if file_type.is_file() && is_supported_audio(&path) {
            files.push(path);
        }
    }
    files.sort();
    if let Some(limit) = limit {
        files.truncate(limit);
    }
    tracing::debug!("Discovered {} audio files in {}", files.len(), root.display());
    Ok(files)
}
