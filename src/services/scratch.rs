use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Invocation-scoped temporary file, removed when dropped.
///
/// Removal errors are logged and swallowed; they never change the
/// outcome of the invocation that owned the file.
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    /// Creates a uniquely named empty file in `dir`
    pub fn reserve(dir: &Path, label: &str, suffix: &str) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let temp = tempfile::Builder::new()
            .prefix(&format!("{}-", label))
            .suffix(suffix)
            .tempfile_in(dir)?;

        // Drop-time removal is handled here so failures get logged.
        let path = temp.into_temp_path().keep().map_err(|e| e.error)?;
        debug!("Reserved scratch file {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => info!("Cleaned up temporary file: {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to clean up {}: {}", self.path.display(), e),
        }
    }
}
