use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};
use walkdir::WalkDir;

const STAGING_PREFIX: &str = "vidrelay-";

/// Scratch directory owned by one acquisition.
///
/// Every file written for a request lives under [`StagingArea::path`]. The
/// directory is removed by [`StagingArea::teardown`], or on drop if a task is
/// cancelled before reaching it.
#[derive(Debug)]
pub struct StagingArea {
    dir: TempDir,
}

impl StagingArea {
    /// Creates `root` if needed and a fresh directory under it, off the async workers.
    pub async fn create(root: &Path) -> io::Result<Self> {
        let root = root.to_path_buf();
        let dir = tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&root)?;
            tempfile::Builder::new()
                .prefix(STAGING_PREFIX)
                .tempdir_in(&root)
        })
        .await
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))??;
        debug!(path = %dir.path().display(), "staging area created");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn file_count(&self) -> usize {
        count_files(self.dir.path())
    }

    pub async fn teardown(self) {
        let path = self.dir.path().to_path_buf();
        match tokio::task::spawn_blocking(move || self.dir.close()).await {
            Ok(Ok(())) => debug!(path = %path.display(), "staging area removed"),
            Ok(Err(err)) => {
                warn!(path = %path.display(), error = %err, "failed to clean staging directory")
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "staging cleanup task failed")
            }
        }
    }
}

/// Files left under `root`, used to check that no request leaked its staging.
pub fn staged_file_count(root: &Path) -> usize {
    count_files(root)
}

fn count_files(root: &Path) -> usize {
    WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .count()
}
