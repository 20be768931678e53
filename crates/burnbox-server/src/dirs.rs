use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use tracing::debug;

/// File name of the redb database inside the data directory.
pub const DB_FILE: &str = "burnbox.db";

/// Resolve and create the directory holding [`DB_FILE`].
///
/// The first of these wins: `explicit` (the `--data-dir` flag), then
/// `BURNBOX_DATA_DIR`, then the platform data dir (`~/.local/share/burnbox/`
/// on Linux).
pub fn data_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    let (path, source) = match explicit {
        Some(dir) => (dir.to_path_buf(), "flag"),
        None => match std::env::var_os("BURNBOX_DATA_DIR") {
            Some(dir) => (PathBuf::from(dir), "BURNBOX_DATA_DIR"),
            None => (platform_dir()?, "platform default"),
        },
    };

    std::fs::create_dir_all(&path)
        .with_context(|| format!("create data dir {} ({source})", path.display()))?;
    debug!(path = %path.display(), source, "resolved data directory");
    Ok(path)
}

fn platform_dir() -> Result<PathBuf> {
    ProjectDirs::from("", "", "burnbox")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .context("could not determine platform data directory")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_dir_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        assert_eq!(data_dir(Some(&nested)).unwrap(), nested);
        assert!(nested.is_dir());
    }

    #[test]
    fn file_in_the_way_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("taken");
        std::fs::write(&blocker, b"").unwrap();
        let err = data_dir(Some(&blocker)).unwrap_err();
        assert!(format!("{err:#}").contains("flag"));
    }
}
