//! Temp-file-then-rename writes.

use bridge_traits::error::Result;
use bridge_traits::storage::FileSystemAccess;
use bytes::Bytes;
use std::path::{Path, PathBuf};

pub(crate) const TEMP_SUFFIX: &str = ".tmp";
pub(crate) const PARTIAL_SUFFIX: &str = ".part";

/// Sibling path used while `path` is being written.
pub(crate) fn temp_path(path: &Path) -> PathBuf {
    with_suffix(path, TEMP_SUFFIX)
}

pub(crate) fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

/// Leftover from an interrupted write.
pub(crate) fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.ends_with(TEMP_SUFFIX) || n.ends_with(PARTIAL_SUFFIX))
        .unwrap_or(false)
}

/// Write `data` next to `path` and rename it into place.
pub(crate) async fn write_atomic(fs: &dyn FileSystemAccess, path: &Path, data: Bytes) -> Result<()> {
    let tmp = temp_path(path);
    fs.write_file(&tmp, data).await?;
    if let Err(e) = fs.rename(&tmp, path).await {
        let _ = fs.remove_if_exists(&tmp).await;
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_desktop::TokioFileSystem;

    #[test]
    fn test_temp_path_appends_suffix() {
        assert_eq!(
            temp_path(Path::new("/q/abc.json")),
            PathBuf::from("/q/abc.json.tmp")
        );
        assert_eq!(
            with_suffix(Path::new("/v/key"), PARTIAL_SUFFIX),
            PathBuf::from("/v/key.part")
        );
    }

    #[test]
    fn test_is_temp_file() {
        assert!(is_temp_file(Path::new("/q/abc.json.tmp")));
        assert!(is_temp_file(Path::new("/v/key.part")));
        assert!(!is_temp_file(Path::new("/v/key")));
        assert!(!is_temp_file(Path::new("/q/abc.json")));
    }

    #[tokio::test]
    async fn test_write_atomic_leaves_no_temp_file() {
        let root = tempfile::tempdir().unwrap();
        let fs = TokioFileSystem::rooted_at(root.path());
        let path = root.path().join("index.json");

        write_atomic(&fs, &path, Bytes::from("{}")).await.unwrap();
        write_atomic(&fs, &path, Bytes::from("{\"v\":1}")).await.unwrap();

        assert_eq!(fs.read_file(&path).await.unwrap(), Bytes::from("{\"v\":1}"));
        assert!(!fs.exists(&temp_path(&path)).await.unwrap());
    }
}
