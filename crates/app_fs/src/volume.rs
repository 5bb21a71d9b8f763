//! Same-volume detection
//!
//! A move between two paths on the same volume is a rename; anything else
//! has to copy the data.

use std::path::{Path, PathBuf};

/// Whether `destination` would land on the same filesystem volume as `source`.
///
/// The destination usually does not exist yet, so its nearest existing
/// ancestor is used. Returns `false` if `source` cannot be inspected.
#[cfg(unix)]
pub fn same_volume(source: &Path, destination: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    let Ok(src) = std::fs::metadata(source) else {
        return false;
    };

    nearest_existing(destination)
        .and_then(|p| std::fs::metadata(p).ok())
        .map(|dst| dst.dev() == src.dev())
        .unwrap_or(false)
}

/// Whether `destination` would land on the same filesystem volume as `source`.
///
/// Compares drive letters / UNC share prefixes.
#[cfg(not(unix))]
pub fn same_volume(source: &Path, destination: &Path) -> bool {
    if !source.exists() {
        return false;
    }

    let source = absolute(source);
    let destination = absolute(destination);
    match (volume_root(&source), volume_root(&destination)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

#[cfg(not(unix))]
fn volume_root(path: &Path) -> Option<String> {
    use std::path::Component;

    match path.components().next()? {
        Component::Prefix(prefix) => Some(prefix.as_os_str().to_string_lossy().to_uppercase()),
        Component::RootDir => Some(String::from("\\")),
        _ => None,
    }
}

#[cfg(not(unix))]
fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

#[cfg(unix)]
fn nearest_existing(path: &Path) -> Option<PathBuf> {
    path.ancestors()
        .map(|p| if p.as_os_str().is_empty() { Path::new(".") } else { p })
        .find(|p| p.exists())
        .map(Path::to_path_buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_same_directory_is_same_volume() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("show.mkv");
        std::fs::write(&file, b"x").unwrap();

        assert!(same_volume(&file, &dir.path().join("renamed.mkv")));
        assert!(same_volume(&file, &dir.path().join("a").join("b").join("c.mkv")));
    }

    #[test]
    fn test_missing_source_is_not_quick() {
        let dir = TempDir::new().unwrap();
        assert!(!same_volume(
            &dir.path().join("missing.mkv"),
            &dir.path().join("out.mkv")
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_nearest_existing() {
        let dir = TempDir::new().unwrap();
        let deep = dir.path().join("x").join("y").join("z.txt");
        assert_eq!(nearest_existing(&deep).as_deref(), Some(dir.path()));
    }
}
