//! Path and permission utilities
//!
//! Permissions travel through the index as a 9-bit POSIX mask (owner read is
//! the high bit), detached from the setuid/setgid/sticky bits which are not
//! recorded.

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Extract the 9-bit permission mask from file metadata
pub fn permission_bits(meta: &fs::Metadata) -> u16 {
    (meta.permissions().mode() & 0o777) as u16
}

/// Apply a 9-bit permission mask to a file
pub fn set_permission_bits(path: &Path, bits: u16) -> io::Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(bits as u32))
}

/// Canonicalize a path, resolving symlinks and relative segments
pub fn canonical(path: &Path) -> io::Result<PathBuf> {
    fs::canonicalize(path)
}

/// Render a path relative to a root directory using the platform separator
///
/// Returns an empty string for the root itself.
pub fn relative_string(root: &Path, path: &Path) -> String {
    match path.strip_prefix(root) {
        Ok(rel) => rel.to_string_lossy().into_owned(),
        Err(_) => path.to_string_lossy().into_owned(),
    }
}

/// Walk upward from a starting directory looking for a child with the given
/// name, returning the directory that contains it
pub fn find_upward(start: &Path, name: &str) -> Option<PathBuf> {
    let mut dir = Some(start);
    while let Some(d) = dir {
        if d.join(name).is_dir() {
            return Some(d.to_path_buf());
        }
        dir = d.parent();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_permission_bits_roundtrip() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("f");
        fs::write(&file, b"x").unwrap();

        set_permission_bits(&file, 0o640).unwrap();
        let meta = fs::metadata(&file).unwrap();
        assert_eq!(permission_bits(&meta), 0o640);
    }

    #[test]
    fn test_relative_string() {
        let root = Path::new("/work/tree");
        assert_eq!(relative_string(root, Path::new("/work/tree/a/b.txt")), "a/b.txt");
        assert_eq!(relative_string(root, Path::new("/work/tree")), "");
    }

    #[test]
    fn test_find_upward() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join(".marker")).unwrap();
        fs::create_dir_all(root.join("a/b/c")).unwrap();

        let found = find_upward(&root.join("a/b/c"), ".marker").unwrap();
        assert_eq!(fs::canonicalize(found).unwrap(), fs::canonicalize(root).unwrap());

        assert!(find_upward(Path::new("/proc/self"), ".does-not-exist").is_none());
    }
}
