//! Path rules shared by both ends of the wire.

use anyhow::{anyhow, bail, Result};
use std::path::{Component, Path, PathBuf};

/// Resolve a wire path to a location under `root`.
///
/// Wire paths are absolute (`/prefix/dir/file`); the leading root is
/// stripped and the rest joined onto `root`. Parent components, drive
/// prefixes and NUL bytes are rejected. The deepest ancestor of the parent
/// that already exists is canonicalized and must still lie under the
/// canonical root, so a symlinked directory at any depth cannot redirect
/// writes (or the directories `ensure_parent_exists` creates) outside it.
pub fn resolve_under_root(root: &Path, wire_path: &str) -> Result<PathBuf> {
    use Component::{CurDir, Normal, ParentDir, Prefix, RootDir};

    if wire_path.contains('\0') {
        bail!("path contains NUL byte");
    }

    let mut safe = PathBuf::new();
    for component in Path::new(wire_path).components() {
        match component {
            RootDir | CurDir => {}
            Normal(s) => {
                #[cfg(windows)]
                if s.to_string_lossy().contains(':') {
                    bail!("path component contains colon (potential ADS attack)");
                }
                safe.push(s);
            }
            ParentDir | Prefix(_) => {
                bail!("path contains disallowed component: {:?}", component);
            }
        }
    }
    if safe.as_os_str().is_empty() {
        bail!("path {:?} names no file", wire_path);
    }

    let canon_root = root
        .canonicalize()
        .map_err(|e| anyhow!("failed to canonicalize root {:?}: {}", root, e))?;
    let joined = canon_root.join(&safe);

    let (Some(parent), Some(name)) = (joined.parent(), joined.file_name()) else {
        bail!("path {:?} names no file", wire_path);
    };

    // Any existing entry counts, so a dangling link fails to canonicalize
    let mut existing = parent;
    while existing.symlink_metadata().is_err() {
        match existing.parent() {
            Some(up) => existing = up,
            None => break,
        }
    }
    let canonical = existing
        .canonicalize()
        .map_err(|e| anyhow!("failed to canonicalize {:?}: {}", existing, e))?;
    if !canonical.starts_with(&canon_root) {
        bail!("path {:?} escapes root {:?}", wire_path, root);
    }
    let missing = parent
        .strip_prefix(existing)
        .map_err(|e| anyhow!("failed to split {:?}: {}", parent, e))?;

    Ok(canonical.join(missing).join(name))
}

/// Create the parent directory of `path` if needed.
pub fn ensure_parent_exists(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// The `/`-joined wire form of a path relative to a sync root.
///
/// `None` when any component is hidden, holds whitespace or is not valid
/// UTF-8. Client mapping and server listing both go through this, so a
/// file one side skips is never reported by the other.
pub fn wire_relative(rel: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in rel.components() {
        let Component::Normal(s) = component else {
            return None;
        };
        let s = s.to_str()?;
        if s.starts_with('.') || s.chars().any(|c| c.is_ascii_whitespace()) {
            return None;
        }
        parts.push(s);
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}
