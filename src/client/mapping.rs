//! Local path to remote wire path translation.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::PathPair;
use crate::paths::wire_relative;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mapping {
    /// Canonical local root
    pub local: PathBuf,
    /// Remote directory including the configured prefix
    pub remote: String,
}

#[derive(Clone, Debug, Default)]
pub struct RemoteMapper {
    mappings: Vec<Mapping>,
}

impl RemoteMapper {
    /// Canonicalize every local root and prepend `prefix` to every remote dir.
    ///
    /// Fails if a local root does not exist.
    pub fn new(prefix: &str, pairs: &[PathPair]) -> Result<Self> {
        let mut mappings = Vec::with_capacity(pairs.len());
        for pair in pairs {
            let local = pair
                .local
                .canonicalize()
                .with_context(|| format!("Failed to resolve watched path: {}", pair.local.display()))?;
            mappings.push(Mapping {
                local,
                remote: join_remote(prefix, &pair.remote),
            });
        }
        // Longest root first so nested roots win
        mappings.sort_by(|a, b| {
            b.local
                .components()
                .count()
                .cmp(&a.local.components().count())
        });
        Ok(Self { mappings })
    }

    pub fn mappings(&self) -> &[Mapping] {
        &self.mappings
    }

    pub fn local_roots(&self) -> impl Iterator<Item = &Path> {
        self.mappings.iter().map(|m| m.local.as_path())
    }

    /// Remote directories, in the form the diff API expects.
    pub fn remote_dirs(&self) -> Vec<String> {
        self.mappings.iter().map(|m| m.remote.clone()).collect()
    }

    /// Wire path for a local file, or `None` if it lies outside every root
    /// or the sync never carries it.
    pub fn remote_path(&self, local: &Path) -> Option<String> {
        self.mappings.iter().find_map(|m| {
            let rel = local.strip_prefix(&m.local).ok()?;
            Some(join_remote(&m.remote, &wire_relative(rel)?))
        })
    }
}

fn join_remote(base: &str, tail: &str) -> String {
    let base = base.trim_end_matches('/');
    let tail = tail.trim_start_matches('/');
    if tail.is_empty() {
        if base.is_empty() {
            "/".to_string()
        } else {
            base.to_string()
        }
    } else {
        format!("{}/{}", base, tail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapper(root: &Path) -> RemoteMapper {
        RemoteMapper::new(
            "/backup",
            &[PathPair {
                local: root.to_path_buf(),
                remote: "/app".into(),
            }],
        )
        .unwrap()
    }

    #[test]
    fn maps_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        let m = mapper(dir.path());
        let root = dir.path().canonicalize().unwrap();
        assert_eq!(
            m.remote_path(&root.join("a.log")).as_deref(),
            Some("/backup/app/a.log")
        );
        assert_eq!(
            m.remote_path(&root.join("sub").join("b.log")).as_deref(),
            Some("/backup/app/sub/b.log")
        );
        assert_eq!(m.remote_dirs(), vec!["/backup/app".to_string()]);
    }

    #[test]
    fn rejects_outside_and_unsyncable() {
        let dir = tempfile::tempdir().unwrap();
        let m = mapper(dir.path());
        let root = dir.path().canonicalize().unwrap();
        assert_eq!(m.remote_path(Path::new("/elsewhere/a.log")), None);
        assert_eq!(m.remote_path(&root.join(".a.log.swp")), None);
        assert_eq!(m.remote_path(&root.join("with space.log")), None);
        assert_eq!(m.remote_path(&root), None);
    }

    #[test]
    fn hidden_directories_are_never_mapped() {
        let dir = tempfile::tempdir().unwrap();
        let m = mapper(dir.path());
        let root = dir.path().canonicalize().unwrap();
        assert_eq!(m.remote_path(&root.join(".cache").join("c.log")), None);
        assert_eq!(m.remote_path(&root.join("sub/.git/HEAD")), None);
        assert_eq!(m.remote_path(&root.join("my dir").join("c.log")), None);
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_names_are_skipped() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempfile::tempdir().unwrap();
        let m = mapper(dir.path());
        let root = dir.path().canonicalize().unwrap();
        let a = root.join(OsStr::from_bytes(b"caf\xe9.log"));
        let b = root.join(OsStr::from_bytes(b"caf\xe8.log"));
        assert_eq!(m.remote_path(&a), None);
        assert_eq!(m.remote_path(&b), None);
        assert_eq!(
            m.remote_path(&root.join("café.log")).as_deref(),
            Some("/backup/app/café.log")
        );
    }

    #[test]
    fn missing_root_is_an_error() {
        let err = RemoteMapper::new(
            "",
            &[PathPair {
                local: PathBuf::from("/definitely/not/here"),
                remote: "/x".into(),
            }],
        );
        assert!(err.is_err());
    }

    #[test]
    fn join_remote_normalizes_slashes() {
        assert_eq!(join_remote("/pre/", "/dir"), "/pre/dir");
        assert_eq!(join_remote("", "/dir"), "/dir");
        assert_eq!(join_remote("", ""), "/");
    }
}
