//! Startup diff: JSON shapes of the `/api/getpathfile` listing query and
//! the directory scan both ends use to build them.

use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use walkdir::WalkDir;

use crate::paths::wire_relative;

pub const ENDPOINT: &str = "/api/getpathfile";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathFileRequest {
    pub rpaths: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathFileResponse {
    pub result: i32,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub pathfiles: Vec<PathFiles>,
}

/// Every file under one requested remote directory.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathFiles {
    pub path: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub files: Vec<FileStat>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    /// Path relative to the listed directory, `/`-separated
    pub filename: String,
    pub size: u64,
}

fn null_as_empty<'de, D, T>(de: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(de)?.unwrap_or_default())
}

/// Recursively list the syncable regular files under `dir`.
///
/// A missing directory lists as empty. Files without a wire form are left
/// out, the same ones the client never maps.
pub fn list_files(dir: &Path) -> Vec<FileStat> {
    let mut files = Vec::new();
    if !dir.is_dir() {
        return files;
    }
    let walker = WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'));
    for entry in walker.filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(dir) else {
            continue;
        };
        let Some(filename) = wire_relative(rel) else {
            continue;
        };
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        files.push(FileStat {
            filename,
            size: meta.len(),
        });
    }
    files.sort_by(|a, b| a.filename.cmp(&b.filename));
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn listing_is_recursive_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::create_dir_all(root.join(".cache")).unwrap();
        fs::write(root.join("a.log"), b"12345").unwrap();
        fs::write(root.join("sub").join("b.log"), b"12").unwrap();
        fs::write(root.join(".a.log.swp"), b"x").unwrap();
        fs::write(root.join(".cache").join("c"), b"x").unwrap();
        fs::write(root.join("with space"), b"x").unwrap();

        let files = list_files(root);
        assert_eq!(
            files,
            vec![
                FileStat {
                    filename: "a.log".into(),
                    size: 5
                },
                FileStat {
                    filename: "sub/b.log".into(),
                    size: 2
                },
            ]
        );
    }

    #[test]
    fn missing_directory_lists_empty() {
        assert!(list_files(Path::new("/definitely/not/here")).is_empty());
    }

    #[test]
    fn null_file_lists_decode_as_empty() {
        let body = r#"{"result":0,"pathfiles":[{"path":"/app","files":null}]}"#;
        let resp: PathFileResponse = serde_json::from_str(body).unwrap();
        assert_eq!(resp.pathfiles.len(), 1);
        assert!(resp.pathfiles[0].files.is_empty());

        let resp: PathFileResponse = serde_json::from_str(r#"{"result":1,"pathfiles":null}"#).unwrap();
        assert_eq!(resp.result, 1);
        assert!(resp.pathfiles.is_empty());
    }

    #[test]
    fn request_shape() {
        let req = PathFileRequest {
            rpaths: vec!["/a".into()],
        };
        assert_eq!(serde_json::to_string(&req).unwrap(), r#"{"rpaths":["/a"]}"#);
    }
}
