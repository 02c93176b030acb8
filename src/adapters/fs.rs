//! Filesystem sources.
//!
//! Layout under a kind directory:
//!
//! ```text
//! <root>/<kind>/base.yaml          container-less (base) definition
//! <root>/<kind>/<container>/x.yaml definition owned by <container>
//! ```
//!
//! `FsSourceProvider::flat` skips the `<kind>` level and serves one
//! directory for whatever kind is asked.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use defc_core::ports::{ContentService, FileDescriptor, Result, SourceProvider};
use defc_core::{DefinitionKind, PortError};
use tracing::debug;

const EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

pub struct FsSourceProvider {
    root: PathBuf,
    per_kind: bool,
}

impl FsSourceProvider {
    /// One subdirectory per definition kind.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            per_kind: true,
        }
    }

    pub fn flat(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            per_kind: false,
        }
    }

    fn kind_dir(&self, kind: DefinitionKind) -> PathBuf {
        if self.per_kind {
            self.root.join(kind.as_str())
        } else {
            self.root.clone()
        }
    }
}

fn is_source(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| EXTENSIONS.contains(&e))
}

async fn read_dir(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| io_error(dir, e))?;
    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(dir, e))? {
        paths.push(entry.path());
    }
    paths.sort();
    Ok(paths)
}

fn io_error(path: &Path, e: std::io::Error) -> PortError {
    if e.kind() == std::io::ErrorKind::NotFound {
        PortError::NotFound(path.display().to_string())
    } else {
        PortError::Unavailable(format!("{}: {e}", path.display()))
    }
}

fn descriptor(dir: &Path, path: &Path, container: Option<&str>) -> FileDescriptor {
    let id = path
        .strip_prefix(dir)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/");
    FileDescriptor::new(id, container, path.to_string_lossy())
}

#[async_trait]
impl SourceProvider for FsSourceProvider {
    async fn sources(&self, kind: DefinitionKind) -> Result<Vec<FileDescriptor>> {
        let dir = self.kind_dir(kind);
        if !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            debug!("No {kind} sources under {}", dir.display());
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for path in read_dir(&dir).await? {
            if path.is_dir() {
                let container = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                for nested in read_dir(&path).await? {
                    if nested.is_file() && is_source(&nested) {
                        files.push(descriptor(&dir, &nested, Some(&container)));
                    }
                }
            } else if is_source(&path) {
                files.push(descriptor(&dir, &path, None));
            }
        }
        debug!("Found {} {kind} sources under {}", files.len(), dir.display());
        Ok(files)
    }
}

/// Reads `content_location` as a local path.
#[derive(Debug, Default)]
pub struct FsContent;

#[async_trait]
impl ContentService for FsContent {
    async fn fetch(&self, file: &FileDescriptor) -> Result<Vec<u8>> {
        let path = Path::new(&file.content_location);
        tokio::fs::read(path).await.map_err(|e| io_error(path, e))
    }
}
