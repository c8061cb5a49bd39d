//! On-disk artifact cache keyed by fingerprint

use std::fs;
use std::io::ErrorKind;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, warn};
use lru::LruCache;

use super::fingerprint::{Fingerprint, OutputKind};
use crate::error::{CacheError, ConfigError};

/// Decoded artifacts kept in memory by default
pub const DEFAULT_MEMO_CAPACITY: usize = 64;

/// A file in the cache directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub kind: OutputKind,
    pub path: PathBuf,
}

/// Artifacts live at `<dir>/<fingerprint>.<ext>`.
///
/// The presence of that file is the only record that a fragment is cached;
/// there is no index. Bytes read through [`ArtifactCache::load`] are
/// memoized in a small LRU which [`ArtifactCache::invalidate`] keeps honest.
pub struct ArtifactCache {
    dir: PathBuf,
    memo: LruCache<PathBuf, Arc<Vec<u8>>>,
}

impl ArtifactCache {
    /// Open (creating if needed) the cache directory
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        Self::with_memo_capacity(dir, DEFAULT_MEMO_CAPACITY)
    }

    pub fn with_memo_capacity(
        dir: impl Into<PathBuf>,
        capacity: usize,
    ) -> Result<Self, ConfigError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| ConfigError::CacheDir {
            path: dir.clone(),
            source,
        })?;
        debug!("Artifact cache at {dir:?}");

        Ok(Self {
            dir,
            memo: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)),
        })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where the artifact for `fingerprint` lives, whether or not it exists
    #[must_use]
    pub fn path_for(&self, fingerprint: &Fingerprint, kind: OutputKind) -> PathBuf {
        self.dir.join(format!("{}.{}", fingerprint, kind.extension()))
    }

    #[must_use]
    pub fn contains(&self, fingerprint: &Fingerprint, kind: OutputKind) -> bool {
        self.path_for(fingerprint, kind).is_file()
    }

    /// Read an artifact, going through the in-memory memo
    pub fn load(&mut self, fingerprint: &Fingerprint, kind: OutputKind) -> Option<Arc<Vec<u8>>> {
        let path = self.path_for(fingerprint, kind);
        self.load_path(&path)
    }

    /// [`ArtifactCache::load`] for a path already resolved with `path_for`
    pub fn load_path(&mut self, path: &Path) -> Option<Arc<Vec<u8>>> {
        if let Some(bytes) = self.memo.get(path) {
            return Some(Arc::clone(bytes));
        }

        match fs::read(path) {
            Ok(bytes) => {
                let bytes = Arc::new(bytes);
                self.memo.put(path.to_path_buf(), Arc::clone(&bytes));
                Some(bytes)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                warn!("Failed to read cached artifact {path:?}: {e}");
                None
            }
        }
    }

    /// Delete the artifact and forget its decoded bytes.
    ///
    /// Returns `Ok(false)` when there was nothing to delete.
    pub fn invalidate(
        &mut self,
        fingerprint: &Fingerprint,
        kind: OutputKind,
    ) -> Result<bool, CacheError> {
        let path = self.path_for(fingerprint, kind);
        self.memo.pop(&path);

        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("Invalidated {path:?}");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(source) => Err(CacheError::Io { path, source }),
        }
    }

    /// Every artifact currently in the cache directory
    pub fn entries(&self) -> Result<Vec<CacheEntry>, CacheError> {
        let read_dir = fs::read_dir(&self.dir).map_err(|source| CacheError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let mut entries = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|source| CacheError::Io {
                path: self.dir.clone(),
                source,
            })?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let kind = path
                .extension()
                .and_then(|e| e.to_str())
                .and_then(OutputKind::from_extension);
            let fingerprint = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(Fingerprint::parse);
            if let (Some(kind), Some(fingerprint)) = (kind, fingerprint) {
                entries.push(CacheEntry {
                    fingerprint,
                    kind,
                    path,
                });
            }
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    /// Remove every artifact, returning how many were deleted
    pub fn clear(&mut self) -> Result<usize, CacheError> {
        self.memo.clear();
        let mut removed = 0;
        for entry in self.entries()? {
            fs::remove_file(&entry.path).map_err(|source| CacheError::Io {
                path: entry.path.clone(),
                source,
            })?;
            removed += 1;
        }
        Ok(removed)
    }
}
