//! Document-tree cache.
//!
//! Every parsed tree is kept twice: in memory for the rest of the current
//! process, and as a durable artifact at `<doctrees>/<docname>.doctree`:
//!
//! ```text
//! ┌──────────────┬──────────────────────────────┬─────────────────┐
//! │ header len   │ header (bincode)             │ payload         │
//! │ u32 LE       │ magic, version, checksum     │ bincode Doctree │
//! └──────────────┴──────────────────────────────┴─────────────────┘
//! ```
//!
//! Parallel readers store with [`CacheMode::Worker`]: the artifact bytes come
//! back to the caller instead of being written, and the coordinator persists
//! them with [`DoctreeCache::store_artifact`]. The durable directory is only
//! ever written from one thread.

use super::Doctree;
use crate::utils::fs::atomic_write;
use quire_core::Fingerprint;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;

const ARTIFACT_MAGIC: [u8; 4] = *b"QDTR";

/// Increment on breaking changes to the header or the tree model.
const ARTIFACT_FORMAT_VERSION: u32 = 1;

const ARTIFACT_EXT: &str = "doctree";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("no cached document tree for `{0}`")]
    NotFound(String),

    #[error("IO error at `{}`", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid artifact header in `{}`", .0.display())]
    InvalidHeader(PathBuf),

    #[error("checksum mismatch in `{}`", .0.display())]
    ChecksumMismatch(PathBuf),

    #[error("`{}` has format version {found}, expected {expected}", .path.display())]
    VersionMismatch {
        path: PathBuf,
        found: u32,
        expected: u32,
    },

    #[error("doctree serialization failed: {reason}")]
    Serialization { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ArtifactHeader {
    magic: [u8; 4],
    format_version: u32,
    checksum: Fingerprint,
}

/// Who is storing a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    /// Write the durable artifact directly.
    Coordinator,
    /// Skip the durable write and hand the artifact back.
    Worker,
}

#[derive(Debug)]
pub struct DoctreeCache {
    root: PathBuf,
    memory: FxHashMap<String, Doctree>,
}

impl DoctreeCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            memory: FxHashMap::default(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn artifact_path(&self, docname: &str) -> PathBuf {
        self.root.join(format!("{docname}.{ARTIFACT_EXT}"))
    }

    /// Cache `tree`, stripping its transient fields first.
    ///
    /// Returns the encoded artifact in [`CacheMode::Worker`], `None` otherwise.
    pub fn store(&mut self, mut tree: Doctree, mode: CacheMode) -> Result<Option<Vec<u8>>, CacheError> {
        tree.strip_transient();
        let bytes = encode(&tree)?;
        let docname = tree.docname.clone();
        self.memory.insert(docname.clone(), tree);

        match mode {
            CacheMode::Coordinator => {
                self.write(&docname, &bytes)?;
                Ok(None)
            }
            CacheMode::Worker => Ok(Some(bytes)),
        }
    }

    /// Persist an artifact produced by a worker.
    ///
    /// Any in-memory tree for `docname` predates the artifact and is dropped.
    pub fn store_artifact(&mut self, docname: &str, bytes: &[u8]) -> Result<(), CacheError> {
        self.memory.remove(docname);
        self.write(docname, bytes)
    }

    fn write(&self, docname: &str, bytes: &[u8]) -> Result<(), CacheError> {
        let path = self.artifact_path(docname);
        atomic_write(&path, bytes).map_err(|source| CacheError::Io { path, source })
    }

    /// Load the tree for `docname`, from memory if this process stored it.
    pub fn load(&self, docname: &str) -> Result<Doctree, CacheError> {
        if let Some(tree) = self.memory.get(docname) {
            return Ok(tree.clone());
        }

        let path = self.artifact_path(docname);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(CacheError::NotFound(docname.to_owned()));
            }
            Err(source) => return Err(CacheError::Io { path, source }),
        };
        decode(&path, &raw)
    }

    pub fn contains(&self, docname: &str) -> bool {
        self.memory.contains_key(docname) || self.artifact_path(docname).is_file()
    }

    /// Forget `docname` entirely.
    pub fn discard(&mut self, docname: &str) -> Result<(), CacheError> {
        self.memory.remove(docname);
        let path = self.artifact_path(docname);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(CacheError::Io { path, source }),
        }
    }
}

// ============================================================================
// Artifact Codec
// ============================================================================

fn serialization(err: impl std::fmt::Display) -> CacheError {
    CacheError::Serialization {
        reason: err.to_string(),
    }
}

fn encode(tree: &Doctree) -> Result<Vec<u8>, CacheError> {
    let payload =
        bincode::serde::encode_to_vec(tree, bincode::config::standard()).map_err(serialization)?;

    let header = ArtifactHeader {
        magic: ARTIFACT_MAGIC,
        format_version: ARTIFACT_FORMAT_VERSION,
        checksum: Fingerprint::of(&payload),
    };
    let header_bytes =
        bincode::serde::encode_to_vec(&header, bincode::config::standard()).map_err(serialization)?;

    let header_len = u32::try_from(header_bytes.len()).map_err(serialization)?;
    let mut output = Vec::with_capacity(4 + header_bytes.len() + payload.len());
    output.extend_from_slice(&header_len.to_le_bytes());
    output.extend_from_slice(&header_bytes);
    output.extend_from_slice(&payload);
    Ok(output)
}

fn decode(path: &Path, raw: &[u8]) -> Result<Doctree, CacheError> {
    let invalid = || CacheError::InvalidHeader(path.to_path_buf());

    let len_bytes: [u8; 4] = raw.get(..4).and_then(|b| b.try_into().ok()).ok_or_else(invalid)?;
    let header_len = u32::from_le_bytes(len_bytes) as usize;
    let header_bytes = raw.get(4..4 + header_len).ok_or_else(invalid)?;

    let (header, _): (ArtifactHeader, usize) =
        bincode::serde::decode_from_slice(header_bytes, bincode::config::standard())
            .map_err(|_| invalid())?;

    if header.magic != ARTIFACT_MAGIC {
        return Err(invalid());
    }
    if header.format_version != ARTIFACT_FORMAT_VERSION {
        return Err(CacheError::VersionMismatch {
            path: path.to_path_buf(),
            found: header.format_version,
            expected: ARTIFACT_FORMAT_VERSION,
        });
    }

    let payload = &raw[4 + header_len..];
    if Fingerprint::of(payload) != header.checksum {
        return Err(CacheError::ChecksumMismatch(path.to_path_buf()));
    }

    let (tree, _): (Doctree, usize) =
        bincode::serde::decode_from_slice(payload, bincode::config::standard())
            .map_err(serialization)?;
    Ok(tree)
}
