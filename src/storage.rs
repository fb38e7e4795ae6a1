//! Persistence (spec §4.3): a `Storage` trait plus a filesystem-backed
//! `FileStorage` implementation.
//!
//! Layout under the storage root, mirroring the teacher's session-store
//! convention of one directory per keyed entity:
//!
//! ```text
//! <root>/
//!   index/<sanitized-session-key>.json               # current IndexDocument
//!   archive/<sanitized-session-key>/<node-id>.json    # ArchiveBody
//! ```
//!
//! Index writes go through a stage-file-then-rename so a reader never
//! observes a torn write, the same trick the teacher's binary-replacement
//! routine uses for swapping a file into place.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::fs;

use crate::error::{Error, Result};
use crate::types::{ArchiveBody, IndexDocument};

/// Per-session persistent store (spec §4.3).
#[async_trait]
pub trait Storage: Send + Sync {
    /// Load the current index document for a session. Returns `None` if
    /// absent or unreadable (a corrupt file is logged and treated as
    /// missing; the next build overwrites it).
    async fn load_index(&self, session_key: &str) -> Result<Option<IndexDocument>>;

    /// Atomically replace the current index document for a session.
    async fn save_index(&self, doc: &IndexDocument) -> Result<()>;

    /// Persist a node's body under a deterministic, sanitized path and
    /// return the handle to use as `full_content_path`.
    async fn write_archive(
        &self,
        session_key: &str,
        node_id: &str,
        body: &ArchiveBody,
    ) -> Result<String>;

    /// Load a previously written archive body by its handle.
    async fn read_archive(&self, handle: &str) -> Result<Option<ArchiveBody>>;

    /// Remove archive bodies under this session whose id is not in
    /// `kept_ids`. Best-effort: failing to remove one file is not fatal,
    /// since a stray body is harmless clutter, not a correctness issue.
    async fn cleanup_archives(&self, session_key: &str, kept_ids: &[String]) -> Result<()>;
}

/// Filesystem-backed [`Storage`] rooted at a single directory.
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// Open (creating if needed) a storage root.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("index")).await?;
        fs::create_dir_all(root.join("archive")).await?;
        Ok(Self { root })
    }

    fn index_path(&self, session_key: &str) -> PathBuf {
        self.root
            .join("index")
            .join(format!("{}.json", sanitize(session_key)))
    }

    fn session_archive_dir(&self, session_key: &str) -> PathBuf {
        self.root.join("archive").join(sanitize(session_key))
    }

    fn archive_path(&self, session_key: &str, node_id: &str) -> PathBuf {
        self.session_archive_dir(session_key)
            .join(format!("{}.json", sanitize(node_id)))
    }
}

/// Replace any character outside `[A-Za-z0-9._-]` with `_`; an
/// all-invalid input sanitizes to `default` so the result is never empty
/// (spec §6 sanitization rule). `.` and `-` are allowed verbatim by that
/// rule, but passed through naively the single-component results `"."`
/// and `".."` would resolve to the current/parent directory when joined
/// onto a path — escaping the session's own subtree. Both are remapped to
/// `default` as well, since neither is distinguishable from any other
/// degenerate key once sanitized.
fn sanitize(key: &str) -> String {
    let cleaned: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '_') || cleaned == "." || cleaned == ".." {
        "default".to_string()
    } else {
        cleaned
    }
}

/// Hex-encoded SHA-256 of the given bytes: the stable content hash used
/// to checksum a chunk's transcript.
pub fn checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Write `contents` to `path` atomically: write to a sibling temp file,
/// then rename over the destination.
async fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents).await?;
    fs::rename(&tmp_path, path).await?;
    Ok(())
}

#[async_trait]
impl Storage for FileStorage {
    async fn load_index(&self, session_key: &str) -> Result<Option<IndexDocument>> {
        let path = self.index_path(session_key);
        match fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(doc) => Ok(Some(doc)),
                // Corrupt contents are treated as missing, not an error.
                Err(_) => Ok(None),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }

    async fn save_index(&self, doc: &IndexDocument) -> Result<()> {
        let path = self.index_path(&doc.session_key);
        let bytes = serde_json::to_vec_pretty(doc)?;
        atomic_write(&path, &bytes).await.map_err(|e| match e {
            Error::Io(source) => Error::StorageWrite {
                session_key: doc.session_key.clone(),
                source,
            },
            other => other,
        })
    }

    async fn write_archive(
        &self,
        session_key: &str,
        node_id: &str,
        body: &ArchiveBody,
    ) -> Result<String> {
        let path = self.archive_path(session_key, node_id);
        let bytes = serde_json::to_vec(body)?;
        atomic_write(&path, &bytes).await?;
        Ok(path.to_string_lossy().into_owned())
    }

    async fn read_archive(&self, handle: &str) -> Result<Option<ArchiveBody>> {
        match fs::read(handle).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(body) => Ok(Some(body)),
                Err(_) => Ok(None),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }

    async fn cleanup_archives(&self, session_key: &str, kept_ids: &[String]) -> Result<()> {
        let keep: std::collections::HashSet<String> =
            kept_ids.iter().map(|id| sanitize(id)).collect();
        let dir = self.session_archive_dir(session_key);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(_) => return Ok(()),
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
            if !keep.contains(stem) {
                let _ = fs::remove_file(&path).await;
            }
        }
        Ok(())
    }
}
