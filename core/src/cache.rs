//! Last-known-good payload store.
//!
//! # Design
//! Records live in an in-memory table keyed by resource identity, so reads
//! never touch the disk. When the store is backed by a file, every mutation
//! schedules a flush on one dedicated writer thread. The writer snapshots the
//! whole table and replaces the file atomically (temp file + rename), which
//! keeps concurrent mutations from interleaving inside the persisted document
//! and makes the last write win.
//!
//! Payload bytes are stored base64-encoded, sealed first when a `Cipher` is
//! configured. Each record remembers whether it was sealed.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::cipher::Cipher;
use crate::error::CacheError;

const DOCUMENT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedRecord {
    data: String,
    encrypted: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheDocument {
    version: u32,
    records: BTreeMap<String, CachedRecord>,
}

type Table = Arc<RwLock<BTreeMap<String, CachedRecord>>>;

enum WriterJob {
    Flush,
    Barrier(oneshot::Sender<()>),
}

/// Durable key-value store for response payloads. Cheap to clone.
#[derive(Clone)]
pub struct CacheStore {
    table: Table,
    cipher: Option<Arc<dyn Cipher>>,
    writer: Option<mpsc::UnboundedSender<WriterJob>>,
}

impl CacheStore {
    /// Store that keeps records for the lifetime of the process only.
    pub fn in_memory() -> Self {
        Self {
            table: Arc::default(),
            cipher: None,
            writer: None,
        }
    }

    /// File-backed store without encryption.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CacheError> {
        Self::new(Some(path.into()), None)
    }

    /// Build a store. `path = None` keeps everything in memory.
    pub fn new(path: Option<PathBuf>, cipher: Option<Arc<dyn Cipher>>) -> Result<Self, CacheError> {
        let Some(path) = path else {
            return Ok(Self {
                cipher,
                ..Self::in_memory()
            });
        };

        let table: Table = Arc::new(RwLock::new(load_document(&path)?));
        let (tx, rx) = mpsc::unbounded_channel();
        let writer_table = Arc::clone(&table);
        let writer_path = path.clone();
        std::thread::Builder::new()
            .name("netcache-cache-writer".to_string())
            .spawn(move || run_writer(writer_path, writer_table, rx))
            .map_err(|source| CacheError::Io { path, source })?;

        Ok(Self {
            table,
            cipher,
            writer: Some(tx),
        })
    }

    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    /// Replace the record for `identity`.
    pub fn write(&self, identity: &str, bytes: &[u8]) -> Result<(), CacheError> {
        let (data, encrypted) = match &self.cipher {
            Some(cipher) => (STANDARD.encode(cipher.seal(bytes)?), true),
            None => (STANDARD.encode(bytes), false),
        };
        self.table
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(identity.to_string(), CachedRecord { data, encrypted });
        debug!(identity, len = bytes.len(), "cache record written");
        self.schedule_flush()
    }

    /// The stored bytes for `identity`, decrypted if needed.
    pub fn read(&self, identity: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let record = self
            .table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identity)
            .cloned();
        let Some(record) = record else {
            return Ok(None);
        };
        let raw = STANDARD
            .decode(record.data.as_bytes())
            .map_err(|e| CacheError::Format(format!("{identity}: {e}")))?;
        if !record.encrypted {
            return Ok(Some(raw));
        }
        match &self.cipher {
            Some(cipher) => Ok(Some(cipher.open(&raw)?)),
            None => Err(CacheError::MissingCipher(identity.to_string())),
        }
    }

    /// Remove one record. Returns whether it existed.
    pub fn delete(&self, identity: &str) -> Result<bool, CacheError> {
        let removed = self
            .table
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(identity)
            .is_some();
        if removed {
            self.schedule_flush()?;
        }
        Ok(removed)
    }

    /// Remove every record.
    pub fn clear_all(&self) -> Result<(), CacheError> {
        self.table
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        debug!("cache cleared");
        self.schedule_flush()
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.table.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolves once every flush scheduled before this call has finished.
    pub async fn flushed(&self) {
        let Some(writer) = &self.writer else {
            return;
        };
        let (tx, rx) = oneshot::channel();
        if writer.send(WriterJob::Barrier(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    fn schedule_flush(&self) -> Result<(), CacheError> {
        match &self.writer {
            Some(writer) => writer
                .send(WriterJob::Flush)
                .map_err(|_| CacheError::WriterGone),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("records", &self.len())
            .field("encrypted", &self.is_encrypted())
            .field("durable", &self.writer.is_some())
            .finish()
    }
}

fn load_document(path: &Path) -> Result<BTreeMap<String, CachedRecord>, CacheError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(source) => {
            return Err(CacheError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    match serde_json::from_slice::<CacheDocument>(&bytes) {
        Ok(doc) => Ok(doc.records),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cache document unreadable, starting empty");
            Ok(BTreeMap::new())
        }
    }
}

fn run_writer(path: PathBuf, table: Table, mut rx: mpsc::UnboundedReceiver<WriterJob>) {
    while let Some(job) = rx.blocking_recv() {
        match job {
            WriterJob::Flush => {
                if let Err(e) = flush(&path, &table) {
                    warn!(error = %e, "cache flush failed");
                }
            }
            WriterJob::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!(path = %path.display(), "cache writer stopped");
}

fn flush(path: &Path, table: &Table) -> Result<(), CacheError> {
    let document = CacheDocument {
        version: DOCUMENT_VERSION,
        records: table.read().unwrap_or_else(PoisonError::into_inner).clone(),
    };
    let bytes = serde_json::to_vec(&document).map_err(|e| CacheError::Format(e.to_string()))?;
    atomic_write(path, &bytes).map_err(|source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn atomic_write(path: &Path, content: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let tmp_path = parent.join(format!(".tmp.{}.netcache", uuid::Uuid::new_v4()));
    fs::write(&tmp_path, content)?;
    fs::rename(&tmp_path, path).inspect_err(|_| {
        let _ = fs::remove_file(&tmp_path);
    })
}
