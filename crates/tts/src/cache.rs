//! Persistent phrase cache
//!
//! One raw PCM file per fingerprint plus a single JSON index. The index
//! is reconciled against the directory on open so a crash between file
//! write and index update never leaves the cache lying: entries without
//! files are dropped, orphan files are adopted.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use walnut_core::StorageError;

use crate::fingerprint::Fingerprint;

const INDEX_FILE: &str = "index.json";

/// Index metadata for one cached phrase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntryMeta {
    pub text: String,
    pub sample_rate: u32,
    pub created_at: u64,
    pub last_access: u64,
    pub access_count: u64,
    pub bytes: u64,
}

/// A cache hit.
#[derive(Debug, Clone)]
pub struct CachedPhrase {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

/// Content-addressed phrase store.
pub struct PhraseCache {
    dir: PathBuf,
    index: Mutex<HashMap<String, CacheEntryMeta>>,
}

impl PhraseCache {
    /// Open (or create) the cache directory and reconcile the index.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let index_path = dir.join(INDEX_FILE);
        let mut index: HashMap<String, CacheEntryMeta> = if index_path.exists() {
            match fs::read_to_string(&index_path)
                .map_err(StorageError::from)
                .and_then(|raw| {
                    serde_json::from_str(&raw)
                        .map_err(|e| StorageError::Corrupted(e.to_string()))
                }) {
                Ok(index) => index,
                Err(e) => {
                    tracing::warn!(error = %e, "cache index unreadable, rebuilding from files");
                    HashMap::new()
                }
            }
        } else {
            HashMap::new()
        };

        // Drop entries whose audio file is gone.
        index.retain(|hex, _| dir.join(hex).is_file());

        // Adopt orphan files so they are reachable again.
        if let Ok(entries) = fs::read_dir(&dir) {
            let now = unix_now();
            for entry in entries.flatten() {
                let name = entry.file_name();
                let Some(name) = name.to_str() else { continue };
                if name == INDEX_FILE || Fingerprint::from_hex(name).is_none() {
                    continue;
                }
                if !index.contains_key(name) {
                    let bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
                    tracing::debug!(fingerprint = name, "adopting orphan cache file");
                    index.insert(
                        name.to_string(),
                        CacheEntryMeta {
                            text: String::new(),
                            sample_rate: walnut_core::SAMPLE_RATE,
                            created_at: now,
                            last_access: now,
                            access_count: 0,
                            bytes,
                        },
                    );
                }
            }
        }

        let cache = Self {
            dir,
            index: Mutex::new(index),
        };
        cache.persist_index()?;

        tracing::info!(entries = cache.len(), dir = %cache.dir.display(), "phrase cache opened");
        Ok(cache)
    }

    /// Look up a fingerprint, updating access metadata on hit.
    pub fn lookup(&self, fingerprint: &Fingerprint) -> Option<CachedPhrase> {
        let hex = fingerprint.hex();
        let sample_rate = {
            let mut index = self.index.lock();
            let entry = index.get_mut(&hex)?;
            entry.access_count += 1;
            entry.last_access = unix_now();
            entry.sample_rate
        };

        match fs::read(self.dir.join(&hex)) {
            Ok(bytes) => Some(CachedPhrase {
                samples: bytes_to_samples(&bytes),
                sample_rate,
            }),
            Err(e) => {
                // File vanished under us; heal the index.
                tracing::warn!(fingerprint = %hex, error = %e, "cached file missing, dropping entry");
                self.index.lock().remove(&hex);
                None
            }
        }
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.index.lock().contains_key(&fingerprint.hex())
    }

    /// Write-through store: temp file, rename, then index update.
    pub fn store(
        &self,
        fingerprint: &Fingerprint,
        samples: &[i16],
        sample_rate: u32,
        text: &str,
    ) -> Result<(), StorageError> {
        let hex = fingerprint.hex();
        let final_path = self.dir.join(&hex);
        let tmp_path = self.dir.join(format!("{hex}.tmp"));

        let bytes = samples_to_bytes(samples);
        fs::write(&tmp_path, &bytes)?;
        fs::rename(&tmp_path, &final_path)?;

        let now = unix_now();
        self.index.lock().insert(
            hex,
            CacheEntryMeta {
                text: text.to_string(),
                sample_rate,
                created_at: now,
                last_access: now,
                access_count: 0,
                bytes: bytes.len() as u64,
            },
        );
        self.persist_index()
    }

    /// Remove entries older than the given age. Zero days disables
    /// eviction. Returns the number of entries removed.
    pub fn evict(&self, older_than_days: u32) -> Result<usize, StorageError> {
        if older_than_days == 0 {
            return Ok(0);
        }

        let cutoff = unix_now().saturating_sub(u64::from(older_than_days) * 86_400);
        let expired: Vec<String> = {
            let index = self.index.lock();
            index
                .iter()
                .filter(|(_, meta)| meta.created_at < cutoff)
                .map(|(hex, _)| hex.clone())
                .collect()
        };

        for hex in &expired {
            let _ = fs::remove_file(self.dir.join(hex));
            self.index.lock().remove(hex);
        }

        if !expired.is_empty() {
            self.persist_index()?;
            tracing::info!(removed = expired.len(), "evicted expired cache entries");
        }
        Ok(expired.len())
    }

    pub fn len(&self) -> usize {
        self.index.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.lock().is_empty()
    }

    /// Flush index metadata to disk (access counts included).
    pub fn flush(&self) -> Result<(), StorageError> {
        self.persist_index()
    }

    fn persist_index(&self) -> Result<(), StorageError> {
        let serialized = {
            let index = self.index.lock();
            serde_json::to_string_pretty(&*index)
                .map_err(|e| StorageError::Corrupted(e.to_string()))?
        };
        let tmp = self.dir.join(format!("{INDEX_FILE}.tmp"));
        fs::write(&tmp, serialized)?;
        fs::rename(&tmp, self.dir.join(INDEX_FILE))?;
        Ok(())
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

fn bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}
