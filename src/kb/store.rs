//! Knowledge base repository
//!
//! Single point of access to the KB file. Readers take immutable
//! `Arc<KnowledgeBase>` snapshots; writers are serialized by an async mutex
//! and guarded against external writers with a content-digest
//! compare-and-swap.

use crate::error::{PlantwiseError, Result};
use crate::persist::write_json_atomic;
use crate::types::KnowledgeBase;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Default compare-and-swap attempts per update
pub const DEFAULT_WRITE_ATTEMPTS: u32 = 3;

/// On-disk state observed at the start of a read-modify-write cycle
struct DiskState {
    kb: KnowledgeBase,
    digest: Option<String>,
}

/// File-backed knowledge base with snapshot reads and CAS writes
pub struct KnowledgeBaseStore {
    path: PathBuf,
    snapshot: RwLock<Arc<KnowledgeBase>>,
    writer: Mutex<()>,
    max_attempts: u32,
}

impl KnowledgeBaseStore {
    /// Open the store, loading the current file (a missing file is an empty KB)
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        Self::with_attempts(path, DEFAULT_WRITE_ATTEMPTS)
    }

    /// Open with a custom number of compare-and-swap attempts
    pub fn with_attempts(path: impl Into<PathBuf>, max_attempts: u32) -> Result<Self> {
        let path = path.into();
        let state = read_disk_state(&path)?;
        info!(
            "Loaded knowledge base from {} ({} positive, {} negative)",
            path.display(),
            state.kb.positive_rules.len(),
            state.kb.negative_rules.len()
        );

        Ok(Self {
            path,
            snapshot: RwLock::new(Arc::new(state.kb)),
            writer: Mutex::new(()),
            max_attempts: max_attempts.max(1),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current immutable snapshot
    pub fn snapshot(&self) -> Arc<KnowledgeBase> {
        match self.snapshot.read() {
            Ok(guard) => Arc::clone(&*guard),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    /// Re-read the file, picking up changes made by other processes
    pub fn reload(&self) -> Result<Arc<KnowledgeBase>> {
        let state = read_disk_state(&self.path)?;
        let kb = Arc::new(state.kb);
        self.publish(Arc::clone(&kb));
        Ok(kb)
    }

    /// Read-modify-write the KB
    ///
    /// `apply` runs against a private copy of the on-disk content. If the
    /// file changed between the read and the write, the cycle is retried on
    /// the fresh content; after `max_attempts` conflicts the update fails
    /// with [`PlantwiseError::KbConflict`] and nothing is written.
    pub async fn update<F, T>(&self, mut apply: F) -> Result<T>
    where
        F: FnMut(&mut KnowledgeBase) -> Result<T>,
    {
        let _guard = self.writer.lock().await;

        for attempt in 1..=self.max_attempts {
            let DiskState {
                mut kb,
                digest: observed,
            } = read_disk_state(&self.path)?;
            let outcome = apply(&mut kb)?;

            let current = file_digest(&self.path)?;
            if current != observed {
                warn!(
                    "Knowledge base {} changed during update (attempt {}/{}), retrying",
                    self.path.display(),
                    attempt,
                    self.max_attempts
                );
                continue;
            }

            write_json_atomic(&self.path, &kb)?;
            debug!("Knowledge base written to {}", self.path.display());
            self.publish(Arc::new(kb));
            return Ok(outcome);
        }

        Err(PlantwiseError::KbConflict(format!(
            "{} kept changing after {} attempts",
            self.path.display(),
            self.max_attempts
        )))
    }

    fn publish(&self, kb: Arc<KnowledgeBase>) {
        match self.snapshot.write() {
            Ok(mut guard) => *guard = kb,
            Err(poisoned) => *poisoned.into_inner() = kb,
        }
    }
}

fn read_disk_state(path: &Path) -> Result<DiskState> {
    match std::fs::read(path) {
        Ok(bytes) => {
            let kb: KnowledgeBase = serde_json::from_slice(&bytes)?;
            Ok(DiskState {
                kb,
                digest: Some(digest(&bytes)),
            })
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DiskState {
            kb: KnowledgeBase::default(),
            digest: None,
        }),
        Err(e) => Err(e.into()),
    }
}

fn file_digest(path: &Path) -> Result<Option<String>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(digest(&bytes))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn digest(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Attribute, CondSet, Polarity, Rule};
    use tempfile::TempDir;

    fn rule(item: &str) -> Rule {
        Rule {
            conditions: CondSet::new().with(Attribute::HasPet, "Yes").unwrap(),
            suggested_item: item.to_string(),
            polarity: Polarity::Positive,
            support: 0.1,
            confidence: 0.5,
            lift: 1.2,
        }
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = KnowledgeBaseStore::open(dir.path().join("kb.json")).unwrap();
        assert!(store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_update_persists_and_publishes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kb.json");
        let store = KnowledgeBaseStore::open(&path).unwrap();

        let before = store.snapshot();
        store
            .update(|kb| {
                kb.positive_rules.push(rule("Pothos"));
                Ok(())
            })
            .await
            .unwrap();

        // Old snapshot is untouched
        assert!(before.is_empty());
        assert_eq!(store.snapshot().positive_rules.len(), 1);

        let reopened = KnowledgeBaseStore::open(&path).unwrap();
        assert_eq!(reopened.snapshot().positive_rules[0].suggested_item, "Pothos");
    }

    #[tokio::test]
    async fn test_external_write_is_retried() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kb.json");
        let store = KnowledgeBaseStore::open(&path).unwrap();

        let mut calls = 0;
        let external = path.clone();
        store
            .update(|kb| {
                calls += 1;
                if calls == 1 {
                    // Simulate another process writing mid-cycle
                    let mut other = KnowledgeBase::default();
                    other.positive_rules.push(rule("Fern"));
                    write_json_atomic(&external, &other)?;
                }
                kb.positive_rules.push(rule("Pothos"));
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(calls, 2);
        let items: Vec<_> = store
            .snapshot()
            .positive_rules
            .iter()
            .map(|r| r.suggested_item.clone())
            .collect();
        assert_eq!(items, vec!["Fern", "Pothos"]);
    }

    #[tokio::test]
    async fn test_persistent_conflict_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kb.json");
        let store = KnowledgeBaseStore::with_attempts(&path, 2).unwrap();

        let external = path.clone();
        let mut n = 0;
        let result = store
            .update(|kb| {
                n += 1;
                let mut other = KnowledgeBase::default();
                for _ in 0..n {
                    other.negative_rules.push(rule("Cactus"));
                }
                write_json_atomic(&external, &other)?;
                kb.positive_rules.push(rule("Pothos"));
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(PlantwiseError::KbConflict(_))));
        assert!(store.snapshot().is_empty());
    }
}
