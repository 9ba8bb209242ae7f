//! In-memory catalog and feedback store

use super::{CatalogProvider, FeedbackMaintenance, FeedbackStore};
use crate::error::Result;
use crate::types::{clean_item_name, CatalogItem, FeedbackRecord, NewFeedback};
use async_trait::async_trait;
use chrono::Utc;
use rand::seq::index::sample;
use std::collections::HashSet;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Default)]
struct Inner {
    catalog: Vec<CatalogItem>,
    feedback: Vec<FeedbackRecord>,
    next_id: i64,
}

/// Volatile store implementing every storage trait
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with catalog items (names are not cleaned)
    pub fn with_catalog(items: Vec<CatalogItem>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                catalog: items,
                ..Inner::default()
            }),
        }
    }

    /// Insert or replace catalog items, cleaning their names
    pub async fn import_items(&self, items: Vec<CatalogItem>) -> Result<usize> {
        let mut inner = self.inner.write().await;
        let mut imported = 0;
        for mut item in items {
            item.item_id = clean_item_name(&item.item_id);
            match inner
                .catalog
                .iter_mut()
                .find(|existing| existing.item_id == item.item_id)
            {
                Some(existing) => *existing = item,
                None => inner.catalog.push(item),
            }
            imported += 1;
        }
        Ok(imported)
    }
}

#[async_trait]
impl CatalogProvider for MemoryStore {
    async fn load_items(&self) -> Result<Vec<CatalogItem>> {
        Ok(self.inner.read().await.catalog.clone())
    }
}

#[async_trait]
impl FeedbackStore for MemoryStore {
    async fn append(&self, feedback: NewFeedback) -> Result<FeedbackRecord> {
        let mut inner = self.inner.write().await;
        inner.next_id += 1;
        let record = FeedbackRecord {
            id: inner.next_id,
            conditions: feedback.conditions,
            suggested_item: feedback.suggested_item,
            accepted: feedback.accepted,
            created_at: Utc::now(),
        };
        inner.feedback.push(record.clone());
        Ok(record)
    }

    async fn count(&self, accepted: Option<bool>) -> Result<u64> {
        let inner = self.inner.read().await;
        let count = match accepted {
            Some(flag) => inner.feedback.iter().filter(|r| r.accepted == flag).count(),
            None => inner.feedback.len(),
        };
        Ok(count as u64)
    }

    async fn fetch_range(&self, offset: usize, limit: usize) -> Result<Vec<FeedbackRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .feedback
            .iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn fetch_all(&self) -> Result<Vec<FeedbackRecord>> {
        Ok(self.inner.read().await.feedback.clone())
    }
}

#[async_trait]
impl FeedbackMaintenance for MemoryStore {
    async fn prune_to_latest(&self, keep: usize) -> Result<usize> {
        let mut inner = self.inner.write().await;
        let excess = inner.feedback.len().saturating_sub(keep);
        inner.feedback.drain(..excess);
        debug!("Pruned {} feedback records", excess);
        Ok(excess)
    }

    async fn balance_polarity(&self) -> Result<usize> {
        let mut inner = self.inner.write().await;

        let positive = inner.feedback.iter().filter(|r| r.accepted).count();
        let negative = inner.feedback.len() - positive;
        if positive == negative {
            return Ok(0);
        }

        let majority = positive > negative;
        let excess = positive.abs_diff(negative);
        let candidates: Vec<i64> = inner
            .feedback
            .iter()
            .filter(|r| r.accepted == majority)
            .map(|r| r.id)
            .collect();

        let doomed: HashSet<i64> = {
            let mut rng = rand::thread_rng();
            sample(&mut rng, candidates.len(), excess)
                .into_iter()
                .map(|i| candidates[i])
                .collect()
        };
        inner.feedback.retain(|r| !doomed.contains(&r.id));

        debug!("Balanced feedback polarity, removed {} records", doomed.len());
        Ok(doomed.len())
    }
}
