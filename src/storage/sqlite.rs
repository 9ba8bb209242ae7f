//! SQLite catalog and feedback store
//!
//! rusqlite connections are pooled with deadpool-sqlite; every statement
//! runs on the pool's blocking threads through `interact`.

use super::{CatalogProvider, FeedbackMaintenance, FeedbackStore};
use crate::error::{PlantwiseError, Result};
use crate::types::{clean_item_name, Attribute, CatalogItem, CondSet, FeedbackRecord, NewFeedback};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_sqlite::{Config, Pool, PoolConfig, Runtime};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tracing::{debug, info, warn};

/// Default connection pool size
const DEFAULT_POOL_SIZE: usize = 8;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS plants (
        plant_name TEXT PRIMARY KEY,
        description TEXT NOT NULL DEFAULT '',
        image_url TEXT
    );

    CREATE TABLE IF NOT EXISTS feedback (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        area_size TEXT,
        sunlight_need TEXT,
        environment_type TEXT,
        climate_type TEXT,
        watering_frequency TEXT,
        fertilizer_frequency TEXT,
        pesticide_frequency TEXT,
        has_pet TEXT,
        has_child TEXT,
        suggested_plant TEXT NOT NULL,
        user_feedback INTEGER NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_feedback_polarity ON feedback(user_feedback);
";

/// Column list shared by inserts and selects; attribute columns follow
/// [`Attribute::ALL`] order
const FEEDBACK_COLUMNS: &str = "id, area_size, sunlight_need, environment_type, climate_type, \
     watering_frequency, fertilizer_frequency, pesticide_frequency, has_pet, has_child, \
     suggested_plant, user_feedback, created_at";

/// SQLite-backed store with connection pooling
pub struct SqliteStore {
    pool: Pool,
}

impl SqliteStore {
    /// Open (or create) the database at `db_path` and ensure the schema exists
    pub async fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        Self::with_pool_size(db_path, DEFAULT_POOL_SIZE).await
    }

    /// Open with a custom pool size
    pub async fn with_pool_size<P: AsRef<Path>>(db_path: P, pool_size: usize) -> Result<Self> {
        let path = db_path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        info!(
            "Opening feedback database at {} (pool_size: {})",
            path.display(),
            pool_size
        );

        let mut config = Config::new(path);
        config.pool = Some(PoolConfig::new(pool_size));
        let pool = config.create_pool(Runtime::Tokio1).map_err(|e| {
            PlantwiseError::Database(format!("Failed to create connection pool: {}", e))
        })?;

        let store = Self { pool };
        store
            .interact(|conn| {
                // journal_mode returns the resulting mode as a row
                conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await?;
        debug!("Database schema ready");

        Ok(store)
    }

    /// Run `f` on a pooled connection
    async fn interact<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.pool.get().await.map_err(|e| {
            PlantwiseError::Database(format!("Failed to get connection from pool: {}", e))
        })?;

        conn.interact(f)
            .await
            .map_err(|e| PlantwiseError::Database(format!("Pool interaction failed: {}", e)))?
    }

    /// Insert or replace catalog items; names are trimmed and title-cased
    pub async fn import_items(&self, items: Vec<CatalogItem>) -> Result<usize> {
        let imported = self
            .interact(move |conn| {
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare(
                        "INSERT INTO plants (plant_name, description, image_url)
                         VALUES (?1, ?2, ?3)
                         ON CONFLICT(plant_name) DO UPDATE SET
                             description = excluded.description,
                             image_url = excluded.image_url",
                    )?;
                    for item in &items {
                        stmt.execute(params![
                            clean_item_name(&item.item_id),
                            item.description.trim(),
                            item.image_ref.as_deref(),
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(items.len())
            })
            .await?;

        info!("Imported {} catalog items", imported);
        Ok(imported)
    }

    /// Look up one catalog item by exact name
    pub async fn get_item(&self, name: &str) -> Result<Option<CatalogItem>> {
        let name = name.to_string();
        self.interact(move |conn| {
            let item = conn
                .query_row(
                    "SELECT plant_name, description, image_url FROM plants WHERE plant_name = ?1",
                    params![name],
                    |row| {
                        Ok(CatalogItem {
                            item_id: row.get(0)?,
                            description: row.get(1)?,
                            image_ref: row.get(2)?,
                        })
                    },
                )
                .optional()?;
            Ok(item)
        })
        .await
    }
}

/// Raw feedback row before validation
struct FeedbackRow {
    id: i64,
    values: Vec<Option<String>>,
    suggested_plant: String,
    user_feedback: i64,
    created_at: String,
}

impl FeedbackRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let mut values = Vec::with_capacity(Attribute::ALL.len());
        for i in 0..Attribute::ALL.len() {
            values.push(row.get(i + 1)?);
        }
        Ok(Self {
            id: row.get(0)?,
            values,
            suggested_plant: row.get(10)?,
            user_feedback: row.get(11)?,
            created_at: row.get(12)?,
        })
    }

    fn into_record(self) -> Result<FeedbackRecord> {
        let mut conditions = CondSet::new();
        for (attr, value) in Attribute::ALL.iter().zip(self.values) {
            if let Some(value) = value {
                conditions.insert(*attr, &value)?;
            }
        }

        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| {
                PlantwiseError::Database(format!(
                    "Invalid created_at '{}' for feedback {}: {}",
                    self.created_at, self.id, e
                ))
            })?
            .with_timezone(&Utc);

        Ok(FeedbackRecord {
            id: self.id,
            conditions,
            suggested_item: self.suggested_plant,
            accepted: self.user_feedback != 0,
            created_at,
        })
    }
}

fn query_feedback(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<FeedbackRecord>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, FeedbackRow::read)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    // A malformed row is skipped so one bad record cannot stall mining
    Ok(rows
        .into_iter()
        .filter_map(|row| {
            let id = row.id;
            match row.into_record() {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("Skipping feedback row {}: {}", id, e);
                    None
                }
            }
        })
        .collect())
}

#[async_trait]
impl CatalogProvider for SqliteStore {
    async fn load_items(&self) -> Result<Vec<CatalogItem>> {
        self.interact(|conn| {
            let mut stmt = conn.prepare(
                "SELECT plant_name, description, image_url FROM plants ORDER BY plant_name",
            )?;
            let items = stmt
                .query_map([], |row| {
                    Ok(CatalogItem {
                        item_id: row.get(0)?,
                        description: row.get(1)?,
                        image_ref: row.get(2)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(items)
        })
        .await
    }
}

#[async_trait]
impl FeedbackStore for SqliteStore {
    async fn append(&self, feedback: NewFeedback) -> Result<FeedbackRecord> {
        let created_at = Utc::now();
        let stamp = created_at.to_rfc3339();

        let record = self
            .interact(move |conn| {
                let values: Vec<Option<String>> = Attribute::ALL
                    .iter()
                    .map(|attr| feedback.conditions.get(*attr).map(str::to_string))
                    .collect();

                conn.execute(
                    "INSERT INTO feedback (area_size, sunlight_need, environment_type, climate_type,
                         watering_frequency, fertilizer_frequency, pesticide_frequency,
                         has_pet, has_child, suggested_plant, user_feedback, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                    params![
                        values[0],
                        values[1],
                        values[2],
                        values[3],
                        values[4],
                        values[5],
                        values[6],
                        values[7],
                        values[8],
                        feedback.suggested_item,
                        feedback.accepted as i64,
                        stamp,
                    ],
                )?;

                Ok(FeedbackRecord {
                    id: conn.last_insert_rowid(),
                    conditions: feedback.conditions,
                    suggested_item: feedback.suggested_item,
                    accepted: feedback.accepted,
                    created_at,
                })
            })
            .await?;

        debug!(
            "Stored feedback {} for '{}' (accepted: {})",
            record.id, record.suggested_item, record.accepted
        );
        Ok(record)
    }

    async fn count(&self, accepted: Option<bool>) -> Result<u64> {
        self.interact(move |conn| {
            let count: i64 = match accepted {
                Some(flag) => conn.query_row(
                    "SELECT COUNT(*) FROM feedback WHERE user_feedback = ?1",
                    params![flag as i64],
                    |row| row.get(0),
                )?,
                None => conn.query_row("SELECT COUNT(*) FROM feedback", [], |row| row.get(0))?,
            };
            Ok(count.max(0) as u64)
        })
        .await
    }

    async fn fetch_range(&self, offset: usize, limit: usize) -> Result<Vec<FeedbackRecord>> {
        let sql = format!(
            "SELECT {} FROM feedback ORDER BY id LIMIT ?1 OFFSET ?2",
            FEEDBACK_COLUMNS
        );
        self.interact(move |conn| query_feedback(conn, &sql, params![limit as i64, offset as i64]))
            .await
    }

    async fn fetch_all(&self) -> Result<Vec<FeedbackRecord>> {
        let sql = format!("SELECT {} FROM feedback ORDER BY id", FEEDBACK_COLUMNS);
        self.interact(move |conn| query_feedback(conn, &sql, [])).await
    }
}

#[async_trait]
impl FeedbackMaintenance for SqliteStore {
    async fn prune_to_latest(&self, keep: usize) -> Result<usize> {
        let removed = self
            .interact(move |conn| {
                let removed = conn.execute(
                    "DELETE FROM feedback WHERE id NOT IN (
                         SELECT id FROM feedback ORDER BY id DESC LIMIT ?1
                     )",
                    params![keep as i64],
                )?;
                Ok(removed)
            })
            .await?;

        info!("Pruned {} feedback records (kept newest {})", removed, keep);
        Ok(removed)
    }

    async fn balance_polarity(&self) -> Result<usize> {
        let removed = self
            .interact(|conn| {
                let tx = conn.transaction()?;
                let (positive, negative): (i64, i64) = tx.query_row(
                    "SELECT
                         COALESCE(SUM(CASE WHEN user_feedback = 1 THEN 1 ELSE 0 END), 0),
                         COALESCE(SUM(CASE WHEN user_feedback = 0 THEN 1 ELSE 0 END), 0)
                     FROM feedback",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )?;

                if positive == negative {
                    return Ok(0);
                }
                let majority = i64::from(positive > negative);
                let excess = (positive - negative).abs();

                let removed = tx.execute(
                    "DELETE FROM feedback WHERE id IN (
                         SELECT id FROM feedback WHERE user_feedback = ?1
                         ORDER BY RANDOM() LIMIT ?2
                     )",
                    params![majority, excess],
                )?;
                tx.commit()?;
                Ok(removed)
            })
            .await?;

        info!("Balanced feedback polarity, removed {} records", removed);
        Ok(removed)
    }
}
