//! Feedback CSV exports as mining input
//!
//! Columns are matched by header name: one per attribute, `suggested_plant`
//! and `user_feedback`, plus optional `id` and `created_at`. Rows that fail
//! validation are skipped with a warning.

use crate::error::{PlantwiseError, Result};
use crate::types::{Attribute, CondSet, FeedbackRecord};
use chrono::{DateTime, Utc};
use csv::StringRecord;
use std::path::Path;
use tracing::{info, warn};

/// Header positions resolved once per file
struct Columns {
    attributes: Vec<(Attribute, usize)>,
    item: usize,
    feedback: usize,
    id: Option<usize>,
    created_at: Option<usize>,
}

impl Columns {
    fn resolve(headers: &StringRecord) -> Result<Self> {
        let find = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(name))
        };
        let require = |name: &str| {
            find(name).ok_or_else(|| {
                PlantwiseError::DataUnavailable(format!(
                    "Feedback CSV has no '{}' column (found {:?})",
                    name,
                    headers.iter().collect::<Vec<_>>()
                ))
            })
        };

        Ok(Self {
            attributes: Attribute::ALL
                .iter()
                .filter_map(|attr| find(attr.as_str()).map(|i| (*attr, i)))
                .collect(),
            item: require("suggested_plant")?,
            feedback: require("user_feedback")?,
            id: find("id"),
            created_at: find("created_at"),
        })
    }

    fn record(&self, row: &StringRecord, line: i64) -> Result<FeedbackRecord> {
        let field = |i: usize| row.get(i).map(str::trim).unwrap_or("");

        let mut conditions = CondSet::new();
        for (attr, i) in &self.attributes {
            let value = field(*i);
            if !value.is_empty() {
                conditions.insert(*attr, value)?;
            }
        }

        let suggested_item = field(self.item);
        if suggested_item.is_empty() {
            return Err(PlantwiseError::Normalization(
                "empty suggested_plant".to_string(),
            ));
        }

        let accepted = match field(self.feedback).to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => true,
            "0" | "false" | "no" => false,
            other => {
                return Err(PlantwiseError::Normalization(format!(
                    "user_feedback '{}' is not 0/1",
                    other
                )))
            }
        };

        let id = match self.id.map(field).filter(|v| !v.is_empty()) {
            Some(raw) => raw
                .parse()
                .map_err(|_| PlantwiseError::Normalization(format!("id '{}' is not an integer", raw)))?,
            None => line,
        };

        let created_at = match self.created_at.map(field).filter(|v| !v.is_empty()) {
            Some(raw) => DateTime::parse_from_rfc3339(raw)
                .map_err(|e| PlantwiseError::Normalization(format!("created_at '{}': {}", raw, e)))?
                .with_timezone(&Utc),
            None => Utc::now(),
        };

        Ok(FeedbackRecord {
            id,
            conditions,
            suggested_item: suggested_item.to_string(),
            accepted,
            created_at,
        })
    }
}

/// Read a feedback CSV export
pub fn read_feedback_csv<P: AsRef<Path>>(path: P) -> Result<Vec<FeedbackRecord>> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| {
            PlantwiseError::DataUnavailable(format!(
                "Failed to open feedback CSV {}: {}",
                path.display(),
                e
            ))
        })?;

    let headers = reader
        .headers()
        .map_err(|e| PlantwiseError::DataUnavailable(format!("Failed to read CSV headers: {}", e)))?
        .clone();
    let columns = Columns::resolve(&headers)?;

    let mut records = Vec::new();
    let mut skipped = 0usize;
    for (index, row) in reader.records().enumerate() {
        let line = index as i64 + 2;
        let parsed = row
            .map_err(|e| PlantwiseError::Normalization(e.to_string()))
            .and_then(|row| columns.record(&row, line));
        match parsed {
            Ok(record) => records.push(record),
            Err(e) => {
                warn!("Skipping CSV line {}: {}", line, e);
                skipped += 1;
            }
        }
    }

    info!(
        "Loaded {} feedback records from {} ({} skipped)",
        records.len(),
        path.display(),
        skipped
    );
    Ok(records)
}
