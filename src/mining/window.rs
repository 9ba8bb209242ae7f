//! Rolling mining window over the feedback log
//!
//! The cursor file holds `{"offset": n}`. Each run mines `chunk_size`
//! records starting at the offset; the cursor then advances by one chunk
//! and wraps to zero once the end of the log is reached.

use crate::error::Result;
use crate::persist::{read_json_opt, write_json_atomic};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Persisted cursor document
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiningCursor {
    #[serde(default)]
    pub offset: usize,
}

/// A slice of the feedback log selected for one mining run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSpan {
    pub offset: usize,
    pub limit: usize,
    /// Log size observed when the span was computed
    pub total: usize,
    /// Cursor value to persist once the run succeeds
    pub next_offset: usize,
}

impl WindowSpan {
    /// Exclusive end of the span, clamped to the log size
    pub fn end(&self) -> usize {
        (self.offset + self.limit).min(self.total)
    }
}

/// File-backed cursor; callers serialize access (see `RuleMiner`)
#[derive(Debug, Clone)]
pub struct MiningWindow {
    path: PathBuf,
    chunk_size: usize,
}

impl MiningWindow {
    pub fn new(path: impl Into<PathBuf>, chunk_size: usize) -> Self {
        Self {
            path: path.into(),
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Load the cursor; a missing or unreadable file means offset 0
    pub fn load(&self) -> MiningCursor {
        match read_json_opt::<MiningCursor>(&self.path) {
            Ok(Some(cursor)) => cursor,
            Ok(None) => MiningCursor::default(),
            Err(e) => {
                warn!(
                    "Ignoring unreadable mining cursor {}: {}",
                    self.path.display(),
                    e
                );
                MiningCursor::default()
            }
        }
    }

    /// Compute the span to mine for a log of `total` records
    pub fn span(&self, total: usize) -> WindowSpan {
        let mut offset = self.load().offset;
        if total == 0 {
            offset = 0;
        } else if offset >= total {
            warn!(
                "Mining cursor {} is beyond log size {}, restarting from 0",
                offset, total
            );
            offset = 0;
        }

        let mut next_offset = offset + self.chunk_size;
        if next_offset >= total {
            next_offset = 0;
        }

        WindowSpan {
            offset,
            limit: self.chunk_size,
            total,
            next_offset,
        }
    }

    /// Persist the cursor after a successful run over `span`
    pub fn commit(&self, span: &WindowSpan) -> Result<()> {
        write_json_atomic(
            &self.path,
            &MiningCursor {
                offset: span.next_offset,
            },
        )?;
        debug!(
            "Mining cursor advanced {} -> {}",
            span.offset, span.next_offset
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_advances_and_wraps() {
        let dir = TempDir::new().unwrap();
        let window = MiningWindow::new(dir.path().join("cursor.json"), 250);

        let span = window.span(600);
        assert_eq!((span.offset, span.end(), span.next_offset), (0, 250, 250));
        window.commit(&span).unwrap();

        let span = window.span(600);
        assert_eq!((span.offset, span.end(), span.next_offset), (250, 500, 500));
        window.commit(&span).unwrap();

        let span = window.span(600);
        assert_eq!((span.offset, span.end(), span.next_offset), (500, 600, 0));
        window.commit(&span).unwrap();

        assert_eq!(window.load().offset, 0);
    }

    #[test]
    fn test_exact_boundary_wraps() {
        let dir = TempDir::new().unwrap();
        let window = MiningWindow::new(dir.path().join("cursor.json"), 250);
        let span = window.span(250);
        assert_eq!(span.next_offset, 0);
    }

    #[test]
    fn test_offset_beyond_pruned_log_resets() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cursor.json");
        std::fs::write(&path, r#"{"offset": 4750}"#).unwrap();

        let window = MiningWindow::new(&path, 250);
        let span = window.span(1000);
        assert_eq!(span.offset, 0);
        assert_eq!(span.next_offset, 250);
    }

    #[test]
    fn test_empty_log_and_corrupt_cursor() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cursor.json");
        std::fs::write(&path, "not json").unwrap();

        let window = MiningWindow::new(&path, 250);
        assert_eq!(window.load(), MiningCursor::default());

        let span = window.span(0);
        assert_eq!((span.offset, span.end(), span.next_offset), (0, 0, 0));
    }
}
