//! Per-user recommendation session
//!
//! Tracks which items were already shown so repeated requests surface
//! something new, and holds the recommendation awaiting feedback.

use crate::types::CondSet;
use uuid::Uuid;

/// Recommendation waiting for the user's accept/reject
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRecommendation {
    pub conditions: CondSet,
    pub item: String,
}

/// Ephemeral session state owned by the caller
#[derive(Debug, Clone)]
pub struct RecommendationSession {
    id: Uuid,
    shown: Vec<String>,
    pending: Option<PendingRecommendation>,
}

impl Default for RecommendationSession {
    fn default() -> Self {
        Self::new()
    }
}

impl RecommendationSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            shown: Vec::new(),
            pending: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Items shown so far, in first-shown order
    pub fn shown(&self) -> &[String] {
        &self.shown
    }

    pub fn has_shown(&self, item: &str) -> bool {
        self.shown.iter().any(|s| s == item)
    }

    /// Record an item as shown; repeated items keep their first position
    pub fn record_shown(&mut self, item: &str) {
        if !self.has_shown(item) {
            self.shown.push(item.to_string());
        }
    }

    pub fn pending(&self) -> Option<&PendingRecommendation> {
        self.pending.as_ref()
    }

    pub fn set_pending(&mut self, pending: PendingRecommendation) {
        self.pending = Some(pending);
    }

    /// Take the pending recommendation, leaving none
    pub fn take_pending(&mut self) -> Option<PendingRecommendation> {
        self.pending.take()
    }

    /// Forget shown items and any pending recommendation
    pub fn reset(&mut self) {
        self.shown.clear();
        self.pending = None;
    }
}
