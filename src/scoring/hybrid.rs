//! Hybrid scorer
//!
//! Combines the classifier's acceptance probability with rule confidence:
//!
//! ```text
//! hybrid = ml_weight * p(accept | user, item) + rule_weight * confidence
//! ```
//!
//! Scoring paths, in order:
//! 1. Rule candidates present in the catalog are scored with the hybrid formula
//! 2. Without usable candidates, every catalog item is scored by the model alone
//! 3. If nothing could be scored, no recommendation is possible

use super::model::{FeatureVector, FeedbackClassifier};
use super::session::RecommendationSession;
use crate::config::ScoringConfig;
use crate::engine::{Candidates, RuleEngine};
use crate::error::{PlantwiseError, Result};
use crate::types::{CatalogItem, CondSet};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// How the winning score was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringPath {
    /// Rule candidates scored with model + rule confidence
    Hybrid,
    /// Whole catalog scored with the model alone
    CatalogFallback,
}

impl std::fmt::Display for ScoringPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScoringPath::Hybrid => write!(f, "hybrid"),
            ScoringPath::CatalogFallback => write!(f, "catalog_fallback"),
        }
    }
}

/// A scored catalog item
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredItem {
    pub item: CatalogItem,
    pub score: f64,
}

/// Final recommendation returned to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    /// Item name in catalog spelling
    pub item: String,
    pub score: f64,
    pub path: ScoringPath,
    pub entry: CatalogItem,
}

/// Case-insensitive lookup over trimmed catalog names
struct CatalogIndex<'a> {
    by_name: HashMap<String, &'a CatalogItem>,
}

impl<'a> CatalogIndex<'a> {
    fn new(catalog: &'a [CatalogItem]) -> Self {
        let mut by_name = HashMap::with_capacity(catalog.len());
        for item in catalog {
            by_name.entry(catalog_key(&item.item_id)).or_insert(item);
        }
        Self { by_name }
    }

    fn get(&self, name: &str) -> Option<&'a CatalogItem> {
        self.by_name.get(&catalog_key(name)).copied()
    }
}

fn catalog_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Weighted model + rule scorer with session-aware selection
#[derive(Debug, Clone)]
pub struct HybridScorer {
    ml_weight: f64,
    rule_weight: f64,
    selection_pool: usize,
    model_attempts: u32,
}

impl Default for HybridScorer {
    fn default() -> Self {
        Self::new(&ScoringConfig::default())
    }
}

impl HybridScorer {
    pub fn new(config: &ScoringConfig) -> Self {
        Self {
            ml_weight: config.ml_weight,
            rule_weight: config.rule_weight,
            selection_pool: config.selection_pool.max(1),
            model_attempts: config.model_attempts.max(1),
        }
    }

    /// Score candidates, fall back to the catalog if needed, and pick one
    /// item not yet shown in `session`
    #[allow(clippy::too_many_arguments)]
    pub fn score_and_select<R: Rng + ?Sized>(
        &self,
        user: &CondSet,
        candidates: &Candidates,
        catalog: &[CatalogItem],
        model: &dyn FeedbackClassifier,
        engine: &RuleEngine,
        session: &mut RecommendationSession,
        rng: &mut R,
    ) -> Result<Recommendation> {
        let mut path = ScoringPath::Hybrid;
        let mut scored = match candidates {
            Candidates::Ranked(items) => self.hybrid_scores(user, items, catalog, model, engine),
            Candidates::Empty => Vec::new(),
        };

        if scored.is_empty() {
            if !candidates.is_empty() {
                info!("No rule candidate is in the catalog, scoring the full catalog");
            }
            path = ScoringPath::CatalogFallback;
            scored = self.fallback_scores(user, catalog, model);
        }

        let chosen = self.select(&scored, session, rng).ok_or_else(|| {
            PlantwiseError::NoRecommendationPossible(format!(
                "no item could be scored ({} candidates, {} catalog items)",
                candidates.len(),
                catalog.len()
            ))
        })?;

        debug!(
            "Selected '{}' (score {:.3}, path {})",
            chosen.item.item_id, chosen.score, path
        );

        Ok(Recommendation {
            item: chosen.item.item_id.clone(),
            score: chosen.score,
            path,
            entry: chosen.item,
        })
    }

    /// Hybrid scores for catalog-present candidates, best first
    pub fn hybrid_scores(
        &self,
        user: &CondSet,
        candidates: &[String],
        catalog: &[CatalogItem],
        model: &dyn FeedbackClassifier,
        engine: &RuleEngine,
    ) -> Vec<ScoredItem> {
        let index = CatalogIndex::new(catalog);
        let mut scored = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            let Some(ml) = self.predict_with_retry(model, user, candidate) else {
                continue;
            };
            let fp = engine
                .first_matching_confidence(candidate, user)
                .unwrap_or(0.0)
                .clamp(0.0, 1.0);
            let score = self.combine(ml, fp);

            match index.get(candidate) {
                Some(item) => scored.push(ScoredItem {
                    item: item.clone(),
                    score,
                }),
                None => debug!("Candidate '{}' is not in the catalog", candidate),
            }
        }

        sort_descending(&mut scored);
        scored
    }

    /// Model-only scores for every catalog item, best first
    pub fn fallback_scores(
        &self,
        user: &CondSet,
        catalog: &[CatalogItem],
        model: &dyn FeedbackClassifier,
    ) -> Vec<ScoredItem> {
        let mut scored: Vec<ScoredItem> = catalog
            .iter()
            .filter_map(|item| {
                self.predict_with_retry(model, user, &item.item_id)
                    .map(|score| ScoredItem {
                        item: item.clone(),
                        score,
                    })
            })
            .collect();
        sort_descending(&mut scored);
        scored
    }

    /// Weighted sum of model probability and rule confidence
    pub fn combine(&self, ml: f64, fp: f64) -> f64 {
        self.ml_weight * ml + self.rule_weight * fp
    }

    /// Highest-scoring item of the top pool not yet shown, else a random
    /// pool member; the pick is recorded in the session
    pub fn select<R: Rng + ?Sized>(
        &self,
        scored: &[ScoredItem],
        session: &mut RecommendationSession,
        rng: &mut R,
    ) -> Option<ScoredItem> {
        let pool = &scored[..scored.len().min(self.selection_pool)];

        let chosen = pool
            .iter()
            .find(|s| !session.has_shown(&s.item.item_id))
            .or_else(|| pool.choose(rng))?
            .clone();

        session.record_shown(&chosen.item.item_id);
        Some(chosen)
    }

    fn predict_with_retry(
        &self,
        model: &dyn FeedbackClassifier,
        user: &CondSet,
        item: &str,
    ) -> Option<f64> {
        let features = FeatureVector::new(user, item);
        for attempt in 1..=self.model_attempts {
            match model.predict_proba(&features) {
                Ok(p) if (0.0..=1.0).contains(&p) => return Some(p),
                Ok(p) => {
                    warn!("Model returned out-of-range probability {} for '{}'", p, item);
                    return None;
                }
                Err(e) => debug!(
                    "Model failed for '{}' (attempt {}/{}): {}",
                    item, attempt, self.model_attempts, e
                ),
            }
        }
        warn!(
            "Skipping '{}' after {} failed model attempts",
            item, self.model_attempts
        );
        None
    }
}

/// Stable sort, so ties keep candidate or catalog order
fn sort_descending(scored: &mut [ScoredItem]) {
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Attribute, KnowledgeBase, Polarity, Rule};
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Fixed per-item probabilities; unknown items fail
    #[derive(Debug)]
    struct TableModel {
        table: HashMap<String, f64>,
        calls: AtomicUsize,
    }

    impl TableModel {
        fn new(entries: &[(&str, f64)]) -> Self {
            Self {
                table: entries.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl FeedbackClassifier for TableModel {
        fn predict_proba(&self, features: &FeatureVector<'_>) -> Result<f64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.table
                .get(features.item)
                .copied()
                .ok_or_else(|| PlantwiseError::Scoring(format!("unknown {}", features.item)))
        }

        fn training_samples(&self) -> usize {
            0
        }
    }

    fn item(name: &str) -> CatalogItem {
        CatalogItem {
            item_id: name.to_string(),
            description: String::new(),
            image_ref: None,
        }
    }

    fn user() -> CondSet {
        CondSet::from_pairs([
            ("sunlight_need", "Bright indirect light"),
            ("environment_type", "Indoor"),
        ])
        .unwrap()
    }

    fn engine_with(rules: &[(&str, f64)]) -> RuleEngine {
        let mut kb = KnowledgeBase::default();
        for (name, confidence) in rules {
            kb.positive_rules.push(Rule {
                conditions: CondSet::new()
                    .with(Attribute::EnvironmentType, "Indoor")
                    .unwrap(),
                suggested_item: name.to_string(),
                polarity: Polarity::Positive,
                support: 0.1,
                confidence: *confidence,
                lift: 1.0,
            });
        }
        RuleEngine::new(Arc::new(kb))
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn test_snake_plant_hybrid_score() {
        let engine = engine_with(&[("Snake Plant", 0.8)]);
        let model = TableModel::new(&[("Snake Plant", 0.6)]);
        let catalog = vec![item("Snake Plant"), item("Fern")];
        let candidates = engine.get_candidates(&user(), 5);

        let mut session = RecommendationSession::new();
        let rec = HybridScorer::default()
            .score_and_select(&user(), &candidates, &catalog, &model, &engine, &mut session, &mut rng())
            .unwrap();

        assert_eq!(rec.item, "Snake Plant");
        assert_eq!(rec.path, ScoringPath::Hybrid);
        // 0.7 * 0.6 + 0.3 * 0.8
        assert!((rec.score - 0.66).abs() < 1e-9);
        assert!(session.has_shown("Snake Plant"));
    }

    #[test]
    fn test_empty_candidates_score_full_catalog() {
        let engine = engine_with(&[]);
        let model = TableModel::new(&[("Fern", 0.2), ("Pothos", 0.9), ("Cactus", 0.4)]);
        let catalog = vec![item("Fern"), item("Pothos"), item("Cactus")];

        let mut session = RecommendationSession::new();
        let rec = HybridScorer::default()
            .score_and_select(
                &user(),
                &Candidates::Empty,
                &catalog,
                &model,
                &engine,
                &mut session,
                &mut rng(),
            )
            .unwrap();

        assert_eq!(rec.item, "Pothos");
        assert_eq!(rec.path, ScoringPath::CatalogFallback);
        assert_eq!(model.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_candidates_missing_from_catalog_fall_back() {
        let engine = engine_with(&[("Ghost Orchid", 0.9)]);
        let model = TableModel::new(&[("Ghost Orchid", 0.9), ("Fern", 0.3)]);
        let catalog = vec![item("Fern")];
        let candidates = engine.get_candidates(&user(), 5);

        let mut session = RecommendationSession::new();
        let rec = HybridScorer::default()
            .score_and_select(&user(), &candidates, &catalog, &model, &engine, &mut session, &mut rng())
            .unwrap();
        assert_eq!(rec.item, "Fern");
        assert_eq!(rec.path, ScoringPath::CatalogFallback);
    }

    #[test]
    fn test_catalog_lookup_case_insensitive() {
        let engine = engine_with(&[("snake plant ", 0.5)]);
        let model = TableModel::new(&[("snake plant ", 0.5)]);
        let catalog = vec![item("Snake Plant")];
        let candidates = engine.get_candidates(&user(), 5);

        let mut session = RecommendationSession::new();
        let rec = HybridScorer::default()
            .score_and_select(&user(), &candidates, &catalog, &model, &engine, &mut session, &mut rng())
            .unwrap();
        assert_eq!(rec.item, "Snake Plant");
        assert_eq!(rec.path, ScoringPath::Hybrid);
    }

    #[test]
    fn test_nothing_scored_is_error() {
        let engine = engine_with(&[]);
        let model = TableModel::new(&[]);
        let catalog = vec![item("Fern")];

        let mut session = RecommendationSession::new();
        let result = HybridScorer::default().score_and_select(
            &user(),
            &Candidates::Empty,
            &catalog,
            &model,
            &engine,
            &mut session,
            &mut rng(),
        );
        assert!(matches!(
            result,
            Err(PlantwiseError::NoRecommendationPossible(_))
        ));
        // Each item is attempted model_attempts times
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_session_avoids_repeats() {
        let engine = engine_with(&[]);
        let model = TableModel::new(&[("A", 0.9), ("B", 0.8), ("C", 0.7)]);
        let catalog = vec![item("A"), item("B"), item("C")];
        let scorer = HybridScorer::default();
        let mut session = RecommendationSession::new();
        let mut rng = rng();

        let mut picks = Vec::new();
        for _ in 0..3 {
            let rec = scorer
                .score_and_select(
                    &user(),
                    &Candidates::Empty,
                    &catalog,
                    &model,
                    &engine,
                    &mut session,
                    &mut rng,
                )
                .unwrap();
            picks.push(rec.item);
        }
        assert_eq!(picks, vec!["A", "B", "C"]);

        // All shown: random pick from the pool, still a catalog item
        let rec = scorer
            .score_and_select(
                &user(),
                &Candidates::Empty,
                &catalog,
                &model,
                &engine,
                &mut session,
                &mut rng,
            )
            .unwrap();
        assert!(["A", "B", "C"].contains(&rec.item.as_str()));
        assert_eq!(session.shown().len(), 3);
    }

    #[test]
    fn test_selection_pool_caps_at_five() {
        let names = ["A", "B", "C", "D", "E", "F", "G"];
        let scored: Vec<ScoredItem> = names
            .iter()
            .enumerate()
            .map(|(i, name)| ScoredItem {
                item: item(name),
                score: 0.9 - i as f64 * 0.1,
            })
            .collect();
        let scorer = HybridScorer::default();
        let mut session = RecommendationSession::new();
        let mut rng = rng();

        let mut picks = Vec::new();
        for _ in 0..5 {
            let chosen = scorer.select(&scored, &mut session, &mut rng).unwrap();
            picks.push(chosen.item.item_id);
        }
        assert_eq!(picks, vec!["A", "B", "C", "D", "E"]);

        // Pool exhausted: repeats stay inside the top five, F and G never appear
        for _ in 0..50 {
            let chosen = scorer.select(&scored, &mut session, &mut rng).unwrap();
            assert!(picks.contains(&chosen.item.item_id));
        }
        assert!(!session.has_shown("F"));
        assert!(!session.has_shown("G"));
        assert_eq!(session.shown().len(), 5);
    }

    proptest! {
        #[test]
        fn prop_hybrid_score_bounded(ml in 0.0f64..=1.0, fp in 0.0f64..=1.0, w in 0.0f64..=1.0) {
            let scorer = HybridScorer::new(&ScoringConfig {
                ml_weight: w,
                rule_weight: 1.0 - w,
                ..ScoringConfig::default()
            });
            let score = scorer.combine(ml, fp);
            prop_assert!(score >= -1e-12 && score <= 1.0 + 1e-12);
        }
    }
}
