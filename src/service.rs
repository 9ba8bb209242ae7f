//! Recommender facade
//!
//! Wires the catalog, feedback log, knowledge base, model and retrain
//! orchestrator together behind two calls: [`Recommender::recommend`] and
//! [`Recommender::submit_feedback`].

use crate::config::RecommenderConfig;
use crate::engine::RuleEngine;
use crate::error::{PlantwiseError, Result};
use crate::kb::KnowledgeBaseStore;
use crate::mining::RuleMiner;
use crate::retrain::{standard_orchestrator, PipelineRun, RetrainOrchestrator, RetrainOutcome};
use crate::scoring::{
    HybridScorer, ModelHandle, PendingRecommendation, Recommendation, RecommendationSession,
};
use crate::storage::{CatalogProvider, FeedbackStore, SqliteStore};
use crate::types::{CondSet, NewFeedback};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Result of recording one feedback
#[derive(Debug, Clone)]
pub struct FeedbackOutcome {
    pub record_id: i64,
    /// `None` for rejections, or when the retrain check itself failed
    pub retrain: Option<RetrainOutcome>,
}

/// Entry point for recommendation and feedback
pub struct Recommender {
    config: RecommenderConfig,
    catalog: Arc<dyn CatalogProvider>,
    feedback: Arc<dyn FeedbackStore>,
    kb: Arc<KnowledgeBaseStore>,
    model: Arc<ModelHandle>,
    miner: Arc<RuleMiner>,
    scorer: HybridScorer,
    retrain: RetrainOrchestrator,
    rng: Mutex<StdRng>,
}

impl Recommender {
    /// Build from explicit collaborators; KB, model and miner state live at
    /// the configured paths
    pub fn new(
        config: RecommenderConfig,
        catalog: Arc<dyn CatalogProvider>,
        feedback: Arc<dyn FeedbackStore>,
    ) -> Result<Self> {
        config.validate()?;
        let paths = &config.paths;

        let kb = Arc::new(KnowledgeBaseStore::with_attempts(
            paths.knowledge_base_path(),
            config.kb.max_write_attempts,
        )?);
        let model = Arc::new(ModelHandle::load_or_untrained(&paths.model_path())?);
        let miner = Arc::new(RuleMiner::new(
            &config.mining,
            paths.mining_cursor_path(),
            paths.parsed_rules_path(),
        ));
        let retrain = standard_orchestrator(
            &config,
            Arc::clone(&feedback),
            Arc::clone(&model),
            Arc::clone(&miner),
            Arc::clone(&kb),
        );

        let kb_snapshot = kb.snapshot();
        info!(
            "Recommender ready: {} positive / {} negative rules, model trained on {} records",
            kb_snapshot.positive_rules.len(),
            kb_snapshot.negative_rules.len(),
            model.current().training_samples()
        );

        Ok(Self {
            scorer: HybridScorer::new(&config.scoring),
            config,
            catalog,
            feedback,
            kb,
            model,
            miner,
            retrain,
            rng: Mutex::new(StdRng::from_entropy()),
        })
    }

    /// Open the SQLite store at the configured path and build on it
    pub async fn open(config: RecommenderConfig) -> Result<(Self, Arc<SqliteStore>)> {
        let store = Arc::new(SqliteStore::open(config.paths.database_path()).await?);
        let recommender = Self::new(config, store.clone(), store.clone())?;
        Ok((recommender, store))
    }

    /// Make selection among fully-shown pools reproducible
    pub fn with_seed(self, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..self
        }
    }

    pub fn config(&self) -> &RecommenderConfig {
        &self.config
    }

    pub fn knowledge_base(&self) -> &Arc<KnowledgeBaseStore> {
        &self.kb
    }

    pub fn model(&self) -> &Arc<ModelHandle> {
        &self.model
    }

    pub fn miner(&self) -> &Arc<RuleMiner> {
        &self.miner
    }

    pub fn orchestrator(&self) -> &RetrainOrchestrator {
        &self.retrain
    }

    /// Recommend one catalog item for `user`, avoiding items already shown
    /// in `session`
    pub async fn recommend(
        &self,
        session: &mut RecommendationSession,
        user: &CondSet,
    ) -> Result<Recommendation> {
        let catalog = self
            .catalog
            .load_items()
            .await
            .map_err(|e| PlantwiseError::DataUnavailable(format!("catalog: {}", e)))?;
        if catalog.is_empty() {
            return Err(PlantwiseError::DataUnavailable(
                "catalog is empty".to_string(),
            ));
        }
        if !user.is_complete() {
            debug!("Recommending with missing attributes: {:?}", user.missing());
        }

        let engine = RuleEngine::new(self.kb.snapshot());
        let candidates = engine.get_candidates(user, self.config.scoring.candidate_count);
        debug!("Rule engine returned {} candidates", candidates.len());

        let model = self.model.current();
        let recommendation = {
            let mut rng = match self.rng.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            self.scorer.score_and_select(
                user,
                &candidates,
                &catalog,
                model.as_ref(),
                &engine,
                session,
                &mut *rng,
            )?
        };

        session.set_pending(PendingRecommendation {
            conditions: user.clone(),
            item: recommendation.item.clone(),
        });
        info!(
            "Recommended '{}' (score {:.3}, {})",
            recommendation.item, recommendation.score, recommendation.path
        );
        Ok(recommendation)
    }

    /// Record the user's verdict on the pending recommendation
    ///
    /// Retrain problems are logged and reported in the outcome; they never
    /// fail the submission.
    pub async fn submit_feedback(
        &self,
        session: &mut RecommendationSession,
        accepted: bool,
    ) -> Result<FeedbackOutcome> {
        let pending = session.take_pending().ok_or_else(|| {
            PlantwiseError::InvalidOperation("no pending recommendation to rate".to_string())
        })?;

        let feedback = NewFeedback {
            conditions: pending.conditions.clone(),
            suggested_item: pending.item.clone(),
            accepted,
        };
        let record = match self.feedback.append(feedback).await {
            Ok(record) => record,
            Err(e) => {
                // Keep the recommendation rateable
                session.set_pending(pending);
                return Err(PlantwiseError::DataUnavailable(format!(
                    "feedback store: {}",
                    e
                )));
            }
        };
        info!(
            "Feedback {} recorded for '{}' ({})",
            record.id,
            record.suggested_item,
            if accepted { "accepted" } else { "rejected" }
        );

        let retrain = if accepted {
            match self.retrain.on_feedback_accepted().await {
                Ok(outcome) => {
                    if let RetrainOutcome::Completed(run) = &outcome {
                        if let Some(e) = run.error() {
                            warn!("Retrain failed, keeping previous model and KB: {}", e);
                        }
                    }
                    Some(outcome)
                }
                Err(e) => {
                    warn!("Retrain check failed: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Ok(FeedbackOutcome {
            record_id: record.id,
            retrain,
        })
    }

    /// Run the retrain pipeline now, regardless of the feedback count
    pub async fn retrain_now(&self) -> PipelineRun {
        self.retrain.run_now().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PathsConfig, RetrainMode};
    use crate::retrain::StageStatus;
    use crate::storage::MemoryStore;
    use crate::types::{CatalogItem, KnowledgeBase, Polarity, Rule};
    use tempfile::TempDir;

    fn item(name: &str) -> CatalogItem {
        CatalogItem {
            item_id: name.to_string(),
            description: format!("{} description", name),
            image_ref: None,
        }
    }

    fn config(dir: &TempDir) -> RecommenderConfig {
        let mut config = RecommenderConfig {
            paths: PathsConfig::in_dir(dir.path()),
            ..RecommenderConfig::default()
        };
        config.retrain.mode = RetrainMode::Blocking;
        config
    }

    fn user() -> CondSet {
        CondSet::from_pairs([("environment_type", "Indoor"), ("has_pet", "Yes")]).unwrap()
    }

    #[tokio::test]
    async fn test_empty_catalog_is_data_unavailable() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let recommender = Recommender::new(config(&dir), store.clone(), store).unwrap();

        let mut session = RecommendationSession::new();
        let err = recommender.recommend(&mut session, &user()).await.unwrap_err();
        assert!(matches!(err, PlantwiseError::DataUnavailable(_)));
        assert!(session.pending().is_none());
    }

    #[tokio::test]
    async fn test_feedback_requires_pending() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::with_catalog(vec![item("Fern")]));
        let recommender = Recommender::new(config(&dir), store.clone(), store).unwrap();

        let mut session = RecommendationSession::new();
        let err = recommender
            .submit_feedback(&mut session, true)
            .await
            .unwrap_err();
        assert!(matches!(err, PlantwiseError::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn test_rule_candidate_is_recommended() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir);
        let kb = KnowledgeBase {
            positive_rules: vec![Rule {
                conditions: CondSet::from_pairs([("environment_type", "Indoor")]).unwrap(),
                suggested_item: "Snake Plant".to_string(),
                polarity: Polarity::Positive,
                support: 0.2,
                confidence: 0.8,
                lift: 1.5,
            }],
            negative_rules: Vec::new(),
        };
        crate::persist::write_json_atomic(&cfg.paths.knowledge_base_path(), &kb).unwrap();

        let store = Arc::new(MemoryStore::with_catalog(vec![
            item("Fern"),
            item("Snake Plant"),
        ]));
        let recommender = Recommender::new(cfg, store.clone(), store).unwrap();

        let mut session = RecommendationSession::new();
        let rec = recommender.recommend(&mut session, &user()).await.unwrap();
        assert_eq!(rec.item, "Snake Plant");
        // Untrained model: 0.7 * 0.5 + 0.3 * 0.8
        assert!((rec.score - 0.59).abs() < 1e-9);
        assert_eq!(session.pending().map(|p| p.item.as_str()), Some("Snake Plant"));
    }

    #[tokio::test]
    async fn test_third_acceptance_retrains() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::with_catalog(vec![
            item("Fern"),
            item("Pothos"),
            item("Cactus"),
        ]));
        let recommender = Recommender::new(config(&dir), store.clone(), store.clone())
            .unwrap()
            .with_seed(7);

        let mut session = RecommendationSession::new();
        let mut outcomes = Vec::new();
        for _ in 0..3 {
            recommender.recommend(&mut session, &user()).await.unwrap();
            outcomes.push(recommender.submit_feedback(&mut session, true).await.unwrap());
        }

        assert!(matches!(
            outcomes[1].retrain,
            Some(RetrainOutcome::NotDue { accepted: 2 })
        ));
        match &outcomes[2].retrain {
            Some(RetrainOutcome::Completed(run)) => {
                assert!(run
                    .stages
                    .iter()
                    .all(|s| s.status == StageStatus::Succeeded));
            }
            other => panic!("expected a completed retrain, got {:?}", other),
        }
        assert_eq!(recommender.model().current().training_samples(), 3);
        assert!(!recommender.knowledge_base().snapshot().positive_rules.is_empty());
        assert_eq!(store.count(Some(true)).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_rejection_does_not_trigger_retrain() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::with_catalog(vec![item("Fern")]));
        let recommender = Recommender::new(config(&dir), store.clone(), store).unwrap();

        let mut session = RecommendationSession::new();
        recommender.recommend(&mut session, &user()).await.unwrap();
        let outcome = recommender.submit_feedback(&mut session, false).await.unwrap();
        assert!(outcome.retrain.is_none());
        assert!(session.pending().is_none());
    }
}
