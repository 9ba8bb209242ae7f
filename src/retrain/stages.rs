//! Concrete retrain stages: model refit, rule mining, KB merge

use super::pipeline::{RetrainStage, StageError, StageReport};
use crate::error::PlantwiseError;
use crate::kb::{KbUpdater, KnowledgeBaseStore};
use crate::mining::RuleMiner;
use crate::scoring::{FeedbackClassifier, ModelHandle, NaiveBayesClassifier};
use crate::storage::FeedbackStore;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

pub const MODEL_STAGE: &str = "model_retrain";
pub const MINING_STAGE: &str = "rule_mining";
pub const KB_MERGE_STAGE: &str = "kb_merge";

/// Refit the classifier on the full feedback log and publish it
pub struct ModelRetrainStage {
    feedback: Arc<dyn FeedbackStore>,
    model: Arc<ModelHandle>,
    model_path: PathBuf,
}

impl ModelRetrainStage {
    pub fn new(
        feedback: Arc<dyn FeedbackStore>,
        model: Arc<ModelHandle>,
        model_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            feedback,
            model,
            model_path: model_path.into(),
        }
    }
}

#[async_trait]
impl RetrainStage for ModelRetrainStage {
    fn name(&self) -> &str {
        MODEL_STAGE
    }

    async fn run(&self) -> Result<StageReport, StageError> {
        let start = Instant::now();
        let records = self.feedback.fetch_all().await?;
        let count = records.len();
        let path = self.model_path.clone();

        let model = tokio::task::spawn_blocking(move || -> crate::Result<NaiveBayesClassifier> {
            let model = NaiveBayesClassifier::fit(&records);
            model.save(&path)?;
            Ok(model)
        })
        .await
        .map_err(|e| StageError::ExecutionError(format!("Model fit task failed: {}", e)))??;

        let samples = model.training_samples();
        // Publish only after the model is on disk
        self.model.swap(Arc::new(model));
        info!("Feedback model retrained on {} records", samples);

        Ok(StageReport {
            items_processed: count,
            changes_made: samples,
            duration: start.elapsed(),
            detail: Some(format!("saved to {}", self.model_path.display())),
        })
    }
}

/// Mine the next window of the feedback log into the parsed-rules artifact
pub struct MiningStage {
    miner: Arc<RuleMiner>,
    feedback: Arc<dyn FeedbackStore>,
}

impl MiningStage {
    pub fn new(miner: Arc<RuleMiner>, feedback: Arc<dyn FeedbackStore>) -> Self {
        Self { miner, feedback }
    }
}

#[async_trait]
impl RetrainStage for MiningStage {
    fn name(&self) -> &str {
        MINING_STAGE
    }

    async fn run(&self) -> Result<StageReport, StageError> {
        let start = Instant::now();
        let report = self.miner.mine_log(self.feedback.as_ref()).await?;

        let detail = match &report.window {
            Some(span) => format!(
                "window [{} - {}) of {}, {} positive / {} negative rules",
                span.offset,
                span.end(),
                span.total,
                report.positive_rules,
                report.negative_rules
            ),
            None => format!(
                "{} positive / {} negative rules",
                report.positive_rules, report.negative_rules
            ),
        };

        Ok(StageReport {
            items_processed: report.positive_records + report.negative_records,
            changes_made: report.positive_rules + report.negative_rules,
            duration: start.elapsed(),
            detail: Some(detail),
        })
    }
}

/// Merge the parsed-rules artifact into the knowledge base
pub struct KbMergeStage {
    updater: KbUpdater,
    store: Arc<KnowledgeBaseStore>,
    parsed_rules_path: PathBuf,
}

impl KbMergeStage {
    pub fn new(
        updater: KbUpdater,
        store: Arc<KnowledgeBaseStore>,
        parsed_rules_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            updater,
            store,
            parsed_rules_path: parsed_rules_path.into(),
        }
    }
}

#[async_trait]
impl RetrainStage for KbMergeStage {
    fn name(&self) -> &str {
        KB_MERGE_STAGE
    }

    async fn run(&self) -> Result<StageReport, StageError> {
        let start = Instant::now();
        if !self.parsed_rules_path.exists() {
            return Err(StageError::Plantwise(PlantwiseError::DataUnavailable(
                format!(
                    "Parsed rules not found at {}",
                    self.parsed_rules_path.display()
                ),
            )));
        }

        let report = self
            .updater
            .apply(&self.parsed_rules_path, &self.store)
            .await?;

        Ok(StageReport {
            items_processed: report.added_positive
                + report.added_negative
                + report.skipped_invalid,
            changes_made: report.added_positive + report.added_negative,
            duration: start.elapsed(),
            detail: Some(format!(
                "total {} positive / {} negative",
                report.total_positive, report.total_negative
            )),
        })
    }
}
