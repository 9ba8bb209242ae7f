//! Feedback-triggered retraining
//!
//! After every `threshold`-th accepted feedback the orchestrator refits the
//! model, mines the next log window and merges the mined rules into the KB.

pub mod pipeline;
pub mod stages;

pub use pipeline::{
    PipelineRun, RetrainOrchestrator, RetrainOutcome, RetrainStage, RetrainTrigger, StageError,
    StageReport, StageRun, StageStatus,
};
pub use stages::{KbMergeStage, MiningStage, ModelRetrainStage};

use crate::config::RecommenderConfig;
use crate::kb::{KbUpdater, KnowledgeBaseStore};
use crate::mining::RuleMiner;
use crate::scoring::ModelHandle;
use crate::storage::FeedbackStore;
use std::sync::Arc;

/// Orchestrator with the three standard stages in order
pub fn standard_orchestrator(
    config: &RecommenderConfig,
    feedback: Arc<dyn FeedbackStore>,
    model: Arc<ModelHandle>,
    miner: Arc<RuleMiner>,
    kb: Arc<KnowledgeBaseStore>,
) -> RetrainOrchestrator {
    let parsed_rules = miner.output_path().to_path_buf();

    RetrainOrchestrator::new(&config.retrain, Arc::clone(&feedback))
        .with_stage(Arc::new(ModelRetrainStage::new(
            Arc::clone(&feedback),
            model,
            config.paths.model_path(),
        )))
        .with_stage(Arc::new(MiningStage::new(miner, feedback)))
        .with_stage(Arc::new(KbMergeStage::new(
            KbUpdater::new(config.kb.conflict_key),
            kb,
            parsed_rules,
        )))
}
