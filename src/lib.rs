//! Plantwise - Feedback-driven plant recommender
//!
//! Recommends a catalog item from a user's categorical preferences and
//! learns from accept/reject feedback:
//! - Rule engine over a persisted knowledge base of association rules
//! - FP-Growth miner that turns the feedback log into new rules
//! - KB updater with deduplication and positive/negative conflict resolution
//! - Hybrid scorer combining a classifier with rule confidence
//! - Retrain orchestrator that refreshes model and rules as feedback arrives
//!
//! # Architecture
//!
//! - **Types**: attributes, condition sets, rules, feedback records
//! - **Storage**: catalog and feedback collaborators (SQLite, in-memory)
//! - **KB / Mining / Scoring**: the recommendation and learning core
//! - **Service**: the [`Recommender`] facade used by the CLI
//!
//! # Example
//!
//! ```ignore
//! use plantwise_core::{CondSet, RecommendationSession, Recommender, RecommenderConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = RecommenderConfig::load(None)?;
//!     let (recommender, _store) = Recommender::open(config).await?;
//!
//!     let user = CondSet::from_pairs([("environment_type", "Indoor"), ("has_pet", "Yes")])?;
//!     let mut session = RecommendationSession::new();
//!     let rec = recommender.recommend(&mut session, &user).await?;
//!     println!("Try a {}", rec.item);
//!
//!     recommender.submit_feedback(&mut session, true).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod kb;
pub mod mining;
pub mod normalizer;
pub mod persist;
pub mod retrain;
pub mod scoring;
pub mod service;
pub mod storage;
pub mod synthetic;
pub mod types;

// Re-export commonly used types
pub use config::RecommenderConfig;
pub use engine::{Candidates, RuleEngine};
pub use error::{PlantwiseError, Result};
pub use kb::{update_knowledge_base, KbUpdater, KnowledgeBaseStore, MergeReport};
pub use mining::{MiningReport, RuleMiner};
pub use retrain::{PipelineRun, RetrainOrchestrator, RetrainOutcome};
pub use scoring::{
    FeedbackClassifier, HybridScorer, ModelHandle, NaiveBayesClassifier, Recommendation,
    RecommendationSession, ScoringPath,
};
pub use service::{FeedbackOutcome, Recommender};
pub use storage::{CatalogProvider, FeedbackMaintenance, FeedbackStore, MemoryStore, SqliteStore};
pub use types::{
    Attribute, CatalogItem, CondSet, FeedbackRecord, KnowledgeBase, NewFeedback, ParsedRule,
    Polarity, Rule,
};
