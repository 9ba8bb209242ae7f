//! Candidate scoring and selection

pub mod hybrid;
pub mod model;
pub mod session;

pub use hybrid::{HybridScorer, Recommendation, ScoredItem, ScoringPath};
pub use model::{FeatureVector, FeedbackClassifier, ModelHandle, NaiveBayesClassifier};
pub use session::{PendingRecommendation, RecommendationSession};
