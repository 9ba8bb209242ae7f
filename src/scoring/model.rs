//! Feedback classification model
//!
//! The scorer only needs `predict_proba`: the probability that a user with
//! the given preferences accepts a given item. The shipped implementation is
//! a categorical naive-Bayes model with Laplace smoothing, trained from the
//! feedback log and persisted as JSON.

use crate::error::{PlantwiseError, Result};
use crate::persist::{read_json_opt, write_json_atomic};
use crate::types::{Attribute, CondSet, FeedbackRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// Feature name of the candidate item
const ITEM_FEATURE: &str = "suggested_plant";

/// Default Laplace smoothing strength
const DEFAULT_ALPHA: f64 = 1.0;

/// Model input: user preferences plus one candidate item
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector<'a> {
    pub conditions: &'a CondSet,
    pub item: &'a str,
}

impl<'a> FeatureVector<'a> {
    pub fn new(conditions: &'a CondSet, item: &'a str) -> Self {
        Self { conditions, item }
    }
}

/// Binary acceptance classifier
pub trait FeedbackClassifier: Send + Sync + std::fmt::Debug {
    /// Probability in `[0, 1]` that the user accepts the item
    fn predict_proba(&self, features: &FeatureVector<'_>) -> Result<f64>;

    /// Number of records the model was trained on
    fn training_samples(&self) -> usize;
}

/// Categorical naive Bayes over the nine attributes and the item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NaiveBayesClassifier {
    alpha: f64,
    /// `[rejected, accepted]`
    class_counts: [u64; 2],
    /// feature → value → `[rejected, accepted]`
    feature_counts: BTreeMap<String, BTreeMap<String, [u64; 2]>>,
    trained_at: DateTime<Utc>,
}

impl NaiveBayesClassifier {
    /// A model with no evidence; predicts 0.5 for everything
    pub fn untrained() -> Self {
        Self {
            alpha: DEFAULT_ALPHA,
            class_counts: [0, 0],
            feature_counts: BTreeMap::new(),
            trained_at: Utc::now(),
        }
    }

    /// Train on the full feedback log
    pub fn fit(records: &[FeedbackRecord]) -> Self {
        let mut model = Self::untrained();

        for record in records {
            let class = usize::from(record.accepted);
            model.class_counts[class] += 1;

            for (attr, value) in record.conditions.iter() {
                model.observe(attr.as_str(), value, class);
            }
            model.observe(ITEM_FEATURE, &record.suggested_item, class);
        }

        info!(
            "Trained feedback model on {} records ({} accepted, {} rejected)",
            records.len(),
            model.class_counts[1],
            model.class_counts[0]
        );
        model
    }

    fn observe(&mut self, feature: &str, value: &str, class: usize) {
        let counts = self
            .feature_counts
            .entry(feature.to_string())
            .or_default()
            .entry(value.to_string())
            .or_insert([0, 0]);
        counts[class] += 1;
    }

    /// Number of distinct values a feature can take, for smoothing
    fn cardinality(&self, feature: &str) -> usize {
        let seen = self.feature_counts.get(feature).map_or(0, BTreeMap::len);
        match feature.parse::<Attribute>() {
            Ok(attr) => attr.domain().len().max(seen),
            // Items are open-ended: reserve one slot for unseen names
            Err(_) => seen + 1,
        }
    }

    fn log_likelihood(&self, feature: &str, value: &str, class: usize) -> f64 {
        let count = self
            .feature_counts
            .get(feature)
            .and_then(|values| values.get(value))
            .map_or(0, |counts| counts[class]);
        let numerator = count as f64 + self.alpha;
        let denominator =
            self.class_counts[class] as f64 + self.alpha * self.cardinality(feature) as f64;
        (numerator / denominator).ln()
    }

    /// Load a persisted model, `None` when the file does not exist
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let model: Option<Self> = read_json_opt(path)?;
        if let Some(model) = &model {
            debug!(
                "Loaded feedback model from {} ({} samples)",
                path.display(),
                model.training_samples()
            );
        }
        Ok(model)
    }

    /// Persist atomically
    pub fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)?;
        debug!("Saved feedback model to {}", path.display());
        Ok(())
    }

    pub fn trained_at(&self) -> DateTime<Utc> {
        self.trained_at
    }
}

impl FeedbackClassifier for NaiveBayesClassifier {
    fn predict_proba(&self, features: &FeatureVector<'_>) -> Result<f64> {
        let total = (self.class_counts[0] + self.class_counts[1]) as f64;

        let mut log_scores = [0.0f64; 2];
        for (class, score) in log_scores.iter_mut().enumerate() {
            *score = ((self.class_counts[class] as f64 + self.alpha)
                / (total + 2.0 * self.alpha))
                .ln();
            for (attr, value) in features.conditions.iter() {
                *score += self.log_likelihood(attr.as_str(), value, class);
            }
            *score += self.log_likelihood(ITEM_FEATURE, features.item, class);
        }

        // Two-class softmax, shifted for stability
        let max = log_scores[0].max(log_scores[1]);
        let rejected = (log_scores[0] - max).exp();
        let accepted = (log_scores[1] - max).exp();
        let probability = accepted / (accepted + rejected);

        if !probability.is_finite() {
            return Err(PlantwiseError::Scoring(format!(
                "Non-finite probability for '{}'",
                features.item
            )));
        }
        Ok(probability.clamp(0.0, 1.0))
    }

    fn training_samples(&self) -> usize {
        (self.class_counts[0] + self.class_counts[1]) as usize
    }
}

/// Shared, hot-swappable model reference
///
/// Readers clone the inner `Arc` and keep using it even if a retrain swaps
/// in a new model meanwhile.
#[derive(Debug)]
pub struct ModelHandle {
    current: RwLock<Arc<dyn FeedbackClassifier>>,
}

impl ModelHandle {
    pub fn new(model: Arc<dyn FeedbackClassifier>) -> Self {
        Self {
            current: RwLock::new(model),
        }
    }

    /// Load the persisted naive-Bayes model, or start untrained
    pub fn load_or_untrained(path: &Path) -> Result<Self> {
        let model = NaiveBayesClassifier::load(path)?.unwrap_or_else(|| {
            info!("No feedback model at {}, starting untrained", path.display());
            NaiveBayesClassifier::untrained()
        });
        Ok(Self::new(Arc::new(model)))
    }

    pub fn current(&self) -> Arc<dyn FeedbackClassifier> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&*guard),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    /// Publish a new model
    pub fn swap(&self, model: Arc<dyn FeedbackClassifier>) {
        match self.current.write() {
            Ok(mut guard) => *guard = model,
            Err(poisoned) => *poisoned.into_inner() = model,
        }
    }
}
