//! KB updater
//!
//! Merges freshly mined rules into the knowledge base: normalize, insert
//! by identity, resolve positive/negative conflicts by lift, then enforce
//! one positive rule per item.

use super::store::KnowledgeBaseStore;
use crate::config::ConflictKey;
use crate::error::Result;
use crate::normalizer::normalize;
use crate::persist::read_json_opt;
use crate::types::{Attribute, KnowledgeBase, ParsedRule, Polarity, Rule, RuleIdentity};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info, warn};

/// Outcome of a merge
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    pub added_positive: usize,
    pub added_negative: usize,
    /// Parsed rules rejected by the normalizer
    pub skipped_invalid: usize,
    /// Keys present on both sides; the lower-lift side was dropped
    pub conflicts_resolved: usize,
    /// Rules removed as duplicates (identity, conflict key or per-item)
    pub duplicates_dropped: usize,
    pub total_positive: usize,
    pub total_negative: usize,
}

/// Conflict key: sorted conditions, plus the item unless configured otherwise
type ConflictId = (Vec<(Attribute, String)>, Option<String>);

/// Rule merger
#[derive(Debug, Clone, Copy, Default)]
pub struct KbUpdater {
    conflict_key: ConflictKey,
}

impl KbUpdater {
    pub fn new(conflict_key: ConflictKey) -> Self {
        Self { conflict_key }
    }

    /// Merge parsed rules into `kb` in place
    pub fn merge(&self, kb: &mut KnowledgeBase, parsed: &[ParsedRule]) -> MergeReport {
        let mut report = MergeReport::default();

        let mut seen: HashMap<Polarity, HashSet<RuleIdentity>> = HashMap::new();
        for polarity in [Polarity::Positive, Polarity::Negative] {
            seen.insert(
                polarity,
                kb.rules(polarity).iter().map(Rule::identity).collect(),
            );
        }

        for raw in parsed {
            let conditions = match normalize(&raw.conditions) {
                Ok(conditions) => conditions,
                Err(e) => {
                    warn!(
                        "Skipping rule for '{}' ({}): {}",
                        raw.suggested_plant, raw.feedback, e
                    );
                    report.skipped_invalid += 1;
                    continue;
                }
            };

            let rule = Rule {
                conditions,
                suggested_item: raw.suggested_plant.trim().to_string(),
                polarity: raw.feedback,
                support: raw.support,
                confidence: raw.confidence,
                lift: raw.lift,
            };

            let identities = seen.entry(rule.polarity).or_default();
            if identities.insert(rule.identity()) {
                match rule.polarity {
                    Polarity::Positive => report.added_positive += 1,
                    Polarity::Negative => report.added_negative += 1,
                }
                kb.rules_mut(rule.polarity).push(rule);
            } else {
                debug!("Rule for '{}' already present", rule.suggested_item);
            }
        }

        self.resolve_conflicts(kb, &mut report);
        report.duplicates_dropped += enforce_unique_positive_items(kb);

        report.total_positive = kb.positive_rules.len();
        report.total_negative = kb.negative_rules.len();
        report
    }

    fn conflict_id(&self, rule: &Rule) -> ConflictId {
        let item = match self.conflict_key {
            ConflictKey::ConditionsAndItem => Some(rule.suggested_item.clone()),
            ConflictKey::ConditionsOnly => None,
        };
        (rule.conditions.sorted_pairs(), item)
    }

    /// Drop the lower-lift side of every key present in both lists
    ///
    /// Within a list only the first rule per key survives. Ties favor the
    /// positive side.
    fn resolve_conflicts(&self, kb: &mut KnowledgeBase, report: &mut MergeReport) {
        let positive = self.first_per_key(&mut kb.positive_rules, report);
        let negative = self.first_per_key(&mut kb.negative_rules, report);

        let mut drop_positive = HashSet::new();
        let mut drop_negative = HashSet::new();
        for (key, pos_lift) in &positive {
            let Some(neg_lift) = negative.get(key) else {
                continue;
            };
            report.conflicts_resolved += 1;
            if pos_lift >= neg_lift {
                drop_negative.insert(key.clone());
            } else {
                drop_positive.insert(key.clone());
            }
        }

        kb.positive_rules
            .retain(|rule| !drop_positive.contains(&self.conflict_id(rule)));
        kb.negative_rules
            .retain(|rule| !drop_negative.contains(&self.conflict_id(rule)));
    }

    /// Collapse each list to its first rule per key and return key → lift
    fn first_per_key(
        &self,
        rules: &mut Vec<Rule>,
        report: &mut MergeReport,
    ) -> HashMap<ConflictId, f64> {
        let mut lifts = HashMap::new();
        let before = rules.len();
        rules.retain(|rule| {
            let key = self.conflict_id(rule);
            if lifts.contains_key(&key) {
                return false;
            }
            lifts.insert(key, rule.lift);
            true
        });
        report.duplicates_dropped += before - rules.len();
        lifts
    }

    /// Load the parsed-rules artifact and merge it through the store
    pub async fn apply(
        &self,
        parsed_rules_path: &Path,
        store: &KnowledgeBaseStore,
    ) -> Result<MergeReport> {
        let parsed: Vec<ParsedRule> = read_json_opt(parsed_rules_path)?.unwrap_or_default();
        debug!(
            "Loaded {} parsed rules from {}",
            parsed.len(),
            parsed_rules_path.display()
        );

        let report = store.update(|kb| Ok(self.merge(kb, &parsed))).await?;

        info!(
            "KB updated: +{} positive, +{} negative (total: {} pos, {} neg)",
            report.added_positive,
            report.added_negative,
            report.total_positive,
            report.total_negative
        );
        if report.skipped_invalid > 0 {
            warn!("{} parsed rules rejected by the normalizer", report.skipped_invalid);
        }

        Ok(report)
    }
}

/// Keep the first positive rule per item, in KB order
fn enforce_unique_positive_items(kb: &mut KnowledgeBase) -> usize {
    let before = kb.positive_rules.len();
    let mut items = HashSet::new();
    kb.positive_rules
        .retain(|rule| items.insert(rule.suggested_item.clone()));
    before - kb.positive_rules.len()
}

/// Merge the parsed-rules file at `parsed_rules_path` into the KB file at `kb_path`
///
/// A missing KB file is treated as an empty knowledge base.
pub async fn update_knowledge_base(
    parsed_rules_path: impl AsRef<Path>,
    kb_path: impl AsRef<Path>,
) -> Result<MergeReport> {
    let store = KnowledgeBaseStore::open(kb_path.as_ref())?;
    KbUpdater::default()
        .apply(parsed_rules_path.as_ref(), &store)
        .await
}
