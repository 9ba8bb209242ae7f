//! Rule engine
//!
//! Read-only matching of user preferences against a knowledge base
//! snapshot. Rules match by subset: every condition of the rule must appear
//! with the same value in the user's preferences, so a rule with no
//! conditions matches everyone.

use crate::types::{CondSet, KnowledgeBase, Polarity, Rule};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Candidate shortlist produced by the rule engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Candidates {
    /// Items ranked best-first, without duplicates
    Ranked(Vec<String>),
    /// No positive rule matched
    Empty,
}

impl Candidates {
    pub fn is_empty(&self) -> bool {
        matches!(self, Candidates::Empty)
    }

    pub fn items(&self) -> &[String] {
        match self {
            Candidates::Ranked(items) => items,
            Candidates::Empty => &[],
        }
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }
}

/// True iff every condition of `rule` is satisfied by `user`
pub fn matches(rule: &Rule, user: &CondSet) -> bool {
    rule.matches(user)
}

/// Matches user preferences against one KB snapshot
#[derive(Debug, Clone)]
pub struct RuleEngine {
    kb: Arc<KnowledgeBase>,
}

impl RuleEngine {
    pub fn new(kb: Arc<KnowledgeBase>) -> Self {
        Self { kb }
    }

    pub fn knowledge_base(&self) -> &KnowledgeBase {
        &self.kb
    }

    /// Rules of one polarity that match `user`, in KB order
    pub fn matching<'a>(
        &'a self,
        polarity: Polarity,
        user: &'a CondSet,
    ) -> impl Iterator<Item = &'a Rule> + 'a {
        self.kb
            .rules(polarity)
            .iter()
            .filter(move |rule| rule.matches(user))
    }

    /// Shortlist up to `top_n` items from matching positive rules
    ///
    /// Rules are ranked by confidence then lift (descending, KB order on
    /// ties); each item appears once, at the rank of its best rule.
    pub fn get_candidates(&self, user: &CondSet, top_n: usize) -> Candidates {
        let mut matched: Vec<&Rule> = self.matching(Polarity::Positive, user).collect();
        matched.sort_by(|a, b| rank_order(a, b));

        let mut seen = HashSet::new();
        let items: Vec<String> = matched
            .into_iter()
            .filter(|rule| seen.insert(rule.suggested_item.as_str()))
            .take(top_n)
            .map(|rule| rule.suggested_item.clone())
            .collect();

        debug!("Rule engine shortlisted {} candidates", items.len());

        if items.is_empty() {
            Candidates::Empty
        } else {
            Candidates::Ranked(items)
        }
    }

    /// Confidence of the first matching positive rule for `item`
    pub fn first_matching_confidence(&self, item: &str, user: &CondSet) -> Option<f64> {
        self.matching(Polarity::Positive, user)
            .find(|rule| rule.suggested_item == item)
            .map(|rule| rule.confidence)
    }
}

/// Descending by (confidence, lift)
fn rank_order(a: &Rule, b: &Rule) -> Ordering {
    b.confidence
        .total_cmp(&a.confidence)
        .then_with(|| b.lift.total_cmp(&a.lift))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Attribute;
    use proptest::prelude::*;

    fn rule(conds: &[(Attribute, &str)], item: &str, confidence: f64, lift: f64) -> Rule {
        let mut conditions = CondSet::new();
        for (attr, value) in conds {
            conditions.insert(*attr, value).unwrap();
        }
        Rule {
            conditions,
            suggested_item: item.to_string(),
            polarity: Polarity::Positive,
            support: 0.1,
            confidence,
            lift,
        }
    }

    fn user() -> CondSet {
        CondSet::from_pairs([
            ("area_size", "Small"),
            ("sunlight_need", "Bright indirect light"),
            ("environment_type", "Indoor"),
            ("has_pet", "No"),
        ])
        .unwrap()
    }

    #[test]
    fn test_empty_conditions_match_everything() {
        let r = rule(&[], "Pothos", 0.5, 1.0);
        assert!(matches(&r, &CondSet::new()));
        assert!(matches(&r, &user()));
    }

    #[test]
    fn test_mismatched_value_does_not_match() {
        let r = rule(&[(Attribute::EnvironmentType, "Outdoor")], "Rose", 0.9, 2.0);
        assert!(!matches(&r, &user()));

        // Attribute missing from user input is not a wildcard
        let r = rule(&[(Attribute::ClimateType, "Winter")], "Cactus", 0.9, 2.0);
        assert!(!matches(&r, &user()));
    }

    #[test]
    fn test_snake_plant_scenario() {
        let mut kb = KnowledgeBase::default();
        kb.positive_rules = vec![
            // Same confidence, lower lift, listed first
            rule(&[(Attribute::EnvironmentType, "Indoor")], "Fern", 0.9, 1.2),
            rule(&[(Attribute::AreaSize, "Small")], "Pothos", 0.6, 3.0),
            rule(
                &[
                    (Attribute::SunlightNeed, "Bright indirect light"),
                    (Attribute::EnvironmentType, "Indoor"),
                ],
                "Snake Plant",
                0.9,
                2.0,
            ),
        ];
        let engine = RuleEngine::new(Arc::new(kb));

        let candidates = engine.get_candidates(&user(), 5);
        assert_eq!(candidates.items(), ["Snake Plant", "Fern", "Pothos"]);
        assert_eq!(
            engine.first_matching_confidence("Snake Plant", &user()),
            Some(0.9)
        );
        assert_eq!(engine.first_matching_confidence("Cactus", &user()), None);
    }

    #[test]
    fn test_ranking_dedup_and_truncation() {
        let mut kb = KnowledgeBase::default();
        kb.positive_rules = vec![
            rule(&[(Attribute::AreaSize, "Small")], "Fern", 0.4, 1.0),
            rule(&[(Attribute::HasPet, "No")], "Lily", 0.9, 1.1),
            rule(&[(Attribute::EnvironmentType, "Indoor")], "Fern", 0.7, 1.0),
            rule(&[], "Pothos", 0.7, 2.0),
            rule(&[(Attribute::AreaSize, "Large")], "Palm", 1.0, 3.0),
        ];
        let engine = RuleEngine::new(Arc::new(kb));

        let candidates = engine.get_candidates(&user(), 5);
        assert_eq!(candidates.items(), ["Lily", "Pothos", "Fern"]);

        let top2 = engine.get_candidates(&user(), 2);
        assert_eq!(top2.items(), ["Lily", "Pothos"]);
    }

    #[test]
    fn test_no_match_is_empty() {
        let engine = RuleEngine::new(Arc::new(KnowledgeBase::default()));
        assert!(engine.get_candidates(&user(), 5).is_empty());
    }

    #[test]
    fn test_negative_rules_not_candidates() {
        let mut kb = KnowledgeBase::default();
        let mut negative = rule(&[], "Cactus", 0.9, 1.0);
        negative.polarity = Polarity::Negative;
        kb.negative_rules.push(negative);
        let engine = RuleEngine::new(Arc::new(kb));

        assert!(engine.get_candidates(&user(), 5).is_empty());
        assert_eq!(engine.matching(Polarity::Negative, &user()).count(), 1);
    }

    fn arb_condset() -> impl Strategy<Value = CondSet> {
        proptest::collection::vec((0usize..Attribute::ALL.len(), 0usize..8), 0..6).prop_map(
            |picks| {
                let mut set = CondSet::new();
                for (a, v) in picks {
                    let attr = Attribute::ALL[a];
                    let domain = attr.domain();
                    set.insert(attr, domain[v % domain.len()]).unwrap();
                }
                set
            },
        )
    }

    proptest! {
        #[test]
        fn prop_match_iff_subset(conds in arb_condset(), user in arb_condset()) {
            let r = Rule {
                conditions: conds.clone(),
                suggested_item: "X".to_string(),
                polarity: Polarity::Positive,
                support: 0.0,
                confidence: 0.0,
                lift: 1.0,
            };
            let expected = conds.iter().all(|(attr, value)| user.get(attr) == Some(value));
            prop_assert_eq!(matches(&r, &user), expected);
        }
    }
}
