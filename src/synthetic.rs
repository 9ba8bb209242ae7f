//! Synthetic feedback seeding
//!
//! Bootstraps an empty or thin feedback log. Each condition set is paired
//! with a few random catalog items and labelled by a handful of pattern
//! heuristics, falling back to a coin flip.

use crate::error::{PlantwiseError, Result};
use crate::storage::FeedbackStore;
use crate::types::{Attribute, CatalogItem, CondSet, FeedbackRecord, NewFeedback};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashSet;
use tracing::{debug, info};

/// Items paired with each condition set
const DEFAULT_ITEMS_PER_CONDITION: usize = 3;

/// Upper bound on generated records per call
const DEFAULT_MAX_RECORDS: usize = 1000;

/// Label a synthetic record from its conditions
///
/// `Some(true)` / `Some(false)` when a pattern applies, `None` otherwise.
pub fn heuristic_label(conditions: &CondSet) -> Option<bool> {
    let get = |attr| conditions.get(attr).unwrap_or("");
    let environment = get(Attribute::EnvironmentType);
    let sunlight = get(Attribute::SunlightNeed);
    let climate = get(Attribute::ClimateType);
    let watering = get(Attribute::WateringFrequency);
    let area = get(Attribute::AreaSize);

    let positive = (environment == "Indoor" && sunlight.to_lowercase().contains("indirect"))
        || (matches!(climate, "All seasons" | "Winter")
            && matches!(watering, "Weekly" | "Bi-weekly"))
        || (matches!(area, "Mini" | "Small") && sunlight == "6+ hours");
    if positive {
        return Some(true);
    }

    let negative = (environment == "Indoor" && sunlight == "6+ hours")
        || (climate == "Summer" && get(Attribute::FertilizerFrequency) == "Never needed");
    if negative {
        return Some(false);
    }

    None
}

/// A complete condition set drawn uniformly from each attribute's domain
pub fn random_conditions<R: Rng + ?Sized>(rng: &mut R) -> Result<CondSet> {
    let mut conditions = CondSet::new();
    for attr in Attribute::ALL {
        let value = attr
            .domain()
            .choose(rng)
            .ok_or_else(|| PlantwiseError::Other(format!("empty domain for {}", attr)))?;
        conditions.insert(attr, value)?;
    }
    Ok(conditions)
}

/// Synthetic feedback generator
#[derive(Debug, Clone)]
pub struct SyntheticGenerator {
    items_per_condition: usize,
    max_records: usize,
}

impl Default for SyntheticGenerator {
    fn default() -> Self {
        Self {
            items_per_condition: DEFAULT_ITEMS_PER_CONDITION,
            max_records: DEFAULT_MAX_RECORDS,
        }
    }
}

impl SyntheticGenerator {
    pub fn new(items_per_condition: usize, max_records: usize) -> Self {
        Self {
            items_per_condition: items_per_condition.max(1),
            max_records,
        }
    }

    /// Generate up to `count` records over `catalog`
    ///
    /// Condition sets already present in `existing` are reused first, then
    /// random ones fill the remainder.
    pub fn generate<R: Rng + ?Sized>(
        &self,
        catalog: &[CatalogItem],
        existing: &[FeedbackRecord],
        count: usize,
        rng: &mut R,
    ) -> Result<Vec<NewFeedback>> {
        if catalog.is_empty() {
            return Err(PlantwiseError::DataUnavailable(
                "cannot seed feedback without catalog items".to_string(),
            ));
        }

        let target = count.min(self.max_records);
        let mut seen = HashSet::new();
        let mut known: Vec<CondSet> = existing
            .iter()
            .filter(|r| seen.insert(r.conditions.clone()))
            .map(|r| r.conditions.clone())
            .collect();
        // pop() takes from the back
        known.reverse();

        let mut names: Vec<&str> = catalog.iter().map(|c| c.item_id.as_str()).collect();
        let mut records = Vec::with_capacity(target);

        while records.len() < target {
            let conditions = match known.pop() {
                Some(conditions) => conditions,
                None => random_conditions(rng)?,
            };

            names.shuffle(rng);
            for name in names.iter().take(self.items_per_condition) {
                if records.len() >= target {
                    break;
                }
                let accepted = heuristic_label(&conditions).unwrap_or_else(|| rng.gen_bool(0.5));
                records.push(NewFeedback {
                    conditions: conditions.clone(),
                    suggested_item: name.to_string(),
                    accepted,
                });
            }
        }

        debug!(
            "Generated {} synthetic records ({} accepted)",
            records.len(),
            records.iter().filter(|r| r.accepted).count()
        );
        Ok(records)
    }
}

/// Append generated records to the store
pub async fn seed_feedback(store: &dyn FeedbackStore, records: Vec<NewFeedback>) -> Result<usize> {
    let total = records.len();
    for record in records {
        store.append(record).await?;
    }
    info!("Seeded {} synthetic feedback records", total);
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use chrono::Utc;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn catalog(names: &[&str]) -> Vec<CatalogItem> {
        names
            .iter()
            .map(|n| CatalogItem {
                item_id: n.to_string(),
                description: String::new(),
                image_ref: None,
            })
            .collect()
    }

    #[test]
    fn test_heuristics() {
        let indirect = CondSet::from_pairs([
            ("environment_type", "Indoor"),
            ("sunlight_need", "Bright indirect light"),
        ])
        .unwrap();
        assert_eq!(heuristic_label(&indirect), Some(true));

        let scorched = CondSet::from_pairs([
            ("environment_type", "Indoor"),
            ("sunlight_need", "6+ hours"),
            ("area_size", "Large"),
        ])
        .unwrap();
        assert_eq!(heuristic_label(&scorched), Some(false));

        // Positive patterns win over negative ones
        let small_sunny = CondSet::from_pairs([
            ("environment_type", "Indoor"),
            ("sunlight_need", "6+ hours"),
            ("area_size", "Small"),
        ])
        .unwrap();
        assert_eq!(heuristic_label(&small_sunny), Some(true));

        let neutral = CondSet::from_pairs([("environment_type", "Outdoor")]).unwrap();
        assert_eq!(heuristic_label(&neutral), None);
    }

    #[test]
    fn test_generate_respects_count_and_catalog() {
        let mut rng = StdRng::seed_from_u64(42);
        let items = catalog(&["Fern", "Pothos", "Cactus", "Rose"]);
        let records = SyntheticGenerator::default()
            .generate(&items, &[], 50, &mut rng)
            .unwrap();

        assert_eq!(records.len(), 50);
        for record in &records {
            assert!(record.conditions.is_complete());
            assert!(items.iter().any(|i| i.item_id == record.suggested_item));
            if let Some(label) = heuristic_label(&record.conditions) {
                assert_eq!(record.accepted, label);
            }
        }
    }

    #[test]
    fn test_generate_reuses_existing_conditions_first() {
        let mut rng = StdRng::seed_from_u64(1);
        let conditions = CondSet::from_pairs([("environment_type", "Outdoor")]).unwrap();
        let existing = vec![FeedbackRecord {
            id: 1,
            conditions: conditions.clone(),
            suggested_item: "Rose".to_string(),
            accepted: true,
            created_at: Utc::now(),
        }];

        let records = SyntheticGenerator::new(2, 100)
            .generate(&catalog(&["Fern", "Pothos", "Cactus"]), &existing, 2, &mut rng)
            .unwrap();
        assert!(records.iter().all(|r| r.conditions == conditions));
        assert_ne!(records[0].suggested_item, records[1].suggested_item);
    }

    #[test]
    fn test_generate_caps_and_rejects_empty_catalog() {
        let mut rng = StdRng::seed_from_u64(3);
        let records = SyntheticGenerator::new(3, 10)
            .generate(&catalog(&["Fern"]), &[], 500, &mut rng)
            .unwrap();
        assert_eq!(records.len(), 10);

        assert!(SyntheticGenerator::default()
            .generate(&[], &[], 5, &mut rng)
            .is_err());
    }

    #[tokio::test]
    async fn test_seed_feedback_appends() {
        let store = MemoryStore::new();
        let mut rng = StdRng::seed_from_u64(9);
        let records = SyntheticGenerator::default()
            .generate(&catalog(&["Fern", "Pothos"]), &[], 12, &mut rng)
            .unwrap();
        assert_eq!(seed_feedback(&store, records).await.unwrap(), 12);
        assert_eq!(store.count(None).await.unwrap(), 12);
    }
}
