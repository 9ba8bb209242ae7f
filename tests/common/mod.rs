//! Common test utilities and helpers

#![allow(dead_code)]

use plantwise_core::config::{PathsConfig, RetrainMode};
use plantwise_core::types::RawConditionValue;
use plantwise_core::{CatalogItem, CondSet, ParsedRule, Polarity, RecommenderConfig};
use std::collections::BTreeMap;
use tempfile::TempDir;

/// Configuration rooted in a temporary directory, retraining inline
pub fn test_config(dir: &TempDir) -> RecommenderConfig {
    let mut config = RecommenderConfig {
        paths: PathsConfig::in_dir(dir.path()),
        ..RecommenderConfig::default()
    };
    config.retrain.mode = RetrainMode::Blocking;
    config
}

pub fn catalog_item(name: &str) -> CatalogItem {
    CatalogItem {
        item_id: name.to_string(),
        description: format!("A hardy {}", name.to_lowercase()),
        image_ref: None,
    }
}

pub fn catalog(names: &[&str]) -> Vec<CatalogItem> {
    names.iter().map(|n| catalog_item(n)).collect()
}

pub fn conditions(pairs: &[(&str, &str)]) -> CondSet {
    CondSet::from_pairs(pairs.iter().copied()).expect("valid test conditions")
}

/// Parsed rule with single-valued raw conditions
pub fn parsed_rule(
    conds: &[(&str, &str)],
    item: &str,
    feedback: Polarity,
    confidence: f64,
    lift: f64,
) -> ParsedRule {
    let conditions: BTreeMap<String, RawConditionValue> = conds
        .iter()
        .map(|(k, v)| (k.to_string(), RawConditionValue::Single(v.to_string())))
        .collect();
    ParsedRule {
        conditions,
        suggested_plant: item.to_string(),
        feedback,
        support: 0.1,
        confidence,
        lift,
    }
}

/// A full indoor-apartment preference set
pub fn apartment_user() -> CondSet {
    conditions(&[
        ("area_size", "Small"),
        ("sunlight_need", "Bright indirect light"),
        ("environment_type", "Indoor"),
        ("climate_type", "All seasons"),
        ("watering_frequency", "Weekly"),
        ("fertilizer_frequency", "Monthly"),
        ("pesticide_frequency", "Never needed"),
        ("has_pet", "Yes"),
        ("has_child", "No"),
    ])
}
