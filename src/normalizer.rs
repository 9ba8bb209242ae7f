//! Feature normalizer
//!
//! Maps loosely-keyed miner output onto the canonical [`CondSet`] schema.
//! Keys are resolved through a fixed alias table, values lose one known
//! textual prefix, and the compound `has` key is split into `has_<sub>`
//! attributes.

use crate::error::{PlantwiseError, Result};
use crate::types::{Attribute, CondSet, RawConditionValue};
use once_cell::sync::Lazy;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

/// Raw key aliases produced by the miner's column splitting
static KEY_ALIASES: Lazy<HashMap<&'static str, Attribute>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert("sunlight", Attribute::SunlightNeed);
    m.insert("area", Attribute::AreaSize);
    m.insert("environment", Attribute::EnvironmentType);
    m.insert("climate", Attribute::ClimateType);
    m.insert("watering", Attribute::WateringFrequency);
    m.insert("fertilizer", Attribute::FertilizerFrequency);
    m.insert("pesticide", Attribute::PesticideFrequency);
    m
});

/// Value prefixes left over from splitting column names; only the first match is removed
const VALUE_PREFIXES: [&str; 6] = ["need ", "size ", "type ", "frequency ", "pet ", "child "];

const COMPOUND_HAS_KEY: &str = "has";

/// Remove one known prefix and surrounding whitespace
pub fn clean_value(raw: &str) -> &str {
    let stripped = VALUE_PREFIXES
        .iter()
        .find_map(|prefix| raw.strip_prefix(prefix))
        .unwrap_or(raw);
    stripped.trim()
}

/// Resolve a raw key to its canonical attribute
pub fn resolve_key(raw: &str) -> Result<Attribute> {
    let key = raw.trim();
    match KEY_ALIASES.get(key) {
        Some(attr) => Ok(*attr),
        None => key.parse(),
    }
}

/// Normalize a raw condition multimap into a validated condition set
///
/// Any unknown attribute or out-of-domain value rejects the whole map.
pub fn normalize(raw: &BTreeMap<String, RawConditionValue>) -> Result<CondSet> {
    let mut conditions = CondSet::new();

    for (key, raw_value) in raw {
        let values = raw_value.values();

        if key.trim() == COMPOUND_HAS_KEY {
            for token in values {
                let Some((sub, value)) = token.split_once(' ') else {
                    warn!("Cannot split 'has' token '{}', skipping", token);
                    continue;
                };
                let attr: Attribute = format!("has_{}", sub.trim()).parse()?;
                conditions.insert(attr, clean_value(value))?;
            }
            continue;
        }

        let attr = resolve_key(key)?;
        let first = values.first().ok_or_else(|| {
            PlantwiseError::Normalization(format!("Condition '{}' has no value", key))
        })?;
        if values.len() > 1 {
            debug!(
                "Condition '{}' has {} values, keeping first ('{}')",
                key,
                values.len(),
                first
            );
        }
        conditions.insert(attr, clean_value(first))?;
    }

    Ok(conditions)
}
