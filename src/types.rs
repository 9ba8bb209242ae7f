//! Core data types for the Plantwise recommender
//!
//! This module defines the typed schema shared by every component: the
//! canonical attribute enumeration and its categorical domains, condition
//! sets, association rules, the knowledge base document, feedback records
//! and catalog entries. Raw, loosely-typed rule output from the miner lives
//! in [`ParsedRule`] until the normalizer maps it onto [`CondSet`].

use crate::error::{PlantwiseError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Canonical preference attributes understood by the engine
///
/// Declaration order defines the sort order used for rule identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Attribute {
    AreaSize,
    SunlightNeed,
    EnvironmentType,
    ClimateType,
    WateringFrequency,
    FertilizerFrequency,
    PesticideFrequency,
    HasPet,
    HasChild,
}

const FREQUENCY_DOMAIN: &[&str] = &["Monthly", "1-2 times a year", "Never needed"];
const YES_NO_DOMAIN: &[&str] = &["Yes", "No"];

impl Attribute {
    /// All attributes, in canonical order
    pub const ALL: [Attribute; 9] = [
        Attribute::AreaSize,
        Attribute::SunlightNeed,
        Attribute::EnvironmentType,
        Attribute::ClimateType,
        Attribute::WateringFrequency,
        Attribute::FertilizerFrequency,
        Attribute::PesticideFrequency,
        Attribute::HasPet,
        Attribute::HasChild,
    ];

    /// Canonical snake_case name, also used as the database column
    pub fn as_str(&self) -> &'static str {
        match self {
            Attribute::AreaSize => "area_size",
            Attribute::SunlightNeed => "sunlight_need",
            Attribute::EnvironmentType => "environment_type",
            Attribute::ClimateType => "climate_type",
            Attribute::WateringFrequency => "watering_frequency",
            Attribute::FertilizerFrequency => "fertilizer_frequency",
            Attribute::PesticideFrequency => "pesticide_frequency",
            Attribute::HasPet => "has_pet",
            Attribute::HasChild => "has_child",
        }
    }

    /// Allowed categorical values for this attribute
    pub fn domain(&self) -> &'static [&'static str] {
        match self {
            Attribute::AreaSize => &["Mini", "Small", "Medium", "Large"],
            Attribute::SunlightNeed => &[
                "Can live in shade",
                "1-2 hours daily",
                "Bright indirect light",
                "6+ hours",
            ],
            Attribute::EnvironmentType => &["Indoor", "Outdoor", "Semi-outdoor"],
            Attribute::ClimateType => &["All seasons", "Spring", "Summer", "Winter"],
            Attribute::WateringFrequency => {
                &["Daily", "Weekly", "Bi-weekly", "Every 2-3 days", "Monthly"]
            }
            Attribute::FertilizerFrequency | Attribute::PesticideFrequency => FREQUENCY_DOMAIN,
            Attribute::HasPet | Attribute::HasChild => YES_NO_DOMAIN,
        }
    }

    /// Resolve a raw value to its canonical spelling (trimmed, case-insensitive)
    pub fn canonical_value(&self, raw: &str) -> Option<&'static str> {
        let needle = raw.trim();
        self.domain()
            .iter()
            .copied()
            .find(|candidate| candidate.eq_ignore_ascii_case(needle))
    }
}

impl std::fmt::Display for Attribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Attribute {
    type Err = PlantwiseError;

    fn from_str(s: &str) -> Result<Self> {
        let key = s.trim();
        Attribute::ALL
            .iter()
            .copied()
            .find(|attr| attr.as_str() == key)
            .ok_or_else(|| PlantwiseError::Normalization(format!("Unknown attribute: {}", key)))
    }
}

/// A validated mapping from attribute to categorical value
///
/// Only canonical attributes with in-domain values can be inserted, so a
/// `CondSet` is always engine-consumable. Equality and hashing ignore
/// insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<String, String>",
    into = "BTreeMap<String, String>"
)]
pub struct CondSet(BTreeMap<Attribute, String>);

impl CondSet {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Insert a value, validating it against the attribute's domain
    pub fn insert(&mut self, attribute: Attribute, value: &str) -> Result<()> {
        let canonical = attribute.canonical_value(value).ok_or_else(|| {
            PlantwiseError::Normalization(format!(
                "Value '{}' is not in the domain of {}",
                value.trim(),
                attribute
            ))
        })?;
        self.0.insert(attribute, canonical.to_string());
        Ok(())
    }

    /// Builder-style insert
    pub fn with(mut self, attribute: Attribute, value: &str) -> Result<Self> {
        self.insert(attribute, value)?;
        Ok(self)
    }

    /// Build from `(attribute, value)` string pairs
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut set = Self::new();
        for (key, value) in pairs {
            set.insert(key.parse()?, value)?;
        }
        Ok(set)
    }

    pub fn get(&self, attribute: Attribute) -> Option<&str> {
        self.0.get(&attribute).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Attribute, &str)> {
        self.0.iter().map(|(k, v)| (*k, v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when every attribute has a value (a full preference form)
    pub fn is_complete(&self) -> bool {
        self.0.len() == Attribute::ALL.len()
    }

    /// Attributes that have no value yet
    pub fn missing(&self) -> Vec<Attribute> {
        Attribute::ALL
            .iter()
            .copied()
            .filter(|attr| !self.0.contains_key(attr))
            .collect()
    }

    /// True iff every entry of `self` appears with the same value in `other`
    pub fn is_subset_of(&self, other: &CondSet) -> bool {
        self.0
            .iter()
            .all(|(attr, value)| other.0.get(attr) == Some(value))
    }

    /// Sorted `(attribute, value)` pairs, the hashable identity of the set
    pub fn sorted_pairs(&self) -> Vec<(Attribute, String)> {
        self.0.iter().map(|(k, v)| (*k, v.clone())).collect()
    }
}

impl TryFrom<BTreeMap<String, String>> for CondSet {
    type Error = PlantwiseError;

    fn try_from(raw: BTreeMap<String, String>) -> Result<Self> {
        CondSet::from_pairs(raw.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }
}

impl From<CondSet> for BTreeMap<String, String> {
    fn from(set: CondSet) -> Self {
        set.0
            .into_iter()
            .map(|(k, v)| (k.as_str().to_string(), v))
            .collect()
    }
}

/// Feedback polarity of a rule, serialized as `1` (accepted) / `0` (rejected)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Polarity {
    #[default]
    Positive,
    Negative,
}

impl Polarity {
    pub fn from_accepted(accepted: bool) -> Self {
        if accepted {
            Polarity::Positive
        } else {
            Polarity::Negative
        }
    }

    pub fn is_positive(&self) -> bool {
        matches!(self, Polarity::Positive)
    }
}

impl From<Polarity> for u8 {
    fn from(p: Polarity) -> Self {
        match p {
            Polarity::Positive => 1,
            Polarity::Negative => 0,
        }
    }
}

impl TryFrom<u8> for Polarity {
    type Error = String;

    fn try_from(v: u8) -> std::result::Result<Self, Self::Error> {
        match v {
            1 => Ok(Polarity::Positive),
            0 => Ok(Polarity::Negative),
            other => Err(format!("feedback flag must be 0 or 1, got {}", other)),
        }
    }
}

impl std::fmt::Display for Polarity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Polarity::Positive => write!(f, "positive"),
            Polarity::Negative => write!(f, "negative"),
        }
    }
}

fn default_lift() -> f64 {
    1.0
}

/// A knowledge-base association rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub conditions: CondSet,

    #[serde(rename = "suggested_plant")]
    pub suggested_item: String,

    #[serde(rename = "feedback", default)]
    pub polarity: Polarity,

    #[serde(default)]
    pub support: f64,

    #[serde(default)]
    pub confidence: f64,

    #[serde(default = "default_lift")]
    pub lift: f64,
}

/// Identity of a rule: normalized conditions plus the suggested item
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuleIdentity {
    pub conditions: Vec<(Attribute, String)>,
    pub item: String,
}

impl Rule {
    pub fn identity(&self) -> RuleIdentity {
        RuleIdentity {
            conditions: self.conditions.sorted_pairs(),
            item: self.suggested_item.clone(),
        }
    }

    /// Subset match: unspecified attributes are wildcards
    pub fn matches(&self, user: &CondSet) -> bool {
        self.conditions.is_subset_of(user)
    }
}

/// Persisted knowledge base document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeBase {
    #[serde(default)]
    pub positive_rules: Vec<Rule>,

    #[serde(default)]
    pub negative_rules: Vec<Rule>,
}

impl KnowledgeBase {
    pub fn rules(&self, polarity: Polarity) -> &[Rule] {
        match polarity {
            Polarity::Positive => &self.positive_rules,
            Polarity::Negative => &self.negative_rules,
        }
    }

    pub fn rules_mut(&mut self, polarity: Polarity) -> &mut Vec<Rule> {
        match polarity {
            Polarity::Positive => &mut self.positive_rules,
            Polarity::Negative => &mut self.negative_rules,
        }
    }

    pub fn len(&self) -> usize {
        self.positive_rules.len() + self.negative_rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Raw condition value as emitted by the miner: a single value or a list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawConditionValue {
    Single(String),
    Many(Vec<String>),
}

impl RawConditionValue {
    pub fn values(&self) -> Vec<&str> {
        match self {
            RawConditionValue::Single(v) => vec![v.as_str()],
            RawConditionValue::Many(vs) => vs.iter().map(String::as_str).collect(),
        }
    }
}

/// Rule as written to the parsed-rules transfer artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedRule {
    #[serde(default)]
    pub conditions: BTreeMap<String, RawConditionValue>,

    pub suggested_plant: String,

    #[serde(default)]
    pub feedback: Polarity,

    #[serde(default)]
    pub support: f64,

    #[serde(default)]
    pub confidence: f64,

    #[serde(default = "default_lift")]
    pub lift: f64,
}

/// Feedback about to be appended to the log
#[derive(Debug, Clone, PartialEq)]
pub struct NewFeedback {
    pub conditions: CondSet,
    pub suggested_item: String,
    pub accepted: bool,
}

/// Stored feedback record; never updated in place
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub id: i64,
    pub conditions: CondSet,
    #[serde(rename = "suggested_plant")]
    pub suggested_item: String,
    pub accepted: bool,
    pub created_at: DateTime<Utc>,
}

/// Catalog entry exposed by the catalog provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    #[serde(alias = "plant_name")]
    pub item_id: String,

    #[serde(default)]
    pub description: String,

    #[serde(default, alias = "image_url")]
    pub image_ref: Option<String>,
}

/// Trim and title-case a catalog name, the way catalog imports are cleaned
pub fn clean_item_name(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return "Unknown".to_string();
    }
    trimmed
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(|c| c.to_lowercase()))
                    .collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
