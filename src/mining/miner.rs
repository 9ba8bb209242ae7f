//! Association rule miner
//!
//! Turns feedback records into transactions of `attribute=value` tokens plus
//! one `suggested_plant=item` token, mines each polarity independently with
//! FP-Growth, and keeps the strongest item-predicting rules.

use super::fpgrowth::{AssociationRule, FpGrowth};
use super::window::{MiningWindow, WindowSpan};
use crate::config::MiningConfig;
use crate::error::{PlantwiseError, Result};
use crate::persist::write_json_atomic;
use crate::storage::FeedbackStore;
use crate::types::{Attribute, FeedbackRecord, ParsedRule, Polarity, RawConditionValue};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Thresholds for one mining run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MiningParams {
    pub min_support: f64,
    pub min_confidence: f64,
    /// Rules kept per polarity
    pub top_k: usize,
}

impl From<&MiningConfig> for MiningParams {
    fn from(config: &MiningConfig) -> Self {
        Self {
            min_support: config.min_support,
            min_confidence: config.min_confidence,
            top_k: config.top_k,
        }
    }
}

/// Summary of one mining run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MiningReport {
    /// Log slice that was mined; `None` for explicit record input
    pub window: Option<WindowSpan>,
    pub positive_records: usize,
    pub negative_records: usize,
    pub positive_rules: usize,
    pub negative_rules: usize,
    pub output: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum Token {
    Condition(Attribute, String),
    Item(String),
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Condition(attr, value) => write!(f, "{}={}", attr, value),
            Token::Item(item) => write!(f, "suggested_plant={}", item),
        }
    }
}

/// Dense token ids for one polarity's transactions
#[derive(Default)]
struct Vocabulary {
    ids: HashMap<Token, usize>,
    tokens: Vec<Token>,
}

impl Vocabulary {
    fn id(&mut self, token: Token) -> usize {
        if let Some(&id) = self.ids.get(&token) {
            return id;
        }
        let id = self.tokens.len();
        self.tokens.push(token.clone());
        self.ids.insert(token, id);
        id
    }

    fn token(&self, id: usize) -> &Token {
        &self.tokens[id]
    }

    fn is_item(&self, id: usize) -> bool {
        matches!(self.tokens[id], Token::Item(_))
    }
}

/// Mine both polarities of `records` and return the combined rule list,
/// positive rules first
pub fn mine(records: &[FeedbackRecord], params: &MiningParams) -> Vec<ParsedRule> {
    let (accepted, rejected): (Vec<&FeedbackRecord>, Vec<&FeedbackRecord>) =
        records.iter().partition(|r| r.accepted);

    let mut rules = mine_polarity(&accepted, Polarity::Positive, params);
    rules.extend(mine_polarity(&rejected, Polarity::Negative, params));
    rules
}

fn mine_polarity(
    records: &[&FeedbackRecord],
    polarity: Polarity,
    params: &MiningParams,
) -> Vec<ParsedRule> {
    if records.is_empty() {
        info!("No records for {} feedback", polarity);
        return Vec::new();
    }

    let mut vocab = Vocabulary::default();
    let transactions: Vec<Vec<usize>> = records
        .iter()
        .map(|record| {
            let mut items: Vec<usize> = record
                .conditions
                .iter()
                .map(|(attr, value)| vocab.id(Token::Condition(attr, value.to_string())))
                .collect();
            items.push(vocab.id(Token::Item(record.suggested_item.clone())));
            items
        })
        .collect();

    let itemsets = FpGrowth::new(params.min_support).fit(&transactions);
    debug!(
        "{} feedback: {} transactions, {} frequent itemsets",
        polarity,
        transactions.len(),
        itemsets.len()
    );

    let mut seen = HashSet::new();
    let mut rules: Vec<AssociationRule> = itemsets
        .rules(params.min_confidence, |id| vocab.is_item(id))
        .into_iter()
        .filter(|rule| rule.antecedent.iter().all(|&id| !vocab.is_item(id)))
        .filter(|rule| seen.insert((rule.antecedent.clone(), rule.consequent)))
        .collect();

    let sort_key = |rule: &AssociationRule| -> (String, Vec<String>) {
        let mut antecedent: Vec<String> = rule
            .antecedent
            .iter()
            .map(|&id| vocab.token(id).to_string())
            .collect();
        antecedent.sort();
        (vocab.token(rule.consequent).to_string(), antecedent)
    };
    rules.sort_by(|a, b| {
        b.lift
            .total_cmp(&a.lift)
            .then_with(|| b.confidence.total_cmp(&a.confidence))
            .then_with(|| b.support.total_cmp(&a.support))
            .then_with(|| sort_key(a).cmp(&sort_key(b)))
    });
    rules.truncate(params.top_k);

    info!("{} feedback: {} rules after filter", polarity, rules.len());

    rules
        .iter()
        .filter_map(|rule| to_parsed_rule(rule, &vocab, polarity))
        .collect()
}

fn to_parsed_rule(
    rule: &AssociationRule,
    vocab: &Vocabulary,
    polarity: Polarity,
) -> Option<ParsedRule> {
    let Token::Item(item) = vocab.token(rule.consequent) else {
        return None;
    };

    let conditions: BTreeMap<String, RawConditionValue> = rule
        .antecedent
        .iter()
        .filter_map(|&id| match vocab.token(id) {
            Token::Condition(attr, value) => Some((
                attr.as_str().to_string(),
                RawConditionValue::Single(value.clone()),
            )),
            Token::Item(_) => None,
        })
        .collect();

    Some(ParsedRule {
        conditions,
        suggested_plant: item.clone(),
        feedback: polarity,
        support: rule.support,
        confidence: rule.confidence,
        lift: rule.lift,
    })
}

/// Windowed miner writing the parsed-rules artifact
pub struct RuleMiner {
    params: MiningParams,
    window: Mutex<MiningWindow>,
    output_path: PathBuf,
}

impl RuleMiner {
    pub fn new(
        config: &MiningConfig,
        cursor_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            params: MiningParams::from(config),
            window: Mutex::new(MiningWindow::new(cursor_path, config.chunk_size)),
            output_path: output_path.into(),
        }
    }

    /// Override thresholds (CLI flags)
    pub fn with_params(mut self, params: MiningParams) -> Self {
        self.params = params;
        self
    }

    pub fn params(&self) -> &MiningParams {
        &self.params
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Mine the next window of the feedback log
    ///
    /// The cursor lock is held for the whole run so concurrent runs never
    /// mine the same chunk; the cursor only advances after the artifact is
    /// written.
    pub async fn mine_log(&self, store: &dyn FeedbackStore) -> Result<MiningReport> {
        let window = self.window.lock().await;

        let total = usize::try_from(store.count(None).await?)
            .map_err(|e| PlantwiseError::Other(format!("Feedback count overflow: {}", e)))?;
        let span = window.span(total);
        let records = store.fetch_range(span.offset, span.limit).await?;
        info!(
            "Mining chunk [{} - {}) of {} feedback records ({} fetched)",
            span.offset,
            span.end(),
            total,
            records.len()
        );

        let mut report = self.mine_and_write(records).await?;
        window.commit(&span)?;

        report.window = Some(span);
        Ok(report)
    }

    /// Mine an explicit set of records (e.g. a JSON export), ignoring the cursor
    pub async fn mine_records(&self, records: Vec<FeedbackRecord>) -> Result<MiningReport> {
        self.mine_and_write(records).await
    }

    async fn mine_and_write(&self, records: Vec<FeedbackRecord>) -> Result<MiningReport> {
        let params = self.params;
        let output = self.output_path.clone();

        tokio::task::spawn_blocking(move || -> Result<MiningReport> {
            let positive_records = records.iter().filter(|r| r.accepted).count();
            let negative_records = records.len() - positive_records;

            let rules = mine(&records, &params);
            write_json_atomic(&output, &rules)?;

            let positive_rules = rules.iter().filter(|r| r.feedback.is_positive()).count();
            info!("Saved {} parsed rules to {}", rules.len(), output.display());

            Ok(MiningReport {
                window: None,
                positive_records,
                negative_records,
                positive_rules,
                negative_rules: rules.len() - positive_rules,
                output,
            })
        })
        .await
        .map_err(|e| PlantwiseError::Other(format!("Mining task failed: {}", e)))?
    }
}
