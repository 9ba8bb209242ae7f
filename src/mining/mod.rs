//! Association rule mining over the feedback log
//!
//! - [`csv_input`]: feedback CSV exports
//! - [`fpgrowth`]: frequent itemsets and rule metrics
//! - [`miner`]: feedback encoding, filtering, ranking and the artifact
//! - [`window`]: rolling cursor over the log

pub mod csv_input;
pub mod fpgrowth;
pub mod miner;
pub mod window;

pub use csv_input::read_feedback_csv;
pub use fpgrowth::{AssociationRule, FpGrowth, FrequentItemsets};
pub use miner::{mine, MiningParams, MiningReport, RuleMiner};
pub use window::{MiningCursor, MiningWindow, WindowSpan};
