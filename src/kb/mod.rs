//! Knowledge base persistence and maintenance

pub mod store;
pub mod updater;

pub use store::KnowledgeBaseStore;
pub use updater::{update_knowledge_base, KbUpdater, MergeReport};
