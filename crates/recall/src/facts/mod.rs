//! Fact store
//!
//! Scoped, deduplicated statements about users and conversations, with
//! tiered lookup from the most specific scope to the global one.

pub mod dedup;
pub mod predicate;
pub mod store;
pub mod types;

pub use dedup::{DedupRule, normalize};
pub use predicate::FactPredicate;
pub use store::{FACTS_FILE, FactStore};
pub use types::{FactId, FactRecord};
