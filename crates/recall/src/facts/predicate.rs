//! Delete predicates for facts
//!
//! Each scope field gets its own explicit condition: `IS NULL` when the
//! field is unset, equality otherwise. A single identity-style comparison
//! covering both cases is never used.

use crate::facts::dedup::normalize;
use crate::facts::types::FactRecord;
use crate::memory::filter::{FieldMatch, ScopeFilter};
use crate::memory::types::Scope;

/// Selects facts by exact scope and content
#[derive(Debug, Clone, PartialEq)]
pub struct FactPredicate {
    pub scope: ScopeFilter,
    /// Normalized content, compared case-insensitively
    pub content: String,
}

impl FactPredicate {
    pub fn new(scope: &Scope, content: &str) -> Self {
        Self {
            scope: ScopeFilter::exact(scope),
            content: normalize(content),
        }
    }

    pub fn matches(&self, fact: &FactRecord) -> bool {
        self.scope.matches_scope(&fact.scope)
            && normalize(&fact.content).to_lowercase() == self.content.to_lowercase()
    }

    /// Render as a SQL-style WHERE clause
    pub fn to_clause(&self) -> String {
        let content = FieldMatch::Equals(self.content.clone());
        let mut conditions: Vec<String> = [
            self.scope.guild.to_clause("guild_id"),
            self.scope.channel.to_clause("channel_id"),
            self.scope.user.to_clause("user_id"),
            content.to_clause("content"),
        ]
        .into_iter()
        .flatten()
        .collect();

        if conditions.is_empty() {
            conditions.push("1 = 1".to_string());
        }
        conditions.join(" AND ")
    }
}
