//! Scope filters for memory and fact lookups
//!
//! Every scope field is matched with an explicit predicate: either the field
//! must be absent, must equal a value, or is not constrained. Absent and
//! present values are never compared with a single identity-style operator.

use crate::memory::types::{MemoryRecord, RecordKind, Scope};

/// Predicate for one nullable scope field
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FieldMatch {
    /// Field is not constrained
    #[default]
    Any,
    /// Field must be unset
    Absent,
    /// Field must be set to exactly this value
    Equals(String),
}

impl FieldMatch {
    /// Predicate matching exactly `value`, treating `None` as "must be absent"
    pub fn exact(value: Option<&str>) -> Self {
        match value {
            Some(v) => FieldMatch::Equals(v.to_string()),
            None => FieldMatch::Absent,
        }
    }

    /// Evaluate the predicate against a field value
    pub fn matches(&self, value: Option<&str>) -> bool {
        match self {
            FieldMatch::Any => true,
            FieldMatch::Absent => value.is_none(),
            FieldMatch::Equals(expected) => value == Some(expected.as_str()),
        }
    }

    /// Render as a SQL-style condition, `None` when unconstrained
    pub fn to_clause(&self, column: &str) -> Option<String> {
        match self {
            FieldMatch::Any => None,
            FieldMatch::Absent => Some(format!("{column} IS NULL")),
            FieldMatch::Equals(value) => {
                Some(format!("{column} = '{}'", value.replace('\'', "''")))
            }
        }
    }
}

/// Filter criteria over record scopes.
///
/// Multiple constraints are combined with AND logic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScopeFilter {
    pub guild: FieldMatch,
    pub channel: FieldMatch,
    pub user: FieldMatch,
    /// Restrict to one kind of record
    pub kind: Option<RecordKind>,
}

impl ScopeFilter {
    /// Create a new empty filter (no filtering applied)
    pub fn new() -> Self {
        Self::default()
    }

    /// Exact match on every scope field
    pub fn exact(scope: &Scope) -> Self {
        Self {
            guild: FieldMatch::exact(scope.guild_id.as_deref()),
            channel: FieldMatch::exact(scope.channel_id.as_deref()),
            user: FieldMatch::exact(scope.user_id.as_deref()),
            kind: None,
        }
    }

    /// Everything belonging to the conversation of `scope`.
    ///
    /// Guild and channel must match exactly; the user is only constrained for
    /// direct conversations that have neither guild nor channel.
    pub fn conversation(scope: &Scope) -> Self {
        let user = if scope.guild_id.is_none() && scope.channel_id.is_none() {
            FieldMatch::exact(scope.user_id.as_deref())
        } else {
            FieldMatch::Any
        };
        Self {
            guild: FieldMatch::exact(scope.guild_id.as_deref()),
            channel: FieldMatch::exact(scope.channel_id.as_deref()),
            user,
            kind: None,
        }
    }

    /// Restrict to one record kind
    pub fn with_kind(mut self, kind: RecordKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Constrain the user field
    pub fn with_user(mut self, user: FieldMatch) -> Self {
        self.user = user;
        self
    }

    /// Check a scope against the field predicates
    pub fn matches_scope(&self, scope: &Scope) -> bool {
        self.guild.matches(scope.guild_id.as_deref())
            && self.channel.matches(scope.channel_id.as_deref())
            && self.user.matches(scope.user_id.as_deref())
    }

    /// Check a record against the full filter
    pub fn matches(&self, record: &MemoryRecord) -> bool {
        self.kind.is_none_or(|kind| record.kind == kind) && self.matches_scope(&record.scope)
    }

    /// Build a SQL-style WHERE clause from this filter.
    /// Returns `None` if no filters are set.
    pub fn to_clause(&self) -> Option<String> {
        let mut conditions: Vec<String> = [
            self.guild.to_clause("guild_id"),
            self.channel.to_clause("channel_id"),
            self.user.to_clause("user_id"),
        ]
        .into_iter()
        .flatten()
        .collect();

        if let Some(kind) = self.kind {
            conditions.push(format!("kind = '{kind:?}'"));
        }

        if conditions.is_empty() {
            None
        } else {
            Some(conditions.join(" AND "))
        }
    }

    /// Check if this filter is empty (no conditions set)
    pub fn is_empty(&self) -> bool {
        self.guild == FieldMatch::Any
            && self.channel == FieldMatch::Any
            && self.user == FieldMatch::Any
            && self.kind.is_none()
    }
}
