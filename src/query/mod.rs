//! Query compilation.
//!
//! [`Qs2Sqla`] turns either a URL query string or a structured FETCH payload
//! into a [`ParsedQuery`]. Compilation never fails: every token that does not
//! fit the grammar or the resource's fields is collected into an `invalid`
//! list returned next to the query, and the caller decides what to do with it.

pub mod pagination;
pub mod payload;
pub mod qs;

pub use pagination::{PageStatus, Pagination, get_pagination};
pub use payload::{FetchPayload, FilterSpec, PaginationSpec, RelatedColumns, SortSpec};
pub use qs::Qs2Sqla;

use crate::config::JoinKind;
use sea_orm::Value;
use std::fmt;
use std::str::FromStr;

/// Comparison operators shared by both query forms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Like,
    NotLike,
    In,
    NotIn,
    IsNull,
    IsNotNull,
    Between,
    NotBetween,
}

impl FromStr for Operator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "==" | "=" | "eq" => Self::Eq,
            "!=" | "ne" => Self::Ne,
            ">" | "gt" => Self::Gt,
            ">=" | "ge" | "gte" => Self::Ge,
            "<" | "lt" => Self::Lt,
            "<=" | "le" | "lte" => Self::Le,
            "like" | "ilike" => Self::Like,
            "not_like" | "not_ilike" => Self::NotLike,
            "in" => Self::In,
            "not_in" => Self::NotIn,
            "is_null" => Self::IsNull,
            "is_not_null" => Self::IsNotNull,
            "between" => Self::Between,
            "not_between" => Self::NotBetween,
            _ => return Err(s.to_string()),
        })
    }
}

/// One test applied to a column
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `Eq`, `Ne`, `Gt`, `Ge`, `Lt` or `Le` against a single value
    Compare(Operator, Value),
    /// Case-insensitive pattern match, `%` and `_` are wildcards
    Like { pattern: String, negated: bool },
    In { values: Vec<Value>, negated: bool },
    Null { negated: bool },
    /// Inclusive `low..=high`; negated means `< low OR > high`
    Range { low: Value, high: Value, negated: bool },
}

/// All tests for one column; alternatives are OR-ed
#[derive(Debug, Clone, PartialEq)]
pub struct FilterClause {
    /// Relation the field belongs to, `None` for the resource itself
    pub relation: Option<String>,
    pub field: String,
    pub alternatives: Vec<Predicate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortDirective {
    pub relation: Option<String>,
    pub field: String,
    pub descending: bool,
}

/// Relation to eager-load next to each row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelatedLoad {
    pub relation: String,
    /// `None` loads every column of the target
    pub columns: Option<Vec<String>>,
}

/// Compiler output: what to select, filter, order and expand
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedQuery {
    pub fields: Vec<String>,
    pub filters: Vec<FilterClause>,
    pub orders: Vec<SortDirective>,
    pub related: Vec<RelatedLoad>,
    /// Term matched against every searchable field
    pub search: Option<String>,
}

/// A parsed query bound to page bounds, ready for the executor
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub query: ParsedQuery,
    pub page: u64,
    /// `None` returns every row on a single page
    pub limit: Option<u64>,
    pub join: JoinKind,
}

impl QueryPlan {
    #[must_use]
    pub fn new(query: ParsedQuery, page: u64, limit: Option<u64>, join: JoinKind) -> Self {
        Self {
            query,
            page,
            limit,
            join,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Gt => "gt",
            Self::Ge => "ge",
            Self::Lt => "lt",
            Self::Le => "le",
            Self::Like => "like",
            Self::NotLike => "not_like",
            Self::In => "in",
            Self::NotIn => "not_in",
            Self::IsNull => "is_null",
            Self::IsNotNull => "is_not_null",
            Self::Between => "between",
            Self::NotBetween => "not_between",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operators_accept_symbols_and_names() {
        assert_eq!("==".parse::<Operator>(), Ok(Operator::Eq));
        assert_eq!("ilike".parse::<Operator>(), Ok(Operator::Like));
        assert_eq!("NOT_IN".parse::<Operator>(), Ok(Operator::NotIn));
        assert_eq!(">=".parse::<Operator>(), Ok(Operator::Ge));
        assert_eq!("approx".parse::<Operator>(), Err("approx".to_string()));
    }

    #[test]
    fn operators_display_their_names() {
        assert_eq!(Operator::NotBetween.to_string(), "not_between");
        assert_eq!(
            Operator::NotBetween.to_string().parse::<Operator>(),
            Ok(Operator::NotBetween)
        );
    }
}
