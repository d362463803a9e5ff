//! Filter compiler.
//!
//! A [`Filter`] is an AND-list of typed [`Predicate`]s plus ordering and
//! pagination. [`compile`] turns it into a parameterized WHERE clause and a
//! separate ORDER BY / LIMIT / OFFSET tail. Column names are checked against
//! the target table's column list, so no caller-supplied text is ever
//! spliced into SQL unchecked.

use rusqlite::types::Value;

use crate::error::{Result, StorageError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// A single row-selection condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `column = value`
    Equals { column: String, value: Value },
    /// Inclusive bounds; a missing bound is unconstrained.
    Range {
        column: String,
        min: Option<Value>,
        max: Option<Value>,
    },
    /// The JSON array stored in `column` contains the string `element`.
    Contains { column: String, element: String },
    /// Any of `columns` contains `term` as a substring.
    Like { columns: Vec<String>, term: String },
    /// `column IS NULL` (or `IS NOT NULL` when `negated`).
    IsNull { column: String, negated: bool },
}

/// Row-selection, ordering and pagination intent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub predicates: Vec<Predicate>,
    pub order_by: Option<(String, SortDirection)>,
    pub limit: Option<u64>,
    /// Only applied together with `limit`.
    pub offset: Option<u64>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn eq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(Predicate::Equals {
            column: column.into(),
            value: value.into(),
        })
    }

    pub fn eq_text(self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.eq(column, Value::Text(value.into()))
    }

    pub fn range(self, column: impl Into<String>, min: Option<Value>, max: Option<Value>) -> Self {
        self.push(Predicate::Range {
            column: column.into(),
            min,
            max,
        })
    }

    pub fn contains(self, column: impl Into<String>, element: impl Into<String>) -> Self {
        self.push(Predicate::Contains {
            column: column.into(),
            element: element.into(),
        })
    }

    pub fn like(self, columns: &[&str], term: impl Into<String>) -> Self {
        self.push(Predicate::Like {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            term: term.into(),
        })
    }

    pub fn is_null(self, column: impl Into<String>) -> Self {
        self.push(Predicate::IsNull {
            column: column.into(),
            negated: false,
        })
    }

    pub fn is_not_null(self, column: impl Into<String>) -> Self {
        self.push(Predicate::IsNull {
            column: column.into(),
            negated: true,
        })
    }

    pub fn order_by(mut self, column: impl Into<String>, direction: SortDirection) -> Self {
        self.order_by = Some((column.into(), direction));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Append `other`'s predicates. Ordering and pagination set on `other`
    /// override those on `self`.
    pub fn merge(mut self, other: Filter) -> Self {
        self.predicates.extend(other.predicates);
        if other.order_by.is_some() {
            self.order_by = other.order_by;
        }
        if other.limit.is_some() {
            self.limit = other.limit;
        }
        if other.offset.is_some() {
            self.offset = other.offset;
        }
        self
    }

    /// Same predicates, without ordering or pagination.
    pub fn predicates_only(&self) -> Filter {
        Filter {
            predicates: self.predicates.clone(),
            ..Filter::default()
        }
    }
}

/// Output of [`compile`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledFilter {
    /// Individual conditions, ANDed together in `where_clause`.
    pub conditions: Vec<String>,
    /// `WHERE ...`, or empty when there are no conditions.
    pub where_clause: String,
    /// Bound values for the `?` placeholders, in order.
    pub params: Vec<Value>,
    /// `ORDER BY ... LIMIT ... OFFSET ...`, or empty.
    pub tail: String,
}

impl CompiledFilter {
    /// Assemble `<head> <where> <tail>` with single spaces.
    pub fn apply_to(&self, head: &str) -> String {
        let mut sql = head.to_string();
        for part in [&self.where_clause, &self.tail] {
            if !part.is_empty() {
                sql.push(' ');
                sql.push_str(part);
            }
        }
        sql
    }
}

/// Compile `filter` for a table whose columns are `columns`.
pub fn compile(filter: &Filter, columns: &[&str]) -> Result<CompiledFilter> {
    let check = |column: &str| -> Result<()> {
        if columns.contains(&column) {
            Ok(())
        } else {
            Err(StorageError::InvalidFilter(format!(
                "unknown column '{}'",
                column
            )))
        }
    };

    let mut conditions = Vec::with_capacity(filter.predicates.len());
    let mut params = Vec::new();

    for predicate in &filter.predicates {
        match predicate {
            Predicate::Equals { column, value } => {
                check(column)?;
                if matches!(value, Value::Null) {
                    conditions.push(format!("{} IS NULL", column));
                } else {
                    conditions.push(format!("{} = ?", column));
                    params.push(value.clone());
                }
            }
            Predicate::Range { column, min, max } => {
                check(column)?;
                if let Some(min) = min {
                    conditions.push(format!("{} >= ?", column));
                    params.push(min.clone());
                }
                if let Some(max) = max {
                    conditions.push(format!("{} <= ?", column));
                    params.push(max.clone());
                }
            }
            Predicate::Contains { column, element } => {
                check(column)?;
                let encoded = serde_json::to_string(element)?;
                conditions.push(format!("{} LIKE ? ESCAPE '\\'", column));
                params.push(Value::Text(format!("%{}%", escape_like(&encoded))));
            }
            Predicate::Like { columns: like_columns, term } => {
                if like_columns.is_empty() {
                    return Err(StorageError::InvalidFilter(
                        "text search needs at least one column".to_string(),
                    ));
                }
                let pattern = format!("%{}%", escape_like(term));
                let mut alternatives = Vec::with_capacity(like_columns.len());
                for column in like_columns {
                    check(column)?;
                    alternatives.push(format!("{} LIKE ? ESCAPE '\\'", column));
                    params.push(Value::Text(pattern.clone()));
                }
                if alternatives.len() == 1 {
                    conditions.extend(alternatives);
                } else {
                    conditions.push(format!("({})", alternatives.join(" OR ")));
                }
            }
            Predicate::IsNull { column, negated } => {
                check(column)?;
                let op = if *negated { "IS NOT NULL" } else { "IS NULL" };
                conditions.push(format!("{} {}", column, op));
            }
        }
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    let mut tail = Vec::new();
    if let Some((column, direction)) = &filter.order_by {
        check(column)?;
        tail.push(format!("ORDER BY {} {}", column, direction.as_sql()));
    }
    if let Some(limit) = filter.limit {
        tail.push(format!("LIMIT {}", limit));
        if let Some(offset) = filter.offset {
            tail.push(format!("OFFSET {}", offset));
        }
    }

    Ok(CompiledFilter {
        conditions,
        where_clause,
        params,
        tail: tail.join(" "),
    })
}

/// Escape `%`, `_` and `\` for a LIKE pattern using `ESCAPE '\'`.
fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
