//! Query description passed to a [`Backend`](crate::backend::Backend).

use serde_json::Value;

/// Equality filter on one column.
#[derive(Clone, Debug, PartialEq)]
pub struct Filter {
    pub column: &'static str,
    pub value: Value,
}

impl Filter {
    pub fn eq(column: &'static str, value: impl Into<Value>) -> Self {
        Self {
            column,
            value: value.into(),
        }
    }

    /// Whether a row satisfies this filter. Missing columns never match.
    pub fn matches(&self, row: &Value) -> bool {
        row.get(self.column).is_some_and(|v| *v == self.value)
    }
}

/// Ascending sort key for a select.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Order {
    pub column: &'static str,
}

/// A select: conjunction of filters, optional ordering and limit.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::eq(column, value));
        self
    }

    pub fn order_asc(mut self, column: &'static str) -> Self {
        self.order = Some(Order { column });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, row: &Value) -> bool {
        self.filters.iter().all(|f| f.matches(row))
    }
}

/// How an upsert treats an existing row with the same conflict key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpsertMode {
    /// Merge the supplied columns into the existing row.
    Merge,
    /// Keep the existing row untouched.
    IgnoreDuplicates,
}
