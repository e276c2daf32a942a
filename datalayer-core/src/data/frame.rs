//! Deferred dataset plans and row materialization.
//!
//! A [`DatasetFrame`] pairs a polars `LazyFrame` with the set of column names
//! discovered when the dataset was loaded. Optional filters consult that set
//! instead of failing on a missing column. Nothing executes until `collect`.

use super::error::DataAccessError;
use chrono::NaiveDate;
use polars::prelude::*;
use serde_json::Value;
use std::collections::BTreeSet;

/// One materialized row: column name to JSON value.
pub type Row = serde_json::Map<String, Value>;

/// Days from 0001-01-01 (CE day 1) to 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Column names available in a loaded dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnSet(BTreeSet<String>);

impl ColumnSet {
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl FromIterator<String> for ColumnSet {
    fn from_iter<T: IntoIterator<Item = String>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A lazily evaluated view over every partition file of one dataset.
pub struct DatasetFrame {
    dataset: String,
    plan: LazyFrame,
    columns: ColumnSet,
}

impl DatasetFrame {
    /// Wrap a plan, resolving its schema once.
    pub fn new(dataset: impl Into<String>, mut plan: LazyFrame) -> Result<Self, DataAccessError> {
        let schema = plan.collect_schema().map_err(frame_err)?;
        let columns = schema
            .iter_fields()
            .map(|field| field.name().to_string())
            .collect();
        Ok(Self {
            dataset: dataset.into(),
            plan,
            columns,
        })
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    pub fn columns(&self) -> &ColumnSet {
        &self.columns
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains(name)
    }

    /// Fail with `MissingColumn` unless `name` is present.
    pub fn require_column(&self, name: &str) -> Result<(), DataAccessError> {
        if self.has_column(name) {
            Ok(())
        } else {
            Err(DataAccessError::MissingColumn {
                dataset: self.dataset.clone(),
                column: name.to_string(),
            })
        }
    }

    pub fn filter(mut self, predicate: Expr) -> Self {
        self.plan = self.plan.filter(predicate);
        self
    }

    /// Replace a column in place (name and presence unchanged).
    pub fn with_column(mut self, expr: Expr) -> Self {
        self.plan = self.plan.with_column(expr);
        self
    }

    /// Keep at most `n` rows of the plan so far. Later steps see only those.
    pub fn limit(mut self, n: u32) -> Self {
        self.plan = self.plan.limit(n as IdxSize);
        self
    }

    /// Rewrite the underlying plan (aggregations, projections).
    ///
    /// The column set is not recomputed; callers materialize right after.
    pub fn map_plan(mut self, f: impl FnOnce(LazyFrame) -> LazyFrame) -> Self {
        self.plan = f(self.plan);
        self
    }

    /// Execute the plan.
    pub fn collect(self) -> Result<DataFrame, DataAccessError> {
        self.plan.collect().map_err(frame_err)
    }

    /// Execute the plan and convert every row to JSON.
    pub fn collect_rows(self) -> Result<Vec<Row>, DataAccessError> {
        dataframe_to_rows(&self.collect()?)
    }
}

pub(crate) fn frame_err(e: PolarsError) -> DataAccessError {
    DataAccessError::Frame(e.to_string())
}

/// Convert a DataFrame to JSON objects, one per row.
pub fn dataframe_to_rows(df: &DataFrame) -> Result<Vec<Row>, DataAccessError> {
    let columns = df.get_columns();
    let mut rows = Vec::with_capacity(df.height());

    for i in 0..df.height() {
        let mut row = Row::new();
        for column in columns {
            let value = column.get(i).map_err(frame_err)?;
            row.insert(column.name().to_string(), any_value_to_json(value));
        }
        rows.push(row);
    }
    Ok(rows)
}

fn any_value_to_json(value: AnyValue<'_>) -> Value {
    match value {
        AnyValue::Null => Value::Null,
        AnyValue::Boolean(b) => Value::Bool(b),
        AnyValue::String(s) => Value::String(s.to_string()),
        AnyValue::StringOwned(s) => Value::String(s.to_string()),
        AnyValue::Int8(v) => Value::from(v),
        AnyValue::Int16(v) => Value::from(v),
        AnyValue::Int32(v) => Value::from(v),
        AnyValue::Int64(v) => Value::from(v),
        AnyValue::UInt8(v) => Value::from(v),
        AnyValue::UInt16(v) => Value::from(v),
        AnyValue::UInt32(v) => Value::from(v),
        AnyValue::UInt64(v) => Value::from(v),
        // Non-finite floats become null
        AnyValue::Float32(v) => Value::from(f64::from(v)),
        AnyValue::Float64(v) => Value::from(v),
        AnyValue::Date(days) => days
            .checked_add(UNIX_EPOCH_DAYS_FROM_CE)
            .and_then(NaiveDate::from_num_days_from_ce_opt)
            .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
            .unwrap_or(Value::Null),
        other => Value::String(other.to_string()),
    }
}
