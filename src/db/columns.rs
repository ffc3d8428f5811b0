//! Parameterised INSERT/UPDATE construction for wide rows.
//!
//! Listing and profile inputs carry many optional fields; only the ones a
//! client actually sent are written so that database defaults still apply.
//! Column names come from code, values are always bound.

use chrono::NaiveDate;
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

/// Tables that accept generated statements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Homes,
    Users,
}

impl Table {
    fn name(self) -> &'static str {
        match self {
            Table::Homes => "homes",
            Table::Users => "users",
        }
    }
}

/// A bindable column value
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Text(String),
    Int(i32),
    Float(f64),
    Bool(bool),
    Date(NaiveDate),
    Json(serde_json::Value),
    Uuid(Uuid),
}

impl ColumnValue {
    fn push_bind(self, qb: &mut QueryBuilder<'_, Postgres>) {
        match self {
            ColumnValue::Text(v) => qb.push_bind(v),
            ColumnValue::Int(v) => qb.push_bind(v),
            ColumnValue::Float(v) => qb.push_bind(v),
            ColumnValue::Bool(v) => qb.push_bind(v),
            ColumnValue::Date(v) => qb.push_bind(v),
            ColumnValue::Json(v) => qb.push_bind(v),
            ColumnValue::Uuid(v) => qb.push_bind(v),
        };
    }
}

impl From<String> for ColumnValue {
    fn from(v: String) -> Self {
        ColumnValue::Text(v)
    }
}

impl From<&str> for ColumnValue {
    fn from(v: &str) -> Self {
        ColumnValue::Text(v.to_string())
    }
}

impl From<i32> for ColumnValue {
    fn from(v: i32) -> Self {
        ColumnValue::Int(v)
    }
}

impl From<f64> for ColumnValue {
    fn from(v: f64) -> Self {
        ColumnValue::Float(v)
    }
}

impl From<bool> for ColumnValue {
    fn from(v: bool) -> Self {
        ColumnValue::Bool(v)
    }
}

impl From<NaiveDate> for ColumnValue {
    fn from(v: NaiveDate) -> Self {
        ColumnValue::Date(v)
    }
}

impl From<serde_json::Value> for ColumnValue {
    fn from(v: serde_json::Value) -> Self {
        ColumnValue::Json(v)
    }
}

impl From<Uuid> for ColumnValue {
    fn from(v: Uuid) -> Self {
        ColumnValue::Uuid(v)
    }
}

/// Ordered column/value pairs destined for one table
#[derive(Debug, Clone)]
pub struct ColumnSet {
    table: Table,
    columns: Vec<(&'static str, ColumnValue)>,
}

impl ColumnSet {
    pub fn new(table: Table) -> Self {
        Self {
            table,
            columns: Vec::new(),
        }
    }

    pub fn set(&mut self, column: &'static str, value: impl Into<ColumnValue>) -> &mut Self {
        self.columns.push((column, value.into()));
        self
    }

    /// Set the column only when a value was provided
    pub fn set_opt<T: Into<ColumnValue>>(
        &mut self,
        column: &'static str,
        value: Option<T>,
    ) -> &mut Self {
        if let Some(value) = value {
            self.set(column, value);
        }
        self
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// `INSERT INTO <table> (<columns>) VALUES ($1, ..)`
    pub fn into_insert(self) -> QueryBuilder<'static, Postgres> {
        let mut qb = QueryBuilder::new(format!("INSERT INTO {} (", self.table.name()));
        let names: Vec<&str> = self.columns.iter().map(|(name, _)| *name).collect();
        qb.push(names.join(", "));
        qb.push(") VALUES (");
        for (i, (_, value)) in self.columns.into_iter().enumerate() {
            if i > 0 {
                qb.push(", ");
            }
            value.push_bind(&mut qb);
        }
        qb.push(")");
        qb
    }

    /// `UPDATE <table> SET <col> = $n, .., updated_at = NOW() WHERE <key> = $m`
    pub fn into_update(
        self,
        key: &'static str,
        key_value: impl Into<ColumnValue>,
    ) -> QueryBuilder<'static, Postgres> {
        let mut qb = QueryBuilder::new(format!("UPDATE {} SET ", self.table.name()));
        for (name, value) in self.columns {
            qb.push(name);
            qb.push(" = ");
            value.push_bind(&mut qb);
            qb.push(", ");
        }
        qb.push("updated_at = NOW() WHERE ");
        qb.push(key);
        qb.push(" = ");
        key_value.into().push_bind(&mut qb);
        qb
    }
}
