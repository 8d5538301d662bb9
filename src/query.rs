//! Typed SQL fragments for partial updates and optional filters.
//!
//! Column and table names are `&'static str`; every user-supplied value is a
//! bound parameter.

use rusqlite::types::Value;

#[derive(Debug, Default)]
pub struct Filter {
    clauses: Vec<String>,
    params: Vec<Value>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.clauses.push(format!("{column} = ?"));
        self.params.push(value.into());
        self
    }

    pub fn eq_opt<V: Into<Value>>(self, column: &'static str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.eq(column, v),
            None => self,
        }
    }

    pub fn gte_opt<V: Into<Value>>(mut self, column: &'static str, value: Option<V>) -> Self {
        if let Some(v) = value {
            self.clauses.push(format!("{column} >= ?"));
            self.params.push(v.into());
        }
        self
    }

    pub fn lte_opt<V: Into<Value>>(mut self, column: &'static str, value: Option<V>) -> Self {
        if let Some(v) = value {
            self.clauses.push(format!("{column} <= ?"));
            self.params.push(v.into());
        }
        self
    }

    /// Case-insensitive substring match over any of `columns`.
    pub fn search_opt(mut self, columns: &[&'static str], needle: Option<&str>) -> Self {
        let Some(needle) = needle.map(str::trim).filter(|s| !s.is_empty()) else {
            return self;
        };
        let pattern = format!("%{}%", needle.to_ascii_lowercase());
        let ors: Vec<String> = columns
            .iter()
            .map(|c| format!("LOWER({c}) LIKE ?"))
            .collect();
        self.clauses.push(format!("({})", ors.join(" OR ")));
        for _ in columns {
            self.params.push(Value::Text(pattern.clone()));
        }
        self
    }

    /// `" WHERE a = ? AND b = ?"`, or an empty string when there are no clauses.
    pub fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }

    pub fn into_params(self) -> Vec<Value> {
        self.params
    }
}

/// `UPDATE <table> SET ...` that only touches the assignments that were added.
#[derive(Debug)]
pub struct UpdateBuilder {
    table: &'static str,
    sets: Vec<&'static str>,
    params: Vec<Value>,
}

impl UpdateBuilder {
    pub fn new(table: &'static str) -> Self {
        Self {
            table,
            sets: Vec::new(),
            params: Vec::new(),
        }
    }

    pub fn set(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.sets.push(column);
        self.params.push(value.into());
        self
    }

    pub fn set_opt<V: Into<Value>>(self, column: &'static str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.set(column, v),
            None => self,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn build(self, filter: Filter) -> (String, Vec<Value>) {
        let assignments: Vec<String> = self.sets.iter().map(|c| format!("{c} = ?")).collect();
        let sql = format!(
            "UPDATE {} SET {}{}",
            self.table,
            assignments.join(", "),
            filter.where_sql()
        );
        let mut params = self.params;
        params.extend(filter.into_params());
        (sql, params)
    }
}
