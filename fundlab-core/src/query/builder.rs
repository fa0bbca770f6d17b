//! Immutable query value.
//!
//! A `Query` is a source table plus an ordered list of steps. Every builder
//! method consumes the query and returns an extended copy; nothing is
//! evaluated until a backend executes it.

use super::expr::{coalesce, col, Expr, Literal};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A remote table, optionally schema-qualified (`comp.funda`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TableRef {
    pub schema: Option<String>,
    pub name: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: Some(schema.into()),
            name: name.into(),
        }
    }

    pub fn bare(name: impl Into<String>) -> Self {
        Self {
            schema: None,
            name: name.into(),
        }
    }

    /// Parse `schema.table` or `table`.
    pub fn parse(s: &str) -> Result<Self, String> {
        let parts: Vec<&str> = s.split('.').collect();
        match parts.as_slice() {
            [name] if !name.is_empty() => Ok(Self::bare(*name)),
            [schema, name] if !schema.is_empty() && !name.is_empty() => {
                Ok(Self::new(*schema, *name))
            }
            _ => Err(format!("invalid table reference '{s}' (expected schema.table)")),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{schema}.{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

impl TryFrom<String> for TableRef {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        TableRef::parse(&value)
    }
}

impl From<TableRef> for String {
    fn from(value: TableRef) -> Self {
        value.to_string()
    }
}

/// A projected column, optionally renamed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    pub column: String,
    pub alias: Option<String>,
}

impl Projection {
    pub fn column(name: impl Into<String>) -> Self {
        Self {
            column: name.into(),
            alias: None,
        }
    }

    pub fn renamed(name: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            column: name.into(),
            alias: Some(alias.into()),
        }
    }

    /// Name of the column in the output.
    pub fn output_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.column)
    }
}

impl From<&str> for Projection {
    fn from(name: &str) -> Self {
        Projection::column(name)
    }
}

impl From<(&str, &str)> for Projection {
    fn from((name, alias): (&str, &str)) -> Self {
        Projection::renamed(name, alias)
    }
}

/// Inner join against a second table.
///
/// `on` names key columns present under the same name on both sides; the
/// output keeps the left side's keys and appends `columns` from the right.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub table: TableRef,
    pub on: Vec<String>,
    pub columns: Vec<Projection>,
}

/// One query step.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Filter(Expr),
    Select(Vec<Projection>),
    InnerJoin(Join),
    /// Add or replace columns. Expressions see only the step's input.
    Derive(Vec<(String, Expr)>),
}

/// Declarative relational query over a source table.
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub struct Query {
    source: TableRef,
    steps: Vec<Step>,
}

impl Query {
    /// Start a query reading all columns of `source`.
    pub fn from_table(source: TableRef) -> Self {
        Self {
            source,
            steps: Vec::new(),
        }
    }

    fn push(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Keep rows for which `predicate` is true.
    pub fn filter(self, predicate: Expr) -> Self {
        self.push(Step::Filter(predicate))
    }

    /// Keep only the given columns, in order, applying renames.
    pub fn select<P: Into<Projection>>(self, columns: impl IntoIterator<Item = P>) -> Self {
        self.push(Step::Select(columns.into_iter().map(Into::into).collect()))
    }

    /// Inner join `table` on equally-named key columns, pulling `columns`.
    /// Rows without a match on the right are dropped.
    pub fn inner_join<P: Into<Projection>>(
        self,
        table: TableRef,
        on: &[&str],
        columns: impl IntoIterator<Item = P>,
    ) -> Self {
        self.push(Step::InnerJoin(Join {
            table,
            on: on.iter().map(|s| s.to_string()).collect(),
            columns: columns.into_iter().map(Into::into).collect(),
        }))
    }

    /// Add (or replace) one column.
    pub fn derive(self, name: impl Into<String>, expr: Expr) -> Self {
        self.push(Step::Derive(vec![(name.into(), expr)]))
    }

    /// Add (or replace) several columns computed from the same input.
    pub fn derive_many(self, columns: impl IntoIterator<Item = (String, Expr)>) -> Self {
        self.push(Step::Derive(columns.into_iter().collect()))
    }

    /// Replace nulls in `columns` with `value`.
    pub fn fill_null(self, columns: &[&str], value: impl Into<Literal>) -> Self {
        let value = value.into();
        self.derive_many(columns.iter().map(|c| {
            (
                c.to_string(),
                coalesce([col(*c), Expr::Literal(value.clone())]),
            )
        }))
    }

    pub fn source(&self) -> &TableRef {
        &self.source
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Every table the query reads (source first, then join tables).
    pub fn tables(&self) -> Vec<&TableRef> {
        let mut out = vec![&self.source];
        for step in &self.steps {
            if let Step::InnerJoin(join) = step {
                if !out.contains(&&join.table) {
                    out.push(&join.table);
                }
            }
        }
        out
    }

    /// Output column names, when they can be known without the source schema.
    ///
    /// Returns `None` until a `select` fixes the column list.
    pub fn output_columns(&self) -> Option<Vec<String>> {
        let mut known: Option<Vec<String>> = None;
        for step in &self.steps {
            match step {
                Step::Filter(_) => {}
                Step::Select(projections) => {
                    known = Some(
                        projections
                            .iter()
                            .map(|p| p.output_name().to_string())
                            .collect(),
                    );
                }
                Step::InnerJoin(join) => {
                    if let Some(cols) = known.as_mut() {
                        cols.extend(join.columns.iter().map(|p| p.output_name().to_string()));
                    }
                }
                Step::Derive(derived) => {
                    if let Some(cols) = known.as_mut() {
                        for (name, _) in derived {
                            if !cols.contains(name) {
                                cols.push(name.clone());
                            }
                        }
                    }
                }
            }
        }
        known
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::expr::lit;

    #[test]
    fn table_ref_parse() {
        assert_eq!(
            TableRef::parse("comp.funda").unwrap(),
            TableRef::new("comp", "funda")
        );
        assert_eq!(TableRef::parse("funda").unwrap(), TableRef::bare("funda"));
        assert!(TableRef::parse("a.b.c").is_err());
        assert!(TableRef::parse(".funda").is_err());
        assert!(TableRef::parse("").is_err());
    }

    #[test]
    fn builder_is_a_value() {
        let base = Query::from_table(TableRef::new("comp", "funda"));
        let filtered = base.clone().filter(col("fyear").gt(lit(1960)));
        assert!(base.steps().is_empty());
        assert_eq!(filtered.steps().len(), 1);
    }

    #[test]
    fn output_columns_track_select_join_and_derive() {
        let q = Query::from_table(TableRef::new("comp", "funda"));
        assert_eq!(q.output_columns(), None);

        let q = q
            .select(["gvkey", "xrd"])
            .select([Projection::column("gvkey"), ("xrd", "rd").into()])
            .inner_join(TableRef::new("comp", "company"), &["gvkey"], ["sic"])
            .derive("sic4", col("sic").cast(crate::query::expr::CastType::Int))
            .fill_null(&["rd"], 0.0);

        assert_eq!(
            q.output_columns().unwrap(),
            vec!["gvkey", "rd", "sic", "sic4"]
        );
    }

    #[test]
    fn tables_lists_join_targets_once() {
        let company = TableRef::new("comp", "company");
        let q = Query::from_table(TableRef::new("comp", "funda"))
            .inner_join(company.clone(), &["gvkey"], ["sic"])
            .inner_join(company.clone(), &["gvkey"], ["naics"]);
        assert_eq!(q.tables().len(), 2);
        assert_eq!(q.tables()[1], &company);
    }

    #[test]
    fn fill_null_expands_to_coalesce() {
        let q = Query::from_table(TableRef::bare("t")).fill_null(&["a", "b"], 0.0);
        match &q.steps()[0] {
            Step::Derive(cols) => {
                assert_eq!(cols.len(), 2);
                assert_eq!(cols[0].0, "a");
                assert!(matches!(cols[0].1, Expr::Coalesce(_)));
            }
            other => panic!("expected derive, got {other:?}"),
        }
    }
}
