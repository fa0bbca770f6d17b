//! In-memory evaluation of a `Query` with polars.
//!
//! Tables are registered as DataFrames under their `TableRef`; the query is
//! translated step by step into a `LazyFrame` and collected once.

use super::builder::{Query, Step, TableRef};
use super::expr::{BinaryOp, CastType, DatePart, Expr, Literal, UnaryOp};
use super::QueryError;
use polars::prelude as pl;
use polars::prelude::{DataFrame, DataType, IntoLazy, JoinArgs, JoinType, LazyFrame, SerReader};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Named in-memory tables a query can read.
#[derive(Debug, Default, Clone)]
pub struct LocalCatalog {
    tables: HashMap<TableRef, DataFrame>,
}

impl LocalCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, table: TableRef, df: DataFrame) {
        self.tables.insert(table, df);
    }

    /// Register a table from a Parquet snapshot.
    pub fn register_parquet(&mut self, table: TableRef, path: &Path) -> Result<(), QueryError> {
        let file = fs::File::open(path).map_err(|e| QueryError::Io {
            path: path.display().to_string(),
            cause: e.to_string(),
        })?;
        let df = pl::ParquetReader::new(file).finish()?;
        self.register(table, df);
        Ok(())
    }

    pub fn get(&self, table: &TableRef) -> Result<&DataFrame, QueryError> {
        self.tables
            .get(table)
            .ok_or_else(|| QueryError::UnknownTable(table.to_string()))
    }

    /// Build the lazy plan for `query` without executing it.
    pub fn plan(&self, query: &Query) -> Result<LazyFrame, QueryError> {
        let missing = query.tables().into_iter().find(|t| !self.tables.contains_key(*t));
        if let Some(table) = missing {
            return Err(QueryError::UnknownTable(table.to_string()));
        }
        let mut lf = self.get(query.source())?.clone().lazy();

        for step in query.steps() {
            lf = match step {
                Step::Filter(predicate) => lf.filter(to_polars(predicate)),
                Step::Select(projections) => lf.select(
                    projections
                        .iter()
                        .map(|p| pl::col(p.column.as_str()).alias(p.output_name()))
                        .collect::<Vec<_>>(),
                ),
                Step::InnerJoin(join) => {
                    let mut right_cols: Vec<pl::Expr> =
                        join.on.iter().map(|k| pl::col(k.as_str())).collect();
                    right_cols.extend(
                        join.columns
                            .iter()
                            .map(|p| pl::col(p.column.as_str()).alias(p.output_name())),
                    );
                    let right = self.get(&join.table)?.clone().lazy().select(right_cols);
                    let keys: Vec<pl::Expr> =
                        join.on.iter().map(|k| pl::col(k.as_str())).collect();
                    lf.join(right, keys.clone(), keys, JoinArgs::new(JoinType::Inner))
                }
                Step::Derive(derived) => lf.with_columns(
                    derived
                        .iter()
                        .map(|(name, expr)| to_polars(expr).alias(name.as_str()))
                        .collect::<Vec<_>>(),
                ),
            };
        }

        Ok(lf)
    }

    /// Execute `query` and materialize the result.
    pub fn collect(&self, query: &Query) -> Result<DataFrame, QueryError> {
        Ok(self.plan(query)?.collect()?)
    }
}

fn literal(value: &Literal) -> pl::Expr {
    match value {
        Literal::Null => pl::Expr::Literal(pl::LiteralValue::Null),
        Literal::Bool(v) => pl::lit(*v),
        // Small integers stay 32-bit so arithmetic on Int32 columns keeps its type.
        Literal::Int(v) => match i32::try_from(*v) {
            Ok(small) => pl::lit(small),
            Err(_) => pl::lit(*v),
        },
        Literal::Float(v) => pl::lit(*v),
        Literal::Str(s) => pl::lit(s.clone()),
    }
}

fn cast_dtype(to: CastType) -> DataType {
    match to {
        CastType::Int => DataType::Int32,
        CastType::Float => DataType::Float64,
        CastType::Text => DataType::String,
    }
}

/// Translate an expression to its polars equivalent.
pub fn to_polars(expr: &Expr) -> pl::Expr {
    match expr {
        Expr::Column(name) => pl::col(name.as_str()),
        Expr::Literal(value) => literal(value),
        Expr::Binary { left, op, right } => {
            let l = to_polars(left);
            let r = to_polars(right);
            match op {
                BinaryOp::Add => l + r,
                BinaryOp::Subtract => l - r,
                BinaryOp::Multiply => l * r,
                BinaryOp::Divide => l.cast(DataType::Float64) / r.cast(DataType::Float64),
                BinaryOp::FloorDivide => (l.cast(DataType::Float64) / r.cast(DataType::Float64))
                    .floor()
                    .cast(DataType::Int32),
                BinaryOp::Eq => l.eq(r),
                BinaryOp::NotEq => l.neq(r),
                BinaryOp::Lt => l.lt(r),
                BinaryOp::LtEq => l.lt_eq(r),
                BinaryOp::Gt => l.gt(r),
                BinaryOp::GtEq => l.gt_eq(r),
                BinaryOp::And => l.and(r),
                BinaryOp::Or => l.or(r),
            }
        }
        Expr::Unary { op, expr } => {
            let e = to_polars(expr);
            match op {
                UnaryOp::Not => e.not(),
                UnaryOp::IsNull => e.is_null(),
                UnaryOp::IsNotNull => e.is_not_null(),
            }
        }
        Expr::Coalesce(args) => {
            let mut iter = args.iter().rev();
            let Some(last) = iter.next() else {
                return pl::Expr::Literal(pl::LiteralValue::Null);
            };
            iter.fold(to_polars(last), |acc, arg| {
                let e = to_polars(arg);
                pl::when(e.clone().is_not_null()).then(e).otherwise(acc)
            })
        }
        Expr::Cast { expr, to } => to_polars(expr).cast(cast_dtype(*to)),
        Expr::DatePart { part, expr } => {
            let e = to_polars(expr);
            match part {
                DatePart::Year => e.dt().year().cast(DataType::Int32),
                DatePart::Month => e.dt().month().cast(DataType::Int32),
            }
        }
        Expr::Case {
            condition,
            then,
            otherwise,
        } => pl::when(to_polars(condition))
            .then(to_polars(then))
            .otherwise(to_polars(otherwise)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::expr::{coalesce, col, lit, when};
    use polars::prelude::{Column, NamedFrom, Series};

    fn table() -> TableRef {
        TableRef::bare("t")
    }

    fn catalog(df: DataFrame) -> LocalCatalog {
        let mut c = LocalCatalog::new();
        c.register(table(), df);
        c
    }

    #[test]
    fn unknown_table_is_an_error() {
        let c = LocalCatalog::new();
        let err = c.collect(&Query::from_table(table())).unwrap_err();
        assert!(matches!(err, QueryError::UnknownTable(name) if name == "t"));
    }

    #[test]
    fn unregistered_join_table_fails_before_planning() {
        let df = DataFrame::new(vec![Column::new("k".into(), [1i32, 2])]).unwrap();
        let c = catalog(df);
        let q = Query::from_table(table())
            .inner_join(TableRef::new("comp", "company"), &["k"], ["sic"]);
        let err = c.plan(&q).err().expect("plan should fail");
        assert!(matches!(err, QueryError::UnknownTable(name) if name == "comp.company"));
    }

    #[test]
    fn unknown_column_fails_at_collect() {
        let df = DataFrame::new(vec![Column::new("a".into(), [1i32, 2])]).unwrap();
        let c = catalog(df);
        let q = Query::from_table(table()).select(["missing"]);
        // Planning succeeds; the error only appears on execution.
        assert!(c.plan(&q).is_ok());
        assert!(c.collect(&q).is_err());
    }

    #[test]
    fn coalesce_prefers_first_non_null() {
        let df = DataFrame::new(vec![
            Column::new("a".into(), [Some(1.0), None, None]),
            Column::new("b".into(), [Some(9.0), Some(2.0), None]),
        ])
        .unwrap();
        let q = Query::from_table(table()).derive("c", coalesce([col("a"), col("b"), lit(0.0)]));
        let out = catalog(df).collect(&q).unwrap();
        let c: Vec<Option<f64>> = out.column("c").unwrap().f64().unwrap().into_iter().collect();
        assert_eq!(c, vec![Some(1.0), Some(2.0), Some(0.0)]);
    }

    #[test]
    fn floor_div_rounds_down_and_is_int32() {
        let df = DataFrame::new(vec![Column::new("x".into(), [3711i32, 99, -1])]).unwrap();
        let q = Query::from_table(table()).derive("y", col("x").floor_div(lit(100)));
        let out = catalog(df).collect(&q).unwrap();
        let y = out.column("y").unwrap();
        assert_eq!(y.dtype(), &DataType::Int32);
        let y: Vec<Option<i32>> = y.i32().unwrap().into_iter().collect();
        assert_eq!(y, vec![Some(37), Some(0), Some(-1)]);
    }

    #[test]
    fn case_with_date_parts() {
        // 2000-04-30 and 2000-02-29 as days since 1970-01-01.
        let days = Series::new("d".into(), [11077i32, 11016]);
        let df = DataFrame::new(vec![days.cast(&DataType::Date).unwrap().into()]).unwrap();
        let q = Query::from_table(table()).derive(
            "cy",
            when(col("d").month().gt(lit(3)))
                .then(col("d").year().add(lit(1)))
                .otherwise(col("d").year()),
        );
        let out = catalog(df).collect(&q).unwrap();
        let cy: Vec<Option<i32>> = out.column("cy").unwrap().i32().unwrap().into_iter().collect();
        assert_eq!(cy, vec![Some(2001), Some(2000)]);
    }

    #[test]
    fn inner_join_drops_unmatched_rows() {
        let left = DataFrame::new(vec![
            Column::new("k".into(), ["a", "b", "c"]),
            Column::new("v".into(), [1i32, 2, 3]),
        ])
        .unwrap();
        let right = DataFrame::new(vec![
            Column::new("k".into(), ["a", "c"]),
            Column::new("w".into(), ["x", "z"]),
            Column::new("unused".into(), [0i32, 0]),
        ])
        .unwrap();
        let mut c = catalog(left);
        c.register(TableRef::bare("r"), right);

        let q = Query::from_table(table()).inner_join(TableRef::bare("r"), &["k"], [("w", "label")]);
        let out = c.collect(&q).unwrap();

        assert_eq!(out.height(), 2);
        let names: Vec<String> = out.get_column_names().iter().map(|s| s.to_string()).collect();
        assert_eq!(names, vec!["k", "v", "label"]);
    }
}
