//! PostgreSQL rendering.
//!
//! Each step wraps the previous one in a sub-select, so a whole query becomes
//! a single statement the server plans and executes in one round trip.

use super::builder::{Query, Step, TableRef};
use super::expr::{BinaryOp, CastType, Expr, Literal, UnaryOp};
use std::fmt::Write;

/// Quote an identifier, doubling embedded quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quote a string literal, doubling embedded single quotes.
pub fn quote_str(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

pub fn table_sql(table: &TableRef) -> String {
    match &table.schema {
        Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(&table.name)),
        None => quote_ident(&table.name),
    }
}

fn literal_sql(value: &Literal) -> String {
    match value {
        Literal::Null => "NULL".to_string(),
        Literal::Bool(true) => "TRUE".to_string(),
        Literal::Bool(false) => "FALSE".to_string(),
        Literal::Int(v) => v.to_string(),
        Literal::Float(v) if v.is_nan() => "CAST('NaN' AS double precision)".to_string(),
        Literal::Float(v) if v.is_infinite() => {
            let sign = if *v > 0.0 { "" } else { "-" };
            format!("CAST('{sign}Infinity' AS double precision)")
        }
        // `{:?}` keeps the decimal point (0.0, not 0) so the literal stays numeric.
        Literal::Float(v) => format!("{v:?}"),
        Literal::Str(s) => quote_str(s),
    }
}

fn cast_type_sql(to: CastType) -> &'static str {
    match to {
        CastType::Int => "integer",
        CastType::Float => "double precision",
        CastType::Text => "text",
    }
}

/// Render an expression against unqualified column names.
pub fn expr_sql(expr: &Expr) -> String {
    match expr {
        Expr::Column(name) => quote_ident(name),
        Expr::Literal(value) => literal_sql(value),
        Expr::Binary {
            left,
            op: BinaryOp::FloorDivide,
            right,
        } => format!(
            "CAST(FLOOR(CAST({} AS double precision) / CAST({} AS double precision)) AS integer)",
            expr_sql(left),
            expr_sql(right)
        ),
        Expr::Binary { left, op, right } => {
            format!("({} {op} {})", expr_sql(left), expr_sql(right))
        }
        Expr::Unary { op, expr } => match op {
            UnaryOp::Not => format!("(NOT {})", expr_sql(expr)),
            UnaryOp::IsNull => format!("({} IS NULL)", expr_sql(expr)),
            UnaryOp::IsNotNull => format!("({} IS NOT NULL)", expr_sql(expr)),
        },
        Expr::Coalesce(args) => {
            let args: Vec<String> = args.iter().map(expr_sql).collect();
            format!("COALESCE({})", args.join(", "))
        }
        Expr::Cast { expr, to } => format!("CAST({} AS {})", expr_sql(expr), cast_type_sql(*to)),
        Expr::DatePart { part, expr } => {
            format!("CAST(EXTRACT({part} FROM {}) AS integer)", expr_sql(expr))
        }
        Expr::Case {
            condition,
            then,
            otherwise,
        } => format!(
            "CASE WHEN {} THEN {} ELSE {} END",
            expr_sql(condition),
            expr_sql(then),
            expr_sql(otherwise)
        ),
    }
}

/// Indent every line of a nested statement.
fn indent(sql: &str) -> String {
    sql.lines()
        .map(|line| format!("  {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// The relation a step reads from.
enum Relation {
    Table(TableRef),
    Subquery(String),
}

impl Relation {
    fn from_clause(&self, alias: &str) -> String {
        match self {
            Relation::Table(table) => format!("{} AS {alias}", table_sql(table)),
            Relation::Subquery(sql) => format!("(\n{}\n) AS {alias}", indent(sql)),
        }
    }
}

/// Render a query as one PostgreSQL `SELECT` statement.
pub fn render(query: &Query) -> String {
    let mut relation = Relation::Table(query.source().clone());
    let mut known: Option<Vec<String>> = None;

    for (i, step) in query.steps().iter().enumerate() {
        let alias = format!("q{}", i + 1);
        let from = relation.from_clause(&alias);
        let mut sql = String::new();

        match step {
            Step::Filter(predicate) => {
                let _ = write!(sql, "SELECT *\nFROM {from}\nWHERE {}", expr_sql(predicate));
            }
            Step::Select(projections) => {
                let items: Vec<String> = projections
                    .iter()
                    .map(|p| match &p.alias {
                        Some(alias) => format!("{} AS {}", quote_ident(&p.column), quote_ident(alias)),
                        None => quote_ident(&p.column),
                    })
                    .collect();
                let _ = write!(sql, "SELECT {}\nFROM {from}", items.join(", "));
                known = Some(projections.iter().map(|p| p.output_name().to_string()).collect());
            }
            Step::InnerJoin(join) => {
                let right = format!("r{}", i + 1);
                let mut items = vec![format!("{alias}.*")];
                items.extend(join.columns.iter().map(|p| {
                    format!(
                        "{right}.{} AS {}",
                        quote_ident(&p.column),
                        quote_ident(p.output_name())
                    )
                }));
                let on: Vec<String> = join
                    .on
                    .iter()
                    .map(|k| format!("{alias}.{key} = {right}.{key}", key = quote_ident(k)))
                    .collect();
                let _ = write!(
                    sql,
                    "SELECT {}\nFROM {from}\nINNER JOIN {} AS {right} ON {}",
                    items.join(", "),
                    table_sql(&join.table),
                    on.join(" AND ")
                );
                if let Some(cols) = known.as_mut() {
                    cols.extend(join.columns.iter().map(|p| p.output_name().to_string()));
                }
            }
            Step::Derive(derived) => {
                let items = match known.as_mut() {
                    Some(cols) => {
                        // Replaced columns keep their position; new ones go last.
                        let mut items: Vec<String> = cols
                            .iter()
                            .map(|c| match derived.iter().find(|(name, _)| name == c) {
                                Some((name, expr)) => {
                                    format!("{} AS {}", expr_sql(expr), quote_ident(name))
                                }
                                None => quote_ident(c),
                            })
                            .collect();
                        for (name, expr) in derived {
                            if !cols.contains(name) {
                                items.push(format!("{} AS {}", expr_sql(expr), quote_ident(name)));
                                cols.push(name.clone());
                            }
                        }
                        items
                    }
                    None => {
                        let mut items = vec!["*".to_string()];
                        items.extend(
                            derived
                                .iter()
                                .map(|(name, expr)| format!("{} AS {}", expr_sql(expr), quote_ident(name))),
                        );
                        items
                    }
                };
                let _ = write!(sql, "SELECT {}\nFROM {from}", items.join(", "));
            }
        }

        relation = Relation::Subquery(sql);
    }

    match relation {
        Relation::Table(table) => format!("SELECT *\nFROM {}", table_sql(&table)),
        Relation::Subquery(sql) => sql,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::expr::{col, lit, when};

    fn funda() -> TableRef {
        TableRef::new("comp", "funda")
    }

    #[test]
    fn bare_table() {
        let sql = render(&Query::from_table(funda()));
        assert_eq!(sql, "SELECT *\nFROM \"comp\".\"funda\"");
    }

    #[test]
    fn identifiers_and_strings_are_escaped() {
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(quote_str("O'Neil"), "'O''Neil'");
        assert_eq!(
            expr_sql(&col("conm").eq(lit("O'Neil"))),
            "(\"conm\" = 'O''Neil')"
        );
    }

    #[test]
    fn float_literals_keep_decimal_point() {
        assert_eq!(expr_sql(&lit(0.0)), "0.0");
        assert_eq!(expr_sql(&lit(2.5)), "2.5");
        assert_eq!(expr_sql(&lit(f64::NAN)), "CAST('NaN' AS double precision)");
    }

    #[test]
    fn filter_on_base_table() {
        let sql = render(&Query::from_table(funda()).filter(col("fyear").gt(lit(1960))));
        assert_eq!(
            sql,
            "SELECT *\nFROM \"comp\".\"funda\" AS q1\nWHERE (\"fyear\" > 1960)"
        );
    }

    #[test]
    fn select_renames() {
        let sql = render(&Query::from_table(funda()).select([("tic", "ticker")]));
        assert!(sql.starts_with("SELECT \"tic\" AS \"ticker\"\n"));
    }

    #[test]
    fn join_qualifies_keys_and_right_columns() {
        let sql = render(
            &Query::from_table(funda())
                .select(["gvkey", "fyear"])
                .inner_join(TableRef::new("comp", "company"), &["gvkey"], ["sic"]),
        );
        assert!(sql.contains("SELECT q2.*, r2.\"sic\" AS \"sic\""));
        assert!(sql.contains("INNER JOIN \"comp\".\"company\" AS r2 ON q2.\"gvkey\" = r2.\"gvkey\""));
    }

    #[test]
    fn derive_replaces_in_place_when_columns_known() {
        let sql = render(
            &Query::from_table(funda())
                .select(["gvkey", "xrd", "at"])
                .fill_null(&["xrd"], 0.0),
        );
        assert!(sql.starts_with("SELECT \"gvkey\", COALESCE(\"xrd\", 0.0) AS \"xrd\", \"at\"\n"));
    }

    #[test]
    fn derive_appends_when_columns_unknown() {
        let sql = render(&Query::from_table(funda()).derive("mve", col("csho").mul(col("prcc_f"))));
        assert!(sql.starts_with("SELECT *, (\"csho\" * \"prcc_f\") AS \"mve\"\n"));
    }

    #[test]
    fn date_parts_and_case_are_portable() {
        let e = when(col("datadate").month().gt(lit(3)))
            .then(col("datadate").year().add(lit(1)))
            .otherwise(col("datadate").year());
        assert_eq!(
            expr_sql(&e),
            "CASE WHEN (CAST(EXTRACT(MONTH FROM \"datadate\") AS integer) > 3) \
             THEN (CAST(EXTRACT(YEAR FROM \"datadate\") AS integer) + 1) \
             ELSE CAST(EXTRACT(YEAR FROM \"datadate\") AS integer) END"
        );
    }

    #[test]
    fn floor_division_is_integer_typed() {
        assert_eq!(
            expr_sql(&col("sic4").floor_div(lit(100))),
            "CAST(FLOOR(CAST(\"sic4\" AS double precision) / CAST(100 AS double precision)) AS integer)"
        );
    }

    #[test]
    fn nested_steps_are_indented_subqueries() {
        let sql = render(
            &Query::from_table(funda())
                .filter(col("a").eq(lit(1)))
                .filter(col("b").eq(lit(2))),
        );
        assert_eq!(
            sql,
            "SELECT *\nFROM (\n  SELECT *\n  FROM \"comp\".\"funda\" AS q1\n  WHERE (\"a\" = 1)\n) AS q2\nWHERE (\"b\" = 2)"
        );
    }
}
