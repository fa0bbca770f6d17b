//! The Compustat annual fundamentals extract.
//!
//! `comp.funda` restricted to one reporting variant, joined with the
//! `comp.company` header on `gvkey`, plus industry codes, zero-filled
//! items and a handful of derived research fields.

use crate::config::ExtractConfig;
use crate::query::{coalesce, col, lit, when, CastType, Projection, Query};

/// Fields pulled from the fundamentals table, in output order.
///
/// `tic` is exposed as `ticker`; `cik` and `conm` are renamed so they do not
/// collide with the company header's columns of the same name.
pub const FUNDA_FIELDS: &[(&str, Option<&str>)] = &[
    // identifiers and reporting variant
    ("gvkey", None),
    ("datadate", None),
    ("fyear", None),
    ("fyr", None),
    ("indfmt", None),
    ("datafmt", None),
    ("popsrc", None),
    ("consol", None),
    ("tic", Some("ticker")),
    ("cusip", None),
    ("cik", Some("cik_funda")),
    ("conm", Some("conm_funda")),
    ("fic", None),
    ("curcd", None),
    ("sich", None),
    // balance sheet
    ("at", None),
    ("act", None),
    ("che", None),
    ("rect", None),
    ("invt", None),
    ("ppent", None),
    ("ppegt", None),
    ("gdwl", None),
    ("intan", None),
    ("lt", None),
    ("lct", None),
    ("dlc", None),
    ("dltt", None),
    ("seq", None),
    ("ceq", None),
    ("pstk", None),
    ("pstkl", None),
    ("pstkrv", None),
    ("txditc", None),
    ("txdb", None),
    ("itcb", None),
    ("mib", None),
    // income statement
    ("sale", None),
    ("revt", None),
    ("cogs", None),
    ("xsga", None),
    ("xrd", None),
    ("xad", None),
    ("xint", None),
    ("dp", None),
    ("oibdp", None),
    ("oiadp", None),
    ("pi", None),
    ("txt", None),
    ("ib", None),
    ("ibc", None),
    ("ni", None),
    ("spi", None),
    ("xido", None),
    ("dvc", None),
    ("dvp", None),
    // cash flow
    ("oancf", None),
    ("ivncf", None),
    ("fincf", None),
    ("capx", None),
    ("aqc", None),
    ("sstk", None),
    ("prstkc", None),
    ("dltis", None),
    ("dltr", None),
    // market and other
    ("csho", None),
    ("prcc_f", None),
    ("prcc_c", None),
    ("ajex", None),
    ("emp", None),
];

/// Fields pulled from the company header.
pub const COMPANY_FIELDS: &[&str] = &["sic", "naics", "cik", "conm", "ipodate"];

/// Join key shared by both tables.
pub const JOIN_KEY: &str = "gvkey";

/// Items where "not reported" is treated as zero rather than missing.
pub const ZERO_FILL_FIELDS: &[&str] = &[
    "xrd", "xint", "spi", "dvc", "dvp", "txditc", "txdb", "itcb", "pstk", "pstkl", "pstkrv",
    "xido", "dltt", "dlc",
];

/// Columns added on top of the projected and joined fields.
pub const DERIVED_FIELDS: &[&str] = &["sic4", "sic2", "calyear", "mve", "ib_xspi"];

fn funda_projection() -> Vec<Projection> {
    FUNDA_FIELDS
        .iter()
        .map(|(name, alias)| match alias {
            Some(alias) => Projection::renamed(*name, *alias),
            None => Projection::column(*name),
        })
        .collect()
}

/// Build the fundamentals extract.
pub fn fundamentals_query(cfg: &ExtractConfig) -> Query {
    let v = &cfg.variant;

    Query::from_table(cfg.source_table.clone())
        .filter(
            col("indfmt")
                .eq(lit(v.indfmt.as_str()))
                .and(col("datafmt").eq(lit(v.datafmt.as_str())))
                .and(col("popsrc").eq(lit(v.popsrc.as_str())))
                .and(col("consol").eq(lit(v.consol.as_str()))),
        )
        .select(funda_projection())
        .inner_join(cfg.company_table.clone(), &[JOIN_KEY], COMPANY_FIELDS.iter().copied())
        // Historical SIC when present, else the header code.
        .derive(
            "sic4",
            coalesce([
                col("sich").cast(CastType::Int),
                col("sic").cast(CastType::Int),
            ])
            .cast(CastType::Int),
        )
        .derive("sic2", col("sic4").floor_div(lit(100)))
        .fill_null(ZERO_FILL_FIELDS, 0.0)
        // Fiscal years ending after March are assigned to the next calendar year.
        .derive(
            "calyear",
            when(col("datadate").month().gt(lit(3)))
                .then(col("datadate").year().add(lit(1)))
                .otherwise(col("datadate").year()),
        )
        .derive("mve", col("csho").mul(col("prcc_f")))
        .derive("ib_xspi", col("ib").sub(col("spi")))
        .filter(col("fyear").gt(lit(cfg.min_fyear)))
        .filter(col("fic").eq(lit(cfg.country.as_str())))
}

/// Every output column of the extract, in order.
pub fn output_columns() -> Vec<String> {
    FUNDA_FIELDS
        .iter()
        .map(|(name, alias)| alias.unwrap_or(name).to_string())
        .chain(COMPANY_FIELDS.iter().map(|s| s.to_string()))
        .chain(DERIVED_FIELDS.iter().map(|s| s.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Step;
    use std::collections::HashSet;

    #[test]
    fn output_names_are_unique() {
        let cols = output_columns();
        let unique: HashSet<&String> = cols.iter().collect();
        assert_eq!(unique.len(), cols.len(), "duplicate output column");
    }

    #[test]
    fn builder_agrees_with_declared_columns() {
        let q = fundamentals_query(&ExtractConfig::default());
        assert_eq!(q.output_columns().unwrap(), output_columns());
    }

    #[test]
    fn zero_fill_fields_are_projected() {
        let cols = output_columns();
        for f in ZERO_FILL_FIELDS {
            assert!(cols.iter().any(|c| c == f), "{f} is not projected");
        }
    }

    #[test]
    fn step_order_matches_pipeline() {
        let q = fundamentals_query(&ExtractConfig::default());
        let kinds: Vec<&str> = q
            .steps()
            .iter()
            .map(|s| match s {
                Step::Filter(_) => "filter",
                Step::Select(_) => "select",
                Step::InnerJoin(_) => "join",
                Step::Derive(_) => "derive",
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                "filter", "select", "join", "derive", "derive", "derive", "derive", "derive",
                "derive", "filter", "filter"
            ]
        );
    }

    #[test]
    fn sql_carries_every_constraint() {
        let sql = fundamentals_query(&ExtractConfig::default()).to_sql();
        for fragment in [
            "(\"indfmt\" = 'INDL')",
            "(\"datafmt\" = 'STD')",
            "(\"popsrc\" = 'D')",
            "(\"consol\" = 'C')",
            "INNER JOIN \"comp\".\"company\"",
            "(\"fyear\" > 1960)",
            "(\"fic\" = 'USA')",
            "\"tic\" AS \"ticker\"",
            "\"cik\" AS \"cik_funda\"",
            "COALESCE(\"xrd\", 0.0) AS \"xrd\"",
            "AS \"calyear\"",
            "(\"csho\" * \"prcc_f\") AS \"mve\"",
            "(\"ib\" - \"spi\") AS \"ib_xspi\"",
        ] {
            assert!(sql.contains(fragment), "missing {fragment} in:\n{sql}");
        }
        assert!(sql.contains("FROM \"comp\".\"funda\" AS q1"));
    }

    #[test]
    fn sql_is_deterministic() {
        let cfg = ExtractConfig::default();
        assert_eq!(fundamentals_query(&cfg).to_sql(), fundamentals_query(&cfg).to_sql());
    }
}
