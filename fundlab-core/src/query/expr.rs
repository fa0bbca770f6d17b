//! Backend-independent expression vocabulary.
//!
//! Expressions are plain values; the SQL and polars backends each translate
//! them. Nothing here resolves column names, so a reference to a missing
//! column only fails when the query is executed.

use std::fmt;

/// Literal values.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<bool> for Literal {
    fn from(v: bool) -> Self {
        Literal::Bool(v)
    }
}

impl From<i32> for Literal {
    fn from(v: i32) -> Self {
        Literal::Int(v as i64)
    }
}

impl From<i64> for Literal {
    fn from(v: i64) -> Self {
        Literal::Int(v)
    }
}

impl From<f64> for Literal {
    fn from(v: f64) -> Self {
        Literal::Float(v)
    }
}

impl From<&str> for Literal {
    fn from(v: &str) -> Self {
        Literal::Str(v.to_string())
    }
}

impl From<String> for Literal {
    fn from(v: String) -> Self {
        Literal::Str(v)
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    // Arithmetic
    Add,
    Subtract,
    Multiply,
    Divide,
    /// Integer quotient rounded toward negative infinity.
    FloorDivide,
    // Comparison
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    // Logical
    And,
    Or,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinaryOp::Add => write!(f, "+"),
            BinaryOp::Subtract => write!(f, "-"),
            BinaryOp::Multiply => write!(f, "*"),
            BinaryOp::Divide => write!(f, "/"),
            BinaryOp::FloorDivide => write!(f, "//"),
            BinaryOp::Eq => write!(f, "="),
            BinaryOp::NotEq => write!(f, "<>"),
            BinaryOp::Lt => write!(f, "<"),
            BinaryOp::LtEq => write!(f, "<="),
            BinaryOp::Gt => write!(f, ">"),
            BinaryOp::GtEq => write!(f, ">="),
            BinaryOp::And => write!(f, "AND"),
            BinaryOp::Or => write!(f, "OR"),
        }
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
    IsNull,
    IsNotNull,
}

/// Target types for `CAST`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CastType {
    Int,
    Float,
    Text,
}

/// Parts extractable from a date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatePart {
    Year,
    Month,
}

impl fmt::Display for DatePart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatePart::Year => write!(f, "YEAR"),
            DatePart::Month => write!(f, "MONTH"),
        }
    }
}

/// A scalar expression evaluated per row.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column(String),
    Literal(Literal),
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    /// First non-null argument.
    Coalesce(Vec<Expr>),
    Cast {
        expr: Box<Expr>,
        to: CastType,
    },
    DatePart {
        part: DatePart,
        expr: Box<Expr>,
    },
    /// `CASE WHEN condition THEN then ELSE otherwise END`
    Case {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
}

/// Column reference.
pub fn col(name: impl Into<String>) -> Expr {
    Expr::Column(name.into())
}

/// Literal value.
pub fn lit(value: impl Into<Literal>) -> Expr {
    Expr::Literal(value.into())
}

/// First non-null of `exprs`.
pub fn coalesce(exprs: impl IntoIterator<Item = Expr>) -> Expr {
    Expr::Coalesce(exprs.into_iter().collect())
}

/// Start a `CASE WHEN` expression.
pub fn when(condition: Expr) -> When {
    When { condition }
}

/// Intermediate state of `when(..).then(..).otherwise(..)`.
#[derive(Debug, Clone)]
pub struct When {
    condition: Expr,
}

impl When {
    pub fn then(self, value: Expr) -> Then {
        Then {
            condition: self.condition,
            then: value,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Then {
    condition: Expr,
    then: Expr,
}

impl Then {
    pub fn otherwise(self, value: Expr) -> Expr {
        Expr::Case {
            condition: Box::new(self.condition),
            then: Box::new(self.then),
            otherwise: Box::new(value),
        }
    }
}

impl Expr {
    fn binary(self, op: BinaryOp, right: Expr) -> Expr {
        Expr::Binary {
            left: Box::new(self),
            op,
            right: Box::new(right),
        }
    }

    fn unary(self, op: UnaryOp) -> Expr {
        Expr::Unary {
            op,
            expr: Box::new(self),
        }
    }

    pub fn eq(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Eq, other)
    }

    pub fn not_eq(self, other: Expr) -> Expr {
        self.binary(BinaryOp::NotEq, other)
    }

    pub fn lt(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Lt, other)
    }

    pub fn lt_eq(self, other: Expr) -> Expr {
        self.binary(BinaryOp::LtEq, other)
    }

    pub fn gt(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Gt, other)
    }

    pub fn gt_eq(self, other: Expr) -> Expr {
        self.binary(BinaryOp::GtEq, other)
    }

    pub fn and(self, other: Expr) -> Expr {
        self.binary(BinaryOp::And, other)
    }

    pub fn or(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Or, other)
    }

    pub fn add(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Add, other)
    }

    pub fn sub(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Subtract, other)
    }

    pub fn mul(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Multiply, other)
    }

    pub fn div(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Divide, other)
    }

    /// Integer quotient, rounded toward negative infinity. Always integer-typed.
    pub fn floor_div(self, other: Expr) -> Expr {
        self.binary(BinaryOp::FloorDivide, other)
    }

    pub fn not(self) -> Expr {
        self.unary(UnaryOp::Not)
    }

    pub fn is_null(self) -> Expr {
        self.unary(UnaryOp::IsNull)
    }

    pub fn is_not_null(self) -> Expr {
        self.unary(UnaryOp::IsNotNull)
    }

    pub fn cast(self, to: CastType) -> Expr {
        Expr::Cast {
            expr: Box::new(self),
            to,
        }
    }

    pub fn year(self) -> Expr {
        Expr::DatePart {
            part: DatePart::Year,
            expr: Box::new(self),
        }
    }

    pub fn month(self) -> Expr {
        Expr::DatePart {
            part: DatePart::Month,
            expr: Box::new(self),
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_nest_left_to_right() {
        let e = col("a").eq(lit("x")).and(col("b").gt(lit(3)));
        match e {
            Expr::Binary { op, left, .. } => {
                assert_eq!(op, BinaryOp::And);
                assert!(matches!(*left, Expr::Binary { op: BinaryOp::Eq, .. }));
            }
            other => panic!("expected AND, got {other:?}"),
        }
    }

    #[test]
    fn case_builder_produces_case_expr() {
        let e = when(col("m").gt(lit(3)))
            .then(col("y").add(lit(1)))
            .otherwise(col("y"));
        assert!(matches!(e, Expr::Case { .. }));
    }

    #[test]
    fn literal_conversions() {
        assert_eq!(Literal::from(5), Literal::Int(5));
        assert_eq!(Literal::from(0.0), Literal::Float(0.0));
        assert_eq!(Literal::from("USA"), Literal::Str("USA".into()));
    }
}
