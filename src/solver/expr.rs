//! Linear expressions over solver columns.
//!
//! Elements never touch backend variables directly. They build [`LinExpr`] values over
//! opaque [`Col`] handles and turn them into [`RowSpec`]s, which the [`super::Solver`]
//! stores and later translates for the backend.

use std::collections::BTreeMap;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

/// Handle to a decision variable (column) owned by a [`super::Solver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Col(pub(crate) usize);

impl Col {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Handle to a constraint row owned by a [`super::Solver`].
///
/// Rows are never deleted, so a handle stays valid for the lifetime of its solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowId(pub(crate) usize);

impl RowId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Affine expression `Σ coef·col + constant`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinExpr {
    terms: BTreeMap<Col, f64>,
    constant: f64,
}

impl LinExpr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn constant(value: f64) -> Self {
        Self {
            terms: BTreeMap::new(),
            constant: value,
        }
    }

    pub fn term(col: Col, coefficient: f64) -> Self {
        let mut expr = Self::new();
        expr.add_term(col, coefficient);
        expr
    }

    /// Weighted sum of columns.
    pub fn weighted<I>(terms: I) -> Self
    where
        I: IntoIterator<Item = (Col, f64)>,
    {
        let mut expr = Self::new();
        for (col, coefficient) in terms {
            expr.add_term(col, coefficient);
        }
        expr
    }

    /// Adds `coefficient·col`, dropping the entry if the coefficients cancel out.
    pub fn add_term(&mut self, col: Col, coefficient: f64) {
        if coefficient == 0.0 {
            return;
        }
        let entry = self.terms.entry(col).or_insert(0.0);
        *entry += coefficient;
        if *entry == 0.0 {
            self.terms.remove(&col);
        }
    }

    pub fn terms(&self) -> impl Iterator<Item = (Col, f64)> + '_ {
        self.terms.iter().map(|(col, coefficient)| (*col, *coefficient))
    }

    pub fn coefficients(&self) -> &BTreeMap<Col, f64> {
        &self.terms
    }

    pub fn coefficient(&self, col: Col) -> f64 {
        self.terms.get(&col).copied().unwrap_or(0.0)
    }

    pub fn constant_term(&self) -> f64 {
        self.constant
    }

    pub fn is_constant(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty() && self.constant == 0.0
    }

    /// Evaluates the expression against a dense column value vector.
    pub fn evaluate(&self, values: &[f64]) -> f64 {
        self.terms
            .iter()
            .map(|(col, coefficient)| coefficient * values.get(col.0).copied().unwrap_or(0.0))
            .sum::<f64>()
            + self.constant
    }

    pub fn leq(self, rhs: impl Into<LinExpr>) -> RowSpec {
        RowSpec::new(self - rhs.into(), f64::NEG_INFINITY, 0.0)
    }

    pub fn geq(self, rhs: impl Into<LinExpr>) -> RowSpec {
        RowSpec::new(self - rhs.into(), 0.0, f64::INFINITY)
    }

    pub fn equals(self, rhs: impl Into<LinExpr>) -> RowSpec {
        RowSpec::new(self - rhs.into(), 0.0, 0.0)
    }
}

impl From<Col> for LinExpr {
    fn from(col: Col) -> Self {
        LinExpr::term(col, 1.0)
    }
}

impl From<f64> for LinExpr {
    fn from(value: f64) -> Self {
        LinExpr::constant(value)
    }
}

impl<T: Into<LinExpr>> AddAssign<T> for LinExpr {
    fn add_assign(&mut self, rhs: T) {
        let rhs = rhs.into();
        for (col, coefficient) in rhs.terms {
            self.add_term(col, coefficient);
        }
        self.constant += rhs.constant;
    }
}

impl<T: Into<LinExpr>> SubAssign<T> for LinExpr {
    fn sub_assign(&mut self, rhs: T) {
        let rhs = rhs.into();
        for (col, coefficient) in rhs.terms {
            self.add_term(col, -coefficient);
        }
        self.constant -= rhs.constant;
    }
}

impl<T: Into<LinExpr>> Add<T> for LinExpr {
    type Output = LinExpr;

    fn add(mut self, rhs: T) -> LinExpr {
        self += rhs;
        self
    }
}

impl<T: Into<LinExpr>> Sub<T> for LinExpr {
    type Output = LinExpr;

    fn sub(mut self, rhs: T) -> LinExpr {
        self -= rhs;
        self
    }
}

impl Mul<f64> for LinExpr {
    type Output = LinExpr;

    fn mul(mut self, rhs: f64) -> LinExpr {
        if rhs == 0.0 {
            return LinExpr::new();
        }
        for coefficient in self.terms.values_mut() {
            *coefficient *= rhs;
        }
        self.constant *= rhs;
        self
    }
}

impl Mul<f64> for Col {
    type Output = LinExpr;

    fn mul(self, rhs: f64) -> LinExpr {
        LinExpr::term(self, rhs)
    }
}

impl Neg for LinExpr {
    type Output = LinExpr;

    fn neg(self) -> LinExpr {
        self * -1.0
    }
}

impl Sum for LinExpr {
    fn sum<I: Iterator<Item = LinExpr>>(iter: I) -> Self {
        iter.fold(LinExpr::new(), |acc, expr| acc + expr)
    }
}

/// A bounded row `lower ≤ expr ≤ upper` with the constant folded into the bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct RowSpec {
    pub expr: LinExpr,
    pub lower: f64,
    pub upper: f64,
}

impl RowSpec {
    pub fn new(mut expr: LinExpr, lower: f64, upper: f64) -> Self {
        let offset = expr.constant;
        expr.constant = 0.0;
        Self {
            expr,
            lower: lower - offset,
            upper: upper - offset,
        }
    }

    pub fn is_equality(&self) -> bool {
        self.lower == self.upper
    }
}
