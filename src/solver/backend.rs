//! Translation of the stored model into a `good_lp` problem.
//!
//! The pure-Rust `microlp` backend does not report row duals, so shadow prices come from a
//! second solve of the dual LP built over the final model with every integer column fixed
//! at its primal value.

use good_lp::solvers::microlp::microlp;
use good_lp::{
    constraint, variable, Expression, ProblemVariables, ResolutionError, Solution as _,
    SolverModel, Variable,
};

use super::{Column, Row};
use crate::solver::LinExpr;

/// Feasibility tolerance for rows that have no coefficients left.
const EMPTY_ROW_TOLERANCE: f64 = 1e-9;

#[derive(Debug)]
pub(crate) enum BackendFailure {
    Infeasible,
    Unbounded,
    Other(String),
}

impl From<ResolutionError> for BackendFailure {
    fn from(error: ResolutionError) -> Self {
        match error {
            ResolutionError::Infeasible => BackendFailure::Infeasible,
            ResolutionError::Unbounded => BackendFailure::Unbounded,
            other => BackendFailure::Other(other.to_string()),
        }
    }
}

fn live_rows(rows: &[Row]) -> impl Iterator<Item = (usize, &Row)> {
    rows.iter()
        .enumerate()
        .filter(|(_, row)| !row.is_free() && !row.coefficients.is_empty())
}

/// Rows whose coefficients all vanished still have to hold for the constant zero.
fn check_empty_rows(rows: &[Row]) -> Result<(), BackendFailure> {
    let violated = rows.iter().any(|row| {
        !row.is_free()
            && row.coefficients.is_empty()
            && (row.lower > EMPTY_ROW_TOLERANCE || row.upper < -EMPTY_ROW_TOLERANCE)
    });
    if violated {
        return Err(BackendFailure::Infeasible);
    }
    Ok(())
}

fn with_bounds<M: SolverModel>(mut model: M, expr: Expression, lower: f64, upper: f64) -> M {
    if lower == upper {
        return model.with(constraint!(expr == lower));
    }
    if lower.is_finite() {
        model = model.with(constraint!(expr.clone() >= lower));
    }
    if upper.is_finite() {
        model = model.with(constraint!(expr <= upper));
    }
    model
}

/// Solves the primal problem and returns the dense column values.
pub(crate) fn solve_primal(
    columns: &[Column],
    rows: &[Row],
    objective: &LinExpr,
) -> Result<Vec<f64>, BackendFailure> {
    check_empty_rows(rows)?;

    let mut problem = ProblemVariables::new();
    let vars: Vec<Variable> = columns
        .iter()
        .map(|column| {
            let definition = variable().min(column.lower).max(column.upper);
            if column.integer {
                problem.add(definition.integer())
            } else {
                problem.add(definition)
            }
        })
        .collect();

    let mut cost = Expression::from(0.0);
    for (col, coefficient) in objective.terms() {
        cost += coefficient * vars[col.index()];
    }

    let mut model = problem.minimise(cost).using(microlp);
    for (_, row) in live_rows(rows) {
        let mut expr = Expression::from(0.0);
        for (col, coefficient) in &row.coefficients {
            expr += *coefficient * vars[col.index()];
        }
        model = with_bounds(model, expr, row.lower, row.upper);
    }

    let solution = model.solve()?;
    Ok(vars.iter().map(|var| solution.value(*var)).collect())
}

/// Solves the dual LP and returns one dual value per row (zero for relaxed rows).
///
/// For `min cᵀx` subject to `L ≤ Ax ≤ U`, `l ≤ x ≤ u` the dual is
/// `max Lᵀp − Uᵀq + lᵀr − uᵀs` subject to `Aᵀ(p − q) + r − s = c`, all multipliers
/// non-negative and present only for finite bounds. The row dual is `p − q`, the
/// sensitivity of the optimal objective to the row's active bound.
pub(crate) fn solve_dual(
    columns: &[Column],
    rows: &[Row],
    objective: &LinExpr,
    primal: &[f64],
) -> Result<Vec<f64>, BackendFailure> {
    let mut problem = ProblemVariables::new();
    let mut dual_objective = Expression::from(0.0);
    let mut column_sums: Vec<Expression> = (0..columns.len())
        .map(|_| Expression::from(0.0))
        .collect();
    let mut touched = vec![false; columns.len()];
    let mut row_multipliers: Vec<(usize, Option<Variable>, Option<Variable>)> = Vec::new();

    for (index, row) in live_rows(rows) {
        let lower = row.lower.is_finite().then(|| problem.add(variable().min(0.0)));
        let upper = row.upper.is_finite().then(|| problem.add(variable().min(0.0)));
        if let Some(p) = lower {
            dual_objective += row.lower * p;
        }
        if let Some(q) = upper {
            dual_objective += -row.upper * q;
        }
        for (col, coefficient) in &row.coefficients {
            touched[col.index()] = true;
            let sum = &mut column_sums[col.index()];
            if let Some(p) = lower {
                *sum += *coefficient * p;
            }
            if let Some(q) = upper {
                *sum += -*coefficient * q;
            }
        }
        row_multipliers.push((index, lower, upper));
    }

    for (index, column) in columns.iter().enumerate() {
        let (lower, upper) = if column.integer {
            let fixed = primal[index].round();
            (fixed, fixed)
        } else {
            (column.lower, column.upper)
        };
        if lower.is_finite() {
            touched[index] = true;
            let r = problem.add(variable().min(0.0));
            dual_objective += lower * r;
            column_sums[index] += r;
        }
        if upper.is_finite() {
            touched[index] = true;
            let s = problem.add(variable().min(0.0));
            dual_objective += -upper * s;
            column_sums[index] += -1.0 * s;
        }
    }

    let mut model = problem.maximise(dual_objective).using(microlp);
    for (index, sum) in column_sums.into_iter().enumerate() {
        let cost = objective.coefficient(super::Col(index));
        if !touched[index] {
            if cost != 0.0 {
                return Err(BackendFailure::Unbounded);
            }
            continue;
        }
        model = model.with(constraint!(sum == cost));
    }

    let solution = model.solve()?;
    let mut duals = vec![0.0; rows.len()];
    for (index, lower, upper) in row_multipliers {
        let p = lower.map(|var| solution.value(var)).unwrap_or(0.0);
        let q = upper.map(|var| solution.value(var)).unwrap_or(0.0);
        duals[index] = p - q;
    }
    Ok(duals)
}
