//! Solver handle
//!
//! The [`Solver`] keeps the whole LP/MILP model in memory (columns, rows, objective) so rows
//! can be edited in place between solves. Every edit goes through a small set of calls
//! (`add_row`, `change_coefficient`, `change_row_bounds`, `relax_row`) which are counted in
//! [`SolverStats`]; a warm re-solve after a small parameter change should only show the
//! handful of edits that change actually needed.

mod backend;
pub mod expr;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::SolveError;
use backend::BackendFailure;
pub use expr::{Col, LinExpr, RowId, RowSpec};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverOptions {
    /// Solve the dual LP after every successful solve so shadow prices are available.
    #[serde(default = "default_compute_duals")]
    pub compute_duals: bool,
}

fn default_compute_duals() -> bool {
    true
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            compute_duals: default_compute_duals(),
        }
    }
}

/// Counters for every model edit issued since the solver was created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SolverStats {
    pub columns_added: usize,
    pub rows_added: usize,
    pub coefficient_changes: usize,
    pub bound_changes: usize,
    pub integrality_changes: usize,
    pub rows_relaxed: usize,
    pub solves: usize,
    /// Solves whose dual LP failed; their shadow prices read zero.
    pub dual_failures: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct Column {
    pub(crate) label: String,
    pub(crate) lower: f64,
    pub(crate) upper: f64,
    pub(crate) integer: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct Row {
    pub(crate) label: String,
    pub(crate) coefficients: BTreeMap<Col, f64>,
    pub(crate) lower: f64,
    pub(crate) upper: f64,
}

impl Row {
    pub(crate) fn is_free(&self) -> bool {
        self.lower == f64::NEG_INFINITY && self.upper == f64::INFINITY
    }
}

/// Result of the latest successful solve.
#[derive(Debug, Clone)]
pub struct Solution {
    values: Vec<f64>,
    row_duals: Option<Vec<f64>>,
    objective: f64,
}

impl Solution {
    pub fn objective(&self) -> f64 {
        self.objective
    }

    pub fn value(&self, col: Col) -> f64 {
        self.values.get(col.0).copied().unwrap_or(0.0)
    }

    pub fn values(&self, cols: &[Col]) -> Vec<f64> {
        cols.iter().map(|col| self.value(*col)).collect()
    }

    pub fn evaluate(&self, expr: &LinExpr) -> f64 {
        expr.evaluate(&self.values)
    }

    /// Dual value of a row; `None` when duals were not computed for this solve.
    pub fn row_dual(&self, row: RowId) -> Option<f64> {
        self.row_duals
            .as_ref()
            .map(|duals| duals.get(row.0).copied().unwrap_or(0.0))
    }

    pub fn has_duals(&self) -> bool {
        self.row_duals.is_some()
    }
}

/// In-memory LP/MILP model with stable row handles and minimal in-place edits.
#[derive(Debug, Default)]
pub struct Solver {
    options: SolverOptions,
    columns: Vec<Column>,
    rows: Vec<Row>,
    objective: LinExpr,
    stats: SolverStats,
    solution: Option<Solution>,
}

impl Solver {
    pub fn new(options: SolverOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    pub fn options(&self) -> &SolverOptions {
        &self.options
    }

    pub fn stats(&self) -> &SolverStats {
        &self.stats
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn add_column(&mut self, label: impl Into<String>, lower: f64, upper: f64) -> Col {
        let col = Col(self.columns.len());
        self.columns.push(Column {
            label: label.into(),
            lower,
            upper,
            integer: false,
        });
        self.stats.columns_added += 1;
        col
    }

    /// Adds `count` continuous columns labelled `label[i]`.
    pub fn add_columns(&mut self, label: &str, count: usize, lower: f64, upper: f64) -> Vec<Col> {
        (0..count)
            .map(|i| self.add_column(format!("{label}[{i}]"), lower, upper))
            .collect()
    }

    /// Drops every column from `len` onwards. Only valid while no row references them.
    pub(crate) fn truncate_columns(&mut self, len: usize) {
        let dropped = self.columns.len().saturating_sub(len);
        self.columns.truncate(len);
        self.stats.columns_added -= dropped;
    }

    pub fn column_label(&self, col: Col) -> &str {
        &self.columns[col.0].label
    }

    pub fn is_integer(&self, col: Col) -> bool {
        self.columns[col.0].integer
    }

    /// Marks a column integer or continuous; returns whether anything changed.
    pub fn set_integrality(&mut self, col: Col, integer: bool) -> bool {
        let column = &mut self.columns[col.0];
        if column.integer == integer {
            return false;
        }
        column.integer = integer;
        self.stats.integrality_changes += 1;
        true
    }

    pub fn add_row(&mut self, label: impl Into<String>, spec: &RowSpec) -> RowId {
        let id = RowId(self.rows.len());
        let label = label.into();
        debug!(row = id.0, %label, "adding row");
        self.rows.push(Row {
            label,
            coefficients: spec.expr.coefficients().clone(),
            lower: spec.lower,
            upper: spec.upper,
        });
        self.stats.rows_added += 1;
        id
    }

    pub fn row_bounds(&self, row: RowId) -> (f64, f64) {
        let row = &self.rows[row.0];
        (row.lower, row.upper)
    }

    pub fn row_coefficient(&self, row: RowId, col: Col) -> f64 {
        self.rows[row.0].coefficients.get(&col).copied().unwrap_or(0.0)
    }

    pub fn row_label(&self, row: RowId) -> &str {
        &self.rows[row.0].label
    }

    pub fn is_relaxed(&self, row: RowId) -> bool {
        self.rows[row.0].is_free()
    }

    pub fn change_coefficient(&mut self, row: RowId, col: Col, value: f64) {
        let coefficients = &mut self.rows[row.0].coefficients;
        if value == 0.0 {
            coefficients.remove(&col);
        } else {
            coefficients.insert(col, value);
        }
        self.stats.coefficient_changes += 1;
    }

    pub fn change_row_bounds(&mut self, row: RowId, lower: f64, upper: f64) {
        let row = &mut self.rows[row.0];
        row.lower = lower;
        row.upper = upper;
        self.stats.bound_changes += 1;
    }

    /// Brings a registered row in line with `spec`, issuing only the coefficient and bound
    /// changes that differ. Returns the number of edits.
    pub fn update_row(&mut self, id: RowId, spec: &RowSpec) -> usize {
        let row = &self.rows[id.0];
        let mut changes: Vec<(Col, f64)> = spec
            .expr
            .terms()
            .filter(|(col, value)| row.coefficients.get(col) != Some(value))
            .collect();
        changes.extend(
            row.coefficients
                .keys()
                .filter(|col| !spec.expr.coefficients().contains_key(col))
                .map(|col| (*col, 0.0)),
        );
        let bounds_changed = row.lower != spec.lower || row.upper != spec.upper;

        let mut edits = changes.len();
        for (col, value) in changes {
            self.change_coefficient(id, col, value);
        }
        if bounds_changed {
            self.change_row_bounds(id, spec.lower, spec.upper);
            edits += 1;
        }
        if edits > 0 {
            debug!(row = id.0, edits, "updated row in place");
        }
        edits
    }

    /// Leaves the row in the model with unconstrained bounds.
    pub fn relax_row(&mut self, row: RowId) {
        if self.is_relaxed(row) {
            return;
        }
        self.change_row_bounds(row, f64::NEG_INFINITY, f64::INFINITY);
        self.stats.rows_relaxed += 1;
    }

    pub fn set_objective(&mut self, objective: LinExpr) {
        self.objective = objective;
    }

    pub fn objective(&self) -> &LinExpr {
        &self.objective
    }

    pub fn solution(&self) -> Option<&Solution> {
        self.solution.as_ref()
    }

    /// Distinct labels of the rows currently constraining the model.
    fn active_classes(&self) -> Vec<String> {
        self.rows
            .iter()
            .filter(|row| !row.is_free())
            .map(|row| row.label.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// One dual per row. A failed dual solve still yields zeros so every shadow-price
    /// output keeps its shape; the failure is logged and counted.
    fn row_duals_or_zero(&mut self, outcome: Result<Vec<f64>, BackendFailure>) -> Vec<f64> {
        match outcome {
            Ok(duals) => duals,
            Err(failure) => {
                self.stats.dual_failures += 1;
                warn!(?failure, rows = self.rows.len(), "dual solve failed, shadow prices set to zero");
                vec![0.0; self.rows.len()]
            }
        }
    }

    /// Solves the current model and returns the objective value.
    ///
    /// A failed solve clears the previous solution so outputs never report stale values.
    pub fn run(&mut self) -> Result<f64, SolveError> {
        self.stats.solves += 1;
        let rows = self.rows.iter().filter(|row| !row.is_free()).count();
        let columns = self.columns.len();
        debug!(rows, columns, "solving model");

        let values = match backend::solve_primal(&self.columns, &self.rows, &self.objective) {
            Ok(values) => values,
            Err(failure) => {
                self.solution = None;
                return Err(match failure {
                    BackendFailure::Infeasible => SolveError::Infeasible {
                        rows,
                        columns,
                        classes: self.active_classes(),
                    },
                    BackendFailure::Unbounded => SolveError::Unbounded { rows, columns },
                    BackendFailure::Other(message) => SolveError::Backend(message),
                });
            }
        };

        let objective = self.objective.evaluate(&values);
        let row_duals = if self.options.compute_duals {
            let outcome = backend::solve_dual(&self.columns, &self.rows, &self.objective, &values);
            Some(self.row_duals_or_zero(outcome))
        } else {
            None
        };

        info!(objective, rows, columns, "solve complete");
        self.solution = Some(Solution {
            values,
            row_duals,
            objective,
        });
        Ok(objective)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-6,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn test_update_row_issues_minimal_edits() {
        let mut solver = Solver::default();
        let x = solver.add_column("x", 0.0, 10.0);
        let y = solver.add_column("y", 0.0, 10.0);
        let row = solver.add_row("limit", &(x * 1.0 + y * 2.0).leq(8.0));

        assert_eq!(solver.update_row(row, &(x * 1.0 + y * 2.0).leq(8.0)), 0);
        assert_eq!(solver.update_row(row, &(x * 1.0 + y * 3.0).leq(8.0)), 1);
        assert_eq!(solver.row_coefficient(row, y), 3.0);
        assert_eq!(solver.update_row(row, &LinExpr::from(x).leq(5.0)), 2);
        assert_eq!(solver.row_coefficient(row, y), 0.0);
        assert_eq!(solver.row_bounds(row), (f64::NEG_INFINITY, 5.0));
        assert_eq!(solver.stats().coefficient_changes, 2);
        assert_eq!(solver.stats().bound_changes, 1);
        assert_eq!(solver.stats().rows_added, 1);
    }

    #[test]
    fn test_solve_lp_with_duals() {
        let mut solver = Solver::default();
        let x = solver.add_column("x", 0.0, f64::INFINITY);
        let y = solver.add_column("y", 0.0, f64::INFINITY);
        let demand = solver.add_row("demand", &(x * 1.0 + y * 1.0).geq(10.0));
        let cap = solver.add_row("cap", &LinExpr::from(x).leq(4.0));
        solver.set_objective(x * 1.0 + y * 3.0);

        let objective = solver.run().unwrap();
        assert_close(objective, 4.0 + 18.0);

        let solution = solver.solution().unwrap();
        assert_close(solution.value(x), 4.0);
        assert_close(solution.value(y), 6.0);
        // Extra demand is served by y at 3, extra x capacity saves 2.
        assert_close(solution.row_dual(demand).unwrap(), 3.0);
        assert_close(solution.row_dual(cap).unwrap(), -2.0);
    }

    #[test]
    fn test_failed_dual_solve_reports_zero_prices() {
        let mut solver = Solver::default();
        let x = solver.add_column("x", 0.0, 5.0);
        let cap = solver.add_row("cap", &LinExpr::from(x).leq(4.0));
        solver.add_row("floor", &LinExpr::from(x).geq(1.0));

        let duals = solver.row_duals_or_zero(Err(BackendFailure::Other("stalled".to_string())));
        assert_eq!(duals, vec![0.0, 0.0]);
        assert_eq!(solver.stats().dual_failures, 1);

        let duals = solver.row_duals_or_zero(Ok(vec![-1.0, 0.0]));
        assert_eq!(duals[cap.index()], -1.0);
        assert_eq!(solver.stats().dual_failures, 1);
    }

    #[test]
    fn test_relaxed_row_is_ignored() {
        let mut solver = Solver::default();
        let x = solver.add_column("x", 0.0, 10.0);
        let floor = solver.add_row("floor", &LinExpr::from(x).geq(7.0));
        solver.set_objective(x * 1.0);
        assert_close(solver.run().unwrap(), 7.0);

        solver.relax_row(floor);
        solver.relax_row(floor);
        assert_eq!(solver.stats().rows_relaxed, 1);
        assert_close(solver.run().unwrap(), 0.0);
        assert_close(solver.solution().unwrap().row_dual(floor).unwrap(), 0.0);
    }

    #[test]
    fn test_infeasible_reports_classes() {
        let mut solver = Solver::default();
        let x = solver.add_column("x", 0.0, 1.0);
        solver.add_row("battery.energy_stored_min", &LinExpr::from(x).geq(2.0));
        match solver.run() {
            Err(SolveError::Infeasible { classes, .. }) => {
                assert_eq!(classes, vec!["battery.energy_stored_min".to_string()]);
            }
            other => panic!("expected infeasible, got {other:?}"),
        }
        assert!(solver.solution().is_none());
    }

    #[test]
    fn test_integer_column() {
        let mut solver = Solver::default();
        let x = solver.add_column("x", 0.0, 10.0);
        solver.set_integrality(x, true);
        solver.add_row("floor", &LinExpr::from(x).geq(2.5));
        solver.set_objective(x * 1.0);
        assert_close(solver.run().unwrap(), 3.0);
        assert!(!solver.set_integrality(x, true));
    }
}
