use thiserror::Error;

/// Configuration, evaluation and output-shape failures raised while building or updating a
/// network. None of these are retried inside the crate.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Element '{0}' already exists in the network")]
    DuplicateElement(String),

    #[error("Element '{0}' does not exist in the network")]
    UnknownElement(String),

    #[error("Connection '{connection}' references missing endpoint '{endpoint}'")]
    MissingEndpoint { connection: String, endpoint: String },

    #[error("Parameter '{0}' has not been set")]
    UnsetParameter(&'static str),

    #[error("Invalid value for '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("Series '{name}' has {actual} values but {expected} were expected")]
    LengthMismatch {
        name: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("'{name}' is not declared on this element")]
    UnknownComputation { name: String },

    #[error("Computation '{0}' depends on itself")]
    CyclicComputation(&'static str),

    #[error("Output '{name}' expected {expected} but got {actual}")]
    OutputType {
        name: &'static str,
        expected: String,
        actual: String,
    },

    #[error("Element '{element}' failed to evaluate '{computation}': {source}")]
    Computation {
        element: String,
        computation: &'static str,
        #[source]
        source: Box<ModelError>,
    },
}

/// Failures reported by the solver backend.
#[derive(Debug, Error)]
pub enum SolveError {
    #[error("Model is infeasible ({rows} rows, {columns} columns; constraint classes: {})", .classes.join(", "))]
    Infeasible {
        rows: usize,
        columns: usize,
        classes: Vec<String>,
    },

    #[error("Model is unbounded ({rows} rows, {columns} columns)")]
    Unbounded { rows: usize, columns: usize },

    #[error("Solver backend failed: {0}")]
    Backend(String),
}

/// Umbrella error returned by [`crate::Network`] operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Solve(#[from] SolveError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl ModelError {
    pub fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        ModelError::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Attaches the element and computation that raised this error.
    pub fn within(self, element: &str, computation: &'static str) -> Self {
        match self {
            already @ ModelError::Computation { .. } => already,
            source => ModelError::Computation {
                element: element.to_string(),
                computation,
                source: Box::new(source),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = ModelError::MissingEndpoint {
            connection: "grid_link".to_string(),
            endpoint: "house".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Connection 'grid_link' references missing endpoint 'house'"
        );
    }

    #[test]
    fn test_within_wraps_once() {
        let error = ModelError::UnsetParameter("capacity")
            .within("battery", "energy_stored_max")
            .within("outer", "other");
        match error {
            ModelError::Computation { element, computation, .. } => {
                assert_eq!(element, "battery");
                assert_eq!(computation, "energy_stored_max");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_infeasible_lists_classes() {
        let error = SolveError::Infeasible {
            rows: 4,
            columns: 2,
            classes: vec!["battery.energy_stored_max".into(), "node.balance".into()],
        };
        assert!(error.to_string().contains("battery.energy_stored_max, node.balance"));
    }
}
