use crate::reactive::{ConfigParam, Declaration, Model, Param};
use crate::solver::Solver;

use super::{Ports, SegmentKind, SegmentModel};

/// Lossless stage with no behavior of its own.
#[derive(Debug)]
pub struct Passthrough {
    periods: Param<Vec<f64>>,
    ports: Ports,
}

impl Passthrough {
    pub fn new(solver: &mut Solver, label: &str, periods: &[f64]) -> Self {
        Self {
            periods: Param::with_value("periods", periods.to_vec()),
            ports: Ports::lossless(solver, label, periods.len()),
        }
    }
}

impl Model for Passthrough {
    const DECLARATIONS: &'static [Declaration<Self>] = &[];

    fn periods(&self) -> &Param<Vec<f64>> {
        &self.periods
    }

    fn periods_mut(&mut self) -> &mut Param<Vec<f64>> {
        &mut self.periods
    }

    fn config_param(&mut self, _name: &str) -> Option<&mut dyn ConfigParam> {
        None
    }
}

impl SegmentModel for Passthrough {
    const KIND: SegmentKind = SegmentKind::Passthrough;

    fn ports(&self) -> &Ports {
        &self.ports
    }
}
