use crate::error::ModelError;
use crate::horizon::Series;
use crate::reactive::{ConfigParam, Declaration, Model, Param, Scope};
use crate::solver::{Col, LinExpr, RowSpec, Solver};

use super::{Ports, SegmentKind, SegmentModel};

/// Per-direction conversion loss: `out = in · η` with `η ∈ (0, 1]`.
///
/// An unset efficiency is lossless.
#[derive(Debug)]
pub struct Efficiency {
    periods: Param<Vec<f64>>,
    efficiency_source_target: Param<Series>,
    efficiency_target_source: Param<Series>,
    ports: Ports,
}

impl Efficiency {
    pub fn new(
        solver: &mut Solver,
        label: &str,
        periods: &[f64],
        efficiency_source_target: Option<Series>,
        efficiency_target_source: Option<Series>,
    ) -> Self {
        Self {
            periods: Param::with_value("periods", periods.to_vec()),
            efficiency_source_target: Param::with_optional(
                "efficiency_source_target",
                efficiency_source_target,
            ),
            efficiency_target_source: Param::with_optional(
                "efficiency_target_source",
                efficiency_target_source,
            ),
            ports: Ports::separate(solver, label, periods.len()),
        }
    }

    fn conversion(
        &self,
        scope: &mut Scope<'_, Self>,
        factor: &Param<Series>,
        inputs: &[Col],
        outputs: &[Col],
    ) -> Result<Option<Vec<RowSpec>>, ModelError> {
        let n = self.periods.get(scope)?.len();
        let factors = factor.resolve(scope, n)?.unwrap_or_else(|| vec![1.0; n]);
        if let Some(bad) = factors.iter().find(|eta| !(**eta > 0.0 && **eta <= 1.0)) {
            return Err(ModelError::invalid(
                factor.name(),
                format!("efficiency must lie in (0, 1], got {bad}"),
            ));
        }
        let rows = inputs
            .iter()
            .zip(outputs)
            .zip(&factors)
            .map(|((input, output), eta)| LinExpr::from(*output).equals(*input * *eta))
            .collect();
        Ok(Some(rows))
    }

    fn source_target(&self, scope: &mut Scope<'_, Self>) -> Result<Option<Vec<RowSpec>>, ModelError> {
        self.conversion(
            scope,
            &self.efficiency_source_target,
            &self.ports.in_st,
            &self.ports.out_st,
        )
    }

    fn target_source(&self, scope: &mut Scope<'_, Self>) -> Result<Option<Vec<RowSpec>>, ModelError> {
        self.conversion(
            scope,
            &self.efficiency_target_source,
            &self.ports.in_ts,
            &self.ports.out_ts,
        )
    }
}

impl Model for Efficiency {
    const DECLARATIONS: &'static [Declaration<Self>] = &[
        Declaration::constraint("efficiency_source_target", Self::source_target),
        Declaration::constraint("efficiency_target_source", Self::target_source),
    ];

    fn periods(&self) -> &Param<Vec<f64>> {
        &self.periods
    }

    fn periods_mut(&mut self) -> &mut Param<Vec<f64>> {
        &mut self.periods
    }

    fn config_param(&mut self, name: &str) -> Option<&mut dyn ConfigParam> {
        match name {
            "efficiency_source_target" => Some(&mut self.efficiency_source_target),
            "efficiency_target_source" => Some(&mut self.efficiency_target_source),
            _ => None,
        }
    }
}

impl SegmentModel for Efficiency {
    const KIND: SegmentKind = SegmentKind::Efficiency;

    fn ports(&self) -> &Ports {
        &self.ports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Computed, Reactive};

    #[test]
    fn test_rejects_efficiency_above_one() {
        let mut solver = Solver::default();
        let model = Efficiency::new(&mut solver, "e", &[1.0, 1.0], Some(Series::Scalar(1.2)), None);
        let mut reactive = Reactive::new(model);
        assert!(matches!(
            reactive.invoke("efficiency_source_target"),
            Err(ModelError::InvalidParameter { .. })
        ));
        // Unset direction defaults to lossless.
        let Computed::Rows(Some(rows)) = reactive.invoke("efficiency_target_source").unwrap() else {
            panic!("expected rows");
        };
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(RowSpec::is_equality));
    }
}
