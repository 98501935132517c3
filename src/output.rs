//! Typed output series handed back to the host after a solve.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::ModelError;

/// Semantic type of an output series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OutputType {
    Power,
    PowerFlow,
    Energy,
    StateOfCharge,
    Price,
    ShadowPrice,
    Duration,
    Status,
}

impl OutputType {
    pub fn default_unit(self) -> &'static str {
        match self {
            OutputType::Power | OutputType::PowerFlow => "kW",
            OutputType::Energy => "kWh",
            OutputType::StateOfCharge => "%",
            OutputType::Price => "$/kWh",
            OutputType::ShadowPrice => "$/kW",
            OutputType::Duration => "h",
            OutputType::Status => "",
        }
    }
}

/// How many values a series carries for a horizon of `n` periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Shape {
    /// One value per period (`n`).
    Interval,
    /// One value per period edge (`n + 1`).
    Boundary,
    /// A single value.
    Scalar,
}

impl Shape {
    pub fn len(self, periods: usize) -> usize {
        match self {
            Shape::Interval => periods,
            Shape::Boundary => periods + 1,
            Shape::Scalar => 1,
        }
    }
}

/// Sign convention hint for consumers (`+` produces into / `-` draws from the network).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "+")]
    Positive,
    #[serde(rename = "-")]
    Negative,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputData {
    pub output_type: OutputType,
    pub unit: &'static str,
    pub shape: Shape,
    pub values: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
}

impl OutputData {
    /// Builds a series, rejecting values whose length disagrees with `shape` over `periods`.
    pub fn new(
        name: &'static str,
        output_type: OutputType,
        shape: Shape,
        values: Vec<f64>,
        periods: usize,
    ) -> Result<Self, ModelError> {
        let expected = shape.len(periods);
        if values.len() != expected {
            return Err(ModelError::OutputType {
                name,
                expected: format!("{shape} series of {expected} values"),
                actual: format!("{} values", values.len()),
            });
        }
        Ok(Self {
            output_type,
            unit: output_type.default_unit(),
            shape,
            values,
            direction: None,
        })
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }

    pub fn with_unit(mut self, unit: &'static str) -> Self {
        self.unit = unit;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_is_validated() {
        let ok = OutputData::new("stored", OutputType::Energy, Shape::Boundary, vec![0.0; 4], 3);
        assert_eq!(ok.unwrap().unit, "kWh");

        let err = OutputData::new("power", OutputType::Power, Shape::Interval, vec![0.0; 4], 3);
        assert!(matches!(err, Err(ModelError::OutputType { name: "power", .. })));
    }

    #[test]
    fn test_serialized_direction() {
        let data = OutputData::new("p", OutputType::Power, Shape::Scalar, vec![1.0], 5)
            .unwrap()
            .with_direction(Direction::Negative);
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["direction"], "-");
        assert_eq!(json["output_type"], "power");
        assert_eq!(json["shape"], "scalar");
    }

    #[test]
    fn test_output_type_from_str() {
        assert_eq!("shadow_price".parse::<OutputType>().unwrap(), OutputType::ShadowPrice);
        assert_eq!(OutputType::StateOfCharge.to_string(), "state_of_charge");
    }
}
