use std::fmt::Display;
use std::str::FromStr;

use crate::error::BuildError;

/// Tolerances and fixed horizons shared by every component of a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NumericConfig {
    /// Fragments and total accumulation below this are considered empty.
    pub abs_tol: f64,
    pub bisection_abs_tol: f64,
    pub bisection_rel_tol: f64,
    pub bisection_max_evaluations: usize,
    /// Number of intervals simulated after the last departure at most.
    pub max_travel_time: u32,
    /// Intervals subtracted from every arrival for the two gate cells.
    pub gate_correction: i64,
    /// Route split fractions below this are rounded to zero.
    pub split_cutoff: f64,
    /// Potential of route nodes the destination cannot be reached from.
    pub unreachable: f64,
    /// Potential of foreign gate nodes; excluded from route choice.
    pub pinned_potential: f64,
}

impl Default for NumericConfig {
    fn default() -> Self {
        Self {
            abs_tol: 1e-6,
            bisection_abs_tol: 1e-6,
            bisection_rel_tol: 1e-14,
            bisection_max_evaluations: 1000,
            max_travel_time: 1000,
            gate_correction: 2,
            split_cutoff: 1e-14,
            unreachable: f64::MAX,
            pinned_potential: 1e10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagramKind {
    Weidmann,
    Drake,
    StreamBased,
    Zero,
}

impl DiagramKind {
    /// Names of the shape parameters in the order they appear in a parameter vector.
    pub fn shape_names(&self) -> &'static [&'static str] {
        match self {
            DiagramKind::Weidmann => &["gamma", "kj"],
            DiagramKind::Drake => &["theta"],
            DiagramKind::StreamBased => &["theta", "beta"],
            DiagramKind::Zero => &[],
        }
    }

    /// Names of all entries of a parameter vector: free speed, shape parameters and route choice weight.
    pub fn param_names(&self) -> Vec<&'static str> {
        let mut names = vec!["vf"];
        names.extend_from_slice(self.shape_names());
        names.push("mu");
        names
    }
}

impl FromStr for DiagramKind {
    type Err = Box<str>;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Weidmann" => Ok(DiagramKind::Weidmann),
            "Drake" => Ok(DiagramKind::Drake),
            "SbFD" => Ok(DiagramKind::StreamBased),
            "Zero" => Ok(DiagramKind::Zero),
            _ => Err(format!("unknown fundamental diagram {:?}", s).into()),
        }
    }
}

impl Display for DiagramKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            DiagramKind::Weidmann => "Weidmann",
            DiagramKind::Drake => "Drake",
            DiagramKind::StreamBased => "SbFD",
            DiagramKind::Zero => "Zero",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelParams {
    /// Free flow speed [m/s].
    pub free_speed: f64,
    pub shape: Box<[f64]>,
    /// Logit route choice weight.
    pub eta: f64,
}

impl ModelParams {
    pub fn from_vector(kind: DiagramKind, values: &[f64]) -> Result<Self, BuildError> {
        let expected = kind.shape_names().len() + 2;
        if values.len() != expected {
            return Err(BuildError::ParameterCount {
                kind,
                expected,
                got: values.len(),
            });
        }
        Ok(Self {
            free_speed: values[0],
            shape: values[1..expected - 1].into(),
            eta: values[expected - 1],
        })
    }

    pub fn to_vector(&self) -> Vec<f64> {
        let mut values = Vec::with_capacity(self.shape.len() + 2);
        values.push(self.free_speed);
        values.extend_from_slice(&self.shape);
        values.push(self.eta);
        values
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalibrationMode {
    MeanTravelTime,
    /// Observations are pooled by route and departure period [s].
    AggregatedTravelTimes { period: f64 },
    TravelTimeDistribution,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub diagram: DiagramKind,
    pub params: ModelParams,
    pub cfl: f64,
    pub calibration: CalibrationMode,
    pub numeric: NumericConfig,
}

impl RunConfig {
    /// Same configuration with the parameter vector `[vf, shape..., mu]` replaced.
    pub fn with_param_vector(&self, values: &[f64]) -> Result<Self, BuildError> {
        Ok(Self {
            params: ModelParams::from_vector(self.diagram, values)?,
            ..self.clone()
        })
    }

    pub fn validate(&self) -> Result<(), BuildError> {
        if !(self.cfl > 0.0 && self.cfl <= 1.0) {
            return Err(BuildError::InvalidCfl(self.cfl));
        }
        if !(self.params.free_speed > 0.0 && self.params.free_speed.is_finite()) {
            return Err(BuildError::InvalidFreeSpeed(self.params.free_speed));
        }
        if !(self.params.eta >= 0.0 && self.params.eta.is_finite()) {
            return Err(BuildError::InvalidRouteChoiceWeight(self.params.eta));
        }
        let expected = self.diagram.shape_names().len();
        if self.params.shape.len() != expected {
            return Err(BuildError::ParameterCount {
                kind: self.diagram,
                expected: expected + 2,
                got: self.params.shape.len() + 2,
            });
        }
        Ok(())
    }
}
