use log::debug;

use crate::config::{DiagramKind, NumericConfig};
use crate::error::DiagramError;
use crate::orientation::Orientation;

/// Relation between the accumulation inside a cell and the walking speed of its streams.
///
/// Velocities are non-dimensional (fraction of the free flow speed). Every diagram is
/// evaluated per stream, i.e. per set of local links sharing an orientation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FundamentalDiagram {
    Weidmann { gamma: f64, jam_density: f64 },
    Drake { theta: f64 },
    StreamBased { theta: f64, beta: f64 },
    Zero,
}

/// Current and critical (flow maximizing) state of one stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamState {
    pub velocity: f64,
    pub crit_acc: f64,
    pub crit_vel: f64,
}

impl StreamState {
    pub const FREE_FLOW: StreamState = StreamState {
        velocity: 1.0,
        crit_acc: f64::INFINITY,
        crit_vel: 1.0,
    };
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BisectionOutcome {
    pub root: f64,
    pub converged: bool,
    pub evaluations: usize,
}

/// Bisection on `[min, max]`.
///
/// Running out of evaluations is not an error: the midpoint of the last bracket is
/// returned with `converged == false`.
pub fn bisect(
    f: impl Fn(f64) -> f64,
    mut min: f64,
    mut max: f64,
    numeric: &NumericConfig,
) -> BisectionOutcome {
    let mut evaluations = 0;
    loop {
        let m = 0.5 * (min + max);
        if evaluations + 2 > numeric.bisection_max_evaluations {
            return BisectionOutcome {
                root: m,
                converged: false,
                evaluations,
            };
        }
        let f_min = f(min);
        let f_m = f(m);
        evaluations += 2;

        if f_m * f_min > 0.0 {
            min = m;
        } else {
            max = m;
        }

        if (max - min).abs() <= (numeric.bisection_rel_tol * m.abs()).max(numeric.bisection_abs_tol)
        {
            return BisectionOutcome {
                root: 0.5 * (min + max),
                converged: true,
                evaluations,
            };
        }
    }
}

impl FundamentalDiagram {
    pub fn new(kind: DiagramKind, shape: &[f64]) -> Result<Self, DiagramError> {
        let expected = kind.shape_names().len();
        if shape.len() != expected {
            return Err(DiagramError::ShapeParameters {
                kind,
                expected,
                got: shape.len(),
            });
        }
        Ok(match kind {
            DiagramKind::Weidmann => FundamentalDiagram::Weidmann {
                gamma: shape[0],
                jam_density: shape[1],
            },
            DiagramKind::Drake => FundamentalDiagram::Drake { theta: shape[0] },
            DiagramKind::StreamBased => FundamentalDiagram::StreamBased {
                theta: shape[0],
                beta: shape[1],
            },
            DiagramKind::Zero => FundamentalDiagram::Zero,
        })
    }

    pub fn kind(&self) -> DiagramKind {
        match self {
            FundamentalDiagram::Weidmann { .. } => DiagramKind::Weidmann,
            FundamentalDiagram::Drake { .. } => DiagramKind::Drake,
            FundamentalDiagram::StreamBased { .. } => DiagramKind::StreamBased,
            FundamentalDiagram::Zero => DiagramKind::Zero,
        }
    }

    /// Evaluates all streams of a cell with the given area.
    ///
    /// `streams` holds the orientation and the accumulation of every stream; the result
    /// has the same order.
    pub fn evaluate(
        &self,
        streams: &[(Orientation, f64)],
        area: f64,
        numeric: &NumericConfig,
    ) -> Result<Vec<StreamState>, DiagramError> {
        if area.is_infinite() || *self == FundamentalDiagram::Zero {
            return Ok(vec![StreamState::FREE_FLOW; streams.len()]);
        }
        let total: f64 = streams.iter().map(|(_, acc)| acc).sum();

        streams
            .iter()
            .enumerate()
            .map(|(i, &(_, acc))| {
                let others = total - acc;
                let state = match *self {
                    FundamentalDiagram::Weidmann { gamma, jam_density } => {
                        let crit_acc = weidmann_critical(gamma, jam_density, others, area, numeric);
                        StreamState {
                            velocity: weidmann_velocity(gamma, jam_density, total, area),
                            crit_acc,
                            crit_vel: weidmann_velocity(gamma, jam_density, others + crit_acc, area),
                        }
                    }
                    FundamentalDiagram::Drake { theta } => {
                        let crit_acc = quadratic_critical(theta, others, area);
                        StreamState {
                            velocity: drake_velocity(theta, total, area),
                            crit_acc,
                            crit_vel: drake_velocity(theta, others + crit_acc, area),
                        }
                    }
                    FundamentalDiagram::StreamBased { theta, beta } => {
                        let crit_acc = quadratic_critical(theta, others, area);
                        let interaction = stream_interaction(beta, streams, i, area);
                        StreamState {
                            velocity: drake_velocity(theta, total, area) * interaction,
                            crit_acc,
                            crit_vel: drake_velocity(theta, others + crit_acc, area) * interaction,
                        }
                    }
                    FundamentalDiagram::Zero => StreamState::FREE_FLOW,
                };
                if !state.crit_acc.is_finite() || state.crit_vel.is_nan() {
                    return Err(DiagramError::InvalidCriticalPoint {
                        crit_acc: state.crit_acc,
                        crit_vel: state.crit_vel,
                    });
                }
                Ok(state)
            })
            .collect()
    }
}

fn weidmann_velocity(gamma: f64, jam_density: f64, total: f64, area: f64) -> f64 {
    if total <= 0.0 {
        1.0
    } else if total / area > jam_density {
        0.0
    } else {
        1.0 - (-gamma * (area / total - 1.0 / jam_density)).exp()
    }
}

/// Root of the derivative of the stream flow `a * v(others + a)`, clamped to jam capacity.
fn weidmann_critical(
    gamma: f64,
    jam_density: f64,
    others: f64,
    area: f64,
    numeric: &NumericConfig,
) -> f64 {
    let jam_capacity = jam_density * area;
    let derivative = |a: f64| {
        let total = others + a;
        if total == 0.0 {
            return f64::INFINITY;
        }
        1.0 - (1.0 + a * gamma * area / (total * total))
            * (-gamma * (area / total - 1.0 / jam_density)).exp()
    };
    let outcome = bisect(derivative, 0.0, jam_capacity, numeric);
    if !outcome.converged {
        debug!(
            "Critical accumulation did not converge after {} evaluations",
            outcome.evaluations
        );
    }
    outcome.root.min(jam_capacity)
}

fn drake_velocity(theta: f64, total: f64, area: f64) -> f64 {
    let density = total / area;
    (-theta * density * density).exp()
}

/// Maximizer of `a * exp(-theta * ((others + a) / area)^2)`.
fn quadratic_critical(theta: f64, others: f64, area: f64) -> f64 {
    -others / 2.0 + (others * others / 4.0 + area * area / (2.0 * theta)).sqrt()
}

fn stream_interaction(beta: f64, streams: &[(Orientation, f64)], own: usize, area: f64) -> f64 {
    let orientation = streams[own].0;
    streams
        .iter()
        .enumerate()
        .filter(|(j, _)| *j != own)
        .map(|(_, (other, acc))| {
            let phi = orientation.intersection_angle(other);
            (-beta * (1.0 - phi.cos()) * acc / area).exp()
        })
        .product()
}
