use std::path::PathBuf;

use thiserror::Error;

use crate::config::DiagramKind;
use crate::demand::GroupIdx;
use crate::graph::LinkIdx;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid orientation {0:?}, expected something like \"N->E\"")]
pub struct OrientationError(pub Box<str>);

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DiagramError {
    #[error("critical point is invalid: accumulation {crit_acc}, velocity {crit_vel}")]
    InvalidCriticalPoint { crit_acc: f64, crit_vel: f64 },

    #[error("{kind} expects {expected} shape parameters, got {got}")]
    ShapeParameters {
        kind: DiagramKind,
        expected: usize,
        got: usize,
    },
}

/// Errors while turning a scenario and a run configuration into a network.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("CFL factor must lie in (0, 1], got {0}")]
    InvalidCfl(f64),

    #[error("free flow speed must be positive, got {0}")]
    InvalidFreeSpeed(f64),

    #[error("route choice weight must be a non-negative finite number, got {0}")]
    InvalidRouteChoiceWeight(f64),

    #[error("{kind} expects {expected} parameters, got {got}")]
    ParameterCount {
        kind: DiagramKind,
        expected: usize,
        got: usize,
    },

    #[error(transparent)]
    Diagram(#[from] DiagramError),

    #[error("cell {0:?} is defined more than once")]
    DuplicateCell(Box<str>),

    #[error("route {0:?} is defined more than once")]
    DuplicateRoute(Box<str>),

    #[error("unknown cell {0:?}")]
    UnknownCell(Box<str>),

    #[error("unknown zone {zone:?} on route {route:?}")]
    UnknownZone { route: Box<str>, zone: Box<str> },

    #[error("unknown route {0:?}")]
    UnknownRoute(Box<str>),

    #[error("route {0:?} has no source link in its origin zone")]
    MissingSourceLink(Box<str>),

    #[error("route {0:?} has no sink link in its destination zone")]
    MissingSinkLink(Box<str>),

    #[error("link {0} has a non-positive or non-finite length {1}")]
    InvalidLength(usize, f64),

    #[error("no link with an explicit length, cannot derive the shortest link length")]
    NoLinkLength,

    #[error("time step {0} is not a positive finite number")]
    InvalidTimeStep(f64),

    #[error("departure {departure} of group on route {route:?} is invalid")]
    InvalidDeparture { route: Box<str>, departure: f64 },
}

/// Fatal errors during a simulation run.
#[derive(Debug, Error, PartialEq)]
pub enum SimError {
    #[error("fundamental diagram of cell {cell:?}: {source}")]
    Diagram {
        cell: Box<str>,
        #[source]
        source: DiagramError,
    },

    #[error("fragment of {group:?} on {link:?} would become negative ({remainder})")]
    NegativeFragment {
        link: LinkIdx,
        group: GroupIdx,
        remainder: f64,
    },

    #[error("fragment of {group:?} on {link:?} does not exist")]
    MissingFragment { link: LinkIdx, group: GroupIdx },

    #[error("invalid transfer to {target:?}: sending {send}, candidate inflow {candidate}, receiving {receiving}")]
    InvalidTransfer {
        target: LinkIdx,
        send: f64,
        candidate: f64,
        receiving: f64,
    },
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LikelihoodError {
    #[error("no observed pedestrians, use disaggregate demand for calibration")]
    NoObservations,

    #[error("the board has not been simulated yet")]
    NotSimulated,
}

/// Errors while reading a scenario directory.
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("could not open {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error("missing key {0:?}")]
    MissingKey(Box<str>),

    #[error("invalid value {value:?} for {key:?}")]
    InvalidValue { key: Box<str>, value: Box<str> },

    #[error(transparent)]
    Orientation(#[from] OrientationError),

    #[error(transparent)]
    Build(#[from] BuildError),
}

/// Anything that can make a single parameter evaluation fail.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Sim(#[from] SimError),

    #[error(transparent)]
    Likelihood(#[from] LikelihoodError),
}
