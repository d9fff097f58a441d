use std::fs::File;
use std::path::Path;

use log::info;
use serde::Deserialize;

use crate::config::{NumericConfig, RunConfig};
use crate::error::ScenarioError;
use crate::orientation::Orientation;

pub mod parse;

#[derive(Debug, Clone, PartialEq)]
pub struct CellRecord {
    pub name: Box<str>,
    pub zone: Box<str>,
    /// [m^2], `INF` in the input for gates.
    pub area: f64,
    pub polygon: Box<[(f64, f64)]>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LinkLength {
    /// [m]
    Fixed(f64),
    /// Length of the shortest link with a fixed length.
    Shortest,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinkRecord {
    pub cell: Box<str>,
    /// `None` for a link fed from outside.
    pub origin: Option<Box<str>>,
    /// `None` for a link leaving the network.
    pub destination: Option<Box<str>>,
    pub length: LinkLength,
    pub orientation: Orientation,
    /// Also creates the reverse link with swapped cells and orientation.
    pub bidirectional: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouteRecord {
    pub name: Box<str>,
    /// Zones from origin to destination.
    pub zones: Box<[Box<str>]>,
}

/// People departing on a route in one interval.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DepartureRecord {
    pub route: Box<str>,
    /// Departure interval.
    pub departure: u32,
    pub people: f64,
}

/// One observed pedestrian, times in seconds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ObservationRecord {
    pub route: Box<str>,
    pub departure_time: f64,
    pub travel_time: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DemandRecords {
    Aggregate(Box<[DepartureRecord]>),
    Disaggregate(Box<[ObservationRecord]>),
}

impl DemandRecords {
    pub fn len(&self) -> usize {
        match self {
            DemandRecords::Aggregate(records) => records.len(),
            DemandRecords::Disaggregate(records) => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Everything about a case study that does not depend on the model parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Scenario {
    pub cells: Box<[CellRecord]>,
    pub links: Box<[LinkRecord]>,
    pub routes: Box<[RouteRecord]>,
    pub demand: DemandRecords,
}

/// Search box for parameter vectors `[vf, shape..., mu]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamRange {
    pub lower: Box<[f64]>,
    pub upper: Box<[f64]>,
}

impl ParamRange {
    pub fn dimension(&self) -> usize {
        self.lower.len()
    }
}

/// A scenario directory loaded into memory.
#[derive(Debug, Clone)]
pub struct ScenarioDir {
    pub scenario: Scenario,
    pub config: RunConfig,
    pub range: Option<ParamRange>,
}

pub const SETTINGS_FILE: &str = "scenario.csv";
pub const CELLS_FILE: &str = "cells.csv";
pub const LINKS_FILE: &str = "links.csv";
pub const ROUTES_FILE: &str = "routes.csv";
pub const DEMAND_FILE: &str = "demand.csv";
pub const PARAMS_FILE: &str = "params.csv";
pub const PARAM_RANGE_FILE: &str = "param_range.csv";

fn open(dir: &Path, name: &str) -> Result<File, ScenarioError> {
    let path = dir.join(name);
    File::open(&path).map_err(|source| ScenarioError::Io { path, source })
}

/// Reads all scenario files of `dir`. The parameter range is optional.
pub fn load_dir(dir: &Path) -> Result<ScenarioDir, ScenarioError> {
    let settings = parse::parse_settings(open(dir, SETTINGS_FILE)?)?;
    let scenario = Scenario {
        cells: parse::parse_cells(open(dir, CELLS_FILE)?)?,
        links: parse::parse_links(open(dir, LINKS_FILE)?)?,
        routes: parse::parse_routes(open(dir, ROUTES_FILE)?)?,
        demand: parse::parse_demand(open(dir, DEMAND_FILE)?, settings.demand_format)?,
    };
    let params = parse::parse_params(open(dir, PARAMS_FILE)?, settings.diagram)?;
    let range = if dir.join(PARAM_RANGE_FILE).exists() {
        Some(parse::parse_param_range(
            open(dir, PARAM_RANGE_FILE)?,
            settings.diagram,
        )?)
    } else {
        None
    };

    let config = RunConfig {
        diagram: settings.diagram,
        params,
        cfl: settings.cfl,
        calibration: settings.calibration,
        numeric: NumericConfig::default(),
    };
    config.validate()?;

    info!(
        "Loaded scenario {:?}: {} cells, {} links, {} routes, {} demand records, {} diagram",
        dir,
        scenario.cells.len(),
        scenario.links.len(),
        scenario.routes.len(),
        scenario.demand.len(),
        config.diagram
    );
    Ok(ScenarioDir {
        scenario,
        config,
        range,
    })
}
