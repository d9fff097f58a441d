use serde::Deserialize;

use crate::col::{map_new, HashMap};
use crate::config::{CalibrationMode, DiagramKind, ModelParams};
use crate::error::ScenarioError;

use super::{
    CellRecord, DemandRecords, DepartureRecord, LinkLength, LinkRecord, ObservationRecord,
    ParamRange, RouteRecord,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemandFormat {
    /// `route;departure;people`
    Aggregate,
    /// `route;departure_time;travel_time`
    Disaggregate,
}

/// Contents of `scenario.csv`.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub diagram: DiagramKind,
    pub cfl: f64,
    pub demand_format: DemandFormat,
    pub calibration: CalibrationMode,
}

#[derive(Debug, Deserialize)]
struct CellRow {
    name: Box<str>,
    zone: Box<str>,
    area: f64,
    polygon: String,
}

#[derive(Debug, Deserialize)]
struct LinkRow {
    cell: Box<str>,
    origin: String,
    destination: String,
    length: String,
    orientation: String,
    bidirectional: bool,
}

#[derive(Debug, Deserialize)]
struct RouteRow {
    name: Box<str>,
    zones: String,
}

#[derive(Debug, Deserialize)]
struct ParamRow {
    name: String,
    value: f64,
}

#[derive(Debug, Deserialize)]
struct ParamRangeRow {
    name: String,
    lower: f64,
    upper: f64,
}

fn reader() -> csv::ReaderBuilder {
    let mut builder = csv::ReaderBuilder::new();
    builder.trim(csv::Trim::All).delimiter(b';');

    builder
}

fn invalid(key: &str, value: &str) -> ScenarioError {
    ScenarioError::InvalidValue {
        key: key.into(),
        value: value.into(),
    }
}

fn parse_f64(key: &str, value: &str) -> Result<f64, ScenarioError> {
    value.parse::<f64>().map_err(|_| invalid(key, value))
}

pub fn parse_settings(stream: impl std::io::Read) -> Result<Settings, ScenarioError> {
    let key_value_pairs = reader()
        .from_reader(stream)
        .deserialize()
        .collect::<Result<Box<[(String, String)]>, csv::Error>>()?;
    let mut key_value_map = key_value_pairs
        .iter()
        .cloned()
        .collect::<HashMap<_, _>>();
    let mut take = |key: &str| {
        key_value_map
            .remove(key)
            .ok_or_else(|| ScenarioError::MissingKey(key.into()))
    };

    let diagram_name = take("fundamental_diagram")?;
    let diagram = diagram_name
        .parse::<DiagramKind>()
        .map_err(|_| invalid("fundamental_diagram", &diagram_name))?;
    let cfl = parse_f64("cfl_factor", &take("cfl_factor")?)?;
    let demand_format = match take("demand_format")?.as_str() {
        "aggregate" => DemandFormat::Aggregate,
        "disaggregate" => DemandFormat::Disaggregate,
        other => return Err(invalid("demand_format", other)),
    };
    let calibration = match take("calibration_mode")?.as_str() {
        "mean_travel_time" => CalibrationMode::MeanTravelTime,
        "aggregated_travel_times" => {
            let period = parse_f64("aggregation_period", &take("aggregation_period")?)?;
            if !(period > 0.0 && period.is_finite()) {
                return Err(invalid("aggregation_period", &period.to_string()));
            }
            CalibrationMode::AggregatedTravelTimes { period }
        }
        "travel_time_distribution" => CalibrationMode::TravelTimeDistribution,
        other => return Err(invalid("calibration_mode", other)),
    };
    Ok(Settings {
        diagram,
        cfl,
        demand_format,
        calibration,
    })
}

/// Parses a polygon written as `(x|y)(x|y)...`. An empty string is an empty polygon.
pub fn parse_polygon(value: &str) -> Option<Box<[(f64, f64)]>> {
    value
        .split(')')
        .map(str::trim)
        .filter(|it| !it.is_empty())
        .map(|vertex| {
            let (x, y) = vertex.strip_prefix('(')?.split_once('|')?;
            Some((x.trim().parse().ok()?, y.trim().parse().ok()?))
        })
        .collect()
}

pub fn parse_cells(stream: impl std::io::Read) -> Result<Box<[CellRecord]>, ScenarioError> {
    reader()
        .from_reader(stream)
        .deserialize::<CellRow>()
        .map(|row| {
            let row = row?;
            if !(row.area > 0.0) {
                return Err(invalid("area", &row.area.to_string()));
            }
            let polygon = parse_polygon(&row.polygon).ok_or_else(|| invalid("polygon", &row.polygon))?;
            Ok(CellRecord {
                name: row.name,
                zone: row.zone,
                area: row.area,
                polygon,
            })
        })
        .collect()
}

fn parse_neighbor(value: String) -> Option<Box<str>> {
    if value.eq_ignore_ascii_case("none") || value.is_empty() {
        None
    } else {
        Some(value.into())
    }
}

pub fn parse_links(stream: impl std::io::Read) -> Result<Box<[LinkRecord]>, ScenarioError> {
    reader()
        .from_reader(stream)
        .deserialize::<LinkRow>()
        .map(|row| {
            let row = row?;
            let length = if row.length == "MIN" {
                LinkLength::Shortest
            } else {
                LinkLength::Fixed(parse_f64("length", &row.length)?)
            };
            Ok(LinkRecord {
                cell: row.cell,
                origin: parse_neighbor(row.origin),
                destination: parse_neighbor(row.destination),
                length,
                orientation: row.orientation.parse()?,
                bidirectional: row.bidirectional,
            })
        })
        .collect()
}

pub fn parse_routes(stream: impl std::io::Read) -> Result<Box<[RouteRecord]>, ScenarioError> {
    reader()
        .from_reader(stream)
        .deserialize::<RouteRow>()
        .map(|row| {
            let row = row?;
            let zones = row
                .zones
                .split('-')
                .map(str::trim)
                .filter(|it| !it.is_empty())
                .map(Box::from)
                .collect::<Box<[Box<str>]>>();
            if zones.len() < 2 {
                return Err(invalid("zones", &row.zones));
            }
            Ok(RouteRecord {
                name: row.name,
                zones,
            })
        })
        .collect()
}

pub fn parse_demand(
    stream: impl std::io::Read,
    format: DemandFormat,
) -> Result<DemandRecords, ScenarioError> {
    let mut reader = reader().from_reader(stream);
    match format {
        DemandFormat::Aggregate => {
            let records = reader
                .deserialize()
                .collect::<Result<Box<[DepartureRecord]>, csv::Error>>()?;
            if let Some(record) = records
                .iter()
                .find(|it| !(it.people > 0.0 && it.people.is_finite()))
            {
                return Err(invalid("people", &record.people.to_string()));
            }
            Ok(DemandRecords::Aggregate(records))
        }
        DemandFormat::Disaggregate => {
            let records = reader
                .deserialize()
                .collect::<Result<Box<[ObservationRecord]>, csv::Error>>()?;
            if let Some(record) = records
                .iter()
                .find(|it| !(it.departure_time >= 0.0 && it.travel_time >= 0.0))
            {
                return Err(invalid("departure_time", &record.departure_time.to_string()));
            }
            Ok(DemandRecords::Disaggregate(records))
        }
    }
}

/// Parameter vector `[vf, shape..., mu]` of `kind`, rows may come in any order.
pub fn parse_params(
    stream: impl std::io::Read,
    kind: DiagramKind,
) -> Result<ModelParams, ScenarioError> {
    let mut by_name: HashMap<String, f64> = map_new();
    for row in reader().from_reader(stream).deserialize::<ParamRow>() {
        let row = row?;
        by_name.insert(row.name, row.value);
    }
    let values = kind
        .param_names()
        .into_iter()
        .map(|name| {
            by_name
                .remove(name)
                .ok_or_else(|| ScenarioError::MissingKey(name.into()))
        })
        .collect::<Result<Vec<f64>, ScenarioError>>()?;
    Ok(ModelParams::from_vector(kind, &values)?)
}

pub fn parse_param_range(
    stream: impl std::io::Read,
    kind: DiagramKind,
) -> Result<ParamRange, ScenarioError> {
    let mut by_name: HashMap<String, (f64, f64)> = map_new();
    for row in reader().from_reader(stream).deserialize::<ParamRangeRow>() {
        let row = row?;
        if !(row.lower <= row.upper) {
            return Err(invalid(&row.name, &format!("[{}, {}]", row.lower, row.upper)));
        }
        by_name.insert(row.name, (row.lower, row.upper));
    }
    let (lower, upper) = kind
        .param_names()
        .into_iter()
        .map(|name| {
            by_name
                .remove(name)
                .ok_or_else(|| ScenarioError::MissingKey(name.into()))
        })
        .collect::<Result<Vec<(f64, f64)>, ScenarioError>>()?
        .into_iter()
        .unzip::<f64, f64, Vec<f64>, Vec<f64>>();
    Ok(ParamRange {
        lower: lower.into(),
        upper: upper.into(),
    })
}
