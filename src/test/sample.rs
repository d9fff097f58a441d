use crate::config::{CalibrationMode, DiagramKind, ModelParams, NumericConfig, RunConfig};
use crate::scenario::{
    CellRecord, DemandRecords, DepartureRecord, LinkLength, LinkRecord, RouteRecord, Scenario,
};

fn cell(name: &str, zone: &str, area: f64) -> CellRecord {
    CellRecord {
        name: name.into(),
        zone: zone.into(),
        area,
        polygon: Box::new([]),
    }
}

fn link(
    cell: &str,
    origin: Option<&str>,
    destination: Option<&str>,
    length: f64,
    orientation: &str,
    bidirectional: bool,
) -> LinkRecord {
    LinkRecord {
        cell: cell.into(),
        origin: origin.map(Into::into),
        destination: destination.map(Into::into),
        length: LinkLength::Fixed(length),
        orientation: orientation.parse().unwrap(),
        bidirectional,
    }
}

fn route(name: &str, zones: &[&str]) -> RouteRecord {
    RouteRecord {
        name: name.into(),
        zones: zones.iter().map(|&zone| zone.into()).collect(),
    }
}

fn departure(route: &str, departure: u32, people: f64) -> DepartureRecord {
    DepartureRecord {
        route: route.into(),
        departure,
        people,
    }
}

fn run_config(diagram: DiagramKind, values: &[f64], cfl: f64) -> RunConfig {
    RunConfig {
        diagram,
        params: ModelParams::from_vector(diagram, values).unwrap(),
        cfl,
        calibration: CalibrationMode::MeanTravelTime,
        numeric: NumericConfig::default(),
    }
}

/// Gate G1, two unit cells, gate G2; one person walking from O to D.
///
/// With unit lengths, unit free speed and a CFL factor of one, every interval lasts one
/// second and moves everybody by exactly one link.
pub fn create_corridor() -> (Scenario, RunConfig) {
    let scenario = Scenario {
        cells: Box::new([
            cell("G1", "O", f64::INFINITY),
            cell("C1", "X", 4.0),
            cell("C2", "X", 4.0),
            cell("G2", "D", f64::INFINITY),
        ]),
        links: Box::new([
            link("G1", None, Some("C1"), 1.0, "W->E", false),
            link("C1", Some("G1"), Some("C2"), 1.0, "W->E", false),
            link("C2", Some("C1"), Some("G2"), 1.0, "W->E", false),
            link("G2", Some("C2"), None, 1.0, "W->E", false),
        ]),
        routes: Box::new([route("O-D", &["O", "X", "D"])]),
        demand: DemandRecords::Aggregate(Box::new([departure("O-D", 0, 1.0)])),
    };
    (scenario, run_config(DiagramKind::Zero, &[1.0, 1.0], 1.0))
}

/// Four gates around a single square cell with two bidirectional corridors crossing in it.
///
/// The gates are adjacent to the crossing, so arrivals are booked without gate correction.
pub fn create_crossing() -> (Scenario, RunConfig) {
    let scenario = Scenario {
        cells: Box::new([
            cell("GW", "W", f64::INFINITY),
            cell("GE", "E", f64::INFINITY),
            cell("GS", "S", f64::INFINITY),
            cell("GN", "N", f64::INFINITY),
            cell("X", "X", 25.0),
        ]),
        links: Box::new([
            link("GW", None, Some("X"), 1.0, "W->E", true),
            link("X", Some("GW"), Some("GE"), 5.0, "W->E", true),
            link("GE", Some("X"), None, 1.0, "W->E", true),
            link("GS", None, Some("X"), 1.0, "S->N", true),
            link("X", Some("GS"), Some("GN"), 5.0, "S->N", true),
            link("GN", Some("X"), None, 1.0, "S->N", true),
        ]),
        routes: Box::new([
            route("W-E", &["W", "X", "E"]),
            route("E-W", &["E", "X", "W"]),
            route("S-N", &["S", "X", "N"]),
            route("N-S", &["N", "X", "S"]),
        ]),
        demand: DemandRecords::Aggregate(Box::new([
            departure("W-E", 0, 30.0),
            departure("E-W", 0, 20.0),
            departure("S-N", 1, 25.0),
            departure("N-S", 2, 10.0),
            departure("W-E", 3, 15.0),
        ])),
    };
    let mut config = run_config(DiagramKind::StreamBased, &[1.34, 0.3, 0.05, 10.0], 0.9);
    config.numeric.gate_correction = 0;
    (scenario, config)
}

/// A fork after the origin gate: the branch through A is one metre shorter than the one
/// through B.
pub fn create_two_paths() -> (Scenario, RunConfig) {
    let scenario = Scenario {
        cells: Box::new([
            cell("G1", "O", f64::INFINITY),
            cell("S", "X", 10.0),
            cell("A", "X", 10.0),
            cell("B", "X", 10.0),
            cell("G2", "D", f64::INFINITY),
        ]),
        links: Box::new([
            link("G1", None, Some("S"), 1.0, "W->E", false),
            link("S", Some("G1"), Some("A"), 1.0, "W->N", false),
            link("S", Some("G1"), Some("B"), 1.0, "W->S", false),
            link("A", Some("S"), Some("G2"), 1.0, "S->E", false),
            link("B", Some("S"), Some("G2"), 2.0, "N->E", false),
            link("G2", Some("A"), None, 1.0, "W->E", false),
            link("G2", Some("B"), None, 1.0, "W->E", false),
        ]),
        routes: Box::new([route("O-X-D", &["O", "X", "D"])]),
        demand: DemandRecords::Aggregate(Box::new([departure("O-X-D", 0, 40.0)])),
    };
    (scenario, run_config(DiagramKind::Drake, &[1.0, 0.5, 1.0], 1.0))
}
