use itertools::Itertools;
use log::info;
use sqlite::{Connection, OpenFlags};

use crate::board::{Board, BoardState};
use crate::graph::LinkIdx;
use crate::sweep::SampleResult;

/// State of one link after one step, for the optional `link_state` table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SystemStateRow {
    pub step: u32,
    pub link: LinkIdx,
    pub accumulation: f64,
    pub velocity: f64,
    pub inflow: f64,
    pub outflow: f64,
}

impl SystemStateRow {
    pub fn capture(step: u32, board: &Board) -> impl Iterator<Item = SystemStateRow> + '_ {
        board
            .links()
            .iter()
            .enumerate()
            .map(move |(i, state)| SystemStateRow {
                step,
                link: LinkIdx(i as u32),
                accumulation: state.fragment_total(),
                velocity: state.velocity,
                inflow: state.inflow,
                outflow: state.outflow,
            })
    }
}

fn open(out_filename: &str) -> Result<Connection, sqlite::Error> {
    sqlite::Connection::open_with_flags(
        out_filename,
        OpenFlags::default()
            .with_create()
            .with_no_mutex()
            .with_read_write(),
    )
}

fn finite(value: f64) -> Option<f64> {
    if value.is_finite() {
        Some(value)
    } else {
        None
    }
}

fn state_name(state: BoardState) -> (&'static str, Option<i64>) {
    match state {
        BoardState::Initialized => ("initialized", None),
        BoardState::Running(step) => ("running", Some(step as i64)),
        BoardState::Converged(step) => ("converged", Some(step as i64)),
        BoardState::TimeLimitExceeded(step) => ("time_limit_exceeded", Some(step as i64)),
    }
}

/// Writes the results of a finished run. `system_state` adds the per-step link states.
pub fn export_run(
    board: &Board,
    system_state: Option<&[SystemStateRow]>,
    out_filename: &str,
) -> Result<(), sqlite::Error> {
    info!("Exporting run to {}...", out_filename);
    let network = board.network();
    let connection = open(out_filename)?;
    connection.execute("BEGIN TRANSACTION;")?;

    connection.execute(
        "CREATE TABLE link (
            id INTEGER PRIMARY KEY,
            cell TEXT NOT NULL,
            origin TEXT,
            destination TEXT,
            orientation TEXT NOT NULL,
            length REAL NOT NULL
        );",
    )?;
    let mut stmt = connection.prepare(
        "INSERT INTO link (id, cell, origin, destination, orientation, length) VALUES (?, ?, ?, ?, ?, ?)",
    )?;
    for (id, link) in network.links() {
        stmt.bind((1, id.0 as i64))?;
        stmt.bind((2, &*network.cell(link.cell).name))?;
        stmt.bind((3, link.origin.map(|cell| &*network.cell(cell).name)))?;
        stmt.bind((4, link.destination.map(|cell| &*network.cell(cell).name)))?;
        stmt.bind((5, link.orientation.to_string().as_str()))?;
        stmt.bind((6, link.length))?;
        stmt.next()?;
        stmt.reset()?;
    }

    connection.execute(
        "CREATE TABLE group_result (
            id INTEGER PRIMARY KEY,
            route TEXT NOT NULL,
            departure INTEGER NOT NULL,
            people REAL NOT NULL,
            mean_travel_time REAL,
            std_travel_time REAL,
            survived REAL NOT NULL,
            relative_loss REAL NOT NULL
        );",
    )?;
    connection.execute(
        "CREATE TABLE arrival (
            group_id INTEGER NOT NULL,
            travel_interval INTEGER NOT NULL,
            travel_time REAL NOT NULL,
            people REAL NOT NULL
        );",
    )?;
    let mut stmt_group = connection.prepare(
        "INSERT INTO group_result (id, route, departure, people, mean_travel_time, std_travel_time, survived, relative_loss) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )?;
    let mut stmt_arrival = connection.prepare(
        "INSERT INTO arrival (group_id, travel_interval, travel_time, people) VALUES (?, ?, ?, ?)",
    )?;
    let delta_t = network.delta_t();
    for ((id, group), stats) in board.groups().iter().enumerate().zip(board.group_stats()) {
        stmt_group.bind((1, id as i64))?;
        stmt_group.bind((2, &*network.route(group.route).name))?;
        stmt_group.bind((3, group.departure as i64))?;
        stmt_group.bind((4, group.people))?;
        stmt_group.bind((5, finite(stats.mean)))?;
        stmt_group.bind((6, finite(stats.std_dev)))?;
        stmt_group.bind((7, stats.survived))?;
        stmt_group.bind((8, stats.relative_loss))?;
        stmt_group.next()?;
        stmt_group.reset()?;

        for (interval, people) in group.arrivals() {
            stmt_arrival.bind((1, id as i64))?;
            stmt_arrival.bind((2, interval))?;
            stmt_arrival.bind((3, interval as f64 * delta_t))?;
            stmt_arrival.bind((4, people))?;
            stmt_arrival.next()?;
            stmt_arrival.reset()?;
        }
    }

    if !board.pedestrians().is_empty() {
        connection.execute(
            "CREATE TABLE pedestrian_result (
                id INTEGER PRIMARY KEY,
                route TEXT NOT NULL,
                departure_time REAL NOT NULL,
                observed_travel_time REAL NOT NULL,
                group_id INTEGER NOT NULL,
                simulated_mean REAL,
                simulated_std REAL
            );",
        )?;
        let mut stmt = connection.prepare(
            "INSERT INTO pedestrian_result (id, route, departure_time, observed_travel_time, group_id, simulated_mean, simulated_std) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )?;
        for (id, (pedestrian, stats)) in board.pedestrian_stats().enumerate() {
            stmt.bind((1, id as i64))?;
            stmt.bind((2, &*network.route(pedestrian.route).name))?;
            stmt.bind((3, pedestrian.departure_time))?;
            stmt.bind((4, pedestrian.travel_time))?;
            stmt.bind((5, pedestrian.group.0 as i64))?;
            stmt.bind((6, finite(stats.mean)))?;
            stmt.bind((7, finite(stats.std_dev)))?;
            stmt.next()?;
            stmt.reset()?;
        }
    }

    connection.execute(
        "CREATE TABLE run_stats (
            state TEXT NOT NULL,
            final_step INTEGER,
            delta_t REAL NOT NULL,
            demand REAL NOT NULL,
            arrived REAL NOT NULL,
            num_diagnostics INTEGER NOT NULL,
            log_likelihood REAL
        );",
    )?;
    let mut stmt = connection.prepare(
        "INSERT INTO run_stats (state, final_step, delta_t, demand, arrived, num_diagnostics, log_likelihood) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )?;
    let (state, final_step) = state_name(board.state());
    stmt.bind((1, state))?;
    stmt.bind((2, final_step))?;
    stmt.bind((3, delta_t))?;
    stmt.bind((4, board.groups().iter().map(|group| group.people).sum::<f64>()))?;
    stmt.bind((5, board.groups().iter().map(|group| group.arrived()).sum::<f64>()))?;
    stmt.bind((6, board.diagnostics().len() as i64))?;
    stmt.bind((7, board.log_likelihood().ok().and_then(finite)))?;
    stmt.next()?;

    if let Some(rows) = system_state {
        connection.execute(
            "CREATE TABLE link_state (
                step INTEGER NOT NULL,
                link_id INTEGER NOT NULL,
                accumulation REAL NOT NULL,
                velocity REAL NOT NULL,
                inflow REAL NOT NULL,
                outflow REAL NOT NULL
            );",
        )?;
        let mut stmt = connection.prepare(
            "INSERT INTO link_state (step, link_id, accumulation, velocity, inflow, outflow) VALUES (?, ?, ?, ?, ?, ?)",
        )?;
        for row in rows {
            stmt.bind((1, row.step as i64))?;
            stmt.bind((2, row.link.0 as i64))?;
            stmt.bind((3, row.accumulation))?;
            stmt.bind((4, row.velocity))?;
            stmt.bind((5, row.inflow))?;
            stmt.bind((6, row.outflow))?;
            stmt.next()?;
            stmt.reset()?;
        }
    }

    connection.execute("COMMIT;")?;
    Ok(())
}

/// Writes one row per parameter draw; failed draws keep their error message.
pub fn export_samples(
    param_names: &[&str],
    samples: &[SampleResult],
    out_filename: &str,
) -> Result<(), sqlite::Error> {
    info!("Exporting {} samples to {}...", samples.len(), out_filename);
    let connection = open(out_filename)?;
    connection.execute("BEGIN TRANSACTION;")?;

    let columns = param_names
        .iter()
        .map(|name| format!("{} REAL NOT NULL", name))
        .join(", ");
    connection.execute(format!(
        "CREATE TABLE sample (id INTEGER PRIMARY KEY, {}, log_likelihood REAL, error TEXT);",
        columns
    ))?;
    let placeholders = std::iter::repeat("?")
        .take(param_names.len() + 3)
        .join(", ");
    let mut stmt = connection.prepare(format!(
        "INSERT INTO sample (id, {}, log_likelihood, error) VALUES ({})",
        param_names.join(", "),
        placeholders
    ))?;
    for (id, sample) in samples.iter().enumerate() {
        stmt.bind((1, id as i64))?;
        for (i, &value) in sample.params.iter().enumerate() {
            stmt.bind((i + 2, value))?;
        }
        let (log_likelihood, error) = match &sample.outcome {
            Ok(value) => (finite(*value), None),
            Err(err) => (None, Some(err.to_string())),
        };
        stmt.bind((param_names.len() + 2, log_likelihood))?;
        stmt.bind((param_names.len() + 3, error.as_deref()))?;
        stmt.next()?;
        stmt.reset()?;
    }

    connection.execute("COMMIT;")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{export_run, export_samples, SystemStateRow};
    use crate::board::Board;
    use crate::error::{LikelihoodError, RunError};
    use crate::sweep::SampleResult;
    use crate::test::sample::create_corridor;

    #[test]
    fn test_export_run() {
        let (scenario, mut config) = create_corridor();
        config.numeric.gate_correction = 0;
        let mut board = Board::new(Arc::new(scenario), config).unwrap();
        let mut rows = Vec::new();
        board
            .simulate_with(|step, board| rows.extend(SystemStateRow::capture(step, board)))
            .unwrap();
        assert_eq!(rows.len(), 3 * board.network().num_links());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.sqlite3");
        let path = path.to_str().unwrap();
        export_run(&board, Some(rows.as_slice()), path).unwrap();

        let connection = sqlite::open(path).unwrap();
        let groups = connection
            .prepare("SELECT mean_travel_time, relative_loss FROM group_result")
            .unwrap()
            .iter()
            .map(|row| {
                let row = row.unwrap();
                (row.read::<f64, _>(0), row.read::<f64, _>(1))
            })
            .collect::<Vec<_>>();
        assert_eq!(groups, vec![(2.0, 1.0)]);

        let arrivals = connection
            .prepare("SELECT travel_interval, people FROM arrival")
            .unwrap()
            .iter()
            .map(|row| {
                let row = row.unwrap();
                (row.read::<i64, _>(0), row.read::<f64, _>(1))
            })
            .collect::<Vec<_>>();
        assert_eq!(arrivals, vec![(2, 1.0)]);

        let states = connection
            .prepare("SELECT state, final_step FROM run_stats")
            .unwrap()
            .iter()
            .map(|row| {
                let row = row.unwrap();
                (row.read::<&str, _>(0).to_string(), row.read::<i64, _>(1))
            })
            .collect::<Vec<_>>();
        assert_eq!(states, vec![("converged".to_string(), 2)]);

        let occupied = connection
            .prepare("SELECT COUNT(*) FROM link_state WHERE accumulation > 0")
            .unwrap()
            .iter()
            .map(|row| row.unwrap().read::<i64, _>(0))
            .collect::<Vec<_>>();
        assert_eq!(occupied, vec![2]);
    }

    #[test]
    fn test_export_samples() {
        let samples = vec![
            SampleResult {
                params: vec![1.2, 3.0],
                outcome: Ok(-12.5),
            },
            SampleResult {
                params: vec![0.9, 1.0],
                outcome: Err(RunError::Likelihood(LikelihoodError::NoObservations)),
            },
        ];
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("samples.sqlite3");
        let path = path.to_str().unwrap();
        export_samples(&["vf", "mu"], &samples, path).unwrap();

        let connection = sqlite::open(path).unwrap();
        let rows = connection
            .prepare(
                "SELECT vf, mu, COALESCE(log_likelihood, 0.0), error IS NOT NULL FROM sample ORDER BY id",
            )
            .unwrap()
            .iter()
            .map(|row| {
                let row = row.unwrap();
                (
                    row.read::<f64, _>(0),
                    row.read::<f64, _>(1),
                    row.read::<f64, _>(2),
                    row.read::<i64, _>(3),
                )
            })
            .collect::<Vec<_>>();
        assert_eq!(rows, vec![(1.2, 3.0, -12.5, 0), (0.9, 1.0, 0.0, 1)]);
    }
}
