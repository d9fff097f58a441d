use std::f64::consts::PI;

use crate::col::group_stable;
use crate::config::CalibrationMode;
use crate::demand::{Group, Pedestrian};
use crate::error::LikelihoodError;

/// Probability assigned to an observation whose travel interval was never simulated.
const EMPTY_INTERVAL_PROBABILITY: f64 = 5e-324;

/// Log-likelihood of the observed travel times given a finished run.
pub fn log_likelihood(
    mode: CalibrationMode,
    groups: &[Group],
    pedestrians: &[Pedestrian],
    delta_t: f64,
) -> Result<f64, LikelihoodError> {
    if pedestrians.is_empty() {
        return Err(LikelihoodError::NoObservations);
    }
    let simulated_mean = groups
        .iter()
        .map(|group| group.travel_time_stats(delta_t).mean)
        .collect::<Vec<_>>();

    Ok(match mode {
        CalibrationMode::MeanTravelTime => {
            let squared_error = pedestrians
                .iter()
                .map(|p| (p.travel_time - simulated_mean[p.group.0 as usize]).powi(2))
                .sum::<f64>();
            gaussian(pedestrians.len() as f64, squared_error)
        }
        CalibrationMode::AggregatedTravelTimes { period } => {
            let calibration_groups = group_stable(pedestrians, |p| {
                (p.route, (p.departure_time / period).floor() as i64)
            });
            let squared_error = calibration_groups
                .iter()
                .map(|(_, members)| {
                    let size = members.len() as f64;
                    let observed = members.iter().map(|p| p.travel_time).sum::<f64>() / size;
                    let simulated = members
                        .iter()
                        .map(|p| simulated_mean[p.group.0 as usize])
                        .sum::<f64>()
                        / size;
                    size * (observed - simulated).powi(2)
                })
                .sum::<f64>();
            gaussian(pedestrians.len() as f64, squared_error)
        }
        CalibrationMode::TravelTimeDistribution => pedestrians
            .iter()
            .map(|p| {
                let interval = (p.travel_time / delta_t).floor() as i64;
                groups[p.group.0 as usize]
                    .arrival_share(interval)
                    .unwrap_or(EMPTY_INTERVAL_PROBABILITY)
                    .ln()
            })
            .sum(),
    })
}

/// Maximized Gaussian log-likelihood of `n` residuals with the given sum of squares.
fn gaussian(n: f64, squared_error: f64) -> f64 {
    -n / 2.0 * (1.0 + (2.0 * PI / n * squared_error).ln())
}
