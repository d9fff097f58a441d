use std::collections::BTreeMap;
use std::fmt::Debug;

use crate::col::group_stable;
use crate::error::BuildError;
use crate::graph::{LinkIdx, Network, RouteIdx};
use crate::scenario::DemandRecords;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupIdx(pub u32);
impl Debug for GroupIdx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("g#{}", self.0))
    }
}

/// People sharing a route and a departure interval.
#[derive(Debug, Clone)]
pub struct Group {
    pub route: RouteIdx,
    /// Departure interval.
    pub departure: u32,
    pub people: f64,
    /// Corrected travel interval -> people that arrived with it.
    arrivals: BTreeMap<i64, f64>,
}

/// Simulated travel time distribution of a group, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TravelTimeStats {
    pub mean: f64,
    pub std_dev: f64,
    /// People that reached the destination.
    pub survived: f64,
    /// Fraction of the group that reached the destination.
    pub relative_loss: f64,
}

/// An arrival that cannot be booked into the histogram.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InvalidArrival {
    pub interval: i64,
    pub people: f64,
}

impl Group {
    pub fn new(route: RouteIdx, departure: u32, people: f64) -> Self {
        Self {
            route,
            departure,
            people,
            arrivals: BTreeMap::new(),
        }
    }

    /// Books `people` arriving at the sink in interval `step`.
    pub fn record_arrival(
        &mut self,
        step: u32,
        people: f64,
        gate_correction: i64,
    ) -> Result<(), InvalidArrival> {
        let interval = step as i64 - self.departure as i64 - gate_correction;
        if interval < 0 || !(people > 0.0) {
            return Err(InvalidArrival { interval, people });
        }
        *self.arrivals.entry(interval).or_insert(0.0) += people;
        Ok(())
    }

    pub fn arrivals(&self) -> impl Iterator<Item = (i64, f64)> + '_ {
        self.arrivals.iter().map(|(&interval, &people)| (interval, people))
    }

    pub fn arrived(&self) -> f64 {
        self.arrivals.values().sum()
    }

    pub fn clear_arrivals(&mut self) {
        self.arrivals.clear();
    }

    /// Share of the group that arrived with travel interval `interval`.
    pub fn arrival_share(&self, interval: i64) -> Option<f64> {
        self.arrivals.get(&interval).map(|people| people / self.people)
    }

    pub fn travel_time_stats(&self, delta_t: f64) -> TravelTimeStats {
        let mut survived = 0.0;
        let mut sum = 0.0;
        let mut sum_squared = 0.0;
        for (&interval, &people) in self.arrivals.iter() {
            let travel_time = interval as f64 * delta_t;
            survived += people;
            sum += people * travel_time;
            sum_squared += people * travel_time * travel_time;
        }
        let mean = sum / survived;
        TravelTimeStats {
            mean,
            std_dev: (sum_squared / survived - mean * mean).max(0.0).sqrt(),
            survived,
            relative_loss: survived / self.people,
        }
    }
}

/// The part of a group currently on one link.
#[derive(Debug, Clone, Default)]
pub struct Fragment {
    pub size: f64,
    /// Sending capacity towards each downstream link in the current interval.
    pub sending: Vec<(LinkIdx, f64)>,
}

/// An observed pedestrian, used to build disaggregate demand and to score a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Pedestrian {
    pub route: RouteIdx,
    /// [s]
    pub departure_time: f64,
    /// Observed travel time [s].
    pub travel_time: f64,
    pub group: GroupIdx,
}

/// Turns demand records into groups for a network. Observed pedestrians are pooled by
/// route and departure interval, in order of first appearance.
pub fn build_groups(
    demand: &DemandRecords,
    network: &Network,
) -> Result<(Vec<Group>, Vec<Pedestrian>), BuildError> {
    let route = |name: &str| {
        network
            .route_by_name(name)
            .ok_or_else(|| BuildError::UnknownRoute(name.into()))
    };
    match demand {
        DemandRecords::Aggregate(records) => {
            let groups = records
                .iter()
                .map(|record| Ok(Group::new(route(&record.route)?, record.departure, record.people)))
                .collect::<Result<Vec<_>, BuildError>>()?;
            Ok((groups, Vec::new()))
        }
        DemandRecords::Disaggregate(records) => {
            let delta_t = network.delta_t();
            let mut observations = Vec::with_capacity(records.len());
            for record in records.iter() {
                let interval = (record.departure_time / delta_t).floor();
                if !(interval >= 0.0 && interval <= u32::MAX as f64) {
                    return Err(BuildError::InvalidDeparture {
                        route: record.route.clone(),
                        departure: record.departure_time,
                    });
                }
                observations.push((route(&record.route)?, interval as u32, record));
            }

            let mut groups = Vec::new();
            let mut group_of = vec![GroupIdx(0); observations.len()];
            let pooled = group_stable(0..observations.len(), |&i| {
                (observations[i].0, observations[i].1)
            });
            for ((route, departure), members) in pooled {
                let group = GroupIdx(groups.len() as u32);
                groups.push(Group::new(route, departure, members.len() as f64));
                for i in members {
                    group_of[i] = group;
                }
            }
            let pedestrians = observations
                .iter()
                .zip(group_of)
                .map(|(&(route, _, record), group)| Pedestrian {
                    route,
                    departure_time: record.departure_time,
                    travel_time: record.travel_time,
                    group,
                })
                .collect();
            Ok((groups, pedestrians))
        }
    }
}
