use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use rayon::prelude::*;

use crate::col::HashSet;
use crate::config::RunConfig;
use crate::demand::{build_groups, Group, GroupIdx, InvalidArrival, Pedestrian, TravelTimeStats};
use crate::error::{BuildError, LikelihoodError, SimError};
use crate::flow::{fragment_flow, transfer, LinkState};
use crate::fundamental_diagram::{FundamentalDiagram, StreamState};
use crate::graph::{CellIdx, LinkIdx, Network, RouteIdx};
use crate::likelihood;
use crate::potential::{PotentialField, RouteSplit};
use crate::scenario::Scenario;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardState {
    Initialized,
    Running(u32),
    /// Emptied after the last departure.
    Converged(u32),
    /// Reached the horizon with people still on the network.
    TimeLimitExceeded(u32),
}

impl BoardState {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            BoardState::Converged(_) | BoardState::TimeLimitExceeded(_)
        )
    }
}

/// Anomalies that do not stop a run.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    InvalidArrival {
        group: GroupIdx,
        step: u32,
        interval: i64,
        people: f64,
    },
    /// Demand waiting on a link whose end node offers no way towards its destination.
    TrappedDemand {
        group: GroupIdx,
        link: LinkIdx,
        route: RouteIdx,
        step: u32,
    },
}

#[derive(Debug, Default)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
    trapped: HashSet<(GroupIdx, LinkIdx)>,
}

impl Diagnostics {
    fn invalid_arrival(&mut self, group: GroupIdx, step: u32, arrival: InvalidArrival) {
        warn!(
            "Invalid arrival of {:?} in step {}: interval {}, {} people",
            group, step, arrival.interval, arrival.people
        );
        self.entries.push(Diagnostic::InvalidArrival {
            group,
            step,
            interval: arrival.interval,
            people: arrival.people,
        });
    }

    /// Reported once per group and link.
    fn trapped(&mut self, group: GroupIdx, link: LinkIdx, route: RouteIdx, step: u32) {
        if !self.trapped.insert((group, link)) {
            return;
        }
        warn!(
            "Demand of {:?} on {:?} has no way towards the destination of {:?} (step {})",
            group, link, route, step
        );
        self.entries.push(Diagnostic::TrappedDemand {
            group,
            link,
            route,
            step,
        });
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSummary {
    pub state: BoardState,
    /// People loaded into the network.
    pub demand: f64,
    /// People booked at their destination.
    pub arrived: f64,
    pub num_diagnostics: usize,
    pub computation_time: Duration,
}

/// A scenario under one parameter set, together with the state of the current run.
pub struct Board {
    scenario: Arc<Scenario>,
    config: RunConfig,
    network: Network,
    diagram: FundamentalDiagram,
    potentials: PotentialField,
    links: Vec<LinkState>,
    groups: Vec<Group>,
    pedestrians: Vec<Pedestrian>,
    /// Departure interval -> groups departing in it.
    departures: BTreeMap<u32, Vec<GroupIdx>>,
    state: BoardState,
    diagnostics: Diagnostics,
}

impl Board {
    pub fn new(scenario: Arc<Scenario>, config: RunConfig) -> Result<Self, BuildError> {
        let network = Network::build(&scenario, &config)?;
        let diagram = FundamentalDiagram::new(config.diagram, &config.params.shape)?;
        let potentials = PotentialField::new(&network, config.params.eta, config.numeric);
        let (groups, pedestrians) = build_groups(&scenario.demand, &network)?;
        let mut departures: BTreeMap<u32, Vec<GroupIdx>> = BTreeMap::new();
        for (i, group) in groups.iter().enumerate() {
            departures
                .entry(group.departure)
                .or_default()
                .push(GroupIdx(i as u32));
        }
        Ok(Self {
            links: vec![LinkState::default(); network.num_links()],
            scenario,
            config,
            network,
            diagram,
            potentials,
            groups,
            pedestrians,
            departures,
            state: BoardState::Initialized,
            diagnostics: Diagnostics::default(),
        })
    }

    /// A fresh board for the same scenario under the parameter vector `[vf, shape..., mu]`.
    pub fn with_params(&self, values: &[f64]) -> Result<Self, BuildError> {
        Board::new(self.scenario.clone(), self.config.with_param_vector(values)?)
    }

    /// Rebuilds the board in place under a new parameter vector. On error the board is
    /// left untouched.
    pub fn update_param(&mut self, values: &[f64]) -> Result<(), BuildError> {
        *self = self.with_params(values)?;
        Ok(())
    }

    /// Clears all run state, keeping the topology.
    pub fn reset(&mut self) {
        self.links
            .iter_mut()
            .for_each(|state| *state = LinkState::default());
        self.groups.iter_mut().for_each(Group::clear_arrivals);
        self.potentials = PotentialField::new(
            &self.network,
            self.config.params.eta,
            self.config.numeric,
        );
        self.diagnostics = Diagnostics::default();
        self.state = BoardState::Initialized;
    }

    pub fn last_departure(&self) -> u32 {
        self.departures.keys().next_back().copied().unwrap_or(0)
    }

    pub fn simulate(&mut self) -> Result<RunSummary, SimError> {
        self.simulate_with(|_, _| {})
    }

    /// Runs until the network is empty after the last departure or the horizon is reached.
    /// `observer` sees the board after every step.
    pub fn simulate_with(
        &mut self,
        mut observer: impl FnMut(u32, &Board),
    ) -> Result<RunSummary, SimError> {
        if self.state != BoardState::Initialized {
            self.reset();
        }
        let start = Instant::now();
        let last_departure = self.last_departure();
        let max_step = last_departure + self.config.numeric.max_travel_time;
        info!(
            "Simulating {} groups on {} links, at most {} steps of {:.3} s",
            self.groups.len(),
            self.network.num_links(),
            max_step + 1,
            self.network.delta_t()
        );

        let mut final_state = BoardState::TimeLimitExceeded(max_step);
        for step in 0..=max_step {
            self.state = BoardState::Running(step);
            self.iterate(step)?;
            observer(step, self);

            let total = self.total_accumulation();
            if step % 100 == 0 {
                debug!("Step {}: {:.3} people on the network", step, total);
            }
            if total < self.config.numeric.abs_tol && step > last_departure {
                final_state = BoardState::Converged(step);
                break;
            }
        }
        self.state = final_state;

        let summary = RunSummary {
            state: self.state,
            demand: self.groups.iter().map(|group| group.people).sum(),
            arrived: self.groups.iter().map(Group::arrived).sum(),
            num_diagnostics: self.diagnostics.len(),
            computation_time: start.elapsed(),
        };
        match summary.state {
            BoardState::TimeLimitExceeded(step) => warn!(
                "Time limit exceeded at step {} with {:.3} people on the network",
                step,
                self.total_accumulation()
            ),
            _ => info!(
                "Finished in state {:?}: {:.3} of {:.3} people arrived ({:?})",
                summary.state, summary.arrived, summary.demand, summary.computation_time
            ),
        }
        Ok(summary)
    }

    /// Performs one interval: load sources, update speeds and potentials, reset the link
    /// counters, allocate sending capacities, propagate and drain the sinks.
    pub fn iterate(&mut self, step: u32) -> Result<(), SimError> {
        self.load_sources(step);
        self.update_speeds()?;
        let velocities = self
            .links
            .iter()
            .map(|state| state.velocity)
            .collect::<Vec<_>>();
        self.potentials.update(&self.network, &velocities);
        self.reset_flows();
        self.allocate_sending(step);
        self.propagate()?;
        self.drain_sinks(step);
        Ok(())
    }

    fn load_sources(&mut self, step: u32) {
        let Some(departing) = self.departures.get(&step) else {
            return;
        };
        for &group_idx in departing {
            let group = &self.groups[group_idx.0 as usize];
            let source = self.network.route(group.route).source_link;
            self.links[source.0 as usize].add_fragment(group_idx, group.people);
        }
    }

    fn update_speeds(&mut self) -> Result<(), SimError> {
        self.links
            .par_iter_mut()
            .for_each(LinkState::update_accumulation);

        let network = &self.network;
        let links = &self.links;
        let diagram = self.diagram;
        let numeric = self.config.numeric;
        let cell_states = (0..network.num_cells())
            .into_par_iter()
            .map(|i| {
                let cell = network.cell(CellIdx(i as u32));
                let streams = cell
                    .streams
                    .iter()
                    .map(|(orientation, stream_links)| {
                        let acc = stream_links
                            .iter()
                            .map(|l| links[l.0 as usize].accumulation)
                            .sum::<f64>();
                        (*orientation, acc)
                    })
                    .collect::<Vec<_>>();
                diagram
                    .evaluate(&streams, cell.area, &numeric)
                    .map_err(|source| SimError::Diagram {
                        cell: cell.name.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<Vec<StreamState>>, SimError>>()?;

        let mut link_states = vec![StreamState::FREE_FLOW; network.num_links()];
        for ((_, cell), states) in network.cells().zip(cell_states) {
            for ((_, stream_links), state) in cell.streams.iter().zip(states) {
                for l in stream_links.iter() {
                    link_states[l.0 as usize] = state;
                }
            }
        }
        self.links
            .par_iter_mut()
            .zip(link_states)
            .for_each(|(link, state)| link.set_stream(state));
        Ok(())
    }

    fn reset_flows(&mut self) {
        let network = &self.network;
        let cfl = self.config.cfl;
        self.links
            .par_iter_mut()
            .enumerate()
            .for_each(|(i, state)| {
                state.reset_flows(cfl, network.link(LinkIdx(i as u32)).rel_length)
            });
    }

    /// Splits the sending capacity of every link over its fragments and their downstream
    /// links, then sums up the candidate inflow of every link.
    fn allocate_sending(&mut self, step: u32) {
        let network = &self.network;
        let potentials = &self.potentials;
        let groups = &self.groups;
        let cfl = self.config.cfl;
        let trapped = self
            .links
            .par_iter_mut()
            .enumerate()
            .flat_map_iter(|(i, state)| {
                let link_idx = LinkIdx(i as u32);
                let link = network.link(link_idx);
                let capacity = state.sending_capacity(cfl, link.rel_length);
                let accumulation = state.accumulation;
                let mut trapped = Vec::new();
                for (&group_idx, fragment) in state.fragments.iter_mut() {
                    let route = groups[group_idx.0 as usize].route;
                    match potentials.split(network, route, link.to) {
                        RouteSplit::Fractions(fractions) => {
                            let flow = fragment_flow(fragment.size, accumulation, capacity);
                            fragment.sending = fractions
                                .into_iter()
                                .map(|(target, fraction)| (target, fraction * flow))
                                .collect();
                        }
                        RouteSplit::Trapped | RouteSplit::NoOutLink => {
                            trapped.push((group_idx, link_idx, route))
                        }
                    }
                }
                trapped
            })
            .collect::<Vec<_>>();
        for (group, link, route) in trapped {
            self.diagnostics.trapped(group, link, route, step);
        }

        let mut candidate = vec![0.0; self.links.len()];
        for state in self.links.iter() {
            for fragment in state.fragments.values() {
                for &(target, send) in fragment.sending.iter() {
                    candidate[target.0 as usize] += send;
                }
            }
        }
        for (state, candidate) in self.links.iter_mut().zip(candidate) {
            state.candidate_inflow = candidate;
        }
    }

    /// Moves the allocated flows. Inflows are only added once every link has sent, so
    /// people move by at most one link per interval.
    fn propagate(&mut self) -> Result<(), SimError> {
        let abs_tol = self.config.numeric.abs_tol;
        let frozen = self
            .links
            .iter()
            .map(|state| (state.candidate_inflow, state.receiving))
            .collect::<Vec<_>>();
        let mut moved: Vec<(LinkIdx, GroupIdx, f64)> = Vec::new();
        for (i, state) in self.links.iter_mut().enumerate() {
            let link_idx = LinkIdx(i as u32);
            let allocations = state
                .fragments
                .iter_mut()
                .map(|(&group, fragment)| (group, std::mem::take(&mut fragment.sending)))
                .collect::<Vec<_>>();
            for (group, sending) in allocations {
                for (target, send) in sending {
                    let (candidate, receiving) = frozen[target.0 as usize];
                    let people = transfer(target, send, candidate, receiving)?;
                    let removed = state.sub_fragment(link_idx, group, people, abs_tol)?;
                    state.outflow += people;
                    moved.push((target, group, people));
                    if removed {
                        break;
                    }
                }
            }
        }
        for (target, group, people) in moved {
            let state = &mut self.links[target.0 as usize];
            state.inflow += people;
            state.add_fragment(group, people);
        }
        Ok(())
    }

    fn drain_sinks(&mut self, step: u32) {
        let gate_correction = self.config.numeric.gate_correction;
        for &sink in self.network.sink_links() {
            let fragments = std::mem::take(&mut self.links[sink.0 as usize].fragments);
            for (group, fragment) in fragments {
                if let Err(arrival) =
                    self.groups[group.0 as usize].record_arrival(step, fragment.size, gate_correction)
                {
                    self.diagnostics.invalid_arrival(group, step, arrival);
                }
            }
        }
    }

    /// People currently on the network.
    pub fn total_accumulation(&self) -> f64 {
        self.links.iter().map(LinkState::fragment_total).sum()
    }

    pub fn group_stats(&self) -> Vec<TravelTimeStats> {
        let delta_t = self.network.delta_t();
        self.groups
            .iter()
            .map(|group| group.travel_time_stats(delta_t))
            .collect()
    }

    /// Simulated travel time statistics of the group of every observed pedestrian.
    pub fn pedestrian_stats(&self) -> impl Iterator<Item = (&Pedestrian, TravelTimeStats)> + '_ {
        let delta_t = self.network.delta_t();
        self.pedestrians.iter().map(move |pedestrian| {
            let group = &self.groups[pedestrian.group.0 as usize];
            (pedestrian, group.travel_time_stats(delta_t))
        })
    }

    pub fn log_likelihood(&self) -> Result<f64, LikelihoodError> {
        if !self.state.is_finished() {
            return Err(LikelihoodError::NotSimulated);
        }
        likelihood::log_likelihood(
            self.config.calibration,
            &self.groups,
            &self.pedestrians,
            self.network.delta_t(),
        )
    }

    pub fn scenario(&self) -> &Arc<Scenario> {
        &self.scenario
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn diagram(&self) -> FundamentalDiagram {
        self.diagram
    }

    pub fn potentials(&self) -> &PotentialField {
        &self.potentials
    }

    pub fn links(&self) -> &[LinkState] {
        &self.links
    }

    pub fn link_state(&self, link_idx: LinkIdx) -> &LinkState {
        &self.links[link_idx.0 as usize]
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn pedestrians(&self) -> &[Pedestrian] {
        &self.pedestrians
    }

    pub fn state(&self) -> BoardState {
        self.state
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }
}
