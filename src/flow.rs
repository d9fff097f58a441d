use std::collections::BTreeMap;

use crate::demand::{Fragment, GroupIdx};
use crate::error::SimError;
use crate::fundamental_diagram::StreamState;
use crate::graph::LinkIdx;

/// Dynamic state of a link during a run.
#[derive(Debug, Clone)]
pub struct LinkState {
    pub accumulation: f64,
    /// Non-dimensional velocity.
    pub velocity: f64,
    pub crit_acc: f64,
    pub crit_vel: f64,
    /// Sum of the sending capacities of all fragments directed at this link.
    pub candidate_inflow: f64,
    /// Receiving capacity, frozen before any transfer of the interval.
    pub receiving: f64,
    pub inflow: f64,
    pub outflow: f64,
    pub fragments: BTreeMap<GroupIdx, Fragment>,
}

impl Default for LinkState {
    fn default() -> Self {
        Self {
            accumulation: 0.0,
            velocity: 1.0,
            crit_acc: f64::INFINITY,
            crit_vel: 1.0,
            candidate_inflow: 0.0,
            receiving: 0.0,
            inflow: 0.0,
            outflow: 0.0,
            fragments: BTreeMap::new(),
        }
    }
}

impl LinkState {
    pub fn fragment_total(&self) -> f64 {
        self.fragments.values().map(|frag| frag.size).sum()
    }

    pub fn update_accumulation(&mut self) {
        self.accumulation = self.fragment_total();
    }

    pub fn set_stream(&mut self, state: StreamState) {
        self.velocity = state.velocity;
        self.crit_acc = state.crit_acc;
        self.crit_vel = state.crit_vel;
    }

    pub fn hydrodynamic_flow(&self, cfl: f64, rel_length: f64) -> f64 {
        cfl / rel_length * self.accumulation * self.velocity
    }

    pub fn critical_capacity(&self, cfl: f64, rel_length: f64) -> f64 {
        cfl / rel_length * self.crit_acc * self.crit_vel
    }

    /// Outflow the link can offer in one interval.
    pub fn sending_capacity(&self, cfl: f64, rel_length: f64) -> f64 {
        if self.accumulation <= self.crit_acc {
            self.hydrodynamic_flow(cfl, rel_length)
        } else {
            self.critical_capacity(cfl, rel_length)
        }
    }

    /// Inflow the link can absorb in one interval.
    pub fn receiving_capacity(&self, cfl: f64, rel_length: f64) -> f64 {
        if self.accumulation <= self.crit_acc {
            self.critical_capacity(cfl, rel_length)
        } else {
            self.hydrodynamic_flow(cfl, rel_length)
        }
    }

    /// Clears the per-interval counters and freezes the receiving capacity.
    pub fn reset_flows(&mut self, cfl: f64, rel_length: f64) {
        self.inflow = 0.0;
        self.outflow = 0.0;
        self.candidate_inflow = 0.0;
        self.receiving = self.receiving_capacity(cfl, rel_length);
        for frag in self.fragments.values_mut() {
            frag.sending.clear();
        }
    }

    pub fn add_fragment(&mut self, group: GroupIdx, people: f64) {
        if people > 0.0 {
            self.fragments.entry(group).or_default().size += people;
        }
    }

    /// Removes `people` from the fragment of `group`. Returns whether the fragment is gone.
    pub fn sub_fragment(
        &mut self,
        link: LinkIdx,
        group: GroupIdx,
        people: f64,
        abs_tol: f64,
    ) -> Result<bool, SimError> {
        let Some(frag) = self.fragments.get_mut(&group) else {
            return Err(SimError::MissingFragment { link, group });
        };
        let remainder = frag.size - people;
        if remainder > abs_tol {
            frag.size = remainder;
            Ok(false)
        } else if remainder > -abs_tol {
            self.fragments.remove(&group);
            Ok(true)
        } else {
            Err(SimError::NegativeFragment {
                link,
                group,
                remainder,
            })
        }
    }
}

/// Demand-proportional share of a link's sending capacity available to a fragment.
pub fn fragment_flow(size: f64, accumulation: f64, sending_capacity: f64) -> f64 {
    size.min(size / accumulation * sending_capacity)
}

/// Flow actually moved for a sending capacity `send` directed at a target with the given
/// candidate inflow and receiving capacity. Oversubscribed targets ration proportionally.
pub fn transfer(target: LinkIdx, send: f64, candidate: f64, receiving: f64) -> Result<f64, SimError> {
    if !(send >= 0.0 && candidate >= 0.0 && receiving >= 0.0) {
        return Err(SimError::InvalidTransfer {
            target,
            send,
            candidate,
            receiving,
        });
    }
    if candidate <= receiving {
        Ok(send)
    } else {
        Ok(send * receiving / candidate)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::{fragment_flow, transfer, LinkState};
    use crate::demand::GroupIdx;
    use crate::error::SimError;
    use crate::fundamental_diagram::StreamState;
    use crate::graph::LinkIdx;

    fn congested_state(accumulation: f64) -> LinkState {
        let mut state = LinkState::default();
        state.add_fragment(GroupIdx(0), accumulation);
        state.update_accumulation();
        state.set_stream(StreamState {
            velocity: 0.5,
            crit_acc: 10.0,
            crit_vel: 0.6,
        });
        state
    }

    #[test]
    fn test_capacities_below_critical() {
        let state = congested_state(4.0);
        assert_relative_eq!(state.sending_capacity(0.8, 2.0), 0.4 * 4.0 * 0.5);
        assert_relative_eq!(state.receiving_capacity(0.8, 2.0), 0.4 * 10.0 * 0.6);
    }

    #[test]
    fn test_capacities_above_critical() {
        let state = congested_state(20.0);
        assert_relative_eq!(state.sending_capacity(0.8, 2.0), 0.4 * 10.0 * 0.6);
        assert_relative_eq!(state.receiving_capacity(0.8, 2.0), 0.4 * 20.0 * 0.5);
    }

    #[test]
    fn test_fragment_flow_is_demand_proportional() {
        // link holds 10 people and can send 4
        assert_relative_eq!(fragment_flow(2.5, 10.0, 4.0), 1.0);
        assert_relative_eq!(fragment_flow(7.5, 10.0, 4.0), 3.0);
        // free flow on an infinite cell sends everything
        assert_relative_eq!(fragment_flow(2.5, 10.0, 40.0), 2.5);
    }

    #[test]
    fn test_transfer_rationing() {
        let target = LinkIdx(0);
        assert_eq!(transfer(target, 2.0, 3.0, 5.0), Ok(2.0));
        assert_eq!(transfer(target, 2.0, 5.0, 5.0), Ok(2.0));
        assert_relative_eq!(transfer(target, 2.0, 8.0, 4.0).unwrap(), 1.0);
        assert!(matches!(
            transfer(target, -1.0, 8.0, 4.0),
            Err(SimError::InvalidTransfer { .. })
        ));
        assert!(transfer(target, f64::NAN, 8.0, 4.0).is_err());
        assert_eq!(transfer(target, 1.0, 2.0, f64::INFINITY), Ok(1.0));
    }

    #[test]
    fn test_rationed_transfers_respect_receiving_capacity() {
        let sends = [0.7, 1.9, 3.4];
        let candidate: f64 = sends.iter().sum();
        let received: f64 = sends
            .iter()
            .map(|&s| transfer(LinkIdx(0), s, candidate, 2.5).unwrap())
            .sum();
        assert_relative_eq!(received, 2.5, max_relative = 1e-12);
    }

    #[test]
    fn test_sub_fragment() {
        let link = LinkIdx(3);
        let mut state = LinkState::default();
        state.add_fragment(GroupIdx(1), 2.0);
        state.add_fragment(GroupIdx(1), 0.0);
        assert_eq!(state.fragments.len(), 1);

        assert_eq!(state.sub_fragment(link, GroupIdx(1), 1.5, 1e-6), Ok(false));
        assert_relative_eq!(state.fragments[&GroupIdx(1)].size, 0.5);
        // dust within tolerance removes the fragment
        assert_eq!(state.sub_fragment(link, GroupIdx(1), 0.5 + 1e-8, 1e-6), Ok(true));
        assert!(state.fragments.is_empty());

        assert_eq!(
            state.sub_fragment(link, GroupIdx(1), 0.1, 1e-6),
            Err(SimError::MissingFragment {
                link,
                group: GroupIdx(1)
            })
        );
        state.add_fragment(GroupIdx(2), 1.0);
        assert!(matches!(
            state.sub_fragment(link, GroupIdx(2), 1.1, 1e-6),
            Err(SimError::NegativeFragment { .. })
        ));
    }

    #[test]
    fn test_reset_freezes_receiving_capacity() {
        let mut state = congested_state(4.0);
        state.candidate_inflow = 3.0;
        state.inflow = 1.0;
        state.reset_flows(1.0, 1.0);
        assert_eq!(state.candidate_inflow, 0.0);
        assert_eq!(state.inflow, 0.0);
        assert_relative_eq!(state.receiving, 6.0);
        state.add_fragment(GroupIdx(0), 100.0);
        state.update_accumulation();
        assert_relative_eq!(state.receiving, 6.0);
    }
}
