use rayon::prelude::*;

use crate::config::NumericConfig;
use crate::graph::{LinkIdx, Network, NodeIdx, RouteIdx};
use crate::shortest_path::dijkstra::potentials_to_destination;

/// Route choice at a node for one route.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteSplit {
    /// Fractions of the feasible out-links, summing to one. Zero fractions are dropped.
    Fractions(Vec<(LinkIdx, f64)>),
    /// Feasible out-links exist, but none of them leads towards the destination.
    Trapped,
    /// The node has no out-link on the route.
    NoOutLink,
}

/// Per-route node potentials and the logit route choice derived from them.
pub struct PotentialField {
    num_nodes: usize,
    eta: f64,
    numeric: NumericConfig,
    /// `[route][node]`, `None` if the node carries no potential for the route.
    potentials: Vec<Option<f64>>,
    /// `[route][node]` smallest admissible potential behind the node's out-links.
    offsets: Vec<f64>,
    /// `[route][node]` logit denominator, zero if no out-link is admissible.
    denominators: Vec<f64>,
}

impl PotentialField {
    pub fn new(network: &Network, eta: f64, numeric: NumericConfig) -> Self {
        let size = network.num_routes() * network.num_nodes();
        Self {
            num_nodes: network.num_nodes(),
            eta,
            numeric,
            potentials: vec![None; size],
            offsets: vec![0.0; size],
            denominators: vec![0.0; size],
        }
    }

    /// Recomputes all potentials and logit denominators from the current link velocities.
    pub fn update(&mut self, network: &Network, velocities: &[f64]) {
        if self.num_nodes == 0 {
            return;
        }
        let numeric = self.numeric;
        let weight = |link_idx: LinkIdx| {
            let velocity = velocities[link_idx.0 as usize];
            if velocity > 0.0 {
                network.link(link_idx).rel_length / velocity
            } else {
                f64::INFINITY
            }
        };
        self.potentials
            .par_chunks_mut(self.num_nodes)
            .enumerate()
            .for_each(|(r, potentials)| {
                let route = network.route(RouteIdx(r as u32));
                potentials_to_destination(network, route, weight, &numeric, potentials);
            });

        let eta = self.eta;
        let potentials = &self.potentials;
        let num_nodes = self.num_nodes;
        self.offsets
            .par_chunks_mut(num_nodes)
            .zip(self.denominators.par_chunks_mut(num_nodes))
            .enumerate()
            .for_each(|(r, (offsets, denominators))| {
                let route_potentials = &potentials[r * num_nodes..(r + 1) * num_nodes];
                for (node_idx, node) in network.nodes() {
                    let admissible = node
                        .outgoing
                        .iter()
                        .filter_map(|&l| route_potentials[network.link(l).to.0 as usize])
                        .filter(|&p| p < numeric.pinned_potential)
                        .collect::<Vec<f64>>();
                    let offset = admissible.iter().copied().fold(f64::INFINITY, f64::min);
                    let i = node_idx.0 as usize;
                    offsets[i] = if offset.is_finite() { offset } else { 0.0 };
                    denominators[i] = admissible
                        .iter()
                        .map(|p| (-eta * (p - offsets[i])).exp())
                        .sum();
                }
            });
    }

    pub fn potential(&self, route: RouteIdx, node: NodeIdx) -> Option<f64> {
        self.potentials[self.index(route, node)]
    }

    /// Potentials of all nodes for one route.
    pub fn route_potentials(&self, route: RouteIdx) -> &[Option<f64>] {
        let start = route.0 as usize * self.num_nodes;
        &self.potentials[start..start + self.num_nodes]
    }

    /// Logit split of the demand for `route` waiting at `node` over its out-links.
    pub fn split(&self, network: &Network, route: RouteIdx, node: NodeIdx) -> RouteSplit {
        let feasible = network
            .node(node)
            .outgoing
            .iter()
            .filter_map(|&l| self.potential(route, network.link(l).to).map(|p| (l, p)))
            .collect::<Vec<_>>();
        if feasible.is_empty() {
            return RouteSplit::NoOutLink;
        }
        let i = self.index(route, node);
        let denominator = self.denominators[i];
        if !(denominator > 0.0 && denominator.is_finite()) {
            return RouteSplit::Trapped;
        }
        let offset = self.offsets[i];
        let fractions = feasible
            .into_iter()
            .filter(|&(_, p)| p < self.numeric.pinned_potential)
            .map(|(l, p)| (l, (-self.eta * (p - offset)).exp() / denominator))
            .filter(|&(_, fraction)| fraction >= self.numeric.split_cutoff)
            .collect::<Vec<_>>();
        if fractions.is_empty() {
            return RouteSplit::Trapped;
        }
        RouteSplit::Fractions(fractions)
    }

    fn index(&self, route: RouteIdx, node: NodeIdx) -> usize {
        route.0 as usize * self.num_nodes + node.0 as usize
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::{PotentialField, RouteSplit};
    use crate::config::NumericConfig;
    use crate::graph::Network;
    use crate::test::sample::{create_corridor, create_crossing, create_two_paths};

    fn free_flow_field(network: &Network, eta: f64) -> PotentialField {
        let mut field = PotentialField::new(network, eta, NumericConfig::default());
        field.update(network, &vec![1.0; network.num_links()]);
        field
    }

    #[test]
    fn test_corridor_potentials() {
        let (scenario, config) = create_corridor();
        let network = Network::build(&scenario, &config).unwrap();
        let field = free_flow_field(&network, config.params.eta);
        let (r, route) = network.routes().next().unwrap();
        assert_eq!(field.potential(r, route.destination), Some(0.0));
        // source link, two inner links and the sink link, all of unit length
        assert_eq!(field.potential(r, route.origin), Some(4.0));
        assert_eq!(
            field.split(&network, r, network.link(route.source_link).to),
            RouteSplit::Fractions(vec![(crate::graph::LinkIdx(1), 1.0)])
        );
    }

    #[test]
    fn test_potentials_are_shortest_paths() {
        let (scenario, config) = create_crossing();
        let network = Network::build(&scenario, &config).unwrap();
        let numeric = NumericConfig::default();
        let mut field = PotentialField::new(&network, config.params.eta, numeric);
        let velocities = (0..network.num_links())
            .map(|i| 0.3 + 0.1 * (i % 7) as f64)
            .collect::<Vec<_>>();
        field.update(&network, &velocities);

        for (r, _) in network.routes() {
            for (l, link) in network.links() {
                let (Some(p_from), Some(p_to)) =
                    (field.potential(r, link.from), field.potential(r, link.to))
                else {
                    continue;
                };
                if p_from >= numeric.pinned_potential || p_to >= numeric.pinned_potential {
                    continue;
                }
                let weight = link.rel_length / velocities[l.0 as usize];
                assert!(p_from <= p_to + weight + 1e-9);
            }
        }
    }

    #[test]
    fn test_split_sums_to_one() {
        let (scenario, config) = create_two_paths();
        let network = Network::build(&scenario, &config).unwrap();
        for eta in [0.0, 0.5, 3.0] {
            let field = free_flow_field(&network, eta);
            for (r, _) in network.routes() {
                for (n, _) in network.nodes() {
                    if let RouteSplit::Fractions(fractions) = field.split(&network, r, n) {
                        let sum: f64 = fractions.iter().map(|(_, f)| f).sum();
                        assert_abs_diff_eq!(sum, 1.0, epsilon = 1e-9);
                    }
                }
            }
        }
    }

    #[test]
    fn test_shorter_branch_is_preferred() {
        let (scenario, config) = create_two_paths();
        let network = Network::build(&scenario, &config).unwrap();
        let field = free_flow_field(&network, 1.0);
        let (r, route) = network.routes().next().unwrap();
        let fork = network.link(route.source_link).to;
        let RouteSplit::Fractions(fractions) = field.split(&network, r, fork) else {
            panic!("expected a split at the fork");
        };
        assert_eq!(fractions.len(), 2);
        let mut by_potential = fractions
            .iter()
            .map(|&(l, f)| (field.potential(r, network.link(l).to).unwrap(), f))
            .collect::<Vec<_>>();
        by_potential.sort_by(|a, b| a.0.total_cmp(&b.0));
        let (near, far) = (by_potential[0], by_potential[1]);
        assert_abs_diff_eq!(far.0 - near.0, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(near.1 / far.1, 1f64.exp(), epsilon = 1e-9);
        assert!(near.1 > 0.5);
    }

    #[test]
    fn test_blocked_network_is_trapped() {
        let (scenario, config) = create_corridor();
        let network = Network::build(&scenario, &config).unwrap();
        let mut field = PotentialField::new(&network, 1.0, NumericConfig::default());
        let mut velocities = vec![1.0; network.num_links()];
        velocities[2] = 0.0;
        field.update(&network, &velocities);
        let (r, route) = network.routes().next().unwrap();
        let numeric = NumericConfig::default();
        assert_eq!(
            field.potential(r, route.origin),
            Some(numeric.unreachable)
        );
        assert_eq!(
            field.split(&network, r, network.link(route.source_link).to),
            RouteSplit::Trapped
        );
    }

    #[test]
    fn test_rebuild_is_bitwise_identical() {
        let (scenario, config) = create_crossing();
        let first = Network::build(&scenario, &config).unwrap();
        let second = Network::build(&scenario, &config).unwrap();
        let velocities = (0..first.num_links())
            .map(|i| 1.0 / (1.0 + i as f64))
            .collect::<Vec<_>>();
        let mut a = PotentialField::new(&first, config.params.eta, NumericConfig::default());
        let mut b = PotentialField::new(&second, config.params.eta, NumericConfig::default());
        a.update(&first, &velocities);
        b.update(&second, &velocities);
        for (r, _) in first.routes() {
            let pa = a.route_potentials(r).iter().map(|p| p.map(f64::to_bits));
            let pb = b.route_potentials(r).iter().map(|p| p.map(f64::to_bits));
            assert!(pa.eq(pb));
        }
    }

    #[test]
    fn test_degenerate_weights_are_trapped() {
        let (scenario, config) = create_two_paths();
        let network = Network::build(&scenario, &config).unwrap();
        let (r, route) = network.routes().next().unwrap();
        let fork = network.link(route.source_link).to;
        // the longer branch overflows the logit denominator
        for eta in [-1000.0, f64::NAN] {
            let field = free_flow_field(&network, eta);
            assert_eq!(field.split(&network, r, fork), RouteSplit::Trapped);
        }
    }

    #[test]
    fn test_foreign_gates_are_pinned() {
        let (scenario, config) = create_crossing();
        let network = Network::build(&scenario, &config).unwrap();
        let numeric = NumericConfig::default();
        let field = free_flow_field(&network, config.params.eta);
        assert_eq!(network.gate_nodes().len(), 4);

        for (r, route) in network.routes() {
            for &gate in network.gate_nodes() {
                let expected = if gate == route.destination {
                    0.0
                } else {
                    numeric.pinned_potential
                };
                assert_eq!(field.potential(r, gate), Some(expected));
            }

            // right after the source link a sink leads back into the origin gate
            let entry = network.link(route.source_link).to;
            let back = network
                .node(entry)
                .outgoing
                .iter()
                .copied()
                .find(|&l| network.link(l).is_sink())
                .unwrap();
            assert_ne!(back, route.sink_link);
            let RouteSplit::Fractions(fractions) = field.split(&network, r, entry) else {
                panic!("expected a split behind the source link of {}", route.name);
            };
            assert_eq!(fractions.len(), 1);
            assert_ne!(fractions[0].0, back);
            assert_eq!(fractions[0].1, 1.0);

            for (n, _) in network.nodes() {
                if let RouteSplit::Fractions(fractions) = field.split(&network, r, n) {
                    for (l, _) in fractions {
                        assert!(!network.link(l).is_sink() || l == route.sink_link);
                    }
                }
            }
        }
    }
}
