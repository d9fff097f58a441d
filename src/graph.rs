use std::collections::BTreeMap;
use std::fmt::Debug;

use itertools::Itertools;
use log::debug;

use crate::col::{map_new, HashMap};
use crate::config::RunConfig;
use crate::error::BuildError;
use crate::indexer::Indexer;
use crate::orientation::Orientation;
use crate::scenario::{LinkLength, Scenario};

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellIdx(pub u32);
impl Debug for CellIdx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("c#{}", self.0))
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkIdx(pub u32);
impl Debug for LinkIdx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("l#{}", self.0))
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIdx(pub u32);
impl Debug for NodeIdx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("n#{}", self.0))
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteIdx(pub u32);
impl Debug for RouteIdx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("r#{}", self.0))
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ZoneIdx(pub u32);
impl Debug for ZoneIdx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("z#{}", self.0))
    }
}

#[derive(Debug)]
pub struct Cell {
    pub name: Box<str>,
    pub zone: ZoneIdx,
    /// Walkable area [m^2], infinite for gates.
    pub area: f64,
    pub polygon: Box<[(f64, f64)]>,
    /// Local links grouped by orientation.
    pub streams: Box<[(Orientation, Box<[LinkIdx]>)]>,
}

impl Cell {
    pub fn links(&self) -> impl Iterator<Item = LinkIdx> + '_ {
        self.streams.iter().flat_map(|(_, links)| links.iter().copied())
    }
}

#[derive(Debug)]
pub struct Link {
    pub cell: CellIdx,
    /// `None` for links fed from outside the network.
    pub origin: Option<CellIdx>,
    /// `None` for links leaving the network.
    pub destination: Option<CellIdx>,
    pub orientation: Orientation,
    pub length: f64,
    /// Length relative to the shortest link of the network.
    pub rel_length: f64,
    pub from: NodeIdx,
    pub to: NodeIdx,
}

impl Link {
    pub fn is_source(&self) -> bool {
        self.origin.is_none()
    }

    pub fn is_sink(&self) -> bool {
        self.destination.is_none()
    }
}

#[derive(Debug)]
pub struct Node {
    /// The two adjacent cells in ascending order, `None` is the outside.
    pub cells: (Option<CellIdx>, Option<CellIdx>),
    pub zones: Box<[ZoneIdx]>,
    pub incoming: Vec<LinkIdx>,
    pub outgoing: Vec<LinkIdx>,
}

#[derive(Debug)]
pub struct Route {
    pub name: Box<str>,
    pub zones: Box<[ZoneIdx]>,
    /// Nodes associated with any zone of the route, ascending.
    pub nodes: Box<[NodeIdx]>,
    node_mask: Box<[bool]>,
    pub source_link: LinkIdx,
    pub sink_link: LinkIdx,
    pub origin: NodeIdx,
    pub destination: NodeIdx,
}

impl Route {
    pub fn contains(&self, node: NodeIdx) -> bool {
        self.node_mask[node.0 as usize]
    }
}

/// Static topology of a scenario under one parameter set.
#[derive(Debug)]
pub struct Network {
    cells: Vec<Cell>,
    links: Vec<Link>,
    nodes: Vec<Node>,
    routes: Vec<Route>,
    zone_names: Vec<Box<str>>,
    route_by_name: HashMap<Box<str>, RouteIdx>,
    sink_links: Vec<LinkIdx>,
    /// Destination nodes of sink links.
    gate_nodes: Vec<NodeIdx>,
    min_length: f64,
    delta_t: f64,
}

type NodeKey = (Option<CellIdx>, Option<CellIdx>);

fn node_key(a: Option<CellIdx>, b: Option<CellIdx>) -> NodeKey {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

impl Network {
    pub fn build(scenario: &Scenario, config: &RunConfig) -> Result<Self, BuildError> {
        config.validate()?;

        let mut zones = Indexer::new(|i| ZoneIdx(i as u32));
        let mut cell_names = Indexer::new(|i| CellIdx(i as u32));
        let mut cells = Vec::with_capacity(scenario.cells.len());
        for record in scenario.cells.iter() {
            cell_names
                .insert_new(&record.name)
                .ok_or_else(|| BuildError::DuplicateCell(record.name.clone()))?;
            cells.push(Cell {
                name: record.name.clone(),
                zone: zones.index(&record.zone),
                area: record.area,
                polygon: record.polygon.clone(),
                streams: Box::new([]),
            });
        }

        let min_length = scenario
            .links
            .iter()
            .filter_map(|it| match it.length {
                LinkLength::Fixed(length) => Some(length),
                LinkLength::Shortest => None,
            })
            .reduce(f64::min)
            .ok_or(BuildError::NoLinkLength)?;
        let delta_t = config.cfl * min_length / config.params.free_speed;
        if !(delta_t > 0.0 && delta_t.is_finite()) {
            return Err(BuildError::InvalidTimeStep(delta_t));
        }

        let resolve = |name: &Option<Box<str>>| -> Result<Option<CellIdx>, BuildError> {
            match name {
                None => Ok(None),
                Some(name) => cell_names
                    .get(name)
                    .map(Some)
                    .ok_or_else(|| BuildError::UnknownCell(name.clone())),
            }
        };

        let mut links: Vec<Link> = Vec::with_capacity(2 * scenario.links.len());
        let mut nodes: Vec<Node> = Vec::new();
        let mut node_by_cells: HashMap<NodeKey, NodeIdx> = map_new();
        for record in scenario.links.iter() {
            let cell = cell_names
                .get(&record.cell)
                .ok_or_else(|| BuildError::UnknownCell(record.cell.clone()))?;
            let origin = resolve(&record.origin)?;
            let destination = resolve(&record.destination)?;
            let length = match record.length {
                LinkLength::Fixed(length) => length,
                LinkLength::Shortest => min_length,
            };
            if !(length > 0.0 && length.is_finite()) {
                return Err(BuildError::InvalidLength(links.len(), length));
            }

            let mut directions = vec![(origin, destination, record.orientation)];
            if record.bidirectional {
                directions.push((destination, origin, record.orientation.reversed()));
            }
            for (origin, destination, orientation) in directions {
                let link_idx = LinkIdx(links.len() as u32);
                let from = add_node(&mut nodes, &mut node_by_cells, &cells, origin, Some(cell));
                let to = add_node(&mut nodes, &mut node_by_cells, &cells, Some(cell), destination);
                nodes[from.0 as usize].outgoing.push(link_idx);
                nodes[to.0 as usize].incoming.push(link_idx);
                links.push(Link {
                    cell,
                    origin,
                    destination,
                    orientation,
                    length,
                    rel_length: length / min_length,
                    from,
                    to,
                });
            }
        }

        let mut streams_by_cell: Vec<BTreeMap<Orientation, Vec<LinkIdx>>> =
            vec![BTreeMap::new(); cells.len()];
        for (i, link) in links.iter().enumerate() {
            streams_by_cell[link.cell.0 as usize]
                .entry(link.orientation)
                .or_default()
                .push(LinkIdx(i as u32));
        }
        for (cell, streams) in cells.iter_mut().zip(streams_by_cell) {
            cell.streams = streams
                .into_iter()
                .map(|(orientation, links)| (orientation, links.into_boxed_slice()))
                .collect();
        }

        let sink_links = (0..links.len())
            .map(|i| LinkIdx(i as u32))
            .filter(|&i| links[i.0 as usize].is_sink())
            .collect_vec();
        let gate_nodes = sink_links
            .iter()
            .map(|&i| links[i.0 as usize].to)
            .sorted()
            .dedup()
            .collect_vec();

        let mut network = Network {
            cells,
            links,
            nodes,
            routes: Vec::with_capacity(scenario.routes.len()),
            zone_names: Vec::new(),
            route_by_name: map_new(),
            sink_links,
            gate_nodes,
            min_length,
            delta_t,
        };

        for record in scenario.routes.iter() {
            let route_zones = record
                .zones
                .iter()
                .map(|zone| {
                    zones.get(zone).ok_or_else(|| BuildError::UnknownZone {
                        route: record.name.clone(),
                        zone: zone.clone(),
                    })
                })
                .collect::<Result<Box<[ZoneIdx]>, BuildError>>()?;
            let idx = RouteIdx(network.routes.len() as u32);
            if network
                .route_by_name
                .insert(record.name.clone(), idx)
                .is_some()
            {
                return Err(BuildError::DuplicateRoute(record.name.clone()));
            }
            let route = network.create_route(record.name.clone(), route_zones)?;
            network.routes.push(route);
        }
        network.zone_names = zones.into_names();

        debug!(
            "Built network with {} cells, {} links, {} nodes and {} routes (delta t = {} s)",
            network.cells.len(),
            network.links.len(),
            network.nodes.len(),
            network.routes.len(),
            network.delta_t
        );
        Ok(network)
    }

    fn create_route(&self, name: Box<str>, zones: Box<[ZoneIdx]>) -> Result<Route, BuildError> {
        let (Some(&origin_zone), Some(&destination_zone)) = (zones.first(), zones.last()) else {
            return Err(BuildError::UnknownZone {
                route: name,
                zone: "".into(),
            });
        };
        let node_mask: Box<[bool]> = self
            .nodes
            .iter()
            .map(|node| node.zones.iter().any(|z| zones.contains(z)))
            .collect();
        let nodes = node_mask
            .iter()
            .enumerate()
            .filter(|(_, &on_route)| on_route)
            .map(|(i, _)| NodeIdx(i as u32))
            .collect();

        let find_link = |zone: ZoneIdx, predicate: fn(&Link) -> bool| {
            self.links()
                .find(|(_, link)| self.cell(link.cell).zone == zone && predicate(*link))
                .map(|(idx, _)| idx)
        };
        let source_link = find_link(origin_zone, Link::is_source)
            .ok_or_else(|| BuildError::MissingSourceLink(name.clone()))?;
        let sink_link = find_link(destination_zone, Link::is_sink)
            .ok_or_else(|| BuildError::MissingSinkLink(name.clone()))?;

        Ok(Route {
            origin: self.link(source_link).from,
            destination: self.link(sink_link).to,
            name,
            zones,
            nodes,
            node_mask,
            source_link,
            sink_link,
        })
    }

    pub fn cells(&self) -> impl Iterator<Item = (CellIdx, &Cell)> {
        self.cells
            .iter()
            .enumerate()
            .map(|(i, c)| (CellIdx(i as u32), c))
    }

    pub fn links(&self) -> impl Iterator<Item = (LinkIdx, &Link)> {
        self.links
            .iter()
            .enumerate()
            .map(|(i, l)| (LinkIdx(i as u32), l))
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeIdx, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (NodeIdx(i as u32), n))
    }

    pub fn routes(&self) -> impl Iterator<Item = (RouteIdx, &Route)> {
        self.routes
            .iter()
            .enumerate()
            .map(|(i, r)| (RouteIdx(i as u32), r))
    }

    pub fn cell(&self, cell_idx: CellIdx) -> &Cell {
        &self.cells[cell_idx.0 as usize]
    }

    pub fn link(&self, link_idx: LinkIdx) -> &Link {
        &self.links[link_idx.0 as usize]
    }

    pub fn node(&self, node_idx: NodeIdx) -> &Node {
        &self.nodes[node_idx.0 as usize]
    }

    pub fn route(&self, route_idx: RouteIdx) -> &Route {
        &self.routes[route_idx.0 as usize]
    }

    pub fn route_by_name(&self, name: &str) -> Option<RouteIdx> {
        self.route_by_name.get(name).copied()
    }

    pub fn zone_name(&self, zone_idx: ZoneIdx) -> &str {
        &self.zone_names[zone_idx.0 as usize]
    }

    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn num_links(&self) -> usize {
        self.links.len()
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_routes(&self) -> usize {
        self.routes.len()
    }

    pub fn sink_links(&self) -> &[LinkIdx] {
        &self.sink_links
    }

    pub fn gate_nodes(&self) -> &[NodeIdx] {
        &self.gate_nodes
    }

    pub fn min_length(&self) -> f64 {
        self.min_length
    }

    /// Duration of one interval [s].
    pub fn delta_t(&self) -> f64 {
        self.delta_t
    }
}

/// Returns the node between cells `a` and `b`, creating it if necessary.
fn add_node(
    nodes: &mut Vec<Node>,
    node_by_cells: &mut HashMap<NodeKey, NodeIdx>,
    cells: &[Cell],
    a: Option<CellIdx>,
    b: Option<CellIdx>,
) -> NodeIdx {
    let key = node_key(a, b);
    *node_by_cells.entry(key).or_insert_with(|| {
        let zones = [key.0, key.1]
            .into_iter()
            .flatten()
            .map(|cell| cells[cell.0 as usize].zone)
            .sorted()
            .dedup()
            .collect();
        nodes.push(Node {
            cells: key,
            zones,
            incoming: vec![],
            outgoing: vec![],
        });
        NodeIdx(nodes.len() as u32 - 1)
    })
}
