// Copyright 2024 Johan Barthelemy
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Description of the road network: nodes, directed links and congestion state.
use anyhow::{anyhow, bail, Result};
use hashbrown::HashMap;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};

use crate::routing::PathMetric;
use crate::units::{Length, Speed, Time};

/// A node of the road network.
///
/// The `(x, y)` coordinates are the *logical* coordinates used by the spatial
/// partitioner; `(x_data, y_data)` keep the geographic coordinates read from
/// the input so that the A* heuristic stays meaningful after the logical
/// coordinates have been reassigned.
#[derive(Clone, Debug)]
pub struct RoadNode {
    id: String,
    x: f64,
    y: f64,
    x_data: f64,
    y_data: f64,
    /// Outgoing links, in insertion order.
    links_out: Vec<EdgeIndex>,
    indicators: HashMap<String, i32>,
}

impl RoadNode {
    fn new(id: String, x: f64, y: f64) -> Self {
        RoadNode {
            id,
            x,
            y,
            x_data: x,
            y_data: y,
            links_out: Vec::new(),
            indicators: HashMap::new(),
        }
    }

    /// Returns the string id of the node.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the logical coordinates of the node.
    pub const fn coordinates(&self) -> (f64, f64) {
        (self.x, self.y)
    }

    /// Returns the geographic coordinates of the node.
    pub const fn data_coordinates(&self) -> (f64, f64) {
        (self.x_data, self.y_data)
    }

    /// Returns the outgoing links of the node, in insertion order.
    pub fn links_out(&self) -> &[EdgeIndex] {
        &self.links_out
    }

    /// Attaches a named indicator to the node.
    pub fn add_indicator(&mut self, name: String, value: i32) {
        self.indicators.insert(name, value);
    }
}

/// A directed link of the road network.
#[derive(Clone, Debug)]
pub struct RoadLink {
    id: String,
    length: Length,
    free_flow_time: Time,
    /// Scaling constant of the congestion function (vehicles per hour per km).
    capacity: f64,
    /// Number of agents currently travelling on the link.
    occupancy: u32,
}

impl RoadLink {
    /// Returns the string id of the link.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the length of the link.
    pub const fn length(&self) -> Length {
        self.length
    }

    /// Returns the free-flow traversal time of the link.
    pub const fn free_flow_time(&self) -> Time {
        self.free_flow_time
    }

    /// Returns the capacity of the link.
    pub const fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Returns the number of agents currently on the link.
    pub const fn occupancy(&self) -> u32 {
        self.occupancy
    }

    /// Returns the occupancy of the link divided by its capacity.
    pub fn saturation(&self) -> f64 {
        self.occupancy as f64 / self.capacity
    }

    /// Returns the time required to traverse the link at its current
    /// occupancy, following the Bureau of Public Roads function
    /// `t_ff * (1 + 0.15 * (occupancy / capacity)^4)`.
    pub fn time_on_link(&self) -> Time {
        self.free_flow_time * (1.0 + 0.15 * self.saturation().powi(4))
    }
}

/// The directed road network, read-mostly after load.
///
/// The topology is replicated on every partition; the dynamic occupancy
/// fields are only meaningful on the partition owning the link's start node.
#[derive(Clone, Debug)]
pub struct RoadNetwork {
    graph: DiGraph<RoadNode, RoadLink>,
    node_ids: HashMap<String, NodeIndex>,
    link_ids: HashMap<String, EdgeIndex>,
    min_x: f64,
    max_x: f64,
    min_y: f64,
    max_y: f64,
}

impl RoadNetwork {
    /// Creates an empty RoadNetwork.
    pub fn new() -> Self {
        RoadNetwork {
            graph: DiGraph::new(),
            node_ids: HashMap::new(),
            link_ids: HashMap::new(),
            min_x: f64::MAX,
            max_x: f64::MIN,
            min_y: f64::MAX,
            max_y: f64::MIN,
        }
    }

    /// Inserts a node in the network and returns its index.
    pub fn add_node(&mut self, id: &str, x: f64, y: f64) -> Result<NodeIndex> {
        if self.node_ids.contains_key(id) {
            bail!("duplicate node id `{id}`");
        }
        let index = self.graph.add_node(RoadNode::new(id.to_owned(), x, y));
        self.node_ids.insert(id.to_owned(), index);
        self.min_x = self.min_x.min(x);
        self.max_x = self.max_x.max(x);
        self.min_y = self.min_y.min(y);
        self.max_y = self.max_y.max(y);
        Ok(index)
    }

    /// Inserts a link in the network, registers it as an outgoing link of its
    /// start node and returns its index.
    pub fn add_link(
        &mut self,
        id: &str,
        start: &str,
        end: &str,
        length: Length,
        free_flow_speed: Speed,
        capacity: f64,
    ) -> Result<EdgeIndex> {
        if self.link_ids.contains_key(id) {
            bail!("duplicate link id `{id}`");
        }
        let start = self
            .node_index(start)
            .ok_or_else(|| anyhow!("link `{id}` references unknown start node `{start}`"))?;
        let end = self
            .node_index(end)
            .ok_or_else(|| anyhow!("link `{id}` references unknown end node `{end}`"))?;
        let link = RoadLink {
            id: id.to_owned(),
            length,
            free_flow_time: length / free_flow_speed,
            capacity,
            occupancy: 0,
        };
        let index = self.graph.add_edge(start, end, link);
        self.graph[start].links_out.push(index);
        self.link_ids.insert(id.to_owned(), index);
        Ok(index)
    }

    /// Returns the index of the node with the given id.
    pub fn node_index(&self, id: &str) -> Option<NodeIndex> {
        self.node_ids.get(id).copied()
    }

    /// Returns the index of the link with the given id.
    pub fn link_index(&self, id: &str) -> Option<EdgeIndex> {
        self.link_ids.get(id).copied()
    }

    /// Returns a reference to the node with the given index.
    pub fn node(&self, index: NodeIndex) -> &RoadNode {
        &self.graph[index]
    }

    /// Returns a mutable reference to the node with the given index.
    pub fn node_mut(&mut self, index: NodeIndex) -> &mut RoadNode {
        &mut self.graph[index]
    }

    /// Returns a reference to the link with the given index.
    pub fn link(&self, index: EdgeIndex) -> &RoadLink {
        &self.graph[index]
    }

    /// Returns the start and end nodes of a link.
    pub fn link_endpoints(&self, index: EdgeIndex) -> (NodeIndex, NodeIndex) {
        self.graph
            .edge_endpoints(index)
            .expect("invalid link index")
    }

    /// Returns the start node of a link.
    pub fn link_source(&self, index: EdgeIndex) -> NodeIndex {
        self.link_endpoints(index).0
    }

    /// Returns the end node of a link.
    pub fn link_target(&self, index: EdgeIndex) -> NodeIndex {
        self.link_endpoints(index).1
    }

    /// Returns the number of nodes in the network.
    pub fn nb_nodes(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns the number of links in the network.
    pub fn nb_links(&self) -> usize {
        self.graph.edge_count()
    }

    /// Returns an iterator over the node indices of the network.
    pub fn node_indices(&self) -> impl Iterator<Item = NodeIndex> {
        self.graph.node_indices()
    }

    /// Returns an iterator over the link indices of the network.
    pub fn link_indices(&self) -> impl Iterator<Item = EdgeIndex> {
        self.graph.edge_indices()
    }

    /// Records an agent entering the given link.
    pub fn increment_occupancy(&mut self, index: EdgeIndex) {
        self.graph[index].occupancy += 1;
    }

    /// Records an agent leaving the given link.
    pub fn decrement_occupancy(&mut self, index: EdgeIndex) {
        let link = &mut self.graph[index];
        assert!(
            link.occupancy > 0,
            "occupancy of link `{}` decremented below zero",
            link.id
        );
        link.occupancy -= 1;
    }

    /// Returns the cost of a link under the given metric.
    pub(crate) fn link_cost(&self, index: EdgeIndex, metric: PathMetric) -> f64 {
        let link = &self.graph[index];
        match metric {
            PathMetric::Fastest => link.free_flow_time.0,
            PathMetric::Shortest => link.length.0,
        }
    }

    /// Overrides the cost of a link under the given metric and returns the
    /// previous value, so the caller can restore it.
    pub(crate) fn override_link_cost(
        &mut self,
        index: EdgeIndex,
        metric: PathMetric,
        cost: f64,
    ) -> f64 {
        let link = &mut self.graph[index];
        match metric {
            PathMetric::Fastest => std::mem::replace(&mut link.free_flow_time.0, cost),
            PathMetric::Shortest => std::mem::replace(&mut link.length.0, cost),
        }
    }

    /// Returns the Manhattan distance between two nodes, on the preserved
    /// geographic coordinates.
    pub fn data_distance(&self, a: NodeIndex, b: NodeIndex) -> f64 {
        let (ax, ay) = self.graph[a].data_coordinates();
        let (bx, by) = self.graph[b].data_coordinates();
        (bx - ax).abs() + (by - ay).abs()
    }

    /// Returns the ranges of the logical coordinates, as
    /// `(min_x, max_x, min_y, max_y)`.
    pub const fn bounds(&self) -> (f64, f64, f64, f64) {
        (self.min_x, self.max_x, self.min_y, self.max_y)
    }

    /// Reassigns the logical coordinates of every node to a synthetic strip
    /// coordinate, `(index mod n_partitions + 0.5, 0.5)`, balancing the nodes
    /// over the partitions deterministically. The geographic coordinates are
    /// preserved in the data fields.
    pub fn assign_strip_coordinates(&mut self, n_partitions: usize) {
        for (i, index) in self.graph.node_indices().enumerate() {
            let node = &mut self.graph[index];
            node.x = (i % n_partitions) as f64 + 0.5;
            node.y = 0.5;
        }
        self.min_x = 0.0;
        self.max_x = n_partitions as f64;
        self.min_y = 0.0;
        self.max_y = 1.0;
    }
}
