// Copyright 2024 Johan Barthelemy
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Everything related to the travelling agents.
use std::collections::VecDeque;

use anyhow::Result;
use num_traits::Zero;
use petgraph::graph::{EdgeIndex, NodeIndex};
use serde_derive::{Deserialize, Serialize};

use crate::network::RoadNetwork;
use crate::routing::{self, Path, PathMetric};
use crate::strategy::Strategy;
use crate::units::Time;

/// Agent identifier, stable across partitions.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub struct AgentId(u64);

impl AgentId {
    /// Creates a new AgentId.
    pub const fn new(x: u64) -> Self {
        AgentId(x)
    }

    /// Returns the raw value of the AgentId.
    pub const fn value(self) -> u64 {
        self.0
    }
}

/// Short version of `AgentId::new`.
pub const fn agent_id(id: u64) -> AgentId {
    AgentId::new(id)
}

/// A single origin-to-destination movement within an agent's trip chain.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Trip {
    /// Origin node of the trip.
    pub origin: NodeIndex,
    /// Destination node of the trip.
    pub destination: NodeIndex,
    /// Earliest departure time, in seconds since midnight.
    pub starting_time: Time,
}

impl Trip {
    /// Creates a new Trip.
    pub const fn new(origin: NodeIndex, destination: NodeIndex, starting_time: Time) -> Self {
        Trip {
            origin,
            destination,
            starting_time,
        }
    }
}

/// An agent as produced by the input loaders, before it is homed on the
/// partition owning its first origin.
#[derive(Clone, Debug)]
pub struct AgentSeed {
    /// Identifier of the future agent.
    pub id: AgentId,
    /// Trip chain of the future agent.
    pub trips: Vec<Trip>,
}

/// A traveller pursuing a chain of trips over the road network.
///
/// An agent is owned by exactly one partition at any moment; it migrates when
/// its current node leaves the local strip and is destroyed when its final
/// trip completes.
#[derive(Clone, Debug, PartialEq)]
pub struct Agent {
    id: AgentId,
    /// Rank of the partition that created the agent.
    home_rank: usize,
    /// Rank of the partition currently owning the agent.
    current_rank: usize,
    /// Remaining trip chain; the front is the current trip.
    trips: VecDeque<Trip>,
    x: f64,
    y: f64,
    /// Seconds until the next state transition.
    remaining_time: Time,
    strategy: Strategy,
    /// Remaining path, next hop at the end.
    path: Path,
    en_route: bool,
    at_node: bool,
    cur_link: Option<EdgeIndex>,
    /// Vehicle size; carried but unused by the dynamics.
    size: u32,
    /// Accumulated free-flow travel time of the current trip.
    trip_duration_theo: Time,
    /// Recorded departure time of the current trip.
    trip_start_time: Time,
    /// Number of the path being performed (1-based).
    n_paths_performed: u32,
    /// Number of links traversed in the current path.
    n_links_in_path: u32,
}

impl Agent {
    /// Creates a new agent waiting at the origin of its first trip.
    pub fn new(id: AgentId, rank: usize, trips: Vec<Trip>) -> Self {
        let remaining_time = trips.first().map_or(Time::zero(), |t| t.starting_time);
        Agent {
            id,
            home_rank: rank,
            current_rank: rank,
            trips: trips.into(),
            x: 0.0,
            y: 0.0,
            remaining_time,
            strategy: Strategy::inert(),
            path: Path::new(),
            en_route: false,
            at_node: true,
            cur_link: None,
            size: 1,
            trip_duration_theo: Time::zero(),
            trip_start_time: Time::zero(),
            n_paths_performed: 1,
            n_links_in_path: 0,
        }
    }

    /// Reconstructs an agent from its full state, as carried by an
    /// [AgentPackage](crate::exchange::AgentPackage).
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_state(
        id: AgentId,
        home_rank: usize,
        current_rank: usize,
        trips: VecDeque<Trip>,
        x: f64,
        y: f64,
        remaining_time: Time,
        strategy: Strategy,
        path: Path,
        en_route: bool,
        at_node: bool,
        cur_link: Option<EdgeIndex>,
        size: u32,
        trip_duration_theo: Time,
        trip_start_time: Time,
        n_paths_performed: u32,
        n_links_in_path: u32,
    ) -> Self {
        Agent {
            id,
            home_rank,
            current_rank,
            trips,
            x,
            y,
            remaining_time,
            strategy,
            path,
            en_route,
            at_node,
            cur_link,
            size,
            trip_duration_theo,
            trip_start_time,
            n_paths_performed,
            n_links_in_path,
        }
    }

    /// Returns the identifier of the agent.
    pub const fn id(&self) -> AgentId {
        self.id
    }

    /// Returns the rank of the partition that created the agent.
    pub const fn home_rank(&self) -> usize {
        self.home_rank
    }

    /// Returns the rank of the partition currently owning the agent.
    pub const fn current_rank(&self) -> usize {
        self.current_rank
    }

    pub(crate) fn set_current_rank(&mut self, rank: usize) {
        self.current_rank = rank;
    }

    /// Returns the current trip of the agent, or `None` if the chain is
    /// exhausted.
    pub fn current_trip(&self) -> Option<&Trip> {
        self.trips.front()
    }

    /// Returns the remaining trip chain.
    pub fn trips(&self) -> &VecDeque<Trip> {
        &self.trips
    }

    /// Returns `true` if trips remain after the current one.
    pub fn has_further_trips(&self) -> bool {
        self.trips.len() > 1
    }

    /// Returns the current position of the agent.
    pub const fn position(&self) -> (f64, f64) {
        (self.x, self.y)
    }

    pub(crate) fn set_position(&mut self, x: f64, y: f64) {
        self.x = x;
        self.y = y;
    }

    /// Returns the time left until the next state transition.
    pub const fn remaining_time(&self) -> Time {
        self.remaining_time
    }

    pub(crate) fn set_remaining_time(&mut self, time: Time) {
        self.remaining_time = time;
    }

    /// Decreases the remaining time, clamping at zero.
    pub fn decrease_remaining_time(&mut self, time: Time) {
        self.remaining_time = (self.remaining_time - time).max(Time::zero());
    }

    /// Returns the strategy of the agent.
    pub const fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    pub(crate) fn set_strategy(&mut self, strategy: Strategy) {
        self.strategy = strategy;
    }

    /// Returns the remaining path of the current trip, next hop at the end.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn set_path(&mut self, path: Path) {
        self.path = path;
    }

    /// Pops the next link from the path and counts it as traversed.
    pub fn next_link_and_remove(&mut self) -> EdgeIndex {
        let link = self.path.pop().expect("agent has an empty path");
        self.n_links_in_path += 1;
        link
    }

    /// Returns `true` if the agent is between the departure and the arrival
    /// of a trip.
    pub const fn is_en_route(&self) -> bool {
        self.en_route
    }

    /// Returns `true` if the agent is waiting at a node.
    pub const fn is_at_node(&self) -> bool {
        self.at_node
    }

    pub(crate) fn set_at_node(&mut self, at_node: bool) {
        self.at_node = at_node;
    }

    /// Marks the departure of the agent on its current trip.
    pub fn mark_departed(&mut self, now: Time) {
        self.en_route = true;
        self.trip_start_time = now;
    }

    /// Returns the link the agent is currently on (or has just left, while
    /// waiting at an intermediate node).
    pub const fn cur_link(&self) -> Option<EdgeIndex> {
        self.cur_link
    }

    pub(crate) fn set_cur_link(&mut self, link: EdgeIndex) {
        self.cur_link = Some(link);
    }

    /// Returns the vehicle size of the agent.
    pub const fn size(&self) -> u32 {
        self.size
    }

    /// Returns the accumulated free-flow travel time of the current trip.
    pub const fn trip_duration_theo(&self) -> Time {
        self.trip_duration_theo
    }

    /// Adds the free-flow time of a traversed link to the theoretical trip
    /// duration.
    pub fn increase_trip_duration_theo(&mut self, time: Time) {
        self.trip_duration_theo += time;
    }

    /// Returns the recorded departure time of the current trip.
    pub const fn trip_start_time(&self) -> Time {
        self.trip_start_time
    }

    /// Returns the number of the path currently performed (1-based).
    pub const fn n_paths_performed(&self) -> u32 {
        self.n_paths_performed
    }

    /// Returns the number of links traversed in the current path.
    pub const fn n_links_in_path(&self) -> u32 {
        self.n_links_in_path
    }

    /// Decides whether the agent abandons its planned next link.
    ///
    /// The inputs of the strategy are the elapsed trip time normalized by the
    /// accumulated free-flow time, and the saturation of the just-chosen next
    /// link. The strategy is only evaluated when at least one agent is on
    /// that link.
    pub fn is_rerouting(&self, network: &RoadNetwork, now: Time) -> bool {
        let x1 = if self.trip_duration_theo > Time::zero() {
            (now - self.trip_start_time) / self.trip_duration_theo
        } else {
            0.0
        };
        let cur_link = self.cur_link.expect("rerouting test without a link");
        let x2 = network.link(cur_link).saturation();
        if x2 > 0.0 {
            self.strategy.evaluate(x1, x2)
        } else {
            false
        }
    }

    /// Switches the agent to its next trip: drops the finished trip,
    /// computes the initial path of the new one, repositions the agent to
    /// the new origin and resets the per-trip state.
    ///
    /// The remaining time is the time left until the scheduled departure,
    /// clamped at zero when the agent is late.
    pub fn set_next_trip(&mut self, network: &RoadNetwork, now: Time) -> Result<()> {
        self.trips.pop_front();
        let trip = *self.trips.front().expect("no next trip to set");
        self.path = routing::dijkstra(network, trip.origin, trip.destination, PathMetric::Fastest)?;
        let (x, y) = network.node(trip.origin).coordinates();
        self.x = x;
        self.y = y;
        self.en_route = false;
        self.at_node = true;
        self.cur_link = None;
        self.trip_duration_theo = Time::zero();
        self.remaining_time = (trip.starting_time - now).max(Time::zero());
        self.n_paths_performed += 1;
        self.n_links_in_path = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::{Length, Speed};
    use petgraph::graph::node_index;

    fn line_network() -> RoadNetwork {
        let mut network = RoadNetwork::new();
        network.add_node("a", 0.0, 0.0).unwrap();
        network.add_node("b", 1.0, 0.0).unwrap();
        network.add_node("c", 2.0, 0.0).unwrap();
        network
            .add_link("a-b", "a", "b", Length(10.0), Speed(1.0), 10.0)
            .unwrap();
        network
            .add_link("b-c", "b", "c", Length(20.0), Speed(1.0), 10.0)
            .unwrap();
        network
    }

    #[test]
    fn new_agent_test() {
        let trips = vec![Trip::new(node_index(0), node_index(2), Time(25.0))];
        let agent = Agent::new(agent_id(7), 0, trips);
        assert_eq!(agent.id(), agent_id(7));
        assert_eq!(agent.remaining_time(), Time(25.0));
        assert!(agent.is_at_node());
        assert!(!agent.is_en_route());
        assert_eq!(agent.n_paths_performed(), 1);
        assert_eq!(agent.n_links_in_path(), 0);
    }

    #[test]
    fn decrease_remaining_time_clamps_test() {
        let mut agent = Agent::new(agent_id(1), 0, vec![]);
        agent.set_remaining_time(Time(0.5));
        agent.decrease_remaining_time(Time(1.0));
        assert_eq!(agent.remaining_time(), Time::zero());
    }

    #[test]
    fn next_link_and_remove_test() {
        let network = line_network();
        let a = network.node_index("a").unwrap();
        let c = network.node_index("c").unwrap();
        let mut agent = Agent::new(agent_id(1), 0, vec![Trip::new(a, c, Time::zero())]);
        agent.set_path(routing::a_star(&network, a, c, PathMetric::Fastest).unwrap());
        let first = agent.next_link_and_remove();
        assert_eq!(network.link(first).id(), "a-b");
        assert_eq!(agent.n_links_in_path(), 1);
        let second = agent.next_link_and_remove();
        assert_eq!(network.link(second).id(), "b-c");
        assert!(agent.path().is_empty());
    }

    #[test]
    fn set_next_trip_test() {
        let network = line_network();
        let a = network.node_index("a").unwrap();
        let b = network.node_index("b").unwrap();
        let c = network.node_index("c").unwrap();
        let trips = vec![
            Trip::new(a, b, Time::zero()),
            Trip::new(b, c, Time(100.0)),
        ];
        let mut agent = Agent::new(agent_id(1), 0, trips);
        agent.mark_departed(Time(1.0));
        agent.increase_trip_duration_theo(Time(10.0));
        agent.set_next_trip(&network, Time(40.0)).unwrap();
        // The new trip starts at 100 s, 60 s from now.
        assert_eq!(agent.remaining_time(), Time(60.0));
        assert_eq!(agent.trip_duration_theo(), Time::zero());
        assert!(!agent.is_en_route());
        assert!(agent.is_at_node());
        assert_eq!(agent.n_paths_performed(), 2);
        assert_eq!(agent.position(), network.node(b).coordinates());
        assert_eq!(agent.path().len(), 1);

        // A late agent departs immediately.
        let trips = vec![
            Trip::new(a, b, Time::zero()),
            Trip::new(b, c, Time(10.0)),
        ];
        let mut agent = Agent::new(agent_id(2), 0, trips);
        agent.set_next_trip(&network, Time(40.0)).unwrap();
        assert_eq!(agent.remaining_time(), Time::zero());
    }
}
