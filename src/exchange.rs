// Copyright 2024 Johan Barthelemy
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Packaging of agent state for cross-partition transfer.
//!
//! A package carries every mutable field of an [Agent] plus both partition
//! identifiers. The round trip through [AgentPackage::from_agent] and
//! [AgentPackage::into_agent] preserves the state field by field; the graph
//! indices travel as raw values because every rank loads the same input in
//! the same order and therefore agrees on them.
use petgraph::graph::{edge_index, node_index};
use serde_derive::{Deserialize, Serialize};

use crate::agent::{Agent, AgentId, Trip};
use crate::strategy::Strategy;
use crate::units::Time;

/// Bit-faithful, serializable snapshot of an agent.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct AgentPackage {
    id: AgentId,
    home_rank: u32,
    current_rank: u32,
    /// Remaining trips, as `(origin, destination, starting_time)`.
    trips: Vec<(u32, u32, Time)>,
    x: f64,
    y: f64,
    remaining_time: Time,
    strategy: Strategy,
    /// Remaining path, next hop at the end.
    path: Vec<u32>,
    en_route: bool,
    at_node: bool,
    cur_link: Option<u32>,
    size: u32,
    trip_duration_theo: Time,
    trip_start_time: Time,
    n_paths_performed: u32,
    n_links_in_path: u32,
}

impl AgentPackage {
    /// Packages the full state of an agent.
    pub fn from_agent(agent: &Agent) -> Self {
        AgentPackage {
            id: agent.id(),
            home_rank: agent.home_rank() as u32,
            current_rank: agent.current_rank() as u32,
            trips: agent
                .trips()
                .iter()
                .map(|t| {
                    (
                        t.origin.index() as u32,
                        t.destination.index() as u32,
                        t.starting_time,
                    )
                })
                .collect(),
            x: agent.position().0,
            y: agent.position().1,
            remaining_time: agent.remaining_time(),
            strategy: *agent.strategy(),
            path: agent.path().iter().map(|l| l.index() as u32).collect(),
            en_route: agent.is_en_route(),
            at_node: agent.is_at_node(),
            cur_link: agent.cur_link().map(|l| l.index() as u32),
            size: agent.size(),
            trip_duration_theo: agent.trip_duration_theo(),
            trip_start_time: agent.trip_start_time(),
            n_paths_performed: agent.n_paths_performed(),
            n_links_in_path: agent.n_links_in_path(),
        }
    }

    /// Returns the identifier of the packaged agent.
    pub fn id(&self) -> AgentId {
        self.id
    }

    /// Reconstructs the agent on the receiving partition.
    pub fn into_agent(self, receiving_rank: usize) -> Agent {
        let trips = self
            .trips
            .into_iter()
            .map(|(origin, destination, starting_time)| {
                Trip::new(
                    node_index(origin as usize),
                    node_index(destination as usize),
                    starting_time,
                )
            })
            .collect();
        let mut agent = Agent::from_state(
            self.id,
            self.home_rank as usize,
            self.current_rank as usize,
            trips,
            self.x,
            self.y,
            self.remaining_time,
            self.strategy,
            self.path
                .into_iter()
                .map(|l| edge_index(l as usize))
                .collect(),
            self.en_route,
            self.at_node,
            self.cur_link.map(|l| edge_index(l as usize)),
            self.size,
            self.trip_duration_theo,
            self.trip_start_time,
            self.n_paths_performed,
            self.n_links_in_path,
        );
        agent.set_current_rank(receiving_rank);
        agent
    }
}
