// Copyright 2024 Johan Barthelemy
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Loading of the node / link / activity / trip tables (format A).
//!
//! The nodes, activity-locations and links files are tab-separated with a
//! header row; the trips file is comma-separated. Column positions follow
//! the upstream table layouts.
use std::path::Path;

use anyhow::{Context, Result};
use csv::ReaderBuilder;
use hashbrown::HashMap;
use log::{info, warn};
use petgraph::graph::NodeIndex;

use super::{parse_field, raw_field};
use crate::agent::{agent_id, AgentSeed, Trip};
use crate::network::RoadNetwork;
use crate::units::{Length, Speed, Time};

/// Trip modes admitted to the simulation: car drivers and taxis.
const MODE_CAR_DRIVER: i64 = 2;
const MODE_TAXI: i64 = 9;

/// Link type excluded from the road network.
const TYPE_WALK: &str = "WALK";

/// Map from activity-location ids to node ids.
pub type ActivityNodes = HashMap<String, String>;

fn tsv_reader(path: &Path) -> Result<csv::Reader<std::fs::File>> {
    ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("failed to open input file `{path:?}`"))
}

/// Reads the nodes, activity-locations and links tables and builds the road
/// network. Two-way links synthesize a reverse link with a `-` prefixed id.
pub fn read_network(
    nodes: &Path,
    activities: &Path,
    links: &Path,
) -> Result<(RoadNetwork, ActivityNodes)> {
    let mut network = RoadNetwork::new();

    // Nodes: id, x, y.
    let mut reader = tsv_reader(nodes)?;
    for record in reader.records() {
        let record = record.with_context(|| format!("malformed row in `{nodes:?}`"))?;
        let id = raw_field(&record, 0, nodes)?;
        let x: f64 = parse_field(&record, 1, nodes)?;
        let y: f64 = parse_field(&record, 2, nodes)?;
        network.add_node(id, x, y)?;
    }

    // Activity locations: location id, ..., node id.
    let mut activity_nodes = ActivityNodes::new();
    let mut reader = tsv_reader(activities)?;
    for record in reader.records() {
        let record = record.with_context(|| format!("malformed row in `{activities:?}`"))?;
        let location = raw_field(&record, 0, activities)?;
        let node = raw_field(&record, 2, activities)?;
        activity_nodes.insert(location.to_owned(), node.to_owned());
    }

    // Links: id, _, start, end, length, ..., free-flow speed, capacity,
    // return lanes, _, return free-flow speed, return capacity, type.
    let mut reader = tsv_reader(links)?;
    for record in reader.records() {
        let record = record.with_context(|| format!("malformed row in `{links:?}`"))?;
        let link_type = raw_field(&record, 21, links)?;
        if link_type == TYPE_WALK {
            continue;
        }
        let id = raw_field(&record, 0, links)?;
        let start = raw_field(&record, 2, links)?.to_owned();
        let end = raw_field(&record, 3, links)?.to_owned();
        let length = Length(parse_field(&record, 4, links)?);
        let free_flow_speed = Speed(parse_field(&record, 15, links)?);
        let capacity: f64 = parse_field(&record, 16, links)?;
        network.add_link(id, &start, &end, length, free_flow_speed, capacity)?;

        // Two-way links get a reverse twin with its own speed and capacity.
        let return_lanes: u32 = parse_field(&record, 17, links)?;
        if return_lanes > 0 {
            let return_speed = Speed(parse_field(&record, 19, links)?);
            let return_capacity: f64 = parse_field(&record, 20, links)?;
            network.add_link(
                &format!("-{id}"),
                &end,
                &start,
                length,
                return_speed,
                return_capacity,
            )?;
        }
    }

    Ok((network, activity_nodes))
}

/// One agent being accumulated while the trips table is scanned.
struct PendingAgent {
    household: i64,
    person: i64,
    trips: Vec<Trip>,
    /// Dropped after a reference to an unknown location or node.
    valid: bool,
    previous_end_time: Time,
}

impl PendingAgent {
    fn new(household: i64, person: i64) -> Self {
        PendingAgent {
            household,
            person,
            trips: Vec::new(),
            valid: true,
            previous_end_time: Time(0.0),
        }
    }

    fn flush(self, population: &mut Vec<AgentSeed>) {
        if !self.valid {
            warn!(
                "dropping agent {}-{}: trip references an unknown location or node",
                self.household, self.person
            );
            return;
        }
        if self.trips.is_empty() {
            return;
        }
        population.push(AgentSeed {
            id: agent_id((self.household * 100 + self.person) as u64),
            trips: self.trips,
        });
    }
}

/// Reads the trips table and groups consecutive rows of the same
/// (household, person) pair into one agent.
///
/// A row becomes a trip when the mapped origin and destination differ and
/// the mode is an admitted one. With `correct_start_time`, a starting time
/// earlier than the previous trip's end time is clamped to it.
pub fn read_trips(
    path: &Path,
    network: &RoadNetwork,
    activity_nodes: &ActivityNodes,
    correct_start_time: bool,
) -> Result<Vec<AgentSeed>> {
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("failed to open input file `{path:?}`"))?;
    let mut population = Vec::new();
    let mut pending: Option<PendingAgent> = None;
    let mut nb_trips: u64 = 0;
    for record in reader.records() {
        let record = record.with_context(|| format!("malformed row in `{path:?}`"))?;
        let household: i64 = parse_field(&record, 0, path)?;
        let person: i64 = parse_field(&record, 1, path)?;
        let mode: i64 = parse_field(&record, 4, path)?;
        let mut starting_time = Time(parse_field(&record, 6, path)?);
        let origin = raw_field(&record, 7, path)?;
        let end_time = Time(parse_field(&record, 8, path)?);
        let destination = raw_field(&record, 9, path)?;

        let same_agent = pending
            .as_ref()
            .is_some_and(|p| p.household == household && p.person == person);
        if !same_agent {
            if let Some(done) = pending.take() {
                done.flush(&mut population);
            }
            pending = Some(PendingAgent::new(household, person));
        }
        let agent = pending.as_mut().expect("pending agent just created");

        if correct_start_time && starting_time < agent.previous_end_time {
            starting_time = agent.previous_end_time;
        }
        agent.previous_end_time = end_time;

        // Resolve the activity locations into network nodes.
        let endpoints = resolve(origin, network, activity_nodes)
            .zip(resolve(destination, network, activity_nodes));
        let Some((origin, destination)) = endpoints else {
            agent.valid = false;
            continue;
        };

        // The agent must actually move, by car or taxi.
        if origin != destination && (mode == MODE_CAR_DRIVER || mode == MODE_TAXI) {
            agent.trips.push(Trip::new(origin, destination, starting_time));
            nb_trips += 1;
        }
    }
    if let Some(done) = pending.take() {
        done.flush(&mut population);
    }
    info!("Read {nb_trips} trips for {} agents", population.len());
    Ok(population)
}

fn resolve(
    location: &str,
    network: &RoadNetwork,
    activity_nodes: &ActivityNodes,
) -> Option<NodeIndex> {
    activity_nodes
        .get(location)
        .and_then(|node| network.node_index(node))
}
