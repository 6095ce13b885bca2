// Copyright 2024 Johan Barthelemy
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Loading of the structured network and activity-plan documents (format B).
//!
//! The network document nests `nodes` (id, x, y) and `links` (id, start,
//! end, length, free-flow speed, capacity); the plans document holds one
//! activity chain per person, each activity carrying an `end_time`
//! (`hh:mm:ss`) and a `node_id`. Consecutive activities produce trips and a
//! final trip back to the first activity's node is appended.
use std::collections::hash_map::DefaultHasher;
use std::fs::File;
use std::hash::{Hash, Hasher};
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result};
use log::{info, warn};
use serde_derive::Deserialize;

use super::time_to_sec;
use crate::agent::{agent_id, AgentSeed, Trip};
use crate::network::RoadNetwork;
use crate::units::{Length, Speed};

#[derive(Debug, Deserialize)]
struct NetworkDoc {
    nodes: Vec<NodeDoc>,
    links: Vec<LinkDoc>,
}

#[derive(Debug, Deserialize)]
struct NodeDoc {
    id: String,
    x: f64,
    y: f64,
}

#[derive(Debug, Deserialize)]
struct LinkDoc {
    id: String,
    start: String,
    end: String,
    length: f64,
    free_flow_speed: f64,
    capacity: f64,
}

#[derive(Debug, Deserialize)]
struct PlansDoc {
    persons: Vec<PersonDoc>,
}

#[derive(Debug, Deserialize)]
struct PersonDoc {
    id: String,
    activities: Vec<ActivityDoc>,
}

#[derive(Debug, Deserialize)]
struct ActivityDoc {
    end_time: String,
    node_id: String,
}

/// Reads the network document.
pub fn read_network(path: &Path) -> Result<RoadNetwork> {
    let file =
        File::open(path).with_context(|| format!("failed to open network file `{path:?}`"))?;
    let doc: NetworkDoc = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("failed to parse network file `{path:?}`"))?;
    let mut network = RoadNetwork::new();
    for node in &doc.nodes {
        network.add_node(&node.id, node.x, node.y)?;
    }
    for link in &doc.links {
        network.add_link(
            &link.id,
            &link.start,
            &link.end,
            Length(link.length),
            Speed(link.free_flow_speed),
            link.capacity,
        )?;
    }
    Ok(network)
}

/// Reads the plans document and turns each activity chain into an agent.
///
/// An agent whose chain references an unknown node, or whose consecutive
/// activities sit on the same node, is dropped with a warning.
pub fn read_population(path: &Path, network: &RoadNetwork) -> Result<Vec<AgentSeed>> {
    let file = File::open(path).with_context(|| format!("failed to open plans file `{path:?}`"))?;
    let doc: PlansDoc = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("failed to parse plans file `{path:?}`"))?;
    let mut population = Vec::new();
    let mut nb_trips: u64 = 0;
    'persons: for person in &doc.persons {
        if person.activities.len() < 2 {
            warn!("dropping agent `{}`: fewer than two activities", person.id);
            continue;
        }
        let drop_agent = |reason: &str| {
            warn!("dropping agent `{}`: {reason}", person.id);
        };

        let home_act = &person.activities[0];
        let Some(home) = network.node_index(&home_act.node_id) else {
            drop_agent("unknown node");
            continue;
        };
        let mut previous_end_time = time_to_sec(&home_act.end_time)?;
        let mut start_node = home;
        let mut trips = Vec::new();

        // All activities but the last one are intermediate destinations; the
        // chain closes with a trip back to the first activity's node.
        for activity in &person.activities[1..person.activities.len() - 1] {
            let Some(destination) = network.node_index(&activity.node_id) else {
                drop_agent("unknown node");
                continue 'persons;
            };
            if start_node == destination {
                drop_agent("two consecutive activities on the same node");
                continue 'persons;
            }
            trips.push(Trip::new(start_node, destination, previous_end_time));
            previous_end_time = time_to_sec(&activity.end_time)?;
            start_node = destination;
        }
        if start_node == home {
            drop_agent("the chain returns home without moving");
            continue;
        }
        trips.push(Trip::new(start_node, home, previous_end_time));

        nb_trips += trips.len() as u64;
        population.push(AgentSeed {
            id: agent_id(hash_person_id(&person.id)),
            trips,
        });
    }
    info!("Read {nb_trips} trips for {} agents", population.len());
    Ok(population)
}

fn hash_person_id(id: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    id.hash(&mut hasher);
    hasher.finish()
}
