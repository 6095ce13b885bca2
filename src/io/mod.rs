// Copyright 2024 Johan Barthelemy
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Loading of the simulation inputs.
pub mod plans;
pub mod transims;

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use log::info;

use crate::agent::AgentSeed;
use crate::network::RoadNetwork;
use crate::parameters::{NetworkFormat, Parameters};
use crate::strategy::Strategy;
use crate::units::Time;

/// The loaded inputs of a simulation: the network, the agents to create and
/// the candidate strategies.
#[derive(Clone, Debug)]
pub struct InputData {
    /// The road network.
    pub network: RoadNetwork,
    /// The future agents, with their trip chains.
    pub population: Vec<AgentSeed>,
    /// The pool of candidate rerouting strategies.
    pub strategies: Vec<Strategy>,
}

/// Reads the network, population and strategies named by the parameters.
pub fn read_input(parameters: &Parameters) -> Result<InputData> {
    let files = &parameters.input_files;
    let (network, population) = match parameters.network_format {
        NetworkFormat::Transims => {
            let nodes = required(&files.nodes, "nodes")?;
            let activities = required(&files.activities, "activities")?;
            let links = required(&files.links, "links")?;
            let trips = required(&files.trips, "trips")?;
            let (network, activity_nodes) = transims::read_network(nodes, activities, links)?;
            let population = transims::read_trips(
                trips,
                &network,
                &activity_nodes,
                parameters.correct_start_time,
            )?;
            (network, population)
        }
        NetworkFormat::Plans => {
            let network = plans::read_network(required(&files.network, "network")?)?;
            let population = plans::read_population(required(&files.plans, "plans")?, &network)?;
            (network, population)
        }
    };
    let strategies = match &files.strategies {
        Some(path) => read_strategies(path)?,
        None => Vec::new(),
    };
    info!(
        "Loaded {} nodes, {} links, {} agents, {} strategies",
        network.nb_nodes(),
        network.nb_links(),
        population.len(),
        strategies.len()
    );
    Ok(InputData {
        network,
        population,
        strategies,
    })
}

fn required<'a>(file: &'a Option<PathBuf>, name: &str) -> Result<&'a Path> {
    file.as_deref()
        .ok_or_else(|| anyhow!("missing input file `{name}` for the selected network format"))
}

/// Reads the candidate strategies: one `alpha;theta` pair of floats per
/// line.
pub fn read_strategies(path: &Path) -> Result<Vec<Strategy>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("failed to open strategies file `{path:?}`"))?;
    let mut strategies = Vec::new();
    for record in reader.records() {
        let record = record.with_context(|| format!("malformed row in `{path:?}`"))?;
        let alpha: f64 = parse_field(&record, 0, path)?;
        let theta: f64 = parse_field(&record, 1, path)?;
        strategies.push(Strategy::new(alpha, theta));
    }
    Ok(strategies)
}

/// Parses a `hh:mm:ss` string into seconds since midnight.
pub fn time_to_sec(value: &str) -> Result<Time> {
    let mut parts = value.split(':');
    let mut seconds = 0.0;
    for _ in 0..3 {
        let part = parts
            .next()
            .ok_or_else(|| anyhow!("invalid time string `{value}`"))?;
        let part: f64 = part
            .trim()
            .parse()
            .with_context(|| format!("invalid time string `{value}`"))?;
        seconds = seconds * 60.0 + part;
    }
    Ok(Time(seconds))
}

/// Returns the field at the given position of a record, parsed, naming the
/// offending file on failure.
pub(crate) fn parse_field<T>(record: &csv::StringRecord, index: usize, path: &Path) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let field = record
        .get(index)
        .ok_or_else(|| anyhow!("missing column {index} in `{path:?}`"))?;
    field
        .trim()
        .parse()
        .with_context(|| format!("unparseable column {index} (`{field}`) in `{path:?}`"))
}

pub(crate) fn raw_field<'a>(
    record: &'a csv::StringRecord,
    index: usize,
    path: &Path,
) -> Result<&'a str> {
    record
        .get(index)
        .map(str::trim)
        .ok_or_else(|| anyhow!("missing column {index} in `{path:?}`"))
}
