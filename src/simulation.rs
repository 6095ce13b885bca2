// Copyright 2024 Johan Barthelemy
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Everything related to running a simulation.
use std::thread;

use anyhow::{anyhow, Result};
use log::{debug, warn};

use crate::agent::{Agent, AgentId, AgentSeed};
use crate::comm::Comm;
use crate::engine::{PartitionEngine, PartitionSummary};
use crate::network::RoadNetwork;
use crate::parameters::Parameters;
use crate::partition::StripPartitioning;
use crate::strategy::Strategy;

/// An abstract representation of an area to be simulated.
///
/// A simulation is composed of the following items:
///
/// - A representation of the road network, where the trips take place.
/// - A population of agents performing trips.
/// - A pool of candidate rerouting strategies.
/// - A [Parameters] instance.
#[derive(Clone, Debug)]
pub struct Simulation {
    network: RoadNetwork,
    population: Vec<AgentSeed>,
    strategies: Vec<Strategy>,
    parameters: Parameters,
}

impl Simulation {
    /// Creates a new Simulation.
    pub fn new(
        network: RoadNetwork,
        population: Vec<AgentSeed>,
        strategies: Vec<Strategy>,
        parameters: Parameters,
    ) -> Self {
        Simulation {
            network,
            population,
            strategies,
            parameters,
        }
    }

    /// Returns a reference to the road network of the simulation.
    pub const fn get_network(&self) -> &RoadNetwork {
        &self.network
    }

    /// Returns a reference to the parameters of the simulation.
    pub const fn get_parameters(&self) -> &Parameters {
        &self.parameters
    }

    /// Runs the simulation to global termination.
    ///
    /// The network is tiled into strips, each agent is homed on the
    /// partition owning its first origin, and one peer thread per partition
    /// executes the step engine. Returns the merged per-partition results.
    pub fn run(self) -> Result<SimulationOutcome> {
        self.parameters.validate()?;
        let n_partitions = self.parameters.n_partitions();
        std::fs::create_dir_all(&self.parameters.output_directory)?;

        let mut network = self.network;
        network.assign_strip_coordinates(n_partitions);
        let tiling = StripPartitioning::new(n_partitions)?;

        // Home every agent on the partition owning its first origin.
        let mut per_rank: Vec<Vec<Agent>> = vec![Vec::new(); n_partitions];
        for seed in self.population {
            let Some(trip) = seed.trips.first() else {
                warn!("agent {} has no trips and is dropped", seed.id.value());
                continue;
            };
            let rank = tiling
                .node_owner(&network, trip.origin)
                .expect("synthetic coordinates always fall in a strip");
            per_rank[rank].push(Agent::new(seed.id, rank, seed.trips));
        }
        for (rank, agents) in per_rank.iter().enumerate() {
            debug!("partition {rank} starts with {} agents", agents.len());
        }

        let network = &network;
        let strategies = &self.strategies;
        let parameters = &self.parameters;
        let mut summaries = thread::scope(|scope| {
            let handles: Vec<_> = Comm::mesh(n_partitions)
                .into_iter()
                .zip(per_rank)
                .map(|(comm, agents)| {
                    scope.spawn(move || -> Result<PartitionSummary> {
                        let engine = PartitionEngine::new(
                            comm,
                            network.clone(),
                            agents,
                            strategies,
                            parameters,
                        )?;
                        engine.run()
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .map_err(|_| anyhow!("a partition thread panicked"))?
                })
                .collect::<Result<Vec<_>>>()
        })?;
        summaries.sort_by_key(|s| s.rank);
        Ok(SimulationOutcome {
            partitions: summaries,
        })
    }
}

/// Merged results of a simulation run.
#[derive(Clone, Debug)]
pub struct SimulationOutcome {
    /// Per-partition results, indexed by rank.
    pub partitions: Vec<PartitionSummary>,
}

impl SimulationOutcome {
    /// Returns the number of trips completed, over all partitions.
    pub fn total_trips_performed(&self) -> i64 {
        self.partitions.iter().map(|p| p.trips_performed).sum()
    }

    /// Returns the number of reroutings, over all partitions.
    pub fn total_reroutings(&self) -> i64 {
        self.partitions.iter().map(|p| p.reroutings).sum()
    }

    /// Returns the number of agents still in the simulation when it
    /// stopped.
    pub fn remaining_agents(&self) -> usize {
        self.partitions.iter().map(|p| p.remaining_agents).sum()
    }

    /// Returns the number of ticks executed.
    pub fn ticks(&self) -> u64 {
        self.partitions.iter().map(|p| p.ticks).max().unwrap_or(0)
    }

    /// Returns every recorded fitness value, with the rank that recorded
    /// it. An agent completing trips on several partitions appears once per
    /// partition.
    pub fn fitness(&self) -> Vec<(usize, AgentId, f64)> {
        self.partitions
            .iter()
            .flat_map(|p| p.fitness.iter().map(|&(id, f)| (p.rank, id, f)))
            .collect()
    }

    /// Returns the fitness of an agent, averaging over the partitions that
    /// recorded one.
    pub fn fitness_of(&self, agent: AgentId) -> Option<f64> {
        let values: Vec<f64> = self
            .partitions
            .iter()
            .flat_map(|p| p.fitness.iter())
            .filter(|(id, _)| *id == agent)
            .map(|&(_, f)| f)
            .collect();
        if values.is_empty() {
            None
        } else {
            Some(values.iter().sum::<f64>() / values.len() as f64)
        }
    }
}
