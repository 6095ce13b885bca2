// Copyright 2024 Johan Barthelemy
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Library for Arterial: a distributed, agent-based dynamic
//! traffic-assignment simulator.
//!
//! Travellers pursue chained trips over a directed road network; each tick
//! advances simulation time by one second, moves the agents link by link
//! under congestion-dependent travel times and lets strategic agents reroute
//! around saturated links. The network is tiled into partitions that run as
//! SPMD peers, migrate agents by message passing and aggregate their outputs
//! at the end of the run.
pub mod agent;
pub mod comm;
pub mod engine;
pub mod exchange;
pub mod io;
pub mod logging;
pub mod network;
pub mod parameters;
pub mod partition;
pub mod records;
pub mod routing;
pub mod simulation;
pub mod strategy;
pub mod units;

use std::path::Path;

use anyhow::{Context, Result};
use log::info;

use parameters::Parameters;
// Re-exports.
pub use simulation::{Simulation, SimulationOutcome};

// Dependencies only used in the bins.
use clap as _;

/// Reads a simulation from a parameters file, runs it and stores the
/// results in the configured output directory.
///
/// This function takes as argument the path to the `parameters.json` file.
pub fn run_simulation(path: &Path) -> Result<SimulationOutcome> {
    let parameters = Parameters::from_json(path)?;

    // Create the output directory if it does not exist yet.
    std::fs::create_dir_all(&parameters.output_directory).with_context(|| {
        format!(
            "failed to create output directory `{:?}`",
            parameters.output_directory
        )
    })?;

    logging::initialize_logging(&parameters.output_directory)?;

    let input = io::read_input(&parameters)?;
    let simulation = Simulation::new(
        input.network,
        input.population,
        input.strategies,
        parameters,
    );
    let outcome = simulation.run()?;
    info!(
        "End of simulation: {} trips performed, {} reroutings, {} ticks",
        outcome.total_trips_performed(),
        outcome.total_reroutings(),
        outcome.ticks()
    );
    Ok(outcome)
}
