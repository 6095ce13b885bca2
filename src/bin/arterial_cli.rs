// Copyright 2024 Johan Barthelemy
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Command-line entry point of the simulator.
use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use clap::Parser;

/// Distributed agent-based traffic-assignment simulator.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Cli {
    /// Simulation parameters (JSON)
    config: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let started = Instant::now();
    let outcome = arterial::run_simulation(&cli.config)?;
    println!(
        "{} partition(s), {} ticks, {} trips performed, {} reroutings in {:.1?}",
        outcome.partitions.len(),
        outcome.ticks(),
        outcome.total_trips_performed(),
        outcome.total_reroutings(),
        started.elapsed()
    );
    Ok(())
}
