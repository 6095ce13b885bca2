// Copyright 2024 Johan Barthelemy
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Configuration of a simulation run.
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use serde_derive::{Deserialize, Serialize};

use crate::units::Time;

/// Input format of the network and trip files.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkFormat {
    /// Tab-separated node / link / activity tables and a comma-separated
    /// trips table.
    Transims,
    /// Structured network and activity-plan documents.
    Plans,
}

/// Paths of the input files; which ones are required depends on the
/// [NetworkFormat].
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct InputFiles {
    /// Nodes table (transims format).
    #[serde(default)]
    pub nodes: Option<PathBuf>,
    /// Links table (transims format).
    #[serde(default)]
    pub links: Option<PathBuf>,
    /// Activity-location to node map (transims format).
    #[serde(default)]
    pub activities: Option<PathBuf>,
    /// Trips table (transims format).
    #[serde(default)]
    pub trips: Option<PathBuf>,
    /// Network document (plans format).
    #[serde(default)]
    pub network: Option<PathBuf>,
    /// Activity-plans document (plans format).
    #[serde(default)]
    pub plans: Option<PathBuf>,
    /// Candidate rerouting strategies.
    #[serde(default)]
    pub strategies: Option<PathBuf>,
}

/// Set of parameters of a simulation run.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Parameters {
    /// Tolerance on the remaining time before an event fires, in seconds.
    pub time_tolerance: Time,
    /// Partition grid along the x axis.
    pub proc_x: usize,
    /// Partition grid along the y axis.
    pub proc_y: usize,
    /// Format of the input files.
    pub network_format: NetworkFormat,
    /// Clamp the starting time of a trip to the end time of the previous
    /// one.
    #[serde(default)]
    pub correct_start_time: bool,
    /// Probability for an agent to receive an active strategy.
    pub prop_strategic_agents: f64,
    /// Minutes per bin of the coarse per-link histograms.
    pub record_interval_aggregate: u32,
    /// Minutes per bin of the fine per-link histograms.
    pub record_interval_snapshot: u32,
    /// Paths to the input files.
    pub input_files: InputFiles,
    /// Directory receiving all the outputs.
    pub output_directory: PathBuf,
    /// Seed of the random draws; each rank derives its own generator from
    /// it.
    #[serde(default)]
    pub random_seed: Option<u64>,
}

impl Parameters {
    /// Reads the parameters from a JSON file.
    pub fn from_json(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open parameters file `{path:?}`"))?;
        let parameters: Parameters = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("failed to parse parameters file `{path:?}`"))?;
        parameters.validate()?;
        Ok(parameters)
    }

    /// Returns the number of partitions of the run.
    pub fn n_partitions(&self) -> usize {
        self.proc_x * self.proc_y
    }

    /// Checks the coherence of the parameters.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.n_partitions() > 0,
            "the partition grid must have at least one cell"
        );
        ensure!(
            self.time_tolerance >= Time(0.0),
            "the time tolerance cannot be negative"
        );
        ensure!(
            (0.0..=1.0).contains(&self.prop_strategic_agents),
            "the proportion of strategic agents must be a probability"
        );
        Ok(())
    }
}
