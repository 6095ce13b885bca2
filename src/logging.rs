// Copyright 2024 Johan Barthelemy
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Logging of a simulation run.
use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use log::LevelFilter;
use simplelog::{
    ColorChoice, CombinedLogger, Config, ConfigBuilder, TermLogger, TerminalMode, WriteLogger,
};

/// Initializes logging for a simulation run.
///
/// Run progress goes to the terminal at `info` level. The `log.txt` file in
/// the output directory additionally keeps the `debug` narration of the
/// partition engines; since the partitions run as peer threads, the file
/// records are tagged with the emitting thread so their lines can be told
/// apart.
pub fn initialize_logging(output: &Path) -> Result<()> {
    let log_path = output.join("log.txt");
    let log_file = File::create(&log_path)
        .with_context(|| format!("failed to create log file `{log_path:?}`"))?;
    let file_config = ConfigBuilder::new()
        .set_thread_level(LevelFilter::Trace)
        .build();
    CombinedLogger::init(vec![
        TermLogger::new(
            LevelFilter::Info,
            Config::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ),
        WriteLogger::new(LevelFilter::Debug, file_config, log_file),
    ])
    .context("failed to initialize logging")
}
