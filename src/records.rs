// Copyright 2024 Johan Barthelemy
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Recording and aggregation of the simulation outputs.
//!
//! Per-tick counters are reduced across partitions into `sim_out.csv`; the
//! per-link histograms, the trip starting times and the agent fitness values
//! are written at the end of the run. The link and fitness files are shared
//! between the partitions: rank 0 writes the header, then each rank appends
//! its own rows in rank order under a barrier, as many times as there are
//! partitions.
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use csv::{Writer, WriterBuilder};
use petgraph::graph::EdgeIndex;

use crate::agent::AgentId;
use crate::comm::Comm;
use crate::network::RoadNetwork;
use crate::units::Time;

/// Minutes in a simulated day; histogram bins wrap modulo this horizon.
const MINUTES_PER_DAY: u32 = 1440;

/// Per-partition sum counters, reduced across partitions at every tick.
///
/// The counters are signed: an agent can depart on one rank and arrive on
/// another, leaving a negative residue locally. Only the cross-partition sum
/// is meaningful.
#[derive(Clone, Copy, Debug, Default)]
pub struct TickCounters {
    /// Number of agents currently between departure and arrival.
    pub total_moving: i64,
    /// Number of completed trips.
    pub trips_performed: i64,
    /// Number of path recomputations triggered by strategies.
    pub reroutings: i64,
}

/// A per-link histogram over the bins of a 24-hour day.
#[derive(Clone, Debug)]
pub struct LinkHistogram {
    /// Minutes per bin.
    interval: u32,
    nb_bins: usize,
    counts: BTreeMap<EdgeIndex, Vec<u32>>,
}

impl LinkHistogram {
    /// Creates a histogram with the given recording interval, in minutes.
    pub fn new(interval: u32) -> Result<Self> {
        ensure!(
            interval > 0 && MINUTES_PER_DAY % interval == 0,
            "recording interval must be a divisor of {MINUTES_PER_DAY} minutes, got {interval}"
        );
        Ok(LinkHistogram {
            interval,
            nb_bins: (MINUTES_PER_DAY / interval) as usize,
            counts: BTreeMap::new(),
        })
    }

    /// Returns the number of bins per link.
    pub const fn nb_bins(&self) -> usize {
        self.nb_bins
    }

    /// Returns the number of watched links.
    pub fn nb_links(&self) -> usize {
        self.counts.len()
    }

    /// Starts watching a link.
    pub fn watch(&mut self, link: EdgeIndex) {
        self.counts.insert(link, vec![0; self.nb_bins]);
    }

    /// Returns the bin index of a simulation time, wrapping modulo 24 hours.
    pub fn bin_of(&self, time: Time) -> usize {
        (time.0 / (60.0 * self.interval as f64)).floor() as usize % self.nb_bins
    }

    /// Records one count for a link at the given time.
    ///
    /// Links that are not watched locally (e.g., the previous link of an
    /// agent that migrated in) are ignored.
    pub fn record(&mut self, link: EdgeIndex, time: Time) {
        let bin = self.bin_of(time);
        if let Some(bins) = self.counts.get_mut(&link) {
            bins[bin] += 1;
        }
    }

    /// Iterates over the watched links and their bins, in index order.
    pub fn iter(&self) -> impl Iterator<Item = (EdgeIndex, &[u32])> {
        self.counts.iter().map(|(&link, bins)| (link, &bins[..]))
    }
}

fn semicolon_writer(file: File) -> Writer<File> {
    WriterBuilder::new().delimiter(b';').from_writer(file)
}

fn append_writer(path: &Path) -> Result<Writer<File>> {
    let file = OpenOptions::new()
        .append(true)
        .open(path)
        .with_context(|| format!("failed to re-open output file `{path:?}`"))?;
    Ok(semicolon_writer(file))
}

fn create_with_header(path: &Path, header: &[String]) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create output file `{path:?}`"))?;
    let mut writer = semicolon_writer(file);
    writer.write_record(header)?;
    writer.flush()?;
    Ok(())
}

/// Writer of the per-tick cross-partition sums (`sim_out.csv`), held by
/// rank 0.
#[derive(Debug)]
pub struct SimOutWriter {
    writer: Writer<File>,
}

impl SimOutWriter {
    /// Creates `sim_out.csv` and writes its header.
    pub fn new(output_dir: &Path) -> Result<Self> {
        let path = output_dir.join("sim_out.csv");
        let file = File::create(&path)
            .with_context(|| format!("failed to create output file `{path:?}`"))?;
        let mut writer = semicolon_writer(file);
        writer.write_record([
            "tick",
            "total_agents",
            "total_moving_agents",
            "total_trips_performed",
            "total_reroutings",
        ])?;
        Ok(SimOutWriter { writer })
    }

    /// Appends the sums of one tick.
    pub fn record(&mut self, tick: u64, totals: [i64; 4]) -> Result<()> {
        self.writer.write_record([
            tick.to_string(),
            totals[0].to_string(),
            totals[1].to_string(),
            totals[2].to_string(),
            totals[3].to_string(),
        ])?;
        Ok(())
    }

    /// Flushes the underlying file.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Writer of the per-partition move log (`moves_proc_<rank>.csv`).
#[derive(Debug)]
pub struct MovesWriter {
    writer: Writer<File>,
}

impl MovesWriter {
    /// Creates the move log of the given rank and writes its header.
    pub fn new(output_dir: &Path, rank: usize) -> Result<Self> {
        let path = output_dir.join(format!("moves_proc_{rank}.csv"));
        let file = File::create(&path)
            .with_context(|| format!("failed to create output file `{path:?}`"))?;
        let mut writer = semicolon_writer(file);
        writer.write_record([
            "agent_id",
            "link_id",
            "time_entering_link",
            "time_on_link",
            "path_index",
            "link_index_within_path",
        ])?;
        Ok(MovesWriter { writer })
    }

    /// Appends one move record.
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &mut self,
        agent: AgentId,
        link_id: &str,
        time_entering_link: Time,
        time_on_link: Time,
        path_index: u32,
        link_index: u32,
    ) -> Result<()> {
        self.writer.write_record([
            agent.value().to_string(),
            link_id.to_owned(),
            time_entering_link.to_string(),
            time_on_link.to_string(),
            path_index.to_string(),
            link_index.to_string(),
        ])?;
        Ok(())
    }

    /// Flushes the underlying file.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

fn bin_headers(label: &str, nb_bins: usize, separator: &str) -> Vec<String> {
    std::iter::once(label.to_owned())
        .chain((0..nb_bins).map(|i| format!("t{separator}{i}")))
        .collect()
}

/// Writes the four per-link histogram files, every rank appending its own
/// rows in rank order.
pub fn write_links_state(
    comm: &mut Comm,
    output_dir: &Path,
    network: &RoadNetwork,
    flows: &LinkHistogram,
    snapshots: &LinkHistogram,
) -> Result<()> {
    let files: [(PathBuf, &LinkHistogram, bool, &str); 4] = [
        (output_dir.join("links_flows.csv"), flows, false, "_"),
        (output_dir.join("links_saturation.csv"), flows, true, "_"),
        (
            output_dir.join("links_flows_snapshot.csv"),
            snapshots,
            false,
            "",
        ),
        (
            output_dir.join("links_saturation_snapshot.csv"),
            snapshots,
            true,
            "",
        ),
    ];
    if comm.rank() == 0 {
        for (path, histogram, _, separator) in &files {
            create_with_header(path, &bin_headers("LINK", histogram.nb_bins(), separator))?;
        }
    }
    // Only one partition at a time appends to the shared files.
    for turn in 0..comm.size() {
        comm.barrier()?;
        if comm.rank() != turn {
            continue;
        }
        for (path, histogram, as_saturation, _) in &files {
            let mut writer = append_writer(path)?;
            for (link_index, bins) in histogram.iter() {
                let link = network.link(link_index);
                let mut row = Vec::with_capacity(bins.len() + 1);
                row.push(link.id().to_owned());
                for &count in bins {
                    if *as_saturation {
                        row.push((count as f64 / link.capacity()).to_string());
                    } else {
                        row.push(count.to_string());
                    }
                }
                writer.write_record(&row)?;
            }
            writer.flush()?;
        }
    }
    Ok(())
}

/// Gathers the trip starting times on rank 0, sorts them and writes
/// `starting_times.csv`.
pub fn write_starting_times(
    comm: &mut Comm,
    output_dir: &Path,
    starting_times: &[Time],
) -> Result<()> {
    let gathered = comm.gather(0, &starting_times.to_vec())?;
    if let Some(per_rank) = gathered {
        let mut all: Vec<Time> = per_rank.into_iter().flatten().collect();
        all.sort_by(|a, b| a.0.total_cmp(&b.0));
        let path = output_dir.join("starting_times.csv");
        create_with_header(&path, &["STARTING_TIME".to_owned()])?;
        let mut writer = append_writer(&path)?;
        for time in all {
            writer.write_record([time.to_string()])?;
        }
        writer.flush()?;
    }
    Ok(())
}

/// Writes `agents_fitness.csv`, every rank appending its own rows in rank
/// order.
pub fn write_agent_fitness(
    comm: &mut Comm,
    output_dir: &Path,
    fitness: &BTreeMap<AgentId, f64>,
) -> Result<()> {
    let path = output_dir.join("agents_fitness.csv");
    if comm.rank() == 0 {
        create_with_header(&path, &["AGENT_ID".to_owned(), "FITNESS".to_owned()])?;
    }
    for turn in 0..comm.size() {
        comm.barrier()?;
        if comm.rank() != turn {
            continue;
        }
        let mut writer = append_writer(&path)?;
        for (agent, value) in fitness {
            writer.write_record([agent.value().to_string(), value.to_string()])?;
        }
        writer.flush()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use petgraph::graph::edge_index;

    #[test]
    fn histogram_bins_test() {
        let mut histogram = LinkHistogram::new(15).unwrap();
        assert_eq!(histogram.nb_bins(), 96);
        assert_eq!(histogram.bin_of(Time(1.0)), 0);
        assert_eq!(histogram.bin_of(Time(899.0)), 0);
        assert_eq!(histogram.bin_of(Time(900.0)), 1);
        // Past 24 hours, the bins wrap around.
        assert_eq!(histogram.bin_of(Time(86400.0)), 0);
        assert_eq!(histogram.bin_of(Time(86400.0 + 900.0)), 1);

        histogram.watch(edge_index(0));
        histogram.record(edge_index(0), Time(1.0));
        histogram.record(edge_index(0), Time(30.0));
        histogram.record(edge_index(0), Time(901.0));
        // Unwatched links are ignored.
        histogram.record(edge_index(1), Time(1.0));
        let rows: Vec<_> = histogram.iter().collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].1[0], 2);
        assert_eq!(rows[0].1[1], 1);
    }

    #[test]
    fn invalid_interval_test() {
        assert!(LinkHistogram::new(0).is_err());
        assert!(LinkHistogram::new(7).is_err());
        assert!(LinkHistogram::new(1440).is_ok());
    }

    #[test]
    fn sim_out_writer_test() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = SimOutWriter::new(dir.path()).unwrap();
        writer.record(1, [10, 3, 0, 0]).unwrap();
        writer.record(2, [10, 4, 1, 2]).unwrap();
        writer.flush().unwrap();
        let contents = std::fs::read_to_string(dir.path().join("sim_out.csv")).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(
            lines[0],
            "tick;total_agents;total_moving_agents;total_trips_performed;total_reroutings"
        );
        assert_eq!(lines[1], "1;10;3;0;0");
        assert_eq!(lines[2], "2;10;4;1;2");
    }

    #[test]
    fn moves_writer_test() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = MovesWriter::new(dir.path(), 3).unwrap();
        writer
            .record(crate::agent::agent_id(7), "a-b", Time(5.0), Time(11.5), 1, 2)
            .unwrap();
        writer.flush().unwrap();
        let contents = std::fs::read_to_string(dir.path().join("moves_proc_3.csv")).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines[1], "7;a-b;5;11.5;1;2");
    }
}
