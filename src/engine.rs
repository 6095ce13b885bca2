// Copyright 2024 Johan Barthelemy
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! The per-partition step engine.
//!
//! Each partition runs one [PartitionEngine] to completion on its own thread.
//! A tick advances simulation time by one second, moves the local agents
//! through their state machine (waiting at a node, travelling on a link,
//! arriving), commits occupancy changes to the local network replica and
//! records the per-move outputs. At the end of the tick the flagged agents
//! are exchanged with the other partitions and the tick counters are
//! reduced; every 100 ticks the partitions agree on whether any agent is
//! left.
use std::collections::BTreeMap;

use anyhow::{Context, Result};
use hashbrown::HashMap;
use log::{debug, info, warn};
use num_traits::Zero;
use petgraph::graph::NodeIndex;
use rand::{Rng, SeedableRng};
use rand_xorshift::XorShiftRng;

use crate::agent::{Agent, AgentId};
use crate::comm::Comm;
use crate::exchange::AgentPackage;
use crate::network::RoadNetwork;
use crate::parameters::Parameters;
use crate::partition::{NodeRankMap, StripPartitioning};
use crate::records::{LinkHistogram, MovesWriter, SimOutWriter, TickCounters};
use crate::routing::{self, Path, PathMetric};
use crate::strategy::Strategy;
use crate::units::Time;

/// Duration of one tick, in seconds.
const TICK: Time = Time(1.0);

/// Number of ticks between two global termination checks.
const STOP_CHECK_PERIOD: u64 = 100;

/// Results of one partition, returned to the driver when the simulation
/// stops.
#[derive(Clone, Debug)]
pub struct PartitionSummary {
    /// Rank of the partition.
    pub rank: usize,
    /// Number of ticks executed.
    pub ticks: u64,
    /// Trips completed on this partition.
    pub trips_performed: i64,
    /// Reroutings triggered on this partition.
    pub reroutings: i64,
    /// Agents received from other partitions.
    pub migrations_in: u64,
    /// Agents sent to other partitions.
    pub migrations_out: u64,
    /// Agents still owned when the simulation stopped.
    pub remaining_agents: usize,
    /// Final fitness values recorded on this partition.
    pub fitness: Vec<(AgentId, f64)>,
}

/// The step engine of one partition.
pub struct PartitionEngine {
    comm: Comm,
    network: RoadNetwork,
    node_ranks: NodeRankMap,
    /// Local agents; the ordered map gives a stable visiting order.
    agents: BTreeMap<AgentId, Agent>,
    time: Time,
    time_tolerance: Time,
    counters: TickCounters,
    flows: LinkHistogram,
    snapshots: LinkHistogram,
    snapshot_period_secs: u64,
    trips_starting: Vec<Time>,
    fitness: BTreeMap<AgentId, f64>,
    /// Agents flagged for migration this tick, with their destination rank.
    to_migrate: HashMap<AgentId, usize>,
    moves: MovesWriter,
    sim_out: Option<SimOutWriter>,
    output_directory: std::path::PathBuf,
    migrations_in: u64,
    migrations_out: u64,
}

impl PartitionEngine {
    /// Initializes the engine of one partition: builds the global
    /// node-to-rank map, draws the agent strategies, computes the initial
    /// paths and positions, and opens the output writers.
    pub fn new(
        mut comm: Comm,
        network: RoadNetwork,
        agents: Vec<Agent>,
        strategies: &[Strategy],
        parameters: &Parameters,
    ) -> Result<Self> {
        let rank = comm.rank();
        let tiling = StripPartitioning::new(comm.size())?;
        let node_ranks = build_node_rank_map(&mut comm, &network, &tiling)?;
        debug!(
            "partition {rank} owns {} nodes",
            tiling.local_nodes(&network, rank).len()
        );

        let mut agents: BTreeMap<AgentId, Agent> =
            agents.into_iter().map(|a| (a.id(), a)).collect();

        // Bernoulli draw of the strategic agents, from the per-rank seeded
        // generator.
        let seed = parameters.random_seed.unwrap_or(0);
        let mut rng = XorShiftRng::seed_from_u64(seed + rank as u64);
        let mut nb_strategic: u64 = 0;
        if !strategies.is_empty() {
            for agent in agents.values_mut() {
                if rng.gen::<f64>() < parameters.prop_strategic_agents {
                    agent.set_strategy(strategies[rng.gen_range(0..strategies.len())]);
                    nb_strategic += 1;
                }
            }
        }
        let total_strategic: u64 = comm.all_gather(&nb_strategic)?.iter().sum();
        if rank == 0 {
            info!("Strategic agents in the simulation: {total_strategic}");
        }

        // Initial positions and paths, memoised per origin-destination pair.
        let mut path_cache: HashMap<(NodeIndex, NodeIndex), Path> = HashMap::new();
        for agent in agents.values_mut() {
            let trip = *agent.current_trip().expect("agent without a trip");
            let (x, y) = network.node(trip.origin).coordinates();
            agent.set_position(x, y);
            let path = match path_cache.get(&(trip.origin, trip.destination)) {
                Some(path) => path.clone(),
                None => {
                    let path =
                        routing::a_star(&network, trip.origin, trip.destination, PathMetric::Fastest)
                            .with_context(|| {
                                format!("failed to compute initial path of agent {}", agent.id().value())
                            })?;
                    path_cache.insert((trip.origin, trip.destination), path.clone());
                    path
                }
            };
            agent.set_path(path);
        }
        debug!(
            "partition {rank} initialized {} agents ({} distinct initial paths)",
            agents.len(),
            path_cache.len()
        );

        // Watch the links whose start node is local.
        let mut flows = LinkHistogram::new(parameters.record_interval_aggregate)?;
        let mut snapshots = LinkHistogram::new(parameters.record_interval_snapshot)?;
        for link in network.link_indices() {
            if node_ranks.get(&network.link_source(link)) == Some(&rank) {
                flows.watch(link);
                snapshots.watch(link);
            }
        }
        debug!("partition {rank} watches {} links", flows.nb_links());
        if rank == 0 {
            info!(
                "Number of records: aggregate: {} - snapshots: {}",
                flows.nb_bins(),
                snapshots.nb_bins()
            );
        }

        let moves = MovesWriter::new(&parameters.output_directory, rank)?;
        let sim_out = if rank == 0 {
            Some(SimOutWriter::new(&parameters.output_directory)?)
        } else {
            None
        };

        Ok(PartitionEngine {
            comm,
            network,
            node_ranks,
            agents,
            time: Time::zero(),
            time_tolerance: parameters.time_tolerance,
            counters: TickCounters::default(),
            flows,
            snapshots,
            snapshot_period_secs: parameters.record_interval_snapshot as u64 * 60,
            trips_starting: Vec::new(),
            fitness: BTreeMap::new(),
            to_migrate: HashMap::new(),
            moves,
            sim_out,
            output_directory: parameters.output_directory.clone(),
            migrations_in: 0,
            migrations_out: 0,
        })
    }

    /// Returns the current simulation time.
    pub const fn time(&self) -> Time {
        self.time
    }

    /// Runs the partition to global termination and writes the end-of-run
    /// outputs.
    pub fn run(mut self) -> Result<PartitionSummary> {
        let mut tick: u64 = 0;
        loop {
            tick += 1;
            self.step()?;
            self.record_tick(tick)?;
            self.migrate()?;
            if tick % STOP_CHECK_PERIOD == 0 && self.check_stop()? {
                break;
            }
        }
        self.moves.flush()?;
        if let Some(sim_out) = self.sim_out.as_mut() {
            sim_out.flush()?;
        }
        crate::records::write_links_state(
            &mut self.comm,
            &self.output_directory,
            &self.network,
            &self.flows,
            &self.snapshots,
        )?;
        crate::records::write_starting_times(
            &mut self.comm,
            &self.output_directory,
            &self.trips_starting,
        )?;
        crate::records::write_agent_fitness(&mut self.comm, &self.output_directory, &self.fitness)?;
        Ok(PartitionSummary {
            rank: self.comm.rank(),
            ticks: tick,
            trips_performed: self.counters.trips_performed,
            reroutings: self.counters.reroutings,
            migrations_in: self.migrations_in,
            migrations_out: self.migrations_out,
            remaining_agents: self.agents.len(),
            fitness: self.fitness.into_iter().collect(),
        })
    }

    /// Executes one tick of the traffic dynamic on the local agents.
    fn step(&mut self) -> Result<()> {
        self.time += TICK;
        self.to_migrate.clear();
        let ids: Vec<AgentId> = self.agents.keys().copied().collect();
        for id in ids {
            let mut agent = self.agents.remove(&id).expect("missing local agent");
            agent.decrease_remaining_time(TICK);
            let mut done = false;
            if agent.remaining_time() <= self.time_tolerance {
                if agent.is_at_node() {
                    self.enter_next_link(&mut agent)?;
                } else {
                    done = self.reach_end_of_link(&mut agent)?;
                }
            }
            if !done {
                self.agents.insert(id, agent);
            }
        }
        self.record_snapshot();
        Ok(())
    }

    /// An agent waiting at a node moves onto its next link, possibly
    /// rerouting first.
    fn enter_next_link(&mut self, agent: &mut Agent) -> Result<()> {
        if !agent.is_en_route() {
            // The agent starts a new trip.
            agent.mark_departed(self.time);
            self.counters.total_moving += 1;
            self.trips_starting.push(self.time);
        }
        agent.set_at_node(false);
        let mut next_link = agent.next_link_and_remove();
        agent.set_cur_link(next_link);

        // The strategy may abandon the planned link for a path that avoids
        // it, when the current node offers an alternative.
        if agent.strategy().is_active() && agent.is_rerouting(&self.network, self.time) {
            let cur_node = self.network.link_source(next_link);
            if self.network.node(cur_node).links_out().len() > 1 {
                let destination = agent
                    .current_trip()
                    .expect("rerouting agent without a trip")
                    .destination;
                let new_path = routing::path_avoiding(
                    &mut self.network,
                    cur_node,
                    destination,
                    next_link,
                    PathMetric::Fastest,
                )
                .with_context(|| {
                    format!("failed to reroute agent {}", agent.id().value())
                })?;
                agent.set_path(new_path);
                next_link = agent.next_link_and_remove();
                agent.set_cur_link(next_link);
                self.counters.reroutings += 1;
            }
        }

        agent.increase_trip_duration_theo(self.network.link(next_link).free_flow_time());
        // The entrant contributes to the congestion it experiences.
        self.network.increment_occupancy(next_link);
        agent.set_remaining_time(self.network.link(next_link).time_on_link());
        self.flows.record(next_link, self.time);
        self.moves.record(
            agent.id(),
            self.network.link(next_link).id(),
            self.time,
            agent.remaining_time(),
            agent.n_paths_performed(),
            agent.n_links_in_path(),
        )?;
        Ok(())
    }

    /// An agent reaches the end of its current link: either it stops at the
    /// intermediate node (possibly on another partition), or it has arrived.
    ///
    /// Returns `true` if the agent left the simulation.
    fn reach_end_of_link(&mut self, agent: &mut Agent) -> Result<bool> {
        let cur_link = agent.cur_link().expect("travelling agent without a link");
        self.network.decrement_occupancy(cur_link);
        if !agent.path().is_empty() {
            let node = self.network.link_target(cur_link);
            let (x, y) = self.network.node(node).coordinates();
            agent.set_position(x, y);
            agent.set_at_node(true);
            self.flag_if_remote(agent, node);
            return Ok(false);
        }

        // End of the current trip.
        let fitness = agent.trip_duration_theo() / (self.time - agent.trip_start_time());
        self.fitness
            .entry(agent.id())
            .and_modify(|f| *f = (*f + fitness) / 2.0)
            .or_insert(fitness);
        self.counters.trips_performed += 1;
        self.counters.total_moving -= 1;

        if agent.has_further_trips() {
            agent
                .set_next_trip(&self.network, self.time)
                .with_context(|| {
                    format!("failed to start next trip of agent {}", agent.id().value())
                })?;
            let origin = agent.current_trip().expect("missing next trip").origin;
            self.flag_if_remote(agent, origin);
            Ok(false)
        } else {
            // Final destination: the agent leaves the simulation.
            Ok(true)
        }
    }

    /// Flags the agent for migration when the given node is owned by another
    /// partition.
    fn flag_if_remote(&mut self, agent: &Agent, node: NodeIndex) {
        let owner = self.node_ranks[&node];
        if owner != self.comm.rank() {
            self.to_migrate.insert(agent.id(), owner);
        }
    }

    /// Samples the occupancy of the local links on snapshot ticks.
    fn record_snapshot(&mut self) {
        if (self.time.0.floor() as u64) % self.snapshot_period_secs != 0 {
            return;
        }
        for agent in self.agents.values() {
            if agent.is_en_route() {
                if let Some(link) = agent.cur_link() {
                    self.snapshots.record(link, self.time);
                }
            }
        }
    }

    /// Reduces the tick counters across partitions; rank 0 appends the sums
    /// to `sim_out.csv`.
    fn record_tick(&mut self, tick: u64) -> Result<()> {
        let local = [
            self.agents.len() as i64,
            self.counters.total_moving,
            self.counters.trips_performed,
            self.counters.reroutings,
        ];
        let all: Vec<[i64; 4]> = self.comm.all_gather(&local)?;
        if let Some(sim_out) = self.sim_out.as_mut() {
            let mut totals = [0i64; 4];
            for row in &all {
                for (t, v) in totals.iter_mut().zip(row.iter()) {
                    *t += v;
                }
            }
            sim_out.record(tick, totals)?;
        }
        Ok(())
    }

    /// Sends the flagged agents to their destination partitions and installs
    /// the agents received in exchange.
    fn migrate(&mut self) -> Result<()> {
        let mut outboxes: Vec<Vec<AgentPackage>> = vec![Vec::new(); self.comm.size()];
        for (id, dest) in std::mem::take(&mut self.to_migrate) {
            let agent = self.agents.remove(&id).expect("flagged agent disappeared");
            outboxes[dest].push(AgentPackage::from_agent(&agent));
            self.migrations_out += 1;
        }
        let incoming = self.comm.exchange(outboxes)?;
        for package in incoming {
            self.migrations_in += 1;
            let agent = package.into_agent(self.comm.rank());
            if self.agents.insert(agent.id(), agent).is_some() {
                warn!(
                    "partition {} received an agent it already owned",
                    self.comm.rank()
                );
            }
        }
        Ok(())
    }

    /// Agrees with the other partitions on whether any agent remains.
    fn check_stop(&mut self) -> Result<bool> {
        let counts: Vec<u64> = self.comm.all_gather(&(self.agents.len() as u64))?;
        let total: u64 = counts.iter().sum();
        if self.comm.rank() == 0 {
            info!("Remaining agents = {}; time = {}", total, self.time);
        }
        Ok(total == 0)
    }
}

/// Builds the global node-to-rank map: each rank claims the nodes falling in
/// its strip, then the claims are all-gathered and merged on every rank.
fn build_node_rank_map(
    comm: &mut Comm,
    network: &RoadNetwork,
    tiling: &StripPartitioning,
) -> Result<NodeRankMap> {
    let local: Vec<u32> = tiling
        .local_nodes(network, comm.rank())
        .into_iter()
        .map(|n| n.index() as u32)
        .collect();
    let claims = comm.all_gather(&local)?;
    let mut map = NodeRankMap::new();
    for (rank, nodes) in claims.into_iter().enumerate() {
        for node in nodes {
            map.insert(petgraph::graph::node_index(node as usize), rank);
        }
    }
    Ok(map)
}
