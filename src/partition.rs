// Copyright 2024 Johan Barthelemy
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Spatial partitioning of the network over the SPMD ranks.
use anyhow::{ensure, Result};
use hashbrown::HashMap;
use petgraph::graph::NodeIndex;

use crate::network::RoadNetwork;

/// A regular 1-D tiling of the logical x-coordinates: partition `p` owns the
/// strip `[p, p + 1) x [0, 1)`.
///
/// Combined with the synthetic strip coordinates assigned by
/// [RoadNetwork::assign_strip_coordinates], this balances the nodes over the
/// partitions deterministically. The mapping from nodes to partitions is
/// stable for the whole run.
#[derive(Clone, Copy, Debug)]
pub struct StripPartitioning {
    n_partitions: usize,
}

impl StripPartitioning {
    /// Creates a tiling over the given number of partitions.
    pub fn new(n_partitions: usize) -> Result<Self> {
        ensure!(n_partitions > 0, "at least one partition is required");
        Ok(StripPartitioning { n_partitions })
    }

    /// Returns the number of partitions.
    pub const fn n_partitions(&self) -> usize {
        self.n_partitions
    }

    /// Returns `true` if the given logical coordinates fall in the strip of
    /// the given rank.
    pub fn contains(&self, rank: usize, x: f64, y: f64) -> bool {
        rank as f64 <= x && x < (rank + 1) as f64 && (0.0..1.0).contains(&y)
    }

    /// Returns the rank owning the given logical coordinates, or `None` if
    /// they fall outside the tiling.
    pub fn owner_of(&self, x: f64, y: f64) -> Option<usize> {
        if x < 0.0 || x >= self.n_partitions as f64 || !(0.0..1.0).contains(&y) {
            return None;
        }
        Some(x as usize)
    }

    /// Returns the rank owning the given node.
    pub fn node_owner(&self, network: &RoadNetwork, node: NodeIndex) -> Option<usize> {
        let (x, y) = network.node(node).coordinates();
        self.owner_of(x, y)
    }

    /// Returns the nodes of the network owned by the given rank, by local
    /// inclusion test.
    pub fn local_nodes(&self, network: &RoadNetwork, rank: usize) -> Vec<NodeIndex> {
        network
            .node_indices()
            .filter(|&n| {
                let (x, y) = network.node(n).coordinates();
                self.contains(rank, x, y)
            })
            .collect()
    }
}

/// Global node-to-rank map, replicated on every partition.
pub type NodeRankMap = HashMap<NodeIndex, usize>;
