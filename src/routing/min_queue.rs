// Copyright 2024 Johan Barthelemy
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// https://creativecommons.org/licenses/by-nc-nd/4.0/legalcode

//! Min-priority queue with decrease-key, used by the pathfinder.
use std::cmp::Reverse;

use ordered_float::OrderedFloat;
use petgraph::graph::NodeIndex;
use priority_queue::PriorityQueue;

/// A priority queue of graph nodes sorted in increasing order of a floating
/// cost, with amortized O(1) insert and decrease-key.
///
/// The queue holds at most one entry per node: pushing a node again is the
/// decrease-key operation.
#[derive(Clone, Debug, Default)]
pub struct MinQueue {
    inner: PriorityQueue<NodeIndex, Reverse<OrderedFloat<f64>>>,
}

impl MinQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Default::default()
    }

    /// Pushes a new node with the given cost.
    pub fn push(&mut self, node: NodeIndex, cost: f64) {
        self.inner.push(node, Reverse(OrderedFloat(cost)));
    }

    /// Decreases the cost of a node already in the queue.
    ///
    /// Calling this with a cost that is not lower than the current one is a
    /// programming error.
    pub fn decrease_key(&mut self, node: NodeIndex, cost: f64) {
        debug_assert!(
            self.inner
                .get_priority(&node)
                .map_or(true, |p| OrderedFloat(cost) < p.0),
            "decrease_key called with a non-decreasing cost"
        );
        // Decreasing the cost = increasing the priority.
        self.inner.push_increase(node, Reverse(OrderedFloat(cost)));
    }

    /// Returns the node with the minimum cost, without removing it.
    pub fn minimum(&self) -> Option<(NodeIndex, f64)> {
        self.inner.peek().map(|(n, p)| (*n, p.0 .0))
    }

    /// Removes and returns the node with the minimum cost.
    pub fn pop(&mut self) -> Option<(NodeIndex, f64)> {
        self.inner.pop().map(|(n, p)| (n, p.0 .0))
    }

    /// Returns `true` if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Empties the queue.
    pub fn clear(&mut self) {
        self.inner.clear();
    }
}
