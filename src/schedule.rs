//! Combinational dependency analysis
//!
//! Builds a graph over combinational blocks with an edge `w -> r` whenever a
//! net written by `w` is read by `r`, then produces a level-sorted evaluation
//! order. Any cycle in this graph is a structural error.

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction::Incoming;

use crate::block::CompiledBlock;
use crate::error::{Result, SimError};

/// Evaluation order of the combinational blocks
#[derive(Debug, Clone)]
pub struct Schedule {
    /// Block index (declaration order) at each evaluation position
    pub order: Vec<usize>,
    /// Level at each evaluation position
    pub levels: Vec<usize>,
    /// Evaluation positions reading each net
    pub fanout: Vec<Vec<usize>>,
}

impl Schedule {
    /// `blocks` must all be combinational, in declaration order
    pub(crate) fn build(blocks: &[CompiledBlock], net_count: usize) -> Result<Self> {
        let n = blocks.len();
        let mut graph: DiGraph<usize, ()> = DiGraph::with_capacity(n, n);
        let nodes: Vec<NodeIndex> = (0..n).map(|i| graph.add_node(i)).collect();

        let mut readers: Vec<Vec<usize>> = vec![Vec::new(); net_count];
        for (i, block) in blocks.iter().enumerate() {
            for net in &block.reads {
                readers[net.index()].push(i);
            }
        }

        for (w, block) in blocks.iter().enumerate() {
            for net in &block.writes {
                for &r in &readers[net.index()] {
                    // A block reading back its own output is not a loop
                    if r != w {
                        graph.update_edge(nodes[w], nodes[r], ());
                    }
                }
            }
        }

        let sorted = match toposort(&graph, None) {
            Ok(sorted) => sorted,
            Err(_) => return Err(loop_error(&graph, blocks)),
        };

        // Sources sit at level 0; everything else one past its deepest input
        let mut level = vec![0usize; n];
        for node in sorted {
            let l = graph
                .neighbors_directed(node, Incoming)
                .map(|pred| level[graph[pred]] + 1)
                .max()
                .unwrap_or(0);
            level[graph[node]] = l;
        }

        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by_key(|&i| (level[i], i));

        let mut position = vec![0usize; n];
        for (pos, &i) in order.iter().enumerate() {
            position[i] = pos;
        }

        let fanout = readers
            .into_iter()
            .map(|rs| {
                let mut positions: Vec<usize> = rs.into_iter().map(|i| position[i]).collect();
                positions.sort_unstable();
                positions
            })
            .collect();
        let levels = order.iter().map(|&i| level[i]).collect();

        tracing::debug!(
            "scheduled {} combinational blocks over {} levels",
            n,
            level.iter().max().map_or(0, |l| l + 1)
        );

        Ok(Self { order, levels, fanout })
    }

    pub fn depth(&self) -> usize {
        self.levels.last().map_or(0, |l| l + 1)
    }
}

fn loop_error(graph: &DiGraph<usize, ()>, blocks: &[CompiledBlock]) -> SimError {
    let scc = tarjan_scc(graph)
        .into_iter()
        .find(|component| component.len() > 1)
        .unwrap_or_default();
    let mut members: Vec<usize> = scc.into_iter().map(|node| graph[node]).collect();
    members.sort_unstable();
    SimError::CombinationalLoop {
        blocks: members.into_iter().map(|i| blocks[i].name.clone()).collect(),
    }
}
