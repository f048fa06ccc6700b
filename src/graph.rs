//! Online modification-order graph.
//!
//! Every write action the execution commits to becomes a node; an edge
//! `a -> b` records that `a` must precede `b` in the modification order of
//! their location. The engine keeps the graph acyclic by probing
//! [`CycleGraph::check_reachable`] before committing a reads-from choice:
//! a candidate that would close a cycle is rejected and a different write
//! is tried instead.
//!
//! RMW atomicity gets special treatment: a committed RMW must be
//! MO-adjacent to the write it read from, so the rf node's other outgoing
//! edges are transferred onto the RMW node and the rf node remembers its
//! single RMW successor.

use std::collections::HashMap;
use std::io::{self, Write};

use smallvec::SmallVec;

use crate::action::Action;
use crate::types::ActionId;
use crate::util::arena::Arena;

/// Dense index of a node inside the graph.
type NodeIdx = u32;

#[derive(Debug)]
struct CycleNode {
    action: ActionId,
    edges: SmallVec<[NodeIdx; 4]>,
    /// The unique RMW that reads from this write, once one commits.
    rmw: Option<NodeIdx>,
}

/// A DAG over committed writes enforcing acyclic modification order.
#[derive(Debug, Default)]
pub struct CycleGraph {
    nodes: Vec<CycleNode>,
    node_map: HashMap<ActionId, NodeIdx>,
}

impl CycleGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn node(&mut self, action: ActionId) -> NodeIdx {
        if let Some(&idx) = self.node_map.get(&action) {
            return idx;
        }
        let idx = self.nodes.len() as NodeIdx;
        self.nodes.push(CycleNode {
            action,
            edges: SmallVec::new(),
            rmw: None,
        });
        self.node_map.insert(action, idx);
        idx
    }

    fn node_no_create(&self, action: ActionId) -> Option<NodeIdx> {
        self.node_map.get(&action).copied()
    }

    /// True when `write` already has a committed RMW reading from it.
    /// A second RMW may not read the same value, so the engine excludes
    /// such writes from rf candidate sets.
    #[must_use]
    pub fn has_rmw(&self, write: ActionId) -> bool {
        self.node_no_create(write)
            .is_some_and(|idx| self.nodes[idx as usize].rmw.is_some())
    }

    /// Adds the MO edge `from -> to`. Returns whether the edge is new.
    /// Self-edges are ignored.
    pub fn add_edge(&mut self, from: ActionId, to: ActionId) -> bool {
        if from == to {
            return false;
        }
        let from_idx = self.node(from);
        let to_idx = self.node(to);
        if self.nodes[from_idx as usize].edges.contains(&to_idx) {
            return false;
        }
        self.nodes[from_idx as usize].edges.push(to_idx);
        true
    }

    /// Adds MO edges from every action in `froms` to `to`.
    pub fn add_edges(&mut self, froms: &[ActionId], to: ActionId) {
        for &from in froms {
            self.add_edge(from, to);
        }
    }

    /// Registers `rmw` as the RMW reading from `from`, makes the pair
    /// MO-adjacent by moving `from`'s other outgoing edges onto `rmw`,
    /// and adds the edge `from -> rmw`.
    ///
    /// # Panics
    ///
    /// Panics if `from` already has an RMW successor; two RMWs may never
    /// read from the same write.
    pub fn add_rmw_edge(&mut self, from: ActionId, rmw: ActionId) {
        let from_idx = self.node(from);
        let rmw_idx = self.node(rmw);
        assert!(
            self.nodes[from_idx as usize].rmw.is_none(),
            "second RMW reading from one write"
        );
        self.nodes[from_idx as usize].rmw = Some(rmw_idx);

        // The RMW is MO-adjacent to its rf: everything previously ordered
        // after `from` is now ordered after the RMW as well.
        let transferred: SmallVec<[NodeIdx; 4]> = self.nodes[from_idx as usize]
            .edges
            .iter()
            .copied()
            .filter(|&e| e != rmw_idx)
            .collect();
        for succ in transferred {
            if !self.nodes[rmw_idx as usize].edges.contains(&succ) {
                self.nodes[rmw_idx as usize].edges.push(succ);
            }
        }
        self.add_edge(from, rmw);
    }

    /// Is there a path `from -> ... -> to`? Used to reject MO edges that
    /// would close a cycle before they are ever added.
    #[must_use]
    pub fn check_reachable(&self, from: ActionId, to: ActionId) -> bool {
        let (Some(start), Some(goal)) = (self.node_no_create(from), self.node_no_create(to))
        else {
            return false;
        };
        if start == goal {
            return true;
        }
        let mut visited = vec![false; self.nodes.len()];
        let mut stack: Vec<NodeIdx> = vec![start];
        visited[start as usize] = true;
        while let Some(idx) = stack.pop() {
            for &succ in &self.nodes[idx as usize].edges {
                if succ == goal {
                    return true;
                }
                if !visited[succ as usize] {
                    visited[succ as usize] = true;
                    stack.push(succ);
                }
            }
        }
        false
    }

    /// Number of write nodes currently in the graph.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Writes the graph's nodes and edges in dot syntax, without the
    /// surrounding `digraph` block. RMW adjacency edges are dotted.
    pub fn write_dot_nodes<W: Write>(
        &self,
        out: &mut W,
        actions: &Arena<ActionId, Action>,
    ) -> io::Result<()> {
        for node in &self.nodes {
            let act = &actions[node.action];
            writeln!(
                out,
                "N{} [label=\"N{}: {} {:?}\"];",
                act.seq(),
                act.seq(),
                act.tid(),
                act.kind()
            )?;
        }
        for node in &self.nodes {
            let from_seq = actions[node.action].seq();
            for &succ in &node.edges {
                let to = &actions[self.nodes[succ as usize].action];
                let style = if node.rmw == Some(succ) {
                    " [style=dotted]"
                } else {
                    ""
                };
                writeln!(out, "N{} -> N{}{};", from_seq, to.seq(), style)?;
            }
        }
        Ok(())
    }

    /// Writes the whole graph as a standalone dot file body.
    pub fn write_dot<W: Write>(
        &self,
        out: &mut W,
        name: &str,
        actions: &Arena<ActionId, Action>,
    ) -> io::Result<()> {
        writeln!(out, "digraph {name} {{")?;
        self.write_dot_nodes(out, actions)?;
        writeln!(out, "}}")
    }
}
