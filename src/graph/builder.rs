//! Directed transaction graph construction

use crate::error::{PipelineError, Result};
use crate::types::transaction::TransactionTable;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction::{Incoming, Outgoing};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

/// How repeated (sender, receiver) pairs are collapsed into one edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgePolicy {
    /// Sum amounts and keep every timestamp
    #[default]
    Sum,
    /// Keep the attributes of the last transfer seen
    LastWrite,
}

/// Attributes carried by a sender → receiver edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeFlow {
    pub amount: f64,
    /// Number of transfers collapsed into this edge
    pub transfer_count: usize,
    pub times: Vec<String>,
}

/// Directed graph of accounts and money flows
#[derive(Debug, Clone, Default)]
pub struct TransactionGraph {
    graph: DiGraph<String, EdgeFlow>,
    node_map: HashMap<String, NodeIndex>,
}

impl TransactionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn get_or_add_node(&mut self, id: &str) -> NodeIndex {
        if let Some(&idx) = self.node_map.get(id) {
            return idx;
        }
        let idx = self.graph.add_node(id.to_string());
        self.node_map.insert(id.to_string(), idx);
        idx
    }

    /// Insert or update the edge for one transfer
    pub fn add_transfer(
        &mut self,
        sender: &str,
        receiver: &str,
        amount: f64,
        time: Option<&str>,
        policy: EdgePolicy,
    ) -> EdgeIndex {
        let from = self.get_or_add_node(sender);
        let to = self.get_or_add_node(receiver);

        if let Some(edge) = self.graph.find_edge(from, to) {
            let flow = &mut self.graph[edge];
            flow.transfer_count += 1;
            match policy {
                EdgePolicy::Sum => {
                    flow.amount += amount;
                    flow.times.extend(time.map(str::to_string));
                }
                EdgePolicy::LastWrite => {
                    flow.amount = amount;
                    flow.times = time.map(str::to_string).into_iter().collect();
                }
            }
            return edge;
        }

        self.graph.add_edge(
            from,
            to,
            EdgeFlow {
                amount,
                transfer_count: 1,
                times: time.map(str::to_string).into_iter().collect(),
            },
        )
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.node_map.contains_key(id)
    }

    /// Node identifiers in first-seen order
    pub fn nodes(&self) -> impl Iterator<Item = &str> + '_ {
        self.graph.node_indices().map(move |idx| self.graph[idx].as_str())
    }

    /// Edges as (sender, receiver, flow) in insertion order
    pub fn edges(&self) -> impl Iterator<Item = (&str, &str, &EdgeFlow)> + '_ {
        self.graph.edge_references().map(move |edge| {
            (
                self.graph[edge.source()].as_str(),
                self.graph[edge.target()].as_str(),
                edge.weight(),
            )
        })
    }

    pub fn edge(&self, sender: &str, receiver: &str) -> Option<&EdgeFlow> {
        let from = *self.node_map.get(sender)?;
        let to = *self.node_map.get(receiver)?;
        self.graph.find_edge(from, to).map(|edge| &self.graph[edge])
    }

    pub fn in_degree(&self, id: &str) -> usize {
        self.degree(id, Incoming)
    }

    pub fn out_degree(&self, id: &str) -> usize {
        self.degree(id, Outgoing)
    }

    fn degree(&self, id: &str, direction: petgraph::Direction) -> usize {
        self.node_map
            .get(id)
            .map(|&idx| self.graph.edges_directed(idx, direction).count())
            .unwrap_or(0)
    }

    /// Total amount received by a node
    pub fn total_inflow(&self, id: &str) -> f64 {
        self.flow_total(id, Incoming)
    }

    /// Total amount sent by a node
    pub fn total_outflow(&self, id: &str) -> f64 {
        self.flow_total(id, Outgoing)
    }

    fn flow_total(&self, id: &str, direction: petgraph::Direction) -> f64 {
        self.node_map
            .get(id)
            .map(|&idx| {
                self.graph
                    .edges_directed(idx, direction)
                    .map(|e| e.weight().amount)
                    .sum()
            })
            .unwrap_or(0.0)
    }

    /// Underlying petgraph structure, for the analyzer
    pub(crate) fn inner(&self) -> &DiGraph<String, EdgeFlow> {
        &self.graph
    }
}

/// Build the transaction graph from a cleaned table
pub fn build_graph(table: &TransactionTable, policy: EdgePolicy) -> Result<TransactionGraph> {
    let mut graph = TransactionGraph::new();

    for (idx, record) in table.records.iter().enumerate() {
        if record.sender.is_empty() || record.receiver.is_empty() {
            return Err(PipelineError::format(format!(
                "record {} has an empty sender or receiver",
                idx
            )));
        }
        graph.add_transfer(
            &record.sender,
            &record.receiver,
            record.amount,
            record.time.as_deref(),
            policy,
        );
    }

    info!(
        nodes = graph.node_count(),
        edges = graph.edge_count(),
        policy = ?policy,
        "Graph built"
    );
    Ok(graph)
}
