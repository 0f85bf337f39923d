//! Structural metrics over a transaction graph snapshot.
//!
//! Every function here is a pure function of the graph: no randomness and no
//! mutation, so repeated calls return identical results.

use super::builder::TransactionGraph;
use petgraph::visit::EdgeRef;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Degree centrality per node identifier
pub type CentralityMap = BTreeMap<String, f64>;

/// Disjoint communities covering every node of a graph
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Partition {
    /// Communities ordered by their lowest member; members sorted
    communities: Vec<Vec<String>>,
    #[serde(skip)]
    membership: HashMap<String, usize>,
}

impl Partition {
    fn from_groups(mut communities: Vec<Vec<String>>) -> Self {
        for community in &mut communities {
            community.sort();
        }
        communities.sort();

        let membership = communities
            .iter()
            .enumerate()
            .flat_map(|(idx, members)| members.iter().map(move |m| (m.clone(), idx)))
            .collect();

        Self {
            communities,
            membership,
        }
    }

    pub fn communities(&self) -> &[Vec<String>] {
        &self.communities
    }

    pub fn len(&self) -> usize {
        self.communities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.communities.is_empty()
    }

    /// Index of the community holding a node
    pub fn community_of(&self, node: &str) -> Option<usize> {
        self.membership.get(node).copied()
    }
}

/// Degree centrality: (in-degree + out-degree) / (|V| - 1), zero when |V| <= 1
pub fn degree_centrality(graph: &TransactionGraph) -> CentralityMap {
    let n = graph.node_count();
    let scale = if n > 1 { 1.0 / (n - 1) as f64 } else { 0.0 };

    graph
        .nodes()
        .map(|node| {
            let degree = graph.in_degree(node) + graph.out_degree(node);
            (node.to_string(), degree as f64 * scale)
        })
        .collect()
}

/// The `n` most central nodes, highest first, ties broken by identifier
pub fn top_central(centrality: &CentralityMap, n: usize) -> Vec<(String, f64)> {
    let mut ranked: Vec<(String, f64)> = centrality
        .iter()
        .map(|(node, &value)| (node.clone(), value))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(n);
    ranked
}

/// Edge-count view of the graph with edge direction ignored
struct UndirectedCounts<'a> {
    ids: Vec<&'a str>,
    /// Edge ends per node; a self-loop adds two
    degree: Vec<u64>,
    /// Edges between distinct node pairs, keyed (low index, high index)
    links: HashMap<(usize, usize), u64>,
    /// Sum of all degrees (2m)
    two_m: u64,
}

impl<'a> UndirectedCounts<'a> {
    fn new(graph: &'a TransactionGraph) -> Self {
        let inner = graph.inner();
        let ids: Vec<&str> = inner.node_indices().map(|i| inner[i].as_str()).collect();
        let mut degree = vec![0u64; ids.len()];
        let mut links = HashMap::new();

        for edge in inner.edge_references() {
            let (u, v) = (edge.source().index(), edge.target().index());
            degree[u] += 1;
            degree[v] += 1;
            if u != v {
                *links.entry((u.min(v), u.max(v))).or_insert(0) += 1;
            }
        }

        let two_m = degree.iter().sum();
        Self {
            ids,
            degree,
            links,
            two_m,
        }
    }
}

/// Partition nodes by greedy modularity maximization.
///
/// Starts from singletons and repeatedly merges the pair of connected
/// communities with the largest modularity gain, stopping once no merge
/// increases modularity. Equal gains go to the pair with the lowest
/// (label, label), a community's label being its lowest member identifier.
pub fn detect_communities(graph: &TransactionGraph) -> Partition {
    let counts = UndirectedCounts::new(graph);
    let n = counts.ids.len();

    let mut members: Vec<Vec<usize>> = (0..n).map(|i| vec![i]).collect();
    let mut labels: Vec<&str> = counts.ids.clone();
    let mut totals = counts.degree.clone();
    let mut links = counts.links.clone();
    let two_m = counts.two_m as i128;
    let mut merges = 0usize;

    // Gain of merging a and b is 2 * (w / 2m - K_a * K_b / (2m)^2); with 2m
    // fixed, comparing w * 2m - K_a * K_b keeps the search in exact integers.
    loop {
        let mut best: Option<(i128, (&str, &str), (usize, usize))> = None;

        for (&(a, b), &w) in &links {
            let gain = w as i128 * two_m - totals[a] as i128 * totals[b] as i128;
            if gain <= 0 {
                continue;
            }
            let key = if labels[a] <= labels[b] {
                (labels[a], labels[b])
            } else {
                (labels[b], labels[a])
            };
            let better = match &best {
                None => true,
                Some((best_gain, best_key, _)) => {
                    gain > *best_gain || (gain == *best_gain && key < *best_key)
                }
            };
            if better {
                best = Some((gain, key, (a, b)));
            }
        }

        let Some((_, _, (a, b))) = best else { break };

        let (keep, gone) = if labels[a] <= labels[b] { (a, b) } else { (b, a) };
        let moved = std::mem::take(&mut members[gone]);
        members[keep].extend(moved);
        totals[keep] += totals[gone];
        totals[gone] = 0;

        let touching: Vec<((usize, usize), u64)> = links
            .iter()
            .filter(|((x, y), _)| *x == gone || *y == gone)
            .map(|(&pair, &w)| (pair, w))
            .collect();
        for ((x, y), w) in touching {
            links.remove(&(x, y));
            let other = if x == gone { y } else { x };
            if other != keep {
                *links.entry((keep.min(other), keep.max(other))).or_insert(0) += w;
            }
        }
        labels[gone] = labels[keep];
        merges += 1;
    }

    let groups: Vec<Vec<String>> = members
        .into_iter()
        .filter(|m| !m.is_empty())
        .map(|m| m.into_iter().map(|i| counts.ids[i].to_string()).collect())
        .collect();

    debug!(merges, communities = groups.len(), "Community detection finished");
    Partition::from_groups(groups)
}

/// Modularity Q of a partition over the undirected, unweighted view of the graph
pub fn modularity(graph: &TransactionGraph, partition: &Partition) -> f64 {
    let counts = UndirectedCounts::new(graph);
    if counts.two_m == 0 {
        return 0.0;
    }
    let two_m = counts.two_m as f64;

    let community: Vec<Option<usize>> = counts
        .ids
        .iter()
        .map(|id| partition.community_of(id))
        .collect();

    let mut internal = vec![0u64; partition.len()];
    let mut totals = vec![0u64; partition.len()];

    for (idx, degree) in counts.degree.iter().enumerate() {
        if let Some(c) = community[idx] {
            totals[c] += degree;
        }
    }
    for edge in graph.inner().edge_references() {
        let (u, v) = (edge.source().index(), edge.target().index());
        if let (Some(cu), Some(cv)) = (community[u], community[v]) {
            if cu == cv {
                internal[cu] += 2;
            }
        }
    }

    internal
        .iter()
        .zip(&totals)
        .map(|(&inside, &total)| inside as f64 / two_m - (total as f64 / two_m).powi(2))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::builder::EdgePolicy;

    fn graph_of(edges: &[(&str, &str)]) -> TransactionGraph {
        let mut graph = TransactionGraph::new();
        for (from, to) in edges {
            graph.add_transfer(from, to, 1.0, None, EdgePolicy::Sum);
        }
        graph
    }

    #[test]
    fn test_cycle_centrality() {
        let graph = graph_of(&[("A", "B"), ("B", "C"), ("C", "A")]);

        let centrality = degree_centrality(&graph);

        assert_eq!(centrality.len(), 3);
        for value in centrality.values() {
            assert!((value - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_path_centrality() {
        let graph = graph_of(&[("A", "B"), ("B", "C")]);

        let centrality = degree_centrality(&graph);

        assert_eq!(centrality.len(), 3);
        assert_eq!(centrality["A"], 0.5);
        assert_eq!(centrality["B"], 1.0);
        assert_eq!(centrality["C"], 0.5);
    }

    #[test]
    fn test_single_node_centrality_is_zero() {
        let graph = graph_of(&[("A", "A")]);

        let centrality = degree_centrality(&graph);
        assert_eq!(centrality["A"], 0.0);
    }

    #[test]
    fn test_top_central() {
        let graph = graph_of(&[("A", "B"), ("B", "C"), ("D", "B")]);
        let top = top_central(&degree_centrality(&graph), 2);

        assert_eq!(top[0].0, "B");
        assert_eq!(top[1].0, "A");
        assert_eq!(top.len(), 2);
    }

    #[test]
    fn test_two_triangles_form_two_communities() {
        let graph = graph_of(&[
            ("A", "B"),
            ("B", "C"),
            ("C", "A"),
            ("D", "E"),
            ("E", "F"),
            ("F", "D"),
        ]);

        let partition = detect_communities(&graph);

        assert_eq!(partition.len(), 2);
        assert_eq!(partition.communities()[0], vec!["A", "B", "C"]);
        assert_eq!(partition.communities()[1], vec!["D", "E", "F"]);
        assert_eq!(partition.community_of("E"), Some(1));
        assert!((modularity(&graph, &partition) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_path_is_one_community() {
        let graph = graph_of(&[("A", "B"), ("B", "C")]);

        let partition = detect_communities(&graph);

        assert_eq!(partition.len(), 1);
        assert_eq!(partition.communities()[0], vec!["A", "B", "C"]);
    }

    #[test]
    fn test_bridged_cliques_split_at_bridge() {
        let graph = graph_of(&[
            ("A", "B"),
            ("B", "C"),
            ("C", "A"),
            ("A", "D"),
            ("B", "D"),
            ("D", "E"),
            ("E", "F"),
            ("F", "G"),
            ("G", "E"),
            ("E", "H"),
            ("F", "H"),
        ]);

        let partition = detect_communities(&graph);

        assert_eq!(partition.len(), 2);
        assert_eq!(partition.communities()[0], vec!["A", "B", "C", "D"]);
        assert_eq!(partition.communities()[1], vec!["E", "F", "G", "H"]);
    }

    #[test]
    fn test_partition_covers_every_node_once() {
        let graph = graph_of(&[("A", "B"), ("C", "D"), ("E", "E"), ("B", "F")]);

        let partition = detect_communities(&graph);
        let mut seen: Vec<&str> = partition
            .communities()
            .iter()
            .flatten()
            .map(String::as_str)
            .collect();
        seen.sort();

        assert_eq!(seen, vec!["A", "B", "C", "D", "E", "F"]);
    }

    #[test]
    fn test_detection_is_repeatable() {
        let graph = graph_of(&[("A", "B"), ("B", "C"), ("C", "D"), ("D", "A"), ("C", "E")]);

        assert_eq!(detect_communities(&graph), detect_communities(&graph));
    }

    #[test]
    fn test_edgeless_graph() {
        let graph = TransactionGraph::new();

        assert!(detect_communities(&graph).is_empty());
        assert!(degree_centrality(&graph).is_empty());
    }
}
