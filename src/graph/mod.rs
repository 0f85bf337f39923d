//! Transaction graph construction, analysis, and export

pub mod analyzer;
pub mod builder;
pub mod graphml;

pub use analyzer::{
    degree_centrality, detect_communities, modularity, top_central, CentralityMap, Partition,
};
pub use builder::{build_graph, EdgeFlow, EdgePolicy, TransactionGraph};
pub use graphml::write_graphml;
