pub mod centrality;
pub mod louvain;
pub mod paths;
pub mod projection;
pub mod stats;

pub use centrality::{CentralityScore, PageRankConfig, pagerank, top_central};
pub use louvain::{
    Community, CommunityDetection, CommunityMember, LouvainDetector, detect as detect_communities,
};
pub use paths::{GraphPath, NeighborEntity, Neighborhood, PathQuery, neighborhood, shortest_path};
pub use projection::{EdgeData, Projection};
pub use stats::{GraphStatistics, statistics};
