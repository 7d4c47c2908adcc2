//! Error types shared by the cohort search engine.

use crate::cohort::schema::data::NodeId;

/// Failure of a collaborating store (graph, ontology, sample universe).
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("graph store backend failed: {0}")]
    Backend(String),
    #[error("could not read graph snapshot: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed graph snapshot: {0}")]
    Snapshot(#[from] serde_json::Error),
    #[error("duplicate node id {0} in graph snapshot")]
    DuplicateNode(NodeId),
    #[error("edge references unknown node {0}")]
    DanglingEdge(NodeId),
}

/// Terminal failure of one search invocation.
#[derive(thiserror::Error, Debug)]
pub enum SearchError {
    #[error("store failure: {0}")]
    Store(#[from] StoreError),
    #[error("invalid HPO query {0:?}")]
    InvalidTermQuery(String),
    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
}
