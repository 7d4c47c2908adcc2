//! Interfaces of the stores the search engine consumes.
//!
//! The engine is read-only; implementations only ever answer queries.  All
//! methods are synchronous from the engine's point of view.  A failing call
//! ends the whole search invocation.

use std::rc::Rc;

use crate::err::StoreError;

use super::{
    hpo::TermSet,
    plan::QueryPlan,
    schema::data::{Direction, Node, NodeId, RelType, ResultRow},
    terms::TermQuery,
};

/// A term of the phenotype ontology (HPO).
#[derive(serde::Serialize, Debug, Clone, PartialEq, Eq, derive_new::new)]
pub struct OntologyTerm {
    /// The term id, e.g., `HP:0001250`.
    pub term_id: String,
    /// The term label.
    pub label: String,
    /// Optional free-text description.
    pub description: Option<String>,
    /// Whether the term is excluded from display and statistics.
    pub hidden: bool,
    /// Direct parents via the generalization relation.
    pub parents: Vec<String>,
}

/// Generalized HPO terms of phenotypes.
///
/// Graph stores consult this when evaluating the shared-ancestor predicate
/// of a plan, so that the predicate sees the same ontology as the statistics.
pub trait PhenotypeTerms {
    /// Visible generalized terms of `phenotype`, given its annotated terms.
    fn visible_terms_of(
        &mut self,
        phenotype: NodeId,
        raw_terms: &[String],
    ) -> Result<Rc<TermSet>, StoreError>;
}

/// Property-graph store that executes query plans.
pub trait GraphStore {
    /// Execute `plan` and return its projected rows in plan order.
    ///
    /// The shared-ancestor predicate is evaluated through `terms`.
    fn execute(
        &self,
        plan: &QueryPlan,
        terms: &mut dyn PhenotypeTerms,
    ) -> Result<Vec<ResultRow>, StoreError>;

    /// Look up a node and its attributes; `None` if there is no such node.
    fn node(&self, id: NodeId) -> Result<Option<Node>, StoreError>;

    /// Nodes adjacent to `id` via relationships of type `rel` in `direction`.
    fn related(
        &self,
        id: NodeId,
        rel: RelType,
        direction: Direction,
    ) -> Result<Vec<NodeId>, StoreError>;
}

/// Store for the phenotype ontology.
pub trait OntologyStore {
    /// Look up a term by id; `None` if the ontology does not know it.
    fn term(&self, term_id: &str) -> Result<Option<OntologyTerm>, StoreError>;

    /// Find terms matching `query`, ordered by term id descending.
    fn find_terms(&self, query: &TermQuery) -> Result<Vec<OntologyTerm>, StoreError>;
}

/// Provider of the observation-rate denominator.
pub trait SampleUniverse {
    /// Number of distinct samples (files) with at least one observed variant.
    fn total_samples(&self) -> Result<u64, StoreError>;
}
