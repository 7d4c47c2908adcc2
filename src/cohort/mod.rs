//! Variant cohort search and aggregation.

pub mod aggregate;
pub mod conf;
pub mod hpo;
pub mod memory;
pub mod output;
pub mod plan;
pub mod query;
pub mod schema;
pub mod store;
pub mod terms;

use std::rc::Rc;
use std::time::Instant;

use itertools::Itertools;
use strum::IntoEnumIterator;

use crate::err::{SearchError, StoreError};

use self::{
    aggregate::Aggregator,
    conf::SearchConf,
    hpo::{GeneralizationCache, TermSet},
    output::CohortStat,
    plan::{PlanBuilder, QueryPlan},
    schema::query::{normalize, Dimension, NormalizedFilters, RawFilters},
    store::{GraphStore, OntologyStore, SampleUniverse},
};

/// Build the query plan for `normalized`, resolving the HPO filter term to
/// its generalized set via `cache`.
///
/// Returns the plan and the generalized set, if the HPO filter is active.
pub fn build_plan<O: OntologyStore + ?Sized>(
    normalized: &NormalizedFilters,
    conf: &SearchConf,
    cache: &mut GeneralizationCache<'_, O>,
) -> Result<(QueryPlan, Option<Rc<TermSet>>), StoreError> {
    let hpo_scope = match normalized.filters.hpo_term() {
        Some(term_id) if normalized.filters.is_active(Dimension::Hpo) => {
            let scope = cache.ancestors_of(term_id)?;
            tracing::debug!("HPO filter {} generalizes to {:?}", term_id, &scope);
            Some(scope)
        }
        _ => None,
    };
    let plan = PlanBuilder::new(conf).build(normalized, hpo_scope.as_deref());
    Ok((plan, hpo_scope))
}

/// Outcome of one cohort search.
#[derive(Debug, Clone, PartialEq)]
pub struct Search {
    /// The plan that was executed.
    pub plan: QueryPlan,
    /// The result records, in plan order.
    pub records: Vec<CohortStat>,
}

/// Run one cohort search.
///
/// All memoization is scoped to this call: the generalization cache that
/// resolves the HPO filter also evaluates the shared-ancestor predicate
/// and feeds the aggregation.  Any store failure ends the search without
/// partial results.
pub fn run_search<G, O, U>(
    raw: &RawFilters,
    conf: &SearchConf,
    graph: &G,
    ontology: &O,
    universe: &U,
) -> Result<Search, SearchError>
where
    G: GraphStore + ?Sized,
    O: OntologyStore + ?Sized,
    U: SampleUniverse + ?Sized,
{
    let normalized = normalize(raw);
    if normalized.filters.is_empty() && normalized.range.is_none() {
        tracing::debug!("no active filters, searching the whole cohort");
    } else {
        tracing::debug!(
            "active filter dimensions: [{}]",
            Dimension::iter()
                .filter(|dim| normalized.filters.is_active(*dim))
                .join(", ")
        );
    }
    tracing::trace!("normalized filters = {:?}", &normalized);

    let mut cache = GeneralizationCache::new(ontology);
    let (plan, hpo_scope) = build_plan(&normalized, conf, &mut cache)?;
    tracing::debug!("query plan has {} clauses", plan.clauses.len());
    tracing::trace!("query plan = {:?}", &plan);

    let before_query = Instant::now();
    let rows = graph.execute(&plan, &mut cache)?;
    tracing::debug!(
        "store returned {} rows in {:?}",
        rows.len(),
        before_query.elapsed()
    );

    let total_samples = universe.total_samples()?;

    let before_aggregation = Instant::now();
    let mut aggregator = Aggregator::new(graph, cache, hpo_scope, total_samples, conf.hard_limit);
    let records = aggregator.aggregate(&rows)?;
    tracing::debug!(
        "aggregated {} records in {:?}, cache: {:?}",
        records.len(),
        before_aggregation.elapsed(),
        aggregator.cache().stats()
    );

    Ok(Search { plan, records })
}
