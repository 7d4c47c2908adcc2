//! Turning raw result rows into `CohortStat` records.

use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::err::StoreError;

use super::{
    hpo::{GeneralizationCache, TermSet},
    output::{CohortStat, Distribution, HpoShare, AFFECTED, NOT_AFFECTED, UNKNOWN_SEX},
    schema::data::{Direction, NodeId, RelType, ResultRow},
    store::{GraphStore, OntologyStore},
};

/// What the aggregator needs to know about one phenotype.
#[derive(Debug, Clone)]
struct PhenotypeFacts {
    /// Sex, if recorded and not "unknown".
    sex: Option<String>,
    /// Whether any HPO term is annotated at all.
    annotated: bool,
    /// Generalized visible terms, restricted to the HPO filter scope if any.
    terms: TermSet,
    /// Variants confirmed in this phenotype.
    confirmed: Vec<NodeId>,
}

/// Count occurrences in first-seen order.
fn tally<I: IntoIterator<Item = String>>(values: I) -> IndexMap<String, u64> {
    let mut result = IndexMap::new();
    for value in values {
        *result.entry(value).or_insert(0) += 1;
    }
    result
}

fn ratio(count: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64
    }
}

/// Fractions of `counts` over `total`; empty if `total` is zero.
fn distribution(counts: &IndexMap<String, u64>, total: u64) -> Distribution {
    if total == 0 {
        return Distribution::new();
    }
    counts
        .iter()
        .map(|(key, count)| (key.clone(), ratio(*count, total)))
        .collect()
}

/// Request-scoped result aggregator.
pub struct Aggregator<'a, G: GraphStore + ?Sized, O: OntologyStore + ?Sized> {
    graph: &'a G,
    cache: GeneralizationCache<'a, O>,
    hpo_scope: Option<Rc<TermSet>>,
    total_samples: u64,
    hard_limit: usize,
    phenotypes: HashMap<NodeId, Rc<PhenotypeFacts>>,
}

impl<'a, G: GraphStore + ?Sized, O: OntologyStore + ?Sized> Aggregator<'a, G, O> {
    /// Create a new aggregator.
    ///
    /// `hpo_scope` is the generalized set of the HPO filter term, if the
    /// HPO filter is active.  `cache` is the generalization cache of the
    /// current search invocation.
    pub fn new(
        graph: &'a G,
        cache: GeneralizationCache<'a, O>,
        hpo_scope: Option<Rc<TermSet>>,
        total_samples: u64,
        hard_limit: usize,
    ) -> Self {
        Self {
            graph,
            cache,
            hpo_scope,
            total_samples,
            hard_limit,
            phenotypes: HashMap::new(),
        }
    }

    /// The generalization cache, e.g., for reading its statistics.
    pub fn cache(&self) -> &GeneralizationCache<'a, O> {
        &self.cache
    }

    fn phenotype(&mut self, phenotype: NodeId) -> Result<Rc<PhenotypeFacts>, StoreError> {
        if let Some(facts) = self.phenotypes.get(&phenotype) {
            return Ok(facts.clone());
        }

        let sex = self
            .graph
            .node(phenotype)?
            .and_then(|node| node.str_prop("sex").map(str::to_string))
            .filter(|sex| !sex.is_empty() && sex != UNKNOWN_SEX);

        let mut raw_terms = Vec::new();
        for term in self
            .graph
            .related(phenotype, RelType::DescribedBy, Direction::Outgoing)?
        {
            if let Some(term_id) = self
                .graph
                .node(term)?
                .and_then(|node| node.str_prop("hpo_id").map(str::to_string))
            {
                raw_terms.push(term_id);
            }
        }

        let visible = self.cache.visible_terms_of(phenotype, &raw_terms)?;
        let terms = match &self.hpo_scope {
            Some(scope) => visible.intersection(scope).cloned().collect(),
            None => (*visible).clone(),
        };

        let confirmed =
            self.graph
                .related(phenotype, RelType::ConfirmedIn, Direction::Incoming)?;

        let facts = Rc::new(PhenotypeFacts {
            sex,
            annotated: !raw_terms.is_empty(),
            terms,
            confirmed,
        });
        self.phenotypes.insert(phenotype, facts.clone());
        Ok(facts)
    }

    /// Aggregate one row into a record with the given 1-based `counter`.
    pub fn aggregate_row(&mut self, counter: usize, row: &ResultRow) -> Result<CohortStat, StoreError> {
        let observed_in = row.observed_in;

        let mut sexes = Vec::new();
        let mut hpo_terms = Vec::new();
        let mut affected = 0u64;
        let mut confirmed = 0u64;
        for phenotype in &row.phenotype_distribution {
            let facts = self.phenotype(*phenotype)?;
            sexes.extend(facts.sex.clone());
            let is_affected = match self.hpo_scope {
                Some(_) => !facts.terms.is_empty(),
                None => facts.annotated,
            };
            if is_affected {
                affected += 1;
            }
            hpo_terms.extend(facts.terms.iter().cloned());
            if facts.confirmed.contains(&row.variant) {
                confirmed += 1;
            }
        }

        let sex_counts = tally(sexes);
        let mut sex_distribution = distribution(&sex_counts, observed_in);
        if observed_in > 0 {
            let counted: u64 = sex_counts.values().sum();
            sex_distribution.insert(
                UNKNOWN_SEX.to_string(),
                ratio(observed_in.saturating_sub(counted), observed_in),
            );
        }

        let affected_distribution = if observed_in > 0 {
            Distribution::from([
                (AFFECTED.to_string(), ratio(affected, observed_in)),
                (
                    NOT_AFFECTED.to_string(),
                    ratio(observed_in.saturating_sub(affected), observed_in),
                ),
            ])
        } else {
            Distribution::new()
        };

        let mut hpo_distribution = IndexMap::new();
        for (term_id, count) in tally(hpo_terms) {
            let term = self.cache.term(&term_id)?;
            hpo_distribution.insert(
                term_id.clone(),
                HpoShare {
                    percentage: ratio(count, affected),
                    label: term.as_ref().map(|t| t.label.clone()).unwrap_or_default(),
                    description: term.as_ref().and_then(|t| t.description.clone()),
                    id: term_id,
                },
            );
        }

        let geo_distribution = distribution(&tally(row.geo_distribution.iter().cloned()), observed_in);

        let variant = self.graph.node(row.variant)?.map(|node| node.properties);
        let gene = match row.gene {
            Some(gene) => self.graph.node(gene)?.map(|node| node.properties),
            None => None,
        };

        Ok(CohortStat {
            counter,
            variant,
            gene,
            observed_in,
            total_samples: self.total_samples,
            observed_perc: ratio(observed_in, self.total_samples),
            sex_distribution,
            affected_distribution,
            hpo_distribution,
            geo_distribution,
            confirmed,
        })
    }

    /// Aggregate all rows, preserving their order.
    pub fn aggregate(&mut self, rows: &[ResultRow]) -> Result<Vec<CohortStat>, StoreError> {
        let rows = if rows.len() > self.hard_limit {
            tracing::warn!(
                "store returned {} rows, truncating to {}",
                rows.len(),
                self.hard_limit
            );
            &rows[..self.hard_limit]
        } else {
            rows
        };

        rows.iter()
            .enumerate()
            .map(|(i, row)| self.aggregate_row(i + 1, row))
            .collect()
    }
}
