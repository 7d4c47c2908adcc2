//! Request-scoped generalization of HPO terms.
//!
//! Phenotypes are annotated with specific HPO terms.  For filtering and for
//! the HPO statistics, terms are generalized along the `GENERALIZED_BY`
//! relation to their broader ancestors.  Terms flagged as hidden never show up
//! in a generalized set, but their own ancestors are still reached through
//! them.
//!
//! A `GeneralizationCache` lives for exactly one search invocation.  Every
//! term is fetched from the ontology store at most once and every ancestor
//! set and phenotype term set is computed at most once.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::rc::Rc;

use crate::err::StoreError;

use super::{
    schema::data::NodeId,
    store::{OntologyStore, OntologyTerm, PhenotypeTerms},
};

/// Set of visible term ids.
pub type TermSet = BTreeSet<String>;

/// Counters describing the cache contents, for logging.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of term lookups sent to the ontology store.
    pub term_lookups: usize,
    /// Number of memoized ancestor sets.
    pub ancestor_sets: usize,
    /// Number of memoized phenotype term sets.
    pub phenotype_sets: usize,
}

/// Memoizing view of an `OntologyStore` for one search invocation.
pub struct GeneralizationCache<'a, O: OntologyStore + ?Sized> {
    ontology: &'a O,
    terms: HashMap<String, Option<Rc<OntologyTerm>>>,
    ancestors: HashMap<String, Rc<TermSet>>,
    phenotypes: HashMap<NodeId, Rc<TermSet>>,
}

impl<'a, O: OntologyStore + ?Sized> GeneralizationCache<'a, O> {
    /// Create an empty cache on top of `ontology`.
    pub fn new(ontology: &'a O) -> Self {
        Self {
            ontology,
            terms: HashMap::new(),
            ancestors: HashMap::new(),
            phenotypes: HashMap::new(),
        }
    }

    /// Look up a term, asking the store only on first access.
    pub fn term(&mut self, term_id: &str) -> Result<Option<Rc<OntologyTerm>>, StoreError> {
        if let Some(term) = self.terms.get(term_id) {
            return Ok(term.clone());
        }
        let term = self.ontology.term(term_id)?.map(Rc::new);
        if term.is_none() {
            tracing::trace!("term {} not in ontology", term_id);
        }
        self.terms.insert(term_id.to_string(), term.clone());
        Ok(term)
    }

    /// The generalized set of `term_id`: the term itself and all terms
    /// reachable via the generalization relation, minus hidden terms.
    ///
    /// Unknown terms yield an empty set.
    pub fn ancestors_of(&mut self, term_id: &str) -> Result<Rc<TermSet>, StoreError> {
        if let Some(result) = self.ancestors.get(term_id) {
            return Ok(result.clone());
        }

        let mut result = TermSet::new();
        let mut seen = BTreeSet::from([term_id.to_string()]);
        let mut queue = VecDeque::from([term_id.to_string()]);
        while let Some(current) = queue.pop_front() {
            let Some(term) = self.term(&current)? else {
                continue;
            };
            if !term.hidden {
                result.insert(term.term_id.clone());
            }
            for parent in &term.parents {
                if seen.insert(parent.clone()) {
                    queue.push_back(parent.clone());
                }
            }
        }

        let result = Rc::new(result);
        self.ancestors
            .insert(term_id.to_string(), result.clone());
        Ok(result)
    }

    /// Union of the generalized sets of a phenotype's annotated terms,
    /// memoized per phenotype.
    pub fn visible_terms_of(
        &mut self,
        phenotype: NodeId,
        raw_terms: &[String],
    ) -> Result<Rc<TermSet>, StoreError> {
        if let Some(result) = self.phenotypes.get(&phenotype) {
            return Ok(result.clone());
        }

        let mut result = TermSet::new();
        for term_id in raw_terms {
            result.extend(self.ancestors_of(term_id)?.iter().cloned());
        }

        let result = Rc::new(result);
        self.phenotypes.insert(phenotype, result.clone());
        Ok(result)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            term_lookups: self.terms.len(),
            ancestor_sets: self.ancestors.len(),
            phenotype_sets: self.phenotypes.len(),
        }
    }
}

impl<O: OntologyStore + ?Sized> PhenotypeTerms for GeneralizationCache<'_, O> {
    fn visible_terms_of(
        &mut self,
        phenotype: NodeId,
        raw_terms: &[String],
    ) -> Result<Rc<TermSet>, StoreError> {
        GeneralizationCache::visible_terms_of(self, phenotype, raw_terms)
    }
}
