//! Lookup of HPO terms by id or label fragment, for filter autocompletion.

use regex::Regex;

use crate::err::SearchError;

use super::{conf::SearchConf, store::OntologyStore};

/// Term attribute a lookup matches against.
#[derive(serde::Serialize, Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum TermField {
    /// The term id, e.g., `HP:0001250`.
    Id,
    /// The term label.
    Label,
}

/// Case-insensitive substring query against one term attribute.
#[derive(serde::Serialize, Debug, Clone, PartialEq, Eq)]
pub struct TermQuery {
    pub field: TermField,
    pub needle: String,
    pub limit: usize,
}

impl TermQuery {
    /// Whether `haystack` contains the needle, ignoring case.
    pub fn matches(&self, haystack: &str) -> bool {
        haystack
            .to_lowercase()
            .contains(&self.needle.to_lowercase())
    }
}

/// One lookup result.
#[derive(serde::Serialize, Debug, Clone, PartialEq, Eq)]
pub struct TermHit {
    pub hpo_id: String,
    pub label: String,
}

/// Build the store query for the user input `query`.
///
/// Only letters, digits, colon and hyphen are accepted.  Inputs that look
/// like a term id (`HP:` followed by at least one character) match ids,
/// everything else matches labels.
pub fn term_query(query: &str, conf: &SearchConf) -> Result<TermQuery, SearchError> {
    let whitelist = Regex::new(r"^[a-zA-Z0-9:-]+$")?;
    if !whitelist.is_match(query) {
        return Err(SearchError::InvalidTermQuery(query.to_string()));
    }
    let field = if query.starts_with("HP:") && query.len() >= 4 {
        TermField::Id
    } else {
        TermField::Label
    };
    Ok(TermQuery {
        field,
        needle: query.to_string(),
        limit: conf.max_term_results,
    })
}

/// Look up terms matching `query`, ordered by id descending.
pub fn lookup_terms<O: OntologyStore + ?Sized>(
    ontology: &O,
    query: &str,
    conf: &SearchConf,
) -> Result<Vec<TermHit>, SearchError> {
    let term_query = term_query(query, conf)?;
    tracing::debug!("term lookup: {:?}", &term_query);
    let mut hits = ontology
        .find_terms(&term_query)?
        .into_iter()
        .map(|term| TermHit {
            hpo_id: term.term_id,
            label: term.label,
        })
        .collect::<Vec<_>>();
    hits.truncate(term_query.limit);
    Ok(hits)
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use crate::cohort::{conf::SearchConf, hpo::test::MapOntology, store::OntologyTerm};
    use crate::err::{SearchError, StoreError};

    use super::*;

    #[rstest]
    #[case("HP:0001", TermField::Id)]
    #[case("HP:1", TermField::Id)]
    #[case("HP:", TermField::Label)]
    #[case("hp:0001", TermField::Label)]
    #[case("seizure", TermField::Label)]
    #[case("Abnormality-of", TermField::Label)]
    fn field_selection(#[case] query: &str, #[case] expected: TermField) {
        let term_query = term_query(query, &SearchConf::default()).unwrap();
        assert_eq!(term_query.field, expected);
        assert_eq!(term_query.needle, query);
        assert_eq!(term_query.limit, 50);
    }

    #[rstest]
    #[case("")]
    #[case("a b")]
    #[case(".*")]
    #[case("x'}) RETURN 1")]
    #[case("label_with_underscore")]
    fn rejects_characters(#[case] query: &str) {
        assert!(matches!(
            term_query(query, &SearchConf::default()),
            Err(SearchError::InvalidTermQuery(q)) if q == query
        ));
    }

    #[test]
    fn needle_matching_ignores_case() {
        let query = term_query("SEIZ", &SearchConf::default()).unwrap();
        assert!(query.matches("Focal seizure"));
        assert!(!query.matches("Ataxia"));
    }

    /// Ontology answering every query with a fixed list.
    struct FixedOntology(Vec<OntologyTerm>);

    impl OntologyStore for FixedOntology {
        fn term(&self, _term_id: &str) -> Result<Option<OntologyTerm>, StoreError> {
            Ok(None)
        }

        fn find_terms(&self, _query: &TermQuery) -> Result<Vec<OntologyTerm>, StoreError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn lookup_truncates_to_limit() {
        let ontology = FixedOntology(
            (0..10)
                .map(|i| OntologyTerm::new(format!("HP:{i}"), format!("t{i}"), None, false, vec![]))
                .collect(),
        );
        let conf = SearchConf {
            max_term_results: 3,
            ..Default::default()
        };
        let hits = lookup_terms(&ontology, "t", &conf).unwrap();
        assert_eq!(
            hits.iter().map(|hit| hit.hpo_id.as_str()).collect::<Vec<_>>(),
            vec!["HP:0", "HP:1", "HP:2"]
        );
    }

    #[test]
    fn lookup_invalid_query_does_not_reach_store() {
        let ontology = MapOntology::default();
        ontology.fail.set(true);
        assert!(matches!(
            lookup_terms(&ontology, "no spaces", &SearchConf::default()),
            Err(SearchError::InvalidTermQuery(_))
        ));
    }
}
