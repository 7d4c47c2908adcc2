//! Output records of the cohort search.

use indexmap::IndexMap;

/// Key of the residual bucket in the sex distribution.
pub const UNKNOWN_SEX: &str = "unknown";
/// Keys of the affected distribution.
pub const AFFECTED: &str = "yes";
pub const NOT_AFFECTED: &str = "no";

/// Attribute snapshot of a node.
pub type Attributes = IndexMap<String, serde_json::Value>;

/// Map from value to fraction of the observing samples.
pub type Distribution = IndexMap<String, f64>;

/// Share of one HPO term among the affected phenotypes.
#[derive(serde::Serialize, Debug, Clone, PartialEq)]
pub struct HpoShare {
    /// Fraction of affected phenotypes carrying the term.
    pub percentage: f64,
    /// Term id.
    pub id: String,
    pub label: String,
    pub description: Option<String>,
}

/// Search result record for one variant.
#[serde_with::skip_serializing_none]
#[derive(serde::Serialize, Debug, Clone, PartialEq, Default)]
pub struct CohortStat {
    /// 1-based position in the result list.
    pub counter: usize,
    pub variant: Option<Attributes>,
    pub gene: Option<Attributes>,
    pub observed_in: u64,
    pub total_samples: u64,
    pub observed_perc: f64,
    pub sex_distribution: Distribution,
    pub affected_distribution: Distribution,
    pub hpo_distribution: IndexMap<String, HpoShare>,
    pub geo_distribution: Distribution,
    /// Number of phenotypes in which the variant was confirmed.
    pub confirmed: u64,
}
