//! Data structures for the property graph that cohort queries run against.

use indexmap::IndexMap;

/// Internal identity of a node in the graph store.
///
/// The ordering of node identities is the ordering used for deterministic
/// pagination of search results.
#[derive(
    serde::Serialize,
    serde::Deserialize,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Clone,
    Copy,
    Debug,
    Default,
    derive_new::new,
)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Node labels of the cohort graph.
#[derive(
    serde::Serialize,
    serde::Deserialize,
    PartialEq,
    Eq,
    Hash,
    Clone,
    Copy,
    Debug,
    strum::Display,
    strum::EnumString,
)]
pub enum NodeLabel {
    Variant,
    Gene,
    File,
    Dataset,
    Phenotype,
    TechnicalMetadata,
    GeoData,
    #[serde(rename = "HPO")]
    #[strum(serialize = "HPO")]
    Hpo,
}

/// Relationship types of the cohort graph.
#[derive(
    serde::Serialize,
    serde::Deserialize,
    PartialEq,
    Eq,
    Hash,
    Clone,
    Copy,
    Debug,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RelType {
    /// `(Variant)-[:OBSERVED_IN]->(File)`
    ObservedIn,
    /// `(Variant)-[:LOCATED_IN]->(Gene)`
    LocatedIn,
    /// `(Dataset)-[:CONTAINS]->(File)`
    Contains,
    /// `(Dataset)-[:IS_DESCRIBED_BY]->(Phenotype|TechnicalMetadata)`
    IsDescribedBy,
    /// `(Phenotype)-[:DESCRIBED_BY]->(HPO)`
    DescribedBy,
    /// `(Phenotype)-[:BIRTH_PLACE]->(GeoData)`
    BirthPlace,
    /// `(HPO)-[:GENERALIZED_BY]->(HPO)`, from specific to broader term.
    GeneralizedBy,
    /// `(Variant)-[:CONFIRMED_IN]->(Phenotype)`
    ConfirmedIn,
}

/// Direction of an edge traversal relative to the node the traversal starts at.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub enum Direction {
    Outgoing,
    Incoming,
}

/// A node returned by the graph store, with its attributes.
#[derive(serde::Serialize, serde::Deserialize, PartialEq, Clone, Debug)]
pub struct Node {
    /// Internal identity.
    pub id: NodeId,
    /// The node's label.
    pub label: NodeLabel,
    /// Attributes of the node.
    #[serde(default)]
    pub properties: IndexMap<String, serde_json::Value>,
}

impl Node {
    /// Return string attribute `key`, if set and a string.
    pub fn str_prop(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(|value| value.as_str())
    }

    /// Return boolean attribute `key`, `false` if missing or not a boolean.
    pub fn flag(&self, key: &str) -> bool {
        self.properties
            .get(key)
            .and_then(|value| value.as_bool())
            .unwrap_or(false)
    }
}

/// A scalar (or list) value bound as a query parameter.
#[derive(serde::Serialize, serde::Deserialize, PartialEq, Clone, Debug)]
#[serde(untagged)]
pub enum Literal {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    StrList(Vec<String>),
}

impl Literal {
    /// Convert a scalar JSON value into a `Literal`.
    ///
    /// Returns `None` for `null`, arrays and objects.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(Literal::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Literal::Int)
                .or_else(|| n.as_f64().map(Literal::Float)),
            serde_json::Value::String(s) => Some(Literal::Str(s.clone())),
            serde_json::Value::Null
            | serde_json::Value::Array(_)
            | serde_json::Value::Object(_) => None,
        }
    }

    /// Interpret the literal as an integer; integer strings are accepted.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Literal::Int(i) => Some(*i),
            Literal::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Whether the attribute value `value` equals this literal.
    ///
    /// Numbers compare numerically, everything else compares by type and value.
    pub fn matches(&self, value: &serde_json::Value) -> bool {
        match (self, value) {
            (Literal::Bool(lhs), serde_json::Value::Bool(rhs)) => lhs == rhs,
            (Literal::Int(lhs), serde_json::Value::Number(rhs)) => {
                rhs.as_f64() == Some(*lhs as f64)
            }
            (Literal::Float(lhs), serde_json::Value::Number(rhs)) => rhs.as_f64() == Some(*lhs),
            (Literal::Str(lhs), serde_json::Value::String(rhs)) => lhs == rhs,
            (Literal::StrList(lhs), serde_json::Value::String(rhs)) => lhs.contains(rhs),
            _ => false,
        }
    }
}

impl From<&str> for Literal {
    fn from(value: &str) -> Self {
        Literal::Str(value.to_owned())
    }
}

impl From<i64> for Literal {
    fn from(value: i64) -> Self {
        Literal::Int(value)
    }
}

/// One raw row as returned by the graph store for a candidate variant.
#[derive(PartialEq, Eq, Clone, Debug, Default)]
pub struct ResultRow {
    /// The variant node.
    pub variant: NodeId,
    /// The gene node, if joined and present.
    pub gene: Option<NodeId>,
    /// Number of distinct files observing the variant.
    pub observed_in: u64,
    /// Distinct phenotypes describing the observing datasets.
    pub phenotype_distribution: Vec<NodeId>,
    /// Macroarea of the birth place, one entry per matched row.
    pub geo_distribution: Vec<String>,
}
