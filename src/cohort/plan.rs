//! Query plans for the cohort search and their construction from filters.
//!
//! A `QueryPlan` is an ordered list of typed `Clause`s.  Every value that
//! originates from the request is carried as a `BoundParam`; the pattern
//! structure itself only consists of labels, relationship types, variables
//! and attribute names chosen by the builder.
//!
//! The shape of the plan depends on which filter dimensions are populated:
//! constrained dimensions are joined with mandatory matches, unconstrained
//! ones with optional matches (or not at all) so that they never drop
//! variants.

use indexmap::IndexMap;
use itertools::Itertools;

use super::{
    conf::SearchConf,
    hpo::TermSet,
    schema::{
        data::{Direction, Literal, NodeLabel, RelType},
        query::{Dimension, NormalizedFilters},
    },
};

/// Variables bound by cohort query patterns.
#[derive(
    serde::Serialize,
    enum_map::Enum,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Clone,
    Copy,
    Debug,
    strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Var {
    Variant,
    Gene,
    File,
    Dataset,
    Technical,
    Phenotype,
    Geo,
}

/// A named query parameter with its value.
#[derive(serde::Serialize, PartialEq, Clone, Debug)]
pub struct BoundParam {
    /// Parameter name, referenced as `$name` in rendered queries.
    pub name: String,
    /// Parameter value.
    pub value: Literal,
}

/// Equality constraint of a node attribute to a parameter.
#[derive(serde::Serialize, PartialEq, Clone, Debug)]
pub struct PropertyConstraint {
    pub attribute: String,
    pub param: BoundParam,
}

/// Node part of a pattern.
///
/// A node without label refers to an already bound variable.
#[derive(serde::Serialize, PartialEq, Clone, Debug)]
pub struct NodePattern {
    pub var: Option<Var>,
    pub label: Option<NodeLabel>,
    pub constraints: Vec<PropertyConstraint>,
}

impl NodePattern {
    /// Reference to the bound variable `var`.
    pub fn bound(var: Var) -> Self {
        Self {
            var: Some(var),
            label: None,
            constraints: Vec::new(),
        }
    }

    /// New variable `var` with `label` and no constraints.
    pub fn labeled(var: Var, label: NodeLabel) -> Self {
        Self {
            var: Some(var),
            label: Some(label),
            constraints: Vec::new(),
        }
    }
}

/// One relationship step of a pattern.
#[derive(serde::Serialize, PartialEq, Clone, Debug)]
pub struct Hop {
    pub rel: RelType,
    #[serde(skip)]
    pub direction: Direction,
    pub node: NodePattern,
}

/// A path pattern: a start node followed by relationship steps.
#[derive(serde::Serialize, PartialEq, Clone, Debug)]
pub struct Pattern {
    pub start: NodePattern,
    pub hops: Vec<Hop>,
}

impl Pattern {
    pub fn new(start: NodePattern) -> Self {
        Self {
            start,
            hops: Vec::new(),
        }
    }

    /// Append an outgoing step `-[:rel]->(node)`.
    pub fn out(mut self, rel: RelType, node: NodePattern) -> Self {
        self.hops.push(Hop {
            rel,
            direction: Direction::Outgoing,
            node,
        });
        self
    }

    /// Append an incoming step `<-[:rel]-(node)`.
    pub fn inc(mut self, rel: RelType, node: NodePattern) -> Self {
        self.hops.push(Hop {
            rel,
            direction: Direction::Incoming,
            node,
        });
        self
    }

    /// All node patterns, start first.
    pub fn nodes(&self) -> impl Iterator<Item = &NodePattern> {
        std::iter::once(&self.start).chain(self.hops.iter().map(|hop| &hop.node))
    }

    /// Variables mentioned by the pattern, in order.
    pub fn vars(&self) -> impl Iterator<Item = Var> + '_ {
        self.nodes().filter_map(|node| node.var)
    }
}

/// Expression of a projected column.
#[derive(serde::Serialize, PartialEq, Eq, Clone, Copy, Debug)]
pub enum Expr {
    /// The node bound to the variable; grouping key.
    Node(Var),
    /// Number of distinct non-null nodes bound to the variable.
    CountDistinct(Var),
    /// Distinct non-null nodes bound to the variable.
    CollectDistinct(Var),
    /// Non-null attribute values of the variable, one per row.
    Collect(Var, &'static str),
}

/// Output columns of the cohort search projection.
#[derive(serde::Serialize, PartialEq, Eq, Hash, Clone, Copy, Debug, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Column {
    Variant,
    Gene,
    ObservedIn,
    PhenotypeDistribution,
    GeoDistribution,
}

/// One projected column.
#[derive(serde::Serialize, PartialEq, Eq, Clone, Copy, Debug)]
pub struct Projection {
    pub expr: Expr,
    pub column: Column,
}

/// Sort direction.
#[derive(serde::Serialize, PartialEq, Eq, Clone, Copy, Debug)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// One step of a query plan.
#[derive(serde::Serialize, PartialEq, Clone, Debug)]
pub enum Clause {
    /// Rows without a match for the pattern are dropped.
    MandatoryMatch(Pattern),
    /// Rows without a match keep going with the new variables unbound.
    OptionalMatch(Pattern),
    /// Keep rows with `var.field_low >= low AND var.field_high <= high`.
    RangePredicate {
        var: Var,
        field_low: &'static str,
        field_high: &'static str,
        low: BoundParam,
        high: BoundParam,
    },
    /// Keep rows where the phenotype bound to `var` has an annotated term
    /// whose generalized set intersects `terms`.
    SharedAncestor { var: Var, terms: BoundParam },
    /// Keep at most this many rows.
    Limit(usize),
    /// Group by the node columns and aggregate the others.
    Project(Vec<Projection>),
    /// Order by the internal identity of the node bound to `var`.
    OrderBy { var: Var, direction: SortDirection },
}

impl Clause {
    /// The parameters bound by this clause.
    pub fn params(&self) -> Vec<&BoundParam> {
        match self {
            Clause::MandatoryMatch(pattern) | Clause::OptionalMatch(pattern) => pattern
                .nodes()
                .flat_map(|node| node.constraints.iter().map(|c| &c.param))
                .collect(),
            Clause::RangePredicate { low, high, .. } => vec![low, high],
            Clause::SharedAncestor { terms, .. } => vec![terms],
            Clause::Limit(_) | Clause::Project(_) | Clause::OrderBy { .. } => Vec::new(),
        }
    }
}

/// A query as rendered for a Cypher-speaking property-graph store.
#[derive(serde::Serialize, PartialEq, Clone, Debug)]
pub struct CypherQuery {
    /// Query text with `$name` placeholders.
    pub text: String,
    /// Values of the placeholders.
    pub params: IndexMap<String, Literal>,
}

/// Ordered list of clauses to be executed by a `GraphStore`.
#[derive(serde::Serialize, PartialEq, Clone, Debug, Default)]
pub struct QueryPlan {
    pub clauses: Vec<Clause>,
}

impl QueryPlan {
    /// All bound parameters of the plan, by name.
    pub fn params(&self) -> IndexMap<String, Literal> {
        self.clauses
            .iter()
            .flat_map(|clause| clause.params())
            .map(|param| (param.name.clone(), param.value.clone()))
            .collect()
    }

    /// Render the plan as parameterized Cypher.
    pub fn to_cypher(&self) -> CypherQuery {
        let mut parts = Vec::new();
        let mut bound: Vec<Var> = Vec::new();
        let mut projected = false;

        for (i, clause) in self.clauses.iter().enumerate() {
            let after_match = matches!(
                i.checked_sub(1).map(|j| &self.clauses[j]),
                Some(Clause::MandatoryMatch(_))
            );
            match clause {
                Clause::MandatoryMatch(pattern) | Clause::OptionalMatch(pattern) => {
                    let keyword = if matches!(clause, Clause::MandatoryMatch(_)) {
                        "MATCH"
                    } else {
                        "OPTIONAL MATCH"
                    };
                    parts.push(format!("{} {}", keyword, render_pattern(pattern)));
                    for var in pattern.vars() {
                        if !bound.contains(&var) {
                            bound.push(var);
                        }
                    }
                }
                Clause::RangePredicate {
                    var,
                    field_low,
                    field_high,
                    low,
                    high,
                } => {
                    if !after_match {
                        parts.push(with_vars(&bound));
                    }
                    parts.push(format!(
                        "WHERE {var}.{field_low} >= ${} AND {var}.{field_high} <= ${}",
                        low.name, high.name
                    ));
                }
                Clause::SharedAncestor { var, terms } => {
                    // Never attached to the preceding match; a WHERE after an
                    // OPTIONAL MATCH would only constrain the optional part.
                    parts.push(with_vars(&bound));
                    parts.push(format!(
                        "WHERE EXISTS {{ MATCH ({var})-[:{}]->(:{})-[:{}*0..]->(shared:{}) \
                         WHERE shared.hpo_id IN ${} }}",
                        RelType::DescribedBy,
                        NodeLabel::Hpo,
                        RelType::GeneralizedBy,
                        NodeLabel::Hpo,
                        terms.name
                    ));
                }
                Clause::Limit(n) => {
                    if !projected {
                        parts.push(with_vars(&bound));
                    }
                    parts.push(format!("LIMIT {n}"));
                }
                Clause::Project(projections) => {
                    projected = true;
                    parts.push(format!(
                        "RETURN {}",
                        projections.iter().map(render_projection).join(", ")
                    ));
                }
                Clause::OrderBy { var, direction } => {
                    let direction = match direction {
                        SortDirection::Ascending => "ASC",
                        SortDirection::Descending => "DESC",
                    };
                    parts.push(format!("ORDER BY id({var}) {direction}"));
                }
            }
        }

        CypherQuery {
            text: parts.join(" "),
            params: self.params(),
        }
    }
}

fn with_vars(bound: &[Var]) -> String {
    format!("WITH {}", bound.iter().join(", "))
}

fn render_node(node: &NodePattern) -> String {
    let mut result = String::from("(");
    if let Some(var) = node.var {
        result.push_str(&var.to_string());
    }
    if let Some(label) = node.label {
        result.push_str(&format!(":{label}"));
    }
    if !node.constraints.is_empty() {
        result.push_str(&format!(
            " {{{}}}",
            node.constraints
                .iter()
                .map(|c| format!("{}: ${}", c.attribute, c.param.name))
                .join(", ")
        ));
    }
    result.push(')');
    result
}

fn render_pattern(pattern: &Pattern) -> String {
    let mut result = render_node(&pattern.start);
    for hop in &pattern.hops {
        match hop.direction {
            Direction::Outgoing => result.push_str(&format!("-[:{}]->", hop.rel)),
            Direction::Incoming => result.push_str(&format!("<-[:{}]-", hop.rel)),
        }
        result.push_str(&render_node(&hop.node));
    }
    result
}

fn render_projection(projection: &Projection) -> String {
    let column = projection.column;
    match projection.expr {
        Expr::Node(var) => var.to_string(),
        Expr::CountDistinct(var) => format!("count(DISTINCT {var}) AS {column}"),
        Expr::CollectDistinct(var) => format!("collect(DISTINCT {var}) AS {column}"),
        Expr::Collect(var, attribute) => format!("collect({var}.{attribute}) AS {column}"),
    }
}

/// Builds the cohort search plan for one set of normalized filters.
pub struct PlanBuilder {
    soft_limit: usize,
    hard_limit: usize,
    next_param: usize,
    clauses: Vec<Clause>,
}

impl PlanBuilder {
    pub fn new(conf: &SearchConf) -> Self {
        Self {
            soft_limit: conf.soft_limit,
            hard_limit: conf.hard_limit,
            next_param: 0,
            clauses: Vec::new(),
        }
    }

    fn param(&mut self, value: Literal) -> BoundParam {
        let name = format!("p{}", self.next_param);
        self.next_param += 1;
        BoundParam { name, value }
    }

    /// New variable `var` with `label`, constrained by the filters of `dim`.
    fn node(
        &mut self,
        var: Var,
        label: NodeLabel,
        normalized: &NormalizedFilters,
        dim: Dimension,
    ) -> NodePattern {
        let constraints = normalized
            .filters
            .group(dim)
            .iter()
            .map(|(attribute, value)| PropertyConstraint {
                attribute: attribute.clone(),
                param: self.param(value.clone()),
            })
            .collect();
        NodePattern {
            var: Some(var),
            label: Some(label),
            constraints,
        }
    }

    fn join(&mut self, mandatory: bool, pattern: Pattern) {
        self.clauses.push(if mandatory {
            Clause::MandatoryMatch(pattern)
        } else {
            Clause::OptionalMatch(pattern)
        });
    }

    /// Build the plan.
    ///
    /// `hpo_scope` is the generalized set of the HPO filter term; it is only
    /// used when the HPO dimension is active (an unresolved term matches
    /// nothing).
    pub fn build(mut self, normalized: &NormalizedFilters, hpo_scope: Option<&TermSet>) -> QueryPlan {
        let filters = &normalized.filters;
        let gene_filtered = filters.is_active(Dimension::Gene);

        let variant = self.node(Var::Variant, NodeLabel::Variant, normalized, Dimension::Variant);
        self.join(true, Pattern::new(variant));

        // A constrained gene join goes first to cut down candidates before the soft limit.
        if gene_filtered {
            let gene = self.node(Var::Gene, NodeLabel::Gene, normalized, Dimension::Gene);
            self.join(
                true,
                Pattern::new(NodePattern::bound(Var::Variant)).out(RelType::LocatedIn, gene),
            );
        }

        if let Some(range) = normalized.range {
            let low = self.param(Literal::Int(range.start));
            let high = self.param(Literal::Int(range.end));
            self.clauses.push(Clause::RangePredicate {
                var: Var::Variant,
                field_low: "start",
                field_high: "end",
                low,
                high,
            });
        }

        self.clauses.push(Clause::Limit(self.soft_limit));

        self.join(
            true,
            Pattern::new(NodePattern::bound(Var::Variant))
                .out(RelType::ObservedIn, NodePattern::labeled(Var::File, NodeLabel::File)),
        );

        if filters.is_active(Dimension::Technical) {
            let technical = self.node(
                Var::Technical,
                NodeLabel::TechnicalMetadata,
                normalized,
                Dimension::Technical,
            );
            self.join(
                true,
                Pattern::new(NodePattern::bound(Var::File))
                    .inc(
                        RelType::Contains,
                        NodePattern::labeled(Var::Dataset, NodeLabel::Dataset),
                    )
                    .out(RelType::IsDescribedBy, technical),
            );
        }

        let phenotype_constrained = filters.is_active(Dimension::Phenotype)
            || filters.is_active(Dimension::Geodata)
            || filters.is_active(Dimension::Hpo);
        let phenotype = self.node(
            Var::Phenotype,
            NodeLabel::Phenotype,
            normalized,
            Dimension::Phenotype,
        );
        self.join(
            phenotype_constrained,
            Pattern::new(NodePattern::bound(Var::File))
                .inc(
                    RelType::Contains,
                    NodePattern::labeled(Var::Dataset, NodeLabel::Dataset),
                )
                .out(RelType::IsDescribedBy, phenotype),
        );

        if !gene_filtered {
            self.join(
                false,
                Pattern::new(NodePattern::bound(Var::Variant))
                    .out(RelType::LocatedIn, NodePattern::labeled(Var::Gene, NodeLabel::Gene)),
            );
        }

        if filters.is_active(Dimension::Hpo) {
            let terms = hpo_scope
                .map(|scope| scope.iter().cloned().collect())
                .unwrap_or_default();
            let terms = self.param(Literal::StrList(terms));
            self.clauses.push(Clause::SharedAncestor {
                var: Var::Phenotype,
                terms,
            });
        }

        let geo = self.node(Var::Geo, NodeLabel::GeoData, normalized, Dimension::Geodata);
        self.join(
            filters.is_active(Dimension::Geodata),
            Pattern::new(NodePattern::bound(Var::Phenotype)).out(RelType::BirthPlace, geo),
        );

        self.clauses.push(Clause::Project(vec![
            Projection {
                expr: Expr::Node(Var::Variant),
                column: Column::Variant,
            },
            Projection {
                expr: Expr::Node(Var::Gene),
                column: Column::Gene,
            },
            Projection {
                expr: Expr::CountDistinct(Var::File),
                column: Column::ObservedIn,
            },
            Projection {
                expr: Expr::CollectDistinct(Var::Phenotype),
                column: Column::PhenotypeDistribution,
            },
            Projection {
                expr: Expr::Collect(Var::Geo, "macroarea"),
                column: Column::GeoDistribution,
            },
        ]));
        self.clauses.push(Clause::OrderBy {
            var: Var::Variant,
            direction: SortDirection::Ascending,
        });
        self.clauses.push(Clause::Limit(self.hard_limit));

        QueryPlan {
            clauses: self.clauses,
        }
    }
}
