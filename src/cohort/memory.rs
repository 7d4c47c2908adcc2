//! In-memory property graph implementing all store interfaces.
//!
//! The graph is loaded from a JSON snapshot of the form
//!
//! ```json
//! {
//!   "nodes": [{"id": 1, "label": "Variant", "properties": {"chromosome": "1"}}],
//!   "edges": [{"from": 1, "rel": "OBSERVED_IN", "to": 2}]
//! }
//! ```
//!
//! and executes `QueryPlan`s with the same semantics as a Cypher store would.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::Read;
use std::path::Path;

use enum_map::EnumMap;
use indexmap::IndexMap;
use itertools::Itertools;

use crate::err::StoreError;

use super::{
    plan::{Clause, Column, Expr, NodePattern, Pattern, Projection, QueryPlan, SortDirection, Var},
    schema::data::{Direction, Literal, Node, NodeId, NodeLabel, RelType, ResultRow},
    store::{GraphStore, OntologyStore, OntologyTerm, PhenotypeTerms, SampleUniverse},
    terms::{TermField, TermQuery},
};

/// One edge of a graph snapshot.
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub from: NodeId,
    pub rel: RelType,
    pub to: NodeId,
}

/// Serialized form of a `MemoryGraph`.
#[derive(serde::Serialize, serde::Deserialize, Debug, Default, Clone, PartialEq)]
pub struct Snapshot {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

/// Binding state of a query variable in one intermediate row.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
enum Slot {
    #[default]
    Unbound,
    /// Bound to nothing by an optional match without result.
    Null,
    Node(NodeId),
}

type Binding = EnumMap<Var, Slot>;

/// Intermediate state while executing a plan.
enum Rows {
    Bindings(Vec<Binding>),
    Projected(Vec<ResultRow>),
}

/// Property graph held in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryGraph {
    nodes: BTreeMap<NodeId, Node>,
    outgoing: HashMap<(NodeId, RelType), Vec<NodeId>>,
    incoming: HashMap<(NodeId, RelType), Vec<NodeId>>,
    hpo_ids: HashMap<String, NodeId>,
    edge_count: usize,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from a snapshot, rejecting duplicate ids and dangling edges.
    pub fn from_snapshot(snapshot: Snapshot) -> Result<Self, StoreError> {
        let mut graph = Self::new();
        for node in snapshot.nodes {
            graph.insert_node(node)?;
        }
        for edge in snapshot.edges {
            graph.add_edge(edge.from, edge.rel, edge.to)?;
        }
        Ok(graph)
    }

    /// Read a JSON snapshot from `reader`.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, StoreError> {
        Self::from_snapshot(serde_json::from_reader(reader)?)
    }

    /// Read a JSON snapshot from the file at `path`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let file = std::fs::File::open(path.as_ref())?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    /// Insert `node`; its id must not be taken yet.
    pub fn insert_node(&mut self, node: Node) -> Result<NodeId, StoreError> {
        let id = node.id;
        if self.nodes.contains_key(&id) {
            return Err(StoreError::DuplicateNode(id));
        }
        self.index(node);
        Ok(id)
    }

    fn index(&mut self, node: Node) {
        if node.label == NodeLabel::Hpo {
            if let Some(term_id) = node.str_prop("hpo_id") {
                self.hpo_ids.insert(term_id.to_string(), node.id);
            }
        }
        self.nodes.insert(node.id, node);
    }

    /// Add a node with the next free id.
    pub fn add_node<K, V, I>(&mut self, label: NodeLabel, properties: I) -> NodeId
    where
        K: Into<String>,
        V: Into<serde_json::Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        let id = NodeId(self.nodes.keys().next_back().map(|id| id.0 + 1).unwrap_or(1));
        let node = Node {
            id,
            label,
            properties: properties
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        };
        self.index(node);
        id
    }

    /// Add the edge `(from)-[:rel]->(to)`; both nodes must exist.
    pub fn add_edge(&mut self, from: NodeId, rel: RelType, to: NodeId) -> Result<(), StoreError> {
        for id in [from, to] {
            if !self.nodes.contains_key(&id) {
                return Err(StoreError::DanglingEdge(id));
            }
        }
        self.outgoing.entry((from, rel)).or_default().push(to);
        self.incoming.entry((to, rel)).or_default().push(from);
        self.edge_count += 1;
        Ok(())
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    fn neighbors(&self, id: NodeId, rel: RelType, direction: Direction) -> &[NodeId] {
        let adjacency = match direction {
            Direction::Outgoing => &self.outgoing,
            Direction::Incoming => &self.incoming,
        };
        adjacency
            .get(&(id, rel))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Whether node `id` satisfies the label and constraints of `pattern`.
    fn accepts(&self, pattern: &NodePattern, id: NodeId) -> bool {
        let Some(node) = self.nodes.get(&id) else {
            return false;
        };
        if pattern.label.is_some_and(|label| label != node.label) {
            return false;
        }
        pattern.constraints.iter().all(|constraint| {
            node.properties
                .get(&constraint.attribute)
                .is_some_and(|value| constraint.param.value.matches(value))
        })
    }

    /// Those of `from` that may be bound to `pattern` in `row`.
    fn candidates(&self, pattern: &NodePattern, row: &Binding, from: &[NodeId]) -> Vec<NodeId> {
        let bound = pattern.var.map(|var| row[var]).unwrap_or_default();
        match bound {
            Slot::Null => Vec::new(),
            Slot::Node(id) => {
                if from.contains(&id) && self.accepts(pattern, id) {
                    vec![id]
                } else {
                    Vec::new()
                }
            }
            Slot::Unbound => from
                .iter()
                .copied()
                .filter(|id| self.accepts(pattern, *id))
                .collect(),
        }
    }

    /// All extensions of `row` matching `pattern`.
    fn expand(&self, pattern: &Pattern, row: &Binding) -> Vec<Binding> {
        let all = match pattern.start.var.map(|var| row[var]) {
            Some(Slot::Node(id)) => vec![id],
            Some(Slot::Null) => return Vec::new(),
            _ => self.nodes.keys().copied().collect(),
        };
        let mut partial = self
            .candidates(&pattern.start, row, &all)
            .into_iter()
            .map(|id| (bind(row, pattern.start.var, id), id))
            .collect::<Vec<_>>();

        for hop in &pattern.hops {
            partial = partial
                .into_iter()
                .flat_map(|(row, current)| {
                    let neighbors = self.neighbors(current, hop.rel, hop.direction);
                    self.candidates(&hop.node, &row, neighbors)
                        .into_iter()
                        .unique()
                        .map(move |id| (bind(&row, hop.node.var, id), id))
                        .collect::<Vec<_>>()
                })
                .collect();
        }

        partial.into_iter().map(|(row, _)| row).collect()
    }

    fn node_int(&self, slot: Slot, field: &str) -> Option<i64> {
        let Slot::Node(id) = slot else {
            return None;
        };
        let value = self.nodes.get(&id)?.properties.get(field)?;
        Literal::from_json(value)?.as_int()
    }

    /// Raw HPO term ids annotated to `phenotype`.
    fn annotated_terms(&self, phenotype: NodeId) -> Vec<String> {
        self.neighbors(phenotype, RelType::DescribedBy, Direction::Outgoing)
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .filter_map(|node| node.str_prop("hpo_id"))
            .map(str::to_string)
            .collect()
    }

    fn project(&self, rows: &[Binding], projections: &[Projection]) -> Vec<ResultRow> {
        let keys = projections
            .iter()
            .filter_map(|projection| match projection.expr {
                Expr::Node(var) => Some(var),
                _ => None,
            })
            .collect::<Vec<_>>();

        let mut groups: IndexMap<Vec<Slot>, Vec<&Binding>> = IndexMap::new();
        for row in rows {
            let key = keys.iter().map(|var| row[*var]).collect::<Vec<_>>();
            groups.entry(key).or_default().push(row);
        }

        groups
            .into_values()
            .filter_map(|rows| {
                let mut result = ResultRow::default();
                let mut has_variant = false;
                for projection in projections {
                    match (projection.expr, projection.column) {
                        (Expr::Node(var), Column::Variant) => {
                            if let Slot::Node(id) = rows[0][var] {
                                result.variant = id;
                                has_variant = true;
                            }
                        }
                        (Expr::Node(var), Column::Gene) => {
                            result.gene = match rows[0][var] {
                                Slot::Node(id) => Some(id),
                                _ => None,
                            };
                        }
                        (Expr::CountDistinct(var), Column::ObservedIn) => {
                            result.observed_in =
                                distinct_nodes(&rows, var).len() as u64;
                        }
                        (Expr::CollectDistinct(var), Column::PhenotypeDistribution) => {
                            result.phenotype_distribution = distinct_nodes(&rows, var);
                        }
                        (Expr::Collect(var, attribute), Column::GeoDistribution) => {
                            result.geo_distribution = rows
                                .iter()
                                .filter_map(|row| match row[var] {
                                    Slot::Node(id) => self.nodes.get(&id),
                                    _ => None,
                                })
                                .filter_map(|node| node.str_prop(attribute))
                                .map(str::to_string)
                                .collect();
                        }
                        (expr, column) => {
                            tracing::warn!("unsupported projection {:?} AS {}", expr, column);
                        }
                    }
                }
                has_variant.then_some(result)
            })
            .collect()
    }
}

fn bind(row: &Binding, var: Option<Var>, id: NodeId) -> Binding {
    let mut row = row.clone();
    if let Some(var) = var {
        row[var] = Slot::Node(id);
    }
    row
}

fn distinct_nodes(rows: &[&Binding], var: Var) -> Vec<NodeId> {
    rows.iter()
        .filter_map(|row| match row[var] {
            Slot::Node(id) => Some(id),
            _ => None,
        })
        .unique()
        .collect()
}

impl GraphStore for MemoryGraph {
    fn execute(
        &self,
        plan: &QueryPlan,
        phenotype_terms: &mut dyn PhenotypeTerms,
    ) -> Result<Vec<ResultRow>, StoreError> {
        let mut state = Rows::Bindings(vec![Binding::default()]);

        for clause in &plan.clauses {
            state = match (state, clause) {
                (Rows::Bindings(rows), Clause::MandatoryMatch(pattern)) => Rows::Bindings(
                    rows.iter()
                        .flat_map(|row| self.expand(pattern, row))
                        .collect(),
                ),
                (Rows::Bindings(rows), Clause::OptionalMatch(pattern)) => Rows::Bindings(
                    rows.iter()
                        .flat_map(|row| {
                            let expanded = self.expand(pattern, row);
                            if expanded.is_empty() {
                                let mut row = row.clone();
                                for var in pattern.vars() {
                                    if row[var] == Slot::Unbound {
                                        row[var] = Slot::Null;
                                    }
                                }
                                vec![row]
                            } else {
                                expanded
                            }
                        })
                        .collect(),
                ),
                (
                    Rows::Bindings(rows),
                    Clause::RangePredicate {
                        var,
                        field_low,
                        field_high,
                        low,
                        high,
                    },
                ) => {
                    let (low, high) = (low.value.as_int(), high.value.as_int());
                    Rows::Bindings(
                        rows.into_iter()
                            .filter(|row| {
                                let start = self.node_int(row[*var], field_low);
                                let end = self.node_int(row[*var], field_high);
                                matches!((start, end, low, high), (Some(s), Some(e), Some(l), Some(h)) if s >= l && e <= h)
                            })
                            .collect(),
                    )
                }
                (Rows::Bindings(rows), Clause::SharedAncestor { var, terms }) => {
                    let scope = match &terms.value {
                        Literal::StrList(terms) => terms.iter().collect::<BTreeSet<_>>(),
                        Literal::Str(term) => BTreeSet::from([term]),
                        _ => BTreeSet::new(),
                    };
                    let mut kept = Vec::new();
                    for row in rows {
                        let Slot::Node(phenotype) = row[*var] else {
                            continue;
                        };
                        let raw = self.annotated_terms(phenotype);
                        let visible = phenotype_terms.visible_terms_of(phenotype, &raw)?;
                        if visible.iter().any(|term| scope.contains(term)) {
                            kept.push(row);
                        }
                    }
                    Rows::Bindings(kept)
                }
                (Rows::Bindings(mut rows), Clause::Limit(n)) => {
                    rows.truncate(*n);
                    Rows::Bindings(rows)
                }
                (Rows::Projected(mut rows), Clause::Limit(n)) => {
                    rows.truncate(*n);
                    Rows::Projected(rows)
                }
                (Rows::Bindings(rows), Clause::Project(projections)) => {
                    Rows::Projected(self.project(&rows, projections))
                }
                (Rows::Projected(mut rows), Clause::OrderBy { var, direction }) => {
                    match var {
                        Var::Gene => rows.sort_by_key(|row| row.gene),
                        _ => rows.sort_by_key(|row| row.variant),
                    }
                    if *direction == SortDirection::Descending {
                        rows.reverse();
                    }
                    Rows::Projected(rows)
                }
                (_, clause) => {
                    return Err(StoreError::Backend(format!(
                        "clause out of place: {:?}",
                        clause
                    )))
                }
            };
        }

        match state {
            Rows::Projected(rows) => Ok(rows),
            Rows::Bindings(_) => Err(StoreError::Backend(
                "query plan has no projection".to_string(),
            )),
        }
    }

    fn node(&self, id: NodeId) -> Result<Option<Node>, StoreError> {
        Ok(self.nodes.get(&id).cloned())
    }

    fn related(
        &self,
        id: NodeId,
        rel: RelType,
        direction: Direction,
    ) -> Result<Vec<NodeId>, StoreError> {
        Ok(self.neighbors(id, rel, direction).to_vec())
    }
}

impl MemoryGraph {
    fn ontology_term(&self, node: &Node) -> Option<OntologyTerm> {
        let term_id = node.str_prop("hpo_id")?;
        let parents = self
            .neighbors(node.id, RelType::GeneralizedBy, Direction::Outgoing)
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .filter_map(|parent| parent.str_prop("hpo_id"))
            .map(str::to_string)
            .collect();
        Some(OntologyTerm::new(
            term_id.to_string(),
            node.str_prop("label").unwrap_or_default().to_string(),
            node.str_prop("description").map(str::to_string),
            node.flag("hide_node"),
            parents,
        ))
    }
}

impl OntologyStore for MemoryGraph {
    fn term(&self, term_id: &str) -> Result<Option<OntologyTerm>, StoreError> {
        Ok(self
            .hpo_ids
            .get(term_id)
            .and_then(|id| self.nodes.get(id))
            .and_then(|node| self.ontology_term(node)))
    }

    fn find_terms(&self, query: &TermQuery) -> Result<Vec<OntologyTerm>, StoreError> {
        let field = match query.field {
            TermField::Id => "hpo_id",
            TermField::Label => "label",
        };
        Ok(self
            .nodes
            .values()
            .filter(|node| node.label == NodeLabel::Hpo)
            .filter(|node| node.str_prop(field).is_some_and(|value| query.matches(value)))
            .filter_map(|node| self.ontology_term(node))
            .sorted_by(|a, b| b.term_id.cmp(&a.term_id))
            .take(query.limit)
            .collect())
    }
}

impl SampleUniverse for MemoryGraph {
    fn total_samples(&self) -> Result<u64, StoreError> {
        Ok(self
            .nodes
            .values()
            .filter(|node| node.label == NodeLabel::File)
            .filter(|node| {
                self.neighbors(node.id, RelType::ObservedIn, Direction::Incoming)
                    .iter()
                    .any(|id| {
                        self.nodes
                            .get(id)
                            .is_some_and(|source| source.label == NodeLabel::Variant)
                    })
            })
            .count() as u64)
    }
}

#[cfg(test)]
pub(crate) mod test {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use crate::cohort::{
        conf::SearchConf,
        hpo::{GeneralizationCache, TermSet},
        plan::PlanBuilder,
        schema::query::{normalize, RawFilters},
        terms::term_query,
    };

    use super::*;

    /// Small cohort used across the engine tests.
    ///
    /// ```text
    /// v1 (snp, chr1:100-100, BRCA2)  observed in f1, f2
    /// v2 (del, chr1:200-210)         observed in f2
    /// v3 (snp, chr2:300-300, TP53)   observed in f3
    /// v4 (snp, chr2:400-400)         not observed
    ///
    /// d1 contains f1, described by p1 (female, sardinia, HP:C), SNP-array
    /// d2 contains f2, described by p2 (male, no birth place, HP:D), WGS
    /// d3 contains f3, no phenotype
    ///
    /// HP:ROOT (hidden) <- HP:A <- HP:C, HP:A <- HP:D
    /// v1 is confirmed in p1
    /// ```
    pub struct Cohort {
        pub graph: MemoryGraph,
        pub v: [NodeId; 4],
        pub p: [NodeId; 2],
    }

    pub fn cohort() -> Cohort {
        let mut g = MemoryGraph::new();

        let v1 = g.add_node(
            NodeLabel::Variant,
            [
                ("variant_type", json!("snp")),
                ("chromosome", json!("1")),
                ("start", json!(100)),
                ("end", json!(100)),
                ("ref", json!("A")),
                ("alt", json!("G")),
            ],
        );
        let v2 = g.add_node(
            NodeLabel::Variant,
            [
                ("variant_type", json!("del")),
                ("chromosome", json!("1")),
                ("start", json!(200)),
                ("end", json!(210)),
            ],
        );
        let v3 = g.add_node(
            NodeLabel::Variant,
            [
                ("variant_type", json!("snp")),
                ("chromosome", json!("2")),
                ("start", json!(300)),
                ("end", json!(300)),
            ],
        );
        let v4 = g.add_node(
            NodeLabel::Variant,
            [("variant_type", json!("snp")), ("chromosome", json!("2"))],
        );
        let brca2 = g.add_node(NodeLabel::Gene, [("geneName", "BRCA2")]);
        let tp53 = g.add_node(NodeLabel::Gene, [("geneName", "TP53")]);
        let f1 = g.add_node(NodeLabel::File, [("name", "f1.vcf")]);
        let f2 = g.add_node(NodeLabel::File, [("name", "f2.vcf")]);
        let f3 = g.add_node(NodeLabel::File, [("name", "f3.vcf")]);
        let d1 = g.add_node(NodeLabel::Dataset, [("name", "d1")]);
        let d2 = g.add_node(NodeLabel::Dataset, [("name", "d2")]);
        let d3 = g.add_node(NodeLabel::Dataset, [("name", "d3")]);
        let p1 = g.add_node(
            NodeLabel::Phenotype,
            [("name", "P1"), ("sex", "female"), ("uuid", "uuid-p1")],
        );
        let p2 = g.add_node(
            NodeLabel::Phenotype,
            [("name", "P2"), ("sex", "male"), ("uuid", "uuid-p2")],
        );
        let sardinia = g.add_node(NodeLabel::GeoData, [("macroarea", "sardinia")]);
        let array = g.add_node(NodeLabel::TechnicalMetadata, [("platform", "SNP-array")]);
        let wgs = g.add_node(NodeLabel::TechnicalMetadata, [("platform", "WGS")]);
        let root = g.add_node(
            NodeLabel::Hpo,
            [
                ("hpo_id", json!("HP:ROOT")),
                ("label", json!("All")),
                ("hide_node", json!(true)),
            ],
        );
        let a = g.add_node(
            NodeLabel::Hpo,
            [("hpo_id", json!("HP:A")), ("label", json!("Abnormality"))],
        );
        let c = g.add_node(
            NodeLabel::Hpo,
            [
                ("hpo_id", json!("HP:C")),
                ("label", json!("Cardiac")),
                ("description", json!("Heart trouble")),
            ],
        );
        let d = g.add_node(
            NodeLabel::Hpo,
            [("hpo_id", json!("HP:D")), ("label", json!("Dermal"))],
        );

        let edges = [
            (v1, RelType::LocatedIn, brca2),
            (v3, RelType::LocatedIn, tp53),
            (v1, RelType::ObservedIn, f1),
            (v1, RelType::ObservedIn, f2),
            (v2, RelType::ObservedIn, f2),
            (v3, RelType::ObservedIn, f3),
            (d1, RelType::Contains, f1),
            (d2, RelType::Contains, f2),
            (d3, RelType::Contains, f3),
            (d1, RelType::IsDescribedBy, p1),
            (d2, RelType::IsDescribedBy, p2),
            (d1, RelType::IsDescribedBy, array),
            (d2, RelType::IsDescribedBy, wgs),
            (p1, RelType::BirthPlace, sardinia),
            (p1, RelType::DescribedBy, c),
            (p2, RelType::DescribedBy, d),
            (a, RelType::GeneralizedBy, root),
            (c, RelType::GeneralizedBy, a),
            (d, RelType::GeneralizedBy, a),
            (v1, RelType::ConfirmedIn, p1),
        ];
        for (from, rel, to) in edges {
            g.add_edge(from, rel, to).unwrap();
        }

        Cohort {
            graph: g,
            v: [v1, v2, v3, v4],
            p: [p1, p2],
        }
    }

    fn run(graph: &MemoryGraph, request: serde_json::Value) -> Vec<ResultRow> {
        let raw: RawFilters = serde_json::from_value(request).unwrap();
        let normalized = normalize(&raw);
        let mut cache = GeneralizationCache::new(graph);
        let scope = normalized
            .filters
            .hpo_term()
            .map(|term_id| cache.ancestors_of(term_id).unwrap());
        let plan = PlanBuilder::new(&SearchConf::default()).build(&normalized, scope.as_deref());
        graph.execute(&plan, &mut cache).unwrap()
    }

    fn variants(rows: &[ResultRow]) -> Vec<NodeId> {
        rows.iter().map(|row| row.variant).collect()
    }

    #[test]
    fn no_filters_returns_observed_variants() {
        let Cohort { graph, v, p } = cohort();
        let rows = run(&graph, json!({}));

        assert_eq!(variants(&rows), vec![v[0], v[1], v[2]]);
        assert_eq!(rows[0].observed_in, 2);
        assert_eq!(rows[0].phenotype_distribution, vec![p[0], p[1]]);
        assert_eq!(rows[0].geo_distribution, vec!["sardinia".to_string()]);
        assert!(rows[0].gene.is_some());
        assert_eq!(rows[1].gene, None);
        assert_eq!(rows[2].phenotype_distribution, vec![]);
    }

    #[test]
    fn gene_filter() {
        let Cohort { graph, v, .. } = cohort();
        assert_eq!(variants(&run(&graph, json!({"geneName": "tp53"}))), vec![v[2]]);
        assert!(run(&graph, json!({"geneName": "NOPE"})).is_empty());
    }

    #[test]
    fn range_filter() {
        let Cohort { graph, v, .. } = cohort();
        let rows = run(&graph, json!({"start": 150, "end": 250}));
        assert_eq!(variants(&rows), vec![v[1]]);
        // A lone bound is an equality filter.
        let rows = run(&graph, json!({"start": 300}));
        assert_eq!(variants(&rows), vec![v[2]]);
    }

    #[test]
    fn phenotype_filter_restricts_rows() {
        let Cohort { graph, v, p } = cohort();
        let rows = run(&graph, json!({"sex": "male"}));
        assert_eq!(variants(&rows), vec![v[0], v[1]]);
        // Only the matching phenotype's file is counted.
        assert_eq!(rows[0].observed_in, 1);
        assert_eq!(rows[0].phenotype_distribution, vec![p[1]]);
    }

    #[test]
    fn geo_filter_is_mandatory() {
        let Cohort { graph, v, .. } = cohort();
        let rows = run(&graph, json!({"macroarea": "sardinia"}));
        assert_eq!(variants(&rows), vec![v[0]]);
    }

    #[test]
    fn technical_filter() {
        let Cohort { graph, v, .. } = cohort();
        let rows = run(&graph, json!({"platform": "WGS"}));
        assert_eq!(variants(&rows), vec![v[0], v[1]]);
        assert_eq!(rows[0].observed_in, 1);
    }

    #[test]
    fn hpo_filter_generalizes() {
        let Cohort { graph, v, p } = cohort();
        // HP:A generalizes both HP:C and HP:D.
        let rows = run(&graph, json!({"HPO": {"hpo_id": "HP:A"}}));
        assert_eq!(variants(&rows), vec![v[0], v[1]]);
        // HP:C and HP:D share the visible ancestor HP:A.
        let rows = run(&graph, json!({"HPO": "HP:C"}));
        assert_eq!(variants(&rows), vec![v[0], v[1]]);
        assert_eq!(rows[0].phenotype_distribution, vec![p[0], p[1]]);
        // Unknown and hidden terms match nothing.
        assert!(run(&graph, json!({"HPO": "HP:404"})).is_empty());
        assert!(run(&graph, json!({"HPO": "HP:ROOT"})).is_empty());
    }

    #[test]
    fn hpo_filter_excludes_unrelated_terms() {
        let Cohort { mut graph, v, .. } = cohort();
        let v5 = graph.add_node(NodeLabel::Variant, [("variant_type", "snp")]);
        let f4 = graph.add_node(NodeLabel::File, [("name", "f4.vcf")]);
        let d4 = graph.add_node(NodeLabel::Dataset, [("name", "d4")]);
        let p3 = graph.add_node(NodeLabel::Phenotype, [("name", "P3")]);
        let orphan = graph.add_node(
            NodeLabel::Hpo,
            [("hpo_id", "HP:Z"), ("label", "Unrelated")],
        );
        for (from, rel, to) in [
            (v5, RelType::ObservedIn, f4),
            (d4, RelType::Contains, f4),
            (d4, RelType::IsDescribedBy, p3),
            (p3, RelType::DescribedBy, orphan),
        ] {
            graph.add_edge(from, rel, to).unwrap();
        }

        let rows = run(&graph, json!({"HPO": "HP:C"}));
        assert_eq!(variants(&rows), vec![v[0], v[1]]);
        assert!(rows.iter().all(|row| !row.phenotype_distribution.contains(&p3)));

        let rows = run(&graph, json!({"HPO": "HP:Z"}));
        assert_eq!(variants(&rows), vec![v5]);
        assert_eq!(rows[0].phenotype_distribution, vec![p3]);
    }

    #[test]
    fn shared_ancestor_consults_given_terms() {
        let Cohort { graph, .. } = cohort();
        let mut cache = GeneralizationCache::new(&graph);
        let scope = cache.ancestors_of("HP:C").unwrap();
        let plan = PlanBuilder::new(&SearchConf::default()).build(
            &normalize(&serde_json::from_value(json!({"HPO": "HP:C"})).unwrap()),
            Some(&*scope),
        );
        graph.execute(&plan, &mut cache).unwrap();
        // Both phenotypes were generalized through the cache handed in.
        assert_eq!(cache.stats().phenotype_sets, 2);
    }

    #[test]
    fn limits_cap_rows() {
        let Cohort { graph, v, .. } = cohort();
        let conf = SearchConf {
            soft_limit: 2,
            hard_limit: 1,
            ..Default::default()
        };
        let plan = PlanBuilder::new(&conf).build(&Default::default(), None);
        let rows = graph
            .execute(&plan, &mut GeneralizationCache::new(&graph))
            .unwrap();
        assert_eq!(variants(&rows), vec![v[0]]);
    }

    #[test]
    fn plan_without_projection_fails() {
        let Cohort { graph, .. } = cohort();
        let plan = QueryPlan {
            clauses: vec![Clause::Limit(1)],
        };
        assert!(matches!(
            graph.execute(&plan, &mut GeneralizationCache::new(&graph)),
            Err(StoreError::Backend(_))
        ));
    }

    #[test]
    fn ontology_view() {
        let Cohort { graph, .. } = cohort();
        let term = graph.term("HP:C").unwrap().unwrap();
        assert_eq!(term.label, "Cardiac");
        assert_eq!(term.description.as_deref(), Some("Heart trouble"));
        assert_eq!(term.parents, vec!["HP:A".to_string()]);
        assert!(graph.term("HP:ROOT").unwrap().unwrap().hidden);
        assert_eq!(graph.term("HP:404").unwrap(), None);

        let mut cache = GeneralizationCache::new(&graph);
        assert_eq!(
            *cache.ancestors_of("HP:C").unwrap(),
            TermSet::from(["HP:A".to_string(), "HP:C".to_string()])
        );
    }

    #[test]
    fn find_terms_orders_by_id_descending() {
        let Cohort { graph, .. } = cohort();
        let query = term_query("a", &SearchConf::default()).unwrap();
        let ids = graph
            .find_terms(&query)
            .unwrap()
            .into_iter()
            .map(|term| term.term_id)
            .collect::<Vec<_>>();
        // "All", "Abnormality", "Cardiac", "Dermal" all contain an "a".
        assert_eq!(ids, vec!["HP:ROOT", "HP:D", "HP:C", "HP:A"]);

        let query = term_query("HP:C", &SearchConf::default()).unwrap();
        assert_eq!(graph.find_terms(&query).unwrap().len(), 1);
    }

    #[test]
    fn total_samples_counts_observing_files() {
        let Cohort { graph, .. } = cohort();
        assert_eq!(graph.total_samples().unwrap(), 3);
        assert_eq!(MemoryGraph::new().total_samples().unwrap(), 0);
    }

    #[test]
    fn related_and_node() {
        let Cohort { graph, v, p } = cohort();
        assert_eq!(
            graph
                .related(p[0], RelType::ConfirmedIn, Direction::Incoming)
                .unwrap(),
            vec![v[0]]
        );
        assert_eq!(
            graph.node(v[0]).unwrap().unwrap().str_prop("ref"),
            Some("A")
        );
        assert_eq!(graph.node(NodeId(9999)).unwrap(), None);
    }

    #[test]
    fn snapshot_loading() {
        let graph = MemoryGraph::from_reader(
            json!({
                "nodes": [
                    {"id": 1, "label": "Variant", "properties": {"chromosome": "1"}},
                    {"id": 2, "label": "File"},
                ],
                "edges": [{"from": 1, "rel": "OBSERVED_IN", "to": 2}],
            })
            .to_string()
            .as_bytes(),
        )
        .unwrap();
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.total_samples().unwrap(), 1);
    }

    #[test]
    fn snapshot_rejects_duplicates_and_dangling_edges() {
        let duplicate = json!({
            "nodes": [{"id": 1, "label": "File"}, {"id": 1, "label": "File"}],
        })
        .to_string();
        assert!(matches!(
            MemoryGraph::from_reader(duplicate.as_bytes()),
            Err(StoreError::DuplicateNode(NodeId(1)))
        ));

        let dangling = json!({
            "nodes": [{"id": 1, "label": "File"}],
            "edges": [{"from": 7, "rel": "CONTAINS", "to": 1}],
        })
        .to_string();
        assert!(matches!(
            MemoryGraph::from_reader(dangling.as_bytes()),
            Err(StoreError::DanglingEdge(NodeId(7)))
        ));

        assert!(matches!(
            MemoryGraph::from_reader("{".as_bytes()),
            Err(StoreError::Snapshot(_))
        ));
        assert!(matches!(
            MemoryGraph::load("tests/data/cohort/missing.json"),
            Err(StoreError::Io(_))
        ));
    }
}
