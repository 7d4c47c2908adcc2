//! Supporting code for the cohort search request and its normalization.

use enum_map::EnumMap;
use indexmap::IndexMap;
use strum_macros::{Display, EnumIter};

use super::data::Literal;

/// The raw search request, a flat map of filter keys to JSON values.
pub type RawFilters = IndexMap<String, serde_json::Value>;

/// Filter dimensions; each request key belongs to exactly one of them.
#[derive(
    serde::Serialize,
    serde::Deserialize,
    enum_map::Enum,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Clone,
    Copy,
    Debug,
    Display,
    EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Dimension {
    /// Variant attributes (type, chromosome, ref, alt, main effect, position).
    Variant,
    /// Gene name.
    Gene,
    /// Phenotype uuid, name and sex.
    Phenotype,
    /// Macroarea of the birth place.
    Geodata,
    /// HPO term.
    Hpo,
    /// Technical metadata (platform).
    Technical,
}

/// Mapping of request key to dimension and the graph attribute it constrains.
pub const FILTER_KEYS: &[(&str, Dimension, &str)] = &[
    ("variant_type", Dimension::Variant, "variant_type"),
    ("chromosome", Dimension::Variant, "chromosome"),
    ("start", Dimension::Variant, "start"),
    ("end", Dimension::Variant, "end"),
    ("ref", Dimension::Variant, "ref"),
    ("alt", Dimension::Variant, "alt"),
    ("main_effect", Dimension::Variant, "MainEffect"),
    ("geneName", Dimension::Gene, "geneName"),
    ("phenotype_uuid", Dimension::Phenotype, "uuid"),
    ("name", Dimension::Phenotype, "name"),
    ("sex", Dimension::Phenotype, "sex"),
    ("macroarea", Dimension::Geodata, "macroarea"),
    ("HPO", Dimension::Hpo, "hpo_id"),
    ("platform", Dimension::Technical, "platform"),
];

/// Keys of an autocomplete selection object that carry the selected value,
/// in order of preference.
fn autocomplete_keys(dim: Dimension) -> &'static [&'static str] {
    match dim {
        Dimension::Hpo => &["hpo_id", "id", "label"],
        _ => &["label", "id"],
    }
}

/// Whether a JSON value stands for "no value".
fn is_blank(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => true,
        serde_json::Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Normalized equality filters, grouped by dimension.
///
/// A dimension without entries is absent.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FilterSet {
    groups: EnumMap<Dimension, IndexMap<String, Literal>>,
}

impl FilterSet {
    /// Set the equality filter `attribute == value` in dimension `dim`.
    pub fn insert(&mut self, dim: Dimension, attribute: &str, value: Literal) {
        self.groups[dim].insert(attribute.to_string(), value);
    }

    /// The equality filters of dimension `dim`.
    pub fn group(&self, dim: Dimension) -> &IndexMap<String, Literal> {
        &self.groups[dim]
    }

    /// Whether any filter of dimension `dim` is present.
    pub fn is_active(&self, dim: Dimension) -> bool {
        !self.groups[dim].is_empty()
    }

    /// The HPO term id filter, if any.
    pub fn hpo_term(&self) -> Option<&str> {
        match self.groups[Dimension::Hpo].get("hpo_id") {
            Some(Literal::Str(term_id)) => Some(term_id.as_str()),
            _ => None,
        }
    }

    /// Whether no filter at all is present.
    pub fn is_empty(&self) -> bool {
        self.groups.values().all(|group| group.is_empty())
    }
}

/// Closed variant position range, applied as `start >= self.start AND end <= self.end`.
#[derive(serde::Serialize, Debug, Clone, Copy, PartialEq, Eq, derive_new::new)]
pub struct VariantRange {
    pub start: i64,
    pub end: i64,
}

/// Result of normalizing the raw request.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct NormalizedFilters {
    /// The equality filters.
    pub filters: FilterSet,
    /// The position range, present only if both `start` and `end` were given.
    pub range: Option<VariantRange>,
}

/// Reduce one raw request value to a literal.
///
/// Returns `None` for values equivalent to "absent" and for values of
/// unexpected shape.
fn normalize_value(key: &str, dim: Dimension, value: &serde_json::Value) -> Option<Literal> {
    let value = match value {
        serde_json::Value::Object(selection) => {
            let inner = autocomplete_keys(dim)
                .iter()
                .filter_map(|inner_key| selection.get(*inner_key))
                .find(|inner| !is_blank(inner));
            match inner {
                Some(inner) => inner,
                None => {
                    tracing::debug!("ignoring selection without id for {}: {:?}", key, value);
                    return None;
                }
            }
        }
        _ => value,
    };

    match value {
        value if is_blank(value) => None,
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
            tracing::debug!("ignoring value of unexpected type for {}: {:?}", key, value);
            None
        }
        _ => Literal::from_json(value),
    }
}

/// Normalize the raw request into a `FilterSet` and an optional position range.
///
/// Absent, `null` and empty values are dropped, autocomplete selections are
/// reduced to their id, the gene name is upper-cased.  The `start`/`end` pair
/// becomes a range only if both are present and integer; a lone bound stays
/// an opaque equality filter.  Unknown keys are ignored.
pub fn normalize(raw: &RawFilters) -> NormalizedFilters {
    let mut filters = FilterSet::default();

    for (key, value) in raw {
        let Some((_, dim, attribute)) = FILTER_KEYS.iter().find(|(k, _, _)| k == key) else {
            tracing::debug!("ignoring unknown filter key {:?}", key);
            continue;
        };
        let Some(literal) = normalize_value(key, *dim, value) else {
            continue;
        };
        let literal = match (dim, literal) {
            (Dimension::Gene, Literal::Str(name)) => Literal::Str(name.to_uppercase()),
            (Dimension::Hpo, Literal::Str(term_id)) => Literal::Str(term_id),
            (Dimension::Hpo, other) => {
                tracing::debug!("ignoring non-string HPO filter {:?}", other);
                continue;
            }
            (_, literal) => literal,
        };
        filters.insert(*dim, attribute, literal);
    }

    let variant = filters.group(Dimension::Variant);
    let range = match (
        variant.get("start").and_then(Literal::as_int),
        variant.get("end").and_then(Literal::as_int),
    ) {
        (Some(start), Some(end)) => Some(VariantRange::new(start, end)),
        _ => None,
    };
    if range.is_some() {
        filters.groups[Dimension::Variant].shift_remove("start");
        filters.groups[Dimension::Variant].shift_remove("end");
    }

    NormalizedFilters { filters, range }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    fn raw(value: serde_json::Value) -> RawFilters {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn empty_request() {
        let normalized = normalize(&RawFilters::new());
        assert!(normalized.filters.is_empty());
        assert_eq!(normalized.range, None);
    }

    #[test]
    fn drops_absent_values() {
        let normalized = normalize(&raw(json!({
            "variant_type": "",
            "chromosome": null,
            "ref": "A",
            "geneName": "",
            "sex": "female",
        })));

        assert_eq!(
            normalized.filters.group(Dimension::Variant),
            &IndexMap::from([("ref".to_string(), Literal::Str("A".into()))])
        );
        assert!(!normalized.filters.is_active(Dimension::Gene));
        assert!(normalized.filters.is_active(Dimension::Phenotype));
        assert_eq!(
            normalized.filters.group(Dimension::Phenotype).get("sex"),
            Some(&Literal::Str("female".into()))
        );
    }

    #[test]
    fn maps_keys_to_attributes() {
        let normalized = normalize(&raw(json!({
            "main_effect": "missense_variant",
            "phenotype_uuid": "p-1",
            "macroarea": "sardinia",
            "platform": "SNP-array",
            "unknown": "x",
        })));
        let filters = &normalized.filters;

        assert_eq!(
            filters.group(Dimension::Variant).get("MainEffect"),
            Some(&Literal::Str("missense_variant".into()))
        );
        assert_eq!(
            filters.group(Dimension::Phenotype).get("uuid"),
            Some(&Literal::Str("p-1".into()))
        );
        assert!(filters.is_active(Dimension::Geodata));
        assert!(filters.is_active(Dimension::Technical));
        assert!(!filters.is_active(Dimension::Hpo));
    }

    #[rstest]
    #[case(json!("HP:0000118"), Some("HP:0000118"))]
    #[case(json!({"hpo_id": "HP:0000118", "label": "Phenotypic abnormality"}), Some("HP:0000118"))]
    #[case(json!({"id": "HP:0000707"}), Some("HP:0000707"))]
    #[case(json!({"hpo_id": ""}), None)]
    #[case(json!({"hpo_id": "", "id": "HP:0000707"}), Some("HP:0000707"))]
    #[case(json!({"hpo_id": null, "label": "HP:0000707"}), Some("HP:0000707"))]
    #[case(json!({"something": "else"}), None)]
    #[case(json!(["HP:0000118"]), None)]
    #[case(json!(118), None)]
    #[case(json!(""), None)]
    fn hpo_selection(#[case] value: serde_json::Value, #[case] expected: Option<&str>) {
        let normalized = normalize(&raw(json!({ "HPO": value })));
        assert_eq!(normalized.filters.hpo_term(), expected);
        assert_eq!(
            normalized.filters.is_active(Dimension::Hpo),
            expected.is_some()
        );
    }

    #[test]
    fn main_effect_selection_uses_label() {
        let normalized = normalize(&raw(json!({
            "main_effect": {"label": "stop_gained", "value": "Stop gained"}
        })));
        assert_eq!(
            normalized.filters.group(Dimension::Variant).get("MainEffect"),
            Some(&Literal::Str("stop_gained".into()))
        );
    }

    #[rstest]
    #[case(json!({"label": "stop_gained", "id": "SO:0001587"}), Some("stop_gained"))]
    #[case(json!({"id": "SO:0001587"}), Some("SO:0001587"))]
    #[case(json!({"label": "", "id": "SO:0001587"}), Some("SO:0001587"))]
    #[case(json!({"hpo_id": "HP:1"}), None)]
    fn selection_prefers_label_outside_hpo(
        #[case] value: serde_json::Value,
        #[case] expected: Option<&str>,
    ) {
        let normalized = normalize(&raw(json!({ "main_effect": value })));
        assert_eq!(
            normalized.filters.group(Dimension::Variant).get("MainEffect"),
            expected.map(|v| Literal::Str(v.into())).as_ref()
        );
    }

    #[rstest]
    #[case("brca2", "BRCA2")]
    #[case("Brca2", "BRCA2")]
    #[case("BRCA2", "BRCA2")]
    fn gene_upper_case(#[case] name: &str, #[case] expected: &str) {
        let normalized = normalize(&raw(json!({ "geneName": name })));
        assert_eq!(
            normalized.filters.group(Dimension::Gene).get("geneName"),
            Some(&Literal::Str(expected.into()))
        );
    }

    #[rstest]
    #[case(json!({"start": 100, "end": 200}), Some(VariantRange::new(100, 200)), vec![])]
    #[case(json!({"start": "100", "end": "200"}), Some(VariantRange::new(100, 200)), vec![])]
    #[case(json!({"start": 100}), None, vec!["start"])]
    #[case(json!({"end": 200}), None, vec!["end"])]
    #[case(json!({"start": 100, "end": ""}), None, vec!["start"])]
    #[case(json!({"start": "abc", "end": 200}), None, vec!["start", "end"])]
    #[case(json!({}), None, vec![])]
    fn start_end_range(
        #[case] value: serde_json::Value,
        #[case] expected_range: Option<VariantRange>,
        #[case] expected_keys: Vec<&str>,
    ) {
        let normalized = normalize(&raw(value));
        assert_eq!(normalized.range, expected_range);
        assert_eq!(
            normalized
                .filters
                .group(Dimension::Variant)
                .keys()
                .map(String::as_str)
                .collect::<Vec<_>>(),
            expected_keys
        );
    }

    #[test]
    fn normalize_is_pure() {
        let request = raw(json!({"geneName": "tp53", "HPO": {"hpo_id": "HP:1"}}));
        let before = request.clone();
        let first = normalize(&request);
        let second = normalize(&request);
        assert_eq!(request, before);
        assert_eq!(first, second);
    }
}
