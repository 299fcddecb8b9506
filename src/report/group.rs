//! Group-key resolution and the shared grouping primitive
//!
//! Category grids, charts, grouped tables and maps all bucket rows the same
//! way: resolve a key per row, collect rows per key in first-seen order,
//! then finalize each group into a section-specific value.

use std::collections::HashMap;

use super::aggregate::NULL;
use super::categorize::{categorize, categorize_numeric, text_of};
use super::definition::{Categorization, NumericCategorization, ReportDefinition};
use super::Row;

pub const UNKNOWN: &str = "Unknown";
pub const OTHER: &str = "Other";

/// Synthesized origin/destination keys and the fields they pair.
pub fn lane_fields(name: &str) -> Option<(&'static str, &'static str)> {
    match name {
        "lane" => Some(("origin_state", "destination_state")),
        "lane_city" => Some(("origin_city", "destination_city")),
        "origin_to_destination" => Some(("origin", "destination")),
        _ => None,
    }
}

/// How a `groupBy` name turns into a key, in priority order.
#[derive(Debug, Clone, Copy)]
pub enum GroupKey<'d> {
    Categorized(&'d Categorization),
    NumericCategorized(&'d NumericCategorization),
    Lane {
        origin: &'d str,
        destination: &'d str,
    },
    Field(&'d str),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct KeyResolver<'d> {
    categorization: Option<&'d Categorization>,
    numeric_categorization: Option<&'d NumericCategorization>,
}

impl<'d> KeyResolver<'d> {
    pub fn new(definition: &'d ReportDefinition) -> Self {
        Self {
            categorization: definition.categorization.as_ref(),
            numeric_categorization: definition.numeric_categorization.as_ref(),
        }
    }

    pub fn classify<'k>(&self, group_by: &'k str) -> GroupKey<'k>
    where
        'd: 'k,
    {
        if let Some(cat) = self.categorization.filter(|c| c.name == group_by) {
            return GroupKey::Categorized(cat);
        }
        if let Some(cat) = self.numeric_categorization.filter(|c| c.name == group_by) {
            return GroupKey::NumericCategorized(cat);
        }
        if let Some((origin, destination)) = lane_fields(group_by) {
            return GroupKey::Lane {
                origin,
                destination,
            };
        }
        GroupKey::Field(group_by)
    }

    pub fn key(&self, row: &Row, group_by: &str) -> String {
        self.classify(group_by).key(row)
    }
}

impl GroupKey<'_> {
    pub fn key(&self, row: &Row) -> String {
        match self {
            GroupKey::Categorized(cat) => categorize(cat, row).to_string(),
            GroupKey::NumericCategorized(cat) => categorize_numeric(cat, row)
                .unwrap_or(UNKNOWN)
                .to_string(),
            GroupKey::Lane {
                origin,
                destination,
            } => lane_key(row, origin, destination),
            GroupKey::Field(field) => field_text(row, field).unwrap_or_else(|| OTHER.to_string()),
        }
    }
}

/// Non-empty text of a field, if any.
fn field_text(row: &Row, field: &str) -> Option<String> {
    text_of(row.get(field).unwrap_or(&NULL)).filter(|s| !s.is_empty())
}

/// Origin and destination text, with missing sides shown as Unknown.
pub fn lane_sides(row: &Row, origin_field: &str, destination_field: &str) -> (String, String) {
    let origin = field_text(row, origin_field).unwrap_or_else(|| UNKNOWN.to_string());
    let destination = field_text(row, destination_field).unwrap_or_else(|| UNKNOWN.to_string());
    (origin, destination)
}

/// `"<origin> -> <destination>"`
pub fn lane_key(row: &Row, origin_field: &str, destination_field: &str) -> String {
    let (origin, destination) = lane_sides(row, origin_field, destination_field);
    format!("{origin} -> {destination}")
}

// ============================================================================
// Grouper
// ============================================================================

#[derive(Debug)]
pub struct Group<'r> {
    pub key: String,
    pub rows: Vec<&'r Row>,
}

/// Rows bucketed by key, in order of first appearance.
#[derive(Debug, Default)]
pub struct Grouper<'r> {
    index: HashMap<String, usize>,
    groups: Vec<Group<'r>>,
}

impl<'r> Grouper<'r> {
    pub fn new<K>(rows: &'r [Row], key: K) -> Self
    where
        K: Fn(&Row) -> String,
    {
        let mut grouper = Self::default();
        for row in rows {
            grouper.push(key(row), row);
        }
        grouper
    }

    pub fn push(&mut self, key: String, row: &'r Row) {
        match self.index.get(&key) {
            Some(&i) => self.groups[i].rows.push(row),
            None => {
                self.index.insert(key.clone(), self.groups.len());
                self.groups.push(Group {
                    key,
                    rows: vec![row],
                });
            }
        }
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn finalize<T, F>(self, f: F) -> Vec<T>
    where
        F: FnMut(Group<'r>) -> T,
    {
        self.groups.into_iter().map(f).collect()
    }
}

/// Stable sort, largest value first, then truncate.
pub fn rank_desc<T, V>(items: &mut Vec<T>, value: V, limit: Option<usize>)
where
    V: Fn(&T) -> f64,
{
    items.sort_by(|a, b| value(b).total_cmp(&value(a)));
    if let Some(limit) = limit {
        items.truncate(limit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::definition::{CategoryRule, Keywords, NumericRange};
    use serde_json::json;

    fn row(v: serde_json::Value) -> Row {
        v.as_object().cloned().unwrap()
    }

    fn definition() -> ReportDefinition {
        ReportDefinition {
            sections: vec![],
            date_range: Default::default(),
            categorization: Some(Categorization {
                name: "lane".into(),
                field: "carrier_mode".into(),
                rules: vec![CategoryRule {
                    contains: Keywords::One("ltl".into()),
                    category: "LTL".into(),
                }],
                default: "FTL".into(),
            }),
            numeric_categorization: Some(NumericCategorization {
                name: "weight_band".into(),
                field: "weight".into(),
                ranges: vec![NumericRange {
                    min: Some(0.0),
                    max: Some(10_000.0),
                    category: "light".into(),
                }],
            }),
            calculated_fields: vec![],
        }
    }

    #[test]
    fn lane_keys_default_missing_sides() {
        let r = row(json!({ "origin_state": "CA", "destination_state": "TX" }));
        assert_eq!(lane_key(&r, "origin_state", "destination_state"), "CA -> TX");

        let r = row(json!({ "origin_state": null, "destination_state": "TX" }));
        assert_eq!(lane_key(&r, "origin_state", "destination_state"), "Unknown -> TX");

        let r = row(json!({ "origin_city": "Fresno" }));
        let resolver = KeyResolver::default();
        assert_eq!(resolver.key(&r, "lane_city"), "Fresno -> Unknown");
    }

    #[test]
    fn categorization_name_takes_priority_over_synthesized_keys() {
        let def = definition();
        let resolver = KeyResolver::new(&def);
        let r = row(json!({ "carrier_mode": "LTL", "origin_state": "CA", "destination_state": "TX" }));
        assert_eq!(resolver.key(&r, "lane"), "LTL");
    }

    #[test]
    fn numeric_categorization_falls_back_to_unknown() {
        let def = definition();
        let resolver = KeyResolver::new(&def);
        assert_eq!(resolver.key(&row(json!({ "weight": 500 })), "weight_band"), "light");
        assert_eq!(resolver.key(&row(json!({ "weight": 20000 })), "weight_band"), "Unknown");
        assert_eq!(resolver.key(&row(json!({})), "weight_band"), "Unknown");
    }

    #[test]
    fn raw_fields_fall_back_to_other() {
        let resolver = KeyResolver::default();
        assert_eq!(resolver.key(&row(json!({ "carrier_name": "Saia" })), "carrier_name"), "Saia");
        assert_eq!(resolver.key(&row(json!({ "carrier_name": "" })), "carrier_name"), "Other");
        assert_eq!(resolver.key(&row(json!({})), "carrier_name"), "Other");
        assert_eq!(resolver.key(&row(json!({ "zone": 7 })), "zone"), "7");
    }

    #[test]
    fn grouper_preserves_first_seen_order() {
        let rows = vec![
            row(json!({ "k": "b" })),
            row(json!({ "k": "a" })),
            row(json!({ "k": "b" })),
        ];
        let resolver = KeyResolver::default();
        let grouper = Grouper::new(&rows, |r| resolver.key(r, "k"));
        assert_eq!(grouper.len(), 2);
        let sizes = grouper.finalize(|g| (g.key, g.rows.len()));
        assert_eq!(sizes, vec![("b".to_string(), 2), ("a".to_string(), 1)]);
    }

    #[test]
    fn rank_desc_sorts_and_truncates() {
        let mut items = vec![("a", 1.0), ("b", 5.0), ("c", 3.0), ("d", 5.0)];
        rank_desc(&mut items, |i| i.1, Some(3));
        assert_eq!(items, vec![("b", 5.0), ("d", 5.0), ("c", 3.0)]);
    }
}
