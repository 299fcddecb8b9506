//! Rule-based bucketing of rows into named categories
//!
//! Both strategies are first-match-wins over the declared order. The same
//! rules are transliterated into query text by `report::sql`; the two must
//! agree for identical input.

use serde_json::{Number, Value};

use super::aggregate::{numeric, NULL};
use super::definition::{Categorization, NumericCategorization, NumericRange};
use super::Row;

/// Canonical number text: integral values carry no fractional part
/// (`300.0` renders as `300`), others use the shortest round-trip form.
pub fn number_text(n: &Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    n.as_f64().map_or_else(|| n.to_string(), |f| f.to_string())
}

/// Text view of a field value used for keyword matching and group keys.
pub fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(number_text(n)),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

/// Case-insensitive substring rules; falls back to `default`.
pub fn categorize_value<'c>(cat: &'c Categorization, value: &Value) -> &'c str {
    let haystack = text_of(value).unwrap_or_default().to_lowercase();
    cat.rules
        .iter()
        .find(|rule| {
            rule.contains
                .as_slice()
                .iter()
                .filter(|k| !k.is_empty())
                .any(|k| haystack.contains(&k.to_lowercase()))
        })
        .map(|rule| rule.category.as_str())
        .unwrap_or(cat.default.as_str())
}

pub fn categorize<'c>(cat: &'c Categorization, row: &Row) -> &'c str {
    categorize_value(cat, row.get(&cat.field).unwrap_or(&NULL))
}

impl NumericRange {
    /// `min` inclusive, `max` exclusive; absent bounds are open.
    pub fn matches(&self, value: f64) -> bool {
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value < max)
    }
}

/// First matching range, or `None` for non-numeric or unmatched values.
pub fn categorize_numeric_value<'c>(cat: &'c NumericCategorization, value: &Value) -> Option<&'c str> {
    let v = numeric(value)?;
    cat.ranges
        .iter()
        .find(|range| range.matches(v))
        .map(|range| range.category.as_str())
}

pub fn categorize_numeric<'c>(cat: &'c NumericCategorization, row: &Row) -> Option<&'c str> {
    categorize_numeric_value(cat, row.get(&cat.field).unwrap_or(&NULL))
}

/// Adds the categorization names as virtual fields on the row.
pub fn label_row(
    row: &mut Row,
    categorization: Option<&Categorization>,
    numeric_categorization: Option<&NumericCategorization>,
) {
    if let Some(cat) = categorization {
        let label = categorize(cat, row).to_string();
        row.insert(cat.name.clone(), Value::String(label));
    }
    if let Some(cat) = numeric_categorization {
        let label = categorize_numeric(cat, row)
            .map(|c| Value::String(c.to_string()))
            .unwrap_or(Value::Null);
        row.insert(cat.name.clone(), label);
    }
}
