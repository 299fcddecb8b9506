//! Report definition input model
//!
//! A report definition is authored as JSON (camelCase keys) by a UI builder
//! or an assistant and is immutable for the duration of one execution.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

// ============================================================================
// Report
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportDefinition {
    pub sections: Vec<SectionEntry>,
    #[serde(default)]
    pub date_range: DateRangeSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categorization: Option<Categorization>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numeric_categorization: Option<NumericCategorization>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub calculated_fields: Vec<CalculatedField>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DateRangePreset {
    #[serde(rename = "last30")]
    Last30,
    #[default]
    #[serde(rename = "last90")]
    Last90,
    #[serde(rename = "last6months")]
    Last6Months,
    #[serde(rename = "lastYear")]
    LastYear,
    #[serde(rename = "yearToDate")]
    YearToDate,
    #[serde(rename = "allTime")]
    AllTime,
    #[serde(rename = "custom")]
    Custom,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRangeSpec {
    #[serde(rename = "type")]
    pub preset: DateRangePreset,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_end: Option<String>,
}

// ============================================================================
// Derived fields and bucketing
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalculatedField {
    pub name: String,
    pub formula: String,
}

/// Keyword(s) a rule looks for; JSON accepts a string or a list of strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Keywords {
    One(String),
    Many(Vec<String>),
}

impl Keywords {
    pub fn as_slice(&self) -> &[String] {
        match self {
            Keywords::One(k) => std::slice::from_ref(k),
            Keywords::Many(ks) => ks,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryRule {
    pub contains: Keywords,
    pub category: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Categorization {
    pub name: String,
    pub field: String,
    pub rules: Vec<CategoryRule>,
    pub default: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NumericRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    pub category: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NumericCategorization {
    pub name: String,
    pub field: String,
    pub ranges: Vec<NumericRange>,
}

// ============================================================================
// Metrics
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Aggregation {
    Sum,
    Avg,
    Count,
    Min,
    Max,
    CountDistinct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Combinator {
    Divide,
    Subtract,
    Multiply,
    Add,
}

/// Two independent sub-aggregates over the same rows, combined into one number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Computation {
    pub field1: String,
    pub agg1: Aggregation,
    pub field2: String,
    pub agg2: Aggregation,
    #[serde(rename = "type")]
    pub combinator: Combinator,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricConfig {
    pub field: String,
    pub aggregation: Aggregation,
    #[serde(default)]
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computation: Option<Computation>,
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Section {
    Hero(HeroSection),
    StatRow(StatRowSection),
    CategoryGrid(CategoryGridSection),
    Chart(ChartSection),
    Table(TableSection),
    Map(MapSection),
    Header(HeaderSection),
}

impl Section {
    pub fn kind(&self) -> &'static str {
        match self {
            Section::Hero(_) => "hero",
            Section::StatRow(_) => "stat-row",
            Section::CategoryGrid(_) => "category-grid",
            Section::Chart(_) => "chart",
            Section::Table(_) => "table",
            Section::Map(_) => "map",
            Section::Header(_) => "header",
        }
    }

    /// Header sections carry layout only and never touch the row store.
    pub fn needs_rows(&self) -> bool {
        !matches!(self, Section::Header(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeroSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub metric: MetricConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatRowSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub metrics: Vec<MetricConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryGridSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub group_by: String,
    pub metric: MetricConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle_metric: Option<MetricConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_categories: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart_type: Option<String>,
    pub group_by: String,
    pub metric: MetricConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableColumn {
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<Aggregation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computation: Option<Computation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub columns: Vec<TableColumn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by: Option<String>,
    /// Consulted by grouped tables for columns that name a metric's field.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metrics: Vec<MetricConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_by: Option<String>,
    #[serde(default)]
    pub sort_direction: SortDirection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MapType {
    Choropleth,
    Cluster,
    Flow,
    Arc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub map_type: MapType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_field: Option<String>,
    pub metric: MetricConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
}

/// One declared section. Entries that fail to parse (unknown `type`,
/// missing keys) are kept so the report can still execute its siblings and
/// report the failure in place.
#[derive(Debug, Clone)]
pub enum SectionEntry {
    Valid(Section),
    Invalid {
        kind: String,
        reason: String,
        raw: Value,
    },
}

impl<'de> Deserialize<'de> for SectionEntry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        match serde_json::from_value::<Section>(raw.clone()) {
            Ok(section) => Ok(SectionEntry::Valid(section)),
            Err(e) => {
                let kind = raw
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("<missing>")
                    .to_string();
                Ok(SectionEntry::Invalid {
                    kind,
                    reason: e.to_string(),
                    raw,
                })
            }
        }
    }
}

impl Serialize for SectionEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SectionEntry::Valid(section) => section.serialize(serializer),
            SectionEntry::Invalid { raw, .. } => raw.serialize(serializer),
        }
    }
}

impl From<Section> for SectionEntry {
    fn from(section: Section) -> Self {
        SectionEntry::Valid(section)
    }
}
