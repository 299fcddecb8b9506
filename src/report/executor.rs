//! Section executors
//!
//! Each section kind turns the rows fetched for it into a result shape.
//! Execution here is synchronous and in-memory; fetching, deadlines and
//! failure isolation live in the orchestrator.

use serde::Serialize;
use serde_json::{Map, Number, Value};
use std::collections::HashMap;

use super::aggregate::{aggregate_field, compute, evaluate_metric};
use super::categorize::label_row;
use super::date_range::ResolvedDateRange;
use super::definition::{
    Aggregation, CategoryGridSection, ChartSection, HeroSection, MapSection, MapType, MetricConfig,
    ReportDefinition, Section, SortDirection, StatRowSection, TableColumn, TableSection,
};
use super::formula::CalculatedFields;
use super::group::{lane_fields, lane_sides, rank_desc, Grouper, KeyResolver};
use super::store::{sort_rows, RowQuery};
use super::Row;

/// Charts always show at most this many groups.
pub const CHART_TOP_N: usize = 10;

/// Synthetic per-group row count on grouped tables.
pub const COUNT_FIELD: &str = "_count";

const DEFAULT_REGION_FIELD: &str = "destination_state";
const DEFAULT_ORIGIN_FIELD: &str = "origin_state";
const DEFAULT_DESTINATION_FIELD: &str = "destination_state";

// ============================================================================
// Result shapes
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricValue {
    pub label: String,
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupValue {
    pub name: String,
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle_value: Option<f64>,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableHeader {
    pub key: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableData {
    pub columns: Vec<TableHeader>,
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MapRegion {
    pub name: String,
    pub value: f64,
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MapData {
    pub map_type: MapType,
    pub regions: Vec<MapRegion>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SectionData {
    Metric(MetricValue),
    Metrics(Vec<MetricValue>),
    Groups(Vec<GroupValue>),
    Table(TableData),
    Map(MapData),
}

// ============================================================================
// Shared per-report state
// ============================================================================

/// Everything a section needs besides its own rows. Built once per report
/// and shared read-only by every section.
#[derive(Debug)]
pub struct ExecutionContext<'d> {
    pub definition: &'d ReportDefinition,
    pub calculated: CalculatedFields,
    pub resolver: KeyResolver<'d>,
}

impl<'d> ExecutionContext<'d> {
    pub fn new(definition: &'d ReportDefinition) -> Self {
        Self {
            definition,
            calculated: CalculatedFields::compile(&definition.calculated_fields),
            resolver: KeyResolver::new(definition),
        }
    }

    /// True when `field` only exists after calculation or categorization.
    pub fn is_derived(&self, field: &str) -> bool {
        self.calculated.contains(field)
            || self.definition.categorization.as_ref().is_some_and(|c| c.name == field)
            || self
                .definition
                .numeric_categorization
                .as_ref()
                .is_some_and(|c| c.name == field)
    }

    /// Calculated fields first, then categorization labels.
    pub fn prepare_rows(&self, rows: &mut [Row]) {
        for row in rows.iter_mut() {
            self.calculated.apply(row);
            label_row(
                row,
                self.definition.categorization.as_ref(),
                self.definition.numeric_categorization.as_ref(),
            );
        }
    }

    /// The fetch for one section. Ungrouped tables push their sort and limit
    /// down to the store when the sort key is a stored column.
    pub fn row_query(
        &self,
        section: &Section,
        tenant_id: &str,
        date_range: ResolvedDateRange,
        section_index: usize,
    ) -> RowQuery {
        let mut query = RowQuery::new(tenant_id, date_range, section_index);
        if let Section::Table(table) = section {
            if table.group_by.is_none() {
                match &table.sort_by {
                    Some(field) if !self.is_derived(field) => {
                        query.order_by = Some((field.clone(), table.sort_direction));
                        query.limit = table.limit;
                    }
                    Some(_) => {}
                    None => query.limit = table.limit,
                }
            }
        }
        query
    }

    /// Run one section over its fetched rows. Header sections produce no data.
    pub fn execute(&self, section: &Section, mut rows: Vec<Row>) -> Option<SectionData> {
        if !section.needs_rows() {
            return None;
        }
        self.prepare_rows(&mut rows);
        let data = match section {
            Section::Hero(hero) => self.hero(hero, &rows),
            Section::StatRow(stats) => self.stat_row(stats, &rows),
            Section::CategoryGrid(grid) => self.category_grid(grid, &rows),
            Section::Chart(chart) => self.chart(chart, &rows),
            Section::Table(table) => self.table(table, rows),
            Section::Map(map) => self.map(map, &rows),
            Section::Header(_) => return None,
        };
        Some(data)
    }

    // ------------------------------------------------------------------------
    // Scalar sections
    // ------------------------------------------------------------------------

    fn hero(&self, section: &HeroSection, rows: &[Row]) -> SectionData {
        let refs: Vec<&Row> = rows.iter().collect();
        SectionData::Metric(metric_value(&refs, &section.metric))
    }

    fn stat_row(&self, section: &StatRowSection, rows: &[Row]) -> SectionData {
        let refs: Vec<&Row> = rows.iter().collect();
        SectionData::Metrics(
            section
                .metrics
                .iter()
                .map(|metric| metric_value(&refs, metric))
                .collect(),
        )
    }

    // ------------------------------------------------------------------------
    // Ranked group sections
    // ------------------------------------------------------------------------

    /// Per-group metric values, largest first, truncated to `limit`.
    pub fn ranked_groups(
        &self,
        rows: &[Row],
        group_by: &str,
        metric: &MetricConfig,
        subtitle: Option<&MetricConfig>,
        limit: Option<usize>,
    ) -> Vec<GroupValue> {
        let key = self.resolver.classify(group_by);
        let mut groups = Grouper::new(rows, |row| key.key(row)).finalize(|group| GroupValue {
            value: evaluate_metric(&group.rows, metric),
            subtitle_value: subtitle.map(|m| evaluate_metric(&group.rows, m)),
            count: group.rows.len(),
            name: group.key,
        });
        rank_desc(&mut groups, |g| g.value, limit);
        groups
    }

    fn category_grid(&self, section: &CategoryGridSection, rows: &[Row]) -> SectionData {
        SectionData::Groups(self.ranked_groups(
            rows,
            &section.group_by,
            &section.metric,
            section.subtitle_metric.as_ref(),
            section.max_categories,
        ))
    }

    fn chart(&self, section: &ChartSection, rows: &[Row]) -> SectionData {
        SectionData::Groups(self.ranked_groups(
            rows,
            &section.group_by,
            &section.metric,
            None,
            Some(CHART_TOP_N),
        ))
    }

    // ------------------------------------------------------------------------
    // Tables
    // ------------------------------------------------------------------------

    fn table(&self, section: &TableSection, rows: Vec<Row>) -> SectionData {
        let keys = column_keys(&section.columns);
        let columns = section
            .columns
            .iter()
            .zip(&keys)
            .map(|(col, key)| TableHeader {
                key: key.clone(),
                label: col.label.clone().unwrap_or_else(|| col.field.clone()),
                format: col.format.clone(),
            })
            .collect();

        let rows = match &section.group_by {
            None => self.flat_table(section, rows, &keys),
            Some(group_by) => self.grouped_table(section, &rows, group_by, &keys),
        };
        SectionData::Table(TableData { columns, rows })
    }

    fn flat_table(&self, section: &TableSection, mut rows: Vec<Row>, keys: &[String]) -> Vec<Row> {
        if let Some(field) = &section.sort_by {
            sort_rows(&mut rows, field, section.sort_direction);
        }
        if let Some(limit) = section.limit {
            rows.truncate(limit);
        }
        rows.iter()
            .map(|row| {
                section
                    .columns
                    .iter()
                    .zip(keys)
                    .map(|(col, key)| (key.clone(), row.get(&col.field).cloned().unwrap_or(Value::Null)))
                    .collect()
            })
            .collect()
    }

    fn grouped_table(
        &self,
        section: &TableSection,
        rows: &[Row],
        group_by: &str,
        keys: &[String],
    ) -> Vec<Row> {
        let key = self.resolver.classify(group_by);
        let mut out = Grouper::new(rows, |row| key.key(row)).finalize(|group| {
            let mut record = Map::new();
            for (col, out_key) in section.columns.iter().zip(keys) {
                let value = if col.field == group_by {
                    Value::String(group.key.clone())
                } else {
                    number(column_value(section, col, &group.rows))
                };
                record.insert(out_key.clone(), value);
            }
            record.insert(COUNT_FIELD.to_string(), Value::from(group.rows.len()));
            record
        });

        let sort_key = section
            .sort_by
            .as_deref()
            .filter(|field| out.iter().any(|r| r.contains_key(*field)))
            .unwrap_or(COUNT_FIELD);
        let direction = if section.sort_by.is_some() {
            section.sort_direction
        } else {
            SortDirection::Desc
        };
        sort_rows(&mut out, sort_key, direction);
        if let Some(limit) = section.limit {
            out.truncate(limit);
        }
        out
    }

    // ------------------------------------------------------------------------
    // Maps
    // ------------------------------------------------------------------------

    fn map(&self, section: &MapSection, rows: &[Row]) -> SectionData {
        let mut regions = match section.map_type {
            MapType::Choropleth | MapType::Cluster => {
                let field = section.group_by.as_deref().unwrap_or(DEFAULT_REGION_FIELD);
                let key = self.resolver.classify(field);
                Grouper::new(rows, |row| key.key(row)).finalize(|group| MapRegion {
                    value: evaluate_metric(&group.rows, &section.metric),
                    count: group.rows.len(),
                    name: group.key,
                    origin: None,
                    destination: None,
                })
            }
            MapType::Flow | MapType::Arc => {
                let (origin_field, destination_field) = flow_fields(section);
                let mut grouper = Grouper::default();
                let mut sides: HashMap<String, (String, String)> = HashMap::new();
                for row in rows {
                    let (origin, destination) = lane_sides(row, origin_field, destination_field);
                    let key = format!("{origin} -> {destination}");
                    sides.entry(key.clone()).or_insert((origin, destination));
                    grouper.push(key, row);
                }
                grouper.finalize(|group| {
                    let (origin, destination) = sides.remove(&group.key).unwrap_or_default();
                    MapRegion {
                        value: evaluate_metric(&group.rows, &section.metric),
                        count: group.rows.len(),
                        name: group.key,
                        origin: Some(origin),
                        destination: Some(destination),
                    }
                })
            }
        };
        rank_desc(&mut regions, |r| r.value, None);
        SectionData::Map(MapData {
            map_type: section.map_type,
            regions,
        })
    }
}

fn metric_value(rows: &[&Row], metric: &MetricConfig) -> MetricValue {
    MetricValue {
        label: metric.label.clone(),
        value: evaluate_metric(rows, metric),
        format: metric.format.clone(),
    }
}

fn number(value: f64) -> Value {
    Number::from_f64(value).map(Value::Number).unwrap_or(Value::Null)
}

/// Output keys for table columns; repeated fields get `_<position>`.
pub fn column_keys(columns: &[TableColumn]) -> Vec<String> {
    let mut keys: Vec<String> = Vec::with_capacity(columns.len());
    for (i, col) in columns.iter().enumerate() {
        if keys.contains(&col.field) {
            keys.push(format!("{}_{}", col.field, i));
        } else {
            keys.push(col.field.clone());
        }
    }
    keys
}

/// Explicit computation, then explicit aggregation, then a metric declared
/// for the same field, then a plain sum.
fn column_value(section: &TableSection, col: &TableColumn, rows: &[&Row]) -> f64 {
    if let Some(computation) = &col.computation {
        return compute(rows, computation);
    }
    if let Some(aggregation) = col.aggregation {
        return aggregate_field(rows, &col.field, aggregation);
    }
    if let Some(metric) = section.metrics.iter().find(|m| m.field == col.field) {
        return evaluate_metric(rows, metric);
    }
    aggregate_field(rows, &col.field, Aggregation::Sum)
}

/// Group key and metric of sections whose result is one value per group,
/// for server-side evaluation. Flow maps qualify only when their field pair
/// is one of the synthesized lane keys.
pub fn grouped_metric(section: &Section) -> Option<(&str, &MetricConfig)> {
    match section {
        Section::CategoryGrid(s) => Some((s.group_by.as_str(), &s.metric)),
        Section::Chart(s) => Some((s.group_by.as_str(), &s.metric)),
        Section::Map(s) => match s.map_type {
            MapType::Choropleth | MapType::Cluster => {
                Some((s.group_by.as_deref().unwrap_or(DEFAULT_REGION_FIELD), &s.metric))
            }
            MapType::Flow | MapType::Arc => {
                let fields = flow_fields(s);
                ["lane", "lane_city", "origin_to_destination"]
                    .into_iter()
                    .find(|name| lane_fields(name) == Some(fields))
                    .map(|name| (name, &s.metric))
            }
        },
        _ => None,
    }
}

fn flow_fields(section: &MapSection) -> (&str, &str) {
    let (default_origin, default_destination) = section
        .group_by
        .as_deref()
        .and_then(lane_fields)
        .unwrap_or((DEFAULT_ORIGIN_FIELD, DEFAULT_DESTINATION_FIELD));
    (
        section.origin_field.as_deref().unwrap_or(default_origin),
        section.destination_field.as_deref().unwrap_or(default_destination),
    )
}
