//! Server-side variant: compile grouped aggregates into SurrealQL
//!
//! The query mirrors the in-process pipeline layer by layer:
//!
//! ```text
//! SELECT group_key, <aggregates>, count() AS row_count FROM (
//!     SELECT <group key expr> AS group_key, <metric value exprs> FROM (
//!         SELECT *, <formula n> AS <field n> FROM (
//!             ...
//!             SELECT *, <formula 1> AS <field 1> FROM (
//!                 SELECT * FROM type::table($table)
//!                 WHERE <tenant> = $tenant AND <date> >= $start AND <date> <= $end
//!             )
//!         )
//!     )
//! ) GROUP BY group_key
//! ```
//!
//! Each calculated field gets its own layer, so a formula reads earlier
//! calculated fields by name from the layer below.
//!
//! Every literal coming from the definition (keywords, category names,
//! range bounds, tenant, dates, table name) is a bound parameter. Field
//! names cannot be bound, so they are checked against `[A-Za-z_][A-Za-z0-9_]*`
//! before they reach the query text.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::date_range::ResolvedDateRange;
use super::definition::{Aggregation, Categorization, MetricConfig, NumericCategorization, ReportDefinition};
use super::formula::{parse, BinaryOp, Expr};
use super::group::{GroupKey, KeyResolver, OTHER, UNKNOWN};
use crate::config::StoreConfig;
use crate::error::{checked_identifier, ReportResult};

/// A parameter value; datetimes are bound as native datetimes by the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Binding {
    Text(String),
    Number(f64),
    DateTime(DateTime<Utc>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledQuery {
    pub text: String,
    pub bindings: Vec<(String, Binding)>,
    /// Output columns holding the metric's aggregate(s): one for a simple
    /// metric, two for a computation.
    #[serde(skip)]
    pub aggregate_columns: Vec<String>,
}

#[derive(Debug, Default)]
struct Params {
    bindings: Vec<(String, Binding)>,
}

impl Params {
    fn bind(&mut self, value: Binding) -> String {
        let name = format!("p{}", self.bindings.len());
        let placeholder = format!("${name}");
        self.bindings.push((name, value));
        placeholder
    }

    fn text(&mut self, value: &str) -> String {
        self.bind(Binding::Text(value.to_string()))
    }
}

// ============================================================================
// Expression fragments
// ============================================================================

fn numeric(expr: &str) -> String {
    format!("(IF type::is::number({expr}) THEN {expr} ELSE 0 END)")
}

/// String form of a value. Numbers drop the `f`/`dec` type suffix SurrealDB
/// prints, which leaves the same text the in-process `text_of` produces.
fn value_text(field: &str) -> String {
    format!(
        "(IF type::is::number({field}) THEN string::replace(string::replace(<string> {field}, 'dec', ''), 'f', '') ELSE <string> {field} END)"
    )
}

/// Null, missing and empty values collapse to `fallback`.
fn text_or(field: &str, fallback: &str) -> String {
    format!(
        "(IF {field} = NONE OR {field} = NULL OR {field} = '' THEN '{fallback}' ELSE {} END)",
        value_text(field)
    )
}

fn categorization_expr(cat: &Categorization, params: &mut Params) -> ReportResult<String> {
    let field = checked_identifier(&cat.field)?;
    let haystack = format!(
        "string::lowercase((IF {field} = NONE OR {field} = NULL THEN '' ELSE {} END))",
        value_text(field)
    );
    let mut branches = Vec::new();
    for rule in &cat.rules {
        let tests: Vec<String> = rule
            .contains
            .as_slice()
            .iter()
            .filter(|k| !k.is_empty())
            .map(|k| format!("string::contains({haystack}, {})", params.text(&k.to_lowercase())))
            .collect();
        if tests.is_empty() {
            continue;
        }
        branches.push(format!("{} THEN {}", tests.join(" OR "), params.text(&rule.category)));
    }
    let default = params.text(&cat.default);
    Ok(if_chain(branches, default))
}

fn numeric_categorization_expr(cat: &NumericCategorization, params: &mut Params) -> ReportResult<String> {
    let field = checked_identifier(&cat.field)?;
    let branches = cat
        .ranges
        .iter()
        .map(|range| {
            let mut tests = vec![format!("type::is::number({field})")];
            if let Some(min) = range.min {
                tests.push(format!("{field} >= {}", params.bind(Binding::Number(min))));
            }
            if let Some(max) = range.max {
                tests.push(format!("{field} < {}", params.bind(Binding::Number(max))));
            }
            format!("{} THEN {}", tests.join(" AND "), params.text(&range.category))
        })
        .collect();
    Ok(if_chain(branches, format!("'{UNKNOWN}'")))
}

fn if_chain(branches: Vec<String>, default: String) -> String {
    if branches.is_empty() {
        return default;
    }
    format!("(IF {} ELSE {default} END)", branches.join(" ELSE IF "))
}

fn group_key_expr(key: GroupKey<'_>, params: &mut Params) -> ReportResult<String> {
    match key {
        GroupKey::Categorized(cat) => categorization_expr(cat, params),
        GroupKey::NumericCategorized(cat) => numeric_categorization_expr(cat, params),
        GroupKey::Lane {
            origin,
            destination,
        } => Ok(format!(
            "string::concat({}, ' -> ', {})",
            text_or(checked_identifier(origin)?, UNKNOWN),
            text_or(checked_identifier(destination)?, UNKNOWN)
        )),
        GroupKey::Field(field) => Ok(text_or(checked_identifier(field)?, OTHER)),
    }
}

// ============================================================================
// Calculated fields
// ============================================================================

/// Guards are collected innermost-first so `OR` short-circuits before an
/// outer denominator that itself divides is evaluated. Every field read,
/// including earlier calculated fields, goes through `numeric` so a null
/// reads as 0, as it does in process.
fn formula_expr(expr: &Expr, guards: &mut Vec<String>) -> ReportResult<String> {
    Ok(match expr {
        Expr::Number(n) => format!("{n:?}"),
        Expr::Field(name) => numeric(checked_identifier(name)?),
        Expr::Neg(inner) => format!("(-{})", formula_expr(inner, guards)?),
        Expr::Binary { op, lhs, rhs } => {
            let l = formula_expr(lhs, guards)?;
            let r = formula_expr(rhs, guards)?;
            let sym = match op {
                BinaryOp::Add => "+",
                BinaryOp::Sub => "-",
                BinaryOp::Mul => "*",
                BinaryOp::Div => {
                    guards.push(format!("{r} = 0"));
                    "/"
                }
            };
            format!("({l} {sym} {r})")
        }
    })
}

/// Formulas that do not parse project NONE, matching the in-process null.
fn calculated_expr(formula: &str) -> ReportResult<String> {
    let expr = match parse(formula) {
        Ok(expr) => expr,
        Err(_) => return Ok("NONE".to_string()),
    };
    let mut guards = Vec::new();
    let body = formula_expr(&expr, &mut guards)?;
    Ok(if guards.is_empty() {
        body
    } else {
        format!("(IF {} THEN NONE ELSE {body} END)", guards.join(" OR "))
    })
}

/// Wraps `base` in one `SELECT *, <formula> AS <name>` layer per calculated
/// field, in declaration order.
fn calculated_layers(def: &ReportDefinition, base: String) -> ReportResult<String> {
    def.calculated_fields.iter().try_fold(base, |query, field| {
        let name = checked_identifier(&field.name)?;
        let sql = calculated_expr(&field.formula)?;
        Ok(format!("SELECT *, {sql} AS {name} FROM ({query})"))
    })
}

// ============================================================================
// Metrics
// ============================================================================

/// Middle-layer value column and outer aggregate for one sub-aggregate.
fn metric_columns(field: &str, aggregation: Aggregation, slot: usize) -> ReportResult<(Option<String>, String)> {
    let column = format!("v{slot}");
    let out = format!("a{slot}");
    Ok(match aggregation {
        Aggregation::Count => (None, format!("count() AS {out}")),
        Aggregation::CountDistinct => {
            let field = checked_identifier(field)?;
            // The store counts the distinct non-null entries of the set.
            (
                Some(format!(
                    "(IF {field} = NONE OR {field} = NULL OR {field} = '' THEN NONE ELSE {} END) AS {column}",
                    value_text(field)
                )),
                format!("array::group({column}) AS {out}"),
            )
        }
        agg => {
            let field = checked_identifier(field)?;
            let func = match agg {
                Aggregation::Sum => "math::sum",
                Aggregation::Avg => "math::mean",
                Aggregation::Min => "math::min",
                _ => "math::max",
            };
            (
                Some(format!("{} AS {column}", numeric(field))),
                format!("{func}({column}) AS {out}"),
            )
        }
    })
}

/// Compile the grouped totals of `metric` by `group_by` for one tenant.
pub fn grouped_totals_query(
    def: &ReportDefinition,
    group_by: &str,
    metric: &MetricConfig,
    store: &StoreConfig,
    tenant_id: &str,
    date_range: ResolvedDateRange,
) -> ReportResult<CompiledQuery> {
    let mut params = Params::default();

    let table = params.text(&store.table);
    let tenant_field = checked_identifier(&store.tenant_field)?;
    let date_field = checked_identifier(&store.date_field)?;
    let tenant = params.text(tenant_id);
    let start = params.bind(Binding::DateTime(date_range.start));
    let end = params.bind(Binding::DateTime(date_range.end));
    let inner = calculated_layers(
        def,
        format!(
            "SELECT * FROM type::table({table}) WHERE {tenant_field} = {tenant} AND {date_field} >= {start} AND {date_field} <= {end}"
        ),
    )?;

    let resolver = KeyResolver::new(def);
    let key = group_key_expr(resolver.classify(group_by), &mut params)?;

    let parts = match &metric.computation {
        Some(c) => vec![(c.field1.as_str(), c.agg1), (c.field2.as_str(), c.agg2)],
        None => vec![(metric.field.as_str(), metric.aggregation)],
    };
    let mut middle = vec![format!("{key} AS group_key")];
    let mut outer = vec!["group_key".to_string()];
    let mut aggregate_columns = Vec::new();
    for (slot, (field, aggregation)) in parts.into_iter().enumerate() {
        let (value, aggregate) = metric_columns(field, aggregation, slot)?;
        middle.extend(value);
        outer.push(aggregate);
        aggregate_columns.push(format!("a{slot}"));
    }
    outer.push("count() AS row_count".to_string());

    let text = format!(
        "SELECT {} FROM (SELECT {} FROM ({inner})) GROUP BY group_key",
        outer.join(", "),
        middle.join(", ")
    );

    Ok(CompiledQuery {
        text,
        bindings: params.bindings,
        aggregate_columns,
    })
}
