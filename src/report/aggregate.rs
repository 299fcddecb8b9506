//! Aggregation of row values into single numbers

use serde_json::Value;
use std::collections::HashSet;

use super::categorize::number_text;
use super::definition::{Aggregation, Combinator, Computation, MetricConfig};
use super::Row;

pub(crate) static NULL: Value = Value::Null;

/// Numeric view of a field value. Numeric strings count as numbers.
pub fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

/// Key used for distinct counting; `None` for null and empty strings.
fn distinct_key(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(number_text(n)),
        other => Some(other.to_string()),
    }
}

/// Reduce values under `kind`. Empty input yields 0 for every kind.
pub fn aggregate<'a, I>(values: I, kind: Aggregation) -> f64
where
    I: IntoIterator<Item = &'a Value>,
{
    let values = values.into_iter();
    match kind {
        Aggregation::Count => values.count() as f64,
        Aggregation::CountDistinct => values
            .filter_map(distinct_key)
            .collect::<HashSet<_>>()
            .len() as f64,
        Aggregation::Sum => values.map(|v| numeric(v).unwrap_or(0.0)).sum(),
        Aggregation::Avg => {
            let (sum, n) = values.fold((0.0, 0usize), |(sum, n), v| {
                (sum + numeric(v).unwrap_or(0.0), n + 1)
            });
            if n == 0 {
                0.0
            } else {
                sum / n as f64
            }
        }
        Aggregation::Min => values
            .map(|v| numeric(v).unwrap_or(0.0))
            .reduce(f64::min)
            .unwrap_or(0.0),
        Aggregation::Max => values
            .map(|v| numeric(v).unwrap_or(0.0))
            .reduce(f64::max)
            .unwrap_or(0.0),
    }
}

/// Combine two sub-aggregates. Dividing by zero gives 0.
pub fn combine(lhs: f64, rhs: f64, combinator: Combinator) -> f64 {
    match combinator {
        Combinator::Add => lhs + rhs,
        Combinator::Subtract => lhs - rhs,
        Combinator::Multiply => lhs * rhs,
        Combinator::Divide if rhs == 0.0 => 0.0,
        Combinator::Divide => lhs / rhs,
    }
}

/// Aggregate one field across rows; missing fields read as null.
pub fn aggregate_field(rows: &[&Row], field: &str, kind: Aggregation) -> f64 {
    aggregate(rows.iter().map(|r| r.get(field).unwrap_or(&NULL)), kind)
}

pub fn compute(rows: &[&Row], computation: &Computation) -> f64 {
    let lhs = aggregate_field(rows, &computation.field1, computation.agg1);
    let rhs = aggregate_field(rows, &computation.field2, computation.agg2);
    combine(lhs, rhs, computation.combinator)
}

/// A metric's value over `rows`; `computation` overrides the simple aggregate.
pub fn evaluate_metric(rows: &[&Row], metric: &MetricConfig) -> f64 {
    match &metric.computation {
        Some(computation) => compute(rows, computation),
        None => aggregate_field(rows, &metric.field, metric.aggregation),
    }
}
