//! Row fetch boundary
//!
//! The engine never talks to a database directly; it asks a [`RowStore`]
//! for the rows of one tenant inside one date range. Tenant scoping and
//! field-level access control are the store's job.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde_json::Value;
use std::cmp::Ordering;

use super::aggregate::numeric;
use super::categorize::text_of;
use super::date_range::ResolvedDateRange;
use super::definition::SortDirection;
use super::Row;
use crate::error::ReportResult;

#[derive(Debug, Clone)]
pub struct RowQuery {
    pub tenant_id: String,
    pub date_range: ResolvedDateRange,
    /// Only set when the sort key is a stored column.
    pub order_by: Option<(String, SortDirection)>,
    pub limit: Option<usize>,
    /// Requesting section, for diagnostics.
    pub section_index: usize,
}

impl RowQuery {
    pub fn new(tenant_id: impl Into<String>, date_range: ResolvedDateRange, section_index: usize) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            date_range,
            order_by: None,
            limit: None,
            section_index,
        }
    }
}

#[async_trait]
pub trait RowStore: Send + Sync {
    async fn fetch(&self, query: &RowQuery) -> ReportResult<Vec<Row>>;
}

/// Reads a date column stored as RFC 3339 text or `YYYY-MM-DD`.
pub fn parse_row_date(value: &Value) -> Option<DateTime<Utc>> {
    let text = value.as_str()?;
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .map(|d| d.and_time(NaiveTime::MIN).and_utc())
}

/// Numbers compare numerically, everything else as text; nulls sort last
/// in either direction.
pub fn compare_values(a: Option<&Value>, b: Option<&Value>, direction: SortDirection) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    let ordering = match (a, b) {
        (None, None) => return Ordering::Equal,
        (None, Some(_)) => return Ordering::Greater,
        (Some(_), None) => return Ordering::Less,
        (Some(a), Some(b)) => match (numeric(a), numeric(b)) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            _ => text_of(a).cmp(&text_of(b)),
        },
    };
    match direction {
        SortDirection::Asc => ordering,
        SortDirection::Desc => ordering.reverse(),
    }
}

pub fn sort_rows(rows: &mut [Row], field: &str, direction: SortDirection) {
    rows.sort_by(|a, b| compare_values(a.get(field), b.get(field), direction));
}

/// Store over a fixed set of rows, used by the CLI with `--rows` and by tests.
#[derive(Debug, Clone)]
pub struct InMemoryRowStore {
    rows: Vec<Row>,
    tenant_field: String,
    date_field: String,
}

impl InMemoryRowStore {
    pub fn new(rows: Vec<Row>, tenant_field: impl Into<String>, date_field: impl Into<String>) -> Self {
        Self {
            rows,
            tenant_field: tenant_field.into(),
            date_field: date_field.into(),
        }
    }
}

#[async_trait]
impl RowStore for InMemoryRowStore {
    async fn fetch(&self, query: &RowQuery) -> ReportResult<Vec<Row>> {
        let mut rows: Vec<Row> = self
            .rows
            .iter()
            .filter(|row| row.get(&self.tenant_field).and_then(Value::as_str) == Some(query.tenant_id.as_str()))
            .filter(|row| {
                row.get(&self.date_field)
                    .and_then(parse_row_date)
                    .is_some_and(|d| query.date_range.contains(d))
            })
            .cloned()
            .collect();

        if let Some((field, direction)) = &query.order_by {
            sort_rows(&mut rows, field, *direction);
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn rows() -> Vec<Row> {
        vec![
            json!({ "customer_id": "acme", "pickup_date": "2024-05-02", "miles": 120 }),
            json!({ "customer_id": "acme", "pickup_date": "2024-05-20T10:00:00Z", "miles": 900 }),
            json!({ "customer_id": "acme", "pickup_date": "2023-01-01", "miles": 40 }),
            json!({ "customer_id": "globex", "pickup_date": "2024-05-03", "miles": 10 }),
            json!({ "customer_id": "acme", "miles": 5 }),
        ]
        .into_iter()
        .map(|v| v.as_object().cloned().unwrap())
        .collect()
    }

    fn may() -> ResolvedDateRange {
        ResolvedDateRange {
            start: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 5, 31, 23, 59, 59).unwrap(),
        }
    }

    #[tokio::test]
    async fn filters_by_tenant_and_date() {
        let store = InMemoryRowStore::new(rows(), "customer_id", "pickup_date");
        let fetched = store.fetch(&RowQuery::new("acme", may(), 0)).await.unwrap();
        let miles: Vec<i64> = fetched.iter().map(|r| r["miles"].as_i64().unwrap()).collect();
        assert_eq!(miles, vec![120, 900]);
    }

    #[tokio::test]
    async fn applies_order_and_limit() {
        let store = InMemoryRowStore::new(rows(), "customer_id", "pickup_date");
        let mut query = RowQuery::new("acme", may(), 0);
        query.order_by = Some(("miles".into(), SortDirection::Desc));
        query.limit = Some(1);
        let fetched = store.fetch(&query).await.unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0]["miles"], json!(900));
    }

    #[test]
    fn nulls_sort_last_both_ways() {
        let (one, two, null) = (json!(1), json!("2"), Value::Null);
        assert_eq!(compare_values(Some(&one), Some(&two), SortDirection::Asc), Ordering::Less);
        assert_eq!(compare_values(Some(&one), Some(&two), SortDirection::Desc), Ordering::Greater);
        assert_eq!(compare_values(Some(&null), Some(&one), SortDirection::Asc), Ordering::Greater);
        assert_eq!(compare_values(None, Some(&one), SortDirection::Desc), Ordering::Greater);
    }
}
