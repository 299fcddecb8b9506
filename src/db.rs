use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use surrealdb::engine::any::{self, Any};
use surrealdb::opt::auth::Root;
use surrealdb::Surreal;
use tracing::{debug, info, instrument};

use crate::config::StoreConfig;
use crate::error::{checked_identifier, ReportError, ReportResult};
use crate::models::Shipment;
use crate::report::aggregate::combine;
use crate::report::date_range::ResolvedDateRange;
use crate::report::definition::{MetricConfig, ReportDefinition, SortDirection};
use crate::report::executor::GroupValue;
use crate::report::group::rank_desc;
use crate::report::sql::{grouped_totals_query, Binding, CompiledQuery};
use crate::report::{Row, RowQuery, RowStore};

pub type DbConn = Surreal<Any>;

/// Connect to the configured endpoint (`mem://` for an embedded store).
pub async fn connect(config: &StoreConfig) -> ReportResult<DbConn> {
    let db = any::connect(config.db_url.as_str()).await?;
    if let (Some(username), Some(password)) = (&config.db_user, &config.db_pass) {
        db.signin(Root {
            username: username.as_str(),
            password: password.as_str(),
        })
        .await?;
    }
    db.use_ns(config.db_namespace.as_str())
        .use_db(config.db_database.as_str())
        .await?;
    info!("Connected to {} ({}/{})", config.db_url, config.db_namespace, config.db_database);
    Ok(db)
}

/// Define the shipment view table and the indexes the report filters use.
pub async fn init_schema(db: &DbConn, config: &StoreConfig) -> ReportResult<()> {
    let table = checked_identifier(&config.table)?;
    let tenant = checked_identifier(&config.tenant_field)?;
    let date = checked_identifier(&config.date_field)?;
    db.query(format!(
        r#"
        DEFINE TABLE IF NOT EXISTS {table} SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_{table}_tenant_date ON {table} FIELDS {tenant}, {date};
        DEFINE INDEX IF NOT EXISTS idx_{table}_load_id ON {table} FIELDS load_id;
        "#
    ))
    .await?
    .check()?;
    Ok(())
}

/// Insert one shipment into the configured view table.
pub async fn insert_shipment(db: &DbConn, config: &StoreConfig, shipment: &Shipment) -> ReportResult<()> {
    db.query("CREATE type::table($table) CONTENT $shipment RETURN NONE")
        .bind(("table", config.table.clone()))
        .bind(("shipment", shipment.clone()))
        .await?
        .check()?;
    Ok(())
}

/// Row count of the view table, for ingest verification.
pub async fn count_rows(db: &DbConn, config: &StoreConfig) -> ReportResult<i64> {
    let total: Option<i64> = db
        .query("SELECT count() FROM type::table($table) GROUP ALL")
        .bind(("table", config.table.clone()))
        .await?
        .take("count")?;
    Ok(total.unwrap_or(0))
}

// ============================================================================
// Row store
// ============================================================================

/// [`RowStore`] over a SurrealDB table. Tenant and date predicates are
/// always part of the query; callers cannot widen them.
#[derive(Clone)]
pub struct SurrealRowStore {
    db: DbConn,
    config: StoreConfig,
}

impl SurrealRowStore {
    pub fn new(db: DbConn, config: StoreConfig) -> ReportResult<Self> {
        checked_identifier(&config.tenant_field)?;
        checked_identifier(&config.date_field)?;
        Ok(Self { db, config })
    }

    pub fn db(&self) -> &DbConn {
        &self.db
    }

    async fn run(&self, compiled: &CompiledQuery) -> ReportResult<Vec<Value>> {
        debug!("Running query: {}", compiled.text);
        let mut query = self.db.query(compiled.text.clone());
        for (name, binding) in &compiled.bindings {
            query = match binding {
                Binding::Text(s) => query.bind((name.clone(), s.clone())),
                Binding::Number(n) => query.bind((name.clone(), *n)),
                Binding::DateTime(dt) => query.bind((name.clone(), surrealdb::sql::Datetime::from(*dt))),
            };
        }
        let mut response = query.await?.check()?;
        let rows: Vec<Value> = response.take(0)?;
        Ok(rows)
    }

    /// Grouped metric totals computed by the database instead of in process.
    #[instrument(skip(self, definition, metric, date_range))]
    pub async fn grouped_totals(
        &self,
        definition: &ReportDefinition,
        group_by: &str,
        metric: &MetricConfig,
        tenant_id: &str,
        date_range: ResolvedDateRange,
    ) -> ReportResult<Vec<GroupValue>> {
        let compiled = grouped_totals_query(definition, group_by, metric, &self.config, tenant_id, date_range)?;
        let rows = self.run(&compiled).await?;

        let mut groups: Vec<GroupValue> = rows
            .iter()
            .map(|row| {
                let column = |name: &str| aggregate_value(row.get(name));
                let value = match (&metric.computation, compiled.aggregate_columns.as_slice()) {
                    (Some(c), [lhs, rhs]) => combine(column(lhs), column(rhs), c.combinator),
                    (_, [first, ..]) => column(first),
                    _ => 0.0,
                };
                let name = match row.get("group_key") {
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                GroupValue {
                    name,
                    value,
                    subtitle_value: None,
                    count: row.get("row_count").and_then(Value::as_u64).unwrap_or(0) as usize,
                }
            })
            .collect();
        rank_desc(&mut groups, |g| g.value, None);
        Ok(groups)
    }
}

/// Numeric aggregates read as-is; a distinct set (`array::group`) reads as
/// the number of non-null members.
fn aggregate_value(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter(|v| !v.is_null())
            .map(Value::to_string)
            .collect::<HashSet<_>>()
            .len() as f64,
        Some(v) => v.as_f64().unwrap_or(0.0),
        None => 0.0,
    }
}

fn object_rows(rows: Vec<Value>) -> ReportResult<Vec<Row>> {
    rows.into_iter()
        .map(|row| match row {
            Value::Object(map) => Ok(map),
            other => Err(ReportError::Fetch(format!("expected an object row, got {other}"))),
        })
        .collect()
}

#[async_trait]
impl RowStore for SurrealRowStore {
    /// With a sort key and a limit, rows whose key is present are fetched
    /// first and rows with a null or missing key only fill what remains, so
    /// nulls sort last in both directions as they do in process.
    #[instrument(skip(self, query), fields(section_index = query.section_index))]
    async fn fetch(&self, query: &RowQuery) -> ReportResult<Vec<Row>> {
        let tenant_field = &self.config.tenant_field;
        let date_field = &self.config.date_field;
        let scoped = format!(
            "SELECT * OMIT id FROM type::table($table) WHERE {tenant_field} = $tenant AND {date_field} >= $start AND {date_field} <= $end"
        );
        let bindings = vec![
            ("table".to_string(), Binding::Text(self.config.table.clone())),
            ("tenant".to_string(), Binding::Text(query.tenant_id.clone())),
            ("start".to_string(), Binding::DateTime(query.date_range.start)),
            ("end".to_string(), Binding::DateTime(query.date_range.end)),
        ];
        let compiled = |text: String| CompiledQuery {
            text,
            bindings: bindings.clone(),
            aggregate_columns: Vec::new(),
        };

        let (field, direction) = match &query.order_by {
            Some((field, direction)) => (checked_identifier(field)?, direction),
            None => {
                let text = match query.limit {
                    Some(limit) => format!("{scoped} LIMIT {limit}"),
                    None => scoped,
                };
                return object_rows(self.run(&compiled(text)).await?);
            }
        };
        let direction = match direction {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        };
        let Some(limit) = query.limit else {
            let text = format!("{scoped} ORDER BY {field} {direction}");
            return object_rows(self.run(&compiled(text)).await?);
        };

        let present = format!(
            "{scoped} AND {field} != NONE AND {field} != NULL ORDER BY {field} {direction} LIMIT {limit}"
        );
        let mut rows = object_rows(self.run(&compiled(present)).await?)?;
        if rows.len() < limit {
            let missing = format!(
                "{scoped} AND ({field} = NONE OR {field} = NULL) LIMIT {}",
                limit - rows.len()
            );
            rows.extend(object_rows(self.run(&compiled(missing)).await?)?);
        }
        Ok(rows)
    }
}
