//! Shared business logic for the report API
//!
//! Wires the row store, engine limits and the orchestrator together. Used by
//! the REST handlers and the CLI.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{EngineConfig, StoreConfig};
use crate::db::{self, SurrealRowStore};
use crate::report::date_range::resolve;
use crate::report::definition::SectionEntry;
use crate::report::executor::grouped_metric;
use crate::report::sql::{grouped_totals_query, CompiledQuery};
use crate::report::{ExecutedReportData, ReportDefinition, ReportExecutor, RowStore};

pub struct ReportService {
    executor: ReportExecutor,
    store_config: StoreConfig,
}

impl ReportService {
    pub fn new(store: Arc<dyn RowStore>, store_config: StoreConfig, engine: EngineConfig) -> Self {
        Self {
            executor: ReportExecutor::new(store, engine),
            store_config,
        }
    }

    /// Connect to SurrealDB, make sure the view table exists, and serve
    /// reports from it.
    pub async fn connect(store_config: StoreConfig, engine: EngineConfig) -> Result<Self> {
        let db = db::connect(&store_config).await?;
        db::init_schema(&db, &store_config).await?;
        let store = SurrealRowStore::new(db, store_config.clone())?;
        Ok(Self::new(Arc::new(store), store_config, engine))
    }

    /// Execute a report. Dropping the returned future cancels the sections
    /// still in flight.
    pub async fn execute(
        &self,
        definition: &ReportDefinition,
        tenant_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ExecutedReportData> {
        let cancel = CancellationToken::new();
        let _guard = cancel.clone().drop_guard();
        let data = self.executor.execute(definition, tenant_id, now, cancel).await?;
        Ok(data)
    }

    /// The parameterized query the SQL variant would run for one grouped
    /// section.
    pub fn compile_section(
        &self,
        definition: &ReportDefinition,
        section_index: usize,
        tenant_id: &str,
        now: DateTime<Utc>,
    ) -> Result<CompiledQuery> {
        let section = match definition.sections.get(section_index) {
            Some(SectionEntry::Valid(section)) => section,
            Some(SectionEntry::Invalid { kind, .. }) => {
                return Err(anyhow!("section {} has unsupported type '{}'", section_index, kind))
            }
            None => return Err(anyhow!("section {} does not exist", section_index)),
        };
        let (group_by, metric) = grouped_metric(section)
            .ok_or_else(|| anyhow!("{} sections have no server-side query", section.kind()))?;
        let date_range = resolve(&definition.date_range, now)?;
        let compiled = grouped_totals_query(definition, group_by, metric, &self.store_config, tenant_id, date_range)?;
        info!("Compiled section {} ({} bindings)", section_index, compiled.bindings.len());
        Ok(compiled)
    }
}
