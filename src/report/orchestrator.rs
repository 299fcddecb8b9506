//! Report orchestration
//!
//! Sections are independent: they share the read-only definition and the
//! resolved date range, and each owns the rows it fetches. They run
//! concurrently (bounded by `EngineConfig::max_concurrent_sections`) and are
//! joined back in declaration order. A failing section becomes an error
//! entry; it never aborts its siblings.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::date_range::{resolve, ResolvedDateRange};
use super::definition::{ReportDefinition, SectionEntry};
use super::executor::{ExecutionContext, SectionData};
use super::store::RowStore;
use crate::config::EngineConfig;
use crate::error::{ReportError, ReportResult};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionResult {
    pub section_index: usize,
    pub data: Option<SectionData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SectionResult {
    fn ok(section_index: usize, data: Option<SectionData>) -> Self {
        Self {
            section_index,
            data,
            error: None,
        }
    }

    fn failed(section_index: usize, error: &ReportError) -> Self {
        Self {
            section_index,
            data: None,
            error: Some(error.to_string()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutedReportData {
    pub sections: Vec<SectionResult>,
    pub executed_at: DateTime<Utc>,
    pub date_range: ResolvedDateRange,
}

impl ExecutedReportData {
    pub fn failed_sections(&self) -> impl Iterator<Item = &SectionResult> {
        self.sections.iter().filter(|s| s.is_error())
    }
}

pub struct ReportExecutor {
    store: Arc<dyn RowStore>,
    config: EngineConfig,
}

impl ReportExecutor {
    pub fn new(store: Arc<dyn RowStore>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    /// Execute every section of `definition` for one tenant.
    ///
    /// Only an unresolvable date range fails the whole call; everything
    /// else is reported per section.
    #[instrument(skip_all, fields(tenant = %tenant_id, sections = definition.sections.len()))]
    pub async fn execute(
        &self,
        definition: &ReportDefinition,
        tenant_id: &str,
        now: DateTime<Utc>,
        cancel: CancellationToken,
    ) -> ReportResult<ExecutedReportData> {
        let date_range = resolve(&definition.date_range, now)?;
        let ctx = ExecutionContext::new(definition);

        // Section futures are lazy; `buffered` polls at most `concurrency`
        // of them at a time and yields results in declaration order.
        let pending: Vec<_> = definition
            .sections
            .iter()
            .enumerate()
            .map(|(index, entry)| self.run_section(&ctx, index, entry, tenant_id, date_range, &cancel))
            .collect();
        let sections: Vec<SectionResult> = stream::iter(pending)
            .buffered(self.config.concurrency())
            .collect()
            .await;

        let failed = sections.iter().filter(|s| s.is_error()).count();
        info!(
            "Report executed: {} sections, {} failed",
            sections.len(),
            failed
        );

        Ok(ExecutedReportData {
            sections,
            executed_at: Utc::now(),
            date_range,
        })
    }

    #[instrument(skip_all, fields(section_index = index, kind = tracing::field::Empty))]
    async fn run_section(
        &self,
        ctx: &ExecutionContext<'_>,
        index: usize,
        entry: &SectionEntry,
        tenant_id: &str,
        date_range: ResolvedDateRange,
        cancel: &CancellationToken,
    ) -> SectionResult {
        let section = match entry {
            SectionEntry::Valid(section) => section,
            SectionEntry::Invalid { kind, reason, .. } => {
                let err = ReportError::UnsupportedSection {
                    kind: kind.clone(),
                    reason: reason.clone(),
                };
                warn!("Skipping section: {}", err);
                return SectionResult::failed(index, &err);
            }
        };
        tracing::Span::current().record("kind", section.kind());

        if !section.needs_rows() {
            return SectionResult::ok(index, None);
        }
        if cancel.is_cancelled() {
            return SectionResult::failed(index, &ReportError::Cancelled);
        }

        let query = ctx.row_query(section, tenant_id, date_range, index);
        let timeout = self.config.section_timeout();
        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ReportError::Cancelled),
            result = tokio::time::timeout(timeout, self.store.fetch(&query)) => match result {
                Ok(rows) => rows,
                Err(_) => Err(ReportError::Timeout { seconds: timeout.as_secs() }),
            },
        };

        let rows = match fetched {
            Ok(rows) => rows,
            Err(e) => {
                warn!("Section failed: {}", e);
                return SectionResult::failed(index, &e);
            }
        };
        debug!("Fetched {} rows", rows.len());

        match catch_unwind(AssertUnwindSafe(|| ctx.execute(section, rows))) {
            Ok(data) => SectionResult::ok(index, data),
            Err(_) => {
                let err = ReportError::Task("section computation panicked".to_string());
                warn!("Section failed: {}", err);
                SectionResult::failed(index, &err)
            }
        }
    }
}
