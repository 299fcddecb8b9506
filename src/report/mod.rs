//! Report execution engine
//!
//! Turns a declarative [`ReportDefinition`] plus the rows of a tenant-scoped
//! shipment view into computed section results.

pub mod aggregate;
pub mod categorize;
pub mod date_range;
pub mod definition;
pub mod executor;
pub mod formula;
pub mod group;
pub mod orchestrator;
pub mod sql;
pub mod store;

/// One flat record from the shipment view.
pub type Row = serde_json::Map<String, serde_json::Value>;

pub use date_range::ResolvedDateRange;
pub use definition::{ReportDefinition, Section, SectionEntry};
pub use executor::{ExecutionContext, SectionData};
pub use orchestrator::{ExecutedReportData, ReportExecutor, SectionResult};
pub use store::{InMemoryRowStore, RowQuery, RowStore};
