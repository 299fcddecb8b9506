//! Report-definition execution engine for tenant-scoped shipment data.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod report;

pub use error::{ReportError, ReportResult};
