//! Execute a report definition and print the results as JSON.
//!
//! Usage:
//!   freight_reports --definition report.json --tenant ACME [--now 2024-06-30T12:00:00Z]
//!   freight_reports --definition report.json --tenant ACME --rows shipments.json
//!   freight_reports --definition report.json --tenant ACME --sql 2

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use freight_reports::api::ReportService;
use freight_reports::config::{init_tracing, EngineConfig, StoreConfig};
use freight_reports::report::{InMemoryRowStore, ReportDefinition, Row};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "freight_reports", about = "Execute a report definition against the shipment view")]
struct Cli {
    /// Report definition JSON file
    #[arg(long)]
    definition: PathBuf,

    /// Tenant (customer) scope
    #[arg(long, env = "FREIGHT_TENANT")]
    tenant: String,

    /// Reference time for date presets (RFC 3339); defaults to now
    #[arg(long)]
    now: Option<DateTime<Utc>>,

    /// Read rows from a JSON array instead of SurrealDB
    #[arg(long)]
    rows: Option<PathBuf>,

    /// Print the compiled query for this section index instead of executing
    #[arg(long)]
    sql: Option<usize>,

    #[command(flatten)]
    store: StoreConfig,

    #[command(flatten)]
    engine: EngineConfig,
}

fn read_json<T: serde::de::DeserializeOwned>(path: &PathBuf) -> Result<T> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let definition: ReportDefinition = read_json(&cli.definition)?;
    let now = cli.now.unwrap_or_else(Utc::now);

    let service = match &cli.rows {
        Some(path) => {
            let rows: Vec<Row> = read_json(path)?;
            info!("Loaded {} rows from {}", rows.len(), path.display());
            let store = InMemoryRowStore::new(rows, &cli.store.tenant_field, &cli.store.date_field);
            ReportService::new(Arc::new(store), cli.store.clone(), cli.engine.clone())
        }
        None => ReportService::connect(cli.store.clone(), cli.engine.clone()).await?,
    };

    if let Some(index) = cli.sql {
        let compiled = service.compile_section(&definition, index, &cli.tenant, now)?;
        println!("{}", serde_json::to_string_pretty(&compiled)?);
        return Ok(());
    }

    let data = service.execute(&definition, &cli.tenant, now).await?;
    for failed in data.failed_sections() {
        info!(
            "Section {} failed: {}",
            failed.section_index,
            failed.error.as_deref().unwrap_or_default()
        );
    }
    println!("{}", serde_json::to_string_pretty(&data)?);
    Ok(())
}
