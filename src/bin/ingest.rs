//! Load a shipments CSV into the report view table.
//!
//! Usage:
//!   ingest --csv raw-data/shipments.csv [--tenant ACME] [--db-url ws://localhost:8000]

use anyhow::Result;
use clap::Parser;
use csv::ReaderBuilder;
use freight_reports::config::{init_tracing, StoreConfig};
use freight_reports::{db, models::CsvRecord};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "ingest", about = "Load shipments into the report view")]
struct Args {
    /// Shipments CSV with a header row
    #[arg(long, default_value = "raw-data/shipments.csv")]
    csv: PathBuf,

    /// Tenant assigned to rows without a customer_id
    #[arg(long, env = "FREIGHT_TENANT")]
    tenant: Option<String>,

    #[command(flatten)]
    store: StoreConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    info!("Connecting to SurrealDB at {}", args.store.db_url);
    let db = db::connect(&args.store).await?;

    info!("Initializing schema...");
    db::init_schema(&db, &args.store).await?;

    info!("Reading CSV from {:?}", args.csv);
    let mut reader = ReaderBuilder::new().has_headers(true).from_path(&args.csv)?;

    let mut shipment_count = 0;
    let mut error_count = 0;

    for (i, record) in reader.deserialize::<CsvRecord>().enumerate() {
        let result = match record {
            Ok(record) => match record.to_shipment(args.tenant.as_deref()) {
                Ok(shipment) => db::insert_shipment(&db, &args.store, &shipment)
                    .await
                    .map_err(anyhow::Error::from),
                Err(e) => Err(e),
            },
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(()) => shipment_count += 1,
            Err(e) => {
                if error_count < 5 {
                    warn!("Skipping record {}: {}", i, e);
                }
                error_count += 1;
            }
        }

        if (i + 1) % 5000 == 0 {
            info!("Processed {} records...", i + 1);
        }
    }

    info!(
        "Ingestion complete: {} shipments, {} errors",
        shipment_count, error_count
    );

    let total = db::count_rows(&db, &args.store).await?;
    info!("Database total: {} rows in {}", total, args.store.table);

    Ok(())
}
