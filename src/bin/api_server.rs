//! REST API Server for report execution
//!
//! Usage:
//!   ./target/release/api_server [--port PORT] [--db-url URL] ...
//!
//! REST endpoints:
//!   GET  /api/v1/health            - Health check
//!   POST /api/v1/reports/execute   - Execute a report definition
//!   POST /api/v1/reports/sql       - Compiled query for one grouped section

use anyhow::Result;
use clap::Parser;
use freight_reports::api::{router, ReportService};
use freight_reports::config::{init_tracing, EngineConfig, StoreConfig};
use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "api_server", about = "Serve report execution over REST")]
struct Args {
    /// Port to listen on
    #[arg(long, env = "FREIGHT_PORT", default_value = "8080")]
    port: u16,

    #[command(flatten)]
    store: StoreConfig,

    #[command(flatten)]
    engine: EngineConfig,
}

fn print_banner(port: u16, args: &Args) {
    println!("============================================================");
    println!("              FREIGHT REPORTS API SERVER");
    println!("============================================================");
    println!();
    println!("  Port:     {}", port);
    println!("  REST:     http://localhost:{}/api/v1/", port);
    println!("  Store:    {} ({})", args.store.db_url, args.store.table);
    println!("  Sections: {} concurrent, {}s timeout", args.engine.concurrency(), args.engine.section_timeout_secs);
    println!();
    println!("REST Endpoints:");
    println!("  GET  /api/v1/health             Health check");
    println!("  POST /api/v1/reports/execute    Execute a report");
    println!("  POST /api/v1/reports/sql        Compile a grouped section");
    println!();
    println!("============================================================");
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    print_banner(args.port, &args);

    let service = Arc::new(ReportService::connect(args.store.clone(), args.engine.clone()).await?);
    let app = router(service);

    let addr: SocketAddr = format!("0.0.0.0:{}", args.port).parse()?;
    tracing::info!("Starting REST server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
