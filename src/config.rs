//! Runtime configuration shared by the CLI and the API server
//!
//! Every flag can also be supplied through a `FREIGHT_*` environment variable.

use clap::Args;
use std::time::Duration;

/// Row store connection settings
#[derive(Debug, Clone, Args)]
pub struct StoreConfig {
    /// SurrealDB endpoint (mem://, ws://host:port, wss://host)
    #[arg(long, env = "FREIGHT_DB_URL", default_value = "mem://")]
    pub db_url: String,

    #[arg(long, env = "FREIGHT_DB_NAMESPACE", default_value = "freight")]
    pub db_namespace: String,

    #[arg(long, env = "FREIGHT_DB_DATABASE", default_value = "reports")]
    pub db_database: String,

    /// Root user for remote stores
    #[arg(long, env = "FREIGHT_DB_USER")]
    pub db_user: Option<String>,

    #[arg(long, env = "FREIGHT_DB_PASS", hide_env_values = true)]
    pub db_pass: Option<String>,

    /// Wide denormalized shipment view
    #[arg(long, env = "FREIGHT_SHIPMENT_TABLE", default_value = "shipment")]
    pub table: String,

    /// Column holding the tenant scope id
    #[arg(long, env = "FREIGHT_TENANT_FIELD", default_value = "customer_id")]
    pub tenant_field: String,

    /// Column the report date range filters on
    #[arg(long, env = "FREIGHT_DATE_FIELD", default_value = "pickup_date")]
    pub date_field: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_url: "mem://".to_string(),
            db_namespace: "freight".to_string(),
            db_database: "reports".to_string(),
            db_user: None,
            db_pass: None,
            table: "shipment".to_string(),
            tenant_field: "customer_id".to_string(),
            date_field: "pickup_date".to_string(),
        }
    }
}

/// Report execution limits
#[derive(Debug, Clone, Args)]
pub struct EngineConfig {
    /// Deadline for each section, fetch included
    #[arg(long, env = "FREIGHT_SECTION_TIMEOUT_SECS", default_value = "30")]
    pub section_timeout_secs: u64,

    /// How many sections run at once
    #[arg(long, env = "FREIGHT_MAX_CONCURRENT_SECTIONS", default_value = "8")]
    pub max_concurrent_sections: usize,
}

impl EngineConfig {
    pub fn section_timeout(&self) -> Duration {
        Duration::from_secs(self.section_timeout_secs)
    }

    pub fn concurrency(&self) -> usize {
        self.max_concurrent_sections.max(1)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            section_timeout_secs: 30,
            max_concurrent_sections: 8,
        }
    }
}

/// Installs the fmt subscriber, honouring RUST_LOG (default: info)
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
