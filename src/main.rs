use std::sync::Arc;

use serde::Deserialize;
use tracing::info;

use slotwise::engine::{Engine, EngineConfig};
use slotwise::planner::Planner;
use slotwise::query::QueryRequest;
use slotwise::store::{InMemoryStore, StoreFixture};

/// Store contents plus the query to run against them.
#[derive(Deserialize)]
struct Fixture {
    #[serde(flatten)]
    store: StoreFixture,
    query: QueryRequest,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let metrics_port: Option<u16> = std::env::var("SLOTWISE_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    slotwise::observability::init(metrics_port)?;

    let config = match std::env::var("SLOTWISE_ENGINE").as_deref() {
        Ok("restricted") => EngineConfig::restricted(),
        Ok("full") | Err(_) => EngineConfig::full(),
        Ok(other) => return Err(format!("unknown SLOTWISE_ENGINE: {other} (expected full or restricted)").into()),
    };

    let Some(path) = std::env::args().nth(1) else {
        return Err("usage: slotwise <fixture.json>".into());
    };
    let fixture: Fixture = serde_json::from_str(&std::fs::read_to_string(&path)?)?;

    let store = Arc::new(InMemoryStore::from_fixture(fixture.store));
    info!("loaded {path}: {} resources", store.resource_count());
    info!("  engine: {config:?}");

    let planner = Planner::new(store, Engine::new(config));
    let availability = planner.compute(fixture.query).await?;
    println!("{}", serde_json::to_string_pretty(&availability)?);
    Ok(())
}
