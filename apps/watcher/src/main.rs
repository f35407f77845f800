mod config;

use anyhow::{Context, Result};
use config::Config;
use live_engine::{Query, QueryResult, QuerySourceRegistry};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("🔭 Starting live watcher");

    // Load configuration
    let config = Config::load().context("Failed to load apps/watcher/config.toml")?;

    // Site root - can be overridden by env var
    let http_root =
        std::env::var("TRADE_SITE_URL").unwrap_or_else(|_| config.site.http_root.clone());
    let engine = config.engine_config(&http_root);

    info!("📡 Trade site: {}", http_root);
    info!("🔌 Transport: {:?}", engine.transport);

    let queries = config.queries();
    if queries.is_empty() {
        info!("❌ No queries in config.toml");
        return Ok(());
    }

    let registry = QuerySourceRegistry::new(engine).context("Failed to build registry")?;
    let mut seen: HashMap<Query, HashSet<String>> = HashMap::new();
    let mut ticker =
        tokio::time::interval(Duration::from_millis(config.engine.poll_interval_ms.max(1)));

    info!("✅ Watching {} queries", queries.len());

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for query in &queries {
                    match registry.issue_query(query).await {
                        Ok(result) => report(&mut seen, result),
                        Err(e) => error!("❌ Query {} rejected: {}", query, e),
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
        }
    }

    registry.dispose_all().await;
    info!("👋 Watcher stopped");
    Ok(())
}

/// Log listings that appeared or went away since the last tick
fn report(seen: &mut HashMap<Query, HashSet<String>>, result: QueryResult) {
    let current: HashSet<String> = result.items.iter().map(|item| item.hash.clone()).collect();
    let previous = seen.entry(result.query.clone()).or_default();

    for item in result.items.iter().filter(|item| !previous.contains(&item.hash)) {
        info!(
            "🆕 [{}] {} {} ({})",
            result.query,
            item.name,
            item.price.as_deref().unwrap_or("no price"),
            item.hash
        );
    }

    let gone = previous.difference(&current).count();
    if gone > 0 {
        info!("🗑️  [{}] {} listings gone", result.query, gone);
    }
    if !result.is_live() {
        warn!(
            "[{}] Not live ({}), {} listings at {}",
            result.query,
            result.state,
            current.len(),
            result.fetched_at.format("%H:%M:%S")
        );
    }

    *previous = current;
}
