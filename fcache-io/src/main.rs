use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use fcache::builder::Builder;
use fcache::config::Config;
use fcache::error::CacheError;
use fcache::fmt::parse_size;
use fcache::group::{GetterFunc, Groups};
use fcache::platform::Platform;
use fcache::pool::PeerPool;
use fcache::server::Server;

/// Capacity of the demo group unless **groups.scores.max_memory** says otherwise.
const DEFAULT_SCORES_CAPACITY: &str = "2k";

const STATS_INTERVAL: Duration = Duration::from_secs(60);

/// Simulates a slow database which knows a handful of scores.
fn scores_db() -> HashMap<&'static str, &'static str> {
    let mut db = HashMap::new();
    let _ = db.insert("Tom", "630");
    let _ = db.insert("Jack", "589");
    let _ = db.insert("Sam", "567");

    db
}

fn scores_capacity(platform: &Arc<Platform>) -> anyhow::Result<usize> {
    let setting = platform
        .find::<Config>()
        .and_then(|config| config.current().query_scalar("groups.scores.max_memory"))
        .unwrap_or_else(|| DEFAULT_SCORES_CAPACITY.to_owned());

    parse_size(setting)
}

fn log_stats_periodically(platform: Arc<Platform>) {
    fcache::spawn!(async move {
        while platform.is_running() {
            tokio::time::sleep(STATS_INTERVAL).await;
            if let Some(groups) = platform.find::<Groups>() {
                for name in groups.names() {
                    if let Some(group) = groups.find(&name) {
                        log::info!("Group {}: {}", name, group.stats());
                    }
                }
            }
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let platform = Builder::new().enable_all().build().await;

    let db = scores_db();
    let group = platform.require::<Groups>().new_group(
        "scores",
        scores_capacity(&platform)?,
        GetterFunc::new(move |key: &str| {
            log::info!("[SlowDB] search key {}", key);
            db.get(key)
                .map(|value| value.as_bytes().to_vec())
                .ok_or_else(|| CacheError::not_found(key))
        }),
    );
    group.register_peers(platform.require::<PeerPool>());

    log_stats_periodically(platform.clone());

    platform.require::<Server>().event_loop().await;

    Ok(())
}
