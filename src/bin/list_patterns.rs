//! List registered patterns
//!
//! Prints id, name, priority, effective delay, minimum history and a short
//! description for every detector in the standard registry. Delays come
//! from the same environment variables the runtime reads.
//!
//! Usage:
//!   cargo run --bin list_patterns
//!   cargo run --bin list_patterns -- --json

use dotenv::dotenv;
use patternwatch::pipeline::{config::PipelineConfig, registry::DetectorRegistry};
use serde_json::json;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::init();

    let config = PipelineConfig::from_env()?;
    let registry = DetectorRegistry::standard();
    let as_json = std::env::args().any(|arg| arg == "--json");

    if as_json {
        let rows: Vec<serde_json::Value> = registry
            .metadata()
            .into_iter()
            .map(|meta| {
                let delay = config.dispatch.delays.delay_for(meta.priority);
                let enabled = config.dispatch.enabled_patterns.allows(meta.pattern_id, meta.name)
                    && config.dispatch.enabled_priorities.allows(meta.priority);
                json!({
                    "pattern": meta,
                    "delay_secs": delay.as_secs(),
                    "enabled": enabled,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!("📋 {} registered patterns", registry.len());
    println!(
        "{:<4} {:<20} {:<10} {:>6} {:>8}  {}",
        "ID", "NAME", "PRIORITY", "DELAY", "MIN_LEN", "DESCRIPTION"
    );
    for meta in registry.metadata() {
        let delay = config.dispatch.delays.delay_for(meta.priority);
        let enabled = config.dispatch.enabled_patterns.allows(meta.pattern_id, meta.name)
            && config.dispatch.enabled_priorities.allows(meta.priority);
        println!(
            "{:<4} {:<20} {:<10} {:>5}s {:>8}  {}{}",
            meta.pattern_id.0,
            meta.name,
            meta.priority.as_str(),
            delay.as_secs(),
            meta.min_len,
            meta.description,
            if enabled { "" } else { " (disabled)" }
        );
    }

    Ok(())
}
