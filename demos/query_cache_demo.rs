//! Demonstrates the query cache
//!
//! This example shows how to:
//! - Load configuration from the environment
//! - Run cached reads and observe hits
//! - Invalidate after a character changes
//! - Inspect cache statistics
//!
//! Run with `RUST_LOG=cheo_kg=debug` to see policy and cache decisions.

use cheo_kg::cache::{EntityType, QueryCache, QueryDescriptor};
use cheo_kg::error::FetchError;
use cheo_kg::schema::{Character, Play};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("cheo_kg=info".parse()?))
        .init();

    let cache = QueryCache::from_env()?;
    let _sweeper = cache.start_sweeper();
    let origin_calls = Arc::new(AtomicU32::new(0));

    println!("1. Looking up a character twice...");
    for _ in 0..2 {
        let calls = Arc::clone(&origin_calls);
        let character: Character = cache
            .query(&QueryDescriptor::view_character("Thị Mầu"), move || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    let mut character = Character::new("Thị Mầu");
                    character.role_type = Some("đào lệch".to_string());
                    character.plays.push("Quan Âm Thị Kính".to_string());
                    Ok(character)
                }
            })
            .await?;
        println!("   {} ({:?})", character.name, character.role_type);
    }
    println!("   Origin queried {} time(s)\n", origin_calls.load(Ordering::SeqCst));

    println!("2. Case-insensitive search shares the entry...");
    for name in ["Thị Mầu", "  thị mầu "] {
        let plays: Vec<Play> = cache
            .query(&QueryDescriptor::plays_by_character(name), || async {
                Ok(vec![Play::new("Quan Âm Thị Kính")])
            })
            .await?;
        println!("   '{}' -> {} play(s)", name, plays.len());
    }

    println!("\n3. A failing origin is not cached...");
    let missing: cheo_kg::Result<Character> = cache
        .query(&QueryDescriptor::view_character("Nobody"), || async {
            Err(FetchError::NotFound("Nobody".to_string()))
        })
        .await;
    if let Err(e) = missing {
        println!("   {}", e);
    }

    println!("\n4. Character edited; invalidating...");
    let report = cache.on_mutation(EntityType::Character, "Thị Mầu").await;
    println!(
        "   Mutation {} removed {} entries (deferred: {})",
        report.mutation_id, report.removed, report.deferred
    );

    println!("\n5. Cache statistics");
    let stats = cache.cache_stats().await?;
    println!("   {}", stats);
    for (domain, count) in &stats.per_domain {
        println!("   {}: {} entries", domain, count);
    }

    Ok(())
}
