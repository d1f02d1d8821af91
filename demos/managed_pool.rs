//! A managed pool of "engines" sized in the background
//!
//! Run with `RUST_LOG=adaptive_resource_pool=debug cargo run --example managed_pool`

use adaptive_resource_pool::{
    PoolConfiguration, PoolEventKind, ResourcePool, ResourcePoolSizeManager, SizeManagerOptions,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

struct Engine {
    serial: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("=== Managed Resource Pool ===\n");

    let serials = AtomicUsize::new(0);
    let pool = ResourcePool::new(
        move || {
            // stand-in for an expensive start-up
            std::thread::sleep(Duration::from_millis(20));
            Ok::<_, std::io::Error>(Engine {
                serial: serials.fetch_add(1, Ordering::Relaxed),
            })
        },
        PoolConfiguration::new().with_name("engines"),
    )?;

    let mut events = pool.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event.kind {
                PoolEventKind::ReapUnusedCycleStarted | PoolEventKind::ReapUnusedCycleCompleted { reaped: 0 } => {}
                kind => println!("   event: {kind:?}"),
            }
        }
    });

    let options = SizeManagerOptions::new()
        .with_minimum_pool_size(4)
        .with_growth(0.75, 0.5)
        .with_creation_delay(Duration::from_millis(50), Duration::from_millis(50))
        .with_creation_growth_interval(Duration::from_millis(250))
        .with_reaping(Duration::from_secs(1), Duration::from_millis(500), Duration::from_secs(1));
    let manager = ResourcePoolSizeManager::new(options)?;
    let managed = manager.manage(&pool)?;

    sleep(Duration::from_millis(500)).await;
    println!("1. After startup: {} resources", pool.resource_count());

    println!("2. Checking out 3 engines");
    let held: Vec<_> = (0..3).map(|_| pool.acquire_resource()).collect::<Result<_, _>>()?;
    let serials: Vec<usize> = held.iter().map(|engine| engine.serial).collect();
    println!("   serials: {serials:?}");
    sleep(Duration::from_millis(500)).await;
    println!(
        "   target {} with {} resources",
        managed.target_pool_size(),
        pool.resource_count()
    );
    drop(held);

    println!("3. Idling so the reaper trims the pool");
    sleep(Duration::from_secs(3)).await;
    println!(
        "   target {} with {} resources, threshold {:.2}, rate {:.2}",
        managed.target_pool_size(),
        pool.resource_count(),
        managed.growth_threshold_percent(),
        managed.growth_rate_percent()
    );

    println!("\n{:#?}", pool.metrics());
    pool.dispose();
    Ok(())
}
