//! Example demonstrating live bindings driven by a watched file.
//!
//! This example shows how to:
//! - Bind typed values and a group of values to listeners
//! - Keep built-in defaults behind the file
//! - Refresh automatically when the file changes
//!
//! Run with: cargo run --example live_bindings
//!
//! While running, edit demos/config/live_bindings.yaml. Setting
//! `server.workers` above 64 is refused and the previous values stay active.

use hotswap_bindings::notify::SnapshotWatcher;
use hotswap_bindings::prelude::*;
use hotswap_bindings::snapshot::{FileSnapshotProvider, RefreshOutcome, SnapshotRefresher};
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
struct Database {
    url: String,
    max_connections: u32,
}

/// What the listeners below keep up to date.
#[derive(Debug, Default)]
struct Runtime {
    workers: u32,
    database: Database,
    banner: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    println!("=== Live Bindings Example ===\n");

    let config_path = "demos/config/live_bindings.yaml";
    if !std::path::Path::new(config_path).exists() {
        std::fs::create_dir_all("demos/config")?;
        std::fs::write(
            config_path,
            r#"server:
  workers: 4

database:
  url: postgres://localhost/app
  max_connections: 10
"#,
        )?;
        println!("Created {}", config_path);
    }

    let defaults = TreeSource::builder()
        .with_name("defaults")
        .set("server.workers", 1i64)
        .set("banner", "hello from the defaults")
        .build()?;

    let service = Arc::new(
        DeltaService::builder()
            .with_defaults(Arc::new(defaults))
            .build(),
    );
    let refresher = Arc::new(SnapshotRefresher::new(
        Arc::clone(&service),
        FileSnapshotProvider::new(config_path),
    ));
    let initial = refresher.initialize()?;
    println!("Loaded {} (modified {})\n", initial.location, initial.timestamp);

    let runtime = Arc::new(Mutex::new(Runtime::default()));
    let lock = GroupLock::new();

    // Standalone binding; the file may leave it to the defaults
    let target = Arc::clone(&runtime);
    let banner = ValueDefinition::<String>::new("banner", move |new: Arc<String>, _| {
        target.lock().banner = new.to_string();
        Ok(())
    });
    service.register(&banner, true)?;

    // Workers and database commit together
    let target = Arc::clone(&runtime);
    let workers = ValueDefinition::<u32>::new("server.workers", move |new: Arc<u32>, old| {
        if *new > 64 {
            return Err(format!("refusing {} workers", new).into());
        }
        println!("  workers: {:?} -> {}", old.as_deref(), new);
        target.lock().workers = *new;
        Ok(())
    });
    let target = Arc::clone(&runtime);
    let database = ValueDefinition::<Database>::new("database", move |new: Arc<Database>, _| {
        println!("  database: {} ({} connections)", new.url, new.max_connections);
        target.lock().database = (*new).clone();
        Ok(())
    });
    let group = ValueDefinitionGroup::builder("server")
        .value(&workers)
        .value(&database)
        .on_change(|source| {
            println!("  group committed from {}", source.name());
            Ok(())
        })
        .lock(lock.clone())
        .build();
    service.register_group(group, true)?;

    {
        let _guard = lock.lock();
        println!("\nCurrent runtime: {:?}\n", runtime.lock());
    }

    let (_watcher, mut outcomes) = {
        let (watcher, outcomes) =
            SnapshotWatcher::new(Arc::clone(&refresher), Duration::from_millis(500))?;
        watcher.watch(config_path).await?;
        (watcher, outcomes)
    };

    println!("Watching {} for 60 seconds...\n", config_path);
    let deadline = tokio::time::sleep(Duration::from_secs(60));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            outcome = outcomes.recv() => match outcome {
                Some(Ok(RefreshOutcome::Applied { location, .. })) => {
                    let _guard = lock.lock();
                    println!("[Applied] {}: {:?}\n", location, runtime.lock());
                }
                Some(Ok(RefreshOutcome::Unchanged)) => {}
                Some(Err(e)) => println!("[Refused] {}\n", e),
                None => break,
            },
        }
    }

    service.shutdown();
    println!("Done");
    Ok(())
}
