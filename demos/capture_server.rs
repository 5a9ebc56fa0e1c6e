//! Capture relay demo
//!
//! Run with: cargo run --example capture_server [CONFIG_PATH]
//!
//! Without a configuration file a synthetic `lavfi` test pattern is used, so
//! only ffmpeg is needed:
//!
//!   cargo run --example capture_server
//!   cargo run --example capture_server ./capture.json
//!
//! The demo starts every enabled source in FLV mode, records the first
//! source's live stream to `<source>.flv` through a hub subscription and
//! prints hub stats every five seconds until Ctrl+C.

use std::sync::Arc;
use std::time::Duration;

use capture_relay::config::{
    ConfigDocument, ConfigStore, JsonConfigStore, MemoryConfigStore, OutputState, Platform,
    SourceConfig, SourceKind,
};
use capture_relay::pipeline::{SupervisorConfig, SystemLauncher};
use capture_relay::{CaptureService, Error};
use tokio::io::AsyncWriteExt;

fn test_pattern() -> ConfigDocument {
    ConfigDocument {
        sources: vec![SourceConfig::new("testsrc", SourceKind::Url, "testsrc")
            .with_name("Test pattern")
            .with_input_override("-re -f lavfi -i testsrc=size=640x360:rate=30")],
        ..Default::default()
    }
}

fn print_usage() {
    eprintln!("Usage: capture_server [CONFIG_PATH]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  CONFIG_PATH  JSON document with sources and profiles (default: test pattern)");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("capture_relay=debug".parse()?)
                .add_directive("capture_server=debug".parse()?),
        )
        .init();

    let (document, store): (ConfigDocument, Arc<dyn ConfigStore>) = match args.get(1) {
        Some(path) => {
            let store = JsonConfigStore::new(path);
            (store.load()?, Arc::new(store))
        }
        None => (test_pattern(), Arc::new(MemoryConfigStore::new())),
    };

    let service = Arc::new(
        CaptureService::from_document(
            SupervisorConfig::default(),
            Platform::current(),
            document,
            Arc::new(SystemLauncher::new()),
            store,
        )
        .with_output_state(OutputState {
            flv: true,
            ..Default::default()
        }),
    );

    println!("Active profile: {:?}", service.active_profile());
    for report in service.start_pipeline(None, false, true).await {
        match (&report.outcome, &report.error) {
            (Some(outcome), _) => println!("[{}] {}", report.source_id, outcome.command),
            (_, Some(error)) => println!("[{}] {}: {}", report.source_id, error.code, error.message),
            _ => println!("[{}] skipped", report.source_id),
        }
    }

    let recorder = match service.sources().into_iter().find(|s| s.enabled) {
        Some(source) => {
            let service = Arc::clone(&service);
            Some(tokio::spawn(async move {
                let path = format!("{}.flv", source.id);
                let mut file = tokio::fs::File::create(&path).await?;
                let mut viewer = service.subscribe(&source.id).await?;
                println!("Recording {} to {}", source.id, path);

                loop {
                    match viewer.recv().await {
                        Ok(unit) => file.write_all(&unit.data).await?,
                        Err(Error::HubClosed) => break,
                        Err(e) => {
                            tracing::warn!(error = %e, "Recorder stopped");
                            break;
                        }
                    }
                }
                file.flush().await?;
                Ok::<_, Box<dyn std::error::Error + Send + Sync>>(())
            }))
        }
        None => None,
    };

    let mut ticker = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for stats in service.all_hub_stats().await {
                    println!("{}", serde_json::to_string(&stats)?);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                break;
            }
        }
    }

    let stopped = service.shutdown().await;
    println!("Stopped: {:?}", stopped);

    if let Some(recorder) = recorder {
        recorder.abort();
    }

    Ok(())
}
