//! Handoff demo
//!
//! A base64 encoder announces its output to a case converter, which reviews
//! and imports it. An image tool then offers a file that is deleted before
//! the converter accepts, so the second accept fails.

use anyhow::Context;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tool_exchange::config::ExchangeConfig;
use tool_exchange::handler::{StateMergeIngestor, TargetEnvironment, TargetHandler};
use tool_exchange::memory::{InMemoryFileStore, InMemoryToolStateStore};
use tool_exchange::{
    Directive, PayloadResolver, SignalRegistry, StoredFile, ToolCatalog, ToolState, ToolStateStore,
};
use tool_exchange_core::environment::SystemClock;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const CATALOG: &str = r#"[
    {"directive": "base64-tool", "title": "Base64 Encoder / Decoder",
     "output": {"type": "text", "subtype": "text/plain"}},
    {"directive": "case-converter-tool", "title": "Case Converter",
     "output": {"type": "text", "subtype": "text/plain"}},
    {"directive": "image-flip", "title": "Image Flip",
     "output": {"type": "fileReference", "subtype": "image/*"}}
]"#;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ExchangeConfig::from_env().context("loading exchange configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
    tool_exchange_runtime::metrics::register_metrics();

    println!("=== Tool Exchange: handoff demo ({}) ===\n", config.environment);

    let registry = SignalRegistry::new(Arc::new(SystemClock));
    let states = InMemoryToolStateStore::new();
    let files = InMemoryFileStore::new();
    let catalog = Arc::new(ToolCatalog::from_json(CATALOG).context("parsing tool catalog")?);
    let resolver = PayloadResolver::new(Arc::new(states.clone()), Arc::new(files.clone()));

    let base64 = Directive::new("base64-tool")?;
    let case = Directive::new("case-converter-tool")?;
    let flip = Directive::new("image-flip")?;

    // Target: the case converter imports text into its input field
    let ingestor = StateMergeIngestor::new(case.clone(), Arc::new(states.clone()));
    let env = TargetEnvironment::new(
        case.clone(),
        registry.clone(),
        Arc::clone(&catalog),
        resolver,
        Arc::new(ingestor),
    );
    let handler = TargetHandler::new(&config, env).await?;
    handler.watch_registry();

    // Source: the base64 tool flushes its state, then announces
    let mut encoded = ToolState::new();
    encoded.insert("inputValue".into(), json!("Hello, world"));
    encoded.insert("outputValue".into(), json!("SGVsbG8sIHdvcmxk"));
    states.save_now(base64.as_str(), encoded).await?;
    registry.announce(&base64, &case, "Base64 Encoder / Decoder");

    settle(&handler, 1).await;
    println!(">>> Pending for {case}:");
    for signal in handler.pending_signals().await {
        println!("    {} ({})", signal.source_title, signal.source);
    }

    handler.open_modal_if_signals_exist().await?;
    println!(">>> Review open: {}", handler.is_modal_open().await);

    if let Some(notice) = handler.accept_signal(&base64).await? {
        println!(">>> {}", notice.message());
    }

    let imported = states.get(case.as_str()).await?;
    let input = imported
        .get("inputValue")
        .and_then(|value| value.as_str())
        .unwrap_or_default();
    println!(">>> Case converter input: {input}");
    println!(">>> Case converter output: {}", input.to_uppercase());

    // Source: an image tool offers a file that expires before the accept
    files.insert(StoredFile::new("img-1", "cat.png", "image/png", vec![0x89, b'P', b'N', b'G']));
    let mut flipped = ToolState::new();
    flipped.insert("processedFileId".into(), json!("img-1"));
    states.save_now(flip.as_str(), flipped).await?;
    registry.announce(&flip, &case, "Image Flip");
    files.remove("img-1");

    settle(&handler, 1).await;
    if let Some(notice) = handler.accept_signal(&flip).await? {
        println!(">>> {}", notice.message());
    }

    println!(">>> Phase: {:?}", handler.phase().await);
    println!(">>> Registry snapshot: {}", registry.to_json()?);

    handler.shutdown().await?;
    println!("\n=== Demo complete ===");
    Ok(())
}

/// Give the registry watcher a moment to deliver announcements
async fn settle(handler: &TargetHandler, expected: usize) {
    for _ in 0..50 {
        if handler.pending_signals().await.len() >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tracing::warn!(expected, "Registry watcher did not catch up");
}
