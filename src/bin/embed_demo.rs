use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use wvbridge::platform::WindowSystem;
use wvbridge::runtime::listeners::{NavigationChain, ProgressFanout, Verdict};
use wvbridge::{Bridge, HeadlessWindowSystem, LocalRuntime, Size};

fn main() -> Result<()> {
    let ws = HeadlessWindowSystem::new();
    let parent = ws.create_foreign_window(Size::new(1024, 768));
    let factory_ws = ws.clone();
    let bridge = Bridge::from_env(Arc::new(LocalRuntime::new()), move || {
        Ok(factory_ws.clone() as Arc<dyn WindowSystem>)
    })
    .context("loading bridge config")?;

    let subscriber_result = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(bridge.config().log_filter.as_str())),
        )
        .with_target(true)
        .try_init();
    if subscriber_result.is_err() {
        // tracing was already initialised; continue silently
    }

    let handle = bridge
        .create(parent.get())
        .with_context(|| format!("embedding into window {parent}"))?;

    let chain = NavigationChain::new();
    chain.add(0, |url| {
        if url.contains("tracker.") {
            Verdict::Denied
        } else {
            Verdict::Allowed
        }
    });
    let fanout = ProgressFanout::new();
    fanout.subscribe(|progress| println!("progress {:>5.1}%", progress * 100.0));
    bridge.set_navigation_handler(handle, Some(chain.into_listener()))?;
    bridge.set_progress_listener(handle, Some(fanout.into_listener()))?;

    bridge.navigate(handle, Some("https://example.com"))?;
    bridge.navigate(handle, Some("https://tracker.example.net/pixel"))?;
    bridge.resize(handle, 1280, 720)?;

    let ui = bridge.ui().context("ui loop not running")?;
    let drain = ui.clone();
    let drained = ui.run_sync(move || drain.drain_pending())?;
    tracing::info!(target = "embed_demo", drained, "page settled");

    if let Some(snapshot) = bridge.inspect(handle)? {
        if let Some(info) = snapshot.view.and_then(|view| ws.view_info(view)) {
            println!("loaded:  {:?}", info.history);
            println!("blocked: {:?}", info.blocked);
        }
    }

    bridge.close(handle)?;
    bridge.shutdown();
    Ok(())
}
