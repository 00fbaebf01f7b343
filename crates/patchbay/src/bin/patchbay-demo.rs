//! Patchbay demo
//!
//! Builds a small session against an in-memory context and prints what each
//! edit sent and what the simulated server ended up holding:
//! - a mixer with two tracks, one grouped under the other
//! - a signal tester device and a rack with one chain
//! - a send, a gain change and a solo
//! - deleting a track, then quitting
//!
//! Pass a config file path as the only argument to override `./patchbay.toml`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use patchbay::{
    ContextId, DeviceConfig, MemoryContext, PassReport, ReadMode, Session, WriteMode,
};
use patchconf::PatchbayConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn print_report(title: &str, report: &PassReport) {
    println!("\n== {} ==", title);
    for batch in &report.batches {
        println!(
            "  context {} {:?}: {} changes, {} requests{}",
            batch.context,
            batch.kind,
            batch.changes,
            batch.requests,
            if batch.sync { " (sync)" } else { "" }
        );
    }
    if !report.deleted.is_empty() {
        println!("  deleted: {:?}", report.deleted);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = PatchbayConfig::load_from(config_path.as_deref())
        .context("failed to load patchbay config")?;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.telemetry.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    info!("patchbay-demo {} starting", env!("CARGO_PKG_VERSION"));

    let session = Session::new(&config);
    let context = Arc::new(MemoryContext::new(ContextId(0)));
    session.add_context(context.clone()).await?;

    let mixer = session.add_mixer(None, Some("main".into())).await?;
    let drums = session.add_track(mixer, Some("drums".into())).await?;
    let bass = session.add_track(mixer, Some("bass".into())).await?;
    let kick = session.add_track(drums, Some("kick".into())).await?;
    session
        .add_device(kick, DeviceConfig::signal_tester(), Some("tester".into()))
        .await?;
    let rack = session
        .add_rack(bass, ReadMode::Replace, WriteMode::Mix, Some("rack".into()))
        .await?;
    let chain = session.add_chain(rack, Some("dry".into())).await?;
    session
        .add_device(chain, DeviceConfig::signal_tester(), None)
        .await?;
    session.add_send(kick, bass, true, Some("to bass".into())).await?;

    let report = session.boot().await.context("failed to boot session")?;
    print_report("boot", &report);
    println!("\n{}", session.dump_components().await?);
    println!("\n{}", context.dump_tree());

    let report = session.set_parameter(bass, "gain", -6.0).await?;
    print_report("set bass gain", &report);

    session.set_soloed(kick, true, true).await?;
    for track in [drums, bass, kick] {
        println!(
            "  {} active: {}",
            session.nested_address(track).await?,
            session.is_active(track).await?
        );
    }

    let report = session.delete(bass).await?;
    print_report("delete bass", &report);
    println!("\n{}", context.dump_tree());

    let report = session.reconcile(mixer).await?;
    println!("\nreconcile again: {} changes", report.changes.len());

    let report = session.quit().await?;
    print_report("quit", &report);
    info!(bundles = context.bundles().len(), "patchbay-demo done");
    Ok(())
}
