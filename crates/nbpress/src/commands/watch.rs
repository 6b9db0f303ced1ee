//! Watch mode: build, then rebuild and live-reload on change.

use std::sync::Arc;

use anyhow::{Context, Result};
use nbpress_server::{ReloadHub, ReloadServer, WatchConfig, WatchLoop};
use nbpress_static::{BuildConfig, SiteBuilder};

use super::build::{build_once, log_report, open_homepage};
use crate::config::ConfigFile;

/// Run the watch loop until ctrl-c.
///
/// The config file is read once; changes to it need a restart.
pub async fn run(
    file_config: &ConfigFile,
    mut build: BuildConfig,
    port: Option<u16>,
    open: bool,
) -> Result<()> {
    let settings = &file_config.watch;
    let hub = ReloadHub::new();

    let server = ReloadServer::bind(&settings.host, port.unwrap_or(settings.port), hub.clone())
        .await
        .context("Failed to start live reload")?;
    build.reload_script = Some(server.script_url());

    let watch_config = WatchConfig {
        interval: settings.interval(),
        roots: vec![build.notebooks_dir.clone(), build.resources_dir.clone()],
        extensions: settings.extensions.clone(),
        ignored: vec![build.output_dir.clone()],
        notify: settings.notify,
    };

    let builder = Arc::new(SiteBuilder::new(build));
    let result = build_once(Arc::clone(&builder)).await?;
    log_report(&result);

    if open {
        open_homepage(&result);
    }

    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            tracing::error!("{}", e);
        }
    });

    tracing::info!("Press Ctrl+C to stop (restart to apply config changes)");
    let outcome = WatchLoop::new(watch_config, builder, hub).run().await;
    server_handle.abort();

    outcome.context("Watch loop failed")
}
