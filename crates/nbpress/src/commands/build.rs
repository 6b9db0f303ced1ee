//! Site build command.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use nbpress_static::{BuildReport, SiteBuilder};

use crate::config;
use crate::BuildArgs;

/// Run the build command.
pub async fn run(config_path: &Path, args: BuildArgs) -> Result<()> {
    let file_config = config::load(config_path)?;

    let mut build = file_config.build_config(&config::base_dir(config_path));
    if let Some(output) = args.output {
        build.output_dir = output;
    }
    if args.no_minify {
        build.minify = false;
    }

    if args.watch {
        return super::watch::run(&file_config, build, args.port, args.open).await;
    }

    tracing::info!("Building site...");
    let result = build_once(Arc::new(SiteBuilder::new(build))).await?;
    log_report(&result);

    if args.open {
        open_homepage(&result);
    }

    Ok(())
}

/// Build on the blocking pool.
pub async fn build_once(builder: Arc<SiteBuilder>) -> Result<BuildReport> {
    tokio::task::spawn_blocking(move || builder.build())
        .await
        .context("Build task failed")?
        .context("Build failed")
}

pub fn log_report(result: &BuildReport) {
    tracing::info!(
        "Built {} pages from {} notebooks in {}ms",
        result.pages,
        result.notebooks,
        result.duration_ms
    );
    if result.skipped > 0 {
        tracing::warn!("{} notebooks skipped", result.skipped);
    }
    tracing::info!("Output: {}", result.output_dir.display());
}

pub fn open_homepage(result: &BuildReport) {
    let index = result.output_dir.join("index.html");
    if let Err(e) = open::that(&index) {
        tracing::warn!("Failed to open {}: {}", index.display(), e);
    }
}
