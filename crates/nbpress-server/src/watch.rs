//! Watch-and-rebuild loop.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use nbpress_static::SiteBuilder;
use tokio::sync::mpsc;

use crate::fingerprint::ChangeDetector;
use crate::server::ServerError;
use crate::watcher::{FileWatcher, WatchEvent};
use crate::websocket::ReloadHub;

/// Extensions fingerprinted when none are configured.
pub const DEFAULT_EXTENSIONS: &[&str] = &[
    "ipynb", "css", "js", "html", "png", "jpg", "jpeg", "gif", "svg",
];

/// Watch mode configuration.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Time between fingerprint passes
    pub interval: Duration,

    /// Directories to fingerprint
    pub roots: Vec<PathBuf>,

    pub extensions: Vec<String>,

    /// Directories never fingerprinted, usually the output directory
    pub ignored: Vec<PathBuf>,

    /// Wake early on filesystem notifications
    pub notify: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1000),
            roots: vec![PathBuf::from("notebooks"), PathBuf::from("resources")],
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            ignored: vec![PathBuf::from("build")],
            notify: true,
        }
    }
}

type EventSource = (FileWatcher, mpsc::Receiver<WatchEvent>);

/// Rebuilds the site whenever the fingerprint of the watched roots changes
/// and tells connected browsers to reload.
pub struct WatchLoop {
    config: WatchConfig,
    builder: Arc<SiteBuilder>,
    hub: ReloadHub,
}

impl WatchLoop {
    pub fn new(config: WatchConfig, builder: Arc<SiteBuilder>, hub: ReloadHub) -> Self {
        Self {
            config,
            builder,
            hub,
        }
    }

    /// Run until ctrl-c.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for ctrl-c: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Run until `shutdown` resolves.
    ///
    /// Shutdown is only observed between passes, so a rebuild in progress
    /// always completes first.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        let mut detector = ChangeDetector::new(
            self.config.roots.clone(),
            self.config.extensions.clone(),
            self.config.ignored.clone(),
        );
        let (primed, result) = blocking(move || {
            let result = detector.prime();
            (detector, result)
        })
        .await?;
        detector = primed;
        if let Err(e) = result {
            tracing::warn!("Initial fingerprint failed: {}", e);
        }

        let mut events = self.event_source();

        tracing::info!(
            "Watching {} for changes",
            self.config
                .roots
                .iter()
                .map(|r| r.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );

        tokio::pin!(shutdown);

        loop {
            let mut closed = false;

            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(self.config.interval) => {}
                event = next_event(&mut events) => match event {
                    Some(event) => tracing::debug!("Woken by {}", event.path().display()),
                    None => closed = true,
                },
            }

            if closed {
                tracing::warn!("File watcher stopped, falling back to polling");
                events = None;
            }
            if let Some((_, rx)) = events.as_mut() {
                while rx.try_recv().is_ok() {}
            }

            let (polled, result) = blocking(move || {
                let result = detector.poll();
                (detector, result)
            })
            .await?;
            detector = polled;

            let changed = match result {
                Ok(changed) => changed,
                Err(e) => {
                    tracing::warn!("Fingerprint failed, retrying next tick: {}", e);
                    continue;
                }
            };
            if changed.is_empty() {
                continue;
            }

            for path in &changed {
                tracing::info!("Changed: {}", path.display());
            }
            self.rebuild().await;
        }

        tracing::info!("Watch stopped");
        Ok(())
    }

    async fn rebuild(&self) {
        let builder = Arc::clone(&self.builder);
        match tokio::task::spawn_blocking(move || builder.build()).await {
            Ok(Ok(report)) => {
                tracing::info!(
                    "Rebuilt {} pages ({} skipped) in {}ms",
                    report.pages,
                    report.skipped,
                    report.duration_ms
                );
                let clients = self.hub.notify_reload();
                tracing::debug!("Sent reload to {} clients", clients);
            }
            Ok(Err(e)) => tracing::error!("Rebuild failed: {}", e),
            Err(e) => tracing::error!("Rebuild task failed: {}", e),
        }
    }

    fn event_source(&self) -> Option<EventSource> {
        if !self.config.notify {
            return None;
        }
        match FileWatcher::new(&self.config.roots, &self.config.ignored) {
            Ok(source) => Some(source),
            Err(e) => {
                tracing::warn!("{}; polling only", e);
                None
            }
        }
    }
}

/// Next filesystem event, or never when there is no watcher.
async fn next_event(events: &mut Option<EventSource>) -> Option<WatchEvent> {
    match events {
        Some((_, rx)) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn blocking<T, F>(f: F) -> Result<T, ServerError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ServerError::WatchError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nbpress_static::BuildConfig;
    use serde_json::json;
    use std::fs;
    use std::path::Path;
    use tempfile::{tempdir, TempDir};
    use tokio::sync::oneshot;

    fn write_notebook(path: &Path, heading: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let doc = json!({
            "cells": [{"cell_type": "markdown", "metadata": {}, "source": format!("# {}", heading)}],
            "metadata": {},
            "nbformat": 4,
            "nbformat_minor": 5
        });
        fs::write(path, doc.to_string()).unwrap();
    }

    fn setup(temp: &TempDir) -> (Arc<SiteBuilder>, WatchConfig) {
        let build = BuildConfig {
            notebooks_dir: temp.path().join("notebooks"),
            resources_dir: temp.path().join("resources"),
            output_dir: temp.path().join("build"),
            ..Default::default()
        };
        let watch = WatchConfig {
            interval: Duration::from_millis(50),
            roots: vec![build.notebooks_dir.clone(), build.resources_dir.clone()],
            ignored: vec![build.output_dir.clone()],
            notify: false,
            ..Default::default()
        };
        (Arc::new(SiteBuilder::new(build)), watch)
    }

    #[tokio::test]
    async fn change_triggers_rebuild_and_reload() {
        let temp = tempdir().unwrap();
        let notebook = temp.path().join("notebooks/a.ipynb");
        write_notebook(&notebook, "Version 0");

        let (builder, config) = setup(&temp);
        builder.build().unwrap();

        let hub = ReloadHub::new();
        let mut rx = hub.subscribe();
        let (stop, stopped) = oneshot::channel::<()>();
        let handle = tokio::spawn(WatchLoop::new(config, builder, hub).run_until(async {
            let _ = stopped.await;
        }));

        // Keep editing until the loop has primed and picks one up
        let reloaded = tokio::time::timeout(Duration::from_secs(10), async {
            let mut version = 0;
            loop {
                version += 1;
                write_notebook(&notebook, &format!("Version {}", version));
                if let Ok(signal) = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await
                {
                    break signal;
                }
            }
        })
        .await;

        stop.send(()).unwrap();
        handle.await.unwrap().unwrap();

        assert!(reloaded.unwrap().is_ok());
        let page = fs::read_to_string(temp.path().join("build/a.html")).unwrap();
        assert!(page.contains("Version"));
    }

    #[tokio::test]
    async fn failed_rebuild_does_not_reload() {
        let temp = tempdir().unwrap();
        let notebook = temp.path().join("notebooks/a.ipynb");
        write_notebook(&notebook, "Only");

        let (builder, config) = setup(&temp);
        let hub = ReloadHub::new();
        let mut rx = hub.subscribe();
        let (stop, stopped) = oneshot::channel::<()>();
        let handle = tokio::spawn(WatchLoop::new(config, builder, hub).run_until(async {
            let _ = stopped.await;
        }));

        tokio::time::sleep(Duration::from_millis(200)).await;
        fs::remove_dir_all(temp.path().join("notebooks")).unwrap();

        let signal = tokio::time::timeout(Duration::from_millis(500), rx.recv()).await;

        stop.send(()).unwrap();
        handle.await.unwrap().unwrap();

        assert!(signal.is_err(), "no reload after a failed rebuild");
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn fingerprint_errors_are_retried() {
        let temp = tempdir().unwrap();
        let notebook = temp.path().join("notebooks/a.ipynb");
        write_notebook(&notebook, "First");

        let (builder, config) = setup(&temp);
        let hub = ReloadHub::new();
        let mut rx = hub.subscribe();
        let (stop, stopped) = oneshot::channel::<()>();
        let handle = tokio::spawn(WatchLoop::new(config, builder, hub).run_until(async {
            let _ = stopped.await;
        }));

        tokio::time::sleep(Duration::from_millis(200)).await;

        // Reading this fails even with root privileges
        let broken = temp.path().join("notebooks/broken.ipynb");
        std::os::unix::fs::symlink("/proc/self/mem", &broken).unwrap();
        write_notebook(&notebook, "Second");

        let during = tokio::time::timeout(Duration::from_millis(400), rx.recv()).await;
        assert!(during.is_err(), "no rebuild while fingerprinting fails");
        assert!(!handle.is_finished());

        fs::remove_file(&broken).unwrap();
        let after = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await;

        stop.send(()).unwrap();
        handle.await.unwrap().unwrap();

        assert!(matches!(after, Ok(Ok(()))));
        let page = fs::read_to_string(temp.path().join("build/a.html")).unwrap();
        assert!(page.contains("Second"));
    }

    #[tokio::test]
    async fn stops_on_shutdown() {
        let temp = tempdir().unwrap();
        let (builder, mut config) = setup(&temp);
        config.interval = Duration::from_secs(60);

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            WatchLoop::new(config, builder, ReloadHub::new()).run_until(async {}),
        )
        .await;

        assert!(matches!(result, Ok(Ok(()))));
    }
}
