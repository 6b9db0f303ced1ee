//! Watch mode for nbpress.
//!
//! Fingerprints the notebook and resource trees, rebuilds the site when they
//! change and pushes a reload signal to open browser tabs over WebSocket.

pub mod fingerprint;
pub mod server;
pub mod watch;
pub mod watcher;
pub mod websocket;

pub use fingerprint::{snapshot, ChangeDetector, Snapshot};
pub use server::{ReloadServer, ServerError};
pub use watch::{WatchConfig, WatchLoop};
pub use watcher::{FileWatcher, WatchEvent};
pub use websocket::{reload_client_script, ReloadHub, RELOAD_TOKEN};
