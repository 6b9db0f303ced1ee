//! Live-reload notifications over WebSocket.

use tokio::sync::broadcast;

/// Text frame sent to every client after a successful rebuild.
pub const RELOAD_TOKEN: &str = "reload";

/// Hub broadcasting reload signals to all connected clients.
///
/// Each WebSocket connection holds one receiver; dropping the connection
/// drops the receiver and removes it from the set.
#[derive(Debug, Clone)]
pub struct ReloadHub {
    sender: broadcast::Sender<()>,
}

impl ReloadHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(16);
        Self { sender }
    }

    /// Tell every connected client to reload. Returns how many were reached.
    pub fn notify_reload(&self) -> usize {
        // No receivers is not an error
        self.sender.send(()).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ReloadHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Client script reloading the page when the token arrives.
///
/// The socket reconnects with a growing delay, so a restarted watcher picks
/// up open tabs again.
pub fn reload_client_script(ws_url: &str) -> String {
    format!(
        r#"(function() {{
  'use strict';

  let attempts = 0;
  const maxAttempts = 20;

  function connect() {{
    const ws = new WebSocket('{url}');

    ws.onopen = function() {{
      attempts = 0;
    }};

    ws.onmessage = function(event) {{
      if (event.data === '{token}') {{
        location.reload();
      }}
    }};

    ws.onclose = function() {{
      if (attempts < maxAttempts) {{
        attempts++;
        setTimeout(connect, 500 * attempts);
      }}
    }};
  }}

  connect();
}})();
"#,
        url = ws_url,
        token = RELOAD_TOKEN
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hub_broadcasts_to_every_subscriber() {
        let hub = ReloadHub::new();
        let mut first = hub.subscribe();
        let mut second = hub.subscribe();

        assert_eq!(hub.notify_reload(), 2);

        assert!(first.try_recv().is_ok());
        assert!(second.try_recv().is_ok());
    }

    #[test]
    fn notify_without_clients_is_ignored() {
        let hub = ReloadHub::new();
        assert_eq!(hub.notify_reload(), 0);
    }

    #[test]
    fn dropped_clients_leave_the_set() {
        let hub = ReloadHub::new();
        let rx = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 1);

        drop(rx);

        assert_eq!(hub.subscriber_count(), 0);
        assert_eq!(hub.notify_reload(), 0);
    }

    #[test]
    fn client_script_targets_socket() {
        let script = reload_client_script("ws://127.0.0.1:35729/__reload");

        assert!(script.contains("new WebSocket('ws://127.0.0.1:35729/__reload')"));
        assert!(script.contains("event.data === 'reload'"));
    }
}
