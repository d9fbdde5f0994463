//! Adapter configuration and connection URL handling.

use std::time::Duration;

/// Configuration for the realtime adapter.
#[derive(Clone, Debug)]
pub struct AdapterConfig {
    /// Relay base URL, e.g. `http://localhost:4100` or `ws://...`.
    pub base_url: String,
    /// Endpoint path on the relay.
    pub path: String,
    /// User id announced at handshake time; without it the connection
    /// never appears online.
    pub user_id: Option<String>,
    /// Display name attached to typing/message events.
    pub user_name: Option<String>,
    /// How long a released connection lingers before it is torn down.
    pub deferred_disconnect: Duration,
    /// Whether the hosting context is secure. Insecure relay URLs are
    /// upgraded before connecting so a secure page never attempts a
    /// mixed-content socket.
    pub secure_page: bool,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            base_url: std::env::var("COMMS_RELAY_URL")
                .unwrap_or_else(|_| "http://localhost:4100".to_string()),
            path: std::env::var("COMMS_RELAY_PATH").unwrap_or_else(|_| "/ws".to_string()),
            user_id: None,
            user_name: None,
            deferred_disconnect: Duration::from_millis(150),
            secure_page: false,
        }
    }
}

impl AdapterConfig {
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Full WebSocket URL for the handshake, with the security upgrade
    /// applied and the scheme mapped to ws/wss.
    pub fn websocket_url(&self) -> String {
        let mut url = self.base_url.trim_end_matches('/').to_string();
        if self.secure_page {
            url = upgrade_insecure(&url);
        }
        url = to_ws_scheme(&url);

        url.push_str(&self.path);
        if let Some(user_id) = &self.user_id {
            url.push_str("?userId=");
            url.push_str(user_id);
        }
        url
    }
}

/// Rewrite an insecure URL to its secure equivalent. Already-secure and
/// unrecognized schemes pass through untouched.
fn upgrade_insecure(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("http://") {
        format!("https://{}", rest)
    } else if let Some(rest) = url.strip_prefix("ws://") {
        format!("wss://{}", rest)
    } else {
        url.to_string()
    }
}

fn to_ws_scheme(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else {
        url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base_url: &str, secure_page: bool) -> AdapterConfig {
        AdapterConfig {
            base_url: base_url.to_string(),
            path: "/ws".to_string(),
            secure_page,
            ..AdapterConfig::default()
        }
    }

    #[test]
    fn insecure_url_upgraded_under_secure_page() {
        let url = config("http://relay.example.com", true).websocket_url();
        assert_eq!(url, "wss://relay.example.com/ws");

        let url = config("ws://relay.example.com", true).websocket_url();
        assert_eq!(url, "wss://relay.example.com/ws");
    }

    #[test]
    fn secure_url_left_untouched() {
        let url = config("https://relay.example.com", true).websocket_url();
        assert_eq!(url, "wss://relay.example.com/ws");
    }

    #[test]
    fn insecure_page_keeps_plain_scheme() {
        let url = config("http://localhost:4100", false).websocket_url();
        assert_eq!(url, "ws://localhost:4100/ws");
    }

    #[test]
    fn user_id_lands_in_query() {
        let url = config("http://localhost:4100/", false)
            .with_user("u1")
            .websocket_url();
        assert_eq!(url, "ws://localhost:4100/ws?userId=u1");
    }
}
