//! Client configuration and stream endpoint construction.

use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::core::types::duration_ms;
use crate::core::{ConfigError, WebSocketBufferConfig, WsTlsConfig};

pub const ENV_SERVER_URL: &str = "NOTIFY_STREAM_URL";
pub const ENV_CLIENT_TOKEN: &str = "NOTIFY_STREAM_TOKEN";
pub const ENV_RECONNECT: &str = "NOTIFY_STREAM_RECONNECT";

/// Settings for one streaming session.
///
/// Everything except `server_url` and `client_token` has a usable default, so a config can be
/// deserialized from a partial document.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub server_url: String,
    pub client_token: String,
    pub reconnect_enabled: bool,
    pub stream_path: String,
    pub connect_timeout_ms: u64,
    pub close_timeout_ms: u64,
    /// Treat the connection as lost after this long without any inbound frame.
    pub stale_timeout_ms: Option<u64>,
    pub buffers: WebSocketBufferConfig,
    pub tls: WsTlsConfig,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            server_url: String::new(),
            client_token: String::new(),
            reconnect_enabled: true,
            stream_path: "stream".to_string(),
            connect_timeout_ms: 10_000,
            close_timeout_ms: 2_000,
            stale_timeout_ms: Some(120_000),
            buffers: WebSocketBufferConfig::default(),
            tls: WsTlsConfig::default(),
        }
    }
}

impl StreamConfig {
    pub fn new(server_url: impl Into<String>, client_token: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            client_token: client_token.into(),
            ..Self::default()
        }
    }

    /// Read url, token and the reconnect toggle from the environment.
    pub fn from_env() -> Self {
        let mut config = Self::new(
            std::env::var(ENV_SERVER_URL).unwrap_or_default(),
            std::env::var(ENV_CLIENT_TOKEN).unwrap_or_default(),
        );
        if let Ok(value) = std::env::var(ENV_RECONNECT) {
            config.reconnect_enabled = parse_flag(&value).unwrap_or(config.reconnect_enabled);
        }
        config
    }

    pub fn with_reconnect(mut self, enabled: bool) -> Self {
        self.reconnect_enabled = enabled;
        self
    }

    pub fn with_stream_path(mut self, path: impl Into<String>) -> Self {
        self.stream_path = path.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = duration_ms(timeout);
        self
    }

    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout_ms = duration_ms(timeout);
        self
    }

    pub fn with_stale_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.stale_timeout_ms = timeout.map(duration_ms);
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    pub fn stale_timeout(&self) -> Option<Duration> {
        self.stale_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// Validate and build the websocket target.
    pub fn endpoint(&self) -> Result<StreamEndpoint, ConfigError> {
        StreamEndpoint::build(&self.server_url, &self.stream_path, &self.client_token)
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Websocket target derived from the configured base URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamEndpoint {
    url: String,
    redacted: String,
}

impl StreamEndpoint {
    /// `http -> ws`, `https -> wss`, then `/<path>?token=<token>`.
    pub fn build(server_url: &str, path: &str, token: &str) -> Result<Self, ConfigError> {
        let server_url = server_url.trim();
        if server_url.is_empty() {
            return Err(ConfigError::MissingServerUrl);
        }
        if token.trim().is_empty() {
            return Err(ConfigError::MissingToken);
        }

        let mut url =
            Url::parse(server_url).map_err(|err| ConfigError::InvalidUrl(err.to_string()))?;
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
        };
        url.set_scheme(scheme)
            .map_err(|_| ConfigError::InvalidUrl(server_url.to_string()))?;

        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| ConfigError::InvalidUrl(server_url.to_string()))?;
            segments.pop_if_empty();
            for segment in path.split('/').filter(|s| !s.is_empty()) {
                segments.push(segment);
            }
        }

        let mut redacted = url.clone();
        url.query_pairs_mut().append_pair("token", token);
        redacted.query_pairs_mut().append_pair("token", "***");

        Ok(Self {
            url: url.into(),
            redacted: redacted.into(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.url
    }

    /// The URL with the token masked, for logs.
    pub fn redacted(&self) -> &str {
        &self.redacted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_base_becomes_ws_stream_url() {
        let endpoint = StreamEndpoint::build("http://push.local:8080", "stream", "abc").unwrap();
        assert_eq!(endpoint.as_str(), "ws://push.local:8080/stream?token=abc");
        assert_eq!(endpoint.redacted(), "ws://push.local:8080/stream?token=***");
    }

    #[test]
    fn https_base_with_subpath_and_trailing_slash() {
        let endpoint =
            StreamEndpoint::build("https://example.com/gotify/", "stream", "t0k").unwrap();
        assert_eq!(endpoint.as_str(), "wss://example.com/gotify/stream?token=t0k");
    }

    #[test]
    fn websocket_schemes_are_kept_and_token_is_encoded() {
        let endpoint = StreamEndpoint::build("wss://example.com", "stream", "a b&c").unwrap();
        assert_eq!(endpoint.as_str(), "wss://example.com/stream?token=a+b%26c");
    }

    #[test]
    fn missing_or_bad_settings_are_config_errors() {
        assert_eq!(
            StreamEndpoint::build("", "stream", "t"),
            Err(ConfigError::MissingServerUrl)
        );
        assert_eq!(
            StreamEndpoint::build("http://x", "stream", "  "),
            Err(ConfigError::MissingToken)
        );
        assert_eq!(
            StreamEndpoint::build("ftp://x", "stream", "t"),
            Err(ConfigError::UnsupportedScheme("ftp".to_string()))
        );
        assert!(matches!(
            StreamEndpoint::build("not a url", "stream", "t"),
            Err(ConfigError::InvalidUrl(_))
        ));
    }

    #[test]
    fn partial_config_document_uses_defaults() {
        let config: StreamConfig =
            sonic_rs::from_str(r#"{"server_url":"http://h","client_token":"t"}"#).unwrap();
        assert!(config.reconnect_enabled);
        assert_eq!(config.stream_path, "stream");
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.stale_timeout(), Some(Duration::from_secs(120)));
        assert!(config.tls.validate_certs);
    }

    #[test]
    fn flag_parsing() {
        assert_eq!(parse_flag("Yes"), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }
}
