//! Broker connection configuration.
//!
//! Everything the connection manager and the `rumqttc` transport need lives
//! in [`Config`]: where the broker is, how to authenticate, how the session
//! behaves, where status and event messages go and how the link recovers.
//! All types deserialize with serde defaults so a near-empty `[transport]`
//! section is a working configuration.
//!
//! # Broker URL
//!
//! The broker is addressed by a single URL:
//!
//! | scheme                      | transport | default port |
//! |-----------------------------|-----------|--------------|
//! | `tcp://`, `mqtt://`, none   | TCP       | 1883         |
//! | `ssl://`, `tls://`, `mqtts://` | TLS    | 8883         |
//!
//! # Examples
//!
//! ```toml
//! [transport]
//! url = "ssl://broker.example.com:8883"
//! client_id = "gateway-01"
//! base_topic = "/janus/events"
//! qos = 1
//!
//! [transport.tls]
//! enable = true
//! ca_cert_path = "/etc/eventbee/ca.pem"
//! ```

use std::{fmt, path::Path, time::Duration};

use rumqttc::QoS;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::{error::TransferError, transport::ConnectOptions};

/// Payload published on `<base_topic>/status` if the relay vanishes without
/// a clean disconnect.
pub const DEFAULT_WILL_CONTENT: &str = r#"{"event" : "disconnect" }"#;

/// Main broker connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Config {
    /// Broker URL, e.g. `tcp://localhost:1883`.
    #[validate(custom(function = "validate_broker_url"))]
    pub url: String,

    /// MQTT client identifier. Empty means "generate one".
    #[validate(length(max = 65535, message = "Client ID must not exceed 65535 bytes"))]
    pub client_id: String,

    pub username: Option<String>,
    pub password: Option<String>,

    /// Keep-alive interval in seconds.
    #[validate(range(
        min = 5,
        max = 3600,
        message = "Keep alive must be between 5 and 3600 seconds"
    ))]
    pub keep_alive: u64,

    /// Ask the broker to discard the previous session.
    pub clean_session: bool,

    /// Let the transport recover unexpected link loss on its own.
    pub auto_reconnect: bool,

    /// Seconds to wait for TCP/TLS establishment and CONNACK.
    #[validate(range(
        min = 1,
        max = 300,
        message = "Connection timeout must be between 1 and 300 seconds"
    ))]
    pub connection_timeout: u64,

    /// Upper bound in seconds for a graceful disconnect.
    #[validate(range(
        min = 1,
        max = 3600,
        message = "Disconnect timeout must be between 1 and 3600 seconds"
    ))]
    pub disconnect_timeout: u64,

    /// Maximum number of QoS 1/2 publishes awaiting acknowledgement.
    #[validate(range(
        min = 1,
        max = 65535,
        message = "Max inflight must be between 1 and 65535"
    ))]
    pub max_inflight: u16,

    /// Requests the client may queue ahead of the event loop before
    /// `try_publish` reports the link as saturated.
    #[validate(range(
        min = 1,
        max = 100000,
        message = "Request channel capacity must be between 1 and 100000"
    ))]
    pub request_channel_capacity: usize,

    /// Topic prefix for events and the status message.
    #[validate(
        length(
            min = 1,
            max = 65535,
            message = "Base topic must be between 1 and 65535 bytes"
        ),
        custom(function = "validate_publish_topic")
    )]
    pub base_topic: String,

    #[validate(range(min = 0, max = 2, message = "Invalid QoS value, must be 0, 1, or 2"))]
    pub qos: u8,

    pub retain: bool,

    #[validate(nested)]
    pub reconnect: ReconnectConfig,

    #[validate(nested)]
    pub tls: TlsConfig,

    #[validate(nested)]
    pub will: WillConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            url: "tcp://localhost:1883".to_string(),
            client_id: "guest".to_string(),
            username: None,
            password: None,
            keep_alive: 30,
            clean_session: false,
            auto_reconnect: true,
            connection_timeout: 30,
            disconnect_timeout: 100,
            max_inflight: 100,
            request_channel_capacity: 1000,
            base_topic: "/janus/events".to_string(),
            qos: 1,
            retain: false,
            reconnect: ReconnectConfig::default(),
            tls: TlsConfig::default(),
            will: WillConfig::default(),
        }
    }
}

impl Config {
    /// Parsed broker address.
    pub fn broker(&self) -> Result<BrokerUrl, TransferError> {
        BrokerUrl::parse(&self.url)
    }

    /// Client identifier sent in CONNECT, generating a UUID when none is set.
    pub fn effective_client_id(&self) -> String {
        if self.client_id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            self.client_id.clone()
        }
    }

    /// Default QoS for event and status publishes.
    pub fn qos(&self) -> Result<QoS, TransferError> {
        qos_from_u8(self.qos)
    }

    /// `<base_topic>/status`.
    pub fn status_topic(&self) -> String {
        self.topic_with_suffix("status")
    }

    /// `<base_topic>/<suffix>`, tolerating a trailing slash on the base.
    pub fn topic_with_suffix(&self, suffix: &str) -> String {
        let base = self.base_topic.trim_end_matches('/');
        format!("{base}/{suffix}")
    }

    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_secs(self.disconnect_timeout)
    }

    /// Session options handed to the transport on each connect.
    pub fn connect_options(&self) -> ConnectOptions {
        let credentials = self.username.as_ref().map(|username| {
            (
                username.clone(),
                self.password.clone().unwrap_or_default(),
            )
        });

        ConnectOptions {
            keep_alive: Duration::from_secs(self.keep_alive),
            clean_session: self.clean_session,
            credentials,
            auto_reconnect: self.auto_reconnect,
        }
    }
}

/// Converts a numeric QoS level to the `rumqttc` representation.
pub fn qos_from_u8(qos: u8) -> Result<QoS, TransferError> {
    match qos {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(TransferError::InvalidMetadata(format!(
            "Invalid QoS value {other}, must be 0, 1, or 2"
        ))),
    }
}

/// Automatic reconnect schedule used by the transport kernel.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Seconds before the first retry.
    #[validate(range(
        min = 1,
        max = 60,
        message = "Reconnect delay must be between 1 and 60 seconds"
    ))]
    pub initial_delay: u64,

    /// Cap on the delay between retries, in seconds.
    #[validate(range(
        min = 1,
        max = 3600,
        message = "Max reconnect delay must be between 1 and 3600 seconds"
    ))]
    pub max_delay: u64,

    #[validate(range(
        min = 1.0,
        max = 30.0,
        message = "Reconnect multiplier must be between 1 and 30"
    ))]
    pub multiplier: f64,

    /// 0 retries forever.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: 1,
            max_delay: 60,
            multiplier: 2.0,
            max_attempts: 0,
        }
    }
}

/// TLS parameters. Only consulted when the URL scheme or `enable` asks for TLS.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct TlsConfig {
    pub enable: bool,

    /// PEM bundle used to verify the broker.
    pub ca_cert_path: Option<String>,

    /// PEM client certificate for mutual TLS.
    pub client_cert_path: Option<String>,

    /// PEM private key matching `client_cert_path`.
    pub client_key_path: Option<String>,

    pub verify_peer: bool,
    pub verify_host: bool,
}

impl TlsConfig {
    /// CA-only verification.
    pub fn with_ca(ca_cert_path: impl Into<String>) -> Self {
        TlsConfig {
            enable: true,
            ca_cert_path: Some(ca_cert_path.into()),
            ..Default::default()
        }
    }

    /// Checks the certificate files before the client is built.
    ///
    /// The CA bundle is mandatory; client certificate and key must be given
    /// together or not at all.
    pub fn validate_config(&self) -> Result<(), ValidationError> {
        let ca = self.ca_cert_path.as_deref().ok_or_else(|| {
            ValidationError::new("missing_ca_cert")
                .with_message("CA certificate path is required when TLS is enabled".into())
        })?;
        validate_file_path(ca)?;

        match (&self.client_cert_path, &self.client_key_path) {
            (Some(cert), Some(key)) => {
                validate_file_path(cert)?;
                validate_file_path(key)?;
            }
            (None, None) => {}
            _ => {
                return Err(ValidationError::new("incomplete_client_auth").with_message(
                    "Both client certificate and key must be provided or neither".into(),
                ));
            }
        }

        Ok(())
    }
}

/// Last will registered with the broker at connect time.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct WillConfig {
    pub enabled: bool,

    pub content: String,

    #[validate(range(min = 0, max = 2, message = "Invalid will QoS, must be 0, 1, or 2"))]
    pub qos: u8,

    pub retain: bool,
}

impl Default for WillConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            content: DEFAULT_WILL_CONTENT.to_string(),
            qos: 0,
            retain: true,
        }
    }
}

/// Wire protocol selected by the URL scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Tcp,
    Tls,
}

impl Scheme {
    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Tcp => 1883,
            Scheme::Tls => 8883,
        }
    }
}

/// Broker address split out of the configured URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerUrl {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
}

impl BrokerUrl {
    /// Parses `scheme://host[:port][/]`. A missing scheme means TCP.
    ///
    /// IPv6 literals must be bracketed: `tcp://[::1]:1883`.
    pub fn parse(url: &str) -> Result<Self, TransferError> {
        let invalid = |reason: &str| TransferError::InvalidUrl(format!("{url}: {reason}"));

        let (scheme, rest) = match url.split_once("://") {
            Some((scheme, rest)) => {
                let scheme = match scheme.to_ascii_lowercase().as_str() {
                    "tcp" | "mqtt" => Scheme::Tcp,
                    "ssl" | "tls" | "mqtts" => Scheme::Tls,
                    other => return Err(invalid(&format!("unsupported scheme '{other}'"))),
                };
                (scheme, rest)
            }
            None => (Scheme::Tcp, url),
        };

        let authority = rest.trim_end_matches('/');
        if authority.contains('/') {
            return Err(invalid("paths are not supported"));
        }

        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            let (host, tail) = bracketed
                .split_once(']')
                .ok_or_else(|| invalid("unterminated IPv6 literal"))?;
            let port = match tail {
                "" => None,
                tail => Some(
                    tail.strip_prefix(':')
                        .ok_or_else(|| invalid("unexpected characters after host"))?,
                ),
            };
            (host, port)
        } else {
            match authority.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (authority, None),
            }
        };

        if host.is_empty() {
            return Err(invalid("missing host"));
        }

        let port = match port {
            Some(port) => match port.parse::<u16>() {
                Ok(port) if port > 0 => port,
                _ => return Err(invalid(&format!("invalid port '{port}'"))),
            },
            None => scheme.default_port(),
        };

        Ok(BrokerUrl {
            scheme,
            host: host.to_string(),
            port,
        })
    }

    pub fn is_tls(&self) -> bool {
        self.scheme == Scheme::Tls
    }
}

impl fmt::Display for BrokerUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = match self.scheme {
            Scheme::Tcp => "tcp",
            Scheme::Tls => "ssl",
        };
        if self.host.contains(':') {
            write!(f, "{scheme}://[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{scheme}://{}:{}", self.host, self.port)
        }
    }
}

fn validate_broker_url(url: &str) -> Result<(), ValidationError> {
    BrokerUrl::parse(url).map(|_| ()).map_err(|e| {
        ValidationError::new("invalid_url").with_message(e.to_string().into())
    })
}

fn validate_publish_topic(topic: &str) -> Result<(), ValidationError> {
    if topic.contains(['+', '#']) {
        return Err(ValidationError::new("wildcard_topic")
            .with_message("Publish topics must not contain '+' or '#'".into()));
    }
    Ok(())
}

/// Checks that a path names an existing regular file.
fn validate_file_path(path: &str) -> Result<(), ValidationError> {
    if path.is_empty() {
        return Err(
            ValidationError::new("empty_path").with_message("File path cannot be empty".into())
        );
    }

    let path_obj = Path::new(path);

    if !path_obj.exists() {
        return Err(ValidationError::new("file_not_found")
            .with_message(format!("File does not exist: {path}").into()));
    }

    if !path_obj.is_file() {
        return Err(ValidationError::new("not_a_file")
            .with_message(format!("Path is not a file: {path}").into()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.url, "tcp://localhost:1883");
        assert_eq!(config.client_id, "guest");
        assert_eq!(config.keep_alive, 30);
        assert!(!config.clean_session);
        assert!(config.auto_reconnect);
        assert_eq!(config.disconnect_timeout, 100);
        assert_eq!(config.base_topic, "/janus/events");
        assert_eq!(config.qos, 1);
        assert!(!config.retain);
        assert!(!config.tls.enable);
        assert_eq!(config.will.content, DEFAULT_WILL_CONTENT);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_qos_rejected() {
        let config = Config {
            qos: 3,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(qos_from_u8(3).is_err());
        assert_eq!(qos_from_u8(2).unwrap(), QoS::ExactlyOnce);
    }

    #[test]
    fn test_invalid_url_rejected() {
        let config = Config {
            url: "http://broker:80".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_wildcard_base_topic_rejected() {
        let config = Config {
            base_topic: "events/#".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_status_topic() {
        let mut config = Config::default();
        assert_eq!(config.status_topic(), "/janus/events/status");

        config.base_topic = "relay/".into();
        assert_eq!(config.status_topic(), "relay/status");
    }

    #[test]
    fn test_empty_client_id_generates_uuid() {
        let config = Config {
            client_id: String::new(),
            ..Default::default()
        };
        let id = config.effective_client_id();
        assert_eq!(id.len(), 36);
        assert_ne!(id, config.effective_client_id());
    }

    #[test]
    fn test_connect_options_carry_credentials() {
        let config = Config {
            username: Some("janus".into()),
            password: None,
            keep_alive: 45,
            clean_session: true,
            ..Default::default()
        };
        let options = config.connect_options();
        assert_eq!(options.keep_alive, Duration::from_secs(45));
        assert!(options.clean_session);
        assert!(options.auto_reconnect);
        assert_eq!(options.credentials, Some(("janus".into(), String::new())));
    }

    #[test]
    fn test_deserialize_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            url = "ssl://broker.local"
            qos = 0

            [tls]
            enable = true
            verify_peer = true
            "#,
        )
        .unwrap();

        assert_eq!(config.qos, 0);
        assert_eq!(config.keep_alive, 30);
        assert!(config.tls.enable);
        assert!(config.tls.verify_peer);
        assert!(!config.tls.verify_host);
        assert_eq!(config.broker().unwrap().port, 8883);
    }

    #[test]
    fn test_parse_url_schemes() {
        let url = BrokerUrl::parse("tcp://localhost:1883").unwrap();
        assert_eq!(url.scheme, Scheme::Tcp);
        assert_eq!(url.host, "localhost");
        assert_eq!(url.port, 1883);

        let url = BrokerUrl::parse("mqtts://broker.example.com").unwrap();
        assert_eq!(url.scheme, Scheme::Tls);
        assert_eq!(url.port, 8883);

        let url = BrokerUrl::parse("SSL://10.0.0.1:9883/").unwrap();
        assert!(url.is_tls());
        assert_eq!(url.host, "10.0.0.1");
        assert_eq!(url.port, 9883);

        let url = BrokerUrl::parse("broker:1884").unwrap();
        assert_eq!(url.scheme, Scheme::Tcp);
        assert_eq!(url.port, 1884);
    }

    #[test]
    fn test_parse_ipv6_url() {
        let url = BrokerUrl::parse("tcp://[::1]:1999").unwrap();
        assert_eq!(url.host, "::1");
        assert_eq!(url.port, 1999);
        assert_eq!(url.to_string(), "tcp://[::1]:1999");

        let url = BrokerUrl::parse("tls://[fe80::1]").unwrap();
        assert_eq!(url.port, 8883);
    }

    #[test]
    fn test_parse_invalid_urls() {
        assert!(BrokerUrl::parse("ws://broker:80").is_err());
        assert!(BrokerUrl::parse("tcp://:1883").is_err());
        assert!(BrokerUrl::parse("tcp://broker:0").is_err());
        assert!(BrokerUrl::parse("tcp://broker:port").is_err());
        assert!(BrokerUrl::parse("tcp://broker:1883/path").is_err());
        assert!(BrokerUrl::parse("tcp://[::1:1883").is_err());
    }

    #[test]
    fn test_tls_requires_ca() {
        let tls = TlsConfig {
            enable: true,
            ..Default::default()
        };
        let err = tls.validate_config().unwrap_err();
        assert_eq!(err.code, "missing_ca_cert");
    }

    #[test]
    fn test_tls_with_existing_ca() {
        let mut ca = NamedTempFile::new().unwrap();
        writeln!(ca, "-----BEGIN CERTIFICATE-----").unwrap();

        let tls = TlsConfig::with_ca(ca.path().to_string_lossy());
        assert!(tls.validate_config().is_ok());
    }

    #[test]
    fn test_tls_incomplete_client_auth() {
        let ca = NamedTempFile::new().unwrap();
        let cert = NamedTempFile::new().unwrap();

        let tls = TlsConfig {
            client_cert_path: Some(cert.path().to_string_lossy().into_owned()),
            ..TlsConfig::with_ca(ca.path().to_string_lossy())
        };
        let err = tls.validate_config().unwrap_err();
        assert_eq!(err.code, "incomplete_client_auth");
    }

    #[test]
    fn test_tls_missing_file() {
        let tls = TlsConfig::with_ca("/nonexistent/ca.pem");
        let err = tls.validate_config().unwrap_err();
        assert_eq!(err.code, "file_not_found");
    }
}
