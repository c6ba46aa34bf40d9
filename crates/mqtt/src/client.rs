//! Construction of the `rumqttc` client and event loop.
//!
//! `ClientBuilder` turns a validated [`Config`] into the `(AsyncClient,
//! EventLoop)` pair owned by the transport kernel. Session options that can
//! change per connect (keep-alive, clean session, credentials) are applied
//! again by the kernel on every connect; everything else is fixed here.
//!
//! # Examples
//!
//! ```ignore
//! let (client, event_loop) = ClientBuilder::from_config(&config)?.build()?;
//! ```

use std::{fs, time::Duration};

use rumqttc::{
    AsyncClient, EventLoop, LastWill, MqttOptions, NetworkOptions, TlsConfiguration, Transport,
};
use tracing::debug;

use crate::config::{qos_from_u8, Config, TlsConfig};
use crate::error::TransferError;

/// Builder for the `rumqttc` client used by [`MqttTransport`](crate::connection::MqttTransport).
pub struct ClientBuilder {
    opts: MqttOptions,

    /// Capacity of the client's request channel.
    cap: usize,

    /// Set when the URL scheme or `tls.enable` asks for TLS.
    tls_config: Option<TlsConfig>,

    connection_timeout: u64,
}

impl ClientBuilder {
    /// Minimal builder for a plain TCP broker.
    pub fn new(client_id: impl Into<String>, host: impl Into<String>, port: u16, cap: usize) -> Self {
        Self {
            opts: MqttOptions::new(client_id, host, port),
            cap,
            tls_config: None,
            connection_timeout: 30,
        }
    }

    /// Builder carrying everything from the `[transport]` section.
    ///
    /// # Returns
    /// - `Ok(Self)`: builder ready for [`build`](Self::build)
    /// - `Err(TransferError)`: unparsable URL or invalid QoS
    pub fn from_config(config: &Config) -> Result<Self, TransferError> {
        let broker = config.broker()?;

        let mut builder = Self::new(
            config.effective_client_id(),
            broker.host.clone(),
            broker.port,
            config.request_channel_capacity,
        )
        .keep_alive(config.keep_alive)
        .clean_session(config.clean_session)
        .max_inflight(config.max_inflight)
        .connection_timeout(config.connection_timeout);

        if let Some(username) = &config.username {
            builder = builder.credentials(
                username.clone(),
                config.password.clone().unwrap_or_default(),
            );
        }

        if config.will.enabled {
            let will = LastWill::new(
                config.status_topic(),
                config.will.content.clone().into_bytes(),
                qos_from_u8(config.will.qos)?,
                config.will.retain,
            );
            builder.opts.set_last_will(will);
        }

        if broker.is_tls() || config.tls.enable {
            builder.tls_config = Some(config.tls.clone());
        }

        Ok(builder)
    }

    pub fn keep_alive(mut self, secs: u64) -> Self {
        self.opts.set_keep_alive(Duration::from_secs(secs));
        self
    }

    pub fn clean_session(mut self, clean: bool) -> Self {
        self.opts.set_clean_session(clean);
        self
    }

    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.opts.set_credentials(username, password);
        self
    }

    /// Maximum number of QoS 1/2 publishes awaiting acknowledgement.
    pub fn max_inflight(mut self, max: u16) -> Self {
        self.opts.set_inflight(max);
        self
    }

    /// Seconds allowed for TCP/TLS establishment and CONNACK.
    pub fn connection_timeout(mut self, secs: u64) -> Self {
        self.connection_timeout = secs;
        self
    }

    fn load_file(path: &str) -> Result<Vec<u8>, TransferError> {
        Ok(fs::read(path)?)
    }

    /// Loads certificates from disk into a `rumqttc` TLS transport.
    ///
    /// # Error Cases
    /// ```ignore
    /// // TLS enabled without a CA bundle
    /// TransferError::ClientSetup("Invalid TLS configuration: CA certificate path is required ...")
    /// ```
    fn build_tls_transport(tls: &TlsConfig) -> Result<Transport, TransferError> {
        tls.validate_config()
            .map_err(|e| TransferError::ClientSetup(format!("Invalid TLS configuration: {e}")))?;

        let ca_path = tls
            .ca_cert_path
            .as_deref()
            .ok_or_else(|| TransferError::ClientSetup("CA certificate path is required".into()))?;
        let ca = Self::load_file(ca_path)?;

        let client_auth = match (&tls.client_cert_path, &tls.client_key_path) {
            (Some(cert), Some(key)) => Some((Self::load_file(cert)?, Self::load_file(key)?)),
            _ => None,
        };

        if !tls.verify_peer || !tls.verify_host {
            debug!("rustls verifies the broker certificate and host name whatever tls.verify_peer / tls.verify_host say");
        }

        Ok(Transport::Tls(TlsConfiguration::Simple {
            ca,
            client_auth,
            alpn: None,
        }))
    }

    /// Builds the client and its event loop.
    ///
    /// The event loop does not touch the network until it is polled.
    pub fn build(self) -> Result<(AsyncClient, EventLoop), TransferError> {
        let mut opts = self.opts;
        if let Some(tls) = &self.tls_config {
            opts.set_transport(Self::build_tls_transport(tls)?);
        }

        let (client, mut event_loop) = AsyncClient::new(opts, self.cap);

        let mut network = NetworkOptions::new();
        network.set_connection_timeout(self.connection_timeout);
        event_loop.set_network_options(network);

        Ok((client, event_loop))
    }
}

#[cfg(test)]
mod tests {
    use std::{fs::File, io::Write};

    use tempfile::TempDir;
    use tracing_test::traced_test;

    use super::*;
    use crate::config::WillConfig;

    struct TestFiles {
        _temp_dir: TempDir,
        ca_cert: String,
        client_cert: String,
        client_key: String,
    }

    impl TestFiles {
        fn new() -> std::io::Result<Self> {
            let temp_dir = TempDir::new()?;

            let ca_cert = temp_dir.path().join("ca.crt");
            let client_cert = temp_dir.path().join("client.crt");
            let client_key = temp_dir.path().join("client.key");

            File::create(&ca_cert)?.write_all(b"ca certificate content")?;
            File::create(&client_cert)?.write_all(b"client certificate content")?;
            File::create(&client_key)?.write_all(b"client key content")?;

            Ok(TestFiles {
                _temp_dir: temp_dir,
                ca_cert: ca_cert.to_string_lossy().into_owned(),
                client_cert: client_cert.to_string_lossy().into_owned(),
                client_key: client_key.to_string_lossy().into_owned(),
            })
        }
    }

    #[test]
    fn test_build_tcp_client() {
        let result = ClientBuilder::new("test_client", "localhost", 1883, 100)
            .keep_alive(30)
            .clean_session(true)
            .credentials("user", "pass")
            .max_inflight(50)
            .build();

        assert!(result.is_ok());
    }

    #[test]
    fn test_from_config_defaults() {
        let builder = ClientBuilder::from_config(&Config::default()).unwrap();

        assert!(builder.tls_config.is_none());
        assert_eq!(builder.opts.client_id(), "guest");
        assert_eq!(builder.opts.broker_address(), ("localhost".to_string(), 1883));
        assert_eq!(builder.opts.keep_alive(), Duration::from_secs(30));
        assert!(!builder.opts.clean_session());
        assert!(builder.opts.last_will().is_none());
        assert_eq!(builder.cap, 1000);
    }

    #[test]
    fn test_from_config_with_credentials_and_will() {
        let config = Config {
            url: "mqtt://broker.local:1999".into(),
            username: Some("janus".into()),
            password: Some("secret".into()),
            will: WillConfig {
                enabled: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let builder = ClientBuilder::from_config(&config).unwrap();

        assert_eq!(
            builder.opts.credentials(),
            Some(("janus".to_string(), "secret".to_string()))
        );
        let will = builder.opts.last_will().unwrap();
        assert_eq!(will.topic, "/janus/events/status");
        assert_eq!(&will.message[..], br#"{"event" : "disconnect" }"#);
        assert!(will.retain);
        assert!(builder.build().is_ok());
    }

    #[test]
    fn test_tls_scheme_without_ca_fails() {
        let config = Config {
            url: "ssl://broker.local".into(),
            ..Default::default()
        };
        let builder = ClientBuilder::from_config(&config).unwrap();
        assert!(builder.tls_config.is_some());

        match builder.build() {
            Err(TransferError::ClientSetup(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("TLS build without a CA must fail"),
        }
    }

    #[test]
    fn test_build_tls_client_with_client_auth() {
        let files = TestFiles::new().expect("Failed to create test files");
        let tls = TlsConfig {
            client_cert_path: Some(files.client_cert.clone()),
            client_key_path: Some(files.client_key.clone()),
            verify_peer: true,
            verify_host: true,
            ..TlsConfig::with_ca(&files.ca_cert)
        };

        let mut builder = ClientBuilder::new("test_client", "localhost", 8883, 100);
        builder.tls_config = Some(tls);

        assert!(builder.build().is_ok());
    }

    #[test]
    fn test_tls_enable_flag_on_tcp_url() {
        let files = TestFiles::new().expect("Failed to create test files");
        let config = Config {
            tls: TlsConfig::with_ca(&files.ca_cert),
            ..Default::default()
        };

        let builder = ClientBuilder::from_config(&config).unwrap();
        assert!(builder.tls_config.is_some());
        assert!(builder.build().is_ok());
    }

    #[test]
    #[traced_test]
    fn test_unset_verify_flags_do_not_warn() {
        let files = TestFiles::new().expect("Failed to create test files");
        let config = Config {
            url: "mqtts://broker.local".into(),
            tls: TlsConfig::with_ca(&files.ca_cert),
            ..Default::default()
        };
        assert!(!config.tls.verify_peer);
        assert!(!config.tls.verify_host);

        assert!(ClientBuilder::from_config(&config).unwrap().build().is_ok());
        assert!(logs_contain("rustls verifies the broker certificate"));
        logs_assert(|lines: &[&str]| {
            match lines.iter().filter(|line| line.contains("WARN")).count() {
                0 => Ok(()),
                n => Err(format!("expected no warnings, got {n}")),
            }
        });
    }

    #[test]
    fn test_build_tls_missing_ca() {
        let mut builder = ClientBuilder::new("test_client", "localhost", 8883, 100);
        builder.tls_config = Some(TlsConfig::with_ca("/nonexistent/ca.crt"));

        assert!(builder.build().is_err());
    }

    #[test]
    fn test_from_config_invalid_url() {
        let config = Config {
            url: "ws://broker".into(),
            ..Default::default()
        };
        assert!(matches!(
            ClientBuilder::from_config(&config),
            Err(TransferError::InvalidUrl(_))
        ));
    }
}
