//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::telemetry::{ExporterKind, PropagationFormat};

/// Root configuration for the echo gateway.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listening endpoints, one accept loop each.
    pub listeners: Vec<ListenerConfig>,

    /// Echo behavior.
    pub echo: EchoConfig,

    /// Trace propagation and span settings.
    pub tracing: TracingConfig,

    /// Logging and metrics settings.
    pub observability: ObservabilityConfig,

    /// Startup policy and shutdown drain settings.
    pub lifecycle: LifecycleConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listeners: vec![
                ListenerConfig::plain("plain", "0.0.0.0:9001"),
                ListenerConfig::tls(
                    "tls",
                    "0.0.0.0:9002",
                    TlsConfig {
                        cert_path: "./certs/default/server.pem".to_string(),
                        key_path: "./certs/default/server.key".to_string(),
                        ca_path: Some("./certs/default/ca-crt.pem".to_string()),
                        request_client_cert: true,
                        verify_client_cert: false,
                    },
                ),
            ],
            echo: EchoConfig::default(),
            tracing: TracingConfig::default(),
            observability: ObservabilityConfig::default(),
            lifecycle: LifecycleConfig::default(),
        }
    }
}

/// Transport security of a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Plain,
    Tls,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Plain => "plain",
            TransportKind::Tls => "tls",
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Identifier used in logs.
    pub name: String,

    /// Whether the transport performs a TLS handshake.
    pub kind: TransportKind,

    /// Bind address (e.g., "0.0.0.0:9001"). Port 0 picks a free port.
    pub bind_address: String,

    /// TLS material and client certificate policy. Required for `tls`.
    pub tls: Option<TlsConfig>,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl ListenerConfig {
    pub fn plain(name: impl Into<String>, bind_address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: TransportKind::Plain,
            bind_address: bind_address.into(),
            ..Self::default()
        }
    }

    pub fn tls(name: impl Into<String>, bind_address: impl Into<String>, tls: TlsConfig) -> Self {
        Self {
            name: name.into(),
            kind: TransportKind::Tls,
            bind_address: bind_address.into(),
            tls: Some(tls),
            ..Self::default()
        }
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            name: "plain".to_string(),
            kind: TransportKind::Plain,
            bind_address: "0.0.0.0:9001".to_string(),
            tls: None,
            max_connections: 10_000,
        }
    }
}

/// TLS configuration for a listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate chain file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,

    /// Trust anchors for client certificates (PEM).
    #[serde(default)]
    pub ca_path: Option<String>,

    /// Ask clients for a certificate during the handshake.
    #[serde(default = "default_request_client_cert")]
    pub request_client_cert: bool,

    /// Require and verify the client certificate against `ca_path`.
    /// When false, any presented certificate is accepted unverified.
    #[serde(default)]
    pub verify_client_cert: bool,
}

fn default_request_client_cert() -> bool {
    true
}

/// Echo behavior.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EchoConfig {
    /// Literal prepended to every echoed message.
    pub prefix: String,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            prefix: "Server received from client: ".to_string(),
        }
    }
}

/// Tracing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TracingConfig {
    /// Header format of the inbound trace context.
    pub propagation: PropagationFormat,

    /// Name of the span opened for each message.
    pub operation_name: String,

    /// Value of the `service.name` tag on every span.
    pub service_name: String,

    /// Where completed spans go.
    pub exporter: ExporterKind,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            propagation: PropagationFormat::W3c,
            operation_name: "http_request".to_string(),
            service_name: "ws-server".to_string(),
            exporter: ExporterKind::Log,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default level for gateway logs; `RUST_LOG` takes precedence.
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable the Prometheus endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// How listener startup failures affect the rest of the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StartupPolicy {
    /// Each listener starts or fails on its own; the gateway runs while at
    /// least one listener is serving.
    #[default]
    Independent,
    /// Any listener failure aborts startup.
    AllRequired,
}

/// Lifecycle configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LifecycleConfig {
    pub startup_policy: StartupPolicy,

    /// Maximum time to wait for open connections after shutdown is requested.
    pub drain_timeout_secs: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            startup_policy: StartupPolicy::Independent,
            drain_timeout_secs: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_describe_plain_and_tls_listeners() {
        let config = GatewayConfig::default();
        assert_eq!(config.listeners.len(), 2);
        assert_eq!(config.listeners[0].kind, TransportKind::Plain);
        assert_eq!(config.listeners[1].kind, TransportKind::Tls);
        assert_eq!(config.echo.prefix, "Server received from client: ");
        assert_eq!(config.tracing.operation_name, "http_request");
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [[listeners]]
            name = "edge"
            bind_address = "127.0.0.1:0"

            [[listeners]]
            name = "edge-tls"
            kind = "tls"
            bind_address = "127.0.0.1:0"
            tls = { cert_path = "a.pem", key_path = "a.key" }

            [tracing]
            propagation = "b3"

            [lifecycle]
            startup_policy = "all_required"
            "#,
        )
        .unwrap();

        assert_eq!(config.listeners.len(), 2);
        assert_eq!(config.listeners[0].kind, TransportKind::Plain);
        assert_eq!(config.listeners[0].max_connections, 10_000);
        let tls = config.listeners[1].tls.as_ref().unwrap();
        assert!(tls.request_client_cert);
        assert!(!tls.verify_client_cert);
        assert_eq!(config.tracing.propagation, PropagationFormat::B3);
        assert_eq!(config.tracing.operation_name, "http_request");
        assert_eq!(config.lifecycle.startup_policy, StartupPolicy::AllRequired);
    }
}
