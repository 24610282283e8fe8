//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use url::Url;

use echo_gateway::config::{GatewayConfig, ListenerConfig, TlsConfig};
use echo_gateway::lifecycle::{Gateway, Shutdown};
use echo_gateway::net::StartupError;
use echo_gateway::telemetry::{ChannelExporter, PropagationFormat, SpanData, Telemetry};

pub const PREFIX: &str = "Server received from client: ";

const TESTDATA: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/testdata");

pub fn fixture(name: &str) -> String {
    format!("{TESTDATA}/{name}")
}

pub fn tls_material() -> TlsConfig {
    TlsConfig {
        cert_path: fixture("server.crt"),
        key_path: fixture("server.key"),
        ca_path: None,
        request_client_cert: true,
        verify_client_cert: false,
    }
}

/// Plain and TLS listeners on ephemeral loopback ports.
pub fn test_config(propagation: PropagationFormat) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.listeners = vec![
        ListenerConfig::plain("plain", "127.0.0.1:0"),
        ListenerConfig::tls("tls", "127.0.0.1:0", tls_material()),
    ];
    config.tracing.propagation = propagation;
    config.lifecycle.drain_timeout_secs = 5;
    config
}

pub struct TestGateway {
    pub plain: Option<SocketAddr>,
    pub tls: Option<SocketAddr>,
    pub spans: UnboundedReceiver<SpanData>,
    pub telemetry: Arc<Telemetry>,
    pub failed_listeners: Vec<String>,
    shutdown: Shutdown,
    handle: JoinHandle<bool>,
}

pub async fn try_start_gateway(config: GatewayConfig) -> Result<TestGateway, StartupError> {
    let (exporter, spans) = ChannelExporter::new();
    let telemetry = Arc::new(Telemetry::with_exporter(&config.tracing, Arc::new(exporter)));
    let shutdown = Shutdown::new();

    let gateway = Gateway::start(&config, Arc::clone(&telemetry), shutdown.clone()).await?;
    let plain = gateway.local_addr("plain");
    let tls = gateway.local_addr("tls");
    let failed_listeners = gateway.failures().iter().map(|f| f.name.clone()).collect();
    let handle = tokio::spawn(gateway.run());

    Ok(TestGateway {
        plain,
        tls,
        spans,
        telemetry,
        failed_listeners,
        shutdown,
        handle,
    })
}

pub async fn start_gateway(config: GatewayConfig) -> TestGateway {
    try_start_gateway(config).await.expect("gateway failed to start")
}

impl TestGateway {
    pub fn ws_url(&self) -> Url {
        let addr = self.plain.expect("plain listener not running");
        Url::parse(&format!("ws://{addr}/")).unwrap()
    }

    pub fn wss_url(&self) -> Url {
        let addr = self.tls.expect("tls listener not running");
        Url::parse(&format!("wss://{addr}/")).unwrap()
    }

    /// Next exported span, failing the test after a few seconds.
    pub async fn next_span(&mut self) -> SpanData {
        tokio::time::timeout(Duration::from_secs(5), self.spans.recv())
            .await
            .expect("timed out waiting for span")
            .expect("span channel closed")
    }

    /// Assert that no span is exported within a short window.
    pub async fn assert_no_span(&mut self) {
        let result = tokio::time::timeout(Duration::from_millis(300), self.spans.recv()).await;
        assert!(result.is_err(), "unexpected span: {:?}", result);
    }

    pub fn trigger_shutdown(&self) {
        self.shutdown.trigger();
    }

    /// Trigger shutdown and wait for the drain. Returns `true` if drained.
    pub async fn stop(self) -> bool {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("gateway did not stop")
            .expect("gateway task panicked")
    }
}
