//! Probe client for a running gateway.
//!
//! # Responsibilities
//! - Connect over `ws://` or `wss://`
//! - Optionally attach trace headers to the handshake
//! - Send one message and check that exactly the expected echo comes back
//!
//! # Outcomes
//! | outcome           | exit code | meaning                                   |
//! |-------------------|-----------|-------------------------------------------|
//! | `Echoed`          | 0         | reply equals `prefix + message`           |
//! | `TransportError`  | 1         | connect, handshake, send or receive failed |
//! | `UnexpectedReply` | 2         | a reply arrived but did not match         |

use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;
use futures_util::{SinkExt, StreamExt};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use thiserror::Error;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_tls_with_config, Connector};
use url::Url;

use crate::net::tls::{crypto_provider, load_roots};
use crate::net::ListenerStartupError;

/// Message sent when none is given.
pub const DEFAULT_MESSAGE: &str = "{}";

/// Server certificate handling for `wss://` targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsVerification {
    /// Verify against `ca_path`, or the platform roots when unset.
    Strict { ca_path: Option<String> },
    /// Accept any server certificate. For self-signed test setups only.
    AcceptInvalid,
}

impl Default for TlsVerification {
    fn default() -> Self {
        TlsVerification::Strict { ca_path: None }
    }
}

/// What to probe and how.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub url: Url,
    pub message: String,
    pub expected_prefix: String,
    pub tls: TlsVerification,
    /// Extra handshake headers, typically an encoded trace context.
    pub headers: HeaderMap,
    pub timeout: Duration,
}

impl ProbeConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            message: DEFAULT_MESSAGE.to_string(),
            expected_prefix: crate::config::EchoConfig::default().prefix,
            tls: TlsVerification::default(),
            headers: HeaderMap::new(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn expected_reply(&self) -> String {
        format!("{}{}", self.expected_prefix, self.message)
    }
}

/// Result of one probe exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Echoed { reply: String },
    TransportError { reason: String },
    UnexpectedReply { reply: String },
}

impl ProbeOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            ProbeOutcome::Echoed { .. } => 0,
            ProbeOutcome::TransportError { .. } => 1,
            ProbeOutcome::UnexpectedReply { .. } => 2,
        }
    }

    pub fn is_echoed(&self) -> bool {
        matches!(self, ProbeOutcome::Echoed { .. })
    }
}

/// Probe setup failures, raised before any connection attempt.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("unsupported URL scheme '{0}', expected ws or wss")]
    UnsupportedScheme(String),

    #[error("TLS setup failed: {0}")]
    TlsSetup(#[from] ListenerStartupError),

    #[error("TLS setup failed: {0}")]
    Rustls(#[from] rustls::Error),
}

/// Run one probe exchange.
pub async fn run_probe(config: &ProbeConfig) -> Result<ProbeOutcome, ProbeError> {
    let connector = match config.url.scheme() {
        "ws" => None,
        "wss" => Some(Connector::Rustls(client_config(&config.tls)?)),
        other => return Err(ProbeError::UnsupportedScheme(other.to_string())),
    };

    let outcome = match tokio::time::timeout(config.timeout, exchange(config, connector)).await {
        Ok(outcome) => outcome,
        Err(_) => ProbeOutcome::TransportError {
            reason: format!("no reply within {:?}", config.timeout),
        },
    };

    match &outcome {
        ProbeOutcome::Echoed { reply } => tracing::info!(url = %config.url, reply = %reply, "Echo received"),
        ProbeOutcome::TransportError { reason } => {
            tracing::error!(url = %config.url, reason = %reason, "Probe failed")
        }
        ProbeOutcome::UnexpectedReply { reply } => tracing::error!(
            url = %config.url,
            reply = %reply,
            expected = %config.expected_reply(),
            "Unexpected reply"
        ),
    }
    Ok(outcome)
}

async fn exchange(config: &ProbeConfig, connector: Option<Connector>) -> ProbeOutcome {
    let transport_error = |reason: String| ProbeOutcome::TransportError { reason };

    let mut request = match config.url.as_str().into_client_request() {
        Ok(request) => request,
        Err(e) => return transport_error(e.to_string()),
    };
    request.headers_mut().extend(config.headers.clone());

    let (mut socket, _response) = match connect_async_tls_with_config(request, None, false, connector).await {
        Ok(connected) => connected,
        Err(e) => return transport_error(format!("connect failed: {e}")),
    };

    if let Err(e) = socket.send(Message::text(config.message.clone())).await {
        return transport_error(format!("send failed: {e}"));
    }

    let outcome = loop {
        match socket.next().await {
            Some(Ok(Message::Text(text))) => break check_reply(config, text.as_str()),
            Some(Ok(Message::Binary(bytes))) => {
                break check_reply(config, &String::from_utf8_lossy(&bytes));
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) | None => {
                break transport_error("connection closed before reply".to_string());
            }
            Some(Ok(Message::Frame(_))) => continue,
            Some(Err(e)) => break transport_error(format!("receive failed: {e}")),
        }
    };

    let _ = socket.close(None).await;
    outcome
}

fn check_reply(config: &ProbeConfig, reply: &str) -> ProbeOutcome {
    if reply == config.expected_reply() {
        ProbeOutcome::Echoed {
            reply: reply.to_string(),
        }
    } else {
        ProbeOutcome::UnexpectedReply {
            reply: reply.to_string(),
        }
    }
}

/// Build the rustls client configuration for `wss://` targets.
pub fn client_config(tls: &TlsVerification) -> Result<Arc<ClientConfig>, ProbeError> {
    let provider = crypto_provider();
    let builder =
        ClientConfig::builder_with_provider(Arc::clone(&provider)).with_safe_default_protocol_versions()?;

    let config = match tls {
        TlsVerification::Strict { ca_path: Some(path) } => builder
            .with_root_certificates(load_roots(path)?)
            .with_no_client_auth(),
        TlsVerification::Strict { ca_path: None } => builder
            .with_root_certificates(platform_roots())
            .with_no_client_auth(),
        TlsVerification::AcceptInvalid => builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert::new(provider)))
            .with_no_client_auth(),
    };
    Ok(Arc::new(config))
}

fn platform_roots() -> RootCertStore {
    let native = rustls_native_certs::load_native_certs();
    for e in &native.errors {
        tracing::warn!(error = %e, "Failed to load a platform certificate");
    }
    let mut roots = RootCertStore::empty();
    roots.add_parsable_certificates(native.certs);
    roots
}

/// Skips server certificate validation. Handshake signatures are still
/// verified.
#[derive(Debug)]
pub struct AcceptAnyServerCert {
    provider: Arc<CryptoProvider>,
}

impl AcceptAnyServerCert {
    pub fn new(provider: Arc<CryptoProvider>) -> Self {
        Self { provider }
    }
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}
