//! TLS configuration and certificate loading.
//!
//! # Responsibilities
//! - Load the certificate chain, private key and trust anchors (PEM)
//! - Build the rustls `ServerConfig` for a TLS listener
//! - Apply the client certificate policy
//!
//! # Client certificate policy
//! | request_client_cert | verify_client_cert | behavior                                 |
//! |---------------------|--------------------|------------------------------------------|
//! | false               | -                  | no client certificate requested          |
//! | true                | false              | requested, accepted without verification |
//! | true                | true               | required, verified against `ca_path`     |
//!
//! The unverified mode is a relaxed test setting, not a security default;
//! the listener logs a warning whenever it is active.

use std::fs;
use std::io::BufReader;
use std::sync::Arc;

use rustls::client::danger::HandshakeSignatureValid;
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::server::WebPkiClientVerifier;
use rustls::{DigitallySignedStruct, DistinguishedName, RootCertStore, ServerConfig, SignatureScheme};

use crate::config::TlsConfig;
use crate::net::ListenerStartupError;

/// Crypto provider used by every TLS endpoint of the gateway.
pub fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::aws_lc_rs::default_provider())
}

fn read_pem(path: &str) -> Result<Vec<u8>, ListenerStartupError> {
    fs::read(path).map_err(|source| ListenerStartupError::TlsMaterial {
        path: path.to_string(),
        source,
    })
}

/// Parse every certificate in a PEM buffer.
pub fn certs_from_pem(pem: &[u8]) -> std::io::Result<Vec<CertificateDer<'static>>> {
    rustls_pemfile::certs(&mut BufReader::new(pem)).collect()
}

/// Load a certificate chain from a PEM file.
pub fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>, ListenerStartupError> {
    let pem = read_pem(path)?;
    let certs = certs_from_pem(&pem).map_err(|source| ListenerStartupError::TlsMaterial {
        path: path.to_string(),
        source,
    })?;
    if certs.is_empty() {
        return Err(ListenerStartupError::EmptyTlsMaterial {
            kind: "certificate",
            path: path.to_string(),
        });
    }
    Ok(certs)
}

/// Load the first private key (PKCS#8, PKCS#1 or SEC1) from a PEM file.
pub fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>, ListenerStartupError> {
    let pem = read_pem(path)?;
    rustls_pemfile::private_key(&mut BufReader::new(pem.as_slice()))
        .map_err(|source| ListenerStartupError::TlsMaterial {
            path: path.to_string(),
            source,
        })?
        .ok_or_else(|| ListenerStartupError::EmptyTlsMaterial {
            kind: "private key",
            path: path.to_string(),
        })
}

/// Load trust anchors from a PEM file.
pub fn load_roots(path: &str) -> Result<RootCertStore, ListenerStartupError> {
    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(load_certs(path)?);
    if ignored > 0 {
        tracing::warn!(path = %path, ignored, "Skipped unparsable trust anchors");
    }
    if added == 0 {
        return Err(ListenerStartupError::EmptyTlsMaterial {
            kind: "trust anchor",
            path: path.to_string(),
        });
    }
    Ok(roots)
}

/// Build the rustls server configuration for a TLS listener.
pub fn build_server_config(tls: &TlsConfig) -> Result<Arc<ServerConfig>, ListenerStartupError> {
    let certs = load_certs(&tls.cert_path)?;
    let key = load_private_key(&tls.key_path)?;
    let provider = crypto_provider();

    let builder = ServerConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()?;

    let builder = if !tls.request_client_cert {
        builder.with_no_client_auth()
    } else if tls.verify_client_cert {
        let ca_path = tls
            .ca_path
            .as_deref()
            .ok_or_else(|| ListenerStartupError::ClientVerifier("ca_path is not set".to_string()))?;
        let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(load_roots(ca_path)?), provider)
            .build()
            .map_err(|e| ListenerStartupError::ClientVerifier(e.to_string()))?;
        builder.with_client_cert_verifier(verifier)
    } else {
        builder.with_client_cert_verifier(Arc::new(AcceptAnyClientCert::new(provider)))
    };

    let mut config = builder.with_single_cert(certs, key)?;
    // WebSocket upgrades need HTTP/1.1.
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}

/// Requests a client certificate but accepts any (or none) without
/// checking its chain. Handshake signatures are still verified.
#[derive(Debug)]
pub struct AcceptAnyClientCert {
    provider: Arc<CryptoProvider>,
}

impl AcceptAnyClientCert {
    pub fn new(provider: Arc<CryptoProvider>) -> Self {
        Self { provider }
    }
}

impl ClientCertVerifier for AcceptAnyClientCert {
    fn offer_client_auth(&self) -> bool {
        true
    }

    fn client_auth_mandatory(&self) -> bool {
        false
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        Ok(ClientCertVerified::assertion())
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

#[cfg(test)]
mod tests {
    use super::*;

    const TESTDATA: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/testdata");

    fn fixture(name: &str) -> String {
        format!("{TESTDATA}/{name}")
    }

    fn material(request: bool, verify: bool, ca: Option<&str>) -> TlsConfig {
        TlsConfig {
            cert_path: fixture("server.crt"),
            key_path: fixture("server.key"),
            ca_path: ca.map(fixture),
            request_client_cert: request,
            verify_client_cert: verify,
        }
    }

    #[test]
    fn builds_config_without_client_auth() {
        let config = build_server_config(&material(false, false, None)).unwrap();
        assert_eq!(config.alpn_protocols, vec![b"http/1.1".to_vec()]);
    }

    #[test]
    fn builds_config_for_each_client_policy() {
        assert!(build_server_config(&material(true, false, None)).is_ok());
        assert!(build_server_config(&material(true, true, Some("ca.crt"))).is_ok());
    }

    #[test]
    fn missing_files_are_reported() {
        let tls = TlsConfig {
            cert_path: fixture("absent.crt"),
            ..material(false, false, None)
        };
        assert!(matches!(
            build_server_config(&tls),
            Err(ListenerStartupError::TlsMaterial { .. })
        ));
    }

    #[test]
    fn key_file_without_certificates_is_rejected() {
        assert!(matches!(
            load_certs(&fixture("server.key")),
            Err(ListenerStartupError::EmptyTlsMaterial { .. })
        ));
    }

    #[test]
    fn unverified_policy_offers_but_does_not_require_auth() {
        let verifier = AcceptAnyClientCert::new(crypto_provider());
        assert!(verifier.offer_client_auth());
        assert!(!verifier.client_auth_mandatory());
        assert!(!verifier.supported_verify_schemes().is_empty());
    }
}
