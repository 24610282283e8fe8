//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (connection limits, addresses)
//! - Detect conflicting listeners
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Missing TLS material is NOT a validation error: it fails only the
//!   affected listener at startup, per the configured startup policy

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{GatewayConfig, TransportKind};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("no listeners configured")]
    NoListeners,

    #[error("listener '{0}': duplicate name")]
    DuplicateName(String),

    #[error("listener '{name}': invalid bind address '{address}'")]
    InvalidBindAddress { name: String, address: String },

    #[error("listener '{name}': address {address} already used by another listener")]
    DuplicateBindAddress { name: String, address: String },

    #[error("listener '{0}': max_connections must be greater than zero")]
    ZeroMaxConnections(String),

    #[error("listener '{0}': TLS settings on a plain listener")]
    TlsOnPlainListener(String),

    #[error("listener '{0}': verify_client_cert requires request_client_cert and ca_path")]
    IncompleteClientVerification(String),

    #[error("tracing.operation_name must not be empty")]
    EmptyOperationName,

    #[error("observability.metrics_address '{0}' is not a socket address")]
    InvalidMetricsAddress(String),
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listeners.is_empty() {
        errors.push(ValidationError::NoListeners);
    }

    let mut names = HashSet::new();
    let mut addresses = HashSet::new();
    for listener in &config.listeners {
        if !names.insert(listener.name.as_str()) {
            errors.push(ValidationError::DuplicateName(listener.name.clone()));
        }

        match listener.bind_address.parse::<SocketAddr>() {
            // Port 0 binds are distinct by construction.
            Ok(addr) if addr.port() != 0 && !addresses.insert(addr) => {
                errors.push(ValidationError::DuplicateBindAddress {
                    name: listener.name.clone(),
                    address: listener.bind_address.clone(),
                });
            }
            Ok(_) => {}
            Err(_) => errors.push(ValidationError::InvalidBindAddress {
                name: listener.name.clone(),
                address: listener.bind_address.clone(),
            }),
        }

        if listener.max_connections == 0 {
            errors.push(ValidationError::ZeroMaxConnections(listener.name.clone()));
        }

        match (&listener.kind, &listener.tls) {
            (TransportKind::Plain, Some(_)) => {
                errors.push(ValidationError::TlsOnPlainListener(listener.name.clone()));
            }
            (TransportKind::Tls, Some(tls))
                if tls.verify_client_cert && (!tls.request_client_cert || tls.ca_path.is_none()) =>
            {
                errors.push(ValidationError::IncompleteClientVerification(listener.name.clone()));
            }
            _ => {}
        }
    }

    if config.tracing.operation_name.trim().is_empty() {
        errors.push(ValidationError::EmptyOperationName);
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{ListenerConfig, TlsConfig};

    fn tls_config() -> TlsConfig {
        TlsConfig {
            cert_path: "server.crt".into(),
            key_path: "server.key".into(),
            ca_path: None,
            request_client_cert: false,
            verify_client_cert: false,
        }
    }

    #[test]
    fn default_config_is_valid() {
        assert_eq!(validate_config(&GatewayConfig::default()), Ok(()));
    }

    #[test]
    fn missing_tls_material_is_left_to_startup() {
        let mut config = GatewayConfig::default();
        config.listeners[1].tls = None;
        assert_eq!(validate_config(&config), Ok(()));
    }

    #[test]
    fn collects_every_error() {
        let mut config = GatewayConfig::default();
        config.listeners = vec![
            ListenerConfig::plain("a", "127.0.0.1:9001"),
            ListenerConfig::plain("a", "127.0.0.1:9001"),
            ListenerConfig {
                max_connections: 0,
                ..ListenerConfig::plain("b", "not-an-address")
            },
        ];
        config.tracing.operation_name = " ".into();

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::DuplicateName("a".into())));
        assert!(errors.contains(&ValidationError::DuplicateBindAddress {
            name: "a".into(),
            address: "127.0.0.1:9001".into(),
        }));
        assert!(errors.contains(&ValidationError::InvalidBindAddress {
            name: "b".into(),
            address: "not-an-address".into(),
        }));
        assert!(errors.contains(&ValidationError::ZeroMaxConnections("b".into())));
        assert!(errors.contains(&ValidationError::EmptyOperationName));
    }

    #[test]
    fn ephemeral_ports_do_not_conflict() {
        let mut config = GatewayConfig::default();
        config.listeners = vec![
            ListenerConfig::plain("a", "127.0.0.1:0"),
            ListenerConfig::plain("b", "127.0.0.1:0"),
        ];
        assert_eq!(validate_config(&config), Ok(()));
    }

    #[test]
    fn client_verification_needs_trust_anchors() {
        let mut config = GatewayConfig::default();
        config.listeners = vec![ListenerConfig::tls(
            "secure",
            "127.0.0.1:0",
            TlsConfig {
                request_client_cert: true,
                verify_client_cert: true,
                ..tls_config()
            },
        )];
        assert_eq!(
            validate_config(&config),
            Err(vec![ValidationError::IncompleteClientVerification("secure".into())])
        );
    }

    #[test]
    fn tls_settings_on_plain_listener_rejected() {
        let mut config = GatewayConfig::default();
        config.listeners = vec![ListenerConfig {
            tls: Some(tls_config()),
            ..ListenerConfig::plain("plain", "127.0.0.1:0")
        }];
        assert_eq!(
            validate_config(&config),
            Err(vec![ValidationError::TlsOnPlainListener("plain".into())])
        );
    }
}
