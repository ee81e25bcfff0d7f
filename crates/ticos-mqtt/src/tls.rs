//! TLS configuration for connections to the platform broker.
//!
//! Loads the CA certificate and, for mutual TLS, the client certificate and
//! key from PEM files and configures rumqttc's TLS transport.

use rumqttc::Transport;

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

/// Build a TLS transport from certificate file paths in the config.
///
/// Uses `TlsConfiguration::Simple`, which reads PEM-encoded data:
/// - CA certificate (required)
/// - Client certificate (optional, enables mutual TLS)
/// - Client private key (defaults to the certificate file, for combined PEMs)
pub fn load_tls_transport(config: &ClientConfig) -> ClientResult<Transport> {
    let ca_path = config
        .ca_cert_path
        .as_deref()
        .ok_or_else(|| ClientError::Tls("CA cert path is not configured".into()))?;
    let ca = read_pem("CA cert", ca_path)?;

    let client_auth = match config.client_cert_path.as_deref() {
        Some(cert_path) => {
            let cert = read_pem("client cert", cert_path)?;
            let key_path = config.client_key_path.as_deref().unwrap_or(cert_path);
            let key = read_pem("client key", key_path)?;
            Some((cert, key))
        }
        None => None,
    };

    Ok(Transport::tls_with_config(
        rumqttc::TlsConfiguration::Simple {
            ca,
            alpn: None,
            client_auth,
        },
    ))
}

fn read_pem(what: &str, path: &str) -> ClientResult<Vec<u8>> {
    std::fs::read(path).map_err(|e| ClientError::Tls(format!("failed to read {what} '{path}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tls_config(ca: &str, cert: Option<&str>) -> ClientConfig {
        ClientConfig::new("localhost", 8883, "A2_TEST_TOKEN").with_tls(
            ca,
            cert.map(String::from),
            None,
        )
    }

    #[test]
    fn missing_ca_cert_returns_error() {
        let config = tls_config("/nonexistent/ca.pem", Some("/nonexistent/cert.pem"));
        let err = load_tls_transport(&config).err().expect("should fail");
        let msg = err.to_string();
        assert!(
            msg.contains("CA cert"),
            "error should mention CA cert: {msg}"
        );
    }

    #[test]
    fn unconfigured_ca_returns_error() {
        let mut config = ClientConfig::new("localhost", 8883, "token");
        config.use_tls = true;
        let err = load_tls_transport(&config).err().expect("should fail");
        assert!(matches!(err, ClientError::Tls(ref m) if m.contains("not configured")));
    }

    #[test]
    fn missing_client_cert_is_reported_after_ca() {
        let dir = std::env::temp_dir().join(format!("ticos-tls-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let ca = dir.join("ca.pem");
        std::fs::write(&ca, b"-----BEGIN CERTIFICATE-----\n").unwrap();

        let config = tls_config(ca.to_str().unwrap(), Some("/nonexistent/client.pem"));
        let err = load_tls_transport(&config).err().expect("should fail");
        assert!(err.to_string().contains("client cert"), "{err}");

        std::fs::remove_dir_all(&dir).ok();
    }
}
