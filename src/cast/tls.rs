//! TLS setup for Cast device sockets
//!
//! Cast receivers present self-signed device certificates, so the server
//! certificate chain is not verified. Handshake signatures still are.

use crate::device::DeviceError;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

/// Accepts any server certificate
#[derive(Debug)]
struct DeviceCertVerifier {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for DeviceCertVerifier {
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
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Build the client config used for every device socket
pub fn device_client_config() -> Result<Arc<ClientConfig>, DeviceError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| DeviceError::Transport(format!("TLS config error: {}", e)))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(DeviceCertVerifier { provider }))
        .with_no_client_auth();
    Ok(Arc::new(config))
}

/// Open a TLS session to `host:port`, bounded by `connect_timeout`
pub async fn connect(
    config: Arc<ClientConfig>,
    host: &str,
    port: u16,
    connect_timeout: Duration,
) -> Result<TlsStream<TcpStream>, DeviceError> {
    let address = format!("{}:{}", host, port);
    let connect_error = |reason: String| DeviceError::Connect {
        address: address.clone(),
        reason,
    };

    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| connect_error(format!("invalid server name: {}", e)))?;

    let tcp = timeout(connect_timeout, TcpStream::connect((host, port)))
        .await
        .map_err(|_| connect_error("TCP connect timed out".into()))?
        .map_err(|e| connect_error(e.to_string()))?;
    tcp.set_nodelay(true)
        .map_err(|e| connect_error(e.to_string()))?;

    timeout(
        connect_timeout,
        TlsConnector::from(config).connect(server_name, tcp),
    )
    .await
    .map_err(|_| connect_error("TLS handshake timed out".into()))?
    .map_err(|e| connect_error(format!("TLS handshake failed: {}", e)))
}
