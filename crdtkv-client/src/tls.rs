//! TLS configuration and blocking handshake for client connections.

use crate::config::TlsClientConfig;
use crate::error::ClientError;
use crate::stream::ClientStream;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConnection, DigitallySignedStruct, RootCertStore, SignatureScheme, StreamOwned};
use std::fs::File;
use std::io::BufReader;
use std::net::TcpStream;
use std::path::Path;
use std::sync::Arc;

/// Builds a rustls client configuration and the SNI name for `server_host`.
///
/// Certificate verification is skipped when `config.insecure` is set.
pub fn client_config(
    config: &TlsClientConfig,
    server_host: &str,
) -> Result<(Arc<rustls::ClientConfig>, ServerName<'static>), ClientError> {
    if config.insecure {
        tracing::warn!("TLS certificate verification disabled for {}", server_host);
        create_insecure_client_config(config, server_host)
    } else {
        create_client_config(config, server_host)
    }
}

/// Creates a verifying TLS configuration, presenting a client certificate
/// when one is configured.
pub fn create_client_config(
    config: &TlsClientConfig,
    server_host: &str,
) -> Result<(Arc<rustls::ClientConfig>, ServerName<'static>), ClientError> {
    let builder = rustls::ClientConfig::builder().with_root_certificates(root_store(config)?);

    let tls = match (&config.client_cert_path, &config.client_key_path) {
        (Some(cert_path), Some(key_path)) => builder
            .with_client_auth_cert(load_certs(cert_path)?, load_private_key(key_path)?)
            .map_err(|e| tls_error("client certificate rejected", e))?,
        _ => builder.with_no_client_auth(),
    };

    Ok((Arc::new(tls), server_name(config, server_host)?))
}

/// Creates a TLS configuration that accepts any server certificate.
/// Development only.
pub fn create_insecure_client_config(
    config: &TlsClientConfig,
    server_host: &str,
) -> Result<(Arc<rustls::ClientConfig>, ServerName<'static>), ClientError> {
    let tls = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
        .with_no_client_auth();

    Ok((Arc::new(tls), server_name(config, server_host)?))
}

/// Upgrades a connected socket to TLS, blocking until the handshake completes.
///
/// Handshake failures are transport failures: the socket's read/write
/// timeouts bound how long this can take.
pub fn connect_tls(
    tls: Arc<rustls::ClientConfig>,
    server_name: ServerName<'static>,
    mut tcp: TcpStream,
) -> Result<ClientStream, ClientError> {
    let mut conn = ClientConnection::new(tls, server_name)
        .map_err(|e| ClientError::TlsConfig(e.to_string()))?;

    while conn.is_handshaking() {
        conn.complete_io(&mut tcp)
            .map_err(|e| ClientError::TlsHandshake(e.to_string()))?;
    }

    tracing::debug!("TLS handshake complete ({:?})", conn.protocol_version());
    Ok(ClientStream::Tls(Box::new(StreamOwned::new(conn, tcp))))
}

/// Trust anchors: the configured CA bundle, or the bundled web PKI roots.
fn root_store(config: &TlsClientConfig) -> Result<RootCertStore, ClientError> {
    let mut store = RootCertStore::empty();
    match config.ca_cert_path {
        Some(ref ca_path) => {
            let (added, ignored) = store.add_parsable_certificates(load_certs(ca_path)?);
            if added == 0 {
                return Err(ClientError::TlsConfig(format!(
                    "no usable CA certificates in {:?} ({} ignored)",
                    ca_path, ignored
                )));
            }
        }
        None => store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
    }
    Ok(store)
}

fn server_name(config: &TlsClientConfig, server_host: &str) -> Result<ServerName<'static>, ClientError> {
    let name = config.server_name.as_deref().unwrap_or(server_host);
    ServerName::try_from(name.to_string())
        .map_err(|_| ClientError::TlsConfig(format!("invalid server name: {}", name)))
}

fn tls_error(context: &str, err: impl std::fmt::Display) -> ClientError {
    ClientError::TlsConfig(format!("{}: {}", context, err))
}

fn open_pem(path: &Path) -> Result<BufReader<File>, ClientError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| tls_error(&format!("cannot open {:?}", path), e))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ClientError> {
    rustls_pemfile::certs(&mut open_pem(path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| tls_error(&format!("malformed PEM in {:?}", path), e))
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, ClientError> {
    rustls_pemfile::private_key(&mut open_pem(path)?)
        .map_err(|e| tls_error(&format!("malformed PEM in {:?}", path), e))?
        .ok_or_else(|| ClientError::TlsConfig(format!("no private key found in {:?}", path)))
}

/// Verifier for `insecure` mode.
#[derive(Debug)]
struct AcceptAnyCert;

impl ServerCertVerifier for AcceptAnyCert {
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
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        use SignatureScheme::*;
        vec![
            ECDSA_NISTP256_SHA256,
            ECDSA_NISTP384_SHA384,
            ECDSA_NISTP521_SHA512,
            ED25519,
            RSA_PSS_SHA256,
            RSA_PSS_SHA384,
            RSA_PSS_SHA512,
            RSA_PKCS1_SHA256,
            RSA_PKCS1_SHA384,
            RSA_PKCS1_SHA512,
        ]
    }
}
