//! Mutual TLS client configuration.
//!
//! The configuration trusts exactly the supplied CA bundle and presents exactly the supplied
//! client identity. Server hostname verification is skipped: the chain must still be signed by
//! the CA, but the certificate's names are not matched against the dialed address.

use crate::ConfigError;
use rustls::{
    client::{
        danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
        WebPkiServerVerifier,
    },
    crypto::CryptoProvider,
    pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime},
    CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
};
use std::{fmt, path::Path, sync::Arc};

/// A TLS client configuration ready to be handed to a dialer.
#[derive(Clone)]
pub struct SecureChannel {
    config: Arc<ClientConfig>,
}

impl fmt::Debug for SecureChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureChannel")
            .field("alpn_protocols", &self.config.alpn_protocols)
            .finish()
    }
}

impl SecureChannel {
    /// Load the CA bundle and the client key pair from PEM files.
    #[tracing::instrument(level = "debug")]
    pub fn from_pem_files(
        ca_path: &Path,
        cert_path: &Path,
        private_key_path: &Path,
    ) -> Result<Self, ConfigError> {
        let ca = std::fs::read(ca_path).map_err(|source| ConfigError::ReadCa {
            path: ca_path.to_path_buf(),
            source,
        })?;
        let roots = certificate_pool(&ca)?;

        let cert = std::fs::read(cert_path).map_err(|err| key_pair_error("read certificate", err))?;
        let key = std::fs::read(private_key_path).map_err(|err| key_pair_error("read private key", err))?;

        Self::with_roots(roots, &cert, &key)
    }

    /// Build from in-memory PEM data.
    pub fn from_pem(ca: &[u8], cert: &[u8], key: &[u8]) -> Result<Self, ConfigError> {
        Self::with_roots(certificate_pool(ca)?, cert, key)
    }

    fn with_roots(roots: RootCertStore, cert: &[u8], key: &[u8]) -> Result<Self, ConfigError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let (cert_chain, private_key) = load_key_pair(cert, key)?;

        let verifier = SkipHostnameVerification::new(roots, provider.clone())?;

        let mut config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(ConfigError::Tls)?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(verifier))
            .with_client_auth_cert(cert_chain, private_key)
            .map_err(|err| key_pair_error("certificate does not match private key", err))?;
        config.alpn_protocols = vec![b"h2".to_vec()];

        Ok(Self {
            config: Arc::new(config),
        })
    }

    /// The underlying rustls configuration.
    pub fn client_config(&self) -> Arc<ClientConfig> {
        Arc::clone(&self.config)
    }
}

fn key_pair_error<E>(reason: &str, err: E) -> ConfigError
where
    E: std::error::Error + Send + Sync + 'static,
{
    ConfigError::LoadKeyPair {
        reason: reason.to_string(),
        source: Some(Box::new(err)),
    }
}

/// Parse every certificate of a PEM bundle into a trust store.
///
/// Fails unless at least one certificate could be added.
fn certificate_pool(ca: &[u8]) -> Result<RootCertStore, ConfigError> {
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut &ca[..])
        .filter_map(Result::ok)
        .collect();

    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(certs);
    tracing::debug!(added, ignored, "loaded ca bundle");

    if added == 0 {
        return Err(ConfigError::AppendCa);
    }
    Ok(roots)
}

fn load_key_pair(
    cert: &[u8],
    key: &[u8],
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), ConfigError> {
    let cert_chain = rustls_pemfile::certs(&mut &cert[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| key_pair_error("invalid certificate pem", err))?;
    if cert_chain.is_empty() {
        return Err(ConfigError::LoadKeyPair {
            reason: "no certificate found".to_string(),
            source: None,
        });
    }

    let private_key = rustls_pemfile::private_key(&mut &key[..])
        .map_err(|err| key_pair_error("invalid private key pem", err))?
        .ok_or_else(|| ConfigError::LoadKeyPair {
            reason: "no private key found".to_string(),
            source: None,
        })?;

    Ok((cert_chain, private_key))
}

/// Verifies the server chain against the CA pool but accepts any server name.
#[derive(Debug)]
struct SkipHostnameVerification {
    inner: Arc<WebPkiServerVerifier>,
}

impl SkipHostnameVerification {
    fn new(roots: RootCertStore, provider: Arc<CryptoProvider>) -> Result<Self, ConfigError> {
        let inner = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider)
            .build()
            .map_err(|err| ConfigError::Tls(rustls::Error::General(err.to_string())))?;
        Ok(Self { inner })
    }
}

impl ServerCertVerifier for SkipHostnameVerification {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        match self.inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        ) {
            Err(rustls::Error::InvalidCertificate(
                CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. },
            )) => Ok(ServerCertVerified::assertion()),
            other => other,
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}
