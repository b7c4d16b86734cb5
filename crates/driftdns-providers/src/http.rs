//! Shared HTTP plumbing for the REST-based adapters: a client with a
//! hard timeout and optional certificate-fingerprint pinning.
//!
//! Pinning is a fallback, not a replacement: full X.509 path validation
//! runs first, and only when it fails is the SHA-256 of the leaf DER
//! compared against the configured fingerprint. Without a configured
//! fingerprint the client validates strictly.

use std::sync::Arc;
use std::time::Duration;

use driftdns_core::error::{Error, Result};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::DigitallySignedStruct;
use sha2::{Digest, Sha256};

/// Per-update HTTP timeout.
pub(crate) const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Build a client for `provider`, pinning to `fingerprint` when given
/// (64 hex chars of the leaf certificate's SHA-256).
pub(crate) fn client(provider: &str, fingerprint: Option<&str>) -> Result<reqwest::Client> {
    let builder = reqwest::Client::builder().timeout(HTTP_TIMEOUT);

    let builder = match fingerprint {
        None => builder,
        Some(fingerprint) => {
            let expected = hex::decode(fingerprint).map_err(|_| {
                Error::config(format!("{provider}: tls_fingerprint is not valid hex"))
            })?;
            if expected.len() != 32 {
                return Err(Error::config(format!(
                    "{provider}: tls_fingerprint must be a SHA-256 digest"
                )));
            }
            builder.use_preconfigured_tls(pinned_tls_config(expected)?)
        }
    };

    builder
        .build()
        .map_err(|e| Error::backend_permanent(provider, format!("failed to build HTTP client: {e}")))
}

fn pinned_tls_config(fingerprint: Vec<u8>) -> Result<rustls::ClientConfig> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let webpki = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider.clone())
        .build()
        .map_err(|e| Error::config(format!("TLS verifier construction failed: {e}")))?;

    let verifier = FingerprintVerifier {
        webpki,
        fingerprint,
    };

    Ok(rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::config(format!("TLS configuration failed: {e}")))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth())
}

/// Standard validation first; on failure, accept iff the leaf DER
/// hashes to the configured fingerprint.
#[derive(Debug)]
struct FingerprintVerifier {
    webpki: Arc<WebPkiServerVerifier>,
    fingerprint: Vec<u8>,
}

impl ServerCertVerifier for FingerprintVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        match self.webpki.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        ) {
            Ok(verified) => Ok(verified),
            Err(err) => {
                let digest = Sha256::digest(end_entity.as_ref());
                if digest.as_slice() == self.fingerprint.as_slice() {
                    Ok(ServerCertVerified::assertion())
                } else {
                    tracing::warn!(
                        expected = %hex::encode(&self.fingerprint),
                        found = %hex::encode(digest),
                        "certificate fingerprint mismatch"
                    );
                    Err(err)
                }
            }
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.webpki.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.webpki.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.webpki.supported_verify_schemes()
    }
}

/// Map a send error to the backend taxonomy: everything at the
/// transport layer is transient.
pub(crate) fn send_error(provider: &str, err: reqwest::Error) -> Error {
    Error::backend_transient(provider, format!("HTTP request failed: {err}"))
}

/// Reject non-success responses, classifying 5xx/429 as transient and
/// other client errors as permanent. Returns the response untouched on
/// success.
pub(crate) async fn check_status(
    provider: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = format!("request failed with status {status}: {body}");
    if status.is_server_error() || status.as_u16() == 429 {
        Err(Error::backend_transient(provider, message))
    } else {
        Err(Error::backend_permanent(provider, message))
    }
}

/// Strip a trailing slash so endpoint paths can be appended uniformly.
pub(crate) fn base_url(address: &str) -> &str {
    address.trim_end_matches('/')
}
