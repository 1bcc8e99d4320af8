//! TLS certificate expiry check
//!
//! The handshake accepts any chain so that expired or self-signed
//! certificates can still be inspected. Only the leaf certificate's
//! `notAfter` is evaluated.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use serde::Serialize;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::{debug, instrument};

use super::{Check, ProbeResult};
use crate::{MonitorError, MonitorResult};

const DEFAULT_TLS_PORT: u16 = 443;

#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("invalid target '{0}'")]
    InvalidTarget(String),

    #[error("connection timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("server presented no certificate")]
    NoCertificate,

    #[error("failed to parse certificate: {0}")]
    Parse(String),
}

/// What we read off the leaf certificate
#[derive(Debug, Clone, Serialize)]
pub struct CertificateDetails {
    pub hostname: String,
    pub subject: String,
    pub issuer: String,
    pub not_after: DateTime<Utc>,
}

/// Whole days until `not_after`, negative once expired
pub fn days_until(not_after: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (not_after - now).num_days()
}

/// Map a certificate expiry onto a status.
///
/// Expired and `urgent_days` or less are problems, `warning_days` or less is
/// a warning, anything later is healthy.
pub fn classify(
    hostname: &str,
    not_after: DateTime<Utc>,
    now: DateTime<Utc>,
    warning_days: i64,
    urgent_days: i64,
) -> ProbeResult {
    if not_after <= now {
        return ProbeResult::problem(format!("{hostname} has expired!"));
    }

    let days = days_until(not_after, now);
    let message = format!("{hostname} expiring in {days} days");

    if days <= urgent_days {
        ProbeResult::problem(message)
    } else if days <= warning_days {
        ProbeResult::warning(message)
    } else {
        ProbeResult::healthy(message)
    }
}

/// Bare host and port of a check target
///
/// Scheme, credentials and path are dropped, the port defaults to 443.
pub fn split_target(target: &str) -> Result<(String, u16), CertificateError> {
    let trimmed = target.trim();
    let bare = trimmed
        .split_once("://")
        .map_or(trimmed, |(_, rest)| rest);

    let parsed = url::Url::parse(&format!("https://{bare}"))
        .map_err(|_| CertificateError::InvalidTarget(target.to_string()))?;

    let host = parsed
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| CertificateError::InvalidTarget(target.to_string()))?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string();

    Ok((host, parsed.port().unwrap_or(DEFAULT_TLS_PORT)))
}

/// Verifier that trusts every chain but still checks handshake signatures
#[derive(Debug)]
struct AcceptAnyCertificate {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyCertificate {
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

pub struct TlsCheck {
    connect_timeout: Duration,
    warning_days: i64,
    urgent_days: i64,
    connector: TlsConnector,
}

impl TlsCheck {
    pub fn new(connect_timeout: Duration, warning_days: i64, urgent_days: i64) -> MonitorResult<Self> {
        let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());

        let config = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|e| MonitorError::Client(e.to_string()))?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate { provider }))
            .with_no_client_auth();

        Ok(Self {
            connect_timeout,
            warning_days,
            urgent_days,
            connector: TlsConnector::from(Arc::new(config)),
        })
    }

    /// Handshake with `host:port` and read the leaf certificate
    pub async fn fetch_certificate(
        &self,
        host: &str,
        port: u16,
    ) -> Result<CertificateDetails, CertificateError> {
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|_| CertificateError::InvalidTarget(host.to_string()))?;

        let handshake = async {
            let stream = TcpStream::connect((host, port)).await?;
            let tls = self.connector.connect(server_name, stream).await?;
            Ok::<_, CertificateError>(tls)
        };

        let tls = timeout(self.connect_timeout, handshake)
            .await
            .map_err(|_| CertificateError::Timeout(self.connect_timeout))??;

        let (_, connection) = tls.get_ref();
        let leaf = connection
            .peer_certificates()
            .and_then(|chain| chain.first())
            .ok_or(CertificateError::NoCertificate)?;

        let (_, certificate) = x509_parser::parse_x509_certificate(leaf.as_ref())
            .map_err(|e| CertificateError::Parse(e.to_string()))?;

        let not_after = DateTime::from_timestamp(certificate.validity().not_after.timestamp(), 0)
            .ok_or_else(|| CertificateError::Parse("notAfter out of range".to_string()))?;

        Ok(CertificateDetails {
            hostname: host.to_string(),
            subject: certificate.subject().to_string(),
            issuer: certificate.issuer().to_string(),
            not_after,
        })
    }
}

#[async_trait]
impl Check for TlsCheck {
    fn name(&self) -> &'static str {
        "certificate"
    }

    #[instrument(skip(self))]
    async fn probe(&self, target: &str) -> ProbeResult {
        let (host, port) = match split_target(target) {
            Ok(parts) => parts,
            Err(e) => return ProbeResult::problem(format!("{target} - certificate check failed: {e}")),
        };

        match self.fetch_certificate(&host, port).await {
            Ok(details) => {
                debug!(
                    "certificate of {} issued by {} expires {}",
                    details.hostname, details.issuer, details.not_after
                );
                classify(
                    &host,
                    details.not_after,
                    Utc::now(),
                    self.warning_days,
                    self.urgent_days,
                )
            }
            Err(e) => {
                debug!("certificate check of {}:{} failed: {}", host, port, e);
                ProbeResult::problem(format!("{host} - certificate check failed: {e}"))
            }
        }
    }
}
