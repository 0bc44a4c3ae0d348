//! Timestamp Client (RFC 3161)
//!
//! The token returned by a TSA carries its own signer certificate. The
//! orchestrator validates that signer with the same chain and evidence
//! machinery as a document signer, under the `Timestamping` role.

use crate::config::TsaConfig;
use crate::der::{self, TimestampRequest};
use crate::error::FetchError;
use crate::pki::{Certificate, HashAlgorithm, PkiProvider, TimestampToken};
use crate::transport::{HttpFetcher, HttpRequest};
use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::{debug, info};

const TIMESTAMP_QUERY: &str = "application/timestamp-query";
const TIMESTAMP_REPLY: &str = "application/timestamp-reply";

pub trait TimestampClient: Send + Sync {
    fn timestamp<'a>(
        &'a self,
        imprint: &'a [u8],
        hash_algorithm: HashAlgorithm,
    ) -> BoxFuture<'a, Result<TimestampToken, FetchError>>;
}

/// Imprint of a signature value, the input of a signature timestamp
pub fn signature_imprint(signature_value: &[u8], hash_algorithm: HashAlgorithm) -> Vec<u8> {
    hash_algorithm.digest(signature_value)
}

/// The certificate among the token's own that signed it
pub fn token_signer(pki: &dyn PkiProvider, token: &TimestampToken) -> Result<Certificate, FetchError> {
    if token.certificates.is_empty() {
        return Err(FetchError::ResponderUnresolved(
            "timestamp token carries no certificates".to_string(),
        ));
    }
    token
        .certificates
        .iter()
        .filter_map(|der| pki.parse_certificate(der).ok())
        .find(|cert| pki.verify_signature(cert, &token.signed))
        .ok_or_else(|| {
            FetchError::SignatureInvalid("no embedded certificate verifies the token".to_string())
        })
}

/// TSA reached over HTTP
pub struct TsaClientOnline {
    config: TsaConfig,
    http: HttpFetcher,
    pki: Arc<dyn PkiProvider>,
}

impl TsaClientOnline {
    /// Client using `reqwest` with the configured TSA timeout
    #[cfg(feature = "online")]
    pub fn new(config: TsaConfig, pki: Arc<dyn PkiProvider>) -> crate::error::Result<Self> {
        let http = HttpFetcher::online(config.timeout(), crate::transport::RetryPolicy::default())?;
        Ok(Self::with_fetcher(config, http, pki))
    }

    pub fn with_fetcher(config: TsaConfig, http: HttpFetcher, pki: Arc<dyn PkiProvider>) -> Self {
        Self { config, http, pki }
    }

    pub fn config(&self) -> &TsaConfig {
        &self.config
    }

    async fn request(
        &self,
        imprint: &[u8],
        hash_algorithm: HashAlgorithm,
    ) -> Result<TimestampToken, FetchError> {
        let nonce = der::nonce(imprint);
        let body = der::timestamp_request(&TimestampRequest {
            imprint,
            hash_algorithm,
            policy_oid: self.config.policy_oid.as_deref(),
            nonce: Some(&nonce),
            cert_req: self.config.include_cert,
        })
        .map_err(|e| FetchError::Malformed(format!("timestamp request: {}", e)))?;

        let mut request =
            HttpRequest::post(self.config.url.as_str(), TIMESTAMP_QUERY, body).accept(TIMESTAMP_REPLY);
        if let (Some(user), Some(pass)) = (&self.config.username, &self.config.password) {
            request = request.basic_auth(user.as_str(), pass.as_str());
        }

        let response = self.http.fetch(request).await?;
        let token = self.pki.parse_timestamp_response(&response)?;

        if token.hash_algorithm != hash_algorithm || token.message_imprint.as_ref() != imprint {
            return Err(FetchError::Malformed(
                "timestamp token imprint does not match the request".to_string(),
            ));
        }
        if let Some(returned) = &token.nonce {
            if der::unsigned_integer(returned) != der::unsigned_integer(&nonce) {
                return Err(FetchError::Malformed("timestamp nonce mismatch".to_string()));
            }
        }
        let signer = token_signer(self.pki.as_ref(), &token)?;

        info!(url = %self.config.url, gen_time = %token.gen_time, tsa = %signer.subject(), "timestamp obtained");
        debug!(token_len = token.encoded.len(), "timestamp token");
        Ok(token)
    }
}

impl TimestampClient for TsaClientOnline {
    fn timestamp<'a>(
        &'a self,
        imprint: &'a [u8],
        hash_algorithm: HashAlgorithm,
    ) -> BoxFuture<'a, Result<TimestampToken, FetchError>> {
        Box::pin(self.request(imprint, hash_algorithm))
    }
}
