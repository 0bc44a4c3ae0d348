//! OCSP client over HTTP POST

use super::{Attempts, CacheKey, EvidenceRecord, FetchResult, OcspClient, RevocationEvidence, RevocationRequest};
use crate::der;
use crate::error::FetchError;
use crate::pki::{Certificate, OcspInfo, PkiProvider};
use crate::transport::{HttpFetcher, HttpRequest};
use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::{debug, warn};

const OCSP_REQUEST: &str = "application/ocsp-request";
const OCSP_RESPONSE: &str = "application/ocsp-response";

/// Queries every OCSP responder named in the certificate's AIA extension
///
/// A response is accepted when it is signed by the issuer itself or by a
/// delegated responder certificate issued by the issuer. The responder
/// certificate ships inside the response or is one of the request's delegates.
pub struct OcspClientOnline {
    http: HttpFetcher,
    pki: Arc<dyn PkiProvider>,
    use_nonce: bool,
}

impl OcspClientOnline {
    pub fn new(http: HttpFetcher, pki: Arc<dyn PkiProvider>) -> Self {
        Self {
            http,
            pki,
            use_nonce: true,
        }
    }

    /// Some responders serve pre-produced responses and reject nonces
    pub fn without_nonce(mut self) -> Self {
        self.use_nonce = false;
        self
    }

    async fn fetch_all(&self, request: RevocationRequest<'_>) -> FetchResult {
        let cert = request.certificate;
        let issuer = request.issuer;
        let mut attempts = Attempts::default();

        for url in cert.ocsp_responders() {
            let key = CacheKey::Ocsp {
                url: url.clone(),
                certificate: cert.fingerprint(),
            };
            let body = match request.cache.get(&key) {
                Some(body) => {
                    debug!(url = %url, "OCSP cache hit");
                    body
                }
                None => {
                    let nonce = self.use_nonce.then(|| der::nonce(cert.der()));
                    let encoded = match der::ocsp_request(cert, issuer, nonce.as_ref().map(|n| &n[..])) {
                        Ok(encoded) => encoded,
                        Err(e) => {
                            warn!(url = %url, error = %e, "cannot encode OCSP request");
                            attempts.fail(FetchError::Malformed(format!("OCSP request: {e}")));
                            continue;
                        }
                    };
                    let http_request =
                        HttpRequest::post(url.as_str(), OCSP_REQUEST, encoded).accept(OCSP_RESPONSE);
                    match self.http.fetch(http_request).await {
                        Ok(body) => {
                            request.cache.insert(key, body.clone());
                            body
                        }
                        Err(e) => {
                            attempts.fail(e.into());
                            continue;
                        }
                    }
                }
            };

            let info = match self.pki.parse_ocsp_response(&body) {
                Ok(info) => info,
                Err(e) => {
                    warn!(url = %url, error = %e, "malformed OCSP response");
                    attempts.fail(e.into());
                    continue;
                }
            };
            let Some(single) = info.response_for(cert, issuer) else {
                attempts.fail(FetchError::Malformed(format!(
                    "OCSP response from {} does not cover {}",
                    url,
                    cert.subject()
                )));
                continue;
            };
            let signer = match self.resolve_signer(&info, issuer, request.delegates) {
                Ok(signer) => signer,
                Err(e) => {
                    warn!(url = %url, error = %e, "OCSP response rejected");
                    attempts.fail(e);
                    continue;
                }
            };

            let record = EvidenceRecord::new(
                body.clone(),
                signer.subject().clone(),
                info.produced_at,
                cert.fingerprint(),
                single.status,
            )
            .with_next_update(single.next_update)
            .with_signer(signer)
            .with_embedded_certificates(info.certificates.clone());
            attempts.push(RevocationEvidence::Ocsp(record));
        }

        attempts.finish()
    }

    /// Find the certificate whose key signed the response
    fn resolve_signer(
        &self,
        info: &OcspInfo,
        issuer: &Arc<Certificate>,
        delegates: &[Arc<Certificate>],
    ) -> Result<Arc<Certificate>, FetchError> {
        if info.responder.names(issuer)
            && self.pki.verify_signature(issuer, &info.signed)
        {
            return Ok(Arc::clone(issuer));
        }

        let embedded = info
            .certificates
            .iter()
            .filter_map(|der| self.pki.parse_certificate(der).ok().map(Arc::new));
        let mut delegated_unlinked = None;
        for candidate in embedded.chain(delegates.iter().cloned()) {
            if !info.responder.names(&candidate)
                || !self.pki.verify_signature(&candidate, &info.signed)
            {
                continue;
            }
            if self.pki.verify_issued_by(&candidate, issuer) {
                return Ok(candidate);
            }
            delegated_unlinked = Some(candidate);
        }

        match delegated_unlinked {
            Some(responder) => Err(FetchError::ResponderUnresolved(format!(
                "responder {} is not issued by {}",
                responder.subject(),
                issuer.subject()
            ))),
            None => Err(FetchError::SignatureInvalid(format!(
                "no certificate verifies the response for issuer {}",
                issuer.subject()
            ))),
        }
    }
}

impl OcspClient for OcspClientOnline {
    fn fetch<'a>(&'a self, request: RevocationRequest<'a>) -> BoxFuture<'a, FetchResult> {
        Box::pin(self.fetch_all(request))
    }
}
