//! CRL client over HTTP distribution points

use super::{Attempts, CacheKey, CrlClient, EvidenceRecord, FetchResult, RevocationEvidence, RevocationRequest};
use crate::error::FetchError;
use crate::pki::{Certificate, CrlInfo, PkiProvider};
use crate::transport::{HttpFetcher, HttpRequest};
use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::{debug, warn};

/// Downloads the CRL of every distribution point named by the certificate
///
/// A CRL must be issued by the certificate's issuer and carry a signature by
/// the issuer's key, or by the key of a CRL signer the issuer certified and
/// the caller passed in as a delegate. Downloads are cached per URL for the pass, so sibling
/// certificates of one CA share a single request.
pub struct CrlClientOnline {
    http: HttpFetcher,
    pki: Arc<dyn PkiProvider>,
}

impl CrlClientOnline {
    pub fn new(http: HttpFetcher, pki: Arc<dyn PkiProvider>) -> Self {
        Self { http, pki }
    }

    async fn fetch_all(&self, request: RevocationRequest<'_>) -> FetchResult {
        let cert = request.certificate;
        let issuer = request.issuer;
        let mut attempts = Attempts::default();

        for url in cert.crl_distribution_points() {
            let key = CacheKey::Crl { url: url.clone() };
            let body = match request.cache.get(&key) {
                Some(body) => {
                    debug!(url = %url, "CRL cache hit");
                    body
                }
                None => match self.http.fetch(HttpRequest::get(url.as_str())).await {
                    Ok(body) => {
                        request.cache.insert(key, body.clone());
                        body
                    }
                    Err(e) => {
                        attempts.fail(e.into());
                        continue;
                    }
                },
            };

            let info = match self.pki.parse_crl(&body) {
                Ok(info) => info,
                Err(e) => {
                    warn!(url = %url, error = %e, "malformed CRL");
                    attempts.fail(e.into());
                    continue;
                }
            };
            if !info.covers(cert) {
                attempts.fail(FetchError::Malformed(format!(
                    "CRL from {} is issued by {}, not {}",
                    url,
                    info.issuer,
                    cert.issuer()
                )));
                continue;
            }
            let Some(signer) = self.crl_signer(&info, issuer, request.delegates) else {
                warn!(url = %url, issuer = %issuer.subject(), "CRL signature does not verify");
                attempts.fail(FetchError::SignatureInvalid(format!(
                    "CRL from {} not signed by {} or a CRL signer it issued",
                    url,
                    issuer.subject()
                )));
                continue;
            };

            let record = EvidenceRecord::new(
                body,
                info.issuer.clone(),
                info.this_update,
                cert.fingerprint(),
                info.status_of(cert.serial()),
            )
            .with_next_update(info.next_update)
            .with_signer(signer);
            attempts.push(RevocationEvidence::Crl(record));
        }

        attempts.finish()
    }

    /// The issuer itself, or a dedicated CRL signing certificate it issued
    fn crl_signer(
        &self,
        info: &CrlInfo,
        issuer: &Arc<Certificate>,
        delegates: &[Arc<Certificate>],
    ) -> Option<Arc<Certificate>> {
        if self.pki.verify_signature(issuer, &info.signed) {
            return Some(Arc::clone(issuer));
        }
        let signer = delegates.iter().find(|candidate| {
            candidate.fingerprint() != issuer.fingerprint()
                && self.pki.verify_issued_by(candidate, issuer)
                && self.pki.verify_signature(candidate, &info.signed)
        })?;
        debug!(signer = %signer.subject(), issuer = %issuer.subject(), "CRL signed by a delegated CRL signer");
        Some(Arc::clone(signer))
    }
}

impl CrlClient for CrlClientOnline {
    fn fetch<'a>(&'a self, request: RevocationRequest<'a>) -> BoxFuture<'a, FetchResult> {
        Box::pin(self.fetch_all(request))
    }
}
