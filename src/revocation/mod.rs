//! Revocation evidence and the CRL / OCSP client interfaces
//!
//! A client answers for one certificate at a time. It either returns evidence
//! ([`Lookup::Found`]), reports that no source exists for the certificate
//! ([`Lookup::Absent`]), or fails with a [`FetchError`]. Failures are never
//! hard errors; the collector records them on the outcome.

mod crl;
mod ocsp;

pub use crl::CrlClientOnline;
pub use ocsp::OcspClientOnline;

use crate::context::TimeBasedContext;
use crate::error::FetchError;
use crate::pki::{CertStatus, Certificate, DistinguishedName, Fingerprint};
use bytes::Bytes;
use futures::future::BoxFuture;
use quick_cache::sync::Cache;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    Crl,
    Ocsp,
}

impl fmt::Display for EvidenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvidenceKind::Crl => f.write_str("CRL"),
            EvidenceKind::Ocsp => f.write_str("OCSP"),
        }
    }
}

/// Fields shared by both evidence kinds
#[derive(Debug, Clone)]
pub struct EvidenceRecord {
    pub encoded: Bytes,
    pub fingerprint: Fingerprint,
    /// CRL issuer or OCSP responder name
    pub responder: DistinguishedName,
    /// thisUpdate of a CRL, producedAt of an OCSP response
    pub generated_at: OffsetDateTime,
    pub next_update: Option<OffsetDateTime>,
    /// Certificate the evidence speaks for
    pub covers: Fingerprint,
    pub status: CertStatus,
    /// Certificate whose key verified the evidence, when known
    pub signer: Option<Arc<Certificate>>,
    /// Certificates shipped inside the response (OCSP)
    pub embedded_certificates: Vec<Bytes>,
}

impl EvidenceRecord {
    pub fn new(
        encoded: impl Into<Bytes>,
        responder: DistinguishedName,
        generated_at: OffsetDateTime,
        covers: Fingerprint,
        status: CertStatus,
    ) -> Self {
        let encoded = encoded.into();
        Self {
            fingerprint: Fingerprint::of(&encoded),
            encoded,
            responder,
            generated_at,
            next_update: None,
            covers,
            status,
            signer: None,
            embedded_certificates: Vec::new(),
        }
    }

    pub fn with_next_update(mut self, next_update: Option<OffsetDateTime>) -> Self {
        self.next_update = next_update;
        self
    }

    pub fn with_signer(mut self, signer: Arc<Certificate>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn with_embedded_certificates(mut self, certs: Vec<Bytes>) -> Self {
        self.embedded_certificates = certs;
        self
    }
}

/// Signed statement about a certificate's revocation status
#[derive(Debug, Clone)]
pub enum RevocationEvidence {
    Crl(EvidenceRecord),
    Ocsp(EvidenceRecord),
}

impl RevocationEvidence {
    pub fn kind(&self) -> EvidenceKind {
        match self {
            RevocationEvidence::Crl(_) => EvidenceKind::Crl,
            RevocationEvidence::Ocsp(_) => EvidenceKind::Ocsp,
        }
    }

    pub fn record(&self) -> &EvidenceRecord {
        match self {
            RevocationEvidence::Crl(record) | RevocationEvidence::Ocsp(record) => record,
        }
    }

    pub fn encoded(&self) -> &Bytes {
        &self.record().encoded
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.record().fingerprint
    }

    pub fn responder(&self) -> &DistinguishedName {
        &self.record().responder
    }

    pub fn generated_at(&self) -> OffsetDateTime {
        self.record().generated_at
    }

    pub fn covers(&self) -> Fingerprint {
        self.record().covers
    }

    pub fn status(&self) -> CertStatus {
        self.record().status
    }

    pub fn signer(&self) -> Option<&Arc<Certificate>> {
        self.record().signer.as_ref()
    }
}

/// Successful client answer
#[derive(Debug, Clone)]
pub enum Lookup {
    Found(Vec<RevocationEvidence>),
    /// The certificate names no source of this kind
    Absent,
}

/// Key of the within-pass response cache
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// A CRL covers every certificate of its issuer, so the URL is enough
    Crl { url: String },
    Ocsp { url: String, certificate: Fingerprint },
}

/// Raw responses fetched during one collection pass
///
/// Shared by concurrent fetches; dropped with the pass.
pub struct FetchCache {
    inner: Cache<CacheKey, Bytes>,
}

impl FetchCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Cache::new(capacity.max(1)),
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<Bytes> {
        self.inner.get(key)
    }

    pub fn insert(&self, key: CacheKey, body: Bytes) {
        self.inner.insert(key, body);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl fmt::Debug for FetchCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchCache").field("len", &self.len()).finish()
    }
}

/// One certificate's revocation question
#[derive(Clone, Copy)]
pub struct RevocationRequest<'a> {
    pub certificate: &'a Arc<Certificate>,
    pub issuer: &'a Arc<Certificate>,
    /// Known certificates that may sign evidence on the issuer's behalf
    pub delegates: &'a [Arc<Certificate>],
    pub context: TimeBasedContext,
    pub cache: &'a FetchCache,
}

pub type FetchResult = Result<Lookup, FetchError>;

pub trait CrlClient: Send + Sync {
    fn fetch<'a>(&'a self, request: RevocationRequest<'a>) -> BoxFuture<'a, FetchResult>;
}

pub trait OcspClient: Send + Sync {
    fn fetch<'a>(&'a self, request: RevocationRequest<'a>) -> BoxFuture<'a, FetchResult>;
}

/// Outcome of trying every URL of one source
///
/// Keeps the last failure so that "every URL failed" surfaces as an error
/// while "some URL answered" wins.
#[derive(Default)]
pub(crate) struct Attempts {
    found: Vec<RevocationEvidence>,
    last_error: Option<FetchError>,
}

impl Attempts {
    pub(crate) fn push(&mut self, evidence: RevocationEvidence) {
        self.found.push(evidence);
    }

    pub(crate) fn fail(&mut self, error: FetchError) {
        self.last_error = Some(error);
    }

    pub(crate) fn finish(self) -> FetchResult {
        if !self.found.is_empty() {
            return Ok(Lookup::Found(self.found));
        }
        match self.last_error {
            Some(error) => Err(error),
            None => Ok(Lookup::Absent),
        }
    }
}
