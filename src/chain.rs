//! Chain Builder
//!
//! Builds the ordered leaf→root chain for a certificate from the
//! [`CertificateStore`], optionally fetching missing issuers through their AIA
//! `caIssuers` URIs. An unresolved issuer does not fail the build: the chain is
//! returned as [`ChainStatus::Partial`] so the caller can still do best-effort
//! validation.

use crate::context::CertificateRole;
use crate::error::FetchError;
use crate::pki::{Certificate, Fingerprint, PkiProvider};
use crate::store::CertificateStore;
use crate::transport::{HttpFetcher, HttpRequest};
use bytes::Bytes;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Pending download of one issuer certificate
pub type IssuerFuture = BoxFuture<'static, std::result::Result<Bytes, FetchError>>;

/// Fetch of an issuer certificate from an AIA URI
pub type IssuerFetcher = Arc<dyn Fn(String) -> IssuerFuture + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainStatus {
    /// Ends in a self-signed certificate or a trust anchor
    Complete,
    /// An issuer already in the chain was met again; the repeat is dropped
    CompleteWithCycle,
    /// The last certificate's issuer could not be resolved
    Partial,
}

#[derive(Debug, Clone)]
pub struct Chain {
    certificates: Vec<Arc<Certificate>>,
    status: ChainStatus,
    role: CertificateRole,
    trusted: bool,
}

impl Chain {
    pub fn certificates(&self) -> &[Arc<Certificate>] {
        &self.certificates
    }

    pub fn leaf(&self) -> &Arc<Certificate> {
        &self.certificates[0]
    }

    pub fn last(&self) -> &Arc<Certificate> {
        &self.certificates[self.certificates.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    /// A chain always holds at least its leaf
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn status(&self) -> ChainStatus {
        self.status
    }

    pub fn is_partial(&self) -> bool {
        self.status == ChainStatus::Partial
    }

    /// Role of the leaf
    pub fn role(&self) -> CertificateRole {
        self.role
    }

    /// Role of the certificate at `index`
    pub fn role_of(&self, index: usize) -> CertificateRole {
        if index == 0 {
            self.role
        } else {
            CertificateRole::IssuerCa
        }
    }

    /// Whether the chain ends in a trust anchor of the store it was built from
    pub fn is_trusted(&self) -> bool {
        self.trusted
    }

    /// Issuer of the certificate at `index`, if it is in the chain
    pub fn issuer_of(&self, index: usize) -> Option<&Arc<Certificate>> {
        let cert = self.certificates.get(index)?;
        if cert.is_self_signed() {
            return Some(cert);
        }
        self.certificates
            .get(index + 1)
            .or_else(|| self.certificates.iter().find(|c| c.subject() == cert.issuer()))
    }

    pub fn fingerprints(&self) -> Vec<Fingerprint> {
        self.certificates.iter().map(|c| c.fingerprint()).collect()
    }

    /// Issuer/subject linkage holds between every adjacent pair
    pub fn links_hold(&self) -> bool {
        self.certificates
            .windows(2)
            .all(|pair| pair[0].issuer() == pair[1].subject())
    }
}

/// Builds chains against a store
pub struct ChainBuilder<'a> {
    pki: &'a dyn PkiProvider,
    fetch_issuer: Option<IssuerFetcher>,
    max_length: usize,
}

enum Step {
    /// Next link found
    Next(Arc<Certificate>),
    /// Issuer is already in the chain
    Cycle,
    Unresolved,
}

impl<'a> ChainBuilder<'a> {
    pub fn new(pki: &'a dyn PkiProvider) -> Self {
        Self {
            pki,
            fetch_issuer: None,
            max_length: 16,
        }
    }

    pub fn with_issuer_fetcher(mut self, fetch: IssuerFetcher) -> Self {
        self.fetch_issuer = Some(fetch);
        self
    }

    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length.max(1);
        self
    }

    /// Build from the store only, never touching the network
    pub fn build_offline(
        &self,
        leaf: Arc<Certificate>,
        role: CertificateRole,
        store: &mut CertificateStore,
    ) -> Chain {
        let mut state = BuildState::start(leaf, store);
        loop {
            if let Some(status) = state.terminal(store, self.max_length) {
                return state.finish(status, role, store);
            }
            match self.resolve_from_store(&state, store) {
                Step::Next(issuer) => state.push(issuer),
                Step::Cycle => return state.finish(ChainStatus::CompleteWithCycle, role, store),
                Step::Unresolved => return state.finish(ChainStatus::Partial, role, store),
            }
        }
    }

    /// Build, fetching missing issuers when a fetcher is configured
    pub async fn build(
        &self,
        leaf: Arc<Certificate>,
        role: CertificateRole,
        store: &mut CertificateStore,
    ) -> Chain {
        let mut state = BuildState::start(leaf, store);
        loop {
            if let Some(status) = state.terminal(store, self.max_length) {
                return state.finish(status, role, store);
            }
            let step = match self.resolve_from_store(&state, store) {
                Step::Unresolved => self.resolve_by_fetch(&state, store).await,
                step => step,
            };
            match step {
                Step::Next(issuer) => state.push(issuer),
                Step::Cycle => return state.finish(ChainStatus::CompleteWithCycle, role, store),
                Step::Unresolved => return state.finish(ChainStatus::Partial, role, store),
            }
        }
    }

    fn resolve_from_store(&self, state: &BuildState, store: &CertificateStore) -> Step {
        let current = state.current();
        let candidates = store.issuer_candidates(current);
        let issuer = candidates
            .into_iter()
            .find(|candidate| self.pki.verify_issued_by(current, candidate));
        match issuer {
            Some(issuer) if state.seen.contains(&issuer.fingerprint()) => Step::Cycle,
            Some(issuer) => Step::Next(issuer),
            None => Step::Unresolved,
        }
    }

    async fn resolve_by_fetch(&self, state: &BuildState, store: &mut CertificateStore) -> Step {
        let Some(fetch) = &self.fetch_issuer else {
            return Step::Unresolved;
        };
        let current = Arc::clone(state.current());

        for uri in current.ca_issuers() {
            let der = match fetch(uri.clone()).await {
                Ok(der) => der,
                Err(e) => {
                    warn!(uri = %uri, subject = %current.subject(), error = %e, "issuer fetch failed");
                    continue;
                }
            };
            let candidate = match self.pki.parse_certificate(&der) {
                Ok(cert) => cert,
                Err(e) => {
                    warn!(uri = %uri, error = %e, "fetched issuer is malformed");
                    continue;
                }
            };
            if !self.pki.verify_issued_by(&current, &candidate) {
                warn!(uri = %uri, fetched = %candidate.subject(), "fetched certificate did not issue the current one");
                continue;
            }
            debug!(uri = %uri, subject = %candidate.subject(), "fetched missing issuer");
            let stored = store.add(candidate);
            if state.seen.contains(&stored.fingerprint()) {
                return Step::Cycle;
            }
            return Step::Next(stored);
        }
        Step::Unresolved
    }
}

struct BuildState {
    certificates: Vec<Arc<Certificate>>,
    seen: HashSet<Fingerprint>,
}

impl BuildState {
    fn start(leaf: Arc<Certificate>, store: &mut CertificateStore) -> Self {
        let leaf = store.add_shared(leaf);
        let mut seen = HashSet::new();
        seen.insert(leaf.fingerprint());
        Self {
            certificates: vec![leaf],
            seen,
        }
    }

    fn current(&self) -> &Arc<Certificate> {
        &self.certificates[self.certificates.len() - 1]
    }

    fn push(&mut self, issuer: Arc<Certificate>) {
        debug!(subject = %issuer.subject(), fingerprint = %issuer.fingerprint().short(), "chain link");
        self.seen.insert(issuer.fingerprint());
        self.certificates.push(issuer);
    }

    /// Status if the chain must stop at the current certificate
    fn terminal(&self, store: &CertificateStore, max_length: usize) -> Option<ChainStatus> {
        let current = self.current();
        if current.is_self_signed() || store.is_trusted(&current.fingerprint()) {
            return Some(ChainStatus::Complete);
        }
        if self.certificates.len() >= max_length {
            warn!(max_length, subject = %current.subject(), "chain length limit reached");
            return Some(ChainStatus::Partial);
        }
        None
    }

    fn finish(self, status: ChainStatus, role: CertificateRole, store: &CertificateStore) -> Chain {
        let trusted = status != ChainStatus::Partial
            && store.is_trusted(&self.current().fingerprint());
        if status == ChainStatus::Partial {
            warn!(
                leaf = %self.certificates[0].subject(),
                missing = %self.current().issuer(),
                length = self.certificates.len(),
                "partial chain"
            );
        }
        Chain {
            certificates: self.certificates,
            status,
            role,
            trusted,
        }
    }
}

/// Issuer fetcher that GETs AIA URIs over HTTP
pub fn http_issuer_fetcher(http: HttpFetcher) -> IssuerFetcher {
    Arc::new(move |uri: String| {
        let http = http.clone();
        Box::pin(async move {
            http.fetch(HttpRequest::get(uri).accept("application/pkix-cert"))
                .await
                .map_err(FetchError::from)
        }) as IssuerFuture
    })
}
