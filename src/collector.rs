//! Evidence Collector
//!
//! Gathers revocation evidence for every certificate of one or more chains.
//! Fetches for different certificates are independent and run concurrently,
//! bounded by the configured limit. A failing source never aborts collection:
//! it is recorded and shows up in the certificate's sub-status.

use crate::chain::Chain;
use crate::config::{LtvConfig, SourceSelection};
use crate::context::{CertificateRole, RolePolicy, TimeBasedContext, TimeBasedContexts, ValidationContext};
use crate::dss::DocumentSecurityStore;
use crate::error::FetchError;
use crate::outcome::{CertificateSubStatus, UndeterminedReason};
use crate::pki::{
    CertStatus, Certificate, DistinguishedName, Fingerprint, OcspInfo, PkiProvider, ResponderId,
    SingleResponse,
};
use crate::revocation::{
    CrlClient, EvidenceKind, EvidenceRecord, FetchCache, FetchResult, Lookup, OcspClient,
    RevocationEvidence, RevocationRequest,
};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

// ============================================================================
// Evidence Index
// ============================================================================

/// Evidence already known before a pass, keyed by the certificate it covers
#[derive(Debug, Default, Clone)]
pub struct EvidenceIndex {
    by_certificate: HashMap<Fingerprint, Vec<RevocationEvidence>>,
}

impl EvidenceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, evidence: RevocationEvidence) {
        let entries = self.by_certificate.entry(evidence.covers()).or_default();
        if !entries.iter().any(|e| e.fingerprint() == evidence.fingerprint()) {
            entries.push(evidence);
        }
    }

    pub fn for_certificate(&self, fingerprint: &Fingerprint) -> &[RevocationEvidence] {
        self.by_certificate
            .get(fingerprint)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.by_certificate.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_certificate.is_empty()
    }

    /// Re-index the CRLs and OCSP responses of an earlier pass
    ///
    /// Each entry is matched against the DSS certificates it speaks for.
    /// Entries that no longer decode are skipped.
    pub fn from_dss(dss: &DocumentSecurityStore, pki: &dyn PkiProvider) -> Self {
        let mut index = Self::new();
        let certs: Vec<Certificate> = dss
            .certificates()
            .iter()
            .filter_map(|entry| match pki.parse_certificate(&entry.data) {
                Ok(cert) => Some(cert),
                Err(e) => {
                    warn!(fingerprint = %entry.fingerprint.short(), error = %e, "undecodable DSS certificate");
                    None
                }
            })
            .collect();

        for entry in dss.crls().iter() {
            let info = match pki.parse_crl(&entry.data) {
                Ok(info) => info,
                Err(e) => {
                    warn!(fingerprint = %entry.fingerprint.short(), error = %e, "undecodable DSS CRL");
                    continue;
                }
            };
            for cert in certs.iter().filter(|c| info.covers(c)) {
                let record = EvidenceRecord::new(
                    entry.data.clone(),
                    info.issuer.clone(),
                    info.this_update,
                    cert.fingerprint(),
                    info.status_of(cert.serial()),
                )
                .with_next_update(info.next_update);
                index.record(RevocationEvidence::Crl(record));
            }
        }

        for entry in dss.ocsps().iter() {
            let info = match pki.parse_ocsp_response(&entry.data) {
                Ok(info) => info,
                Err(e) => {
                    warn!(fingerprint = %entry.fingerprint.short(), error = %e, "undecodable DSS OCSP response");
                    continue;
                }
            };
            let responder = responder_certificate(&info, &certs, pki);
            let responder_name = match (&info.responder, &responder) {
                (_, Some(cert)) => cert.subject().clone(),
                (ResponderId::ByName(name), None) => name.clone(),
                (ResponderId::ByKeyHash(_), None) => DistinguishedName::from_display("(key hash)"),
            };
            for single in &info.responses {
                let matched: Vec<&Certificate> = certs
                    .iter()
                    .filter(|c| c.serial() == single.serial.as_ref())
                    .filter(|c| answers_for_issuer(&info, single, responder.as_ref(), c))
                    .collect();
                if matched.len() > 1 {
                    warn!(fingerprint = %entry.fingerprint.short(), candidates = matched.len(), "ambiguous DSS OCSP response skipped");
                    continue;
                }
                for cert in matched {
                    let record = EvidenceRecord::new(
                        entry.data.clone(),
                        responder_name.clone(),
                        info.produced_at,
                        cert.fingerprint(),
                        single.status,
                    )
                    .with_next_update(single.next_update)
                    .with_embedded_certificates(info.certificates.clone());
                    index.record(RevocationEvidence::Ocsp(record));
                }
            }
        }

        debug!(entries = index.len(), "indexed prior DSS evidence");
        index
    }
}

/// Certificate whose key signed the response, from the response or the DSS
fn responder_certificate(info: &OcspInfo, dss_certs: &[Certificate], pki: &dyn PkiProvider) -> Option<Certificate> {
    let embedded = info
        .certificates
        .iter()
        .filter_map(|der| pki.parse_certificate(der).ok());
    embedded
        .chain(dss_certs.iter().cloned())
        .find(|c| info.responder.names(c) && pki.verify_signature(c, &info.signed))
}

/// Whether a single response was issued about a certificate of `cert`'s issuer
///
/// The CertID decides when its hashes can be checked. Otherwise the responder
/// must be that issuer or a responder it delegated to.
fn answers_for_issuer(
    info: &OcspInfo,
    single: &SingleResponse,
    responder: Option<&Certificate>,
    cert: &Certificate,
) -> bool {
    if let Some(named) = single.issuer.as_ref().and_then(|h| h.names(cert.issuer())) {
        return named;
    }
    match responder {
        Some(responder) => responder.subject() == cert.issuer() || responder.issuer() == cert.issuer(),
        None => matches!(&info.responder, ResponderId::ByName(name) if name == cert.issuer()),
    }
}

// ============================================================================
// Evidence Bundle
// ============================================================================

/// How current the admitted evidence is for the contexts that apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    /// Some evidence satisfies every applicable context
    Fresh,
    /// Evidence exists but none is recent enough for every context
    Stale,
}

/// Temporally inadmissible evidence, kept for reporting
#[derive(Debug, Clone)]
pub struct RejectedEvidence {
    pub kind: EvidenceKind,
    pub fingerprint: Fingerprint,
    pub reason: crate::context::TemporalRejection,
}

/// Everything learned about one certificate
#[derive(Debug, Clone)]
pub struct CertificateEvidence {
    pub certificate: Arc<Certificate>,
    pub role: CertificateRole,
    /// Contexts checked; `None` when the role policy excludes all of them
    pub contexts: Option<TimeBasedContexts>,
    /// Admitted evidence, fetched or reused
    pub evidence: Vec<RevocationEvidence>,
    pub rejected: Vec<RejectedEvidence>,
    pub failures: Vec<(EvidenceKind, FetchError)>,
    /// Evidence taken from an earlier pass instead of fetched
    pub reused: usize,
    pub freshness: Option<Freshness>,
    pub status: CertificateSubStatus,
}

impl CertificateEvidence {
    fn settled(certificate: Arc<Certificate>, role: CertificateRole, status: CertificateSubStatus) -> Self {
        Self {
            certificate,
            role,
            contexts: None,
            evidence: Vec::new(),
            rejected: Vec::new(),
            failures: Vec::new(),
            reused: 0,
            freshness: None,
            status,
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.certificate.fingerprint()
    }
}

/// Per-certificate evidence of one chain, in chain order
///
/// Entries are only ever added. Absorbing another bundle appends evidence to
/// the entries it shares with this one.
#[derive(Debug, Clone, Default)]
pub struct EvidenceBundle {
    entries: Vec<CertificateEvidence>,
}

impl EvidenceBundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: CertificateEvidence) {
        match self
            .entries
            .iter_mut()
            .find(|e| e.fingerprint() == entry.fingerprint())
        {
            Some(existing) => {
                for evidence in entry.evidence {
                    if !existing
                        .evidence
                        .iter()
                        .any(|e| e.fingerprint() == evidence.fingerprint())
                    {
                        existing.evidence.push(evidence);
                    }
                }
                existing.rejected.extend(entry.rejected);
                existing.failures.extend(entry.failures);
                existing.reused += entry.reused;
                existing.freshness = match (existing.freshness, entry.freshness) {
                    (Some(Freshness::Fresh), _) | (_, Some(Freshness::Fresh)) => Some(Freshness::Fresh),
                    (current, other) => current.or(other),
                };
                existing.contexts = existing.contexts.or(entry.contexts);
                reclassify(existing);
            }
            None => self.entries.push(entry),
        }
    }

    pub fn absorb(&mut self, other: EvidenceBundle) {
        for entry in other.entries {
            self.push(entry);
        }
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<&CertificateEvidence> {
        self.entries.iter().find(|e| &e.fingerprint() == fingerprint)
    }

    pub fn entries(&self) -> &[CertificateEvidence] {
        &self.entries
    }

    /// Every admitted piece of evidence
    pub fn evidence(&self) -> impl Iterator<Item = &RevocationEvidence> {
        self.entries.iter().flat_map(|e| e.evidence.iter())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// Collector
// ============================================================================

/// Certificate queued for examination
struct Job {
    chain: usize,
    certificate: Arc<Certificate>,
    issuer: Option<Arc<Certificate>>,
    role: CertificateRole,
}

pub struct EvidenceCollector {
    crl: Option<Arc<dyn CrlClient>>,
    ocsp: Option<Arc<dyn OcspClient>>,
    context: ValidationContext,
    policy: RolePolicy,
    sources: SourceSelection,
    include_trust_anchors: bool,
    concurrency: usize,
    deadline: Duration,
    cache_capacity: usize,
    delegates: Vec<Arc<Certificate>>,
}

impl EvidenceCollector {
    pub fn new(context: ValidationContext, config: &LtvConfig) -> Self {
        let attempts = config.retry.max_attempts.max(1);
        let deadline = config.fetch_timeout() * attempts
            + Duration::from_millis(config.retry.max_backoff_ms) * (attempts - 1);
        Self {
            crl: None,
            ocsp: None,
            context,
            policy: config.roles,
            sources: config.sources,
            include_trust_anchors: config.include_trust_anchors,
            concurrency: config.concurrency_limit.max(1),
            deadline,
            cache_capacity: config.fetch_cache_capacity,
            delegates: Vec::new(),
        }
    }

    pub fn with_crl_client(mut self, client: Arc<dyn CrlClient>) -> Self {
        self.crl = Some(client);
        self
    }

    pub fn with_ocsp_client(mut self, client: Arc<dyn OcspClient>) -> Self {
        self.ocsp = Some(client);
        self
    }

    /// Certificates offered to the clients as possible CRL signers and
    /// OCSP responders
    pub fn with_delegates(mut self, delegates: Vec<Arc<Certificate>>) -> Self {
        self.delegates = delegates;
        self
    }

    /// Upper bound on one client call, retries included
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn context(&self) -> &ValidationContext {
        &self.context
    }

    /// Collect evidence for one chain
    pub async fn collect(
        &self,
        chain: &Chain,
        contexts: TimeBasedContexts,
        prior: &EvidenceIndex,
    ) -> EvidenceBundle {
        self.collect_all(&[chain], contexts, prior)
            .await
            .pop()
            .unwrap_or_default()
    }

    /// Collect for several chains in one pass, sharing the fetch cache
    ///
    /// Returns one bundle per chain, in the same order.
    pub async fn collect_all(
        &self,
        chains: &[&Chain],
        contexts: TimeBasedContexts,
        prior: &EvidenceIndex,
    ) -> Vec<EvidenceBundle> {
        let cache = FetchCache::new(self.cache_capacity);
        let mut bundles: Vec<EvidenceBundle> = chains.iter().map(|_| EvidenceBundle::new()).collect();
        let mut jobs = Vec::new();

        for (chain_index, chain) in chains.iter().enumerate() {
            for (cert_index, cert) in chain.certificates().iter().enumerate() {
                let role = chain.role_of(cert_index);
                match self.settle_without_fetch(chain, cert_index, role, contexts) {
                    Some(status) => bundles[chain_index]
                        .push(CertificateEvidence::settled(Arc::clone(cert), role, status)),
                    None => jobs.push(Job {
                        chain: chain_index,
                        certificate: Arc::clone(cert),
                        issuer: chain.issuer_of(cert_index).cloned(),
                        role,
                    }),
                }
            }
        }

        let cache = &cache;
        let results: Vec<(usize, CertificateEvidence)> = stream::iter(jobs)
            .map(|job| async move {
                let chain = job.chain;
                (chain, self.examine(job, contexts, prior, cache).await)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for (chain_index, entry) in results {
            bundles[chain_index].push(entry);
        }
        for (bundle, chain) in bundles.iter_mut().zip(chains) {
            let order = chain.fingerprints();
            bundle
                .entries
                .sort_by_key(|e| order.iter().position(|fp| *fp == e.fingerprint()));
        }
        bundles
    }

    /// Status for certificates that need no fetch at all
    fn settle_without_fetch(
        &self,
        chain: &Chain,
        index: usize,
        role: CertificateRole,
        contexts: TimeBasedContexts,
    ) -> Option<CertificateSubStatus> {
        let cert = &chain.certificates()[index];
        let is_last = index + 1 == chain.len();
        if is_last
            && !chain.is_partial()
            && (chain.is_trusted() || cert.is_self_signed())
            && !self.include_trust_anchors
        {
            return Some(CertificateSubStatus::TrustAnchor);
        }
        if self.policy.applicable(role, contexts).is_none() {
            debug!(subject = %cert.subject(), role = %role, "role policy excludes every requested context");
            return Some(CertificateSubStatus::NotRequired);
        }
        if role == CertificateRole::OcspResponder && cert.has_ocsp_no_check() {
            return Some(CertificateSubStatus::NotRequired);
        }
        if chain.issuer_of(index).is_none() {
            return Some(CertificateSubStatus::Undetermined {
                reasons: vec![UndeterminedReason::IssuerUnresolved],
            });
        }
        None
    }

    async fn examine(
        &self,
        job: Job,
        contexts: TimeBasedContexts,
        prior: &EvidenceIndex,
        cache: &FetchCache,
    ) -> CertificateEvidence {
        let applicable = self
            .policy
            .applicable(job.role, contexts)
            .unwrap_or(contexts);
        let mut entry = CertificateEvidence {
            contexts: Some(applicable),
            ..CertificateEvidence::settled(
                Arc::clone(&job.certificate),
                job.role,
                CertificateSubStatus::NoEvidence,
            )
        };
        let Some(issuer) = job.issuer.as_ref() else {
            return entry;
        };
        let request = RevocationRequest {
            certificate: &job.certificate,
            issuer,
            delegates: &self.delegates,
            context: primary_context(applicable),
            cache,
        };

        match self.sources {
            SourceSelection::CrlOnly => {
                self.gather(EvidenceKind::Crl, request, applicable, prior, &mut entry)
                    .await;
            }
            SourceSelection::OcspOnly => {
                self.gather(EvidenceKind::Ocsp, request, applicable, prior, &mut entry)
                    .await;
            }
            SourceSelection::OcspThenCrl => {
                self.gather(EvidenceKind::Ocsp, request, applicable, prior, &mut entry)
                    .await;
                if !entry.evidence.iter().any(is_decisive) {
                    self.gather(EvidenceKind::Crl, request, applicable, prior, &mut entry)
                        .await;
                }
            }
            SourceSelection::Both => {
                let (crl, ocsp) = futures::join!(
                    self.lookup(EvidenceKind::Crl, request, applicable, prior),
                    self.lookup(EvidenceKind::Ocsp, request, applicable, prior),
                );
                self.absorb(EvidenceKind::Crl, crl, &mut entry);
                self.absorb(EvidenceKind::Ocsp, ocsp, &mut entry);
            }
        }

        entry.freshness = self.freshness(&entry.evidence, applicable);
        entry.status = classify(&entry);
        match &entry.status {
            CertificateSubStatus::Undetermined { reasons } => {
                warn!(subject = %entry.certificate.subject(), reasons = reasons.len(), "revocation status undetermined");
            }
            status => {
                debug!(subject = %entry.certificate.subject(), status = ?status, evidence = entry.evidence.len(), "certificate examined");
            }
        }
        entry
    }

    async fn gather(
        &self,
        kind: EvidenceKind,
        request: RevocationRequest<'_>,
        applicable: TimeBasedContexts,
        prior: &EvidenceIndex,
        entry: &mut CertificateEvidence,
    ) {
        let found = self.lookup(kind, request, applicable, prior).await;
        self.absorb(kind, found, entry);
    }

    /// Reuse prior evidence of `kind` if current enough, otherwise fetch
    async fn lookup(
        &self,
        kind: EvidenceKind,
        request: RevocationRequest<'_>,
        applicable: TimeBasedContexts,
        prior: &EvidenceIndex,
    ) -> Sourced {
        let cert = request.certificate;
        let reusable: Vec<RevocationEvidence> = prior
            .for_certificate(&cert.fingerprint())
            .iter()
            .filter(|e| e.kind() == kind && is_decisive(e))
            .filter(|e| self.context.admit(e.generated_at(), cert.not_before()).is_ok())
            .filter(|e| self.context.satisfies(e.generated_at(), applicable))
            .cloned()
            .collect();
        if !reusable.is_empty() {
            debug!(subject = %cert.subject(), kind = %kind, count = reusable.len(), "reusing evidence from an earlier pass");
            return Sourced::Reused(reusable);
        }

        let future = match kind {
            EvidenceKind::Crl => match &self.crl {
                Some(client) => client.fetch(request),
                None => return Sourced::Fetched(Ok(Lookup::Absent)),
            },
            EvidenceKind::Ocsp => match &self.ocsp {
                Some(client) => client.fetch(request),
                None => return Sourced::Fetched(Ok(Lookup::Absent)),
            },
        };
        let result = match tokio::time::timeout(self.deadline, future).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout),
        };
        if let Err(e) = &result {
            warn!(subject = %cert.subject(), kind = %kind, error = %e, "revocation fetch failed");
        }
        Sourced::Fetched(result)
    }

    fn absorb(&self, kind: EvidenceKind, sourced: Sourced, entry: &mut CertificateEvidence) {
        let found = match sourced {
            Sourced::Reused(evidence) => {
                entry.reused += evidence.len();
                entry.evidence.extend(evidence);
                return;
            }
            Sourced::Fetched(Ok(Lookup::Found(found))) => found,
            Sourced::Fetched(Ok(Lookup::Absent)) => return,
            Sourced::Fetched(Err(e)) => {
                entry.failures.push((kind, e));
                return;
            }
        };

        let cert = &entry.certificate;
        for evidence in found {
            if evidence.covers() != cert.fingerprint() {
                warn!(subject = %cert.subject(), kind = %kind, "evidence for another certificate ignored");
                continue;
            }
            match self.context.admit(evidence.generated_at(), cert.not_before()) {
                Ok(()) => entry.evidence.push(evidence),
                Err(reason) => {
                    warn!(subject = %cert.subject(), kind = %kind, generated_at = %evidence.generated_at(), reason = %reason, "evidence rejected");
                    entry.rejected.push(RejectedEvidence {
                        kind,
                        fingerprint: evidence.fingerprint(),
                        reason,
                    });
                }
            }
        }
    }

    fn freshness(
        &self,
        evidence: &[RevocationEvidence],
        applicable: TimeBasedContexts,
    ) -> Option<Freshness> {
        if evidence.is_empty() {
            return None;
        }
        let fresh = evidence
            .iter()
            .any(|e| self.context.satisfies(e.generated_at(), applicable));
        Some(if fresh { Freshness::Fresh } else { Freshness::Stale })
    }
}

enum Sourced {
    Reused(Vec<RevocationEvidence>),
    Fetched(FetchResult),
}

/// PRESENT when it applies, the stricter of the two
fn primary_context(applicable: TimeBasedContexts) -> TimeBasedContext {
    if applicable.contains(TimeBasedContext::Present) {
        TimeBasedContext::Present
    } else {
        TimeBasedContext::Historical
    }
}

fn is_decisive(evidence: &RevocationEvidence) -> bool {
    evidence.status() != CertStatus::Unknown
}

/// Recompute a merged entry's status; anchors and skipped certificates keep theirs
fn reclassify(entry: &mut CertificateEvidence) {
    if matches!(
        entry.status,
        CertificateSubStatus::TrustAnchor | CertificateSubStatus::NotRequired
    ) {
        return;
    }
    if entry.evidence.is_empty() && entry.failures.is_empty() && entry.rejected.is_empty() {
        return;
    }
    entry.status = classify(entry);
}

/// Revoked beats Good beats failure beats nothing
fn classify(entry: &CertificateEvidence) -> CertificateSubStatus {
    let revoked_at = entry
        .evidence
        .iter()
        .filter_map(|e| match e.status() {
            CertStatus::Revoked { at } => Some(at),
            _ => None,
        })
        .min();
    if let Some(at) = revoked_at {
        return CertificateSubStatus::Revoked { at };
    }
    if entry.evidence.iter().any(|e| e.status() == CertStatus::Good) {
        return CertificateSubStatus::Good;
    }

    let mut reasons: Vec<UndeterminedReason> = entry
        .failures
        .iter()
        .map(|(kind, error)| UndeterminedReason::FetchFailed {
            kind: *kind,
            error: error.clone(),
        })
        .collect();
    reasons.extend(entry.rejected.iter().map(|r| UndeterminedReason::Rejected {
        kind: r.kind,
        reason: r.reason,
    }));
    reasons.extend(
        entry
            .evidence
            .iter()
            .filter(|e| e.status() == CertStatus::Unknown)
            .map(|e| UndeterminedReason::UnknownStatus { kind: e.kind() }),
    );

    if reasons.is_empty() {
        CertificateSubStatus::NoEvidence
    } else {
        CertificateSubStatus::Undetermined { reasons }
    }
}
