//! LTV Orchestrator
//!
//! Drives one or more signatures of a document through
//! `CHAIN_BUILDING -> EVIDENCE_COLLECTING -> DSS_MERGING -> DONE`.
//!
//! Only a malformed signer certificate or a signature that does not verify
//! over the document content ends in `FAILED` (an `Err`). Everything else,
//! including unreachable responders and a missing timestamp, degrades the
//! outcome instead.
//!
//! Chain building and DSS merging touch shared state and run one signature
//! at a time. Evidence collection for different signatures runs concurrently.

use crate::chain::{Chain, ChainBuilder, IssuerFetcher};
use crate::collector::{EvidenceBundle, EvidenceCollector, EvidenceIndex};
use crate::config::LtvConfig;
use crate::context::{CertificateRole, ValidationContext};
use crate::document::DocumentContainer;
use crate::dss::DocumentSecurityStore;
use crate::error::{Error, Result};
use crate::outcome::{
    decide, Assessed, CertificateReport, ChainKind, OutcomeStatus, ProcessState, TimestampSummary,
    ValidationOutcome,
};
use crate::pki::{Certificate, Fingerprint, PkiProvider, SignedPayload, TimestampToken};
use crate::revocation::{CrlClient, EvidenceKind, OcspClient};
use crate::store::CertificateStore;
use crate::timestamp::{signature_imprint, token_signer, TimestampClient};
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, error, info, info_span, warn, Span};

/// One signature to process
#[derive(Debug, Clone)]
pub struct SignatureInput {
    /// Key of the signature's VRI entry
    pub id: String,
    /// DER of the signer certificate
    pub leaf: Bytes,
    /// The signature value, imprinted by the signature timestamp
    pub signature_value: Bytes,
    /// The signer's signature over the document content, checked when present
    pub signed_content: Option<SignedPayload>,
    /// Claimed signing time; falls back to the timestamp, then to now
    pub signing_time: Option<OffsetDateTime>,
    /// Further certificates shipped with the signature
    pub certificates: Vec<Bytes>,
}

impl SignatureInput {
    pub fn new(id: impl Into<String>, leaf: impl Into<Bytes>, signature_value: impl Into<Bytes>) -> Self {
        Self {
            id: id.into(),
            leaf: leaf.into(),
            signature_value: signature_value.into(),
            signed_content: None,
            signing_time: None,
            certificates: Vec::new(),
        }
    }

    pub fn with_signed_content(mut self, payload: SignedPayload) -> Self {
        self.signed_content = Some(payload);
        self
    }

    pub fn with_signing_time(mut self, at: OffsetDateTime) -> Self {
        self.signing_time = Some(at);
        self
    }

    pub fn with_certificates(mut self, certificates: Vec<Bytes>) -> Self {
        self.certificates = certificates;
        self
    }
}

/// Per-signature working state
struct Pass<'a> {
    input: &'a SignatureInput,
    span: Span,
    states: Vec<ProcessState>,
    context: ValidationContext,
    signer: Chain,
    signer_bundle: Option<EvidenceBundle>,
    auxiliary: Vec<(Chain, EvidenceBundle)>,
    /// Auxiliary chains built but not yet collected
    pending: Vec<Chain>,
    /// Every certificate already placed in a chain of this pass
    processed: HashSet<Fingerprint>,
    /// Prior DSS evidence plus what this pass has collected so far
    known: EvidenceIndex,
    timestamp: Option<TimestampToken>,
    tsa_subject: Option<String>,
    notes: Vec<String>,
}

impl Pass<'_> {
    fn enter(&mut self, state: ProcessState) {
        self.states.push(state);
        self.span.in_scope(|| info!(state = %state, "ltv state"));
    }

    fn claim(&mut self, chain: &Chain) {
        self.processed.extend(chain.fingerprints());
    }

    fn note(&mut self, note: String) {
        self.span.in_scope(|| warn!(note = %note, "degraded"));
        self.notes.push(note);
    }
}

pub struct LtvOrchestrator {
    pki: Arc<dyn PkiProvider>,
    store: CertificateStore,
    crl: Option<Arc<dyn CrlClient>>,
    ocsp: Option<Arc<dyn OcspClient>>,
    tsa: Option<Arc<dyn TimestampClient>>,
    fetch_issuer: Option<IssuerFetcher>,
    config: LtvConfig,
    clock: Option<OffsetDateTime>,
}

impl LtvOrchestrator {
    /// Orchestrator without any network client
    pub fn new(pki: Arc<dyn PkiProvider>, store: CertificateStore, config: LtvConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            pki,
            store,
            crl: None,
            ocsp: None,
            tsa: None,
            fetch_issuer: None,
            config,
            clock: None,
        })
    }

    /// Orchestrator with the HTTP clients for CRLs, OCSP, AIA issuers and the configured TSA
    #[cfg(feature = "online")]
    pub fn online(pki: Arc<dyn PkiProvider>, store: CertificateStore, config: LtvConfig) -> Result<Self> {
        use crate::chain::http_issuer_fetcher;
        use crate::revocation::{CrlClientOnline, OcspClientOnline};
        use crate::timestamp::TsaClientOnline;
        use crate::transport::HttpFetcher;

        let http = HttpFetcher::online(config.fetch_timeout(), config.retry)?;
        let tsa = match &config.tsa {
            Some(tsa) => Some(TsaClientOnline::new(tsa.clone(), Arc::clone(&pki))?),
            None => None,
        };
        let fetch_missing_issuers = config.fetch_missing_issuers;

        let mut orchestrator = Self::new(Arc::clone(&pki), store, config)?
            .with_crl_client(Arc::new(CrlClientOnline::new(http.clone(), Arc::clone(&pki))))
            .with_ocsp_client(Arc::new(OcspClientOnline::new(http.clone(), pki)));
        if let Some(tsa) = tsa {
            orchestrator = orchestrator.with_timestamp_client(Arc::new(tsa));
        }
        if fetch_missing_issuers {
            orchestrator = orchestrator.with_issuer_fetcher(http_issuer_fetcher(http));
        }
        Ok(orchestrator)
    }

    pub fn with_crl_client(mut self, client: Arc<dyn CrlClient>) -> Self {
        self.crl = Some(client);
        self
    }

    pub fn with_ocsp_client(mut self, client: Arc<dyn OcspClient>) -> Self {
        self.ocsp = Some(client);
        self
    }

    pub fn with_timestamp_client(mut self, client: Arc<dyn TimestampClient>) -> Self {
        self.tsa = Some(client);
        self
    }

    pub fn with_issuer_fetcher(mut self, fetch: IssuerFetcher) -> Self {
        self.fetch_issuer = Some(fetch);
        self
    }

    /// Pin the verification time instead of reading the clock
    pub fn with_verification_time(mut self, at: OffsetDateTime) -> Self {
        self.clock = Some(at);
        self
    }

    pub fn config(&self) -> &LtvConfig {
        &self.config
    }

    pub fn store(&self) -> &CertificateStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut CertificateStore {
        &mut self.store
    }

    fn verification_time(&self) -> OffsetDateTime {
        self.clock.unwrap_or_else(OffsetDateTime::now_utc)
    }

    /// Process a single signature
    pub async fn process(
        &mut self,
        input: &SignatureInput,
        doc: &mut dyn DocumentContainer,
    ) -> Result<ValidationOutcome> {
        self.process_all(std::slice::from_ref(input), doc)
            .await?
            .pop()
            .ok_or_else(|| Error::argument("no signature processed"))
    }

    /// Process every signature of one document and write the DSS once
    ///
    /// Fails before touching the document when any signer certificate is
    /// malformed or any signature does not verify.
    pub async fn process_all(
        &mut self,
        inputs: &[SignatureInput],
        doc: &mut dyn DocumentContainer,
    ) -> Result<Vec<ValidationOutcome>> {
        if doc.is_closing_for_final_write() {
            return Err(Error::document("document is closing for final write"));
        }

        let mut dss = DocumentSecurityStore::load(doc)?;
        let seeded = dss.seed(self.pki.as_ref(), &mut self.store);
        let prior = EvidenceIndex::from_dss(&dss, self.pki.as_ref());
        debug!(seeded, prior = prior.len(), "DSS state before pass");

        let mut passes = Vec::with_capacity(inputs.len());
        for input in inputs {
            passes.push(self.start(input, &prior).await?);
        }

        self.timestamp_all(&mut passes).await;

        for pass in passes.iter_mut() {
            pass.enter(ProcessState::EvidenceCollecting);
        }
        let mut round = 0;
        loop {
            self.collect_round(&mut passes).await;
            round += 1;
            let mut pending = 0;
            for pass in passes.iter_mut() {
                pending += self.derive_responder_chains(pass).await;
            }
            if pending == 0 {
                break;
            }
            if round >= self.config.max_chain_length {
                warn!(round, pending, "responder chain depth limit reached");
                break;
            }
        }

        let mut changed = false;
        let mut outcomes = Vec::with_capacity(passes.len());
        for mut pass in passes {
            let outcome = self.finish(&mut pass, &mut dss);
            changed |= outcome.merge.is_some_and(|m| m.added() > 0 || m.vri_created || m.vri_updated);
            outcomes.push(outcome);
        }

        if changed {
            dss.write(doc)?;
        }
        Ok(outcomes)
    }

    /// Parse and check the signer, then build its chain
    async fn start<'a>(&mut self, input: &'a SignatureInput, prior: &EvidenceIndex) -> Result<Pass<'a>> {
        let span = info_span!("ltv.process", signature = %input.id);
        span.in_scope(|| info!(state = %ProcessState::ChainBuilding, "ltv state"));

        let leaf = match self.check_signer(input) {
            Ok(leaf) => leaf,
            Err(e) => {
                span.in_scope(|| error!(state = %ProcessState::Failed, error = %e, "ltv state"));
                return Err(e);
            }
        };

        for der in &input.certificates {
            match self.pki.parse_certificate(der) {
                Ok(cert) => {
                    self.store.add(cert);
                }
                Err(e) => span.in_scope(|| warn!(error = %e, "unusable certificate shipped with the signature")),
            }
        }

        let signer = self.build_chain(Arc::new(leaf), CertificateRole::Signing).await;
        span.in_scope(|| {
            info!(length = signer.len(), status = ?signer.status(), trusted = signer.is_trusted(), "signer chain built")
        });

        let verification_time = self.verification_time();
        let mut pass = Pass {
            input,
            span,
            states: vec![ProcessState::ChainBuilding],
            context: ValidationContext::new(input.signing_time.unwrap_or(verification_time), verification_time)
                .with_freshness(self.config.present_freshness()),
            signer,
            signer_bundle: None,
            auxiliary: Vec::new(),
            pending: Vec::new(),
            processed: HashSet::new(),
            known: prior.clone(),
            timestamp: None,
            tsa_subject: None,
            notes: Vec::new(),
        };
        let signer = pass.signer.clone();
        pass.claim(&signer);
        if signer.is_partial() {
            pass.note(format!("signer chain is partial at {}", signer.last().issuer()));
        }
        Ok(pass)
    }

    fn check_signer(&self, input: &SignatureInput) -> Result<Certificate> {
        let leaf = self.pki.parse_certificate(&input.leaf)?;
        if let Some(payload) = &input.signed_content {
            if !self.pki.verify_signature(&leaf, payload) {
                return Err(Error::trust(format!(
                    "signature {} does not verify with the key of {}",
                    input.id,
                    leaf.subject()
                )));
            }
        }
        Ok(leaf)
    }

    async fn build_chain(&mut self, leaf: Arc<Certificate>, role: CertificateRole) -> Chain {
        let mut builder = ChainBuilder::new(self.pki.as_ref()).with_max_length(self.config.max_chain_length);
        if self.config.fetch_missing_issuers {
            if let Some(fetch) = &self.fetch_issuer {
                builder = builder.with_issuer_fetcher(Arc::clone(fetch));
            }
        }
        builder.build(leaf, role, &mut self.store).await
    }

    /// Request signature timestamps and queue the TSA chains
    async fn timestamp_all(&mut self, passes: &mut [Pass<'_>]) {
        let Some(tsa) = self.tsa.clone() else {
            return;
        };
        let hash_algorithm = self.config.hash_algorithm;
        let imprints: Vec<Vec<u8>> = passes
            .iter()
            .map(|p| signature_imprint(&p.input.signature_value, hash_algorithm))
            .collect();
        let tokens: Vec<_> = stream::iter(imprints.iter())
            .map(|imprint| tsa.timestamp(imprint, hash_algorithm))
            .buffered(self.config.concurrency_limit)
            .collect()
            .await;

        for (pass, token) in passes.iter_mut().zip(tokens) {
            let token = match token {
                Ok(token) => token,
                Err(e) => {
                    pass.note(format!("timestamp unavailable: {}", e));
                    continue;
                }
            };
            let signer = match token_signer(self.pki.as_ref(), &token) {
                Ok(signer) => signer,
                Err(e) => {
                    pass.note(format!("timestamp signer unresolved: {}", e));
                    continue;
                }
            };
            for der in &token.certificates {
                if let Ok(cert) = self.pki.parse_certificate(der) {
                    self.store.add(cert);
                }
            }

            if pass.input.signing_time.is_none() {
                pass.context.signing_time = token.gen_time;
            }
            pass.tsa_subject = Some(signer.subject().to_string());
            if !pass.processed.contains(&signer.fingerprint()) {
                let chain = self.build_chain(Arc::new(signer), CertificateRole::Timestamping).await;
                pass.claim(&chain);
                pass.pending.push(chain);
            }
            pass.span.in_scope(|| info!(gen_time = %token.gen_time, "signature timestamp attached"));
            pass.timestamp = Some(token);
        }
    }

    /// Collect evidence for every uncollected chain of every pass
    async fn collect_round(&self, passes: &mut [Pass<'_>]) {
        let contexts = self.config.contexts;
        let delegates: Vec<Arc<Certificate>> = self
            .store
            .iter()
            .filter(|cert| !cert.is_self_signed())
            .cloned()
            .collect();
        let delegates = &delegates;
        stream::iter(passes.iter_mut())
            .map(|pass| async move {
                let collector = self.collector(pass.context).with_delegates(delegates.clone());
                let mut chains: Vec<Chain> = std::mem::take(&mut pass.pending);
                let with_signer = pass.signer_bundle.is_none();
                if with_signer {
                    chains.insert(0, pass.signer.clone());
                }
                let refs: Vec<&Chain> = chains.iter().collect();
                let bundles = collector.collect_all(&refs, contexts, &pass.known).await;

                for bundle in &bundles {
                    for evidence in bundle.evidence() {
                        pass.known.record(evidence.clone());
                    }
                }
                let mut collected = chains.into_iter().zip(bundles);
                if with_signer {
                    pass.signer_bundle = collected.next().map(|(_, bundle)| bundle);
                }
                pass.auxiliary.extend(collected);
            })
            .buffer_unordered(self.config.concurrency_limit)
            .collect::<Vec<()>>()
            .await;
    }

    fn collector(&self, context: ValidationContext) -> EvidenceCollector {
        let mut collector = EvidenceCollector::new(context, &self.config);
        if let Some(crl) = &self.crl {
            collector = collector.with_crl_client(Arc::clone(crl));
        }
        if let Some(ocsp) = &self.ocsp {
            collector = collector.with_ocsp_client(Arc::clone(ocsp));
        }
        collector
    }

    /// Queue chains for evidence signers not yet seen in the pass
    async fn derive_responder_chains(&mut self, pass: &mut Pass<'_>) -> usize {
        let mut signers: Vec<(Arc<Certificate>, CertificateRole)> = Vec::new();
        let bundles = pass
            .signer_bundle
            .iter()
            .chain(pass.auxiliary.iter().map(|(_, bundle)| bundle));
        for evidence in bundles.flat_map(|b| b.evidence()) {
            for der in &evidence.record().embedded_certificates {
                if let Ok(cert) = self.pki.parse_certificate(der) {
                    self.store.add(cert);
                }
            }
            let Some(signer) = evidence.signer() else {
                continue;
            };
            if pass.processed.contains(&signer.fingerprint())
                || signers.iter().any(|(s, _)| s.fingerprint() == signer.fingerprint())
            {
                continue;
            }
            let role = match evidence.kind() {
                EvidenceKind::Crl => CertificateRole::CrlIssuer,
                EvidenceKind::Ocsp => CertificateRole::OcspResponder,
            };
            signers.push((Arc::clone(signer), role));
        }

        let queued = signers.len();
        for (signer, role) in signers {
            let chain = self.build_chain(signer, role).await;
            pass.span.in_scope(|| {
                debug!(role = %role, subject = %chain.leaf().subject(), length = chain.len(), "responder chain built")
            });
            pass.claim(&chain);
            pass.pending.push(chain);
        }
        queued
    }

    /// Decide the outcome and merge into the DSS unless the signature is invalid
    fn finish(&self, pass: &mut Pass<'_>, dss: &mut DocumentSecurityStore) -> ValidationOutcome {
        let signer_bundle = pass.signer_bundle.take().unwrap_or_default();
        let signer = Assessed {
            chain: &pass.signer,
            bundle: &signer_bundle,
        };
        let auxiliary: Vec<Assessed<'_>> = pass
            .auxiliary
            .iter()
            .map(|(chain, bundle)| Assessed { chain, bundle })
            .collect();
        let status = decide(signer, &auxiliary);

        let merge = if status == OutcomeStatus::Invalid {
            pass.span.in_scope(|| warn!("signature invalid, DSS left untouched"));
            None
        } else {
            pass.states.push(ProcessState::DssMerging);
            pass.span.in_scope(|| info!(state = %ProcessState::DssMerging, "ltv state"));
            let mut parts = vec![signer];
            parts.extend(auxiliary.iter().copied());
            Some(dss.merge_pass(
                &pass.input.id,
                &parts,
                pass.timestamp.as_ref(),
                Some(pass.context.verification_time),
            ))
        };

        let certificates = signer_bundle
            .entries()
            .iter()
            .map(|e| CertificateReport::from_evidence(e, ChainKind::Signer))
            .chain(pass.auxiliary.iter().flat_map(|(_, bundle)| {
                bundle
                    .entries()
                    .iter()
                    .map(|e| CertificateReport::from_evidence(e, ChainKind::Auxiliary))
            }))
            .collect();

        pass.states.push(ProcessState::Done);
        pass.span.in_scope(|| info!(state = %ProcessState::Done, status = %status, "ltv state"));

        ValidationOutcome {
            signature_id: pass.input.id.clone(),
            status,
            chain_status: pass.signer.status(),
            chain_trusted: pass.signer.is_trusted(),
            certificates,
            timestamp: pass.timestamp.as_ref().map(|token| TimestampSummary {
                fingerprint: token.fingerprint(),
                gen_time: token.gen_time,
                authority: pass.tsa_subject.clone(),
            }),
            notes: std::mem::take(&mut pass.notes),
            states: pass.states.clone(),
            merge,
        }
    }
}
