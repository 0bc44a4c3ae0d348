//! End-to-end LTV passes against a scripted network and an in-memory document

mod common;

use bytes::Bytes;
use common::*;
use pdf_ltv::chain::{http_issuer_fetcher, ChainBuilder, ChainStatus};
use pdf_ltv::context::{CertificateRole, TimeBasedContexts};
use pdf_ltv::outcome::{
    CertificateSubStatus, ChainKind, OutcomeStatus, ProcessState, UndeterminedReason,
};
use pdf_ltv::pki::{Fingerprint, HashAlgorithm, PkiProvider};
use pdf_ltv::revocation::{CrlClientOnline, OcspClientOnline};
use pdf_ltv::timestamp::{signature_imprint, TsaClientOnline};
use pdf_ltv::{
    CertificateStore, DocumentSecurityStore, Error, LtvConfig, LtvOrchestrator, MemoryDocument,
    SignatureInput, SourceSelection, TransportError, TsaConfig,
};
use std::sync::Arc;
use time::Duration;

struct World {
    pki: Arc<dyn PkiProvider>,
    net: Arc<Network>,
    root: Bytes,
    ca: Bytes,
}

impl World {
    fn new() -> Self {
        init_tracing();
        Self {
            pki: JsonPki::shared(),
            net: Network::new(),
            root: cert("Root", "Root"),
            ca: cert("CA", "Root"),
        }
    }

    fn store(&self, with_ca: bool) -> CertificateStore {
        let mut store = CertificateStore::new();
        let root = self.pki.parse_certificate(&self.root).unwrap();
        store.add_trusted(root);
        if with_ca {
            store.add(self.pki.parse_certificate(&self.ca).unwrap());
        }
        store
    }

    fn orchestrator(&self, store: CertificateStore, config: LtvConfig) -> LtvOrchestrator {
        LtvOrchestrator::new(Arc::clone(&self.pki), store, config)
            .unwrap()
            .with_verification_time(NOW)
            .with_crl_client(Arc::new(CrlClientOnline::new(self.net.fetcher(), Arc::clone(&self.pki))))
            .with_ocsp_client(Arc::new(OcspClientOnline::new(self.net.fetcher(), Arc::clone(&self.pki))))
    }

    fn serve_crls(&self, revoked_by_ca: &[&str]) -> (Bytes, Bytes) {
        let ca_crl = crl("CA", NOW - Duration::hours(1), revoked_by_ca);
        let root_crl = crl("Root", NOW - Duration::hours(1), &[]);
        self.net.serve(crl_url("CA"), ca_crl.clone());
        self.net.serve(crl_url("Root"), root_crl.clone());
        (ca_crl, root_crl)
    }
}

fn signature(id: &str, signer: &str) -> (SignatureInput, Bytes) {
    let leaf = cert(signer, "CA");
    let input = SignatureInput::new(id, leaf.clone(), format!("value-of-{id}"))
        .with_signed_content(signed_by(signer))
        .with_signing_time(SIGNED_AT);
    (input, leaf)
}

fn fingerprints(items: &[&Bytes]) -> std::collections::BTreeSet<Fingerprint> {
    items.iter().map(|b| Fingerprint::of(b)).collect()
}

#[test]
fn test_chain_links_hold_for_every_built_chain() {
    let world = World::new();
    let mut store = world.store(true);
    let builder = ChainBuilder::new(world.pki.as_ref());

    for subject in ["Alice", "Bob", "CA", "Root"] {
        let der = if subject == "CA" {
            world.ca.clone()
        } else if subject == "Root" {
            world.root.clone()
        } else {
            cert(subject, "CA")
        };
        let leaf = Arc::new(world.pki.parse_certificate(&der).unwrap());
        let chain = builder.build_offline(leaf, CertificateRole::Signing, &mut store);
        assert!(chain.links_hold(), "{subject}");
        assert_eq!(chain.status(), ChainStatus::Complete);
        assert_eq!(chain.last().subject().display(), "Root");
    }
}

#[test]
fn test_issuer_cycle_stops_chain() {
    let world = World::new();
    let mut store = CertificateStore::new();
    let a = world.pki.parse_certificate(&cert("A", "B")).unwrap();
    let b = world.pki.parse_certificate(&cert("B", "A")).unwrap();
    let a = store.add(a);
    store.add(b);

    let chain = ChainBuilder::new(world.pki.as_ref()).build_offline(a, CertificateRole::Signing, &mut store);
    assert_eq!(chain.status(), ChainStatus::CompleteWithCycle);
    assert_eq!(chain.len(), 2);
    assert!(!chain.is_trusted());
}

#[test]
fn test_complement_of_all_is_rejected() {
    let err = TimeBasedContexts::complement_of(TimeBasedContexts::all()).unwrap_err();
    assert!(matches!(err, Error::Argument(_)));
}

#[tokio::test]
async fn test_valid_signature_gets_ltv_material() {
    let world = World::new();
    let (ca_crl, root_crl) = world.serve_crls(&[]);
    let (input, leaf) = signature("Sig1", "Alice");
    let mut doc = MemoryDocument::new();

    let mut ltv = world.orchestrator(world.store(true), LtvConfig::default());
    let outcome = ltv.process(&input, &mut doc).await.unwrap();

    assert_eq!(outcome.status, OutcomeStatus::Valid);
    assert_eq!(outcome.chain_status, ChainStatus::Complete);
    assert!(outcome.chain_trusted);
    assert_eq!(outcome.states.last(), Some(&ProcessState::Done));
    assert!(outcome.states.contains(&ProcessState::DssMerging));

    let root = outcome.report_for(&Fingerprint::of(&world.root)).unwrap();
    assert_eq!(root.status, CertificateSubStatus::TrustAnchor);
    let alice = outcome.report_for(&Fingerprint::of(&leaf)).unwrap();
    assert_eq!(alice.status, CertificateSubStatus::Good);
    assert_eq!(alice.evidence, vec![Fingerprint::of(&ca_crl)]);

    let dss = DocumentSecurityStore::load(&doc).unwrap();
    insta::assert_snapshot!(dss.summary(), @"certs=3 crls=2 ocsps=0 vri=1");

    let vri = dss.vri("Sig1").unwrap();
    assert_eq!(vri.certs, fingerprints(&[&leaf, &world.ca, &world.root]));
    assert_eq!(vri.crls, fingerprints(&[&ca_crl, &root_crl]));
    assert!(vri.ocsps.is_empty());
    assert_eq!(vri.updated, Some(NOW));

    let json = outcome.to_json().unwrap();
    assert!(json.contains("\"status\": \"VALID\""));
}

#[tokio::test]
async fn test_ocsp_covers_crl_timeout() {
    let world = World::new();
    world.net.serve(crl_url("CA"), crl("CA", NOW - Duration::hours(1), &[]));
    world.net.fail(
        crl_url("Root"),
        TransportError::Timeout {
            url: crl_url("Root"),
            timeout: std::time::Duration::from_secs(5),
        },
    );
    let response = ocsp("Root", NOW - Duration::hours(1), &[("CA", Status::Good)], &[]);
    world.net.serve(ocsp_url("Root"), response.clone());

    let (input, _) = signature("Sig1", "Alice");
    let mut doc = MemoryDocument::new();
    let mut ltv = world.orchestrator(world.store(true), LtvConfig::default());
    let outcome = ltv.process(&input, &mut doc).await.unwrap();

    assert_eq!(outcome.status, OutcomeStatus::Valid);
    let ca = outcome.report_for(&Fingerprint::of(&world.ca)).unwrap();
    assert_eq!(ca.status, CertificateSubStatus::Good);
    assert_eq!(ca.evidence, vec![Fingerprint::of(&response)]);

    let dss = DocumentSecurityStore::load(&doc).unwrap();
    assert_eq!(dss.crls().len(), 1);
    assert_eq!(dss.ocsps().len(), 1);
    assert!(dss.ocsps().contains(&Fingerprint::of(&response)));
}

#[tokio::test]
async fn test_missing_intermediate_is_indeterminate() {
    let world = World::new();
    world.serve_crls(&[]);
    let (input, leaf) = signature("Sig1", "Alice");
    let mut doc = MemoryDocument::new();

    let mut ltv = world.orchestrator(world.store(false), LtvConfig::default());
    let outcome = ltv.process(&input, &mut doc).await.unwrap();

    assert_eq!(outcome.status, OutcomeStatus::Indeterminate);
    assert_eq!(outcome.chain_status, ChainStatus::Partial);
    assert!(!outcome.chain_trusted);
    let alice = outcome.report_for(&Fingerprint::of(&leaf)).unwrap();
    assert!(matches!(
        &alice.status,
        CertificateSubStatus::Undetermined { reasons } if reasons.contains(&UndeterminedReason::IssuerUnresolved)
    ));
}

#[tokio::test]
async fn test_missing_intermediate_fetched_from_aia() {
    let world = World::new();
    world.serve_crls(&[]);
    world.net.serve(aia_url("CA"), world.ca.clone());
    let (input, _) = signature("Sig1", "Alice");
    let mut doc = MemoryDocument::new();

    let mut ltv = world
        .orchestrator(world.store(false), LtvConfig::default())
        .with_issuer_fetcher(http_issuer_fetcher(world.net.fetcher()));
    let outcome = ltv.process(&input, &mut doc).await.unwrap();

    assert_eq!(outcome.status, OutcomeStatus::Valid);
    assert_eq!(world.net.hits(&aia_url("CA")), 1);
    assert!(ltv.store().contains(&Fingerprint::of(&world.ca)));

    let dss = DocumentSecurityStore::load(&doc).unwrap();
    assert!(dss.certificates().contains(&Fingerprint::of(&world.ca)));
}

#[tokio::test]
async fn test_crl_from_the_future_is_not_accepted() {
    let world = World::new();
    let future = crl("CA", NOW + Duration::days(1), &[]);
    world.net.serve(crl_url("CA"), future.clone());
    world.net.serve(crl_url("Root"), crl("Root", NOW - Duration::hours(1), &[]));
    let (input, leaf) = signature("Sig1", "Alice");
    let mut doc = MemoryDocument::new();

    let mut ltv = world.orchestrator(world.store(true), LtvConfig::default());
    let outcome = ltv.process(&input, &mut doc).await.unwrap();

    assert_eq!(outcome.status, OutcomeStatus::Indeterminate);
    let alice = outcome.report_for(&Fingerprint::of(&leaf)).unwrap();
    let CertificateSubStatus::Undetermined { reasons } = &alice.status else {
        panic!("expected undetermined, got {:?}", alice.status);
    };
    assert!(reasons
        .iter()
        .any(|r| matches!(r, UndeterminedReason::Rejected { .. })));

    let dss = DocumentSecurityStore::load(&doc).unwrap();
    assert!(!dss.crls().contains(&Fingerprint::of(&future)));
    assert_eq!(dss.crls().len(), 1);
}

#[tokio::test]
async fn test_revoked_signer_leaves_document_untouched() {
    let world = World::new();
    world.serve_crls(&["Alice"]);
    let (input, _) = signature("Sig1", "Alice");
    let mut doc = MemoryDocument::new();

    let mut ltv = world.orchestrator(world.store(true), LtvConfig::default());
    let outcome = ltv.process(&input, &mut doc).await.unwrap();

    assert_eq!(outcome.status, OutcomeStatus::Invalid);
    assert!(outcome.merge.is_none());
    assert!(!outcome.states.contains(&ProcessState::DssMerging));
    assert_eq!(doc.stream_count(), 0);
}

#[tokio::test]
async fn test_reprocessing_is_idempotent() {
    let world = World::new();
    world.serve_crls(&[]);
    let (input, _) = signature("Sig1", "Alice");
    let mut doc = MemoryDocument::new();
    let config = LtvConfig {
        sources: SourceSelection::CrlOnly,
        ..LtvConfig::default()
    };

    let mut ltv = world.orchestrator(world.store(true), config);
    let first = ltv.process(&input, &mut doc).await.unwrap();
    let summary = DocumentSecurityStore::load(&doc).unwrap().summary();
    let streams = doc.stream_count();
    let hits = world.net.total_hits();

    let second = ltv.process(&input, &mut doc).await.unwrap();
    assert_eq!(first.status, second.status);
    assert_eq!(DocumentSecurityStore::load(&doc).unwrap().summary(), summary);
    assert_eq!(doc.stream_count(), streams);
    assert_eq!(world.net.total_hits(), hits, "DSS evidence should be reused");
    assert!(second.certificates.iter().any(|c| c.reused > 0));
}

#[tokio::test]
async fn test_two_signatures_share_intermediate() {
    let world = World::new();
    world.serve_crls(&[]);
    let (alice, alice_leaf) = signature("Sig1", "Alice");
    let (bob, bob_leaf) = signature("Sig2", "Bob");
    let mut doc = MemoryDocument::new();

    let mut ltv = world.orchestrator(world.store(true), LtvConfig::default());
    let outcomes = ltv.process_all(&[alice, bob], &mut doc).await.unwrap();
    assert!(outcomes.iter().all(|o| o.status == OutcomeStatus::Valid));

    let dss = DocumentSecurityStore::load(&doc).unwrap();
    assert_eq!(dss.certificates().len(), 4);
    assert_eq!(dss.crls().len(), 2);

    let ca = Fingerprint::of(&world.ca);
    let sig1 = dss.vri("Sig1").unwrap();
    let sig2 = dss.vri("Sig2").unwrap();
    assert!(sig1.certs.contains(&ca) && sig2.certs.contains(&ca));
    assert!(sig1.certs.contains(&Fingerprint::of(&alice_leaf)));
    assert!(!sig1.certs.contains(&Fingerprint::of(&bob_leaf)));
    assert!(sig2.certs.contains(&Fingerprint::of(&bob_leaf)));
}

#[tokio::test]
async fn test_sequential_signing_reuses_earlier_evidence() {
    let world = World::new();
    let (_, root_crl) = world.serve_crls(&[]);
    let (alice, _) = signature("Sig1", "Alice");
    let (bob, _) = signature("Sig2", "Bob");
    let mut doc = MemoryDocument::new();
    let config = LtvConfig {
        sources: SourceSelection::CrlOnly,
        ..LtvConfig::default()
    };

    let mut ltv = world.orchestrator(world.store(true), config);
    ltv.process(&alice, &mut doc).await.unwrap();
    assert_eq!(world.net.hits(&crl_url("Root")), 1);

    let outcome = ltv.process(&bob, &mut doc).await.unwrap();
    assert_eq!(outcome.status, OutcomeStatus::Valid);
    assert_eq!(world.net.hits(&crl_url("Root")), 1);

    let dss = DocumentSecurityStore::load(&doc).unwrap();
    insta::assert_snapshot!(dss.summary(), @"certs=4 crls=2 ocsps=0 vri=2");
    let sig2 = dss.vri("Sig2").unwrap();
    assert!(sig2.certs.contains(&Fingerprint::of(&world.ca)));
    assert!(sig2.crls.contains(&Fingerprint::of(&root_crl)));
}

#[tokio::test]
async fn test_signature_timestamp_is_embedded() {
    let world = World::new();
    world.serve_crls(&[]);
    let tsa_cert = cert("TSA", "Root");
    let (input, _) = signature("Sig1", "Alice");
    let imprint = signature_imprint(&input.signature_value, HashAlgorithm::Sha256);
    let response = timestamp_response("TSA", SIGNED_AT, &imprint, &[&tsa_cert]);
    world.net.serve("http://tsa.test", response);

    let tsa = TsaClientOnline::with_fetcher(
        TsaConfig::new("http://tsa.test"),
        world.net.fetcher(),
        Arc::clone(&world.pki),
    );
    let mut doc = MemoryDocument::new();
    let mut ltv = world
        .orchestrator(world.store(true), LtvConfig::default())
        .with_timestamp_client(Arc::new(tsa));
    let outcome = ltv.process(&input, &mut doc).await.unwrap();

    assert_eq!(outcome.status, OutcomeStatus::Valid, "{:?}", outcome.notes);
    let timestamp = outcome.timestamp.as_ref().unwrap();
    assert_eq!(timestamp.gen_time, SIGNED_AT);
    assert_eq!(timestamp.authority.as_deref(), Some("TSA"));

    let tsa_report = outcome.report_for(&Fingerprint::of(&tsa_cert)).unwrap();
    assert_eq!(tsa_report.role, CertificateRole::Timestamping);
    assert_eq!(tsa_report.status, CertificateSubStatus::Good);

    let dss = DocumentSecurityStore::load(&doc).unwrap();
    assert_eq!(dss.certificates().len(), 4);
    let vri = dss.vri("Sig1").unwrap();
    assert!(vri.timestamp.is_some());
    assert!(vri.certs.contains(&Fingerprint::of(&tsa_cert)));
}

#[tokio::test]
async fn test_crl_signed_by_dedicated_crl_signer() {
    let world = World::new();
    let crl_signer = cert("CRL Signer", "CA");
    let ca_crl = crl_signed_by("CA", "CRL Signer", NOW - Duration::hours(1), &[]);
    world.net.serve(crl_url("CA"), ca_crl.clone());
    world.net.serve(crl_url("Root"), crl("Root", NOW - Duration::hours(1), &[]));
    let (input, leaf) = signature("Sig1", "Alice");
    let mut doc = MemoryDocument::new();

    let mut store = world.store(true);
    store.add(world.pki.parse_certificate(&crl_signer).unwrap());
    let config = LtvConfig {
        sources: SourceSelection::CrlOnly,
        ..LtvConfig::default()
    };
    let mut ltv = world.orchestrator(store, config);
    let outcome = ltv.process(&input, &mut doc).await.unwrap();

    assert_eq!(outcome.status, OutcomeStatus::Valid, "{:?}", outcome.certificates);
    let alice = outcome.report_for(&Fingerprint::of(&leaf)).unwrap();
    assert_eq!(alice.evidence, vec![Fingerprint::of(&ca_crl)]);
    let signer = outcome.report_for(&Fingerprint::of(&crl_signer)).unwrap();
    assert_eq!(signer.role, CertificateRole::CrlIssuer);
    assert_eq!(signer.chain, ChainKind::Auxiliary);
    assert_eq!(signer.status, CertificateSubStatus::Good);

    let dss = DocumentSecurityStore::load(&doc).unwrap();
    insta::assert_snapshot!(dss.summary(), @"certs=4 crls=2 ocsps=0 vri=1");
    let vri = dss.vri("Sig1").unwrap();
    assert!(dss.certificates().contains(&Fingerprint::of(&crl_signer)));
    assert!(vri.certs.contains(&Fingerprint::of(&crl_signer)));
    assert!(vri.crls.contains(&Fingerprint::of(&ca_crl)));
}

#[tokio::test]
async fn test_same_serial_under_another_ca_is_not_reused() {
    let world = World::new();
    let ca2 = cert("CA2", "Root");
    let earlier = NOW - Duration::hours(1);
    world.net.serve(ocsp_url("CA"), ocsp("CA", earlier, &[("Alice", Status::Good)], &[]));
    world.net.serve(
        ocsp_url("Root"),
        ocsp("Root", earlier, &[("CA", Status::Good), ("CA2", Status::Good)], &[]),
    );
    world.net.fail(
        ocsp_url("CA2"),
        TransportError::Status {
            url: ocsp_url("CA2"),
            status: 503,
        },
    );

    // both leaves carry the serial "Alice"
    let first = SignatureInput::new("Sig1", cert("Alice", "CA"), "value-of-Sig1")
        .with_signed_content(signed_by("Alice"))
        .with_signing_time(SIGNED_AT);
    let second = SignatureInput::new("Sig2", cert("Alice", "CA2"), "value-of-Sig2")
        .with_signed_content(signed_by("Alice"))
        .with_signing_time(SIGNED_AT);

    let mut store = world.store(true);
    store.add(world.pki.parse_certificate(&ca2).unwrap());
    let config = LtvConfig {
        sources: SourceSelection::OcspOnly,
        ..LtvConfig::default()
    };
    let mut ltv = world.orchestrator(store, config);
    let mut doc = MemoryDocument::new();

    assert_eq!(ltv.process(&first, &mut doc).await.unwrap().status, OutcomeStatus::Valid);
    assert_eq!(
        ltv.process(&second, &mut doc).await.unwrap().status,
        OutcomeStatus::Indeterminate
    );

    let revoked = ocsp(
        "CA2",
        earlier,
        &[("Alice", Status::Revoked { at: NOW - Duration::days(2) })],
        &[],
    );
    world.net.serve(ocsp_url("CA2"), revoked);
    let outcome = ltv.process(&second, &mut doc).await.unwrap();
    assert_eq!(outcome.status, OutcomeStatus::Invalid);
    assert_eq!(world.net.hits(&ocsp_url("CA2")), 2);
}

#[tokio::test]
async fn test_missing_certificates_end_up_in_dss() {
    let world = World::new();
    let earlier = NOW - Duration::hours(1);
    let crl_signer = cert("CRL Signer", "CA");
    let responder = cert_with("OCSP Responder", "CA", |template| template.ocsp_no_check = true);
    let tsa_cert = cert("TSA", "CA");

    world.net.serve(aia_url("CA"), world.ca.clone());
    let ca_crl = crl_signed_by("CA", "CRL Signer", earlier, &[]);
    let root_crl = crl("Root", earlier, &[]);
    world.net.serve(crl_url("CA"), ca_crl.clone());
    world.net.serve(crl_url("Root"), root_crl.clone());
    let ca_ocsp = ocsp(
        "OCSP Responder",
        earlier,
        &[
            ("Alice", Status::Good),
            ("TSA", Status::Good),
            ("CRL Signer", Status::Good),
        ],
        &[&responder],
    );
    let root_ocsp = ocsp("Root", earlier, &[("CA", Status::Good)], &[]);
    world.net.serve(ocsp_url("CA"), ca_ocsp.clone());
    world.net.serve(ocsp_url("Root"), root_ocsp.clone());

    let (input, leaf) = signature("Sig1", "Alice");
    let imprint = signature_imprint(&input.signature_value, HashAlgorithm::Sha256);
    world.net.serve(
        "http://tsa.test",
        timestamp_response("TSA", SIGNED_AT, &imprint, &[&tsa_cert]),
    );
    let tsa = TsaClientOnline::with_fetcher(
        TsaConfig::new("http://tsa.test"),
        world.net.fetcher(),
        Arc::clone(&world.pki),
    );

    // only the root and the CRL signer are known up front
    let mut store = world.store(false);
    store.add(world.pki.parse_certificate(&crl_signer).unwrap());
    let config = LtvConfig {
        sources: SourceSelection::Both,
        ..LtvConfig::default()
    };
    let mut ltv = world
        .orchestrator(store, config)
        .with_issuer_fetcher(http_issuer_fetcher(world.net.fetcher()))
        .with_timestamp_client(Arc::new(tsa));
    let mut doc = MemoryDocument::new();
    let outcome = ltv.process(&input, &mut doc).await.unwrap();

    assert_eq!(outcome.status, OutcomeStatus::Valid, "{:?}", outcome.certificates);
    let role_of = |der: &Bytes| outcome.report_for(&Fingerprint::of(der)).map(|r| r.role);
    assert_eq!(role_of(&responder), Some(CertificateRole::OcspResponder));
    assert_eq!(role_of(&crl_signer), Some(CertificateRole::CrlIssuer));
    assert_eq!(role_of(&tsa_cert), Some(CertificateRole::Timestamping));

    let dss = DocumentSecurityStore::load(&doc).unwrap();
    insta::assert_snapshot!(dss.summary(), @"certs=6 crls=2 ocsps=2 vri=1");
    let vri = dss.vri("Sig1").unwrap();
    assert_eq!(
        vri.certs,
        fingerprints(&[&leaf, &world.ca, &world.root, &crl_signer, &responder, &tsa_cert])
    );
    assert_eq!(vri.crls, fingerprints(&[&ca_crl, &root_crl]));
    assert_eq!(vri.ocsps, fingerprints(&[&ca_ocsp, &root_ocsp]));
    assert!(vri.timestamp.is_some());
}

#[tokio::test]
async fn test_outcome_json_reports_undetermined_causes() {
    let world = World::new();
    world.net.serve(crl_url("CA"), crl("CA", NOW + Duration::days(1), &[]));
    world.net.serve(crl_url("Root"), crl("Root", NOW - Duration::hours(1), &[]));
    let (input, _) = signature("Sig1", "Alice");
    let mut doc = MemoryDocument::new();
    let config = LtvConfig {
        sources: SourceSelection::CrlOnly,
        ..LtvConfig::default()
    };

    let mut ltv = world.orchestrator(world.store(true), config);
    let outcome = ltv.process(&input, &mut doc).await.unwrap();
    assert_eq!(outcome.status, OutcomeStatus::Indeterminate);

    let json: serde_json::Value = serde_json::from_str(&outcome.to_json().unwrap()).unwrap();
    assert_eq!(json["status"], "INDETERMINATE");
    let reasons = &json["certificates"][0]["status"]["reasons"];
    assert_eq!(reasons[0]["cause"], "rejected");
    assert_eq!(reasons[0]["kind"], "crl");
    assert_eq!(reasons[0]["reason"], "from_future");
}

#[test]
fn test_config_round_trips_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ltv.json");
    let config = LtvConfig {
        concurrency_limit: 4,
        sources: SourceSelection::OcspThenCrl,
        ..LtvConfig::default()
    }
    .with_tsa(TsaConfig::freetsa());

    config.save(&path).unwrap();
    assert_eq!(LtvConfig::load(&path).unwrap(), config);
}

#[test]
fn test_corrupt_config_falls_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ltv.json");
    std::fs::write(&path, "{ not json").unwrap();

    assert!(LtvConfig::load(&path).is_err());
    assert_eq!(LtvConfig::load_or_default(&path), LtvConfig::default());
    assert_eq!(LtvConfig::load_or_default(&dir.path().join("missing.json")), LtvConfig::default());
}
