//! Validation outcome
//!
//! What a caller learns about one signature: the overall status, one report
//! per certificate that was considered, and how the pass went.

use crate::chain::{Chain, ChainStatus};
use crate::collector::{CertificateEvidence, EvidenceBundle, Freshness};
use crate::context::{CertificateRole, TemporalRejection, TimeBasedContexts};
use crate::dss::MergeReport;
use crate::error::FetchError;
use crate::pki::Fingerprint;
use crate::revocation::EvidenceKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeStatus {
    Valid,
    /// Chain is fine but some certificate has no revocation evidence attached
    ValidButNotLtv,
    /// Chain incomplete or revocation status unknown
    Indeterminate,
    /// A chain certificate is revoked or the chain ends outside the trust anchors
    Invalid,
}

impl OutcomeStatus {
    pub fn is_ltv(&self) -> bool {
        *self == OutcomeStatus::Valid
    }
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeStatus::Valid => f.write_str("VALID"),
            OutcomeStatus::ValidButNotLtv => f.write_str("VALID_BUT_NOT_LTV"),
            OutcomeStatus::Indeterminate => f.write_str("INDETERMINATE"),
            OutcomeStatus::Invalid => f.write_str("INVALID"),
        }
    }
}

/// Why a certificate's revocation status could not be established
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum UndeterminedReason {
    FetchFailed { kind: EvidenceKind, error: FetchError },
    Rejected { kind: EvidenceKind, reason: TemporalRejection },
    UnknownStatus { kind: EvidenceKind },
    IssuerUnresolved,
}

impl fmt::Display for UndeterminedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UndeterminedReason::FetchFailed { kind, error } => write!(f, "{} fetch failed: {}", kind, error),
            UndeterminedReason::Rejected { kind, reason } => write!(f, "{} evidence {}", kind, reason),
            UndeterminedReason::UnknownStatus { kind } => write!(f, "{} responder does not know the certificate", kind),
            UndeterminedReason::IssuerUnresolved => f.write_str("issuer not resolved"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CertificateSubStatus {
    Good,
    Revoked {
        #[serde(with = "time::serde::rfc3339")]
        at: OffsetDateTime,
    },
    /// Checked, nothing available
    NoEvidence,
    /// Every source failed or only inadmissible evidence came back
    Undetermined { reasons: Vec<UndeterminedReason> },
    /// Skipped, revocation of an anchor is meaningless
    TrustAnchor,
    /// The role policy excludes every requested context
    NotRequired,
}

impl CertificateSubStatus {
    pub fn is_revoked(&self) -> bool {
        matches!(self, CertificateSubStatus::Revoked { .. })
    }
}

/// Which chain of the pass a certificate was examined in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainKind {
    Signer,
    /// Responder, CRL issuer or TSA chain
    Auxiliary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CertificateReport {
    pub fingerprint: Fingerprint,
    pub subject: String,
    pub role: CertificateRole,
    pub chain: ChainKind,
    pub contexts: Option<TimeBasedContexts>,
    pub status: CertificateSubStatus,
    pub evidence: Vec<Fingerprint>,
    pub reused: usize,
    pub freshness: Option<Freshness>,
}

impl CertificateReport {
    pub fn from_evidence(entry: &CertificateEvidence, chain: ChainKind) -> Self {
        Self {
            fingerprint: entry.fingerprint(),
            subject: entry.certificate.subject().to_string(),
            role: entry.role,
            chain,
            contexts: entry.contexts,
            status: entry.status.clone(),
            evidence: entry.evidence.iter().map(|e| e.fingerprint()).collect(),
            reused: entry.reused,
            freshness: entry.freshness,
        }
    }
}

/// States of one signature's pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessState {
    ChainBuilding,
    EvidenceCollecting,
    DssMerging,
    Done,
    Failed,
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProcessState::ChainBuilding => "CHAIN_BUILDING",
            ProcessState::EvidenceCollecting => "EVIDENCE_COLLECTING",
            ProcessState::DssMerging => "DSS_MERGING",
            ProcessState::Done => "DONE",
            ProcessState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimestampSummary {
    pub fingerprint: Fingerprint,
    #[serde(with = "time::serde::rfc3339")]
    pub gen_time: OffsetDateTime,
    pub authority: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationOutcome {
    pub signature_id: String,
    pub status: OutcomeStatus,
    pub chain_status: ChainStatus,
    pub chain_trusted: bool,
    pub certificates: Vec<CertificateReport>,
    pub timestamp: Option<TimestampSummary>,
    /// Failures that did not block the pass, such as an unreachable TSA
    pub notes: Vec<String>,
    pub states: Vec<ProcessState>,
    pub merge: Option<MergeReport>,
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        self.status == OutcomeStatus::Valid
    }

    pub fn report_for(&self, fingerprint: &Fingerprint) -> Option<&CertificateReport> {
        self.certificates.iter().find(|r| &r.fingerprint == fingerprint)
    }

    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// One chain of a pass together with the evidence collected for it
#[derive(Clone, Copy)]
pub struct Assessed<'a> {
    pub chain: &'a Chain,
    pub bundle: &'a EvidenceBundle,
}

/// Overall status of a signature from its signer chain and the auxiliary chains
///
/// Proof of revocation in the signer chain decides first. Trouble in an
/// auxiliary chain can only make the outcome indeterminate.
pub fn decide(signer: Assessed<'_>, auxiliary: &[Assessed<'_>]) -> OutcomeStatus {
    let statuses = |a: &Assessed<'_>| a.bundle.entries().iter().map(|e| e.status.clone()).collect::<Vec<_>>();
    let signer_statuses = statuses(&signer);

    if signer_statuses.iter().any(CertificateSubStatus::is_revoked) {
        return OutcomeStatus::Invalid;
    }
    if signer.chain.is_partial() {
        return OutcomeStatus::Indeterminate;
    }
    if !signer.chain.is_trusted() {
        return OutcomeStatus::Invalid;
    }
    if auxiliary
        .iter()
        .any(|a| a.chain.is_partial() || !a.chain.is_trusted())
    {
        return OutcomeStatus::Indeterminate;
    }

    let all: Vec<CertificateSubStatus> = signer_statuses
        .into_iter()
        .chain(auxiliary.iter().flat_map(|a| statuses(a)))
        .collect();
    if all
        .iter()
        .any(|s| s.is_revoked() || matches!(s, CertificateSubStatus::Undetermined { .. }))
    {
        return OutcomeStatus::Indeterminate;
    }
    if all.iter().any(|s| *s == CertificateSubStatus::NoEvidence) {
        return OutcomeStatus::ValidButNotLtv;
    }
    OutcomeStatus::Valid
}
