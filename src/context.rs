//! Time-domain classification of revocation checks
//!
//! A revocation check is either judged as of the signature's claimed signing
//! time ([`TimeBasedContext::Historical`]) or as of now
//! ([`TimeBasedContext::Present`]). Which of the two apply to a certificate
//! depends on the role it plays, configured through [`RolePolicy`].

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::time::Duration;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeBasedContext {
    /// As of the signing time
    Historical,
    /// As of the verification time
    Present,
}

impl TimeBasedContext {
    pub const ALL: [TimeBasedContext; 2] = [TimeBasedContext::Historical, TimeBasedContext::Present];

    fn bit(self) -> u8 {
        match self {
            TimeBasedContext::Historical => 0b01,
            TimeBasedContext::Present => 0b10,
        }
    }
}

impl fmt::Display for TimeBasedContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeBasedContext::Historical => f.write_str("HISTORICAL"),
            TimeBasedContext::Present => f.write_str("PRESENT"),
        }
    }
}

const ALL_BITS: u8 = 0b11;

/// Non-empty set of [`TimeBasedContext`] values
///
/// There is no way to build an empty set: [`TimeBasedContexts::complement_of`]
/// fails with [`Error::Argument`] instead.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeBasedContexts {
    bits: u8,
}

impl TimeBasedContexts {
    pub fn of(first: TimeBasedContext, rest: &[TimeBasedContext]) -> Self {
        let bits = rest.iter().fold(first.bit(), |acc, c| acc | c.bit());
        Self { bits }
    }

    pub fn all() -> Self {
        Self { bits: ALL_BITS }
    }

    /// Every context not in `other`
    pub fn complement_of(other: TimeBasedContexts) -> Result<Self> {
        let bits = !other.bits & ALL_BITS;
        if bits == 0 {
            return Err(Error::argument(
                "TimeBasedContexts::all has no valid complement",
            ));
        }
        Ok(Self { bits })
    }

    pub fn contains(&self, context: TimeBasedContext) -> bool {
        self.bits & context.bit() != 0
    }

    /// Contexts present in both sets, `None` when they are disjoint
    pub fn intersection(&self, other: TimeBasedContexts) -> Option<Self> {
        let bits = self.bits & other.bits;
        (bits != 0).then_some(Self { bits })
    }

    pub fn iter(&self) -> impl Iterator<Item = TimeBasedContext> + '_ {
        TimeBasedContext::ALL
            .into_iter()
            .filter(move |c| self.contains(*c))
    }

    pub fn len(&self) -> usize {
        self.bits.count_ones() as usize
    }

    /// Always false; kept for symmetry with `len`
    pub fn is_empty(&self) -> bool {
        false
    }

    fn from_list(list: &[TimeBasedContext]) -> Result<Self> {
        match list.split_first() {
            Some((first, rest)) => Ok(Self::of(*first, rest)),
            None => Err(Error::argument("TimeBasedContexts cannot be empty")),
        }
    }
}

/// Whether `policy` selects `context`
pub fn applies(context: TimeBasedContext, policy: TimeBasedContexts) -> bool {
    policy.contains(context)
}

impl fmt::Debug for TimeBasedContexts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl Serialize for TimeBasedContexts {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

impl<'de> Deserialize<'de> for TimeBasedContexts {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let list = Vec::<TimeBasedContext>::deserialize(deserializer)?;
        TimeBasedContexts::from_list(&list).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Roles
// ============================================================================

/// Part a certificate plays in the evidence graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificateRole {
    /// Signer of the document
    Signing,
    /// Intermediate or root CA of any chain
    IssuerCa,
    CrlIssuer,
    OcspResponder,
    /// Timestamp authority signer
    Timestamping,
}

impl fmt::Display for CertificateRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CertificateRole::Signing => "signing",
            CertificateRole::IssuerCa => "issuer-ca",
            CertificateRole::CrlIssuer => "crl-issuer",
            CertificateRole::OcspResponder => "ocsp-responder",
            CertificateRole::Timestamping => "timestamping",
        };
        f.write_str(name)
    }
}

/// Per-role revocation-check contexts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RolePolicy {
    pub signing: TimeBasedContexts,
    pub issuer_ca: TimeBasedContexts,
    pub crl_issuer: TimeBasedContexts,
    pub ocsp_responder: TimeBasedContexts,
    pub timestamping: TimeBasedContexts,
}

impl Default for RolePolicy {
    fn default() -> Self {
        Self {
            signing: TimeBasedContexts::all(),
            issuer_ca: TimeBasedContexts::all(),
            crl_issuer: TimeBasedContexts::of(TimeBasedContext::Present, &[]),
            ocsp_responder: TimeBasedContexts::of(TimeBasedContext::Present, &[]),
            timestamping: TimeBasedContexts::of(TimeBasedContext::Historical, &[]),
        }
    }
}

impl RolePolicy {
    pub fn for_role(&self, role: CertificateRole) -> TimeBasedContexts {
        match role {
            CertificateRole::Signing => self.signing,
            CertificateRole::IssuerCa => self.issuer_ca,
            CertificateRole::CrlIssuer => self.crl_issuer,
            CertificateRole::OcspResponder => self.ocsp_responder,
            CertificateRole::Timestamping => self.timestamping,
        }
    }

    /// Same policy with `role` remapped
    pub fn with(mut self, role: CertificateRole, contexts: TimeBasedContexts) -> Self {
        let slot = match role {
            CertificateRole::Signing => &mut self.signing,
            CertificateRole::IssuerCa => &mut self.issuer_ca,
            CertificateRole::CrlIssuer => &mut self.crl_issuer,
            CertificateRole::OcspResponder => &mut self.ocsp_responder,
            CertificateRole::Timestamping => &mut self.timestamping,
        };
        *slot = contexts;
        self
    }

    /// Contexts to check for `role` given the contexts requested for the pass
    pub fn applicable(
        &self,
        role: CertificateRole,
        requested: TimeBasedContexts,
    ) -> Option<TimeBasedContexts> {
        self.for_role(role).intersection(requested)
    }
}

// ============================================================================
// Validation Context
// ============================================================================

/// Why a piece of evidence is not admissible
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemporalRejection {
    /// Generated before the covered certificate's notBefore
    BeforeValidity,
    /// Generated after the verification time
    FromFuture,
}

impl fmt::Display for TemporalRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemporalRejection::BeforeValidity => {
                f.write_str("generated before the certificate became valid")
            }
            TemporalRejection::FromFuture => f.write_str("generated after the verification time"),
        }
    }
}

/// The two instants a validation pass reasons about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationContext {
    pub signing_time: OffsetDateTime,
    pub verification_time: OffsetDateTime,
    /// How old PRESENT evidence may be
    pub present_freshness: Duration,
}

impl ValidationContext {
    pub fn new(signing_time: OffsetDateTime, verification_time: OffsetDateTime) -> Self {
        Self {
            signing_time,
            verification_time,
            present_freshness: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Signing and verification at the current instant
    pub fn now() -> Self {
        let now = OffsetDateTime::now_utc();
        Self::new(now, now)
    }

    pub fn with_freshness(mut self, freshness: Duration) -> Self {
        self.present_freshness = freshness;
        self
    }

    /// Earliest generation time that satisfies `context`
    pub fn threshold(&self, context: TimeBasedContext) -> OffsetDateTime {
        match context {
            TimeBasedContext::Historical => self.signing_time,
            TimeBasedContext::Present => self.verification_time - self.present_freshness,
        }
    }

    /// Evidence generated at `generated_at` satisfies every context in `contexts`
    pub fn satisfies(&self, generated_at: OffsetDateTime, contexts: TimeBasedContexts) -> bool {
        contexts
            .iter()
            .all(|context| generated_at >= self.threshold(context))
    }

    /// Admissibility of evidence for a certificate valid from `not_before`
    pub fn admit(
        &self,
        generated_at: OffsetDateTime,
        not_before: OffsetDateTime,
    ) -> std::result::Result<(), TemporalRejection> {
        if generated_at > self.verification_time {
            return Err(TemporalRejection::FromFuture);
        }
        if generated_at < not_before {
            return Err(TemporalRejection::BeforeValidity);
        }
        Ok(())
    }
}
