//! Certificates, fingerprints and the PKI capability boundary
//!
//! ASN.1 decoding and signature primitives are not implemented here. They are
//! consumed through [`PkiProvider`], which turns raw DER into the decoded views
//! this crate reasons about ([`CertificateInfo`], [`CrlInfo`], [`OcspInfo`],
//! [`TimestampToken`]) and checks signatures over [`SignedPayload`]s.
//!
//! What the crate does own is identity: every certificate, CRL and OCSP
//! response is keyed by the SHA-256 [`Fingerprint`] of its encoded form.

use crate::error::{Artifact, Error, Result};
use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256, Sha384, Sha512};
use std::fmt;
use std::hash::{Hash, Hasher};
use time::OffsetDateTime;

// ============================================================================
// Fingerprints
// ============================================================================

/// SHA-256 digest of an encoded artifact
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Fingerprint the given encoded bytes
    pub fn of(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Uppercase hex, the form used for keys in PDF dictionaries
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02X}", b)).collect()
    }

    /// First eight hex digits, for log lines
    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }

    pub fn from_hex(hex: &str) -> Result<Self> {
        if hex.len() != 64 {
            return Err(Error::argument(format!(
                "fingerprint must be 64 hex digits, got {}",
                hex.len()
            )));
        }
        let mut out = [0u8; 32];
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
                .map_err(|_| Error::argument("invalid hex digit in fingerprint"))?;
        }
        Ok(Self(out))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        Fingerprint::from_hex(&hex).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Identities
// ============================================================================

/// Subject or issuer identity
///
/// Equality and hashing use the encoded name only; the display form is for
/// humans and logs.
#[derive(Clone)]
pub struct DistinguishedName {
    raw: Bytes,
    display: String,
}

impl DistinguishedName {
    pub fn new(raw: impl Into<Bytes>, display: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            display: display.into(),
        }
    }

    /// Name whose encoded form is its display text
    pub fn from_display(display: &str) -> Self {
        Self::new(Bytes::copy_from_slice(display.as_bytes()), display)
    }

    /// Encoded (DER) form of the name
    pub fn as_der(&self) -> &[u8] {
        &self.raw
    }

    pub fn display(&self) -> &str {
        &self.display
    }
}

impl PartialEq for DistinguishedName {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for DistinguishedName {}

impl Hash for DistinguishedName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display)
    }
}

impl fmt::Debug for DistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DN({})", self.display)
    }
}

// ============================================================================
// Hash Algorithms
// ============================================================================

/// Digest algorithm used for message imprints and request identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    /// Dotted OID
    pub fn oid(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "2.16.840.1.101.3.4.2.1",
            HashAlgorithm::Sha384 => "2.16.840.1.101.3.4.2.2",
            HashAlgorithm::Sha512 => "2.16.840.1.101.3.4.2.3",
        }
    }

    /// DER AlgorithmIdentifier with NULL parameters
    pub fn algorithm_identifier_der(&self) -> &'static [u8] {
        match self {
            HashAlgorithm::Sha256 => &[
                0x30, 0x0D, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01,
                0x05, 0x00,
            ],
            HashAlgorithm::Sha384 => &[
                0x30, 0x0D, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x02,
                0x05, 0x00,
            ],
            HashAlgorithm::Sha512 => &[
                0x30, 0x0D, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x03,
                0x05, 0x00,
            ],
        }
    }

    pub fn output_len(&self) -> usize {
        match self {
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha384 => 48,
            HashAlgorithm::Sha512 => 64,
        }
    }

    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            HashAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
            HashAlgorithm::Sha384 => Sha384::digest(data).to_vec(),
            HashAlgorithm::Sha512 => Sha512::digest(data).to_vec(),
        }
    }
}

// ============================================================================
// Decoded Views
// ============================================================================

/// The signed portion of a structure together with its signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedPayload {
    /// Encoded to-be-signed bytes
    pub tbs: Bytes,
    /// Signature algorithm OID
    pub algorithm: String,
    pub signature: Bytes,
}

/// Attributes of an X.509 certificate consumed by the LTV engine
#[derive(Debug, Clone)]
pub struct CertificateInfo {
    /// Serial number, INTEGER content octets
    pub serial: Bytes,
    pub subject: DistinguishedName,
    pub issuer: DistinguishedName,
    /// subjectPublicKey BIT STRING contents
    pub public_key: Bytes,
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
    /// AIA caIssuers URIs
    pub ca_issuers: Vec<String>,
    pub crl_distribution_points: Vec<String>,
    /// AIA OCSP URIs
    pub ocsp_responders: Vec<String>,
    pub is_ca: bool,
    /// id-pkix-ocsp-nocheck present (OCSP responder certificates)
    pub ocsp_no_check: bool,
    pub signed: SignedPayload,
}

/// Parsed X.509 certificate, immutable once built
#[derive(Clone)]
pub struct Certificate {
    der: Bytes,
    fingerprint: Fingerprint,
    info: CertificateInfo,
}

impl Certificate {
    pub fn new(der: impl Into<Bytes>, info: CertificateInfo) -> Self {
        let der = der.into();
        Self {
            fingerprint: Fingerprint::of(&der),
            der,
            info,
        }
    }

    pub fn der(&self) -> &Bytes {
        &self.der
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    pub fn info(&self) -> &CertificateInfo {
        &self.info
    }

    pub fn serial(&self) -> &[u8] {
        &self.info.serial
    }

    pub fn subject(&self) -> &DistinguishedName {
        &self.info.subject
    }

    pub fn issuer(&self) -> &DistinguishedName {
        &self.info.issuer
    }

    pub fn public_key(&self) -> &[u8] {
        &self.info.public_key
    }

    pub fn not_before(&self) -> OffsetDateTime {
        self.info.not_before
    }

    pub fn not_after(&self) -> OffsetDateTime {
        self.info.not_after
    }

    pub fn ca_issuers(&self) -> &[String] {
        &self.info.ca_issuers
    }

    pub fn crl_distribution_points(&self) -> &[String] {
        &self.info.crl_distribution_points
    }

    pub fn ocsp_responders(&self) -> &[String] {
        &self.info.ocsp_responders
    }

    pub fn is_ca(&self) -> bool {
        self.info.is_ca
    }

    pub fn has_ocsp_no_check(&self) -> bool {
        self.info.ocsp_no_check
    }

    pub fn signed(&self) -> &SignedPayload {
        &self.info.signed
    }

    /// Subject and issuer identities are the same
    pub fn is_self_signed(&self) -> bool {
        self.info.subject == self.info.issuer
    }

    /// Within [notBefore, notAfter] at the given instant
    pub fn is_valid_at(&self, at: OffsetDateTime) -> bool {
        self.info.not_before <= at && at <= self.info.not_after
    }
}

impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint == other.fingerprint
    }
}

impl Eq for Certificate {}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("subject", &self.info.subject.display())
            .field("issuer", &self.info.issuer.display())
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

/// Revocation state reported by a CRL or an OCSP single response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertStatus {
    Good,
    Revoked { at: OffsetDateTime },
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevokedEntry {
    pub serial: Bytes,
    pub revoked_at: OffsetDateTime,
}

/// Decoded certificate revocation list
#[derive(Debug, Clone)]
pub struct CrlInfo {
    pub issuer: DistinguishedName,
    pub this_update: OffsetDateTime,
    pub next_update: Option<OffsetDateTime>,
    pub revoked: Vec<RevokedEntry>,
    pub signed: SignedPayload,
}

impl CrlInfo {
    /// A CRL speaks for every certificate of its issuer
    pub fn covers(&self, cert: &Certificate) -> bool {
        &self.issuer == cert.issuer()
    }

    pub fn status_of(&self, serial: &[u8]) -> CertStatus {
        self.revoked
            .iter()
            .find(|entry| entry.serial.as_ref() == serial)
            .map_or(CertStatus::Good, |entry| CertStatus::Revoked {
                at: entry.revoked_at,
            })
    }
}

/// How an OCSP responder names itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponderId {
    ByName(DistinguishedName),
    /// SHA-1 of the responder public key
    ByKeyHash(Bytes),
}

impl ResponderId {
    /// Whether `cert` could be the responder so named
    ///
    /// SHA-1 key hashes cannot be checked here and are left to the signature.
    pub fn names(&self, cert: &Certificate) -> bool {
        match self {
            ResponderId::ByName(name) => name == cert.subject(),
            ResponderId::ByKeyHash(hash) if hash.len() == 32 => {
                hash.as_ref() == Sha256::digest(cert.public_key()).as_slice()
            }
            ResponderId::ByKeyHash(_) => true,
        }
    }
}

/// Issuer half of an OCSP CertID
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuerHashes {
    /// `None` for digests outside [`HashAlgorithm`] (SHA-1)
    pub algorithm: Option<HashAlgorithm>,
    pub name_hash: Bytes,
    pub key_hash: Bytes,
}

impl IssuerHashes {
    pub fn of(issuer: &Certificate, algorithm: HashAlgorithm) -> Self {
        Self {
            algorithm: Some(algorithm),
            name_hash: algorithm.digest(issuer.subject().as_der()).into(),
            key_hash: algorithm.digest(issuer.public_key()).into(),
        }
    }

    /// `None` when the digest cannot be recomputed
    pub fn names(&self, issuer: &DistinguishedName) -> Option<bool> {
        let algorithm = self.algorithm?;
        Some(algorithm.digest(issuer.as_der()) == self.name_hash.as_ref())
    }

    pub fn matches(&self, issuer: &Certificate) -> Option<bool> {
        let algorithm = self.algorithm?;
        Some(
            self.names(issuer.subject())? && algorithm.digest(issuer.public_key()) == self.key_hash.as_ref(),
        )
    }
}

#[derive(Debug, Clone)]
pub struct SingleResponse {
    pub serial: Bytes,
    /// Serial numbers are unique per issuer only
    pub issuer: Option<IssuerHashes>,
    pub status: CertStatus,
    pub this_update: OffsetDateTime,
    pub next_update: Option<OffsetDateTime>,
}

impl SingleResponse {
    /// Serial matches and the CertID does not name another issuer
    pub fn is_about(&self, cert: &Certificate, issuer: &Certificate) -> bool {
        self.serial.as_ref() == cert.serial()
            && self
                .issuer
                .as_ref()
                .and_then(|hashes| hashes.matches(issuer))
                .unwrap_or(true)
    }
}

/// Decoded BasicOCSPResponse
#[derive(Debug, Clone)]
pub struct OcspInfo {
    pub responder: ResponderId,
    pub produced_at: OffsetDateTime,
    pub responses: Vec<SingleResponse>,
    /// DER certificates embedded by the responder
    pub certificates: Vec<Bytes>,
    pub signed: SignedPayload,
}

impl OcspInfo {
    /// Single response about `cert` as issued by `issuer`
    pub fn response_for(&self, cert: &Certificate, issuer: &Certificate) -> Option<&SingleResponse> {
        self.responses.iter().find(|single| single.is_about(cert, issuer))
    }
}

/// RFC 3161 timestamp token
#[derive(Debug, Clone)]
pub struct TimestampToken {
    /// Encoded token (ContentInfo), the bytes embedded into the document
    pub encoded: Bytes,
    pub gen_time: OffsetDateTime,
    pub hash_algorithm: HashAlgorithm,
    pub message_imprint: Bytes,
    pub nonce: Option<Bytes>,
    /// DER certificates carried by the token, signer first when known
    pub certificates: Vec<Bytes>,
    pub signed: SignedPayload,
}

impl TimestampToken {
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(&self.encoded)
    }
}

// ============================================================================
// Capability Interface
// ============================================================================

/// Trusted decoding and signature-verification library
pub trait PkiProvider: Send + Sync {
    fn parse_certificate(&self, der: &[u8]) -> Result<Certificate>;

    /// Whether `payload` carries a valid signature by `signer`'s key
    fn verify_signature(&self, signer: &Certificate, payload: &SignedPayload) -> bool;

    fn parse_crl(&self, der: &[u8]) -> Result<CrlInfo>;

    fn parse_ocsp_response(&self, der: &[u8]) -> Result<OcspInfo>;

    /// Decode a TimeStampResp and return its granted token
    fn parse_timestamp_response(&self, der: &[u8]) -> Result<TimestampToken>;

    /// Name linkage plus signature check
    fn verify_issued_by(&self, cert: &Certificate, issuer: &Certificate) -> bool {
        cert.issuer() == issuer.subject() && self.verify_signature(issuer, cert.signed())
    }

    /// Parse every CERTIFICATE block of a PEM bundle
    fn parse_pem_certificates(&self, pem: &str) -> Result<Vec<Certificate>> {
        pem_blocks(pem, "CERTIFICATE")?
            .iter()
            .map(|der| self.parse_certificate(der))
            .collect()
    }
}

/// Extract and base64-decode every `label` block from PEM text
pub fn pem_blocks(pem: &str, label: &str) -> Result<Vec<Vec<u8>>> {
    let begin_marker = format!("-----BEGIN {}-----", label);
    let end_marker = format!("-----END {}-----", label);

    let mut blocks = Vec::new();
    let mut current_pos = 0;

    while let Some(start) = pem[current_pos..].find(&begin_marker) {
        let body_start = current_pos + start + begin_marker.len();
        let end = pem[body_start..].find(&end_marker).ok_or_else(|| {
            Error::structural(Artifact::Pem, format!("PEM end marker not found: {}", label))
        })?;

        let base64_data: String = pem[body_start..body_start + end]
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();

        let der = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, &base64_data)
            .map_err(|e| {
                Error::structural(Artifact::Pem, format!("Failed to decode base64: {}", e))
            })?;
        blocks.push(der);
        current_pos = body_start + end + end_marker.len();
    }

    Ok(blocks)
}
