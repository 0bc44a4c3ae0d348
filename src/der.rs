//! DER encoding of the two requests the engine sends
//!
//! Only encoding lives here: RFC 3161 `TimeStampReq` and RFC 6960
//! `OCSPRequest`. Responses are decoded by the [`PkiProvider`].
//!
//! [`PkiProvider`]: crate::pki::PkiProvider

use crate::error::{Error, Result};
use crate::pki::{Certificate, HashAlgorithm};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use time::OffsetDateTime;

const TAG_BOOLEAN: u8 = 0x01;
const TAG_INTEGER: u8 = 0x02;
const TAG_OCTET_STRING: u8 = 0x04;
const TAG_OID: u8 = 0x06;
const TAG_SEQUENCE: u8 = 0x30;
const TAG_CONTEXT_2: u8 = 0xA2;

/// id-pkix-ocsp-nonce
const OCSP_NONCE_OID: &str = "1.3.6.1.5.5.7.48.1.2";

pub fn encode_length(len: usize) -> Vec<u8> {
    if len < 128 {
        vec![len as u8]
    } else if len < 256 {
        vec![0x81, len as u8]
    } else if len < 65536 {
        vec![0x82, (len >> 8) as u8, len as u8]
    } else {
        vec![0x83, (len >> 16) as u8, (len >> 8) as u8, len as u8]
    }
}

/// Tag-length-value
pub fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len() + 4);
    out.push(tag);
    out.extend(encode_length(content.len()));
    out.extend_from_slice(content);
    out
}

fn sequence(parts: &[&[u8]]) -> Vec<u8> {
    tlv(TAG_SEQUENCE, &parts.concat())
}

/// INTEGER from unsigned big-endian magnitude
pub fn unsigned_integer(magnitude: &[u8]) -> Vec<u8> {
    let first = magnitude.iter().position(|b| *b != 0);
    let trimmed = match first {
        Some(i) => &magnitude[i..],
        None => &[0u8][..],
    };
    if trimmed[0] & 0x80 != 0 {
        let mut content = Vec::with_capacity(trimmed.len() + 1);
        content.push(0);
        content.extend_from_slice(trimmed);
        tlv(TAG_INTEGER, &content)
    } else {
        tlv(TAG_INTEGER, trimmed)
    }
}

/// OBJECT IDENTIFIER from dotted notation
pub fn object_identifier(dotted: &str) -> Result<Vec<u8>> {
    let arcs = dotted
        .split('.')
        .map(|arc| arc.parse::<u64>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| Error::argument(format!("invalid OID: {}", dotted)))?;

    if arcs.len() < 2 || arcs[0] > 2 || (arcs[0] < 2 && arcs[1] > 39) {
        return Err(Error::argument(format!("invalid OID: {}", dotted)));
    }

    let mut content = Vec::new();
    push_base128(&mut content, arcs[0] * 40 + arcs[1]);
    for arc in &arcs[2..] {
        push_base128(&mut content, *arc);
    }
    Ok(tlv(TAG_OID, &content))
}

fn push_base128(out: &mut Vec<u8>, mut value: u64) {
    let mut digits = vec![(value & 0x7F) as u8];
    value >>= 7;
    while value > 0 {
        digits.push(((value & 0x7F) as u8) | 0x80);
        value >>= 7;
    }
    digits.reverse();
    out.extend(digits);
}

/// Fresh request nonce
///
/// Not secret; it only has to differ between requests so replayed responses
/// can be told apart.
pub fn nonce(seed: &[u8]) -> [u8; 16] {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let mut hasher = Sha256::new();
    hasher.update(seed);
    hasher.update(OffsetDateTime::now_utc().unix_timestamp_nanos().to_be_bytes());
    hasher.update(COUNTER.fetch_add(1, Ordering::Relaxed).to_be_bytes());
    let digest = hasher.finalize();
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest[..16]);
    out
}

// ============================================================================
// RFC 3161
// ============================================================================

/// Parameters of a TimeStampReq
#[derive(Debug, Clone)]
pub struct TimestampRequest<'a> {
    pub imprint: &'a [u8],
    pub hash_algorithm: HashAlgorithm,
    pub policy_oid: Option<&'a str>,
    pub nonce: Option<&'a [u8]>,
    pub cert_req: bool,
}

/// Encode a TimeStampReq
///
/// ```text
/// TimeStampReq ::= SEQUENCE {
///   version        INTEGER { v1(1) },
///   messageImprint MessageImprint,
///   reqPolicy      TSAPolicyId OPTIONAL,
///   nonce          INTEGER OPTIONAL,
///   certReq        BOOLEAN DEFAULT FALSE }
/// ```
pub fn timestamp_request(req: &TimestampRequest<'_>) -> Result<Vec<u8>> {
    if req.imprint.len() != req.hash_algorithm.output_len() {
        return Err(Error::argument(format!(
            "message imprint is {} bytes, {:?} needs {}",
            req.imprint.len(),
            req.hash_algorithm,
            req.hash_algorithm.output_len()
        )));
    }

    let mut body = vec![TAG_INTEGER, 0x01, 0x01];

    let message_imprint = sequence(&[
        req.hash_algorithm.algorithm_identifier_der(),
        &tlv(TAG_OCTET_STRING, req.imprint),
    ]);
    body.extend(message_imprint);

    if let Some(policy) = req.policy_oid {
        body.extend(object_identifier(policy)?);
    }
    if let Some(nonce) = req.nonce {
        body.extend(unsigned_integer(nonce));
    }
    // DEFAULT FALSE is omitted
    if req.cert_req {
        body.extend_from_slice(&[TAG_BOOLEAN, 0x01, 0xFF]);
    }

    Ok(tlv(TAG_SEQUENCE, &body))
}

// ============================================================================
// RFC 6960
// ============================================================================

/// Encode a CertID for `cert` issued by `issuer`
pub fn ocsp_cert_id(cert: &Certificate, issuer: &Certificate, alg: HashAlgorithm) -> Vec<u8> {
    let name_hash = alg.digest(issuer.subject().as_der());
    let key_hash = alg.digest(issuer.public_key());
    sequence(&[
        alg.algorithm_identifier_der(),
        &tlv(TAG_OCTET_STRING, &name_hash),
        &tlv(TAG_OCTET_STRING, &key_hash),
        &tlv(TAG_INTEGER, cert.serial()),
    ])
}

/// Encode an unsigned single-certificate OCSPRequest
///
/// ```text
/// OCSPRequest ::= SEQUENCE { tbsRequest TBSRequest }
/// TBSRequest  ::= SEQUENCE {
///   requestList        SEQUENCE OF Request,
///   requestExtensions  [2] EXPLICIT Extensions OPTIONAL }
/// ```
pub fn ocsp_request(
    cert: &Certificate,
    issuer: &Certificate,
    nonce: Option<&[u8]>,
) -> Result<Vec<u8>> {
    if cert.serial().is_empty() {
        return Err(Error::argument(format!(
            "{} has no serial number to query",
            cert.subject()
        )));
    }
    let request = sequence(&[&ocsp_cert_id(cert, issuer, HashAlgorithm::Sha256)]);
    let request_list = sequence(&[&request]);

    let mut tbs = request_list;
    if let Some(nonce) = nonce {
        let extension = sequence(&[
            &object_identifier(OCSP_NONCE_OID)?,
            &tlv(TAG_OCTET_STRING, &tlv(TAG_OCTET_STRING, nonce)),
        ]);
        let extensions = sequence(&[&extension]);
        tbs.extend(tlv(TAG_CONTEXT_2, &extensions));
    }

    let tbs_request = tlv(TAG_SEQUENCE, &tbs);
    Ok(sequence(&[&tbs_request]))
}
