//! Registry-backed PKI fake for unit tests
//!
//! Encoded artifacts are opaque labels registered with the fake; parsing looks
//! the label up. A signature is valid when it names the signer's subject.

use crate::error::{Artifact, Error, Result};
use crate::pki::{
    CertStatus, Certificate, CertificateInfo, CrlInfo, DistinguishedName, HashAlgorithm,
    OcspInfo, PkiProvider, ResponderId, RevokedEntry, SignedPayload, SingleResponse,
    TimestampToken,
};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use time::macros::datetime;
use time::OffsetDateTime;

pub const NOT_BEFORE: OffsetDateTime = datetime!(2024-01-01 0:00 UTC);
pub const NOT_AFTER: OffsetDateTime = datetime!(2034-01-01 0:00 UTC);

pub fn signed_by(signer: &str) -> SignedPayload {
    SignedPayload {
        tbs: Bytes::from_static(b"tbs"),
        algorithm: "1.2.840.113549.1.1.11".to_string(),
        signature: Bytes::from(format!("sig:{}", signer)),
    }
}

pub fn dn(name: &str) -> DistinguishedName {
    DistinguishedName::from_display(name)
}

#[derive(Clone)]
enum Registered {
    Certificate(Certificate),
    Crl(CrlInfo),
    Ocsp(OcspInfo),
    Timestamp(TimestampToken),
}

#[derive(Default)]
pub struct FakePki {
    artifacts: Mutex<HashMap<Bytes, Registered>>,
}

impl FakePki {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn register(&self, der: Bytes, value: Registered) {
        if let Ok(mut map) = self.artifacts.lock() {
            map.insert(der, value);
        }
    }

    fn lookup(&self, der: &[u8]) -> Option<Registered> {
        self.artifacts.lock().ok()?.get(der).cloned()
    }

    /// Certificate `subject` issued by `issuer`, serial derived from the name
    pub fn cert(&self, subject: &str, issuer: &str) -> Certificate {
        self.cert_with(subject, issuer, |_| {})
    }

    pub fn cert_with(
        &self,
        subject: &str,
        issuer: &str,
        customize: impl FnOnce(&mut CertificateInfo),
    ) -> Certificate {
        let mut info = CertificateInfo {
            serial: Bytes::copy_from_slice(subject.as_bytes()),
            subject: dn(subject),
            issuer: dn(issuer),
            public_key: Bytes::from(format!("key:{}", subject)),
            not_before: NOT_BEFORE,
            not_after: NOT_AFTER,
            ca_issuers: Vec::new(),
            crl_distribution_points: vec![format!("http://crl.test/{}.crl", issuer)],
            ocsp_responders: vec![format!("http://ocsp.test/{}", issuer)],
            is_ca: subject == issuer,
            ocsp_no_check: false,
            signed: signed_by(issuer),
        };
        customize(&mut info);
        let der = Bytes::from(format!("cert:{}<{}", subject, issuer));
        let cert = Certificate::new(der.clone(), info);
        self.register(der, Registered::Certificate(cert.clone()));
        cert
    }

    /// CRL by `issuer` listing `revoked` serials
    pub fn crl(&self, issuer: &str, this_update: OffsetDateTime, revoked: &[&str]) -> Bytes {
        let der = Bytes::from(format!("crl:{}@{}:{}", issuer, this_update, revoked.join(",")));
        let info = CrlInfo {
            issuer: dn(issuer),
            this_update,
            next_update: Some(this_update + time::Duration::days(7)),
            revoked: revoked
                .iter()
                .map(|serial| RevokedEntry {
                    serial: Bytes::copy_from_slice(serial.as_bytes()),
                    revoked_at: NOT_BEFORE + time::Duration::days(30),
                })
                .collect(),
            signed: signed_by(issuer),
        };
        self.register(der.clone(), Registered::Crl(info));
        der
    }

    /// CRL naming `issuer` but signed with `signer`'s key
    pub fn crl_signed_by(&self, issuer: &str, signer: &str, this_update: OffsetDateTime) -> Bytes {
        let der = Bytes::from(format!("crl:{}/{}@{}", issuer, signer, this_update));
        let info = CrlInfo {
            issuer: dn(issuer),
            this_update,
            next_update: None,
            revoked: Vec::new(),
            signed: signed_by(signer),
        };
        self.register(der.clone(), Registered::Crl(info));
        der
    }

    /// OCSP response about `subject` signed by `signer`
    pub fn ocsp(
        &self,
        signer: &str,
        subject: &str,
        produced_at: OffsetDateTime,
        status: CertStatus,
        embedded: Vec<Bytes>,
    ) -> Bytes {
        self.ocsp_with(signer, subject, produced_at, status, |info| {
            info.certificates = embedded;
        })
    }

    pub fn ocsp_with(
        &self,
        signer: &str,
        subject: &str,
        produced_at: OffsetDateTime,
        status: CertStatus,
        customize: impl FnOnce(&mut OcspInfo),
    ) -> Bytes {
        let mut info = OcspInfo {
            responder: ResponderId::ByName(dn(signer)),
            produced_at,
            responses: vec![SingleResponse {
                serial: Bytes::copy_from_slice(subject.as_bytes()),
                issuer: None,
                status,
                this_update: produced_at,
                next_update: None,
            }],
            certificates: Vec::new(),
            signed: signed_by(signer),
        };
        customize(&mut info);
        let der = Bytes::from(format!("ocsp:{:?}", info));
        self.register(der.clone(), Registered::Ocsp(info));
        der
    }

    /// TimeStampResp whose token binds `imprint`
    pub fn timestamp(
        &self,
        tsa: &str,
        imprint: &[u8],
        gen_time: OffsetDateTime,
        certificates: Vec<Bytes>,
    ) -> Bytes {
        let der = Bytes::from(format!("tsr:{}@{}:{:02x?}", tsa, gen_time, imprint));
        let token = TimestampToken {
            encoded: Bytes::from(format!("tst:{}@{}", tsa, gen_time)),
            gen_time,
            hash_algorithm: HashAlgorithm::Sha256,
            message_imprint: Bytes::copy_from_slice(imprint),
            nonce: None,
            certificates,
            signed: signed_by(tsa),
        };
        self.register(der.clone(), Registered::Timestamp(token));
        der
    }
}

impl PkiProvider for FakePki {
    fn parse_certificate(&self, der: &[u8]) -> Result<Certificate> {
        match self.lookup(der) {
            Some(Registered::Certificate(cert)) => Ok(cert),
            _ => Err(Error::structural(Artifact::Certificate, "unknown certificate")),
        }
    }

    fn verify_signature(&self, signer: &Certificate, payload: &SignedPayload) -> bool {
        payload.signature.as_ref() == format!("sig:{}", signer.subject()).as_bytes()
    }

    fn parse_crl(&self, der: &[u8]) -> Result<CrlInfo> {
        match self.lookup(der) {
            Some(Registered::Crl(info)) => Ok(info),
            _ => Err(Error::structural(Artifact::Crl, "unknown CRL")),
        }
    }

    fn parse_ocsp_response(&self, der: &[u8]) -> Result<OcspInfo> {
        match self.lookup(der) {
            Some(Registered::Ocsp(info)) => Ok(info),
            _ => Err(Error::structural(Artifact::OcspResponse, "unknown OCSP response")),
        }
    }

    fn parse_timestamp_response(&self, der: &[u8]) -> Result<TimestampToken> {
        match self.lookup(der) {
            Some(Registered::Timestamp(token)) => Ok(token),
            _ => Err(Error::structural(Artifact::TimestampToken, "unknown timestamp response")),
        }
    }
}
