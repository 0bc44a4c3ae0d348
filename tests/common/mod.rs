//! Shared fixtures for the integration tests
//!
//! Artifacts are JSON documents standing in for DER. A signature is valid
//! when its value is the signer's subject name.

#![allow(dead_code)]

use bytes::Bytes;
use pdf_ltv::error::{Artifact, Error, Result, TransportError};
use pdf_ltv::pki::{
    CertStatus, Certificate, CertificateInfo, CrlInfo, DistinguishedName, HashAlgorithm, OcspInfo,
    PkiProvider, ResponderId, RevokedEntry, SignedPayload, SingleResponse, TimestampToken,
};
use pdf_ltv::transport::{HttpFetcher, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use time::macros::datetime;
use time::OffsetDateTime;

pub const NOT_BEFORE: OffsetDateTime = datetime!(2024-01-01 0:00 UTC);
pub const SIGNED_AT: OffsetDateTime = datetime!(2025-05-31 09:00 UTC);
pub const NOW: OffsetDateTime = datetime!(2025-06-01 12:00 UTC);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// JSON artifacts
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertTemplate {
    pub subject: String,
    pub issuer: String,
    #[serde(with = "time::serde::rfc3339")]
    pub not_before: OffsetDateTime,
    pub ca_issuers: Vec<String>,
    pub crl_urls: Vec<String>,
    pub ocsp_urls: Vec<String>,
    pub ocsp_no_check: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Status {
    Good,
    Revoked {
        #[serde(with = "time::serde::rfc3339")]
        at: OffsetDateTime,
    },
    Unknown,
}

impl From<&Status> for CertStatus {
    fn from(status: &Status) -> Self {
        match status {
            Status::Good => CertStatus::Good,
            Status::Revoked { at } => CertStatus::Revoked { at: *at },
            Status::Unknown => CertStatus::Unknown,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Encoded {
    Certificate {
        template: CertTemplate,
    },
    Crl {
        issuer: String,
        #[serde(with = "time::serde::rfc3339")]
        this_update: OffsetDateTime,
        revoked: Vec<String>,
        signer: String,
    },
    Ocsp {
        signer: String,
        #[serde(with = "time::serde::rfc3339")]
        produced_at: OffsetDateTime,
        responses: Vec<(String, Status)>,
        certificates: Vec<String>,
    },
    Timestamp {
        tsa: String,
        #[serde(with = "time::serde::rfc3339")]
        gen_time: OffsetDateTime,
        imprint: Vec<u8>,
        certificates: Vec<String>,
    },
}

fn encode(value: &Encoded) -> Bytes {
    Bytes::from(serde_json::to_vec(value).unwrap_or_default())
}

pub fn signed_by(signer: &str) -> SignedPayload {
    SignedPayload {
        tbs: Bytes::from_static(b"tbs"),
        algorithm: "1.2.840.113549.1.1.11".to_string(),
        signature: Bytes::copy_from_slice(signer.as_bytes()),
    }
}

fn dn(name: &str) -> DistinguishedName {
    DistinguishedName::from_display(name)
}

fn as_text(der: &Bytes) -> String {
    String::from_utf8_lossy(der).into_owned()
}

/// Certificate `subject` issued by `issuer`, with CRL and OCSP URLs of the issuer
pub fn cert(subject: &str, issuer: &str) -> Bytes {
    cert_with(subject, issuer, |_| {})
}

pub fn cert_with(subject: &str, issuer: &str, customize: impl FnOnce(&mut CertTemplate)) -> Bytes {
    let mut template = CertTemplate {
        subject: subject.to_string(),
        issuer: issuer.to_string(),
        not_before: NOT_BEFORE,
        ca_issuers: vec![aia_url(issuer)],
        crl_urls: vec![crl_url(issuer)],
        ocsp_urls: vec![ocsp_url(issuer)],
        ocsp_no_check: false,
    };
    customize(&mut template);
    encode(&Encoded::Certificate { template })
}

pub fn crl_url(issuer: &str) -> String {
    format!("http://crl.test/{}.crl", issuer.replace(' ', "_"))
}

pub fn ocsp_url(issuer: &str) -> String {
    format!("http://ocsp.test/{}", issuer.replace(' ', "_"))
}

pub fn aia_url(issuer: &str) -> String {
    format!("http://aia.test/{}.cer", issuer.replace(' ', "_"))
}

pub fn crl(issuer: &str, this_update: OffsetDateTime, revoked: &[&str]) -> Bytes {
    crl_signed_by(issuer, issuer, this_update, revoked)
}

/// CRL naming `issuer` but signed with `signer`'s key
pub fn crl_signed_by(issuer: &str, signer: &str, this_update: OffsetDateTime, revoked: &[&str]) -> Bytes {
    encode(&Encoded::Crl {
        issuer: issuer.to_string(),
        this_update,
        revoked: revoked.iter().map(|s| s.to_string()).collect(),
        signer: signer.to_string(),
    })
}

/// OCSP response signed by `signer` answering for each `(subject, status)`
pub fn ocsp(
    signer: &str,
    produced_at: OffsetDateTime,
    responses: &[(&str, Status)],
    embedded: &[&Bytes],
) -> Bytes {
    encode(&Encoded::Ocsp {
        signer: signer.to_string(),
        produced_at,
        responses: responses
            .iter()
            .map(|(subject, status)| (subject.to_string(), status.clone()))
            .collect(),
        certificates: embedded.iter().map(|der| as_text(der)).collect(),
    })
}

pub fn timestamp_response(tsa: &str, gen_time: OffsetDateTime, imprint: &[u8], certificates: &[&Bytes]) -> Bytes {
    encode(&Encoded::Timestamp {
        tsa: tsa.to_string(),
        gen_time,
        imprint: imprint.to_vec(),
        certificates: certificates.iter().map(|der| as_text(der)).collect(),
    })
}

/// Stateless provider decoding the JSON artifacts above
#[derive(Debug, Default)]
pub struct JsonPki;

impl JsonPki {
    pub fn shared() -> Arc<dyn PkiProvider> {
        Arc::new(JsonPki)
    }

    fn decode(der: &[u8], artifact: Artifact) -> Result<Encoded> {
        serde_json::from_slice(der).map_err(|e| Error::structural(artifact, e.to_string()))
    }
}

impl PkiProvider for JsonPki {
    fn parse_certificate(&self, der: &[u8]) -> Result<Certificate> {
        let Encoded::Certificate { template } = Self::decode(der, Artifact::Certificate)? else {
            return Err(Error::structural(Artifact::Certificate, "not a certificate"));
        };
        let info = CertificateInfo {
            serial: Bytes::copy_from_slice(template.subject.as_bytes()),
            subject: dn(&template.subject),
            issuer: dn(&template.issuer),
            public_key: Bytes::copy_from_slice(template.subject.as_bytes()),
            not_before: template.not_before,
            not_after: template.not_before + time::Duration::days(3650),
            ca_issuers: template.ca_issuers,
            crl_distribution_points: template.crl_urls,
            ocsp_responders: template.ocsp_urls,
            is_ca: template.subject == template.issuer,
            ocsp_no_check: template.ocsp_no_check,
            signed: signed_by(&template.issuer),
        };
        Ok(Certificate::new(Bytes::copy_from_slice(der), info))
    }

    fn verify_signature(&self, signer: &Certificate, payload: &SignedPayload) -> bool {
        payload.signature.as_ref() == signer.subject().display().as_bytes()
    }

    fn parse_crl(&self, der: &[u8]) -> Result<CrlInfo> {
        let Encoded::Crl {
            issuer,
            this_update,
            revoked,
            signer,
        } = Self::decode(der, Artifact::Crl)?
        else {
            return Err(Error::structural(Artifact::Crl, "not a CRL"));
        };
        Ok(CrlInfo {
            issuer: dn(&issuer),
            this_update,
            next_update: Some(this_update + time::Duration::days(7)),
            revoked: revoked
                .into_iter()
                .map(|serial| RevokedEntry {
                    serial: Bytes::from(serial.into_bytes()),
                    revoked_at: NOT_BEFORE + time::Duration::days(60),
                })
                .collect(),
            signed: signed_by(&signer),
        })
    }

    fn parse_ocsp_response(&self, der: &[u8]) -> Result<OcspInfo> {
        let Encoded::Ocsp {
            signer,
            produced_at,
            responses,
            certificates,
        } = Self::decode(der, Artifact::OcspResponse)?
        else {
            return Err(Error::structural(Artifact::OcspResponse, "not an OCSP response"));
        };
        Ok(OcspInfo {
            responder: ResponderId::ByName(dn(&signer)),
            produced_at,
            responses: responses
                .iter()
                .map(|(subject, status)| SingleResponse {
                    serial: Bytes::copy_from_slice(subject.as_bytes()),
                    issuer: None,
                    status: status.into(),
                    this_update: produced_at,
                    next_update: None,
                })
                .collect(),
            certificates: certificates.into_iter().map(|c| Bytes::from(c.into_bytes())).collect(),
            signed: signed_by(&signer),
        })
    }

    fn parse_timestamp_response(&self, der: &[u8]) -> Result<TimestampToken> {
        let Encoded::Timestamp {
            tsa,
            gen_time,
            imprint,
            certificates,
        } = Self::decode(der, Artifact::TimestampToken)?
        else {
            return Err(Error::structural(Artifact::TimestampToken, "not a timestamp response"));
        };
        Ok(TimestampToken {
            encoded: Bytes::from(format!("token:{}@{}", tsa, gen_time)),
            gen_time,
            hash_algorithm: HashAlgorithm::Sha256,
            message_imprint: Bytes::from(imprint),
            nonce: None,
            certificates: certificates.into_iter().map(|c| Bytes::from(c.into_bytes())).collect(),
            signed: signed_by(&tsa),
        })
    }
}

// ============================================================================
// Scripted network
// ============================================================================

type Route = std::result::Result<Bytes, TransportError>;

/// URL-routed responses with hit counting
#[derive(Default)]
pub struct Network {
    routes: Mutex<HashMap<String, Route>>,
    hits: Mutex<HashMap<String, usize>>,
}

impl Network {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn serve(&self, url: impl Into<String>, body: Bytes) {
        if let Ok(mut routes) = self.routes.lock() {
            routes.insert(url.into(), Ok(body));
        }
    }

    pub fn fail(&self, url: impl Into<String>, error: TransportError) {
        if let Ok(mut routes) = self.routes.lock() {
            routes.insert(url.into(), Err(error));
        }
    }

    pub fn hits(&self, url: &str) -> usize {
        self.hits
            .lock()
            .ok()
            .and_then(|hits| hits.get(url).copied())
            .unwrap_or(0)
    }

    pub fn total_hits(&self) -> usize {
        self.hits.lock().map(|hits| hits.values().sum()).unwrap_or(0)
    }

    fn answer(&self, url: &str) -> Route {
        if let Ok(mut hits) = self.hits.lock() {
            *hits.entry(url.to_string()).or_default() += 1;
        }
        self.routes
            .lock()
            .ok()
            .and_then(|routes| routes.get(url).cloned())
            .unwrap_or_else(|| {
                Err(TransportError::Status {
                    url: url.to_string(),
                    status: 404,
                })
            })
    }

    pub fn fetcher(self: &Arc<Self>) -> HttpFetcher {
        let network = Arc::clone(self);
        HttpFetcher::from_fn(
            move |request| {
                let answer = network.answer(&request.url);
                async move { answer }
            },
            Duration::from_secs(5),
            RetryPolicy::none(),
        )
    }
}
