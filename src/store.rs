//! Certificate Store
//!
//! In-memory set of known certificates keyed by fingerprint, with a subject
//! index for issuer lookup. Some certificates are additionally marked as trust
//! anchors. Adding a certificate that is already present keeps the stored copy.

use crate::error::Result;
use crate::pki::{Certificate, DistinguishedName, Fingerprint, PkiProvider};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Debug, Default, Clone)]
pub struct CertificateStore {
    by_fingerprint: HashMap<Fingerprint, Arc<Certificate>>,
    by_subject: HashMap<DistinguishedName, Vec<Fingerprint>>,
    anchors: HashSet<Fingerprint>,
}

impl CertificateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with trust anchors
    pub fn with_anchors<I>(anchors: I) -> Self
    where
        I: IntoIterator<Item = Certificate>,
    {
        let mut store = Self::new();
        for cert in anchors {
            store.add_trusted(cert);
        }
        store
    }

    /// Add a certificate, returning the shared stored copy
    ///
    /// If the fingerprint is already known the existing entry is returned and
    /// nothing is replaced.
    pub fn add(&mut self, cert: Certificate) -> Arc<Certificate> {
        self.add_shared(Arc::new(cert))
    }

    pub fn add_shared(&mut self, cert: Arc<Certificate>) -> Arc<Certificate> {
        let fp = cert.fingerprint();
        if let Some(existing) = self.by_fingerprint.get(&fp) {
            return Arc::clone(existing);
        }
        self.by_subject
            .entry(cert.subject().clone())
            .or_default()
            .push(fp);
        self.by_fingerprint.insert(fp, Arc::clone(&cert));
        cert
    }

    /// Add a certificate and mark it as a trust anchor
    pub fn add_trusted(&mut self, cert: Certificate) -> Arc<Certificate> {
        let stored = self.add(cert);
        self.anchors.insert(stored.fingerprint());
        stored
    }

    /// Promote an already-known certificate to trust anchor
    pub fn mark_trusted(&mut self, fingerprint: Fingerprint) -> bool {
        if self.by_fingerprint.contains_key(&fingerprint) {
            self.anchors.insert(fingerprint);
            true
        } else {
            false
        }
    }

    pub fn is_trusted(&self, fingerprint: &Fingerprint) -> bool {
        self.anchors.contains(fingerprint)
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<Arc<Certificate>> {
        self.by_fingerprint.get(fingerprint).cloned()
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.by_fingerprint.contains_key(fingerprint)
    }

    /// Certificates whose subject is `name`, in insertion order
    pub fn by_subject(&self, name: &DistinguishedName) -> Vec<Arc<Certificate>> {
        self.by_subject
            .get(name)
            .map(|fps| {
                fps.iter()
                    .filter_map(|fp| self.by_fingerprint.get(fp).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Candidate issuers of `cert`, anchors first
    pub fn issuer_candidates(&self, cert: &Certificate) -> Vec<Arc<Certificate>> {
        let mut candidates = self.by_subject(cert.issuer());
        candidates.sort_by_key(|c| !self.is_trusted(&c.fingerprint()));
        candidates
    }

    pub fn len(&self) -> usize {
        self.by_fingerprint.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_fingerprint.is_empty()
    }

    pub fn anchor_count(&self) -> usize {
        self.anchors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Certificate>> {
        self.by_fingerprint.values()
    }

    /// Parse and add DER certificates, returning how many were new
    pub fn import_der<'a, I>(&mut self, pki: &dyn PkiProvider, ders: I, trusted: bool) -> Result<usize>
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let mut added = 0;
        for der in ders {
            let cert = pki.parse_certificate(der)?;
            if !self.contains(&cert.fingerprint()) {
                added += 1;
            }
            if trusted {
                self.add_trusted(cert);
            } else {
                self.add(cert);
            }
        }
        Ok(added)
    }

    /// Import every certificate of a PEM bundle
    pub fn import_pem(&mut self, pki: &dyn PkiProvider, pem: &str, trusted: bool) -> Result<usize> {
        let certs = pki.parse_pem_certificates(pem)?;
        let before = self.len();
        for cert in certs {
            if trusted {
                self.add_trusted(cert);
            } else {
                self.add(cert);
            }
        }
        Ok(self.len() - before)
    }
}
