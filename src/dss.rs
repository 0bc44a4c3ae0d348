//! Document Security Store
//!
//! The document-level aggregate of certificates, CRLs and OCSP responses,
//! plus one VRI record per signature naming exactly what that signature
//! relies on. Entries are keyed by the SHA-256 of their encoding. Inserting a
//! fingerprint that is already present keeps the existing entry, so merging
//! is idempotent and nothing is ever removed.

use crate::document::{Array, Dict, DocumentContainer, Name, ObjRef, Object, parse_pdf_date, pdf_date};
use crate::error::{Artifact, Error, Result};
use crate::outcome::Assessed;
use crate::pki::{Fingerprint, PkiProvider, TimestampToken};
use crate::revocation::EvidenceKind;
use crate::store::CertificateStore;
use bytes::Bytes;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

/// One stored artifact and, once written or loaded, its stream reference
#[derive(Debug, Clone, PartialEq)]
pub struct DssEntry {
    pub fingerprint: Fingerprint,
    pub data: Bytes,
    pub reference: Option<ObjRef>,
}

impl DssEntry {
    fn new(data: Bytes, reference: Option<ObjRef>) -> Self {
        Self {
            fingerprint: Fingerprint::of(&data),
            data,
            reference,
        }
    }
}

/// Insertion-ordered set of entries keyed by fingerprint
#[derive(Debug, Clone, Default)]
pub struct EntrySet {
    entries: Vec<DssEntry>,
    index: HashMap<Fingerprint, usize>,
}

impl EntrySet {
    /// Add `data`; returns false and keeps the existing entry if already present
    pub fn insert(&mut self, data: Bytes) -> bool {
        self.insert_entry(DssEntry::new(data, None))
    }

    fn insert_entry(&mut self, entry: DssEntry) -> bool {
        if self.index.contains_key(&entry.fingerprint) {
            return false;
        }
        self.index.insert(entry.fingerprint, self.entries.len());
        self.entries.push(entry);
        true
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<&DssEntry> {
        self.index.get(fingerprint).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.index.contains_key(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DssEntry> {
        self.entries.iter()
    }

    pub fn fingerprints(&self) -> BTreeSet<Fingerprint> {
        self.index.keys().copied().collect()
    }

    fn reference_of(&self, fingerprint: &Fingerprint) -> Option<ObjRef> {
        self.get(fingerprint).and_then(|e| e.reference)
    }

    /// Write streams for entries that have none yet
    fn flush(&mut self, doc: &mut dyn DocumentContainer) -> Result<usize> {
        let mut written = 0;
        for entry in self.entries.iter_mut().filter(|e| e.reference.is_none()) {
            entry.reference = Some(doc.add_indirect_stream(entry.data.clone())?);
            written += 1;
        }
        Ok(written)
    }

    fn to_array(&self) -> Array {
        self.entries
            .iter()
            .filter_map(|e| e.reference.map(Object::Ref))
            .collect()
    }
}

/// Validation-related information of one signature
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VriEntry {
    pub certs: BTreeSet<Fingerprint>,
    pub crls: BTreeSet<Fingerprint>,
    pub ocsps: BTreeSet<Fingerprint>,
    /// The signature's own timestamp token
    pub timestamp: Option<DssEntry>,
    /// When the record was created
    pub updated: Option<OffsetDateTime>,
}

impl VriEntry {
    fn absorb(&mut self, other: VriEntry) -> bool {
        let before = (self.certs.len(), self.crls.len(), self.ocsps.len(), self.timestamp.is_some());
        self.certs.extend(other.certs);
        self.crls.extend(other.crls);
        self.ocsps.extend(other.ocsps);
        if self.timestamp.is_none() {
            self.timestamp = other.timestamp;
        }
        if self.updated.is_none() {
            self.updated = other.updated;
        }
        before != (self.certs.len(), self.crls.len(), self.ocsps.len(), self.timestamp.is_some())
    }

    /// Every fingerprint the signature relies on, evidence and certificates alike
    pub fn fingerprints(&self) -> BTreeSet<Fingerprint> {
        self.certs
            .iter()
            .chain(&self.crls)
            .chain(&self.ocsps)
            .copied()
            .collect()
    }
}

/// What one merge added
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub certs_added: usize,
    pub crls_added: usize,
    pub ocsps_added: usize,
    pub vri_created: bool,
    pub vri_updated: bool,
}

impl MergeReport {
    pub fn added(&self) -> usize {
        self.certs_added + self.crls_added + self.ocsps_added
    }
}

#[derive(Debug, Clone, Default)]
pub struct DocumentSecurityStore {
    certs: EntrySet,
    crls: EntrySet,
    ocsps: EntrySet,
    vri: BTreeMap<String, VriEntry>,
}

impl DocumentSecurityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn certificates(&self) -> &EntrySet {
        &self.certs
    }

    pub fn crls(&self) -> &EntrySet {
        &self.crls
    }

    pub fn ocsps(&self) -> &EntrySet {
        &self.ocsps
    }

    pub fn vri(&self, signature_id: &str) -> Option<&VriEntry> {
        self.vri.get(signature_id)
    }

    pub fn signature_ids(&self) -> impl Iterator<Item = &str> {
        self.vri.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.certs.is_empty() && self.crls.is_empty() && self.ocsps.is_empty() && self.vri.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "certs={} crls={} ocsps={} vri={}",
            self.certs.len(),
            self.crls.len(),
            self.ocsps.len(),
            self.vri.len()
        )
    }

    /// Merge one chain and its evidence under `signature_id`
    pub fn merge(&mut self, assessed: Assessed<'_>, signature_id: &str) -> MergeReport {
        self.merge_pass(signature_id, &[assessed], None, None)
    }

    /// Merge every chain of a signature's pass, with its timestamp if any
    pub fn merge_pass(
        &mut self,
        signature_id: &str,
        parts: &[Assessed<'_>],
        timestamp: Option<&TimestampToken>,
        updated: Option<OffsetDateTime>,
    ) -> MergeReport {
        let mut report = MergeReport::default();
        let mut vri = VriEntry {
            timestamp: timestamp.map(|t| DssEntry::new(t.encoded.clone(), None)),
            updated,
            ..VriEntry::default()
        };

        for part in parts {
            for cert in part.chain.certificates() {
                if self.certs.insert(cert.der().clone()) {
                    report.certs_added += 1;
                }
                vri.certs.insert(cert.fingerprint());
            }
            for evidence in part.bundle.evidence() {
                let (set, added, names) = match evidence.kind() {
                    EvidenceKind::Crl => (&mut self.crls, &mut report.crls_added, &mut vri.crls),
                    EvidenceKind::Ocsp => (&mut self.ocsps, &mut report.ocsps_added, &mut vri.ocsps),
                };
                if set.insert(evidence.encoded().clone()) {
                    *added += 1;
                }
                names.insert(evidence.fingerprint());
            }
        }

        match self.vri.get_mut(signature_id) {
            Some(existing) => report.vri_updated = existing.absorb(vri),
            None => {
                self.vri.insert(signature_id.to_string(), vri);
                report.vri_created = true;
            }
        }
        debug!(
            signature = signature_id,
            certs = report.certs_added,
            crls = report.crls_added,
            ocsps = report.ocsps_added,
            "DSS merge"
        );
        report
    }

    /// Add the DSS certificates to `store` so chain building can use them
    pub fn seed(&self, pki: &dyn PkiProvider, store: &mut CertificateStore) -> usize {
        let mut added = 0;
        for entry in self.certs.iter() {
            if store.contains(&entry.fingerprint) {
                continue;
            }
            match pki.parse_certificate(&entry.data) {
                Ok(cert) => {
                    store.add(cert);
                    added += 1;
                }
                Err(e) => {
                    warn!(fingerprint = %entry.fingerprint.short(), error = %e, "undecodable DSS certificate skipped");
                }
            }
        }
        added
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Read the `/DSS` dictionary of `doc`, or an empty store if it has none
    pub fn load(doc: &dyn DocumentContainer) -> Result<Self> {
        let mut dss = Self::new();
        let Some(dict) = doc.get_dictionary(&Name::new("DSS")) else {
            return Ok(dss);
        };

        load_array(doc, &dict, "Certs", &mut dss.certs)?;
        load_array(doc, &dict, "CRLs", &mut dss.crls)?;
        load_array(doc, &dict, "OCSPs", &mut dss.ocsps)?;

        if let Some(vri) = dict.get(&Name::new("VRI")) {
            let vri = vri
                .as_dict()
                .ok_or_else(|| Error::structural(Artifact::DssEntry, "/VRI is not a dictionary"))?;
            for (key, value) in vri {
                let record = value.as_dict().ok_or_else(|| {
                    Error::structural(Artifact::DssEntry, format!("VRI entry {} is not a dictionary", key))
                })?;
                let entry = VriEntry {
                    certs: load_array(doc, record, "Cert", &mut dss.certs)?,
                    crls: load_array(doc, record, "CRL", &mut dss.crls)?,
                    ocsps: load_array(doc, record, "OCSP", &mut dss.ocsps)?,
                    timestamp: match record.get(&Name::new("TS")) {
                        Some(object) => {
                            let reference = stream_reference(object, "TS")?;
                            Some(DssEntry::new(doc.get_indirect_stream(reference)?, Some(reference)))
                        }
                        None => None,
                    },
                    updated: record
                        .get(&Name::new("TU"))
                        .and_then(Object::as_string)
                        .and_then(parse_pdf_date),
                };
                dss.vri.insert(key.as_str().to_string(), entry);
            }
        }

        info!(summary = %dss.summary(), "loaded DSS");
        Ok(dss)
    }

    /// Write new streams and put the full `/DSS` dictionary back
    ///
    /// Entries loaded from or already written to `doc` keep their stream.
    /// Returns the number of streams appended.
    pub fn write(&mut self, doc: &mut dyn DocumentContainer) -> Result<usize> {
        if doc.is_closing_for_final_write() {
            return Err(Error::document("DSS cannot be written once the final write has begun"));
        }

        let mut written = self.certs.flush(doc)? + self.crls.flush(doc)? + self.ocsps.flush(doc)?;
        for entry in self.vri.values_mut() {
            if let Some(ts) = entry.timestamp.as_mut().filter(|ts| ts.reference.is_none()) {
                ts.reference = Some(doc.add_indirect_stream(ts.data.clone())?);
                written += 1;
            }
        }

        let mut dict = Dict::new();
        dict.insert(Name::new("Type"), Object::name("DSS"));
        put_array(&mut dict, "Certs", self.certs.to_array());
        put_array(&mut dict, "CRLs", self.crls.to_array());
        put_array(&mut dict, "OCSPs", self.ocsps.to_array());

        let mut vri = Dict::new();
        for (signature_id, entry) in &self.vri {
            vri.insert(Name::new(signature_id), Object::Dict(self.vri_dict(entry)));
        }
        if !vri.is_empty() {
            dict.insert(Name::new("VRI"), Object::Dict(vri));
        }

        doc.put_dictionary(Name::new("DSS"), dict)?;
        info!(streams = written, summary = %self.summary(), "wrote DSS");
        Ok(written)
    }

    fn vri_dict(&self, entry: &VriEntry) -> Dict {
        let refs = |set: &EntrySet, fingerprints: &BTreeSet<Fingerprint>| -> Array {
            fingerprints
                .iter()
                .filter_map(|fp| set.reference_of(fp).map(Object::Ref))
                .collect()
        };
        let mut dict = Dict::new();
        put_array(&mut dict, "Cert", refs(&self.certs, &entry.certs));
        put_array(&mut dict, "CRL", refs(&self.crls, &entry.crls));
        put_array(&mut dict, "OCSP", refs(&self.ocsps, &entry.ocsps));
        if let Some(reference) = entry.timestamp.as_ref().and_then(|ts| ts.reference) {
            dict.insert(Name::new("TS"), Object::Ref(reference));
        }
        if let Some(updated) = entry.updated {
            dict.insert(Name::new("TU"), Object::String(pdf_date(updated)));
        }
        dict
    }
}

fn put_array(dict: &mut Dict, key: &str, array: Array) {
    if !array.is_empty() {
        dict.insert(Name::new(key), Object::Array(array));
    }
}

fn stream_reference(object: &Object, key: &str) -> Result<ObjRef> {
    object.as_reference().ok_or_else(|| {
        Error::structural(Artifact::DssEntry, format!("/{} holds a direct object", key))
    })
}

/// Load the streams referenced by `dict[key]` into `set`
fn load_array(
    doc: &dyn DocumentContainer,
    dict: &Dict,
    key: &str,
    set: &mut EntrySet,
) -> Result<BTreeSet<Fingerprint>> {
    let mut fingerprints = BTreeSet::new();
    let Some(object) = dict.get(&Name::new(key)) else {
        return Ok(fingerprints);
    };
    let array = object
        .as_array()
        .ok_or_else(|| Error::structural(Artifact::DssEntry, format!("/{} is not an array", key)))?;
    for element in array {
        let reference = stream_reference(element, key)?;
        let entry = DssEntry::new(doc.get_indirect_stream(reference)?, Some(reference));
        fingerprints.insert(entry.fingerprint);
        set.insert_entry(entry);
    }
    Ok(fingerprints)
}
