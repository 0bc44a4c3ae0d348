//! Document container interface and the PDF values the DSS is written in
//!
//! The engine never parses or writes PDF files itself. It talks to the host
//! document through [`DocumentContainer`]: named top-level dictionaries,
//! indirect byte streams, and a flag telling whether the final write has begun.

use crate::error::{Error, Result};
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock};
use time::{OffsetDateTime, PrimitiveDateTime};
use time::macros::format_description;

// ============================================================================
// Names
// ============================================================================

/// Interned PDF name
///
/// The dictionary keys the DSS uses are pre-interned and compare by pointer.
#[derive(Debug, Clone, Eq)]
pub struct Name(Arc<str>);

impl Name {
    pub fn new(s: &str) -> Self {
        if let Some(interned) = Self::get_interned(s) {
            return interned;
        }
        Self(Arc::from(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_interned(&self) -> bool {
        DSS_NAMES.iter().any(|(_, arc)| Arc::ptr_eq(&self.0, arc))
    }

    fn get_interned(s: &str) -> Option<Self> {
        DSS_NAMES
            .iter()
            .find(|(name, _)| *name == s)
            .map(|(_, arc)| Self(Arc::clone(arc)))
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.0, &other.0) {
            return true;
        }
        self.0.as_ref() == other.0.as_ref()
    }
}

impl std::hash::Hash for Name {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.as_ref().hash(state);
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0)
    }
}

impl From<&str> for Name {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

static DSS_NAMES: LazyLock<Vec<(&'static str, Arc<str>)>> = LazyLock::new(|| {
    [
        "Type", "DSS", "Certs", "CRLs", "OCSPs", "VRI", "Cert", "CRL", "OCSP", "TS", "TU",
    ]
    .into_iter()
    .map(|name| (name, Arc::from(name)))
    .collect()
});

// ============================================================================
// Values
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfString(Vec<u8>);

impl PdfString {
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }
}

/// Indirect object reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjRef {
    pub num: i32,
    pub generation: i32,
}

impl ObjRef {
    pub fn new(num: i32, generation: i32) -> Self {
        Self { num, generation }
    }
}

impl fmt::Display for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} R", self.num, self.generation)
    }
}

pub type Dict = HashMap<Name, Object>;
pub type Array = Vec<Object>;

#[derive(Debug, Clone, Default, PartialEq)]
pub enum Object {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    String(PdfString),
    Name(Name),
    Array(Array),
    Dict(Dict),
    Ref(ObjRef),
}

impl Object {
    pub fn name(s: &str) -> Self {
        Object::Name(Name::new(s))
    }

    pub fn as_name(&self) -> Option<&Name> {
        if let Object::Name(n) = self { Some(n) } else { None }
    }

    pub fn as_string(&self) -> Option<&PdfString> {
        if let Object::String(s) = self { Some(s) } else { None }
    }

    pub fn as_array(&self) -> Option<&Array> {
        if let Object::Array(a) = self { Some(a) } else { None }
    }

    pub fn as_dict(&self) -> Option<&Dict> {
        if let Object::Dict(d) = self { Some(d) } else { None }
    }

    pub fn as_reference(&self) -> Option<ObjRef> {
        if let Object::Ref(r) = self { Some(*r) } else { None }
    }
}

/// PDF date string `D:YYYYMMDDHHmmSSZ` in UTC
pub fn pdf_date(at: OffsetDateTime) -> PdfString {
    let format = format_description!("D:[year][month][day][hour][minute][second]Z");
    let text = at
        .to_offset(time::UtcOffset::UTC)
        .format(&format)
        .unwrap_or_default();
    PdfString::new(text.into_bytes())
}

/// Inverse of [`pdf_date`]; other date layouts are not recognized
pub fn parse_pdf_date(date: &PdfString) -> Option<OffsetDateTime> {
    let format = format_description!("D:[year][month][day][hour][minute][second]Z");
    let text = date.as_str()?;
    PrimitiveDateTime::parse(text, &format)
        .ok()
        .map(PrimitiveDateTime::assume_utc)
}

// ============================================================================
// Container
// ============================================================================

/// The host document as seen by the engine
pub trait DocumentContainer: Send {
    fn get_dictionary(&self, name: &Name) -> Option<Dict>;

    fn put_dictionary(&mut self, name: Name, value: Dict) -> Result<()>;

    fn get_indirect_stream(&self, reference: ObjRef) -> Result<Bytes>;

    fn add_indirect_stream(&mut self, data: Bytes) -> Result<ObjRef>;

    /// Once true, nothing may be added to the document anymore
    fn is_closing_for_final_write(&self) -> bool;
}

/// In-memory document, for tests and callers without a PDF writer
#[derive(Debug, Default, Clone)]
pub struct MemoryDocument {
    dictionaries: HashMap<Name, Dict>,
    streams: Vec<Bytes>,
    closing: bool,
}

impl MemoryDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the final write; later mutations fail
    pub fn begin_final_write(&mut self) {
        self.closing = true;
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closing {
            return Err(Error::document("document is closing for final write"));
        }
        Ok(())
    }
}

impl DocumentContainer for MemoryDocument {
    fn get_dictionary(&self, name: &Name) -> Option<Dict> {
        self.dictionaries.get(name).cloned()
    }

    fn put_dictionary(&mut self, name: Name, value: Dict) -> Result<()> {
        self.ensure_open()?;
        self.dictionaries.insert(name, value);
        Ok(())
    }

    fn get_indirect_stream(&self, reference: ObjRef) -> Result<Bytes> {
        usize::try_from(reference.num - 1)
            .ok()
            .filter(|_| reference.generation == 0)
            .and_then(|index| self.streams.get(index))
            .cloned()
            .ok_or_else(|| Error::document(format!("no stream at {}", reference)))
    }

    fn add_indirect_stream(&mut self, data: Bytes) -> Result<ObjRef> {
        self.ensure_open()?;
        self.streams.push(data);
        let num = i32::try_from(self.streams.len())
            .map_err(|_| Error::document("too many indirect objects"))?;
        Ok(ObjRef::new(num, 0))
    }

    fn is_closing_for_final_write(&self) -> bool {
        self.closing
    }
}
