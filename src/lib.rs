//! pdf-ltv - Long-term validation engine for signed PDFs
//!
//! Given the signer certificate of a PDF signature, the engine builds the
//! trust chain, collects CRL and OCSP evidence for every certificate in it,
//! optionally obtains a signature timestamp, and merges everything into the
//! document's cumulative Document Security Store (PAdES B-LT).
//!
//! # Modules
//!
//! - `pki` - Certificates, fingerprints and the [`PkiProvider`] decoding boundary
//! - `store` / `chain` - Known certificates and leaf-to-root chain building
//! - `context` - HISTORICAL / PRESENT validation contexts and per-role policy
//! - `revocation` / `timestamp` - CRL, OCSP and TSA clients
//! - `collector` - Concurrent evidence collection with partial-failure tolerance
//! - `dss` / `document` - The Document Security Store and the host document interface
//! - `orchestrator` - The per-signature driver producing a [`ValidationOutcome`]
//!
//! # Example
//!
//! ```ignore
//! let mut ltv = LtvOrchestrator::online(pki, store, LtvConfig::default())?;
//! let outcome = ltv.process(&SignatureInput::new("Sig1", leaf_der, sig_value), &mut doc).await?;
//! println!("{}: {}", outcome.signature_id, outcome.status);
//! ```

pub mod chain;
pub mod collector;
pub mod config;
pub mod context;
pub mod der;
pub mod document;
pub mod dss;
pub mod error;
pub mod orchestrator;
pub mod outcome;
pub mod pki;
pub mod revocation;
pub mod store;
pub mod timestamp;
pub mod transport;

#[cfg(test)]
mod testing;

pub use chain::{Chain, ChainBuilder, ChainStatus, IssuerFetcher};
pub use collector::{EvidenceBundle, EvidenceCollector, EvidenceIndex};
pub use config::{LtvConfig, SourceSelection, TsaConfig};
pub use context::{CertificateRole, RolePolicy, TimeBasedContext, TimeBasedContexts, ValidationContext};
pub use document::{DocumentContainer, MemoryDocument};
pub use dss::{DocumentSecurityStore, MergeReport};
pub use error::{Error, FetchError, Result, TransportError};
pub use orchestrator::{LtvOrchestrator, SignatureInput};
pub use outcome::{CertificateSubStatus, OutcomeStatus, ValidationOutcome};
pub use pki::{Certificate, Fingerprint, HashAlgorithm, PkiProvider};
pub use revocation::{CrlClient, OcspClient, RevocationEvidence};
pub use store::CertificateStore;
pub use timestamp::TimestampClient;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
