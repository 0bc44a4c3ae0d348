//! Error handling for the LTV engine
//!
//! Hard errors are reserved for programmer/policy mistakes, malformed inputs the
//! caller handed in directly, and trust failures of the signature itself.
//! Everything that happens while gathering evidence degrades into a
//! [`FetchError`] recorded on the outcome instead.

use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Kind of encoded artifact that failed to decode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Artifact {
    Certificate,
    Crl,
    OcspResponse,
    TimestampToken,
    DssEntry,
    Pem,
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Artifact::Certificate => "certificate",
            Artifact::Crl => "CRL",
            Artifact::OcspResponse => "OCSP response",
            Artifact::TimestampToken => "timestamp token",
            Artifact::DssEntry => "DSS entry",
            Artifact::Pem => "PEM block",
        };
        f.write_str(name)
    }
}

/// The main error type for LTV operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    Argument(String),
    #[error("Malformed {artifact}: {reason}")]
    Structural { artifact: Artifact, reason: String },
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Trust failure: {0}")]
    Trust(String),
    #[error("Document error: {0}")]
    Document(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("System error: {0}")]
    System(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn argument<S: Into<String>>(msg: S) -> Self {
        Error::Argument(msg.into())
    }
    pub fn structural<S: Into<String>>(artifact: Artifact, reason: S) -> Self {
        Error::Structural {
            artifact,
            reason: reason.into(),
        }
    }
    pub fn trust<S: Into<String>>(msg: S) -> Self {
        Error::Trust(msg.into())
    }
    pub fn document<S: Into<String>>(msg: S) -> Self {
        Error::Document(msg.into())
    }
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    /// True for the errors that must abort a signing operation
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Trust(_) | Error::Argument(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure of a single network exchange
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },
    #[error("could not connect to {url}: {reason}")]
    Connect { url: String, reason: String },
    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("invalid request for {url}: {reason}")]
    Request { url: String, reason: String },
    #[error("no transport configured")]
    Unavailable,
}

impl TransportError {
    /// Transient failures are worth another attempt; permanent ones are not
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Timeout { .. } | TransportError::Connect { .. } => true,
            TransportError::Status { status, .. } => *status >= 500 || *status == 429,
            TransportError::Request { .. } | TransportError::Unavailable => false,
        }
    }
}

/// Why a single revocation/timestamp/issuer fetch produced nothing usable
#[derive(Error, Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FetchError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("timed out")]
    Timeout,
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("responder signature does not verify: {0}")]
    SignatureInvalid(String),
    #[error("responder certificate chain unresolved: {0}")]
    ResponderUnresolved(String),
}

impl From<TransportError> for FetchError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout { .. } => FetchError::Timeout,
            other => FetchError::Transport(other.to_string()),
        }
    }
}

impl From<Error> for FetchError {
    fn from(err: Error) -> Self {
        match err {
            Error::Structural { artifact, reason } => {
                FetchError::Malformed(format!("{artifact}: {reason}"))
            }
            Error::Transport(t) => t.into(),
            other => FetchError::Transport(other.to_string()),
        }
    }
}
