//! Engine configuration
//!
//! [`LtvConfig`] is plain serde data. It is read from JSON, validated, and
//! persisted by staging the new file beside the old one and renaming it
//! into place.

use crate::context::{RolePolicy, TimeBasedContexts};
use crate::error::{Error, Result};
use crate::pki::HashAlgorithm;
use crate::transport::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Which revocation sources the collector consults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceSelection {
    CrlOnly,
    OcspOnly,
    /// Query both and keep everything that verifies
    #[default]
    Both,
    /// Query OCSP, fall back to CRL when OCSP produced nothing
    OcspThenCrl,
}

impl SourceSelection {
    pub fn uses_crl(&self) -> bool {
        !matches!(self, SourceSelection::OcspOnly)
    }

    pub fn uses_ocsp(&self) -> bool {
        !matches!(self, SourceSelection::CrlOnly)
    }
}

/// Time-stamping authority configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TsaConfig {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_oid: Option<String>,
    #[serde(default = "default_tsa_timeout")]
    pub timeout_secs: u32,
    /// Ask the TSA to embed its certificate
    #[serde(default = "default_true")]
    pub include_cert: bool,
}

fn default_tsa_timeout() -> u32 {
    30
}

fn default_true() -> bool {
    true
}

impl TsaConfig {
    pub fn new(url: &str) -> Self {
        TsaConfig {
            url: url.to_string(),
            username: None,
            password: None,
            policy_oid: None,
            timeout_secs: default_tsa_timeout(),
            include_cert: true,
        }
    }

    pub fn with_auth(mut self, username: &str, password: &str) -> Self {
        self.username = Some(username.to_string());
        self.password = Some(password.to_string());
        self
    }

    pub fn with_policy(mut self, oid: &str) -> Self {
        self.policy_oid = Some(oid.to_string());
        self
    }

    pub fn with_timeout(mut self, secs: u32) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.timeout_secs))
    }

    /// Well-known TSA servers
    pub fn digicert() -> Self {
        Self::new("http://timestamp.digicert.com")
    }

    pub fn sectigo() -> Self {
        Self::new("http://timestamp.sectigo.com")
    }

    pub fn globalsign() -> Self {
        Self::new("http://timestamp.globalsign.com/tsa/r6advanced1")
    }

    pub fn freetsa() -> Self {
        Self::new("https://freetsa.org/tsr")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LtvConfig {
    /// Per-attempt network deadline
    pub fetch_timeout_secs: u64,
    pub retry: RetryPolicy,
    /// Maximum fetches in flight
    pub concurrency_limit: usize,
    /// Maximum age of evidence accepted for the PRESENT context
    pub present_freshness_secs: u64,
    pub max_chain_length: usize,
    /// Also collect revocation evidence for trust anchors
    pub include_trust_anchors: bool,
    /// Follow AIA caIssuers URIs for missing issuers
    pub fetch_missing_issuers: bool,
    /// Entries kept by the per-pass response cache
    pub fetch_cache_capacity: usize,
    pub hash_algorithm: HashAlgorithm,
    pub sources: SourceSelection,
    /// Contexts requested for every pass
    pub contexts: TimeBasedContexts,
    pub roles: RolePolicy,
    pub tsa: Option<TsaConfig>,
}

impl Default for LtvConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: 10,
            retry: RetryPolicy::default(),
            concurrency_limit: 8,
            present_freshness_secs: 24 * 60 * 60,
            max_chain_length: 16,
            include_trust_anchors: false,
            fetch_missing_issuers: true,
            fetch_cache_capacity: 256,
            hash_algorithm: HashAlgorithm::Sha256,
            sources: SourceSelection::Both,
            contexts: TimeBasedContexts::all(),
            roles: RolePolicy::default(),
            tsa: None,
        }
    }
}

impl LtvConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn present_freshness(&self) -> Duration {
        Duration::from_secs(self.present_freshness_secs)
    }

    pub fn with_tsa(mut self, tsa: TsaConfig) -> Self {
        self.tsa = Some(tsa);
        self
    }

    /// Reject settings that would make the engine hang or do nothing
    pub fn validate(&self) -> Result<()> {
        if self.concurrency_limit == 0 {
            return Err(Error::argument("concurrency_limit must be at least 1"));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(Error::argument("fetch_timeout_secs must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::argument("retry.max_attempts must be at least 1"));
        }
        if self.max_chain_length < 1 {
            return Err(Error::argument("max_chain_length must be at least 1"));
        }
        if self.fetch_cache_capacity == 0 {
            return Err(Error::argument("fetch_cache_capacity must be at least 1"));
        }
        if let Some(tsa) = &self.tsa {
            if tsa.url.is_empty() {
                return Err(Error::argument("tsa.url must not be empty"));
            }
            if tsa.timeout_secs == 0 {
                return Err(Error::argument("tsa.timeout_secs must be at least 1"));
            }
        }
        Ok(())
    }

    pub fn from_json_str(data: &str) -> Result<Self> {
        let config: LtvConfig = serde_json::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load and validate, failing on a missing or corrupt file
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }

    /// Load, falling back to defaults
    ///
    /// A corrupt file still contributes every top-level key that parses on its
    /// own.
    pub fn load_or_default(path: &Path) -> Self {
        let data = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "no config file, using defaults");
                return Self::default();
            }
        };

        match Self::from_json_str(&data) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "corrupted config, using defaults");
                Self::salvage(&data)
            }
        }
    }

    fn salvage(data: &str) -> Self {
        let mut config = Self::default();
        let Ok(value) = serde_json::from_str::<serde_json::Value>(data) else {
            return config;
        };
        let Some(obj) = value.as_object() else {
            return config;
        };

        if let Some(v) = obj.get("fetch_timeout_secs").and_then(|v| v.as_u64()) {
            if v > 0 {
                config.fetch_timeout_secs = v;
            }
        }
        if let Some(v) = obj.get("concurrency_limit").and_then(|v| v.as_u64()) {
            if v > 0 {
                config.concurrency_limit = v as usize;
            }
        }
        if let Some(v) = obj.get("present_freshness_secs").and_then(|v| v.as_u64()) {
            config.present_freshness_secs = v;
        }
        if let Some(v) = obj.get("max_chain_length").and_then(|v| v.as_u64()) {
            if v > 0 {
                config.max_chain_length = v as usize;
            }
        }
        if let Some(v) = obj.get("include_trust_anchors").and_then(|v| v.as_bool()) {
            config.include_trust_anchors = v;
        }
        if let Some(v) = obj.get("fetch_missing_issuers").and_then(|v| v.as_bool()) {
            config.fetch_missing_issuers = v;
        }
        if let Some(v) = obj.get("sources") {
            if let Ok(sources) = serde_json::from_value(v.clone()) {
                config.sources = sources;
            }
        }
        if let Some(v) = obj.get("roles") {
            if let Ok(roles) = serde_json::from_value(v.clone()) {
                config.roles = roles;
            }
        }
        if let Some(v) = obj.get("tsa") {
            if let Ok(tsa) = serde_json::from_value::<TsaConfig>(v.clone()) {
                config.tsa = Some(tsa);
                if let Err(e) = config.validate() {
                    warn!(error = %e, "dropping unusable tsa section");
                    config.tsa = None;
                }
            }
        }

        match config.validate() {
            Ok(()) => config,
            Err(e) => {
                warn!(error = %e, "salvaged config does not validate, using defaults");
                Self::default()
            }
        }
    }

    /// Persist as pretty JSON, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        let data = self.to_json_string()?;
        replace_file(path, data.as_bytes())?;
        debug!(path = %path.display(), "config saved");
        Ok(())
    }
}

/// `config.json` is staged as `config.json.partial`
fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

/// Stage the bytes next to `path` and swap them in; the staging file never outlives a failure
fn replace_file(path: &Path, contents: &[u8]) -> io::Result<()> {
    let staging = staging_path(path);
    let swapped = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&staging)
        .and_then(|mut file| {
            file.write_all(contents)?;
            file.sync_all()
        })
        .and_then(|()| fs::rename(&staging, path));
    if swapped.is_err() && staging.exists() {
        if let Err(e) = fs::remove_file(&staging) {
            warn!(path = %staging.display(), error = %e, "could not remove staged config");
        }
    }
    swapped
}
