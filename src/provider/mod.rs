//! Narrow facade over a hosted DNS API (§4.2).
//!
//! [`cloudflare::CloudflareProvider`] is the reference implementation; additional
//! providers implement [`Provider`] and are selected at startup from `provider.name`.
pub mod cloudflare;

pub use self::cloudflare::CloudflareProvider;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use thiserror::Error;

use crate::endpoint::{RecordType, Zone};

/// Classifies a failed Provider call per the error taxonomy in §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    Transient,
    Permanent,
    RateLimited,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("transient provider error: {0}")]
    Transient(String),
    #[error("permanent provider error ({status}): {message}")]
    Permanent { status: u16, message: String },
    #[error("rate limited after {attempts} attempts: {0}", attempts = .1)]
    RateLimited(String, u32),
    #[error("authentication rejected: {0}")]
    AuthFailed(String),
}

impl ProviderError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ProviderError::Transient(_) => ErrorClass::Transient,
            ProviderError::Permanent { .. } => ErrorClass::Permanent,
            ProviderError::RateLimited(..) => ErrorClass::RateLimited,
            ProviderError::AuthFailed(_) => ErrorClass::Permanent,
        }
    }
}

/// A single record exactly as a Provider represents it on the wire, grouped by
/// `(name, type)` on read so that a fanned-out multi-target A record round-trips
/// as one [`crate::endpoint::Endpoint`] (§4.2 "Mapping rules").
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProviderRecord {
    pub id: String,
    pub zone_id: String,
    pub name: String,
    pub record_type: RecordType,
    pub content: String,
    pub ttl: u32,
    pub proxied: Option<bool>,
}

/// A new or replacement record, as handed to [`Provider::create`]/[`Provider::update`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NewRecord {
    pub name: String,
    pub record_type: RecordType,
    pub content: String,
    pub ttl: u32,
    pub proxied: Option<bool>,
}

/// A TXT sidecar record exactly as stored at the Provider, before the Registry
/// decodes its ownership payload (§4.3).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TxtRecord {
    pub id: String,
    pub zone_id: String,
    pub name: String,
    pub content: String,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait Provider: Send + Sync {
    /// Zones visible to this credential, already filtered by the domain filter.
    async fn zones(&self) -> Result<Vec<Zone>, ProviderError>;
    /// All A/CNAME/TXT records in `zone`. `types`, when given, restricts the result.
    async fn records(
        &self,
        zone: &Zone,
        types: Option<&[RecordType]>,
    ) -> Result<Vec<ProviderRecord>, ProviderError>;
    async fn create(&self, zone: &Zone, record: &NewRecord) -> Result<String, ProviderError>;
    async fn update(&self, zone: &Zone, id: &str, record: &NewRecord) -> Result<(), ProviderError>;
    async fn delete(&self, zone: &Zone, id: &str) -> Result<(), ProviderError>;

    /// All TXT records in `zone`, handed to the Registry for sidecar decoding.
    async fn txt_records(&self, zone: &Zone) -> Result<Vec<TxtRecord>, ProviderError>;
    async fn create_txt(&self, zone: &Zone, name: &str, content: &str) -> Result<String, ProviderError>;
    async fn delete_txt(&self, zone: &Zone, id: &str) -> Result<(), ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanent_and_auth_errors_both_classify_permanent() {
        assert_eq!(
            ProviderError::Permanent { status: 404, message: "x".into() }.class(),
            ErrorClass::Permanent
        );
        assert_eq!(
            ProviderError::AuthFailed("bad token".into()).class(),
            ErrorClass::Permanent
        );
    }

    #[test]
    fn rate_limited_classifies_rate_limited() {
        assert_eq!(
            ProviderError::RateLimited("too many".into(), 3).class(),
            ErrorClass::RateLimited
        );
    }
}
