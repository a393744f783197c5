use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Organizational metadata written into a new signing certificate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SigningSubject {
    pub full_name: String,
    pub organization: String,
    pub organizational_unit: String,
    pub country_code: String,
}

impl SigningSubject {
    /// X.500 distinguished name for `keytool -dname`.
    pub fn distinguished_name(&self, domain: &str) -> String {
        format!(
            "CN={}, OU={}, O={}, L={}, C={}",
            escape_dn(domain),
            escape_dn(&self.organizational_unit),
            escape_dn(&self.organization),
            escape_dn(&self.full_name),
            escape_dn(&self.country_code),
        )
    }
}

fn escape_dn(value: &str) -> String {
    value.replace('\\', "\\\\").replace(',', "\\,")
}

/// Signing credentials bound to one domain. Immutable once persisted: every
/// build for the domain reuses these values byte-for-byte.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SigningIdentity {
    pub domain: String,
    pub keystore_path: PathBuf,
    pub alias: String,
    pub store_password: String,
    pub key_password: String,
    pub subject: SigningSubject,
    pub created_at: DateTime<Utc>,
}

// Passwords stay out of logs.
impl fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("domain", &self.domain)
            .field("keystore_path", &self.keystore_path)
            .field("alias", &self.alias)
            .field("store_password", &"<redacted>")
            .field("key_password", &"<redacted>")
            .field("subject", &self.subject)
            .field("created_at", &self.created_at)
            .finish()
    }
}
