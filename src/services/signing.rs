use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use crate::db::store::{IdentityStore, StoreError};
use crate::models::identity::{SigningIdentity, SigningSubject};
use crate::services::encryption::random_secret;
use crate::services::toolchain::{KeyGenerator, ToolchainError};

const KEYSTORE_EXTENSION: &str = "keystore";

/// Generates or reuses the signing identity for a domain.
///
/// Lookup, key creation and persistence for one domain run under a per-domain
/// async lock, so concurrent first builds for the same domain create exactly
/// one identity; the losers read the winner's record.
pub struct IdentityCache {
    store: Arc<dyn IdentityStore>,
    keys: Arc<dyn KeyGenerator>,
    keystore_root: PathBuf,
    subject: SigningSubject,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl IdentityCache {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        keys: Arc<dyn KeyGenerator>,
        keystore_root: impl Into<PathBuf>,
        subject: SigningSubject,
    ) -> Self {
        Self {
            store,
            keys,
            keystore_root: keystore_root.into(),
            subject,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Deterministic keystore location for a normalized domain.
    pub fn keystore_path(&self, domain: &str) -> PathBuf {
        self.keystore_root
            .join(format!("{}.{}", keystore_file_stem(domain), KEYSTORE_EXTENSION))
    }

    pub async fn get_or_create(&self, domain: &str) -> Result<SigningIdentity, IdentityError> {
        let domain = normalize_domain(domain)?;

        if let Some(existing) = self.store.find_identity(&domain).await? {
            tracing::debug!(domain = %domain, "Reusing signing identity");
            return Ok(existing);
        }

        let lock = self.lock_for(&domain);
        let result = {
            let _guard = lock.lock().await;
            self.create_locked(&domain).await
        };
        self.release_lock(&domain, lock);
        result
    }

    async fn create_locked(&self, domain: &str) -> Result<SigningIdentity, IdentityError> {
        // Another task may have created it while we waited for the lock.
        if let Some(existing) = self.store.find_identity(domain).await? {
            tracing::debug!(domain = %domain, "Signing identity created concurrently, reusing");
            return Ok(existing);
        }

        let keystore_path = self.keystore_path(domain);
        if let Some(owner) = self.store.find_identity_by_keystore(&keystore_path).await? {
            return Err(IdentityError::KeystoreCollision {
                domain: domain.to_string(),
                owner: owner.domain,
                path: keystore_path,
            });
        }
        remove_stale_keystore(&keystore_path).await?;

        let password = random_secret();
        let identity = SigningIdentity {
            domain: domain.to_string(),
            keystore_path,
            alias: domain.to_string(),
            store_password: password.clone(),
            key_password: password,
            subject: self.subject.clone(),
            created_at: Utc::now(),
        };

        self.keys.create_keystore(&identity).await?;
        if !tokio::fs::try_exists(&identity.keystore_path)
            .await
            .unwrap_or(false)
        {
            return Err(IdentityError::MissingKeystore(identity.keystore_path));
        }

        let persisted = self.store.insert_identity(&identity).await?;
        metrics::counter!("signing_identities_created_total").increment(1);
        tracing::info!(
            domain = %domain,
            keystore = %persisted.keystore_path.display(),
            "Created signing identity"
        );
        Ok(persisted)
    }

    fn lock_for(&self, domain: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(domain.to_string()).or_default().clone()
    }

    /// Drop the map entry once no other task holds or waits on the lock.
    fn release_lock(&self, domain: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the map, one here.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(domain);
        }
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// A keystore on disk with no persisted record comes from a creation that was
/// interrupted before anything was signed with it.
async fn remove_stale_keystore(path: &Path) -> Result<(), IdentityError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            tracing::warn!(keystore = %path.display(), "Removed keystore with no identity record");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(IdentityError::Io(e)),
    }
}

/// Lowercased host of a domain or URL, without a trailing dot.
pub fn normalize_domain(input: &str) -> Result<String, IdentityError> {
    let trimmed = input.trim();
    let host = if trimmed.contains("://") {
        reqwest::Url::parse(trimmed)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
            .ok_or_else(|| IdentityError::InvalidDomain(input.to_string()))?
    } else {
        trimmed.to_string()
    };

    let host = host.trim_end_matches('.').to_ascii_lowercase();
    if host.is_empty() {
        return Err(IdentityError::InvalidDomain(input.to_string()));
    }
    Ok(host)
}

/// Filesystem-safe stem: everything outside `[a-z0-9.-]` becomes `_`.
pub fn keystore_file_stem(domain: &str) -> String {
    domain
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("Invalid signing domain '{0}'")]
    InvalidDomain(String),

    #[error("Keystore {path} for {domain} already belongs to {owner}")]
    KeystoreCollision {
        domain: String,
        owner: String,
        path: PathBuf,
    },

    #[error("Key generator produced no keystore at {0}")]
    MissingKeystore(PathBuf),

    #[error("Key generation failed: {0}")]
    KeyGeneration(#[from] ToolchainError),

    #[error("Identity store error: {0}")]
    Store(#[from] StoreError),

    #[error("Keystore I/O failed: {0}")]
    Io(std::io::Error),
}
