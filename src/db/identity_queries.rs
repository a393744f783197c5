use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

use super::store::{IdentityStore, StoreError};
use super::PgStore;
use crate::models::identity::{SigningIdentity, SigningSubject};

/// Signing identity row as stored; passwords are sealed.
#[derive(Debug, sqlx::FromRow)]
struct IdentityRow {
    domain: String,
    keystore_path: String,
    alias: String,
    store_password: String,
    key_password: String,
    full_name: String,
    organization: String,
    organizational_unit: String,
    country_code: String,
    created_at: DateTime<Utc>,
}

const IDENTITY_COLUMNS: &str = "domain, keystore_path, alias, store_password, key_password, \
                                full_name, organization, organizational_unit, country_code, \
                                created_at";

impl PgStore {
    fn open_row(&self, row: IdentityRow) -> Result<SigningIdentity, StoreError> {
        Ok(SigningIdentity {
            store_password: self.cipher.open(&row.store_password)?,
            key_password: self.cipher.open(&row.key_password)?,
            domain: row.domain,
            keystore_path: PathBuf::from(row.keystore_path),
            alias: row.alias,
            subject: SigningSubject {
                full_name: row.full_name,
                organization: row.organization,
                organizational_unit: row.organizational_unit,
                country_code: row.country_code,
            },
            created_at: row.created_at,
        })
    }
}

fn path_text(path: &Path) -> Result<&str, StoreError> {
    path.to_str()
        .ok_or_else(|| StoreError::Corrupt(format!("non UTF-8 keystore path {}", path.display())))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl IdentityStore for PgStore {
    /// Find the signing identity for a domain
    async fn find_identity(&self, domain: &str) -> Result<Option<SigningIdentity>, StoreError> {
        let row = sqlx::query_as::<_, IdentityRow>(&format!(
            "SELECT {} FROM signing_identities WHERE domain = $1",
            IDENTITY_COLUMNS
        ))
        .bind(domain)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| self.open_row(r)).transpose()
    }

    /// Find the identity that owns a keystore file
    async fn find_identity_by_keystore(
        &self,
        keystore_path: &Path,
    ) -> Result<Option<SigningIdentity>, StoreError> {
        let row = sqlx::query_as::<_, IdentityRow>(&format!(
            "SELECT {} FROM signing_identities WHERE keystore_path = $1",
            IDENTITY_COLUMNS
        ))
        .bind(path_text(keystore_path)?)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| self.open_row(r)).transpose()
    }

    /// Insert a new identity; an existing record for the domain always wins
    async fn insert_identity(
        &self,
        identity: &SigningIdentity,
    ) -> Result<SigningIdentity, StoreError> {
        let store_password = self.cipher.seal(&identity.store_password)?;
        let key_password = self.cipher.seal(&identity.key_password)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO signing_identities
                (domain, keystore_path, alias, store_password, key_password,
                 full_name, organization, organizational_unit, country_code, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (domain) DO NOTHING
            "#,
        )
        .bind(&identity.domain)
        .bind(path_text(&identity.keystore_path)?)
        .bind(&identity.alias)
        .bind(store_password)
        .bind(key_password)
        .bind(&identity.subject.full_name)
        .bind(&identity.subject.organization)
        .bind(&identity.subject.organizational_unit)
        .bind(&identity.subject.country_code)
        .bind(identity.created_at)
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => {}
            // keystore_path is the only other unique column
            Err(e) if is_unique_violation(&e) => {
                return Err(StoreError::Conflict(format!(
                    "keystore {} already belongs to another domain",
                    identity.keystore_path.display()
                )));
            }
            Err(e) => return Err(e.into()),
        }

        self.find_identity(&identity.domain).await?.ok_or_else(|| {
            StoreError::Corrupt(format!("identity for {} vanished after insert", identity.domain))
        })
    }
}
