use diesel::prelude::*;
use thiserror::Error;

use crate::{
    models::credential_models::{Credential, CredentialRow, Provider},
    schema::credentials,
    utils::{
        encryption::{EncryptionError, TokenCipher},
        time::now_millis,
    },
    DbPool,
};

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Failed to get DB connection: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),
    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("Token encryption failed: {0}")]
    Encryption(#[from] EncryptionError),
}

/// Where a resolved conferencing token came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    /// Stored per caller after the Yandex OAuth flow.
    Session,
    /// Process-wide `YANDEX_OAUTH_TOKEN`. Never refreshed.
    Service,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub source: TokenSource,
}

impl ResolvedToken {
    pub fn can_refresh(&self) -> bool {
        self.source == TokenSource::Session && self.refresh_token.is_some()
    }
}

/// Encrypted token storage keyed by (provider, identity). Identity is the
/// portal domain for Bitrix24 and the caller id for Telemost.
pub struct CredentialStore {
    pool: DbPool,
    cipher: TokenCipher,
    service_token: Option<String>,
}

impl CredentialStore {
    pub fn new(pool: DbPool, cipher: TokenCipher, service_token: Option<String>) -> Self {
        let service_token = service_token.filter(|t| !t.trim().is_empty());
        Self { pool, cipher, service_token }
    }

    pub fn has_service_token(&self) -> bool {
        self.service_token.is_some()
    }

    pub fn get(&self, provider: Provider, identity: &str) -> Result<Option<Credential>, CredentialError> {
        let mut conn = self.pool.get()?;

        let row = credentials::table
            .find((provider.as_str(), identity))
            .select(CredentialRow::as_select())
            .first(&mut conn)
            .optional()?;

        let Some(row) = row else {
            return Ok(None);
        };

        let access_token = self.cipher.decrypt(&row.encrypted_access_token).map_err(|e| {
            tracing::error!("Failed to decrypt {} access token for {}: {}", provider, identity, e);
            e
        })?;
        let refresh_token = if row.encrypted_refresh_token.is_empty() {
            String::new()
        } else {
            self.cipher.decrypt(&row.encrypted_refresh_token)?
        };

        Ok(Some(Credential {
            access_token,
            refresh_token,
            expires_at: row.expires_at,
            member_id: row.member_id,
            client_endpoint: row.client_endpoint,
        }))
    }

    /// Replaces whatever was stored for (provider, identity).
    pub fn put(&self, provider: Provider, identity: &str, credential: &Credential) -> Result<(), CredentialError> {
        let encrypted_refresh_token = if credential.refresh_token.is_empty() {
            String::new()
        } else {
            self.cipher.encrypt(&credential.refresh_token)?
        };

        let row = CredentialRow {
            provider: provider.as_str().to_string(),
            identity: identity.to_string(),
            encrypted_access_token: self.cipher.encrypt(&credential.access_token)?,
            encrypted_refresh_token,
            expires_at: credential.expires_at,
            member_id: credential.member_id.clone(),
            client_endpoint: credential.client_endpoint.clone(),
            updated_at: now_millis(),
        };

        let mut conn = self.pool.get()?;
        diesel::replace_into(credentials::table)
            .values(&row)
            .execute(&mut conn)?;

        tracing::debug!("Stored {} credential for {}", provider, identity);
        Ok(())
    }

    /// Returns true when something was removed.
    pub fn clear(&self, provider: Provider, identity: &str) -> Result<bool, CredentialError> {
        let mut conn = self.pool.get()?;

        let deleted = diesel::delete(credentials::table.find((provider.as_str(), identity)))
            .execute(&mut conn)?;

        Ok(deleted > 0)
    }

    /// Token to use for a caller's Telemost calls: their own session token if
    /// one is stored, else the service token, else nothing.
    pub fn resolve_telemost(&self, caller_id: &str) -> Result<Option<ResolvedToken>, CredentialError> {
        if let Some(credential) = self.get(Provider::Telemost, caller_id)? {
            if !credential.access_token.is_empty() {
                return Ok(Some(ResolvedToken {
                    refresh_token: credential
                        .has_refresh_token()
                        .then(|| credential.refresh_token.clone()),
                    access_token: credential.access_token,
                    source: TokenSource::Session,
                }));
            }
        }

        Ok(self.service_token.as_ref().map(|token| ResolvedToken {
            access_token: token.clone(),
            refresh_token: None,
            source: TokenSource::Service,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::establish_pool;
    use tempfile::TempDir;

    const KEY: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=";

    fn store(service_token: Option<&str>) -> (TempDir, CredentialStore) {
        let dir = tempfile::tempdir().unwrap();
        let url = dir.path().join("credentials.db");
        let pool = establish_pool(url.to_str().unwrap(), 2).unwrap();
        let cipher = TokenCipher::from_base64_key(KEY).unwrap();
        (dir, CredentialStore::new(pool, cipher, service_token.map(String::from)))
    }

    #[test]
    fn put_then_get_round_trips_and_encrypts_at_rest() {
        let (_dir, store) = store(None);
        let mut credential = Credential::new("access-1", "refresh-1", 1_700_000_000);
        credential.member_id = "member".to_string();
        credential.client_endpoint = "https://portal.bitrix24.ru/rest/".to_string();

        store.put(Provider::Bitrix24, "portal.bitrix24.ru", &credential).unwrap();
        assert_eq!(store.get(Provider::Bitrix24, "portal.bitrix24.ru").unwrap(), Some(credential));

        let mut conn = store.pool.get().unwrap();
        let raw: String = credentials::table
            .select(credentials::encrypted_access_token)
            .first(&mut conn)
            .unwrap();
        assert_ne!(raw, "access-1");
    }

    #[test]
    fn providers_do_not_share_identities() {
        let (_dir, store) = store(None);
        store.put(Provider::Telemost, "42", &Credential::new("t", "", 0)).unwrap();

        assert!(store.get(Provider::Bitrix24, "42").unwrap().is_none());
    }

    #[test]
    fn put_replaces_and_clear_removes() {
        let (_dir, store) = store(None);
        store.put(Provider::Telemost, "42", &Credential::new("old", "r", 0)).unwrap();
        store.put(Provider::Telemost, "42", &Credential::new("new", "", 0)).unwrap();

        let stored = store.get(Provider::Telemost, "42").unwrap().unwrap();
        assert_eq!(stored.access_token, "new");
        assert!(!stored.has_refresh_token());

        assert!(store.clear(Provider::Telemost, "42").unwrap());
        assert!(!store.clear(Provider::Telemost, "42").unwrap());
        assert!(store.get(Provider::Telemost, "42").unwrap().is_none());
    }

    #[test]
    fn resolve_prefers_session_over_service_token() {
        let (_dir, store) = store(Some("service"));
        store.put(Provider::Telemost, "42", &Credential::new("session", "refresh", 0)).unwrap();

        let own = store.resolve_telemost("42").unwrap().unwrap();
        assert_eq!(own.access_token, "session");
        assert_eq!(own.source, TokenSource::Session);
        assert!(own.can_refresh());

        let fallback = store.resolve_telemost("7").unwrap().unwrap();
        assert_eq!(fallback.access_token, "service");
        assert_eq!(fallback.source, TokenSource::Service);
        assert!(!fallback.can_refresh());
    }

    #[test]
    fn resolve_without_any_token_is_none() {
        let (_dir, store) = store(Some("   "));
        assert!(!store.has_service_token());
        assert!(store.resolve_telemost("42").unwrap().is_none());
    }
}
