use diesel::prelude::*;

use crate::schema::credentials;

/// OAuth provider a credential belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    /// CRM portal tokens, keyed by portal domain.
    Bitrix24,
    /// Conferencing tokens, keyed by caller id.
    Telemost,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Bitrix24 => "bitrix24",
            Provider::Telemost => "telemost",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decrypted token pair. `expires_at` is unix seconds, 0 when unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: i64,
    pub member_id: String,
    pub client_endpoint: String,
}

impl Credential {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>, expires_at: i64) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at,
            ..Default::default()
        }
    }

    pub fn has_refresh_token(&self) -> bool {
        !self.refresh_token.is_empty()
    }
}

#[derive(Queryable, Selectable, Insertable, Debug)]
#[diesel(table_name = credentials)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct CredentialRow {
    pub provider: String,
    pub identity: String,
    pub encrypted_access_token: String,
    pub encrypted_refresh_token: String,
    pub expires_at: i64,
    pub member_id: String,
    pub client_endpoint: String,
    pub updated_at: i64,
}
