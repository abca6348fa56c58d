use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::models::credential_models::{Credential, Provider};
use crate::repositories::credential_repository::{CredentialError, CredentialStore};
use crate::utils::time::now_seconds;

pub const DEFAULT_OAUTH_URL: &str = "https://oauth.bitrix.info/oauth/token/";
/// Token lifetime Bitrix24 uses when a payload does not state one.
pub const DEFAULT_EXPIRES_IN: i64 = 3600;

#[derive(Debug, Error)]
pub enum Bitrix24Error {
    #[error("Bitrix24 client credentials are not configured")]
    NotConfigured,
    #[error("No Bitrix24 tokens stored for portal {0}")]
    NotInstalled(String),
    #[error("Bitrix24 request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Bitrix24 OAuth error: {0}")]
    OAuth(String),
    #[error("Bitrix24 API error {error}: {description}")]
    Api { error: String, description: String },
    #[error(transparent)]
    Credentials(#[from] CredentialError),
}

/// Token payload from `oauth.bitrix.info`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PortalGrant {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(deserialize_with = "lenient_i64")]
    pub expires_in: i64,
    pub domain: String,
    pub member_id: String,
    pub client_endpoint: String,
}

fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(n) => n.as_i64().unwrap_or(DEFAULT_EXPIRES_IN),
        Value::String(s) => s.trim().parse().unwrap_or(DEFAULT_EXPIRES_IN),
        _ => DEFAULT_EXPIRES_IN,
    })
}

impl PortalGrant {
    pub fn into_credential(self) -> Credential {
        let expires_in = if self.expires_in > 0 { self.expires_in } else { DEFAULT_EXPIRES_IN };
        Credential {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: now_seconds() + expires_in,
            member_id: self.member_id,
            client_endpoint: self.client_endpoint,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Bitrix24Settings {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub oauth_url: String,
    pub timeout: Duration,
}

pub struct Bitrix24Client {
    http: Client,
    client_id: Option<String>,
    client_secret: Option<String>,
    oauth_url: String,
}

impl Bitrix24Client {
    pub fn new(settings: &Bitrix24Settings) -> Result<Self, Bitrix24Error> {
        let http = Client::builder().timeout(settings.timeout).build()?;
        Ok(Self {
            http,
            client_id: settings.client_id.clone().filter(|s| !s.is_empty()),
            client_secret: settings.client_secret.clone().filter(|s| !s.is_empty()),
            oauth_url: settings.oauth_url.clone(),
        })
    }

    fn client_credentials(&self) -> Result<(&str, &str), Bitrix24Error> {
        match (&self.client_id, &self.client_secret) {
            (Some(id), Some(secret)) => Ok((id, secret)),
            _ => Err(Bitrix24Error::NotConfigured),
        }
    }

    async fn token_request(&self, grant: &[(&str, &str)]) -> Result<PortalGrant, Bitrix24Error> {
        let (client_id, client_secret) = self.client_credentials()?;

        let mut form: Vec<(&str, &str)> = vec![("client_id", client_id), ("client_secret", client_secret)];
        form.extend_from_slice(grant);

        let response = self.http.post(&self.oauth_url).form(&form).send().await?;
        let status = response.status();
        let body: Value = response.json().await?;

        if let Some(error) = body.get("error").and_then(Value::as_str) {
            let description = body
                .get("error_description")
                .and_then(Value::as_str)
                .unwrap_or_default();
            return Err(Bitrix24Error::OAuth(format!("{} {}", error, description).trim().to_string()));
        }
        if !status.is_success() {
            return Err(Bitrix24Error::OAuth(format!("token endpoint returned {}", status)));
        }

        let grant: PortalGrant =
            serde_json::from_value(body).map_err(|e| Bitrix24Error::OAuth(e.to_string()))?;
        if grant.access_token.is_empty() {
            return Err(Bitrix24Error::OAuth("token response without access_token".to_string()));
        }
        Ok(grant)
    }

    pub async fn exchange_code(&self, code: &str) -> Result<PortalGrant, Bitrix24Error> {
        self.token_request(&[("grant_type", "authorization_code"), ("code", code)]).await
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<PortalGrant, Bitrix24Error> {
        self.token_request(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token)]).await
    }

    /// Calls a REST method on `domain` with the portal's stored token. An
    /// `expired_token`/`invalid_token` answer triggers one refresh and retry.
    pub async fn call_method(
        &self,
        store: &CredentialStore,
        domain: &str,
        method: &str,
        params: Map<String, Value>,
    ) -> Result<Value, Bitrix24Error> {
        let credential = store
            .get(Provider::Bitrix24, domain)?
            .ok_or_else(|| Bitrix24Error::NotInstalled(domain.to_string()))?;

        let endpoint = if credential.client_endpoint.is_empty() {
            format!("https://{}/rest/", domain)
        } else {
            credential.client_endpoint.clone()
        };
        let url = format!("{}/{}.json", endpoint.trim_end_matches('/'), method);

        let result = self.post_method(&url, &credential.access_token, &params).await?;
        if !is_token_error(&result) || !credential.has_refresh_token() {
            return into_result(result);
        }

        tracing::info!("Bitrix24 token for {} expired, refreshing", domain);
        let grant = self.refresh(&credential.refresh_token).await?;
        let mut refreshed = Credential {
            member_id: credential.member_id.clone(),
            client_endpoint: credential.client_endpoint.clone(),
            ..grant.clone().into_credential()
        };
        if !grant.client_endpoint.is_empty() {
            refreshed.client_endpoint = grant.client_endpoint;
        }
        if refreshed.refresh_token.is_empty() {
            refreshed.refresh_token = credential.refresh_token.clone();
        }
        store.put(Provider::Bitrix24, domain, &refreshed)?;

        let retried = self.post_method(&url, &refreshed.access_token, &params).await?;
        into_result(retried)
    }

    async fn post_method(&self, url: &str, token: &str, params: &Map<String, Value>) -> Result<Value, Bitrix24Error> {
        let mut body = params.clone();
        body.insert("auth".to_string(), Value::String(token.to_string()));

        let response = self.http.post(url).json(&body).send().await?;
        // Bitrix24 reports token errors with 401 and a JSON body; read it either way.
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|_| Bitrix24Error::Api {
            error: "invalid_response".to_string(),
            description: text.chars().take(200).collect(),
        })
    }
}

fn is_token_error(result: &Value) -> bool {
    matches!(
        result.get("error").and_then(Value::as_str),
        Some("expired_token") | Some("invalid_token")
    )
}

fn into_result(result: Value) -> Result<Value, Bitrix24Error> {
    if let Some(error) = result.get("error").and_then(Value::as_str) {
        return Err(Bitrix24Error::Api {
            error: error.to_string(),
            description: result
                .get("error_description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        });
    }
    Ok(result)
}
